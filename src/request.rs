use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};

use crate::body::ReplayableBody;
use crate::clock_skew::apply_offset;
use crate::util::{build_request_uri, parse_header_name, parse_header_value};

/// Per-request overrides of client configuration.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    read_limit: Option<usize>,
    execution_timeout: Option<Duration>,
    attempt_timeout: Option<Duration>,
    headers: HeaderMap,
    parameters: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes a streamed body may be buffered for replay.
    pub fn read_limit(mut self, read_limit: usize) -> Self {
        self.read_limit = Some(read_limit.max(1));
        self
    }

    pub fn execution_timeout(mut self, execution_timeout: Duration) -> Self {
        self.execution_timeout = Some(execution_timeout);
        self
    }

    pub fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn read_limit_value(&self) -> Option<usize> {
        self.read_limit
    }

    pub fn execution_timeout_value(&self) -> Option<Duration> {
        self.execution_timeout
    }

    pub fn attempt_timeout_value(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }
}

/// Headers and parameters captured before the first attempt and restored before each retry.
#[derive(Clone, Debug)]
pub struct RequestSnapshot {
    headers: HeaderMap,
    parameters: BTreeMap<String, Vec<String>>,
}

impl RequestSnapshot {
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.parameters
    }
}

#[derive(Debug)]
pub struct Request {
    method: Method,
    endpoint: String,
    resource_path: String,
    headers: HeaderMap,
    parameters: BTreeMap<String, Vec<String>>,
    body: Option<ReplayableBody>,
    options: RequestOptions,
    time_offset: i64,
}

impl Request {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            resource_path: String::new(),
            headers: HeaderMap::new(),
            parameters: BTreeMap::new(),
            body: None,
            options: RequestOptions::default(),
            time_offset: 0,
        }
    }

    pub fn with_resource_path(mut self, resource_path: impl Into<String>) -> Self {
        self.resource_path = resource_path.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_parameter(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<ReplayableBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_time_offset(mut self, time_offset: i64) -> Self {
        self.time_offset = time_offset;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn parameters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.parameters
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn body_mut(&mut self) -> Option<&mut ReplayableBody> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<ReplayableBody> {
        self.body.take()
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Clock offset in seconds applied when signing this request.
    pub fn time_offset(&self) -> i64 {
        self.time_offset
    }

    pub fn set_time_offset(&mut self, time_offset: i64) {
        self.time_offset = time_offset;
    }

    /// The local clock corrected by this request's time offset.
    pub fn signing_time(&self) -> SystemTime {
        apply_offset(SystemTime::now(), self.time_offset)
    }

    pub fn uri(&self) -> crate::Result<(String, Uri)> {
        build_request_uri(&self.endpoint, &self.resource_path, &self.parameters)
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            headers: self.headers.clone(),
            parameters: self.parameters.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: &RequestSnapshot) {
        self.headers = snapshot.headers.clone();
        self.parameters = snapshot.parameters.clone();
    }

    pub(crate) fn split_body_mut(&mut self) -> (&HeaderMap, Option<&mut ReplayableBody>) {
        (&self.headers, self.body.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_discards_changes_made_after_snapshot() {
        let mut request = Request::new(Method::GET, "https://api.example.com")
            .try_header("x-trace", "one")
            .expect("valid header")
            .query_param("page", "1");
        let snapshot = request.snapshot();

        request
            .headers_mut()
            .insert("authorization", HeaderValue::from_static("signed"));
        request.add_parameter("page", "2");
        request.add_parameter("signature", "abc");

        request.restore(&snapshot);
        assert!(request.headers().get("authorization").is_none());
        assert_eq!(request.headers()["x-trace"], "one");
        assert_eq!(request.parameters()["page"], vec!["1".to_owned()]);
        assert!(!request.parameters().contains_key("signature"));
    }

    #[test]
    fn uri_includes_resource_path_and_parameters() {
        let request = Request::new(Method::GET, "https://api.example.com")
            .with_resource_path("/v1/items")
            .query_param("q", "a&b");
        let (uri_text, _) = request.uri().expect("uri builds");
        assert_eq!(uri_text, "https://api.example.com/v1/items?q=a%26b");
    }

    #[test]
    fn signing_time_applies_offset() {
        let request = Request::new(Method::GET, "https://api.example.com").with_time_offset(3600);
        let skew = request
            .signing_time()
            .duration_since(SystemTime::now())
            .expect("signing time is ahead");
        assert!(skew > Duration::from_secs(3590));
    }

    #[test]
    fn invalid_header_is_rejected() {
        let error = Request::new(Method::GET, "https://api.example.com")
            .try_header("bad header", "x")
            .expect_err("space in header name");
        assert_eq!(error.code().as_str(), "invalid_header_name");
    }
}
