use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use http::Uri;
use http::header::{HeaderName, HeaderValue};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn wait_unpoisoned<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    match condvar.wait(guard) {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn wait_timeout_unpoisoned<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> MutexGuard<'a, T> {
    match condvar.wait_timeout(guard, timeout) {
        Ok((guard, _)) => guard,
        Err(poisoned) => poisoned.into_inner().0,
    }
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn join_endpoint_path(endpoint: &str, resource_path: &str) -> String {
    if resource_path.is_empty() {
        return endpoint.to_owned();
    }
    let endpoint = endpoint.trim_end_matches('/');
    let resource_path = resource_path.trim_start_matches('/');
    format!("{endpoint}/{resource_path}")
}

/// Builds the absolute request uri from the endpoint, resource path and ordered query parameters.
pub(crate) fn build_request_uri(
    endpoint: &str,
    resource_path: &str,
    parameters: &BTreeMap<String, Vec<String>>,
) -> Result<(String, Uri), Error> {
    let endpoint_url = url::Url::parse(endpoint).map_err(|_| Error::InvalidUri {
        uri: endpoint.to_owned(),
    })?;
    if !matches!(endpoint_url.scheme(), "http" | "https") || endpoint_url.host_str().is_none() {
        return Err(Error::InvalidUri {
            uri: endpoint.to_owned(),
        });
    }

    let mut uri_text = join_endpoint_path(endpoint, resource_path);
    let query = build_query_string(parameters);
    if !query.is_empty() {
        uri_text.push(if uri_text.contains('?') { '&' } else { '?' });
        uri_text.push_str(&query);
    }

    let uri = uri_text.parse::<Uri>().map_err(|_| Error::InvalidUri {
        uri: uri_text.clone(),
    })?;
    Ok((uri_text, uri))
}

fn build_query_string(parameters: &BTreeMap<String, Vec<String>>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, values) in parameters {
        if values.is_empty() {
            serializer.append_key_only(name);
        }
        for value in values {
            serializer.append_pair(name, value);
        }
    }
    serializer.finish()
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }
    let mut truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    truncated.push_str("...<truncated>");
    truncated
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
