use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;
use http::HeaderMap;
use http::header::DATE;

const COMPRESSED_ISO8601_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Seconds to add to the local clock to match the service's clock.
///
/// Shared by every call of a client; the last correction wins.
#[derive(Debug, Default)]
pub struct ClockOffset {
    seconds: AtomicI64,
}

impl ClockOffset {
    pub fn new(seconds: i64) -> Self {
        Self {
            seconds: AtomicI64::new(seconds),
        }
    }

    pub fn get(&self) -> i64 {
        self.seconds.load(Ordering::Acquire)
    }

    pub fn set(&self, seconds: i64) {
        self.seconds.store(seconds, Ordering::Release);
    }

    /// The local clock shifted by the current offset.
    pub fn corrected_now(&self) -> SystemTime {
        apply_offset(SystemTime::now(), self.get())
    }
}

pub(crate) fn apply_offset(time: SystemTime, offset_seconds: i64) -> SystemTime {
    let shift = Duration::from_secs(offset_seconds.unsigned_abs());
    let shifted = if offset_seconds >= 0 {
        time.checked_add(shift)
    } else {
        time.checked_sub(shift)
    };
    shifted.unwrap_or(time)
}

/// Derives the client/server clock offset from a response rejected for clock skew.
#[derive(Clone, Debug)]
pub struct ClockSkewCorrector {
    shared: Arc<ClockOffset>,
}

impl ClockSkewCorrector {
    pub fn new(shared: Arc<ClockOffset>) -> Self {
        Self { shared }
    }

    pub fn shared(&self) -> &Arc<ClockOffset> {
        &self.shared
    }

    /// Offset in seconds (server minus local), or `0` when no server time can be recovered.
    pub fn offset_seconds(&self, headers: &HeaderMap, message: &str, now: SystemTime) -> i64 {
        match Self::try_offset_seconds(headers, message, now) {
            Some(offset) => offset,
            None => {
                tracing::warn!(
                    error_message = message,
                    "unable to determine server time from clock skew error"
                );
                0
            }
        }
    }

    /// Prefers the `Date` response header and falls back to the timestamp quoted in the
    /// error message, e.g. `(20130401T040113Z - 15 min.)`.
    pub fn try_offset_seconds(headers: &HeaderMap, message: &str, now: SystemTime) -> Option<i64> {
        let server_time = server_time_from_headers(headers)
            .or_else(|| server_time_from_message(message))?;
        let local_millis = epoch_millis(now)?;
        let server_millis = epoch_millis(server_time)?;
        Some((server_millis - local_millis) / 1000)
    }

    /// Records a correction for every later call of the client.
    pub fn apply(&self, offset_seconds: i64) {
        self.shared.set(offset_seconds);
    }

    pub fn current(&self) -> i64 {
        self.shared.get()
    }
}

fn server_time_from_headers(headers: &HeaderMap) -> Option<SystemTime> {
    let value = headers.get(DATE)?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}

fn server_time_from_message(message: &str) -> Option<SystemTime> {
    let start = message.find('(')? + 1;
    let rest = &message[start..];
    let end = rest.find(" + ").or_else(|| rest.find(" - "))?;
    let timestamp = rest[..end].trim();
    let parsed = NaiveDateTime::parse_from_str(timestamp, COMPRESSED_ISO8601_FORMAT).ok()?;
    let seconds = parsed.and_utc().timestamp();
    Some(apply_offset(UNIX_EPOCH, seconds))
}

fn epoch_millis(time: SystemTime) -> Option<i64> {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_millis()).ok(),
        Err(before_epoch) => i64::try_from(before_epoch.duration().as_millis())
            .ok()
            .map(|millis| -millis),
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    fn at(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(seconds)
    }

    #[test]
    fn date_header_an_hour_ahead_yields_positive_offset() {
        let now = at(1_700_000_000);
        let mut headers = HeaderMap::new();
        headers.insert(
            DATE,
            HeaderValue::from_str(&httpdate::fmt_http_date(now + Duration::from_secs(3600)))
                .expect("valid date header"),
        );

        let offset = ClockSkewCorrector::try_offset_seconds(&headers, "", now);
        assert_eq!(offset, Some(3600));
    }

    #[test]
    fn message_timestamp_is_used_without_date_header() {
        // 2013-04-01T04:01:13Z
        let now = at(1_364_788_873 - 120);
        let message =
            "Signature expired: 20130401T030113Z is now earlier than 20130401T034613Z (20130401T040113Z - 15 min.)";
        let offset = ClockSkewCorrector::try_offset_seconds(&HeaderMap::new(), message, now);
        assert_eq!(offset, Some(120));
    }

    #[test]
    fn message_with_plus_duration_is_parsed() {
        let now = at(1_364_788_873 + 30);
        let message = "Signature not yet current: (20130401T040113Z + 15 min.)";
        let offset = ClockSkewCorrector::try_offset_seconds(&HeaderMap::new(), message, now);
        assert_eq!(offset, Some(-30));
    }

    #[test]
    fn unparsable_sources_fall_back_to_zero() {
        let corrector = ClockSkewCorrector::new(Arc::new(ClockOffset::new(42)));
        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static("not a date"));
        let offset = corrector.offset_seconds(&headers, "no timestamp here", at(10));
        assert_eq!(offset, 0);
        assert_eq!(corrector.current(), 42);
    }

    #[test]
    fn applied_offset_is_shared() {
        let shared = Arc::new(ClockOffset::default());
        let corrector = ClockSkewCorrector::new(Arc::clone(&shared));
        corrector.apply(-15);
        assert_eq!(shared.get(), -15);
    }

    #[test]
    fn apply_offset_moves_both_directions() {
        assert_eq!(apply_offset(at(100), 20), at(120));
        assert_eq!(apply_offset(at(100), -20), at(80));
    }
}
