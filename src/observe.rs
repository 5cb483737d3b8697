use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

/// Lifecycle and byte-transfer events emitted while a call executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    ClientRequestStarted,
    ClientRequestSucceeded,
    ClientRequestFailed,
    ClientRequestRetry { attempt: usize, delay: Duration },
    HttpRequestStarted { attempt: usize },
    HttpRequestCompleted { attempt: usize },
    RequestContentLength(u64),
    RequestBytesTransferred(u64),
    /// Bytes that were sent before a body rewind and will be sent again.
    RequestBytesReset(u64),
    ResponseContentLength(u64),
    HttpResponseReceived { status: StatusCode },
}

pub trait ProgressListener: Send + Sync {
    fn progress_changed(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn progress_changed(&self, event: &ProgressEvent) {
        self(event)
    }
}

pub(crate) fn publish(listener: Option<&Arc<dyn ProgressListener>>, event: ProgressEvent) {
    if let Some(listener) = listener {
        listener.progress_changed(&event);
    }
}
