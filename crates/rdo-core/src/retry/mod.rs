//! Retry and backoff policy for transfer failures.
//!
//! Failures are classified (timeouts, throttling, connection loss, short
//! bodies) into an [`ErrorKind`]; the [`RetryPolicy`] turns a task's failure
//! count and that kind into either a jittered backoff delay or a final failure.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::TransferError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
