//! Downstream fault capture
//!
//! Whatever happens past the guard while a call is being finalized, an
//! error value or a panic, comes back as a single
//! [`GuardError::DownstreamFault`] naming the method.

use crate::error::{BoxError, GuardError, PanicError};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tonic::Status;

/// Drive `fut` to completion, turning errors and panics into `DownstreamFault`
pub async fn guard_downstream<T, F>(method: &str, fut: F) -> Result<T, GuardError>
where
    F: Future<Output = Result<T, BoxError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(GuardError::downstream_fault(method, source)),
        Err(payload) => Err(GuardError::downstream_fault(
            method,
            PanicError::from_payload(payload),
        )),
    }
}

/// Status for a handler outcome on the tonic path
///
/// A handler that already answered with a `Status` chose its own protocol
/// outcome, so that status is returned as is. Everything else goes through
/// the regular `GuardError` mapping.
pub fn handler_status(err: GuardError) -> Status {
    match err {
        GuardError::DownstreamFault { method, source } => match source.downcast::<Status>() {
            Ok(status) => *status,
            Err(source) => GuardError::DownstreamFault { method, source }.into(),
        },
        other => other.into(),
    }
}
