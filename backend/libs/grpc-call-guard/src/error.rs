//! Guard error taxonomy and its mapping onto gRPC status codes

use std::fmt;
use std::sync::Arc;
use tonic::Status;

/// Boxed error produced by downstream handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why an authorizer refused a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Missing or unusable credentials
    Unauthenticated,
    /// Credentials are fine but policy denies the call
    Forbidden,
    /// A precondition required by the policy is not met
    PreconditionNotMet,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Denial::Unauthenticated => "unauthenticated",
            Denial::Forbidden => "forbidden",
            Denial::PreconditionNotMet => "precondition not met",
        };
        f.write_str(label)
    }
}

/// Every way a guarded call can fail
///
/// `InvalidInput` and `Unauthorized` are raised per frame by the stages and
/// abort the call immediately. `DownstreamFault` is only produced when the
/// call is finalized and something past the guard failed.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{denial}: {reason}")]
    Unauthorized { denial: Denial, reason: String },

    #[error("Error while validating method {method} {source}")]
    DownstreamFault {
        method: String,
        #[source]
        source: BoxError,
    },

    #[error("malformed gRPC method path: {0:?}")]
    MalformedMethodPath(String),

    #[error("call cancelled by transport")]
    Cancelled,
}

impl GuardError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        GuardError::InvalidInput(reason.into())
    }

    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        GuardError::Unauthorized {
            denial: Denial::Unauthenticated,
            reason: reason.into(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        GuardError::Unauthorized {
            denial: Denial::Forbidden,
            reason: reason.into(),
        }
    }

    pub fn precondition_not_met(reason: impl Into<String>) -> Self {
        GuardError::Unauthorized {
            denial: Denial::PreconditionNotMet,
            reason: reason.into(),
        }
    }

    pub fn downstream_fault(method: impl Into<String>, source: impl Into<BoxError>) -> Self {
        GuardError::DownstreamFault {
            method: method.into(),
            source: source.into(),
        }
    }

    /// gRPC code this error closes the call with
    pub fn code(&self) -> tonic::Code {
        match self {
            GuardError::InvalidInput(_) => tonic::Code::InvalidArgument,
            GuardError::Unauthorized { denial, .. } => match denial {
                Denial::Unauthenticated => tonic::Code::Unauthenticated,
                Denial::Forbidden => tonic::Code::PermissionDenied,
                Denial::PreconditionNotMet => tonic::Code::FailedPrecondition,
            },
            GuardError::DownstreamFault { .. } => tonic::Code::FailedPrecondition,
            GuardError::MalformedMethodPath(_) => tonic::Code::Internal,
            GuardError::Cancelled => tonic::Code::Cancelled,
        }
    }
}

impl From<GuardError> for Status {
    fn from(err: GuardError) -> Self {
        let code = err.code();
        let description = err.to_string();

        match err {
            GuardError::DownstreamFault { source, .. } => {
                let mut status = Status::new(code, description);
                status.set_source(Arc::from(source));
                status
            }
            _ => Status::new(code, description),
        }
    }
}

/// A panic caught while finalizing a call, carried as an ordinary error
#[derive(Debug, thiserror::Error)]
#[error("handler panicked: {0}")]
pub struct PanicError(pub String);

impl PanicError {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        PanicError(message)
    }
}
