//! Validation and Authorization Guard for gRPC Services
//!
//! This library sits in front of a gRPC service's business logic. For every
//! inbound call it resolves the invoked method, validates each inbound
//! message, authorizes it (possibly replacing it), and only then releases
//! the authorized message to the handler. Failures while the call is being
//! finalized are turned into a well-formed gRPC status.
//!
//! ## Core Components
//!
//! - **ResolvedMethod**: short method name derived once from `/pkg.Service/Method`
//! - **Validator / Authorizer**: capabilities the guard dispatches to, by method name
//! - **StageChain**: explicit ordered list of stages, short-circuits on the first failure
//! - **CallGuard**: shared interceptor; `intercept_call` wraps a runtime call listener,
//!   `guard_unary` / `guard_streaming` / `run_unary` / `run_streaming` guard tonic handlers
//! - **GuardedListener**: per-call state machine (`Open → Receiving → HalfClosing → Completed`)
//! - **MethodPathLayer**: tower layer that makes the method visible to tonic handlers
//!
//! ## Failure Mapping
//!
//! - Invalid input = `Status::invalid_argument`
//! - Missing credentials = `Status::unauthenticated`
//! - Policy denial = `Status::permission_denied`
//! - Failure while finalizing = `Status::failed_precondition` naming the method,
//!   with the original error as the status source
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use grpc_call_guard::{
//!     authorizer_fn, validator_fn, CallGuard, GuardConfig, GuardError, MethodPathLayer,
//! };
//! use tonic::metadata::MetadataMap;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GuardConfig::from_env()?;
//!
//! let guard: CallGuard<String> = CallGuard::with_config(
//!     validator_fn(|_method: &str, msg: &String, _md: &MetadataMap| {
//!         if msg.trim().is_empty() {
//!             return Err(GuardError::invalid_input("tenant name is required"));
//!         }
//!         Ok(())
//!     }),
//!     authorizer_fn(|_method: &str, md: &MetadataMap, msg: String| {
//!         if md.get("authorization").is_none() {
//!             return Err(GuardError::unauthenticated("Missing authorization header"));
//!         }
//!         Ok(msg)
//!     }),
//!     &config,
//! );
//!
//! // Attach MethodPathLayer to the server, then call guard.run_unary(..) in handlers
//! let _server = tonic::transport::Server::builder().layer(MethodPathLayer);
//! # let _ = guard;
//! # Ok(())
//! # }
//! ```

mod authorizer;
mod call;
mod config;
mod context;
mod error;
mod extensions;
mod finalize;
mod interceptor;
mod layer;
mod method;
mod stage;
mod tonic_guard;
mod validator;

pub use authorizer::{authorizer_fn, Authorizer, FnAuthorizer, MethodAuthorizers, PassThrough};
pub use call::{CallHandler, CallListener, ServerCall};
pub use config::{GuardConfig, StageOrder, UnknownMethodPolicy};
pub use context::CallContext;
pub use error::{BoxError, Denial, GuardError, PanicError};
pub use extensions::ResolvedMethodExt;
pub use finalize::{guard_downstream, handler_status};
pub use interceptor::{CallGuard, CallState, GuardedListener};
pub use layer::{MethodPathLayer, MethodPathService};
pub use method::{resolve_method_name, ResolvedMethod};
pub use stage::{AuthorizationStage, CallStage, StageChain, ValidationStage};
pub use tonic_guard::GuardedStream;
pub use validator::{validator_fn, FnValidator, MethodValidators, Validator};

// Re-export tonic Status for convenience
pub use tonic::Status;
