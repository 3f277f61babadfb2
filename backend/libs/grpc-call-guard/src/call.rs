//! Call lifecycle abstractions supplied by the RPC runtime
//!
//! These traits describe the per-call surface a server runtime exposes to
//! interceptors: the call handle, the listener that receives inbound events,
//! and the handler that starts the next listener in the chain.

use crate::error::BoxError;
use async_trait::async_trait;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::Status;

/// Runtime handle for one in-flight call
#[async_trait]
pub trait ServerCall: Send + Sync {
    /// Fully-qualified operation name, e.g. `/pkg.Service/Method`
    fn full_method_name(&self) -> &str;

    /// Terminate the call with `status`; the runtime renders it to the caller
    fn close(&self, status: Status, trailers: MetadataMap);

    /// Resolves once the transport cancels the call or its deadline passes
    async fn cancelled(&self);
}

/// Receives the inbound events of one call
///
/// `on_message` is infallible: the next listener buffers or forwards the
/// frame. Business logic failures surface from `on_half_close`.
#[async_trait]
pub trait CallListener<M>: Send {
    async fn on_message(&mut self, message: M);

    /// All inbound frames were delivered
    async fn on_half_close(&mut self) -> Result<(), BoxError>;

    fn on_cancel(&mut self) {}

    fn on_complete(&mut self) {}
}

/// Starts the rest of the chain for a new call
pub trait CallHandler<M>: Send + Sync {
    type Listener: CallListener<M>;

    fn start_call(&self, call: Arc<dyn ServerCall>, metadata: MetadataMap) -> Self::Listener;
}
