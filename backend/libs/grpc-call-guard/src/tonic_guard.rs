//! Guard entry points for tonic service implementations
//!
//! Generated tonic servers decode the message before the handler runs, so
//! the guard is applied at the top of each handler:
//!
//! ```rust,no_run
//! use grpc_call_guard::CallGuard;
//! use tonic::{Request, Response, Status};
//!
//! struct TenantService {
//!     guard: CallGuard<String>,
//! }
//!
//! impl TenantService {
//!     async fn create_tenant(&self, request: Request<String>) -> Result<Response<String>, Status> {
//!         self.guard
//!             .run_unary(request, |request| async move {
//!                 Ok::<_, Status>(Response::new(request.into_inner()))
//!             })
//!             .await
//!     }
//! }
//! ```
//!
//! Dropping the handler future (client cancel, deadline) abandons any stage
//! still in flight.

use crate::context::CallContext;
use crate::error::{BoxError, GuardError};
use crate::extensions::ResolvedMethodExt;
use crate::finalize::{guard_downstream, handler_status};
use crate::interceptor::CallGuard;
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, error, warn};

/// Inbound message stream whose every item already passed the guard
pub type GuardedStream<M> = BoxStream<'static, Result<M, Status>>;

impl<M: Send + 'static> CallGuard<M> {
    /// Validate and authorize the message of a unary call
    ///
    /// The returned request carries the authorized message, never the
    /// original one, with metadata and extensions untouched.
    pub async fn guard_unary(&self, request: Request<M>) -> Result<Request<M>, Status> {
        let ctx = request.call_context()?;
        debug!(method = %ctx.method().full_name(), "Calling method");

        let (metadata, extensions, message) = request.into_parts();
        let message = self
            .check(&ctx, message)
            .await
            .map_err(|e| reject(&ctx, e))?;

        Ok(Request::from_parts(metadata, extensions, message))
    }

    /// Guard every frame of a client-streaming or bidi call
    ///
    /// Frames are checked one at a time, in arrival order. The first
    /// rejected frame is yielded as `Err(status)` and ends the stream;
    /// transport errors are passed through and end it as well. Use
    /// [`CallGuard::run_streaming`] when the handler may not propagate that
    /// error itself.
    pub fn guard_streaming<S>(&self, request: Request<S>) -> Result<Request<GuardedStream<M>>, Status>
    where
        S: Stream<Item = Result<M, Status>> + Send + 'static,
    {
        self.wrap_stream(request, Arc::new(Mutex::new(None)))
    }

    fn wrap_stream<S>(
        &self,
        request: Request<S>,
        rejected: RejectionSlot,
    ) -> Result<Request<GuardedStream<M>>, Status>
    where
        S: Stream<Item = Result<M, Status>> + Send + 'static,
    {
        let ctx = request.call_context()?;
        debug!(method = %ctx.method().full_name(), "Calling method");

        let (metadata, extensions, inbound) = request.into_parts();
        let state = Some((Box::pin(inbound), self.clone(), ctx, rejected));

        let guarded = futures::stream::unfold(state, |state| async move {
            let (mut inbound, guard, ctx, rejected) = state?;
            match inbound.next().await? {
                Ok(message) => match guard.check(&ctx, message).await {
                    Ok(message) => Some((Ok(message), Some((inbound, guard, ctx, rejected)))),
                    Err(e) => {
                        let status = reject(&ctx, e);
                        *rejected.lock() = Some(status.clone());
                        Some((Err(status), None))
                    }
                },
                Err(status) => Some((Err(status), None)),
            }
        })
        .boxed();

        Ok(Request::from_parts(metadata, extensions, guarded))
    }

    /// Guard a unary call, run `handler`, and finalize its outcome
    ///
    /// A handler error that is a `Status` is returned unchanged. Any other
    /// error, or a panic, closes the call with `FAILED_PRECONDITION` naming
    /// the method and carrying the original cause.
    pub async fn run_unary<R, F, Fut, E>(
        &self,
        request: Request<M>,
        handler: F,
    ) -> Result<Response<R>, Status>
    where
        F: FnOnce(Request<M>) -> Fut,
        Fut: Future<Output = Result<Response<R>, E>>,
        E: Into<BoxError>,
    {
        let request = self.guard_unary(request).await?;
        let method = request.resolved_method()?.method().to_string();

        let outcome = guard_downstream(&method, async move {
            let result: Result<Response<R>, BoxError> = handler(request).await.map_err(Into::into);
            result
        });

        outcome.await.map_err(|e| finalize_error(&method, e))
    }

    /// Guard a streaming call, run `handler` on the guarded stream, and
    /// finalize its outcome
    ///
    /// If any frame was rejected, that rejection is the call's status no
    /// matter what the handler returns. Otherwise the handler outcome is
    /// finalized as in [`CallGuard::run_unary`].
    pub async fn run_streaming<S, R, F, Fut, E>(
        &self,
        request: Request<S>,
        handler: F,
    ) -> Result<Response<R>, Status>
    where
        S: Stream<Item = Result<M, Status>> + Send + 'static,
        F: FnOnce(Request<GuardedStream<M>>) -> Fut,
        Fut: Future<Output = Result<Response<R>, E>>,
        E: Into<BoxError>,
    {
        let rejected: RejectionSlot = Arc::new(Mutex::new(None));
        let request = self.wrap_stream(request, Arc::clone(&rejected))?;
        let method = request.resolved_method()?.method().to_string();

        let outcome = guard_downstream(&method, async move {
            let result: Result<Response<R>, BoxError> = handler(request).await.map_err(Into::into);
            result
        })
        .await;

        let rejection = rejected.lock().take();
        if let Some(status) = rejection {
            debug!(method = %method, "Stream had a rejected frame, ignoring handler outcome");
            return Err(status);
        }

        outcome.map_err(|e| finalize_error(&method, e))
    }
}

/// First rejection seen on a guarded stream
type RejectionSlot = Arc<Mutex<Option<Status>>>;

fn finalize_error(method: &str, err: GuardError) -> Status {
    if let GuardError::DownstreamFault { source, .. } = &err {
        if !source.is::<Status>() {
            error!(method = %method, "Error while validating method {}: {}", method, source);
        }
    }
    handler_status(err)
}

fn reject(ctx: &CallContext, err: GuardError) -> Status {
    let status = Status::from(err);
    warn!(
        method = %ctx.method_name(),
        code = ?status.code(),
        "Rejected frame: {}",
        status.message()
    );
    status
}
