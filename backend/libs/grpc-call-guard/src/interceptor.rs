//! Server-side call guard
//!
//! Validates and authorizes every inbound frame before the business handler
//! sees it, and turns failures during call finalization into a proper gRPC
//! status instead of letting them escape to the transport.
//!
//! ## Design
//!
//! - **Shared, stateless guard**: one [`CallGuard`] serves every call; it only
//!   holds `Arc`-shared, immutable collaborators
//! - **Per-call listener**: all call-scoped state lives in the
//!   [`GuardedListener`] created for that call
//! - **Fail-fast**: a rejected frame closes the call at once, nothing more is
//!   forwarded
//! - **One terminal status**: every failure path closes the call exactly once

use crate::authorizer::Authorizer;
use crate::call::{CallHandler, CallListener, ServerCall};
use crate::config::{GuardConfig, StageOrder};
use crate::context::CallContext;
use crate::error::{BoxError, GuardError};
use crate::finalize::guard_downstream;
use crate::method::ResolvedMethod;
use crate::stage::{AuthorizationStage, StageChain, ValidationStage};
use crate::validator::Validator;
use async_trait::async_trait;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tonic::Status;
use tracing::{debug, error, trace, warn};

/// Interceptor shared by all calls of a service
///
/// ## Usage
///
/// ```rust
/// use grpc_call_guard::{validator_fn, CallGuard, GuardError, PassThrough};
/// use tonic::metadata::MetadataMap;
///
/// let guard: CallGuard<String> = CallGuard::new(
///     validator_fn(|_method: &str, msg: &String, _md: &MetadataMap| {
///         if msg.is_empty() {
///             return Err(GuardError::invalid_input("empty request"));
///         }
///         Ok(())
///     }),
///     PassThrough,
/// );
/// let per_service_clone = guard.clone();
/// # let _ = per_service_clone;
/// ```
pub struct CallGuard<M> {
    chain: Arc<StageChain<M>>,
}

impl<M> Clone for CallGuard<M> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<M: Send + Sync + 'static> CallGuard<M> {
    /// Validate, then authorize, every frame
    pub fn new(
        validator: impl Validator<M> + 'static,
        authorizer: impl Authorizer<M> + 'static,
    ) -> Self {
        Self::with_config(validator, authorizer, &GuardConfig::default())
    }

    /// Build the two built-in stages in the order `config` asks for
    pub fn with_config(
        validator: impl Validator<M> + 'static,
        authorizer: impl Authorizer<M> + 'static,
        config: &GuardConfig,
    ) -> Self {
        let validation = ValidationStage::new(validator);
        let authorization = AuthorizationStage::new(authorizer);

        let chain = match config.stage_order {
            StageOrder::ValidateThenAuthorize => StageChain::new().push(validation).push(authorization),
            StageOrder::AuthorizeThenValidate => StageChain::new().push(authorization).push(validation),
        };

        Self::from_chain(chain)
    }
}

impl<M: Send + 'static> CallGuard<M> {
    /// Guard with an arbitrary, already ordered stage chain
    pub fn from_chain(chain: StageChain<M>) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }

    pub fn chain(&self) -> &StageChain<M> {
        &self.chain
    }

    /// Run one frame through the stage chain
    pub async fn check(&self, ctx: &CallContext, message: M) -> Result<M, GuardError> {
        self.chain.run(ctx, message).await
    }

    /// Wrap the listener of a new call
    ///
    /// The method is resolved here, once, and reused for every frame. If the
    /// runtime hands over an unusable method path the call is closed with
    /// `INTERNAL` right away and the next handler is never started.
    pub fn intercept_call<H>(
        &self,
        call: Arc<dyn ServerCall>,
        metadata: MetadataMap,
        next: &H,
    ) -> GuardedListener<M, H::Listener>
    where
        H: CallHandler<M>,
    {
        let full_method = call.full_method_name().to_string();

        let method = match ResolvedMethod::parse(&full_method) {
            Ok(method) => method,
            Err(e) => {
                error!(method = %full_method, error = %e, "Cannot resolve gRPC method");
                call.close(Status::from(e), MetadataMap::new());
                return GuardedListener {
                    chain: Arc::clone(&self.chain),
                    call,
                    active: None,
                    state: CallState::Failed,
                    forwarded: 0,
                };
            }
        };

        debug!(method = %full_method, "Calling method");

        let inner = next.start_call(Arc::clone(&call), metadata.clone());

        GuardedListener {
            chain: Arc::clone(&self.chain),
            call,
            active: Some(ActiveCall {
                ctx: CallContext::new(method, metadata),
                inner,
            }),
            state: CallState::Open,
            forwarded: 0,
        }
    }
}

/// Where one call is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Open,
    Receiving,
    HalfClosing,
    Completed,
    /// A frame failed validation or authorization
    Rejected,
    /// The method could not be resolved or finalization failed
    Failed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Rejected | CallState::Failed | CallState::Cancelled
        )
    }

    fn accepts_frames(self) -> bool {
        matches!(self, CallState::Open | CallState::Receiving)
    }
}

struct ActiveCall<L> {
    ctx: CallContext,
    inner: L,
}

/// Per-call listener created by [`CallGuard::intercept_call`]
pub struct GuardedListener<M, L> {
    chain: Arc<StageChain<M>>,
    call: Arc<dyn ServerCall>,
    active: Option<ActiveCall<L>>,
    state: CallState,
    forwarded: u64,
}

impl<M, L> GuardedListener<M, L> {
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Frames that reached the next listener so far
    pub fn forwarded_frames(&self) -> u64 {
        self.forwarded
    }

    pub fn context(&self) -> Option<&CallContext> {
        self.active.as_ref().map(|active| &active.ctx)
    }
}

#[async_trait]
impl<M, L> CallListener<M> for GuardedListener<M, L>
where
    M: Send + 'static,
    L: CallListener<M>,
{
    async fn on_message(&mut self, message: M) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !self.state.accepts_frames() {
            trace!(
                method = %active.ctx.method_name(),
                state = ?self.state,
                "Dropping frame received after call stopped accepting input"
            );
            return;
        }
        self.state = CallState::Receiving;

        let outcome = tokio::select! {
            biased;
            _ = self.call.cancelled() => Err(GuardError::Cancelled),
            result = self.chain.run(&active.ctx, message) => result,
        };

        match outcome {
            Ok(message) => {
                active.inner.on_message(message).await;
                self.forwarded += 1;
            }
            Err(GuardError::Cancelled) => {
                debug!(
                    method = %active.ctx.method_name(),
                    "Call cancelled while checking frame, abandoning"
                );
                self.state = CallState::Cancelled;
            }
            Err(e) => {
                let status = Status::from(e);
                warn!(
                    method = %active.ctx.method_name(),
                    code = ?status.code(),
                    forwarded = self.forwarded,
                    "Rejected frame: {}",
                    status.message()
                );
                self.call.close(status, MetadataMap::new());
                self.state = CallState::Rejected;
            }
        }
    }

    async fn on_half_close(&mut self) -> Result<(), BoxError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if !self.state.accepts_frames() {
            return Ok(());
        }
        self.state = CallState::HalfClosing;

        let method = active.ctx.method_name().to_string();
        let inner = &mut active.inner;
        match guard_downstream(&method, inner.on_half_close()).await {
            Ok(()) => {
                self.state = CallState::Completed;
            }
            Err(e) => {
                let status = Status::from(e);
                error!(method = %method, "{}", status.message());
                self.call.close(status, MetadataMap::new());
                self.state = CallState::Failed;
            }
        }

        Ok(())
    }

    fn on_cancel(&mut self) {
        // A call the guard already ended keeps its own outcome
        if !self.state.is_terminal() {
            self.state = CallState::Cancelled;
        }
        if let Some(active) = self.active.as_mut() {
            debug!(method = %active.ctx.method_name(), "Call cancelled");
            active.inner.on_cancel();
        }
    }

    fn on_complete(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.inner.on_complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::{authorizer_fn, PassThrough};
    use crate::validator::validator_fn;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeCall {
        path: String,
        closed: Mutex<Vec<Status>>,
        cancelled: AtomicBool,
        notify: Notify,
    }

    impl FakeCall {
        fn new(path: &str) -> Arc<Self> {
            Arc::new(Self {
                path: path.to_string(),
                ..Default::default()
            })
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
    }

    #[async_trait]
    impl ServerCall for FakeCall {
        fn full_method_name(&self) -> &str {
            &self.path
        }

        fn close(&self, status: Status, _trailers: MetadataMap) {
            self.closed.lock().push(status);
        }

        async fn cancelled(&self) {
            loop {
                let notified = self.notify.notified();
                if self.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
            }
        }
    }

    #[derive(Default, Clone)]
    struct Handler {
        received: Arc<Mutex<Vec<String>>>,
        fail_on_half_close: bool,
    }

    struct HandlerListener {
        received: Arc<Mutex<Vec<String>>>,
        fail_on_half_close: bool,
    }

    impl CallHandler<String> for Handler {
        type Listener = HandlerListener;

        fn start_call(&self, _call: Arc<dyn ServerCall>, _metadata: MetadataMap) -> HandlerListener {
            HandlerListener {
                received: self.received.clone(),
                fail_on_half_close: self.fail_on_half_close,
            }
        }
    }

    #[async_trait]
    impl CallListener<String> for HandlerListener {
        async fn on_message(&mut self, message: String) {
            self.received.lock().push(message);
        }

        async fn on_half_close(&mut self) -> Result<(), BoxError> {
            if self.fail_on_half_close {
                return Err("tenant store unavailable".into());
            }
            Ok(())
        }
    }

    fn guard() -> CallGuard<String> {
        CallGuard::new(
            validator_fn(|_: &str, msg: &String, _: &MetadataMap| {
                if msg.starts_with("bad") {
                    Err(GuardError::invalid_input("bad payload"))
                } else {
                    Ok(())
                }
            }),
            authorizer_fn(|_: &str, _: &MetadataMap, msg: String| {
                if msg.starts_with("deny") {
                    Err(GuardError::forbidden("policy denied"))
                } else {
                    Ok(msg.to_uppercase())
                }
            }),
        )
    }

    #[tokio::test]
    async fn test_forwards_authorized_messages() {
        let call = FakeCall::new("/pkg.TenantService/CreateTenant");
        let handler = Handler::default();
        let mut listener = guard().intercept_call(call.clone(), MetadataMap::new(), &handler);

        listener.on_message("one".to_string()).await;
        listener.on_message("two".to_string()).await;
        listener.on_half_close().await.unwrap();

        assert_eq!(*handler.received.lock(), vec!["ONE", "TWO"]);
        assert_eq!(listener.state(), CallState::Completed);
        assert_eq!(listener.forwarded_frames(), 2);
        assert!(call.closed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_rejects_call() {
        let call = FakeCall::new("/pkg.TenantService/CreateTenant");
        let handler = Handler::default();
        let mut listener = guard().intercept_call(call.clone(), MetadataMap::new(), &handler);

        listener.on_message("bad input".to_string()).await;
        listener.on_message("good".to_string()).await;
        listener.on_half_close().await.unwrap();

        assert!(handler.received.lock().is_empty());
        assert_eq!(listener.state(), CallState::Rejected);

        let closed = call.closed.lock();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_authorization_failure_rejects_call() {
        let call = FakeCall::new("/pkg.TenantService/DeleteTenant");
        let handler = Handler::default();
        let mut listener = guard().intercept_call(call.clone(), MetadataMap::new(), &handler);

        listener.on_message("deny me".to_string()).await;

        assert!(handler.received.lock().is_empty());
        assert_eq!(listener.state(), CallState::Rejected);
        assert_eq!(call.closed.lock()[0].code(), tonic::Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_half_close_failure_becomes_failed_precondition() {
        let call = FakeCall::new("/pkg.TenantService/UpdateTenant");
        let handler = Handler {
            fail_on_half_close: true,
            ..Default::default()
        };
        let mut listener = guard().intercept_call(call.clone(), MetadataMap::new(), &handler);

        listener.on_message("ok".to_string()).await;
        let result = listener.on_half_close().await;

        assert!(result.is_ok(), "fault must not escape the guard");
        assert_eq!(listener.state(), CallState::Failed);

        let closed = call.closed.lock();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].code(), tonic::Code::FailedPrecondition);
        assert!(closed[0].message().contains("UpdateTenant"));
        assert!(closed[0].message().contains("tenant store unavailable"));
    }

    #[tokio::test]
    async fn test_malformed_path_closes_with_internal() {
        let call = FakeCall::new("no-slash-here");
        let handler = Handler::default();
        let mut listener = guard().intercept_call(call.clone(), MetadataMap::new(), &handler);

        listener.on_message("ok".to_string()).await;

        assert!(handler.received.lock().is_empty());
        assert!(listener.context().is_none());
        assert_eq!(listener.state(), CallState::Failed);
        assert_eq!(call.closed.lock()[0].code(), tonic::Code::Internal);
    }

    #[tokio::test]
    async fn test_cancelled_call_forwards_nothing() {
        let call = FakeCall::new("/pkg.TenantService/CreateTenant");
        let handler = Handler::default();
        let guard: CallGuard<String> = CallGuard::new(
            validator_fn(|_: &str, _: &String, _: &MetadataMap| Ok(())),
            PassThrough,
        );
        let mut listener = guard.intercept_call(call.clone(), MetadataMap::new(), &handler);

        call.cancel();
        listener.on_message("late".to_string()).await;

        assert!(handler.received.lock().is_empty());
        assert_eq!(listener.state(), CallState::Cancelled);
        assert!(call.closed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_authorize_then_validate_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (v_order, a_order) = (order.clone(), order.clone());
        let config = GuardConfig {
            stage_order: StageOrder::AuthorizeThenValidate,
            ..Default::default()
        };

        let guard: CallGuard<String> = CallGuard::with_config(
            validator_fn(move |_: &str, _: &String, _: &MetadataMap| {
                v_order.lock().push("validate");
                Ok(())
            }),
            authorizer_fn(move |_: &str, _: &MetadataMap, msg: String| {
                a_order.lock().push("authorize");
                Ok(msg)
            }),
            &config,
        );

        assert_eq!(guard.chain().stage_names(), vec!["authorization", "validation"]);

        let call = FakeCall::new("/pkg.S/M");
        let handler = Handler::default();
        let mut listener = guard.intercept_call(call, MetadataMap::new(), &handler);
        listener.on_message("x".to_string()).await;

        assert_eq!(*order.lock(), vec!["authorize", "validate"]);
    }

    /// Parks inside validation until the test cancels the call
    struct StallingValidator {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl Validator<String> for StallingValidator {
        async fn validate(&self, _method: &str, _message: &String, _metadata: &MetadataMap) -> Result<(), GuardError> {
            self.entered.notify_one();
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancel_abandons_stage_in_flight() {
        let entered = Arc::new(Notify::new());
        let guard: CallGuard<String> = CallGuard::new(
            StallingValidator {
                entered: entered.clone(),
            },
            PassThrough,
        );
        let call = FakeCall::new("/pkg.TenantService/CreateTenant");
        let handler = Handler::default();
        let mut listener = guard.intercept_call(call.clone(), MetadataMap::new(), &handler);

        let canceller = tokio::spawn({
            let call = call.clone();
            async move {
                entered.notified().await;
                call.cancel();
            }
        });

        listener.on_message("stuck".to_string()).await;
        canceller.await.unwrap();

        assert!(handler.received.lock().is_empty());
        assert_eq!(listener.forwarded_frames(), 0);
        assert_eq!(listener.state(), CallState::Cancelled);
        assert!(call.closed.lock().is_empty());

        // Nothing is forwarded after the cancellation either
        listener.on_message("later".to_string()).await;
        assert!(handler.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_keeps_terminal_state() {
        let call = FakeCall::new("/pkg.TenantService/CreateTenant");
        let handler = Handler::default();
        let mut listener = guard().intercept_call(call.clone(), MetadataMap::new(), &handler);

        listener.on_message("bad input".to_string()).await;
        assert_eq!(listener.state(), CallState::Rejected);

        listener.on_cancel();
        assert_eq!(listener.state(), CallState::Rejected);
        assert_eq!(call.closed.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_open_call() {
        let call = FakeCall::new("/pkg.TenantService/CreateTenant");
        let handler = Handler::default();
        let mut listener = guard().intercept_call(call.clone(), MetadataMap::new(), &handler);

        listener.on_message("one".to_string()).await;
        listener.on_cancel();

        assert_eq!(listener.state(), CallState::Cancelled);
        listener.on_half_close().await.unwrap();
        assert_eq!(listener.state(), CallState::Cancelled);
        assert!(call.closed.lock().is_empty());
    }
}
