//! Request extension trait for resolved method access
//!
//! Lets gRPC handlers read the [`ResolvedMethod`] stored by
//! [`MethodPathLayer`](crate::MethodPathLayer).

use crate::context::CallContext;
use crate::method::ResolvedMethod;
use tonic::{Request, Status};

/// Extension trait for reading the resolved method from gRPC requests
///
/// ## Usage
///
/// ```rust,no_run
/// use grpc_call_guard::ResolvedMethodExt;
/// use tonic::{Request, Status};
///
/// fn handler<T>(request: Request<T>) -> Result<(), Status> {
///     let method = request.resolved_method()?;
///     println!("serving {}", method.method());
///     Ok(())
/// }
/// ```
pub trait ResolvedMethodExt {
    /// Method stored by `MethodPathLayer`
    ///
    /// ## Errors
    ///
    /// Returns `Status::internal` if the layer was not attached to the server.
    fn resolved_method(&self) -> Result<&ResolvedMethod, Status>;

    /// Per-call context built from the resolved method and request metadata
    fn call_context(&self) -> Result<CallContext, Status>;
}

impl<T> ResolvedMethodExt for Request<T> {
    fn resolved_method(&self) -> Result<&ResolvedMethod, Status> {
        self.extensions().get::<ResolvedMethod>().ok_or_else(|| {
            Status::internal("No resolved gRPC method found. Ensure MethodPathLayer is attached.")
        })
    }

    fn call_context(&self) -> Result<CallContext, Status> {
        let method = self.resolved_method()?.clone();
        Ok(CallContext::new(method, self.metadata().clone()))
    }
}
