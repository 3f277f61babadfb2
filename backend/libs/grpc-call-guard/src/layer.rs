//! Tower Layer that resolves the gRPC method of every inbound request
//!
//! tonic handlers only see the decoded message, not the HTTP/2 path. This
//! layer parses the path once per request and stores the [`ResolvedMethod`]
//! in the request extensions, where tonic hands it through to
//! `tonic::Request::extensions()`.
//!
//! ```rust,no_run
//! use grpc_call_guard::MethodPathLayer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! tonic::transport::Server::builder()
//!     .layer(MethodPathLayer)
//!     // .add_service(TenantServiceServer::new(service))
//! #   ;
//! # Ok(())
//! # }
//! ```

use crate::method::ResolvedMethod;
use std::task::{Context, Poll};
use tonic::codegen::http;
use tower::{Layer, Service};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct MethodPathLayer;

impl<S> Layer<S> for MethodPathLayer {
    type Service = MethodPathService<S>;

    fn layer(&self, service: S) -> Self::Service {
        MethodPathService { inner: service }
    }
}

#[derive(Debug, Clone)]
pub struct MethodPathService<S> {
    inner: S,
}

impl<S, B> Service<http::Request<B>> for MethodPathService<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        match ResolvedMethod::parse(req.uri().path()) {
            Ok(method) => {
                trace!(method = %method, "Resolved gRPC method");
                req.extensions_mut().insert(method);
            }
            // Routing answers these with UNIMPLEMENTED; guarded handlers never run
            Err(e) => warn!(path = %req.uri().path(), error = %e, "Unresolvable gRPC path"),
        }

        self.inner.call(req)
    }
}
