//! Authorization capability
//!
//! An [`Authorizer`] decides whether a validated frame may reach the
//! business handler. It takes the message by value and hands back the
//! message that should actually be forwarded, which lets policies redact or
//! enrich payloads. The handler only ever sees the returned message.

use crate::config::{GuardConfig, UnknownMethodPolicy};
use crate::error::GuardError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tracing::debug;

#[async_trait]
pub trait Authorizer<M>: Send + Sync {
    async fn authorize(
        &self,
        method: &str,
        metadata: &MetadataMap,
        message: M,
    ) -> Result<M, GuardError>;
}

#[async_trait]
impl<M, A> Authorizer<M> for Arc<A>
where
    M: Send + 'static,
    A: Authorizer<M> + ?Sized,
{
    async fn authorize(
        &self,
        method: &str,
        metadata: &MetadataMap,
        message: M,
    ) -> Result<M, GuardError> {
        (**self).authorize(method, metadata, message).await
    }
}

/// Forwards every message untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl<M: Send + 'static> Authorizer<M> for PassThrough {
    async fn authorize(
        &self,
        _method: &str,
        _metadata: &MetadataMap,
        message: M,
    ) -> Result<M, GuardError> {
        Ok(message)
    }
}

/// Synchronous closure adapter, see [`authorizer_fn`]
#[derive(Clone)]
pub struct FnAuthorizer<F>(F);

/// Wrap a plain function as an [`Authorizer`]
pub fn authorizer_fn<M, F>(f: F) -> FnAuthorizer<F>
where
    F: Fn(&str, &MetadataMap, M) -> Result<M, GuardError> + Send + Sync,
{
    FnAuthorizer(f)
}

#[async_trait]
impl<M, F> Authorizer<M> for FnAuthorizer<F>
where
    M: Send + 'static,
    F: Fn(&str, &MetadataMap, M) -> Result<M, GuardError> + Send + Sync,
{
    async fn authorize(
        &self,
        method: &str,
        metadata: &MetadataMap,
        message: M,
    ) -> Result<M, GuardError> {
        (self.0)(method, metadata, message)
    }
}

/// Routes each frame to the authorizer registered for its method
pub struct MethodAuthorizers<M> {
    routes: HashMap<String, Arc<dyn Authorizer<M>>>,
    unknown: UnknownMethodPolicy,
}

impl<M> MethodAuthorizers<M> {
    pub fn new(unknown: UnknownMethodPolicy) -> Self {
        Self {
            routes: HashMap::new(),
            unknown,
        }
    }

    /// Empty table using the configured unknown-method policy
    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.unknown_method_policy)
    }

    pub fn route(mut self, method: impl Into<String>, authorizer: impl Authorizer<M> + 'static) -> Self {
        self.routes.insert(method.into(), Arc::new(authorizer));
        self
    }

    pub fn contains(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }
}

#[async_trait]
impl<M: Send + 'static> Authorizer<M> for MethodAuthorizers<M> {
    async fn authorize(
        &self,
        method: &str,
        metadata: &MetadataMap,
        message: M,
    ) -> Result<M, GuardError> {
        match self.routes.get(method) {
            Some(authorizer) => authorizer.authorize(method, metadata, message).await,
            None => match self.unknown {
                UnknownMethodPolicy::Allow => {
                    debug!(method = %method, "No authorizer registered, forwarding unchanged");
                    Ok(message)
                }
                UnknownMethodPolicy::Reject => Err(GuardError::forbidden(format!(
                    "no authorization policy for method {}",
                    method
                ))),
            },
        }
    }
}
