//! Input validation capability
//!
//! A [`Validator`] looks at one inbound frame and either accepts it or
//! rejects it with [`GuardError::InvalidInput`]. Validators are shared by
//! every concurrent call, so implementations must be `Send + Sync` and must
//! not keep per-call state.

use crate::config::{GuardConfig, UnknownMethodPolicy};
use crate::error::GuardError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tonic::metadata::MetadataMap;
use tracing::debug;

#[async_trait]
pub trait Validator<M>: Send + Sync {
    /// Check `message` sent to `method`; never mutates the message
    async fn validate(
        &self,
        method: &str,
        message: &M,
        metadata: &MetadataMap,
    ) -> Result<(), GuardError>;
}

#[async_trait]
impl<M, V> Validator<M> for Arc<V>
where
    M: Sync,
    V: Validator<M> + ?Sized,
{
    async fn validate(
        &self,
        method: &str,
        message: &M,
        metadata: &MetadataMap,
    ) -> Result<(), GuardError> {
        (**self).validate(method, message, metadata).await
    }
}

/// Synchronous closure adapter, see [`validator_fn`]
#[derive(Clone)]
pub struct FnValidator<F>(F);

/// Wrap a plain function as a [`Validator`]
///
/// ```rust
/// use grpc_call_guard::{validator_fn, GuardError};
///
/// let validator = validator_fn(|_method: &str, name: &String, _md: &tonic::metadata::MetadataMap| {
///     if name.is_empty() {
///         return Err(GuardError::invalid_input("name is required"));
///     }
///     Ok(())
/// });
/// # let _ = validator;
/// ```
pub fn validator_fn<M, F>(f: F) -> FnValidator<F>
where
    F: Fn(&str, &M, &MetadataMap) -> Result<(), GuardError> + Send + Sync,
{
    FnValidator(f)
}

#[async_trait]
impl<M, F> Validator<M> for FnValidator<F>
where
    M: Sync,
    F: Fn(&str, &M, &MetadataMap) -> Result<(), GuardError> + Send + Sync,
{
    async fn validate(
        &self,
        method: &str,
        message: &M,
        metadata: &MetadataMap,
    ) -> Result<(), GuardError> {
        (self.0)(method, message, metadata)
    }
}

/// Routes each frame to the validator registered for its method
pub struct MethodValidators<M> {
    routes: HashMap<String, Arc<dyn Validator<M>>>,
    unknown: UnknownMethodPolicy,
}

impl<M> MethodValidators<M> {
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

    /// Register `validator` for the short method name `method`
    pub fn route(mut self, method: impl Into<String>, validator: impl Validator<M> + 'static) -> Self {
        self.routes.insert(method.into(), Arc::new(validator));
        self
    }

    pub fn contains(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }
}

#[async_trait]
impl<M: Sync> Validator<M> for MethodValidators<M> {
    async fn validate(
        &self,
        method: &str,
        message: &M,
        metadata: &MetadataMap,
    ) -> Result<(), GuardError> {
        match self.routes.get(method) {
            Some(validator) => validator.validate(method, message, metadata).await,
            None => match self.unknown {
                UnknownMethodPolicy::Allow => {
                    debug!(method = %method, "No validator registered, allowing");
                    Ok(())
                }
                UnknownMethodPolicy::Reject => Err(GuardError::invalid_input(format!(
                    "no validator registered for method {}",
                    method
                ))),
            },
        }
    }
}
