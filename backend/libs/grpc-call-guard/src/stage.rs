//! Ordered stage chain
//!
//! Each inbound frame passes through a [`StageChain`]: an explicit, ordered
//! list of [`CallStage`]s. The first failing stage short-circuits the chain
//! and later stages never see the frame.

use crate::authorizer::Authorizer;
use crate::context::CallContext;
use crate::error::GuardError;
use crate::validator::Validator;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// One step a frame goes through before reaching the handler
#[async_trait]
pub trait CallStage<M>: Send + Sync {
    /// Short label used in logs
    fn name(&self) -> &'static str;

    /// Accept the frame (possibly replacing it) or reject it
    async fn apply(&self, ctx: &CallContext, message: M) -> Result<M, GuardError>;
}

/// Runs a [`Validator`] and forwards the frame unchanged
pub struct ValidationStage<M> {
    validator: Arc<dyn Validator<M>>,
}

impl<M> ValidationStage<M> {
    pub fn new(validator: impl Validator<M> + 'static) -> Self {
        Self {
            validator: Arc::new(validator),
        }
    }
}

#[async_trait]
impl<M: Send + Sync + 'static> CallStage<M> for ValidationStage<M> {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn apply(&self, ctx: &CallContext, message: M) -> Result<M, GuardError> {
        self.validator
            .validate(ctx.method_name(), &message, ctx.metadata())
            .await?;
        Ok(message)
    }
}

/// Runs an [`Authorizer`] and forwards whatever message it returns
pub struct AuthorizationStage<M> {
    authorizer: Arc<dyn Authorizer<M>>,
}

impl<M> AuthorizationStage<M> {
    pub fn new(authorizer: impl Authorizer<M> + 'static) -> Self {
        Self {
            authorizer: Arc::new(authorizer),
        }
    }
}

#[async_trait]
impl<M: Send + Sync + 'static> CallStage<M> for AuthorizationStage<M> {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn apply(&self, ctx: &CallContext, message: M) -> Result<M, GuardError> {
        self.authorizer
            .authorize(ctx.method_name(), ctx.metadata(), message)
            .await
    }
}

/// Ordered stages a frame passes through, stopping at the first failure
pub struct StageChain<M> {
    stages: Vec<Arc<dyn CallStage<M>>>,
}

impl<M> Default for StageChain<M> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<M: Send + 'static> StageChain<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; stages run in the order they were pushed
    pub fn push(mut self, stage: impl CallStage<M> + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage labels in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run `message` through every stage in order
    pub async fn run(&self, ctx: &CallContext, message: M) -> Result<M, GuardError> {
        let mut message = message;
        for stage in &self.stages {
            debug!(method = %ctx.method_name(), stage = stage.name(), "Running stage");
            message = stage.apply(ctx, message).await.map_err(|e| {
                debug!(
                    method = %ctx.method_name(),
                    stage = stage.name(),
                    error = %e,
                    "Stage rejected frame"
                );
                e
            })?;
        }
        Ok(message)
    }
}
