//! Guard configuration
//!
//! **Environment Variables** (all optional):
//! - `CALL_GUARD_STAGE_ORDER`: `validate_then_authorize` (default) or `authorize_then_validate`
//! - `CALL_GUARD_UNKNOWN_METHOD_POLICY`: `allow` (default) or `reject`

use serde::Deserialize;
use tracing::info;

/// Order in which the two built-in stages run for each frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOrder {
    /// Malformed input never reaches the authorizer
    #[default]
    ValidateThenAuthorize,
    /// Unauthorized callers learn nothing about input rules
    AuthorizeThenValidate,
}

/// What the per-method routing tables do for a method nobody registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownMethodPolicy {
    #[default]
    Allow,
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub stage_order: StageOrder,

    #[serde(default)]
    pub unknown_method_policy: UnknownMethodPolicy,
}

impl GuardConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        let config: GuardConfig = envy::prefixed("CALL_GUARD_").from_env()?;

        info!(
            stage_order = ?config.stage_order,
            unknown_method_policy = ?config.unknown_method_policy,
            "gRPC call guard configuration loaded"
        );

        Ok(config)
    }
}
