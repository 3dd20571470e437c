//! Error types for campaign orchestration
//!
//! Everything the engine can refuse to do is a typed variant; idempotent
//! skips (duplicate hangups, already-billed calls) are results, not errors.
//! The store layer reports through `anyhow` like the rest of the database
//! code and is wrapped into [`EngineError::Database`] at the engine seam.

use dialwave_telephony::ProviderError;
use thiserror::Error;

use crate::orchestrator::types::CampaignStatus;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Persistence failure
    #[error("Database error: {0}")]
    Database(String),

    /// Provider-side failure, carried through from the adapter
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Tenant concurrency cap could not be satisfied within the admission
    /// timeout
    #[error("Tenant {tenant_id} is at its concurrent-call limit ({active}/{cap})")]
    OverloadedTenant { tenant_id: String, active: i64, cap: i64 },

    /// Global concurrency cap could not be satisfied within the admission
    /// timeout
    #[error("Global call capacity saturated ({active}/{cap})")]
    OverloadedGlobal { active: i64, cap: i64 },

    /// Tenant has no credits left
    #[error("Insufficient balance for tenant {tenant_id}: {balance} credits")]
    InsufficientBalance { tenant_id: String, balance: i64 },

    /// Requested state change is not legal from the campaign's current state
    #[error("Cannot move campaign {campaign_id} from '{from}' to '{to}'")]
    IllegalTransition { campaign_id: String, from: CampaignStatus, to: CampaignStatus },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Contact list not found: {0}")]
    ListNotFound(String),

    /// Campaign names are unique per tenant
    #[error("Campaign name '{name}' already exists for tenant {tenant_id}")]
    DuplicateCampaignName { tenant_id: String, name: String },

    /// Every warmup pod failed; the campaign cannot start
    #[error("Bot warmup failed: {0}")]
    Warmup(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        EngineError::Database(err.to_string())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        EngineError::Internal(msg.into())
    }

    /// Overload errors are retried by the runner rather than surfaced
    pub fn is_overload(&self) -> bool {
        matches!(
            self,
            EngineError::OverloadedTenant { .. } | EngineError::OverloadedGlobal { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_errors_name_both_states() {
        let err = EngineError::IllegalTransition {
            campaign_id: "cmp-1".to_string(),
            from: CampaignStatus::Completed,
            to: CampaignStatus::Running,
        };
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("running"));
    }

    #[test]
    fn overload_classification() {
        assert!(EngineError::OverloadedGlobal { active: 200, cap: 200 }.is_overload());
        assert!(!EngineError::CampaignNotFound("x".into()).is_overload());
    }
}
