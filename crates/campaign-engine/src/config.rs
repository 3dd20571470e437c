//! Engine configuration
//!
//! Sectioned configuration in the shape the rest of the stack expects:
//! plain structs with `Default` impls carrying production defaults, grouped
//! by concern. Embedders construct one [`EngineConfig`], override what they
//! need, and hand it to the engine.

use std::time::Duration;
use uuid::Uuid;

/// Top-level configuration for the campaign engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// General runner behavior
    pub general: GeneralConfig,
    /// Concurrency and rate limits
    pub limits: LimitsConfig,
    /// Heartbeat and orphan-recovery cadence
    pub heartbeat: HeartbeatConfig,
    /// Billing behavior
    pub billing: BillingConfig,
    /// Bot pod warmup
    pub warmup: WarmupConfig,
    /// Provider credentials and webhook base
    pub providers: ProvidersConfig,
    /// Database settings
    pub database: DatabaseConfig,
}

/// General runner behavior
#[derive(Debug, Clone)]
pub struct GeneralConfig {
    /// Opaque id of this container instance; stamped on campaigns this
    /// process is running so peers can detect orphans
    pub container_id: String,
    /// Delay between consecutive dials within one campaign
    pub subsequent_call_wait: Duration,
    /// Per-call credit estimate used for the create-time balance warning
    pub estimated_call_duration_secs: i64,
    /// How long shutdown waits for in-flight persistence to flush
    pub shutdown_grace: Duration,
    /// How often the scheduler scans for due campaigns
    pub scheduler_interval: Duration,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            container_id: format!("container-{}", Uuid::new_v4()),
            subsequent_call_wait: Duration::from_secs(1),
            estimated_call_duration_secs: 30,
            shutdown_grace: Duration::from_secs(10),
            scheduler_interval: Duration::from_secs(30),
        }
    }
}

/// Concurrency and rate limits
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Fleet-wide cap on concurrent calls across all tenants
    pub global_max_calls: i64,
    /// Tenant cap applied when the tenant record carries none
    pub default_tenant_max_concurrent_calls: i64,
    /// Fleet-wide dials per rate window
    pub max_calls_per_minute: i64,
    /// Rate window length
    pub rate_limit_window: Duration,
    /// How long admission waits for a slot before giving up
    pub admission_timeout: Duration,
    /// Backoff between admission attempts
    pub admission_retry_delay: Duration,
    /// Consecutive global admission timeouts before the runner auto-pauses
    pub overload_pause_threshold: u32,
    /// Reservations never confirmed by the provider expire after this
    pub stale_call_threshold: Duration,
    /// Ongoing calls are presumed leaked after this and their slot reclaimed
    pub max_call_duration: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global_max_calls: 200,
            default_tenant_max_concurrent_calls: 10,
            max_calls_per_minute: 60,
            rate_limit_window: Duration::from_secs(60),
            admission_timeout: Duration::from_secs(60),
            admission_retry_delay: Duration::from_millis(500),
            overload_pause_threshold: 3,
            stale_call_threshold: Duration::from_secs(120),
            max_call_duration: Duration::from_secs(4 * 3600),
        }
    }
}

/// Heartbeat and orphan-recovery cadence
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often a running campaign's heartbeat is written
    pub interval: Duration,
    /// A running campaign whose heartbeat is older than this is an orphan.
    /// Kept above 4x the heartbeat interval to tolerate GC pauses.
    pub orphan_threshold: Duration,
    /// How often this container scans for orphans
    pub scan_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            orphan_threshold: Duration::from_secs(120),
            scan_interval: Duration::from_secs(60),
        }
    }
}

/// Billing behavior
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Minimum age before incoming-call ledger entries are coalesced again
    pub incoming_aggregation_interval: Duration,
    /// How often a terminated campaign is checked for in-flight calls before
    /// its aggregate ledger entry is written
    pub aggregate_drain_poll: Duration,
    /// The aggregate is written even if calls look stuck after this long
    pub aggregate_drain_timeout: Duration,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            incoming_aggregation_interval: Duration::from_secs(3600),
            aggregate_drain_poll: Duration::from_secs(1),
            aggregate_drain_timeout: Duration::from_secs(1800),
        }
    }
}

/// Bot pod warmup
#[derive(Debug, Clone)]
pub struct WarmupConfig {
    /// HTTP base of the bot deployment, e.g. `https://bot.example.com`.
    /// `None` disables warmup entirely.
    pub bot_base_url: Option<String>,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Attempts per pod
    pub retries: u32,
    /// Exponential backoff floor between attempts
    pub backoff_base: Duration,
    /// Exponential backoff ceiling
    pub backoff_max: Duration,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            bot_base_url: None,
            timeout: Duration::from_secs(120),
            retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5),
        }
    }
}

/// Provider credentials and webhook base
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub plivo: Option<PlivoConfig>,
    pub twilio: Option<TwilioConfig>,
    /// Externally reachable root the webhook collaborator serves from;
    /// encoded into every call-create request
    pub callback_base_url: String,
    /// Provider used when a campaign pins none
    pub default_provider: dialwave_telephony::ProviderKind,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            plivo: None,
            twilio: None,
            callback_base_url: "http://localhost:3000".to_string(),
            default_provider: dialwave_telephony::ProviderKind::Plivo,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlivoConfig {
    pub auth_id: String,
    pub auth_token: String,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
}

/// Database settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite path; `None` means in-memory
    pub path: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: None, max_connections: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.limits.default_tenant_max_concurrent_calls, 10);
        assert_eq!(config.limits.admission_timeout, Duration::from_secs(60));
        assert_eq!(config.heartbeat.interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat.orphan_threshold, Duration::from_secs(120));
        assert_eq!(config.general.subsequent_call_wait, Duration::from_secs(1));
        assert_eq!(config.general.shutdown_grace, Duration::from_secs(10));
        assert_eq!(config.billing.incoming_aggregation_interval, Duration::from_secs(3600));
        assert_eq!(config.warmup.retries, 3);
    }

    #[test]
    fn orphan_threshold_tolerates_missed_heartbeats() {
        let config = HeartbeatConfig::default();
        assert!(config.orphan_threshold >= 4 * config.interval);
    }

    #[test]
    fn container_ids_are_unique() {
        assert_ne!(GeneralConfig::default().container_id, GeneralConfig::default().container_id);
    }
}
