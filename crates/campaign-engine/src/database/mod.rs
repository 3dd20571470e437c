//! # Async persistence store (sqlx + SQLite)
//!
//! The store is the only shared mutable state in the system: every runner
//! instance, the webhook processor, and the billing engine go through it.
//! Correctness across containers rests on four primitives this module and
//! its submodules provide:
//!
//! - conditional `UPDATE .. WHERE` checked via `rows_affected()` (status
//!   CAS, orphan claims, balance-updated gating)
//! - `INSERT OR IGNORE` uniqueness prechecks (hangup and billing idempotency)
//! - `INSERT .. ON CONFLICT .. RETURNING` counters (rate windows)
//! - transactional count-then-insert slot reservation (admission)
//!
//! All operations are fully async and `Send`-safe, so they can be used from
//! `tokio::spawn` without ceremony. Row structs mirror table shapes with
//! `from_row` helpers; typed accessors convert status strings.
//!
//! ```rust
//! use dialwave_campaign_engine::database::Store;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Store::new_in_memory().await?;
//! let orphans = store.find_orphaned_campaigns(chrono::Utc::now()).await?;
//! assert!(orphans.is_empty());
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::orchestrator::types::CampaignStatus;
use dialwave_telephony::{CallPhase, CallSource, ProviderKind};

pub mod billing;
pub mod calls;
pub mod campaigns;
pub mod contacts;
pub mod schema;
pub mod tenants;

pub use billing::{NewBillingDetail, NewHangupRecord, NewHistoryEntry, ReportPage};
pub use calls::{CallReservation, ReservationOutcome};
pub use contacts::NewContact;

/// Main persistence store shared by all engine components
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect and apply the schema.
    ///
    /// `database_url` is an sqlx SQLite URL, e.g. `sqlite:campaigns.db` or
    /// `sqlite::memory:`.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    /// Connect with an explicit pool size
    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("🗄️ Initializing store: {}", database_url);

        // An in-memory database exists per connection, so the pool must be
        // pinned to a single connection there.
        let max_connections =
            if database_url.contains(":memory:") { 1 } else { max_connections.max(1) };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        for statement in schema::SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| anyhow!("Failed to apply schema: {}", e))?;
        }

        info!("✅ Store initialized");
        Ok(Self { pool })
    }

    /// Create an in-memory store for testing
    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Atomically bump a named counter, creating it at 1, and return the
    /// post-increment value. Used for per-minute rate windows shared across
    /// runner instances.
    pub async fn increment_counter(&self, bucket: &str) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO rate_counters (bucket, count) VALUES (?, 1)
             ON CONFLICT(bucket) DO UPDATE SET count = count + 1
             RETURNING count",
        )
        .bind(bucket)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.try_get("count")?;
        debug!("rate counter {} -> {}", bucket, count);
        Ok(count)
    }

    /// Drop counters for windows that have long passed
    pub async fn prune_counters(&self, keep: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_counters WHERE bucket < ?")
            .bind(keep)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Tenant record
#[derive(Debug, Clone)]
pub struct Tenant {
    pub tenant_id: String,
    pub available_balance: i64,
    pub max_concurrent_calls: i64,
    /// JSON array of phone strings owned by this tenant
    pub caller_numbers: String,
    pub last_incoming_aggregation_time: Option<DateTime<Utc>>,
}

impl Tenant {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Tenant {
            tenant_id: row.try_get("tenant_id")?,
            available_balance: row.try_get("available_balance")?,
            max_concurrent_calls: row.try_get("max_concurrent_calls")?,
            caller_numbers: row.try_get("caller_numbers")?,
            last_incoming_aggregation_time: row.try_get("last_incoming_aggregation_time")?,
        })
    }

    pub fn caller_numbers(&self) -> Vec<String> {
        serde_json::from_str(&self.caller_numbers).unwrap_or_default()
    }
}

/// Campaign record
#[derive(Debug, Clone)]
pub struct Campaign {
    pub campaign_id: String,
    pub tenant_id: String,
    pub name: String,
    pub list_id: String,
    pub from_number: String,
    pub bot_ws_url: String,
    pub provider: Option<String>,
    pub status: String,
    pub current_index: i64,
    pub total_contacts: i64,
    pub processed_contacts: i64,
    pub connected_calls: i64,
    pub failed_calls: i64,
    pub heartbeat: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub container_id: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub paused_by: Option<String>,
    pub pause_reason: Option<String>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub is_balance_updated: bool,
    pub billing_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Campaign {
            campaign_id: row.try_get("campaign_id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            list_id: row.try_get("list_id")?,
            from_number: row.try_get("from_number")?,
            bot_ws_url: row.try_get("bot_ws_url")?,
            provider: row.try_get("provider")?,
            status: row.try_get("status")?,
            current_index: row.try_get("current_index")?,
            total_contacts: row.try_get("total_contacts")?,
            processed_contacts: row.try_get("processed_contacts")?,
            connected_calls: row.try_get("connected_calls")?,
            failed_calls: row.try_get("failed_calls")?,
            heartbeat: row.try_get("heartbeat")?,
            last_activity: row.try_get("last_activity")?,
            container_id: row.try_get("container_id")?,
            scheduled_time: row.try_get("scheduled_time")?,
            paused_at: row.try_get("paused_at")?,
            paused_by: row.try_get("paused_by")?,
            pause_reason: row.try_get("pause_reason")?,
            resumed_at: row.try_get("resumed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            error_message: row.try_get("error_message")?,
            is_balance_updated: row.try_get("is_balance_updated")?,
            billing_processed_at: row.try_get("billing_processed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Get the typed status
    pub fn get_status(&self) -> Option<CampaignStatus> {
        CampaignStatus::parse(&self.status)
    }

    /// Get the typed provider, if one is pinned
    pub fn get_provider(&self) -> Option<ProviderKind> {
        self.provider.as_deref().and_then(ProviderKind::parse)
    }
}

/// Contact list record
#[derive(Debug, Clone)]
pub struct ContactList {
    pub list_id: String,
    pub tenant_id: String,
    pub name: String,
    pub contact_count: i64,
}

impl ContactList {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(ContactList {
            list_id: row.try_get("list_id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            contact_count: row.try_get("contact_count")?,
        })
    }
}

/// One contact inside a list. `fields` carries arbitrary dynamic fields as a
/// JSON object; `number`, `first_name`, and `email` are the known keys.
#[derive(Debug, Clone)]
pub struct Contact {
    pub list_id: String,
    pub position: i64,
    pub number: String,
    pub first_name: Option<String>,
    pub email: Option<String>,
    pub fields: String,
}

impl Contact {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Contact {
            list_id: row.try_get("list_id")?,
            position: row.try_get("position")?,
            number: row.try_get("number")?,
            first_name: row.try_get("first_name")?,
            email: row.try_get("email")?,
            fields: row.try_get("fields")?,
        })
    }

    /// Dynamic fields as a JSON object
    pub fn dynamic_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(&self.fields).unwrap_or_default()
    }
}

/// Active (in-flight) call record
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub call_uuid: String,
    pub provider_call_id: Option<String>,
    pub tenant_id: String,
    pub campaign_id: String,
    pub from_number: String,
    pub to_number: String,
    pub status: String,
    pub provider: String,
    pub assistant_id: Option<String>,
    pub bot_ws_url: Option<String>,
    pub contact_meta: String,
    pub created_at: DateTime<Utc>,
    pub ring_time: Option<DateTime<Utc>>,
    pub stream_start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ActiveCall {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(ActiveCall {
            call_uuid: row.try_get("call_uuid")?,
            provider_call_id: row.try_get("provider_call_id")?,
            tenant_id: row.try_get("tenant_id")?,
            campaign_id: row.try_get("campaign_id")?,
            from_number: row.try_get("from_number")?,
            to_number: row.try_get("to_number")?,
            status: row.try_get("status")?,
            provider: row.try_get("provider")?,
            assistant_id: row.try_get("assistant_id")?,
            bot_ws_url: row.try_get("bot_ws_url")?,
            contact_meta: row.try_get("contact_meta")?,
            created_at: row.try_get("created_at")?,
            ring_time: row.try_get("ring_time")?,
            stream_start_time: row.try_get("stream_start_time")?,
            end_time: row.try_get("end_time")?,
        })
    }

    pub fn get_phase(&self) -> Option<CallPhase> {
        CallPhase::parse(&self.status)
    }

    pub fn get_provider(&self) -> Option<ProviderKind> {
        ProviderKind::parse(&self.provider)
    }

    pub fn contact_meta(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(&self.contact_meta).unwrap_or_default()
    }
}

/// Terminal call fact, at most one per call_uuid
#[derive(Debug, Clone)]
pub struct HangupRecord {
    pub call_uuid: String,
    pub tenant_id: String,
    pub campaign_id: String,
    pub assistant_id: Option<String>,
    pub from_number: String,
    pub to_number: String,
    pub duration: i64,
    pub status: String,
    pub hangup_cause: String,
    pub start_time: Option<String>,
    pub answer_time: Option<String>,
    pub end_time: Option<String>,
    pub recording_url: Option<String>,
    pub source: String,
    pub provider: String,
    pub contact_meta: String,
    pub created_at: DateTime<Utc>,
}

impl HangupRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(HangupRecord {
            call_uuid: row.try_get("call_uuid")?,
            tenant_id: row.try_get("tenant_id")?,
            campaign_id: row.try_get("campaign_id")?,
            assistant_id: row.try_get("assistant_id")?,
            from_number: row.try_get("from_number")?,
            to_number: row.try_get("to_number")?,
            duration: row.try_get("duration")?,
            status: row.try_get("status")?,
            hangup_cause: row.try_get("hangup_cause")?,
            start_time: row.try_get("start_time")?,
            answer_time: row.try_get("answer_time")?,
            end_time: row.try_get("end_time")?,
            recording_url: row.try_get("recording_url")?,
            source: row.try_get("source")?,
            provider: row.try_get("provider")?,
            contact_meta: row.try_get("contact_meta")?,
            created_at: row.try_get("created_at")?,
        })
    }

    pub fn get_source(&self) -> Option<CallSource> {
        match self.source.as_str() {
            "campaign" => Some(CallSource::Campaign),
            "api" => Some(CallSource::Api),
            "test" => Some(CallSource::Test),
            "inbound" => Some(CallSource::Inbound),
            _ => None,
        }
    }
}

/// Per-call credit record, at most one per call_uuid
#[derive(Debug, Clone)]
pub struct BillingDetail {
    pub call_uuid: String,
    pub tenant_id: String,
    pub call_type: String,
    pub duration: i64,
    pub from_number: String,
    pub to_number: String,
    pub credits: i64,
    pub ai_credits: i64,
    pub telephony_credits: i64,
    pub campaign_id: Option<String>,
    pub campaign_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BillingDetail {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(BillingDetail {
            call_uuid: row.try_get("call_uuid")?,
            tenant_id: row.try_get("tenant_id")?,
            call_type: row.try_get("call_type")?,
            duration: row.try_get("duration")?,
            from_number: row.try_get("from_number")?,
            to_number: row.try_get("to_number")?,
            credits: row.try_get("credits")?,
            ai_credits: row.try_get("ai_credits")?,
            telephony_credits: row.try_get("telephony_credits")?,
            campaign_id: row.try_get("campaign_id")?,
            campaign_name: row.try_get("campaign_name")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

/// Human-readable ledger entry
#[derive(Debug, Clone)]
pub struct BillingHistoryEntry {
    pub id: i64,
    pub tenant_id: String,
    /// Signed credit delta (negative for debits)
    pub balance_count: i64,
    /// Balance snapshot after the entry was applied
    pub new_available_balance: i64,
    pub description: String,
    /// `Dr` or `Cr`
    pub transaction_type: String,
    pub campaign_id: Option<String>,
    pub call_uuid: Option<String>,
    pub date: DateTime<Utc>,
}

impl BillingHistoryEntry {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(BillingHistoryEntry {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            balance_count: row.try_get("balance_count")?,
            new_available_balance: row.try_get("new_available_balance")?,
            description: row.try_get("description")?,
            transaction_type: row.try_get("transaction_type")?,
            campaign_id: row.try_get("campaign_id")?,
            call_uuid: row.try_get("call_uuid")?,
            date: row.try_get("date")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_creation() {
        let store = Store::new_in_memory().await.unwrap();
        let orphans = store.find_orphaned_campaigns(Utc::now()).await.unwrap();
        assert!(orphans.is_empty());
    }

    #[tokio::test]
    async fn store_is_send_safe() {
        let store = Store::new_in_memory().await.unwrap();

        let handle = tokio::spawn(async move {
            let _ = store.find_orphaned_campaigns(Utc::now()).await.unwrap();
        });

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn counters_increment_atomically() {
        let store = Store::new_in_memory().await.unwrap();

        assert_eq!(store.increment_counter("2026-01-01T00:00").await.unwrap(), 1);
        assert_eq!(store.increment_counter("2026-01-01T00:00").await.unwrap(), 2);
        assert_eq!(store.increment_counter("2026-01-01T00:01").await.unwrap(), 1);

        let pruned = store.prune_counters("2026-01-01T00:01").await.unwrap();
        assert_eq!(pruned, 1);
    }
}
