//! Active-call operations
//!
//! A concurrency slot is the active-call row itself: reservation inserts the
//! row with status `processed` inside the same transaction that checks the
//! tenant and global counts, which closes the race window between "count is
//! fine" and "dial began". Phase transitions are guarded by the states they
//! are legal from, so out-of-order webhooks cannot move a call backwards.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::Row;
use tracing::debug;

use super::{ActiveCall, Store};
use dialwave_telephony::CallPhase;

/// Everything needed to create the reservation row
#[derive(Debug, Clone)]
pub struct CallReservation {
    pub call_uuid: String,
    pub tenant_id: String,
    pub campaign_id: String,
    pub from_number: String,
    pub to_number: String,
    pub provider: String,
    pub assistant_id: Option<String>,
    /// Bot endpoint for call-time instruction generation
    pub bot_ws_url: Option<String>,
    /// Contact metadata carried to the hangup record (JSON object)
    pub contact_meta: String,
}

/// Outcome of one reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    Reserved,
    TenantSaturated { active: i64, cap: i64 },
    GlobalSaturated { active: i64, cap: i64 },
}

impl Store {
    /// Count of slot-holding calls for one tenant
    pub async fn count_active_calls_for_tenant(&self, tenant_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM active_calls
             WHERE tenant_id = ? AND status IN ('processed', 'ringing', 'ongoing')",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    /// Count of slot-holding calls across all tenants
    pub async fn count_active_calls_global(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM active_calls
             WHERE status IN ('processed', 'ringing', 'ongoing')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    /// Atomically check both caps and insert the reservation row.
    pub async fn try_reserve_call(
        &self,
        reservation: &CallReservation,
        tenant_cap: i64,
        global_cap: i64,
    ) -> Result<ReservationOutcome> {
        let mut tx = self.pool.begin().await?;

        let tenant_active: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM active_calls
             WHERE tenant_id = ? AND status IN ('processed', 'ringing', 'ongoing')",
        )
        .bind(&reservation.tenant_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("count")?;

        if tenant_active >= tenant_cap {
            tx.rollback().await?;
            return Ok(ReservationOutcome::TenantSaturated { active: tenant_active, cap: tenant_cap });
        }

        let global_active: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM active_calls
             WHERE status IN ('processed', 'ringing', 'ongoing')",
        )
        .fetch_one(&mut *tx)
        .await?
        .try_get("count")?;

        if global_active >= global_cap {
            tx.rollback().await?;
            return Ok(ReservationOutcome::GlobalSaturated { active: global_active, cap: global_cap });
        }

        sqlx::query(
            "INSERT INTO active_calls (call_uuid, tenant_id, campaign_id, from_number,
                to_number, status, provider, assistant_id, bot_ws_url, contact_meta, created_at)
             VALUES (?, ?, ?, ?, ?, 'processed', ?, ?, ?, ?, ?)",
        )
        .bind(&reservation.call_uuid)
        .bind(&reservation.tenant_id)
        .bind(&reservation.campaign_id)
        .bind(&reservation.from_number)
        .bind(&reservation.to_number)
        .bind(&reservation.provider)
        .bind(&reservation.assistant_id)
        .bind(&reservation.bot_ws_url)
        .bind(&reservation.contact_meta)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("🎟️ reserved slot for call {}", reservation.call_uuid);
        Ok(ReservationOutcome::Reserved)
    }

    pub async fn get_active_call(&self, call_uuid: &str) -> Result<Option<ActiveCall>> {
        let row = sqlx::query(
            "SELECT call_uuid, provider_call_id, tenant_id, campaign_id, from_number,
                    to_number, status, provider, assistant_id, bot_ws_url, contact_meta,
                    created_at, ring_time, stream_start_time, end_time
             FROM active_calls WHERE call_uuid = ?",
        )
        .bind(call_uuid)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ActiveCall::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Record the provider's own id once originate succeeds, plus the
    /// reverse-lookup row for callbacks carrying only that id.
    pub async fn record_provider_call_id(
        &self,
        call_uuid: &str,
        provider_call_id: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE active_calls SET provider_call_id = ? WHERE call_uuid = ?")
            .bind(provider_call_id)
            .bind(call_uuid)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "INSERT INTO provider_call_map (provider_call_id, call_uuid) VALUES (?, ?)
             ON CONFLICT(provider_call_id) DO UPDATE SET call_uuid = excluded.call_uuid",
        )
        .bind(provider_call_id)
        .bind(call_uuid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Resolve a provider-native id back to the authoritative call_uuid
    pub async fn lookup_call_uuid(&self, provider_call_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT call_uuid FROM provider_call_map WHERE provider_call_id = ?")
            .bind(provider_call_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("call_uuid")?)),
            None => Ok(None),
        }
    }

    /// processed -> ringing; ignored from any later phase
    pub async fn mark_call_ringing(&self, call_uuid: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE active_calls SET status = 'ringing', ring_time = ?
             WHERE call_uuid = ? AND status = 'processed'",
        )
        .bind(Utc::now())
        .bind(call_uuid)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// processed|ringing -> ongoing; ignored from any later phase
    pub async fn mark_call_ongoing(&self, call_uuid: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE active_calls SET status = 'ongoing', stream_start_time = ?
             WHERE call_uuid = ? AND status IN ('processed', 'ringing')",
        )
        .bind(Utc::now())
        .bind(call_uuid)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a call to a terminal phase, releasing its slot. A no-op once the
    /// call is already terminal.
    pub async fn finalize_call(&self, call_uuid: &str, phase: CallPhase) -> Result<bool> {
        let status = if phase == CallPhase::Failed { "failed" } else { "completed" };
        let result = sqlx::query(
            "UPDATE active_calls SET status = ?, end_time = ?
             WHERE call_uuid = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(status)
        .bind(Utc::now())
        .bind(call_uuid)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Intermediate marker between hangup receipt and record persistence
    pub async fn mark_call_ended(&self, call_uuid: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE active_calls SET status = 'call-ended', end_time = ?
             WHERE call_uuid = ? AND status NOT IN ('call-ended', 'completed', 'failed')",
        )
        .bind(Utc::now())
        .bind(call_uuid)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Reclaim slots leaked by calls that never progressed (the provider
    /// never called back) and by ongoing calls past any plausible duration.
    pub async fn expire_stale_calls(
        &self,
        stale_threshold: Duration,
        max_call_duration: Duration,
    ) -> Result<u64> {
        let now = Utc::now();
        let unconfirmed_cutoff = now - stale_threshold;
        let ongoing_cutoff = now - max_call_duration;

        let result = sqlx::query(
            "UPDATE active_calls SET status = 'failed', end_time = ?
             WHERE (status IN ('processed', 'ringing') AND created_at < ?)
                OR (status = 'ongoing' AND created_at < ?)",
        )
        .bind(now)
        .bind(unconfirmed_cutoff)
        .bind(ongoing_cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Slot-holding calls still in flight for one campaign
    pub async fn count_slot_holding_for_campaign(&self, campaign_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM active_calls
             WHERE campaign_id = ? AND status IN ('processed', 'ringing', 'ongoing', 'call-ended')",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    /// Live call counts per state for one campaign
    pub async fn call_counts_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM active_calls
             WHERE campaign_id = ? GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push((row.try_get("status")?, row.try_get("count")?));
        }
        Ok(counts)
    }
}
