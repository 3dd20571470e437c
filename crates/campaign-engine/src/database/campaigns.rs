//! Campaign operations
//!
//! Status changes are conditional updates: every transition names the states
//! it is legal from and reports through `rows_affected()` whether it won.
//! That single pattern gives exactly-once semantics for the scheduler,
//! orphan recovery, and pause/resume without any process-local locking.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use super::{Campaign, Store};
use crate::orchestrator::types::CampaignStatus;

const CAMPAIGN_COLUMNS: &str = "campaign_id, tenant_id, name, list_id, from_number, bot_ws_url,
    provider, status, current_index, total_contacts, processed_contacts, connected_calls,
    failed_calls, heartbeat, last_activity, container_id, scheduled_time, paused_at, paused_by,
    pause_reason, resumed_at, cancelled_at, error_message, is_balance_updated,
    billing_processed_at, created_at";

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_campaign(
        &self,
        campaign_id: &str,
        tenant_id: &str,
        name: &str,
        list_id: &str,
        from_number: &str,
        bot_ws_url: &str,
        provider: Option<&str>,
        status: CampaignStatus,
        total_contacts: i64,
        scheduled_time: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO campaigns (campaign_id, tenant_id, name, list_id, from_number,
                bot_ws_url, provider, status, total_contacts, scheduled_time, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(campaign_id)
        .bind(tenant_id)
        .bind(name)
        .bind(list_id)
        .bind(from_number)
        .bind(bot_ws_url)
        .bind(provider)
        .bind(status.as_str())
        .bind(total_contacts)
        .bind(scheduled_time)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE campaign_id = ?");
        let row = sqlx::query(&sql)
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Campaign::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Fresh status read used by the dial loop before every contact
    pub async fn get_campaign_status(&self, campaign_id: &str) -> Result<Option<CampaignStatus>> {
        let row = sqlx::query("SELECT status FROM campaigns WHERE campaign_id = ?")
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(CampaignStatus::parse(&status))
            }
            None => Ok(None),
        }
    }

    /// All campaigns of one tenant, newest first
    pub async fn list_campaigns_for_tenant(&self, tenant_id: &str) -> Result<Vec<Campaign>> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE tenant_id = ? ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql).bind(tenant_id).fetch_all(&self.pool).await?;

        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(Campaign::from_row(&row)?);
        }
        Ok(campaigns)
    }

    pub async fn campaign_name_exists(&self, tenant_id: &str, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM campaigns WHERE tenant_id = ? AND name = ?")
            .bind(tenant_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // --- status transitions (all CAS) ---

    /// scheduled -> running, claimed by this container. Exactly one scheduler
    /// firing wins even when several fire concurrently.
    pub async fn mark_running_from_scheduled(
        &self,
        campaign_id: &str,
        container_id: &str,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns
             SET status = 'running', container_id = ?, heartbeat = ?, last_activity = ?
             WHERE campaign_id = ? AND status = 'scheduled'",
        )
        .bind(container_id)
        .bind(now)
        .bind(now)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// paused -> running (resume)
    pub async fn mark_running_from_paused(
        &self,
        campaign_id: &str,
        container_id: &str,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns
             SET status = 'running', container_id = ?, heartbeat = ?, resumed_at = ?,
                 pause_reason = NULL, paused_by = NULL, last_activity = ?
             WHERE campaign_id = ? AND status = 'paused'",
        )
        .bind(container_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// running -> paused. The heartbeat is cleared so the campaign is not
    /// mistaken for an orphan later.
    pub async fn mark_paused(
        &self,
        campaign_id: &str,
        reason: &str,
        paused_by: &str,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns
             SET status = 'paused', pause_reason = ?, paused_by = ?, paused_at = ?,
                 heartbeat = NULL, container_id = NULL, last_activity = ?
             WHERE campaign_id = ? AND status = 'running'",
        )
        .bind(reason)
        .bind(paused_by)
        .bind(now)
        .bind(now)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// scheduled|running|paused -> cancelled
    pub async fn mark_cancelled(&self, campaign_id: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns
             SET status = 'cancelled', cancelled_at = ?, heartbeat = NULL,
                 container_id = NULL, last_activity = ?
             WHERE campaign_id = ? AND status IN ('scheduled', 'running', 'paused')",
        )
        .bind(now)
        .bind(now)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// running -> completed
    pub async fn mark_completed(&self, campaign_id: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns
             SET status = 'completed', heartbeat = NULL, container_id = NULL, last_activity = ?
             WHERE campaign_id = ? AND status = 'running'",
        )
        .bind(now)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// running -> failed with an operator-visible message
    pub async fn mark_failed(&self, campaign_id: &str, error_message: &str) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE campaigns
             SET status = 'failed', error_message = ?, heartbeat = NULL,
                 container_id = NULL, last_activity = ?
             WHERE campaign_id = ? AND status = 'running'",
        )
        .bind(error_message)
        .bind(now)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // --- dial-loop progress ---

    /// Persist the cursor without advancing counters, used when the loop
    /// exits early (pause, cancel, shutdown)
    pub async fn persist_campaign_cursor(&self, campaign_id: &str, index: i64) -> Result<()> {
        sqlx::query(
            "UPDATE campaigns SET current_index = ?, last_activity = ? WHERE campaign_id = ?",
        )
        .bind(index)
        .bind(Utc::now())
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advance the cursor past one contact and bump the processed counter
    /// plus either the connected or failed counter.
    pub async fn advance_campaign_cursor(
        &self,
        campaign_id: &str,
        next_index: i64,
        connected: bool,
    ) -> Result<()> {
        let (connected_delta, failed_delta): (i64, i64) = if connected { (1, 0) } else { (0, 1) };
        sqlx::query(
            "UPDATE campaigns
             SET current_index = ?, processed_contacts = processed_contacts + 1,
                 connected_calls = connected_calls + ?, failed_calls = failed_calls + ?,
                 last_activity = ?
             WHERE campaign_id = ?",
        )
        .bind(next_index)
        .bind(connected_delta)
        .bind(failed_delta)
        .bind(Utc::now())
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- heartbeats and orphan recovery ---

    /// Refresh the heartbeat; a no-op once the campaign left `running`
    pub async fn write_heartbeat(&self, campaign_id: &str, container_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET heartbeat = ?, container_id = ?
             WHERE campaign_id = ? AND status = 'running'",
        )
        .bind(Utc::now())
        .bind(container_id)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear heartbeats of every running campaign owned by this container,
    /// leaving status untouched so peers adopt them through the orphan path.
    pub async fn clear_heartbeats_for_container(&self, container_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE campaigns SET heartbeat = NULL
             WHERE container_id = ? AND status = 'running'",
        )
        .bind(container_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Running campaigns whose heartbeat is missing or older than `cutoff`
    pub async fn find_orphaned_campaigns(&self, cutoff: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE status = 'running' AND (heartbeat IS NULL OR heartbeat < ?)"
        );
        let rows = sqlx::query(&sql).bind(cutoff).fetch_all(&self.pool).await?;

        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(Campaign::from_row(&row)?);
        }
        Ok(campaigns)
    }

    /// Claim an orphan for this container. The status and staleness checks
    /// repeat inside the update so racing supervisors cannot both win and a
    /// concurrent pause is respected.
    pub async fn claim_orphaned_campaign(
        &self,
        campaign_id: &str,
        container_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET container_id = ?, heartbeat = ?
             WHERE campaign_id = ? AND status = 'running'
               AND (heartbeat IS NULL OR heartbeat < ?)",
        )
        .bind(container_id)
        .bind(Utc::now())
        .bind(campaign_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() > 0;
        if claimed {
            debug!("🛟 claimed orphaned campaign {} for {}", campaign_id, container_id);
        }
        Ok(claimed)
    }

    // --- scheduler and billing gates ---

    /// Scheduled campaigns whose start time has arrived
    pub async fn find_due_scheduled_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE status = 'scheduled' AND scheduled_time IS NOT NULL AND scheduled_time <= ?"
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;

        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(Campaign::from_row(&row)?);
        }
        Ok(campaigns)
    }

    /// Terminal campaigns whose aggregate ledger entry has not been written
    /// yet (the catch-up sweep for containers that died mid-finalize)
    pub async fn find_unbilled_terminal_campaigns(&self) -> Result<Vec<Campaign>> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE status IN ('completed', 'cancelled', 'failed') AND is_balance_updated = 0"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(Campaign::from_row(&row)?);
        }
        Ok(campaigns)
    }

    /// One-shot gate for the campaign's aggregate billing entry
    pub async fn claim_campaign_billing(&self, campaign_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET is_balance_updated = 1, billing_processed_at = ?
             WHERE campaign_id = ? AND is_balance_updated = 0",
        )
        .bind(Utc::now())
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_campaign(store: &Store, id: &str, status: CampaignStatus) {
        store
            .insert_campaign(
                id,
                "tenant-1",
                &format!("name-{id}"),
                "list-1",
                "+14155550100",
                "wss://bot.example.com/chat/v2/asst-1",
                None,
                status,
                10,
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn name_uniqueness_is_visible() {
        let store = Store::new_in_memory().await.unwrap();
        seed_campaign(&store, "cmp-1", CampaignStatus::Running).await;

        assert!(store.campaign_name_exists("tenant-1", "name-cmp-1").await.unwrap());
        assert!(!store.campaign_name_exists("tenant-1", "other").await.unwrap());
        assert!(!store.campaign_name_exists("tenant-2", "name-cmp-1").await.unwrap());
    }

    #[tokio::test]
    async fn pause_only_wins_from_running() {
        let store = Store::new_in_memory().await.unwrap();
        seed_campaign(&store, "cmp-1", CampaignStatus::Running).await;

        assert!(store.mark_paused("cmp-1", "manual", "operator").await.unwrap());
        // the second pause loses: already paused
        assert!(!store.mark_paused("cmp-1", "manual", "operator").await.unwrap());

        let campaign = store.get_campaign("cmp-1").await.unwrap().unwrap();
        assert_eq!(campaign.get_status(), Some(CampaignStatus::Paused));
        assert!(campaign.heartbeat.is_none());
        assert_eq!(campaign.pause_reason.as_deref(), Some("manual"));
    }

    #[tokio::test]
    async fn scheduler_cas_fires_once() {
        let store = Store::new_in_memory().await.unwrap();
        seed_campaign(&store, "cmp-1", CampaignStatus::Scheduled).await;

        assert!(store.mark_running_from_scheduled("cmp-1", "container-a").await.unwrap());
        assert!(!store.mark_running_from_scheduled("cmp-1", "container-b").await.unwrap());

        let campaign = store.get_campaign("cmp-1").await.unwrap().unwrap();
        assert_eq!(campaign.container_id.as_deref(), Some("container-a"));
    }

    #[tokio::test]
    async fn orphan_claim_respects_fresh_heartbeat() {
        let store = Store::new_in_memory().await.unwrap();
        seed_campaign(&store, "cmp-1", CampaignStatus::Running).await;

        // no heartbeat yet: orphaned
        let cutoff = Utc::now();
        let orphans = store.find_orphaned_campaigns(cutoff).await.unwrap();
        assert_eq!(orphans.len(), 1);

        // exactly one of two racing claims wins
        let first = store.claim_orphaned_campaign("cmp-1", "container-a", cutoff).await.unwrap();
        let second = store.claim_orphaned_campaign("cmp-1", "container-b", cutoff).await.unwrap();
        assert!(first);
        assert!(!second);

        // fresh heartbeat keeps it out of the orphan set
        assert!(store.write_heartbeat("cmp-1", "container-a").await.unwrap());
        let orphans = store.find_orphaned_campaigns(Utc::now() - chrono::Duration::seconds(120)).await.unwrap();
        assert!(orphans.is_empty());
    }

    #[tokio::test]
    async fn sigterm_clears_heartbeats_but_not_status() {
        let store = Store::new_in_memory().await.unwrap();
        seed_campaign(&store, "cmp-1", CampaignStatus::Running).await;
        store.write_heartbeat("cmp-1", "container-a").await.unwrap();

        let cleared = store.clear_heartbeats_for_container("container-a").await.unwrap();
        assert_eq!(cleared, 1);

        let campaign = store.get_campaign("cmp-1").await.unwrap().unwrap();
        assert_eq!(campaign.get_status(), Some(CampaignStatus::Running));
        assert!(campaign.heartbeat.is_none());
    }

    #[tokio::test]
    async fn cursor_advancement_updates_counters() {
        let store = Store::new_in_memory().await.unwrap();
        seed_campaign(&store, "cmp-1", CampaignStatus::Running).await;

        store.advance_campaign_cursor("cmp-1", 1, true).await.unwrap();
        store.advance_campaign_cursor("cmp-1", 2, false).await.unwrap();

        let campaign = store.get_campaign("cmp-1").await.unwrap().unwrap();
        assert_eq!(campaign.current_index, 2);
        assert_eq!(campaign.processed_contacts, 2);
        assert_eq!(campaign.connected_calls, 1);
        assert_eq!(campaign.failed_calls, 1);
    }

    #[tokio::test]
    async fn billing_gate_claims_once() {
        let store = Store::new_in_memory().await.unwrap();
        seed_campaign(&store, "cmp-1", CampaignStatus::Running).await;

        assert!(store.claim_campaign_billing("cmp-1").await.unwrap());
        assert!(!store.claim_campaign_billing("cmp-1").await.unwrap());
    }
}
