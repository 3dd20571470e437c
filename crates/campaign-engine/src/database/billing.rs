//! Hangup-record and billing persistence
//!
//! Idempotency rests on two primary keys: `hangup_records.call_uuid` and
//! `billing_details.call_uuid`. Inserts go through `INSERT OR IGNORE` (or an
//! in-transaction existence check) so a retried provider webhook can never
//! bill or report a call twice. The balance decrement and the billing-detail
//! insert commit in one transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use super::{BillingDetail, BillingHistoryEntry, HangupRecord, Store};

/// Values for a new hangup record
#[derive(Debug, Clone)]
pub struct NewHangupRecord {
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
}

/// Values for a new billing detail
#[derive(Debug, Clone)]
pub struct NewBillingDetail {
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
}

/// Values for a new ledger entry
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub tenant_id: String,
    pub balance_count: i64,
    pub new_available_balance: i64,
    pub description: String,
    pub transaction_type: String,
    pub campaign_id: Option<String>,
    pub call_uuid: Option<String>,
}

/// A page of hangup records plus report totals
#[derive(Debug, Clone)]
pub struct ReportPage {
    pub records: Vec<HangupRecord>,
    pub next_cursor: Option<i64>,
    pub total_count: i64,
    pub total_duration: i64,
}

impl Store {
    /// Insert the hangup record unless one already exists for this call.
    /// Returns false on the idempotent duplicate.
    pub async fn insert_hangup_record(&self, record: &NewHangupRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO hangup_records (call_uuid, tenant_id, campaign_id,
                assistant_id, from_number, to_number, duration, status, hangup_cause,
                start_time, answer_time, end_time, recording_url, source, provider,
                contact_meta, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.call_uuid)
        .bind(&record.tenant_id)
        .bind(&record.campaign_id)
        .bind(&record.assistant_id)
        .bind(&record.from_number)
        .bind(&record.to_number)
        .bind(record.duration)
        .bind(&record.status)
        .bind(&record.hangup_cause)
        .bind(&record.start_time)
        .bind(&record.answer_time)
        .bind(&record.end_time)
        .bind(&record.recording_url)
        .bind(&record.source)
        .bind(&record.provider)
        .bind(&record.contact_meta)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_hangup_record(&self, call_uuid: &str) -> Result<Option<HangupRecord>> {
        let row = sqlx::query(
            "SELECT call_uuid, tenant_id, campaign_id, assistant_id, from_number, to_number,
                    duration, status, hangup_cause, start_time, answer_time, end_time,
                    recording_url, source, provider, contact_meta, created_at
             FROM hangup_records WHERE call_uuid = ?",
        )
        .bind(call_uuid)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(HangupRecord::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Attach a recording URL to an existing hangup record
    pub async fn set_hangup_recording_url(
        &self,
        call_uuid: &str,
        recording_url: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE hangup_records SET recording_url = ? WHERE call_uuid = ?",
        )
        .bind(recording_url)
        .bind(call_uuid)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Park a recording URL that arrived before its hangup
    pub async fn park_pending_recording(&self, call_uuid: &str, recording_url: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO pending_recordings (call_uuid, recording_url, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(call_uuid) DO UPDATE SET recording_url = excluded.recording_url",
        )
        .bind(call_uuid)
        .bind(recording_url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Take (and delete) a parked recording URL, if any
    pub async fn take_pending_recording(&self, call_uuid: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "DELETE FROM pending_recordings WHERE call_uuid = ? RETURNING recording_url",
        )
        .bind(call_uuid)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("recording_url")?)),
            None => Ok(None),
        }
    }

    /// Atomically debit the tenant and write the billing detail. Returns the
    /// post-debit balance, or `None` when a detail for this call already
    /// exists (idempotent duplicate; nothing is changed).
    pub async fn debit_and_insert_billing_detail(
        &self,
        detail: &NewBillingDetail,
    ) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 AS present FROM billing_details WHERE call_uuid = ?")
            .bind(&detail.call_uuid)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        if exists {
            tx.rollback().await?;
            debug!("billing detail for {} already written, skipping", detail.call_uuid);
            return Ok(None);
        }

        let balance: i64 = sqlx::query(
            "UPDATE tenants SET available_balance = available_balance - ?
             WHERE tenant_id = ?
             RETURNING available_balance",
        )
        .bind(detail.credits)
        .bind(&detail.tenant_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("available_balance")?;

        sqlx::query(
            "INSERT INTO billing_details (call_uuid, tenant_id, call_type, duration,
                from_number, to_number, credits, ai_credits, telephony_credits,
                campaign_id, campaign_name, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&detail.call_uuid)
        .bind(&detail.tenant_id)
        .bind(&detail.call_type)
        .bind(detail.duration)
        .bind(&detail.from_number)
        .bind(&detail.to_number)
        .bind(detail.credits)
        .bind(detail.ai_credits)
        .bind(detail.telephony_credits)
        .bind(&detail.campaign_id)
        .bind(&detail.campaign_name)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(balance))
    }

    pub async fn get_billing_detail(&self, call_uuid: &str) -> Result<Option<BillingDetail>> {
        let row = sqlx::query(
            "SELECT call_uuid, tenant_id, call_type, duration, from_number, to_number,
                    credits, ai_credits, telephony_credits, campaign_id, campaign_name, timestamp
             FROM billing_details WHERE call_uuid = ?",
        )
        .bind(call_uuid)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(BillingDetail::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Campaign totals for the aggregate ledger entry
    pub async fn sum_campaign_billing(&self, campaign_id: &str) -> Result<(i64, i64)> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(credits), 0) AS credits, COUNT(*) AS calls
             FROM billing_details WHERE campaign_id = ?",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.try_get("credits")?, row.try_get("calls")?))
    }

    /// Incoming-call totals inside one aggregation window. Rows landing
    /// after `until` belong to the next round.
    pub async fn sum_incoming_billing_between(
        &self,
        tenant_id: &str,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<(i64, i64)> {
        let row = match since {
            Some(since) => {
                sqlx::query(
                    "SELECT COALESCE(SUM(credits), 0) AS credits, COUNT(*) AS calls
                     FROM billing_details
                     WHERE tenant_id = ? AND call_type = 'incoming'
                       AND timestamp > ? AND timestamp <= ?",
                )
                .bind(tenant_id)
                .bind(since)
                .bind(until)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT COALESCE(SUM(credits), 0) AS credits, COUNT(*) AS calls
                     FROM billing_details
                     WHERE tenant_id = ? AND call_type = 'incoming' AND timestamp <= ?",
                )
                .bind(tenant_id)
                .bind(until)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok((row.try_get("credits")?, row.try_get("calls")?))
    }

    pub async fn insert_billing_history(&self, entry: &NewHistoryEntry) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO billing_history (tenant_id, balance_count, new_available_balance,
                description, transaction_type, campaign_id, call_uuid, date)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&entry.tenant_id)
        .bind(entry.balance_count)
        .bind(entry.new_available_balance)
        .bind(&entry.description)
        .bind(&entry.transaction_type)
        .bind(&entry.campaign_id)
        .bind(&entry.call_uuid)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    pub async fn list_billing_history(&self, tenant_id: &str) -> Result<Vec<BillingHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, balance_count, new_available_balance, description,
                    transaction_type, campaign_id, call_uuid, date
             FROM billing_history WHERE tenant_id = ? ORDER BY id DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(BillingHistoryEntry::from_row(&row)?);
        }
        Ok(entries)
    }

    /// Recent-first page of billing details for one tenant. `cursor` is the
    /// rowid of the last record of the previous page.
    pub async fn list_billing_details(
        &self,
        tenant_id: &str,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<(Vec<BillingDetail>, Option<i64>)> {
        let rows = match cursor {
            Some(cursor) => {
                sqlx::query(
                    "SELECT rowid AS row_id, call_uuid, tenant_id, call_type, duration,
                            from_number, to_number, credits, ai_credits, telephony_credits,
                            campaign_id, campaign_name, timestamp
                     FROM billing_details
                     WHERE tenant_id = ? AND rowid < ?
                     ORDER BY rowid DESC LIMIT ?",
                )
                .bind(tenant_id)
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT rowid AS row_id, call_uuid, tenant_id, call_type, duration,
                            from_number, to_number, credits, ai_credits, telephony_credits,
                            campaign_id, campaign_name, timestamp
                     FROM billing_details
                     WHERE tenant_id = ?
                     ORDER BY rowid DESC LIMIT ?",
                )
                .bind(tenant_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut details = Vec::new();
        let mut last_row_id = None;
        for row in &rows {
            details.push(BillingDetail::from_row(row)?);
            last_row_id = Some(row.try_get::<i64, _>("row_id")?);
        }

        let next_cursor = if rows.len() as i64 == limit { last_row_id } else { None };
        Ok((details, next_cursor))
    }

    /// Forward-ordered page of a campaign's hangup records with totals.
    /// `cursor` is the rowid of the last record of the previous page;
    /// `status_filter` narrows to one normalized status.
    pub async fn report_page(
        &self,
        campaign_id: &str,
        cursor: Option<i64>,
        limit: i64,
        status_filter: Option<&str>,
    ) -> Result<ReportPage> {
        let after = cursor.unwrap_or(0);

        let rows = match status_filter {
            Some(status) => {
                sqlx::query(
                    "SELECT rowid AS row_id, call_uuid, tenant_id, campaign_id, assistant_id,
                            from_number, to_number, duration, status, hangup_cause, start_time,
                            answer_time, end_time, recording_url, source, provider,
                            contact_meta, created_at
                     FROM hangup_records
                     WHERE campaign_id = ? AND status = ? AND rowid > ?
                     ORDER BY rowid ASC LIMIT ?",
                )
                .bind(campaign_id)
                .bind(status)
                .bind(after)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT rowid AS row_id, call_uuid, tenant_id, campaign_id, assistant_id,
                            from_number, to_number, duration, status, hangup_cause, start_time,
                            answer_time, end_time, recording_url, source, provider,
                            contact_meta, created_at
                     FROM hangup_records
                     WHERE campaign_id = ? AND rowid > ?
                     ORDER BY rowid ASC LIMIT ?",
                )
                .bind(campaign_id)
                .bind(after)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut records = Vec::new();
        let mut last_row_id = None;
        for row in &rows {
            records.push(HangupRecord::from_row(row)?);
            last_row_id = Some(row.try_get::<i64, _>("row_id")?);
        }

        let totals = sqlx::query(
            "SELECT COUNT(*) AS total_count, COALESCE(SUM(duration), 0) AS total_duration
             FROM hangup_records WHERE campaign_id = ?",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        let next_cursor = if rows.len() as i64 == limit { last_row_id } else { None };

        Ok(ReportPage {
            records,
            next_cursor,
            total_count: totals.try_get("total_count")?,
            total_duration: totals.try_get("total_duration")?,
        })
    }
}
