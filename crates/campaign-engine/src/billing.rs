//! Billing engine
//!
//! One entry point for every call type: campaign dials, operator test calls,
//! one-off API calls, and inbound calls. Credits map 1:1 to call seconds.
//! Per-call billing is idempotent on `call_uuid`; campaign ledger entries are
//! deferred to campaign termination and written exactly once behind the
//! `is_balance_updated` gate; inbound ledger entries are coalesced into
//! hourly aggregates on read.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use dialwave_telephony::{CallSource, NormalizedHangup};

use crate::balance::BalanceStream;
use crate::config::BillingConfig;
use crate::database::billing::{NewBillingDetail, NewHistoryEntry};
use crate::database::{Campaign, Store};
use crate::error::{EngineError, Result};

/// What billing did with a hangup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingOutcome {
    /// Balance was debited and a billing detail written
    Billed { credits: i64, new_balance: i64 },
    /// A detail already existed for this call; nothing changed
    Duplicate,
}

pub struct BillingEngine {
    store: Store,
    balance: Arc<BalanceStream>,
    config: BillingConfig,
}

fn call_type(source: CallSource) -> &'static str {
    match source {
        CallSource::Campaign => "campaign",
        CallSource::Api => "api-call",
        CallSource::Test => "testcall",
        CallSource::Inbound => "incoming",
    }
}

impl BillingEngine {
    pub fn new(store: Store, balance: Arc<BalanceStream>, config: BillingConfig) -> Self {
        Self { store, balance, config }
    }

    /// Bill one terminated call: debit the tenant by `duration` credits and
    /// write the per-call detail, atomically and idempotently. Non-campaign
    /// calls also get their ledger entry immediately; campaign calls wait
    /// for the terminal aggregate.
    pub async fn bill_call(&self, hangup: &NormalizedHangup) -> Result<BillingOutcome> {
        let credits = hangup.duration.max(0);

        let campaign_name = match hangup.source {
            CallSource::Campaign => self
                .store
                .get_campaign(&hangup.campaign_id)
                .await
                .map_err(EngineError::database)?
                .map(|c| c.name),
            _ => None,
        };

        let detail = NewBillingDetail {
            call_uuid: hangup.call_uuid.to_string(),
            tenant_id: hangup.tenant_id.clone(),
            call_type: call_type(hangup.source).to_string(),
            duration: hangup.duration,
            from_number: hangup.from.clone(),
            to_number: hangup.to.clone(),
            credits,
            ai_credits: 0,
            telephony_credits: credits,
            campaign_id: (hangup.source == CallSource::Campaign)
                .then(|| hangup.campaign_id.clone()),
            campaign_name,
        };

        let new_balance = match self
            .store
            .debit_and_insert_billing_detail(&detail)
            .await
            .map_err(EngineError::database)?
        {
            Some(balance) => balance,
            None => {
                debug!("call {} already billed, skipping", hangup.call_uuid);
                return Ok(BillingOutcome::Duplicate);
            }
        };

        // Campaign calls are ledgered once, as an aggregate, when the
        // campaign terminates; inbound calls are aggregated on read. Only
        // api/test calls get their ledger line immediately.
        let description = match hangup.source {
            CallSource::Api => Some(format!("API call to {}: {}s", hangup.to, hangup.duration)),
            CallSource::Test => Some(format!("Test call to {}: {}s", hangup.to, hangup.duration)),
            CallSource::Campaign | CallSource::Inbound => None,
        };
        if let Some(description) = description {
            self.store
                .insert_billing_history(&NewHistoryEntry {
                    tenant_id: hangup.tenant_id.clone(),
                    balance_count: -credits,
                    new_available_balance: new_balance,
                    description,
                    transaction_type: "Dr".to_string(),
                    campaign_id: None,
                    call_uuid: Some(hangup.call_uuid.to_string()),
                })
                .await
                .map_err(EngineError::database)?;
        }

        self.balance.publish(&hangup.tenant_id, new_balance, "call");
        info!(
            "💳 billed call {} ({} credits), tenant {} balance {}",
            hangup.call_uuid, credits, hangup.tenant_id, new_balance
        );

        Ok(BillingOutcome::Billed { credits, new_balance })
    }

    /// Write the single aggregate ledger entry for a terminated campaign.
    /// Gated by the campaign's `is_balance_updated` flag; returns whether
    /// this caller won the gate and wrote the entry.
    pub async fn finalize_campaign_billing(&self, campaign: &Campaign) -> Result<bool> {
        let claimed = self
            .store
            .claim_campaign_billing(&campaign.campaign_id)
            .await
            .map_err(EngineError::database)?;

        if !claimed {
            debug!("campaign {} aggregate already written", campaign.campaign_id);
            return Ok(false);
        }

        let (credits, calls) = self
            .store
            .sum_campaign_billing(&campaign.campaign_id)
            .await
            .map_err(EngineError::database)?;

        let balance = self
            .store
            .get_tenant_balance(&campaign.tenant_id)
            .await
            .map_err(EngineError::database)?
            .unwrap_or(0);

        self.store
            .insert_billing_history(&NewHistoryEntry {
                tenant_id: campaign.tenant_id.clone(),
                balance_count: -credits,
                new_available_balance: balance,
                description: format!(
                    "Campaign '{}': {} calls, {} seconds",
                    campaign.name, calls, credits
                ),
                transaction_type: "Dr".to_string(),
                campaign_id: Some(campaign.campaign_id.clone()),
                call_uuid: None,
            })
            .await
            .map_err(EngineError::database)?;

        self.balance.publish(&campaign.tenant_id, balance, "campaign");
        info!(
            "🧾 campaign {} aggregate: {} calls, {} credits",
            campaign.campaign_id, calls, credits
        );

        Ok(true)
    }

    /// Coalesce inbound per-call details into one ledger entry if the
    /// aggregation interval has elapsed. Invoked from the aggregated-history
    /// read path. Returns whether an aggregation round ran.
    pub async fn aggregate_incoming(&self, tenant_id: &str) -> Result<bool> {
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await
            .map_err(EngineError::database)?
            .ok_or_else(|| EngineError::TenantNotFound(tenant_id.to_string()))?;

        let now = Utc::now();
        let interval = chrono::Duration::from_std(self.config.incoming_aggregation_interval)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

        if let Some(last) = tenant.last_incoming_aggregation_time {
            if now - last < interval {
                return Ok(false);
            }
        }

        // Only the reader that advances the watermark aggregates this window
        let won = self
            .store
            .advance_incoming_aggregation_time(
                tenant_id,
                tenant.last_incoming_aggregation_time,
                now,
            )
            .await
            .map_err(EngineError::database)?;
        if !won {
            return Ok(false);
        }

        let (credits, calls) = self
            .store
            .sum_incoming_billing_between(tenant_id, tenant.last_incoming_aggregation_time, now)
            .await
            .map_err(EngineError::database)?;

        if calls == 0 {
            debug!("no incoming calls to aggregate for {}", tenant_id);
            return Ok(true);
        }

        let balance = self
            .store
            .get_tenant_balance(tenant_id)
            .await
            .map_err(EngineError::database)?
            .unwrap_or(0);

        self.store
            .insert_billing_history(&NewHistoryEntry {
                tenant_id: tenant_id.to_string(),
                balance_count: -credits,
                new_available_balance: balance,
                description: format!("Incoming calls: {} calls, {} seconds", calls, credits),
                transaction_type: "Dr".to_string(),
                campaign_id: None,
                call_uuid: None,
            })
            .await
            .map_err(EngineError::database)?;

        info!("🧾 incoming aggregate for {}: {} calls, {} credits", tenant_id, calls, credits);
        Ok(true)
    }

    /// Credit a tenant (top-up). Payment flows live elsewhere; this is the
    /// ledger-and-balance half.
    pub async fn credit_tenant(
        &self,
        tenant_id: &str,
        credits: i64,
        description: &str,
    ) -> Result<i64> {
        if credits <= 0 {
            return Err(EngineError::configuration("credit amount must be positive"));
        }

        let balance = self
            .store
            .adjust_tenant_balance(tenant_id, credits)
            .await
            .map_err(|e| {
                warn!("credit of {} to {} failed: {}", credits, tenant_id, e);
                EngineError::database(e)
            })?;

        self.store
            .insert_billing_history(&NewHistoryEntry {
                tenant_id: tenant_id.to_string(),
                balance_count: credits,
                new_available_balance: balance,
                description: description.to_string(),
                transaction_type: "Cr".to_string(),
                campaign_id: None,
                call_uuid: None,
            })
            .await
            .map_err(EngineError::database)?;

        self.balance.publish(tenant_id, balance, "topup");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::CampaignStatus;
    use dialwave_telephony::ProviderKind;
    use uuid::Uuid;

    async fn engine() -> (BillingEngine, Store, Arc<BalanceStream>) {
        let store = Store::new_in_memory().await.unwrap();
        let balance = Arc::new(BalanceStream::new());
        let billing = BillingEngine::new(store.clone(), balance.clone(), BillingConfig::default());
        (billing, store, balance)
    }

    fn hangup(campaign_id: &str, duration: i64) -> NormalizedHangup {
        NormalizedHangup {
            call_uuid: Uuid::new_v4(),
            tenant_id: "tenant-1".to_string(),
            campaign_id: campaign_id.to_string(),
            assistant_id: Some("asst-1".to_string()),
            from: "+14155550100".to_string(),
            to: "+919876543210".to_string(),
            duration,
            status: "completed".to_string(),
            hangup_cause: "NORMAL_CLEARING".to_string(),
            start_time: None,
            answer_time: None,
            end_time: None,
            recording_url: None,
            source: CallSource::from_campaign_id(campaign_id),
            provider: ProviderKind::Plivo,
            contact_meta: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn campaign_call_debits_without_ledger_entry() {
        let (billing, store, _) = engine().await;
        store.upsert_tenant("tenant-1", 1000, 10, &[]).await.unwrap();

        let outcome = billing.bill_call(&hangup("cmp-1", 60)).await.unwrap();
        assert_eq!(outcome, BillingOutcome::Billed { credits: 60, new_balance: 940 });

        // ledger waits for the campaign aggregate
        assert!(store.list_billing_history("tenant-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_hangup_bills_once() {
        let (billing, store, _) = engine().await;
        store.upsert_tenant("tenant-1", 1000, 10, &[]).await.unwrap();

        let event = hangup("cmp-1", 60);
        billing.bill_call(&event).await.unwrap();
        let second = billing.bill_call(&event).await.unwrap();

        assert_eq!(second, BillingOutcome::Duplicate);
        assert_eq!(store.get_tenant_balance("tenant-1").await.unwrap(), Some(940));
    }

    #[tokio::test]
    async fn test_call_gets_immediate_ledger_entry() {
        let (billing, store, _) = engine().await;
        store.upsert_tenant("tenant-1", 100, 10, &[]).await.unwrap();

        billing.bill_call(&hangup("testcall", 30)).await.unwrap();

        let history = store.list_billing_history("tenant-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].balance_count, -30);
        assert_eq!(history[0].transaction_type, "Dr");
        assert_eq!(history[0].new_available_balance, 70);
    }

    #[tokio::test]
    async fn campaign_aggregate_written_exactly_once() {
        let (billing, store, _) = engine().await;
        store.upsert_tenant("tenant-1", 1000, 10, &[]).await.unwrap();
        store
            .insert_campaign(
                "cmp-1", "tenant-1", "renewals", "list-1", "+14155550100",
                "wss://bot/chat/v2/a", None, CampaignStatus::Running, 3, None,
            )
            .await
            .unwrap();

        for duration in [60, 60, 60] {
            billing.bill_call(&hangup("cmp-1", duration)).await.unwrap();
        }

        let campaign = store.get_campaign("cmp-1").await.unwrap().unwrap();
        assert!(billing.finalize_campaign_billing(&campaign).await.unwrap());
        // the second finalize (racing container, retried shutdown) no-ops
        assert!(!billing.finalize_campaign_billing(&campaign).await.unwrap());

        let history = store.list_billing_history("tenant-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].balance_count, -180);
        assert!(history[0].description.contains("3 calls"));
        assert_eq!(history[0].campaign_id.as_deref(), Some("cmp-1"));
    }

    #[tokio::test]
    async fn incoming_calls_aggregate_on_read() {
        let (billing, store, _) = engine().await;
        store.upsert_tenant("tenant-1", 1000, 10, &[]).await.unwrap();

        billing.bill_call(&hangup("incoming", 40)).await.unwrap();
        billing.bill_call(&hangup("incoming", 20)).await.unwrap();

        // per-call details exist, ledger is still empty
        assert!(store.list_billing_history("tenant-1").await.unwrap().is_empty());

        assert!(billing.aggregate_incoming("tenant-1").await.unwrap());
        let history = store.list_billing_history("tenant-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].balance_count, -60);
        assert!(history[0].description.contains("2 calls"));

        // immediately asking again is inside the window: nothing happens
        assert!(!billing.aggregate_incoming("tenant-1").await.unwrap());
    }

    #[tokio::test]
    async fn balance_events_follow_billing() {
        let (billing, store, balance) = engine().await;
        store.upsert_tenant("tenant-1", 100, 10, &[]).await.unwrap();
        let mut rx = balance.subscribe("tenant-1");

        billing.bill_call(&hangup("cmp-1", 25)).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.balance, 75);
        assert_eq!(event.reason, "call");
    }

    #[tokio::test]
    async fn topup_credits_and_ledgers() {
        let (billing, store, _) = engine().await;
        store.upsert_tenant("tenant-1", 10, 10, &[]).await.unwrap();

        let balance = billing.credit_tenant("tenant-1", 500, "Recharge").await.unwrap();
        assert_eq!(balance, 510);

        let history = store.list_billing_history("tenant-1").await.unwrap();
        assert_eq!(history[0].transaction_type, "Cr");
        assert_eq!(history[0].balance_count, 500);

        assert!(billing.credit_tenant("tenant-1", 0, "nope").await.is_err());
    }
}
