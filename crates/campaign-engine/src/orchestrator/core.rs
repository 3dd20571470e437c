//! Core campaign engine
//!
//! [`CampaignEngine`] is the runtime context every component hangs off: the
//! store, the provider registry, admission control, billing, the balance
//! stream, warmup, heartbeats, and the set of runner tasks this container
//! owns. It is created once per process and shared as `Arc<CampaignEngine>`;
//! all cross-container coordination goes through the store, never through
//! process memory.
//!
//! ```rust
//! use dialwave_campaign_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let engine = CampaignEngine::new(EngineConfig::default()).await?;
//! let stats = engine.get_stats().await?;
//! println!("running campaigns: {}", stats.running_campaigns);
//! # Ok(())
//! # }
//! ```

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use dialwave_telephony::{OriginateRequest, ProviderKind};

use crate::admission::AdmissionController;
use crate::balance::BalanceStream;
use crate::billing::BillingEngine;
use crate::callbacks::CallbackProcessor;
use crate::config::EngineConfig;
use crate::database::{CallReservation, Store};
use crate::error::{EngineError, Result};
use crate::providers::ProviderRegistry;
use crate::warmup::BotWarmupClient;

use super::heartbeat::HeartbeatManager;
use super::runner;
use super::types::{
    assistant_id_from_ws_url, CampaignProgress, CAMPAIGN_API_CALL, CAMPAIGN_TESTCALL,
};

/// Process-wide engine statistics
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Runner tasks alive in this container
    pub running_campaigns: usize,
    /// Slot-holding calls across the whole fleet
    pub active_calls: i64,
    /// Heartbeat tasks alive in this container
    pub heartbeat_tasks: usize,
}

/// One-off calls dialed outside any campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandaloneCall {
    Test,
    Api,
}

impl StandaloneCall {
    fn campaign_sentinel(&self) -> &'static str {
        match self {
            StandaloneCall::Test => CAMPAIGN_TESTCALL,
            StandaloneCall::Api => CAMPAIGN_API_CALL,
        }
    }
}

/// Central orchestration context
pub struct CampaignEngine {
    pub(super) config: EngineConfig,
    pub(super) store: Store,
    pub(super) providers: Arc<ProviderRegistry>,
    pub(super) admission: AdmissionController,
    pub(super) billing: Arc<BillingEngine>,
    pub(super) balance: Arc<BalanceStream>,
    pub(super) warmup: BotWarmupClient,
    pub(super) callbacks: CallbackProcessor,
    pub(super) heartbeats: HeartbeatManager,
    pub(super) runners: DashMap<String, JoinHandle<()>>,
}

impl CampaignEngine {
    /// Create an engine with its own store connection
    pub async fn new(config: EngineConfig) -> Result<Arc<Self>> {
        let database_url = match &config.database.path {
            Some(path) => format!("sqlite:{path}?mode=rwc"),
            None => "sqlite::memory:".to_string(),
        };
        let store = Store::with_max_connections(&database_url, config.database.max_connections)
            .await
            .map_err(EngineError::database)?;
        Self::with_store(config, store)
    }

    /// Create an engine over an existing store (tests share one in-memory
    /// store across engine instances this way)
    pub fn with_store(config: EngineConfig, store: Store) -> Result<Arc<Self>> {
        info!("🚀 Creating campaign engine ({})", config.general.container_id);

        let providers = Arc::new(ProviderRegistry::from_config(&config.providers)?);
        let balance = Arc::new(BalanceStream::new());
        let billing = Arc::new(BillingEngine::new(
            store.clone(),
            balance.clone(),
            config.billing.clone(),
        ));
        let admission = AdmissionController::new(store.clone(), config.limits.clone());
        let warmup = BotWarmupClient::new(config.warmup.clone());
        let callbacks =
            CallbackProcessor::new(store.clone(), billing.clone(), providers.clone());
        let heartbeats = HeartbeatManager::new(
            store.clone(),
            config.general.container_id.clone(),
            config.heartbeat.interval,
        );

        let engine = Arc::new(Self {
            config,
            store,
            providers,
            admission,
            billing,
            balance,
            warmup,
            callbacks,
            heartbeats,
            runners: DashMap::new(),
        });

        info!("✅ Campaign engine initialized");
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn container_id(&self) -> &str {
        &self.config.general.container_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn billing(&self) -> &Arc<BillingEngine> {
        &self.billing
    }

    pub fn balance(&self) -> &Arc<BalanceStream> {
        &self.balance
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Webhook processing surface for the transport collaborator
    pub fn callbacks(&self) -> &CallbackProcessor {
        &self.callbacks
    }

    /// Spawn the dial loop for a campaign this container owns. A live runner
    /// for the same campaign is left alone.
    pub(crate) fn spawn_runner(self: Arc<Self>, campaign_id: &str) {
        if let Some(existing) = self.runners.get(campaign_id) {
            if !existing.is_finished() {
                warn!("runner for campaign {} already active, not spawning", campaign_id);
                return;
            }
        }

        self.heartbeats.start(campaign_id);

        let engine = self.clone();
        let id = campaign_id.to_string();
        let handle = tokio::spawn(async move {
            runner::run_campaign(engine.clone(), id.clone()).await;
            engine.heartbeats.stop(&id);
            engine.runners.remove(&id);
        });

        self.runners.insert(campaign_id.to_string(), handle);
        info!("🏃 runner spawned for campaign {}", campaign_id);
    }

    /// Write the campaign's aggregate ledger entry once its in-flight calls
    /// have drained. Spawned at every terminal transition; the supervisor
    /// sweep catches campaigns whose finalizing container died.
    pub(crate) fn schedule_aggregate_billing(self: Arc<Self>, campaign_id: &str) {
        let engine = self.clone();
        let id = campaign_id.to_string();

        tokio::spawn(async move {
            let deadline =
                tokio::time::Instant::now() + engine.config.billing.aggregate_drain_timeout;

            loop {
                match engine.store.count_slot_holding_for_campaign(&id).await {
                    Ok(0) => break,
                    Ok(in_flight) => {
                        if tokio::time::Instant::now() >= deadline {
                            warn!(
                                "campaign {} still shows {} in-flight calls, finalizing anyway",
                                id, in_flight
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("drain check for {} failed: {}", id, e);
                    }
                }
                tokio::time::sleep(engine.config.billing.aggregate_drain_poll).await;
            }

            match engine.store.get_campaign(&id).await {
                Ok(Some(campaign)) => {
                    if let Err(e) = engine.billing.finalize_campaign_billing(&campaign).await {
                        warn!("aggregate billing for {} failed: {}", id, e);
                    }
                }
                Ok(None) => warn!("campaign {} vanished before aggregate billing", id),
                Err(e) => warn!("could not load {} for aggregate billing: {}", id, e),
            }
        });
    }

    /// Live progress snapshot for one campaign
    pub async fn get_campaign_progress(&self, campaign_id: &str) -> Result<CampaignProgress> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await
            .map_err(EngineError::database)?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;

        let counts = self
            .store
            .call_counts_for_campaign(campaign_id)
            .await
            .map_err(EngineError::database)?;

        Ok(CampaignProgress {
            campaign_id: campaign.campaign_id.clone(),
            status: campaign.get_status().ok_or_else(|| {
                EngineError::internal(format!("campaign {campaign_id} has unknown status"))
            })?,
            total_contacts: campaign.total_contacts,
            processed_contacts: campaign.processed_contacts,
            connected_calls: campaign.connected_calls,
            failed_calls: campaign.failed_calls,
            call_counts: counts.into_iter().collect(),
            pause_reason: campaign.pause_reason.clone(),
            error_message: campaign.error_message.clone(),
        })
    }

    /// Process-wide statistics
    pub async fn get_stats(&self) -> Result<EngineStats> {
        let active_calls = self
            .store
            .count_active_calls_global()
            .await
            .map_err(EngineError::database)?;

        Ok(EngineStats {
            running_campaigns: self.runners.len(),
            active_calls,
            heartbeat_tasks: self.heartbeats.active_count(),
        })
    }

    /// Dial a single number outside any campaign (operator test call or
    /// one-off API call). Admission-controlled under the tenant cap; billed
    /// through the same hangup pipeline using the sentinel campaign id.
    pub async fn originate_standalone_call(
        &self,
        kind: StandaloneCall,
        tenant_id: &str,
        from: &str,
        to: &str,
        bot_ws_url: &str,
        provider: Option<ProviderKind>,
    ) -> Result<Uuid> {
        let tenant = self
            .store
            .get_tenant(tenant_id)
            .await
            .map_err(EngineError::database)?
            .ok_or_else(|| EngineError::TenantNotFound(tenant_id.to_string()))?;

        if tenant.available_balance <= 0 {
            return Err(EngineError::InsufficientBalance {
                tenant_id: tenant_id.to_string(),
                balance: tenant.available_balance,
            });
        }

        let adapter = self.providers.get(provider)?;
        let call_uuid = Uuid::new_v4();
        let assistant_id = assistant_id_from_ws_url(bot_ws_url);

        self.admission
            .admit(
                &CallReservation {
                    call_uuid: call_uuid.to_string(),
                    tenant_id: tenant_id.to_string(),
                    campaign_id: kind.campaign_sentinel().to_string(),
                    from_number: from.to_string(),
                    to_number: to.to_string(),
                    provider: adapter.kind().as_str().to_string(),
                    assistant_id: assistant_id.clone(),
                    bot_ws_url: Some(bot_ws_url.to_string()),
                    contact_meta: "{}".to_string(),
                },
                tenant.max_concurrent_calls,
            )
            .await?;

        if let Some(assistant) = &assistant_id {
            // best effort; a cold pod only delays the greeting
            let _ = self.warmup.warm_single(assistant).await;
        }

        let request = OriginateRequest {
            call_uuid,
            tenant_id: tenant_id.to_string(),
            campaign_id: kind.campaign_sentinel().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            bot_ws_url: bot_ws_url.to_string(),
            first_name: None,
            tag: assistant_id,
            list_id: None,
            variables: serde_json::Map::new(),
        };

        match adapter.originate(&request).await {
            Ok(response) => {
                self.store
                    .record_provider_call_id(&call_uuid.to_string(), &response.provider_call_id)
                    .await
                    .map_err(EngineError::database)?;
                info!("📞 standalone {:?} call {} to {}", kind, call_uuid, to);
                Ok(call_uuid)
            }
            Err(e) => {
                // release the reservation before surfacing the failure
                let _ = self
                    .store
                    .finalize_call(&call_uuid.to_string(), dialwave_telephony::CallPhase::Failed)
                    .await;
                Err(e.into())
            }
        }
    }

    /// Shutdown path: clear this container's heartbeats so peers adopt its
    /// campaigns, then give runners a grace window to finish their current
    /// iteration before aborting what is left.
    pub async fn shutdown(&self) {
        info!("🛑 engine shutdown: releasing campaigns");

        self.heartbeats.stop_all();
        match self
            .store
            .clear_heartbeats_for_container(self.container_id())
            .await
        {
            Ok(released) => info!("released {} campaigns for peer adoption", released),
            Err(e) => warn!("failed to clear heartbeats on shutdown: {}", e),
        }

        let deadline = tokio::time::Instant::now() + self.config.general.shutdown_grace;
        loop {
            let busy = self.runners.iter().any(|entry| !entry.value().is_finished());
            if !busy || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        for entry in self.runners.iter() {
            entry.value().abort();
        }
        self.runners.clear();
        info!("✅ engine shutdown complete");
    }
}
