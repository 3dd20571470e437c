//! Campaign lifecycle transitions
//!
//! The legal transition table:
//!
//! ```text
//! scheduled -> running      (scheduler, or immediately at create)
//! scheduled -> cancelled
//! running   -> paused       (manual, or auto on balance/overload)
//! running   -> cancelled
//! running   -> completed    (runner reached the end of the list)
//! running   -> failed       (runner hit a fatal condition)
//! paused    -> running      (resume, re-spawns the runner at the cursor)
//! paused    -> cancelled
//! ```
//!
//! Each transition is a store-level CAS; when the CAS loses, the current
//! status is read back and reported as an [`EngineError::IllegalTransition`]
//! so callers get a precise refusal instead of a silent no-op. Terminal
//! transitions stop the heartbeat and trigger the campaign's one aggregate
//! billing entry.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::orchestrator::types::{
    CampaignStatus, CreatedCampaign, NewCampaign, PauseReason,
};

use super::core::CampaignEngine;

impl CampaignEngine {
    /// Create a campaign. Validates the unique `(tenant, name)` pair, a
    /// positive balance, and the contact list; warns (but allows) when the
    /// balance is under the estimated campaign cost. Unscheduled campaigns
    /// start dialing immediately.
    pub async fn create_campaign(self: Arc<Self>, params: NewCampaign) -> Result<CreatedCampaign> {
        let store = self.store();

        let tenant = store
            .get_tenant(&params.tenant_id)
            .await
            .map_err(EngineError::database)?
            .ok_or_else(|| EngineError::TenantNotFound(params.tenant_id.clone()))?;

        if store
            .campaign_name_exists(&params.tenant_id, &params.name)
            .await
            .map_err(EngineError::database)?
        {
            return Err(EngineError::DuplicateCampaignName {
                tenant_id: params.tenant_id.clone(),
                name: params.name.clone(),
            });
        }

        let list = store
            .get_contact_list(&params.list_id)
            .await
            .map_err(EngineError::database)?
            .filter(|list| list.tenant_id == params.tenant_id)
            .ok_or_else(|| EngineError::ListNotFound(params.list_id.clone()))?;

        let total_contacts = store
            .count_contacts(&list.list_id)
            .await
            .map_err(EngineError::database)?;

        if tenant.available_balance <= 0 {
            return Err(EngineError::InsufficientBalance {
                tenant_id: params.tenant_id.clone(),
                balance: tenant.available_balance,
            });
        }

        let estimated_cost =
            total_contacts * self.config().general.estimated_call_duration_secs;
        let balance_warning = if tenant.available_balance < estimated_cost {
            let msg = format!(
                "balance {} is below the estimated campaign cost {}",
                tenant.available_balance, estimated_cost
            );
            warn!("⚠️ campaign '{}': {}", params.name, msg);
            Some(msg)
        } else {
            None
        };

        let campaign_id = format!("cmp-{}", Uuid::new_v4());
        store
            .insert_campaign(
                &campaign_id,
                &params.tenant_id,
                &params.name,
                &params.list_id,
                &params.from_number,
                &params.bot_ws_url,
                params.provider.map(|p| p.as_str()),
                CampaignStatus::Scheduled,
                total_contacts,
                params.scheduled_time,
            )
            .await
            .map_err(EngineError::database)?;

        let status = if params.scheduled_time.is_some() {
            info!(
                "🗓️ campaign {} '{}' scheduled for {:?}",
                campaign_id, params.name, params.scheduled_time
            );
            CampaignStatus::Scheduled
        } else {
            store
                .mark_running_from_scheduled(&campaign_id, self.container_id())
                .await
                .map_err(EngineError::database)?;
            self.clone().spawn_runner(&campaign_id);
            info!("🚀 campaign {} '{}' started ({} contacts)", campaign_id, params.name, total_contacts);
            CampaignStatus::Running
        };

        Ok(CreatedCampaign { campaign_id, status, balance_warning })
    }

    /// Manual pause. The runner notices before its next contact; one
    /// in-flight dial may still begin (cooperative cancellation).
    pub async fn pause_campaign(&self, campaign_id: &str, paused_by: &str) -> Result<()> {
        let won = self
            .store()
            .mark_paused(campaign_id, PauseReason::Manual.as_str(), paused_by)
            .await
            .map_err(EngineError::database)?;

        if !won {
            return Err(self.illegal_transition(campaign_id, CampaignStatus::Paused).await);
        }

        self.heartbeats.stop(campaign_id);
        info!("⏸️ campaign {} paused by {}", campaign_id, paused_by);
        Ok(())
    }

    /// Pause initiated by the runner itself (insufficient balance, sustained
    /// overload). Losing the CAS here just means someone else terminated the
    /// campaign first, which is fine.
    pub(crate) async fn auto_pause_campaign(
        &self,
        campaign_id: &str,
        reason: PauseReason,
    ) -> Result<()> {
        let won = self
            .store()
            .mark_paused(campaign_id, reason.as_str(), "system")
            .await
            .map_err(EngineError::database)?;

        if won {
            self.heartbeats.stop(campaign_id);
            info!("⏸️ campaign {} auto-paused: {}", campaign_id, reason.as_str());
        } else {
            warn!("auto-pause of {} lost to a concurrent transition", campaign_id);
        }
        Ok(())
    }

    /// Resume a paused campaign from its persisted cursor
    pub async fn resume_campaign(self: Arc<Self>, campaign_id: &str) -> Result<()> {
        let won = self
            .store()
            .mark_running_from_paused(campaign_id, self.container_id())
            .await
            .map_err(EngineError::database)?;

        if !won {
            return Err(self.illegal_transition(campaign_id, CampaignStatus::Running).await);
        }

        self.clone().spawn_runner(campaign_id);
        info!("▶️ campaign {} resumed", campaign_id);
        Ok(())
    }

    /// Cancel from scheduled, running, or paused
    pub async fn cancel_campaign(self: Arc<Self>, campaign_id: &str) -> Result<()> {
        let won = self
            .store()
            .mark_cancelled(campaign_id)
            .await
            .map_err(EngineError::database)?;

        if !won {
            return Err(self.illegal_transition(campaign_id, CampaignStatus::Cancelled).await);
        }

        self.heartbeats.stop(campaign_id);
        self.clone().schedule_aggregate_billing(campaign_id);
        info!("🚫 campaign {} cancelled", campaign_id);
        Ok(())
    }

    /// Runner reached the end of the contact list
    pub(crate) async fn complete_campaign(self: Arc<Self>, campaign_id: &str) -> Result<()> {
        let won = self
            .store()
            .mark_completed(campaign_id)
            .await
            .map_err(EngineError::database)?;

        if !won {
            return Err(self.illegal_transition(campaign_id, CampaignStatus::Completed).await);
        }

        self.heartbeats.stop(campaign_id);
        self.clone().schedule_aggregate_billing(campaign_id);
        Ok(())
    }

    /// Runner hit a fatal condition
    pub(crate) async fn fail_campaign(
        self: Arc<Self>,
        campaign_id: &str,
        error_message: &str,
    ) -> Result<()> {
        let won = self
            .store()
            .mark_failed(campaign_id, error_message)
            .await
            .map_err(EngineError::database)?;

        if !won {
            return Err(self.illegal_transition(campaign_id, CampaignStatus::Failed).await);
        }

        self.heartbeats.stop(campaign_id);
        self.clone().schedule_aggregate_billing(campaign_id);
        Ok(())
    }

    /// Build the precise refusal for a lost transition CAS
    async fn illegal_transition(&self, campaign_id: &str, to: CampaignStatus) -> EngineError {
        match self.store().get_campaign_status(campaign_id).await {
            Ok(Some(from)) => EngineError::IllegalTransition {
                campaign_id: campaign_id.to_string(),
                from,
                to,
            },
            Ok(None) => EngineError::CampaignNotFound(campaign_id.to_string()),
            Err(e) => EngineError::database(e),
        }
    }
}
