//! The campaign dial loop
//!
//! One runner task per running campaign. The loop is deliberately
//! straight-line: re-read status, check balance, take the rate window, take
//! an admission slot, dial, persist the cursor, sleep. Every check reads the
//! store fresh, never process memory, so a pause issued by another container
//! or a balance drained by concurrent billing takes effect within one
//! iteration. Cancellation is cooperative: an in-flight dial is never
//! interrupted, the loop stops before the next contact.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use dialwave_telephony::{CallPhase, OriginateRequest, ProviderError};

use crate::database::{CallReservation, Contact};
use crate::error::EngineError;
use crate::orchestrator::types::{assistant_id_from_ws_url, CampaignStatus, PauseReason};

use super::core::CampaignEngine;

const STORE_RETRIES: u32 = 3;

/// Retry a store operation with exponential backoff before giving up.
/// Transient persistence trouble should not kill a campaign; only a
/// sustained failure is allowed to mark it failed.
async fn with_store_retries<T, F, Fut>(mut operation: F) -> crate::error::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut delay = std::time::Duration::from_millis(100);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < STORE_RETRIES => {
                attempt += 1;
                warn!("store operation failed (attempt {}): {}", attempt, e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(EngineError::database(e)),
        }
    }
}

/// Drive one campaign from its persisted cursor to the end of its list.
/// Never propagates errors upward: fatal conditions mark the campaign failed
/// through the lifecycle controller and the task exits.
pub(crate) async fn run_campaign(engine: Arc<CampaignEngine>, campaign_id: String) {
    if let Err(e) = run_campaign_inner(&engine, &campaign_id).await {
        error!("💥 campaign {} runner error: {}", campaign_id, e);
        if let Err(mark_err) = engine.clone().fail_campaign(&campaign_id, &e.to_string()).await {
            warn!("could not mark campaign {} failed: {}", campaign_id, mark_err);
        }
    }
}

async fn run_campaign_inner(
    engine: &Arc<CampaignEngine>,
    campaign_id: &str,
) -> crate::error::Result<()> {
    let store = engine.store();
    let limits = &engine.config().limits;

    let Some(campaign) = store.get_campaign(campaign_id).await.map_err(EngineError::database)?
    else {
        warn!("runner started for unknown campaign {}", campaign_id);
        return Ok(());
    };

    let assistant_id = assistant_id_from_ws_url(&campaign.bot_ws_url);

    let tenant = store
        .get_tenant(&campaign.tenant_id)
        .await
        .map_err(EngineError::database)?
        .ok_or_else(|| EngineError::TenantNotFound(campaign.tenant_id.clone()))?;

    // Warm one bot pod per expected concurrent call; the campaign may start
    // as soon as any pod answers.
    if let Some(assistant) = &assistant_id {
        let pods = engine.admission.tenant_cap(tenant.max_concurrent_calls) as usize;
        let report = engine.warmup.warm_pods(assistant, pods).await;
        if !report.any_succeeded() {
            return Err(EngineError::Warmup(format!(
                "all {} bot pods failed to warm for campaign {}",
                pods, campaign_id
            )));
        }
    }

    info!(
        "▶️ campaign {} dialing from index {}/{}",
        campaign_id, campaign.current_index, campaign.total_contacts
    );

    let mut index = campaign.current_index;
    let mut consecutive_global_overloads: u32 = 0;

    while index < campaign.total_contacts {
        // fresh status, never cached
        let status = with_store_retries(|| store.get_campaign_status(campaign_id)).await?;
        match status {
            Some(CampaignStatus::Running) => {}
            Some(other) => {
                info!("campaign {} is {} now, runner stopping at {}", campaign_id, other, index);
                with_store_retries(|| store.persist_campaign_cursor(campaign_id, index)).await?;
                return Ok(());
            }
            None => {
                warn!("campaign {} vanished, runner stopping", campaign_id);
                return Ok(());
            }
        }

        // balance gate: reject on the iteration after it hits zero
        let balance = with_store_retries(|| store.get_tenant_balance(&campaign.tenant_id))
            .await?
            .unwrap_or(0);
        if balance <= 0 {
            info!(
                "💸 campaign {} out of credits (balance {}), auto-pausing at {}",
                campaign_id, balance, index
            );
            with_store_retries(|| store.persist_campaign_cursor(campaign_id, index)).await?;
            engine
                .auto_pause_campaign(campaign_id, PauseReason::InsufficientBalance)
                .await?;
            return Ok(());
        }

        // fleet-wide dials-per-window counter, shared through the store
        let window_secs = limits.rate_limit_window.as_secs().max(1) as i64;
        let bucket = Utc::now().timestamp() / window_secs;
        let dials_this_window = store
            .increment_counter(&bucket.to_string())
            .await
            .map_err(EngineError::database)?;
        if dials_this_window > limits.max_calls_per_minute {
            let wait_secs = window_secs - (Utc::now().timestamp() % window_secs).clamp(0, window_secs - 1);
            debug!(
                "rate window full ({} dials), campaign {} sleeping {}s",
                dials_this_window, campaign_id, wait_secs
            );
            let _ = store.prune_counters(&(bucket - 2).to_string()).await;
            tokio::time::sleep(std::time::Duration::from_secs(wait_secs as u64)).await;
            continue;
        }

        let contact = store
            .get_contact(&campaign.list_id, index)
            .await
            .map_err(EngineError::database)?;
        let Some(contact) = contact else {
            warn!("campaign {} has no contact at {}, counting failed", campaign_id, index);
            index += 1;
            with_store_retries(|| store.advance_campaign_cursor(campaign_id, index, false))
                .await?;
            continue;
        };

        if contact.number.trim().is_empty() {
            debug!("contact {} has no number, skipping", index);
            index += 1;
            with_store_retries(|| store.advance_campaign_cursor(campaign_id, index, false))
                .await?;
            continue;
        }

        let call_uuid = Uuid::new_v4();
        let reservation = build_reservation(&campaign, &contact, call_uuid, &assistant_id, engine);

        match engine.admission.admit(&reservation, tenant.max_concurrent_calls).await {
            Ok(()) => {
                consecutive_global_overloads = 0;
            }
            Err(EngineError::OverloadedTenant { .. }) => {
                // the tenant's own calls will drain; retry the same contact
                debug!("campaign {} waiting out tenant saturation at {}", campaign_id, index);
                continue;
            }
            Err(EngineError::OverloadedGlobal { .. }) => {
                consecutive_global_overloads += 1;
                if consecutive_global_overloads >= limits.overload_pause_threshold {
                    warn!(
                        "🚦 campaign {} pausing after {} global admission timeouts",
                        campaign_id, consecutive_global_overloads
                    );
                    store
                        .persist_campaign_cursor(campaign_id, index)
                        .await
                        .map_err(EngineError::database)?;
                    engine
                        .auto_pause_campaign(campaign_id, PauseReason::SystemOverloaded)
                        .await?;
                    return Ok(());
                }
                continue;
            }
            Err(e) => return Err(e),
        }

        // nudge one pod awake for this dial; never fatal
        if let Some(assistant) = &assistant_id {
            let _ = engine.warmup.warm_single(assistant).await;
        }

        let adapter = match engine.providers.get(campaign.get_provider()) {
            Ok(adapter) => adapter,
            Err(e) => {
                // no credentials: nothing later in the list can succeed
                let _ = store.finalize_call(&call_uuid.to_string(), CallPhase::Failed).await;
                return Err(e);
            }
        };

        let request = build_originate_request(&campaign, &contact, call_uuid, &assistant_id);
        match adapter.originate(&request).await {
            Ok(response) => {
                let call_id = call_uuid.to_string();
                with_store_retries(|| {
                    store.record_provider_call_id(&call_id, &response.provider_call_id)
                })
                .await?;
                index += 1;
                with_store_retries(|| store.advance_campaign_cursor(campaign_id, index, true))
                    .await?;
                debug!("📞 campaign {} dialed contact {} ({})", campaign_id, index - 1, contact.number);
            }
            Err(ProviderError::CredentialsMissing(provider)) => {
                let _ = store.finalize_call(&call_uuid.to_string(), CallPhase::Failed).await;
                return Err(EngineError::Provider(ProviderError::CredentialsMissing(provider)));
            }
            Err(e) => {
                // per-contact failure: release the slot, count it, move on
                warn!("campaign {} contact {} dial failed: {}", campaign_id, index, e);
                store
                    .finalize_call(&call_uuid.to_string(), CallPhase::Failed)
                    .await
                    .map_err(EngineError::database)?;
                index += 1;
                with_store_retries(|| store.advance_campaign_cursor(campaign_id, index, false))
                    .await?;
            }
        }

        tokio::time::sleep(engine.config().general.subsequent_call_wait).await;
    }

    // the whole list was dialed; complete unless someone paused us in the
    // final iteration
    match engine.clone().complete_campaign(campaign_id).await {
        Ok(()) => info!("🏁 campaign {} completed", campaign_id),
        Err(EngineError::IllegalTransition { from, .. }) => {
            info!("campaign {} ended as {} before completion", campaign_id, from);
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

fn build_reservation(
    campaign: &crate::database::Campaign,
    contact: &Contact,
    call_uuid: Uuid,
    assistant_id: &Option<String>,
    engine: &Arc<CampaignEngine>,
) -> CallReservation {
    let mut meta = contact.dynamic_fields();
    if let Some(first_name) = &contact.first_name {
        meta.insert("first_name".into(), serde_json::Value::String(first_name.clone()));
    }
    if let Some(email) = &contact.email {
        meta.insert("email".into(), serde_json::Value::String(email.clone()));
    }

    let provider = campaign
        .get_provider()
        .unwrap_or_else(|| engine.providers.default_kind());

    CallReservation {
        call_uuid: call_uuid.to_string(),
        tenant_id: campaign.tenant_id.clone(),
        campaign_id: campaign.campaign_id.clone(),
        from_number: campaign.from_number.clone(),
        to_number: contact.number.clone(),
        provider: provider.as_str().to_string(),
        assistant_id: assistant_id.clone(),
        bot_ws_url: Some(campaign.bot_ws_url.clone()),
        contact_meta: serde_json::Value::Object(meta).to_string(),
    }
}

fn build_originate_request(
    campaign: &crate::database::Campaign,
    contact: &Contact,
    call_uuid: Uuid,
    assistant_id: &Option<String>,
) -> OriginateRequest {
    OriginateRequest {
        call_uuid,
        tenant_id: campaign.tenant_id.clone(),
        campaign_id: campaign.campaign_id.clone(),
        from: campaign.from_number.clone(),
        to: contact.number.clone(),
        bot_ws_url: campaign.bot_ws_url.clone(),
        first_name: contact.first_name.clone(),
        tag: assistant_id.clone(),
        list_id: Some(campaign.list_id.clone()),
        variables: contact.dynamic_fields(),
    }
}
