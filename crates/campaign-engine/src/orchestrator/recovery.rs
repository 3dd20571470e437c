//! Container supervision and orphan recovery
//!
//! A campaign is orphaned when it reads `running` but its heartbeat is
//! missing or stale: its container died (Cloud Run preemption, OOM, SIGKILL)
//! without the graceful release path. Each container scans for orphans at
//! startup and periodically; adoption is a CAS on `container_id` that
//! re-checks both the status and the staleness, so two racing supervisors
//! cannot both win and a concurrent pause is respected. The adopted runner
//! restarts from the persisted cursor, dialing no contact twice.

use std::sync::Arc;
use tracing::{error, info, warn};

use chrono::Utc;

use crate::error::{EngineError, Result};

use super::core::CampaignEngine;

/// One orphan scan; returns how many campaigns this container adopted
pub async fn recover_orphans(engine: &Arc<CampaignEngine>) -> Result<usize> {
    let threshold = chrono::Duration::from_std(engine.config().heartbeat.orphan_threshold)
        .unwrap_or_else(|_| chrono::Duration::seconds(120));
    let cutoff = Utc::now() - threshold;

    let orphans = engine
        .store()
        .find_orphaned_campaigns(cutoff)
        .await
        .map_err(EngineError::database)?;

    let mut adopted = 0;
    for campaign in orphans {
        let won = engine
            .store()
            .claim_orphaned_campaign(&campaign.campaign_id, engine.container_id(), cutoff)
            .await
            .map_err(EngineError::database)?;

        if won {
            info!(
                "🛟 adopted orphaned campaign {} (was on {:?}, cursor {})",
                campaign.campaign_id, campaign.container_id, campaign.current_index
            );
            engine.clone().spawn_runner(&campaign.campaign_id);
            adopted += 1;
        }
    }

    if adopted > 0 {
        info!("🛟 orphan recovery adopted {} campaigns", adopted);
    }
    Ok(adopted)
}

/// Periodic supervision: adopt orphans, reclaim leaked call slots, drop
/// dead balance channels.
pub(crate) async fn monitor_loop(engine: Arc<CampaignEngine>) {
    let mut ticker = tokio::time::interval(engine.config().heartbeat.scan_interval);
    info!("👀 container supervisor started");

    loop {
        ticker.tick().await;

        if let Err(e) = recover_orphans(&engine).await {
            error!("orphan recovery pass failed: {}", e);
        }

        let limits = &engine.config().limits;
        let stale = chrono::Duration::from_std(limits.stale_call_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let max_call = chrono::Duration::from_std(limits.max_call_duration)
            .unwrap_or_else(|_| chrono::Duration::hours(4));

        match engine.store().expire_stale_calls(stale, max_call).await {
            Ok(0) => {}
            Ok(reclaimed) => warn!("♻️ reclaimed {} leaked call slots", reclaimed),
            Err(e) => error!("stale-call sweep failed: {}", e),
        }

        // terminal campaigns whose finalizing container died before writing
        // the aggregate
        match engine.store().find_unbilled_terminal_campaigns().await {
            Ok(unbilled) => {
                for campaign in unbilled {
                    engine.clone().schedule_aggregate_billing(&campaign.campaign_id);
                }
            }
            Err(e) => error!("unbilled-campaign sweep failed: {}", e),
        }

        engine.balance().prune();
    }
}
