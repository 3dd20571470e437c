//! Scheduled-campaign polling
//!
//! A periodic scan flips campaigns whose start time has arrived from
//! `scheduled` to `running`. The flip is the store's CAS, so any number of
//! containers can poll concurrently and each due campaign starts exactly
//! once, on whichever container won it.

use std::sync::Arc;
use tracing::{error, info};

use chrono::Utc;

use crate::error::{EngineError, Result};

use super::core::CampaignEngine;

/// One scheduler pass; returns how many campaigns this container started
pub async fn poll_scheduled(engine: &Arc<CampaignEngine>) -> Result<usize> {
    let due = engine
        .store()
        .find_due_scheduled_campaigns(Utc::now())
        .await
        .map_err(EngineError::database)?;

    let mut started = 0;
    for campaign in due {
        let won = engine
            .store()
            .mark_running_from_scheduled(&campaign.campaign_id, engine.container_id())
            .await
            .map_err(EngineError::database)?;

        if won {
            info!("⏰ scheduled campaign {} is due, starting", campaign.campaign_id);
            engine.clone().spawn_runner(&campaign.campaign_id);
            started += 1;
        }
        // losing the CAS means a peer (or a concurrent pass) started it
    }

    Ok(started)
}

/// Long-running scheduler task
pub(crate) async fn scheduler_loop(engine: Arc<CampaignEngine>) {
    let mut ticker = tokio::time::interval(engine.config().general.scheduler_interval);
    info!("⏰ scheduler started");

    loop {
        ticker.tick().await;
        if let Err(e) = poll_scheduled(&engine).await {
            error!("scheduler pass failed: {}", e);
        }
    }
}
