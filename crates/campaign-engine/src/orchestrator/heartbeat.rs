//! Per-campaign heartbeat tasks
//!
//! Every campaign this container runs gets a periodic task stamping
//! `heartbeat = now, container_id = me` on its row. The write is conditioned
//! on `status = 'running'`, so the task notices any terminal or paused
//! transition on its next tick and stops itself; explicit `stop` just makes
//! that immediate. Peers detect a dead container by the heartbeat going
//! stale (the orphan threshold) and adopt its campaigns.

use dashmap::DashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::database::Store;

pub struct HeartbeatManager {
    store: Store,
    container_id: String,
    interval: Duration,
    tasks: DashMap<String, JoinHandle<()>>,
}

impl HeartbeatManager {
    pub fn new(store: Store, container_id: String, interval: Duration) -> Self {
        Self { store, container_id, interval, tasks: DashMap::new() }
    }

    /// Start heartbeating a campaign. Replaces any previous task for the
    /// same campaign.
    pub fn start(&self, campaign_id: &str) {
        let store = self.store.clone();
        let container_id = self.container_id.clone();
        let campaign = campaign_id.to_string();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the campaign row was already stamped when it went running;
            // skip the immediate first tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match store.write_heartbeat(&campaign, &container_id).await {
                    Ok(true) => debug!("💓 heartbeat for campaign {}", campaign),
                    Ok(false) => {
                        debug!("campaign {} no longer running, heartbeat task exiting", campaign);
                        break;
                    }
                    Err(e) => {
                        // transient store trouble: keep trying, the orphan
                        // threshold gives us slack
                        warn!("heartbeat write for {} failed: {}", campaign, e);
                    }
                }
            }
        });

        if let Some(old) = self.tasks.insert(campaign_id.to_string(), handle) {
            old.abort();
        }
    }

    /// Stop heartbeating one campaign
    pub fn stop(&self, campaign_id: &str) {
        if let Some((_, handle)) = self.tasks.remove(campaign_id) {
            handle.abort();
        }
    }

    /// Stop every heartbeat task (shutdown path)
    pub fn stop_all(&self) {
        let ids: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop(&id);
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::CampaignStatus;

    async fn seeded_store() -> Store {
        let store = Store::new_in_memory().await.unwrap();
        store
            .insert_campaign(
                "cmp-1", "tenant-1", "n", "list-1", "+1", "wss://b/chat/v2/a",
                None, CampaignStatus::Running, 5, None,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn heartbeats_are_written_while_running() {
        let store = seeded_store().await;
        let manager =
            HeartbeatManager::new(store.clone(), "container-a".into(), Duration::from_millis(20));

        manager.start("cmp-1");
        tokio::time::sleep(Duration::from_millis(80)).await;

        let campaign = store.get_campaign("cmp-1").await.unwrap().unwrap();
        assert!(campaign.heartbeat.is_some());
        assert_eq!(campaign.container_id.as_deref(), Some("container-a"));

        manager.stop_all();
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn task_stops_itself_after_terminal_transition() {
        let store = seeded_store().await;
        let manager =
            HeartbeatManager::new(store.clone(), "container-a".into(), Duration::from_millis(20));

        manager.start("cmp-1");
        store.mark_completed("cmp-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // the write was refused and the heartbeat stays clear
        let campaign = store.get_campaign("cmp-1").await.unwrap().unwrap();
        assert!(campaign.heartbeat.is_none());
        assert_eq!(campaign.get_status(), Some(CampaignStatus::Completed));
    }
}
