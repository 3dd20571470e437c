//! Bot pod warmup client
//!
//! Before a campaign starts, the bot deployment gets a chance to spin up:
//! one warmup request per expected concurrent call, fired in parallel. Each
//! request retries with exponential backoff; timeouts and connection errors
//! are attempt failures, not fatal errors. The campaign may start as long as
//! at least one pod answered.

use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WarmupConfig;

/// Outcome of one warmup round
#[derive(Debug, Clone)]
pub struct WarmupReport {
    /// Session ids issued to each pod request, for diagnostics
    pub sessions: Vec<Uuid>,
    pub succeeded: usize,
    pub failed: usize,
    /// Warmup is not configured; the campaign proceeds without it
    pub skipped: bool,
}

impl WarmupReport {
    /// The campaign can start when any pod came up (or warmup is disabled)
    pub fn any_succeeded(&self) -> bool {
        self.skipped || self.succeeded > 0
    }
}

pub struct BotWarmupClient {
    http: reqwest::Client,
    config: WarmupConfig,
}

/// Backoff before retry `attempt` (0-based): base * 2^attempt, capped
fn backoff_delay(config: &WarmupConfig, attempt: u32) -> Duration {
    let exp = config.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
    exp.min(config.backoff_max)
}

impl BotWarmupClient {
    pub fn new(config: WarmupConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    /// Warm `pods` bot pods in parallel for `agent_id`
    pub async fn warm_pods(&self, agent_id: &str, pods: usize) -> WarmupReport {
        let Some(base_url) = self.config.bot_base_url.clone() else {
            return WarmupReport { sessions: Vec::new(), succeeded: 0, failed: 0, skipped: true };
        };

        let pods = pods.max(1);
        info!("🔥 warming {} bot pods for agent {}", pods, agent_id);

        let attempts: Vec<_> = (0..pods)
            .map(|_| {
                let session = Uuid::new_v4();
                let fut = self.warm_one(&base_url, agent_id, session);
                async move { (session, fut.await) }
            })
            .collect();

        let results = join_all(attempts).await;

        let mut report =
            WarmupReport { sessions: Vec::new(), succeeded: 0, failed: 0, skipped: false };
        for (session, ok) in results {
            report.sessions.push(session);
            if ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }

        info!("🔥 warmup done: {}/{} pods ready", report.succeeded, pods);
        report
    }

    /// Best-effort single-pod warm issued right before an individual dial
    pub async fn warm_single(&self, agent_id: &str) -> bool {
        match self.config.bot_base_url.clone() {
            Some(base_url) => self.warm_one(&base_url, agent_id, Uuid::new_v4()).await,
            None => true,
        }
    }

    async fn warm_one(&self, base_url: &str, agent_id: &str, session: Uuid) -> bool {
        let url = format!("{}/warmup/{}", base_url.trim_end_matches('/'), session);
        let body = serde_json::json!({ "agent_id": agent_id });

        for attempt in 0..self.config.retries.max(1) {
            match self.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("warmup session {} ready (attempt {})", session, attempt + 1);
                    return true;
                }
                Ok(resp) => {
                    warn!("warmup session {} got status {} (attempt {})", session, resp.status(), attempt + 1);
                }
                Err(e) => {
                    warn!("warmup session {} error: {} (attempt {})", session, e, attempt + 1);
                }
            }

            if attempt + 1 < self.config.retries.max(1) {
                tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let config = WarmupConfig {
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(5),
            ..WarmupConfig::default()
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(5));
        assert_eq!(backoff_delay(&config, 10), Duration::from_secs(5));
    }

    #[test]
    fn report_requires_only_one_pod() {
        let report = WarmupReport { sessions: vec![], succeeded: 1, failed: 9, skipped: false };
        assert!(report.any_succeeded());
        let report = WarmupReport { sessions: vec![], succeeded: 0, failed: 3, skipped: false };
        assert!(!report.any_succeeded());
    }

    #[tokio::test]
    async fn disabled_warmup_is_a_pass() {
        let client = BotWarmupClient::new(WarmupConfig::default());
        let report = client.warm_pods("asst-1", 3).await;
        assert!(report.skipped);
        assert!(report.any_succeeded());
        assert!(client.warm_single("asst-1").await);
    }

    #[tokio::test]
    async fn unreachable_bot_fails_every_pod() {
        let config = WarmupConfig {
            bot_base_url: Some("http://127.0.0.1:1".to_string()),
            timeout: Duration::from_millis(200),
            retries: 1,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(2),
        };
        let client = BotWarmupClient::new(config);

        let report = client.warm_pods("asst-1", 2).await;
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(report.sessions.len(), 2);
        assert!(!report.any_succeeded());
    }
}
