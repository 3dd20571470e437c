//! # Campaign Server Manager
//!
//! High-level wrapper owning the engine's background tasks: the scheduler,
//! the container supervisor (orphan recovery plus stale-slot sweeps), and
//! graceful shutdown. Embed it where the process lifecycle lives; the HTTP
//! collaborator talks to the APIs it exposes.
//!
//! ## Startup and failover
//!
//! `start()` runs an immediate orphan scan before the periodic loops begin,
//! so a replacement container adopts a dead peer's campaigns within seconds
//! of boot rather than waiting for the first scan tick. On SIGTERM the
//! server clears this container's heartbeats (keeping the campaigns
//! `running` so peers adopt them through the orphan path), waits out the
//! shutdown grace for in-flight persistence, and exits.
//!
//! ```rust
//! use dialwave_campaign_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let mut server = CampaignServerBuilder::new()
//!     .with_config(EngineConfig::default())
//!     .build()
//!     .await?;
//!
//! server.start().await?;
//! // server.run().await?;   // blocks until SIGTERM / ctrl-c
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::{BillingApi, CampaignApi};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::orchestrator::{recovery, scheduler, CampaignEngine};

/// A complete campaign server managing engine lifecycle and APIs
pub struct CampaignServer {
    engine: Arc<CampaignEngine>,
    campaign_api: CampaignApi,
    billing_api: BillingApi,
    scheduler_handle: Option<JoinHandle<()>>,
    supervisor_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CampaignServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignServer")
            .field("scheduler_running", &self.scheduler_handle.is_some())
            .field("supervisor_running", &self.supervisor_handle.is_some())
            .finish()
    }
}

impl CampaignServer {
    pub async fn new(config: EngineConfig) -> Result<Self> {
        let engine = CampaignEngine::new(config).await?;
        Ok(Self::from_engine(engine))
    }

    /// Wrap an already-built engine (tests share a store this way)
    pub fn from_engine(engine: Arc<CampaignEngine>) -> Self {
        let campaign_api = CampaignApi::new(engine.clone());
        let billing_api = BillingApi::new(engine.clone());
        Self {
            engine,
            campaign_api,
            billing_api,
            scheduler_handle: None,
            supervisor_handle: None,
        }
    }

    /// Start background processing: immediate orphan adoption, then the
    /// scheduler and supervisor loops.
    pub async fn start(&mut self) -> Result<()> {
        info!("🚀 campaign server starting ({})", self.engine.container_id());

        match recovery::recover_orphans(&self.engine).await {
            Ok(0) => {}
            Ok(adopted) => info!("adopted {} orphaned campaigns at startup", adopted),
            Err(e) => error!("startup orphan scan failed: {}", e),
        }

        let engine = self.engine.clone();
        self.scheduler_handle = Some(tokio::spawn(async move {
            scheduler::scheduler_loop(engine).await;
        }));

        let engine = self.engine.clone();
        self.supervisor_handle = Some(tokio::spawn(async move {
            recovery::monitor_loop(engine).await;
        }));

        info!("✅ campaign server started");
        Ok(())
    }

    /// Block until SIGTERM / ctrl-c, then shut down gracefully
    pub async fn run(&mut self) -> Result<()> {
        info!("📞 campaign server is running");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| EngineError::internal(format!("signal handler failed: {e}")))?;

        info!("🛑 termination signal received");
        self.stop().await
    }

    /// Stop background tasks and release campaigns for peer adoption
    pub async fn stop(&mut self) -> Result<()> {
        info!("🛑 stopping campaign server...");

        if let Some(handle) = self.scheduler_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.supervisor_handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        self.engine.shutdown().await;

        info!("✅ campaign server stopped");
        Ok(())
    }

    pub fn campaign_api(&self) -> &CampaignApi {
        &self.campaign_api
    }

    pub fn billing_api(&self) -> &BillingApi {
        &self.billing_api
    }

    /// The engine itself, for advanced embedding (webhook processing,
    /// standalone calls)
    pub fn engine(&self) -> &Arc<CampaignEngine> {
        &self.engine
    }
}

/// Builder for [`CampaignServer`] with a fluent API
pub struct CampaignServerBuilder {
    config: Option<EngineConfig>,
    database_path: Option<String>,
}

impl CampaignServerBuilder {
    pub fn new() -> Self {
        Self { config: None, database_path: None }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_database_path(mut self, path: String) -> Self {
        self.database_path = Some(path);
        self
    }

    pub fn with_in_memory_database(mut self) -> Self {
        self.database_path = None;
        self
    }

    pub async fn build(self) -> Result<CampaignServer> {
        let mut config = self
            .config
            .ok_or_else(|| EngineError::configuration("configuration not provided"))?;

        if self.database_path.is_some() {
            config.database.path = self.database_path;
        }

        CampaignServer::new(config).await
    }
}

impl Default for CampaignServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_requires_config() {
        let err = CampaignServerBuilder::new().build().await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[tokio::test]
    async fn server_starts_and_stops() {
        let mut server = CampaignServerBuilder::new()
            .with_config(EngineConfig::default())
            .with_in_memory_database()
            .build()
            .await
            .unwrap();

        server.start().await.unwrap();
        let stats = server.engine().get_stats().await.unwrap();
        assert_eq!(stats.running_campaigns, 0);

        server.stop().await.unwrap();
    }
}
