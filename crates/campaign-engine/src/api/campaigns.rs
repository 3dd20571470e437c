//! Campaign management API

use std::sync::Arc;

use crate::database::billing::ReportPage;
use crate::error::{EngineError, Result};
use crate::orchestrator::types::{CampaignProgress, CreatedCampaign, NewCampaign};
use crate::orchestrator::CampaignEngine;

const DEFAULT_REPORT_LIMIT: i64 = 100;
const MAX_REPORT_LIMIT: i64 = 1000;

/// Filters for the campaign call report
#[derive(Debug, Clone, Default)]
pub struct ReportFilters {
    /// Restrict to one normalized call status (`completed`, `no-answer`, ...)
    pub status: Option<String>,
}

/// Campaign lifecycle and reporting facade
#[derive(Clone)]
pub struct CampaignApi {
    engine: Arc<CampaignEngine>,
}

impl CampaignApi {
    pub fn new(engine: Arc<CampaignEngine>) -> Self {
        Self { engine }
    }

    /// Create a campaign; starts immediately unless a schedule time is set
    pub async fn create_campaign(&self, params: NewCampaign) -> Result<CreatedCampaign> {
        self.engine.clone().create_campaign(params).await
    }

    pub async fn pause_campaign(&self, campaign_id: &str, paused_by: &str) -> Result<()> {
        self.engine.pause_campaign(campaign_id, paused_by).await
    }

    pub async fn resume_campaign(&self, campaign_id: &str) -> Result<()> {
        self.engine.clone().resume_campaign(campaign_id).await
    }

    pub async fn cancel_campaign(&self, campaign_id: &str) -> Result<()> {
        self.engine.clone().cancel_campaign(campaign_id).await
    }

    /// Live progress including per-state call counts
    pub async fn get_campaign_progress(&self, campaign_id: &str) -> Result<CampaignProgress> {
        self.engine.get_campaign_progress(campaign_id).await
    }

    /// The full campaign record
    pub async fn get_campaign(&self, campaign_id: &str) -> Result<crate::database::Campaign> {
        self.engine
            .store()
            .get_campaign(campaign_id)
            .await
            .map_err(EngineError::database)?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))
    }

    /// All campaigns of one tenant, newest first
    pub async fn list_campaigns(&self, tenant_id: &str) -> Result<Vec<crate::database::Campaign>> {
        self.engine
            .store()
            .list_campaigns_for_tenant(tenant_id)
            .await
            .map_err(EngineError::database)
    }

    /// Cursor-paged call report for one campaign with totals
    pub async fn get_report(
        &self,
        campaign_id: &str,
        cursor: Option<i64>,
        limit: Option<i64>,
        filters: ReportFilters,
    ) -> Result<ReportPage> {
        // reject unknown campaigns rather than returning an empty page
        self.engine
            .store()
            .get_campaign(campaign_id)
            .await
            .map_err(EngineError::database)?
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;

        let limit = limit.unwrap_or(DEFAULT_REPORT_LIMIT).clamp(1, MAX_REPORT_LIMIT);
        self.engine
            .store()
            .report_page(campaign_id, cursor, limit, filters.status.as_deref())
            .await
            .map_err(EngineError::database)
    }
}
