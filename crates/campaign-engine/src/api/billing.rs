//! Billing and balance API

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::balance::BalanceEvent;
use crate::database::{BillingDetail, BillingHistoryEntry};
use crate::error::{EngineError, Result};
use crate::orchestrator::CampaignEngine;

const DEFAULT_PAGE_LIMIT: i64 = 100;
const MAX_PAGE_LIMIT: i64 = 1000;

/// One page of per-call billing details
#[derive(Debug, Clone)]
pub struct CallDetailsPage {
    pub calls: Vec<BillingDetail>,
    pub next_cursor: Option<i64>,
}

/// The aggregated ledger plus whether this read coalesced incoming calls
#[derive(Debug, Clone)]
pub struct AggregatedHistory {
    pub entries: Vec<BillingHistoryEntry>,
    pub aggregation_performed: bool,
}

/// Billing, balance, and ledger facade
#[derive(Clone)]
pub struct BillingApi {
    engine: Arc<CampaignEngine>,
}

impl BillingApi {
    pub fn new(engine: Arc<CampaignEngine>) -> Self {
        Self { engine }
    }

    /// Subscribe to live balance updates for one tenant. No replay: query
    /// the current balance after subscribing.
    pub fn stream_balance(&self, tenant_id: &str) -> broadcast::Receiver<BalanceEvent> {
        self.engine.balance().subscribe(tenant_id)
    }

    pub async fn get_balance(&self, tenant_id: &str) -> Result<i64> {
        self.engine
            .store()
            .get_tenant_balance(tenant_id)
            .await
            .map_err(EngineError::database)?
            .ok_or_else(|| EngineError::TenantNotFound(tenant_id.to_string()))
    }

    /// Recent-first page of per-call billing details
    pub async fn get_call_details(
        &self,
        tenant_id: &str,
        cursor: Option<i64>,
        limit: Option<i64>,
    ) -> Result<CallDetailsPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let (calls, next_cursor) = self
            .engine
            .store()
            .list_billing_details(tenant_id, cursor, limit)
            .await
            .map_err(EngineError::database)?;

        Ok(CallDetailsPage { calls, next_cursor })
    }

    /// The ledger, coalescing unaggregated incoming calls first when the
    /// aggregation interval has elapsed
    pub async fn get_aggregated_history(&self, tenant_id: &str) -> Result<AggregatedHistory> {
        let aggregation_performed = self.engine.billing().aggregate_incoming(tenant_id).await?;

        let entries = self
            .engine
            .store()
            .list_billing_history(tenant_id)
            .await
            .map_err(EngineError::database)?;

        Ok(AggregatedHistory { entries, aggregation_performed })
    }

    /// Apply a top-up to a tenant's balance
    pub async fn credit_tenant(
        &self,
        tenant_id: &str,
        credits: i64,
        description: &str,
    ) -> Result<i64> {
        self.engine.billing().credit_tenant(tenant_id, credits, description).await
    }
}
