//! Shared type definitions for campaign orchestration

use chrono::{DateTime, Utc};
use dialwave_telephony::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Campaign id sentinel for inbound calls (no campaign involved)
pub const CAMPAIGN_INCOMING: &str = "incoming";
/// Campaign id sentinel for operator-triggered test calls
pub const CAMPAIGN_TESTCALL: &str = "testcall";
/// Campaign id sentinel for one-off API-triggered calls
pub const CAMPAIGN_API_CALL: &str = "api-call";

/// Campaign lifecycle state.
///
/// Transitions follow the lifecycle controller's table; terminal states never
/// transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(CampaignStatus::Scheduled),
            "running" => Some(CampaignStatus::Running),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "cancelled" => Some(CampaignStatus::Cancelled),
            "failed" => Some(CampaignStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a campaign was paused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Manual,
    InsufficientBalance,
    SystemOverloaded,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PauseReason::Manual => "manual",
            PauseReason::InsufficientBalance => "insufficient_balance",
            PauseReason::SystemOverloaded => "system_overloaded",
        }
    }
}

/// Parameters for creating a campaign
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub tenant_id: String,
    pub name: String,
    pub list_id: String,
    pub from_number: String,
    pub bot_ws_url: String,
    /// `None` lets the engine pick its configured default provider
    pub provider: Option<ProviderKind>,
    /// `None` starts the campaign immediately
    pub scheduled_time: Option<DateTime<Utc>>,
}

/// Outcome of campaign creation
#[derive(Debug, Clone)]
pub struct CreatedCampaign {
    pub campaign_id: String,
    pub status: CampaignStatus,
    /// Set when the tenant's balance is positive but below the estimated
    /// campaign cost
    pub balance_warning: Option<String>,
}

/// Live progress snapshot for one campaign
#[derive(Debug, Clone, Serialize)]
pub struct CampaignProgress {
    pub campaign_id: String,
    pub status: CampaignStatus,
    pub total_contacts: i64,
    pub processed_contacts: i64,
    pub connected_calls: i64,
    pub failed_calls: i64,
    /// Live call counts per active-call state
    pub call_counts: HashMap<String, i64>,
    pub pause_reason: Option<String>,
    pub error_message: Option<String>,
}

/// Derive the assistant id from the terminal path component of a bot
/// WebSocket URL, e.g. `wss://bot/chat/v2/{assistant_id}`
pub fn assistant_id_from_ws_url(bot_ws_url: &str) -> Option<String> {
    let no_query = bot_ws_url.split(['?', '#']).next().unwrap_or(bot_ws_url);
    let rest = no_query
        .split_once("://")
        .map(|(_, r)| r)
        .unwrap_or(no_query)
        .trim_end_matches('/');
    let (_, segment) = rest.rsplit_once('/')?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}
