//! Common imports for embedders
//!
//! ```rust
//! use dialwave_campaign_engine::prelude::*;
//! ```

pub use crate::api::billing::{AggregatedHistory, CallDetailsPage};
pub use crate::api::campaigns::ReportFilters;
pub use crate::api::{BillingApi, CampaignApi};
pub use crate::balance::{BalanceEvent, BalanceStream};
pub use crate::billing::{BillingEngine, BillingOutcome};
pub use crate::callbacks::{CallbackProcessor, WebhookOutcome};
pub use crate::config::{
    BillingConfig, DatabaseConfig, EngineConfig, GeneralConfig, HeartbeatConfig, LimitsConfig,
    PlivoConfig, ProvidersConfig, TwilioConfig, WarmupConfig,
};
pub use crate::database::{
    ActiveCall, BillingDetail, BillingHistoryEntry, Campaign, Contact, ContactList, HangupRecord,
    NewContact, ReportPage, Store, Tenant,
};
pub use crate::error::{EngineError, Result};
pub use crate::orchestrator::{
    CampaignEngine, CampaignProgress, CampaignStatus, CreatedCampaign, EngineStats, NewCampaign,
    PauseReason, StandaloneCall,
};
pub use crate::providers::ProviderRegistry;
pub use crate::server::{CampaignServer, CampaignServerBuilder};
pub use crate::warmup::{BotWarmupClient, WarmupReport};

pub use dialwave_telephony::{
    CallPhase, CallSource, InstructionDoc, OriginateRequest, OriginateResponse, ProviderKind,
    TelephonyAdapter,
};
