//! # Dialwave Campaign Engine
//!
//! Orchestration for outbound voice campaigns over third-party telephony
//! providers. A tenant uploads a contact list, points a campaign at a
//! voice-bot WebSocket endpoint, and the engine dials every contact once:
//! serially per campaign, under per-tenant and fleet-wide concurrency caps,
//! with per-call billing against a credit balance and live progress and
//! balance streams.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                 CampaignServer                    │
//! ├───────────────────────────────────────────────────┤
//! │   CampaignApi  │  BillingApi  │  CallbackProcessor│
//! ├───────────────────────────────────────────────────┤
//! │                 CampaignEngine                    │
//! │  ┌───────────┐ ┌───────────┐ ┌─────────────────┐  │
//! │  │ Lifecycle │ │  Runners  │ │   Heartbeats    │  │
//! │  └───────────┘ └───────────┘ └─────────────────┘  │
//! │  ┌───────────┐ ┌───────────┐ ┌─────────────────┐  │
//! │  │ Admission │ │  Billing  │ │ Balance stream  │  │
//! │  └───────────┘ └───────────┘ └─────────────────┘  │
//! ├───────────────────────────────────────────────────┤
//! │            Store (sqlx + SQLite)                  │
//! └───────────────────────────────────────────────────┘
//!                        │
//!               provider adapters (dialwave-telephony)
//! ```
//!
//! ## Durability model
//!
//! Campaigns survive container restarts: every piece of progress (the dial
//! cursor, call reservations, billing) is persisted before the next step,
//! and running campaigns carry a heartbeat. A container that dies without
//! cleanup leaves its campaigns `running` with an aging heartbeat; any
//! peer's supervisor adopts them and resumes from the persisted cursor.
//! Billing and reporting are exactly-once per call identifier even when
//! providers retry webhooks; dialing itself is at-least-once by design.
//!
//! ## Quick start
//!
//! ```rust
//! use dialwave_campaign_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let mut server = CampaignServerBuilder::new()
//!     .with_config(EngineConfig::default())
//!     .build()
//!     .await?;
//! server.start().await?;
//!
//! let created = server.campaign_api()
//!     .create_campaign(NewCampaign {
//!         tenant_id: "tenant-1".into(),
//!         name: "spring-renewals".into(),
//!         list_id: "list-1".into(),
//!         from_number: "+14155550100".into(),
//!         bot_ws_url: "wss://bot.example.com/chat/v2/renewals".into(),
//!         provider: None,
//!         scheduled_time: None,
//!     })
//!     .await?;
//! println!("campaign {} is {}", created.campaign_id, created.status);
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod api;
pub mod balance;
pub mod billing;
pub mod callbacks;
pub mod config;
pub mod database;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod server;
pub mod warmup;

pub mod prelude;

pub use api::{BillingApi, CampaignApi};
pub use balance::{BalanceEvent, BalanceStream};
pub use billing::{BillingEngine, BillingOutcome};
pub use callbacks::{CallbackProcessor, WebhookOutcome};
pub use config::EngineConfig;
pub use database::Store;
pub use error::{EngineError, Result};
pub use orchestrator::{CampaignEngine, CampaignStatus, NewCampaign};
pub use server::{CampaignServer, CampaignServerBuilder};
