//! # Campaign Orchestration Module
//!
//! The coordination layer of the engine: campaign lifecycle, the dial loop,
//! heartbeats, orphan recovery, and scheduled starts. Everything here shares
//! one rule: cross-container state lives in the store and every contended
//! decision is a conditional update there, so any number of containers can
//! cooperate on the same database without locks.
//!
//! ## Module organization
//!
//! - **[`core`]**: the [`CampaignEngine`] runtime context and standalone
//!   call origination
//! - **[`types`]**: campaign status machine and shared type definitions
//! - **[`lifecycle`]**: create / pause / resume / cancel / complete / fail
//! - **[`runner`]**: the per-campaign dial loop
//! - **[`heartbeat`]**: per-campaign heartbeat tasks
//! - **[`recovery`]**: orphan scanning and adoption after container death
//! - **[`scheduler`]**: scheduled-campaign polling
//!
//! ## Campaign flow
//!
//! ```text
//!   [scheduled] ──start──> [running] ──list done──> [completed]
//!        │                  │  ▲  │
//!        │            pause │  │  └────fatal──────> [failed]
//!        │                  ▼  │ resume
//!        │               [paused]
//!        │                  │
//!        └─────cancel───────┴─────────────────────> [cancelled]
//! ```
//!
//! A running campaign is owned by exactly one container (`container_id` +
//! fresh heartbeat). When a container dies, its campaigns keep status
//! `running` with an aging heartbeat until a peer's supervisor adopts them
//! and resumes dialing from the persisted cursor.

pub mod core;
pub mod heartbeat;
pub mod lifecycle;
pub mod recovery;
pub mod runner;
pub mod scheduler;
pub mod types;

pub use self::core::{CampaignEngine, EngineStats, StandaloneCall};
pub use heartbeat::HeartbeatManager;
pub use recovery::recover_orphans;
pub use scheduler::poll_scheduled;
pub use types::{
    assistant_id_from_ws_url, CampaignProgress, CampaignStatus, CreatedCampaign, NewCampaign,
    PauseReason,
};
