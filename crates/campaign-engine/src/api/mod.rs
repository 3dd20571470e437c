//! Public API surfaces for HTTP/CLI collaborators
//!
//! Two facades over the engine, split by audience:
//!
//! - [`CampaignApi`]: campaign lifecycle, progress, and per-campaign call
//!   reports. Target users: campaign dashboards and the management HTTP
//!   layer.
//! - [`BillingApi`]: balance streaming, per-call billing details, the
//!   aggregated ledger, and top-ups. Target users: billing pages and
//!   account tooling.
//!
//! Both are thin: validation and semantics live in the engine and store;
//! the facades shape inputs and outputs for transport layers.
//!
//! # Examples
//!
//! ## Campaign dashboard
//!
//! ```
//! use dialwave_campaign_engine::prelude::*;
//!
//! # async fn example(server: &CampaignServer) -> Result<()> {
//! let api = server.campaign_api();
//!
//! for campaign in api.list_campaigns("tenant-1").await? {
//!     let progress = api.get_campaign_progress(&campaign.campaign_id).await?;
//!     println!(
//!         "{}: {} ({}/{} dialed, {} connected)",
//!         campaign.name,
//!         progress.status,
//!         progress.processed_contacts,
//!         progress.total_contacts,
//!         progress.connected_calls,
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Live balance widget
//!
//! ```
//! use dialwave_campaign_engine::prelude::*;
//!
//! # async fn example(server: &CampaignServer) -> Result<()> {
//! // no replay across reconnects: show the current balance first,
//! // then apply the stream
//! let current = server.billing_api().get_balance("tenant-1").await?;
//! println!("balance: {current}");
//!
//! let mut events = server.billing_api().stream_balance("tenant-1");
//! while let Ok(event) = events.recv().await {
//!     println!("balance: {} ({})", event.balance, event.reason);
//! }
//! # Ok(())
//! # }
//! ```

pub mod billing;
pub mod campaigns;

pub use billing::BillingApi;
pub use campaigns::CampaignApi;
