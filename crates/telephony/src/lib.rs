//! # Dialwave Telephony Providers
//!
//! This crate abstracts third-party telephony providers (Plivo, Twilio) behind
//! a uniform call-origination and webhook-ingestion surface. The campaign
//! engine talks only to the [`TelephonyAdapter`] trait; each adapter knows its
//! own wire format and nothing else.
//!
//! ## Design
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            campaign engine               │
//! └──────────────┬───────────────────────────┘
//!                │ TelephonyAdapter
//!     ┌──────────┴──────────┐
//!     │                     │
//! ┌───▼──────┐        ┌─────▼────┐
//! │  Plivo   │        │  Twilio  │
//! │ adapter  │        │ adapter  │
//! └───┬──────┘        └─────┬────┘
//!     │  provider HTTP API  │
//!     └──────────┬──────────┘
//!                │ webhooks (raw payloads)
//!         ┌──────▼───────┐
//!         │  normalize   │  provider-agnostic HangupRecord fields
//!         └──────────────┘
//! ```
//!
//! The caller pre-generates the authoritative `call_uuid` for every dial and
//! hands it to the adapter; provider-native identifiers (Plivo request UUID,
//! Twilio CallSid) are bookkeeping only. The same `call_uuid` is embedded in
//! every callback URL, so webhook processing never depends on provider id
//! ordering.
//!
//! Normalization ([`normalize::normalize_hangup`]) is a pure function kept
//! outside the adapters: adapters parse their own wire format into
//! [`RawHangupEvent`], normalization maps that to the durable record shape.

pub mod adapter;
pub mod error;
pub mod normalize;
pub mod plivo;
pub mod twilio;
pub mod types;

pub use adapter::{CallbackUrls, TelephonyAdapter};
pub use error::{ProviderError, Result};
pub use normalize::{normalize_hangup, CallContext, NormalizedHangup};
pub use plivo::PlivoAdapter;
pub use twilio::TwilioAdapter;
pub use types::{
    CallPhase, CallSource, InstructionContext, InstructionDoc, OriginateRequest,
    OriginateResponse, ProviderKind, RawHangupEvent, RawRecordingEvent,
};
