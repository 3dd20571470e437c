//! Shared type definitions for the provider boundary

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Supported telephony providers.
///
/// Campaigns may pin a provider; `None` on the campaign means the engine
/// picks its configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Plivo,
    Twilio,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Plivo => "plivo",
            ProviderKind::Twilio => "twilio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plivo" => Some(ProviderKind::Plivo),
            "twilio" => Some(ProviderKind::Twilio),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of an active call, normalized across providers.
///
/// Phases are ordered; a later-arriving earlier-phase webhook must not move a
/// call backwards. `rank()` gives the ordering used for that monotonicity
/// check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallPhase {
    /// Reserved and handed to the provider, nothing heard back yet
    Processed,
    Ringing,
    /// Answered, media stream to the bot is up
    Ongoing,
    /// Hangup received, terminal record not yet written
    CallEnded,
    Completed,
    Failed,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Processed => "processed",
            CallPhase::Ringing => "ringing",
            CallPhase::Ongoing => "ongoing",
            CallPhase::CallEnded => "call-ended",
            CallPhase::Completed => "completed",
            CallPhase::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processed" => Some(CallPhase::Processed),
            "ringing" => Some(CallPhase::Ringing),
            "ongoing" => Some(CallPhase::Ongoing),
            "call-ended" => Some(CallPhase::CallEnded),
            "completed" => Some(CallPhase::Completed),
            "failed" => Some(CallPhase::Failed),
            _ => None,
        }
    }

    /// Ordering for monotonic status transitions
    pub fn rank(&self) -> u8 {
        match self {
            CallPhase::Processed => 0,
            CallPhase::Ringing => 1,
            CallPhase::Ongoing => 2,
            CallPhase::CallEnded => 3,
            CallPhase::Completed => 4,
            CallPhase::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Completed | CallPhase::Failed)
    }

    /// Phases that hold a concurrency slot
    pub fn holds_slot(&self) -> bool {
        matches!(self, CallPhase::Processed | CallPhase::Ringing | CallPhase::Ongoing)
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a call entered the system, derived from the campaign-id sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallSource {
    Campaign,
    Api,
    Test,
    Inbound,
}

impl CallSource {
    /// Sentinel campaign ids carried on non-campaign calls
    pub fn from_campaign_id(campaign_id: &str) -> Self {
        match campaign_id {
            "api-call" => CallSource::Api,
            "testcall" => CallSource::Test,
            "incoming" => CallSource::Inbound,
            _ => CallSource::Campaign,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallSource::Campaign => "campaign",
            CallSource::Api => "api",
            CallSource::Test => "test",
            CallSource::Inbound => "inbound",
        }
    }
}

/// A call-origination request handed to an adapter.
///
/// `call_uuid` is pre-generated by the caller and is the authoritative
/// identifier for the dial attempt; the adapter embeds it in every callback
/// URL so webhooks can be correlated without the provider's own id.
#[derive(Debug, Clone)]
pub struct OriginateRequest {
    pub call_uuid: Uuid,
    pub tenant_id: String,
    pub campaign_id: String,
    pub from: String,
    pub to: String,
    pub bot_ws_url: String,
    pub first_name: Option<String>,
    /// Assistant id derived from the bot WebSocket URL, used for billing lookup
    pub tag: Option<String>,
    pub list_id: Option<String>,
    /// Dynamic contact fields forwarded to the instruction generator as
    /// template variables
    pub variables: serde_json::Map<String, serde_json::Value>,
}

/// Successful originate outcome
#[derive(Debug, Clone)]
pub struct OriginateResponse {
    /// Echo of the pre-generated authoritative identifier
    pub call_uuid: Uuid,
    /// The provider's own identifier for the call (Plivo request UUID,
    /// Twilio CallSid). May equal `call_uuid` when the provider accepts
    /// caller-supplied ids.
    pub provider_call_id: String,
}

/// Context for call-time instruction generation.
///
/// Assembled by the engine from the persisted active-call row when the
/// provider fetches its answer URL.
#[derive(Debug, Clone)]
pub struct InstructionContext {
    pub call_uuid: Uuid,
    pub bot_ws_url: String,
    pub variables: serde_json::Map<String, serde_json::Value>,
}

/// Opaque instruction document returned to the provider from its answer
/// webhook (Plivo XML or TwiML)
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionDoc {
    pub content_type: &'static str,
    pub body: String,
}

/// A provider hangup payload parsed into provider-agnostic raw fields.
///
/// Values are kept as the provider sent them; coercion and defaulting happen
/// in [`crate::normalize`].
#[derive(Debug, Clone, Default)]
pub struct RawHangupEvent {
    pub call_uuid: Option<Uuid>,
    pub provider_call_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub duration: Option<String>,
    pub status: Option<String>,
    pub hangup_cause: Option<String>,
    pub sip_code: Option<u16>,
    pub start_time: Option<String>,
    pub answer_time: Option<String>,
    pub end_time: Option<String>,
    pub recording_url: Option<String>,
}

/// A provider recording callback parsed into raw fields
#[derive(Debug, Clone)]
pub struct RawRecordingEvent {
    pub call_uuid: Option<Uuid>,
    pub provider_call_id: Option<String>,
    pub recording_url: String,
    pub duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_ordering_is_monotonic() {
        assert!(CallPhase::Processed.rank() < CallPhase::Ringing.rank());
        assert!(CallPhase::Ringing.rank() < CallPhase::Ongoing.rank());
        assert!(CallPhase::Ongoing.rank() < CallPhase::CallEnded.rank());
        assert!(CallPhase::CallEnded.rank() < CallPhase::Completed.rank());
        assert_eq!(CallPhase::Completed.rank(), CallPhase::Failed.rank());
    }

    #[test]
    fn phase_roundtrip() {
        for phase in [
            CallPhase::Processed,
            CallPhase::Ringing,
            CallPhase::Ongoing,
            CallPhase::CallEnded,
            CallPhase::Completed,
            CallPhase::Failed,
        ] {
            assert_eq!(CallPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(CallPhase::parse("bogus"), None);
    }

    #[test]
    fn slot_holding_phases() {
        assert!(CallPhase::Processed.holds_slot());
        assert!(CallPhase::Ringing.holds_slot());
        assert!(CallPhase::Ongoing.holds_slot());
        assert!(!CallPhase::CallEnded.holds_slot());
        assert!(!CallPhase::Completed.holds_slot());
        assert!(!CallPhase::Failed.holds_slot());
    }

    #[test]
    fn source_sentinels() {
        assert_eq!(CallSource::from_campaign_id("api-call"), CallSource::Api);
        assert_eq!(CallSource::from_campaign_id("testcall"), CallSource::Test);
        assert_eq!(CallSource::from_campaign_id("incoming"), CallSource::Inbound);
        assert_eq!(CallSource::from_campaign_id("cmp-42"), CallSource::Campaign);
    }

    #[test]
    fn provider_kind_parse() {
        assert_eq!(ProviderKind::parse("Plivo"), Some(ProviderKind::Plivo));
        assert_eq!(ProviderKind::parse("TWILIO"), Some(ProviderKind::Twilio));
        assert_eq!(ProviderKind::parse("exotel"), None);
    }
}
