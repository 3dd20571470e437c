//! Provider-agnostic hangup normalization
//!
//! A pure mapping from a parsed provider hangup event plus carry-forward call
//! context to the fields of the durable hangup record. No I/O, no clock: the
//! caller stamps timestamps.

use serde_json::Map;
use uuid::Uuid;

use crate::types::{CallSource, ProviderKind, RawHangupEvent};

/// Carry-forward metadata the webhook processor already knows about the call
/// (from the active-call row or, for inbound calls, from tenant lookup).
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_uuid: Uuid,
    pub tenant_id: String,
    pub campaign_id: String,
    pub assistant_id: Option<String>,
    pub provider: ProviderKind,
    pub contact_meta: Map<String, serde_json::Value>,
}

/// Normalized terminal call fact, one per `call_uuid`
#[derive(Debug, Clone)]
pub struct NormalizedHangup {
    pub call_uuid: Uuid,
    pub tenant_id: String,
    pub campaign_id: String,
    pub assistant_id: Option<String>,
    pub from: String,
    pub to: String,
    /// Whole seconds; non-numeric and missing provider values coerce to 0
    pub duration: i64,
    pub status: String,
    pub hangup_cause: String,
    pub start_time: Option<String>,
    pub answer_time: Option<String>,
    pub end_time: Option<String>,
    pub recording_url: Option<String>,
    pub source: CallSource,
    pub provider: ProviderKind,
    pub contact_meta: Map<String, serde_json::Value>,
}

/// Map provider status strings onto the record vocabulary
fn normalize_status(raw: Option<&str>) -> String {
    match raw.map(|s| s.to_ascii_lowercase()) {
        Some(s) => match s.as_str() {
            "answered" | "completed" => "completed".to_string(),
            "no-answer" | "noanswer" => "no-answer".to_string(),
            "canceled" | "cancelled" => "canceled".to_string(),
            "busy" => "busy".to_string(),
            "failed" => "failed".to_string(),
            "timeout" => "no-answer".to_string(),
            other => other.to_string(),
        },
        None => "completed".to_string(),
    }
}

/// Synthesize a hangup cause when the provider omitted one
fn synthesize_cause(sip_code: Option<u16>, status: &str) -> String {
    if let Some(200) = sip_code {
        return "NORMAL_CLEARING".to_string();
    }
    match status {
        "completed" => "NORMAL_CLEARING".to_string(),
        "busy" => "USER_BUSY".to_string(),
        "no-answer" => "NO_ANSWER".to_string(),
        "canceled" => "ORIGINATOR_CANCEL".to_string(),
        "failed" => "CALL_REJECTED".to_string(),
        _ => "UNSPECIFIED".to_string(),
    }
}

/// Normalize a raw provider hangup into the durable record shape.
///
/// `duration` coerces to 0 on anything non-numeric. `recording_url` is kept
/// when the hangup already carries it; otherwise it stays `None` for the
/// later recording callback to fill.
pub fn normalize_hangup(raw: &RawHangupEvent, ctx: &CallContext) -> NormalizedHangup {
    let duration = raw
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<i64>().ok())
        .filter(|d| *d >= 0)
        .unwrap_or(0);

    let status = normalize_status(raw.status.as_deref());
    let hangup_cause = raw
        .hangup_cause
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| synthesize_cause(raw.sip_code, &status));

    NormalizedHangup {
        call_uuid: ctx.call_uuid,
        tenant_id: ctx.tenant_id.clone(),
        campaign_id: ctx.campaign_id.clone(),
        assistant_id: ctx.assistant_id.clone(),
        from: raw.from.clone().unwrap_or_default(),
        to: raw.to.clone().unwrap_or_default(),
        duration,
        status,
        hangup_cause,
        start_time: raw.start_time.clone(),
        answer_time: raw.answer_time.clone(),
        end_time: raw.end_time.clone(),
        recording_url: raw.recording_url.clone(),
        source: CallSource::from_campaign_id(&ctx.campaign_id),
        provider: ctx.provider,
        contact_meta: ctx.contact_meta.clone(),
    }
}
