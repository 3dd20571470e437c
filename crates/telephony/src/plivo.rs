//! Plivo provider adapter
//!
//! Speaks the Plivo Call API for origination and parses Plivo's webhook
//! fields. Plivo accepts our callback URLs at call-create time and POSTs
//! form-encoded events to them; the transport collaborator decodes those
//! forms into a JSON object before they reach [`PlivoAdapter::parse_hangup`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::adapter::{CallbackUrls, TelephonyAdapter};
use crate::error::{ProviderError, Result};
use crate::types::{
    CallPhase, InstructionContext, InstructionDoc, OriginateRequest, OriginateResponse,
    ProviderKind, RawHangupEvent, RawRecordingEvent,
};

const PLIVO_API_BASE: &str = "https://api.plivo.com/v1/Account";
const ORIGINATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Plivo credentials and HTTP client
pub struct PlivoAdapter {
    http: reqwest::Client,
    auth_id: String,
    auth_token: String,
    callbacks: CallbackUrls,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct PlivoCallCreated {
    request_uuid: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PlivoApiError {
    error: Option<String>,
}

impl PlivoAdapter {
    pub fn new(auth_id: impl Into<String>, auth_token: impl Into<String>, callbacks: CallbackUrls) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(ORIGINATE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            auth_id: auth_id.into(),
            auth_token: auth_token.into(),
            callbacks,
            api_base: PLIVO_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different API root (tests)
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn call_create_url(&self) -> String {
        format!("{}/{}/Call/", self.api_base, self.auth_id)
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Pull a string field out of a decoded webhook object, tolerating the
/// legacy lower-camel field names alongside Plivo's canonical casing.
/// Numbers are stringified so `Duration: 42` and `Duration: "42"` read alike.
pub(crate) fn field_str(payload: &serde_json::Value, names: &[&str]) -> Option<String> {
    let obj = payload.as_object()?;
    for name in names {
        match obj.get(*name) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

pub(crate) fn field_uuid(payload: &serde_json::Value, names: &[&str]) -> Option<Uuid> {
    field_str(payload, names).and_then(|s| Uuid::parse_str(&s).ok())
}

#[async_trait]
impl TelephonyAdapter for PlivoAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Plivo
    }

    async fn originate(&self, request: &OriginateRequest) -> Result<OriginateResponse> {
        let body = serde_json::json!({
            "from": request.from,
            "to": request.to,
            "answer_url": self.callbacks.answer_url(ProviderKind::Plivo, request.call_uuid),
            "answer_method": "POST",
            "ring_url": self.callbacks.ring_url(ProviderKind::Plivo, request.call_uuid),
            "ring_method": "POST",
            "hangup_url": self.callbacks.hangup_url(ProviderKind::Plivo, request.call_uuid),
            "hangup_method": "POST",
        });

        debug!("📞 Plivo call create: {} -> {}", request.from, request.to);

        let resp = self
            .http
            .post(self.call_create_url())
            .basic_auth(&self.auth_id, Some(&self.auth_token))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let err: PlivoApiError = resp.json().await.unwrap_or(PlivoApiError { error: None });
            return Err(ProviderError::Rejected {
                code: status.as_u16(),
                message: err.error.unwrap_or_else(|| "call create rejected".to_string()),
            });
        }

        let created: PlivoCallCreated = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;
        debug!("Plivo accepted call {}: {}", request.call_uuid, created.message);

        Ok(OriginateResponse {
            call_uuid: request.call_uuid,
            provider_call_id: created
                .request_uuid
                .unwrap_or_else(|| request.call_uuid.to_string()),
        })
    }

    fn generate_instructions(&self, ctx: &InstructionContext) -> InstructionDoc {
        // Extra headers carry the template variables into the bot stream
        let extra = ctx
            .variables
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}={}", k, v)
            })
            .collect::<Vec<_>>()
            .join(",");

        let mut stream_url = ctx.bot_ws_url.clone();
        let sep = if stream_url.contains('?') { '&' } else { '?' };
        stream_url.push_str(&format!("{}call_uuid={}", sep, ctx.call_uuid));

        let body = format!(
            "<Response>\n    <Stream bidirectional=\"true\" keepCallAlive=\"true\" \
             contentType=\"audio/x-l16;rate=8000\" extraHeaders=\"{}\">{}</Stream>\n</Response>",
            xml_escape(&extra),
            xml_escape(&stream_url),
        );

        InstructionDoc { content_type: "application/xml", body }
    }

    fn classify_status(&self, provider_status: &str) -> CallPhase {
        match provider_status.to_ascii_lowercase().as_str() {
            "queued" | "initiated" => CallPhase::Processed,
            "ring" | "ringing" => CallPhase::Ringing,
            "in-progress" | "answer" | "answered" | "startstream" => CallPhase::Ongoing,
            "hangup" => CallPhase::CallEnded,
            "completed" => CallPhase::Completed,
            "busy" | "failed" | "timeout" | "no-answer" | "noanswer" | "canceled"
            | "cancelled" | "rejected" => CallPhase::Failed,
            other => {
                debug!("unrecognized Plivo status '{}', treating as processed", other);
                CallPhase::Processed
            }
        }
    }

    fn parse_hangup(&self, payload: &serde_json::Value) -> Result<RawHangupEvent> {
        if !payload.is_object() {
            return Err(ProviderError::InvalidPayload("hangup payload is not an object".into()));
        }
        Ok(RawHangupEvent {
            call_uuid: field_uuid(payload, &["call_uuid", "CallUUID", "callUUID"]),
            provider_call_id: field_str(payload, &["RequestUUID", "CallUUID", "callUUID"]),
            from: field_str(payload, &["From", "from"]),
            to: field_str(payload, &["To", "to"]),
            duration: field_str(payload, &["Duration", "duration", "BillDuration"]),
            status: field_str(payload, &["CallStatus", "callStatus", "Status", "status"]),
            hangup_cause: field_str(payload, &["HangupCauseName", "HangupCause", "hangupCause"]),
            sip_code: field_str(payload, &["HangupCauseCode", "SipCode"])
                .and_then(|s| s.parse().ok()),
            start_time: field_str(payload, &["StartTime", "startTime"]),
            answer_time: field_str(payload, &["AnswerTime", "answerTime"]),
            end_time: field_str(payload, &["EndTime", "endTime"]),
            recording_url: field_str(payload, &["RecordUrl", "RecordingUrl", "recordingUrl"]),
        })
    }

    fn parse_recording(&self, payload: &serde_json::Value) -> Result<RawRecordingEvent> {
        let recording_url = field_str(payload, &["RecordUrl", "RecordingUrl", "recordingUrl"])
            .ok_or_else(|| ProviderError::InvalidPayload("recording callback without url".into()))?;
        Ok(RawRecordingEvent {
            call_uuid: field_uuid(payload, &["call_uuid", "CallUUID", "callUUID"]),
            provider_call_id: field_str(payload, &["RequestUUID", "CallUUID"]),
            recording_url,
            duration: field_str(payload, &["RecordingDuration", "Duration"]),
        })
    }
}
