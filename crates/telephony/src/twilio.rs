//! Twilio provider adapter
//!
//! Origination goes through the Calls resource of the 2010-04-01 REST API
//! (form-encoded, basic auth on account SID + auth token); call-time
//! instructions are TwiML with a `<Connect><Stream>` verb pointing at the
//! bot. Twilio's own CallSid is recorded as the provider call id only; the
//! authoritative identifier stays the pre-generated `call_uuid` carried in
//! the callback URLs.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::adapter::{CallbackUrls, TelephonyAdapter};
use crate::error::{ProviderError, Result};
use crate::plivo::{field_str, field_uuid};
use crate::types::{
    CallPhase, InstructionContext, InstructionDoc, OriginateRequest, OriginateResponse,
    ProviderKind, RawHangupEvent, RawRecordingEvent,
};

const TWILIO_API_BASE: &str = "https://api.twilio.com";
const ORIGINATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Twilio credentials and HTTP client
pub struct TwilioAdapter {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    callbacks: CallbackUrls,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct TwilioCallCreated {
    sid: String,
}

/// Twilio's structured API error body
#[derive(Debug, Deserialize)]
struct TwilioApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl TwilioAdapter {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        callbacks: CallbackUrls,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(ORIGINATE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            callbacks,
            api_base: TWILIO_API_BASE.to_string(),
        }
    }

    /// Point the adapter at a different API root (tests)
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn call_create_url(&self) -> String {
        format!("{}/2010-04-01/Accounts/{}/Calls.json", self.api_base, self.account_sid)
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl TelephonyAdapter for TwilioAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Twilio
    }

    async fn originate(&self, request: &OriginateRequest) -> Result<OriginateResponse> {
        let answer_url = self.callbacks.answer_url(ProviderKind::Twilio, request.call_uuid);
        let hangup_url = self.callbacks.hangup_url(ProviderKind::Twilio, request.call_uuid);
        let recording_url = self.callbacks.recording_url(ProviderKind::Twilio, request.call_uuid);

        // Repeated StatusCallbackEvent params subscribe us to the ring and
        // answer transitions as well as the terminal one.
        let form: Vec<(&str, String)> = vec![
            ("To", request.to.clone()),
            ("From", request.from.clone()),
            ("Url", answer_url),
            ("Method", "POST".to_string()),
            ("StatusCallback", hangup_url),
            ("StatusCallbackMethod", "POST".to_string()),
            ("StatusCallbackEvent", "initiated".to_string()),
            ("StatusCallbackEvent", "ringing".to_string()),
            ("StatusCallbackEvent", "answered".to_string()),
            ("StatusCallbackEvent", "completed".to_string()),
            ("Record", "true".to_string()),
            ("RecordingStatusCallback", recording_url),
        ];

        debug!("📞 Twilio call create: {} -> {}", request.from, request.to);

        let resp = self
            .http
            .post(self.call_create_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let err: TwilioApiError = resp
                .json()
                .await
                .unwrap_or(TwilioApiError { code: 0, message: String::new() });
            return Err(ProviderError::Rejected {
                code: status.as_u16(),
                message: if err.message.is_empty() {
                    format!("call create rejected (code {})", err.code)
                } else {
                    err.message
                },
            });
        }

        let created: TwilioCallCreated = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidPayload(e.to_string()))?;

        Ok(OriginateResponse {
            call_uuid: request.call_uuid,
            provider_call_id: created.sid,
        })
    }

    fn generate_instructions(&self, ctx: &InstructionContext) -> InstructionDoc {
        let mut params = String::new();
        params.push_str(&format!(
            "            <Parameter name=\"call_uuid\" value=\"{}\"/>\n",
            ctx.call_uuid
        ));
        for (k, v) in &ctx.variables {
            let v = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            params.push_str(&format!(
                "            <Parameter name=\"{}\" value=\"{}\"/>\n",
                xml_escape(k),
                xml_escape(&v)
            ));
        }

        let body = format!(
            "<Response>\n    <Connect>\n        <Stream url=\"{}\">\n{}        </Stream>\n    </Connect>\n</Response>",
            xml_escape(&ctx.bot_ws_url),
            params,
        );

        InstructionDoc { content_type: "application/xml", body }
    }

    fn classify_status(&self, provider_status: &str) -> CallPhase {
        match provider_status.to_ascii_lowercase().as_str() {
            "queued" | "initiated" => CallPhase::Processed,
            "ringing" => CallPhase::Ringing,
            "in-progress" | "answered" => CallPhase::Ongoing,
            "completed" => CallPhase::Completed,
            "busy" | "failed" | "no-answer" | "canceled" => CallPhase::Failed,
            other => {
                debug!("unrecognized Twilio status '{}', treating as processed", other);
                CallPhase::Processed
            }
        }
    }

    fn parse_hangup(&self, payload: &serde_json::Value) -> Result<RawHangupEvent> {
        if !payload.is_object() {
            return Err(ProviderError::InvalidPayload("hangup payload is not an object".into()));
        }
        Ok(RawHangupEvent {
            call_uuid: field_uuid(payload, &["call_uuid", "CallUuid", "callUUID"]),
            provider_call_id: field_str(payload, &["CallSid", "callSid"]),
            from: field_str(payload, &["From", "from"]),
            to: field_str(payload, &["To", "to"]),
            duration: field_str(payload, &["CallDuration", "Duration", "duration"]),
            status: field_str(payload, &["CallStatus", "callStatus", "status"]),
            hangup_cause: field_str(payload, &["HangupCause", "hangupCause"]),
            sip_code: field_str(payload, &["SipResponseCode", "SipCode"])
                .and_then(|s| s.parse().ok()),
            start_time: field_str(payload, &["StartTime", "startTime"]),
            answer_time: field_str(payload, &["AnswerTime", "answerTime"]),
            end_time: field_str(payload, &["EndTime", "Timestamp", "endTime"]),
            recording_url: field_str(payload, &["RecordingUrl", "recordingUrl"]),
        })
    }

    fn parse_recording(&self, payload: &serde_json::Value) -> Result<RawRecordingEvent> {
        let recording_url = field_str(payload, &["RecordingUrl", "recordingUrl"])
            .ok_or_else(|| ProviderError::InvalidPayload("recording callback without url".into()))?;
        Ok(RawRecordingEvent {
            call_uuid: field_uuid(payload, &["call_uuid", "CallUuid", "callUUID"]),
            provider_call_id: field_str(payload, &["CallSid", "callSid"]),
            recording_url,
            duration: field_str(payload, &["RecordingDuration", "Duration"]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn adapter() -> TwilioAdapter {
        TwilioAdapter::new(
            "ACxxxx",
            "token",
            CallbackUrls::new("https://calls.example.com").unwrap(),
        )
    }

    #[test]
    fn classify_covers_twilio_statuses() {
        let a = adapter();
        assert_eq!(a.classify_status("queued"), CallPhase::Processed);
        assert_eq!(a.classify_status("ringing"), CallPhase::Ringing);
        assert_eq!(a.classify_status("in-progress"), CallPhase::Ongoing);
        assert_eq!(a.classify_status("completed"), CallPhase::Completed);
        assert_eq!(a.classify_status("busy"), CallPhase::Failed);
        assert_eq!(a.classify_status("canceled"), CallPhase::Failed);
    }

    #[test]
    fn parse_hangup_prefers_call_duration() {
        let a = adapter();
        let payload = serde_json::json!({
            "CallSid": "CA123",
            "CallStatus": "completed",
            "CallDuration": "58",
            "From": "+14155550100",
            "To": "+14155550101",
        });
        let event = a.parse_hangup(&payload).unwrap();
        assert_eq!(event.provider_call_id.as_deref(), Some("CA123"));
        assert_eq!(event.duration.as_deref(), Some("58"));
        assert!(event.call_uuid.is_none());
    }

    #[test]
    fn twiml_connects_stream_with_parameters() {
        let a = adapter();
        let id = Uuid::new_v4();
        let mut variables = serde_json::Map::new();
        variables.insert("first_name".into(), serde_json::Value::String("Asha".into()));

        let doc = a.generate_instructions(&InstructionContext {
            call_uuid: id,
            bot_ws_url: "wss://bot.example.com/chat/v2/asst-9".into(),
            variables,
        });

        assert!(doc.body.contains("<Connect>"));
        assert!(doc.body.contains("wss://bot.example.com/chat/v2/asst-9"));
        assert!(doc.body.contains(&id.to_string()));
        assert!(doc.body.contains("first_name"));
    }
}
