//! The uniform provider capability interface
//!
//! Every provider implements [`TelephonyAdapter`]; the campaign engine holds
//! adapters as `Arc<dyn TelephonyAdapter>` and never touches provider wire
//! formats directly.

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    CallPhase, InstructionContext, InstructionDoc, OriginateRequest, OriginateResponse,
    ProviderKind, RawHangupEvent, RawRecordingEvent,
};

/// Builder for the webhook URLs encoded into every call-create request.
///
/// The authoritative `call_uuid` rides in the query string of each URL, so a
/// callback can always be correlated even when the provider payload only
/// carries its native id.
#[derive(Debug, Clone)]
pub struct CallbackUrls {
    base: Url,
}

impl CallbackUrls {
    /// `base` is the externally reachable root of the webhook collaborator,
    /// e.g. `https://calls.example.com`
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| crate::ProviderError::InvalidPayload(format!("callback base url: {e}")))?;
        Ok(Self { base })
    }

    fn build(&self, provider: ProviderKind, event: &str, call_uuid: Uuid) -> String {
        let mut url = self.base.clone();
        url.set_path(&format!("webhook/{}/{}", provider.as_str(), event));
        url.query_pairs_mut()
            .append_pair("call_uuid", &call_uuid.to_string());
        url.to_string()
    }

    pub fn answer_url(&self, provider: ProviderKind, call_uuid: Uuid) -> String {
        self.build(provider, "answer", call_uuid)
    }

    pub fn ring_url(&self, provider: ProviderKind, call_uuid: Uuid) -> String {
        self.build(provider, "ring", call_uuid)
    }

    pub fn hangup_url(&self, provider: ProviderKind, call_uuid: Uuid) -> String {
        self.build(provider, "hangup", call_uuid)
    }

    pub fn recording_url(&self, provider: ProviderKind, call_uuid: Uuid) -> String {
        self.build(provider, "recording", call_uuid)
    }
}

/// Uniform contract every telephony provider implements.
///
/// Adapters translate between the engine's provider-agnostic types and their
/// own wire format. They must not retry failed requests; retry policy lives
/// with the campaign runner.
#[async_trait]
pub trait TelephonyAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Issue the provider's call-create API request.
    ///
    /// Must use the caller-supplied `request.call_uuid` as the authoritative
    /// identifier and encode it into all callback URLs. The provider's own id
    /// comes back as `provider_call_id`.
    async fn originate(&self, request: &OriginateRequest) -> Result<OriginateResponse>;

    /// Produce the call-time instruction document the provider fetches from
    /// its answer webhook (start the media stream to the bot, pass template
    /// variables).
    fn generate_instructions(&self, ctx: &InstructionContext) -> InstructionDoc;

    /// Map a provider status string onto the normalized call phase
    fn classify_status(&self, provider_status: &str) -> CallPhase;

    /// Parse a raw hangup webhook payload (form fields decoded into a JSON
    /// object by the transport collaborator)
    fn parse_hangup(&self, payload: &serde_json::Value) -> Result<RawHangupEvent>;

    /// Parse a raw recording webhook payload
    fn parse_recording(&self, payload: &serde_json::Value) -> Result<RawRecordingEvent>;
}

impl std::fmt::Debug for dyn TelephonyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelephonyAdapter")
            .field("kind", &self.kind())
            .finish()
    }
}
