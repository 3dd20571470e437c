//! Provider webhook processing
//!
//! Every inbound callback lands here after the transport collaborator has
//! authenticated it and decoded the form body into a JSON object. Callbacks
//! are fully concurrent and may arrive in any order; safety comes from the
//! store's guarded phase transitions and the idempotent hangup insert. A
//! duplicate hangup is a success response with `Duplicate` reported, never
//! an error.
//!
//! The authoritative `call_uuid` normally rides in the callback URL's query
//! string. When a payload arrives without it (some provider retries, inbound
//! calls we never originated) the processor falls back to the payload's own
//! id and then to the provider-id lookup table; inbound calls derive a
//! deterministic id from the provider id so retries converge.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dialwave_telephony::{
    normalize_hangup, CallContext, CallPhase, InstructionContext, InstructionDoc, ProviderKind,
    RawHangupEvent,
};

use crate::billing::BillingEngine;
use crate::database::billing::NewHangupRecord;
use crate::database::tenants::caller_number_variants;
use crate::database::Store;
use crate::error::{EngineError, Result};
use crate::orchestrator::types::CAMPAIGN_INCOMING;
use crate::providers::ProviderRegistry;

/// What a webhook delivery amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Terminal record written (and billing attempted)
    Recorded { billed: bool },
    /// Hangup already processed for this call
    Duplicate,
    /// Non-terminal status advanced (or was already past this phase)
    PhaseUpdated(CallPhase),
    /// Recording arrived before its hangup and was parked
    Parked,
    /// Payload could not be tied to any call or tenant
    Unmatched,
}

pub struct CallbackProcessor {
    store: Store,
    billing: Arc<BillingEngine>,
    providers: Arc<ProviderRegistry>,
}

impl CallbackProcessor {
    pub fn new(store: Store, billing: Arc<BillingEngine>, providers: Arc<ProviderRegistry>) -> Self {
        Self { store, billing, providers }
    }

    /// Resolve the authoritative call id: callback URL query first, then the
    /// payload's own id, then the provider-id map.
    async fn resolve_call_uuid(
        &self,
        query_uuid: Option<Uuid>,
        payload_uuid: Option<Uuid>,
        provider_call_id: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(id) = query_uuid.or(payload_uuid) {
            return Ok(Some(id.to_string()));
        }
        if let Some(provider_id) = provider_call_id {
            return self
                .store
                .lookup_call_uuid(provider_id)
                .await
                .map_err(EngineError::database);
        }
        Ok(None)
    }

    /// Ring callback: the far end started ringing
    pub async fn handle_ring(&self, query_uuid: Option<Uuid>) -> Result<WebhookOutcome> {
        let Some(call_uuid) = query_uuid else {
            return Ok(WebhookOutcome::Unmatched);
        };
        self.store
            .mark_call_ringing(&call_uuid.to_string())
            .await
            .map_err(EngineError::database)?;
        Ok(WebhookOutcome::PhaseUpdated(CallPhase::Ringing))
    }

    /// Answer callback: the provider asks for call-time instructions. Marks
    /// the media stream as started and returns the instruction document.
    pub async fn answer_instructions(
        &self,
        provider: ProviderKind,
        call_uuid: Uuid,
    ) -> Result<InstructionDoc> {
        let call = self
            .store
            .get_active_call(&call_uuid.to_string())
            .await
            .map_err(EngineError::database)?
            .ok_or_else(|| EngineError::CallNotFound(call_uuid.to_string()))?;

        self.store
            .mark_call_ongoing(&call.call_uuid)
            .await
            .map_err(EngineError::database)?;

        let adapter = self.providers.get(Some(provider))?;
        let doc = adapter.generate_instructions(&InstructionContext {
            call_uuid,
            bot_ws_url: call.bot_ws_url.clone().unwrap_or_default(),
            variables: call.contact_meta(),
        });

        debug!("📋 instructions generated for call {}", call_uuid);
        Ok(doc)
    }

    /// Stream-start / answered status callback without an instruction fetch
    pub async fn handle_stream_start(&self, query_uuid: Option<Uuid>) -> Result<WebhookOutcome> {
        let Some(call_uuid) = query_uuid else {
            return Ok(WebhookOutcome::Unmatched);
        };
        self.store
            .mark_call_ongoing(&call_uuid.to_string())
            .await
            .map_err(EngineError::database)?;
        Ok(WebhookOutcome::PhaseUpdated(CallPhase::Ongoing))
    }

    /// Hangup / status callback. Providers that multiplex every status change
    /// onto one URL land here too: non-terminal phases advance the active
    /// call and return, terminal ones run the full hangup pipeline.
    pub async fn handle_hangup(
        &self,
        provider: ProviderKind,
        query_uuid: Option<Uuid>,
        payload: &serde_json::Value,
    ) -> Result<WebhookOutcome> {
        let adapter = self.providers.get(Some(provider))?;
        let raw = adapter.parse_hangup(payload)?;

        let phase = raw
            .status
            .as_deref()
            .map(|s| adapter.classify_status(s))
            .unwrap_or(CallPhase::CallEnded);

        let resolved = self
            .resolve_call_uuid(query_uuid, raw.call_uuid, raw.provider_call_id.as_deref())
            .await?;

        // intermediate phases multiplexed onto the hangup URL
        match phase {
            CallPhase::Processed => return Ok(WebhookOutcome::PhaseUpdated(phase)),
            CallPhase::Ringing => {
                if let Some(id) = &resolved {
                    self.store.mark_call_ringing(id).await.map_err(EngineError::database)?;
                }
                return Ok(WebhookOutcome::PhaseUpdated(phase));
            }
            CallPhase::Ongoing => {
                if let Some(id) = &resolved {
                    self.store.mark_call_ongoing(id).await.map_err(EngineError::database)?;
                }
                return Ok(WebhookOutcome::PhaseUpdated(phase));
            }
            CallPhase::CallEnded | CallPhase::Completed | CallPhase::Failed => {}
        }

        let (ctx, known_call) = match &resolved {
            Some(id) => match self
                .store
                .get_active_call(id)
                .await
                .map_err(EngineError::database)?
            {
                Some(call) => {
                    let ctx = CallContext {
                        call_uuid: Uuid::parse_str(&call.call_uuid)
                            .unwrap_or_else(|_| Uuid::new_v4()),
                        tenant_id: call.tenant_id.clone(),
                        campaign_id: call.campaign_id.clone(),
                        assistant_id: call.assistant_id.clone(),
                        provider,
                        contact_meta: call.contact_meta(),
                    };
                    (ctx, true)
                }
                None => match self.inbound_context(provider, &raw).await? {
                    Some(ctx) => (ctx, false),
                    None => return Ok(WebhookOutcome::Unmatched),
                },
            },
            None => match self.inbound_context(provider, &raw).await? {
                Some(ctx) => (ctx, false),
                None => return Ok(WebhookOutcome::Unmatched),
            },
        };

        if known_call {
            self.store
                .mark_call_ended(&ctx.call_uuid.to_string())
                .await
                .map_err(EngineError::database)?;
        }

        let mut normalized = normalize_hangup(&raw, &ctx);

        // a recording callback may have raced ahead of the hangup
        if normalized.recording_url.is_none() {
            normalized.recording_url = self
                .store
                .take_pending_recording(&normalized.call_uuid.to_string())
                .await
                .map_err(EngineError::database)?;
        }

        let inserted = self
            .store
            .insert_hangup_record(&NewHangupRecord {
                call_uuid: normalized.call_uuid.to_string(),
                tenant_id: normalized.tenant_id.clone(),
                campaign_id: normalized.campaign_id.clone(),
                assistant_id: normalized.assistant_id.clone(),
                from_number: normalized.from.clone(),
                to_number: normalized.to.clone(),
                duration: normalized.duration,
                status: normalized.status.clone(),
                hangup_cause: normalized.hangup_cause.clone(),
                start_time: normalized.start_time.clone(),
                answer_time: normalized.answer_time.clone(),
                end_time: normalized.end_time.clone(),
                recording_url: normalized.recording_url.clone(),
                source: normalized.source.as_str().to_string(),
                provider: normalized.provider.as_str().to_string(),
                contact_meta: serde_json::Value::Object(normalized.contact_meta.clone())
                    .to_string(),
            })
            .await
            .map_err(EngineError::database)?;

        if !inserted {
            info!("🔁 duplicate hangup for call {}, dropped", normalized.call_uuid);
            return Ok(WebhookOutcome::Duplicate);
        }

        // Billing runs before the active call goes terminal: the campaign
        // aggregate gates on no in-flight calls remaining, so the debit must
        // be visible first. Billing trouble must not take the hangup record
        // down with it; a failed debit is retryable later from the absent
        // billing detail.
        let billed = match self.billing.bill_call(&normalized).await {
            Ok(_) => true,
            Err(e) => {
                warn!("billing for call {} failed: {}", normalized.call_uuid, e);
                false
            }
        };

        if known_call {
            let final_phase = if normalized.status == "completed" {
                CallPhase::Completed
            } else {
                CallPhase::Failed
            };
            self.store
                .finalize_call(&normalized.call_uuid.to_string(), final_phase)
                .await
                .map_err(EngineError::database)?;
        }

        Ok(WebhookOutcome::Recorded { billed })
    }

    /// Recording callback: attach the URL to the hangup record, or park it
    /// until the hangup lands.
    pub async fn handle_recording(
        &self,
        provider: ProviderKind,
        query_uuid: Option<Uuid>,
        payload: &serde_json::Value,
    ) -> Result<WebhookOutcome> {
        let adapter = self.providers.get(Some(provider))?;
        let raw = adapter.parse_recording(payload)?;

        let resolved = self
            .resolve_call_uuid(query_uuid, raw.call_uuid, raw.provider_call_id.as_deref())
            .await?;
        let Some(call_uuid) = resolved else {
            return Ok(WebhookOutcome::Unmatched);
        };

        let attached = self
            .store
            .set_hangup_recording_url(&call_uuid, &raw.recording_url)
            .await
            .map_err(EngineError::database)?;

        if attached {
            debug!("🎙️ recording attached to call {}", call_uuid);
            Ok(WebhookOutcome::Recorded { billed: false })
        } else {
            self.store
                .park_pending_recording(&call_uuid, &raw.recording_url)
                .await
                .map_err(EngineError::database)?;
            Ok(WebhookOutcome::Parked)
        }
    }

    /// Build the hangup context for a call we never originated: an inbound
    /// call billed to whichever tenant owns the dialed number.
    async fn inbound_context(
        &self,
        provider: ProviderKind,
        raw: &RawHangupEvent,
    ) -> Result<Option<CallContext>> {
        let Some(to) = raw.to.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let tenant = self
            .store
            .find_tenant_by_caller_number(&caller_number_variants(to))
            .await
            .map_err(EngineError::database)?;

        let Some(tenant) = tenant else {
            warn!("hangup for {} matches no tenant, dropped", to);
            return Ok(None);
        };

        // Deterministic id so provider retries converge on one record
        let call_uuid = raw.call_uuid.unwrap_or_else(|| {
            let seed = raw.provider_call_id.clone().unwrap_or_else(|| format!("{to}-inbound"));
            Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
        });

        Ok(Some(CallContext {
            call_uuid,
            tenant_id: tenant.tenant_id,
            campaign_id: CAMPAIGN_INCOMING.to_string(),
            assistant_id: None,
            provider,
            contact_meta: serde_json::Map::new(),
        }))
    }
}
