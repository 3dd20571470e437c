//! Balance update stream
//!
//! Fans out balance deltas to subscribed observers, keyed by tenant. Built
//! on `tokio::sync::broadcast`: delivery is at-most-once per event per
//! observer, a slow observer drops its oldest buffered events (the channel's
//! lag semantics), and there is no replay across disconnects. Observers are
//! expected to re-query the current balance when they (re)connect.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_BUFFER: usize = 64;

/// One balance change notification
#[derive(Debug, Clone, Serialize)]
pub struct BalanceEvent {
    pub tenant_id: String,
    pub balance: i64,
    /// What caused the change (`call`, `campaign`, `topup`, ...)
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-tenant broadcast fan-out of balance events
pub struct BalanceStream {
    senders: DashMap<String, broadcast::Sender<BalanceEvent>>,
    buffer: usize,
}

impl BalanceStream {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self { senders: DashMap::new(), buffer: buffer.max(1) }
    }

    /// Subscribe to one tenant's balance events
    pub fn subscribe(&self, tenant_id: &str) -> broadcast::Receiver<BalanceEvent> {
        self.senders
            .entry(tenant_id.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Publish a balance change; a no-op when nobody is listening
    pub fn publish(&self, tenant_id: &str, balance: i64, reason: &str) {
        if let Some(sender) = self.senders.get(tenant_id) {
            let event = BalanceEvent {
                tenant_id: tenant_id.to_string(),
                balance,
                reason: reason.to_string(),
                timestamp: Utc::now(),
            };
            match sender.send(event) {
                Ok(observers) => debug!("💰 balance {} -> {} ({} observers)", tenant_id, balance, observers),
                Err(_) => {
                    // last observer went away between lookup and send
                }
            }
        }
    }

    /// Drop channels whose observers have all disconnected
    pub fn prune(&self) {
        self.senders.retain(|_, sender| sender.receiver_count() > 0);
    }
}

impl Default for BalanceStream {
    fn default() -> Self {
        Self::new()
    }
}
