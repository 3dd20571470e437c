//! Concurrency admission control
//!
//! Enforces the per-tenant and global concurrent-call caps. The reservation
//! itself is the store's transactional count-then-insert; this module adds
//! the waiting behavior: cooperative backoff until a slot frees up, bounded
//! by the admission timeout. A reservation that times out reports which cap
//! was saturated so the runner can distinguish a busy tenant from a
//! saturated fleet.

use std::time::Instant;
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::database::{CallReservation, ReservationOutcome, Store};
use crate::error::{EngineError, Result};

pub struct AdmissionController {
    store: Store,
    limits: LimitsConfig,
}

impl AdmissionController {
    pub fn new(store: Store, limits: LimitsConfig) -> Self {
        Self { store, limits }
    }

    /// Tenant cap, falling back to the configured default when the tenant
    /// record carries none sensible
    pub fn tenant_cap(&self, tenant_max: i64) -> i64 {
        if tenant_max > 0 {
            tenant_max
        } else {
            self.limits.default_tenant_max_concurrent_calls
        }
    }

    /// Reserve a slot, waiting up to the admission timeout.
    ///
    /// On success the active-call row exists with status `processed` and the
    /// caller owns the slot until the call reaches a terminal phase. On
    /// timeout the last observed saturation decides the error kind.
    pub async fn admit(&self, reservation: &CallReservation, tenant_max: i64) -> Result<()> {
        let tenant_cap = self.tenant_cap(tenant_max);
        let global_cap = self.limits.global_max_calls;
        let deadline = Instant::now() + self.limits.admission_timeout;

        loop {
            let outcome = self
                .store
                .try_reserve_call(reservation, tenant_cap, global_cap)
                .await
                .map_err(EngineError::database)?;

            match outcome {
                ReservationOutcome::Reserved => return Ok(()),
                ReservationOutcome::TenantSaturated { active, cap } => {
                    if Instant::now() >= deadline {
                        warn!(
                            "⏳ admission timed out for tenant {} ({active}/{cap})",
                            reservation.tenant_id
                        );
                        return Err(EngineError::OverloadedTenant {
                            tenant_id: reservation.tenant_id.clone(),
                            active,
                            cap,
                        });
                    }
                    debug!(
                        "tenant {} saturated ({active}/{cap}), waiting",
                        reservation.tenant_id
                    );
                }
                ReservationOutcome::GlobalSaturated { active, cap } => {
                    if Instant::now() >= deadline {
                        warn!("⏳ admission timed out globally ({active}/{cap})");
                        return Err(EngineError::OverloadedGlobal { active, cap });
                    }
                    debug!("global capacity saturated ({active}/{cap}), waiting");
                }
            }

            tokio::time::sleep(self.limits.admission_retry_delay).await;
        }
    }
}
