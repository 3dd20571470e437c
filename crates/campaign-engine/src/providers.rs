//! Provider adapter registry
//!
//! Holds one adapter per configured provider behind the shared capability
//! trait. Built from credentials at engine construction; tests inject
//! scripted adapters through [`ProviderRegistry::insert`].

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use dialwave_telephony::{
    CallbackUrls, PlivoAdapter, ProviderError, ProviderKind, TelephonyAdapter, TwilioAdapter,
};

use crate::config::ProvidersConfig;
use crate::error::{EngineError, Result};

pub struct ProviderRegistry {
    adapters: DashMap<ProviderKind, Arc<dyn TelephonyAdapter>>,
    default: ProviderKind,
}

impl ProviderRegistry {
    /// Build adapters for every provider with configured credentials
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let registry = Self {
            adapters: DashMap::new(),
            default: config.default_provider,
        };

        let callbacks = CallbackUrls::new(&config.callback_base_url)
            .map_err(|e| EngineError::configuration(e.to_string()))?;

        if let Some(plivo) = &config.plivo {
            registry.insert(Arc::new(PlivoAdapter::new(
                plivo.auth_id.clone(),
                plivo.auth_token.clone(),
                callbacks.clone(),
            )));
            info!("✅ Plivo adapter configured");
        }

        if let Some(twilio) = &config.twilio {
            registry.insert(Arc::new(TwilioAdapter::new(
                twilio.account_sid.clone(),
                twilio.auth_token.clone(),
                callbacks.clone(),
            )));
            info!("✅ Twilio adapter configured");
        }

        Ok(registry)
    }

    /// Register (or replace) an adapter
    pub fn insert(&self, adapter: Arc<dyn TelephonyAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Adapter for a provider; `None` selects the configured default
    pub fn get(&self, kind: Option<ProviderKind>) -> Result<Arc<dyn TelephonyAdapter>> {
        let kind = kind.unwrap_or(self.default);
        self.adapters
            .get(&kind)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                EngineError::Provider(ProviderError::CredentialsMissing(kind.to_string()))
            })
    }

    pub fn default_kind(&self) -> ProviderKind {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlivoConfig;

    #[test]
    fn unconfigured_provider_is_credentials_missing() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default()).unwrap();
        let err = registry.get(Some(ProviderKind::Twilio)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Provider(ProviderError::CredentialsMissing(_))
        ));
    }

    #[test]
    fn configured_provider_resolves() {
        let config = ProvidersConfig {
            plivo: Some(PlivoConfig {
                auth_id: "MA_TEST".to_string(),
                auth_token: "token".to_string(),
            }),
            ..ProvidersConfig::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();

        // explicit and default selection both land on plivo
        assert_eq!(registry.get(Some(ProviderKind::Plivo)).unwrap().kind(), ProviderKind::Plivo);
        assert_eq!(registry.get(None).unwrap().kind(), ProviderKind::Plivo);
    }
}
