//! Error types for provider operations
//!
//! Adapters never retry on their own; retry policy belongs to the campaign
//! runner. Errors here are therefore classified so the runner can decide
//! whether a failure is fatal for the campaign (`CredentialsMissing`) or only
//! for the one contact (`Rejected`, `Timeout`, `Network`).

use thiserror::Error;

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// No credentials configured for the selected provider. Fatal for the
    /// campaign: no later contact can succeed either.
    #[error("provider credentials missing: {0}")]
    CredentialsMissing(String),

    /// The provider rejected the call-create request.
    #[error("provider rejected call ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// The call-create request did not complete within the adapter timeout.
    #[error("provider request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Transport-level failure talking to the provider.
    #[error("provider network error: {0}")]
    Network(String),

    /// A webhook payload could not be parsed as the provider's wire format.
    #[error("invalid provider payload: {0}")]
    InvalidPayload(String),
}

impl ProviderError {
    /// True when the failure only affects the current contact and the runner
    /// should skip it rather than fail the whole campaign.
    pub fn is_per_call(&self) -> bool {
        !matches!(self, ProviderError::CredentialsMissing(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { seconds: 30 }
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_missing_is_fatal() {
        assert!(!ProviderError::CredentialsMissing("plivo".into()).is_per_call());
        assert!(ProviderError::Rejected { code: 400, message: "bad number".into() }.is_per_call());
        assert!(ProviderError::Timeout { seconds: 30 }.is_per_call());
    }
}
