// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Failure classes map directly onto recovery behaviour:
//   - ProviderUnavailable / MalformedPayload  => try the next provider, then
//     fall back to synthetic data. Never fatal.
//   - Protocol / UnknownConnection            => the operation is rejected;
//     other connections are unaffected.
//   - Config                                  => fatal, but only at startup.

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The provider could not serve this request (network failure, HTTP
    /// error status, timeout, symbol not found). Signals "try the next
    /// provider" to the acquisition loop.
    #[error("provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// The provider responded but the payload did not parse. Treated exactly
    /// like [`FeedError::ProviderUnavailable`] for the current tick.
    #[error("malformed payload from {provider}: {detail}")]
    MalformedPayload { provider: String, detail: String },

    /// The connection violated the protocol (e.g. operations on a closed
    /// connection).
    #[error("protocol error on connection {0}: {1}")]
    Protocol(Uuid, String),

    /// The referenced connection id is not registered.
    #[error("unknown connection {0}")]
    UnknownConnection(Uuid),

    /// Invalid engine configuration. The only fatal variant, and only at
    /// startup (e.g. no providers configured at all).
    #[error("configuration error: {0}")]
    Config(String),
}

impl FeedError {
    /// Classify errors the acquisition loop recovers from by moving on to
    /// the next provider.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. } | Self::MalformedPayload { .. }
        )
    }
}
