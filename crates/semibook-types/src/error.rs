//! Error types for semibook operations

use crate::{BlockNumber, OfferId};
use thiserror::Error;

/// Main error type for semibook operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SemibookError {
    // === Collaborator Errors ===
    /// A read against the chain provider failed
    #[error("Provider error during {operation}: {message}")]
    Provider { operation: String, message: String },

    /// Internal channel was closed unexpectedly
    #[error("Internal channel closed unexpectedly")]
    ChannelClosed,

    // === Lifecycle Errors ===
    /// Operation requires an initialized semibook
    #[error("Semibook is not initialized")]
    NotInitialized,

    /// Semibook was disconnected from its log stream
    #[error("Semibook is disconnected")]
    Disconnected,

    /// Block production kept racing the semibook's initialization
    #[error("Registration gave up after {attempts} attempts: chain head moved during initialization")]
    RegistrationRace { attempts: u32 },

    /// A rollback target could not be restored from retained state
    #[error("Cannot roll back to block {block}: no state retained")]
    RollbackUnavailable { block: BlockNumber },

    // === Data Errors ===
    /// Reconstructed offer would have zero base volume
    #[error("Offer {id} has zero base volume")]
    ZeroVolume { id: OfferId },

    /// Offer record violates a structural invariant
    #[error("Invalid offer {id}: {reason}")]
    InvalidOffer { id: OfferId, reason: String },

    // === Decoding Errors ===
    /// Log name passed the filter but is not a known offer-list event
    #[error("Unknown event kind: {name}")]
    UnknownEvent { name: String },

    /// Log arguments could not be decoded
    #[error("Failed to decode {event}: {message}")]
    Decode { event: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SemibookError {
    /// Returns true if this error is potentially recoverable via retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::RegistrationRace { .. } | Self::ChannelClosed
        )
    }

    /// Returns true if the semibook must be rebuilt from a fresh snapshot
    pub fn requires_reinitialize(&self) -> bool {
        matches!(self, Self::RollbackUnavailable { .. } | Self::NotInitialized)
    }

    /// Returns true if this error signals a programming or decoder mismatch
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownEvent { .. } | Self::Decode { .. } | Self::Configuration(_)
        )
    }

    /// Create a provider error
    pub fn provider(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Create a decode error
    pub fn decode(event: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            event: event.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for semibook operations
pub type SemibookResult<T> = Result<T, SemibookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let err = SemibookError::provider("chain_head", "connection reset");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Provider error during chain_head: connection reset");

        let err = SemibookError::ZeroVolume { id: 3 };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_fatal() {
        let err = SemibookError::UnknownEvent {
            name: "OfferTeleport".into(),
        };
        assert!(err.is_fatal());

        let err = SemibookError::decode("OfferWrite", "missing field `id`");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_requires_reinitialize() {
        assert!(SemibookError::RollbackUnavailable { block: 10 }.requires_reinitialize());
        assert!(!SemibookError::Disconnected.requires_reinitialize());
    }
}
