//! Unified error types for Foreman

use thiserror::Error;

use crate::FeatureStatus;

/// Unified error type for all Foreman operations
#[derive(Error, Debug)]
pub enum ForemanError {
    // Resolver errors
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    // Store errors
    #[error("Invalid transition for feature {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: FeatureStatus,
        to: FeatureStatus,
    },

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Invalid feature: {0}")]
    InvalidFeature(String),

    // Workspace errors
    #[error("Workspace unavailable: {0}")]
    WorkspaceUnavailable(String),

    #[error("Git command failed: {0}")]
    Git(String),

    // Provider errors
    #[error("Provider transport error: {0}")]
    ProviderTransport(String),

    #[error("Max turns reached: {0}")]
    MaxTurnsReached(String),

    #[error("Structured output retries exhausted: {0}")]
    StructuredOutputExhausted(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // Loop errors
    #[error("Auto loop already running for {0}")]
    LoopAlreadyRunning(String),

    #[error("No auto loop running for {0}")]
    LoopNotRunning(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl ForemanError {
    /// Whether the error came from talking to an agent backend
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::ProviderTransport(_)
                | Self::MaxTurnsReached(_)
                | Self::StructuredOutputExhausted(_)
                | Self::Auth(_)
        )
    }
}

/// Result type alias using ForemanError
pub type Result<T> = std::result::Result<T, ForemanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_members() {
        let err = ForemanError::CycleDetected(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = ForemanError::InvalidTransition {
            id: "f-1".into(),
            from: FeatureStatus::Verified,
            to: FeatureStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for feature f-1: verified -> running"
        );
    }

    #[test]
    fn test_provider_error_classification() {
        assert!(ForemanError::MaxTurnsReached("x".into()).is_provider_error());
        assert!(!ForemanError::Git("x".into()).is_provider_error());
    }
}
