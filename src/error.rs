//! Error types for the Azure Disk operator
//!
//! Provides structured error types for platform detection, template
//! rendering, configuration synchronization and the apply engine.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Write conflict on {kind}/{name}: object was modified concurrently")]
    Conflict { kind: String, name: String },

    // =========================================================================
    // Platform Detection Errors
    // =========================================================================
    #[error("Platform detection failed: {reason}")]
    Detection { reason: String },

    // =========================================================================
    // Template Errors
    // =========================================================================
    #[error("Asset not found: {name}")]
    AssetNotFound { name: String },

    #[error("Invalid template {name}: {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("Image reference for placeholder {placeholder} is empty")]
    MissingImageReference { placeholder: String },

    #[error("Secret {namespace}/{name} is not cached yet")]
    SecretNotFound { namespace: String, name: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Conflict { .. } => ErrorAction::RequeueWithBackoff,

            // Informer cache warming up - retry soon
            Error::SecretNotFound { .. } => ErrorAction::RequeueAfter(Duration::from_secs(5)),

            // Startup and configuration errors - don't retry automatically
            Error::Detection { .. }
            | Error::Configuration(_)
            | Error::MissingImageReference { .. }
            | Error::AssetNotFound { .. }
            | Error::InvalidTemplate { .. } => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Detection { .. })
    }

    /// Check if this error stems from operator configuration rather than the cluster
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::MissingImageReference { .. }
                | Error::AssetNotFound { .. }
                | Error::InvalidTemplate { .. }
        )
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
