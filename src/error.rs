//! Error types for the DBHub operator.

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T, E = OperatorError> = std::result::Result<T, E>;

/// Errors produced by the reconcilers and their helpers
#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Referenced credentials Secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    /// Referenced credentials Secret is missing a required key
    #[error("secret {namespace}/{name} does not contain key {key}")]
    SecretKeyMissing {
        namespace: String,
        name: String,
        key: String,
    },

    /// Database type has no driver mapping
    #[error("unsupported database type: {0}")]
    UnsupportedType(String),

    /// Connectivity probe failed (open, ping, or deadline)
    #[error("connection test failed: {0}")]
    ConnectionTest(String),

    /// Resource spec is missing something the reconciler needs
    #[error("invalid resource spec: {0}")]
    InvalidSpec(String),

    /// Database selector could not be resolved
    #[error("selector resolution failed: {0}")]
    SelectorError(String),

    /// Gateway config could not be rendered
    #[error("config render failed: {0}")]
    RenderError(String),
}

impl OperatorError {
    /// Short machine-readable reason for status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            OperatorError::KubeError(_) => "KubeError",
            OperatorError::SerializationError(_) => "SerializationError",
            OperatorError::SecretNotFound { .. } => "SecretNotFound",
            OperatorError::SecretKeyMissing { .. } => "SecretKeyMissing",
            OperatorError::UnsupportedType(_) => "UnsupportedType",
            OperatorError::ConnectionTest(_) => "ConnectionFailed",
            OperatorError::InvalidSpec(_) => "InvalidSpec",
            OperatorError::SelectorError(_) => "SelectorError",
            OperatorError::RenderError(_) => "RenderError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = OperatorError::SecretNotFound {
            namespace: "default".into(),
            name: "pg-creds".into(),
        };
        assert_eq!(err.to_string(), "secret default/pg-creds not found");
        assert_eq!(err.reason(), "SecretNotFound");
    }

    #[test]
    fn test_secret_key_missing_names_the_key() {
        let err = OperatorError::SecretKeyMissing {
            namespace: "prod".into(),
            name: "creds".into(),
            key: "password".into(),
        };
        assert!(err.to_string().contains("password"));
        assert_eq!(err.reason(), "SecretKeyMissing");
    }
}
