use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A business error reported by the host in an acknowledgment envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    /// Machine-readable error code (e.g. `DOC_NOT_FOUND`)
    #[serde(default)]
    pub name: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl HostError {
    /// Build a host error from a code and a message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Unified error type for cosync operations
#[derive(Debug, Error)]
pub enum CosyncError {
    // Channel errors
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Host rejected join of space '{space}': {reason}")]
    JoinRejected { space: String, reason: HostError },

    #[error("Host rejected update for doc '{doc_id}': {reason}")]
    PushRejected { doc_id: String, reason: HostError },

    #[error("Failed to load doc '{doc_id}': {reason}")]
    DocumentLoad { doc_id: String, reason: HostError },

    #[error("Doc '{0}' has been deleted")]
    DocumentDeleted(String),

    #[error("No acknowledgment for '{operation}' within {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Malformed host response: {0}")]
    Protocol(String),

    // Document model errors
    #[error("Canvas element '{0}' not found")]
    ElementNotFound(String),

    #[error("Invalid canvas element: {0}")]
    InvalidElement(String),

    #[error("Block '{0}' not found")]
    BlockNotFound(String),

    #[error("Block '{0}' has no parent")]
    ParentMissing(String),

    #[error("Folder '{0}' not found")]
    FolderNotFound(String),

    #[error("CRDT error: {0}")]
    Crdt(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Config errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Result type alias for cosync operations
pub type Result<T> = std::result::Result<T, CosyncError>;

/// A serializable representation of CosyncError for facade layers
/// (REST, CLI, agent tools) that forward typed errors.
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Host error code, when the host reported one
    pub code: Option<String>,
}

impl From<&CosyncError> for SerializableError {
    fn from(err: &CosyncError) -> Self {
        let kind = match err {
            CosyncError::Connection(_) => "Connection",
            CosyncError::NotConnected => "NotConnected",
            CosyncError::JoinRejected { .. } => "JoinRejected",
            CosyncError::PushRejected { .. } => "PushRejected",
            CosyncError::DocumentLoad { .. } => "DocumentLoad",
            CosyncError::DocumentDeleted(_) => "DocumentDeleted",
            CosyncError::Timeout { .. } => "Timeout",
            CosyncError::Protocol(_) => "Protocol",
            CosyncError::ElementNotFound(_) => "ElementNotFound",
            CosyncError::InvalidElement(_) => "InvalidElement",
            CosyncError::BlockNotFound(_) => "BlockNotFound",
            CosyncError::ParentMissing(_) => "ParentMissing",
            CosyncError::FolderNotFound(_) => "FolderNotFound",
            CosyncError::Crdt(_) => "Crdt",
            CosyncError::Json(_) => "Json",
            CosyncError::Io(_) => "Io",
            CosyncError::ConfigParse(_) => "ConfigParse",
            CosyncError::ConfigSerialize(_) => "ConfigSerialize",
            CosyncError::NoConfigDir => "NoConfigDir",
        }
        .to_string();

        let code = match err {
            CosyncError::JoinRejected { reason, .. }
            | CosyncError::PushRejected { reason, .. }
            | CosyncError::DocumentLoad { reason, .. } => Some(reason.name.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            code,
        }
    }
}

impl From<CosyncError> for SerializableError {
    fn from(err: CosyncError) -> Self {
        SerializableError::from(&err)
    }
}

impl CosyncError {
    /// Convert to a serializable representation for facade layers
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }

    /// Whether the host (rather than the channel) refused the request.
    pub fn is_host_rejection(&self) -> bool {
        matches!(
            self,
            CosyncError::JoinRejected { .. }
                | CosyncError::PushRejected { .. }
                | CosyncError::DocumentLoad { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializable_carries_host_code() {
        let err = CosyncError::PushRejected {
            doc_id: "doc1".to_string(),
            reason: HostError::new("ACCESS_DENIED", "read only"),
        };
        let ser = err.to_serializable();
        assert_eq!(ser.kind, "PushRejected");
        assert_eq!(ser.code.as_deref(), Some("ACCESS_DENIED"));
        assert!(ser.message.contains("doc1"));
        assert!(err.is_host_rejection());
    }

    #[test]
    fn test_timeout_is_not_a_rejection() {
        let err = CosyncError::Timeout {
            operation: "space:join".to_string(),
            after: Duration::from_millis(10),
        };
        assert!(!err.is_host_rejection());
        assert_eq!(err.to_serializable().code, None);
    }
}
