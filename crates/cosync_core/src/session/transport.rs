//! Transport seam and wire payloads for the host's request/acknowledgment
//! channel.
//!
//! # Wire Format
//!
//! Every request is a named event carrying a JSON object. The host answers
//! with an acknowledgment envelope:
//!
//! ```text
//! {"data": <event-specific payload>}
//! {"error": {"name": "DOC_NOT_FOUND", "message": "..."}}
//! ```
//!
//! Binary CRDT payloads (updates, state vectors) travel as base64 strings.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SessionContext;
use crate::config::Config;
use crate::error::{CosyncError, HostError, Result};

/// Event names understood by the host.
pub mod events {
    /// Join a space before touching its documents
    pub const JOIN: &str = "space:join";
    /// Leave a previously joined space
    pub const LEAVE: &str = "space:leave";
    /// Fetch a document's missing updates and state vector
    pub const LOAD_DOC: &str = "space:load-doc";
    /// Push a document delta
    pub const PUSH_DOC_UPDATE: &str = "space:push-doc-update";
}

/// Space type for workspace-scoped documents.
pub const SPACE_TYPE_WORKSPACE: &str = "workspace";

/// Host error name for a document that does not exist yet.
pub const DOC_NOT_FOUND: &str = "DOC_NOT_FOUND";

/// A duplex channel that can emit an event and await its acknowledgment.
///
/// Implementations do not enforce timeouts; [`SessionChannel`](super::SessionChannel)
/// bounds every call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Emit `event` with `payload` and return the raw acknowledgment envelope.
    async fn request(&self, event: &str, payload: Value) -> Result<Value>;

    /// Tear the channel down.
    async fn close(&self) -> Result<()>;
}

/// Opens an authenticated [`Transport`] from a session context.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the channel. Fails with [`CosyncError::Connection`] when the
    /// host cannot be reached or refuses the credential.
    async fn open(&self, context: &SessionContext, config: &Config) -> Result<Arc<dyn Transport>>;
}

/// Payload of `space:join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub space_type: String,
    pub space_id: String,
    pub client_version: String,
}

/// Payload of `space:leave`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub space_type: String,
    pub space_id: String,
}

/// Payload of `space:load-doc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadDocRequest {
    pub space_type: String,
    pub space_id: String,
    pub doc_id: String,
    /// Base64 state vector; when present the host only sends what is missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_vector: Option<String>,
}

/// Acknowledgment data of `space:load-doc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadDocAck {
    /// Base64 update carrying everything the requester is missing
    pub missing: String,
    /// Base64 state vector of the host's copy
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Payload of `space:push-doc-update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushDocRequest {
    pub space_type: String,
    pub space_id: String,
    pub doc_id: String,
    /// Base64 update
    pub update: String,
}

/// Acknowledgment data of `space:push-doc-update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushDocAck {
    #[serde(default)]
    pub accepted: Option<bool>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Wrap a payload in an accepting envelope.
pub fn accepted(data: Value) -> Value {
    serde_json::json!({ "data": data })
}

/// Wrap a host error in a rejecting envelope.
pub fn rejected(error: &HostError) -> Value {
    serde_json::json!({ "error": { "name": error.name, "message": error.message } })
}

/// Split an acknowledgment envelope into host data or a host error.
///
/// The outer `Result` fails only for malformed envelopes.
pub fn decode_ack<T: DeserializeOwned>(
    event: &str,
    ack: Value,
) -> Result<std::result::Result<T, HostError>> {
    let Value::Object(mut envelope) = ack else {
        return Err(CosyncError::Protocol(format!(
            "{}: acknowledgment is not an object",
            event
        )));
    };

    if let Some(error) = envelope.remove("error")
        && !error.is_null()
    {
        let host_error: HostError = serde_json::from_value(error)
            .map_err(|e| CosyncError::Protocol(format!("{}: bad error payload: {}", event, e)))?;
        return Ok(Err(host_error));
    }

    let data = envelope.remove("data").unwrap_or(Value::Null);
    serde_json::from_value(data)
        .map(Ok)
        .map_err(|e| CosyncError::Protocol(format!("{}: bad data payload: {}", event, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_accepted_envelope() {
        let ack = json!({"data": {"missing": "AAA=", "state": "AA==", "timestamp": 5}});
        let data: LoadDocAck = decode_ack(events::LOAD_DOC, ack).unwrap().unwrap();
        assert_eq!(data.missing, "AAA=");
        assert_eq!(data.timestamp, Some(5));
    }

    #[test]
    fn test_decode_rejected_envelope() {
        let ack = json!({"error": {"name": "DOC_NOT_FOUND", "message": "nope"}});
        let err = decode_ack::<LoadDocAck>(events::LOAD_DOC, ack)
            .unwrap()
            .unwrap_err();
        assert_eq!(err.name, DOC_NOT_FOUND);
    }

    #[test]
    fn test_decode_missing_data_as_null() {
        let data: Value = decode_ack(events::LEAVE, json!({})).unwrap().unwrap();
        assert!(data.is_null());
    }

    #[test]
    fn test_decode_malformed_envelope() {
        let err = decode_ack::<Value>(events::JOIN, json!("ok")).unwrap_err();
        assert!(matches!(err, CosyncError::Protocol(_)));
    }

    #[test]
    fn test_request_payload_is_camel_case() {
        let req = LoadDocRequest {
            space_type: SPACE_TYPE_WORKSPACE.to_string(),
            space_id: "ws".to_string(),
            doc_id: "doc".to_string(),
            state_vector: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"spaceType": "workspace", "spaceId": "ws", "docId": "doc"})
        );
    }
}
