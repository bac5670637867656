//! Authenticated session against the host's real-time channel.
//!
//! [`SessionChannel`] owns one duplex connection (a [`Transport`]) and exposes
//! the four request/acknowledgment operations the rest of the crate builds
//! on:
//!
//! - [`join`](SessionChannel::join) / [`leave`](SessionChannel::leave) a space
//! - [`load_document`](SessionChannel::load_document) into a [`LoadedDoc`]
//! - [`push`](SessionChannel::push) the delta accumulated on a [`LoadedDoc`]
//!
//! Every call is bounded by the configured request timeout, and a timeout is
//! reported as [`CosyncError::Timeout`], distinct from host rejections.
//!
//! # Lifecycle
//!
//! ```text
//! connect(connector, context, config) ──► ready ──► disconnect() ──► torn down
//!                                          │
//!                                          ├─ join(space)   (remembered)
//!                                          ├─ load_document / push
//!                                          └─ leave(space)  (best-effort)
//! ```
//!
//! The session is an explicit object injected into the engine; joined spaces
//! are tracked on it rather than in process-global state.

mod memory_host;
#[cfg(feature = "native-transport")]
mod socket_io;
mod transport;

pub use memory_host::{MemoryHost, PushRecord};
#[cfg(feature = "native-transport")]
pub use socket_io::{Packet, SocketIoConnector, encode_event, parse_packet, socket_url};
pub use transport::{
    Connector, DOC_NOT_FOUND, JoinRequest, LeaveRequest, LoadDocAck, LoadDocRequest, PushDocAck,
    PushDocRequest, SPACE_TYPE_WORKSPACE, Transport, accepted, decode_ack, events, rejected,
};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact};

use crate::config::Config;
use crate::crdt;
use crate::error::{CosyncError, HostError, Result};

/// Opaque credential material handed over by the credential collaborator.
#[derive(Clone, Default)]
pub struct SessionContext {
    cookie: Option<String>,
    token: Option<String>,
}

impl SessionContext {
    /// A context authenticated by a session cookie header value.
    pub fn with_cookie(cookie: impl Into<String>) -> Self {
        Self {
            cookie: Some(cookie.into()),
            token: None,
        }
    }

    /// A context authenticated by a bearer token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            cookie: None,
            token: Some(token.into()),
        }
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether any credential is present.
    pub fn has_credential(&self) -> bool {
        self.cookie.as_deref().is_some_and(|c| !c.is_empty())
            || self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What to do when the host reports that a document does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    /// Fail with [`CosyncError::DocumentLoad`]
    Fail,
    /// Hand back an empty document that will be created by the first push
    CreateEmpty,
}

/// A document fetched from (or destined for) the host.
///
/// Remembers the state vector it was last synchronized at, so
/// [`SessionChannel::push`] sends exactly the local changes made since.
pub struct LoadedDoc {
    space_id: String,
    doc_id: String,
    doc: Doc,
    base: StateVector,
    missing_update: Vec<u8>,
    host_state: Vec<u8>,
    existed: bool,
    timestamp: Option<i64>,
}

impl LoadedDoc {
    /// Wrap a locally built document that the host has never seen.
    pub fn new(space_id: impl Into<String>, doc_id: impl Into<String>, doc: Doc) -> Self {
        Self {
            space_id: space_id.into(),
            doc_id: doc_id.into(),
            doc,
            base: StateVector::default(),
            missing_update: Vec::new(),
            host_state: Vec::new(),
            existed: false,
            timestamp: None,
        }
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// The underlying yrs document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Whether the host had this document when it was loaded.
    pub fn existed(&self) -> bool {
        self.existed
    }

    /// Raw update the host sent on load.
    pub fn missing_update(&self) -> &[u8] {
        &self.missing_update
    }

    /// Raw state vector the host reported on load.
    pub fn host_state(&self) -> &[u8] {
        &self.host_state
    }

    /// Host timestamp of the load, if reported.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Delta between the synchronized state and the current local state.
    pub fn pending_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&self.base)
    }

    fn mark_synchronized(&mut self) {
        let txn = self.doc.transact();
        self.base = txn.state_vector();
    }
}

impl std::fmt::Debug for LoadedDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedDoc")
            .field("space_id", &self.space_id)
            .field("doc_id", &self.doc_id)
            .field("existed", &self.existed)
            .finish()
    }
}

/// One authenticated duplex channel to the host.
pub struct SessionChannel {
    transport: Arc<dyn Transport>,
    config: Config,
    joined: Mutex<HashSet<String>>,
    connected: AtomicBool,
}

impl SessionChannel {
    /// Establish the channel.
    ///
    /// Fails with [`CosyncError::Connection`] when the context carries no
    /// credential, and with [`CosyncError::Timeout`] when the connector does
    /// not finish within the request timeout.
    pub async fn connect(
        connector: &dyn Connector,
        context: &SessionContext,
        config: Config,
    ) -> Result<Self> {
        if !context.has_credential() {
            return Err(CosyncError::Connection(
                "no credential in session context".to_string(),
            ));
        }

        log::info!("[Session] Connecting to {}", config.endpoint);
        let after = config.request_timeout();
        let transport = tokio::time::timeout(after, connector.open(context, &config))
            .await
            .map_err(|_| CosyncError::Timeout {
                operation: "connect".to_string(),
                after,
            })??;

        Ok(Self::from_transport(transport, config))
    }

    /// Wrap an already established transport.
    pub fn from_transport(transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            transport,
            config,
            joined: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Whether `space_id` has been joined on this session.
    pub fn is_joined(&self, space_id: &str) -> bool {
        self.joined_spaces().contains(space_id)
    }

    fn joined_spaces(&self) -> MutexGuard<'_, HashSet<String>> {
        self.joined.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        event: &str,
        payload: impl Serialize,
    ) -> Result<std::result::Result<T, HostError>> {
        if !self.is_connected() {
            return Err(CosyncError::NotConnected);
        }

        let payload = serde_json::to_value(payload)?;
        let after = self.config.request_timeout();
        log::debug!("[Session] -> {}", event);

        let ack = tokio::time::timeout(after, self.transport.request(event, payload))
            .await
            .map_err(|_| {
                log::warn!("[Session] {} timed out after {:?}", event, after);
                CosyncError::Timeout {
                    operation: event.to_string(),
                    after,
                }
            })??;

        decode_ack(event, ack)
    }

    /// Join a space. Repeated joins of the same space are answered locally.
    pub async fn join(&self, space_id: &str) -> Result<()> {
        if self.is_joined(space_id) {
            return Ok(());
        }

        let request = JoinRequest {
            space_type: SPACE_TYPE_WORKSPACE.to_string(),
            space_id: space_id.to_string(),
            client_version: self.config.client_version.clone(),
        };

        match self.call::<Value>(events::JOIN, request).await? {
            Ok(_) => {
                log::info!("[Session] Joined space {}", space_id);
                self.joined_spaces().insert(space_id.to_string());
                Ok(())
            }
            Err(reason) => Err(CosyncError::JoinRejected {
                space: space_id.to_string(),
                reason,
            }),
        }
    }

    /// Leave a space. Best-effort: failures are logged, never raised.
    pub async fn leave(&self, space_id: &str) {
        self.joined_spaces().remove(space_id);

        let request = LeaveRequest {
            space_type: SPACE_TYPE_WORKSPACE.to_string(),
            space_id: space_id.to_string(),
        };

        match self.call::<Value>(events::LEAVE, request).await {
            Ok(Ok(_)) => log::info!("[Session] Left space {}", space_id),
            Ok(Err(reason)) => log::warn!("[Session] Leave of {} refused: {}", space_id, reason),
            Err(e) => log::warn!("[Session] Leave of {} failed: {}", space_id, e),
        }
    }

    /// Fetch a document.
    ///
    /// When the host reports [`DOC_NOT_FOUND`] and `on_missing` is
    /// [`OnMissing::CreateEmpty`], an empty document is returned instead of
    /// an error.
    pub async fn load_document(
        &self,
        space_id: &str,
        doc_id: &str,
        on_missing: OnMissing,
    ) -> Result<LoadedDoc> {
        let request = LoadDocRequest {
            space_type: SPACE_TYPE_WORKSPACE.to_string(),
            space_id: space_id.to_string(),
            doc_id: doc_id.to_string(),
            state_vector: None,
        };

        match self.call::<LoadDocAck>(events::LOAD_DOC, request).await? {
            Ok(ack) => {
                let missing_update = decode_base64(&ack.missing)?;
                let host_state = match ack.state.as_deref() {
                    Some(state) => decode_base64(state)?,
                    None => Vec::new(),
                };

                let doc = Doc::new();
                if !missing_update.is_empty() {
                    crdt::apply_update(&doc, &missing_update)?;
                }
                log::debug!(
                    "[Session] Loaded {} ({} bytes)",
                    doc_id,
                    missing_update.len()
                );

                let mut loaded = LoadedDoc::new(space_id, doc_id, doc);
                loaded.missing_update = missing_update;
                loaded.host_state = host_state;
                loaded.existed = true;
                loaded.timestamp = ack.timestamp;
                loaded.mark_synchronized();
                Ok(loaded)
            }
            Err(reason) if reason.name == DOC_NOT_FOUND && on_missing == OnMissing::CreateEmpty => {
                log::debug!("[Session] {} not found, starting empty", doc_id);
                Ok(LoadedDoc::new(space_id, doc_id, Doc::new()))
            }
            Err(reason) => Err(CosyncError::DocumentLoad {
                doc_id: doc_id.to_string(),
                reason,
            }),
        }
    }

    /// Push a raw v1 update for a document.
    pub async fn push_update(&self, space_id: &str, doc_id: &str, update: &[u8]) -> Result<()> {
        let request = PushDocRequest {
            space_type: SPACE_TYPE_WORKSPACE.to_string(),
            space_id: space_id.to_string(),
            doc_id: doc_id.to_string(),
            update: BASE64.encode(update),
        };

        log::debug!("[Session] Pushing {} bytes to {}", update.len(), doc_id);
        match self.call::<PushDocAck>(events::PUSH_DOC_UPDATE, request).await? {
            Ok(_) => Ok(()),
            Err(reason) => Err(CosyncError::PushRejected {
                doc_id: doc_id.to_string(),
                reason,
            }),
        }
    }

    /// Push everything changed on `loaded` since it was loaded or last pushed.
    pub async fn push(&self, loaded: &mut LoadedDoc) -> Result<()> {
        let update = loaded.pending_update();
        self.push_update(&loaded.space_id, &loaded.doc_id, &update)
            .await?;
        loaded.mark_synchronized();
        Ok(())
    }

    /// Tear the channel down. Best-effort: failures are logged, never raised.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.joined_spaces().clear();

        if let Err(e) = self.transport.close().await {
            log::warn!("[Session] Disconnect failed: {}", e);
        } else {
            log::info!("[Session] Disconnected");
        }
    }
}

impl std::fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannel")
            .field("endpoint", &self.config.endpoint)
            .field("connected", &self.is_connected())
            .field("joined", &self.joined_spaces().len())
            .finish()
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|e| CosyncError::Protocol(format!("invalid base64 payload: {}", e)))
}

/// Encode a document's state vector for a `space:load-doc` request.
pub fn encode_state_vector(doc: &Doc) -> String {
    let txn = doc.transact();
    BASE64.encode(txn.state_vector().encode_v1())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_WORKSPACE, connect_session};
    use std::time::Duration;
    use yrs::{GetString, Map, Text};

    #[tokio::test]
    async fn test_connect_requires_credential() {
        let host = MemoryHost::new();
        let config = Config::new("memory://host", TEST_WORKSPACE);
        let err = SessionChannel::connect(&host, &SessionContext::default(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, CosyncError::Connection(_)));
    }

    #[tokio::test]
    async fn test_join_is_remembered() {
        let host = MemoryHost::new();
        let session = connect_session(&host).await;

        session.join(TEST_WORKSPACE).await.unwrap();
        session.join(TEST_WORKSPACE).await.unwrap();

        assert!(session.is_joined(TEST_WORKSPACE));
        assert_eq!(host.request_count(events::JOIN), 1);
    }

    #[tokio::test]
    async fn test_join_rejected_carries_reason() {
        let host = MemoryHost::new();
        host.reject_join(TEST_WORKSPACE, HostError::new("SPACE_ACCESS_DENIED", "no"));
        let session = connect_session(&host).await;

        let err = session.join(TEST_WORKSPACE).await.unwrap_err();
        match err {
            CosyncError::JoinRejected { space, reason } => {
                assert_eq!(space, TEST_WORKSPACE);
                assert_eq!(reason.name, "SPACE_ACCESS_DENIED");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!session.is_joined(TEST_WORKSPACE));
    }

    #[tokio::test]
    async fn test_load_missing_doc() {
        let host = MemoryHost::new();
        let session = connect_session(&host).await;
        session.join(TEST_WORKSPACE).await.unwrap();

        let err = session
            .load_document(TEST_WORKSPACE, "nope", OnMissing::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, CosyncError::DocumentLoad { .. }));

        let empty = session
            .load_document(TEST_WORKSPACE, "nope", OnMissing::CreateEmpty)
            .await
            .unwrap();
        assert!(!empty.existed());
    }

    #[tokio::test]
    async fn test_push_sends_only_local_delta() {
        let host = MemoryHost::new();
        let session = connect_session(&host).await;
        session.join(TEST_WORKSPACE).await.unwrap();

        let mut loaded = session
            .load_document(TEST_WORKSPACE, "doc", OnMissing::CreateEmpty)
            .await
            .unwrap();
        let text = loaded.doc().get_or_insert_text("t");
        {
            let mut txn = loaded.doc().transact_mut();
            text.insert(&mut txn, 0, "hello");
        }
        session.push(&mut loaded).await.unwrap();

        let mut reloaded = session
            .load_document(TEST_WORKSPACE, "doc", OnMissing::Fail)
            .await
            .unwrap();
        assert!(reloaded.existed());
        let meta = reloaded.doc().get_or_insert_map("meta");
        {
            let mut txn = reloaded.doc().transact_mut();
            meta.insert(&mut txn, "k", yrs::Any::Bool(true));
        }
        session.push(&mut reloaded).await.unwrap();

        let pushes = host.pushes_for("doc");
        assert_eq!(pushes.len(), 2);
        assert!(pushes[1].update.len() < pushes[0].update.len() + 64);

        let snapshot = host.snapshot(TEST_WORKSPACE, "doc").unwrap();
        let text = snapshot.get_or_insert_text("t");
        let txn = snapshot.transact();
        assert_eq!(text.get_string(&txn), "hello");
    }

    #[tokio::test]
    async fn test_push_rejected() {
        let host = MemoryHost::new();
        host.reject_pushes("doc", HostError::new("ACCESS_DENIED", "read only"));
        let session = connect_session(&host).await;
        session.join(TEST_WORKSPACE).await.unwrap();

        let mut loaded = LoadedDoc::new(TEST_WORKSPACE, "doc", Doc::new());
        let err = session.push(&mut loaded).await.unwrap_err();
        assert!(matches!(err, CosyncError::PushRejected { .. }));
    }

    #[tokio::test]
    async fn test_stalled_request_times_out() {
        let host = MemoryHost::new();
        host.stall(events::JOIN);
        let mut config = Config::new("memory://host", TEST_WORKSPACE);
        config.request_timeout_ms = 50;
        let session = SessionChannel::connect(&host, &SessionContext::with_token("t"), config)
            .await
            .unwrap();

        let err = session.join(TEST_WORKSPACE).await.unwrap_err();
        match err {
            CosyncError::Timeout { operation, after } => {
                assert_eq!(operation, events::JOIN);
                assert_eq!(after, Duration::from_millis(50));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_leave_and_disconnect_are_best_effort() {
        let host = MemoryHost::new();
        host.stall(events::LEAVE);
        let mut config = Config::new("memory://host", TEST_WORKSPACE);
        config.request_timeout_ms = 20;
        let session = SessionChannel::connect(&host, &SessionContext::with_token("t"), config)
            .await
            .unwrap();
        session.join(TEST_WORKSPACE).await.unwrap();

        session.leave(TEST_WORKSPACE).await;
        assert!(!session.is_joined(TEST_WORKSPACE));

        session.disconnect().await;
        assert!(!session.is_connected());
        let err = session.join(TEST_WORKSPACE).await.unwrap_err();
        assert!(matches!(err, CosyncError::NotConnected));
    }

    #[test]
    fn test_context_debug_redacts_secrets() {
        let ctx = SessionContext::with_cookie("sid=secret");
        let debug = format!("{:?}", ctx);
        assert!(!debug.contains("secret"));
        assert!(ctx.has_credential());
        assert!(!SessionContext::with_token("").has_credential());
    }
}
