//! In-process host for tests and offline embedding.
//!
//! [`MemoryHost`] answers the same events as the real host, keeps every
//! document as a yrs [`Doc`], and records each request so callers can assert
//! on how many pushes an operation produced. Joins, pushes and whole events
//! can be made to fail or stall.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact};

use super::SessionContext;
use super::transport::{
    Connector, DOC_NOT_FOUND, JoinRequest, LeaveRequest, LoadDocAck, LoadDocRequest, PushDocAck,
    PushDocRequest, Transport, accepted, events, rejected,
};
use crate::config::Config;
use crate::crdt;
use crate::error::{CosyncError, HostError, Result};

/// One accepted document update.
#[derive(Debug, Clone)]
pub struct PushRecord {
    pub space_id: String,
    pub doc_id: String,
    pub update: Vec<u8>,
}

#[derive(Default)]
struct HostState {
    docs: HashMap<(String, String), Doc>,
    members: HashSet<String>,
    pushes: Vec<PushRecord>,
    requests: Vec<String>,
    rejected_joins: HashMap<String, HostError>,
    rejected_pushes: HashMap<String, HostError>,
    stalled: HashSet<String>,
    refuse_connect: bool,
    closed: bool,
    clock: i64,
}

impl HostState {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }
}

/// A host that lives entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `space:join` of `space_id` fail with `error`.
    pub fn reject_join(&self, space_id: &str, error: HostError) {
        self.lock()
            .rejected_joins
            .insert(space_id.to_string(), error);
    }

    /// Make every push to `doc_id` fail with `error`.
    pub fn reject_pushes(&self, doc_id: &str, error: HostError) {
        self.lock()
            .rejected_pushes
            .insert(doc_id.to_string(), error);
    }

    /// Drop every configured rejection.
    pub fn clear_rejections(&self) {
        let mut state = self.lock();
        state.rejected_joins.clear();
        state.rejected_pushes.clear();
    }

    /// Never acknowledge `event`.
    pub fn stall(&self, event: &str) {
        self.lock().stalled.insert(event.to_string());
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connect = refuse;
    }

    /// Store a document as if another client had written it.
    pub fn seed(&self, space_id: &str, doc_id: &str, update: &[u8]) -> Result<()> {
        let mut state = self.lock();
        let doc = state
            .docs
            .entry((space_id.to_string(), doc_id.to_string()))
            .or_insert_with(Doc::new);
        crdt::apply_update(doc, update)
    }

    /// Store the full state of `doc` under `doc_id`.
    pub fn seed_doc(&self, space_id: &str, doc_id: &str, doc: &Doc) -> Result<()> {
        self.seed(space_id, doc_id, &crdt::encode_full_state(doc))
    }

    /// A detached copy of the host's version of a document.
    pub fn snapshot(&self, space_id: &str, doc_id: &str) -> Option<Doc> {
        let state = self.lock();
        let doc = state
            .docs
            .get(&(space_id.to_string(), doc_id.to_string()))?;
        let copy = Doc::new();
        crdt::apply_update(&copy, &crdt::encode_full_state(doc)).ok()?;
        Some(copy)
    }

    /// Whether the host holds a document.
    pub fn has_doc(&self, space_id: &str, doc_id: &str) -> bool {
        self.lock()
            .docs
            .contains_key(&(space_id.to_string(), doc_id.to_string()))
    }

    pub fn is_member(&self, space_id: &str) -> bool {
        self.lock().members.contains(space_id)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Every accepted push, oldest first.
    pub fn pushes(&self) -> Vec<PushRecord> {
        self.lock().pushes.clone()
    }

    /// Accepted pushes to one document.
    pub fn pushes_for(&self, doc_id: &str) -> Vec<PushRecord> {
        self.lock()
            .pushes
            .iter()
            .filter(|p| p.doc_id == doc_id)
            .cloned()
            .collect()
    }

    pub fn push_count(&self, doc_id: &str) -> usize {
        self.pushes_for(doc_id).len()
    }

    pub fn total_pushes(&self) -> usize {
        self.lock().pushes.len()
    }

    /// Names of every event received, oldest first.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self, event: &str) -> usize {
        self.lock().requests.iter().filter(|e| *e == event).count()
    }

    /// Forget recorded pushes and requests.
    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.pushes.clear();
        state.requests.clear();
    }

    fn handle(&self, event: &str, payload: Value) -> Result<Value> {
        let mut state = self.lock();
        if state.closed {
            return Err(CosyncError::Connection("channel closed".to_string()));
        }

        match event {
            events::JOIN => {
                let request: JoinRequest = serde_json::from_value(payload)?;
                if let Some(error) = state.rejected_joins.get(&request.space_id) {
                    return Ok(rejected(error));
                }
                state.members.insert(request.space_id);
                Ok(accepted(serde_json::json!({ "clientId": "memory" })))
            }
            events::LEAVE => {
                let request: LeaveRequest = serde_json::from_value(payload)?;
                state.members.remove(&request.space_id);
                Ok(accepted(Value::Null))
            }
            events::LOAD_DOC => {
                let request: LoadDocRequest = serde_json::from_value(payload)?;
                if !state.members.contains(&request.space_id) {
                    return Ok(rejected(&not_joined(&request.space_id)));
                }

                let since = match request.state_vector.as_deref() {
                    Some(sv) => crdt::decode_state_vector(&decode(sv)?)?,
                    None => StateVector::default(),
                };
                let timestamp = state.tick();
                let Some(doc) = state.docs.get(&(request.space_id, request.doc_id.clone())) else {
                    return Ok(rejected(&HostError::new(
                        DOC_NOT_FOUND,
                        format!("doc {} not found", request.doc_id),
                    )));
                };

                let txn = doc.transact();
                let ack = LoadDocAck {
                    missing: BASE64.encode(txn.encode_state_as_update_v1(&since)),
                    state: Some(BASE64.encode(txn.state_vector().encode_v1())),
                    timestamp: Some(timestamp),
                };
                Ok(accepted(serde_json::to_value(ack)?))
            }
            events::PUSH_DOC_UPDATE => {
                let request: PushDocRequest = serde_json::from_value(payload)?;
                if !state.members.contains(&request.space_id) {
                    return Ok(rejected(&not_joined(&request.space_id)));
                }
                if let Some(error) = state.rejected_pushes.get(&request.doc_id) {
                    return Ok(rejected(error));
                }

                let update = decode(&request.update)?;
                let doc = state
                    .docs
                    .entry((request.space_id.clone(), request.doc_id.clone()))
                    .or_insert_with(Doc::new);
                if let Err(e) = crdt::apply_update(doc, &update) {
                    return Ok(rejected(&HostError::new("INVALID_UPDATE", e.to_string())));
                }

                state.pushes.push(PushRecord {
                    space_id: request.space_id,
                    doc_id: request.doc_id,
                    update,
                });
                let timestamp = state.tick();
                let ack = PushDocAck {
                    accepted: Some(true),
                    timestamp: Some(timestamp),
                };
                Ok(accepted(serde_json::to_value(ack)?))
            }
            other => Ok(rejected(&HostError::new(
                "UNKNOWN_EVENT",
                format!("unsupported event {}", other),
            ))),
        }
    }
}

fn not_joined(space_id: &str) -> HostError {
    HostError::new(
        "NOT_IN_SPACE",
        format!("client has not joined space {}", space_id),
    )
}

fn decode(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|e| CosyncError::Protocol(format!("invalid base64 payload: {}", e)))
}

#[async_trait]
impl Transport for MemoryHost {
    async fn request(&self, event: &str, payload: Value) -> Result<Value> {
        let stalled = {
            let mut state = self.lock();
            state.requests.push(event.to_string());
            state.stalled.contains(event)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        self.handle(event, payload)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.closed = true;
        state.members.clear();
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryHost {
    async fn open(&self, context: &SessionContext, _config: &Config) -> Result<Arc<dyn Transport>> {
        let mut state = self.lock();
        if state.refuse_connect {
            return Err(CosyncError::Connection("host refused connection".to_string()));
        }
        log::debug!("[MemoryHost] Accepting connection {:?}", context);
        state.closed = false;
        drop(state);
        Ok(Arc::new(self.clone()))
    }
}
