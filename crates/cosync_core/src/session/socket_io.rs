//! Socket.IO (Engine.IO v4) over WebSocket.
//!
//! Only the subset the host speaks is implemented: the default namespace,
//! text frames, server-initiated heartbeats, and events with acknowledgment.
//!
//! ```text
//! 0{"sid":..}          open         server -> client
//! 40{"token":..}       connect      client -> server
//! 40{"sid":..}         connected    server -> client
//! 44{"message":..}     refused      server -> client
//! 2 / 3                ping / pong
//! 42<id>["event",{}]   event with ack id
//! 43<id>[{..}]         acknowledgment
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};

use super::SessionContext;
use super::transport::{Connector, Transport};
use crate::config::Config;
use crate::error::{CosyncError, Result};

/// One decoded Socket.IO text packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Connect(Value),
    ConnectError(Value),
    Disconnect,
    Event {
        id: Option<u64>,
        name: String,
        payload: Value,
    },
    Ack {
        id: u64,
        payload: Value,
    },
    Other(String),
}

fn json_or_null(body: &str) -> Result<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body)?)
}

/// Decode a text frame.
pub fn parse_packet(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let engine = chars
        .next()
        .ok_or_else(|| CosyncError::Protocol("empty packet".to_string()))?;

    match engine {
        '0' => return Ok(Packet::Open(json_or_null(&text[1..])?)),
        '1' => return Ok(Packet::Close),
        '2' => return Ok(Packet::Ping),
        '3' => return Ok(Packet::Pong),
        '4' => {}
        _ => return Ok(Packet::Other(text.to_string())),
    }

    let Some(kind) = chars.next() else {
        return Ok(Packet::Other(text.to_string()));
    };
    let mut rest = &text[1 + kind.len_utf8()..];

    // Skip a non-default namespace ("/ns,").
    if rest.starts_with('/') {
        rest = rest.find(',').map(|i| &rest[i + 1..]).unwrap_or("");
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let body = &rest[digits..];

    match kind {
        '0' => Ok(Packet::Connect(json_or_null(body)?)),
        '1' => Ok(Packet::Disconnect),
        '4' => Ok(Packet::ConnectError(json_or_null(body)?)),
        '2' => {
            let Value::Array(mut items) = json_or_null(body)? else {
                return Err(CosyncError::Protocol(format!("bad event packet: {}", text)));
            };
            if items.is_empty() {
                return Err(CosyncError::Protocol(format!("event without name: {}", text)));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                _ => return Err(CosyncError::Protocol(format!("bad event name: {}", text))),
            };
            let payload = if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            };
            Ok(Packet::Event { id, name, payload })
        }
        '3' => {
            let id = id.ok_or_else(|| CosyncError::Protocol(format!("ack without id: {}", text)))?;
            let payload = match json_or_null(body)? {
                Value::Array(mut items) if !items.is_empty() => items.remove(0),
                _ => Value::Null,
            };
            Ok(Packet::Ack { id, payload })
        }
        _ => Ok(Packet::Other(text.to_string())),
    }
}

/// Encode an event that expects an acknowledgment under `id`.
pub fn encode_event(id: u64, event: &str, payload: &Value) -> Result<String> {
    let body = serde_json::to_string(&serde_json::json!([event, payload]))?;
    Ok(format!("42{}{}", id, body))
}

/// WebSocket URL of the Socket.IO endpoint under `endpoint`.
pub fn socket_url(endpoint: &str) -> Result<url::Url> {
    let mut url = url::Url::parse(endpoint)
        .map_err(|e| CosyncError::Connection(format!("invalid endpoint '{}': {}", endpoint, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CosyncError::Connection(format!(
                "unsupported endpoint scheme '{}'",
                other
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| CosyncError::Connection(format!("cannot use scheme {}", scheme)))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| CosyncError::Connection(format!("invalid credential header: {}", e)))
}

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Removes a request's ack slot when the request finishes or is dropped.
struct PendingSlot {
    id: u64,
    pending: PendingAcks,
}

impl PendingSlot {
    fn register(pending: &PendingAcks, id: u64) -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let slot = Self {
            id,
            pending: Arc::clone(pending),
        };
        (slot, rx)
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        // No-op once the reader has taken the sender for an ack.
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Connects to a live host.
#[derive(Debug, Default, Clone)]
pub struct SocketIoConnector;

impl SocketIoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn open(&self, context: &SessionContext, config: &Config) -> Result<Arc<dyn Transport>> {
        let url = socket_url(&config.endpoint)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CosyncError::Connection(e.to_string()))?;
        if let Some(cookie) = context.cookie() {
            request
                .headers_mut()
                .insert(header::COOKIE, header_value(cookie)?);
        }
        if let Some(token) = context.token() {
            request.headers_mut().insert(
                header::AUTHORIZATION,
                header_value(&format!("Bearer {}", token))?,
            );
        }

        log::debug!("[SocketIo] Connecting to {}", url);
        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| CosyncError::Connection(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let mut connect_sent = false;
        loop {
            let frame = stream
                .next()
                .await
                .ok_or_else(|| CosyncError::Connection("closed during handshake".to_string()))?
                .map_err(|e| CosyncError::Connection(e.to_string()))?;
            let Message::Text(text) = frame else {
                continue;
            };

            match parse_packet(text.as_str())? {
                Packet::Open(_) if !connect_sent => {
                    let auth = match context.token() {
                        Some(token) => format!("40{}", serde_json::json!({ "token": token })),
                        None => "40".to_string(),
                    };
                    sink.send(Message::text(auth))
                        .await
                        .map_err(|e| CosyncError::Connection(e.to_string()))?;
                    connect_sent = true;
                }
                Packet::Ping => {
                    sink.send(Message::text("3"))
                        .await
                        .map_err(|e| CosyncError::Connection(e.to_string()))?;
                }
                Packet::Connect(_) => break,
                Packet::ConnectError(reason) => {
                    return Err(CosyncError::Connection(format!("host refused: {}", reason)));
                }
                Packet::Close => {
                    return Err(CosyncError::Connection("closed during handshake".to_string()));
                }
                _ => {}
            }
        }
        log::info!("[SocketIo] Connected to {}", url);

        let (outgoing, mut rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    log::warn!("[SocketIo] Send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = {
            let pending = Arc::clone(&pending);
            let outgoing = outgoing.clone();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            log::warn!("[SocketIo] Receive failed: {}", e);
                            break;
                        }
                    };

                    match parse_packet(text.as_str()) {
                        Ok(Packet::Ping) => {
                            let _ = outgoing.send(Message::text("3"));
                        }
                        Ok(Packet::Ack { id, payload }) => {
                            let waiter = pending
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .remove(&id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(payload);
                                }
                                None => log::debug!("[SocketIo] Late ack {}", id),
                            }
                        }
                        Ok(Packet::Close) | Ok(Packet::Disconnect) => break,
                        Ok(Packet::Event { name, .. }) => {
                            log::trace!("[SocketIo] Ignoring broadcast {}", name)
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("[SocketIo] {}", e),
                    }
                }
                // Dropping the senders fails every in-flight request.
                pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                log::info!("[SocketIo] Channel closed");
            })
        };

        Ok(Arc::new(SocketIoTransport {
            outgoing,
            pending,
            next_id: AtomicU64::new(0),
            tasks: Mutex::new(vec![reader, writer]),
        }))
    }
}

/// An established Socket.IO channel.
struct SocketIoTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingAcks,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl Transport for SocketIoTransport {
    async fn request(&self, event: &str, payload: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_event(id, event, &payload)?;

        // Timeouts and cancellation drop this future; the slot cleans up.
        let (_slot, rx) = PendingSlot::register(&self.pending, id);

        if self.outgoing.send(Message::text(frame)).is_err() {
            return Err(CosyncError::Connection("channel closed".to_string()));
        }

        rx.await
            .map_err(|_| CosyncError::Connection(format!("channel closed before ack of {}", event)))
    }

    async fn close(&self) -> Result<()> {
        let _ = self.outgoing.send(Message::text("41"));
        let _ = self.outgoing.send(Message::Close(None));
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        // The writer drains the close frames; the reader may be parked on a silent socket.
        let mut tasks = tasks.into_iter();
        if let Some(reader) = tasks.next() {
            reader.abort();
        }
        for writer in tasks {
            let _ = writer.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_engine_packets() {
        assert_eq!(parse_packet("2").unwrap(), Packet::Ping);
        assert_eq!(parse_packet("3").unwrap(), Packet::Pong);
        assert_eq!(
            parse_packet(r#"0{"sid":"abc","pingInterval":25000}"#).unwrap(),
            Packet::Open(json!({"sid": "abc", "pingInterval": 25000}))
        );
    }

    #[test]
    fn test_parse_connect_and_refusal() {
        assert_eq!(
            parse_packet(r#"40{"sid":"x"}"#).unwrap(),
            Packet::Connect(json!({"sid": "x"}))
        );
        assert_eq!(
            parse_packet(r#"44{"message":"unauthorized"}"#).unwrap(),
            Packet::ConnectError(json!({"message": "unauthorized"}))
        );
    }

    #[test]
    fn test_parse_ack_takes_first_argument() {
        let packet = parse_packet(r#"437[{"data":{"missing":"AA=="}}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Ack {
                id: 7,
                payload: json!({"data": {"missing": "AA=="}})
            }
        );
    }

    #[test]
    fn test_parse_event_with_namespace() {
        let packet = parse_packet(r#"42/admin,["space:broadcast",{"a":1}]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                id: None,
                name: "space:broadcast".to_string(),
                payload: json!({"a": 1})
            }
        );
    }

    #[test]
    fn test_encode_event_round_trips_through_parser() {
        let frame = encode_event(12, "space:join", &json!({"spaceId": "ws"})).unwrap();
        assert_eq!(frame, r#"4212["space:join",{"spaceId":"ws"}]"#);
        assert_eq!(
            parse_packet(&frame).unwrap(),
            Packet::Event {
                id: Some(12),
                name: "space:join".to_string(),
                payload: json!({"spaceId": "ws"})
            }
        );
    }

    #[test]
    fn test_malformed_packets() {
        assert!(parse_packet("").is_err());
        assert!(parse_packet("42{}").is_err());
        assert!(parse_packet("43[]").is_err());
    }

    fn silent_transport() -> (SocketIoTransport, mpsc::UnboundedReceiver<Message>) {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let transport = SocketIoTransport {
            outgoing,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        };
        (transport, rx)
    }

    fn pending_len(transport: &SocketIoTransport) -> usize {
        transport
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[tokio::test]
    async fn test_timed_out_requests_release_ack_slots() {
        let (transport, mut sent) = silent_transport();

        for _ in 0..5 {
            let result = tokio::time::timeout(
                std::time::Duration::from_millis(20),
                transport.request("space:join", json!({"spaceId": "ws"})),
            )
            .await;
            assert!(result.is_err());
        }

        assert_eq!(pending_len(&transport), 0);
        let mut frames = 0;
        while sent.try_recv().is_ok() {
            frames += 1;
        }
        assert_eq!(frames, 5);
    }

    #[tokio::test]
    async fn test_acked_request_leaves_no_slot() {
        let (transport, mut sent) = silent_transport();
        let pending = Arc::clone(&transport.pending);

        let responder = tokio::spawn(async move {
            sent.recv().await.unwrap();
            let tx = pending.lock().unwrap().remove(&0).unwrap();
            tx.send(json!({"data": {}})).unwrap();
        });

        let ack = transport
            .request("space:join", json!({"spaceId": "ws"}))
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(ack, json!({"data": {}}));
        assert_eq!(pending_len(&transport), 0);
    }

    #[tokio::test]
    async fn test_closed_channel_releases_ack_slot() {
        let (transport, sent) = silent_transport();
        drop(sent);

        let err = transport
            .request("space:leave", json!({"spaceId": "ws"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CosyncError::Connection(_)));
        assert_eq!(pending_len(&transport), 0);
    }

    #[test]
    fn test_socket_url() {
        let url = socket_url("https://app.example.com/workspace").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://app.example.com/socket.io/?EIO=4&transport=websocket"
        );
        let url = socket_url("http://localhost:3010").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert!(socket_url("ftp://x").is_err());
        assert!(socket_url("not a url").is_err());
    }
}
