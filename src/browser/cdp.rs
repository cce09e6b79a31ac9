//! Minimal JSON-RPC connection to a Chromium DevTools endpoint.
//!
//! Commands are id-matched request/response pairs; everything else arriving
//! on the socket is an event and is forwarded to the (single) subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, trace, warn};

use super::BrowserError;

/// An unsolicited protocol event (e.g. `Network.responseReceived`).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, BrowserError>>>>>;
type EventSlot = Arc<Mutex<Option<mpsc::UnboundedSender<CdpEvent>>>>;

/// A live DevTools connection. Dropping it tears down the reader/writer
/// tasks; in-flight commands then resolve to `ConnectionClosed`.
pub struct CdpConnection {
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    events: EventSlot,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let (stream, _) = connect_async(ws_url).await?;
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let events: EventSlot = Arc::new(Mutex::new(None));

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!("DevTools write failed: {}", e);
                    break;
                }
            }
        });

        let pending_reader = pending.clone();
        let events_reader = events.clone();
        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        dispatch(text.as_str(), &pending_reader, &events_reader);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            // The socket is gone: fail whatever is still waiting.
            let mut map = pending_reader.lock().expect("pending map poisoned");
            for (_, tx) in map.drain() {
                let _ = tx.send(Err(BrowserError::ConnectionClosed));
            }
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            outgoing,
            pending,
            events,
        })
    }

    /// Register the event subscriber. Only the most recent subscriber
    /// receives events; the acquirer installs one before navigating.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().expect("event slot poisoned") = Some(tx);
        rx
    }

    /// Execute a protocol command, optionally against an attached target
    /// session, and wait for its id-matched response.
    pub async fn execute(
        &self,
        method: &str,
        session_id: Option<&str>,
        params: Value,
    ) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(sid) = session_id {
            payload["sessionId"] = Value::String(sid.to_string());
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        trace!(method, id, "CDP command");
        self.outgoing
            .send(Message::Text(payload.to_string().into()))
            .map_err(|_| BrowserError::ConnectionClosed)?;

        rx.await.map_err(|_| BrowserError::ConnectionClosed)?
    }
}

fn dispatch(raw: &str, pending: &PendingMap, events: &EventSlot) {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("Unparseable DevTools message: {}", e);
            return;
        }
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let tx = pending.lock().expect("pending map poisoned").remove(&id);
        if let Some(tx) = tx {
            let result = match value.get("error") {
                Some(err) => {
                    let message = err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    Err(BrowserError::Protocol(format!(
                        "command {} failed: {}",
                        id, message
                    )))
                }
                None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = tx.send(result);
        }
        return;
    }

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        let event = CdpEvent {
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
            session_id: value
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        let slot = events.lock().expect("event slot poisoned");
        if let Some(tx) = slot.as_ref() {
            if tx.send(event).is_err() {
                debug!("Event subscriber dropped; discarding DevTools events.");
            }
        }
    }
}
