//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Connects to the browser-level debugging endpoint. Page targets are driven
//! through flattened sessions: every command may carry a `sessionId`, and
//! events arriving for a session are tagged with it.

use pagesync_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// An event pushed by the browser, optionally scoped to a flattened session.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub session_id: Option<String>,
    pub params: Value,
}

/// Error reported by the browser in a command response.
#[derive(Debug, Clone)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<CdpEvent>>>>>;

/// A CDP WebSocket client that can send commands and receive responses/events.
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Pending,
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channel).
    event_listeners: Listeners,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a Chrome CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            Error::Cdp(format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))
        })?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        // Writer task: owns the sink, forwards messages from channel
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: reads from WebSocket, dispatches responses and events
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let mut listeners = events_clone.lock().await;
                            if let Some(senders) = listeners.get_mut(method) {
                                let event = CdpEvent {
                                    method: method.to_string(),
                                    session_id: val
                                        .get("sessionId")
                                        .and_then(|v| v.as_str())
                                        .map(|s| s.to_string()),
                                    params: val.get("params").cloned().unwrap_or(Value::Null),
                                };
                                senders.retain(|tx| !tx.is_closed());
                                for tx in senders.iter() {
                                    let _ = tx.try_send(event.clone());
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a browser-level command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.send_raw(None, method, params)
            .await?
            .map_err(|e| Error::Cdp(format!("{} failed: {}", method, e.message)))
    }

    /// Send a command on a flattened target session.
    pub async fn send_session_command(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        self.send_raw(Some(session_id), method, params)
            .await?
            .map_err(|e| Error::Cdp(format!("{} failed: {}", method, e.message)))
    }

    /// Send a command and hand back the browser's error unflattened, so callers
    /// can classify it by code or message.
    pub async fn send_raw(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<Value, CdpResponseError>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(session) = session_id {
            msg["sessionId"] = json!(session);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Cdp(format!("Failed to send CDP command: {}", e)))?;

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Ok(Err(CdpResponseError {
                        code: error.get("code").and_then(|v| v.as_i64()).unwrap_or(0),
                        message: error
                            .get("message")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown error")
                            .to_string(),
                    }))
                } else {
                    Ok(Ok(response.get("result").cloned().unwrap_or(Value::Null)))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp("CDP response channel closed".to_string())),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                )))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver that will get every occurrence.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<CdpEvent> {
        let (tx, rx) = mpsc::channel(64);
        let mut listeners = self.event_listeners.lock().await;
        listeners.entry(method.to_string()).or_default().push(tx);
        rx
    }

    /// Ask the browser to report target creation/destruction events.
    pub async fn set_discover_targets(&self, discover: bool) -> Result<()> {
        self.send_command("Target.setDiscoverTargets", json!({"discover": discover}))
            .await?;
        Ok(())
    }

    /// Get all browser targets (pages, iframes, workers, etc.).
    pub async fn get_targets(&self) -> Result<Vec<Value>> {
        let result = self.send_command("Target.getTargets", json!({})).await?;
        Ok(result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn get_target_info(&self, target_id: &str) -> Result<Value> {
        let result = self
            .send_command("Target.getTargetInfo", json!({"targetId": target_id}))
            .await?;
        result
            .get("targetInfo")
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Target '{}'", target_id)))
    }

    /// Create a new page target. Background targets do not steal focus.
    pub async fn create_target(&self, url: &str, background: bool) -> Result<String> {
        let result = self
            .send_command(
                "Target.createTarget",
                json!({"url": url, "background": background}),
            )
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("No targetId returned from createTarget".to_string()))
    }

    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    pub async fn detach_from_session(&self, session_id: &str) -> Result<()> {
        self.send_command(
            "Target.detachFromTarget",
            json!({"sessionId": session_id}),
        )
        .await?;
        Ok(())
    }

    /// Navigate a session's page.
    pub async fn navigate(&self, session_id: &str, url: &str) -> Result<Value> {
        self.send_session_command(session_id, "Page.navigate", json!({"url": url}))
            .await
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}
