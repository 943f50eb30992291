//! WebSocket connection to the Baileys sidecar.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    futures::{SinkExt, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::types::{GatewayMessage, SidecarMessage};

/// Maximum delay between connection attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Receives every sidecar frame except send acknowledgements.
pub type MessageCallback = Arc<dyn Fn(SidecarMessage) + Send + Sync>;

/// Outcome of a `send_text` as reported by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAck {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

type PendingAcks = Arc<Mutex<HashMap<String, oneshot::Sender<SendAck>>>>;

/// Cloneable handle to a live sidecar connection.
#[derive(Clone)]
pub struct SidecarHandle {
    write_tx: mpsc::UnboundedSender<Message>,
    pending: PendingAcks,
    connected: Arc<AtomicBool>,
}

impl SidecarHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a frame for the writer task.
    pub fn send(&self, msg: &GatewayMessage) -> Result<()> {
        if !self.is_connected() {
            bail!("sidecar connection closed");
        }
        let json = serde_json::to_string(msg)?;
        self.write_tx
            .send(Message::Text(json.into()))
            .map_err(|_| anyhow::anyhow!("sidecar writer stopped"))
    }

    /// Register interest in the acknowledgement for `request_id`. The
    /// receiver errors if the connection drops first.
    pub fn expect_ack(&self, request_id: &str) -> oneshot::Receiver<SendAck> {
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.to_string(), tx);
        rx
    }

    /// Forget a pending acknowledgement (e.g. after the caller timed out).
    pub fn cancel_ack(&self, request_id: &str) {
        lock(&self.pending).remove(request_id);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connect once. The returned receiver fires when the connection closes.
pub async fn connect(
    url: &str,
    callback: MessageCallback,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let (ws, _response) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to sidecar at {url}"))?;
    let (mut sink, mut stream) = ws.split();

    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();
    let (disconnect_tx, disconnect_rx) = oneshot::channel();
    let handle = SidecarHandle {
        write_tx: write_tx.clone(),
        pending: Arc::new(Mutex::new(HashMap::new())),
        connected: Arc::new(AtomicBool::new(true)),
    };

    tokio::spawn(async move {
        while let Some(msg) = write_rx.recv().await {
            if let Err(e) = sink.send(msg).await {
                warn!(error = %e, "sidecar write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let pending = Arc::clone(&handle.pending);
    let connected = Arc::clone(&handle.connected);
    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<SidecarMessage>(&text) {
                    Ok(SidecarMessage::SendResult {
                        request_id,
                        success,
                        message_id,
                        error,
                    }) => {
                        let waiter = lock(&pending).remove(&request_id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(SendAck {
                                    success,
                                    message_id,
                                    error,
                                });
                            },
                            None => debug!(request_id, "ack for unknown request"),
                        }
                    },
                    Ok(msg) => callback(msg),
                    Err(e) => warn!(error = %e, "unparseable sidecar frame"),
                },
                Ok(Message::Ping(data)) => {
                    let _ = write_tx.send(Message::Pong(data));
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {},
                Err(e) => {
                    warn!(error = %e, "sidecar read failed");
                    break;
                },
            }
        }
        connected.store(false, Ordering::Release);
        // Dropping the senders fails every in-flight send.
        lock(&pending).clear();
        info!("sidecar connection closed");
        let _ = disconnect_tx.send(());
    });

    Ok((handle, disconnect_rx))
}

/// Connect with exponential backoff, giving up after `attempts` tries.
pub async fn connect_with_retry(
    url: &str,
    callback: MessageCallback,
    attempts: u32,
) -> Result<(SidecarHandle, oneshot::Receiver<()>)> {
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match connect(url, Arc::clone(&callback)).await {
            Ok(conn) => {
                info!(url, attempt, "connected to sidecar");
                return Ok(conn);
            },
            Err(e) if attempt < attempts.max(1) => {
                debug!(url, attempt, error = %e, delay_ms = backoff.as_millis() as u64, "sidecar not ready, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                attempt += 1;
            },
            Err(e) => return Err(e.context(format!("gave up after {attempt} attempts"))),
        }
    }
}
