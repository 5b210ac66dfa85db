//! Request/response mux client over the trader's Unix socket.
//!
//! One reader task demultiplexes incoming frames: responses resolve the
//! pending request they correlate with, pushes and heartbeats flow out to
//! the owning proxy. Requests may be in flight concurrently; each waiter is
//! released by its request id or by its timeout.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::protocol::{read_frame, write_frame, WireFrame};

/// Push or heartbeat delivered by the read loop
#[derive(Debug)]
pub struct PushMessage {
    /// Push `msg_type`, or `heartbeat`
    pub msg_type: String,
    /// Frame payload
    pub data: Value,
}

struct ClientInner {
    socket_path: PathBuf,
    connected: AtomicBool,
    pending: Mutex<FxHashMap<String, oneshot::Sender<WireFrame>>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    push_tx: mpsc::UnboundedSender<PushMessage>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

/// Socket client owned by one trader proxy
pub struct SocketClient {
    inner: Arc<ClientInner>,
}

impl SocketClient {
    /// Create a client for `socket_path`; pushes surface on `push_tx`
    #[must_use]
    pub fn new(socket_path: PathBuf, push_tx: mpsc::UnboundedSender<PushMessage>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                socket_path,
                connected: AtomicBool::new(false),
                pending: Mutex::new(FxHashMap::default()),
                writer: tokio::sync::Mutex::new(None),
                push_tx,
                read_task: Mutex::new(None),
            }),
        }
    }

    /// Whether the socket connection is up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Establish the connection and start the read loop. Idempotent.
    pub async fn connect(&self) -> TraderResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let stream = UnixStream::connect(&self.inner.socket_path)
            .await
            .map_err(|e| TraderError::Transport(format!("connect failed: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        *self.inner.writer.lock().await = Some(write_half);
        self.inner.connected.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        *self.inner.read_task.lock() = Some(tokio::spawn(read_loop(inner, read_half)));
        info!(path = %self.inner.socket_path.display(), "socket client connected");
        Ok(())
    }

    /// Tear the connection down, failing every pending request
    pub async fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.inner.read_task.lock().take() {
            task.abort();
        }
        *self.inner.writer.lock().await = None;
        self.inner.fail_pending();
        debug!("socket client disconnected");
    }

    /// Send one request and wait for its correlated response
    pub async fn request(
        &self,
        request_type: &str,
        data: Value,
        timeout: Duration,
    ) -> TraderResult<Value> {
        if !self.is_connected() {
            return Err(TraderError::Transport("not connected".to_string()));
        }
        let frame = WireFrame::request(request_type, data);
        let WireFrame::Request { request_id, .. } = &frame else {
            unreachable!("request constructor yields request frames");
        };
        let request_id = request_id.clone();

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(request_id.clone(), tx);

        if let Err(e) = self.write(&frame).await {
            self.inner.pending.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(WireFrame::Response {
                success,
                data,
                error,
                ..
            })) => {
                if success {
                    Ok(data)
                } else {
                    Err(TraderError::Protocol(
                        error.unwrap_or_else(|| "request failed".to_string()),
                    ))
                }
            }
            Ok(Ok(other)) => Err(TraderError::Protocol(format!(
                "unexpected frame for {request_type}: {other:?}"
            ))),
            Ok(Err(_closed)) => Err(TraderError::Transport(format!(
                "connection lost awaiting {request_type}"
            ))),
            Err(_elapsed) => {
                self.inner.pending.lock().remove(&request_id);
                Err(TraderError::Timeout(format!(
                    "{request_type} timed out after {timeout:?}"
                )))
            }
        }
    }

    /// Send an advisory heartbeat frame
    pub async fn send_heartbeat(&self) {
        if self.is_connected() {
            if let Err(e) = self.write(&WireFrame::heartbeat()).await {
                debug!(error = %e, "heartbeat send failed");
            }
        }
    }

    async fn write(&self, frame: &WireFrame) -> TraderResult<()> {
        let mut writer = self.inner.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(TraderError::Transport("not connected".to_string()));
        };
        match write_frame(stream, frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed write means the connection is unusable.
                self.inner.connected.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

impl ClientInner {
    fn fail_pending(&self) {
        // Dropping the senders releases every waiter with a closed channel.
        self.pending.lock().clear();
    }
}

async fn read_loop(inner: Arc<ClientInner>, read_half: OwnedReadHalf) {
    let mut reader = BufReader::new(read_half);
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(WireFrame::Response {
                request_id,
                success,
                data,
                error,
            })) => {
                let waiter = inner.pending.lock().remove(&request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(WireFrame::Response {
                            request_id,
                            success,
                            data,
                            error,
                        });
                    }
                    None => {
                        // Waiter already timed out; nothing is assumed about
                        // the request's effects.
                        debug!(request_id = %request_id, "late response dropped");
                    }
                }
            }
            Ok(Some(WireFrame::Push { msg_type, data })) => {
                let _ = inner.push_tx.send(PushMessage { msg_type, data });
            }
            Ok(Some(WireFrame::Heartbeat { ts })) => {
                let _ = inner.push_tx.send(PushMessage {
                    msg_type: "heartbeat".to_string(),
                    data: Value::String(ts),
                });
            }
            Ok(Some(WireFrame::Request { request_id, .. })) => {
                debug!(request_id = %request_id, "request frame from server ignored");
            }
            Ok(None) => {
                info!("server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "socket read failed");
                break;
            }
        }
    }
    inner.connected.store(false, Ordering::SeqCst);
    inner.fail_pending();
}
