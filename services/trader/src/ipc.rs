//! IPC server: one client (the manager) served over a Unix stream socket.
//!
//! Frames follow the shared wire protocol. Requests dispatch through a
//! handler table keyed by `request_type`; responses are serialized onto the
//! wire by a single writer task per connection, so concurrent handlers never
//! interleave bytes. Bus events on the push whitelist are forwarded as push
//! frames; ticks never cross the IPC channel. A second client connecting
//! displaces the first.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use qtrader_common::constants::{defaults, topics};
use qtrader_common::errors::{TraderError, TraderResult};
use qtrader_common::event_bus::{EventBus, EventHandler, TraderEvent};
use qtrader_common::protocol::{read_frame, write_frame, WireFrame};

/// Boxed handler future
pub type HandlerFuture = Pin<Box<dyn Future<Output = TraderResult<Value>> + Send>>;
/// Request handler stored in the dispatch table
pub type HandlerFn = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Outgoing-frame queue depth per connection
const WRITE_QUEUE_CAPACITY: usize = 512;

struct ServerInner {
    socket_path: PathBuf,
    handlers: RwLock<FxHashMap<String, HandlerFn>>,
    client_tx: Mutex<Option<mpsc::Sender<WireFrame>>>,
    last_client_heartbeat: Mutex<Option<DateTime<Utc>>>,
    running: AtomicBool,
}

/// The per-trader IPC server
pub struct IpcServer {
    inner: Arc<ServerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IpcServer {
    /// Create a server that will listen on `socket_path`
    #[must_use]
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                socket_path,
                handlers: RwLock::new(FxHashMap::default()),
                client_tx: Mutex::new(None),
                last_client_heartbeat: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a request handler. Handlers may be async and run off the
    /// read loop; a duplicate name replaces the earlier handler.
    pub fn register<F, Fut>(&self, request_type: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TraderResult<Value>> + Send + 'static,
    {
        let wrapped: HandlerFn = Arc::new(move |data| Box::pin(handler(data)));
        self.inner
            .handlers
            .write()
            .insert(request_type.to_string(), wrapped);
    }

    /// Bind the socket, hook pushes onto the bus and start serving.
    pub fn start(&self, bus: &EventBus) -> TraderResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.inner.socket_path.exists() {
            std::fs::remove_file(&self.inner.socket_path)?;
        }
        if let Some(parent) = self.inner.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&self.inner.socket_path)?;
        info!(path = %self.inner.socket_path.display(), "ipc server listening");

        let forwarder = Arc::new(PushForwarder {
            inner: Arc::clone(&self.inner),
        });
        for topic in [
            topics::ACCOUNT_UPDATE,
            topics::ACCOUNT_STATUS,
            topics::POSITION_UPDATE,
            topics::ORDER_UPDATE,
            topics::TRADE_CREATED,
            topics::ORDER_CMD_UPDATE,
        ] {
            bus.register(topic, forwarder.clone());
        }

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(accept_loop(
            Arc::clone(&self.inner),
            listener,
        )));
        tasks.push(tokio::spawn(heartbeat_loop(Arc::clone(&self.inner))));
        Ok(())
    }

    /// Stop serving and remove the socket file
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.inner.client_tx.lock() = None;
        if self.inner.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.inner.socket_path) {
                warn!(error = %e, "socket file removal failed");
            }
        }
        info!("ipc server stopped");
    }

    /// Time of the last heartbeat received from the client, advisory
    #[must_use]
    pub fn last_client_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_client_heartbeat.lock()
    }

    /// Whether a client is currently attached
    #[must_use]
    pub fn has_client(&self) -> bool {
        self.inner.client_tx.lock().is_some()
    }
}

struct PushForwarder {
    inner: Arc<ServerInner>,
}

#[async_trait]
impl EventHandler for PushForwarder {
    async fn handle(&self, event: TraderEvent) -> anyhow::Result<()> {
        let Some(msg_type) = event.push_msg_type() else {
            return Ok(());
        };
        let frame = WireFrame::push(msg_type, event.payload_json());
        let tx = self.inner.client_tx.lock().clone();
        if let Some(tx) = tx {
            if let Err(e) = tx.try_send(frame) {
                debug!(msg_type, error = %e, "push dropped");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ipc_push"
    }
}

async fn accept_loop(inner: Arc<ServerInner>, listener: UnixListener) {
    let mut current: Option<JoinHandle<()>> = None;
    while inner.running.load(Ordering::SeqCst) {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                info!("ipc client connected");
                // One concurrent client: a newer connect displaces the old.
                if let Some(previous) = current.take() {
                    warn!("second client connected, displacing the first");
                    previous.abort();
                }
                current = Some(tokio::spawn(serve_connection(
                    Arc::clone(&inner),
                    stream,
                )));
            }
            Err(e) => {
                error!(error = %e, "ipc accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        }
    }
    if let Some(task) = current {
        task.abort();
    }
}

async fn serve_connection(inner: Arc<ServerInner>, stream: UnixStream) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (tx, mut rx) = mpsc::channel::<WireFrame>(WRITE_QUEUE_CAPACITY);
    *inner.client_tx.lock() = Some(tx.clone());

    // Single writer task: responses and pushes share one ordered sink.
    let writer_task = tokio::spawn(async move {
        let mut writer = BufWriter::new(write_half);
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!(error = %e, "ipc write failed");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(WireFrame::Request {
                request_id,
                request_type,
                data,
            })) => {
                let handler = inner.handlers.read().get(&request_type).cloned();
                let reply_tx = tx.clone();
                match handler {
                    Some(handler) => {
                        tokio::spawn(async move {
                            let frame = match handler(data).await {
                                Ok(value) => WireFrame::ok_response(request_id, value),
                                Err(e) => WireFrame::err_response(request_id, e.to_string()),
                            };
                            let _ = reply_tx.send(frame).await;
                        });
                    }
                    None => {
                        warn!(request_type = %request_type, "unknown request type");
                        let frame = WireFrame::err_response(
                            request_id,
                            format!("unknown request_type: {request_type}"),
                        );
                        let _ = reply_tx.send(frame).await;
                    }
                }
            }
            Ok(Some(WireFrame::Heartbeat { .. })) => {
                *inner.last_client_heartbeat.lock() = Some(Utc::now());
            }
            Ok(Some(other)) => {
                debug!(frame = ?other, "unexpected frame from client, ignored");
            }
            Ok(None) => {
                info!("ipc client disconnected");
                break;
            }
            Err(e) => {
                // Transport violation: close and wait for a reconnect.
                warn!(error = %e, "ipc read failed, closing connection");
                break;
            }
        }
    }

    {
        let mut client = inner.client_tx.lock();
        let ours = client
            .as_ref()
            .is_some_and(|current| current.same_channel(&tx));
        if ours {
            *client = None;
        }
    }
    drop(tx);
    let _ = writer_task.await;
}

async fn heartbeat_loop(inner: Arc<ServerInner>) {
    let mut ticker = tokio::time::interval(defaults::HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let tx = inner.client_tx.lock().clone();
        if let Some(tx) = tx {
            if tx.try_send(WireFrame::heartbeat()).is_err() {
                debug!("heartbeat dropped, client queue full or gone");
            }
        }
    }
}

/// Decode a typed payload out of a request's `data`, mapping failures to the
/// protocol error kind so the client sees `{success:false}`.
pub fn decode_payload<T: serde::de::DeserializeOwned>(data: Value) -> TraderResult<T> {
    serde_json::from_value(data).map_err(|e| TraderError::Protocol(format!("bad payload: {e}")))
}
