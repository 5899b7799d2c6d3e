//! JSON-RPC client for the daemon and wallet service endpoints
//!
//! The transport is line-delimited JSON over a local TCP connection. A
//! single writer task serializes all outgoing requests so concurrent calls
//! never interleave on the wire; a reader task routes responses back to
//! callers by request id through the [`RequestTracker`], so calls complete
//! independently with no head-of-line blocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::timeout;

use upgui_core::prelude::*;

/// Global request ID counter
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID
pub fn next_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A host/port pair identifying one service RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
}

impl RpcEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for RpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What a pending request receives when it completes.
#[derive(Debug)]
enum Reply {
    /// The service answered (successfully or with an error payload).
    Response {
        result: Option<Value>,
        error: Option<Value>,
    },
    /// The connection went away before an answer arrived.
    Cancelled,
}

/// A pending request awaiting its response
struct PendingRequest {
    reply_tx: oneshot::Sender<Reply>,
    created_at: Instant,
}

/// Tracks pending requests and matches responses to them by id.
pub struct RequestTracker {
    pending: RwLock<HashMap<u64, PendingRequest>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new pending request.
    /// Returns (request_id, receiver for the reply).
    async fn register(&self) -> (u64, oneshot::Receiver<Reply>) {
        let id = next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(
            id,
            PendingRequest {
                reply_tx: tx,
                created_at: Instant::now(),
            },
        );
        (id, rx)
    }

    /// Route an incoming response to its caller.
    /// Returns true if the response matched a pending request.
    async fn handle_response(&self, id: u64, result: Option<Value>, error: Option<Value>) -> bool {
        if let Some(pending) = self.pending.write().await.remove(&id) {
            let elapsed = pending.created_at.elapsed();
            trace!("Response #{} matched after {:?}", id, elapsed);
            let _ = pending.reply_tx.send(Reply::Response { result, error });
            true
        } else {
            false
        }
    }

    /// Drop a pending entry without replying (the caller timed out and is
    /// no longer listening).
    async fn discard(&self, id: u64) {
        self.pending.write().await.remove(&id);
    }

    /// Reject every pending request (connection lost or shutting down).
    async fn cancel_all(&self) {
        let mut pending = self.pending.write().await;
        for (_, req) in pending.drain() {
            let _ = req.reply_tx.send(Reply::Cancelled);
        }
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Wire shape of a service response line.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Default per-call timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected JSON-RPC client for one service endpoint.
///
/// Cheap to clone; clones share the writer task and the request tracker.
#[derive(Clone)]
pub struct RpcClient {
    endpoint: RpcEndpoint,
    write_tx: mpsc::Sender<String>,
    tracker: Arc<RequestTracker>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.endpoint.to_string())
            .finish()
    }
}

impl RpcClient {
    /// Connect to a service endpoint within `connect_timeout`.
    pub async fn connect(endpoint: RpcEndpoint, connect_timeout: Duration) -> Result<Self> {
        let addr = (endpoint.host.clone(), endpoint.port);
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::rpc_transport(format!("connect to {endpoint} timed out")))?
            .map_err(|e| Error::rpc_transport(format!("connect to {endpoint}: {e}")))?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let (write_tx, write_rx) = mpsc::channel::<String>(32);
        let tracker = Arc::new(RequestTracker::new());

        tokio::spawn(Self::writer(write_half, write_rx));
        tokio::spawn(Self::reader(read_half, Arc::clone(&tracker)));

        debug!("RPC client connected to {}", endpoint);
        Ok(Self {
            endpoint,
            write_tx,
            tracker,
        })
    }

    /// Background task: serializes all writes to the transport.
    async fn writer(mut half: OwnedWriteHalf, mut rx: mpsc::Receiver<String>) {
        while let Some(line) = rx.recv().await {
            trace!("RPC send: {}", line);
            if let Err(e) = half.write_all(line.as_bytes()).await {
                error!("RPC write failed: {}", e);
                break;
            }
            if let Err(e) = half.write_all(b"\n").await {
                error!("RPC write failed: {}", e);
                break;
            }
            if let Err(e) = half.flush().await {
                error!("RPC flush failed: {}", e);
                break;
            }
        }
        debug!("RPC writer finished");
    }

    /// Background task: reads response lines and routes them by id.
    async fn reader(half: OwnedReadHalf, tracker: Arc<RequestTracker>) {
        let mut lines = BufReader::new(half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            trace!("RPC recv: {}", line);
            match serde_json::from_str::<RpcResponse>(&line) {
                Ok(response) => {
                    if !tracker
                        .handle_response(response.id, response.result, response.error)
                        .await
                    {
                        debug!("RPC response #{} matched no pending request", response.id);
                    }
                }
                Err(e) => debug!("Ignoring non-response line from service: {}", e),
            }
        }
        // EOF or read error: the connection is gone, fail every caller.
        debug!("RPC reader finished, cancelling pending requests");
        tracker.cancel_all().await;
    }

    pub fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    /// Issue a call with the default timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, DEFAULT_CALL_TIMEOUT)
            .await
    }

    /// Issue a call with a custom timeout.
    ///
    /// A timed-out call resolves as [`Error::RpcTimeout`] and removes its
    /// pending-request entry, so the table never leaks abandoned callers.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        call_timeout: Duration,
    ) -> Result<Value> {
        let (id, reply_rx) = self.tracker.register().await;

        let request = json!({ "id": id, "method": method, "params": params }).to_string();
        debug!("RPC call #{}: {}", id, method);

        if self.write_tx.send(request).await.is_err() {
            self.tracker.discard(id).await;
            return Err(Error::rpc_transport(format!(
                "connection to {} closed",
                self.endpoint
            )));
        }

        match timeout(call_timeout, reply_rx).await {
            Ok(Ok(Reply::Response { result, error })) => match error {
                Some(error) => Err(service_error(error)),
                None => Ok(result.unwrap_or(Value::Null)),
            },
            Ok(Ok(Reply::Cancelled)) => Err(Error::rpc_transport(format!(
                "connection to {} lost",
                self.endpoint
            ))),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                self.tracker.discard(id).await;
                Err(Error::RpcTimeout {
                    method: method.to_string(),
                    timeout: call_timeout,
                })
            }
        }
    }

    /// Number of in-flight calls, for diagnostics and tests.
    pub async fn pending_count(&self) -> usize {
        self.tracker.pending_count().await
    }

    /// Tear the client down: reject every in-flight call and close the
    /// writer. The reader task ends when the socket drops.
    pub async fn close(self) {
        self.tracker.cancel_all().await;
        drop(self.write_tx);
    }
}

/// Map a JSON-RPC error payload (`{code, message}` or anything else the
/// service sent) to [`Error::RpcService`].
fn service_error(error: Value) -> Error {
    let code = error.get("code").and_then(Value::as_i64);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    Error::rpc_service(message, code)
}
