//! Persistent-connection client for the reasoning backend.
//!
//! Unary calls (`query`, `embed`, `ping`, `status`) share one connection
//! guarded by a mutex; streaming calls dial a dedicated connection so a
//! long stream never starves unary traffic.
//!
//! The shared connection is taken out of its slot for the duration of an
//! exchange and only put back after a clean, correlated response. Any
//! read error, id mismatch, or timeout therefore leaves the slot empty and
//! the next call re-dials.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::{GenericFilePath, ToFsName};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::BackendConfig;
use crate::rpc::codec::RpcCodec;
use crate::rpc::envelope::{
    error_message, reply_text, stream_delta, Request, Response, ResponseKind,
};
use crate::rpc::{Reasoner, ReasonerFuture};
use crate::{AppError, Result};

type Connection = Framed<Stream, RpcCodec>;

/// Buffer of the channel returned by [`BackendClient::query_stream`].
const STREAM_BUFFER: usize = 64;

/// Socket location plus dial retry policy.
#[derive(Debug, Clone)]
struct Dialer {
    socket_path: PathBuf,
    attempts: u32,
    backoff: Duration,
}

impl Dialer {
    async fn dial(&self) -> Result<Connection> {
        let mut last_err = String::new();
        for attempt in 1..=self.attempts {
            match self.dial_once().await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    debug!(attempt, %err, path = %self.socket_path.display(), "backend dial failed");
                    last_err = err.to_string();
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }
        Err(AppError::Transport(format!(
            "cannot reach backend at {} after {} attempts: {last_err}",
            self.socket_path.display(),
            self.attempts
        )))
    }

    async fn dial_once(&self) -> std::io::Result<Connection> {
        let name = self.socket_path.as_path().to_fs_name::<GenericFilePath>()?;
        let stream = Stream::connect(name).await?;
        Ok(Framed::new(stream, RpcCodec::new()))
    }
}

/// Client for the reasoning backend's NDJSON socket.
pub struct BackendClient {
    dialer: Dialer,
    conn: Mutex<Option<Connection>>,
    request_timeout: Duration,
    seq: AtomicU64,
}

impl BackendClient {
    /// Build a client from the `[backend]` configuration section.
    ///
    /// No connection is opened until the first call.
    #[must_use]
    pub fn new(config: &BackendConfig) -> Self {
        Self::with_settings(
            config.socket_path.clone(),
            config.dial_attempts,
            config.dial_backoff(),
            config.request_timeout(),
        )
    }

    /// Build a client with explicit settings.
    #[must_use]
    pub fn with_settings(
        socket_path: PathBuf,
        dial_attempts: u32,
        dial_backoff: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            dialer: Dialer {
                socket_path,
                attempts: dial_attempts.max(1),
                backoff: dial_backoff,
            },
            conn: Mutex::new(None),
            request_timeout,
            seq: AtomicU64::new(0),
        }
    }

    /// Socket the client dials.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.dialer.socket_path
    }

    fn next_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos());
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("steward-{nanos}-{seq}")
    }

    /// Send `content` under `intent` and return the reply text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport`/`AppError::Timeout` when the backend is
    /// unreachable or silent, `AppError::Protocol` on a malformed or
    /// mismatched response, and `AppError::Backend` on an `error` envelope.
    pub async fn query(&self, content: &str, intent: &str) -> Result<String> {
        let payload = self
            .call("query", json!({ "content": content, "intent": intent }))
            .await?;
        Ok(reply_text(&payload))
    }

    /// Compute an embedding vector.
    ///
    /// Accepts either a bare numeric array or `{"embedding": [...]}`.
    ///
    /// # Errors
    ///
    /// Same as [`BackendClient::query`]; a non-numeric payload is
    /// `AppError::Protocol`.
    pub async fn embed(&self, content: &str) -> Result<Vec<f64>> {
        let payload = self.call("embed", json!({ "content": content })).await?;
        let vector = match payload {
            Value::Object(mut fields) => fields.remove("embedding").unwrap_or(Value::Null),
            other => other,
        };
        serde_json::from_value(vector)
            .map_err(|err| AppError::Protocol(format!("embed payload is not a float array: {err}")))
    }

    /// Liveness check.
    ///
    /// # Errors
    ///
    /// Fails within `dial_attempts * dial_backoff` when the socket is
    /// unreachable, or within the request timeout when the backend is
    /// silent.
    pub async fn ping(&self) -> Result<()> {
        self.call("ping", json!({})).await.map(|_| ())
    }

    /// Backend self-reported status document.
    ///
    /// # Errors
    ///
    /// Same as [`BackendClient::query`].
    pub async fn status(&self) -> Result<Value> {
        self.call("status", json!({})).await
    }

    /// Stream a reply over a dedicated connection.
    ///
    /// Each delta is sent on the returned channel. The channel closes after
    /// the `final` envelope; on failure one `"[stream error: ...]"` item is
    /// sent first. Responses carrying another request's id are skipped.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn query_stream(&self, content: &str, intent: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let request = Request::new(
            "query",
            self.next_id(),
            json!({ "content": content, "intent": intent, "stream": true }),
        );
        let dialer = self.dialer.clone();
        let idle_timeout = self.request_timeout;
        let span = info_span!("backend_stream", request_id = %request.id);

        tokio::spawn(
            async move {
                if let Err(err) = run_stream(&dialer, request, idle_timeout, &tx).await {
                    warn!(%err, "backend stream failed");
                    let _ = tx.send(format!("[stream error: {err}]")).await;
                }
            }
            .instrument(span),
        );
        rx
    }

    async fn call(&self, method: &str, payload: Value) -> Result<Value> {
        let request = Request::new(method, self.next_id(), payload);
        let line = serde_json::to_string(&request)?;
        let mut slot = self.conn.lock().await;

        let outcome = tokio::time::timeout(
            self.request_timeout,
            self.exchange(&mut slot, &request.id, line),
        )
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "backend {method} exceeded {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }

    async fn exchange(
        &self,
        slot: &mut Option<Connection>,
        id: &str,
        line: String,
    ) -> Result<Value> {
        let reused = slot.is_some();
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.dialer.dial().await?,
        };

        if let Err(err) = conn.send(line.clone()).await {
            if !reused {
                return Err(as_transport(err));
            }
            debug!(%err, "write on reused backend connection failed, redialing");
            conn = self.dialer.dial().await?;
            conn.send(line).await.map_err(as_transport)?;
        }

        let response = read_response(&mut conn).await?;
        if response.id != id {
            return Err(AppError::Protocol(format!(
                "response id mismatch: expected {id}, got {}",
                response.id
            )));
        }

        *slot = Some(conn);
        match response.kind {
            ResponseKind::Error => Err(AppError::Backend(error_message(&response.payload))),
            ResponseKind::Response | ResponseKind::Final => Ok(response.payload),
        }
    }
}

async fn run_stream(
    dialer: &Dialer,
    request: Request,
    idle_timeout: Duration,
    tx: &mpsc::Sender<String>,
) -> Result<()> {
    let mut conn = dialer.dial().await?;
    let line = serde_json::to_string(&request)?;
    conn.send(line).await.map_err(as_transport)?;

    loop {
        let response = tokio::time::timeout(idle_timeout, read_response(&mut conn))
            .await
            .map_err(|_| {
                AppError::Timeout(format!("no stream data for {}s", idle_timeout.as_secs()))
            })??;

        if response.id != request.id {
            debug!(got = %response.id, "skipping stream chunk for another request");
            continue;
        }

        match response.kind {
            ResponseKind::Error => {
                return Err(AppError::Backend(error_message(&response.payload)));
            }
            ResponseKind::Response => {
                if let Some(delta) = stream_delta(&response.payload) {
                    if tx.send(delta).await.is_err() {
                        debug!("stream receiver dropped");
                        return Ok(());
                    }
                }
            }
            ResponseKind::Final => {
                if let Some(delta) = stream_delta(&response.payload) {
                    if !delta.is_empty() {
                        let _ = tx.send(delta).await;
                    }
                }
                return Ok(());
            }
        }
    }
}

async fn read_response(conn: &mut Connection) -> Result<Response> {
    loop {
        match conn.next().await {
            Some(Ok(line)) if line.trim().is_empty() => {}
            Some(Ok(line)) => {
                return serde_json::from_str(&line)
                    .map_err(|err| AppError::Protocol(format!("malformed envelope: {err}")));
            }
            Some(Err(err)) => return Err(as_transport(err)),
            None => return Err(AppError::Transport("backend closed the connection".into())),
        }
    }
}

/// Framed I/O errors arrive as `AppError::Io`; on the socket they are
/// transport failures. Protocol errors from the codec pass through.
fn as_transport(err: AppError) -> AppError {
    match err {
        AppError::Io(msg) => AppError::Transport(msg),
        other => other,
    }
}

impl Reasoner for BackendClient {
    fn query<'a>(&'a self, content: &'a str, intent: &'a str) -> ReasonerFuture<'a, String> {
        Box::pin(BackendClient::query(self, content, intent))
    }

    fn embed<'a>(&'a self, content: &'a str) -> ReasonerFuture<'a, Vec<f64>> {
        Box::pin(BackendClient::embed(self, content))
    }
}
