//! Local IPC server for `steward-ctl`, doubling as the `ipc` channel.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "message", "text": "summarize today's notes"}
//! {"command": "tasks"}
//! {"command": "status"}
//! {"command": "mission_create", "title": "Ship v1", "goal": "...", "deadline": "3d"}
//! {"command": "mission_status"}
//! {"command": "schedule"}
//! {"command": "beat"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "kind": "response", "data": { ... }}
//! {"ok": false, "kind": "response", "error": "unknown command: foo"}
//! ```
//!
//! Messages the daemon sends to a connected client (acknowledgements,
//! replies, broadcasts) arrive asynchronously on the same connection as
//! `{"ok": true, "kind": "message", "data": {"text": "..."}}`. Each
//! connection is its own chat, `ctl-<n>`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::channels::{Channel, ChannelFuture, InboundHandler};
use crate::orchestrator::heartbeat::Heartbeat;
use crate::orchestrator::missions::{parse_deadline, MissionRegistry};
use crate::orchestrator::scheduler::Scheduler;
use crate::orchestrator::task_manager::TaskManager;
use crate::{AppError, Result};

/// Registry name of the IPC channel.
pub const IPC_CHANNEL: &str = "ipc";

/// Outbound lines buffered per client before sends start failing.
const CLIENT_BACKLOG: usize = 256;

/// Services the IPC commands operate on.
pub struct ControlPlane {
    /// Task lifecycle manager.
    pub tasks: Arc<TaskManager>,
    /// Mission registry.
    pub missions: Arc<MissionRegistry>,
    /// Periodic scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Heartbeat loop.
    pub heartbeat: Arc<Heartbeat>,
}

/// Inbound IPC request from `steward-ctl`.
#[derive(Debug, Deserialize)]
struct IpcRequest {
    /// Command verb.
    command: String,
    /// Message body (`message`).
    text: Option<String>,
    /// Sender label (`message`).
    from: Option<String>,
    /// Mission title (`mission_create`).
    title: Option<String>,
    /// Mission goal (`mission_create`).
    goal: Option<String>,
    /// Mission description (`mission_create`).
    description: Option<String>,
    /// RFC 3339 timestamp or relative duration (`mission_create`).
    deadline: Option<String>,
}

/// Outbound IPC line.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// `response` to a command, or `message` pushed by the daemon.
    kind: &'static str,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: Value) -> Self {
        Self {
            ok: true,
            kind: "response",
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            kind: "response",
            data: None,
            error: Some(message.into()),
        }
    }

    fn message(text: &str) -> Self {
        Self {
            ok: true,
            kind: "message",
            data: Some(json!({ "text": text })),
            error: None,
        }
    }

    fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"ok":false,"kind":"response","error":"serialization failed"}"#.to_owned());
        line.push('\n');
        line
    }
}

struct IpcShared {
    control: OnceLock<Arc<ControlPlane>>,
    clients: Mutex<HashMap<String, mpsc::Sender<String>>>,
    next_client: AtomicU64,
}

/// Named local socket serving `steward-ctl`.
pub struct IpcChannel {
    ipc_name: String,
    shared: Arc<IpcShared>,
    stop: CancellationToken,
}

impl IpcChannel {
    /// Create a channel listening on the namespaced socket `ipc_name`.
    ///
    /// Nothing is bound until [`Channel::start`].
    #[must_use]
    pub fn new(ipc_name: &str) -> Self {
        Self {
            ipc_name: ipc_name.to_owned(),
            shared: Arc::new(IpcShared {
                control: OnceLock::new(),
                clients: Mutex::new(HashMap::new()),
                next_client: AtomicU64::new(1),
            }),
            stop: CancellationToken::new(),
        }
    }

    /// Provide the services commands operate on. Must happen before the
    /// channel starts; later calls are ignored.
    pub fn attach(&self, control: Arc<ControlPlane>) {
        if self.shared.control.set(control).is_err() {
            warn!("ipc control plane already attached");
        }
    }

    async fn listen(&self, cancel: CancellationToken, on_message: InboundHandler) -> Result<()> {
        let name = self.ipc_name.clone();
        let listener_name = name
            .clone()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| AppError::Channel(format!("invalid ipc socket name '{name}': {err}")))?;

        let listener = ListenerOptions::new()
            .name(listener_name)
            .create_tokio()
            .map_err(|err| AppError::Channel(format!("failed to create ipc listener: {err}")))?;

        info!(ipc_name = %name, "IPC server listening");

        let shared = Arc::clone(&self.shared);
        let stop = self.stop.clone();
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = stop.cancelled() => break,
                        accept_result = listener.accept() => {
                            match accept_result {
                                Ok(stream) => {
                                    tokio::spawn(handle_connection(
                                        stream,
                                        Arc::clone(&shared),
                                        Arc::clone(&on_message),
                                    ));
                                }
                                Err(err) => warn!(%err, "IPC accept failed"),
                            }
                        }
                    }
                }
                info!("IPC server shutting down");
            }
            .instrument(info_span!("ipc_server", name = %self.ipc_name)),
        );
        Ok(())
    }

    async fn push(&self, to: &str, text: &str) -> Result<()> {
        let clients = self.shared.clients.lock().await;
        let tx = clients
            .get(to)
            .ok_or_else(|| AppError::Channel(format!("no ipc client {to}")))?;
        tx.try_send(IpcResponse::message(text).to_line())
            .map_err(|err| AppError::Channel(format!("ipc client {to}: {err}")))
    }

    async fn push_all(&self, text: &str) -> Result<()> {
        let line = IpcResponse::message(text).to_line();
        for (chat_id, tx) in self.shared.clients.lock().await.iter() {
            if let Err(err) = tx.try_send(line.clone()) {
                debug!(%chat_id, %err, "broadcast skipped client");
            }
        }
        Ok(())
    }
}

impl Channel for IpcChannel {
    fn name(&self) -> &str {
        IPC_CHANNEL
    }

    fn start(&self, cancel: CancellationToken, on_message: InboundHandler) -> ChannelFuture<'_> {
        Box::pin(self.listen(cancel, on_message))
    }

    fn stop(&self) -> ChannelFuture<'_> {
        self.stop.cancel();
        Box::pin(async { Ok(()) })
    }

    fn send<'a>(&'a self, to: &'a str, text: &'a str) -> ChannelFuture<'a> {
        Box::pin(self.push(to, text))
    }

    fn broadcast<'a>(&'a self, text: &'a str) -> ChannelFuture<'a> {
        Box::pin(self.push_all(text))
    }
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    shared: Arc<IpcShared>,
    on_message: InboundHandler,
) {
    let chat_id = format!("ctl-{}", shared.next_client.fetch_add(1, Ordering::Relaxed));
    let span = info_span!("ipc_conn", %chat_id);
    async move {
        let (reader, mut writer) = stream.split();
        let (tx, mut rx) = mpsc::channel::<String>(CLIENT_BACKLOG);
        shared.clients.lock().await.insert(chat_id.clone(), tx.clone());

        let writer_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(err) = writer.write_all(line.as_bytes()).await {
                    warn!(%err, "failed to write ipc line");
                    break;
                }
            }
        });

        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &shared, &on_message, &chat_id).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };
                    if tx.send(response.to_line()).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        shared.clients.lock().await.remove(&chat_id);
        drop(tx);
        let _ = writer_task.await;
        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the appropriate handler.
async fn dispatch_command(
    request: &IpcRequest,
    shared: &IpcShared,
    on_message: &InboundHandler,
    chat_id: &str,
) -> IpcResponse {
    debug!(command = %request.command, "ipc command");

    if request.command == "message" {
        return handle_message(request, on_message, chat_id).await;
    }

    let Some(control) = shared.control.get() else {
        return IpcResponse::error("daemon is still starting");
    };

    match request.command.as_str() {
        "tasks" => {
            let tasks = control.tasks.list_tasks().await;
            IpcResponse::success(json!({ "tasks": tasks }))
        }
        "status" => handle_status(control).await,
        "mission_create" => handle_mission_create(request, control).await,
        "mission_status" => {
            let active = control.missions.active_mission().await;
            let missions = control.missions.list().await;
            IpcResponse::success(json!({ "active": active, "missions": missions }))
        }
        "schedule" => {
            let entries = control.scheduler.entries().await;
            IpcResponse::success(json!({ "entries": entries }))
        }
        "beat" => {
            control.heartbeat.trigger();
            info!("heartbeat triggered via IPC");
            IpcResponse::success(json!({ "triggered": true }))
        }
        other => IpcResponse::error(format!("unknown command: {other}")),
    }
}

async fn handle_message(request: &IpcRequest, on_message: &InboundHandler, chat_id: &str) -> IpcResponse {
    let Some(text) = request.text.as_deref().filter(|t| !t.trim().is_empty()) else {
        return IpcResponse::error("missing required 'text' field");
    };
    let from = request.from.clone().unwrap_or_else(|| "ctl".to_owned());
    let receipt = on_message(
        IPC_CHANNEL.to_owned(),
        chat_id.to_owned(),
        from,
        text.to_owned(),
    )
    .await;
    IpcResponse::success(json!({ "receipt": receipt, "chat_id": chat_id }))
}

async fn handle_status(control: &ControlPlane) -> IpcResponse {
    let counts = control.tasks.counts().await;
    let summary = control.tasks.status_summary().await;
    let active = control.missions.active_mission().await;
    let jobs = control.scheduler.entries().await;
    let interval = control.heartbeat.current_interval().await;
    IpcResponse::success(json!({
        "tasks": counts,
        "summary": summary,
        "mission": active,
        "jobs": jobs.len(),
        "heartbeat_interval_secs": interval.as_secs(),
    }))
}

async fn handle_mission_create(request: &IpcRequest, control: &ControlPlane) -> IpcResponse {
    let Some(title) = request.title.as_deref().filter(|t| !t.trim().is_empty()) else {
        return IpcResponse::error("missing required 'title' field");
    };
    let Some(raw_deadline) = request.deadline.as_deref() else {
        return IpcResponse::error("missing required 'deadline' field");
    };
    let Some(deadline) = parse_deadline(&Value::String(raw_deadline.to_owned()), Utc::now()) else {
        return IpcResponse::error(format!("invalid deadline: {raw_deadline}"));
    };
    let goal = request.goal.as_deref().unwrap_or(title);
    let description = request.description.as_deref().unwrap_or("");

    match control.missions.create(title, description, goal, deadline).await {
        Ok(mission) => {
            let heartbeat = Arc::clone(&control.heartbeat);
            let mission_id = mission.id.clone();
            tokio::spawn(async move {
                if let Err(err) = heartbeat.bootstrap_mission(&mission_id).await {
                    warn!(%mission_id, %err, "mission bootstrap failed");
                }
            });
            info!(mission_id = %mission.id, "mission created via IPC");
            IpcResponse::success(json!({ "mission": mission }))
        }
        Err(err) => IpcResponse::error(format!("failed to create mission: {err}")),
    }
}
