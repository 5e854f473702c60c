//! Built-in tools: file access, shell, notifications, task delegation.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tracing::info;

use crate::channels::ChannelRegistry;
use crate::orchestrator::task_manager::TaskManager;
use crate::tools::path_safety::resolve_in_workspace;
use crate::tools::{Tool, ToolClass, ToolFuture, ToolRegistry};
use crate::{AppError, Result};

/// Substrings that make the shell tool refuse a command.
pub const SHELL_BLACKLIST: [&str; 14] = [
    "rm ", "mkfs", "dd ", "fdisk", "reboot", "shutdown", "init ", "chmod", "chown", "mv /",
    "> /dev", "kill", "halt", "poweroff",
];

/// Largest file `read_file` returns.
const MAX_READ_BYTES: u64 = 256 * 1024;

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Protocol(format!("missing string parameter '{key}'")))
}

/// Build a registry holding every built-in tool.
#[must_use]
pub fn builtin_registry(
    workspace_root: PathBuf,
    shell_timeout: Duration,
    channels: Arc<ChannelRegistry>,
    tasks: Arc<TaskManager>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool {
        root: workspace_root.clone(),
    }));
    registry.register(Arc::new(ListDirTool {
        root: workspace_root.clone(),
    }));
    registry.register(Arc::new(WriteFileTool {
        root: workspace_root.clone(),
    }));
    registry.register(Arc::new(ShellTool {
        root: workspace_root,
        timeout: shell_timeout,
    }));
    registry.register(Arc::new(NotifyTool { channels }));
    registry.register(Arc::new(StartTaskTool { tasks }));
    registry
}

/// `read_file {path}`.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    async fn read(&self, params: &Value) -> Result<String> {
        let path = resolve_in_workspace(&self.root, str_param(params, "path")?)?;
        let meta = tokio::fs::metadata(&path).await?;
        if meta.len() > MAX_READ_BYTES {
            return Err(AppError::Io(format!(
                "{} is {} bytes, limit is {MAX_READ_BYTES}",
                path.display(),
                meta.len()
            )));
        }
        Ok(tokio::fs::read_to_string(&path).await?)
    }
}

impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 file inside the workspace. params: {path}"
    }

    fn class(&self) -> ToolClass {
        ToolClass::ReadOnly
    }

    fn call<'a>(&'a self, params: &'a Value) -> ToolFuture<'a> {
        Box::pin(self.read(params))
    }
}

/// `list_dir {path?}`.
pub struct ListDirTool {
    root: PathBuf,
}

impl ListDirTool {
    async fn list(&self, params: &Value) -> Result<String> {
        let relative = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = resolve_in_workspace(&self.root, relative)?;
        let mut entries = tokio::fs::read_dir(&path).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|kind| kind.is_dir()) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names.join("\n"))
    }
}

impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory inside the workspace. params: {path}"
    }

    fn class(&self) -> ToolClass {
        ToolClass::ReadOnly
    }

    fn call<'a>(&'a self, params: &'a Value) -> ToolFuture<'a> {
        Box::pin(self.list(params))
    }
}

/// `write_file {path, content}`.
pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    async fn write(&self, params: &Value) -> Result<String> {
        let path = resolve_in_workspace(&self.root, str_param(params, "path")?)?;
        let content = str_param(params, "content")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        info!(path = %path.display(), bytes = content.len(), "file written by tool");
        Ok(format!("wrote {} bytes to {}", content.len(), path.display()))
    }
}

impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file inside the workspace. params: {path, content}"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Mutating
    }

    fn call<'a>(&'a self, params: &'a Value) -> ToolFuture<'a> {
        Box::pin(self.write(params))
    }
}

/// Whether `command` contains a blacklisted fragment.
#[must_use]
pub fn is_blacklisted(command: &str) -> bool {
    let lower = command.to_lowercase();
    SHELL_BLACKLIST.iter().any(|fragment| lower.contains(fragment))
}

/// `shell {command}` run with `sh -c` in the workspace root.
pub struct ShellTool {
    root: PathBuf,
    timeout: Duration,
}

impl ShellTool {
    async fn run(&self, params: &Value) -> Result<String> {
        let command = str_param(params, "command")?;
        if is_blacklisted(command) {
            return Err(AppError::Script(format!("refused destructive command: {command}")));
        }

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::Script(format!("cannot launch sh: {err}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| AppError::Timeout(format!("shell command exceeded {}s", self.timeout.as_secs())))?
            .map_err(|err| AppError::Script(err.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if output.status.success() {
            Ok(combined)
        } else {
            Err(AppError::Script(format!("exit {}: {combined}", output.status)))
        }
    }
}

impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace; destructive commands are refused. params: {command}"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Mutating
    }

    fn call<'a>(&'a self, params: &'a Value) -> ToolFuture<'a> {
        Box::pin(self.run(params))
    }
}

/// `notify {message}` broadcast on every channel.
pub struct NotifyTool {
    channels: Arc<ChannelRegistry>,
}

impl NotifyTool {
    async fn notify(&self, params: &Value) -> Result<String> {
        let message = str_param(params, "message")?;
        self.channels.broadcast(message).await?;
        Ok("notified".into())
    }
}

impl Tool for NotifyTool {
    fn name(&self) -> &str {
        "notify"
    }

    fn description(&self) -> &str {
        "Broadcast a message to the operator on every channel. params: {message}"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Mutating
    }

    fn call<'a>(&'a self, params: &'a Value) -> ToolFuture<'a> {
        Box::pin(self.notify(params))
    }
}

/// `start_task {content}` delegated to the task manager.
pub struct StartTaskTool {
    tasks: Arc<TaskManager>,
}

impl StartTaskTool {
    async fn start(&self, params: &Value) -> Result<String> {
        let content = str_param(params, "content")?;
        let task = self.tasks.start_task(content, None).await?;
        Ok(format!("started task {}", task.id))
    }
}

impl Tool for StartTaskTool {
    fn name(&self) -> &str {
        "start_task"
    }

    fn description(&self) -> &str {
        "Queue a background task for the reasoning backend. params: {content}"
    }

    fn class(&self) -> ToolClass {
        ToolClass::Mutating
    }

    fn call<'a>(&'a self, params: &'a Value) -> ToolFuture<'a> {
        Box::pin(self.start(params))
    }
}
