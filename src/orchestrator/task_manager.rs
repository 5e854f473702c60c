//! Task lifecycle manager.
//!
//! Owns the task map and its JSON snapshot. `start_task` stores a pending
//! task and returns immediately; execution against the reasoning backend
//! happens on a spawned task that drives `pending → running → completed |
//! failed`. Every mutation rewrites the snapshot while the write lock is
//! held, so the file never lags the map.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, info_span, warn, Instrument};

use crate::channels::ChannelRegistry;
use crate::models::history::ConversationRef;
use crate::models::task::{Task, TaskStatus};
use crate::persistence::history_repo::HistoryRepo;
use crate::persistence::snapshot::JsonSnapshot;
use crate::rpc::Reasoner;
use crate::{AppError, Result};

/// Result text recorded on successful tasks.
pub const COMPLETED_RESULT: &str = "Task completed successfully.";

/// Result text for tasks found running at startup.
pub const INTERRUPTED_RESULT: &str = "interrupted by restart";

const EVENT_BUFFER: usize = 256;

/// Status change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    /// Task that changed.
    pub task_id: String,
    /// Status it moved to.
    pub status: TaskStatus,
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskCounts {
    /// Waiting to run.
    pub pending: usize,
    /// Waiting on the backend.
    pub running: usize,
    /// Finished with a reply.
    pub completed: usize,
    /// Finished with an error.
    pub failed: usize,
}

/// Owner of all delegated work.
pub struct TaskManager {
    tasks: RwLock<HashMap<String, Task>>,
    snapshot: JsonSnapshot,
    reasoner: Arc<dyn Reasoner>,
    history: Option<HistoryRepo>,
    channels: Option<Arc<ChannelRegistry>>,
    timeout: Duration,
    seq: AtomicU64,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskManager {
    /// Load the snapshot at `snapshot_path` and build a manager.
    ///
    /// Call [`TaskManager::recover`] afterwards to settle tasks left over
    /// from a previous run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the snapshot exists but is unreadable.
    pub fn load(
        snapshot_path: impl Into<PathBuf>,
        reasoner: Arc<dyn Reasoner>,
        timeout: Duration,
    ) -> Result<Self> {
        let snapshot = JsonSnapshot::new(snapshot_path);
        let stored: Vec<Task> = snapshot.load()?;
        let tasks = stored
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Ok(Self {
            tasks: RwLock::new(tasks),
            snapshot,
            reasoner,
            history: None,
            channels: None,
            timeout,
            seq: AtomicU64::new(0),
            events,
        })
    }

    /// Append final replies to conversation history.
    #[must_use]
    pub fn with_history(mut self, history: HistoryRepo) -> Self {
        self.history = Some(history);
        self
    }

    /// Deliver final replies through channels when a route is known.
    #[must_use]
    pub fn with_channels(mut self, channels: Arc<ChannelRegistry>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn next_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos());
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("task-{nanos}-{seq}")
    }

    fn persist(&self, tasks: &HashMap<String, Task>) -> Result<()> {
        let mut ordered: Vec<&Task> = tasks.values().collect();
        ordered.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        self.snapshot.save(&ordered)
    }

    fn emit(&self, task_id: &str, status: TaskStatus) {
        // No subscribers is the normal case.
        let _ = self.events.send(TaskEvent {
            task_id: task_id.to_owned(),
            status,
        });
    }

    /// Store a pending task and start executing it in the background.
    ///
    /// Returns the pending task without waiting on the backend.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the snapshot cannot be written; the task
    /// is then not kept.
    pub async fn start_task(
        self: &Arc<Self>,
        content: &str,
        conversation: Option<ConversationRef>,
    ) -> Result<Task> {
        let task = Task::new(self.next_id(), content.to_owned());
        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(task.id.clone(), task.clone());
            if let Err(err) = self.persist(&tasks) {
                tasks.remove(&task.id);
                return Err(err);
            }
            self.emit(&task.id, TaskStatus::Pending);
        }

        info!(task_id = %task.id, "task created");
        self.spawn_execution(task.id.clone(), task.content.clone(), conversation);
        Ok(task)
    }

    fn spawn_execution(
        self: &Arc<Self>,
        task_id: String,
        content: String,
        conversation: Option<ConversationRef>,
    ) {
        let manager = Arc::clone(self);
        let span = info_span!("task", task_id = %task_id);
        tokio::spawn(
            async move {
                manager.execute(&task_id, &content, conversation).await;
            }
            .instrument(span),
        );
    }

    async fn execute(&self, task_id: &str, content: &str, conversation: Option<ConversationRef>) {
        if let Err(err) = self
            .transition(task_id, TaskStatus::Running, None, Vec::new())
            .await
        {
            warn!(%err, "task could not start");
            return;
        }

        let outcome = tokio::time::timeout(self.timeout, self.reasoner.query(content, "agent")).await;
        let (status, result, logs) = match outcome {
            Ok(Ok(reply)) => (
                TaskStatus::Completed,
                COMPLETED_RESULT.to_owned(),
                reply.lines().map(str::to_owned).collect(),
            ),
            Ok(Err(err)) => (TaskStatus::Failed, err.to_string(), Vec::new()),
            Err(_) => (
                TaskStatus::Failed,
                format!("timeout: task exceeded {}s", self.timeout.as_secs()),
                Vec::new(),
            ),
        };

        match self.transition(task_id, status, Some(result), logs).await {
            Ok(task) => {
                info!(status = task.status.as_str(), "task finished");
                if let Some(conversation) = conversation {
                    self.deliver(&task, &conversation).await;
                }
            }
            Err(err) => error!(%err, "task could not finish"),
        }
    }

    async fn deliver(&self, task: &Task, conversation: &ConversationRef) {
        let text = match task.status {
            TaskStatus::Completed if !task.logs.is_empty() => task.reply_text(),
            TaskStatus::Completed => COMPLETED_RESULT.to_owned(),
            _ => format!(
                "Task {} failed: {}",
                task.id,
                task.result.as_deref().unwrap_or("unknown error")
            ),
        };

        if let Some(history) = &self.history {
            if let Err(err) = history
                .add_message(&conversation.conversation_id, "assistant", &text)
                .await
            {
                warn!(%err, "failed to append task reply to history");
            }
        }

        if let (Some(channels), Some(route)) = (&self.channels, &conversation.reply_to) {
            if let Err(err) = channels.send(&route.platform, &route.chat_id, &text).await {
                warn!(%err, platform = %route.platform, "failed to deliver task reply");
            }
        }
    }

    /// Move a task to `next`, recording `result` and `logs`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id,
    /// `AppError::InvalidTransition` for anything but a forward step, or
    /// `AppError::Io` if the snapshot cannot be written; the task is then
    /// left as it was.
    pub async fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        result: Option<String>,
        logs: Vec<String>,
    ) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;

        if !task.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "task {task_id}: {} -> {}",
                task.status.as_str(),
                next.as_str()
            )));
        }

        let previous = task.clone();
        task.status = next;
        if result.is_some() {
            task.result = result;
        }
        task.logs.extend(logs);
        if next.is_terminal() {
            task.ended_at = Some(Utc::now());
        }
        let updated = task.clone();

        if let Err(err) = self.persist(&tasks) {
            error!(%err, task_id, "task snapshot write failed");
            tasks.insert(task_id.to_owned(), previous);
            return Err(err);
        }
        self.emit(task_id, next);
        Ok(updated)
    }

    /// Settle tasks left over from a previous run.
    ///
    /// Running tasks were interrupted mid-call and are failed; pending
    /// tasks never started and are executed now (without a reply route,
    /// which is not persisted).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the snapshot cannot be written.
    pub async fn recover(self: &Arc<Self>) -> Result<()> {
        let pending: Vec<(String, String)> = {
            let mut tasks = self.tasks.write().await;
            let now = Utc::now();
            let mut interrupted = 0usize;
            for task in tasks.values_mut() {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Failed;
                    task.result = Some(INTERRUPTED_RESULT.to_owned());
                    task.ended_at = Some(now);
                    interrupted += 1;
                }
            }
            self.persist(&tasks)?;

            let pending: Vec<_> = tasks
                .values()
                .filter(|task| task.status == TaskStatus::Pending)
                .map(|task| (task.id.clone(), task.content.clone()))
                .collect();
            info!(interrupted, resumed = pending.len(), "task recovery complete");
            pending
        };

        for (task_id, content) in pending {
            self.spawn_execution(task_id, content, None);
        }
        Ok(())
    }

    /// All tasks ordered by creation time.
    pub async fn list_tasks(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<Task> = tasks.values().cloned().collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Look up one task.
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Per-status counts.
    pub async fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.read().await;
        let mut counts = TaskCounts::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// `"N active, M done"`.
    pub async fn status_summary(&self) -> String {
        let counts = self.counts().await;
        format!(
            "{} active, {} done",
            counts.pending + counts.running,
            counts.completed + counts.failed
        )
    }
}
