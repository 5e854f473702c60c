//! Priority dispatcher.
//!
//! Inbound messages land in one of three bounded queues. A single loop
//! drains them with a biased `select!`, so whenever several levels hold
//! messages the highest one is taken first, and FIFO order holds within a
//! level. The loop only decides *start* order: each message's work runs on
//! its own task so a slow backend call never blocks draining the next.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::channels::{ChannelRegistry, InboundHandler};
use crate::config::DispatcherConfig;
use crate::models::history::{ConversationRef, HistoryMessage, ReplyRoute};
use crate::models::message::{Priority, QueuedMessage};
use crate::orchestrator::delegates::{parse_mention, DelegateRegistry};
use crate::orchestrator::missions::MissionRegistry;
use crate::orchestrator::task_manager::TaskManager;
use crate::persistence::history_repo::HistoryRepo;
use crate::rpc::{fallback, Reasoner};
use crate::{AppError, Result};

/// Immediate notice sent to the sender before any processing.
pub const ACK_TEXT: &str = "Received, working on it...";

/// How long in-flight message work may run after shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Work produced for one dequeued message.
pub type ProcessFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Turns a dequeued message into work.
///
/// `process` itself runs on the dispatch loop, in priority order; the
/// returned future is spawned and runs concurrently with later messages.
pub trait MessageProcessor: Send + Sync {
    /// Begin handling `msg`.
    fn process(&self, msg: QueuedMessage) -> ProcessFuture;
}

/// Producer side: classifies and enqueues messages.
pub struct Dispatcher {
    high: mpsc::Sender<QueuedMessage>,
    normal: mpsc::Sender<QueuedMessage>,
    low: mpsc::Sender<QueuedMessage>,
    enqueue_timeout: Duration,
}

/// Consumer side, handed to [`spawn_dispatch_loop`].
pub struct DispatchQueues {
    high: mpsc::Receiver<QueuedMessage>,
    normal: mpsc::Receiver<QueuedMessage>,
    low: mpsc::Receiver<QueuedMessage>,
}

impl Dispatcher {
    /// Create a dispatcher with three queues of `capacity` each.
    #[must_use]
    pub fn new(capacity: usize, enqueue_timeout: Duration) -> (Self, DispatchQueues) {
        let (high, high_rx) = mpsc::channel(capacity);
        let (normal, normal_rx) = mpsc::channel(capacity);
        let (low, low_rx) = mpsc::channel(capacity);
        (
            Self {
                high,
                normal,
                low,
                enqueue_timeout,
            },
            DispatchQueues {
                high: high_rx,
                normal: normal_rx,
                low: low_rx,
            },
        )
    }

    /// Create a dispatcher from the `[dispatcher]` section.
    #[must_use]
    pub fn from_config(config: &DispatcherConfig) -> (Self, DispatchQueues) {
        Self::new(
            config.queue_capacity,
            Duration::from_millis(config.enqueue_timeout_ms),
        )
    }

    fn sender(&self, priority: Priority) -> &mpsc::Sender<QueuedMessage> {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    /// Enqueue `msg` on the queue matching its priority.
    ///
    /// A full queue is waited on for up to the enqueue timeout rather than
    /// dropping the message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::QueueFull` when the queue stays full, or
    /// `AppError::Channel` once the dispatch loop has gone away.
    pub async fn enqueue(&self, msg: QueuedMessage) -> Result<Priority> {
        let priority = msg.priority;
        let tx = self.sender(priority);

        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                debug!(priority = priority.as_str(), "queue full, waiting");
                match tokio::time::timeout(self.enqueue_timeout, tx.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return Err(AppError::Channel("dispatcher stopped".into())),
                    Err(_) => {
                        return Err(AppError::QueueFull(format!(
                            "{} queue still full after {}ms",
                            priority.as_str(),
                            self.enqueue_timeout.as_millis()
                        )));
                    }
                }
            }
            Err(TrySendError::Closed(_)) => {
                return Err(AppError::Channel("dispatcher stopped".into()));
            }
        }

        debug!(priority = priority.as_str(), "message enqueued");
        Ok(priority)
    }

    /// Enqueue with an explicit priority, bypassing classification.
    ///
    /// # Errors
    ///
    /// Same as [`Dispatcher::enqueue`].
    pub async fn enqueue_with_priority(
        &self,
        platform: &str,
        chat_id: &str,
        from: &str,
        text: &str,
        priority: Priority,
    ) -> Result<Priority> {
        self.enqueue(QueuedMessage::with_priority(
            platform, chat_id, from, text, priority,
        ))
        .await
    }

    /// Callback handed to channels: classifies, enqueues, and returns a
    /// receipt (`"queued (normal)"`) or the enqueue error text.
    #[must_use]
    pub fn inbound_handler(self: &Arc<Self>) -> InboundHandler {
        let dispatcher = Arc::clone(self);
        Arc::new(move |platform, chat_id, from, text| {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move {
                let msg = QueuedMessage::new(&platform, &chat_id, &from, &text);
                match dispatcher.enqueue(msg).await {
                    Ok(priority) => format!("queued ({})", priority.as_str()),
                    Err(err) => {
                        warn!(%platform, %chat_id, %err, "inbound message rejected");
                        err.to_string()
                    }
                }
            })
        })
    }
}

/// Spawn the dispatch loop.
///
/// Runs until `cancel` fires, then gives in-flight work a short grace
/// period to finish.
#[must_use]
pub fn spawn_dispatch_loop(
    mut queues: DispatchQueues,
    processor: Arc<dyn MessageProcessor>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let in_flight = TaskTracker::new();
            loop {
                let msg = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    Some(msg) = queues.high.recv() => msg,
                    Some(msg) = queues.normal.recv() => msg,
                    Some(msg) = queues.low.recv() => msg,
                    else => break,
                };

                let span = info_span!(
                    "message",
                    platform = %msg.platform,
                    chat_id = %msg.chat_id,
                    priority = msg.priority.as_str()
                );
                let work = {
                    let _entered = span.enter();
                    debug!("dispatching message");
                    processor.process(msg)
                };
                in_flight.spawn(work.instrument(span));
            }

            in_flight.close();
            if tokio::time::timeout(SHUTDOWN_GRACE, in_flight.wait())
                .await
                .is_err()
            {
                warn!(remaining = in_flight.len(), "in-flight messages abandoned at shutdown");
            }
            info!("dispatch loop stopped");
        }
        .instrument(info_span!("dispatcher")),
    )
}

/// Default processor: acknowledge, record history, answer, reply.
#[derive(Clone)]
pub struct ConversationProcessor {
    reasoner: Arc<dyn Reasoner>,
    history: HistoryRepo,
    channels: Arc<ChannelRegistry>,
    tasks: Arc<TaskManager>,
    delegates: Arc<DelegateRegistry>,
    missions: Arc<MissionRegistry>,
    context_messages: u32,
    reply_timeout: Duration,
}

impl ConversationProcessor {
    /// Wire a processor from its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        history: HistoryRepo,
        channels: Arc<ChannelRegistry>,
        tasks: Arc<TaskManager>,
        delegates: Arc<DelegateRegistry>,
        missions: Arc<MissionRegistry>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            reasoner,
            history,
            channels,
            tasks,
            delegates,
            missions,
            context_messages: config.context_messages,
            reply_timeout: Duration::from_secs(config.reply_timeout_seconds),
        }
    }

    async fn handle(&self, msg: QueuedMessage) {
        if let Err(err) = self.channels.send(&msg.platform, &msg.chat_id, ACK_TEXT).await {
            warn!(%err, "acknowledgement not delivered");
        }

        let conversation = match self
            .history
            .get_or_create_conversation(&msg.platform, &msg.chat_id)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(%err, "conversation lookup failed, answering without history");
                None
            }
        };

        let context = match &conversation {
            Some(id) => self
                .history
                .recent_messages(id, self.context_messages)
                .await
                .unwrap_or_else(|err| {
                    warn!(%err, "history read failed");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        if let Some(id) = &conversation {
            if let Err(err) = self.history.add_message(id, "user", &msg.text).await {
                warn!(%err, "failed to record user message");
            }
        }

        let reply = self.respond(&msg, conversation.as_deref(), &context).await;

        if let Some(id) = &conversation {
            if let Err(err) = self.history.add_message(id, "assistant", &reply).await {
                warn!(%err, "failed to record reply");
            }
        }

        if let Err(err) = self.channels.send(&msg.platform, &msg.chat_id, &reply).await {
            warn!(%err, "reply not delivered");
        }
    }

    async fn respond(
        &self,
        msg: &QueuedMessage,
        conversation: Option<&str>,
        context: &[HistoryMessage],
    ) -> String {
        let text = msg.text.trim();

        if text == "/status" {
            return self.status_text().await;
        }

        if let Some(rest) = text.strip_prefix("/mission ") {
            return self.create_mission(rest.trim()).await;
        }

        if let Some((id, task_text)) = parse_mention(text) {
            if let Some(delegate) = self.delegates.get(id).await {
                let conversation = conversation.map(|conversation_id| ConversationRef {
                    conversation_id: conversation_id.to_owned(),
                    reply_to: Some(ReplyRoute {
                        platform: msg.platform.clone(),
                        chat_id: msg.chat_id.clone(),
                    }),
                });
                return match self
                    .tasks
                    .start_task(&delegate.augment(task_text), conversation)
                    .await
                {
                    Ok(task) => format!("Delegated to agent '{}' (task {})", delegate.name, task.id),
                    Err(err) => format!("Could not delegate to '{}': {err}", delegate.name),
                };
            }
            debug!(delegate = id, "unknown delegate, answering directly");
        }

        let prompt = build_prompt(context, text);
        let outcome = tokio::time::timeout(self.reply_timeout, self.reasoner.query(&prompt, "ask")).await;
        match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) if err.is_transport() => {
                warn!(%err, "backend unreachable, using fallback reply");
                fallback::synthesize(text)
            }
            Ok(Err(err)) => {
                warn!(%err, "backend query failed");
                format!("Sorry, I could not process that: {err}")
            }
            Err(_) => {
                warn!("backend reply timed out, using fallback reply");
                fallback::synthesize(text)
            }
        }
    }

    async fn status_text(&self) -> String {
        let mut lines = vec![format!("Tasks: {}", self.tasks.status_summary().await)];
        match self.missions.active_mission().await {
            Some(mission) => {
                let remaining = mission.time_remaining(chrono::Utc::now());
                lines.push(format!(
                    "Mission: {} ({:.0}% done, {}h {}m left)",
                    mission.title,
                    mission.progress * 100.0,
                    remaining.num_hours(),
                    remaining.num_minutes() % 60
                ));
            }
            None => lines.push("Mission: none active".into()),
        }
        lines.join("\n")
    }

    async fn create_mission(&self, text: &str) -> String {
        if text.is_empty() {
            return "Usage: /mission <description>".into();
        }
        let suggestion = match self.missions.infer_from_text(self.reasoner.as_ref(), text).await {
            Ok(suggestion) => suggestion,
            Err(err) => return format!("Could not create a mission: {err}"),
        };
        match self
            .missions
            .create(&suggestion.title, &suggestion.reason, &suggestion.goal, suggestion.deadline)
            .await
        {
            Ok(mission) => format!(
                "Mission created: {} (id {}, due {})",
                mission.title,
                mission.id,
                mission.deadline.to_rfc3339()
            ),
            Err(err) => format!("Could not create a mission: {err}"),
        }
    }
}

impl MessageProcessor for ConversationProcessor {
    fn process(&self, msg: QueuedMessage) -> ProcessFuture {
        let processor = self.clone();
        Box::pin(async move { processor.handle(msg).await })
    }
}

/// Prompt with prior messages prepended as context.
fn build_prompt(context: &[HistoryMessage], text: &str) -> String {
    if context.is_empty() {
        return text.to_owned();
    }
    let mut prompt = String::from("CONVERSATION CONTEXT:\n");
    for message in context {
        prompt.push_str(&message.role);
        prompt.push_str(": ");
        prompt.push_str(&message.content);
        prompt.push('\n');
    }
    prompt.push_str("\nUSER: ");
    prompt.push_str(text);
    prompt
}
