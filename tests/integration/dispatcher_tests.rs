//! Integration tests for the priority dispatcher.
//!
//! Validates:
//! - Queued messages start in priority order, FIFO within a level
//! - A slow message does not hold up the ones queued behind it
//! - A full queue rejects after the enqueue timeout
//! - The conversation processor acknowledges, answers, and records history
//! - An unreachable backend yields the offline fallback reply

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use steward::config::DispatcherConfig;
use steward::models::delegate::Delegate;
use steward::models::message::{Priority, QueuedMessage};
use steward::orchestrator::delegates::DelegateRegistry;
use steward::orchestrator::dispatcher::{
    spawn_dispatch_loop, ConversationProcessor, Dispatcher, MessageProcessor, ProcessFuture,
    ACK_TEXT,
};
use steward::orchestrator::missions::MissionRegistry;
use steward::orchestrator::task_manager::TaskManager;
use steward::persistence::db;
use steward::persistence::history_repo::HistoryRepo;
use steward::AppError;

use super::test_helpers::{eventually, registry_with, Behavior, FakeReasoner, RecordingChannel};

/// Records the text of each message in the order the loop starts it.
#[derive(Default)]
struct OrderRecorder {
    started: Arc<Mutex<Vec<String>>>,
}

impl MessageProcessor for OrderRecorder {
    fn process(&self, msg: QueuedMessage) -> ProcessFuture {
        self.started.lock().unwrap().push(msg.text);
        Box::pin(async {})
    }
}

/// Blocks messages named "slow" until the gate opens; logs start and finish.
struct GatedProcessor {
    gate: Arc<Semaphore>,
    events: Arc<Mutex<Vec<String>>>,
}

impl MessageProcessor for GatedProcessor {
    fn process(&self, msg: QueuedMessage) -> ProcessFuture {
        self.events.lock().unwrap().push(format!("start:{}", msg.text));
        let gate = Arc::clone(&self.gate);
        let events = Arc::clone(&self.events);
        Box::pin(async move {
            if msg.text == "slow" {
                let _permit = gate.acquire().await;
            }
            events.lock().unwrap().push(format!("done:{}", msg.text));
        })
    }
}

#[tokio::test]
async fn drains_highest_priority_first() {
    let (dispatcher, queues) = Dispatcher::new(8, Duration::from_millis(100));
    for (text, priority) in [
        ("low-1", Priority::Low),
        ("normal-1", Priority::Normal),
        ("high-1", Priority::High),
        ("normal-2", Priority::Normal),
        ("high-2", Priority::High),
    ] {
        dispatcher
            .enqueue_with_priority("ipc", "ctl-1", "me", text, priority)
            .await
            .expect("enqueue");
    }

    let recorder = OrderRecorder::default();
    let started = Arc::clone(&recorder.started);
    let cancel = CancellationToken::new();
    let handle = spawn_dispatch_loop(queues, Arc::new(recorder), cancel.clone());

    eventually("all messages started", || started.lock().unwrap().len() == 5).await;
    cancel.cancel();
    handle.await.expect("loop exits");

    assert_eq!(
        *started.lock().unwrap(),
        vec!["high-1", "high-2", "normal-1", "normal-2", "low-1"]
    );
}

#[tokio::test]
async fn slow_message_does_not_block_the_next() {
    let (dispatcher, queues) = Dispatcher::new(8, Duration::from_millis(100));
    for text in ["slow", "fast"] {
        dispatcher
            .enqueue(QueuedMessage::new("ipc", "ctl-1", "me", text))
            .await
            .expect("enqueue");
    }

    let gate = Arc::new(Semaphore::new(0));
    let events = Arc::new(Mutex::new(Vec::new()));
    let processor = GatedProcessor {
        gate: Arc::clone(&gate),
        events: Arc::clone(&events),
    };
    let cancel = CancellationToken::new();
    let handle = spawn_dispatch_loop(queues, Arc::new(processor), cancel.clone());

    eventually("fast message finished", || {
        events.lock().unwrap().iter().any(|e| e == "done:fast")
    })
    .await;
    {
        let seen = events.lock().unwrap();
        assert_eq!(seen[0], "start:slow");
        assert!(!seen.iter().any(|e| e == "done:slow"));
    }

    gate.add_permits(1);
    eventually("slow message finished", || {
        events.lock().unwrap().iter().any(|e| e == "done:slow")
    })
    .await;

    cancel.cancel();
    handle.await.expect("loop exits");
}

#[tokio::test]
async fn full_queue_rejects_after_timeout() {
    let (dispatcher, _queues) = Dispatcher::new(1, Duration::from_millis(30));

    dispatcher
        .enqueue(QueuedMessage::new("ipc", "ctl-1", "me", "first"))
        .await
        .expect("first fits");
    let second = dispatcher
        .enqueue(QueuedMessage::new("ipc", "ctl-1", "me", "second"))
        .await;

    assert!(matches!(second, Err(AppError::QueueFull(_))));
}

#[tokio::test]
async fn levels_have_independent_capacity() {
    let (dispatcher, _queues) = Dispatcher::new(1, Duration::from_millis(30));

    dispatcher
        .enqueue(QueuedMessage::new("ipc", "ctl-1", "me", "normal"))
        .await
        .expect("normal fits");
    let urgent = dispatcher
        .enqueue(QueuedMessage::new("ipc", "ctl-1", "me", "urgent: disk full"))
        .await
        .expect("high queue is separate");
    assert_eq!(urgent, Priority::High);
}

#[tokio::test]
async fn inbound_handler_reports_receipt() {
    let (dispatcher, _queues) = Dispatcher::new(4, Duration::from_millis(30));
    let handler = Arc::new(dispatcher).inbound_handler();

    let receipt = handler(
        "ipc".into(),
        "ctl-1".into(),
        "me".into(),
        "critical alert".into(),
    )
    .await;
    assert_eq!(receipt, "queued (high)");
}

struct Harness {
    processor: ConversationProcessor,
    ipc: Arc<RecordingChannel>,
    history: HistoryRepo,
    tasks: Arc<TaskManager>,
    reasoner: Arc<FakeReasoner>,
    _temp: tempfile::TempDir,
}

async fn harness(behavior: Behavior) -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let pool = Arc::new(db::connect_memory().await.expect("db"));
    let history = HistoryRepo::new(pool);
    let reasoner = FakeReasoner::new(behavior);
    let ipc = RecordingChannel::new("ipc");
    let channels = registry_with(&[Arc::clone(&ipc)]);

    let tasks = Arc::new(
        TaskManager::load(
            temp.path().join("tasks.json"),
            Arc::clone(&reasoner) as Arc<dyn steward::rpc::Reasoner>,
            Duration::from_secs(5),
        )
        .expect("tasks"),
    );
    let delegates = Arc::new(DelegateRegistry::new());
    delegates
        .register(Delegate {
            id: "coder".into(),
            name: "Coder".into(),
            description: String::new(),
            instructions: "Write Rust.".into(),
            skills: vec![],
        })
        .await;
    let missions = Arc::new(MissionRegistry::load(temp.path().join("missions.json")).expect("missions"));

    let processor = ConversationProcessor::new(
        Arc::clone(&reasoner) as Arc<dyn steward::rpc::Reasoner>,
        history.clone(),
        channels,
        Arc::clone(&tasks),
        delegates,
        missions,
        &DispatcherConfig::default(),
    );

    Harness {
        processor,
        ipc,
        history,
        tasks,
        reasoner,
        _temp: temp,
    }
}

#[tokio::test]
async fn acknowledges_then_replies_and_records_history() {
    let h = harness(Behavior::Reply("Sunny all week.".into())).await;

    h.processor
        .process(QueuedMessage::new("ipc", "ctl-1", "me", "weather?"))
        .await;

    assert_eq!(
        h.ipc.sent_to("ctl-1"),
        vec![ACK_TEXT.to_owned(), "Sunny all week.".to_owned()]
    );

    let conversation = h
        .history
        .get_or_create_conversation("ipc", "ctl-1")
        .await
        .expect("conversation");
    let messages = h
        .history
        .recent_messages(&conversation, 10)
        .await
        .expect("history");
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "assistant"]);
    assert_eq!(messages[0].content, "weather?");
}

#[tokio::test]
async fn prior_messages_are_sent_as_context() {
    let h = harness(Behavior::Reply("noted".into())).await;

    h.processor
        .process(QueuedMessage::new("ipc", "ctl-1", "me", "my name is Ada"))
        .await;
    h.processor
        .process(QueuedMessage::new("ipc", "ctl-1", "me", "what is my name?"))
        .await;

    let calls = h.reasoner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], ("ask".to_owned(), "my name is Ada".to_owned()));
    let (_, second_prompt) = &calls[1];
    assert!(second_prompt.starts_with("CONVERSATION CONTEXT:"));
    assert!(second_prompt.contains("user: my name is Ada"));
    assert!(second_prompt.contains("assistant: noted"));
    assert!(second_prompt.ends_with("USER: what is my name?"));
}

#[tokio::test]
async fn offline_backend_uses_fallback_reply() {
    let h = harness(Behavior::Offline).await;

    h.processor
        .process(QueuedMessage::new("ipc", "ctl-1", "me", "hello"))
        .await;

    let sent = h.ipc.sent_to("ctl-1");
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("offline"));
}

#[tokio::test]
async fn status_command_reports_tasks_and_mission() {
    let h = harness(Behavior::Echo).await;

    h.processor
        .process(QueuedMessage::new("ipc", "ctl-1", "me", "/status"))
        .await;

    let sent = h.ipc.sent_to("ctl-1");
    assert_eq!(sent[1], "Tasks: 0 active, 0 done\nMission: none active");
    assert!(h.reasoner.calls().is_empty());
}

#[tokio::test]
async fn mention_delegates_to_task_manager() {
    let h = harness(Behavior::Echo).await;

    h.processor
        .process(QueuedMessage::new("ipc", "ctl-1", "me", "@coder add a test"))
        .await;

    let sent = h.ipc.sent_to("ctl-1");
    assert!(sent[1].starts_with("Delegated to agent 'Coder' (task "));

    let tasks = h.tasks.list_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].content.starts_with("DELEGATE AGENT: Coder"));
    assert!(tasks[0].content.ends_with("USER TASK: add a test"));

    super::test_helpers::wait_terminal(&h.tasks, &tasks[0].id).await;
    eventually("delegated reply delivered", || h.ipc.sent_to("ctl-1").len() == 3).await;
}

#[tokio::test]
async fn unknown_mention_is_answered_directly() {
    let h = harness(Behavior::Reply("direct".into())).await;

    h.processor
        .process(QueuedMessage::new("ipc", "ctl-1", "me", "@nobody hi"))
        .await;

    assert_eq!(h.ipc.sent_to("ctl-1")[1], "direct");
    assert!(h.tasks.list_tasks().await.is_empty());
}

#[tokio::test]
async fn failed_direct_send_goes_to_fallback_channel() {
    let telegram = RecordingChannel::failing("telegram");
    let outbox = RecordingChannel::new("outbox");
    let channels = registry_with(&[Arc::clone(&telegram), Arc::clone(&outbox)]);

    channels
        .send("telegram", "42", "hi there")
        .await
        .expect("fallback delivery");

    assert_eq!(outbox.sent_to("telegram:42"), vec!["hi there".to_owned()]);
}
