//! Integration tests for the heartbeat and action gating.
//!
//! Validates:
//! - Sub-threshold actions run once when curiosity is above the set point
//!   and never when it is not
//! - Tool failures and unknown tools become grievances
//! - An unreachable backend degrades to a fallback note
//! - The mission closing sequence completes or aborts cleanly
//! - An out-of-range time estimate is ignored without failing the beat
//! - A beat that panics does not stop the heartbeat loop

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use steward::config::HeartbeatConfig;
use steward::models::drive::CURIOSITY;
use steward::models::mission::{Mission, MissionStatus, SubTaskStatus};
use steward::orchestrator::actions::{ActionExecutor, GateDecision};
use steward::orchestrator::drives::DriveState;
use steward::orchestrator::grievances::GrievanceLog;
use steward::orchestrator::heartbeat::Heartbeat;
use steward::orchestrator::missions::{MissionRegistry, ScriptFuture, ScriptRunner, ScriptStage};
use steward::persistence::db;
use steward::persistence::grievance_repo::GrievanceRepo;
use steward::rpc::Reasoner;
use steward::tools::{Tool, ToolClass, ToolFuture, ToolRegistry};
use steward::AppError;

use super::test_helpers::{eventually, registry_with, Behavior, FakeReasoner, RecordingChannel};

/// Read-only tool that counts invocations.
#[derive(Default)]
struct CountingTool {
    calls: AtomicUsize,
    fail: bool,
}

impl Tool for CountingTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Counts how often it runs"
    }

    fn class(&self) -> ToolClass {
        ToolClass::ReadOnly
    }

    fn call<'a>(&'a self, _params: &'a Value) -> ToolFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.fail {
                Err(AppError::Io("counter exploded".into()))
            } else {
                Ok("counted".to_owned())
            }
        })
    }
}

/// Script runner that records stages and can fail one of them.
#[derive(Default)]
struct FakeScripts {
    ran: Mutex<Vec<ScriptStage>>,
    fail_at: Option<ScriptStage>,
}

impl ScriptRunner for FakeScripts {
    fn run<'a>(&'a self, stage: ScriptStage, _mission: &'a Mission) -> ScriptFuture<'a> {
        self.ran.lock().unwrap().push(stage);
        Box::pin(async move {
            if self.fail_at == Some(stage) {
                Err(AppError::Script(format!("{} exited with 1", stage.as_str())))
            } else {
                Ok(format!("{} ok", stage.as_str()))
            }
        })
    }
}

struct Harness {
    heartbeat: Heartbeat,
    executor_tool: Arc<CountingTool>,
    drives: Arc<DriveState>,
    missions: Arc<MissionRegistry>,
    grievances: GrievanceRepo,
    channel: Arc<RecordingChannel>,
    scripts: Arc<FakeScripts>,
    reasoner: Arc<FakeReasoner>,
    _temp: tempfile::TempDir,
}

async fn harness(behavior: Behavior, tool: CountingTool, scripts: FakeScripts) -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let pool = Arc::new(db::connect_memory().await.expect("db"));
    let grievances = GrievanceRepo::new(pool);
    let fake = FakeReasoner::new(behavior);
    let reasoner: Arc<dyn Reasoner> = Arc::clone(&fake) as Arc<dyn Reasoner>;
    let log = GrievanceLog::new(grievances.clone(), Arc::clone(&reasoner));

    let drives = Arc::new(DriveState::load(temp.path().join("drives.json")).expect("drives"));
    let missions = Arc::new(MissionRegistry::load(temp.path().join("missions.json")).expect("missions"));

    let tool = Arc::new(tool);
    let mut tools = ToolRegistry::new();
    tools.register(Arc::clone(&tool) as Arc<dyn Tool>);

    let config = HeartbeatConfig::default();
    let executor = ActionExecutor::new(tools, Arc::clone(&drives), log.clone(), &config);
    let channel = RecordingChannel::new("ipc");
    let scripts = Arc::new(scripts);

    let heartbeat = Heartbeat::new(
        reasoner,
        Arc::clone(&missions),
        Arc::clone(&drives),
        executor,
        log,
        registry_with(&[Arc::clone(&channel)]),
        Arc::clone(&scripts) as Arc<dyn ScriptRunner>,
        config,
        temp.path().to_path_buf(),
    );

    Harness {
        heartbeat,
        executor_tool: tool,
        drives,
        missions,
        grievances,
        channel,
        scripts,
        reasoner: fake,
        _temp: temp,
    }
}

fn packet(value: &Value) -> Behavior {
    Behavior::Reply(format!("Here is my plan:\n```json\n{value}\n```"))
}

fn counter_action(score: f64) -> Value {
    json!({ "actions": [{ "tool": "counter", "parameters": {}, "assurance_score": score }] })
}

#[tokio::test]
async fn low_assurance_action_explored_once_when_curious() {
    let h = harness(packet(&counter_action(0.3)), CountingTool::default(), FakeScripts::default()).await;
    h.drives.set(CURIOSITY, 0.85).await.expect("set curiosity");

    let report = h.heartbeat.beat().await.expect("beat");

    assert_eq!(report.count(GateDecision::Explore), 1);
    assert_eq!(h.executor_tool.calls.load(Ordering::SeqCst), 1);
    let curiosity = h.drives.value(CURIOSITY).await;
    assert!((curiosity - 0.75).abs() < 1e-9, "curiosity was {curiosity}");
}

#[tokio::test]
async fn low_assurance_action_rejected_when_not_curious() {
    let h = harness(packet(&counter_action(0.3)), CountingTool::default(), FakeScripts::default()).await;
    h.drives.set(CURIOSITY, 0.7).await.expect("set curiosity");

    let report = h.heartbeat.beat().await.expect("beat");

    assert_eq!(report.count(GateDecision::Reject), 1);
    assert_eq!(h.executor_tool.calls.load(Ordering::SeqCst), 0);
    assert!((h.drives.value(CURIOSITY).await - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn confident_action_executes_without_spending_curiosity() {
    let h = harness(packet(&counter_action(0.9)), CountingTool::default(), FakeScripts::default()).await;
    h.drives.set(CURIOSITY, 0.85).await.expect("set curiosity");

    let report = h.heartbeat.beat().await.expect("beat");

    assert_eq!(report.count(GateDecision::Execute), 1);
    assert_eq!(report.actions[0].output.as_deref(), Some("counted"));
    assert_eq!(h.executor_tool.calls.load(Ordering::SeqCst), 1);
    assert!((h.drives.value(CURIOSITY).await - 0.85).abs() < 1e-9);
}

#[tokio::test]
async fn failing_tool_records_grievance() {
    let tool = CountingTool {
        fail: true,
        ..CountingTool::default()
    };
    let h = harness(packet(&counter_action(0.9)), tool, FakeScripts::default()).await;

    let report = h.heartbeat.beat().await.expect("beat");

    assert!(!report.actions[0].succeeded());
    let recorded = h.grievances.recent(10).await.expect("grievances");
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].source, "counter");
    assert!(recorded[0].content.contains("counter exploded"));
    assert_eq!(recorded[0].embedding.as_deref(), Some(&[0.1, 0.2, 0.3][..]));
}

#[tokio::test]
async fn unknown_tool_is_rejected_and_recorded() {
    let reply = json!({ "actions": [{ "tool": "teleport", "assurance_score": 1.0 }] });
    let h = harness(packet(&reply), CountingTool::default(), FakeScripts::default()).await;

    let report = h.heartbeat.beat().await.expect("beat");

    assert_eq!(report.count(GateDecision::Reject), 1);
    let recorded = h.grievances.recent(10).await.expect("grievances");
    assert_eq!(recorded[0].source, "teleport");
}

#[tokio::test]
async fn casual_message_is_broadcast_and_remembered() {
    let reply = json!({ "casual_message": "Tidying up the notes folder." });
    let h = harness(packet(&reply), CountingTool::default(), FakeScripts::default()).await;

    let report = h.heartbeat.beat().await.expect("beat");

    assert_eq!(report.casual_message.as_deref(), Some("Tidying up the notes folder."));
    assert_eq!(h.channel.broadcasts(), vec!["Tidying up the notes folder.".to_owned()]);
    let thoughts = h.drives.recent_thoughts(1).await;
    assert_eq!(thoughts[0].text, "Tidying up the notes folder.");
}

#[tokio::test]
async fn offline_backend_degrades_to_fallback() {
    let h = harness(Behavior::Offline, CountingTool::default(), FakeScripts::default()).await;

    let report = h.heartbeat.beat().await.expect("beat");

    assert!(report.fallback);
    assert!(report.actions.is_empty());
    assert!(report
        .casual_message
        .as_deref()
        .is_some_and(|note| note.contains("OFFLINE")));
    assert_eq!(h.executor_tool.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn full_progress_closes_mission() {
    let reply = json!({ "mission_progress": 1.0, "estimated_ttc": "0m" });
    let h = harness(packet(&reply), CountingTool::default(), FakeScripts::default()).await;
    let mission = h
        .missions
        .create("Ship", "", "release v1", Utc::now() + Duration::days(2))
        .await
        .expect("create");

    let report = h.heartbeat.beat().await.expect("beat");

    assert!(report.mission_closed);
    let closed = h.missions.get(&mission.id).await.expect("mission");
    assert_eq!(closed.status, MissionStatus::Completed);
    assert_eq!(
        *h.scripts.ran.lock().unwrap(),
        vec![ScriptStage::Preflight, ScriptStage::Finalize]
    );
    assert!(h
        .channel
        .broadcasts()
        .contains(&"Mission 'Ship' completed.".to_owned()));
}

#[tokio::test]
async fn failed_preflight_keeps_mission_active() {
    let reply = json!({ "finalize": true });
    let scripts = FakeScripts {
        fail_at: Some(ScriptStage::Preflight),
        ..FakeScripts::default()
    };
    let h = harness(packet(&reply), CountingTool::default(), scripts).await;
    let mission = h
        .missions
        .create("Ship", "", "release v1", Utc::now() + Duration::days(2))
        .await
        .expect("create");

    let report = h.heartbeat.beat().await.expect("beat");

    assert!(!report.mission_closed);
    let still = h.missions.get(&mission.id).await.expect("mission");
    assert_eq!(still.status, MissionStatus::Active);
    assert_eq!(*h.scripts.ran.lock().unwrap(), vec![ScriptStage::Preflight]);

    let recorded = h.grievances.recent(10).await.expect("grievances");
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].source, "preflight");
}

#[tokio::test]
async fn progress_and_sub_tasks_are_applied() {
    let reply = json!({
        "mission_progress": 0.4,
        "estimated_ttc": "3h",
        "new_sub_tasks": [
            { "title": "Write changelog" },
            { "title": "Tag release", "dependencies": ["st-1"] }
        ]
    });
    let h = harness(packet(&reply), CountingTool::default(), FakeScripts::default()).await;
    let mission = h
        .missions
        .create("Ship", "", "release v1", Utc::now() + Duration::days(2))
        .await
        .expect("create");

    h.heartbeat.beat().await.expect("beat");

    let updated = h.missions.get(&mission.id).await.expect("mission");
    assert!((updated.progress - 0.4).abs() < 1e-9);
    assert_eq!(updated.estimated_ttc_seconds, Some(3 * 3600));
    assert_eq!(updated.sub_tasks.len(), 2);
    assert_eq!(updated.sub_tasks[1].id, "st-2");
    assert_eq!(updated.sub_tasks[1].dependencies, vec!["st-1".to_owned()]);
    assert_eq!(updated.sub_tasks[0].status, SubTaskStatus::Pending);
}

#[tokio::test]
async fn huge_time_estimate_is_ignored() {
    let reply = json!({ "mission_progress": 0.2, "estimated_ttc": 9_223_372_036_854_775_807_i64 });
    let h = harness(packet(&reply), CountingTool::default(), FakeScripts::default()).await;
    let mission = h
        .missions
        .create("Ship", "", "release v1", Utc::now() + Duration::days(2))
        .await
        .expect("create");

    h.heartbeat.beat().await.expect("beat");

    let updated = h.missions.get(&mission.id).await.expect("mission");
    assert!((updated.progress - 0.2).abs() < 1e-9);
    assert_eq!(updated.estimated_ttc_seconds, None);
}

#[tokio::test]
async fn loop_survives_a_panicking_beat() {
    let h = harness(Behavior::Panic, CountingTool::default(), FakeScripts::default()).await;
    let reasoner = Arc::clone(&h.reasoner);
    let heartbeat = Arc::new(h.heartbeat);
    let cancel = CancellationToken::new();
    let handle = heartbeat.spawn_heartbeat(cancel.clone());

    eventually("first beat queried", || !reasoner.calls().is_empty()).await;
    heartbeat.trigger();
    eventually("second beat queried", || reasoner.calls().len() >= 2).await;
    assert!(!handle.is_finished());

    cancel.cancel();
    handle.await.expect("loop exits");
}
