//! Heartbeat: the autonomous mission control loop.
//!
//! Each beat gathers telemetry, a project snapshot, and memory, asks the
//! backend what to do next (intent `agent`), applies the structured
//! answer, and recomputes how long to sleep. The sleep tightens as the
//! active mission's deadline approaches.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::channels::ChannelRegistry;
use crate::config::HeartbeatConfig;
use crate::models::mission::{parse_duration, Mission, SubTaskStatus};
use crate::orchestrator::actions::{ActionExecutor, ActionOutcome, GateDecision, ProposedAction};
use crate::orchestrator::drives::DriveState;
use crate::orchestrator::grievances::GrievanceLog;
use crate::orchestrator::missions::{MissionRegistry, NewSubTask, ScriptRunner, ScriptStage};
use crate::rpc::extract::parse_last;
use crate::rpc::{fallback, Reasoner};
use crate::tools::ToolManifest;
use crate::{AppError, Result};

/// Remaining time below which the short interval is used.
const URGENT_WINDOW_HOURS: i64 = 6;

/// Remaining time below which the medium interval is used.
const SOON_WINDOW_HOURS: i64 = 24;

/// Recent action summaries kept for prompt context.
const RECENT_ACTIONS: usize = 10;

/// Recently modified files listed in the project snapshot.
const SNAPSHOT_FILES: usize = 10;

/// Upper bound on files examined for the project snapshot.
const SNAPSHOT_SCAN_LIMIT: usize = 5000;

/// Directories never scanned for the project snapshot.
const SNAPSHOT_SKIP: [&str; 3] = ["/.git/", "/target/", "/node_modules/"];

/// Pick the next sleep from the active mission's deadline pressure.
///
/// Short when the estimate exceeds the time left or fewer than 6 hours
/// remain; medium inside 24 hours; long otherwise, including when there
/// is no mission.
#[must_use]
pub fn next_interval(mission: Option<&Mission>, now: DateTime<Utc>, config: &HeartbeatConfig) -> Duration {
    let short = Duration::from_secs(config.short_seconds);
    let medium = Duration::from_secs(config.medium_seconds);
    let long = Duration::from_secs(config.long_seconds);

    let Some(mission) = mission else {
        return long;
    };

    let remaining = mission.time_remaining(now);
    let behind = mission
        .estimated_ttc()
        .is_some_and(|ttc| ttc > remaining);

    if behind || remaining < chrono::Duration::hours(URGENT_WINDOW_HOURS) {
        short
    } else if remaining < chrono::Duration::hours(SOON_WINDOW_HOURS) {
        medium
    } else {
        long
    }
}

/// Host facts included in every prompt.
#[derive(Debug, Clone, Serialize)]
pub struct Telemetry {
    /// Operating system family.
    pub os: String,
    /// Logical CPUs.
    pub cpus: usize,
    /// 1-minute load average, when the platform exposes it.
    pub load_1m: Option<f64>,
    /// `1 - load/cpus`, clamped to `0.0..=1.0`.
    pub energy: f64,
    /// Sample time.
    pub at: DateTime<Utc>,
}

impl Telemetry {
    /// Sample the host.
    #[must_use]
    pub fn collect() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let load_1m = std::fs::read_to_string("/proc/loadavg")
            .ok()
            .and_then(|raw| raw.split_whitespace().next().and_then(|v| v.parse::<f64>().ok()));
        #[allow(clippy::cast_precision_loss)]
        let energy = load_1m.map_or(1.0, |load| (1.0 - load / cpus as f64).clamp(0.0, 1.0));
        Self {
            os: std::env::consts::OS.to_owned(),
            cpus,
            load_1m,
            energy,
            at: Utc::now(),
        }
    }
}

/// Most recently modified files under `root`, relative to it.
#[must_use]
pub fn recent_files(root: &Path, limit: usize) -> Vec<String> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&root.to_string_lossy()));
    let Ok(paths) = glob::glob(&pattern) else {
        return Vec::new();
    };

    let mut files: Vec<(SystemTime, PathBuf)> = paths
        .filter_map(std::result::Result::ok)
        .filter(|path| {
            let text = path.to_string_lossy();
            !SNAPSHOT_SKIP.iter().any(|skip| text.contains(skip))
        })
        .take(SNAPSHOT_SCAN_LIMIT)
        .filter_map(|path| {
            let meta = std::fs::metadata(&path).ok()?;
            if !meta.is_file() {
                return None;
            }
            Some((meta.modified().ok()?, path))
        })
        .collect();

    files.sort_by(|a, b| b.0.cmp(&a.0));
    files
        .into_iter()
        .take(limit)
        .map(|(_, path)| {
            path.strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

/// Memory section of the prompt.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryContext {
    /// Summaries of the latest actions.
    pub recent_actions: Vec<String>,
    /// Latest grievance texts.
    pub recent_grievances: Vec<String>,
    /// `name=value` drive levels.
    pub drives: String,
    /// Latest narrative lines.
    pub thoughts: Vec<String>,
    /// Active mission, if any.
    pub mission: Option<Mission>,
}

/// Structured prompt sent on each beat.
#[derive(Debug, Clone, Serialize)]
pub struct PromptPacket {
    /// `mission` when a mission is active, else `idle`.
    pub mode: String,
    /// Recently modified workspace files.
    pub project_snapshot: Vec<String>,
    /// Host facts.
    pub telemetry: Telemetry,
    /// Prior context.
    pub memory: MemoryContext,
    /// Tools the backend may request.
    pub tools: Vec<ToolManifest>,
    /// Shape of the expected answer.
    pub response_blueprint: Value,
}

fn response_blueprint() -> Value {
    serde_json::json!({
        "intent": "short label",
        "strategy": "one sentence",
        "casual_message": "optional note for the operator",
        "actions": [{"tool": "tool name", "parameters": {}, "assurance_score": 0.0}],
        "mission_progress": 0.0,
        "estimated_ttc": "e.g. 2h45m",
        "self_correction": "optional reflection",
        "new_sub_tasks": [{"title": "", "description": "", "dependencies": []}],
        "update_sub_task": {"id": "st-1", "status": "completed", "result": ""},
        "finalize": false
    })
}

/// Sub-task status change requested by the backend.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SubTaskUpdate {
    /// Sub-task id.
    pub id: String,
    /// Loose status string.
    pub status: String,
    /// Optional outcome text.
    #[serde(default)]
    pub result: Option<String>,
}

/// Structured answer to a beat. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResponsePacket {
    /// Short label of what the backend is doing.
    pub intent: Option<String>,
    /// One-sentence plan.
    pub strategy: Option<String>,
    /// Proposed tool invocations.
    pub actions: Vec<ProposedAction>,
    /// Note for the operator.
    pub casual_message: Option<String>,
    /// Reflection recorded in the narrative.
    pub self_correction: Option<String>,
    /// New mission progress.
    pub mission_progress: Option<f64>,
    /// Remaining work, as a duration string or seconds.
    pub estimated_ttc: Option<Value>,
    /// Request the mission closing sequence.
    pub finalize: bool,
    /// Sub-tasks to add.
    pub new_sub_tasks: Vec<NewSubTask>,
    /// Sub-task to update.
    pub update_sub_task: Option<SubTaskUpdate>,
}

fn ttc_from_value(raw: &Value) -> Option<chrono::Duration> {
    match raw {
        Value::String(text) => parse_duration(text),
        Value::Number(secs) => secs.as_i64().and_then(chrono::Duration::try_seconds),
        _ => None,
    }
}

/// What one beat did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BeatReport {
    /// Mission the beat worked on.
    pub mission_id: Option<String>,
    /// Operator-facing note produced by the beat.
    pub casual_message: Option<String>,
    /// Per-action results.
    pub actions: Vec<ActionOutcome>,
    /// Whether the backend was unreachable and the fallback was used.
    pub fallback: bool,
    /// Whether the mission was completed on this beat.
    pub mission_closed: bool,
}

impl BeatReport {
    /// Count of actions with `decision`.
    #[must_use]
    pub fn count(&self, decision: GateDecision) -> usize {
        self.actions
            .iter()
            .filter(|outcome| outcome.decision == decision)
            .count()
    }
}

/// The heartbeat service.
pub struct Heartbeat {
    reasoner: Arc<dyn Reasoner>,
    missions: Arc<MissionRegistry>,
    drives: Arc<DriveState>,
    executor: ActionExecutor,
    grievances: GrievanceLog,
    channels: Arc<ChannelRegistry>,
    scripts: Arc<dyn ScriptRunner>,
    config: HeartbeatConfig,
    workspace_root: PathBuf,
    wake: Notify,
    recent_actions: Mutex<VecDeque<String>>,
}

impl Heartbeat {
    /// Wire a heartbeat from its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        missions: Arc<MissionRegistry>,
        drives: Arc<DriveState>,
        executor: ActionExecutor,
        grievances: GrievanceLog,
        channels: Arc<ChannelRegistry>,
        scripts: Arc<dyn ScriptRunner>,
        config: HeartbeatConfig,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            reasoner,
            missions,
            drives,
            executor,
            grievances,
            channels,
            scripts,
            config,
            workspace_root,
            wake: Notify::new(),
            recent_actions: Mutex::new(VecDeque::with_capacity(RECENT_ACTIONS)),
        }
    }

    /// Wake the loop now instead of at the end of its current sleep.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Interval the loop would sleep for right now.
    pub async fn current_interval(&self) -> Duration {
        let mission = self.missions.active_mission().await;
        next_interval(mission.as_ref(), Utc::now(), &self.config)
    }

    async fn build_prompt(&self, mission: Option<&Mission>) -> PromptPacket {
        let root = self.workspace_root.clone();
        let project_snapshot = tokio::task::spawn_blocking(move || recent_files(&root, SNAPSHOT_FILES))
            .await
            .unwrap_or_else(|err| {
                warn!(%err, "project snapshot failed");
                Vec::new()
            });

        let recent_grievances = match self.grievances.repo().recent(5).await {
            Ok(list) => list.into_iter().map(|g| format!("[{}] {}", g.source, g.content)).collect(),
            Err(err) => {
                warn!(%err, "grievance read failed");
                Vec::new()
            }
        };

        let memory = MemoryContext {
            recent_actions: self.recent_actions.lock().await.iter().cloned().collect(),
            recent_grievances,
            drives: self.drives.summary().await,
            thoughts: self
                .drives
                .recent_thoughts(5)
                .await
                .into_iter()
                .map(|thought| thought.text)
                .collect(),
            mission: mission.cloned(),
        };

        PromptPacket {
            mode: if mission.is_some() { "mission" } else { "idle" }.to_owned(),
            project_snapshot,
            telemetry: Telemetry::collect(),
            memory,
            tools: self.executor.tools().manifest(),
            response_blueprint: response_blueprint(),
        }
    }

    /// Run one beat.
    ///
    /// # Errors
    ///
    /// Returns non-transport backend errors. An unreachable backend is not
    /// an error: the report carries a fallback note and no actions.
    pub async fn beat(&self) -> Result<BeatReport> {
        let mission = self.missions.active_mission().await;
        let mut report = BeatReport {
            mission_id: mission.as_ref().map(|m| m.id.clone()),
            ..BeatReport::default()
        };

        let packet = self.build_prompt(mission.as_ref()).await;
        let prompt = serde_json::to_string(&packet)?;

        let reply = match self.reasoner.query(&prompt, "agent").await {
            Ok(reply) => reply,
            Err(err) if err.is_transport() => {
                warn!(%err, "backend unreachable during heartbeat");
                let note = fallback::synthesize("status");
                self.note(&format!("heartbeat degraded: {err}")).await;
                report.casual_message = Some(note);
                report.fallback = true;
                return Ok(report);
            }
            Err(err) => return Err(err),
        };

        let Some(response) = parse_last::<ResponsePacket>(&reply) else {
            debug!("heartbeat reply had no structured object");
            self.note(reply.trim()).await;
            return Ok(report);
        };

        if let Some(intent) = &response.intent {
            debug!(%intent, strategy = response.strategy.as_deref().unwrap_or(""), "heartbeat plan");
        }

        if let Some(message) = response.casual_message.as_deref().filter(|m| !m.trim().is_empty()) {
            if let Err(err) = self.channels.broadcast(message).await {
                warn!(%err, "casual message not delivered");
            }
            self.note(message).await;
            report.casual_message = Some(message.to_owned());
        }

        for action in &response.actions {
            let outcome = self.executor.execute(action).await;
            self.remember_action(&outcome).await;
            report.actions.push(outcome);
        }

        if let Some(correction) = &response.self_correction {
            self.note(&format!("self-correction: {correction}")).await;
        }

        if let Some(mission) = &mission {
            report.mission_closed = self.apply_mission_updates(mission, &response).await;
        }

        Ok(report)
    }

    async fn apply_mission_updates(&self, mission: &Mission, response: &ResponsePacket) -> bool {
        let mut progress = mission.progress;
        if let Some(reported) = response.mission_progress {
            let ttc = response.estimated_ttc.as_ref().and_then(ttc_from_value);
            match self.missions.update_progress(&mission.id, reported, ttc).await {
                Ok(updated) => {
                    progress = updated.progress;
                    info!(mission_id = %mission.id, progress, "mission progress updated");
                }
                Err(err) => warn!(%err, "mission progress not recorded"),
            }
        }

        if !response.new_sub_tasks.is_empty() {
            if let Err(err) = self
                .missions
                .add_sub_tasks(&mission.id, response.new_sub_tasks.clone())
                .await
            {
                warn!(%err, "sub-tasks not added");
            }
        }

        if let Some(update) = &response.update_sub_task {
            match SubTaskStatus::parse(&update.status) {
                Some(status) => {
                    if let Err(err) = self
                        .missions
                        .update_sub_task(&mission.id, &update.id, status, update.result.clone())
                        .await
                    {
                        warn!(%err, "sub-task not updated");
                    }
                }
                None => warn!(status = %update.status, "unknown sub-task status"),
            }
        }

        if response.finalize || progress >= 1.0 {
            match self.close_mission(&mission.id).await {
                Ok(_) => return true,
                Err(err) => warn!(%err, mission_id = %mission.id, "mission closing aborted"),
            }
        }
        false
    }

    /// Closing sequence: pre-flight script, finalize script, mark complete.
    ///
    /// A failing step records a grievance and leaves the mission active.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown mission, or the failing
    /// step's error.
    pub async fn close_mission(&self, mission_id: &str) -> Result<Mission> {
        let mission = self
            .missions
            .get(mission_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("mission {mission_id}")))?;

        for stage in [ScriptStage::Preflight, ScriptStage::Finalize] {
            if let Err(err) = self.scripts.run(stage, &mission).await {
                self.grievances
                    .record(
                        stage.as_str(),
                        &format!("mission '{}' {} failed: {err}", mission.title, stage.as_str()),
                    )
                    .await;
                return Err(err);
            }
        }

        let completed = self.missions.complete(mission_id).await?;
        let announcement = format!("Mission '{}' completed.", completed.title);
        if let Err(err) = self.channels.broadcast(&announcement).await {
            warn!(%err, "completion not announced");
        }
        self.note(&announcement).await;
        Ok(completed)
    }

    /// Run the bootstrap script for a freshly created mission.
    ///
    /// Failure is recorded as a grievance and leaves the mission active.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` or the script error.
    pub async fn bootstrap_mission(&self, mission_id: &str) -> Result<String> {
        let mission = self
            .missions
            .get(mission_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("mission {mission_id}")))?;
        match self.scripts.run(ScriptStage::Bootstrap, &mission).await {
            Ok(output) => Ok(output),
            Err(err) => {
                self.grievances
                    .record(
                        ScriptStage::Bootstrap.as_str(),
                        &format!("mission '{}' bootstrap failed: {err}", mission.title),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn note(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Err(err) = self.drives.record_thought(text).await {
            warn!(%err, "narrative not persisted");
        }
    }

    async fn remember_action(&self, outcome: &ActionOutcome) {
        let summary = match (&outcome.output, &outcome.error) {
            (_, Some(error)) => format!("{} ({:?}) failed: {error}", outcome.tool, outcome.decision),
            (Some(_), None) => format!("{} ({:?}) ok", outcome.tool, outcome.decision),
            (None, None) => format!("{} skipped", outcome.tool),
        };
        let mut recent = self.recent_actions.lock().await;
        if recent.len() == RECENT_ACTIONS {
            recent.pop_front();
        }
        recent.push_back(summary);
    }

    /// Spawn the heartbeat loop.
    ///
    /// Beats immediately, then sleeps for [`next_interval`], recomputed
    /// after every beat. [`Heartbeat::trigger`] cuts a sleep short. Each
    /// beat runs on its own task so a panic ends that beat, not the loop.
    #[must_use]
    pub fn spawn_heartbeat(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let heartbeat = Arc::clone(self);
        tokio::spawn(
            async move {
                loop {
                    let beating = Arc::clone(&heartbeat);
                    let beat = tokio::spawn(
                        async move { beating.beat().await }.instrument(info_span!("beat")),
                    );
                    match beat.await {
                        Ok(Ok(report)) => debug!(
                            executed = report.count(GateDecision::Execute),
                            explored = report.count(GateDecision::Explore),
                            rejected = report.count(GateDecision::Reject),
                            fallback = report.fallback,
                            "beat complete"
                        ),
                        Ok(Err(err)) => warn!(%err, "beat failed"),
                        Err(err) => error!(%err, "beat panicked"),
                    }

                    let wait = heartbeat.current_interval().await;
                    debug!(wait_secs = wait.as_secs(), "heartbeat sleeping");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = heartbeat.wake.notified() => debug!("heartbeat triggered"),
                        () = tokio::time::sleep(wait) => {}
                    }
                }
                info!("heartbeat stopped");
            }
            .instrument(info_span!("heartbeat")),
        )
    }
}
