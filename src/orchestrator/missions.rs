//! Mission registry and mission script execution.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{info, info_span, warn, Instrument};

use crate::models::mission::{
    parse_duration, Mission, MissionStatus, MissionSuggestion, SubTask, SubTaskStatus,
};
use crate::persistence::snapshot::JsonSnapshot;
use crate::rpc::extract::parse_last;
use crate::rpc::Reasoner;
use crate::{AppError, Result};

/// Deadline used when the backend proposes none.
const DEFAULT_MISSION_DAYS: i64 = 7;

/// Bytes of script output kept in errors and logs.
const OUTPUT_LIMIT: usize = 4000;

/// A sub-task proposed by the backend.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NewSubTask {
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Ids of sub-tasks this one waits for.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// All missions, persisted to `missions.json`.
pub struct MissionRegistry {
    missions: RwLock<BTreeMap<String, Mission>>,
    snapshot: JsonSnapshot,
}

impl MissionRegistry {
    /// Load missions from `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but is unreadable.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let snapshot = JsonSnapshot::new(path);
        let stored: Vec<Mission> = snapshot.load()?;
        Ok(Self {
            missions: RwLock::new(
                stored
                    .into_iter()
                    .map(|mission| (mission.id.clone(), mission))
                    .collect(),
            ),
            snapshot,
        })
    }

    fn persist(&self, missions: &BTreeMap<String, Mission>) -> Result<()> {
        let list: Vec<&Mission> = missions.values().collect();
        self.snapshot.save(&list)
    }

    /// Create an active mission.
    ///
    /// Other active missions are left alone; a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the snapshot cannot be written.
    pub async fn create(
        &self,
        title: &str,
        description: &str,
        goal: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Mission> {
        let mut missions = self.missions.write().await;

        let base = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let mut id = base.clone();
        let mut suffix = 2;
        while missions.contains_key(&id) {
            id = format!("{base}-{suffix}");
            suffix += 1;
        }

        let already_active = missions
            .values()
            .filter(|mission| mission.status == MissionStatus::Active)
            .count();
        if already_active > 0 {
            warn!(already_active, "creating a mission while another is active");
        }

        let mission = Mission::new(
            id.clone(),
            title.to_owned(),
            description.to_owned(),
            goal.to_owned(),
            deadline,
        );
        missions.insert(id.clone(), mission.clone());
        self.persist(&missions)?;
        info!(mission_id = %id, %title, deadline = %deadline, "mission created");
        Ok(mission)
    }

    /// The active mission with the earliest deadline.
    pub async fn active_mission(&self) -> Option<Mission> {
        self.missions
            .read()
            .await
            .values()
            .filter(|mission| mission.status == MissionStatus::Active)
            .min_by_key(|mission| mission.deadline)
            .cloned()
    }

    /// Look up one mission.
    pub async fn get(&self, id: &str) -> Option<Mission> {
        self.missions.read().await.get(id).cloned()
    }

    /// All missions, oldest first.
    pub async fn list(&self) -> Vec<Mission> {
        let mut list: Vec<Mission> = self.missions.read().await.values().cloned().collect();
        list.sort_by_key(|mission| mission.created_at);
        list
    }

    /// Time left until the mission's deadline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id.
    pub async fn time_remaining(&self, id: &str, now: DateTime<Utc>) -> Result<chrono::Duration> {
        self.get(id)
            .await
            .map(|mission| mission.time_remaining(now))
            .ok_or_else(|| AppError::NotFound(format!("mission {id}")))
    }

    async fn mutate<T>(&self, id: &str, apply: impl FnOnce(&mut Mission) -> Result<T>) -> Result<T> {
        let mut missions = self.missions.write().await;
        let mission = missions
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("mission {id}")))?;
        let out = apply(mission)?;
        mission.updated_at = Utc::now();
        self.persist(&missions)?;
        Ok(out)
    }

    /// Record progress (clamped to `0.0..=1.0`) and an optional estimate of
    /// remaining work.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` or, for a non-active mission,
    /// `AppError::InvalidTransition`.
    pub async fn update_progress(
        &self,
        id: &str,
        progress: f64,
        estimated_ttc: Option<chrono::Duration>,
    ) -> Result<Mission> {
        self.mutate(id, |mission| {
            ensure_active(mission)?;
            mission.progress = progress.clamp(0.0, 1.0);
            if let Some(ttc) = estimated_ttc {
                mission.estimated_ttc_seconds = Some(ttc.num_seconds());
            }
            Ok(mission.clone())
        })
        .await
    }

    /// Mark an active mission completed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` or `AppError::InvalidTransition`.
    pub async fn complete(&self, id: &str) -> Result<Mission> {
        self.mutate(id, |mission| {
            ensure_active(mission)?;
            mission.status = MissionStatus::Completed;
            mission.progress = 1.0;
            Ok(mission.clone())
        })
        .await
    }

    /// Fail or abandon an active mission.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` unless the mission is active
    /// and `status` is `Failed` or `Abandoned`.
    pub async fn set_status(&self, id: &str, status: MissionStatus) -> Result<Mission> {
        if !matches!(status, MissionStatus::Failed | MissionStatus::Abandoned) {
            return Err(AppError::InvalidTransition(format!(
                "mission {id}: use complete() or create() for {status:?}"
            )));
        }
        self.mutate(id, |mission| {
            ensure_active(mission)?;
            mission.status = status;
            Ok(mission.clone())
        })
        .await
    }

    /// Append sub-tasks; ids are assigned sequentially (`st-1`, `st-2`, ...).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown mission.
    pub async fn add_sub_tasks(&self, id: &str, new: Vec<NewSubTask>) -> Result<Vec<SubTask>> {
        self.mutate(id, |mission| {
            let mut added = Vec::with_capacity(new.len());
            for proposal in new {
                let sub_task = SubTask {
                    id: format!("st-{}", mission.sub_tasks.len() + 1),
                    title: proposal.title,
                    description: proposal.description,
                    status: SubTaskStatus::Pending,
                    dependencies: proposal.dependencies,
                    result: None,
                };
                mission.sub_tasks.push(sub_task.clone());
                added.push(sub_task);
            }
            Ok(added)
        })
        .await
    }

    /// Update one sub-task's status and result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown mission or sub-task.
    pub async fn update_sub_task(
        &self,
        id: &str,
        sub_task_id: &str,
        status: SubTaskStatus,
        result: Option<String>,
    ) -> Result<SubTask> {
        self.mutate(id, |mission| {
            let sub_task = mission
                .sub_tasks
                .iter_mut()
                .find(|sub_task| sub_task.id == sub_task_id)
                .ok_or_else(|| AppError::NotFound(format!("sub-task {sub_task_id} of {id}")))?;
            sub_task.status = status;
            if result.is_some() {
                sub_task.result = result;
            }
            Ok(sub_task.clone())
        })
        .await
    }

    /// Ask the backend to read a mission out of free text.
    ///
    /// # Errors
    ///
    /// Propagates backend errors; returns `AppError::Protocol` when the
    /// reply holds no usable `{title, goal, deadline, reason}` object.
    pub async fn infer_from_text(&self, reasoner: &dyn Reasoner, text: &str) -> Result<MissionSuggestion> {
        let now = Utc::now();
        let prompt = format!(
            "Extract a mission from the following request. The current time is {}.\n\
             Reply with a single JSON object: \
             {{\"title\": string, \"goal\": string, \"deadline\": RFC3339 timestamp or duration like \"3d\", \"reason\": string}}.\n\n\
             REQUEST: {text}",
            now.to_rfc3339()
        );
        let reply = reasoner.query(&prompt, "ask").await?;
        let raw: RawSuggestion = parse_last(&reply)
            .ok_or_else(|| AppError::Protocol("no mission object in backend reply".into()))?;
        raw.into_suggestion(now)
    }
}

fn ensure_active(mission: &Mission) -> Result<()> {
    if mission.status == MissionStatus::Active {
        Ok(())
    } else {
        Err(AppError::InvalidTransition(format!(
            "mission {} is {:?}",
            mission.id, mission.status
        )))
    }
}

#[derive(Deserialize)]
struct RawSuggestion {
    title: String,
    #[serde(default)]
    goal: String,
    #[serde(default)]
    deadline: Value,
    #[serde(default)]
    reason: String,
}

impl RawSuggestion {
    fn into_suggestion(self, now: DateTime<Utc>) -> Result<MissionSuggestion> {
        if self.title.trim().is_empty() {
            return Err(AppError::Protocol("mission title is empty".into()));
        }
        let deadline = parse_deadline(&self.deadline, now).unwrap_or_else(|| {
            warn!(raw = %self.deadline, "unusable mission deadline, defaulting");
            now + chrono::Duration::days(DEFAULT_MISSION_DAYS)
        });
        let goal = if self.goal.is_empty() {
            self.title.clone()
        } else {
            self.goal
        };
        Ok(MissionSuggestion {
            title: self.title,
            goal,
            deadline,
            reason: self.reason,
        })
    }
}

/// Read a deadline given as an RFC 3339 timestamp, a relative duration
/// string (`"3d"`), or a number of seconds from `now`.
///
/// Offsets that overflow the representable time range read as `None`.
#[must_use]
pub fn parse_deadline(raw: &Value, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_duration(text).and_then(|offset| now.checked_add_signed(offset))),
        Value::Number(secs) => secs
            .as_i64()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|offset| now.checked_add_signed(offset)),
        _ => None,
    }
}

/// Point in a mission's life where a generated script runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStage {
    /// Prepare the workspace when a mission is created.
    Bootstrap,
    /// Verify the work before closing.
    Preflight,
    /// Package and deliver the result.
    Finalize,
}

impl ScriptStage {
    /// Lower-case stage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Preflight => "preflight",
            Self::Finalize => "finalize",
        }
    }

    fn instructions(self) -> &'static str {
        match self {
            Self::Bootstrap => {
                "Create any directories, notes, or checklists the mission needs. Do not delete anything."
            }
            Self::Preflight => {
                "Verify the deliverables exist and pass their checks. Exit non-zero if anything is missing."
            }
            Self::Finalize => {
                "Package the deliverables and write a short summary file. Exit non-zero on failure."
            }
        }
    }
}

/// Boxed future returned by [`ScriptRunner::run`].
pub type ScriptFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Runs a mission stage script, returning its output.
pub trait ScriptRunner: Send + Sync {
    /// Run `stage` for `mission`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Script` when the script fails or exits non-zero.
    fn run<'a>(&'a self, stage: ScriptStage, mission: &'a Mission) -> ScriptFuture<'a>;
}

static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:bash|sh|shell)?\s*\n(.*?)```").ok());

/// Strip a Markdown code fence around a script, if present.
#[must_use]
pub fn strip_code_fence(reply: &str) -> String {
    CODE_FENCE
        .as_ref()
        .and_then(|fence| fence.captures(reply))
        .and_then(|captures| captures.get(1))
        .map_or_else(|| reply.trim().to_owned(), |body| body.as_str().trim().to_owned())
}

/// Has the backend write the script, then runs it with `bash`.
pub struct BackendScriptRunner {
    reasoner: Arc<dyn Reasoner>,
    workspace_root: PathBuf,
    timeout: Duration,
}

impl BackendScriptRunner {
    /// Create a runner executing in `workspace_root`.
    #[must_use]
    pub fn new(reasoner: Arc<dyn Reasoner>, workspace_root: PathBuf, timeout: Duration) -> Self {
        Self {
            reasoner,
            workspace_root,
            timeout,
        }
    }

    async fn run_stage(&self, stage: ScriptStage, mission: &Mission) -> Result<String> {
        let prompt = format!(
            "Write a bash script for the {stage} stage of a mission.\n\
             MISSION: {title}\nGOAL: {goal}\nDEADLINE: {deadline}\nWORKSPACE: {root}\n\
             {instructions}\nReply with the script only.",
            stage = stage.as_str(),
            title = mission.title,
            goal = mission.goal,
            deadline = mission.deadline.to_rfc3339(),
            root = self.workspace_root.display(),
            instructions = stage.instructions(),
        );
        let reply = self
            .reasoner
            .query(&prompt, "crud")
            .await
            .map_err(|err| AppError::Script(format!("{} script generation failed: {err}", stage.as_str())))?;
        let script = strip_code_fence(&reply);
        if script.is_empty() {
            return Err(AppError::Script(format!(
                "backend returned an empty {} script",
                stage.as_str()
            )));
        }

        let mut file = tempfile::Builder::new()
            .prefix("steward-")
            .suffix(".sh")
            .tempfile()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        let child = Command::new("bash")
            .arg(file.path())
            .current_dir(&self.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::Script(format!("cannot launch bash: {err}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                AppError::Script(format!(
                    "{} script exceeded {}s",
                    stage.as_str(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| AppError::Script(format!("{} script failed: {err}", stage.as_str())))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = truncate(&combined, OUTPUT_LIMIT);

        if output.status.success() {
            info!(stage = stage.as_str(), "mission script succeeded");
            Ok(combined)
        } else {
            Err(AppError::Script(format!(
                "{} script exited with {}: {combined}",
                stage.as_str(),
                output.status
            )))
        }
    }
}

impl ScriptRunner for BackendScriptRunner {
    fn run<'a>(&'a self, stage: ScriptStage, mission: &'a Mission) -> ScriptFuture<'a> {
        let span = info_span!("mission_script", stage = stage.as_str(), mission_id = %mission.id);
        Box::pin(self.run_stage(stage, mission).instrument(span))
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_owned();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
