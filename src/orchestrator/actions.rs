//! Assurance gating and execution of backend-proposed actions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::HeartbeatConfig;
use crate::models::drive::CURIOSITY;
use crate::orchestrator::drives::DriveState;
use crate::orchestrator::grievances::GrievanceLog;
use crate::tools::{ToolClass, ToolRegistry};

/// Curiosity spent by one exploratory execution.
pub const EXPLORATION_COST: f64 = 0.1;

/// One action proposed by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProposedAction {
    /// Tool to invoke.
    pub tool: String,
    /// Tool parameters.
    #[serde(default)]
    pub parameters: Value,
    /// Backend confidence in `0.0..=1.0`.
    #[serde(default)]
    pub assurance_score: f64,
}

/// What gating decided for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Score met the threshold.
    Execute,
    /// Below threshold, but curiosity is high enough to try it once.
    Explore,
    /// Not run.
    Reject,
}

/// Decide whether an action runs.
///
/// `score >= threshold` executes. Otherwise the action is explored only
/// when `curiosity` is strictly above `set_point`.
#[must_use]
pub fn gate(score: f64, threshold: f64, curiosity: f64, set_point: f64) -> GateDecision {
    if score >= threshold {
        GateDecision::Execute
    } else if curiosity > set_point {
        GateDecision::Explore
    } else {
        GateDecision::Reject
    }
}

/// Result of handling one proposed action.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Tool requested.
    pub tool: String,
    /// Gate decision; `Reject` also covers unknown tools.
    pub decision: GateDecision,
    /// Tool output on success.
    pub output: Option<String>,
    /// Error text on failure.
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Whether the tool was invoked and succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.decision != GateDecision::Reject && self.error.is_none()
    }
}

/// Gates and runs actions against a tool registry.
pub struct ActionExecutor {
    tools: ToolRegistry,
    drives: Arc<DriveState>,
    grievances: GrievanceLog,
    read_only_threshold: f64,
    mutating_threshold: f64,
    curiosity_set_point: f64,
}

impl ActionExecutor {
    /// Build an executor with thresholds from the `[heartbeat]` section.
    #[must_use]
    pub fn new(
        tools: ToolRegistry,
        drives: Arc<DriveState>,
        grievances: GrievanceLog,
        config: &HeartbeatConfig,
    ) -> Self {
        Self {
            tools,
            drives,
            grievances,
            read_only_threshold: config.read_only_threshold,
            mutating_threshold: config.mutating_threshold,
            curiosity_set_point: config.curiosity_set_point,
        }
    }

    /// Tool registry used for lookups and the prompt manifest.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn threshold(&self, class: ToolClass) -> f64 {
        match class {
            ToolClass::ReadOnly => self.read_only_threshold,
            ToolClass::Mutating => self.mutating_threshold,
        }
    }

    /// Gate `action` and run it at most once.
    ///
    /// Failures, including unknown tools, are recorded as grievances.
    pub async fn execute(&self, action: &ProposedAction) -> ActionOutcome {
        let Some(tool) = self.tools.get(&action.tool) else {
            let error = format!("unknown tool '{}'", action.tool);
            self.grievances.record(&action.tool, &error).await;
            return ActionOutcome {
                tool: action.tool.clone(),
                decision: GateDecision::Reject,
                output: None,
                error: Some(error),
            };
        };

        let threshold = self.threshold(tool.class());
        let curiosity = self.drives.value(CURIOSITY).await;
        let decision = gate(
            action.assurance_score,
            threshold,
            curiosity,
            self.curiosity_set_point,
        );

        if decision == GateDecision::Reject {
            info!(
                tool = %action.tool,
                score = action.assurance_score,
                threshold,
                curiosity,
                "action below assurance threshold, skipped"
            );
            return ActionOutcome {
                tool: action.tool.clone(),
                decision,
                output: None,
                error: None,
            };
        }

        if decision == GateDecision::Explore {
            info!(tool = %action.tool, score = action.assurance_score, curiosity, "exploring low-assurance action");
            if let Err(err) = self.drives.adjust(CURIOSITY, -EXPLORATION_COST).await {
                warn!(%err, "failed to persist curiosity");
            }
        }

        match tool.call(&action.parameters).await {
            Ok(output) => {
                info!(tool = %action.tool, ?decision, "action executed");
                ActionOutcome {
                    tool: action.tool.clone(),
                    decision,
                    output: Some(output),
                    error: None,
                }
            }
            Err(err) => {
                let error = err.to_string();
                self.grievances
                    .record(&action.tool, &format!("action failed: {error}"))
                    .await;
                ActionOutcome {
                    tool: action.tool.clone(),
                    decision,
                    output: None,
                    error: Some(error),
                }
            }
        }
    }
}
