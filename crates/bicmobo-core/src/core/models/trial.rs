use super::ids::TrialId;
use super::objective::ObjectiveResult;
use super::parameter::Assignment;
use super::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Proposed,
    Materialized,
    Executed,
    Evaluated,
    Reported,
    Failed,
}

impl TrialStatus {
    fn rank(&self) -> u8 {
        match self {
            TrialStatus::Proposed => 0,
            TrialStatus::Materialized => 1,
            TrialStatus::Executed => 2,
            TrialStatus::Evaluated => 3,
            TrialStatus::Reported => 4,
            TrialStatus::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TrialStatus::Reported | TrialStatus::Failed)
    }

    /// A trial moves one step forward at a time; any non-terminal state may fail, and
    /// a failed trial is still reported to the optimizer but keeps its failed status.
    pub fn can_advance_to(&self, next: TrialStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TrialStatus::Failed => true,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrialStatus::Proposed => "proposed",
            TrialStatus::Materialized => "materialized",
            TrialStatus::Executed => "executed",
            TrialStatus::Evaluated => "evaluated",
            TrialStatus::Reported => "reported",
            TrialStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Execution,
    Evaluation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Execution => f.write_str("trial execution"),
            FailureKind::Evaluation => f.write_str("objective evaluation"),
        }
    }
}

/// Recorded cause of a failed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TrialFailure {
    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Execution,
            message: message.into(),
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Evaluation,
            message: message.into(),
        }
    }
}

impl fmt::Display for TrialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.kind, self.message)
    }
}

/// Files produced while a trial was materialized and executed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrialArtifacts {
    pub run_dir: PathBuf,
    pub out_dir: PathBuf,
    pub log_dir: PathBuf,
    pub detector_config: PathBuf,
    pub edited_compacts: Vec<PathBuf>,
    pub scripts: Vec<PathBuf>,
    pub sim_outputs: BTreeMap<String, Vec<PathBuf>>,
    pub rec_outputs: BTreeMap<String, Vec<PathBuf>>,
}

impl TrialArtifacts {
    /// Output files of `label` at `stage`, in steering-file order.
    pub fn outputs(&self, stage: Stage, label: &str) -> &[PathBuf] {
        let map = match stage {
            Stage::Simulation => &self.sim_outputs,
            Stage::Reconstruction => &self.rec_outputs,
            Stage::Analysis => return &[],
        };
        map.get(label).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("Trial {id} cannot move from '{from}' to '{to}'")]
pub struct LifecycleError {
    pub id: TrialId,
    pub from: TrialStatus,
    pub to: TrialStatus,
}

/// One proposed-and-evaluated point in the design space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub id: TrialId,
    pub assignment: Assignment,
    status: TrialStatus,
    artifacts: Option<TrialArtifacts>,
    result: Option<ObjectiveResult>,
    failure: Option<TrialFailure>,
    pub created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Trial {
    pub fn new(id: TrialId, assignment: Assignment) -> Self {
        Self {
            id,
            assignment,
            status: TrialStatus::Proposed,
            artifacts: None,
            result: None,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn tag(&self) -> String {
        self.id.tag()
    }

    pub fn status(&self) -> TrialStatus {
        self.status
    }

    pub fn artifacts(&self) -> Option<&TrialArtifacts> {
        self.artifacts.as_ref()
    }

    pub fn result(&self) -> Option<&ObjectiveResult> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&TrialFailure> {
        self.failure.as_ref()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn advance(&mut self, next: TrialStatus) -> Result<(), LifecycleError> {
        if !self.status.can_advance_to(next) {
            return Err(LifecycleError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn mark_materialized(&mut self, artifacts: TrialArtifacts) -> Result<(), LifecycleError> {
        self.advance(TrialStatus::Materialized)?;
        self.artifacts = Some(artifacts);
        Ok(())
    }

    pub fn mark_executed(&mut self, artifacts: TrialArtifacts) -> Result<(), LifecycleError> {
        self.advance(TrialStatus::Executed)?;
        self.artifacts = Some(artifacts);
        Ok(())
    }

    /// Records the objective values; only an executed trial can be evaluated.
    pub fn record_result(&mut self, result: ObjectiveResult) -> Result<(), LifecycleError> {
        self.advance(TrialStatus::Evaluated)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, failure: TrialFailure) -> Result<(), LifecycleError> {
        self.advance(TrialStatus::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }
}
