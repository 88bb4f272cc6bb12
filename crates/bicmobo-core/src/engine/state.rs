use super::optimizer::pareto::{ParetoFront, ParetoPoint};
use crate::core::models::trial::{Trial, TrialStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// States of the optimization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Initializing,
    Proposing,
    Executing,
    Evaluating,
    Reporting,
    Converged,
    Exhausted,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Converged | RunState::Exhausted | RunState::Aborted
        )
    }

    pub fn phase_name(&self) -> &'static str {
        match self {
            RunState::Initializing => "Initializing",
            RunState::Proposing => "Proposing",
            RunState::Executing => "Executing",
            RunState::Evaluating => "Evaluating",
            RunState::Reporting => "Reporting",
            RunState::Converged => "Converged",
            RunState::Exhausted => "Exhausted",
            RunState::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phase_name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrialCounts {
    pub total: usize,
    pub reported: usize,
    pub failed: usize,
}

impl TrialCounts {
    pub fn of(trials: &[Trial]) -> Self {
        Self {
            total: trials.len(),
            reported: trials
                .iter()
                .filter(|t| t.status() == TrialStatus::Reported)
                .count(),
            failed: trials
                .iter()
                .filter(|t| t.status() == TrialStatus::Failed)
                .count(),
        }
    }
}

/// Outcome of a finished optimization run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub problem: String,
    pub state: RunState,
    pub trials: Vec<Trial>,
    pub front: ParetoFront,
    pub recommendation: Option<ParetoPoint>,
}

impl RunSummary {
    pub fn counts(&self) -> TrialCounts {
        TrialCounts::of(&self.trials)
    }

    pub fn best_values(&self) -> BTreeMap<String, f64> {
        self.front.best_values()
    }
}

/// Content of the JSON snapshot rewritten after every reporting step.
#[derive(Debug, Serialize)]
pub struct RunSnapshot<'a> {
    pub problem: &'a str,
    pub optimizer: &'a str,
    pub state: RunState,
    pub counts: TrialCounts,
    pub trials: &'a [Trial],
    pub pareto_front: &'a ParetoFront,
    pub best_values: BTreeMap<String, f64>,
    pub recommendation: Option<&'a ParetoPoint>,
}
