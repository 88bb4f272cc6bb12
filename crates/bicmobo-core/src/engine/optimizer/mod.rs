//! Optimizer capability used by the optimization loop.
//!
//! The loop only asks for candidates and feeds back outcomes; how candidates are chosen
//! is left to the implementation behind [`Optimizer`]. Two local strategies ship with
//! the crate: seeded random search over the parameter space ([`random`]) and replay of
//! an explicit list of points ([`explicit`]). Both keep the Pareto front of reported
//! trials ([`pareto`]) from which the final recommendation is drawn.

pub mod explicit;
pub mod pareto;
pub mod random;

use crate::core::config::models::{ObjectiveConfig, OptimizerConfig};
use crate::core::models::ids::TrialId;
use crate::core::models::objective::{Direction, ObjectiveResult};
use crate::core::models::parameter::Assignment;
use crate::core::models::trial::Trial;
use super::space::ParameterSpace;
use pareto::{ParetoFront, ParetoPoint};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Cannot sample parameter '{name}': {reason}")]
    Sampling { name: String, reason: String },
}

/// Outcome of one trial as fed back to the optimizer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialReport {
    Completed {
        id: TrialId,
        assignment: Assignment,
        result: ObjectiveResult,
    },
    Failed {
        id: TrialId,
        assignment: Assignment,
        reason: String,
    },
}

impl TrialReport {
    /// A trial with a recorded result is completed; anything else counts as failed.
    pub fn from_trial(trial: &Trial) -> Self {
        match trial.result() {
            Some(result) => TrialReport::Completed {
                id: trial.id,
                assignment: trial.assignment.clone(),
                result: result.clone(),
            },
            None => TrialReport::Failed {
                id: trial.id,
                assignment: trial.assignment.clone(),
                reason: trial
                    .failure()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| format!("trial ended in state '{}'", trial.status())),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TrialReport::Failed { .. })
    }
}

pub trait Optimizer: Send {
    fn name(&self) -> &'static str;

    /// Up to `n` new candidates. An empty batch means the optimizer has nothing left to
    /// try.
    fn propose(&mut self, n: usize) -> Result<Vec<Assignment>, OptimizerError>;

    /// Feeds back one finished trial. Failed trials are acknowledged but never enter
    /// the model.
    fn report(&mut self, report: &TrialReport);

    fn is_converged(&self) -> bool;

    fn front(&self) -> &ParetoFront;

    fn recommendation(&self) -> Option<ParetoPoint> {
        self.front().recommendation().cloned()
    }
}

pub fn directions(objectives: &ObjectiveConfig) -> Vec<(String, Direction)> {
    objectives
        .objectives
        .iter()
        .map(|o| (o.name.clone(), o.direction))
        .collect()
}

pub fn build(
    config: &OptimizerConfig,
    space: &ParameterSpace,
    objectives: &ObjectiveConfig,
) -> Box<dyn Optimizer> {
    match config {
        OptimizerConfig::Random { seed, convergence } => Box::new(random::RandomSearch::new(
            space.clone(),
            directions(objectives),
            *seed,
            *convergence,
        )),
        OptimizerConfig::Explicit { points } => Box::new(explicit::ExplicitPoints::new(
            points.clone(),
            directions(objectives),
        )),
    }
}
