use super::pareto::ParetoFront;
use super::{Optimizer, OptimizerError, TrialReport};
use crate::core::config::models::{ConvergenceConfig, Domain};
use crate::core::models::objective::Direction;
use crate::core::models::parameter::{Assignment, ParameterValue, assignment_key};
use crate::engine::space::ParameterSpace;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Draws per candidate before giving up on finding an unseen point.
const MAX_DRAWS_PER_CANDIDATE: usize = 1000;

/// Uniform random search without repeats.
///
/// Convergence: a completed trial improves the search when it beats the best value of
/// any objective by more than the improvement threshold. After `patience` completed
/// trials in a row without improvement the search reports itself converged.
pub struct RandomSearch {
    space: ParameterSpace,
    rng: StdRng,
    seen: HashSet<String>,
    front: ParetoFront,
    convergence: ConvergenceConfig,
    best: BTreeMap<String, f64>,
    stale: usize,
}

impl RandomSearch {
    pub fn new(
        space: ParameterSpace,
        objectives: Vec<(String, Direction)>,
        seed: Option<u64>,
        convergence: ConvergenceConfig,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            space,
            rng,
            seen: HashSet::new(),
            front: ParetoFront::new(objectives),
            convergence,
            best: BTreeMap::new(),
            stale: 0,
        }
    }

    fn sample(&mut self) -> Result<Assignment, OptimizerError> {
        let mut point = Assignment::new();
        for parameter in self.space.parameters() {
            let value = match &parameter.domain {
                Domain::Int { min, max } => ParameterValue::Int(self.rng.gen_range(*min..=*max)),
                Domain::Float { min, max } if min == max => ParameterValue::Float(*min),
                Domain::Float { min, max } if !(max - min).is_finite() => {
                    return Err(OptimizerError::Sampling {
                        name: parameter.name.clone(),
                        reason: format!("range [{}, {}] has no finite span", min, max),
                    });
                }
                Domain::Float { min, max } => ParameterValue::Float(self.rng.gen_range(*min..=*max)),
                Domain::Choice(values) => values.choose(&mut self.rng).cloned().ok_or_else(|| {
                    OptimizerError::Sampling {
                        name: parameter.name.clone(),
                        reason: "no choices configured".to_string(),
                    }
                })?,
            };
            point.insert(parameter.name.clone(), value);
        }
        Ok(point)
    }

    fn space_exhausted(&self) -> bool {
        self.space
            .cardinality()
            .is_some_and(|size| self.seen.len() as u128 >= size)
    }

    fn improves(&self, name: &str, direction: Direction, value: f64) -> bool {
        match self.best.get(name) {
            None => true,
            Some(best) => direction.improvement(value, *best) > self.convergence.improvement_threshold,
        }
    }
}

impl Optimizer for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn propose(&mut self, n: usize) -> Result<Vec<Assignment>, OptimizerError> {
        let mut batch = Vec::with_capacity(n);
        'candidates: for _ in 0..n {
            if self.space_exhausted() {
                break;
            }
            for _ in 0..MAX_DRAWS_PER_CANDIDATE {
                let point = self.sample()?;
                if self.seen.insert(assignment_key(&point)) {
                    batch.push(point);
                    continue 'candidates;
                }
            }
            debug!(
                "No unseen point after {} draws; stopping the batch",
                MAX_DRAWS_PER_CANDIDATE
            );
            break;
        }
        Ok(batch)
    }

    fn report(&mut self, report: &TrialReport) {
        let TrialReport::Completed {
            id,
            assignment,
            result,
        } = report
        else {
            return;
        };

        let mut improved = false;
        for (name, direction) in self.front.objectives().to_vec() {
            if let Some(value) = result.mean(&name) {
                if self.improves(&name, direction, value) {
                    improved = true;
                }
                let best = self.best.entry(name).or_insert(value);
                if direction.is_better(value, *best) {
                    *best = value;
                }
            }
        }
        self.front.insert(*id, assignment.clone(), result.clone());

        if improved {
            self.stale = 0;
        } else {
            self.stale += 1;
            if self.is_converged() {
                info!(
                    "No improvement in the last {} trial(s); random search converged",
                    self.stale
                );
            }
        }
    }

    fn is_converged(&self) -> bool {
        self.convergence.patience > 0 && self.stale >= self.convergence.patience
    }

    fn front(&self) -> &ParetoFront {
        &self.front
    }
}
