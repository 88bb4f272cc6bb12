use crate::core::models::ids::TrialId;
use crate::core::models::objective::{Direction, ObjectiveResult};
use crate::core::models::parameter::Assignment;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParetoPoint {
    pub trial: TrialId,
    pub assignment: Assignment,
    pub result: ObjectiveResult,
}

/// Non-dominated set of reported trials under the configured objective directions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParetoFront {
    #[serde(skip)]
    objectives: Vec<(String, Direction)>,
    members: Vec<ParetoPoint>,
}

impl ParetoFront {
    pub fn new(objectives: Vec<(String, Direction)>) -> Self {
        Self {
            objectives,
            members: Vec::new(),
        }
    }

    pub fn objectives(&self) -> &[(String, Direction)] {
        &self.objectives
    }

    pub fn members(&self) -> &[ParetoPoint] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// `a` is at least as good as `b` on every objective and strictly better on one.
    /// Results missing an objective never dominate.
    pub fn dominates(&self, a: &ObjectiveResult, b: &ObjectiveResult) -> bool {
        let mut strictly_better = false;
        for (name, direction) in &self.objectives {
            let (Some(x), Some(y)) = (a.mean(name), b.mean(name)) else {
                return false;
            };
            if direction.is_better(y, x) {
                return false;
            }
            if direction.is_better(x, y) {
                strictly_better = true;
            }
        }
        strictly_better
    }

    /// Offers a reported point to the front. Returns `true` if it joined, dropping the
    /// members it dominates.
    pub fn insert(&mut self, trial: TrialId, assignment: Assignment, result: ObjectiveResult) -> bool {
        if self.members.iter().any(|m| self.dominates(&m.result, &result)) {
            return false;
        }
        let dominated: Vec<bool> = self
            .members
            .iter()
            .map(|m| self.dominates(&result, &m.result))
            .collect();
        let mut flags = dominated.into_iter();
        self.members.retain(|_| !flags.next().unwrap_or(false));
        self.members.push(ParetoPoint {
            trial,
            assignment,
            result,
        });
        true
    }

    /// Best observed mean per objective.
    pub fn best_values(&self) -> BTreeMap<String, f64> {
        let mut best = BTreeMap::new();
        for (name, direction) in &self.objectives {
            let value = self
                .members
                .iter()
                .filter_map(|m| m.result.mean(name))
                .reduce(|acc, v| if direction.is_better(v, acc) { v } else { acc });
            if let Some(value) = value {
                best.insert(name.clone(), value);
            }
        }
        best
    }

    /// The member best on the first objective, ties broken by the following ones and
    /// finally by the earlier trial.
    pub fn recommendation(&self) -> Option<&ParetoPoint> {
        self.members.iter().min_by(|a, b| {
            for (name, direction) in &self.objectives {
                let ordering = compare(a.result.mean(name), b.result.mean(name), *direction);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.trial.cmp(&b.trial)
        })
    }
}

/// Orders two values so that the better one comes first; missing values go last.
fn compare(a: Option<f64>, b: Option<f64>, direction: Direction) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) if direction.is_better(x, y) => Ordering::Less,
        (Some(x), Some(y)) if direction.is_better(y, x) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
