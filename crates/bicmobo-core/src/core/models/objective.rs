use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optimization direction of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    /// Returns `true` if `candidate` is strictly better than `reference`.
    pub fn is_better(&self, candidate: f64, reference: f64) -> bool {
        match self {
            Direction::Minimize => candidate < reference,
            Direction::Maximize => candidate > reference,
        }
    }

    /// Signed improvement of `candidate` over `reference`; positive means better.
    pub fn improvement(&self, candidate: f64, reference: f64) -> f64 {
        match self {
            Direction::Minimize => reference - candidate,
            Direction::Maximize => candidate - reference,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "minimize" => Some(Direction::Minimize),
            "maximize" => Some(Direction::Maximize),
            _ => None,
        }
    }
}

/// A scalar objective value with its optional standard error of the mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub mean: f64,
    pub sem: Option<f64>,
}

impl Measurement {
    pub fn new(mean: f64) -> Self {
        Self { mean, sem: None }
    }

    pub fn with_sem(mean: f64, sem: f64) -> Self {
        Self {
            mean,
            sem: Some(sem),
        }
    }
}

/// Values of every configured objective for one trial.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectiveResult {
    values: BTreeMap<String, Measurement>,
}

impl ObjectiveResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, objective: impl Into<String>, measurement: Measurement) {
        self.values.insert(objective.into(), measurement);
    }

    pub fn get(&self, objective: &str) -> Option<&Measurement> {
        self.values.get(objective)
    }

    pub fn mean(&self, objective: &str) -> Option<f64> {
        self.values.get(objective).map(|m| m.mean)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Measurement)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
