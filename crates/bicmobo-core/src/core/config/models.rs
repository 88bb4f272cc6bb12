use crate::core::models::objective::Direction;
use crate::core::models::parameter::{Assignment, ParameterValue};
use crate::core::models::stage::Stage;
use crate::core::utils::template::CommandTemplate;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub name: String,
    pub version: Option<String>,
    pub path: PathBuf,
    pub config: String,
    pub install: Option<PathBuf>,
    pub library_paths: Vec<PathBuf>,
}

impl DetectorConfig {
    /// Top-level detector description, `<path>/<config>.xml`.
    pub fn config_file(&self) -> PathBuf {
        self.path.join(format!("{}.xml", self.config))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Gun,
    Hepmc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimInput {
    pub kind: InputKind,
    pub location: PathBuf,
    pub steering: Vec<String>,
    pub events: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub simulation: Duration,
    pub reconstruction: Duration,
    pub objective: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub run_path: PathBuf,
    pub out_path: PathBuf,
    pub log_path: PathBuf,
    pub sim_exec: PathBuf,
    pub rec_exec: PathBuf,
    pub detector: DetectorConfig,
    pub sim_inputs: BTreeMap<String, SimInput>,
    pub rec_collections: Vec<String>,
    pub timeouts: Timeouts,
    pub retries: u32,
    pub extra_env: BTreeMap<String, String>,
    pub write_scripts: bool,
    pub setup_script: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceConfig {
    pub improvement_threshold: f64,
    /// Number of reported trials without improvement before the search stops; zero disables.
    pub patience: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerConfig {
    Random {
        seed: Option<u64>,
        convergence: ConvergenceConfig,
    },
    Explicit {
        points: Vec<Assignment>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemConfig {
    pub name: String,
    pub out_path: PathBuf,
    pub max_trials: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub max_consecutive_failures: usize,
    pub run_timeout: Option<Duration>,
    pub optimizer: OptimizerConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Choice(Vec<ParameterValue>),
}

/// Where in the detector description a geometry parameter lives.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactTarget {
    /// Compact file relative to the detector path.
    pub compact: PathBuf,
    pub element: String,
    pub name: String,
    pub attribute: String,
    pub units: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterTarget {
    Geometry(CompactTarget),
    Reconstruction { path: String, units: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub domain: Domain,
    pub target: ParameterTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterConfig {
    /// Parameters ordered by name.
    pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Stdout,
    File,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveSpec {
    pub name: String,
    pub input: String,
    pub executable: PathBuf,
    pub rule: CommandTemplate,
    pub flag: Option<String>,
    pub stage: Stage,
    pub direction: Direction,
    pub source: ResultSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveConfig {
    pub objectives: Vec<ObjectiveSpec>,
}

impl ObjectiveConfig {
    pub fn names(&self) -> Vec<String> {
        self.objectives.iter().map(|o| o.name.clone()).collect()
    }
}

/// The four validated documents of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub run: RunConfig,
    pub problem: ProblemConfig,
    pub parameters: ParameterConfig,
    pub objectives: ObjectiveConfig,
}
