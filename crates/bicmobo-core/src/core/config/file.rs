use crate::core::models::parameter::ParameterValue;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileRunConfig {
    pub run_path: Option<PathBuf>,
    pub out_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub sim_exec: Option<PathBuf>,
    pub rec_exec: Option<PathBuf>,
    pub detector: Option<FileDetectorConfig>,
    pub sim_input: Option<BTreeMap<String, FileSimInput>>,
    pub rec_collections: Option<Vec<String>>,
    pub timeouts: Option<FileTimeouts>,
    pub retries: Option<u32>,
    pub env: Option<BTreeMap<String, String>>,
    pub write_scripts: Option<bool>,
    pub epic_setup: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileDetectorConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub config: Option<String>,
    pub install: Option<PathBuf>,
    pub library_paths: Option<Vec<PathBuf>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileSimInput {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub location: Option<PathBuf>,
    pub steering: Option<Vec<String>>,
    pub events: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileTimeouts {
    pub simulation_secs: Option<u64>,
    pub reconstruction_secs: Option<u64>,
    pub objective_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileProblemConfig {
    pub problem_name: Option<String>,
    pub out_path: Option<PathBuf>,
    pub max_trials: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub max_consecutive_failures: Option<usize>,
    pub run_timeout_secs: Option<u64>,
    pub optimizer: Option<FileOptimizerConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileOptimizerConfig {
    pub kind: Option<String>,
    pub seed: Option<u64>,
    pub patience: Option<usize>,
    pub improvement_threshold: Option<f64>,
    pub points: Option<Vec<BTreeMap<String, ParameterValue>>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileParameterConfig {
    pub parameters: Option<BTreeMap<String, FileParameter>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileParameter {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub range: Option<Vec<f64>>,
    pub values: Option<Vec<ParameterValue>>,
    pub stage: Option<String>,
    pub compact: Option<PathBuf>,
    pub element: Option<String>,
    pub name: Option<String>,
    pub attribute: Option<String>,
    pub path: Option<String>,
    pub units: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileObjectiveConfig {
    pub objectives: Option<BTreeMap<String, FileObjective>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileObjective {
    pub input: Option<String>,
    pub path: Option<PathBuf>,
    pub rule: Option<String>,
    pub flag: Option<String>,
    pub stage: Option<String>,
    pub goal: Option<String>,
    pub result: Option<String>,
}
