use crate::core::models::stage::Stage;

/// Values applied when a configuration document leaves an optional key out.
#[derive(Debug, Clone)]
pub struct DefaultsConfig {
    pub max_trials: usize,
    pub batch_size: usize,
    pub max_consecutive_failures: usize,
    pub simulation_timeout_secs: u64,
    pub reconstruction_timeout_secs: u64,
    pub objective_timeout_secs: u64,
    pub retries: u32,
    pub write_scripts: bool,
    pub element: &'static str,
    pub attribute: &'static str,
    pub objective_stage: Stage,
    pub optimizer_kind: &'static str,
    pub improvement_threshold: f64,
    pub patience: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_trials: 10,
            batch_size: 1,
            max_consecutive_failures: 5,
            simulation_timeout_secs: 3600,
            reconstruction_timeout_secs: 3600,
            objective_timeout_secs: 600,
            retries: 0,
            write_scripts: true,
            element: "constant",
            attribute: "value",
            objective_stage: Stage::Reconstruction,
            optimizer_kind: "random",
            improvement_threshold: 0.0,
            patience: 0,
        }
    }
}
