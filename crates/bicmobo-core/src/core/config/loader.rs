use super::defaults::DefaultsConfig;
use super::file::{
    FileObjectiveConfig, FileParameter, FileParameterConfig, FileProblemConfig, FileRunConfig,
};
use super::models::{
    CompactTarget, Config, ConvergenceConfig, DetectorConfig, Domain, InputKind, ObjectiveConfig,
    ObjectiveSpec, OptimizerConfig, ParameterConfig, ParameterSpec, ParameterTarget,
    ProblemConfig, ResultSource, RunConfig, SimInput, Timeouts,
};
use crate::core::models::objective::Direction;
use crate::core::models::stage::Stage;
use crate::core::utils::template::{CommandTemplate, Placeholder};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const RUN_CONFIG_NAME: &str = "run.config";
pub const PROBLEM_CONFIG_NAME: &str = "problem.config";
pub const PARAMETERS_CONFIG_NAME: &str = "parameters.config";
pub const OBJECTIVES_CONFIG_NAME: &str = "objectives.config";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JSON parsing error for '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Missing required field `{0}`")]
    MissingField(String),
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Path given by `{field}` does not exist: {}", path.display())]
    PathNotFound { field: String, path: PathBuf },
}

impl ConfigError {
    /// Dotted name of the offending field, when the error is about one field.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::MissingField(field)
            | ConfigError::InvalidField { field, .. }
            | ConfigError::PathNotFound { field, .. } => Some(field),
            _ => None,
        }
    }

    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Locations of the four configuration documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub run: PathBuf,
    pub problem: PathBuf,
    pub parameters: PathBuf,
    pub objectives: PathBuf,
}

impl ConfigPaths {
    /// Conventional document names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            run: dir.join(RUN_CONFIG_NAME),
            problem: dir.join(PROBLEM_CONFIG_NAME),
            parameters: dir.join(PARAMETERS_CONFIG_NAME),
            objectives: dir.join(OBJECTIVES_CONFIG_NAME),
        }
    }
}

/// The four documents as read from disk, before validation.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocuments {
    pub run: FileRunConfig,
    pub problem: FileProblemConfig,
    pub parameters: FileParameterConfig,
    pub objectives: FileObjectiveConfig,
}

impl ConfigDocuments {
    pub fn load(paths: &ConfigPaths) -> Result<Self, ConfigError> {
        Ok(Self {
            run: read_document(&paths.run, "run")?,
            problem: read_document(&paths.problem, "problem")?,
            parameters: read_document(&paths.parameters, "parameters")?,
            objectives: read_document(&paths.objectives, "objectives")?,
        })
    }

    /// Validates every document and creates the output directories. Nothing is
    /// created unless all four documents are valid.
    pub fn validate(self) -> Result<Config, ConfigError> {
        let defaults = DefaultsConfig::default();
        let run = validate_run(self.run, &defaults)?;
        let problem = validate_problem(self.problem, &defaults)?;
        let parameters = validate_parameters(self.parameters, &run.detector, &defaults)?;
        let objectives = validate_objectives(self.objectives, &run, &defaults)?;

        for (field, dir) in [
            ("run.run_path", &run.run_path),
            ("run.out_path", &run.out_path),
            ("run.log_path", &run.log_path),
            ("problem.out_path", &problem.out_path),
        ] {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io {
                path: format!("{} ({})", dir.display(), field),
                source: e,
            })?;
        }

        info!(
            "Loaded configuration for '{}': {} parameter(s), {} objective(s), {} simulation input(s).",
            problem.name,
            parameters.parameters.len(),
            objectives.objectives.len(),
            run.sim_inputs.len()
        );

        Ok(Config {
            run,
            problem,
            parameters,
            objectives,
        })
    }
}

pub fn load_config(paths: &ConfigPaths) -> Result<Config, ConfigError> {
    ConfigDocuments::load(paths)?.validate()
}

fn read_document<T: DeserializeOwned>(path: &Path, section: &str) -> Result<T, ConfigError> {
    debug!("Reading configuration document {:?}", path);
    let display = path.to_string_lossy().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: display.clone(),
        source: e,
    })?;
    if path.extension().is_some_and(|ext| ext == "toml") {
        let table: toml::Table = toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: display.clone(),
            source: e,
        })?;
        serde_path_to_error::deserialize(toml::Value::Table(table)).map_err(|e| {
            malformed_field(section, &e.path().to_string(), &e.inner().to_string())
        })
    } else {
        let mut de = serde_json::Deserializer::from_str(&content);
        let document = serde_path_to_error::deserialize(&mut de).map_err(|e| {
            if e.inner().classify() == serde_json::error::Category::Data {
                malformed_field(section, &e.path().to_string(), &e.inner().to_string())
            } else {
                ConfigError::Json {
                    path: display.clone(),
                    source: e.into_inner(),
                }
            }
        })?;
        de.end().map_err(|e| ConfigError::Json {
            path: display,
            source: e,
        })?;
        Ok(document)
    }
}

/// Names a field that failed to deserialize by its dotted path below `section`.
fn malformed_field(section: &str, path: &str, reason: &str) -> ConfigError {
    let field = match path {
        "" | "." => section.to_string(),
        _ if path.starts_with(&format!("{}.", section)) => path.to_string(),
        _ => format!("{}.{}", section, path),
    };
    ConfigError::invalid(field, reason)
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn existing_dir(path: PathBuf, field: &str) -> Result<PathBuf, ConfigError> {
    if path.is_dir() {
        Ok(path)
    } else {
        Err(ConfigError::PathNotFound {
            field: field.to_string(),
            path,
        })
    }
}

fn existing_file(path: PathBuf, field: &str) -> Result<PathBuf, ConfigError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(ConfigError::PathNotFound {
            field: field.to_string(),
            path,
        })
    }
}

/// Accepts an existing file, or a bare command name found on `PATH`.
fn resolve_executable(path: PathBuf, field: &str) -> Result<PathBuf, ConfigError> {
    if path.is_file() {
        return Ok(path);
    }
    if path.components().count() == 1 {
        if let Some(search) = std::env::var_os("PATH") {
            if let Some(found) = std::env::split_paths(&search)
                .map(|dir| dir.join(&path))
                .find(|candidate| candidate.is_file())
            {
                return Ok(found);
            }
        }
    }
    Err(ConfigError::PathNotFound {
        field: field.to_string(),
        path,
    })
}

fn positive_secs(value: Option<u64>, default: u64, field: &str) -> Result<Duration, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::invalid(field, "must be greater than zero")),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn at_least_one(value: usize, field: &str) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be at least 1"))
    } else {
        Ok(value)
    }
}

fn non_empty_units(units: Option<String>) -> Option<String> {
    units.filter(|u| !u.trim().is_empty())
}

fn validate_run(raw: FileRunConfig, defaults: &DefaultsConfig) -> Result<RunConfig, ConfigError> {
    let run_path = required(raw.run_path, "run.run_path")?;
    let out_path = required(raw.out_path, "run.out_path")?;
    let log_path = required(raw.log_path, "run.log_path")?;
    let sim_exec = resolve_executable(required(raw.sim_exec, "run.sim_exec")?, "run.sim_exec")?;
    let rec_exec = resolve_executable(required(raw.rec_exec, "run.rec_exec")?, "run.rec_exec")?;

    let det = required(raw.detector, "run.detector")?;
    let detector = DetectorConfig {
        name: required(det.name, "run.detector.name")?,
        version: det.version,
        path: existing_dir(required(det.path, "run.detector.path")?, "run.detector.path")?,
        config: required(det.config, "run.detector.config")?,
        install: det
            .install
            .map(|p| existing_dir(p, "run.detector.install"))
            .transpose()?,
        library_paths: det.library_paths.unwrap_or_default(),
    };
    existing_file(detector.config_file(), "run.detector.config")?;

    let raw_inputs = required(raw.sim_input, "run.sim_input")?;
    if raw_inputs.is_empty() {
        return Err(ConfigError::invalid(
            "run.sim_input",
            "at least one simulation input is required",
        ));
    }
    let mut sim_inputs = BTreeMap::new();
    for (label, input) in raw_inputs {
        let prefix = format!("run.sim_input.{}", label);
        let kind_field = format!("{}.type", prefix);
        let kind = match required(input.kind, &kind_field)?.as_str() {
            "gun" => InputKind::Gun,
            "hepmc" => InputKind::Hepmc,
            other => {
                return Err(ConfigError::invalid(
                    kind_field,
                    format!("expected 'gun' or 'hepmc', found '{}'", other),
                ));
            }
        };
        let location_field = format!("{}.location", prefix);
        let location = existing_dir(required(input.location, &location_field)?, &location_field)?;
        let steering_field = format!("{}.steering", prefix);
        let steering = required(input.steering, &steering_field)?;
        if steering.is_empty() {
            return Err(ConfigError::invalid(
                steering_field,
                "at least one steering file is required",
            ));
        }
        for steer in &steering {
            existing_file(location.join(steer), &steering_field)?;
        }
        sim_inputs.insert(
            label,
            SimInput {
                kind,
                location,
                steering,
                events: input.events,
            },
        );
    }

    let timeouts = raw.timeouts.unwrap_or_default();
    let timeouts = Timeouts {
        simulation: positive_secs(
            timeouts.simulation_secs,
            defaults.simulation_timeout_secs,
            "run.timeouts.simulation_secs",
        )?,
        reconstruction: positive_secs(
            timeouts.reconstruction_secs,
            defaults.reconstruction_timeout_secs,
            "run.timeouts.reconstruction_secs",
        )?,
        objective: positive_secs(
            timeouts.objective_secs,
            defaults.objective_timeout_secs,
            "run.timeouts.objective_secs",
        )?,
    };

    let setup_script = raw
        .epic_setup
        .map(|p| existing_file(p, "run.epic_setup"))
        .transpose()?;

    Ok(RunConfig {
        run_path,
        out_path,
        log_path,
        sim_exec,
        rec_exec,
        detector,
        sim_inputs,
        rec_collections: raw.rec_collections.unwrap_or_default(),
        timeouts,
        retries: raw.retries.unwrap_or(defaults.retries),
        extra_env: raw.env.unwrap_or_default(),
        write_scripts: raw.write_scripts.unwrap_or(defaults.write_scripts),
        setup_script,
    })
}

fn validate_problem(
    raw: FileProblemConfig,
    defaults: &DefaultsConfig,
) -> Result<ProblemConfig, ConfigError> {
    let name = required(raw.problem_name, "problem.problem_name")?;
    if name.trim().is_empty() {
        return Err(ConfigError::invalid(
            "problem.problem_name",
            "must not be empty",
        ));
    }
    let out_path = required(raw.out_path, "problem.out_path")?;
    let max_trials = at_least_one(
        raw.max_trials.unwrap_or(defaults.max_trials),
        "problem.max_trials",
    )?;
    let batch_size = at_least_one(
        raw.batch_size.unwrap_or(defaults.batch_size),
        "problem.batch_size",
    )?;
    let max_concurrency = at_least_one(
        raw.max_concurrency.unwrap_or(batch_size),
        "problem.max_concurrency",
    )?;
    let max_consecutive_failures = at_least_one(
        raw.max_consecutive_failures
            .unwrap_or(defaults.max_consecutive_failures),
        "problem.max_consecutive_failures",
    )?;
    let run_timeout = raw
        .run_timeout_secs
        .map(|secs| positive_secs(Some(secs), secs, "problem.run_timeout_secs"))
        .transpose()?;

    let opt = raw.optimizer.unwrap_or_default();
    let kind = opt
        .kind
        .unwrap_or_else(|| defaults.optimizer_kind.to_string());
    let optimizer = match kind.as_str() {
        "random" => {
            if opt.points.is_some() {
                return Err(ConfigError::invalid(
                    "problem.optimizer.points",
                    "only used by the 'explicit' optimizer",
                ));
            }
            let improvement_threshold = opt
                .improvement_threshold
                .unwrap_or(defaults.improvement_threshold);
            if !improvement_threshold.is_finite() || improvement_threshold < 0.0 {
                return Err(ConfigError::invalid(
                    "problem.optimizer.improvement_threshold",
                    "must be a finite, non-negative number",
                ));
            }
            OptimizerConfig::Random {
                seed: opt.seed,
                convergence: ConvergenceConfig {
                    improvement_threshold,
                    patience: opt.patience.unwrap_or(defaults.patience),
                },
            }
        }
        "explicit" => {
            let points = required(opt.points, "problem.optimizer.points")?;
            if points.is_empty() {
                return Err(ConfigError::invalid(
                    "problem.optimizer.points",
                    "at least one point is required",
                ));
            }
            OptimizerConfig::Explicit { points }
        }
        other => {
            return Err(ConfigError::invalid(
                "problem.optimizer.kind",
                format!("expected 'random' or 'explicit', found '{}'", other),
            ));
        }
    };

    Ok(ProblemConfig {
        name,
        out_path,
        max_trials,
        batch_size,
        max_concurrency,
        max_consecutive_failures,
        run_timeout,
        optimizer,
    })
}

fn parse_range(range: Option<Vec<f64>>, field: &str) -> Result<(f64, f64), ConfigError> {
    let range = required(range, field)?;
    let [lo, hi] = range.as_slice() else {
        return Err(ConfigError::invalid(
            field,
            format!("expected [min, max], found {} value(s)", range.len()),
        ));
    };
    if !lo.is_finite() || !hi.is_finite() {
        return Err(ConfigError::invalid(field, "bounds must be finite"));
    }
    if lo > hi {
        return Err(ConfigError::invalid(
            field,
            format!("min {} is greater than max {}", lo, hi),
        ));
    }
    if !(hi - lo).is_finite() {
        return Err(ConfigError::invalid(field, "span max - min must be finite"));
    }
    Ok((*lo, *hi))
}

fn validate_parameter(
    name: &str,
    raw: FileParameter,
    detector: &DetectorConfig,
    defaults: &DefaultsConfig,
) -> Result<ParameterSpec, ConfigError> {
    let prefix = format!("parameters.{}", name);
    let type_field = format!("{}.type", prefix);
    let range_field = format!("{}.range", prefix);

    let domain = match required(raw.kind, &type_field)?.as_str() {
        "int" => {
            let (lo, hi) = parse_range(raw.range, &range_field)?;
            if lo.fract() != 0.0 || hi.fract() != 0.0 {
                return Err(ConfigError::invalid(
                    range_field,
                    "bounds of an int parameter must be integers",
                ));
            }
            Domain::Int {
                min: lo as i64,
                max: hi as i64,
            }
        }
        "float" => {
            let (min, max) = parse_range(raw.range, &range_field)?;
            Domain::Float { min, max }
        }
        "choice" => {
            let values_field = format!("{}.values", prefix);
            let values = required(raw.values, &values_field)?;
            if values.is_empty() {
                return Err(ConfigError::invalid(
                    values_field,
                    "at least one value is required",
                ));
            }
            Domain::Choice(values)
        }
        other => {
            return Err(ConfigError::invalid(
                type_field,
                format!("expected 'int', 'float' or 'choice', found '{}'", other),
            ));
        }
    };

    let stage_field = format!("{}.stage", prefix);
    let target = match required(raw.stage, &stage_field)?.as_str() {
        "sim" => {
            let compact_field = format!("{}.compact", prefix);
            let compact = required(raw.compact, &compact_field)?;
            existing_file(detector.path.join(&compact), &compact_field)?;
            ParameterTarget::Geometry(CompactTarget {
                compact,
                element: raw.element.unwrap_or_else(|| defaults.element.to_string()),
                name: required(raw.name, &format!("{}.name", prefix))?,
                attribute: raw
                    .attribute
                    .unwrap_or_else(|| defaults.attribute.to_string()),
                units: non_empty_units(raw.units),
            })
        }
        "rec" => ParameterTarget::Reconstruction {
            path: required(raw.path, &format!("{}.path", prefix))?,
            units: non_empty_units(raw.units),
        },
        other => {
            return Err(ConfigError::invalid(
                stage_field,
                format!("expected 'sim' or 'rec', found '{}'", other),
            ));
        }
    };

    Ok(ParameterSpec {
        name: name.to_string(),
        domain,
        target,
    })
}

fn validate_parameters(
    raw: FileParameterConfig,
    detector: &DetectorConfig,
    defaults: &DefaultsConfig,
) -> Result<ParameterConfig, ConfigError> {
    let raw_params = required(raw.parameters, "parameters")?;
    if raw_params.is_empty() {
        return Err(ConfigError::invalid(
            "parameters",
            "at least one design parameter is required",
        ));
    }
    let parameters = raw_params
        .into_iter()
        .map(|(name, p)| validate_parameter(&name, p, detector, defaults))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ParameterConfig { parameters })
}

fn validate_objectives(
    raw: FileObjectiveConfig,
    run: &RunConfig,
    defaults: &DefaultsConfig,
) -> Result<ObjectiveConfig, ConfigError> {
    let raw_objectives = required(raw.objectives, "objectives")?;
    if raw_objectives.is_empty() {
        return Err(ConfigError::invalid(
            "objectives",
            "at least one objective is required",
        ));
    }

    let mut objectives = Vec::with_capacity(raw_objectives.len());
    for (name, o) in raw_objectives {
        let prefix = format!("objectives.{}", name);

        let input_field = format!("{}.input", prefix);
        let input = required(o.input, &input_field)?;
        if !run.sim_inputs.contains_key(&input) {
            return Err(ConfigError::invalid(
                input_field,
                format!("no simulation input labelled '{}' in run.sim_input", input),
            ));
        }

        let path_field = format!("{}.path", prefix);
        let executable = resolve_executable(required(o.path, &path_field)?, &path_field)?;

        let rule_field = format!("{}.rule", prefix);
        let rule = CommandTemplate::parse(&required(o.rule, &rule_field)?)
            .map_err(|e| ConfigError::invalid(&rule_field, e.to_string()))?;
        if rule.uses(Placeholder::Flag) && o.flag.is_none() {
            return Err(ConfigError::MissingField(format!("{}.flag", prefix)));
        }

        let stage_field = format!("{}.stage", prefix);
        let stage = match o.stage.as_deref() {
            None => defaults.objective_stage,
            Some(key) => match Stage::from_key(key) {
                Some(stage @ (Stage::Simulation | Stage::Reconstruction)) => stage,
                _ => {
                    return Err(ConfigError::invalid(
                        stage_field,
                        format!("expected 'sim' or 'rec', found '{}'", key),
                    ));
                }
            },
        };

        let goal_field = format!("{}.goal", prefix);
        let goal = required(o.goal, &goal_field)?;
        let direction = Direction::from_key(&goal).ok_or_else(|| {
            ConfigError::invalid(
                &goal_field,
                format!("expected 'minimize' or 'maximize', found '{}'", goal),
            )
        })?;

        let source = match o.result.as_deref() {
            None | Some("stdout") => ResultSource::Stdout,
            Some("file") => ResultSource::File,
            Some(other) => {
                return Err(ConfigError::invalid(
                    format!("{}.result", prefix),
                    format!("expected 'stdout' or 'file', found '{}'", other),
                ));
            }
        };

        objectives.push(ObjectiveSpec {
            name,
            input,
            executable,
            rule,
            flag: o.flag,
            stage,
            direction,
            source,
        });
    }
    Ok(ObjectiveConfig { objectives })
}
