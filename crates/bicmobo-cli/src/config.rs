use crate::cli::{ConfigArgs, RunArgs};
use crate::error::{CliError, Result};
use bicmobo::core::config::loader::{ConfigDocuments, ConfigPaths};
use bicmobo::core::config::models::Config;
use bicmobo::engine::error::EngineError;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Environment variable naming the installation root searched for `configuration/`.
pub const INSTALL_ROOT_VAR: &str = "BIC_MOBO";
pub const CONFIG_DIR_NAME: &str = "configuration";

/// Picks the directory the configuration documents are read from: the explicit
/// directory, else `./configuration`, else `$BIC_MOBO/configuration`.
fn discover_dir(explicit: Option<&Path>, cwd: &Path, install_root: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(dir) = explicit {
        return Some(dir.to_path_buf());
    }
    let local = cwd.join(CONFIG_DIR_NAME);
    if local.is_dir() {
        return Some(local);
    }
    install_root
        .map(|root| root.join(CONFIG_DIR_NAME))
        .filter(|dir| dir.is_dir())
}

fn resolve_paths(args: &ConfigArgs, dir: Option<&Path>) -> Result<ConfigPaths> {
    let pick = |flag: &Option<PathBuf>, default: Option<PathBuf>, what: &str| -> Result<PathBuf> {
        flag.clone().or(default).ok_or_else(|| {
            CliError::Config(format!(
                "No {} configuration given. Pass --config-dir, the individual --*-config flags, or set ${}.",
                what, INSTALL_ROOT_VAR
            ))
        })
    };
    let defaults = dir.map(ConfigPaths::in_dir);
    Ok(ConfigPaths {
        run: pick(&args.run_config, defaults.as_ref().map(|d| d.run.clone()), "run")?,
        problem: pick(
            &args.problem_config,
            defaults.as_ref().map(|d| d.problem.clone()),
            "problem",
        )?,
        parameters: pick(
            &args.parameters_config,
            defaults.as_ref().map(|d| d.parameters.clone()),
            "parameters",
        )?,
        objectives: pick(
            &args.objectives_config,
            defaults.as_ref().map(|d| d.objectives.clone()),
            "objectives",
        )?,
    })
}

pub fn config_paths(args: &ConfigArgs) -> Result<ConfigPaths> {
    let cwd = std::env::current_dir()?;
    let install_root = std::env::var_os(INSTALL_ROOT_VAR).map(PathBuf::from);
    let dir = discover_dir(args.config_dir.as_deref(), &cwd, install_root);
    if let Some(dir) = &dir {
        debug!("Using configuration directory {:?}", dir);
    }
    resolve_paths(args, dir.as_deref())
}

/// Reads the four documents and applies the `-S` overrides, without validating.
pub fn load_documents(args: &ConfigArgs) -> Result<ConfigDocuments> {
    let paths = config_paths(args)?;
    info!("Loading configuration documents: {:?}", paths);
    let mut documents = ConfigDocuments::load(&paths).map_err(EngineError::from)?;
    apply_set_values(&mut documents, &args.set_values)?;
    Ok(documents)
}

pub fn validate(documents: ConfigDocuments) -> Result<Config> {
    Ok(documents.validate().map_err(EngineError::from)?)
}

/// Flags of `run` take precedence over both the files and `-S`.
pub fn apply_run_flags(documents: &mut ConfigDocuments, args: &RunArgs) {
    if let Some(max_trials) = args.max_trials {
        documents.problem.max_trials = Some(max_trials);
    }
    if let Some(max_concurrency) = args.max_concurrency {
        documents.problem.max_concurrency = Some(max_concurrency);
    }
    if let Some(seed) = args.seed {
        documents
            .problem
            .optimizer
            .get_or_insert_with(Default::default)
            .seed = Some(seed);
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value))
    })
}

pub fn apply_set_values(documents: &mut ConfigDocuments, set_values: &[String]) -> Result<()> {
    for kv_pair in set_values {
        let Some((key, value_str)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };
        let key = key.trim();
        debug!("Applying override {} = {}", key, value_str);

        let problem = &mut documents.problem;
        let run = &mut documents.run;
        match key {
            "problem.max-trials" => {
                problem.max_trials = Some(parse_value(key, value_str, "integer")?);
            }
            "problem.batch-size" => {
                problem.batch_size = Some(parse_value(key, value_str, "integer")?);
            }
            "problem.max-concurrency" => {
                problem.max_concurrency = Some(parse_value(key, value_str, "integer")?);
            }
            "problem.max-consecutive-failures" => {
                problem.max_consecutive_failures = Some(parse_value(key, value_str, "integer")?);
            }
            "problem.run-timeout-secs" => {
                problem.run_timeout_secs = Some(parse_value(key, value_str, "integer")?);
            }
            "optimizer.seed" => {
                problem.optimizer.get_or_insert_with(Default::default).seed =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "optimizer.patience" => {
                problem.optimizer.get_or_insert_with(Default::default).patience =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "optimizer.improvement-threshold" => {
                problem
                    .optimizer
                    .get_or_insert_with(Default::default)
                    .improvement_threshold = Some(parse_value(key, value_str, "float")?);
            }
            "run.retries" => {
                run.retries = Some(parse_value(key, value_str, "integer")?);
            }
            "run.timeouts.simulation-secs" => {
                run.timeouts.get_or_insert_with(Default::default).simulation_secs =
                    Some(parse_value(key, value_str, "integer")?);
            }
            "run.timeouts.reconstruction-secs" => {
                run.timeouts
                    .get_or_insert_with(Default::default)
                    .reconstruction_secs = Some(parse_value(key, value_str, "integer")?);
            }
            "run.timeouts.objective-secs" => {
                run.timeouts.get_or_insert_with(Default::default).objective_secs =
                    Some(parse_value(key, value_str, "integer")?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(())
}
