use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "BIC-MOBO - Multi-objective design optimization driver for the barrel imaging calorimeter.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the optimization loop until it converges, exhausts its budget or aborts.
    Run(RunArgs),
    /// Load and validate the configuration, then print the search space and objectives.
    Validate(ConfigArgs),
}

/// Locations of the configuration documents and overrides applied on top of them.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Directory holding run.config, problem.config, parameters.config and objectives.config.
    /// Defaults to ./configuration, then $BIC_MOBO/configuration.
    #[arg(short = 'd', long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Path to the run configuration, overriding the one in the config directory.
    #[arg(long, value_name = "PATH")]
    pub run_config: Option<PathBuf>,

    /// Path to the problem configuration.
    #[arg(long, value_name = "PATH")]
    pub problem_config: Option<PathBuf>,

    /// Path to the parameters configuration.
    #[arg(long, value_name = "PATH")]
    pub parameters_config: Option<PathBuf>,

    /// Path to the objectives configuration.
    #[arg(long, value_name = "PATH")]
    pub objectives_config: Option<PathBuf>,

    /// Set a specific configuration value, overriding the config files.
    /// Can be used multiple times. Example: -S problem.max-trials=50
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Override the maximum number of trials.
    #[arg(long, value_name = "INT")]
    pub max_trials: Option<usize>,

    /// Override the number of trials executed concurrently.
    #[arg(short = 'j', long = "max-concurrency", value_name = "NUM")]
    pub max_concurrency: Option<usize>,

    /// Override the optimizer's random seed.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_config_flags_and_overrides() {
        let cli = Cli::try_parse_from([
            "bic-mobo",
            "-vv",
            "run",
            "-d",
            "conf",
            "-S",
            "problem.batch-size=2",
            "-S",
            "optimizer.seed=3",
            "--max-trials",
            "12",
            "-j",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("Expected 'run' subcommand");
        };
        assert_eq!(args.config.config_dir, Some(PathBuf::from("conf")));
        assert_eq!(args.config.set_values.len(), 2);
        assert_eq!(args.max_trials, Some(12));
        assert_eq!(args.max_concurrency, Some(4));
        assert_eq!(args.seed, None);
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["bic-mobo", "-q", "-v", "validate"]).is_err());
    }
}
