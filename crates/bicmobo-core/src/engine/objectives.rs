use super::process::{ProcessError, ProcessSpec};
use super::scheduler::{Job, Scheduler};
use crate::core::config::models::{ObjectiveConfig, ObjectiveSpec, ResultSource};
use crate::core::environment::EnvOverlay;
use crate::core::io::naming::TrialLayout;
use crate::core::models::objective::{Measurement, ObjectiveResult};
use crate::core::models::stage::Stage;
use crate::core::models::trial::{Trial, TrialFailure, TrialStatus};
use crate::core::utils::template::{TemplateError, TemplateValues};
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum ObjectiveEvaluationError {
    #[error("Objective '{objective}' has no {stage} outputs for input '{input}'")]
    MissingInput {
        objective: String,
        input: String,
        stage: Stage,
    },
    #[error("Objective '{objective}' command template: {source}")]
    Template {
        objective: String,
        source: TemplateError,
    },
    #[error("Objective '{objective}': {source}")]
    Process {
        objective: String,
        source: ProcessError,
    },
    #[error("Objective '{objective}' exited with {code}: {stderr_tail}")]
    NonZeroExit {
        objective: String,
        code: String,
        stderr_tail: String,
    },
    #[error("Objective '{objective}' produced no numeric result: {output:?}")]
    Unparsable { objective: String, output: String },
    #[error("Objective '{objective}' result file '{path}': {source}")]
    Io {
        objective: String,
        path: String,
        source: std::io::Error,
    },
}

/// Runs every configured objective against an executed trial.
pub struct ObjectiveDispatcher<'a, S: Scheduler> {
    objectives: &'a ObjectiveConfig,
    env: EnvOverlay,
    timeout: Duration,
    scheduler: &'a S,
}

impl<'a, S: Scheduler> ObjectiveDispatcher<'a, S> {
    pub fn new(
        objectives: &'a ObjectiveConfig,
        env: EnvOverlay,
        timeout: Duration,
        scheduler: &'a S,
    ) -> Self {
        Self {
            objectives,
            env,
            timeout,
            scheduler,
        }
    }

    /// Moves an executed trial to `Evaluated`, or to `Failed` with the first objective
    /// error. Trials in any other state are returned untouched. No result is recorded
    /// until every objective has finished.
    #[instrument(skip_all, fields(trial = %trial.tag()))]
    pub async fn evaluate(&self, mut trial: Trial) -> Trial {
        if trial.status() != TrialStatus::Executed {
            return trial;
        }

        let outcomes = join_all(
            self.objectives
                .objectives
                .iter()
                .map(|spec| self.evaluate_one(&trial, spec)),
        )
        .await;

        let mut result = ObjectiveResult::new();
        let mut first_error = None;
        for (spec, outcome) in self.objectives.objectives.iter().zip(outcomes) {
            match outcome {
                Ok(measurement) => result.insert(spec.name.clone(), measurement),
                Err(e) => {
                    warn!("Trial {}: {}", trial.tag(), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let recorded = match first_error {
            None => trial.record_result(result),
            Some(e) => trial.fail(TrialFailure::evaluation(e.to_string())),
        };
        match recorded {
            Ok(()) if trial.status() == TrialStatus::Evaluated => {
                info!("Trial {} evaluated", trial.tag())
            }
            Ok(()) => {}
            Err(e) => warn!("{}", e),
        }
        trial
    }

    async fn evaluate_one(
        &self,
        trial: &Trial,
        spec: &ObjectiveSpec,
    ) -> Result<Measurement, ObjectiveEvaluationError> {
        let Some(artifacts) = trial.artifacts() else {
            return Err(self.missing_input(spec));
        };
        let inputs = artifacts.outputs(spec.stage, &spec.input);
        if inputs.is_empty() {
            return Err(self.missing_input(spec));
        }

        let layout = TrialLayout::of_artifacts(trial.tag(), artifacts);
        let output = layout.analysis_output(&spec.input, &spec.name);
        let argv = spec
            .rule
            .render(&TemplateValues {
                executable: &spec.executable,
                inputs,
                output: &output,
                flag: spec.flag.as_deref(),
            })
            .map_err(|source| ObjectiveEvaluationError::Template {
                objective: spec.name.clone(),
                source,
            })?;
        let (out_log, err_log) = layout.logs(Stage::Analysis, &spec.input, &spec.name);
        let process = ProcessSpec::from_argv(&argv)
            .ok_or_else(|| ObjectiveEvaluationError::Template {
                objective: spec.name.clone(),
                source: TemplateError::Empty,
            })?
            .env(self.env.clone())
            .cwd(&artifacts.run_dir)
            .logs(out_log, err_log)
            .timeout(self.timeout);

        let job = Job::new(format!("{}:ana:{}", trial.tag(), spec.name), process);
        let finished = self
            .scheduler
            .run(job)
            .await
            .map_err(|source| ObjectiveEvaluationError::Process {
                objective: spec.name.clone(),
                source,
            })?;
        if !finished.success() {
            return Err(ObjectiveEvaluationError::NonZeroExit {
                objective: spec.name.clone(),
                code: finished
                    .exit_code
                    .map(|c| format!("status {}", c))
                    .unwrap_or_else(|| "a signal".to_string()),
                stderr_tail: finished.stderr_tail(5),
            });
        }

        let measurement = match spec.source {
            ResultSource::Stdout => {
                let last = finished
                    .stdout
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or_default();
                parse_measurement(last).ok_or_else(|| ObjectiveEvaluationError::Unparsable {
                    objective: spec.name.clone(),
                    output: last.to_string(),
                })?
            }
            ResultSource::File => read_result_file(spec, &result_file(&output))?,
        };
        debug!(
            "Objective '{}' of {} = {:?}",
            spec.name,
            trial.tag(),
            measurement
        );
        Ok(measurement)
    }

    fn missing_input(&self, spec: &ObjectiveSpec) -> ObjectiveEvaluationError {
        ObjectiveEvaluationError::MissingInput {
            objective: spec.name.clone(),
            input: spec.input.clone(),
            stage: spec.stage,
        }
    }
}

/// Text file an objective script writes next to its output.
pub fn result_file(output: &Path) -> PathBuf {
    output.with_extension("txt")
}

/// Parses `mean` or `mean sem` from one line.
pub fn parse_measurement(line: &str) -> Option<Measurement> {
    let mut fields = line.split_whitespace().map(|f| f.parse::<f64>().ok());
    let mean = fields.next()??;
    let sem = fields.next().map(|f| f.filter(|v| v.is_finite()));
    if fields.next().is_some() || !mean.is_finite() {
        return None;
    }
    match sem {
        None => Some(Measurement::new(mean)),
        Some(Some(sem)) => Some(Measurement::with_sem(mean, sem)),
        Some(None) => None,
    }
}

fn read_result_file(spec: &ObjectiveSpec, path: &Path) -> Result<Measurement, ObjectiveEvaluationError> {
    let text = std::fs::read_to_string(path).map_err(|source| ObjectiveEvaluationError::Io {
        objective: spec.name.clone(),
        path: path.to_string_lossy().to_string(),
        source,
    })?;
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let joined = match (lines.next(), lines.next()) {
        (Some(mean), Some(sem)) => format!("{} {}", mean, sem),
        (Some(mean), None) => mean.to_string(),
        _ => String::new(),
    };
    parse_measurement(&joined).ok_or_else(|| ObjectiveEvaluationError::Unparsable {
        objective: spec.name.clone(),
        output: text.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::TrialId;
    use crate::core::models::parameter::Assignment;
    use crate::core::models::trial::{FailureKind, TrialArtifacts};
    use crate::core::utils::template::CommandTemplate;
    use crate::core::models::objective::Direction;
    use crate::engine::scheduler::LocalScheduler;
    use crate::engine::testing::write_script;
    use std::fs;
    use tempfile::{TempDir, tempdir};
    use tokio::sync::watch;

    fn objective(dir: &Path, name: &str, body: &str, source: ResultSource) -> ObjectiveSpec {
        ObjectiveSpec {
            name: name.into(),
            input: "e".into(),
            executable: write_script(dir, &format!("{}.sh", name), body),
            rule: CommandTemplate::parse("{exec} -i {input} -o {output} -p {flag}").unwrap(),
            flag: Some("11".into()),
            stage: Stage::Reconstruction,
            direction: Direction::Minimize,
            source,
        }
    }

    fn executed_trial(dir: &TempDir) -> Trial {
        let out_dir = dir.path().join("out");
        let log_dir = dir.path().join("log");
        fs::create_dir_all(&out_dir).unwrap();
        fs::create_dir_all(&log_dir).unwrap();
        let mut artifacts = TrialArtifacts {
            run_dir: dir.path().to_path_buf(),
            out_dir,
            log_dir,
            ..TrialArtifacts::default()
        };
        artifacts
            .rec_outputs
            .insert("e".into(), vec![dir.path().join("a.root"), dir.path().join("b.root")]);
        let mut trial = Trial::new(TrialId(1), Assignment::new());
        trial.mark_materialized(artifacts.clone()).unwrap();
        trial.mark_executed(artifacts).unwrap();
        trial
    }

    async fn evaluate(objectives: Vec<ObjectiveSpec>, trial: Trial) -> Trial {
        let (_tx, rx) = watch::channel(false);
        let scheduler = LocalScheduler::new(4, rx);
        let config = ObjectiveConfig { objectives };
        let dispatcher =
            ObjectiveDispatcher::new(&config, EnvOverlay::new(), Duration::from_secs(20), &scheduler);
        dispatcher.evaluate(trial).await
    }

    #[test]
    fn parses_mean_and_optional_sem() {
        assert_eq!(parse_measurement("0.042"), Some(Measurement::new(0.042)));
        assert_eq!(
            parse_measurement(" 0.042  0.001 "),
            Some(Measurement::with_sem(0.042, 0.001))
        );
        assert_eq!(parse_measurement("resolution: 0.042"), None);
        assert_eq!(parse_measurement("0.042 0.001 7"), None);
        assert_eq!(parse_measurement("NaN"), None);
        assert_eq!(parse_measurement(""), None);
    }

    #[tokio::test]
    async fn stdout_objectives_resolve_into_one_result() {
        let dir = tempdir().unwrap();
        let resolution = objective(
            dir.path(),
            "ElectronEnergyResolution",
            "echo \"inputs: $2\"\necho 0.042 0.001\n",
            ResultSource::Stdout,
        );
        let efficiency = objective(dir.path(), "Efficiency", "echo 0.93\n", ResultSource::Stdout);
        let trial = evaluate(vec![resolution, efficiency], executed_trial(&dir)).await;

        assert_eq!(trial.status(), TrialStatus::Evaluated, "{:?}", trial.failure());
        let result = trial.result().unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(
            result.get("ElectronEnergyResolution"),
            Some(&Measurement::with_sem(0.042, 0.001))
        );
        assert_eq!(result.mean("Efficiency"), Some(0.93));
    }

    #[tokio::test]
    async fn file_objective_reads_text_next_to_output() {
        let dir = tempdir().unwrap();
        let body = "while [ $# -gt 0 ]; do\n  case \"$1\" in -o) out=\"$2\"; shift ;; esac\n  shift\ndone\nprintf '0.05\\n0.002\\n' > \"${out%.root}.txt\"\n";
        let spec = objective(dir.path(), "Resolution", body, ResultSource::File);
        let trial = evaluate(vec![spec], executed_trial(&dir)).await;

        assert_eq!(trial.status(), TrialStatus::Evaluated, "{:?}", trial.failure());
        assert_eq!(
            trial.result().unwrap().get("Resolution"),
            Some(&Measurement::with_sem(0.05, 0.002))
        );
    }

    #[tokio::test]
    async fn objective_writes_to_the_trial_analysis_output() {
        let dir = tempdir().unwrap();
        let body = "while [ $# -gt 0 ]; do\n  case \"$1\" in -o) out=\"$2\"; shift ;; esac\n  shift\ndone\ntouch \"$out\"\necho 0.5\n";
        let spec = objective(dir.path(), "Resolution", body, ResultSource::Stdout);
        let trial = evaluate(vec![spec], executed_trial(&dir)).await;
        assert_eq!(trial.status(), TrialStatus::Evaluated, "{:?}", trial.failure());

        let layout = TrialLayout::of_artifacts(trial.tag(), trial.artifacts().unwrap());
        assert!(layout.analysis_output("e", "Resolution").is_file());
        let (out_log, _) = layout.logs(Stage::Analysis, "e", "Resolution");
        assert!(out_log.is_file());
    }

    #[tokio::test]
    async fn unparsable_output_fails_the_whole_trial() {
        let dir = tempdir().unwrap();
        let good = objective(dir.path(), "Good", "echo 1.0\n", ResultSource::Stdout);
        let bad = objective(dir.path(), "Bad", "echo 'fit did not converge'\n", ResultSource::Stdout);
        let trial = evaluate(vec![good, bad], executed_trial(&dir)).await;

        assert_eq!(trial.status(), TrialStatus::Failed);
        assert!(trial.result().is_none());
        let failure = trial.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Evaluation);
        assert!(failure.message.contains("no numeric result"));
    }

    #[tokio::test]
    async fn nonzero_exit_and_missing_inputs_are_evaluation_failures() {
        let dir = tempdir().unwrap();
        let crash = objective(dir.path(), "Crash", "echo boom >&2\nexit 2\n", ResultSource::Stdout);
        let trial = evaluate(vec![crash], executed_trial(&dir)).await;
        assert!(trial.failure().unwrap().message.contains("status 2: boom"));

        let mut other_input = objective(dir.path(), "Other", "echo 1\n", ResultSource::Stdout);
        other_input.input = "pi_minus".into();
        let trial = evaluate(vec![other_input], executed_trial(&dir)).await;
        assert_eq!(trial.failure().unwrap().kind, FailureKind::Evaluation);
        assert!(trial.failure().unwrap().message.contains("pi_minus"));
    }

    #[tokio::test]
    async fn trials_that_did_not_execute_are_left_alone() {
        let dir = tempdir().unwrap();
        let spec = objective(dir.path(), "E", "echo 1\n", ResultSource::Stdout);
        let mut failed = Trial::new(TrialId(9), Assignment::new());
        failed.fail(TrialFailure::execution("sim crashed")).unwrap();
        let trial = evaluate(vec![spec], failed).await;
        assert_eq!(trial.failure().unwrap().kind, FailureKind::Execution);
    }
}
