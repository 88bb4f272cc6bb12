use super::process::{ProcessError, ProcessSpec};
use super::scheduler::{Job, Scheduler};
use super::space::ParameterSpace;
use crate::core::config::models::{InputKind, ParameterTarget, RunConfig};
use crate::core::environment::EnvOverlay;
use crate::core::io::compact::{GeometryEditor, GeometryError};
use crate::core::io::naming::{TrialLayout, steering_tag};
use crate::core::io::scripts::write_driver_script;
use crate::core::models::stage::Stage;
use crate::core::models::trial::{LifecycleError, Trial, TrialArtifacts, TrialFailure};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const STDERR_TAIL_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum TrialExecutionError {
    #[error("Failed to prepare '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Geometry edit failed: {source}")]
    Geometry {
        #[from]
        source: GeometryError,
    },
    #[error("Assignment has no value for parameter '{0}'")]
    MissingValue(String),
    #[error("{stage} of {label}/{steering}: {source}")]
    Process {
        stage: Stage,
        label: String,
        steering: String,
        source: ProcessError,
    },
    #[error("{stage} of {label}/{steering} exited with {code}: {stderr_tail}")]
    NonZeroExit {
        stage: Stage,
        label: String,
        steering: String,
        code: String,
        stderr_tail: String,
    },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// One simulation or reconstruction command of a trial's pipeline.
#[derive(Debug, Clone)]
struct PipelineStep {
    stage: Stage,
    label: String,
    steering: String,
    spec: ProcessSpec,
}

/// Materializes trials and runs their simulation and reconstruction steps through a
/// [`Scheduler`].
pub struct TrialExecutor<'a, S: Scheduler> {
    run: &'a RunConfig,
    space: &'a ParameterSpace,
    env: EnvOverlay,
    scheduler: &'a S,
}

impl<'a, S: Scheduler> TrialExecutor<'a, S> {
    pub fn new(
        run: &'a RunConfig,
        space: &'a ParameterSpace,
        env: EnvOverlay,
        scheduler: &'a S,
    ) -> Self {
        Self {
            run,
            space,
            env,
            scheduler,
        }
    }

    /// Takes a proposed trial to `Executed`, or to `Failed` with the captured diagnostic.
    /// Errors never escape: a broken trial must not stop the run.
    #[instrument(skip_all, fields(trial = %trial.tag()))]
    pub async fn execute(&self, mut trial: Trial) -> Trial {
        let outcome = match self.materialize(&mut trial) {
            Ok((artifacts, steps)) => self.run_pipeline(&mut trial, artifacts, steps).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!("Trial {} failed: {}", trial.tag(), e);
            if let Err(lifecycle) = trial.fail(TrialFailure::execution(e.to_string())) {
                warn!("{}", lifecycle);
            }
        }
        trial
    }

    fn materialize(
        &self,
        trial: &mut Trial,
    ) -> Result<(TrialArtifacts, Vec<PipelineStep>), TrialExecutionError> {
        let layout = TrialLayout::for_trial(self.run, trial.id);
        layout.create().map_err(|e| TrialExecutionError::Io {
            path: layout.run_dir.to_string_lossy().to_string(),
            source: e,
        })?;

        let mut editor = GeometryEditor::new(&self.run.detector, layout.geometry_dir(), &layout.tag);
        let mut rec_flags = Vec::new();
        for parameter in self.space.parameters() {
            let value = trial
                .assignment
                .get(&parameter.name)
                .ok_or_else(|| TrialExecutionError::MissingValue(parameter.name.clone()))?;
            match &parameter.target {
                ParameterTarget::Geometry(target) => {
                    editor.apply(target, value)?;
                }
                ParameterTarget::Reconstruction { path, units } => {
                    rec_flags.push(format!("-P{}={}", path, value.with_units(units.as_deref())));
                }
            }
        }
        let edited_compacts: Vec<PathBuf> = editor.edited().values().cloned().collect();
        let detector_config = editor.finish()?;

        let mut env = self.env.clone();
        if let Some(stem) = detector_config.file_stem() {
            env.set("DETECTOR_CONFIG", stem.to_string_lossy());
        }

        let mut artifacts = TrialArtifacts {
            run_dir: layout.run_dir.clone(),
            out_dir: layout.out_dir.clone(),
            log_dir: layout.log_dir.clone(),
            detector_config: detector_config.clone(),
            edited_compacts,
            ..TrialArtifacts::default()
        };

        let mut steps = Vec::new();
        for (label, input) in &self.run.sim_inputs {
            for steering in &input.steering {
                let sim_out = layout.output(label, steering, Stage::Simulation);
                let rec_out = layout.output(label, steering, Stage::Reconstruction);

                let mut sim_args = vec![
                    "--compactFile".to_string(),
                    detector_config.display().to_string(),
                    "--steeringFile".to_string(),
                    input.location.join(steering).display().to_string(),
                ];
                if input.kind == InputKind::Gun {
                    sim_args.push("-G".to_string());
                }
                if let Some(events) = input.events {
                    sim_args.push("--numberOfEvents".to_string());
                    sim_args.push(events.to_string());
                }
                sim_args.push("--outputFile".to_string());
                sim_args.push(sim_out.display().to_string());

                let mut rec_args = vec![
                    format!("-Pdd4hep:xml_files={}", detector_config.display()),
                    format!("-Ppodio:output_file={}", rec_out.display()),
                ];
                if !self.run.rec_collections.is_empty() {
                    rec_args.push(format!(
                        "-Ppodio:output_collections={}",
                        self.run.rec_collections.join(",")
                    ));
                }
                rec_args.extend(rec_flags.iter().cloned());
                rec_args.push(sim_out.display().to_string());

                for (stage, program, args, timeout) in [
                    (
                        Stage::Simulation,
                        &self.run.sim_exec,
                        sim_args,
                        self.run.timeouts.simulation,
                    ),
                    (
                        Stage::Reconstruction,
                        &self.run.rec_exec,
                        rec_args,
                        self.run.timeouts.reconstruction,
                    ),
                ] {
                    if self.run.write_scripts {
                        let script = layout.script(label, steering, stage);
                        write_driver_script(
                            &script,
                            self.run.setup_script.as_deref(),
                            &env,
                            program,
                            &args,
                        )
                        .map_err(|e| TrialExecutionError::Io {
                            path: script.to_string_lossy().to_string(),
                            source: e,
                        })?;
                        artifacts.scripts.push(script);
                    }
                    let (stdout_log, stderr_log) = layout.logs(stage, label, &steering_tag(steering));
                    steps.push(PipelineStep {
                        stage,
                        label: label.clone(),
                        steering: steering.clone(),
                        spec: ProcessSpec::new(program)
                            .args(args)
                            .env(env.clone())
                            .cwd(&layout.run_dir)
                            .logs(stdout_log, stderr_log)
                            .timeout(timeout),
                    });
                }

                artifacts
                    .sim_outputs
                    .entry(label.clone())
                    .or_default()
                    .push(sim_out);
                artifacts
                    .rec_outputs
                    .entry(label.clone())
                    .or_default()
                    .push(rec_out);
            }
        }

        trial.mark_materialized(artifacts.clone())?;
        debug!(
            "Materialized {} with {} pipeline step(s) using {:?}",
            trial.tag(),
            steps.len(),
            detector_config
        );
        Ok((artifacts, steps))
    }

    async fn run_pipeline(
        &self,
        trial: &mut Trial,
        artifacts: TrialArtifacts,
        steps: Vec<PipelineStep>,
    ) -> Result<(), TrialExecutionError> {
        for step in steps {
            self.run_step(trial, &step).await?;
        }
        trial.mark_executed(artifacts)?;
        info!("Trial {} executed", trial.tag());
        Ok(())
    }

    async fn run_step(&self, trial: &Trial, step: &PipelineStep) -> Result<(), TrialExecutionError> {
        let attempts = self.run.retries + 1;
        let mut attempt = 1;
        loop {
            let job = Job::new(
                format!("{}:{}:{}/{}", trial.tag(), step.stage, step.label, step.steering),
                step.spec.clone(),
            );
            let error = match self.scheduler.run(job).await {
                Ok(output) if output.success() => return Ok(()),
                Ok(output) => TrialExecutionError::NonZeroExit {
                    stage: step.stage,
                    label: step.label.clone(),
                    steering: step.steering.clone(),
                    code: output
                        .exit_code
                        .map(|c| format!("status {}", c))
                        .unwrap_or_else(|| "a signal".to_string()),
                    stderr_tail: output.stderr_tail(STDERR_TAIL_LINES),
                },
                Err(source) => {
                    let cancelled = source == ProcessError::Cancelled;
                    let error = TrialExecutionError::Process {
                        stage: step.stage,
                        label: step.label.clone(),
                        steering: step.steering.clone(),
                        source,
                    };
                    if cancelled {
                        return Err(error);
                    }
                    error
                }
            };
            if attempt >= attempts {
                return Err(error);
            }
            warn!(
                "Attempt {}/{} of {} failed, retrying: {}",
                attempt,
                attempts,
                trial.tag(),
                error
            );
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::TrialId;
    use crate::core::models::parameter::{Assignment, ParameterValue};
    use crate::core::models::trial::{FailureKind, TrialStatus};
    use crate::engine::scheduler::LocalScheduler;
    use crate::engine::testing::{LABEL, Pipeline, REC_FAIL, SIM_OK};
    use std::fs;
    use std::time::Duration;
    use tokio::sync::watch;

    fn assignment() -> Assignment {
        let mut a = Assignment::new();
        a.insert("enable_staves_2".into(), ParameterValue::Int(0));
        a.insert("thickness".into(), ParameterValue::Float(42.5));
        a
    }

    async fn execute(pipeline: &Pipeline, id: u64) -> Trial {
        let (_tx, rx) = watch::channel(false);
        let scheduler = LocalScheduler::new(2, rx);
        let space = ParameterSpace::new(&pipeline.config.parameters);
        let env = EnvOverlay::new().with("DETECTOR", "epic");
        let executor = TrialExecutor::new(&pipeline.config.run, &space, env, &scheduler);
        executor.execute(Trial::new(TrialId(id), assignment())).await
    }

    #[tokio::test]
    async fn successful_pipeline_reaches_executed() {
        let pipeline = Pipeline::happy();
        let trial = execute(&pipeline, 1).await;

        assert_eq!(trial.status(), TrialStatus::Executed, "{:?}", trial.failure());
        let artifacts = trial.artifacts().unwrap();
        assert!(artifacts.detector_config.ends_with("geometry/epic_craterlake_trial00001.xml"));
        assert_eq!(artifacts.edited_compacts.len(), 1);
        assert_eq!(artifacts.scripts.len(), 2);

        let sim_out = &artifacts.outputs(Stage::Simulation, LABEL)[0];
        let rec_out = &artifacts.outputs(Stage::Reconstruction, LABEL)[0];
        assert!(sim_out.ends_with(
            "out/trial00001/aid2e_sim.trial00001_single_electron_central_e5ele.edm4hep.root"
        ));
        assert_eq!(
            fs::read_to_string(sim_out).unwrap().trim(),
            "simulated epic_craterlake_trial00001"
        );
        let rec_text = fs::read_to_string(rec_out).unwrap();
        assert!(rec_text.contains("-PBEMC:EcalBarrelImagingRawHits:enable_staves_2=0"));
        assert!(rec_text.contains("-Ppodio:output_collections=EcalBarrelClusters"));

        let compact = fs::read_to_string(&artifacts.edited_compacts[0]).unwrap();
        assert!(compact.contains(r#"value="42.5*cm""#));
        assert!(pipeline
            .root()
            .join("log/trial00001/sim.single_electron_central_e5ele.out")
            .exists());
    }

    #[tokio::test]
    async fn failing_reconstruction_marks_trial_failed() {
        let pipeline = Pipeline::new(SIM_OK, REC_FAIL, "echo 0.1\n");
        let trial = execute(&pipeline, 2).await;

        assert_eq!(trial.status(), TrialStatus::Failed);
        let failure = trial.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Execution);
        assert!(failure.message.contains("rec of single_electron"));
        assert!(failure.message.contains("status 1"));
        assert!(failure.message.contains("cannot open input"));
        assert!(trial.result().is_none());
        let err_log = pipeline
            .root()
            .join("log/trial00002/rec.single_electron_central_e5ele.err");
        assert!(fs::read_to_string(err_log).unwrap().contains("cannot open input"));
    }

    #[tokio::test]
    async fn retries_rerun_failed_steps() {
        let counter = "count_file=\"$(dirname \"$0\")/attempts\"\necho x >> \"$count_file\"\n";
        let mut pipeline = Pipeline::new(SIM_OK, &format!("{}exit 1\n", counter), "echo 0.1\n");
        pipeline.config.run.retries = 2;
        let trial = execute(&pipeline, 3).await;

        assert_eq!(trial.status(), TrialStatus::Failed);
        let attempts = fs::read_to_string(pipeline.root().join("bin/attempts")).unwrap();
        assert_eq!(attempts.lines().count(), 3);
    }

    #[tokio::test]
    async fn timeout_is_recorded_as_the_cause() {
        let mut pipeline = Pipeline::new("sleep 30\n", "exit 0\n", "echo 0.1\n");
        pipeline.config.run.timeouts.simulation = Duration::from_millis(200);
        let trial = execute(&pipeline, 4).await;

        assert_eq!(trial.status(), TrialStatus::Failed);
        assert!(trial.failure().unwrap().message.contains("Timed out"));
    }

    #[tokio::test]
    async fn missing_geometry_element_fails_before_running() {
        let mut pipeline = Pipeline::happy();
        if let ParameterTarget::Geometry(target) = &mut pipeline.config.parameters.parameters[1].target {
            target.name = "NoSuchConstant".into();
        }
        let trial = execute(&pipeline, 5).await;

        assert_eq!(trial.status(), TrialStatus::Failed);
        assert!(trial.failure().unwrap().message.contains("NoSuchConstant"));
        assert!(!pipeline.root().join("log/trial00005/sim.single_electron_central_e5ele.out").exists());
    }
}
