use crate::core::config::Config;
use crate::core::environment::{BaseEnvironment, EnvironmentAdapter};
use crate::core::io::ledger::TrialLedger;
use crate::core::models::ids::TrialId;
use crate::core::models::trial::{Trial, TrialStatus};
use crate::engine::error::{EngineError, RunAbortedError};
use crate::engine::executor::TrialExecutor;
use crate::engine::objectives::ObjectiveDispatcher;
use crate::engine::optimizer::{self, Optimizer, TrialReport};
use crate::engine::process::cancelled;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::scheduler::LocalScheduler;
use crate::engine::space::ParameterSpace;
use crate::engine::state::{RunSnapshot, RunState, RunSummary, TrialCounts};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Number of failed-trial diagnostics carried by a [`RunAbortedError`].
const RECENT_DIAGNOSTICS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
enum AbortCause {
    Timeout(Duration),
    Interrupt,
}

/// Bookkeeping of the loop that outlives a single batch.
struct RunBook<'a> {
    config: &'a Config,
    ledger: TrialLedger,
    trials: Vec<Trial>,
    consecutive_failures: usize,
    recent: VecDeque<String>,
}

impl<'a> RunBook<'a> {
    fn record_failure(&mut self, trial: &Trial) {
        self.consecutive_failures += 1;
        let reason = trial
            .failure()
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("ended in state '{}'", trial.status()));
        if self.recent.len() == RECENT_DIAGNOSTICS {
            self.recent.pop_front();
        }
        self.recent.push_back(format!("{}: {}", trial.tag(), reason));
    }

    fn recent(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    fn snapshot(&self, optimizer: &dyn Optimizer, state: RunState) -> Result<(), EngineError> {
        let front = optimizer.front();
        self.ledger.write_snapshot(&RunSnapshot {
            problem: &self.config.problem.name,
            optimizer: optimizer.name(),
            state,
            counts: TrialCounts::of(&self.trials),
            trials: &self.trials,
            pareto_front: front,
            best_values: front.best_values(),
            recommendation: front.recommendation(),
        })?;
        Ok(())
    }

    /// Records trials that never reached reporting because the run is ending.
    fn abandon(&mut self, batch: Vec<Trial>) -> Result<(), EngineError> {
        for trial in batch {
            self.ledger.append(&trial)?;
            self.trials.push(trial);
        }
        Ok(())
    }
}

/// Runs the optimization loop until the optimizer converges, the trial budget is used
/// up, or the run is aborted.
///
/// `shutdown` is the external interrupt: once it turns `true` all in-flight subprocess
/// trees are killed and the run ends with [`RunAbortedError::Interrupted`].
#[instrument(skip_all, name = "optimization_workflow")]
pub async fn run(
    config: &Config,
    reporter: &ProgressReporter<'_>,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary, EngineError> {
    // === Initializing ===
    reporter.report(Progress::PhaseStart {
        name: RunState::Initializing.phase_name(),
    });
    let space = ParameterSpace::new(&config.parameters);
    let mut optimizer = optimizer::build(&config.problem.optimizer, &space, &config.objectives);
    let env = EnvironmentAdapter::for_run(&config.run).resolve(&BaseEnvironment::capture());
    let ledger = TrialLedger::create(
        &config.problem.out_path,
        space.names(),
        config.objectives.names(),
    )?;

    let (abort_tx, abort_rx) = watch::channel(false);
    let cause = Arc::new(Mutex::new(None));
    let watcher = tokio::spawn(watch_for_abort(
        shutdown,
        config.problem.run_timeout,
        abort_tx,
        Arc::clone(&cause),
    ));

    let scheduler = LocalScheduler::new(config.problem.max_concurrency, abort_rx);
    let executor = TrialExecutor::new(&config.run, &space, env.clone(), &scheduler);
    let dispatcher = ObjectiveDispatcher::new(
        &config.objectives,
        env,
        config.run.timeouts.objective,
        &scheduler,
    );
    info!(
        "Problem '{}': {} parameter(s), {} objective(s), optimizer '{}', up to {} trial(s)",
        config.problem.name,
        space.len(),
        config.objectives.objectives.len(),
        optimizer.name(),
        config.problem.max_trials
    );
    reporter.report(Progress::PhaseFinish);

    let mut book = RunBook {
        config,
        ledger,
        trials: Vec::new(),
        consecutive_failures: 0,
        recent: VecDeque::new(),
    };
    let outcome = drive(
        &mut book,
        optimizer.as_mut(),
        &space,
        &executor,
        &dispatcher,
        &cause,
        reporter,
    )
    .await;
    watcher.abort();

    let state = match outcome {
        Ok(state) => state,
        Err(e) => {
            if let Err(snapshot_error) = book.snapshot(optimizer.as_ref(), RunState::Aborted) {
                warn!("Failed to write final snapshot: {}", snapshot_error);
            }
            return Err(e);
        }
    };
    book.snapshot(optimizer.as_ref(), state)?;

    let summary = RunSummary {
        problem: config.problem.name.clone(),
        state,
        trials: book.trials,
        front: optimizer.front().clone(),
        recommendation: optimizer.recommendation(),
    };
    let counts = summary.counts();
    info!(
        "Run finished as {} after {} trial(s): {} reported, {} failed",
        state, counts.total, counts.reported, counts.failed
    );
    reporter.report(Progress::Message(format!(
        "{}: {} trial(s), {} reported, {} failed",
        state, counts.total, counts.reported, counts.failed
    )));
    Ok(summary)
}

async fn drive(
    book: &mut RunBook<'_>,
    optimizer: &mut dyn Optimizer,
    space: &ParameterSpace,
    executor: &TrialExecutor<'_, LocalScheduler>,
    dispatcher: &ObjectiveDispatcher<'_, LocalScheduler>,
    cause: &Mutex<Option<AbortCause>>,
    reporter: &ProgressReporter<'_>,
) -> Result<RunState, EngineError> {
    let config: &Config = book.config;
    let problem = &config.problem;
    let mut next_id = TrialId(1);

    loop {
        check_abort(cause, book)?;
        let remaining = problem.max_trials.saturating_sub(book.trials.len());
        if remaining == 0 {
            return Ok(RunState::Exhausted);
        }
        if optimizer.is_converged() {
            return Ok(RunState::Converged);
        }

        // === Proposing ===
        reporter.report(Progress::PhaseStart {
            name: RunState::Proposing.phase_name(),
        });
        let candidates = optimizer.propose(problem.batch_size.min(remaining))?;
        reporter.report(Progress::PhaseFinish);
        if candidates.is_empty() {
            info!("Optimizer '{}' has no further candidates", optimizer.name());
            return Ok(RunState::Converged);
        }
        for candidate in &candidates {
            space.validate(candidate)?;
        }
        let batch: Vec<Trial> = candidates
            .into_iter()
            .map(|assignment| {
                let trial = Trial::new(next_id, assignment);
                next_id = next_id.next();
                trial
            })
            .collect();
        info!(
            "Proposed {} trial(s): {}",
            batch.len(),
            batch.iter().map(Trial::tag).collect::<Vec<_>>().join(", ")
        );

        // === Executing ===
        let batch = run_phase(RunState::Executing, batch, reporter, move |trial| {
            executor.execute(trial)
        })
        .await;
        if let Err(e) = check_abort(cause, book) {
            book.abandon(batch)?;
            return Err(e.into());
        }

        // === Evaluating ===
        let batch = run_phase(RunState::Evaluating, batch, reporter, move |trial| {
            dispatcher.evaluate(trial)
        })
        .await;
        if let Err(e) = check_abort(cause, book) {
            book.abandon(batch)?;
            return Err(e.into());
        }

        // === Reporting ===
        reporter.report(Progress::PhaseStart {
            name: RunState::Reporting.phase_name(),
        });
        let mut batch = batch.into_iter();
        while let Some(mut trial) = batch.next() {
            let report = TrialReport::from_trial(&trial);
            optimizer.report(&report);
            if trial.status() == TrialStatus::Evaluated {
                trial.advance(TrialStatus::Reported).map_err(|e| EngineError::Internal(e.to_string()))?;
                book.consecutive_failures = 0;
                reporter.report(Progress::StatusUpdate {
                    text: format!("{} reported", trial.tag()),
                });
            } else {
                book.record_failure(&trial);
                reporter.report(Progress::StatusUpdate {
                    text: format!("{} failed", trial.tag()),
                });
            }
            book.ledger.append(&trial)?;
            book.trials.push(trial);

            let threshold = problem.max_consecutive_failures;
            if threshold > 0 && book.consecutive_failures >= threshold {
                book.abandon(batch.collect())?;
                reporter.report(Progress::PhaseFinish);
                return Err(RunAbortedError::ConsecutiveFailures {
                    count: book.consecutive_failures,
                    threshold,
                    recent: book.recent(),
                }
                .into());
            }
        }
        book.snapshot(optimizer, RunState::Reporting)?;
        reporter.report(Progress::PhaseFinish);
    }
}

/// Runs `step` on every trial of the batch concurrently and returns the trials in id
/// order, whatever order they finished in.
async fn run_phase<F, Fut>(
    state: RunState,
    batch: Vec<Trial>,
    reporter: &ProgressReporter<'_>,
    step: F,
) -> Vec<Trial>
where
    F: Fn(Trial) -> Fut,
    Fut: Future<Output = Trial>,
{
    reporter.report(Progress::PhaseStart {
        name: state.phase_name(),
    });
    reporter.report(Progress::TaskStart {
        total_steps: batch.len() as u64,
    });
    let mut pending: FuturesUnordered<Fut> = batch.into_iter().map(step).collect();
    let mut done = Vec::with_capacity(pending.len());
    while let Some(trial) = pending.next().await {
        reporter.report(Progress::TaskIncrement);
        done.push(trial);
    }
    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);
    done.sort_by_key(|trial| trial.id);
    done
}

fn check_abort(cause: &Mutex<Option<AbortCause>>, book: &RunBook<'_>) -> Result<(), RunAbortedError> {
    let current = match cause.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    };
    match current {
        None => Ok(()),
        Some(AbortCause::Timeout(after)) => Err(RunAbortedError::GlobalTimeout {
            after,
            recent: book.recent(),
        }),
        Some(AbortCause::Interrupt) => Err(RunAbortedError::Interrupted {
            recent: book.recent(),
        }),
    }
}

async fn watch_for_abort(
    mut shutdown: watch::Receiver<bool>,
    run_timeout: Option<Duration>,
    abort: watch::Sender<bool>,
    cause: Arc<Mutex<Option<AbortCause>>>,
) {
    let deadline = async {
        match run_timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    let reason = tokio::select! {
        _ = deadline => AbortCause::Timeout(run_timeout.unwrap_or_default()),
        _ = cancelled(&mut shutdown) => AbortCause::Interrupt,
    };
    warn!("Aborting run: {:?}", reason);
    match cause.lock() {
        Ok(mut guard) => *guard = Some(reason),
        Err(poisoned) => *poisoned.into_inner() = Some(reason),
    }
    abort.send_replace(true);
}
