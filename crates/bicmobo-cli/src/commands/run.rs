use crate::cli::RunArgs;
use crate::config;
use crate::error::{CliError, Result};
use crate::ui::{CliProgressHandler, UiEvent};
use bicmobo::core::io::ledger::{LEDGER_FILE_NAME, SNAPSHOT_FILE_NAME};
use bicmobo::engine::error::EngineError;
use bicmobo::engine::progress::ProgressReporter;
use bicmobo::engine::state::RunSummary;
use bicmobo::workflows;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub async fn run(
    args: RunArgs,
    ui_sender: mpsc::Sender<UiEvent>,
    interrupt: watch::Receiver<bool>,
) -> Result<()> {
    let mut documents = config::load_documents(&args.config)?;
    config::apply_run_flags(&mut documents, &args);
    let final_config = config::validate(documents)?;

    let progress_handler = CliProgressHandler::new(ui_sender);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Starting optimization of '{}' (up to {} trial(s))...",
        final_config.problem.name, final_config.problem.max_trials
    );
    info!("Invoking the optimization workflow...");

    let outcome = workflows::optimize::run(&final_config, &reporter, interrupt).await;
    let dropped = progress_handler.dropped();
    if dropped > 0 {
        debug!("{} progress event(s) were not displayed", dropped);
    }

    match outcome {
        Ok(summary) => {
            for line in summary_lines(&summary) {
                println!("{}", line);
            }
            let state_dir = &final_config.problem.out_path;
            println!(
                "Trial ledger: {}\nRun snapshot: {}",
                state_dir.join(LEDGER_FILE_NAME).display(),
                state_dir.join(SNAPSHOT_FILE_NAME).display()
            );
            Ok(())
        }
        Err(EngineError::RunAborted { source }) => {
            error!("Optimization aborted: {}", source);
            if source.diagnostics().is_empty() {
                eprintln!("No trial failures were recorded before the abort.");
            } else {
                eprintln!("Most recent trial failures:");
                for diagnostic in source.diagnostics() {
                    eprintln!("  - {}", diagnostic);
                }
            }
            Err(CliError::BicMobo(EngineError::RunAborted { source }))
        }
        Err(e) => Err(e.into()),
    }
}

fn summary_lines(summary: &RunSummary) -> Vec<String> {
    let counts = summary.counts();
    let mut lines = vec![format!(
        "Optimization of '{}' finished: {} ({} trial(s), {} reported, {} failed).",
        summary.problem, summary.state, counts.total, counts.reported, counts.failed
    )];

    let best = summary.best_values();
    if best.is_empty() {
        warn!("No trial produced objective values.");
        lines.push("Warning: no trial produced objective values.".to_string());
        return lines;
    }

    lines.push(format!("Pareto front: {} point(s)", summary.front.len()));
    lines.push("Best values:".to_string());
    for (objective, value) in &best {
        lines.push(format!("  {:<28} {:.6}", objective, value));
    }

    if let Some(point) = &summary.recommendation {
        lines.push(format!("✓ Recommended design point ({}):", point.trial));
        for (name, value) in &point.assignment {
            lines.push(format!("  {:<28} {}", name, value));
        }
        for (objective, measurement) in point.result.iter() {
            match measurement.sem {
                Some(sem) => lines.push(format!(
                    "  {:<28} {:.6} ± {:.6}",
                    objective, measurement.mean, sem
                )),
                None => lines.push(format!("  {:<28} {:.6}", objective, measurement.mean)),
            }
        }
        match serde_json::to_string(point) {
            Ok(json) => info!("Recommended point: {}", json),
            Err(e) => warn!("Could not serialize the recommended point: {}", e),
        }
    }
    lines
}
