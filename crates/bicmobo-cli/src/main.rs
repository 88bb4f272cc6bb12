mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod ui;

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};
use crate::ui::UiManager;
use clap::Parser;
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let result = run_app().await;
    let code = exit_code(&result);
    if let Err(e) = result {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        eprintln!("\n❌ Error: {}", e);
    }
    if code != 0 {
        std::process::exit(code);
    }
}

/// Process exit status for the outcome of a command.
fn exit_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Turns the first Ctrl-C into an interrupt of the running optimization.
fn spawn_interrupt_listener() -> watch::Receiver<bool> {
    let (interrupt_sender, interrupt_receiver) = watch::channel(false);
    task::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping running trials...");
                let _ = interrupt_sender.send(true);
                // Keep the sender alive so receivers never see a closed channel.
                std::future::pending::<()>().await;
            }
            Err(e) => {
                warn!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });
    interrupt_receiver
}

async fn run_app() -> Result<()> {
    let (ui_manager, ui_sender, shutdown_sender) = UiManager::new();
    let ui_handle = task::spawn(ui_manager.run());

    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, &cli.log_file, ui_sender.clone())?;

    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default().into_hooks();
    eyre_hook.install().map_err(|e| CliError::Other(e.into()))?;
    std::panic::set_hook(Box::new(move |pi| {
        error!("{}", panic_hook.panic_report(pi));
    }));

    let command_result = async {
        info!("🚀 BIC-MOBO v{} starting up.", env!("CARGO_PKG_VERSION"));
        debug!("Full CLI arguments parsed: {:?}", &cli);

        match cli.command {
            Commands::Run(args) => {
                info!("Dispatching to 'run' command.");
                let interrupt = spawn_interrupt_listener();
                commands::run::run(args, ui_sender, interrupt).await
            }
            Commands::Validate(args) => {
                info!("Dispatching to 'validate' command.");
                commands::validate::run(args).await
            }
        }
    }
    .await;

    match &command_result {
        Ok(_) => {
            info!("✅ Command completed successfully.");
            println!("✅ Command completed successfully.");
        }
        Err(e) => {
            error!("❌ Command failed: {}", e);
        }
    }

    if shutdown_sender.send(true).is_err() {
        warn!("UI manager may have already exited before shutdown signal.");
    }

    ui_handle
        .await
        .map_err(|e| CliError::Other(anyhow::anyhow!("UI manager task failed: {}", e)))?;

    command_result
}
