// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinError;
use wojat_procmgr::config::OPTIONAL_SECRETS;
use wojat_procmgr::signals::ShutdownSignals;
use wojat_procmgr::{
    LifecycleError, Orchestrator, ServiceRegistry, Settings, ShutdownSignal, StartupSummary,
    server,
};

#[derive(Debug, Parser)]
#[command(name = "wojat-procmgrd", version, about = "Wojat platform process orchestrator")]
struct Cli {
    /// Directory of `<service>.yaml` files (overrides WOJAT_PM_CONFIG_DIR).
    /// Without one, the built-in service table is used.
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Base for relative working directories (overrides WOJAT_PM_ROOT).
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Start every service and supervise until signalled (default).
    Run,
    /// Validate the service table and environment, then exit.
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(dir) = cli.config_dir {
        settings.config_dir = Some(dir);
    }
    if let Some(root) = cli.root {
        settings.root_dir = root;
    }

    if let Err(e) = wojat_log::init(settings.log_level, settings.log_color) {
        eprintln!("wojat-procmgrd: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }
    install_panic_hook();
    for warning in &settings.warnings {
        warn!("{warning}");
    }

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Check => check(&settings),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Any panic, on any task, takes the whole orchestrator down with exit 1.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!("panic: {info}");
        default_hook(info);
        std::process::exit(1);
    }));
}

fn report_secrets(settings: &Settings) -> bool {
    let missing = settings.missing_required_secrets();
    if missing.is_empty() {
        info!(success = true; "required secrets present");
    } else {
        warn!("missing required secrets: {}", missing.join(", "));
    }
    info!(
        "{}/{} optional secrets set",
        settings.optional_secrets_present(),
        OPTIONAL_SECRETS.len()
    );
    missing.is_empty()
}

type StartupResult = std::result::Result<wojat_procmgr::Result<StartupSummary>, JoinError>;

enum Startup {
    Finished(StartupResult),
    Interrupted(ShutdownSignal),
}

async fn run(settings: Settings) -> Result<ExitCode> {
    info!(
        "wojat-procmgrd starting (version {}, NODE_ENV={}, PORT={})",
        env!("CARGO_PKG_VERSION"),
        settings.node_env,
        settings.public_port
    );
    let registry = ServiceRegistry::load(&settings).context("loading service registry")?;
    info!("loaded {} service(s)", registry.len());
    report_secrets(&settings);

    let mut signals = ShutdownSignals::install()?;
    let listener = server::bind(settings.http_addr).await?;
    let bound = listener.local_addr().unwrap_or(settings.http_addr);
    info!("health endpoint listening on http://{bound}/health");

    let orchestrator = Arc::new(Orchestrator::new(registry, settings));
    tokio::spawn(server::serve(listener, orchestrator.clone()));

    let mut startup = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.start_all().await }
    });
    let outcome = tokio::select! {
        joined = &mut startup => Startup::Finished(joined),
        signal = signals.recv() => Startup::Interrupted(signal),
    };

    let signal = match outcome {
        Startup::Interrupted(signal) => signal,
        Startup::Finished(Ok(Ok(summary))) => {
            if !summary.failed.is_empty() {
                warn!(
                    "running without {} service(s): {}",
                    summary.failed.len(),
                    summary
                        .failed
                        .iter()
                        .map(|(name, _)| name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            orchestrator.log_status_report();
            orchestrator.spawn_monitor();
            signals.recv().await
        }
        Startup::Finished(Ok(Err(e))) => {
            let what = match &e {
                LifecycleError::CriticalServiceFailed { .. } => "critical service failure",
                _ => "startup failure",
            };
            error!("{what}: {e}");
            if let Some(source) = std::error::Error::source(&e) {
                error!("caused by: {source}");
            }
            orchestrator.shutdown(ShutdownSignal::Terminate).await;
            return Ok(ExitCode::FAILURE);
        }
        Startup::Finished(Err(join_error)) => {
            return Err(anyhow!(join_error).context("startup task failed"));
        }
    };

    orchestrator.shutdown(signal).await;
    info!("wojat-procmgrd stopped");
    Ok(ExitCode::SUCCESS)
}

/// Load and validate everything `run` would use, without spawning.
fn check(settings: &Settings) -> Result<ExitCode> {
    let registry = ServiceRegistry::load(settings).context("loading service registry")?;
    info!(
        "{} service(s) from {}",
        registry.len(),
        settings
            .config_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "the built-in table".to_string())
    );
    for d in registry.all_services() {
        info!(
            service = d.name.as_str(), color = d.color.as_str();
            "priority {}{}: {} (in {})",
            d.priority,
            if d.critical { ", critical" } else { "" },
            d.command_line(),
            d.working_dir.display()
        );
    }

    let secrets_ok = report_secrets(settings);
    let problems = registry.problems();
    for problem in &problems {
        error!("{problem}");
    }
    if problems.is_empty() && secrets_ok {
        info!(success = true; "configuration is valid");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            "configuration has {} problem(s){}",
            problems.len(),
            if secrets_ok { "" } else { " and missing secrets" }
        );
        Ok(ExitCode::FAILURE)
    }
}
