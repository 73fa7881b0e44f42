//! `reportflow` command-line entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

use reportflow::prelude::*;

mod exit_codes;
mod logging;

use logging::ConsoleFormat;

/// Scheduled Redash, Power BI and webhook reporting
#[derive(Debug, Parser)]
#[command(name = "reportflow", version, about = "Redash to Power BI reporting pipeline")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to the console as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daily schedule until interrupted
    Schedule,

    /// Run every stage once
    Once {
        /// Tasks to run (defaults to the catalog's once tasks)
        #[arg(short, long = "task")]
        tasks: Vec<String>,
    },

    /// Refresh, export and notify without extracting
    Quick {
        /// Tasks to run (defaults to the catalog's quick tasks)
        #[arg(short, long = "task")]
        tasks: Vec<String>,
    },

    /// Check configuration and catalog, then print the schedule
    Validate,
}

fn main() {
    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {e}");
            std::process::exit(exit_codes::RUNTIME_ERROR);
        }
    };

    let exit_code = rt.block_on(run_command(cli));
    std::process::exit(exit_code);
}

async fn run_command(cli: Cli) -> i32 {
    let format = if cli.json { ConsoleFormat::Json } else { ConsoleFormat::Plain };

    let (config, catalog) = match load() {
        Ok(loaded) => loaded,
        Err(e) => {
            let _ = logging::init(cli.verbose, format, None);
            error!(error = %format!("{e:#}"), "Configuration rejected");
            eprintln!("error: {e:#}");
            return exit_codes::CONFIG_ERROR;
        }
    };

    let log_dir = match cli.command {
        Command::Validate => None,
        _ => Some(config.paths.log_dir.as_path()),
    };
    match logging::init(cli.verbose, format, log_dir) {
        Ok(Some(path)) => info!(path = %path.display(), "Logging to file"),
        Ok(None) => {}
        Err(e) => {
            eprintln!("error: {e:#}");
            return exit_codes::RUNTIME_ERROR;
        }
    }

    let result = match cli.command {
        Command::Validate => validate(&config, &catalog),
        Command::Schedule => schedule(config, catalog).await,
        Command::Once { tasks } => {
            let tasks = or_default(tasks, catalog.once_tasks());
            run_manual(config, catalog, RunRequest::full(tasks)).await
        }
        Command::Quick { tasks } => {
            let tasks = or_default(tasks, catalog.quick_tasks());
            run_manual(config, catalog, RunRequest::quick(tasks)).await
        }
    };

    result.unwrap_or_else(|e| {
        error!(error = %format!("{e:#}"), "Command failed");
        eprintln!("error: {e:#}");
        match e.downcast_ref::<ReportflowError>() {
            Some(ReportflowError::Config(_)) => exit_codes::CONFIG_ERROR,
            _ => exit_codes::RUNTIME_ERROR,
        }
    })
}

fn load() -> Result<(Arc<Config>, TaskCatalog)> {
    let config = Config::load().context("invalid configuration")?;
    let catalog = TaskCatalog::load(&config.paths.catalog).context("invalid task catalog")?;
    Ok((Arc::new(config), catalog))
}

fn or_default(tasks: Vec<String>, fallback: Vec<String>) -> Vec<String> {
    if tasks.is_empty() {
        fallback
    } else {
        tasks
    }
}

fn orchestrator(config: Arc<Config>, catalog: TaskCatalog) -> Result<Orchestrator> {
    let collaborators = http_collaborators(&config)?;
    Ok(Orchestrator::new(config, catalog, collaborators))
}

fn validate(config: &Config, catalog: &TaskCatalog) -> Result<i32> {
    let spec = catalog.schedule_spec();
    println!("configuration ok: report '{}'", config.powerbi.report_title);
    println!(
        "catalog: {} queries, {} exports",
        catalog.queries.len(),
        catalog.exports.len()
    );
    if config.powerbi.api.is_none() {
        println!("warning: Power BI workspace not configured; runs will fail to start");
    }
    for entry in spec.entries() {
        println!("  {}: {} ({})", entry.recurrence, entry.tasks.join(", "), entry.mode);
    }
    println!("once: {}", catalog.once_tasks().join(", "));
    println!("quick: {}", catalog.quick_tasks().join(", "));
    Ok(exit_codes::SUCCESS)
}

async fn schedule(config: Arc<Config>, catalog: TaskCatalog) -> Result<i32> {
    let spec = catalog.schedule_spec();
    let trigger: Arc<dyn RunTrigger> = Arc::new(orchestrator(config, catalog)?);

    let scheduler = Scheduler::new();
    let handle = scheduler.start(spec, trigger);
    info!("Scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl-C")?;
    info!("Interrupt received, waiting for in-flight runs");
    handle.stop().await;

    let history = scheduler.history();
    info!(
        fired = history.len(),
        skipped = history.iter().filter(|r| r.is_skipped()).count(),
        "Scheduler stopped"
    );
    Ok(exit_codes::SUCCESS)
}

async fn run_manual(config: Arc<Config>, catalog: TaskCatalog, request: RunRequest) -> Result<i32> {
    if request.tasks.is_empty() {
        info!(mode = %request.mode, "No tasks selected in the catalog, nothing to run");
        return Ok(exit_codes::SUCCESS);
    }
    let orchestrator = orchestrator(config, catalog)?;
    let report = Scheduler::new()
        .run_manual_once(&orchestrator, request)
        .await?;

    println!("{}", reportflow::stages::summary_text(&report));
    Ok(match report.overall {
        RunStatus::Succeeded => exit_codes::SUCCESS,
        RunStatus::Partial => exit_codes::RUN_PARTIAL,
        RunStatus::Failed => exit_codes::RUN_FAILED,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportflow::testing::test_config;

    #[tokio::test]
    async fn test_empty_selection_exits_cleanly() {
        for request in [RunRequest::full(Vec::new()), RunRequest::quick(Vec::new())] {
            let code = run_manual(Arc::new(test_config()), TaskCatalog::default(), request)
                .await
                .unwrap();
            assert_eq!(code, exit_codes::SUCCESS);
        }
    }

    #[test]
    fn test_explicit_tasks_override_catalog_defaults() {
        assert_eq!(or_default(vec!["weekly".into()], vec!["daily".into()]), vec!["weekly"]);
        assert_eq!(or_default(Vec::new(), vec!["daily".into()]), vec!["daily"]);
    }
}
