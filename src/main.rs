use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use catalog_bulk_ops::application::{BulkOrchestrator, RunOutcome, RunReport, StartOutcome};
use catalog_bulk_ops::domain::{
    RunConfiguration, RunLogRepository, RunLogSink, RunMode, RunPhase, Target,
};
use catalog_bulk_ops::infrastructure::config::defaults;
use catalog_bulk_ops::infrastructure::{
    init_logging_with_config, log_system_info, AppConfig, ConfigManager, DatabaseConnection,
    HttpCleaningClient, RunLogBackend, SqliteRunLogRepository,
};

mod cli;

use cli::{Cli, Commands, RunArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).await?;
    init_logging_with_config(config.logging.clone())?;
    log_system_info(&config.logging);

    match cli.command {
        Commands::Run(args) => run(&config, args).await,
        Commands::History { id, limit, json } => history(&config, id, limit, json).await,
    }
}

async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let path = path
                .to_str()
                .ok_or_else(|| anyhow!("Config path is not valid UTF-8: {:?}", path))?;
            Ok(AppConfig::from_file(path)?)
        }
        None => ConfigManager::new()?.load_config().await,
    }
}

async fn open_timeline(config: &AppConfig) -> Result<Arc<SqliteRunLogRepository>> {
    let db = DatabaseConnection::from_config(&config.database).await?;
    db.migrate().await?;
    let repository = Arc::new(SqliteRunLogRepository::new(db.pool().clone()));

    if config.database.retention_days > 0 {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(config.database.retention_days));
        let removed = repository.delete_older_than(cutoff).await?;
        if removed > 0 {
            info!("🧹 Pruned {} run logs older than {} days", removed, config.database.retention_days);
        }
    }
    Ok(repository)
}

async fn run(config: &AppConfig, args: RunArgs) -> Result<()> {
    let mode = RunMode::from(args.mode);
    let universe = load_targets(&args.targets).await?;
    info!("Loaded {} targets from {:?}", universe.len(), args.targets);

    let client = Arc::new(HttpCleaningClient::new(&config.endpoint)?);
    let sink: Arc<dyn RunLogSink> = match config.database.run_log_backend {
        RunLogBackend::Sqlite => {
            let timeline: Arc<dyn RunLogSink> = open_timeline(config).await?;
            timeline
        }
        RunLogBackend::Http => {
            let remote: Arc<dyn RunLogSink> = client.clone();
            remote
        }
    };
    let orchestrator =
        BulkOrchestrator::new(client.clone(), client, sink, config.orchestrator.clone());

    let run_config = build_run_configuration(&orchestrator, mode, &args, &universe)?;

    spawn_cancel_on_ctrl_c(orchestrator.clone());
    spawn_progress_printer(&orchestrator);

    let outcome = match orchestrator.start(run_config, &universe).await? {
        StartOutcome::NothingToProcess => {
            println!("Nothing to process.");
            return Ok(());
        }
        StartOutcome::AwaitingConfirmation { target_count } => {
            if args.yes || confirm_on_stdin(target_count, mode).await? {
                orchestrator.confirm().await?
            } else {
                orchestrator.decline().await?;
                println!("Run declined.");
                return Ok(());
            }
        }
        StartOutcome::Finished(outcome) => outcome,
    };

    let Some(report) = print_outcome(&outcome) else {
        return Ok(());
    };

    if args.retry_failed && report.has_failures() {
        let count = report.failed_items.len();
        println!("Retrying {} failed {}...", count, mode.noun_for(count));
        let retried = orchestrator.retry().await?;
        print_outcome(&retried);
    }

    Ok(())
}

async fn load_targets(path: &Path) -> Result<Vec<Target>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read targets file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid targets file {:?}", path))
}

fn build_run_configuration(
    orchestrator: &BulkOrchestrator,
    mode: RunMode,
    args: &RunArgs,
    universe: &[Target],
) -> Result<RunConfiguration> {
    if args.all {
        let mut config = RunConfiguration::all(mode);
        if !args.stores.is_empty() {
            config = config.with_store_filter(args.stores.iter().cloned())?;
        }
        if let Some(limit) = args.per_store_limit {
            config = config.with_per_group_limit(limit)?;
        }
        return Ok(config);
    }

    let by_id: HashMap<&str, &Target> = universe
        .iter()
        .filter(|t| t.kind == mode.target_kind())
        .map(|t| (t.id.as_str(), t))
        .collect();

    let mut selection = orchestrator.new_selection(mode);
    for id in &args.select {
        let target = by_id
            .get(id.as_str())
            .ok_or_else(|| anyhow!("Unknown {} id '{}'", mode.target_kind(), id))?;
        if !selection.insert((*target).clone())? {
            warn!("'{}' selected more than once", id);
        }
    }
    Ok(RunConfiguration::selected(mode, selection)?)
}

async fn confirm_on_stdin(target_count: usize, mode: RunMode) -> Result<bool> {
    println!(
        "About to clean {} {}. Continue? [y/N]",
        target_count,
        mode.noun_for(target_count)
    );
    let interrupted = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    read_confirmation(&mut BufReader::new(tokio::io::stdin()), interrupted).await
}

/// `true` only for an explicit yes; an interrupt while waiting declines
async fn read_confirmation<R>(reader: &mut R, interrupted: impl Future<Output = ()>) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    tokio::select! {
        biased;
        () = interrupted => {
            println!();
            return Ok(false);
        }
        read = reader.read_line(&mut line) => {
            read.context("Failed to read confirmation")?;
        }
    }
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// The confirmation prompt handles its own Ctrl-C
    LeaveToPrompt,
    CancelRun,
    Quit,
}

fn interrupt_for(phase: RunPhase) -> Interrupt {
    match phase {
        RunPhase::Confirm => Interrupt::LeaveToPrompt,
        RunPhase::Running => Interrupt::CancelRun,
        RunPhase::Configure | RunPhase::Complete => Interrupt::Quit,
    }
}

fn spawn_cancel_on_ctrl_c(orchestrator: BulkOrchestrator) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Failed to listen for Ctrl-C; cancellation by signal disabled");
                return;
            }
            match interrupt_for(orchestrator.phase().await) {
                Interrupt::LeaveToPrompt => {}
                Interrupt::CancelRun => {
                    info!("Received Ctrl-C, cancelling the active run");
                    // Already cancelling; a second Ctrl-C quits
                    if !orchestrator.cancel().await {
                        std::process::exit(130);
                    }
                }
                Interrupt::Quit => std::process::exit(130),
            }
        }
    });
}

fn spawn_progress_printer(orchestrator: &BulkOrchestrator) {
    let mut progress = orchestrator.subscribe_progress();
    tokio::spawn(async move {
        let mut last_done = None;
        while let Some(snapshot) = progress.next().await {
            let p = snapshot.progress;
            if p.total == 0 || last_done == Some(p.done) {
                continue;
            }
            last_done = Some(p.done);
            let eta = snapshot
                .eta_ms
                .map(|ms| format!(", ~{}s left", ms.div_ceil(1000)))
                .unwrap_or_default();
            println!(
                "[{:>3}%] {}/{} done, {} updated, {} errors{}",
                snapshot.percent, p.done, p.total, p.updated, p.errors, eta
            );
        }
    });
}

fn print_outcome(outcome: &RunOutcome) -> Option<&RunReport> {
    match outcome {
        RunOutcome::Cancelled { processed } => {
            println!("Run cancelled after {} items. Nothing was logged.", processed);
            None
        }
        RunOutcome::Completed(report) => {
            let message = report
                .entry()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            println!("{} in {:.1}s", message, report.elapsed.as_secs_f64());
            for failed in &report.failed_items {
                println!("  ✗ {} ({}): {}", failed.label, failed.id, failed.error);
            }
            if let Some(err) = &report.persistence_error {
                println!("Warning: {}", err);
            }
            Some(report)
        }
    }
}

async fn history(config: &AppConfig, id: Option<String>, limit: Option<u32>, json: bool) -> Result<()> {
    let repository = open_timeline(config).await?;

    let entries = match id {
        Some(id) => match repository.get_entry(&id).await? {
            Some(entry) => vec![entry],
            None => bail!("No run log with id '{}'", id),
        },
        None => {
            repository
                .recent_entries(limit.unwrap_or(defaults::RECENT_RUN_LOGS_LIMIT))
                .await?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  {:<15} {:<40} ({} ms)  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.scope,
            entry.message,
            entry.elapsed_ms,
            entry.id
        );
    }
    Ok(())
}
