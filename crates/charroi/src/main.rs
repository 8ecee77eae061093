//! `charroi-sync` - CLI for the charroi offline validation queue
//!
//! This binary queues validations, syncs them with the server and watches
//! connectivity to sync automatically on reconnect.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::Read;
use std::path::Path;

use clap::Parser;
use tokio::sync::mpsc;

use charroi::cli::{Cli, Command, ConfigCommand, EnqueueCommand, ListCommand};
use charroi::{
    init_logging, is_online, sync_on_reconnect, Config, ConnectivityMonitor, Error, HttpProbe,
    OfflineQueue, PendingValidation,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    // `config validate` reports problems itself instead of failing to start
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        let path = file
            .clone()
            .or_else(|| cli.config.clone())
            .unwrap_or_else(Config::default_config_path);
        handle_config_validate(&path);
        return Ok(());
    }

    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Enqueue(cmd) => handle_enqueue(&config, cmd).await,
        Command::Sync(cmd) => handle_sync(&config, cmd.json).await,
        Command::List(cmd) => handle_list(&config, &cmd).await,
        Command::Status(cmd) => handle_status(&config, cmd.json).await,
        Command::Watch => handle_watch(&config).await,
        Command::Drop { id } => {
            let queue = OfflineQueue::from_config(&config)?;
            if !queue.remove(id).await? {
                return Err(Error::EntryNotFound { id }.into());
            }
            println!("Dropped entry {id}.");
            Ok(())
        }
        Command::Requeue { id } => {
            let queue = OfflineQueue::from_config(&config)?;
            queue.requeue(id).await?;
            println!("Entry {id} is pending again.");
            Ok(())
        }
        Command::Clear(cmd) => {
            if !cmd.yes {
                println!("This will drop every queued validation without submitting it.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            let queue = OfflineQueue::from_config(&config)?;
            let removed = queue.clear().await?;
            println!("Dropped {removed} entries.");
            Ok(())
        }
        Command::Import(cmd) => {
            let text = std::fs::read_to_string(&cmd.file)?;
            let queue = OfflineQueue::from_config(&config)?;
            let imported = queue.import_legacy_blob(&text).await?;
            println!("Imported {imported} validations from {}.", cmd.file.display());
            Ok(())
        }
        Command::Config(config_cmd) => handle_config(&config, &config_cmd),
    }
}

async fn handle_enqueue(config: &Config, cmd: EnqueueCommand) -> CliResult {
    let text = match (cmd.payload, cmd.file) {
        (Some(payload), _) => payload,
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let payload: serde_json::Value = serde_json::from_str(&text)?;

    let queue = OfflineQueue::from_config(config)?;
    let id = queue.store(payload).await?;
    println!("Queued validation as entry {id}.");
    Ok(())
}

async fn handle_sync(config: &Config, json: bool) -> CliResult {
    let queue = OfflineQueue::from_config(config)?;
    let report = match queue.sync().await {
        Ok(report) => report,
        Err(e) => {
            if let Error::SyncHalted { entry_id, .. } = &e {
                eprintln!("Entry {entry_id} and those after it stay queued for the next sync.");
            }
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Submitted:      {}", report.submitted);
        if report.dead_lettered > 0 {
            println!("Dead-lettered:  {}", report.dead_lettered);
        }
        println!("Still pending:  {}", report.remaining);
    }
    Ok(())
}

async fn handle_list(config: &Config, cmd: &ListCommand) -> CliResult {
    let queue = OfflineQueue::from_config(config)?;
    let entries = if cmd.dead {
        queue.dead_letters().await?
    } else {
        queue.pending().await?
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No {} validations.", if cmd.dead { "dead-lettered" } else { "pending" });
        return Ok(());
    }

    println!(
        "{:>6}  {:<20}  {:>8}  {:>10}  {:<12}  LAST ERROR",
        "ID", "QUEUED", "ATTEMPTS", "VOUCHER", "FINGERPRINT"
    );
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn print_entry(entry: &PendingValidation) {
    let voucher = entry
        .voucher_id()
        .map_or_else(|| "-".to_string(), |v| v.to_string());
    println!(
        "{:>6}  {:<20}  {:>8}  {:>10}  {:<12}  {}",
        entry.id.unwrap_or_default(),
        entry.queued_at.format("%Y-%m-%d %H:%M:%S"),
        entry.attempts,
        voucher,
        entry.short_fingerprint(),
        entry.last_error.as_deref().unwrap_or("")
    );
}

async fn handle_status(config: &Config, json: bool) -> CliResult {
    let queue = OfflineQueue::from_config(config)?;
    let stats = queue.stats().await?;
    let probe = HttpProbe::from_config(config)?;
    let online = is_online(&probe).await;

    if json {
        let status = serde_json::json!({
            "online": online,
            "endpoint": config.validation_url(),
            "database_path": config.database_path(),
            "ack_mode": queue.options().ack_mode,
            "max_attempts": queue.options().max_attempts,
            "queue": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("charroi-sync status");
        println!("-------------------");
        println!("Server:        {}", if online { "reachable" } else { "unreachable" });
        println!("Endpoint:      {}", config.validation_url());
        println!("Database:      {}", config.database_path().display());
        println!("Ack mode:      {}", queue.options().ack_mode);
        println!();
        println!("Pending:       {}", stats.pending);
        println!("Dead-lettered: {}", stats.dead);
        println!("Duplicates:    {}", stats.duplicate_entries);
        if let Some(oldest) = stats.oldest_pending {
            println!("Oldest:        {}", oldest.format("%Y-%m-%d %H:%M:%S"));
        }
        if let Some(newest) = stats.newest_pending {
            println!("Newest:        {}", newest.format("%Y-%m-%d %H:%M:%S"));
        }
        println!("Database size: {} bytes", stats.db_size_bytes);
    }
    Ok(())
}

async fn handle_watch(config: &Config) -> CliResult {
    let queue = OfflineQueue::from_config(config)?;
    let mut monitor = ConnectivityMonitor::from_config(config)?;
    let handle = monitor.stop_handle();
    let (tx, rx) = mpsc::channel(8);

    println!(
        "Watching {} every {} ms. Press Ctrl-C to stop.",
        config.probe_url(),
        config.connectivity.poll_interval_ms
    );

    let monitor_task = tokio::spawn(async move { monitor.start(tx).await });
    let trigger_task = tokio::spawn(sync_on_reconnect(queue, rx));

    tokio::signal::ctrl_c().await?;
    handle.stop();

    monitor_task.await?;
    let summary = trigger_task.await?;
    println!(
        "Stopped after {} sync runs: {} submitted, {} failed runs.",
        summary.runs, summary.submitted, summary.failures
    );
    Ok(())
}

fn handle_config(config: &Config, cmd: &ConfigCommand) -> CliResult {
    match cmd {
        ConfigCommand::Show { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Server]");
                println!("  Validation URL:     {}", config.validation_url());
                println!("  Request timeout:    {}s", config.server.request_timeout_secs);
                println!(
                    "  Auth token:         {}",
                    if config.server.auth_token.is_some() { "set" } else { "not set" }
                );
                println!();
                println!("[Sync]");
                println!("  Ack mode:           {}", config.sync.ack_mode);
                println!("  Max attempts:       {}", config.sync.max_attempts);
                println!("  Lease TTL:          {}s", config.sync.lease_ttl_secs);
                println!();
                println!("[Connectivity]");
                println!("  Probe URL:          {}", config.probe_url());
                println!("  Poll interval:      {}ms", config.connectivity.poll_interval_ms);
                println!("  Probe timeout:      {}ms", config.connectivity.probe_timeout_ms);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { .. } => {}
    }
    Ok(())
}

fn handle_config_validate(path: &Path) {
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path.to_path_buf())) {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => println!("Configuration error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_halted_sync_returns_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.database_path = Some(dir.path().join("pending.db"));
        config.server.url = "http://127.0.0.1:9".to_string();
        config.server.request_timeout_secs = 2;

        let queue = OfflineQueue::from_config(&config).unwrap();
        queue.store(serde_json::json!({"id_bande_sortie": 1})).await.unwrap();
        drop(queue);

        let err = handle_sync(&config, false).await.unwrap_err();
        assert!(err.to_string().contains("sync halted at entry"));

        let queue = OfflineQueue::from_config(&config).unwrap();
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }
}
