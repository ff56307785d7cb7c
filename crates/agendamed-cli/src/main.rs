//! agendamed - diagnostic command line for the local scheduling data layer.
//!
//! Reads and writes the same JSON documents the client keeps on the device,
//! which makes it handy for inspecting statistics and moving backups around.

use std::io;
use std::path::{Path, PathBuf};

use agendamed_core::{Config, DataLayer};
use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: agendamed <command> [args]

Commands:
  stats [--doctor ID | --patient ID]   Appointment statistics as JSON
  backup [PATH]                        Write a backup file (default: backup dir)
  restore PATH                         Restore collections from a backup file
  auto-backup                          Run the auto-backup policy once
  notifications USER_ID                List a user's notifications
  info                                 Storage and cache introspection
";

/// Log file name prefix inside the log directory
const LOG_FILE_PREFIX: &str = "agendamed.log";

/// Initialize the tracing subscriber: stderr plus a daily rolling file.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(log_dir: &Path) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("Warning: file logging disabled ({}): {}", log_dir.display(), e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load().context("loading configuration")?;
    let _guard = init_tracing(&config.log_dir()?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprint!("{}", USAGE);
        return Ok(());
    };

    let data = DataLayer::open(&config)?;
    info!(command = %command, "agendamed starting");

    match command.as_str() {
        "stats" => stats(&data, &args[1..]).await,
        "backup" => {
            let path = match args.get(1) {
                Some(path) => write_backup_file(&data, Path::new(path)).await?,
                None => data.backup.write_to_dir(&config.backup_dir()?).await?,
            };
            println!("{}", path.display());
            Ok(())
        }
        "restore" => {
            let path = args.get(1).context("restore needs a backup file path")?;
            let report = data.backup.restore_from_file(Path::new(path)).await?;
            print_json(&report)
        }
        "auto-backup" => {
            match data
                .backup
                .auto_backup(&config.backup_dir()?, config.backup_retention)
                .await?
            {
                Some(path) => println!("{}", path.display()),
                None => eprintln!("Auto-backup is disabled in settings"),
            }
            Ok(())
        }
        "notifications" => {
            let user_id = args.get(1).context("notifications needs a user id")?;
            print_json(&data.notifications.list(user_id).await)
        }
        "info" => info_report(&data).await,
        "-h" | "--help" | "help" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => bail!("unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn stats(data: &DataLayer, args: &[String]) -> Result<()> {
    let stats = match args {
        [] => data.statistics.compute_general().await,
        [flag, id] if flag == "--doctor" => data.statistics.compute_for_doctor(id).await,
        [flag, id] if flag == "--patient" => data.statistics.compute_for_patient(id).await,
        _ => bail!("usage: agendamed stats [--doctor ID | --patient ID]"),
    };
    print_json(&stats)
}

/// Write a backup to an explicit file path instead of the backup directory.
async fn write_backup_file(data: &DataLayer, path: &Path) -> Result<PathBuf> {
    let json = data.backup.create_backup().await?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path.to_path_buf())
}

async fn info_report(data: &DataLayer) -> Result<()> {
    let store = &data.store;
    let mut last_access: Vec<_> = store
        .last_access_by_key()
        .into_iter()
        .map(|(key, at)| (key, at.to_rfc3339()))
        .collect();
    last_access.sort();

    print_json(&json!({
        "cacheSize": store.cache_size(),
        "keyCount": store.key_count().await,
        "keys": store.keys().await,
        "lastAccessByKey": last_access,
        "authenticated": data.session.is_authenticated().await,
        "settings": data.settings.get().await,
    }))
}
