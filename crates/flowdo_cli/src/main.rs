//! FlowDo command-line entry point.
//!
//! # Responsibility
//! - Act as the flow-up trigger: on-demand (`flow-up`) and daily (`daemon`).
//! - Expose minimal do CRUD commands over the same database.
//! - Build the process config once and pass it down explicitly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use flowdo_core::config::ENV_DB_PATH;
use flowdo_core::db::open_db;
use flowdo_core::{
    authorize_on_demand, init_logging_from_config, next_run_after, run_flow_up, DoPatch,
    DoService, DoType, FlowDoConfig, SqliteDoRepository, TimeUnit, TriggerSource,
};
use log::{error, info};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flowdo")]
#[command(about = "Time-bucketed todo backend with daily flow-up")]
#[command(version)]
struct Cli {
    /// SQLite database path (overrides FLOWDO_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Absolute log directory (overrides FLOWDO_LOG_DIR)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error (overrides FLOWDO_LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run flow-up once, authorized by the shared cron secret
    FlowUp {
        /// Value of the cron secret
        #[arg(long, env = "FLOWDO_CRON_SECRET_HEADER")]
        secret: Option<String>,
        /// Evaluate as of this RFC 3339 instant instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Run flow-up every day at FLOWDO_SCHEDULE_UTC
    Daemon,
    /// Create a do
    Add {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "today")]
        unit: TimeUnit,
        #[arg(long, default_value = "normal")]
        kind: DoType,
    },
    /// List a user's dos as JSON
    List {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        unit: Option<TimeUnit>,
    },
    /// Record a completion of a do
    Complete {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        id: Uuid,
    },
    /// Reopen a completed do
    Reopen {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        id: Uuid,
    },
    /// Delete a do
    Delete {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        id: Uuid,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging_from_config(&config)
        .map_err(anyhow::Error::msg)
        .context("failed to initialize logging")?;

    let conn = open_db(config.db_path())
        .with_context(|| format!("failed to open {}", config.db_path().display()))?;
    let repo = SqliteDoRepository::new(&conn);

    match cli.command {
        Command::FlowUp { secret, now } => {
            authorize_on_demand(&config, secret.as_deref())?;
            let now = now.unwrap_or_else(Utc::now);
            info!(
                "event=flow_up_trigger module=cli status=start source={}",
                TriggerSource::OnDemand.as_str()
            );
            let summary = run_flow_up(&repo, now)?;
            println!(
                "{}",
                serde_json::json!({ "ok": true, "moved": summary })
            );
        }
        Command::Daemon => run_daemon(&config, &repo),
        Command::Add {
            user,
            title,
            unit,
            kind,
        } => {
            let item = DoService::new(repo).create_do(user, title, unit, kind)?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::List { user, unit } => {
            let items = DoService::new(repo).list_dos(user, unit)?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        Command::Complete { user, id } => {
            let item = DoService::new(repo).record_completion(user, id, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Reopen { user, id } => {
            let patch = DoPatch {
                completed: Some(false),
                ..DoPatch::default()
            };
            let item = DoService::new(repo).update_do(user, id, &patch)?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Delete { user, id } => {
            DoService::new(repo).delete_do(user, id)?;
            println!("{}", serde_json::json!({ "ok": true }));
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<FlowDoConfig> {
    let db_override = cli.db.as_ref().map(|path| path.display().to_string());
    let mut config = FlowDoConfig::from_lookup(|key| match (key, &db_override) {
        (ENV_DB_PATH, Some(path)) => Some(path.clone()),
        _ => std::env::var(key).ok(),
    })?;

    if let Some(dir) = &cli.log_dir {
        config.log_dir = Some(dir.clone());
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

fn run_daemon(config: &FlowDoConfig, repo: &SqliteDoRepository<'_>) -> ! {
    info!(
        "event=daemon_start module=cli status=ok schedule_utc={}",
        config.schedule_utc
    );
    let mut previous = None;
    loop {
        let next = next_run_after(previous, Utc::now(), config.schedule_utc);
        info!(
            "event=daemon_sleep module=cli status=ok next_run={}",
            next.to_rfc3339()
        );
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        std::thread::sleep(wait);
        previous = Some(next);

        info!(
            "event=flow_up_trigger module=cli status=start source={}",
            TriggerSource::Scheduled.as_str()
        );
        // Evaluated as of the scheduled day even if the clock moved back
        // while sleeping. A failed day is retried by the next run, not here.
        if let Err(err) = run_flow_up(repo, next.max(Utc::now())) {
            error!(
                "event=flow_up_trigger module=cli status=error source={} error={}",
                TriggerSource::Scheduled.as_str(),
                err
            );
            eprintln!("flow-up failed: {err}");
        }
    }
}
