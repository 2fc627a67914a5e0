//! Top-level CLI definition and dispatch.

#![allow(missing_docs)]

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use chrono::{Duration as ChronoDuration, Utc};
use clap::{Args, Parser, Subcommand};
use colored::control;
use thiserror::Error;

use deletion_queue_helper::cli::{format_deadline, format_size, render_queue_table};
use deletion_queue_helper::core::config::Config;
use deletion_queue_helper::core::errors::DqhError;
use deletion_queue_helper::daemon::loop_main::{DaemonArgs as DaemonRunArgs, QueueDaemon};
use deletion_queue_helper::daemon::signals::SignalHandler;
use deletion_queue_helper::store::entity::{
    EntityId, EntityPatch, EntityStatus, QueueEntity, WhitelistAction, WhitelistMatch,
    WhitelistRule,
};
use deletion_queue_helper::store::{EntityStore, sqlite::SqliteStore};

/// Deletion Queue Helper — watched-directory deletion queue with deadlines.
#[derive(Debug, Parser)]
#[command(
    name = "dqh",
    author,
    version,
    about = "Deletion Queue Helper - deadline-driven cleanup for a watched directory",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the watcher daemon.
    Daemon(DaemonArgs),
    /// Inspect and edit the deletion queue.
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Manage whitelist rules in the config file.
    #[command(subcommand)]
    Rules(RulesCommand),
    /// View configuration state.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Clone, Args, Default)]
struct DaemonArgs {
    /// Optional pidfile path for non-service usage.
    #[arg(long, value_name = "PATH")]
    pidfile: Option<PathBuf>,
    /// Systemd watchdog timeout in seconds (0 disables).
    #[arg(long, default_value_t = 0, value_name = "SECONDS")]
    watchdog_sec: u64,
}

#[derive(Debug, Clone, Subcommand)]
enum QueueCommand {
    /// List queue entries, newest first.
    List(ListArgs),
    /// Show one entry in full detail.
    Show { id: EntityId },
    /// Cancel a pending deletion; the entry stays tracked without a deadline.
    Cancel { id: EntityId },
    /// Push an entry's deadline out by the configured snooze interval.
    Snooze { id: EntityId },
    /// Set or clear an entry's deadline.
    SetDeadline(SetDeadlineArgs),
    /// Drop an entry from the queue entirely (the file is untouched).
    Rm { id: EntityId },
}

#[derive(Debug, Clone, Args, Default)]
struct ListArgs {
    /// Include deleted, failed, and whitelisted entries.
    #[arg(long)]
    all: bool,
}

#[derive(Debug, Clone, Args)]
struct SetDeadlineArgs {
    id: EntityId,
    /// Relative deadline, e.g. `30m`, `2h`, `1d`.
    #[arg(long, value_name = "DURATION", conflicts_with = "clear")]
    r#in: Option<String>,
    /// Remove the deadline, parking the entry as pending.
    #[arg(long)]
    clear: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum RulesCommand {
    /// List whitelist rules in evaluation order.
    List,
    /// Append a rule to the config file.
    Add(AddRuleArgs),
    /// Remove a rule by its list position (1-based).
    Rm { position: usize },
}

#[derive(Debug, Clone, Args)]
struct AddRuleArgs {
    /// What to match on.
    #[arg(long, value_parser = ["extension", "filename"])]
    r#match: String,
    /// The extension or file name to match.
    #[arg(long)]
    value: String,
    /// What a match does.
    #[arg(long, value_parser = ["never-delete", "auto-delete-after"])]
    action: String,
    /// Minutes until auto-deletion (auto-delete-after only).
    #[arg(long, default_value_t = 0)]
    minutes: u64,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the config file path.
    Path,
    /// Write a default config file if none exists.
    Init,
}

// ──────────────────── errors ────────────────────

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Dqh(#[from] DqhError),
    #[error("entry {0} not found")]
    NotFound(EntityId),
    #[error("{0}")]
    Usage(String),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Dqh(_) | Self::Io(_) => 1,
            Self::NotFound(_) => 3,
            Self::Usage(_) => 2,
        }
    }
}

// ──────────────────── dispatch ────────────────────

pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color || !io::stdout().is_terminal() {
        control::set_override(false);
    }

    let config = Config::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, &config, args),
        Command::Queue(command) => run_queue(cli, &config, command),
        Command::Rules(command) => run_rules(cli, &config, command),
        Command::Config(command) => run_config(cli, &config, command),
    }
}

fn run_daemon(cli: &Cli, config: &Config, args: &DaemonArgs) -> Result<(), CliError> {
    let signals = SignalHandler::new();
    let mut daemon = QueueDaemon::init(config.clone(), cli.config.clone(), signals)?;
    daemon.run(&DaemonRunArgs {
        foreground: true,
        pidfile: args.pidfile.clone(),
        watchdog_sec: args.watchdog_sec,
    })?;
    Ok(())
}

// ──────────────────── queue commands ────────────────────

fn open_store(config: &Config) -> Result<SqliteStore, CliError> {
    Ok(SqliteStore::open(&config.paths.sqlite_db)?)
}

fn require_entity(store: &SqliteStore, id: EntityId) -> Result<QueueEntity, CliError> {
    store.get(id)?.ok_or(CliError::NotFound(id))
}

fn run_queue(cli: &Cli, config: &Config, command: &QueueCommand) -> Result<(), CliError> {
    let store = open_store(config)?;
    match command {
        QueueCommand::List(args) => {
            let mut entities = store.all()?;
            if !args.all {
                entities.retain(|e| !e.status.is_terminal());
            }
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entities).map_err(DqhError::from)?);
            } else {
                print!("{}", render_queue_table(&entities, Utc::now()));
            }
        }
        QueueCommand::Show { id } => {
            let entity = require_entity(&store, *id)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entity).map_err(DqhError::from)?);
            } else {
                print_entity(&entity);
            }
        }
        QueueCommand::Cancel { id } => {
            let entity = require_entity(&store, *id)?;
            if entity.status.is_terminal() {
                return Err(CliError::Usage(format!(
                    "entry {id} is already {}",
                    entity.status
                )));
            }
            store.patch(
                *id,
                &EntityPatch::status(EntityStatus::Pending).with_deadline(None),
            )?;
            println!("entry {id} cancelled; no deadline");
        }
        QueueCommand::Snooze { id } => {
            let entity = require_entity(&store, *id)?;
            if entity.status.is_terminal() {
                return Err(CliError::Usage(format!(
                    "entry {id} is already {}",
                    entity.status
                )));
            }
            let now = Utc::now();
            let base = entity.deadline.map_or(now, |d| d.max(now));
            let deadline =
                base + ChronoDuration::minutes(config.deletion.snooze_minutes as i64);
            store.patch(
                *id,
                &EntityPatch::status(EntityStatus::Snoozed)
                    .with_deadline(Some(deadline))
                    .with_retry_count(entity.retry_count + 1),
            )?;
            println!(
                "entry {id} snoozed {}",
                format_deadline(Some(deadline), now)
            );
        }
        QueueCommand::SetDeadline(args) => {
            let entity = require_entity(&store, args.id)?;
            if entity.status.is_terminal() {
                return Err(CliError::Usage(format!(
                    "entry {} is already {}",
                    args.id, entity.status
                )));
            }
            if args.clear {
                store.patch(
                    args.id,
                    &EntityPatch::status(EntityStatus::Pending).with_deadline(None),
                )?;
                println!("entry {} deadline cleared", args.id);
            } else {
                let spec = args.r#in.as_deref().ok_or_else(|| {
                    CliError::Usage("either --in <duration> or --clear is required".to_string())
                })?;
                let deadline = Utc::now() + parse_duration(spec)?;
                store.patch(
                    args.id,
                    &EntityPatch::status(EntityStatus::Scheduled)
                        .with_deadline(Some(deadline))
                        .with_retry_count(0)
                        .with_error(None),
                )?;
                println!(
                    "entry {} scheduled {}",
                    args.id,
                    format_deadline(Some(deadline), Utc::now())
                );
            }
        }
        QueueCommand::Rm { id } => {
            if !store.remove(*id)? {
                return Err(CliError::NotFound(*id));
            }
            println!("entry {id} removed from the queue");
        }
    }
    Ok(())
}

fn print_entity(entity: &QueueEntity) {
    let now = Utc::now();
    println!("id:         {}", entity.id);
    println!("path:       {}", entity.path.display());
    println!("size:       {}", format_size(entity.size_bytes));
    println!("status:     {}", entity.status);
    println!("deadline:   {}", format_deadline(entity.deadline, now));
    println!("detected:   {}", entity.detected_at.to_rfc3339());
    println!("retries:    {}", entity.retry_count);
    if let Some(error) = &entity.error {
        println!("error:      {error}");
    }
}

/// Parse `30m`, `2h`, `1d` style durations.
fn parse_duration(spec: &str) -> Result<ChronoDuration, CliError> {
    let spec = spec.trim();
    let (digits, unit) = spec.split_at(spec.len().saturating_sub(1));
    let value: i64 = digits
        .parse()
        .map_err(|_| CliError::Usage(format!("unparseable duration {spec:?}")))?;
    if value <= 0 {
        return Err(CliError::Usage("duration must be positive".to_string()));
    }
    match unit {
        "m" => Ok(ChronoDuration::minutes(value)),
        "h" => Ok(ChronoDuration::hours(value)),
        "d" => Ok(ChronoDuration::days(value)),
        _ => Err(CliError::Usage(format!(
            "unknown duration unit in {spec:?} (use m, h, or d)"
        ))),
    }
}

// ──────────────────── rules commands ────────────────────

fn run_rules(cli: &Cli, config: &Config, command: &RulesCommand) -> Result<(), CliError> {
    match command {
        RulesCommand::List => {
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config.whitelist).map_err(DqhError::from)?
                );
                return Ok(());
            }
            if config.whitelist.is_empty() {
                println!("no whitelist rules configured");
                return Ok(());
            }
            for (i, rule) in config.whitelist.iter().enumerate() {
                let action = match rule.action {
                    WhitelistAction::NeverDelete => "never-delete".to_string(),
                    WhitelistAction::AutoDeleteAfter => {
                        format!("auto-delete-after {}m", rule.minutes)
                    }
                };
                let state = if rule.enabled { "" } else { " (disabled)" };
                let matcher = match rule.matcher {
                    WhitelistMatch::Extension => "extension",
                    WhitelistMatch::Filename => "filename",
                };
                println!("{}. {matcher} {:?} -> {action}{state}", i + 1, rule.value);
            }
        }
        RulesCommand::Add(args) => {
            let rule = WhitelistRule {
                matcher: match args.r#match.as_str() {
                    "filename" => WhitelistMatch::Filename,
                    _ => WhitelistMatch::Extension,
                },
                value: args.value.clone(),
                action: match args.action.as_str() {
                    "auto-delete-after" => WhitelistAction::AutoDeleteAfter,
                    _ => WhitelistAction::NeverDelete,
                },
                minutes: args.minutes,
                enabled: true,
            };
            if rule.action == WhitelistAction::AutoDeleteAfter && rule.minutes == 0 {
                return Err(CliError::Usage(
                    "auto-delete-after requires --minutes".to_string(),
                ));
            }
            let mut updated = config.clone();
            updated.whitelist.push(rule);
            write_config(cli, &updated)?;
            println!("rule added ({} total); reload the daemon to apply", updated.whitelist.len());
        }
        RulesCommand::Rm { position } => {
            if *position == 0 || *position > config.whitelist.len() {
                return Err(CliError::Usage(format!(
                    "no rule at position {position} (have {})",
                    config.whitelist.len()
                )));
            }
            let mut updated = config.clone();
            let removed = updated.whitelist.remove(position - 1);
            write_config(cli, &updated)?;
            println!(
                "removed rule {position} ({:?}); reload the daemon to apply",
                removed.value
            );
        }
    }
    Ok(())
}

fn write_config(cli: &Cli, config: &Config) -> Result<(), CliError> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| config.paths.config_file.clone());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(config).map_err(|e| DqhError::Serialization {
        context: "toml",
        details: e.to_string(),
    })?;
    std::fs::write(&path, rendered)?;
    Ok(())
}

// ──────────────────── config commands ────────────────────

fn run_config(cli: &Cli, config: &Config, command: &ConfigCommand) -> Result<(), CliError> {
    match command {
        ConfigCommand::Show => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(config).map_err(DqhError::from)?);
            } else {
                let rendered =
                    toml::to_string_pretty(config).map_err(|e| DqhError::Serialization {
                        context: "toml",
                        details: e.to_string(),
                    })?;
                print!("{rendered}");
            }
        }
        ConfigCommand::Path => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| config.paths.config_file.clone());
            println!("{}", path.display());
        }
        ConfigCommand::Init => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(Config::default_path);
            if path.exists() {
                return Err(CliError::Usage(format!(
                    "config file already exists at {}",
                    path.display()
                )));
            }
            write_config(cli, &Config::default())?;
            println!("wrote default config to {}", path.display());
        }
    }
    Ok(())
}

// ──────────────────── tests ────────────────────
