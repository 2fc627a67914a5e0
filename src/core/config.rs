//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DqhError, Result};
use crate::daemon::notifications::NotificationConfig;
use crate::store::entity::WhitelistRule;

/// Full DQH configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub watch: WatchConfig,
    pub deletion: DeletionPolicyConfig,
    /// Whitelist rules, evaluated in list order; first enabled match wins.
    pub whitelist: Vec<WhitelistRule>,
    pub notifications: NotificationConfig,
    pub paths: PathsConfig,
}

/// Watched-directory behavior and event-coalescing windows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// The single directory monitored (non-recursive).
    pub directory: PathBuf,
    /// Silence required after the last raw "appeared" event before a path is
    /// considered stable.
    pub debounce_ms: u64,
    /// How long a removed entity's inode stays correlatable with a new path.
    pub rename_window_ms: u64,
    /// Raise a desktop notification when an unclassified file is tracked.
    pub notify_on_new_file: bool,
}

/// Deadline firing, retry, and probe policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeletionPolicyConfig {
    /// Delay applied on each snooze, automatic or user-initiated.
    pub snooze_minutes: u64,
    /// Snooze attempts before an entity is marked failed.
    pub max_retries: u32,
    /// How long a confirmation request waits before defaulting to delete.
    pub confirm_timeout_secs: u64,
    /// Hard timeout for the Tier-1 open-handle probe invocation.
    pub lock_probe_timeout_secs: u64,
    /// Hard timeout for the Tier-2 window-title query.
    pub window_probe_timeout_secs: u64,
    /// Gap between staggered firings of overdue entities at startup.
    pub startup_stagger_ms: u64,
}

/// Filesystem paths used by dqh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub sqlite_db: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for WatchConfig {
    fn default() -> Self {
        let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            directory: home.join("Downloads"),
            debounce_ms: 500,
            rename_window_ms: 3_000,
            notify_on_new_file: true,
        }
    }
}

impl Default for DeletionPolicyConfig {
    fn default() -> Self {
        Self {
            snooze_minutes: 10,
            max_retries: 3,
            confirm_timeout_secs: 15,
            lock_probe_timeout_secs: 5,
            window_probe_timeout_secs: 3,
            startup_stagger_ms: 500,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[DQH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("dqh").join("config.toml");
        let data = home_dir.join(".local").join("share").join("dqh");
        Self {
            config_file: cfg,
            sqlite_db: data.join("queue.sqlite3"),
            activity_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DqhError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(DqhError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides()?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(raw) = env::var_os("DQH_WATCH_DIRECTORY") {
            self.watch.directory = PathBuf::from(raw);
        }
        set_env_u64("DQH_WATCH_DEBOUNCE_MS", &mut self.watch.debounce_ms)?;
        set_env_u64("DQH_WATCH_RENAME_WINDOW_MS", &mut self.watch.rename_window_ms)?;
        set_env_bool(
            "DQH_WATCH_NOTIFY_ON_NEW_FILE",
            &mut self.watch.notify_on_new_file,
        )?;

        set_env_u64("DQH_DELETION_SNOOZE_MINUTES", &mut self.deletion.snooze_minutes)?;
        set_env_u32("DQH_DELETION_MAX_RETRIES", &mut self.deletion.max_retries)?;
        set_env_u64(
            "DQH_DELETION_CONFIRM_TIMEOUT_SECS",
            &mut self.deletion.confirm_timeout_secs,
        )?;
        set_env_u64(
            "DQH_DELETION_LOCK_PROBE_TIMEOUT_SECS",
            &mut self.deletion.lock_probe_timeout_secs,
        )?;
        set_env_u64(
            "DQH_DELETION_WINDOW_PROBE_TIMEOUT_SECS",
            &mut self.deletion.window_probe_timeout_secs,
        )?;
        set_env_u64(
            "DQH_DELETION_STARTUP_STAGGER_MS",
            &mut self.deletion.startup_stagger_ms,
        )?;

        if let Some(raw) = env::var_os("DQH_SQLITE_DB") {
            self.paths.sqlite_db = PathBuf::from(raw);
        }
        if let Some(raw) = env::var_os("DQH_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Normalize paths for consistent comparison.
    fn normalize_paths(&mut self) {
        let s = self.watch.directory.to_string_lossy();
        if s.len() > 1
            && let Some(stripped) = s.strip_suffix('/')
        {
            self.watch.directory = PathBuf::from(stripped);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.watch.directory.as_os_str().is_empty() {
            return Err(DqhError::InvalidConfig {
                details: "watch.directory must not be empty".to_string(),
            });
        }
        if self.watch.debounce_ms == 0 {
            return Err(DqhError::InvalidConfig {
                details: "watch.debounce_ms must be >= 1".to_string(),
            });
        }
        // Rename reconciliation must win over treating the reappeared path as a
        // brand-new file, which requires the rename window to outlast debounce.
        if self.watch.rename_window_ms <= self.watch.debounce_ms {
            return Err(DqhError::InvalidConfig {
                details: format!(
                    "watch.rename_window_ms ({}) must be > watch.debounce_ms ({})",
                    self.watch.rename_window_ms, self.watch.debounce_ms
                ),
            });
        }
        if self.deletion.max_retries == 0 {
            return Err(DqhError::InvalidConfig {
                details: "deletion.max_retries must be >= 1".to_string(),
            });
        }
        if self.deletion.snooze_minutes == 0 {
            return Err(DqhError::InvalidConfig {
                details: "deletion.snooze_minutes must be >= 1".to_string(),
            });
        }
        if self.deletion.confirm_timeout_secs == 0 {
            return Err(DqhError::InvalidConfig {
                details: "deletion.confirm_timeout_secs must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

fn set_env_u64(name: &str, target: &mut u64) -> Result<()> {
    if let Ok(raw) = env::var(name) {
        *target = raw.parse().map_err(|_| DqhError::InvalidConfig {
            details: format!("{name} must be an unsigned integer, got {raw:?}"),
        })?;
    }
    Ok(())
}

fn set_env_u32(name: &str, target: &mut u32) -> Result<()> {
    if let Ok(raw) = env::var(name) {
        *target = raw.parse().map_err(|_| DqhError::InvalidConfig {
            details: format!("{name} must be an unsigned integer, got {raw:?}"),
        })?;
    }
    Ok(())
}

fn set_env_bool(name: &str, target: &mut bool) -> Result<()> {
    if let Ok(raw) = env::var(name) {
        *target = match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(DqhError::InvalidConfig {
                    details: format!("{name} must be a boolean, got {raw:?}"),
                });
            }
        };
    }
    Ok(())
}
