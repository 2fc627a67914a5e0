//! Multi-channel notification system: desktop, file, and journal channels.
//!
//! Dispatches structured notifications through configured channels with
//! min-level filtering. Each channel is fire-and-forget; notification
//! failures are logged but never block the engine.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};

// ──────────────────── notification level ────────────────────

/// Severity level for notification filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ──────────────────── notification events ────────────────────

/// A structured notification event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    NewFileTracked {
        file_name: String,
        size_bytes: u64,
    },
    DeletionCompleted {
        file_name: String,
    },
    FileInUse {
        file_name: String,
        retry_minutes: u64,
        attempt: u32,
    },
    ConfirmationNeeded {
        file_name: String,
        openers: String,
        timeout_secs: u64,
    },
    DeletionFailed {
        file_name: String,
        attempts: u32,
    },
    DaemonStarted {
        version: String,
        directory: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl NotificationEvent {
    /// The severity level of this event (for min-level filtering).
    #[must_use]
    pub const fn level(&self) -> NotificationLevel {
        match self {
            Self::NewFileTracked { .. }
            | Self::DeletionCompleted { .. }
            | Self::DaemonStarted { .. }
            | Self::DaemonStopped { .. } => NotificationLevel::Info,

            Self::FileInUse { .. } | Self::ConfirmationNeeded { .. } => NotificationLevel::Warning,

            Self::DeletionFailed { .. } | Self::Error { .. } => NotificationLevel::Critical,
        }
    }

    /// Short human-readable summary line.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::NewFileTracked {
                file_name,
                size_bytes,
            } => {
                let mb = *size_bytes as f64 / 1_048_576.0;
                format!("Now tracking {file_name} ({mb:.1} MB)")
            }
            Self::DeletionCompleted { file_name } => format!("Moved {file_name} to trash"),
            Self::FileInUse {
                file_name,
                retry_minutes,
                attempt,
            } => format!(
                "{file_name} is in use, retrying in {retry_minutes}m (attempt {attempt})"
            ),
            Self::ConfirmationNeeded {
                file_name,
                openers,
                timeout_secs,
            } => format!(
                "{file_name} appears open in {openers}; deleting in {timeout_secs}s unless kept"
            ),
            Self::DeletionFailed {
                file_name,
                attempts,
            } => format!("Gave up deleting {file_name} after {attempts} attempts"),
            Self::DaemonStarted { version, directory } => {
                format!("dqh v{version} started, watching {directory}")
            }
            Self::DaemonStopped {
                reason,
                uptime_secs,
            } => {
                let hours = uptime_secs / 3600;
                let minutes = (uptime_secs % 3600) / 60;
                format!("dqh stopped ({reason}) after {hours}h {minutes}m")
            }
            Self::Error { code, message } => format!("[{code}] {message}"),
        }
    }
}

// ──────────────────── configuration ────────────────────

/// Top-level notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Master switch for all notifications.
    pub enabled: bool,
    /// Which channel names to activate.
    pub channels: Vec<String>,
    pub desktop: DesktopConfig,
    pub file: FileConfig,
    pub journal: JournalConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["desktop".to_string(), "journal".to_string()],
            desktop: DesktopConfig::default(),
            file: FileConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

/// Desktop notification settings (notify-send on Linux, osascript on macOS).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesktopConfig {
    pub enabled: bool,
    pub min_level: NotificationLevel,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_level: NotificationLevel::Info,
        }
    }
}

/// File notification settings (append-only JSONL).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            path: home
                .join(".local")
                .join("share")
                .join("dqh")
                .join("notifications.jsonl"),
        }
    }
}

/// Journal notification settings (systemd journal via stderr).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub min_level: NotificationLevel,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            min_level: NotificationLevel::Warning,
        }
    }
}

// ──────────────────── JSONL record ────────────────────

/// A single notification record written to the JSONL file.
#[derive(Debug, Serialize)]
struct NotificationRecord {
    ts: String,
    level: NotificationLevel,
    summary: String,
    #[serde(flatten)]
    event: NotificationEvent,
}

// ──────────────────── notification channels ────────────────────

/// A notification channel that can dispatch events.
trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, event: &NotificationEvent);
}

// ──── Desktop (notify-send / osascript) ────

struct DesktopChannel {
    min_level: NotificationLevel,
}

impl DesktopChannel {
    const fn new(config: &DesktopConfig) -> Self {
        Self {
            min_level: config.min_level,
        }
    }
}

impl Channel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level {
            return;
        }

        let summary = event.summary();
        let urgency = match event.level() {
            NotificationLevel::Critical => "critical",
            NotificationLevel::Warning => "normal",
            NotificationLevel::Info => "low",
        };

        #[cfg(target_os = "linux")]
        {
            let _ = Command::new("notify-send")
                .arg("--urgency")
                .arg(urgency)
                .arg("--app-name=dqh")
                .arg("Deletion Queue")
                .arg(&summary)
                .spawn();
        }

        #[cfg(target_os = "macos")]
        {
            let script = format!(
                "display notification \"{}\" with title \"dqh\" subtitle \"Deletion Queue\"",
                summary.replace('"', "\\\"")
            );
            let _ = Command::new("osascript").arg("-e").arg(&script).spawn();
        }

        // On other platforms, desktop notifications are a no-op.
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let _ = (urgency, summary);
        }
    }
}

// ──── File (append-only JSONL) ────

struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    fn new(config: &FileConfig) -> Self {
        Self {
            path: config.path.clone(),
        }
    }
}

impl Channel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send(&self, event: &NotificationEvent) {
        let record = NotificationRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: event.level(),
            summary: event.summary(),
            event: event.clone(),
        };

        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };

        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let file = {
            let mut opts = OpenOptions::new();
            opts.create(true).append(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&self.path)
        };

        if let Ok(mut f) = file {
            let _ = writeln!(f, "{json}");
        }
    }
}

// ──── Journal (systemd structured stderr) ────

struct JournalChannel {
    min_level: NotificationLevel,
}

impl JournalChannel {
    const fn new(config: &JournalConfig) -> Self {
        Self {
            min_level: config.min_level,
        }
    }
}

impl Channel for JournalChannel {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level {
            return;
        }

        // systemd captures stderr and annotates with PRIORITY via SyslogIdentifier.
        let priority = match event.level() {
            NotificationLevel::Critical => "ERR",
            NotificationLevel::Warning => "WARNING",
            NotificationLevel::Info => "INFO",
        };

        eprintln!("[DQH-NOTIFY] [{priority}] {}", event.summary());
    }
}

// ──────────────────── notification manager ────────────────────

/// Coordinates dispatching notification events to all enabled channels.
///
/// Cheap to call: each channel's `send()` is fire-and-forget (spawns a child
/// process for desktop, appends for file, writes to stderr for journal).
/// Notification failures never propagate.
pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
    enabled: bool,
    last_send: Option<Instant>,
}

impl NotificationManager {
    /// Build a manager from configuration.
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        for channel_name in &config.channels {
            match channel_name.as_str() {
                "desktop" if config.desktop.enabled => {
                    channels.push(Box::new(DesktopChannel::new(&config.desktop)));
                }
                "file" => {
                    channels.push(Box::new(FileChannel::new(&config.file)));
                }
                "journal" => {
                    channels.push(Box::new(JournalChannel::new(&config.journal)));
                }
                _ => {
                    // Unknown or disabled channel name: skip silently.
                }
            }
        }

        Self {
            channels,
            enabled: true,
            last_send: None,
        }
    }

    /// Create a disabled (no-op) manager.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: Vec::new(),
            enabled: false,
            last_send: None,
        }
    }

    /// Dispatch a notification event to all enabled channels.
    pub fn notify(&mut self, event: &NotificationEvent) {
        if !self.enabled {
            return;
        }
        self.last_send = Some(Instant::now());
        for channel in &self.channels {
            channel.send(event);
        }
    }

    /// Number of active channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether the manager is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// List the names of active channels.
    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

// ──────────────────── tests ────────────────────
