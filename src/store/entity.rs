//! Queue entity model: tracked files, lifecycle status, and whitelist rules.

#![allow(missing_docs)]

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::paths::split_extension;

/// Identifier of a tracked entity. Generated once, immutable afterwards.
pub type EntityId = u64;

// ──────────────────── status ────────────────────

/// Lifecycle status of a queue entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Tracked, no deadline chosen yet.
    Pending,
    /// Deadline set, scheduler job installed.
    Scheduled,
    /// Deadline deferred after a lock hit or user snooze.
    Snoozed,
    /// Awaiting a user confirmation decision.
    Confirming,
    /// Trash operation in progress.
    Deleting,
    /// Moved to trash, or externally removed. Terminal.
    Deleted,
    /// Retry budget exhausted. Terminal.
    Failed,
    /// Matched a never-delete rule. Terminal side-branch.
    Whitelisted,
}

impl EntityStatus {
    /// Terminal statuses carry no scheduler job and are never fired again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted | Self::Failed | Self::Whitelisted)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Snoozed => "snoozed",
            Self::Confirming => "confirming",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
            Self::Whitelisted => "whitelisted",
        }
    }

    /// Parse the lowercase wire form back into a status.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "scheduled" => Some(Self::Scheduled),
            "snoozed" => Some(Self::Snoozed),
            "confirming" => Some(Self::Confirming),
            "deleting" => Some(Self::Deleting),
            "deleted" => Some(Self::Deleted),
            "failed" => Some(Self::Failed),
            "whitelisted" => Some(Self::Whitelisted),
            _ => None,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── entity ────────────────────

/// One tracked file in the deletion queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntity {
    pub id: EntityId,
    /// Absolute path. Updated in place on detected rename.
    pub path: PathBuf,
    pub file_name: String,
    /// Lowercased extension, empty when absent.
    pub extension: String,
    /// Refreshed on content-change events.
    pub size_bytes: u64,
    /// Stable filesystem identifier (inode) used for rename reconciliation.
    pub file_key: u64,
    pub detected_at: DateTime<Utc>,
    /// `None` means "never delete"; no scheduler job exists in that case.
    pub deadline: Option<DateTime<Utc>>,
    pub status: EntityStatus,
    /// Snooze/retry counter. Reset only by explicit new scheduling.
    pub retry_count: u32,
    /// Populated only in `failed`.
    pub error: Option<String>,
}

impl QueueEntity {
    /// Build a freshly-detected entity in `pending` state.
    #[must_use]
    pub fn detected(id: EntityId, path: PathBuf, size_bytes: u64, file_key: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (file_name, extension) = split_extension(&name);
        Self {
            id,
            path,
            file_name,
            extension,
            size_bytes,
            file_key,
            detected_at: Utc::now(),
            deadline: None,
            status: EntityStatus::Pending,
            retry_count: 0,
            error: None,
        }
    }

    /// Apply a detected rename: path identity changes, lifecycle state does not.
    pub fn apply_rename(&mut self, new_path: &Path, size_bytes: u64) {
        let name = new_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (file_name, extension) = split_extension(&name);
        self.path = new_path.to_path_buf();
        self.file_name = file_name;
        self.extension = extension;
        self.size_bytes = size_bytes;
    }
}

// ──────────────────── patch ────────────────────

/// Partial update applied through [`EntityStore::patch`](crate::store::EntityStore::patch).
///
/// `deadline` and `error` are doubly optional: the outer `Option` marks the
/// field as present in the patch, the inner one is the stored nullable value.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub status: Option<EntityStatus>,
    pub path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
    pub deadline: Option<Option<DateTime<Utc>>>,
    pub retry_count: Option<u32>,
    pub error: Option<Option<String>>,
}

impl EntityPatch {
    #[must_use]
    pub fn status(status: EntityStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn rename(path: PathBuf, size_bytes: u64) -> Self {
        Self {
            path: Some(path),
            size_bytes: Some(size_bytes),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn size(size_bytes: u64) -> Self {
        Self {
            size_bytes: Some(size_bytes),
            ..Self::default()
        }
    }

    /// Apply this patch to an entity. A path change recomputes name/extension.
    pub fn apply(&self, entity: &mut QueueEntity) {
        if let Some(status) = self.status {
            entity.status = status;
        }
        if let Some(path) = &self.path {
            let size = self.size_bytes.unwrap_or(entity.size_bytes);
            entity.apply_rename(path, size);
        } else if let Some(size) = self.size_bytes {
            entity.size_bytes = size;
        }
        if let Some(deadline) = self.deadline {
            entity.deadline = deadline;
        }
        if let Some(count) = self.retry_count {
            entity.retry_count = count;
        }
        if let Some(error) = &self.error {
            entity.error = error.clone();
        }
    }
}

// ──────────────────── whitelist rules ────────────────────

/// What part of the file identity a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitelistMatch {
    Extension,
    Filename,
}

/// What a matched rule does with the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WhitelistAction {
    NeverDelete,
    AutoDeleteAfter,
}

/// User-defined auto-classification rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistRule {
    #[serde(rename = "match")]
    pub matcher: WhitelistMatch,
    pub value: String,
    pub action: WhitelistAction,
    /// Minutes until auto-deletion; only meaningful for `auto-delete-after`.
    #[serde(default)]
    pub minutes: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl WhitelistRule {
    /// Whether this rule matches the given file name (case-insensitive).
    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match self.matcher {
            WhitelistMatch::Extension => {
                let (_, ext) = split_extension(file_name);
                ext.eq_ignore_ascii_case(&self.value)
            }
            WhitelistMatch::Filename => file_name.eq_ignore_ascii_case(&self.value),
        }
    }
}

/// Evaluate rules in list order; the first enabled match wins.
#[must_use]
pub fn first_match<'a>(rules: &'a [WhitelistRule], file_name: &str) -> Option<&'a WhitelistRule> {
    rules.iter().find(|rule| rule.matches(file_name))
}

// ──────────────────── tests ────────────────────
