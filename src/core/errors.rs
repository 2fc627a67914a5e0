//! DQH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DqhError>;

/// Top-level error type for the deletion queue helper.
#[derive(Debug, Error)]
pub enum DqhError {
    #[error("[DQH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DQH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DQH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DQH-2001] watch failure for {path}: {details}")]
    Watch { path: PathBuf, details: String },

    #[error("[DQH-2002] entity {id} not found")]
    EntityNotFound { id: u64 },

    #[error("[DQH-2003] file is still in use after {attempts} attempts: {details}")]
    RetriesExhausted { attempts: u32, details: String },

    #[error("[DQH-2004] trash operation failed for {path}: {details}")]
    Trash { path: PathBuf, details: String },

    #[error("[DQH-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DQH-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[DQH-3001] operation {op} already in progress for entity {id}")]
    OperationInProgress { op: &'static str, id: u64 },

    #[error("[DQH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DQH-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[DQH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DqhError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DQH-1001",
            Self::MissingConfig { .. } => "DQH-1002",
            Self::ConfigParse { .. } => "DQH-1003",
            Self::Watch { .. } => "DQH-2001",
            Self::EntityNotFound { .. } => "DQH-2002",
            Self::RetriesExhausted { .. } => "DQH-2003",
            Self::Trash { .. } => "DQH-2004",
            Self::Serialization { .. } => "DQH-2101",
            Self::Sql { .. } => "DQH-2102",
            Self::OperationInProgress { .. } => "DQH-3001",
            Self::Io { .. } => "DQH-3002",
            Self::ChannelClosed { .. } => "DQH-3003",
            Self::Runtime { .. } => "DQH-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Trash { .. }
                | Self::ChannelClosed { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DqhError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for DqhError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DqhError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<notify::Error> for DqhError {
    fn from(value: notify::Error) -> Self {
        Self::Watch {
            path: value.paths.first().cloned().unwrap_or_default(),
            details: value.to_string(),
        }
    }
}
