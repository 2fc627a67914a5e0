//! Reversible deletion through the OS trash.

#![allow(missing_docs)]

use std::path::Path;

use crate::core::errors::{DqhError, Result};

/// Trash seam. Production uses the OS trash; tests substitute a recorder.
pub trait TrashBin: Send + Sync {
    /// Move the file to the trash. Must never unlink permanently.
    fn move_to_trash(&self, path: &Path) -> Result<()>;
}

/// OS trash via the `trash` crate (XDG trash spec on Linux).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTrash;

impl TrashBin for SystemTrash {
    fn move_to_trash(&self, path: &Path) -> Result<()> {
        trash::delete(path).map_err(|e| DqhError::Trash {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }
}
