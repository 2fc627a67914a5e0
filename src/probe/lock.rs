//! Tier-1 liveness: is anything holding the file open right now.

#![allow(missing_docs)]

use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Lock probe seam. The engine only cares about a yes/no answer.
pub trait LockProber: Send + Sync {
    /// Whether the file at `path` is currently held open by any process.
    fn is_locked(&self, path: &Path, timeout: Duration) -> bool;
}

/// `lsof`-backed prober with a rename-probe fallback.
///
/// `lsof -t -- path` prints holder pids and exits 0 when the file is open.
/// When lsof is absent or too slow, the fallback renames the file to a
/// sibling name and back: a held POSIX lease or a Windows-style share lock
/// under interop layers makes the rename fail, an idle file survives the
/// round trip untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLockProber;

impl LockProber for SystemLockProber {
    fn is_locked(&self, path: &Path, timeout: Duration) -> bool {
        let mut cmd = Command::new("lsof");
        cmd.arg("-t").arg("--").arg(path);
        match super::run_with_timeout(cmd, timeout) {
            Some(output) => output.status.success() && !output.stdout.is_empty(),
            None => rename_probe(path),
        }
    }
}

/// Fallback heuristic: rename to a hidden sibling and back.
fn rename_probe(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return false;
    };
    let probe = parent.join(format!(".{name}.dqh-probe"));

    match std::fs::rename(path, &probe) {
        Ok(()) => {
            // Best effort restore. If this fails the file keeps the probe
            // name; rename reconciliation in the watcher picks it up.
            let _ = std::fs::rename(&probe, path);
            false
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(_) => true,
    }
}

// ──────────────────── tests ────────────────────
