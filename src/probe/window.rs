//! Tier-2 liveness: which visible windows reference the file by name.
//!
//! This tier is a heuristic, so it fails open: any probe failure reports no
//! openers and deletion proceeds without a confirmation prompt.

#![allow(missing_docs)]

use std::process::Command;
use std::time::Duration;

/// Display names longer than this are truncated for prompts.
const NAME_CAP: usize = 32;

/// Window probe seam.
pub trait WindowTitleProbe: Send + Sync {
    /// Process names owning windows whose title mentions `file_name`.
    /// Empty on failure.
    fn openers(&self, file_name: &str, timeout: Duration) -> Vec<String>;
}

/// `wmctrl -lp` backed probe, resolving window pids through `/proc/<pid>/comm`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWindowProbe;

impl WindowTitleProbe for SystemWindowProbe {
    fn openers(&self, file_name: &str, timeout: Duration) -> Vec<String> {
        let mut cmd = Command::new("wmctrl");
        cmd.arg("-lp");
        let Some(output) = super::run_with_timeout(cmd, timeout) else {
            return Vec::new();
        };
        if !output.status.success() {
            return Vec::new();
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        match_openers(&listing, file_name, read_process_name)
    }
}

fn read_process_name(pid: u32) -> Option<String> {
    let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    let comm = comm.trim();
    (!comm.is_empty()).then(|| comm.to_string())
}

/// Parse `wmctrl -lp` output and collect the process names owning windows
/// whose title contains the file name, case-insensitively. The window title
/// stands in when the pid cannot be resolved. Deduplicated and capped for
/// display.
fn match_openers(
    listing: &str,
    file_name: &str,
    process_name: impl Fn(u32) -> Option<String>,
) -> Vec<String> {
    let needle = file_name.to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut openers = Vec::new();
    for line in listing.lines() {
        let Some((pid, title)) = split_listing_line(line) else {
            continue;
        };
        if !title.to_lowercase().contains(&needle) {
            continue;
        }

        let name = pid
            .and_then(&process_name)
            .unwrap_or_else(|| title.to_string());
        let name = cap_name(&name);
        if !openers.contains(&name) {
            openers.push(name);
        }
    }
    openers
}

/// Split one `wmctrl -lp` line into (pid, title).
///
/// Columns are window id, desktop, pid, host, then the title, separated by
/// runs of whitespace. Lines without all five columns are skipped.
fn split_listing_line(line: &str) -> Option<(Option<u32>, &str)> {
    let mut rest = line.trim_start();
    let mut fields = [""; 4];
    for field in &mut fields {
        let end = rest.find(char::is_whitespace)?;
        *field = &rest[..end];
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        return None;
    }
    Some((fields[2].parse().ok(), rest.trim_end()))
}

fn cap_name(name: &str) -> String {
    if name.chars().count() <= NAME_CAP {
        return name.to_string();
    }
    let prefix: String = name.chars().take(NAME_CAP.saturating_sub(3)).collect();
    format!("{prefix}...")
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
0x03000007  0 1201 host mpv - movie.mkv
0x03200004  1 1450 host Text Editor
0x03400009  0 1201 host movie.MKV - details
0x03600001 -1 1500 host Movie.mkv preview pane with a very long window title";

    fn comm(pid: u32) -> Option<String> {
        match pid {
            1201 => Some("mpv".to_string()),
            1500 => Some("nautilus".to_string()),
            _ => None,
        }
    }

    #[test]
    fn returns_bare_process_names() {
        let openers = match_openers(LISTING, "movie.mkv", comm);
        assert_eq!(
            openers,
            vec!["mpv".to_string(), "nautilus".to_string()],
            "one entry per process, title matched case-insensitively"
        );
    }

    #[test]
    fn unresolvable_pid_falls_back_to_title() {
        let listing = "0x01 0 9999 host report.pdf - viewer";
        let openers = match_openers(listing, "report.pdf", |_| None);
        assert_eq!(openers, vec!["report.pdf - viewer".to_string()]);
    }

    #[test]
    fn fallback_titles_are_capped() {
        let listing =
            "0x01 0 9999 host Movie.mkv preview pane with a very long window title";
        let openers = match_openers(listing, "movie.mkv", |_| None);
        assert_eq!(openers.len(), 1);
        assert!(openers[0].chars().count() <= NAME_CAP, "{:?}", openers[0]);
        assert!(openers[0].ends_with("..."));
    }

    #[test]
    fn windows_of_one_process_collapse() {
        let listing = "\
0x01 0 1201 host doc.txt
0x02 0 1201 host doc.txt - preview";
        let openers = match_openers(listing, "doc.txt", comm);
        assert_eq!(openers, vec!["mpv".to_string()]);
    }

    #[test]
    fn no_match_yields_empty() {
        assert!(match_openers(LISTING, "unrelated.zip", comm).is_empty());
        assert!(match_openers(LISTING, "", comm).is_empty());
        assert!(match_openers("", "movie.mkv", comm).is_empty());
    }
}
