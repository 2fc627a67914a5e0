//! Rendering helpers shared by the CLI command paths.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};

use crate::store::entity::{EntityStatus, QueueEntity};

/// Humanize a byte count: `732 B`, `4.2 KB`, `1.3 GB`.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Render a deadline relative to now: `in 9m`, `in 2h 10m`, `overdue 3m`,
/// or `-` when unset.
#[must_use]
pub fn format_deadline(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(deadline) = deadline else {
        return "-".to_string();
    };
    let delta = deadline - now;
    let (prefix, secs) = if delta.num_seconds() >= 0 {
        ("in", delta.num_seconds())
    } else {
        ("overdue", -delta.num_seconds())
    };
    let minutes = secs / 60;
    let rendered = if minutes >= 60 * 24 {
        format!("{}d {}h", minutes / (60 * 24), (minutes / 60) % 24)
    } else if minutes >= 60 {
        format!("{}h {}m", minutes / 60, minutes % 60)
    } else {
        format!("{minutes}m")
    };
    format!("{prefix} {rendered}")
}

/// Colored rendering of an entity status for terminal tables.
#[must_use]
pub fn format_status(status: EntityStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        EntityStatus::Pending => label.normal(),
        EntityStatus::Scheduled => label.cyan(),
        EntityStatus::Snoozed => label.yellow(),
        EntityStatus::Confirming => label.magenta(),
        EntityStatus::Deleting => label.blue(),
        EntityStatus::Deleted => label.green(),
        EntityStatus::Failed => label.red().bold(),
        EntityStatus::Whitelisted => label.dimmed(),
    }
}

/// Render the queue as an aligned text table, newest first.
#[must_use]
pub fn render_queue_table(entities: &[QueueEntity], now: DateTime<Utc>) -> String {
    if entities.is_empty() {
        return "queue is empty\n".to_string();
    }

    let mut rows: Vec<[String; 5]> = Vec::with_capacity(entities.len());
    for e in entities {
        rows.push([
            e.id.to_string(),
            e.file_name.clone(),
            format_size(e.size_bytes),
            e.status.as_str().to_string(),
            format_deadline(e.deadline, now),
        ]);
    }

    let headers = ["ID", "FILE", "SIZE", "STATUS", "DEADLINE"];
    let mut widths: [usize; 5] = headers.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    for (i, header) in headers.iter().enumerate() {
        out.push_str(&format!("{:<width$}  ", header.bold(), width = widths[i]));
    }
    out.push('\n');
    for (row, entity) in rows.iter().zip(entities) {
        for (i, cell) in row.iter().enumerate() {
            // Pad the plain text, then swap in the colored status so ANSI
            // escapes do not skew the column widths.
            let padded = format!("{:<width$}", cell, width = widths[i]);
            if i == 3 {
                let colored = format_status(entity.status);
                out.push_str(&padded.replacen(cell.as_str(), &colored.to_string(), 1));
            } else {
                out.push_str(&padded);
            }
            out.push_str("  ");
        }
        out.push('\n');
    }
    out
}

// ──────────────────── tests ────────────────────
