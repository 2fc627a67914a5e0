#![forbid(unsafe_code)]

//! Deletion Queue Helper (dqh) — a watched-directory deletion queue with
//! deadlines, liveness checks, and reversible trash.
//!
//! The pipeline:
//! 1. **Watcher** — debounces filesystem noise into tracked queue entities,
//!    preserving identity across renames
//! 2. **Scheduler + deletion engine** — fires entity deadlines through a
//!    two-tier in-use check, timed confirmation, and the OS trash
//! 3. **Daemon** — wires the engine to signals, notifications, and the
//!    activity log
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use deletion_queue_helper::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use deletion_queue_helper::core::config::Config;
//! use deletion_queue_helper::store::entity::QueueEntity;
//! ```

pub mod prelude;

#[cfg(feature = "cli")]
pub mod cli;
pub mod core;
pub mod daemon;
pub mod engine;
pub mod logger;
pub mod platform;
pub mod probe;
pub mod store;
