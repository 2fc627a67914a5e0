//! The queue engine: watching, scheduling, confirmation, deletion.

pub mod confirm;
pub mod deletion;
pub mod events;
pub mod sched;
pub mod timers;
pub mod watcher;
