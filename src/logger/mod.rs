//! Structured activity logging.

pub mod activity;
