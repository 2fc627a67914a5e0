//! Deadline scheduler: maps entity deadlines onto the timer wheel and hands
//! fired ids to the deletion engine.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;

use crate::core::errors::Result;
use crate::engine::timers::{TimerKey, TimerToken, TimerWheel};
use crate::store::entity::EntityId;

/// One scheduler job per entity. Scheduling again replaces the old job, so an
/// entity can never fire twice for one deadline.
pub struct Scheduler {
    wheel: TimerWheel,
    jobs: Arc<Mutex<HashMap<EntityId, DateTime<Utc>>>>,
}

impl Scheduler {
    /// Spawn the scheduler. Fired entity ids arrive on the returned receiver.
    pub fn spawn() -> Result<(Self, Receiver<EntityId>)> {
        let (fired_tx, fired_rx) = unbounded();
        let jobs: Arc<Mutex<HashMap<EntityId, DateTime<Utc>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let jobs_for_wheel = Arc::clone(&jobs);
        let wheel = TimerWheel::spawn(
            "dqh-scheduler",
            Arc::new(move |key: TimerKey| {
                if let TimerToken::Id(id) = key.token {
                    // A job may have been cancelled between firing and here.
                    if jobs_for_wheel.lock().remove(&id).is_some() {
                        let _ = fired_tx.send(id);
                    }
                }
            }),
        )?;

        Ok((Self { wheel, jobs }, fired_rx))
    }

    /// Install (or replace) the job for an entity. Past deadlines fire
    /// immediately.
    pub fn schedule(&self, id: EntityId, fire_at: DateTime<Utc>) -> Result<()> {
        let delay = (fire_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.jobs.lock().insert(id, fire_at);
        self.wheel.arm(TimerKey::deadline(id), delay)
    }

    /// Remove the job if one exists. Idempotent.
    pub fn cancel(&self, id: EntityId) -> Result<()> {
        if self.jobs.lock().remove(&id).is_some() {
            self.wheel.disarm(TimerKey::deadline(id))?;
        }
        Ok(())
    }

    pub fn cancel_all(&self) -> Result<()> {
        self.jobs.lock().clear();
        self.wheel.disarm_all()
    }

    /// The instant the entity's job will fire, if one is installed.
    #[must_use]
    pub fn scheduled_at(&self, id: EntityId) -> Option<DateTime<Utc>> {
        self.jobs.lock().get(&id).copied()
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn shutdown(&self) {
        self.jobs.lock().clear();
        self.wheel.shutdown();
    }
}

// ──────────────────── tests ────────────────────
