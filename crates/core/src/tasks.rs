//! Per-position task deduplication.

use alloy::primitives::U256;
use dashmap::DashSet;
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, error};

use crate::telemetry::{Counter, Telemetry};

/// Result of a deduplicated keeper task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Another task for the same id was already running.
    Skipped,
    Completed,
    Failed,
}

/// Ids of keeper tasks currently in flight.
#[derive(Debug, Default)]
pub struct ActiveTasks {
    ids: DashSet<U256>,
}

impl ActiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, id: &U256) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Claim `id`; `None` if it is already claimed.
    fn claim(&self, id: U256) -> Option<TaskGuard<'_>> {
        // `then`, not `then_some`: a guard built on the losing path would release the id.
        self.ids.insert(id).then(|| TaskGuard { tasks: self, id })
    }

    /// Run `work` unless a task for `id` is already active.
    ///
    /// Errors are logged and counted, never returned. The id is released when
    /// `work` settles or the returned future is dropped.
    pub async fn run_keeper_task<F, T, E>(
        &self,
        id: U256,
        label: &str,
        telemetry: &dyn Telemetry,
        work: F,
    ) -> TaskOutcome
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let Some(_guard) = self.claim(id) else {
            debug!(id = %id, task = label, "Task already running, skipping");
            return TaskOutcome::Skipped;
        };

        match work.await {
            Ok(_) => TaskOutcome::Completed,
            Err(e) => {
                error!(id = %id, task = label, error = %e, "Keeper task failed");
                telemetry.increment(Counter::KeeperErrors);
                TaskOutcome::Failed
            }
        }
    }
}

struct TaskGuard<'a> {
    tasks: &'a ActiveTasks,
    id: U256,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.tasks.ids.remove(&self.id);
    }
}
