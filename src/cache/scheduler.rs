//! Maintenance scheduler: periodic sweeps, analytics cleanup and prefetch.
//!
//! The scheduler itself is clock-driven and holds no timers: callers ask
//! which tasks are due at a given instant. [`spawn_maintenance`] drives it
//! from a tokio interval; tests step a manual clock instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::engine::CacheEngine;

/// Identifier returned by [`Scheduler::schedule`].
pub type TaskId = u64;

/// Periodic work the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceTask {
    ExpirySweep,
    AnalyticsCleanup,
    PrefetchCycle,
}

/// A scheduled periodic task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub task: MaintenanceTask,
    pub interval: chrono::Duration,
    pub next_due: DateTime<Utc>,
    pub runs: u64,
}

#[derive(Debug, Default, Clone)]
pub struct SchedulerStats {
    pub total_scheduled: u64,
    pub total_runs: u64,
    pub total_cancelled: u64,
}

/// Ordered set of periodic tasks, earliest due first.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    next_id: TaskId,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_ordered(&mut self, task: ScheduledTask) {
        let pos = self
            .tasks
            .iter()
            .position(|existing| existing.next_due > task.next_due)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(pos, task);
    }

    /// Schedule `task` every `interval`, first due one interval after `now`.
    pub fn schedule(
        &mut self,
        task: MaintenanceTask,
        interval: chrono::Duration,
        now: DateTime<Utc>,
    ) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;

        debug!(id, ?task, interval_secs = interval.num_seconds(), "Scheduled task");

        self.insert_ordered(ScheduledTask {
            id,
            task,
            interval,
            next_due: now + interval,
            runs: 0,
        });
        self.stats.total_scheduled += 1;
        id
    }

    /// Cancel one task. Returns whether it was scheduled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        let removed = before != self.tasks.len();
        if removed {
            self.stats.total_cancelled += 1;
        }
        removed
    }

    /// Cancel every task.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.tasks.len();
        self.tasks.clear();
        self.stats.total_cancelled += cancelled as u64;
        cancelled
    }

    /// Tasks due at `now`, in due order. Each task runs at most once per
    /// call; missed periods are skipped rather than replayed.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<MaintenanceTask> {
        let split = self
            .tasks
            .iter()
            .position(|t| t.next_due > now)
            .unwrap_or(self.tasks.len());
        let ready: Vec<ScheduledTask> = self.tasks.drain(..split).collect();

        let mut due = Vec::with_capacity(ready.len());
        for mut task in ready {
            due.push(task.task);
            task.runs += 1;
            while task.next_due <= now && task.interval > chrono::Duration::zero() {
                task.next_due += task.interval;
            }
            if task.interval <= chrono::Duration::zero() {
                task.next_due = now + chrono::Duration::seconds(1);
            }
            self.insert_ordered(task);
        }
        self.stats.total_runs += due.len() as u64;
        due
    }

    /// When the next task becomes due.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.tasks.first().map(|t| t.next_due)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

/// Handle to a running maintenance loop.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Ask the loop to stop; work already started runs to completion.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel();
        let _ = self.join.await;
    }
}

/// Poll the engine's scheduler every `tick` until cancelled.
pub fn spawn_maintenance(engine: Arc<CacheEngine>, tick: std::time::Duration) -> MaintenanceHandle {
    let (shutdown, mut stopped) = watch::channel(false);

    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    engine.run_due_maintenance().await;
                }
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Maintenance loop stopped");
    });

    MaintenanceHandle { shutdown, join }
}
