//! Scheduler Engine — the keyed in-memory job set and the loop that fires it.
//!
//! One engine per process, evaluated by a single background tokio task on a
//! `tokio::time::interval`. Runners do not execute on the engine task: each
//! claimed firing is handed to the [`DispatchWorker`] owned by the main
//! context, and the engine only learns about completion through the
//! completion hook attached to the submitted work item.
//!
//! Firing policies (tested in this module and in `dispatch`):
//! - max-concurrency 1 per key: a due occurrence for a still-running job is
//!   dropped and the job advances to its next nominal time;
//! - misfires coalesce: however long the outage, a recurring job fires once
//!   on resumption and advances from now;
//! - a one-shot whose instant is already past fires only if still within
//!   the misfire grace, otherwise it is exhausted without firing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};

use crate::trigger::Trigger;

/// Runner invoked when a job fires. Infallible by contract: dispatcher
/// errors are logged inside the runner, never surfaced to the engine.
pub type JobRunner = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Stable job key for a reminder.
pub fn job_key(owner_id: i64, reminder_id: i64) -> String {
    format!("reminder-{owner_id}-{reminder_id}")
}

/// A live, in-memory job: trigger + runner under a key.
struct ScheduledJob {
    trigger: Trigger,
    misfire_grace: Duration,
    runner: JobRunner,
    next_fire: Option<DateTime<Utc>>,
    /// Max-concurrency = 1: set while a firing is in flight.
    running: bool,
}

/// A firing claimed by `tick`, ready to hand off.
pub struct Firing {
    pub key: String,
    pub runner: JobRunner,
    /// The nominal fire time consumed by this claim; used to restore the
    /// job if the hand-off fails.
    pub nominal: DateTime<Utc>,
}

/// The scheduler engine — owns the live set of scheduled jobs.
#[derive(Default)]
pub struct SchedulerEngine {
    jobs: HashMap<String, ScheduledJob>,
}

impl SchedulerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a job under `key`, atomically replacing any existing job with
    /// the same key — there is never a window with two live triggers.
    ///
    /// A one-shot whose instant already lies in the past is installed due
    /// (fires on the next tick) when within the misfire grace of now, and
    /// installed exhausted otherwise.
    pub fn upsert(&mut self, key: &str, trigger: Trigger, misfire_grace: Duration, runner: JobRunner) {
        self.upsert_at(key, trigger, misfire_grace, runner, Utc::now());
    }

    /// `upsert` with an explicit "now" — the seed for `next_fire` and the
    /// misfire check, so install behavior is reproducible at any instant.
    pub fn upsert_at(
        &mut self,
        key: &str,
        trigger: Trigger,
        misfire_grace: Duration,
        runner: JobRunner,
        now: DateTime<Utc>,
    ) {
        let next_fire = match &trigger {
            Trigger::Once { at } if *at <= now => {
                if now - *at <= misfire_grace {
                    Some(*at)
                } else {
                    tracing::warn!(
                        "⏲️ One-shot '{}' target {} is past misfire grace — installed exhausted",
                        key,
                        at
                    );
                    None
                }
            }
            _ => trigger.next_after(now),
        };
        // Carry the running flag across a reschedule so the old in-flight
        // firing still excludes a concurrent new one.
        let running = self.jobs.get(key).map(|j| j.running).unwrap_or(false);
        tracing::info!("📅 Job installed: '{}' (next: {:?})", key, next_fire);
        self.jobs.insert(
            key.to_string(),
            ScheduledJob {
                trigger,
                misfire_grace,
                runner,
                next_fire,
                running,
            },
        );
    }

    /// Remove a job. Idempotent — removing an absent key is not an error.
    /// An in-flight firing for the key is allowed to complete, but no new
    /// firing will start.
    pub fn remove(&mut self, key: &str) -> bool {
        self.jobs.remove(key).is_some()
    }

    /// Next scheduled instant for a key, or None if absent or exhausted.
    pub fn next_fire_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.jobs.get(key).and_then(|j| j.next_fire)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Evaluate due jobs at `now` and claim their firings.
    ///
    /// Claiming marks the job running and advances `next_fire` from `now`,
    /// which coalesces every missed occurrence into this one firing.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Firing> {
        let mut claimed = Vec::new();
        for (key, job) in self.jobs.iter_mut() {
            let Some(due) = job.next_fire else { continue };
            if due > now {
                continue;
            }

            if job.running {
                // Overlap policy: drop this occurrence, keep the cadence.
                tracing::warn!(
                    "⏭️ Job '{}' still running at its fire time — occurrence dropped",
                    key
                );
                job.next_fire = job.trigger.next_after(now);
                continue;
            }

            if job.trigger.is_once() && now - due > job.misfire_grace {
                tracing::warn!(
                    "⏲️ One-shot '{}' missed by more than the grace period — exhausted",
                    key
                );
                job.next_fire = None;
                continue;
            }

            tracing::info!("🔔 Job due: '{}' (nominal {})", key, due);
            job.running = true;
            job.next_fire = job.trigger.next_after(now);
            claimed.push(Firing {
                key: key.clone(),
                runner: job.runner.clone(),
                nominal: due,
            });
        }
        claimed
    }

    /// Mark a firing complete, allowing the next occurrence to start.
    pub fn finish(&mut self, key: &str) {
        if let Some(job) = self.jobs.get_mut(key) {
            job.running = false;
        }
    }

    /// Un-claim a firing whose hand-off failed: put the nominal time back
    /// so the next tick can retry it instead of losing the occurrence.
    pub fn restore(&mut self, key: &str, nominal: DateTime<Utc>) {
        if let Some(job) = self.jobs.get_mut(key) {
            job.running = false;
            job.next_fire = Some(nominal);
        }
    }
}

// ─── Cross-context hand-off ──────────────────────────────────

/// A unit of dispatcher work submitted to the owning execution context.
pub type WorkItem = BoxFuture<'static, ()>;

/// Sender half of the hand-off: the engine task submits work items here
/// instead of running them itself.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl DispatchHandle {
    /// Create a connected handle/worker pair.
    pub fn new() -> (Self, DispatchWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchWorker { rx })
    }

    /// Submit work. Fails only when the worker is gone (shutting down);
    /// before the worker starts, items queue in the channel.
    pub fn submit(&self, work: WorkItem) -> Result<(), ()> {
        self.tx.send(work).map_err(|_| ())
    }
}

/// Receiver half — run by the main context. Work items execute strictly
/// sequentially, so dispatcher storage writes never interleave.
pub struct DispatchWorker {
    rx: mpsc::UnboundedReceiver<WorkItem>,
}

impl DispatchWorker {
    pub async fn run(mut self) {
        while let Some(work) = self.rx.recv().await {
            work.await;
        }
    }
}

/// Spawn body of the engine task: tick, claim, hand off.
pub async fn spawn_scheduler(
    engine: Arc<Mutex<SchedulerEngine>>,
    dispatch: DispatchHandle,
    tick_interval_secs: u64,
) {
    tracing::info!("⏰ Scheduler started (tick every {}s)", tick_interval_secs);

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let firings = {
            let mut eng = engine.lock().await;
            eng.tick(Utc::now())
        };

        for firing in firings {
            let engine_for_work = engine.clone();
            let key = firing.key.clone();
            let runner = firing.runner.clone();
            let work: WorkItem = Box::pin(async move {
                runner().await;
                engine_for_work.lock().await.finish(&key);
            });
            if dispatch.submit(work).is_err() {
                tracing::warn!(
                    "⚠️ Dispatch context unavailable — deferring '{}' to next tick",
                    firing.key
                );
                engine.lock().await.restore(&firing.key, firing.nominal);
            }
        }
    }
}
