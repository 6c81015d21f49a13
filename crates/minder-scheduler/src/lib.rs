//! # Minder Scheduler
//!
//! The reminder-scheduling core: a compact schedule mini-language, concrete
//! triggers in a resolved timezone, and a keyed in-memory engine that fires
//! each job at most once per occurrence across restarts and misfires.
//!
//! ## Architecture
//! ```text
//! "WEEKDAY@08:00" ──parse──▶ Schedule ──build──▶ Trigger (zone-aware)
//!                                                   │
//!                              SchedulerEngine ◀────┘ upsert under
//!                                │   (tokio interval tick)   "reminder-{owner}-{id}"
//!                                ├── due? claim job, hand work to DispatchWorker
//!                                └── runner: ReminderDispatcher::fire
//!                                      ├── re-read record (may be gone/off)
//!                                      ├── Delivery::send
//!                                      └── bookkeeping; one-shots retire themselves
//!
//! BootReconciler: at process start, reinstall every active reminder —
//! the engine's job set does not survive restarts.
//! ```

pub mod dispatch;
pub mod engine;
pub mod reconcile;
pub mod schedule;
pub mod trigger;

pub use dispatch::ReminderDispatcher;
pub use engine::{
    DispatchHandle, DispatchWorker, JobRunner, SchedulerEngine, job_key, spawn_scheduler,
};
pub use reconcile::{install_reminder, reconcile_active};
pub use schedule::{Schedule, ScheduleError};
pub use trigger::{ResolvedZone, Trigger, resolve_zone};
