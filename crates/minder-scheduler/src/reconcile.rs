//! Boot reconciliation — rebuild the engine's job set from persisted state.
//!
//! The engine's in-memory jobs do not survive restarts, so at process start
//! every active reminder is re-installed. Reminders whose owner has no known
//! chat yet are skipped but stay active; /start re-runs reconciliation and
//! picks them up once a destination exists.

use std::sync::Arc;

use chrono::Duration;

use minder_core::{Reminder, Result};

use crate::dispatch::ReminderDispatcher;
use crate::engine::{JobRunner, job_key};
use crate::schedule::Schedule;
use crate::trigger::{Trigger, resolve_zone};

/// Build and install the engine job for one reminder. Shared by the boot
/// reconciler and the command layer (create / re-activate / reschedule).
pub async fn install_reminder(
    dispatcher: &Arc<ReminderDispatcher>,
    reminder: &Reminder,
    misfire_grace: Duration,
    fallback_offset_hours: i32,
) -> Result<()> {
    let schedule = Schedule::parse(&reminder.schedule)?;
    let zone = resolve_zone(&reminder.timezone, fallback_offset_hours);
    let trigger = Trigger::build(&schedule, zone);
    let key = job_key(reminder.owner_id, reminder.id);

    let (owner_id, reminder_id) = (reminder.owner_id, reminder.id);
    let d = dispatcher.clone();
    let runner: JobRunner = Arc::new(move || {
        let d = d.clone();
        Box::pin(async move { d.fire(owner_id, reminder_id).await })
    });

    dispatcher
        .engine()
        .lock()
        .await
        .upsert(&key, trigger, misfire_grace, runner);
    Ok(())
}

/// Install every active reminder that has a known delivery destination.
/// Returns how many jobs were installed. Individual bad records (schedule
/// that no longer parses) are logged and skipped, never fatal.
pub async fn reconcile_active(
    store: &Arc<dyn minder_core::ReminderStore>,
    dispatcher: &Arc<ReminderDispatcher>,
    misfire_grace: Duration,
    fallback_offset_hours: i32,
) -> Result<usize> {
    let mut installed = 0;
    for reminder in store.active_reminders()? {
        match store.destination(reminder.owner_id)? {
            Some(_) => {}
            None => {
                tracing::info!(
                    "⏸️ Reminder {} ('{}') has no destination yet — left active, not scheduled",
                    reminder.id,
                    reminder.name
                );
                continue;
            }
        }
        match install_reminder(dispatcher, &reminder, misfire_grace, fallback_offset_hours).await {
            Ok(()) => installed += 1,
            Err(e) => {
                tracing::error!(
                    "⚠️ Could not reschedule reminder {} ('{}'): {e}",
                    reminder.id,
                    reminder.name
                );
            }
        }
    }
    tracing::info!("🔁 Boot reconciliation complete: {} job(s) installed", installed);
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SchedulerEngine;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use minder_core::{Delivery, ReminderStore};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex;

    struct FixedStore {
        reminders: Vec<Reminder>,
        chat_id: Option<i64>,
    }

    impl ReminderStore for FixedStore {
        fn active_reminders(&self) -> minder_core::Result<Vec<Reminder>> {
            Ok(self.reminders.iter().filter(|r| r.active).cloned().collect())
        }
        fn reminder(&self, owner_id: i64, id: i64) -> minder_core::Result<Option<Reminder>> {
            Ok(self
                .reminders
                .iter()
                .find(|r| r.owner_id == owner_id && r.id == id)
                .cloned())
        }
        fn set_active(&self, _: i64, _: i64, _: bool) -> minder_core::Result<bool> {
            Ok(true)
        }
        fn set_run_times(
            &self,
            _: i64,
            _: Option<DateTime<Utc>>,
            _: Option<DateTime<Utc>>,
        ) -> minder_core::Result<()> {
            Ok(())
        }
        fn destination(&self, _: i64) -> minder_core::Result<Option<i64>> {
            Ok(self.chat_id)
        }
    }

    struct NullDelivery {
        sent: StdMutex<usize>,
    }

    #[async_trait]
    impl Delivery for NullDelivery {
        async fn send(&self, _: i64, _: &str) -> minder_core::Result<()> {
            *self.sent.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn reminder(id: i64, schedule: &str) -> Reminder {
        let now = Utc::now();
        Reminder {
            id,
            owner_id: 7,
            name: format!("r{id}"),
            message: "m".into(),
            schedule: schedule.into(),
            timezone: "UTC".into(),
            active: true,
            created_at: now,
            updated_at: now,
            last_run_at: None,
            next_run_at: None,
        }
    }

    fn dispatcher_for(store: Arc<dyn ReminderStore>) -> Arc<ReminderDispatcher> {
        let delivery = Arc::new(NullDelivery {
            sent: StdMutex::new(0),
        });
        let engine = Arc::new(Mutex::new(SchedulerEngine::new()));
        Arc::new(ReminderDispatcher::new(store, delivery, engine))
    }

    #[tokio::test]
    async fn test_reconcile_installs_active_reminders() {
        let store: Arc<dyn ReminderStore> = Arc::new(FixedStore {
            reminders: vec![reminder(1, "WEEKDAY@08:00"), reminder(2, "EVERYDAY@21:30")],
            chat_id: Some(5),
        });
        let dispatcher = dispatcher_for(store.clone());
        let installed = reconcile_active(&store, &dispatcher, Duration::minutes(5), 0)
            .await
            .unwrap();
        assert_eq!(installed, 2);
        let engine = dispatcher.engine().lock().await;
        assert_eq!(engine.job_count(), 2);
        assert!(engine.next_fire_time(&job_key(7, 1)).is_some());
    }

    #[tokio::test]
    async fn test_reconcile_skips_without_destination() {
        let store: Arc<dyn ReminderStore> = Arc::new(FixedStore {
            reminders: vec![reminder(1, "WEEKDAY@08:00")],
            chat_id: None,
        });
        let dispatcher = dispatcher_for(store.clone());
        let installed = reconcile_active(&store, &dispatcher, Duration::minutes(5), 0)
            .await
            .unwrap();
        assert_eq!(installed, 0);
        assert_eq!(dispatcher.engine().lock().await.job_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_survives_bad_schedule() {
        let store: Arc<dyn ReminderStore> = Arc::new(FixedStore {
            reminders: vec![reminder(1, "GARBAGE@xx"), reminder(2, "WEEKDAY@08:00")],
            chat_id: Some(5),
        });
        let dispatcher = dispatcher_for(store.clone());
        let installed = reconcile_active(&store, &dispatcher, Duration::minutes(5), 0)
            .await
            .unwrap();
        assert_eq!(installed, 1);
    }
}
