//! Reminder Dispatcher — the runner body behind every reminder job.
//!
//! Stateless across invocations: the record is re-read by id on every
//! firing, because it may have been deactivated, rescheduled, or deleted
//! between scheduling and firing. Every failure inside `fire` is logged and
//! contained; nothing here can crash the engine or another job.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use minder_core::{Delivery, ReminderStore};

use crate::engine::{SchedulerEngine, job_key};
use crate::schedule::Schedule;

/// Glue invoked by the engine when a reminder job fires.
pub struct ReminderDispatcher {
    store: Arc<dyn ReminderStore>,
    delivery: Arc<dyn Delivery>,
    engine: Arc<Mutex<SchedulerEngine>>,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        delivery: Arc<dyn Delivery>,
        engine: Arc<Mutex<SchedulerEngine>>,
    ) -> Self {
        Self {
            store,
            delivery,
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<SchedulerEngine>> {
        &self.engine
    }

    /// Fire one reminder. Infallible: all errors are logged and swallowed
    /// so one reminder's trouble never touches another's schedule.
    pub async fn fire(&self, owner_id: i64, reminder_id: i64) {
        let key = job_key(owner_id, reminder_id);

        // 1. Re-read: the job should already be gone if someone deactivated
        //    the reminder, but guard against the race anyway.
        let reminder = match self.store.reminder(owner_id, reminder_id) {
            Ok(Some(r)) if r.active => r,
            Ok(_) => {
                tracing::warn!("🔕 '{}' fired but record is gone or inactive — skipping", key);
                self.engine.lock().await.remove(&key);
                return;
            }
            Err(e) => {
                tracing::error!("⚠️ '{}': failed to load record: {e}", key);
                return;
            }
        };

        let schedule = match Schedule::parse(&reminder.schedule) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("⚠️ '{}': stored schedule no longer parses: {e}", key);
                return;
            }
        };

        // 2. Deliver. Failure is logged and swallowed — a transient
        //    transport error must not stop a recurring reminder for good.
        match self.store.destination(owner_id) {
            Ok(Some(chat_id)) => {
                let text = format!("{}: {}", reminder.name, reminder.message);
                if let Err(e) = self.delivery.send(chat_id, &text).await {
                    tracing::warn!("📵 '{}': delivery failed: {e}", key);
                } else {
                    tracing::info!("📣 '{}' delivered: {}", key, reminder.name);
                }
            }
            Ok(None) => {
                tracing::warn!("📵 '{}': owner has no known destination", key);
            }
            Err(e) => {
                tracing::error!("⚠️ '{}': destination lookup failed: {e}", key);
            }
        }

        // 3-5. Bookkeeping. last_run_at records the attempt, delivered or
        //      not: "last attempted" is more useful than silence.
        let now = Utc::now();
        if schedule.is_once() {
            // Terminal transition: a fired one-shot never fires again.
            if let Err(e) = self.store.set_active(owner_id, reminder_id, false) {
                tracing::error!("⚠️ '{}': failed to deactivate one-shot: {e}", key);
            }
            self.engine.lock().await.remove(&key);
            if let Err(e) = self.store.set_run_times(reminder_id, Some(now), None) {
                tracing::error!("⚠️ '{}': failed to persist run times: {e}", key);
            }
        } else {
            let next = self.engine.lock().await.next_fire_time(&key);
            if let Err(e) = self.store.set_run_times(reminder_id, Some(now), next) {
                tracing::error!("⚠️ '{}': failed to persist run times: {e}", key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{Trigger, resolve_zone};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use minder_core::{MinderError, Reminder, Result};
    use std::sync::Mutex as StdMutex;

    struct FakeStore {
        reminders: StdMutex<Vec<Reminder>>,
        chat_id: Option<i64>,
        run_times: StdMutex<Vec<(i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>)>>,
    }

    impl FakeStore {
        fn with(reminders: Vec<Reminder>, chat_id: Option<i64>) -> Arc<Self> {
            Arc::new(Self {
                reminders: StdMutex::new(reminders),
                chat_id,
                run_times: StdMutex::new(Vec::new()),
            })
        }
    }

    impl ReminderStore for FakeStore {
        fn active_reminders(&self) -> Result<Vec<Reminder>> {
            Ok(self
                .reminders
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.active)
                .cloned()
                .collect())
        }

        fn reminder(&self, owner_id: i64, id: i64) -> Result<Option<Reminder>> {
            Ok(self
                .reminders
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.owner_id == owner_id && r.id == id)
                .cloned())
        }

        fn set_active(&self, owner_id: i64, id: i64, active: bool) -> Result<bool> {
            let mut reminders = self.reminders.lock().unwrap();
            match reminders
                .iter_mut()
                .find(|r| r.owner_id == owner_id && r.id == id)
            {
                Some(r) => {
                    r.active = active;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn set_run_times(
            &self,
            id: i64,
            last_run_at: Option<DateTime<Utc>>,
            next_run_at: Option<DateTime<Utc>>,
        ) -> Result<()> {
            self.run_times
                .lock()
                .unwrap()
                .push((id, last_run_at, next_run_at));
            Ok(())
        }

        fn destination(&self, _owner_id: i64) -> Result<Option<i64>> {
            Ok(self.chat_id)
        }
    }

    #[derive(Default)]
    struct FakeDelivery {
        sent: StdMutex<Vec<(i64, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Delivery for FakeDelivery {
        async fn send(&self, destination: i64, text: &str) -> Result<()> {
            if self.fail {
                return Err(MinderError::Channel("unreachable".into()));
            }
            self.sent.lock().unwrap().push((destination, text.into()));
            Ok(())
        }
    }

    fn reminder(id: i64, schedule: &str, active: bool) -> Reminder {
        let now = Utc::now();
        Reminder {
            id,
            owner_id: 7,
            name: "Sleep".into(),
            message: "time for bed".into(),
            schedule: schedule.into(),
            timezone: "UTC".into(),
            active,
            created_at: now,
            updated_at: now,
            last_run_at: None,
            next_run_at: None,
        }
    }

    fn setup(
        reminders: Vec<Reminder>,
        chat_id: Option<i64>,
        fail_delivery: bool,
    ) -> (Arc<FakeStore>, Arc<FakeDelivery>, ReminderDispatcher) {
        let store = FakeStore::with(reminders, chat_id);
        let delivery = Arc::new(FakeDelivery {
            sent: StdMutex::new(Vec::new()),
            fail: fail_delivery,
        });
        let engine = Arc::new(Mutex::new(SchedulerEngine::new()));
        let dispatcher =
            ReminderDispatcher::new(store.clone(), delivery.clone(), engine);
        (store, delivery, dispatcher)
    }

    fn noop_runner() -> crate::engine::JobRunner {
        Arc::new(|| Box::pin(async {}))
    }

    #[tokio::test]
    async fn test_fire_recurring_delivers_and_persists_next() {
        let (store, delivery, dispatcher) = setup(vec![reminder(1, "WEEKDAY@08:00", true)], Some(99), false);
        // a live job so next_fire_time has something to report
        let trigger = Trigger::build(
            &Schedule::parse("WEEKDAY@08:00").unwrap(),
            resolve_zone("UTC", 0),
        );
        dispatcher
            .engine()
            .lock()
            .await
            .upsert(&job_key(7, 1), trigger, Duration::minutes(5), noop_runner());

        dispatcher.fire(7, 1).await;

        let sent = delivery.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (99, "Sleep: time for bed".to_string()));
        let runs = store.run_times.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].1.is_some(), "last_run_at recorded");
        assert!(runs[0].2.is_some(), "next_run_at persisted for recurring");
        // still active
        assert!(store.reminder(7, 1).unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_fire_inactive_produces_no_delivery() {
        let (store, delivery, dispatcher) = setup(vec![reminder(1, "WEEKDAY@08:00", false)], Some(99), false);
        dispatcher.fire(7, 1).await;
        assert!(delivery.sent.lock().unwrap().is_empty());
        assert!(store.run_times.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fire_missing_record_is_noop() {
        let (store, delivery, dispatcher) = setup(vec![], Some(99), false);
        dispatcher.fire(7, 1).await;
        assert!(delivery.sent.lock().unwrap().is_empty());
        assert!(store.run_times.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fire_once_is_terminal() {
        let (store, delivery, dispatcher) = setup(vec![reminder(2, "ONCE@2026-01-20@09:00", true)], Some(99), false);
        let key = job_key(7, 2);
        dispatcher.engine().lock().await.upsert(
            &key,
            Trigger::Once {
                at: Utc::now() - Duration::minutes(1),
            },
            Duration::minutes(5),
            noop_runner(),
        );

        dispatcher.fire(7, 2).await;

        assert_eq!(delivery.sent.lock().unwrap().len(), 1);
        // deactivated, job removed, next cleared
        assert!(!store.reminder(7, 2).unwrap().unwrap().active);
        assert_eq!(dispatcher.engine().lock().await.next_fire_time(&key), None);
        assert_eq!(dispatcher.engine().lock().await.job_count(), 0);
        let runs = store.run_times.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].1.is_some());
        assert!(runs[0].2.is_none(), "one-shot clears next_run_at");
        // a second firing attempt does nothing — record is inactive now
        drop(runs);
        dispatcher.fire(7, 2).await;
        assert_eq!(delivery.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_still_updates_last_run() {
        let (store, delivery, dispatcher) = setup(vec![reminder(1, "WEEKDAY@08:00", true)], Some(99), true);
        dispatcher.fire(7, 1).await;
        assert!(delivery.sent.lock().unwrap().is_empty());
        let runs = store.run_times.lock().unwrap();
        assert_eq!(runs.len(), 1, "last_run_at updated even on delivery failure");
        assert!(runs[0].1.is_some());
        // still active — transient failures never cancel the schedule
        assert!(store.reminder(7, 1).unwrap().unwrap().active);
    }
}
