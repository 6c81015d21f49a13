//! Collaborator traits at the seams of the scheduling core.
//!
//! The dispatcher and reconciler only see these traits, so the core can be
//! exercised with in-memory fakes and the real backends swapped underneath.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::Reminder;

/// Storage collaborator for reminder records.
///
/// All methods are synchronous and self-contained per call: the SQLite
/// connection must never be held across an await point, because dispatcher
/// callbacks share it with the rest of the bot.
pub trait ReminderStore: Send + Sync {
    /// Every reminder with `active = true`, all owners.
    fn active_reminders(&self) -> Result<Vec<Reminder>>;

    /// Fetch one reminder, scoped to its owner.
    fn reminder(&self, owner_id: i64, id: i64) -> Result<Option<Reminder>>;

    /// Flip the active flag. Returns false when the id does not exist.
    fn set_active(&self, owner_id: i64, id: i64, active: bool) -> Result<bool>;

    /// Update the denormalized run-time bookkeeping.
    fn set_run_times(
        &self,
        id: i64,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// The owner's known delivery destination (chat id), if any.
    fn destination(&self, owner_id: i64) -> Result<Option<i64>>;
}

/// Message-delivery collaborator — sends a text to a destination.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send(&self, destination: i64, text: &str) -> Result<()>;
}
