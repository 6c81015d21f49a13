//! Persisted record types — the data model shared by storage, the command
//! layer, and the scheduling core.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The bot's single owner. `chat_id` is the delivery destination; it stays
/// unknown until the owner has issued /start at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    /// Telegram user id.
    pub id: i64,
    pub chat_id: Option<i64>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted reminder record.
///
/// `last_run_at`/`next_run_at` are denormalized display hints; the engine's
/// live trigger is authoritative for when the reminder actually fires next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    /// Text delivered when the reminder fires.
    pub message: String,
    /// Raw schedule grammar string, e.g. "WEEKDAY@08:00".
    pub schedule: String,
    /// IANA zone name the schedule is interpreted in.
    pub timezone: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// A task for a specific day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub owner_id: i64,
    pub target_date: NaiveDate,
    pub text: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
}

/// Task lifecycle: pending until done, or missed once its day closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Done,
    Missed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Done => "done",
            TaskStatus::Missed => "missed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "done" => Some(TaskStatus::Done),
            "missed" => Some(TaskStatus::Missed),
            _ => None,
        }
    }
}

/// A free-form timestamped note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub owner_id: i64,
    pub noted_at: DateTime<Utc>,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_roundtrip() {
        for status in [TaskStatus::Pending, TaskStatus::Done, TaskStatus::Missed] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }
}
