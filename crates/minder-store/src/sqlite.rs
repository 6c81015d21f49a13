//! SQLite store for owners, reminders, tasks, and notes.
//!
//! Every method is a self-contained read or write on a `Mutex<Connection>`:
//! nothing holds the lock across an await point, because the dispatcher's
//! callbacks share this store with the command layer.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use minder_core::{MinderError, Note, Owner, Reminder, Result, Task, TaskStatus};

/// Outcome of marking a task done by its text.
#[derive(Debug, PartialEq, Eq)]
pub enum DoneByText {
    /// One pending task matched and was marked done.
    One(i64),
    /// Several pending tasks matched; nothing changed.
    Many(Vec<i64>),
    /// No pending task matched.
    None,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn storage_err(e: impl std::fmt::Display) -> MinderError {
    MinderError::Storage(e.to_string())
}

impl SqliteStore {
    /// Open or create the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::info!("🗄️ Database ready: {}", path.display());
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            -- The bot's owner(s); id is the Telegram user id.
            CREATE TABLE IF NOT EXISTS owners (
                id INTEGER PRIMARY KEY,
                chat_id INTEGER,
                name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                message TEXT NOT NULL,
                schedule TEXT NOT NULL,          -- raw grammar string
                timezone TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_run_at TEXT,
                next_run_at TEXT,                -- display hint only
                FOREIGN KEY(owner_id) REFERENCES owners(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_reminders_owner_active
                ON reminders(owner_id, active);

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                target_date TEXT NOT NULL,       -- YYYY-MM-DD
                text TEXT NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('pending','done','missed')),
                created_at TEXT NOT NULL,
                done_at TEXT,
                FOREIGN KEY(owner_id) REFERENCES owners(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_owner_date ON tasks(owner_id, target_date);
            CREATE INDEX IF NOT EXISTS idx_tasks_owner_status ON tasks(owner_id, status);

            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                noted_at TEXT NOT NULL,          -- RFC 3339
                text TEXT NOT NULL,
                FOREIGN KEY(owner_id) REFERENCES owners(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_notes_owner_date ON notes(owner_id, noted_at);
            ",
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(storage_err)
    }

    // ─── Owners ──────────────────────────────────────

    /// Create or refresh the owner record; records the chat id as the
    /// delivery destination.
    pub fn upsert_owner(&self, id: i64, chat_id: i64, name: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO owners (id, chat_id, name, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET chat_id = excluded.chat_id, name = excluded.name",
            params![id, chat_id, name, Utc::now().to_rfc3339()],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    pub fn owner(&self, id: i64) -> Result<Option<Owner>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, chat_id, name, created_at FROM owners WHERE id = ?1",
            params![id],
            |row| {
                Ok(Owner {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    name: row.get(2)?,
                    created_at: parse_ts(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(storage_err)
    }

    // ─── Reminders ──────────────────────────────────────

    pub fn create_reminder(
        &self,
        owner_id: i64,
        name: &str,
        message: &str,
        schedule: &str,
        timezone: &str,
    ) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO reminders (owner_id, name, message, schedule, timezone, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
            params![owner_id, name, message, schedule, timezone, now],
        )
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_reminders(&self, owner_id: i64, only_active: bool) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let sql = if only_active {
            "SELECT id, owner_id, name, message, schedule, timezone, active,
                    created_at, updated_at, last_run_at, next_run_at
             FROM reminders WHERE owner_id = ?1 AND active = 1 ORDER BY id"
        } else {
            "SELECT id, owner_id, name, message, schedule, timezone, active,
                    created_at, updated_at, last_run_at, next_run_at
             FROM reminders WHERE owner_id = ?1 ORDER BY id"
        };
        let mut stmt = conn.prepare(sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(params![owner_id], reminder_from_row)
            .map_err(storage_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Update a reminder's schedule string (and bump updated_at).
    pub fn update_reminder_schedule(&self, owner_id: i64, id: i64, schedule: &str) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE reminders SET schedule = ?1, updated_at = ?2
                 WHERE owner_id = ?3 AND id = ?4",
                params![schedule, Utc::now().to_rfc3339(), owner_id, id],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    pub fn delete_reminder(&self, owner_id: i64, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM reminders WHERE owner_id = ?1 AND id = ?2",
                params![owner_id, id],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    // ─── Tasks ──────────────────────────────────────

    pub fn add_task(&self, owner_id: i64, target_date: NaiveDate, text: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (owner_id, target_date, text, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![
                owner_id,
                target_date.format("%Y-%m-%d").to_string(),
                text,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn tasks_for_date(
        &self,
        owner_id: i64,
        date: NaiveDate,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let date = date.format("%Y-%m-%d").to_string();
        let mut out = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, owner_id, target_date, text, status, created_at, done_at
                         FROM tasks WHERE owner_id = ?1 AND target_date = ?2 AND status = ?3
                         ORDER BY id",
                    )
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(params![owner_id, date, s.as_str()], task_from_row)
                    .map_err(storage_err)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, owner_id, target_date, text, status, created_at, done_at
                         FROM tasks WHERE owner_id = ?1 AND target_date = ?2 ORDER BY id",
                    )
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(params![owner_id, date], task_from_row)
                    .map_err(storage_err)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(out)
    }

    pub fn mark_task_done(&self, owner_id: i64, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status = 'done', done_at = ?1
                 WHERE owner_id = ?2 AND id = ?3 AND status != 'done'",
                params![Utc::now().to_rfc3339(), owner_id, id],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Mark a pending task done by exact text match on the given day.
    pub fn mark_task_done_by_text(
        &self,
        owner_id: i64,
        date: NaiveDate,
        text: &str,
    ) -> Result<DoneByText> {
        let ids: Vec<i64> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM tasks
                     WHERE owner_id = ?1 AND target_date = ?2 AND status = 'pending'
                       AND lower(text) = lower(?3)
                     ORDER BY id",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(
                    params![owner_id, date.format("%Y-%m-%d").to_string(), text],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(storage_err)?;
            rows.filter_map(|r| r.ok()).collect()
        };

        match ids.as_slice() {
            [] => Ok(DoneByText::None),
            [id] => {
                self.mark_task_done(owner_id, *id)?;
                Ok(DoneByText::One(*id))
            }
            many => Ok(DoneByText::Many(many.to_vec())),
        }
    }

    /// Day close: every pending task for `date` becomes missed.
    /// Returns how many rows changed.
    pub fn mark_tasks_missed_for_date(&self, owner_id: i64, date: NaiveDate) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tasks SET status = 'missed'
             WHERE owner_id = ?1 AND target_date = ?2 AND status = 'pending'",
            params![owner_id, date.format("%Y-%m-%d").to_string()],
        )
        .map_err(storage_err)
    }

    pub fn delete_task(&self, owner_id: i64, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM tasks WHERE owner_id = ?1 AND id = ?2",
                params![owner_id, id],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    // ─── Notes ──────────────────────────────────────

    pub fn add_note(&self, owner_id: i64, noted_at: DateTime<Utc>, text: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notes (owner_id, noted_at, text) VALUES (?1, ?2, ?3)",
            params![owner_id, noted_at.to_rfc3339(), text],
        )
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn notes_for_day(&self, owner_id: i64, date: NaiveDate) -> Result<Vec<Note>> {
        let conn = self.lock()?;
        // noted_at is RFC 3339; filter by the YYYY-MM-DD prefix
        let mut stmt = conn
            .prepare(
                "SELECT id, owner_id, noted_at, text FROM notes
                 WHERE owner_id = ?1 AND substr(noted_at, 1, 10) = ?2 ORDER BY id",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                params![owner_id, date.format("%Y-%m-%d").to_string()],
                note_from_row,
            )
            .map_err(storage_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ─── Search ──────────────────────────────────────

    /// Case-insensitive substring search across tasks and notes.
    pub fn search(&self, owner_id: i64, term: &str) -> Result<(Vec<Task>, Vec<Note>)> {
        let conn = self.lock()?;
        let like = format!("%{}%", term.to_lowercase());

        let mut stmt = conn
            .prepare(
                "SELECT id, owner_id, target_date, text, status, created_at, done_at
                 FROM tasks WHERE owner_id = ?1 AND lower(text) LIKE ?2
                 ORDER BY id DESC LIMIT 20",
            )
            .map_err(storage_err)?;
        let tasks: Vec<Task> = stmt
            .query_map(params![owner_id, like], task_from_row)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = conn
            .prepare(
                "SELECT id, owner_id, noted_at, text FROM notes
                 WHERE owner_id = ?1 AND lower(text) LIKE ?2
                 ORDER BY id DESC LIMIT 20",
            )
            .map_err(storage_err)?;
        let notes: Vec<Note> = stmt
            .query_map(params![owner_id, like], note_from_row)
            .map_err(storage_err)?
            .filter_map(|r| r.ok())
            .collect();

        Ok((tasks, notes))
    }
}

// ─── Scheduling-core collaborator ──────────────────────────────

impl minder_core::ReminderStore for SqliteStore {
    fn active_reminders(&self) -> Result<Vec<Reminder>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, owner_id, name, message, schedule, timezone, active,
                        created_at, updated_at, last_run_at, next_run_at
                 FROM reminders WHERE active = 1 ORDER BY id",
            )
            .map_err(storage_err)?;
        let rows = stmt.query_map([], reminder_from_row).map_err(storage_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn reminder(&self, owner_id: i64, id: i64) -> Result<Option<Reminder>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, owner_id, name, message, schedule, timezone, active,
                    created_at, updated_at, last_run_at, next_run_at
             FROM reminders WHERE owner_id = ?1 AND id = ?2",
            params![owner_id, id],
            reminder_from_row,
        )
        .optional()
        .map_err(storage_err)
    }

    fn set_active(&self, owner_id: i64, id: i64, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE reminders SET active = ?1, updated_at = ?2
                 WHERE owner_id = ?3 AND id = ?4",
                params![active as i32, Utc::now().to_rfc3339(), owner_id, id],
            )
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    fn set_run_times(
        &self,
        id: i64,
        last_run_at: Option<DateTime<Utc>>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE reminders SET last_run_at = ?1, next_run_at = ?2 WHERE id = ?3",
            params![
                last_run_at.map(|t| t.to_rfc3339()),
                next_run_at.map(|t| t.to_rfc3339()),
                id
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn destination(&self, owner_id: i64) -> Result<Option<i64>> {
        Ok(self.owner(owner_id)?.and_then(|o| o.chat_id))
    }
}

// ─── Row mapping ──────────────────────────────────────

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn reminder_from_row(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    Ok(Reminder {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        message: row.get(3)?,
        schedule: row.get(4)?,
        timezone: row.get(5)?,
        active: row.get::<_, i32>(6)? != 0,
        created_at: parse_ts(&row.get::<_, String>(7)?),
        updated_at: parse_ts(&row.get::<_, String>(8)?),
        last_run_at: parse_opt_ts(row.get(9)?),
        next_run_at: parse_opt_ts(row.get(10)?),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let date: String = row.get(2)?;
    let status: String = row.get(4)?;
    Ok(Task {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        target_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .unwrap_or_else(|_| Utc::now().date_naive()),
        text: row.get(3)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        created_at: parse_ts(&row.get::<_, String>(5)?),
        done_at: parse_opt_ts(row.get(6)?),
    })
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        noted_at: parse_ts(&row.get::<_, String>(2)?),
        text: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use minder_core::ReminderStore;

    fn temp_store(name: &str) -> (SqliteStore, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("minder-store-test-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        (SqliteStore::open(&path).unwrap(), dir)
    }

    #[test]
    fn test_owner_roundtrip() {
        let (store, dir) = temp_store("owner");
        assert!(store.owner(7).unwrap().is_none());
        store.upsert_owner(7, 99, "Ada").unwrap();
        let owner = store.owner(7).unwrap().unwrap();
        assert_eq!(owner.chat_id, Some(99));
        assert_eq!(owner.name.as_deref(), Some("Ada"));
        assert_eq!(store.destination(7).unwrap(), Some(99));
        // chat moves with the owner
        store.upsert_owner(7, 100, "Ada").unwrap();
        assert_eq!(store.destination(7).unwrap(), Some(100));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_reminder_crud_and_run_times() {
        let (store, dir) = temp_store("reminder");
        store.upsert_owner(7, 99, "Ada").unwrap();
        let id = store
            .create_reminder(7, "Sleep", "go to bed", "WEEKDAY@23:00", "UTC")
            .unwrap();

        let r = store.reminder(7, id).unwrap().unwrap();
        assert!(r.active);
        assert_eq!(r.schedule, "WEEKDAY@23:00");
        assert!(r.last_run_at.is_none());

        let now = Utc::now();
        store.set_run_times(id, Some(now), None).unwrap();
        let r = store.reminder(7, id).unwrap().unwrap();
        assert!(r.last_run_at.is_some());
        assert!(r.next_run_at.is_none());

        assert!(store.set_active(7, id, false).unwrap());
        assert!(store.active_reminders().unwrap().is_empty());
        assert_eq!(store.list_reminders(7, false).unwrap().len(), 1);
        assert!(store.delete_reminder(7, id).unwrap());
        assert!(!store.delete_reminder(7, id).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_active_reminders_filters() {
        let (store, dir) = temp_store("active");
        store.upsert_owner(7, 99, "Ada").unwrap();
        let a = store
            .create_reminder(7, "A", "a", "EVERYDAY@08:00", "UTC")
            .unwrap();
        let b = store
            .create_reminder(7, "B", "b", "WEEKEND@10:00", "UTC")
            .unwrap();
        store.set_active(7, b, false).unwrap();
        let active = store.active_reminders().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_task_lifecycle() {
        let (store, dir) = temp_store("tasks");
        store.upsert_owner(7, 99, "Ada").unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();

        let t1 = store.add_task(7, today, "study an hour").unwrap();
        store.add_task(7, today, "pay the bill").unwrap();

        assert_eq!(store.tasks_for_date(7, today, None).unwrap().len(), 2);
        assert!(store.mark_task_done(7, t1).unwrap());
        assert!(!store.mark_task_done(7, t1).unwrap(), "already done");

        let pending = store
            .tasks_for_date(7, today, Some(TaskStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].text, "pay the bill");

        // close of day: pending -> missed
        let missed = store.mark_tasks_missed_for_date(7, today).unwrap();
        assert_eq!(missed, 1);
        assert_eq!(
            store
                .tasks_for_date(7, today, Some(TaskStatus::Missed))
                .unwrap()
                .len(),
            1
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_done_by_text() {
        let (store, dir) = temp_store("donebytext");
        store.upsert_owner(7, 99, "Ada").unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
        store.add_task(7, today, "Walk").unwrap();

        assert_eq!(
            store.mark_task_done_by_text(7, today, "nothing").unwrap(),
            DoneByText::None
        );
        assert!(matches!(
            store.mark_task_done_by_text(7, today, "walk").unwrap(),
            DoneByText::One(_)
        ));

        store.add_task(7, today, "read").unwrap();
        store.add_task(7, today, "Read").unwrap();
        assert!(matches!(
            store.mark_task_done_by_text(7, today, "read").unwrap(),
            DoneByText::Many(ids) if ids.len() == 2
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_notes_and_search() {
        let (store, dir) = temp_store("notes");
        store.upsert_owner(7, 99, "Ada").unwrap();
        let today = Utc::now();
        store.add_note(7, today, "a thought about rust").unwrap();
        store
            .add_task(7, today.date_naive(), "write rust code")
            .unwrap();

        let notes = store.notes_for_day(7, today.date_naive()).unwrap();
        assert_eq!(notes.len(), 1);

        let (tasks, notes) = store.search(7, "RUST").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(notes.len(), 1);
        let (tasks, notes) = store.search(7, "python").unwrap();
        assert!(tasks.is_empty() && notes.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
