//! Owner command layer — routes incoming Telegram messages to storage and
//! the scheduler. Single-owner bot: anyone else's messages are ignored.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};

use minder_channels::{IncomingMessage, TelegramSender};
use minder_core::{ReminderStore, Result, Task, TaskStatus};
use minder_scheduler::{
    ReminderDispatcher, ResolvedZone, Schedule, install_reminder, job_key, reconcile_active,
};
use minder_store::SqliteStore;
use minder_store::sqlite::DoneByText;

const USAGE: &str = "⏰ Minder — reminders, tasks, and notes

Reminders:
  /rem_add SCHEDULE NAME | MESSAGE
  /rem_list   /rem_on ID   /rem_off ID   /rem_del ID   /rem_test

Schedules: WEEKDAY@HH:MM  WEEKEND@HH:MM  EVERYDAY@HH:MM
  DAYS@mon,wed,fri@HH:MM  ONCE@YYYY-MM-DD@HH:MM

Tasks:
  todo: text          task for today
  tomorrow: text      task for tomorrow
  task: DATE | text   task for a specific day
  done #ID   done: text   delete #ID
  today   pending   done today   missed today

Notes:
  note: text
  search: term";

/// Everything a command needs: config values, storage, scheduler, channel.
pub struct CommandContext {
    pub owner_user_id: i64,
    pub timezone: String,
    pub zone: ResolvedZone,
    pub fallback_offset_hours: i32,
    pub misfire_grace: Duration,
    pub store: Arc<SqliteStore>,
    pub store_dyn: Arc<dyn ReminderStore>,
    pub dispatcher: Arc<ReminderDispatcher>,
    pub sender: TelegramSender,
}

impl CommandContext {
    /// Handle one incoming message end to end: authorize, parse, execute,
    /// reply. Never returns an error — every failure becomes a reply or a
    /// log line.
    pub async fn handle(&self, msg: IncomingMessage) {
        if msg.sender_id != self.owner_user_id {
            tracing::debug!("🚷 Ignoring message from non-owner {}", msg.sender_id);
            return;
        }

        let reply = match Command::parse(&msg.text) {
            Ok(cmd) => match self.execute(cmd, &msg).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("⚠️ Command failed: {e}");
                    format!("⚠️ {e}")
                }
            },
            Err(usage) => usage,
        };

        if let Err(e) = self.sender.send_message(msg.chat_id, &reply).await {
            tracing::warn!("📵 Reply failed: {e}");
        }
    }

    async fn execute(&self, cmd: Command, msg: &IncomingMessage) -> Result<String> {
        let today = self.zone.local_date(Utc::now());
        match cmd {
            Command::Start => self.start(msg).await,
            Command::Help => Ok(USAGE.to_string()),

            Command::RemAdd {
                schedule,
                name,
                message,
            } => self.rem_add(&schedule, &name, &message).await,
            Command::RemList => self.rem_list().await,
            Command::RemOn(id) => self.rem_on(id).await,
            Command::RemOff(id) => self.rem_off(id).await,
            Command::RemDel(id) => self.rem_del(id).await,
            Command::RemTest => self.rem_test().await,

            Command::TaskAdd { when, text } => {
                let date = match when {
                    DateTarget::Today => today,
                    DateTarget::Tomorrow => today
                        .succ_opt()
                        .ok_or_else(|| minder_core::MinderError::Schedule("date overflow".into()))?,
                    DateTarget::On(d) => d,
                };
                let id = self.store.add_task(self.owner_user_id, date, &text)?;
                Ok(format!("📝 Task #{id} for {date}: {text}"))
            }
            Command::TaskDoneId(id) => {
                if self.store.mark_task_done(self.owner_user_id, id)? {
                    Ok(format!("✅ Task #{id} done"))
                } else {
                    Ok(format!("No open task #{id}"))
                }
            }
            Command::TaskDoneText(text) => {
                match self
                    .store
                    .mark_task_done_by_text(self.owner_user_id, today, &text)?
                {
                    DoneByText::One(id) => Ok(format!("✅ Task #{id} done")),
                    DoneByText::Many(ids) => Ok(format!(
                        "Several tasks match — use done #ID: {}",
                        ids.iter()
                            .map(|id| format!("#{id}"))
                            .collect::<Vec<_>>()
                            .join(" ")
                    )),
                    DoneByText::None => Ok(format!("No pending task today matches '{text}'")),
                }
            }
            Command::TaskDelete(id) => {
                if self.store.delete_task(self.owner_user_id, id)? {
                    Ok(format!("🗑️ Task #{id} deleted"))
                } else {
                    Ok(format!("No task #{id}"))
                }
            }
            Command::ShowToday => self.show_today(today),
            Command::ShowTasks(status) => {
                let tasks = self
                    .store
                    .tasks_for_date(self.owner_user_id, today, Some(status))?;
                if tasks.is_empty() {
                    Ok(format!("No {} tasks today", status.as_str()))
                } else {
                    Ok(tasks.iter().map(format_task).collect::<Vec<_>>().join("\n"))
                }
            }

            Command::NoteAdd(text) => {
                self.store.add_note(self.owner_user_id, Utc::now(), &text)?;
                Ok("🗒️ Noted".to_string())
            }
            Command::Search(term) => {
                let (tasks, notes) = self.store.search(self.owner_user_id, &term)?;
                if tasks.is_empty() && notes.is_empty() {
                    return Ok(format!("Nothing found for '{term}'"));
                }
                let mut out = Vec::new();
                if !tasks.is_empty() {
                    out.push("Tasks:".to_string());
                    out.extend(tasks.iter().map(|t| format!("{} ({})", format_task(t), t.target_date)));
                }
                if !notes.is_empty() {
                    out.push("Notes:".to_string());
                    out.extend(
                        notes
                            .iter()
                            .map(|n| format!("  🗒️ {} ({})", n.text, self.zone.local_date(n.noted_at))),
                    );
                }
                Ok(out.join("\n"))
            }
        }
    }

    // ─── Reminders ──────────────────────────────────────

    async fn start(&self, msg: &IncomingMessage) -> Result<String> {
        self.store
            .upsert_owner(self.owner_user_id, msg.chat_id, &msg.sender_name)?;
        // The chat just became a known destination: reminders skipped at
        // boot can be scheduled now.
        let installed = reconcile_active(
            &self.store_dyn,
            &self.dispatcher,
            self.misfire_grace,
            self.fallback_offset_hours,
        )
        .await?;
        tracing::info!("👋 Owner registered, {} reminder job(s) live", installed);
        Ok(format!("{USAGE}\n\n🔔 {installed} reminder(s) scheduled"))
    }

    async fn rem_add(&self, schedule_str: &str, name: &str, message: &str) -> Result<String> {
        // Syntax errors go back to the owner verbatim; the parser's
        // messages already list the supported forms.
        let schedule = match Schedule::parse(schedule_str) {
            Ok(s) => s,
            Err(e) => return Ok(format!("{e}")),
        };
        let id = self.store.create_reminder(
            self.owner_user_id,
            name,
            message,
            &schedule.to_string(),
            &self.timezone,
        )?;
        self.install(id).await?;
        let next = self.next_fire_text(id).await;
        Ok(format!("📅 Reminder #{id} '{name}' — {schedule}{next}"))
    }

    async fn rem_list(&self) -> Result<String> {
        let reminders = self.store.list_reminders(self.owner_user_id, false)?;
        if reminders.is_empty() {
            return Ok("No reminders yet. Add one with /rem_add".to_string());
        }
        let mut lines = Vec::with_capacity(reminders.len());
        for r in &reminders {
            let icon = if r.active { "🔔" } else { "💤" };
            let next = if r.active {
                self.next_fire_text(r.id).await
            } else {
                String::new()
            };
            lines.push(format!("{icon} #{} {} — {}{next}", r.id, r.name, r.schedule));
        }
        Ok(lines.join("\n"))
    }

    async fn rem_on(&self, id: i64) -> Result<String> {
        if !self.store.set_active(self.owner_user_id, id, true)? {
            return Ok(format!("No reminder #{id}"));
        }
        self.install(id).await?;
        Ok(format!("🔔 Reminder #{id} on{}", self.next_fire_text(id).await))
    }

    async fn rem_off(&self, id: i64) -> Result<String> {
        if !self.store.set_active(self.owner_user_id, id, false)? {
            return Ok(format!("No reminder #{id}"));
        }
        self.dispatcher
            .engine()
            .lock()
            .await
            .remove(&job_key(self.owner_user_id, id));
        Ok(format!("💤 Reminder #{id} off"))
    }

    async fn rem_del(&self, id: i64) -> Result<String> {
        self.dispatcher
            .engine()
            .lock()
            .await
            .remove(&job_key(self.owner_user_id, id));
        if self.store.delete_reminder(self.owner_user_id, id)? {
            Ok(format!("🗑️ Reminder #{id} deleted"))
        } else {
            Ok(format!("No reminder #{id}"))
        }
    }

    async fn rem_test(&self) -> Result<String> {
        let local = self.zone.local_datetime(Utc::now() + Duration::minutes(2));
        let schedule = format!(
            "ONCE@{}@{}",
            local.format("%Y-%m-%d"),
            local.format("%H:%M")
        );
        let id = self.store.create_reminder(
            self.owner_user_id,
            "Test",
            "it works",
            &schedule,
            &self.timezone,
        )?;
        self.install(id).await?;
        Ok(format!(
            "🧪 Test reminder #{id} set for {}",
            local.format("%H:%M")
        ))
    }

    /// Re-read the record and install its engine job.
    async fn install(&self, id: i64) -> Result<()> {
        if let Some(reminder) = self.store_dyn.reminder(self.owner_user_id, id)? {
            install_reminder(
                &self.dispatcher,
                &reminder,
                self.misfire_grace,
                self.fallback_offset_hours,
            )
            .await?;
        }
        Ok(())
    }

    async fn next_fire_text(&self, id: i64) -> String {
        let key = job_key(self.owner_user_id, id);
        match self.dispatcher.engine().lock().await.next_fire_time(&key) {
            Some(at) => format!(
                " (next: {})",
                self.zone.local_datetime(at).format("%a %Y-%m-%d %H:%M")
            ),
            None => String::new(),
        }
    }

    // ─── Tasks and notes ──────────────────────────────────────

    fn show_today(&self, today: NaiveDate) -> Result<String> {
        let tasks = self.store.tasks_for_date(self.owner_user_id, today, None)?;
        let notes = self.store.notes_for_day(self.owner_user_id, today)?;
        if tasks.is_empty() && notes.is_empty() {
            return Ok(format!("Nothing for {today} yet"));
        }
        let mut out = vec![format!("📆 {today}")];
        out.extend(tasks.iter().map(format_task));
        out.extend(notes.iter().map(|n| format!("  🗒️ {}", n.text)));
        Ok(out.join("\n"))
    }

    /// End-of-day job body: close the owner's day in their own timezone.
    pub async fn close_day(&self) {
        let today = self.zone.local_date(Utc::now());
        let missed = match self
            .store
            .mark_tasks_missed_for_date(self.owner_user_id, today)
        {
            Ok(n) => n,
            Err(e) => {
                tracing::error!("⚠️ Day close failed: {e}");
                return;
            }
        };
        tracing::info!("🌙 Day {} closed, {} task(s) missed", today, missed);

        let chat_id = match self.store.destination(self.owner_user_id) {
            Ok(Some(chat_id)) => chat_id,
            _ => return,
        };
        let text = if missed == 0 {
            format!("🌙 {today} closed — all tasks handled.")
        } else {
            format!("🌙 {today} closed — {missed} task(s) missed.")
        };
        if let Err(e) = self.sender.send_message(chat_id, &text).await {
            tracing::warn!("📵 Day-close notification failed: {e}");
        }
    }
}

fn format_task(t: &Task) -> String {
    let icon = match t.status {
        TaskStatus::Pending => "⬜",
        TaskStatus::Done => "✅",
        TaskStatus::Missed => "❌",
    };
    format!("  {icon} #{} {}", t.id, t.text)
}

// ─── Parsing ──────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum DateTarget {
    Today,
    Tomorrow,
    On(NaiveDate),
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Start,
    Help,
    RemAdd {
        schedule: String,
        name: String,
        message: String,
    },
    RemList,
    RemOn(i64),
    RemOff(i64),
    RemDel(i64),
    RemTest,
    TaskAdd {
        when: DateTarget,
        text: String,
    },
    TaskDoneId(i64),
    TaskDoneText(String),
    TaskDelete(i64),
    ShowToday,
    ShowTasks(TaskStatus),
    NoteAdd(String),
    Search(String),
}

/// Case-insensitive prefix strip that preserves the payload's case.
fn after<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(text[prefix.len()..].trim())
    } else {
        None
    }
}

fn parse_id(rest: &str, usage: &str) -> std::result::Result<i64, String> {
    rest.trim()
        .trim_start_matches('#')
        .parse::<i64>()
        .map_err(|_| usage.to_string())
}

impl Command {
    /// Parse owner input. `Err` carries the reply text (usage help).
    fn parse(text: &str) -> std::result::Result<Command, String> {
        let text = text.trim();
        match text.to_lowercase().as_str() {
            "/start" => return Ok(Command::Start),
            "/help" | "help" => return Ok(Command::Help),
            "/rem_list" => return Ok(Command::RemList),
            "/rem_test" => return Ok(Command::RemTest),
            "today" => return Ok(Command::ShowToday),
            "pending" => return Ok(Command::ShowTasks(TaskStatus::Pending)),
            "done today" => return Ok(Command::ShowTasks(TaskStatus::Done)),
            "missed today" => return Ok(Command::ShowTasks(TaskStatus::Missed)),
            _ => {}
        }

        if let Some(rest) = after(text, "/rem_add") {
            return Self::parse_rem_add(rest);
        }
        if let Some(rest) = after(text, "/rem_on") {
            return parse_id(rest, "Usage: /rem_on ID").map(Command::RemOn);
        }
        if let Some(rest) = after(text, "/rem_off") {
            return parse_id(rest, "Usage: /rem_off ID").map(Command::RemOff);
        }
        if let Some(rest) = after(text, "/rem_del") {
            return parse_id(rest, "Usage: /rem_del ID").map(Command::RemDel);
        }

        if let Some(rest) = after(text, "todo:") {
            if rest.is_empty() {
                return Err("Usage: todo: text".into());
            }
            return Ok(Command::TaskAdd {
                when: DateTarget::Today,
                text: rest.to_string(),
            });
        }
        if let Some(rest) = after(text, "tomorrow:") {
            if rest.is_empty() {
                return Err("Usage: tomorrow: text".into());
            }
            return Ok(Command::TaskAdd {
                when: DateTarget::Tomorrow,
                text: rest.to_string(),
            });
        }
        if let Some(rest) = after(text, "task:") {
            let (date, task) = rest
                .split_once('|')
                .ok_or_else(|| "Usage: task: YYYY-MM-DD | text".to_string())?;
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                .map_err(|_| "Bad date. Usage: task: YYYY-MM-DD | text".to_string())?;
            let task = task.trim();
            if task.is_empty() {
                return Err("Usage: task: YYYY-MM-DD | text".into());
            }
            return Ok(Command::TaskAdd {
                when: DateTarget::On(date),
                text: task.to_string(),
            });
        }
        if let Some(rest) = after(text, "done #") {
            return parse_id(rest, "Usage: done #ID").map(Command::TaskDoneId);
        }
        if let Some(rest) = after(text, "done:") {
            if rest.is_empty() {
                return Err("Usage: done: text".into());
            }
            return Ok(Command::TaskDoneText(rest.to_string()));
        }
        if let Some(rest) = after(text, "delete #") {
            return parse_id(rest, "Usage: delete #ID").map(Command::TaskDelete);
        }
        if let Some(rest) = after(text, "note:") {
            if rest.is_empty() {
                return Err("Usage: note: text".into());
            }
            return Ok(Command::NoteAdd(rest.to_string()));
        }
        if let Some(rest) = after(text, "search:") {
            if rest.is_empty() {
                return Err("Usage: search: term".into());
            }
            return Ok(Command::Search(rest.to_string()));
        }

        Err(USAGE.to_string())
    }

    fn parse_rem_add(rest: &str) -> std::result::Result<Command, String> {
        const USAGE_ADD: &str = "Usage: /rem_add SCHEDULE NAME | MESSAGE";
        let (schedule, remainder) = rest.split_once(char::is_whitespace).ok_or(USAGE_ADD)?;
        let (name, message) = match remainder.split_once('|') {
            Some((n, m)) => (n.trim(), m.trim()),
            None => (remainder.trim(), remainder.trim()),
        };
        if schedule.is_empty() || name.is_empty() {
            return Err(USAGE_ADD.into());
        }
        let message = if message.is_empty() { name } else { message };
        Ok(Command::RemAdd {
            schedule: schedule.to_string(),
            name: name.to_string(),
            message: message.to_string(),
        })
    }
}
