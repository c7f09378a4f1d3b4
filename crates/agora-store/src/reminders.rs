//! Reminder persistence.
//!
//! Status moves one way (pending -> done | cancelled). The `notified` flag is
//! owned by the scheduler and flips false -> true at most once, through a
//! single conditional UPDATE.

use agora_shared::{ReminderId, ReminderStatus, WorkspaceId};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{NewReminder, Reminder};
use crate::sql::{enum_col, id_col, not_found, now_ts, ts_col, ts_text};

const REMINDER_COLUMNS: &str =
    "id, workspace_id, title, description, due_at, status, notified, created_at";

impl Database {
    pub fn create_reminder(
        &self,
        workspace_id: WorkspaceId,
        new: NewReminder,
    ) -> Result<Reminder> {
        let reminder = Reminder {
            id: ReminderId::new(),
            workspace_id,
            title: new.title,
            description: new.description,
            due_at: new.due_at.trunc_subsecs(6),
            status: ReminderStatus::Pending,
            notified: false,
            created_at: now_ts(),
        };

        self.conn().execute(
            "INSERT INTO reminders (id, workspace_id, title, description, due_at, status, notified, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                reminder.id.to_string(),
                workspace_id.to_string(),
                reminder.title,
                reminder.description,
                ts_text(&reminder.due_at),
                reminder.status.as_str(),
                ts_text(&reminder.created_at),
            ],
        )?;

        tracing::info!(
            workspace = %workspace_id,
            reminder = %reminder.id,
            due_at = %reminder.due_at,
            "created reminder"
        );
        Ok(reminder)
    }

    pub fn get_reminder(&self, workspace_id: WorkspaceId, id: ReminderId) -> Result<Reminder> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REMINDER_COLUMNS} FROM reminders WHERE workspace_id = ?1 AND id = ?2"
                ),
                params![workspace_id.to_string(), id.to_string()],
                row_to_reminder,
            )
            .map_err(not_found)
    }

    /// All reminders of a workspace, soonest due first.
    pub fn list_reminders(&self, workspace_id: WorkspaceId) -> Result<Vec<Reminder>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE workspace_id = ?1
             ORDER BY due_at ASC"
        ))?;

        let rows = stmt.query_map(params![workspace_id.to_string()], row_to_reminder)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Pending, not-yet-notified reminders due at or before `horizon`.
    pub fn due_reminders(
        &self,
        workspace_id: WorkspaceId,
        horizon: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE workspace_id = ?1
               AND status = 'pending'
               AND notified = 0
               AND due_at <= ?2
             ORDER BY due_at ASC"
        ))?;

        let rows = stmt.query_map(
            params![workspace_id.to_string(), ts_text(&horizon)],
            row_to_reminder,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Move a reminder out of `pending`. Terminal states cannot change.
    pub fn update_reminder_status(
        &mut self,
        workspace_id: WorkspaceId,
        id: ReminderId,
        status: ReminderStatus,
    ) -> Result<Reminder> {
        let tx = self.conn_mut().transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM reminders WHERE workspace_id = ?1 AND id = ?2",
                params![workspace_id.to_string(), id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let current: ReminderStatus = current.ok_or(StoreError::NotFound)?.parse()?;

        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current,
                to: status,
            });
        }

        tx.execute(
            "UPDATE reminders SET status = ?1 WHERE workspace_id = ?2 AND id = ?3",
            params![status.as_str(), workspace_id.to_string(), id.to_string()],
        )?;
        tx.commit()?;

        self.get_reminder(workspace_id, id)
    }

    /// Flip `notified` from false to true. Returns `true` only for the call
    /// that performed the flip.
    pub fn mark_reminder_notified(&self, workspace_id: WorkspaceId, id: ReminderId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE reminders SET notified = 1
             WHERE workspace_id = ?1 AND id = ?2 AND notified = 0",
            params![workspace_id.to_string(), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_reminder(&self, workspace_id: WorkspaceId, id: ReminderId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reminders WHERE workspace_id = ?1 AND id = ?2",
            params![workspace_id.to_string(), id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    Ok(Reminder {
        id: id_col(row, 0)?,
        workspace_id: id_col(row, 1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        due_at: ts_col(row, 4)?,
        status: enum_col(row, 5)?,
        notified: row.get::<_, i64>(6)? != 0,
        created_at: ts_col(row, 7)?,
    })
}
