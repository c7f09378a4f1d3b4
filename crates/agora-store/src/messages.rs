//! Message and attachment persistence.
//!
//! Messages are append-only. [`Database::ingest_message`] writes a message
//! and its attachment rows as one unit; the globally unique external message
//! id is the deduplication key.

use agora_shared::{AttachmentId, FileType, MessageId, RoomId, WorkspaceId};
use chrono::SubsecRound;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attachment, Message, NewAttachment, NewMessage};
use crate::sql::{enum_col, id_col, like_pattern, not_found, ts_col, ts_text};

const MESSAGE_COLUMNS: &str = "id, workspace_id, room_id, sender_id, sender_name, body, \
     message_type, external_message_id, timestamp";

const ATTACHMENT_COLUMNS: &str = "id, workspace_id, message_id, file_name, blob_key, \
     content_type, file_type, file_size, blake3_hash";

/// Result of [`Database::ingest_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The message (and its attachments) were committed.
    Stored(Message),
    /// A message with the same external id already exists; nothing was
    /// written.
    Duplicate,
}

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert a message and its attachments in one transaction.
    ///
    /// A UNIQUE violation on `external_message_id` rolls the whole unit back
    /// and yields [`IngestOutcome::Duplicate`]. Any other failure (including a
    /// `room_id` that does not belong to `workspace_id`) rolls back and is
    /// returned as an error.
    pub fn ingest_message(
        &mut self,
        workspace_id: WorkspaceId,
        new: NewMessage,
        attachments: Vec<NewAttachment>,
    ) -> Result<IngestOutcome> {
        let tx = self.conn_mut().transaction()?;

        let message = Message {
            id: MessageId::new(),
            workspace_id,
            room_id: new.room_id,
            sender_id: new.sender_id,
            sender_name: new.sender_name,
            body: new.body,
            message_type: new.message_type,
            external_message_id: new.external_message_id,
            timestamp: new.timestamp.trunc_subsecs(6),
        };

        let inserted = tx.execute(
            "INSERT INTO messages (id, workspace_id, room_id, sender_id, sender_name, body,
                                   message_type, external_message_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                workspace_id.to_string(),
                message.room_id.to_string(),
                message.sender_id,
                message.sender_name,
                message.body,
                message.message_type.as_str(),
                message.external_message_id,
                ts_text(&message.timestamp),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                // Dropping the transaction rolls it back.
                drop(tx);
                tracing::debug!(
                    workspace = %workspace_id,
                    external_id = %message.external_message_id,
                    "duplicate message ignored"
                );
                return Ok(IngestOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        for attachment in attachments {
            let file_type = attachment
                .content_type
                .as_deref()
                .map(FileType::from_content_type)
                .unwrap_or(FileType::Document);

            tx.execute(
                "INSERT INTO attachments (id, workspace_id, message_id, file_name, blob_key,
                                          content_type, file_type, file_size, blake3_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    AttachmentId::new().to_string(),
                    workspace_id.to_string(),
                    message.id.to_string(),
                    attachment.file_name,
                    attachment.blob_key,
                    attachment.content_type,
                    file_type.as_str(),
                    attachment.file_size,
                    attachment.blake3_hash,
                ],
            )?;
        }

        tx.commit()?;

        tracing::debug!(
            workspace = %workspace_id,
            room = %message.room_id,
            message = %message.id,
            "stored message"
        );
        Ok(IngestOutcome::Stored(message))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Whether a message with this external id has already been ingested.
    ///
    /// Gateway message ids are unique across every workspace, matching the
    /// UNIQUE constraint that [`Database::ingest_message`] relies on.
    pub fn message_exists(&self, external_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM messages WHERE external_message_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_message(&self, workspace_id: WorkspaceId, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE workspace_id = ?1 AND id = ?2"
                ),
                params![workspace_id.to_string(), id.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// The most recent `limit` messages of a room, newest first.
    pub fn messages_for_room(
        &self,
        workspace_id: WorkspaceId,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE workspace_id = ?1 AND room_id = ?2
             ORDER BY timestamp DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![workspace_id.to_string(), room_id.to_string(), limit as i64],
            row_to_message,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Messages of the workspace whose body contains `keyword` (SQLite
    /// `LIKE`, so ASCII case-insensitive), newest first.
    pub fn search_messages(
        &self,
        workspace_id: WorkspaceId,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE workspace_id = ?1 AND body LIKE ?2 ESCAPE '\\'
             ORDER BY timestamp DESC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![workspace_id.to_string(), like_pattern(keyword), limit as i64],
            row_to_message,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    pub fn attachments_for_message(
        &self,
        workspace_id: WorkspaceId,
        message_id: MessageId,
    ) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments
             WHERE workspace_id = ?1 AND message_id = ?2
             ORDER BY rowid ASC"
        ))?;

        let rows = stmt.query_map(
            params![workspace_id.to_string(), message_id.to_string()],
            row_to_attachment,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: id_col(row, 0)?,
        workspace_id: id_col(row, 1)?,
        room_id: id_col(row, 2)?,
        sender_id: row.get(3)?,
        sender_name: row.get(4)?,
        body: row.get(5)?,
        message_type: enum_col(row, 6)?,
        external_message_id: row.get(7)?,
        timestamp: ts_col(row, 8)?,
    })
}

fn row_to_attachment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: id_col(row, 0)?,
        workspace_id: id_col(row, 1)?,
        message_id: id_col(row, 2)?,
        file_name: row.get(3)?,
        blob_key: row.get(4)?,
        content_type: row.get(5)?,
        file_type: enum_col(row, 6)?,
        file_size: row.get(7)?,
        blake3_hash: row.get(8)?,
    })
}
