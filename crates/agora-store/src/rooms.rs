//! CRUD operations for [`Room`] records. Every query is scoped by workspace.

use agora_shared::{RoomId, RoomKind, WorkspaceId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Room;
use crate::sql::{enum_col, id_col, json_col, not_found, now_ts, opt_ts_col, ts_col, ts_text};

pub(crate) const ROOM_COLUMNS: &str =
    "id, workspace_id, external_id, name, kind, ai_config, created_at, deleted_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Look up the room for a platform channel inside `workspace_id`,
    /// creating it as a standard room on first sight. An existing record is
    /// returned unchanged.
    pub fn ensure_room(
        &mut self,
        workspace_id: WorkspaceId,
        external_id: &str,
        name: &str,
    ) -> Result<Room> {
        let tx = self.conn_mut().transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {ROOM_COLUMNS} FROM rooms
                     WHERE workspace_id = ?1 AND external_id = ?2"
                ),
                params![workspace_id.to_string(), external_id],
                row_to_room,
            )
            .optional()?;

        if let Some(room) = existing {
            return Ok(room);
        }

        let room = Room {
            id: RoomId::new(),
            workspace_id,
            external_id: external_id.to_string(),
            name: name.to_string(),
            kind: RoomKind::Standard,
            ai_config: None,
            created_at: now_ts(),
            deleted_at: None,
        };

        tx.execute(
            "INSERT INTO rooms (id, workspace_id, external_id, name, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                room.id.to_string(),
                workspace_id.to_string(),
                room.external_id,
                room.name,
                room.kind.as_str(),
                ts_text(&room.created_at),
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            workspace = %workspace_id,
            room = %room.id,
            external_id = %room.external_id,
            "created room"
        );
        Ok(room)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_room(&self, workspace_id: WorkspaceId, id: RoomId) -> Result<Room> {
        self.conn()
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE workspace_id = ?1 AND id = ?2"),
                params![workspace_id.to_string(), id.to_string()],
                row_to_room,
            )
            .map_err(not_found)
    }

    pub fn get_room_by_external_id(
        &self,
        workspace_id: WorkspaceId,
        external_id: &str,
    ) -> Result<Room> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {ROOM_COLUMNS} FROM rooms
                     WHERE workspace_id = ?1 AND external_id = ?2"
                ),
                params![workspace_id.to_string(), external_id],
                row_to_room,
            )
            .map_err(not_found)
    }

    /// List every room of a workspace, including soft-deleted ones, by name.
    pub fn list_rooms(&self, workspace_id: WorkspaceId) -> Result<Vec<Room>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms
             WHERE workspace_id = ?1
             ORDER BY name ASC"
        ))?;

        let rows = stmt.query_map(params![workspace_id.to_string()], row_to_room)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Active aggregate rooms of a workspace, oldest first.
    pub fn list_aggregate_rooms(&self, workspace_id: WorkspaceId) -> Result<Vec<Room>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms
             WHERE workspace_id = ?1 AND kind = 'aggregate' AND deleted_at IS NULL
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(params![workspace_id.to_string()], row_to_room)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename a room in place (last writer wins). Returns `true` if a row
    /// changed.
    pub fn rename_room(
        &self,
        workspace_id: WorkspaceId,
        external_id: &str,
        name: &str,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE rooms SET name = ?1 WHERE workspace_id = ?2 AND external_id = ?3",
            params![name, workspace_id.to_string(), external_id],
        )?;
        Ok(affected > 0)
    }

    /// Mark a room deleted. The row stays so existing messages keep their
    /// room; a second call keeps the original timestamp.
    pub fn soft_delete_room(&self, workspace_id: WorkspaceId, external_id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE rooms SET deleted_at = ?1
             WHERE workspace_id = ?2 AND external_id = ?3 AND deleted_at IS NULL",
            params![ts_text(&now_ts()), workspace_id.to_string(), external_id],
        )?;
        Ok(affected > 0)
    }

    pub fn set_room_kind(
        &self,
        workspace_id: WorkspaceId,
        id: RoomId,
        kind: RoomKind,
    ) -> Result<Room> {
        let affected = self.conn().execute(
            "UPDATE rooms SET kind = ?1 WHERE workspace_id = ?2 AND id = ?3",
            params![kind.as_str(), workspace_id.to_string(), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_room(workspace_id, id)
    }

    pub fn set_room_ai_config(
        &self,
        workspace_id: WorkspaceId,
        id: RoomId,
        ai_config: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let encoded = ai_config.map(serde_json::to_string).transpose()?;
        let affected = self.conn().execute(
            "UPDATE rooms SET ai_config = ?1 WHERE workspace_id = ?2 AND id = ?3",
            params![encoded, workspace_id.to_string(), id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` selected with [`ROOM_COLUMNS`] to a [`Room`].
pub(crate) fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: id_col(row, 0)?,
        workspace_id: id_col(row, 1)?,
        external_id: row.get(2)?,
        name: row.get(3)?,
        kind: enum_col(row, 4)?,
        ai_config: json_col(row, 5)?,
        created_at: ts_col(row, 6)?,
        deleted_at: opt_ts_col(row, 7)?,
    })
}
