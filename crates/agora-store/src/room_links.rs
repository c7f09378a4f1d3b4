//! The fan-out graph: explicit, administrator-created links between rooms of
//! one workspace.

use agora_shared::{LinkKind, RoomId, RoomLinkId, WorkspaceId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Room, RoomLink};
use crate::rooms::{row_to_room, ROOM_COLUMNS};
use crate::sql::{enum_col, id_col, now_ts, ts_col, ts_text};

const LINK_COLUMNS: &str = "id, workspace_id, source_room_id, target_room_id, kind, created_at";

impl Database {
    /// Link `source` to `target`. Both rooms must exist in `workspace_id`;
    /// self-links and duplicate edges are rejected.
    pub fn create_room_link(
        &mut self,
        workspace_id: WorkspaceId,
        source: RoomId,
        target: RoomId,
        kind: LinkKind,
    ) -> Result<RoomLink> {
        if source == target {
            return Err(StoreError::InvalidLink(
                "a room cannot be linked to itself".to_string(),
            ));
        }

        // Existence checks run inside the workspace scope, so a room of
        // another workspace reads as missing.
        self.get_room(workspace_id, source)?;
        self.get_room(workspace_id, target)?;

        let tx = self.conn_mut().transaction()?;

        let duplicate: Option<String> = tx
            .query_row(
                "SELECT id FROM room_links
                 WHERE workspace_id = ?1 AND source_room_id = ?2 AND target_room_id = ?3",
                params![workspace_id.to_string(), source.to_string(), target.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if duplicate.is_some() {
            return Err(StoreError::InvalidLink(format!(
                "{source} is already linked to {target}"
            )));
        }

        let link = RoomLink {
            id: RoomLinkId::new(),
            workspace_id,
            source_room_id: source,
            target_room_id: target,
            kind,
            created_at: now_ts(),
        };

        tx.execute(
            "INSERT INTO room_links (id, workspace_id, source_room_id, target_room_id, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.id.to_string(),
                workspace_id.to_string(),
                source.to_string(),
                target.to_string(),
                kind.as_str(),
                ts_text(&link.created_at),
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            workspace = %workspace_id,
            link = %link.id,
            source = %source,
            target = %target,
            kind = %kind,
            "created room link"
        );
        Ok(link)
    }

    /// Delete a link. Returns `true` if a row was deleted.
    pub fn delete_room_link(&self, workspace_id: WorkspaceId, id: RoomLinkId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM room_links WHERE workspace_id = ?1 AND id = ?2",
            params![workspace_id.to_string(), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn list_room_links(&self, workspace_id: WorkspaceId) -> Result<Vec<RoomLink>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {LINK_COLUMNS} FROM room_links
             WHERE workspace_id = ?1
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(params![workspace_id.to_string()], row_to_link)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Aggregate rooms one hop away from `room_id`: targets of its outgoing
    /// links, plus sources of incoming bidirectional links. Soft-deleted
    /// rooms and the room itself are excluded; each room appears once.
    pub fn linked_aggregate_targets(
        &self,
        workspace_id: WorkspaceId,
        room_id: RoomId,
    ) -> Result<Vec<Room>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms
             WHERE workspace_id = ?1
               AND kind = 'aggregate'
               AND deleted_at IS NULL
               AND id <> ?2
               AND id IN (
                   SELECT target_room_id FROM room_links
                   WHERE workspace_id = ?1 AND source_room_id = ?2
                   UNION
                   SELECT source_room_id FROM room_links
                   WHERE workspace_id = ?1 AND target_room_id = ?2 AND kind = 'bidirectional'
               )
             ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(
            params![workspace_id.to_string(), room_id.to_string()],
            row_to_room,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomLink> {
    Ok(RoomLink {
        id: id_col(row, 0)?,
        workspace_id: id_col(row, 1)?,
        source_room_id: id_col(row, 2)?,
        target_room_id: id_col(row, 3)?,
        kind: enum_col(row, 4)?,
        created_at: ts_col(row, 5)?,
    })
}
