//! CRUD operations for [`Workspace`] records.
//!
//! Workspaces are the only records looked up without a tenant scope: they
//! *are* the scope.

use agora_shared::WorkspaceId;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::Workspace;
use crate::sql::{id_col, json_col, not_found, now_ts, ts_col, ts_text};

const WORKSPACE_COLUMNS: &str = "id, external_id, name, ai_config, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Look up the workspace for a platform group, creating it on first
    /// sight. An existing record is returned unchanged.
    pub fn ensure_workspace(&mut self, external_id: &str, name: &str) -> Result<Workspace> {
        let tx = self.conn_mut().transaction()?;

        let existing = tx
            .query_row(
                &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE external_id = ?1"),
                params![external_id],
                row_to_workspace,
            )
            .optional()?;

        if let Some(workspace) = existing {
            return Ok(workspace);
        }

        let workspace = Workspace {
            id: WorkspaceId::new(),
            external_id: external_id.to_string(),
            name: name.to_string(),
            ai_config: None,
            created_at: now_ts(),
        };

        tx.execute(
            "INSERT INTO workspaces (id, external_id, name, ai_config, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![
                workspace.id.to_string(),
                workspace.external_id,
                workspace.name,
                ts_text(&workspace.created_at),
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            workspace = %workspace.id,
            external_id = %workspace.external_id,
            "created workspace"
        );
        Ok(workspace)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_workspace(&self, id: WorkspaceId) -> Result<Workspace> {
        self.conn()
            .query_row(
                &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE id = ?1"),
                params![id.to_string()],
                row_to_workspace,
            )
            .map_err(not_found)
    }

    pub fn get_workspace_by_external_id(&self, external_id: &str) -> Result<Workspace> {
        self.conn()
            .query_row(
                &format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE external_id = ?1"),
                params![external_id],
                row_to_workspace,
            )
            .map_err(not_found)
    }

    /// List every workspace, oldest first. Used by the reminder scheduler to
    /// walk tenants one at a time.
    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {WORKSPACE_COLUMNS} FROM workspaces ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map([], row_to_workspace)?;

        let mut workspaces = Vec::new();
        for row in rows {
            workspaces.push(row?);
        }
        Ok(workspaces)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the workspace's AI routing override tree (`None` clears it).
    pub fn set_workspace_ai_config(
        &self,
        id: WorkspaceId,
        ai_config: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let encoded = ai_config.map(serde_json::to_string).transpose()?;
        let affected = self.conn().execute(
            "UPDATE workspaces SET ai_config = ?1 WHERE id = ?2",
            params![encoded, id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Workspace`].
fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: id_col(row, 0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        ai_config: json_col(row, 3)?,
        created_at: ts_col(row, 4)?,
    })
}
