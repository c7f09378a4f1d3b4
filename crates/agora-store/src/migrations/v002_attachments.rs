use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS attachments (
    id           TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    workspace_id TEXT NOT NULL,
    message_id   TEXT NOT NULL,
    file_name    TEXT NOT NULL,
    blob_key     TEXT NOT NULL,                -- key in the blob store
    content_type TEXT,
    file_type    TEXT NOT NULL,                -- image / video / voice / document
    file_size    INTEGER NOT NULL,
    blake3_hash  TEXT NOT NULL,

    FOREIGN KEY (message_id, workspace_id) REFERENCES messages(id, workspace_id)
);

CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(workspace_id, message_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
