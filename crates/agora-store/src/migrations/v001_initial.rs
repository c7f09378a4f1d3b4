//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `workspaces`, `rooms`, `room_links`,
//! `messages` and `reminders`. Every tenant-owned table carries a NOT NULL
//! `workspace_id`; rows that point at a room do so through a composite key on
//! `(room id, workspace_id)` so the room must belong to the same workspace.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Workspaces (tenants)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS workspaces (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    external_id TEXT NOT NULL UNIQUE,         -- platform group id
    name        TEXT NOT NULL,
    ai_config   TEXT,                         -- JSON override tree
    created_at  TEXT NOT NULL                 -- RFC-3339
);

-- ----------------------------------------------------------------
-- Rooms (scopes)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rooms (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    workspace_id TEXT NOT NULL,
    external_id  TEXT NOT NULL,               -- platform channel id
    name         TEXT NOT NULL,
    kind         TEXT NOT NULL DEFAULT 'standard'
                 CHECK (kind IN ('standard', 'member_restricted', 'aggregate')),
    ai_config    TEXT,
    created_at   TEXT NOT NULL,
    deleted_at   TEXT,                        -- soft delete, row retained

    UNIQUE (workspace_id, external_id),
    UNIQUE (id, workspace_id),
    FOREIGN KEY (workspace_id) REFERENCES workspaces(id)
);

CREATE INDEX IF NOT EXISTS idx_rooms_workspace_kind ON rooms(workspace_id, kind);

-- ----------------------------------------------------------------
-- Room links (fan-out graph)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS room_links (
    id             TEXT PRIMARY KEY NOT NULL,
    workspace_id   TEXT NOT NULL,
    source_room_id TEXT NOT NULL,
    target_room_id TEXT NOT NULL,
    kind           TEXT NOT NULL CHECK (kind IN ('one_way', 'bidirectional')),
    created_at     TEXT NOT NULL,

    CHECK (source_room_id <> target_room_id),
    UNIQUE (workspace_id, source_room_id, target_room_id),
    FOREIGN KEY (workspace_id) REFERENCES workspaces(id),
    FOREIGN KEY (source_room_id, workspace_id) REFERENCES rooms(id, workspace_id),
    FOREIGN KEY (target_room_id, workspace_id) REFERENCES rooms(id, workspace_id)
);

CREATE INDEX IF NOT EXISTS idx_room_links_source ON room_links(workspace_id, source_room_id);
CREATE INDEX IF NOT EXISTS idx_room_links_target ON room_links(workspace_id, target_room_id);

-- ----------------------------------------------------------------
-- Messages (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY NOT NULL,
    workspace_id        TEXT NOT NULL,
    room_id             TEXT NOT NULL,
    sender_id           TEXT NOT NULL,
    sender_name         TEXT NOT NULL,
    body                TEXT NOT NULL,
    message_type        TEXT NOT NULL DEFAULT 'text',
    external_message_id TEXT NOT NULL UNIQUE,  -- dedup key
    timestamp           TEXT NOT NULL,

    UNIQUE (id, workspace_id),
    FOREIGN KEY (workspace_id) REFERENCES workspaces(id),
    FOREIGN KEY (room_id, workspace_id) REFERENCES rooms(id, workspace_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_room_ts
    ON messages(workspace_id, room_id, timestamp DESC);

-- ----------------------------------------------------------------
-- Reminders
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reminders (
    id           TEXT PRIMARY KEY NOT NULL,
    workspace_id TEXT NOT NULL,
    title        TEXT NOT NULL,
    description  TEXT,
    due_at       TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending'
                 CHECK (status IN ('pending', 'done', 'cancelled')),
    notified     INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    created_at   TEXT NOT NULL,

    FOREIGN KEY (workspace_id) REFERENCES workspaces(id)
);

CREATE INDEX IF NOT EXISTS idx_reminders_due
    ON reminders(workspace_id, status, notified, due_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
