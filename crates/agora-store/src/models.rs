//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer.

use agora_shared::{
    AttachmentId, FileType, LinkKind, MessageId, MessageType, ReminderId, ReminderStatus,
    RoomId, RoomKind, RoomLinkId, WorkspaceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// A tenant: one external chat-platform group. Top-level isolation boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub id: WorkspaceId,
    /// Platform group identifier (unique).
    pub external_id: String,
    pub name: String,
    /// Optional AI routing override tree (purpose -> descriptor).
    pub ai_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A sub-partition of a workspace: one external channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub workspace_id: WorkspaceId,
    /// Platform channel identifier (unique within the workspace).
    pub external_id: String,
    pub name: String,
    pub kind: RoomKind,
    pub ai_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Set when the platform channel is deleted. The row and its name stay.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn is_aggregate(&self) -> bool {
        self.kind == RoomKind::Aggregate
    }
}

// ---------------------------------------------------------------------------
// RoomLink
// ---------------------------------------------------------------------------

/// A directed edge of the fan-out graph. Both ends belong to `workspace_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomLink {
    pub id: RoomLinkId,
    pub workspace_id: WorkspaceId,
    pub source_room_id: RoomId,
    pub target_room_id: RoomId,
    pub kind: LinkKind,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A stored chat message. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub workspace_id: WorkspaceId,
    pub room_id: RoomId,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub message_type: MessageType,
    /// Platform message identifier; ingesting it twice is a no-op.
    pub external_message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Input for [`Database::ingest_message`](crate::Database::ingest_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub message_type: MessageType,
    pub external_message_id: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Metadata for a file attached to a message. The bytes live in blob storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: AttachmentId,
    pub workspace_id: WorkspaceId,
    pub message_id: MessageId,
    pub file_name: String,
    pub blob_key: String,
    pub content_type: Option<String>,
    pub file_type: FileType,
    pub file_size: i64,
    /// BLAKE3 content hash (hex string).
    pub blake3_hash: String,
}

/// An attachment that has been written to blob storage but not yet recorded.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub file_name: String,
    pub blob_key: String,
    pub content_type: Option<String>,
    pub file_size: i64,
    pub blake3_hash: String,
}

// ---------------------------------------------------------------------------
// Reminder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reminder {
    pub id: ReminderId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub description: Option<String>,
    pub due_at: DateTime<Utc>,
    pub status: ReminderStatus,
    /// Flipped false -> true once by the scheduler.
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReminder {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub due_at: DateTime<Utc>,
}
