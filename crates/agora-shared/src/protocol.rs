//! Wire formats exchanged with the chat-platform gateway.
//!
//! Inbound events arrive as JSON tagged by `type`. Outbound notifications are
//! platform-neutral; the gateway renders them (e.g. as an embed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RoomId;

/// An event delivered by the chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A user posted a message in a channel of a group.
    MessageCreated(MessageCreated),

    /// A channel was renamed on the platform.
    ChannelRenamed {
        tenant_external_id: String,
        room_external_id: String,
        room_name: String,
    },

    /// A channel was deleted on the platform.
    ChannelDeleted {
        tenant_external_id: String,
        room_external_id: String,
    },
}

impl InboundEvent {
    pub fn tenant_external_id(&self) -> &str {
        match self {
            InboundEvent::MessageCreated(m) => &m.tenant_external_id,
            InboundEvent::ChannelRenamed {
                tenant_external_id, ..
            }
            | InboundEvent::ChannelDeleted {
                tenant_external_id, ..
            } => tenant_external_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreated {
    /// External group identifier. Direct messages carry no group and are
    /// never turned into events.
    pub tenant_external_id: String,
    /// Display name of the group, used when the workspace is first created.
    #[serde(default)]
    pub tenant_name: Option<String>,
    pub room_external_id: String,
    pub room_name: String,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    /// Deduplication key.
    pub external_message_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<InboundAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundAttachment {
    pub filename: String,
    pub url: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub room_id: RoomId,
    /// Platform channel id the gateway posts into.
    pub channel_external_id: String,
}

/// A platform-neutral rich notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<NotificationField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Notification {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
            footer: None,
            timestamp: Utc::now(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(NotificationField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

// ---------------------------------------------------------------------------
// Administrative actors
// ---------------------------------------------------------------------------

/// The platform user on whose behalf an administrative request is made, as
/// asserted by the authenticated gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    #[serde(default)]
    pub role: ActorRole,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    #[default]
    Member,
    WorkspaceAdmin,
}

impl Actor {
    pub fn is_workspace_admin(&self) -> bool {
        self.role == ActorRole::WorkspaceAdmin
    }
}
