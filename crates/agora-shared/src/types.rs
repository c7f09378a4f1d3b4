use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseEnumError;

// Each tenant-owned entity gets its own id type so that a room id can never be
// passed where a workspace (tenant) id is expected.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Tenant identifier. Every tenant-scoped query takes one of these.
    WorkspaceId
);
entity_id!(RoomId);
entity_id!(RoomLinkId);
entity_id!(MessageId);
entity_id!(AttachmentId);
entity_id!(ReminderId);

// ---------------------------------------------------------------------------
// Text-persisted enums
// ---------------------------------------------------------------------------

macro_rules! text_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError::new($label, other)),
                }
            }
        }
    };
}

/// What a room is used for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Ordinary topic channel.
    Standard,
    /// Channel restricted to specific members.
    MemberRestricted,
    /// Receives fan-out notifications from linked rooms.
    Aggregate,
}

text_enum!(RoomKind, "room kind", {
    Standard => "standard",
    MemberRestricted => "member_restricted",
    Aggregate => "aggregate",
});

/// Direction of a link between two rooms of the same workspace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    OneWay,
    Bidirectional,
}

text_enum!(LinkKind, "link kind", {
    OneWay => "one_way",
    Bidirectional => "bidirectional",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Done,
    Cancelled,
}

text_enum!(ReminderStatus, "reminder status", {
    Pending => "pending",
    Done => "done",
    Cancelled => "cancelled",
});

impl ReminderStatus {
    /// `pending` may move to `done` or `cancelled`; both are terminal.
    pub fn can_transition_to(&self, next: ReminderStatus) -> bool {
        matches!(
            (self, next),
            (ReminderStatus::Pending, ReminderStatus::Done)
                | (ReminderStatus::Pending, ReminderStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Voice,
}

text_enum!(MessageType, "message type", {
    Text => "text",
    Image => "image",
    Video => "video",
    Voice => "voice",
});

impl MessageType {
    /// Classify a message by the MIME type of its first attachment.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match FileType::from_content_type(content_type.unwrap_or_default()) {
            FileType::Image => MessageType::Image,
            FileType::Video => MessageType::Video,
            FileType::Voice => MessageType::Voice,
            FileType::Document => MessageType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Image,
    Video,
    Voice,
    Document,
}

text_enum!(FileType, "file type", {
    Image => "image",
    Video => "video",
    Voice => "voice",
    Document => "document",
});

impl FileType {
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            FileType::Image
        } else if content_type.starts_with("video/") {
            FileType::Video
        } else if content_type.starts_with("audio/") {
            FileType::Voice
        } else {
            FileType::Document
        }
    }
}
