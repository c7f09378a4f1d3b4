//! # agora-store
//!
//! Tenant-isolated persistence for Agora, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Every helper that touches tenant-owned rows (rooms, links,
//! messages, attachments, reminders) takes a [`WorkspaceId`] as its first
//! argument and applies it before any other predicate; the schema backs this
//! up with composite foreign keys so a row can never reference a room of
//! another workspace.
//!
//! [`WorkspaceId`]: agora_shared::WorkspaceId

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reminders;
pub mod room_links;
pub mod rooms;
pub mod workspaces;

mod error;
mod sql;

pub use database::Database;
pub use error::{Result, StoreError};
pub use messages::IngestOutcome;
pub use models::*;
