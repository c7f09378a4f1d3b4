//! # agora-shared
//!
//! Types shared by every Agora crate: typed identifiers for each tenant-owned
//! entity, the small enums persisted as text, the inbound event / outbound
//! notification wire formats exchanged with the chat-platform gateway, and
//! the default tuning constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ParseEnumError;
pub use types::*;
