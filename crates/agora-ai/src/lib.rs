//! # agora-ai
//!
//! Layered AI capability resolution for Agora.
//!
//! - [`config`]: the YAML routing file (`ai_providers`, `ai_routing`,
//!   `ai_fallback`, per-workspace and per-room overrides).
//! - [`router`]: [`AiRouter`], which resolves a purpose for a request
//!   (room > workspace > global).
//! - [`provider`]: the [`AiProvider`] contract and an OpenAI-compatible
//!   HTTP implementation.
//! - [`summarizer`]: conversation summaries with fallback providers.

pub mod config;
pub mod error;
pub mod provider;
pub mod router;
pub mod summarizer;

pub use config::{AiConfig, ProviderConfig};
pub use error::{AiError, Result};
pub use provider::{
    AiProvider, GenerateOptions, OpenAiCompatibleProvider, ProviderFactory, ProviderRegistry,
};
pub use router::{AiRouter, CapabilityDescriptor};
pub use summarizer::{SummaryError, SummaryMessage, Summarizer};
