//! Conversation summaries.
//!
//! The summarizer resolves the `summary` purpose for the request, then tries
//! the resolved descriptor followed by each `ai_fallback` entry until one
//! provider answers.

use std::sync::Arc;

use agora_shared::{RoomId, WorkspaceId};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::error::AiError;
use crate::provider::{GenerateOptions, ProviderFactory};
use crate::router::{AiRouter, CapabilityDescriptor};

pub const SUMMARY_PURPOSE: &str = "summary";

/// Most recent messages included in one prompt.
pub const MAX_SUMMARY_MESSAGES: usize = 100;

pub const NOTHING_TO_SUMMARIZE: &str = "There are no messages to summarize.";

#[derive(Error, Debug)]
pub enum SummaryError {
    /// Neither the resolved descriptor nor any fallback is usable.
    #[error("summary is not configured: {0}")]
    NotConfigured(#[source] AiError),

    /// Every candidate provider failed; carries the last error.
    #[error("failed to generate summary after {attempts} attempt(s): {last}")]
    AllProvidersFailed { attempts: usize, last: AiError },
}

/// One line of conversation handed to the summarizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryMessage {
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

pub struct Summarizer {
    router: Arc<AiRouter>,
    providers: Arc<dyn ProviderFactory>,
}

impl Summarizer {
    pub fn new(router: Arc<AiRouter>, providers: Arc<dyn ProviderFactory>) -> Self {
        Self { router, providers }
    }

    /// Summarize `messages`, optionally restricted to the last `days` days.
    pub async fn summarize(
        &self,
        messages: Vec<SummaryMessage>,
        days: Option<u32>,
        workspace_id: WorkspaceId,
        room_id: Option<RoomId>,
    ) -> Result<String, SummaryError> {
        if messages.is_empty() {
            return Ok(NOTHING_TO_SUMMARIZE.to_string());
        }

        let mut messages = messages;
        if let Some(days) = days {
            let cutoff = Utc::now() - Duration::days(i64::from(days));
            messages.retain(|m| m.timestamp >= cutoff);
            if messages.is_empty() {
                return Ok(format!("There are no messages from the last {days} day(s)."));
            }
        }

        messages.sort_by_key(|m| m.timestamp);
        if messages.len() > MAX_SUMMARY_MESSAGES {
            messages.drain(..messages.len() - MAX_SUMMARY_MESSAGES);
        }

        let prompt = build_prompt(&messages);
        let options = GenerateOptions {
            temperature: 0.3,
            max_tokens: 1024,
            system_prompt: None,
        };

        let candidates = self.candidates(workspace_id, room_id)?;
        let mut attempts = 0;
        let mut last_error = None;

        for descriptor in candidates {
            attempts += 1;
            let provider = match self.providers.build(&descriptor) {
                Ok(provider) => provider,
                Err(e) => {
                    tracing::warn!(provider = %descriptor.provider, error = %e, "summary provider unavailable");
                    last_error = Some(e);
                    continue;
                }
            };

            match provider.generate(&prompt, &options).await {
                Ok(summary) => {
                    tracing::info!(
                        workspace = %workspace_id,
                        provider = %descriptor.provider,
                        model = %descriptor.model,
                        messages = messages.len(),
                        "generated summary"
                    );
                    return Ok(summary);
                }
                Err(e) => {
                    tracing::warn!(provider = %descriptor.provider, error = %e, "summary attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(SummaryError::AllProvidersFailed {
            attempts,
            last: last_error
                .unwrap_or_else(|| AiError::not_configured(SUMMARY_PURPOSE, None)),
        })
    }

    /// The resolved descriptor (if any) followed by the fallbacks, without
    /// repeats.
    fn candidates(
        &self,
        workspace_id: WorkspaceId,
        room_id: Option<RoomId>,
    ) -> Result<Vec<CapabilityDescriptor>, SummaryError> {
        let mut candidates = Vec::new();
        let resolve_error = match self.router.resolve(SUMMARY_PURPOSE, workspace_id, room_id) {
            Ok(primary) => {
                candidates.push(primary);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "no primary summary provider; trying fallbacks");
                Some(e)
            }
        };

        for fallback in self.router.fallbacks(SUMMARY_PURPOSE) {
            if !candidates.contains(&fallback) {
                candidates.push(fallback);
            }
        }

        match resolve_error {
            Some(e) if candidates.is_empty() => Err(SummaryError::NotConfigured(e)),
            _ => Ok(candidates),
        }
    }
}

fn build_prompt(messages: &[SummaryMessage]) -> String {
    let conversation = messages
        .iter()
        .map(|m| {
            format!(
                "[{}] {}: {}",
                m.timestamp.format("%Y-%m-%d %H:%M"),
                m.sender_name,
                m.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Summarize the following conversation.\n\n\
         ## Format\n\
         - Decisions: important decisions or agreements\n\
         - Open questions: items still undecided or needing discussion\n\
         - Action items: who does what (if any)\n\n\
         ## Conversation\n\
         {conversation}\n\n\
         ## Summary"
    )
}
