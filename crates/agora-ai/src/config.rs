//! The AI routing file.
//!
//! ```yaml
//! ai_providers:
//!   openai:
//!     api_key: ${OPENAI_API_KEY}
//!     models: [gpt-4o-mini]
//! ai_routing:
//!   summary: { provider: openai, model: gpt-4o-mini }
//! ai_fallback:
//!   summary:
//!     - { provider: groq, model: llama-3.1-70b }
//! workspace_overrides:
//!   6f1c...:            # workspace UUID
//!     summary: { provider: groq, model: llama-3.1-8b }
//! room_overrides: {}
//! ```
//!
//! `${VAR}` placeholders are expanded from the environment once, before the
//! YAML is parsed. Override trees are kept as raw JSON values here; the
//! router interprets them leniently.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{AiError, Result};

/// Connection settings for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API. Defaults per provider name.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

/// A descriptor as written in the file. Either field may be missing; the
/// router reports that as "not configured" when the entry is selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// A loaded routing file.
#[derive(Debug, Clone, Default)]
pub struct AiConfig {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub routing: BTreeMap<String, DescriptorEntry>,
    pub fallback: BTreeMap<String, Vec<DescriptorEntry>>,
    pub workspace_overrides: serde_json::Value,
    pub room_overrides: serde_json::Value,
}

#[derive(Deserialize)]
struct RawConfig {
    ai_providers: Option<BTreeMap<String, ProviderConfig>>,
    ai_routing: Option<BTreeMap<String, DescriptorEntry>>,
    #[serde(default)]
    ai_fallback: BTreeMap<String, Vec<DescriptorEntry>>,
    #[serde(default)]
    workspace_overrides: serde_yaml::Value,
    #[serde(default)]
    room_overrides: serde_yaml::Value,
}

impl AiConfig {
    /// Read and parse a routing file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded AI routing file");
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        if expanded.trim().is_empty() {
            return Err(AiError::Config(
                "config is empty; required keys: ai_providers, ai_routing".into(),
            ));
        }

        let raw: RawConfig = serde_yaml::from_str(&expanded)?;

        let providers = raw
            .ai_providers
            .ok_or_else(|| AiError::Config("config must contain `ai_providers`".into()))?;
        let routing = raw
            .ai_routing
            .ok_or_else(|| AiError::Config("config must contain `ai_routing`".into()))?;

        Ok(Self {
            providers,
            routing,
            fallback: raw.ai_fallback,
            workspace_overrides: yaml_to_json("workspace_overrides", &raw.workspace_overrides),
            room_overrides: yaml_to_json("room_overrides", &raw.room_overrides),
        })
    }
}

/// Override trees with keys JSON cannot represent (sequences, mappings) are
/// dropped as a whole.
fn yaml_to_json(section: &str, value: &serde_yaml::Value) -> serde_json::Value {
    match serde_json::to_value(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(section, error = %e, "ignoring unreadable override tree");
            serde_json::Value::Null
        }
    }
}

static ENV_PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

/// Replace every `${NAME}` with the value of environment variable `NAME`
/// (empty when unset). `${}` and an unterminated `${` are left as written.
pub fn expand_env_vars(content: &str) -> String {
    let placeholder = ENV_PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").ok());
    let Some(re) = placeholder else {
        return content.to_string();
    };

    re.replace_all(content, |caps: &Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
