//! Capability resolution.
//!
//! [`AiRouter::resolve`] picks the descriptor for a purpose in this order,
//! first match wins:
//!
//! 1. the room's override, when a room is given;
//! 2. the workspace's override;
//! 3. the global `ai_routing` default.
//!
//! Override trees come from the routing file and from the `ai_config`
//! column of workspace and room rows (the stored tree wins per purpose). A
//! tree that does not have the expected shape is treated as absent at its
//! level and logged; it never turns into an error. The router is immutable
//! after construction.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use agora_shared::{RoomId, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AiConfig, DescriptorEntry, ProviderConfig};
use crate::error::{AiError, Result};

/// The resolved capability: which provider, which model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub provider: String,
    pub model: String,
}

type PurposeMap = BTreeMap<String, DescriptorEntry>;

#[derive(Debug, Clone)]
pub struct AiRouter {
    providers: BTreeMap<String, ProviderConfig>,
    routing: PurposeMap,
    fallback: BTreeMap<String, Vec<DescriptorEntry>>,
    workspace_overrides: HashMap<WorkspaceId, PurposeMap>,
    room_overrides: HashMap<RoomId, PurposeMap>,
}

impl AiRouter {
    pub fn new(config: AiConfig) -> Self {
        Self {
            workspace_overrides: parse_override_tree("workspace_overrides", &config.workspace_overrides),
            room_overrides: parse_override_tree("room_overrides", &config.room_overrides),
            providers: config.providers,
            routing: config.routing,
            fallback: config.fallback,
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        Ok(Self::new(AiConfig::load(path)?))
    }

    /// Layer stored workspace trees over the file's overrides. Per purpose,
    /// the stored descriptor replaces the file's.
    pub fn with_workspace_overrides<'a, I>(mut self, trees: I) -> Self
    where
        I: IntoIterator<Item = (WorkspaceId, &'a Value)>,
    {
        for (id, tree) in trees {
            if let Some(purposes) = parse_purpose_map("workspace", &id.to_string(), tree) {
                self.workspace_overrides
                    .entry(id)
                    .or_default()
                    .extend(purposes);
            }
        }
        self
    }

    /// Layer stored room trees over the file's overrides.
    pub fn with_room_overrides<'a, I>(mut self, trees: I) -> Self
    where
        I: IntoIterator<Item = (RoomId, &'a Value)>,
    {
        for (id, tree) in trees {
            if let Some(purposes) = parse_purpose_map("room", &id.to_string(), tree) {
                self.room_overrides.entry(id).or_default().extend(purposes);
            }
        }
        self
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    pub fn resolve(
        &self,
        purpose: &str,
        workspace_id: WorkspaceId,
        room_id: Option<RoomId>,
    ) -> Result<CapabilityDescriptor> {
        let room_entry = room_id
            .and_then(|id| self.room_overrides.get(&id))
            .and_then(|purposes| purposes.get(purpose));

        let entry = room_entry
            .or_else(|| {
                self.workspace_overrides
                    .get(&workspace_id)
                    .and_then(|purposes| purposes.get(purpose))
            })
            .or_else(|| self.routing.get(purpose))
            .ok_or_else(|| AiError::not_configured(purpose, None))?;

        self.validate(purpose, entry)
    }

    /// Fallback descriptors for `purpose`, in configured order. Entries
    /// missing a provider or model are skipped.
    pub fn fallbacks(&self, purpose: &str) -> Vec<CapabilityDescriptor> {
        let Some(entries) = self.fallback.get(purpose) else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| match (&entry.provider, &entry.model) {
                (Some(provider), Some(model)) => Some(CapabilityDescriptor {
                    provider: provider.clone(),
                    model: model.clone(),
                }),
                _ => {
                    tracing::warn!(purpose, "skipping incomplete fallback entry");
                    None
                }
            })
            .collect()
    }

    fn validate(&self, purpose: &str, entry: &DescriptorEntry) -> Result<CapabilityDescriptor> {
        let (Some(provider), Some(model)) = (&entry.provider, &entry.model) else {
            return Err(AiError::not_configured(purpose, entry.provider.as_deref()));
        };
        if provider.is_empty() || model.is_empty() {
            return Err(AiError::not_configured(purpose, Some(provider)));
        }
        if !self.providers.contains_key(provider) {
            return Err(AiError::not_configured(purpose, Some(provider)));
        }
        Ok(CapabilityDescriptor {
            provider: provider.clone(),
            model: model.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn provider_config(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(name)
            .ok_or_else(|| AiError::not_configured("provider lookup", Some(name)))
    }

    pub fn list_purposes(&self) -> Vec<&str> {
        self.routing.keys().map(String::as_str).collect()
    }

    pub fn list_providers(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

// ---------------------------------------------------------------------------
// Lenient override parsing
// ---------------------------------------------------------------------------

fn parse_override_tree<K>(section: &str, tree: &Value) -> HashMap<K, PurposeMap>
where
    K: FromStr + std::hash::Hash + Eq,
{
    let mut out = HashMap::new();
    let map = match tree {
        Value::Null => return out,
        Value::Object(map) => map,
        _ => {
            tracing::warn!(section, "override tree is not a mapping; ignoring it");
            return out;
        }
    };

    for (key, value) in map {
        let Ok(id) = key.parse::<K>() else {
            tracing::warn!(section, key = %key, "override key is not a valid id; ignoring it");
            continue;
        };
        if let Some(purposes) = parse_purpose_map(section, key, value) {
            out.insert(id, purposes);
        }
    }
    out
}

fn parse_purpose_map(level: &str, key: &str, value: &Value) -> Option<PurposeMap> {
    let Value::Object(map) = value else {
        if !value.is_null() {
            tracing::warn!(level, key, "override is not a mapping; ignoring it");
        }
        return None;
    };

    let mut purposes = PurposeMap::new();
    for (purpose, descriptor) in map {
        match serde_json::from_value::<DescriptorEntry>(descriptor.clone()) {
            Ok(entry) if descriptor.is_object() => {
                purposes.insert(purpose.clone(), entry);
            }
            _ => {
                tracing::warn!(level, key, purpose = %purpose, "malformed descriptor; ignoring it");
            }
        }
    }
    Some(purposes)
}
