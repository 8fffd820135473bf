//! Model registry: declarative base models expanded into reasoning-effort
//! and native-id variants, plus custom provider entries loaded from disk.
//!
//! Built once into a `HashMap` behind a `OnceLock`, so resolution never
//! re-derives the registry per request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

pub const REASONING_LEVELS: [&str; 3] = ["low", "medium", "high"];

pub fn reasoning_budget(level: &str) -> Option<u32> {
    match level {
        "low" => Some(8_000),
        "medium" => Some(16_000),
        "high" => Some(32_000),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct BaseModel {
    client_id: &'static str,
    upstream_id: &'static str,
    created: i64,
    owned_by: &'static str,
    context_length: u32,
    max_completion_tokens: u32,
}

const BASE_MODELS: &[BaseModel] = &[
    BaseModel {
        client_id: "sonnet-4-5",
        upstream_id: "claude-sonnet-4-5-20250929",
        created: 1_727_654_400,
        owned_by: "anthropic",
        context_length: 200_000,
        max_completion_tokens: 65_536,
    },
    BaseModel {
        client_id: "haiku-4-5",
        upstream_id: "claude-haiku-4-5-20251001",
        created: 1_727_827_200,
        owned_by: "anthropic",
        context_length: 200_000,
        max_completion_tokens: 65_536,
    },
    BaseModel {
        client_id: "opus-4-1",
        upstream_id: "claude-opus-4-1-20250805",
        created: 1_722_816_000,
        owned_by: "anthropic",
        context_length: 200_000,
        max_completion_tokens: 32_768,
    },
    BaseModel {
        client_id: "sonnet-4",
        upstream_id: "claude-sonnet-4-20250514",
        created: 1_715_644_800,
        owned_by: "anthropic",
        context_length: 200_000,
        max_completion_tokens: 65_536,
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct ModelListing {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
    pub context_length: u32,
    pub max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_capable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_budget: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ModelRegistryEntry {
    pub client_id: String,
    pub upstream_id: String,
    pub created: i64,
    pub owned_by: String,
    pub context_length: u32,
    pub max_completion_tokens: u32,
    pub reasoning_level: Option<String>,
    pub use_1m_context: bool,
    pub include_in_listing: bool,
    pub route: Route,
    pub provider_config: Option<ProviderRouting>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Anthropic,
    Custom,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderRouting {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    #[serde(default = "default_max_tokens")]
    pub max_completion_tokens: u32,
}

fn default_context_length() -> u32 {
    200_000
}
fn default_max_tokens() -> u32 {
    4_096
}

#[derive(Debug, Deserialize)]
struct CustomModelFile {
    #[serde(default)]
    custom_models: Vec<CustomModelEntry>,
}

#[derive(Debug, Deserialize)]
struct CustomModelEntry {
    id: String,
    base_url: String,
    api_key: String,
    #[serde(default = "default_context_length")]
    context_length: u32,
    #[serde(default = "default_max_tokens")]
    max_completion_tokens: u32,
    #[serde(default)]
    owned_by: Option<String>,
}

impl ModelRegistryEntry {
    pub fn to_listing(&self) -> ModelListing {
        ModelListing {
            id: self.client_id.clone(),
            object: "model",
            created: self.created,
            owned_by: self.owned_by.clone(),
            context_length: self.context_length,
            max_completion_tokens: self.max_completion_tokens,
            reasoning_capable: self.reasoning_level.as_ref().map(|_| true),
            reasoning_budget: self
                .reasoning_level
                .as_deref()
                .and_then(reasoning_budget),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub upstream_id: String,
    pub reasoning_level: Option<String>,
    pub use_1m_context: bool,
    pub route: Route,
    pub provider_config: Option<ProviderRouting>,
}

pub struct ModelRegistry {
    entries: HashMap<String, ModelRegistryEntry>,
}

impl ModelRegistry {
    fn build(custom_models_path: Option<&std::path::Path>) -> Self {
        let mut entries = HashMap::new();

        for base in BASE_MODELS {
            insert_base_and_variants(&mut entries, base);
        }

        if let Some(path) = custom_models_path {
            load_custom_models(&mut entries, path);
        }

        Self { entries }
    }

    pub fn list_public_models(&self) -> Vec<ModelListing> {
        let mut out: Vec<ModelListing> = self
            .entries
            .values()
            .filter(|e| e.include_in_listing)
            .map(|e| e.to_listing())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Resolve a client-facing model id into upstream routing information.
    /// Pure and idempotent: the same id always resolves the same way for a
    /// given registry snapshot.
    pub fn resolve(&self, id: &str) -> Option<ResolvedModel> {
        if let Some(entry) = self.entries.get(id) {
            return Some(ResolvedModel {
                upstream_id: entry.upstream_id.clone(),
                reasoning_level: entry.reasoning_level.clone(),
                use_1m_context: entry.use_1m_context,
                route: entry.route.clone(),
                provider_config: entry.provider_config.clone(),
            });
        }
        parse_legacy_model_name(id)
    }
}

fn insert_base_and_variants(entries: &mut HashMap<String, ModelRegistryEntry>, base: &BaseModel) {
    entries.insert(
        base.client_id.to_string(),
        ModelRegistryEntry {
            client_id: base.client_id.to_string(),
            upstream_id: base.upstream_id.to_string(),
            created: base.created,
            owned_by: base.owned_by.to_string(),
            context_length: base.context_length,
            max_completion_tokens: base.max_completion_tokens,
            reasoning_level: None,
            use_1m_context: false,
            include_in_listing: true,
            route: Route::Anthropic,
            provider_config: None,
        },
    );

    for level in REASONING_LEVELS {
        let client_id = format!("{}-reasoning-{}", base.client_id, level);
        entries.insert(
            client_id.clone(),
            ModelRegistryEntry {
                client_id,
                upstream_id: base.upstream_id.to_string(),
                created: base.created,
                owned_by: base.owned_by.to_string(),
                context_length: base.context_length,
                max_completion_tokens: base.max_completion_tokens,
                reasoning_level: Some(level.to_string()),
                use_1m_context: false,
                include_in_listing: true,
                route: Route::Anthropic,
                provider_config: None,
            },
        );
    }

    // Native-id aliases resolve but are hidden from `/v1/models` listings,
    // so a client that already speaks Anthropic model ids still works.
    entries.insert(
        base.upstream_id.to_string(),
        ModelRegistryEntry {
            client_id: base.upstream_id.to_string(),
            upstream_id: base.upstream_id.to_string(),
            created: base.created,
            owned_by: base.owned_by.to_string(),
            context_length: base.context_length,
            max_completion_tokens: base.max_completion_tokens,
            reasoning_level: None,
            use_1m_context: false,
            include_in_listing: false,
            route: Route::Anthropic,
            provider_config: None,
        },
    );

    for level in REASONING_LEVELS {
        let client_id = format!("{}-reasoning-{}", base.upstream_id, level);
        entries.insert(
            client_id.clone(),
            ModelRegistryEntry {
                client_id,
                upstream_id: base.upstream_id.to_string(),
                created: base.created,
                owned_by: base.owned_by.to_string(),
                context_length: base.context_length,
                max_completion_tokens: base.max_completion_tokens,
                reasoning_level: Some(level.to_string()),
                use_1m_context: false,
                include_in_listing: false,
                route: Route::Anthropic,
                provider_config: None,
            },
        );
    }
}

fn load_custom_models(entries: &mut HashMap<String, ModelRegistryEntry>, path: &std::path::Path) {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return,
    };
    let parsed: CustomModelFile = match serde_json::from_str(&data) {
        Ok(p) => p,
        Err(e) => {
            crate::logging::warn(&format!("Ignoring malformed custom models file: {}", e));
            return;
        }
    };
    for model in parsed.custom_models {
        if model.id.is_empty() || model.base_url.is_empty() || model.api_key.is_empty() {
            crate::logging::warn(&format!(
                "Skipping custom model entry missing required fields: {:?}",
                model.id
            ));
            continue;
        }
        entries.insert(
            model.id.clone(),
            ModelRegistryEntry {
                client_id: model.id.clone(),
                upstream_id: String::new(),
                created: 0,
                owned_by: model.owned_by.unwrap_or_else(|| "custom".to_string()),
                context_length: model.context_length,
                max_completion_tokens: model.max_completion_tokens,
                reasoning_level: None,
                use_1m_context: false,
                include_in_listing: true,
                route: Route::Custom,
                provider_config: Some(ProviderRouting {
                    base_url: model.base_url,
                    api_key: model.api_key,
                    context_length: model.context_length,
                    max_completion_tokens: model.max_completion_tokens,
                }),
            },
        );
    }
}

/// Fallback for ids that never went through the registry: strips trailing
/// `-1m` / `-reasoning-<level>` suffixes the way the original proxy's legacy
/// parser does. An unrecognized reasoning level is left in the id rather
/// than silently stripped.
fn parse_legacy_model_name(id: &str) -> Option<ResolvedModel> {
    let mut rest = id;
    let mut use_1m_context = false;
    let mut reasoning_level = None;

    if let Some((prefix, level)) = rest.rsplit_once("-reasoning-") {
        if REASONING_LEVELS.contains(&level) {
            rest = prefix;
            reasoning_level = Some(level.to_string());
        } else {
            crate::logging::warn(&format!("Unknown reasoning level in model id: {}", id));
            return Some(ResolvedModel {
                upstream_id: id.to_string(),
                reasoning_level: None,
                use_1m_context: false,
                route: Route::Anthropic,
                provider_config: None,
            });
        }
    }

    if let Some(prefix) = rest.strip_suffix("-1m") {
        rest = prefix;
        use_1m_context = true;
    }

    if rest.is_empty() {
        return None;
    }

    Some(ResolvedModel {
        upstream_id: rest.to_string(),
        reasoning_level,
        use_1m_context,
        route: Route::Anthropic,
        provider_config: None,
    })
}

static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();

pub fn registry() -> &'static ModelRegistry {
    REGISTRY.get_or_init(|| ModelRegistry::build(crate::config::config().custom_models_path()))
}
