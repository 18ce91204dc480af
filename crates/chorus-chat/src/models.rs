//! Internal model id → upstream model id catalog.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Built-in vocabulary: (id, upstream id, display name, provider, description).
pub const BUILTIN_MODELS: &[(&str, &str, &str, &str, &str)] = &[
    (
        "gpt-5",
        "openai/gpt-5",
        "GPT-5",
        "OpenAI",
        "Latest GPT model with advanced reasoning",
    ),
    (
        "claude-4-sonnet",
        "anthropic/claude-3.5-sonnet",
        "Claude 4 Sonnet",
        "Anthropic",
        "Fast and efficient reasoning model",
    ),
    (
        "gemini-2.5",
        "google/gemini-2.5-flash-image-preview:free",
        "Gemini 2.5",
        "Google",
        "Multimodal reasoning capabilities",
    ),
    (
        "deepseek",
        "deepseek/deepseek-chat-v3.1:free",
        "DeepSeek",
        "DeepSeek",
        "Advanced reasoning and coding",
    ),
    (
        "mistral-small",
        "mistralai/mistral-small-3.2-24b-instruct:free",
        "Mistral Small",
        "Mistral",
        "Compact instruction-tuned model",
    ),
    (
        "gemma-3n",
        "google/gemma-3n-e2b-it:free",
        "Gemma 3n",
        "Google",
        "Lightweight open model",
    ),
    (
        "llama-3.3",
        "meta-llama/llama-3.3-8b-instruct:free",
        "Llama 3.3",
        "Meta",
        "Open instruction-tuned model",
    ),
];

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Id used by the browser UI and the `/api/chat` contract.
    pub id: String,
    /// Model name sent upstream.
    pub upstream: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub description: String,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            upstream: upstream.into(),
            name: String::new(),
            provider: String::new(),
            description: String::new(),
        }
    }
}

/// Read-only mapping from internal model ids to upstream model ids.
///
/// Unknown ids resolve to `None`; callers treat that as a per-model
/// "not supported" outcome.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
    index: HashMap<String, usize>,
}

impl ModelCatalog {
    /// The built-in vocabulary.
    pub fn builtin() -> Self {
        Self::from_entries(BUILTIN_MODELS.iter().map(
            |(id, upstream, name, provider, description)| ModelEntry {
                id: id.to_string(),
                upstream: upstream.to_string(),
                name: name.to_string(),
                provider: provider.to_string(),
                description: description.to_string(),
            },
        ))
    }

    /// Build a catalog. A repeated id replaces the earlier entry in place.
    pub fn from_entries(entries: impl IntoIterator<Item = ModelEntry>) -> Self {
        let mut catalog = Self::default();
        for entry in entries {
            catalog.upsert(entry);
        }
        catalog
    }

    /// Load the built-in vocabulary and merge overrides from a JSON array
    /// file, if present.
    pub fn load(path: &Path) -> Self {
        let mut catalog = Self::builtin();

        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => return catalog,
        };

        match serde_json::from_str::<Vec<ModelEntry>>(&data) {
            Ok(overrides) => {
                let count = overrides.len();
                for entry in overrides {
                    catalog.upsert(entry);
                }
                info!(
                    "Merged {} model overrides from {} ({} models total)",
                    count,
                    path.display(),
                    catalog.len()
                );
            }
            Err(e) => {
                warn!("Ignoring invalid model catalog {}: {}", path.display(), e);
            }
        }

        catalog
    }

    fn upsert(&mut self, entry: ModelEntry) {
        match self.index.get(&entry.id) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Upstream model id for an internal id.
    pub fn resolve(&self, id: &str) -> Option<&str> {
        self.get(id).map(|e| e.upstream.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&ModelEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    /// Entries in catalog order.
    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
