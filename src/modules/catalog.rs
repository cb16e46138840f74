//! Model catalog loading.
//!
//! The catalog file comes in two shapes: a compact `{"models": [...]}` list of
//! backend models, which is expanded here into a base entry plus a `-thinking`
//! variant per model, or an already expanded `{"data": [...]}` list. Whether a
//! model surfaces reasoning is derived from the `-thinking` id suffix.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::proxy::error::{RelayError, RelayResult};

const REASONING_SUFFIX: &str = "-thinking";
const DEFAULT_OWNED_BY: &str = "vertical-studio";

/// One caller-visible model and its backend binding.
#[derive(Debug, Clone)]
pub struct CatalogModel {
    pub id: String,
    pub created: i64,
    pub owned_by: String,
    pub vertical_model_id: String,
    pub vertical_model_url: String,
    pub description: Option<String>,
    /// Surface reasoning deltas for this model variant
    pub output_reasoning: bool,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    data: Option<Vec<RawEntry>>,
    #[serde(default)]
    models: Option<Vec<RawModel>>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    owned_by: Option<String>,
    #[serde(default)]
    vertical_model_id: Option<String>,
    #[serde(default)]
    vertical_model_url: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    #[serde(rename = "modelId")]
    model_id: String,
    #[serde(default)]
    url: String,
}

/// In-memory model catalog, immutable after load.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    models: Vec<CatalogModel>,
}

impl ModelCatalog {
    pub fn load(path: &Path) -> RelayResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> RelayResult<Self> {
        let raw: RawCatalog = serde_json::from_str(content)
            .map_err(|e| RelayError::config(format!("failed to parse model catalog: {}", e)))?;

        let mut models = Vec::new();
        if let Some(entries) = raw.data {
            for entry in entries {
                models.push(CatalogModel {
                    id: entry.id,
                    created: entry.created,
                    owned_by: entry.owned_by.unwrap_or_else(|| DEFAULT_OWNED_BY.to_string()),
                    vertical_model_id: entry.vertical_model_id.unwrap_or_default(),
                    vertical_model_url: entry.vertical_model_url.unwrap_or_default(),
                    description: entry.description,
                    output_reasoning: false,
                });
            }
        } else if let Some(entries) = raw.models {
            for raw_model in entries {
                let base_id = raw_model.model_id;
                models.push(CatalogModel {
                    id: base_id.clone(),
                    created: 0,
                    owned_by: DEFAULT_OWNED_BY.to_string(),
                    vertical_model_id: base_id.clone(),
                    vertical_model_url: raw_model.url.clone(),
                    description: Some(format!("{} (final answer only)", base_id)),
                    output_reasoning: false,
                });
                models.push(CatalogModel {
                    id: format!("{}{}", base_id, REASONING_SUFFIX),
                    created: 0,
                    owned_by: DEFAULT_OWNED_BY.to_string(),
                    vertical_model_id: base_id.clone(),
                    vertical_model_url: raw_model.url,
                    description: Some(format!("{} (with thinking steps)", base_id)),
                    output_reasoning: false,
                });
            }
        }

        let now = chrono::Utc::now().timestamp();
        for model in &mut models {
            model.output_reasoning = model.id.ends_with(REASONING_SUFFIX);
            if model.created == 0 {
                model.created = now;
            }
        }

        Ok(Self { models })
    }

    pub fn find(&self, id: &str) -> Option<&CatalogModel> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn models(&self) -> &[CatalogModel] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
