use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Composite-index descriptor in the platform's `indexes.json` layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    #[serde(default)]
    pub indexes: Vec<CompositeIndex>,
    /// Single-field exemptions. Passed through untouched.
    #[serde(default)]
    pub field_overrides: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeIndex {
    pub collection_group: String,
    #[serde(default)]
    pub query_scope: QueryScope,
    pub fields: Vec<IndexField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexField {
    pub field_path: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryScope {
    #[default]
    Collection,
    CollectionGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for index in &self.indexes {
            let collection = &index.collection_group;
            if collection.trim().is_empty() {
                return Err(ConfigError::EmptyName {
                    what: "collectionGroup",
                });
            }
            if index.fields.len() < 2 {
                return Err(ConfigError::TooFewFields {
                    collection: collection.clone(),
                    count: index.fields.len(),
                });
            }

            let mut fields = HashSet::new();
            for field in &index.fields {
                if field.field_path.trim().is_empty() {
                    return Err(ConfigError::EmptyName { what: "fieldPath" });
                }
                if !fields.insert(field.field_path.as_str()) {
                    return Err(ConfigError::DuplicateField {
                        collection: collection.clone(),
                        field: field.field_path.clone(),
                    });
                }
            }

            let key: Vec<(&str, SortOrder)> = index
                .fields
                .iter()
                .map(|f| (f.field_path.as_str(), f.order))
                .collect();
            if !seen.insert((collection.as_str(), index.query_scope, key)) {
                return Err(ConfigError::DuplicateIndex {
                    collection: collection.clone(),
                });
            }
        }
        Ok(())
    }

    /// Indexes defined on `collection`, in file order.
    pub fn for_collection<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a CompositeIndex> + 'a {
        self.indexes
            .iter()
            .filter(move |i| i.collection_group == collection)
    }

    /// Pretty-printed JSON, ready to deploy.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: IndexConfig =
            serde_json::from_str(json).context("JSON deserialization failed")?;
        config.validate()?;
        Ok(config)
    }
}

/// Load and validate an index descriptor from disk.
pub fn load_indexes(path: impl AsRef<Path>) -> Result<IndexConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read index descriptor: {}", path.display()))?;
    let config = IndexConfig::from_json(&contents)
        .with_context(|| format!("invalid index descriptor: {}", path.display()))?;
    debug!(path = %path.display(), indexes = config.indexes.len(), "index descriptor loaded");
    Ok(config)
}
