// Profile metadata - organization attributes stored beside the user record
//
// At rest the blob is JSON text of the shape {"org": {...}, ...}. Imports
// only ever touch keys inside "org"; everything else in the blob survives.

use crate::error::{ImportError, Result};
use crate::row::{normalize_column, ImportRow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

/// Sub-mapping of the metadata blob that imports write into
pub const ORG_NAMESPACE: &str = "org";

/// Canonical organization keys. Each one is also accepted as a column name.
pub const ORG_KEYS: &[&str] = &[
    "dealer_id",
    "champion_name",
    "champion_mobile",
    "dealer_name",
    "city",
    "state",
    "dealer_category",
    "cluster",
    "asm_1",
    "asm_2",
];

// ============================================================================
// METADATA PATCH
// ============================================================================

/// Partial `org` mapping produced from one row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch(BTreeMap<String, String>);

impl MetadataPatch {
    pub fn new() -> Self {
        MetadataPatch::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataPatch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut patch = MetadataPatch::new();
        for (k, v) in iter {
            patch.insert(k, v);
        }
        patch
    }
}

// ============================================================================
// METADATA COLUMNS
// ============================================================================

/// Maps (normalized) column names to canonical `org` keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataColumns {
    columns: BTreeMap<String, &'static str>,
}

impl MetadataColumns {
    /// Canonical keys only, each accepted under its own name
    pub fn new() -> Self {
        let columns = ORG_KEYS.iter().map(|key| (key.to_string(), *key)).collect();
        MetadataColumns { columns }
    }

    /// Canonical keys plus configured aliases (column → canonical key)
    pub fn with_aliases<'a, I>(aliases: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut columns = MetadataColumns::new();
        for (column, target) in aliases {
            columns.add_alias(column, target)?;
        }
        Ok(columns)
    }

    pub fn add_alias(&mut self, column: &str, target: &str) -> Result<()> {
        let target = normalize_column(target);
        let key = ORG_KEYS
            .iter()
            .copied()
            .find(|k| *k == target)
            .ok_or_else(|| {
                ImportError::Config(format!(
                    "metadata alias `{}` targets unknown key `{}`",
                    column, target
                ))
            })?;

        let column = normalize_column(column);
        if column.is_empty() {
            return Err(ImportError::Config("metadata alias with blank column name".to_string()));
        }
        // A canonical column always feeds its own key
        if ORG_KEYS.contains(&column.as_str()) && column != key {
            return Err(ImportError::Config(format!(
                "metadata alias `{}` is already the canonical column for `{}`",
                column, column
            )));
        }
        self.columns.insert(column, key);
        Ok(())
    }

    /// Build the patch for one row. Absent columns are omitted; present ones
    /// contribute their trimmed value. If two columns feed the same key the
    /// canonical column name wins over an alias.
    pub fn extract(&self, row: &ImportRow) -> MetadataPatch {
        let mut patch = MetadataPatch::new();
        for (column, key) in &self.columns {
            if column.as_str() == *key {
                continue;
            }
            if let Some(cell) = row.get(column) {
                patch.insert(*key, cell.to_trimmed());
            }
        }
        for key in ORG_KEYS {
            if let Some(cell) = row.get(key) {
                patch.insert(*key, cell.to_trimmed());
            }
        }
        patch
    }
}

impl Default for MetadataColumns {
    fn default() -> Self {
        MetadataColumns::new()
    }
}

// ============================================================================
// PROFILE METADATA
// ============================================================================

/// One-to-one profile record; only the serialized blob is modelled here
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    /// Serialized JSON. Empty string means "no metadata yet".
    pub meta: String,
}

impl ProfileMetadata {
    pub fn new(meta: impl Into<String>) -> Self {
        ProfileMetadata { meta: meta.into() }
    }

    /// Blob parsed as a JSON object. Anything else reads as empty.
    pub fn parsed(&self) -> Map<String, Value> {
        parse_blob(&self.meta)
    }

    /// Current `org` sub-mapping (empty when missing or not an object)
    pub fn org(&self) -> Map<String, Value> {
        match self.parsed().remove(ORG_NAMESPACE) {
            Some(Value::Object(org)) => org,
            _ => Map::new(),
        }
    }
}

/// Lenient read of a stored blob
fn parse_blob(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(kind = json_kind(&other), "profile metadata is not a JSON object, treating as empty");
            Map::new()
        }
        Err(e) => {
            warn!(error = %e, "profile metadata is not valid JSON, treating as empty");
            Map::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Merge `patch` into the `org` sub-mapping of `profile`.
///
/// Creates the profile, blob, and `org` mapping as needed. Keys not in the
/// patch are left alone. An empty patch returns the profile unchanged.
pub fn apply_metadata_patch(profile: Option<ProfileMetadata>, patch: &MetadataPatch) -> ProfileMetadata {
    let profile = profile.unwrap_or_default();
    if patch.is_empty() {
        return profile;
    }

    let mut blob = profile.parsed();
    let org = blob
        .entry(ORG_NAMESPACE)
        .or_insert_with(|| Value::Object(Map::new()));
    if !org.is_object() {
        warn!(kind = json_kind(org), "`org` metadata is not an object, replacing");
        *org = Value::Object(Map::new());
    }

    if let Value::Object(org) = org {
        for (key, value) in patch.iter() {
            org.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    ProfileMetadata {
        meta: Value::Object(blob).to_string(),
    }
}
