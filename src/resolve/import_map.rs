//! Import map support (`import_map.json`).
//!
//! Only the `imports` field is honored: exact keys map whole specifiers,
//! keys ending in `/` map prefixes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct ImportMapFile {
    #[serde(default)]
    imports: BTreeMap<String, String>,
}

/// Parsed import map, longest-key-first for prefix matching.
#[derive(Debug, Default, Clone)]
pub struct ImportMap {
    entries: Vec<(String, String)>,
}

impl ImportMap {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read import map {}", path.display()))?;
        let file: ImportMapFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse import map {}", path.display()))?;
        Ok(Self::from_pairs(file.imports.into_iter().collect()))
    }

    /// Build from raw pairs (tests and programmatic use).
    pub fn from_pairs(mut pairs: Vec<(String, String)>) -> Self {
        // Longest keys first so the most specific prefix wins.
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries: pairs }
    }

    /// Apply the map to a specifier. Unmatched specifiers pass through.
    pub fn resolve(&self, specifier: &str) -> String {
        for (key, value) in &self.entries {
            if key.ends_with('/') {
                if let Some(rest) = specifier.strip_prefix(key.as_str()) {
                    return format!("{value}{rest}");
                }
            } else if specifier == key {
                return value.clone();
            }
        }
        specifier.to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
