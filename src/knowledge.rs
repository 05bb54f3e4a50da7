//! Static knowledge-base catalog used in interoperability mode.
//!
//! The catalog indexes pre-built bundles of canonical concept nodes (and
//! the identity nodes that created them) by name and by external-reference
//! identifier. Galaxy resolution consults it before synthesizing a new
//! node; a match is only accepted when it is unambiguous.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::Result;
use crate::mappings::galaxy::SOURCE_NAMES;
use crate::stix::StixNode;

#[derive(Debug, Default)]
pub struct GalaxyCatalog {
    /// name or external id -> object type -> candidate nodes
    entries: HashMap<String, HashMap<String, Vec<StixNode>>>,
    identities: HashMap<String, StixNode>,
}

impl GalaxyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every named object of a pre-loaded bundle.
    pub fn index_bundle(&mut self, bundle: &Value) {
        let Some(objects) = bundle.get("objects").and_then(Value::as_array) else {
            return;
        };
        for raw in objects {
            let Some(map) = raw.as_object() else { continue };
            let node = StixNode(map.clone());
            if node.object_type() == "identity" {
                if !node.id().is_empty() {
                    self.identities
                        .entry(node.id().to_string())
                        .or_insert(node);
                }
                continue;
            }
            let Some(name) = node.get_str("name").map(str::to_string) else {
                continue;
            };
            self.insert_entry(&name, node.clone());
            if let Some(references) = node.get_array("external_references") {
                for reference in references {
                    let source_name = reference.get("source_name").and_then(Value::as_str);
                    if !source_name.map(|s| SOURCE_NAMES.contains(&s)).unwrap_or(false) {
                        continue;
                    }
                    if let Some(external_id) =
                        reference.get("external_id").and_then(Value::as_str)
                    {
                        self.insert_entry(external_id, node.clone());
                    }
                    break;
                }
            }
        }
    }

    /// Filesystem convenience: indexes every `*.json` bundle under `path`.
    pub fn from_dir(path: impl AsRef<Path>) -> Result<Self> {
        let mut catalog = Self::new();
        for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(entry.path())?;
            match serde_json::from_str::<Value>(&content) {
                Ok(bundle) => catalog.index_bundle(&bundle),
                Err(error) => {
                    tracing::warn!(
                        "skipping unparseable catalog file {}: {}",
                        entry.path().display(),
                        error
                    );
                }
            }
        }
        Ok(catalog)
    }

    fn insert_entry(&mut self, key: &str, node: StixNode) {
        let by_type = self.entries.entry(key.to_string()).or_default();
        let candidates = by_type.entry(node.object_type().to_string()).or_default();
        if !candidates.iter().any(|existing| existing.id() == node.id()) {
            candidates.push(node);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn contains_type(&self, key: &str, object_type: &str) -> bool {
        self.entries
            .get(key)
            .map(|by_type| by_type.contains_key(object_type))
            .unwrap_or(false)
    }

    pub fn identity(&self, id: &str) -> Option<&StixNode> {
        self.identities.get(id)
    }

    fn candidates(&self, key: &str, object_type: &str) -> &[StixNode] {
        self.entries
            .get(key)
            .and_then(|by_type| by_type.get(object_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The canonical node for `name`, only when exactly one candidate of
    /// the requested type carries that name.
    pub fn match_by_name(&self, name: &str, object_type: &str) -> Option<&StixNode> {
        let mut matched = None;
        let mut count = 0;
        for node in self.candidates(name, object_type) {
            if node.get_str("name") == Some(name) {
                matched = Some(node);
                count += 1;
            }
        }
        (count == 1).then_some(matched).flatten()
    }

    /// The canonical node whose external references intersect `values` on
    /// `feature` (`external_id` or `url`), only when exactly one does.
    pub fn match_by_reference(
        &self,
        values: &[String],
        feature: &str,
        name: &str,
        object_type: &str,
    ) -> Option<&StixNode> {
        let mut matched = None;
        let mut count = 0;
        for node in self.candidates(name, object_type) {
            if node.get_str("name") != Some(name) {
                continue;
            }
            if Self::references_intersect(node, values, feature) {
                matched = Some(node);
                count += 1;
            }
        }
        (count == 1).then_some(matched).flatten()
    }

    fn references_intersect(node: &StixNode, values: &[String], feature: &str) -> bool {
        let Some(references) = node.get_array("external_references") else {
            return false;
        };
        references.iter().any(|reference| {
            let source_name = reference.get("source_name").and_then(Value::as_str);
            if !source_name.map(|s| SOURCE_NAMES.contains(&s)).unwrap_or(false) {
                return false;
            }
            reference
                .get(feature)
                .and_then(Value::as_str)
                .map(|value| values.iter().any(|candidate| candidate == value))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_bundle() -> Value {
        json!({
            "type": "bundle",
            "id": "bundle--c9f8a1cc-1b49-4959-a3f9-4520b4a35a32",
            "objects": [
                {
                    "type": "identity",
                    "id": "identity--c78cb6e5-0c4b-4611-8297-d1b8b05e60cc",
                    "name": "The MITRE Corporation"
                },
                {
                    "type": "attack-pattern",
                    "id": "attack-pattern--0a3ead4e-6d47-4ccb-854c-a6a4f9d96b22",
                    "name": "Spearphishing Attachment",
                    "created_by_ref": "identity--c78cb6e5-0c4b-4611-8297-d1b8b05e60cc",
                    "external_references": [
                        {"source_name": "mitre-attack", "external_id": "T1193"}
                    ]
                },
                {
                    "type": "malware",
                    "id": "malware--d1b6c2a3-3b1a-4cbe-94f1-e85b0e91cc70",
                    "name": "Spearphishing Attachment"
                }
            ]
        })
    }

    #[test]
    fn indexes_by_name_and_external_id() {
        let mut catalog = GalaxyCatalog::new();
        catalog.index_bundle(&sample_bundle());
        assert!(catalog.contains("Spearphishing Attachment"));
        assert!(catalog.contains("T1193"));
        assert!(catalog
            .identity("identity--c78cb6e5-0c4b-4611-8297-d1b8b05e60cc")
            .is_some());
    }

    #[test]
    fn name_match_requires_uniqueness_per_type() {
        let mut catalog = GalaxyCatalog::new();
        catalog.index_bundle(&sample_bundle());
        // One attack-pattern and one malware carry the name; each type-scoped
        // lookup is unambiguous.
        assert!(catalog
            .match_by_name("Spearphishing Attachment", "attack-pattern")
            .is_some());
        assert!(catalog
            .match_by_name("Spearphishing Attachment", "malware")
            .is_some());
        assert!(catalog.match_by_name("Unknown", "attack-pattern").is_none());
    }

    #[test]
    fn ambiguous_name_match_is_refused() {
        let mut catalog = GalaxyCatalog::new();
        catalog.index_bundle(&sample_bundle());
        let mut duplicate = sample_bundle();
        duplicate["objects"][1]["id"] =
            json!("attack-pattern--59db596c-0c8b-4183-b1b2-bd4d8b67e3b4");
        catalog.index_bundle(&duplicate);
        assert!(catalog
            .match_by_name("Spearphishing Attachment", "attack-pattern")
            .is_none());
    }

    #[test]
    fn reference_match() {
        let mut catalog = GalaxyCatalog::new();
        catalog.index_bundle(&sample_bundle());
        let matched = catalog.match_by_reference(
            &["T1193".to_string()],
            "external_id",
            "Spearphishing Attachment",
            "attack-pattern",
        );
        assert!(matched.is_some());
        assert!(catalog
            .match_by_reference(
                &["T9999".to_string()],
                "external_id",
                "Spearphishing Attachment",
                "attack-pattern",
            )
            .is_none());
    }
}
