//! Loosely-typed model for the STIX 2.1 side of a conversion.
//!
//! STIX nodes are property maps rather than one struct per object type:
//! the converter builds dozens of node shapes, most of which carry
//! `x_misp_*` passthrough properties that no closed struct could hold
//! losslessly. `StixNode` keeps the JSON shape exact while exposing typed
//! accessors for the fields the engine dispatches on.

pub mod bundle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use bundle::StixBundle;

/// Namespace for deterministic v5 identifiers derived during conversion.
const BRIDGE_NAMESPACE: Uuid = Uuid::from_u128(0x5019f511_a2b3_4ac6_a3e9_b38993abf618);

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(transparent)]
pub struct StixNode(pub Map<String, Value>);

impl StixNode {
    /// A bare node, used for cyber observable objects.
    pub fn new(object_type: &str, id: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("type".into(), Value::String(object_type.into()));
        map.insert("id".into(), Value::String(id.into()));
        Self(map)
    }

    /// A domain object node, stamped with the spec version.
    pub fn sdo(object_type: &str, id: impl Into<String>) -> Self {
        let mut node = Self::new(object_type, id);
        node.0
            .insert("spec_version".into(), Value::String("2.1".into()));
        node
    }

    pub fn object_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("")
    }

    pub fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or("")
    }

    /// The UUID part of a `type--uuid` identifier.
    pub fn uuid_suffix(&self) -> Option<&str> {
        self.id().split_once("--").map(|(_, uuid)| uuid)
    }

    pub fn set(&mut self, key: &str, value: Value) -> &mut Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.set(key, Value::String(value.into()))
    }

    pub fn set_time(&mut self, key: &str, value: DateTime<Utc>) -> &mut Self {
        self.set(key, Value::String(format_timestamp(value)))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.0.get(key).and_then(Value::as_array)
    }

    pub fn get_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.0.get(key).and_then(Value::as_object)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Appends to an array property, creating it on first use.
    pub fn push_to_array(&mut self, key: &str, value: Value) -> &mut Self {
        match self.0.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                self.0.insert(key.into(), Value::Array(vec![value]));
            }
        }
        self
    }

    /// String items of a `*_refs`-style array property.
    pub fn ref_values(&self, key: &str) -> Vec<&str> {
        self.get_array(key)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// STIX serializes datetimes as RFC 3339 with millisecond precision.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Stable v5 UUID for identifiers derived from other identifiers, e.g. the
/// secondary observable of a composite attribute or a reconstructed
/// sub-attribute.
pub fn deterministic_uuid(seed: &str) -> Uuid {
    Uuid::new_v5(&BRIDGE_NAMESPACE, seed.as_bytes())
}

/// Builds a `type--uuid` identifier.
pub fn stix_id(object_type: &str, uuid: &str) -> String {
    format!("{object_type}--{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_accessors() {
        let mut node = StixNode::sdo("indicator", "indicator--0c5a7304-a313-4b7e-b6e1-6e10df496de4");
        node.set_str("pattern", "[domain-name:value = 'circl.lu']");
        node.push_to_array("labels", json!("misp:type=\"domain\""));
        node.push_to_array("labels", json!("misp:to_ids=\"true\""));

        assert_eq!(node.object_type(), "indicator");
        assert_eq!(
            node.uuid_suffix(),
            Some("0c5a7304-a313-4b7e-b6e1-6e10df496de4")
        );
        assert_eq!(node.get_str("spec_version"), Some("2.1"));
        assert_eq!(node.get_array("labels").unwrap().len(), 2);
    }

    #[test]
    fn deterministic_uuid_is_stable() {
        let a = deterministic_uuid("file--x - filename - report.docx");
        let b = deterministic_uuid("file--x - filename - report.docx");
        assert_eq!(a, b);
        assert_ne!(a, deterministic_uuid("file--x - filename - other.docx"));
    }

    #[test]
    fn timestamp_format() {
        let when = chrono::TimeZone::timestamp_opt(&Utc, 1603642920, 0).unwrap();
        assert_eq!(format_timestamp(when), "2020-10-25T16:22:00.000Z");
    }
}
