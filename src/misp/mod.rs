//! Typed model for the MISP side of a conversion.
//!
//! Field names mirror the MISP JSON schema (`Attribute`, `Object`,
//! `meta-category`, epoch-second string timestamps, base64 `data`
//! payloads), so events deserialize straight from a MISP export and the
//! reconstructed events serialize straight back into one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispEvent {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_timestamp: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(rename = "Orgc", default, skip_serializing_if = "Option::is_none")]
    pub orgc: Option<MispOrganisation>,
    #[serde(rename = "Attribute", default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<MispAttribute>,
    #[serde(rename = "Object", default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<MispObject>,
    #[serde(rename = "Galaxy", default, skip_serializing_if = "Vec::is_empty")]
    pub galaxies: Vec<MispGalaxy>,
    #[serde(rename = "Tag", default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<MispTag>,
}

impl MispEvent {
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispOrganisation {
    pub uuid: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispAttribute {
    pub uuid: String,
    #[serde(rename = "type")]
    pub attribute_type: String,
    pub value: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub to_ids: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Base64-encoded binary payload for data-bearing attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    #[serde(rename = "Tag", default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<MispTag>,
    #[serde(rename = "Galaxy", default, skip_serializing_if = "Vec::is_empty")]
    pub galaxies: Vec<MispGalaxy>,
    #[serde(rename = "Sighting", default, skip_serializing_if = "Vec::is_empty")]
    pub sightings: Vec<MispSighting>,
}

impl MispAttribute {
    pub fn new(attribute_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            attribute_type: attribute_type.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.object_relation = Some(relation.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispObject {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "meta-category", default)]
    pub meta_category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    #[serde(rename = "Attribute", default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<MispAttribute>,
    #[serde(
        rename = "ObjectReference",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub references: Vec<MispObjectReference>,
}

impl MispObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sub-fields carry the relation name that ties them into the object.
    pub fn add_attribute(&mut self, attribute: MispAttribute) {
        self.attributes.push(attribute);
    }

    pub fn add_reference(
        &mut self,
        referenced_uuid: impl Into<String>,
        relationship_type: impl Into<String>,
    ) {
        self.references.push(MispObjectReference {
            referenced_uuid: referenced_uuid.into(),
            relationship_type: relationship_type.into(),
            ..MispObjectReference::default()
        });
    }

    /// True when any sub-field requests detection.
    pub fn to_ids(&self) -> bool {
        self.attributes.iter().any(|attribute| attribute.to_ids)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispObjectReference {
    pub referenced_uuid: String,
    pub relationship_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(rename = "Object", default, skip_serializing_if = "Option::is_none")]
    pub object: Option<MispReferencedObject>,
}

impl MispObjectReference {
    /// A containment edge toward an object with the given name.
    pub fn is_included(&self, name: &str) -> bool {
        matches!(self.relationship_type.as_str(), "includes" | "included-in")
            && self
                .object
                .as_ref()
                .map(|object| object.name == name)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispReferencedObject {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispGalaxy {
    pub name: String,
    #[serde(rename = "type")]
    pub galaxy_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        rename = "GalaxyCluster",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub clusters: Vec<MispGalaxyCluster>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispGalaxyCluster {
    pub uuid: String,
    pub value: String,
    #[serde(rename = "type")]
    pub cluster_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispTag {
    pub name: String,
}

impl MispTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MispSighting {
    pub uuid: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sighting_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_sighting: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        rename = "Organisation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub organisation: Option<MispOrganisation>,
}

/// Strict decode/re-encode of a MISP `data` payload: strips the line
/// breaks some exports insert and canonicalizes padding. `None` when the
/// payload is not base64 at all.
pub fn normalize_payload(data: &str) -> Option<String> {
    let compact: String = data.split_whitespace().collect();
    BASE64
        .decode(compact.as_bytes())
        .ok()
        .map(|bytes| BASE64.encode(bytes))
}

/// MISP timestamps are epoch seconds serialized as strings.
pub fn datetime_from_timestamp(timestamp: Option<&str>) -> Option<DateTime<Utc>> {
    let seconds = timestamp?.parse::<i64>().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

/// `first_seen` / `last_seen` carry ISO 8601 datetimes.
pub fn datetime_from_str(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_misp_json() {
        let raw = r#"{
            "uuid": "a5b3e1c0-6f3f-4b52-bd1e-5a55e5c4e098",
            "info": "test event",
            "timestamp": "1603642920",
            "published": true,
            "Orgc": {"uuid": "55f6ea5e-2c60-40e5-964f-47a8950d210f", "name": "CIRCL"},
            "Attribute": [
                {"uuid": "91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f", "type": "domain",
                 "value": "circl.lu", "category": "Network activity", "to_ids": true}
            ]
        }"#;
        let event: MispEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.attributes.len(), 1);
        assert!(event.attributes[0].to_ids);
        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["Attribute"][0]["type"], "domain");
        assert_eq!(back["Orgc"]["name"], "CIRCL");
    }

    #[test]
    fn timestamp_parsing() {
        let parsed = datetime_from_timestamp(Some("1603642920")).unwrap();
        assert_eq!(parsed.timestamp(), 1603642920);
        assert!(datetime_from_timestamp(Some("not-a-number")).is_none());
        assert!(datetime_from_str("2020-10-25T16:22:00").is_some());
        assert!(datetime_from_str("2020-10-25T16:22:00+00:00").is_some());
    }

    #[test]
    fn payload_normalization() {
        assert_eq!(normalize_payload("QUJD").as_deref(), Some("QUJD"));
        // Line-wrapped exports compact to one canonical payload.
        assert_eq!(normalize_payload("QU\nJD").as_deref(), Some("QUJD"));
        assert!(normalize_payload("not base64 !!").is_none());
    }

    #[test]
    fn included_reference_detection() {
        let reference = MispObjectReference {
            referenced_uuid: "x".into(),
            relationship_type: "includes".into(),
            timestamp: None,
            object: Some(MispReferencedObject { name: "pe".into() }),
        };
        assert!(reference.is_included("pe"));
        assert!(!reference.is_included("pe-section"));
    }
}
