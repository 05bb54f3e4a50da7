//! Inbound pipeline: STIX 2.1 bundles back to MISP events.
//!
//! [`StixToMisp`] indexes the bundle's observable objects into an
//! arena-style store (`reference -> { node, used-per-event, result }`),
//! walks the graph once per event, reconstructs MISP objects and
//! attributes, converts galaxy-like domain objects into clusters and
//! assembles the enclosing event from the report node.

mod galaxies;
mod observables;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ConversionError, ConversionLog, Result};
use crate::misp::{MispAttribute, MispEvent, MispObject, MispOrganisation, MispTag};
use crate::stix::{deterministic_uuid, StixBundle, StixNode};

/// Observable object types handled by the graph walker.
const OBSERVABLE_TYPES: &[&str] = &[
    "artifact",
    "autonomous-system",
    "directory",
    "domain-name",
    "email-addr",
    "email-message",
    "file",
    "ipv4-addr",
    "ipv6-addr",
    "mac-addr",
    "mutex",
    "network-traffic",
    "process",
    "software",
    "url",
    "user-account",
    "windows-registry-key",
    "x509-certificate",
];

/// Handle to a reconstructed result, by MISP UUID.
#[derive(Debug, Clone)]
pub(crate) enum MispRef {
    Object(String),
    Attribute(String),
}

impl MispRef {
    pub(crate) fn uuid(&self) -> &str {
        match self {
            MispRef::Object(uuid) | MispRef::Attribute(uuid) => uuid,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ObservableEntry {
    pub(crate) node: StixNode,
    /// Materialized-for-this-event flags, keyed per originating event.
    used: HashMap<String, bool>,
    result: Option<MispRef>,
}

/// The event under reconstruction, with index maps for reference wiring.
#[derive(Debug, Default)]
pub(crate) struct EventScope {
    pub(crate) event: MispEvent,
    object_index: HashMap<String, usize>,
}

impl EventScope {
    fn new() -> Self {
        let mut scope = Self::default();
        scope.event.uuid = Uuid::new_v4().to_string();
        scope
    }

    /// Adding returns the UUID handle so the caller can wire references.
    pub(crate) fn add_object(&mut self, object: MispObject) -> String {
        let uuid = object.uuid.clone();
        self.object_index
            .insert(uuid.clone(), self.event.objects.len());
        self.event.objects.push(object);
        uuid
    }

    pub(crate) fn add_attribute(&mut self, attribute: MispAttribute) -> String {
        let uuid = attribute.uuid.clone();
        self.event.attributes.push(attribute);
        uuid
    }

    pub(crate) fn add_object_attribute(&mut self, object_uuid: &str, attribute: MispAttribute) {
        if let Some(index) = self.object_index.get(object_uuid) {
            self.event.objects[*index].add_attribute(attribute);
        }
    }

    pub(crate) fn add_object_reference(
        &mut self,
        object_uuid: &str,
        referenced_uuid: &str,
        relationship: &str,
    ) {
        if let Some(index) = self.object_index.get(object_uuid) {
            self.event.objects[*index].add_reference(referenced_uuid, relationship);
        }
    }
}

/// Converter for the STIX -> MISP direction.
pub struct StixToMisp {
    observables: HashMap<String, ObservableEntry>,
    identities: HashMap<String, StixNode>,
    current: Option<EventScope>,
    pub(crate) log: ConversionLog,
}

impl StixToMisp {
    pub fn new() -> Self {
        Self {
            observables: HashMap::new(),
            identities: HashMap::new(),
            current: None,
            log: ConversionLog::new(),
        }
    }

    pub fn warnings(&self) -> &[String] {
        self.log.warnings()
    }

    pub fn errors(&self) -> &[String] {
        self.log.errors()
    }

    /// Reconstructs one MISP event from a bundle. The observable store
    /// persists across calls, so a shared observable revisited from a
    /// different event is materialized again for that event while staying
    /// deduplicated within each.
    pub fn parse_bundle(&mut self, bundle: &StixBundle) -> Result<MispEvent> {
        self.current = Some(EventScope::new());
        let mut report = None;
        let mut observed_data = Vec::new();
        let mut galaxy_nodes = Vec::new();
        let mut custom_attributes = Vec::new();
        let mut custom_objects = Vec::new();
        let mut marking_nodes = Vec::new();
        let mut observable_order = Vec::new();
        for node in &bundle.objects {
            match node.object_type() {
                "report" | "grouping" => {
                    if report.is_none() {
                        report = Some(node.clone());
                    }
                }
                "identity" => {
                    self.identities.insert(node.id().to_string(), node.clone());
                }
                "marking-definition" => marking_nodes.push(node.clone()),
                "observed-data" => observed_data.push(node.clone()),
                "x-misp-attribute" => custom_attributes.push(node.clone()),
                "x-misp-object" => custom_objects.push(node.clone()),
                object_type if galaxies::is_galaxy_type(object_type) => {
                    galaxy_nodes.push(node.clone())
                }
                object_type if OBSERVABLE_TYPES.contains(&object_type) => {
                    let reference = node.id().to_string();
                    self.observables
                        .entry(reference.clone())
                        .and_modify(|entry| entry.node = node.clone())
                        .or_insert_with(|| ObservableEntry {
                            node: node.clone(),
                            used: HashMap::new(),
                            result: None,
                        });
                    observable_order.push(reference);
                }
                "relationship" | "sighting" | "note" | "opinion" => {}
                "indicator" => self.log.warn(format!(
                    "indicator {} skipped: pattern reconstruction is not supported",
                    node.id()
                )),
                other => self
                    .log
                    .warn(format!("STIX object type not converted: {other}")),
            }
        }
        let event_uuid = self.assemble_event_metadata(report.as_ref());
        for marking in &marking_nodes {
            self.handle_marking_definition(marking);
        }
        for node in &observed_data {
            for object_ref in node
                .ref_values("object_refs")
                .iter()
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
            {
                let _ = self.resolve_observable(&object_ref);
            }
        }
        // Standalone observables never reached through an observed-data.
        for reference in &observable_order {
            let materialized = self
                .observables
                .get(reference)
                .map(|entry| entry.used.get(&event_uuid).copied().unwrap_or(false))
                .unwrap_or(true);
            if !materialized {
                let _ = self.resolve_observable(reference);
            }
        }
        self.build_galaxies(&galaxy_nodes);
        for node in &custom_attributes {
            self.reconstruct_custom_attribute(node);
        }
        for node in &custom_objects {
            self.reconstruct_custom_object(node);
        }
        let scope = self
            .current
            .take()
            .ok_or_else(|| ConversionError::dispatch("event scope"))?;
        Ok(scope.event)
    }

    // -----------------------------------------------------------------
    // context plumbing
    // -----------------------------------------------------------------

    pub(crate) fn scope(&mut self) -> &mut EventScope {
        self.current.as_mut().expect("active event scope")
    }

    pub(crate) fn event_uuid(&self) -> String {
        self.current
            .as_ref()
            .map(|scope| scope.event.uuid.clone())
            .unwrap_or_default()
    }

    pub(crate) fn observable_node(&self, reference: &str) -> Result<StixNode> {
        self.observables
            .get(reference)
            .map(|entry| entry.node.clone())
            .ok_or_else(|| ConversionError::missing_field("observable", reference.to_string()))
    }

    /// Cache hit for the current event: the node was already materialized
    /// and subsequent visits short-circuit to the same result.
    pub(crate) fn cached_result(&self, reference: &str) -> Option<MispRef> {
        let entry = self.observables.get(reference)?;
        let event_uuid = self.event_uuid();
        if entry.used.get(&event_uuid).copied().unwrap_or(false) {
            entry.result.clone()
        } else {
            None
        }
    }

    pub(crate) fn mark_used(&mut self, reference: &str, result: MispRef) {
        let event_uuid = self.event_uuid();
        if let Some(entry) = self.observables.get_mut(reference) {
            entry.used.insert(event_uuid, true);
            entry.result = Some(result);
        }
    }

    /// Scans the store, e.g. for addresses claiming membership of an AS.
    pub(crate) fn observable_entries(&self) -> impl Iterator<Item = (&String, &StixNode)> {
        self.observables
            .iter()
            .map(|(reference, entry)| (reference, &entry.node))
    }

    // -----------------------------------------------------------------
    // event assembly
    // -----------------------------------------------------------------

    fn assemble_event_metadata(&mut self, report: Option<&StixNode>) -> String {
        let orgc = report
            .and_then(|node| node.get_str("created_by_ref"))
            .and_then(|identity_id| self.identities.get(identity_id))
            .map(|identity| MispOrganisation {
                uuid: identity.uuid_suffix().unwrap_or_default().to_string(),
                name: identity.get_str("name").unwrap_or_default().to_string(),
            });
        match report {
            Some(node) => {
                let (uuid, _) = sanitize_ref_uuid(node.id());
                let scope = self.scope();
                scope.event.uuid = uuid;
                scope.event.info = node.get_str("name").map(str::to_string);
                scope.event.timestamp = node
                    .get_str("modified")
                    .and_then(parse_stix_datetime)
                    .map(epoch_string);
                if node.object_type() == "report" {
                    if let Some(published) =
                        node.get_str("published").and_then(parse_stix_datetime)
                    {
                        scope.event.published = true;
                        scope.event.publish_timestamp = Some(epoch_string(published));
                    }
                }
                scope.event.orgc = orgc;
            }
            None => {
                self.log
                    .warn("bundle has no report or grouping, assembling a synthetic event");
            }
        }
        self.event_uuid()
    }

    fn handle_marking_definition(&mut self, marking: &StixNode) {
        if marking.get_str("definition_type") != Some("tlp") {
            return;
        }
        let Some(level) = marking
            .get_object("definition")
            .and_then(|definition| definition.get("tlp"))
            .and_then(serde_json::Value::as_str)
        else {
            return;
        };
        let tag = format!("tlp:{level}");
        let scope = self.scope();
        if !scope.event.tags.iter().any(|existing| existing.name == tag) {
            scope.event.tags.push(MispTag::new(tag));
        }
    }

    // -----------------------------------------------------------------
    // custom node reconstruction
    // -----------------------------------------------------------------

    fn reconstruct_custom_attribute(&mut self, node: &StixNode) {
        let (uuid, id_comment) = sanitize_ref_uuid(node.id());
        let mut attribute = MispAttribute::new(
            node.get_str("x_misp_type").unwrap_or("text"),
            node.get_str("x_misp_value").unwrap_or_default(),
        );
        attribute.uuid = uuid;
        if let Some(category) = node.get_str("x_misp_category") {
            attribute.category = category.to_string();
        }
        attribute.comment = node
            .get_str("x_misp_comment")
            .map(str::to_string)
            .or(id_comment);
        attribute.data = node.get_str("x_misp_data").map(str::to_string);
        attribute.to_ids = node
            .ref_values("labels")
            .iter()
            .any(|label| *label == "misp:to_ids=\"true\"");
        attribute.timestamp = node
            .get_str("modified")
            .and_then(parse_stix_datetime)
            .map(epoch_string);
        self.scope().add_attribute(attribute);
    }

    fn reconstruct_custom_object(&mut self, node: &StixNode) {
        let (uuid, id_comment) = sanitize_ref_uuid(node.id());
        let mut object = MispObject::new(node.get_str("x_misp_name").unwrap_or("custom-object"));
        object.uuid = uuid;
        object.meta_category = node
            .get_str("x_misp_meta_category")
            .unwrap_or_default()
            .to_string();
        object.comment = node
            .get_str("x_misp_comment")
            .map(str::to_string)
            .or(id_comment);
        object.timestamp = node
            .get_str("modified")
            .and_then(parse_stix_datetime)
            .map(epoch_string);
        if let Some(attributes) = node.get_array("x_misp_attributes") {
            for raw in attributes {
                let Some(entry) = raw.as_object() else { continue };
                let get = |key: &str| entry.get(key).and_then(serde_json::Value::as_str);
                let mut attribute = MispAttribute::new(
                    get("type").unwrap_or("text"),
                    get("value").unwrap_or_default(),
                );
                if let Some(attribute_uuid) = get("uuid") {
                    attribute.uuid = attribute_uuid.to_string();
                }
                attribute.object_relation = get("object_relation").map(str::to_string);
                if let Some(category) = get("category") {
                    attribute.category = category.to_string();
                }
                attribute.comment = get("comment").map(str::to_string);
                attribute.data = get("data").map(str::to_string);
                attribute.to_ids = entry
                    .get("to_ids")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                object.add_attribute(attribute);
            }
        }
        self.scope().add_object(object);
    }
}

impl Default for StixToMisp {
    fn default() -> Self {
        Self::new()
    }
}

/// The UUID part of a STIX identifier; identifiers without a valid UUID
/// suffix sanitize to a stable derived UUID plus a comment keeping the
/// original reference.
pub(crate) fn sanitize_ref_uuid(stix_id: &str) -> (String, Option<String>) {
    if let Some((_, suffix)) = stix_id.split_once("--") {
        if Uuid::parse_str(suffix).is_ok() {
            return (suffix.to_string(), None);
        }
    }
    (
        deterministic_uuid(stix_id).to_string(),
        Some(format!("Original STIX id: {stix_id}")),
    )
}

pub(crate) fn parse_stix_datetime(value: &str) -> Option<DateTime<Utc>> {
    crate::misp::datetime_from_str(value)
}

pub(crate) fn epoch_string(value: DateTime<Utc>) -> String {
    value.timestamp().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_reference_uuids() {
        let (uuid, comment) =
            sanitize_ref_uuid("file--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f");
        assert_eq!(uuid, "91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f");
        assert!(comment.is_none());

        let (derived, comment) = sanitize_ref_uuid("file--not-a-uuid");
        assert!(Uuid::parse_str(&derived).is_ok());
        assert_eq!(comment.unwrap(), "Original STIX id: file--not-a-uuid");
    }

    #[test]
    fn scope_reference_wiring() {
        let mut scope = EventScope::new();
        let object_uuid = scope.add_object(MispObject::new("file"));
        scope.add_object_attribute(
            &object_uuid,
            MispAttribute::new("filename", "a.txt").with_relation("filename"),
        );
        scope.add_object_reference(&object_uuid, "other-uuid", "contains");
        assert_eq!(scope.event.objects[0].attributes.len(), 1);
        assert_eq!(scope.event.objects[0].references[0].relationship_type, "contains");
    }
}
