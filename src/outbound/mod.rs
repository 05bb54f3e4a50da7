//! Outbound pipeline: MISP events and attribute collections to STIX 2.1.
//!
//! [`MispToStix`] is the conversion context. It owns the produced node
//! list, the top-level `object_refs`, the pending relationship list, the
//! marking-definition cache and the unique-ID map. Collections reset when
//! a result is extracted so one converter instance can be reused across
//! conversions; the unique-ID map survives [`MispToStix::fetch_objects`]
//! (cross-event identity dedup within a feed run) and only resets when a
//! bundle is materialized with [`MispToStix::into_bundle`].

mod attributes;
mod galaxies;
mod objects;
mod observables;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::{ConversionLog, Result};
use crate::knowledge::GalaxyCatalog;
use crate::misp::{
    self, MispAttribute, MispEvent, MispObject, MispObjectReference, MispOrganisation,
    MispSighting,
};
use crate::stix::{deterministic_uuid, stix_id, StixBundle, StixNode};

/// Identity used when an event carries no usable organisation.
pub const MISP_IDENTITY_ID: &str = "identity--55f6ea65-aa10-4c5a-bf01-4f84950d210f";

const CONVERTER_TOOL_LABEL: &str = "misp:tool=\"misp-stix-bridge\"";

#[derive(Debug)]
struct MarkingEntry {
    node: StixNode,
    used: bool,
}

#[derive(Debug)]
enum RelationshipTarget {
    Resolved(String),
    /// A MISP object UUID still to be matched against emitted object refs.
    Undefined(String),
}

#[derive(Debug)]
struct PendingRelationship {
    source_ref: String,
    target: RelationshipTarget,
    relationship_type: String,
    timestamp: DateTime<Utc>,
}

/// Objects parked for the deferred file/PE second pass, in arrival order.
#[derive(Debug, Default)]
pub(crate) struct PendingObjects {
    pub(crate) file: Vec<(String, bool, MispObject)>,
    pub(crate) pe: Vec<(String, bool, MispObject)>,
    pub(crate) pe_section: Vec<(String, bool, MispObject)>,
}

impl PendingObjects {
    pub(crate) fn contains(&self, uuid: &str) -> bool {
        let hit = |table: &Vec<(String, bool, MispObject)>| {
            table.iter().any(|(entry_uuid, _, _)| entry_uuid == uuid)
        };
        hit(&self.file) || hit(&self.pe) || hit(&self.pe_section)
    }

    pub(crate) fn take_pe(&mut self, uuid: &str) -> Option<(bool, MispObject)> {
        let position = self
            .pe
            .iter()
            .position(|(entry_uuid, _, _)| entry_uuid == uuid)?;
        let (_, to_ids, object) = self.pe.remove(position);
        Some((to_ids, object))
    }

    pub(crate) fn take_section(&mut self, uuid: &str) -> Option<(bool, MispObject)> {
        let position = self
            .pe_section
            .iter()
            .position(|(entry_uuid, _, _)| entry_uuid == uuid)?;
        let (_, to_ids, object) = self.pe_section.remove(position);
        Some((to_ids, object))
    }

    pub(crate) fn section_ids_flag(&self, uuid: &str) -> Option<bool> {
        self.pe_section
            .iter()
            .find(|(entry_uuid, _, _)| entry_uuid == uuid)
            .map(|(_, to_ids, _)| *to_ids)
    }
}

/// Converter for the MISP -> STIX direction.
pub struct MispToStix {
    interoperability: bool,
    catalog: Option<GalaxyCatalog>,
    ids: HashMap<String, String>,
    objects: Vec<StixNode>,
    object_refs: Vec<String>,
    relationships: Vec<PendingRelationship>,
    markings: BTreeMap<String, MarkingEntry>,
    identity_id: String,
    event_timestamp: Option<DateTime<Utc>>,
    index: usize,
    with_report_refs: bool,
    pub(crate) pending: PendingObjects,
    pub(crate) log: ConversionLog,
}

impl MispToStix {
    pub fn new(interoperability: bool) -> Self {
        Self {
            interoperability,
            catalog: None,
            ids: HashMap::new(),
            objects: Vec::new(),
            object_refs: Vec::new(),
            relationships: Vec::new(),
            markings: BTreeMap::new(),
            identity_id: MISP_IDENTITY_ID.to_string(),
            event_timestamp: None,
            index: 0,
            with_report_refs: true,
            pending: PendingObjects::default(),
            log: ConversionLog::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: GalaxyCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Seeds the unique-ID map, e.g. from a previous feed chunk.
    pub fn populate_unique_ids(&mut self, ids: HashMap<String, String>) {
        self.ids.extend(ids);
    }

    pub fn unique_ids(&self) -> &HashMap<String, String> {
        &self.ids
    }

    pub fn warnings(&self) -> &[String] {
        self.log.warnings()
    }

    pub fn errors(&self) -> &[String] {
        self.log.errors()
    }

    pub fn object_refs(&self) -> &[String] {
        &self.object_refs
    }

    pub fn stix_objects(&self) -> &[StixNode] {
        &self.objects
    }

    /// Converts one MISP event. The produced nodes accumulate on the
    /// context until extracted.
    pub fn parse_event(&mut self, event: &MispEvent) -> Result<()> {
        self.with_report_refs = true;
        self.object_refs.clear();
        self.relationships.clear();
        self.index = self.objects.len();
        self.event_timestamp = Some(
            misp::datetime_from_timestamp(event.timestamp.as_deref()).unwrap_or_else(Utc::now),
        );
        self.handle_event_identity(event);
        for attribute in &event.attributes {
            self.resolve_attribute(attribute);
        }
        self.resolve_objects(&event.objects);
        let remaining_tags = self.handle_event_tags_and_galaxies(event);
        self.flush_relationships();
        let report = self.generate_event_report(event, &remaining_tags);
        let position = self.index.min(self.objects.len());
        self.objects.insert(position, report);
        // After the report: its own tags may have minted new markings.
        self.flush_markings();
        self.index = self.objects.len();
        Ok(())
    }

    /// Converts a bare attribute collection (no enclosing event). Results
    /// are not tracked in `object_refs` since there is no report node.
    pub fn parse_attributes(&mut self, attributes: &[MispAttribute]) -> Result<()> {
        self.with_report_refs = false;
        self.relationships.clear();
        self.event_timestamp = Some(Utc::now());
        self.handle_default_identity();
        for attribute in attributes {
            self.resolve_attribute(attribute);
        }
        self.flush_relationships();
        self.flush_markings();
        Ok(())
    }

    /// Extracts the produced nodes for external envelope assembly. Resets
    /// the per-conversion collections but keeps the unique-ID map so
    /// identities stay deduplicated across events of one run.
    pub fn fetch_objects(&mut self) -> Vec<StixNode> {
        self.object_refs.clear();
        self.relationships.clear();
        self.index = 0;
        std::mem::take(&mut self.objects)
    }

    /// Materializes a bundle and fully resets the context, including the
    /// unique-ID map and the marking cache.
    pub fn into_bundle(&mut self) -> StixBundle {
        let objects = std::mem::take(&mut self.objects);
        self.object_refs.clear();
        self.relationships.clear();
        self.markings.clear();
        self.ids.clear();
        self.index = 0;
        StixBundle::new(objects)
    }

    // -----------------------------------------------------------------
    // shared context plumbing
    // -----------------------------------------------------------------

    pub(crate) fn event_timestamp(&self) -> DateTime<Utc> {
        self.event_timestamp.unwrap_or_else(Utc::now)
    }

    pub(crate) fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub(crate) fn interoperability(&self) -> bool {
        self.interoperability && self.catalog.is_some()
    }

    pub(crate) fn catalog(&self) -> Option<&GalaxyCatalog> {
        self.catalog.as_ref()
    }

    pub(crate) fn lookup_id(&self, key: &str) -> Option<&String> {
        self.ids.get(key)
    }

    pub(crate) fn register_id(&mut self, key: impl Into<String>, id: impl Into<String>) {
        self.ids.insert(key.into(), id.into());
    }

    /// Appends a node and tracks it in the top-level refs.
    pub(crate) fn append_sdo(&mut self, node: StixNode) {
        self.object_refs.push(node.id().to_string());
        self.objects.push(node);
    }

    pub(crate) fn append_sdo_without_refs(&mut self, node: StixNode) {
        self.objects.push(node);
    }

    /// Result-handling dispatch: event conversions track refs for the
    /// report node, collection conversions do not.
    pub(crate) fn append_result(&mut self, node: StixNode) {
        if self.with_report_refs {
            self.append_sdo(node);
        } else {
            self.append_sdo_without_refs(node);
        }
    }

    pub(crate) fn handle_object_ref(&mut self, object_ref: String) {
        if !self.object_refs.contains(&object_ref) {
            self.object_refs.push(object_ref);
        }
    }

    // -----------------------------------------------------------------
    // identities
    // -----------------------------------------------------------------

    fn create_identity(&self, identity_id: &str, name: &str) -> StixNode {
        let mut identity = StixNode::sdo("identity", identity_id);
        identity.set_str("name", name);
        identity.set_str("identity_class", "organization");
        identity.set_time("created", self.event_timestamp());
        identity.set_time("modified", self.event_timestamp());
        identity
    }

    fn handle_event_identity(&mut self, event: &MispEvent) {
        match &event.orgc {
            Some(orgc) if !orgc.uuid.is_empty() && !orgc.name.is_empty() => {
                let identity_id = stix_id("identity", &orgc.uuid);
                self.identity_id = identity_id.clone();
                if !self.ids.contains_key(&identity_id) {
                    self.ids.insert(identity_id.clone(), identity_id.clone());
                    let identity = self.create_identity(&identity_id, &orgc.name);
                    self.append_sdo_without_refs(identity);
                    self.index += 1;
                }
            }
            Some(orgc) => {
                self.log.warn(format!(
                    "event {}: incomplete Orgc (uuid: '{}', name: '{}'), using default identity",
                    event.uuid, orgc.uuid, orgc.name
                ));
                self.handle_default_identity();
            }
            None => {
                self.log.warn(format!(
                    "event {}: missing Orgc, using default identity",
                    event.uuid
                ));
                self.handle_default_identity();
            }
        }
    }

    pub(crate) fn handle_default_identity(&mut self) {
        self.identity_id = MISP_IDENTITY_ID.to_string();
        if !self.ids.contains_key(MISP_IDENTITY_ID) {
            self.ids
                .insert(MISP_IDENTITY_ID.to_string(), MISP_IDENTITY_ID.to_string());
            let identity = self.create_identity(MISP_IDENTITY_ID, "MISP");
            self.append_sdo_without_refs(identity);
            self.index += 1;
        }
    }

    fn handle_sighting_identity(&mut self, organisation: &MispOrganisation) -> String {
        let identity_id = stix_id("identity", &organisation.uuid);
        if !self.ids.contains_key(&identity_id) {
            self.ids.insert(identity_id.clone(), identity_id.clone());
            let identity = self.create_identity(&identity_id, &organisation.name);
            self.append_sdo_without_refs(identity);
            self.index += 1;
        }
        identity_id
    }

    /// Inserts an identity coming from the knowledge-base catalog ahead of
    /// the converted content.
    pub(crate) fn register_catalog_identity(&mut self, identity: StixNode) {
        let identity_id = identity.id().to_string();
        if !self.ids.contains_key(&identity_id) {
            self.ids.insert(identity_id.clone(), identity_id);
            self.objects.insert(0, identity);
            self.index += 1;
        }
    }

    // -----------------------------------------------------------------
    // labels, kill chains, time fields
    // -----------------------------------------------------------------

    pub(crate) fn attribute_labels(attribute: &MispAttribute) -> Value {
        let mut labels = vec![json!(format!(
            "misp:type=\"{}\"",
            attribute.attribute_type
        ))];
        if !attribute.category.is_empty() {
            labels.push(json!(format!("misp:category=\"{}\"", attribute.category)));
        }
        if attribute.to_ids {
            labels.push(json!("misp:to_ids=\"true\""));
        }
        Value::Array(labels)
    }

    pub(crate) fn object_labels(object: &MispObject, to_ids: Option<bool>) -> Value {
        let mut labels = vec![
            json!(format!("misp:name=\"{}\"", object.name.replace('|', "-"))),
            json!(format!("misp:meta-category=\"{}\"", object.meta_category)),
        ];
        if let Some(flag) = to_ids {
            labels.push(json!(format!("misp:to_ids=\"{flag}\"")));
        }
        Value::Array(labels)
    }

    pub(crate) fn killchain(category: &str) -> Value {
        json!([{"kill_chain_name": "misp-category", "phase_name": category}])
    }

    pub(crate) fn record_timestamp(&self, timestamp: Option<&str>) -> DateTime<Utc> {
        misp::datetime_from_timestamp(timestamp).unwrap_or_else(|| self.event_timestamp())
    }

    /// `created`/`modified`/`valid_from`, plus `valid_until` when a
    /// coherent `last_seen` exists.
    pub(crate) fn indicator_time_fields(
        &self,
        node: &mut StixNode,
        timestamp: Option<&str>,
        first_seen: Option<&str>,
        last_seen: Option<&str>,
    ) {
        let stamp = self.record_timestamp(timestamp);
        node.set_time("created", stamp);
        node.set_time("modified", stamp);
        let valid_from = first_seen.and_then(misp::datetime_from_str).unwrap_or(stamp);
        node.set_time("valid_from", valid_from);
        if let Some(valid_until) = last_seen.and_then(misp::datetime_from_str) {
            if valid_from < valid_until {
                node.set_time("valid_until", valid_until);
            }
        }
    }

    /// `created`/`modified`/`first_observed`/`last_observed`, clamped into
    /// a coherent interval.
    pub(crate) fn observable_time_fields(
        &self,
        node: &mut StixNode,
        timestamp: Option<&str>,
        first_seen: Option<&str>,
        last_seen: Option<&str>,
    ) {
        let stamp = self.record_timestamp(timestamp);
        node.set_time("created", stamp);
        node.set_time("modified", stamp);
        let mut first_observed = first_seen.and_then(misp::datetime_from_str).unwrap_or(stamp);
        let mut last_observed = last_seen.and_then(misp::datetime_from_str).unwrap_or(stamp);
        if first_observed > last_observed {
            if last_seen.is_some() {
                first_observed = last_observed;
            } else {
                last_observed = first_observed;
            }
        }
        node.set_time("first_observed", first_observed);
        node.set_time("last_observed", last_observed);
    }

    /// Canonical `payload_bin` for an artifact node; payloads that fail a
    /// strict base64 decode pass through verbatim with a warning.
    pub(crate) fn checked_payload(&mut self, owner_uuid: &str, data: &str) -> String {
        match misp::normalize_payload(data) {
            Some(payload) => payload,
            None => {
                self.log.warn(format!(
                    "payload attached to {owner_uuid} is not valid base64, keeping it verbatim"
                ));
                data.to_string()
            }
        }
    }

    // -----------------------------------------------------------------
    // markings
    // -----------------------------------------------------------------

    /// TLP tags become cached marking definitions; anything else stays a
    /// label on the node.
    pub(crate) fn handle_markings(&mut self, node: &mut StixNode, tags: &[String]) {
        for tag in tags {
            if tag.to_ascii_lowercase().starts_with("tlp:") {
                let marking_id = self.marking_definition_id(tag);
                node.push_to_array("object_marking_refs", json!(marking_id));
            } else {
                node.push_to_array("labels", json!(tag));
            }
        }
    }

    fn marking_definition_id(&mut self, tag: &str) -> String {
        if let Some(entry) = self.markings.get(tag) {
            return entry.node.id().to_string();
        }
        let marking_id = stix_id("marking-definition", &deterministic_uuid(tag).to_string());
        let mut node = StixNode::sdo("marking-definition", &marking_id);
        node.set_time("created", self.event_timestamp());
        node.set_str("definition_type", "tlp");
        node.set(
            "definition",
            json!({"tlp": tag[4..].to_ascii_lowercase()}),
        );
        self.markings
            .insert(tag.to_string(), MarkingEntry { node, used: false });
        marking_id
    }

    /// Appends every cached marking definition that has not been emitted
    /// yet. Called once per conversion, after the content nodes.
    pub(crate) fn flush_markings(&mut self) {
        let mut flushed = Vec::new();
        for entry in self.markings.values_mut() {
            if !entry.used {
                entry.used = true;
                flushed.push(entry.node.clone());
            }
        }
        for node in flushed {
            self.append_sdo_without_refs(node);
        }
    }

    // -----------------------------------------------------------------
    // sightings
    // -----------------------------------------------------------------

    pub(crate) fn handle_sightings(&mut self, sightings: &[MispSighting], reference_id: &str) {
        for sighting in sightings {
            match sighting.sighting_type.as_deref() {
                Some("0") => {
                    let mut node =
                        StixNode::sdo("sighting", &stix_id("sighting", &sighting.uuid));
                    node.set_str("sighting_of_ref", reference_id);
                    if let Some(stamp) =
                        misp::datetime_from_timestamp(sighting.date_sighting.as_deref())
                    {
                        node.set_time("created", stamp);
                        node.set_time("modified", stamp);
                    }
                    if let Some(organisation) = &sighting.organisation {
                        let identity_id = self.handle_sighting_identity(organisation);
                        node.set("where_sighted_refs", json!([identity_id]));
                    }
                    if let Some(source) = &sighting.source {
                        node.set_str("description", source);
                    }
                    self.append_result(node);
                }
                Some("1") => {
                    let mut node = StixNode::sdo("opinion", &stix_id("opinion", &sighting.uuid));
                    node.set_str("opinion", "strongly-disagree");
                    node.set_str("explanation", "False positive Sighting");
                    node.set("object_refs", json!([reference_id]));
                    if let Some(stamp) =
                        misp::datetime_from_timestamp(sighting.date_sighting.as_deref())
                    {
                        node.set_time("created", stamp);
                        node.set_time("modified", stamp);
                    }
                    if let Some(source) = &sighting.source {
                        node.set_str("x_misp_source", source);
                    }
                    self.append_result(node);
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------
    // relationships
    // -----------------------------------------------------------------

    pub(crate) fn add_galaxy_relationship(
        &mut self,
        source_ref: &str,
        target_ref: &str,
        relationship_type: &str,
        timestamp: DateTime<Utc>,
    ) {
        self.relationships.push(PendingRelationship {
            source_ref: source_ref.to_string(),
            target: RelationshipTarget::Resolved(target_ref.to_string()),
            relationship_type: relationship_type.to_string(),
            timestamp,
        });
    }

    /// Object references whose targets are MISP UUIDs, matched against
    /// emitted refs at flush time. References into the pending file/PE
    /// tables are skipped: the deferred join subsumes them.
    pub(crate) fn add_object_relationships(
        &mut self,
        references: &[MispObjectReference],
        source_id: &str,
        timestamp: DateTime<Utc>,
    ) {
        for reference in references {
            if self.pending.contains(&reference.referenced_uuid) {
                continue;
            }
            let stamp = misp::datetime_from_timestamp(reference.timestamp.as_deref())
                .unwrap_or(timestamp);
            self.relationships.push(PendingRelationship {
                source_ref: source_id.to_string(),
                target: RelationshipTarget::Undefined(reference.referenced_uuid.clone()),
                relationship_type: reference.relationship_type.clone(),
                timestamp: stamp,
            });
        }
    }

    pub(crate) fn flush_relationships(&mut self) {
        let pending = std::mem::take(&mut self.relationships);
        for relationship in pending {
            let target_ref = match relationship.target {
                RelationshipTarget::Resolved(id) => id,
                RelationshipTarget::Undefined(uuid) => match self.find_target_ref(&uuid) {
                    Some(id) => id,
                    None => continue,
                },
            };
            let mut node =
                StixNode::sdo("relationship", &stix_id("relationship", &Uuid::new_v4().to_string()));
            node.set_str("relationship_type", &relationship.relationship_type);
            node.set_str("source_ref", &relationship.source_ref);
            node.set_str("target_ref", &target_ref);
            node.set_time("created", relationship.timestamp);
            node.set_time("modified", relationship.timestamp);
            self.append_result(node);
        }
    }

    fn find_target_ref(&self, uuid: &str) -> Option<String> {
        self.object_refs
            .iter()
            .find(|object_ref| object_ref.contains(uuid))
            .cloned()
    }

    // -----------------------------------------------------------------
    // report / grouping
    // -----------------------------------------------------------------

    fn generate_event_report(&mut self, event: &MispEvent, tags: &[String]) -> StixNode {
        let timestamp = self.event_timestamp();
        let published = event.published
            && misp::datetime_from_timestamp(event.publish_timestamp.as_deref()).is_some();
        let (object_type, report_id) = if published {
            ("report", stix_id("report", &event.uuid))
        } else {
            ("grouping", stix_id("grouping", &event.uuid))
        };
        if self.object_refs.is_empty() {
            self.handle_empty_object_refs(&report_id, timestamp);
        }
        let mut node = StixNode::sdo(object_type, &report_id);
        node.set_str(
            "name",
            event
                .info
                .as_deref()
                .unwrap_or("MISP Event exported to STIX 2.1 with misp-stix-bridge."),
        );
        node.set_time("created", timestamp);
        node.set_time("modified", timestamp);
        node.set(
            "labels",
            json!(["Threat-Report", CONVERTER_TOOL_LABEL]),
        );
        node.set_str("created_by_ref", self.identity_id.clone());
        if published {
            let published_at = misp::datetime_from_timestamp(event.publish_timestamp.as_deref())
                .unwrap_or(timestamp);
            node.set_time("published", published_at);
        } else {
            node.set_str("context", "suspicious-activity");
        }
        self.handle_markings(&mut node, tags);
        node.set("object_refs", json!(self.object_refs));
        node
    }

    /// A report cannot reference nothing; an empty event gets a note.
    fn handle_empty_object_refs(&mut self, report_id: &str, timestamp: DateTime<Utc>) {
        let note_id = stix_id("note", &deterministic_uuid(report_id).to_string());
        let mut node = StixNode::sdo("note", &note_id);
        node.set_time("created", timestamp);
        node.set_time("modified", timestamp);
        node.set_str("content", "This MISP Event is empty and contains no attribute, object, galaxy or tag.");
        node.set("object_refs", json!([report_id]));
        self.append_sdo(node);
    }
}
