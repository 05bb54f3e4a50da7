//! Galaxy cluster resolution for the outbound direction.
//!
//! Each cluster maps to exactly one STIX node, memoized through the
//! unique-ID map keyed by cluster UUID. In interoperability mode the
//! knowledge-base catalog is consulted first; only an unambiguous match
//! replaces synthesis. Resolved clusters are wired to their attaching
//! node with a verb looked up per target type.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use crate::knowledge::GalaxyCatalog;
use crate::mappings::galaxy::{
    external_reference_feature, galaxy_kind, meta_field, relationship_verb, source_name_for,
    GalaxyKind, MetaField,
};
use crate::mappings::sanitize_custom_key;
use crate::misp::{self, MispAttribute, MispEvent, MispGalaxy, MispGalaxyCluster, MispObject};
use crate::stix::{stix_id, StixNode};

use super::MispToStix;

fn value_as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(single) => vec![single.clone()],
        other => vec![other.to_string()],
    }
}

impl MispToStix {
    /// Resolves the galaxies attached to an attribute, then returns the
    /// attribute's tag names not already covered by a cluster tag.
    pub(crate) fn handle_attribute_tags_and_galaxies(
        &mut self,
        attribute: &MispAttribute,
        object_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Vec<String> {
        if attribute.galaxies.is_empty() {
            return attribute.tags.iter().map(|tag| tag.name.clone()).collect();
        }
        let mut cluster_tags: BTreeSet<String> = BTreeSet::new();
        for galaxy in &attribute.galaxies {
            self.resolve_attached_galaxy(galaxy, object_id, timestamp);
            cluster_tags.extend(galaxy.clusters.iter().filter_map(|c| c.tag_name.clone()));
        }
        attribute
            .tags
            .iter()
            .map(|tag| tag.name.clone())
            .filter(|name| !cluster_tags.contains(name))
            .collect()
    }

    /// Object counterpart: tags and galaxies live on the sub-fields.
    /// Galaxies of the same type are merged before resolution so shared
    /// clusters convert once.
    pub(crate) fn handle_object_tags_and_galaxies(
        &mut self,
        misp_object: &MispObject,
        object_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Vec<String> {
        let mut tags: BTreeSet<String> = BTreeSet::new();
        let mut merged: Vec<MispGalaxy> = Vec::new();
        for attribute in &misp_object.attributes {
            tags.extend(attribute.tags.iter().map(|tag| tag.name.clone()));
            for galaxy in &attribute.galaxies {
                match merged
                    .iter_mut()
                    .find(|existing| existing.galaxy_type == galaxy.galaxy_type)
                {
                    Some(existing) => {
                        for cluster in &galaxy.clusters {
                            if !existing.clusters.iter().any(|c| c.uuid == cluster.uuid) {
                                existing.clusters.push(cluster.clone());
                            }
                        }
                    }
                    None => merged.push(galaxy.clone()),
                }
            }
        }
        if merged.is_empty() {
            return tags.into_iter().collect();
        }
        let mut cluster_tags: BTreeSet<String> = BTreeSet::new();
        for galaxy in &merged {
            self.resolve_attached_galaxy(galaxy, object_id, timestamp);
            cluster_tags.extend(galaxy.clusters.iter().filter_map(|c| c.tag_name.clone()));
        }
        tags.into_iter()
            .filter(|name| !cluster_tags.contains(name))
            .collect()
    }

    /// Event-level galaxies join the top-level refs without relationship
    /// wiring; returns the event tags left over for the report markings.
    pub(crate) fn handle_event_tags_and_galaxies(&mut self, event: &MispEvent) -> Vec<String> {
        if event.galaxies.is_empty() {
            return event.tags.iter().map(|tag| tag.name.clone()).collect();
        }
        let mut cluster_tags: BTreeSet<String> = BTreeSet::new();
        let timestamp = self.event_timestamp();
        for galaxy in &event.galaxies {
            let object_refs = self.resolve_galaxy(galaxy, Some(timestamp));
            for object_ref in object_refs {
                self.handle_object_ref(object_ref);
            }
            cluster_tags.extend(galaxy.clusters.iter().filter_map(|c| c.tag_name.clone()));
        }
        event
            .tags
            .iter()
            .map(|tag| tag.name.clone())
            .filter(|name| !cluster_tags.contains(name))
            .collect()
    }

    fn resolve_attached_galaxy(
        &mut self,
        galaxy: &MispGalaxy,
        object_id: &str,
        timestamp: DateTime<Utc>,
    ) {
        let object_refs = self.resolve_galaxy(galaxy, Some(timestamp));
        let source_type = object_id.split("--").next().unwrap_or_default().to_string();
        for target_ref in &object_refs {
            let target_type = target_ref.split("--").next().unwrap_or_default();
            let verb = relationship_verb(&source_type, target_type);
            self.add_galaxy_relationship(object_id, target_ref, verb, timestamp);
        }
        for object_ref in object_refs {
            self.handle_object_ref(object_ref);
        }
    }

    /// One STIX identifier per cluster, synthesized or reused.
    fn resolve_galaxy(
        &mut self,
        galaxy: &MispGalaxy,
        timestamp: Option<DateTime<Utc>>,
    ) -> Vec<String> {
        match galaxy_kind(&galaxy.galaxy_type) {
            Some(kind) => self.parse_galaxy_clusters(kind, galaxy, timestamp),
            None => {
                self.log.warn(format!(
                    "MISP galaxy type not mapped to STIX: {}",
                    galaxy.galaxy_type
                ));
                self.parse_custom_galaxy_clusters(galaxy, timestamp)
            }
        }
    }

    fn parse_galaxy_clusters(
        &mut self,
        kind: GalaxyKind,
        galaxy: &MispGalaxy,
        timestamp: Option<DateTime<Utc>>,
    ) -> Vec<String> {
        let stix_type = kind.stix_type();
        let mut object_refs = Vec::new();
        for cluster in &galaxy.clusters {
            if self.is_cluster_parsed(&mut object_refs, cluster, stix_type) {
                continue;
            }
            let object_id = stix_id(stix_type, &cluster.uuid);
            let mut node = Self::create_galaxy_node(kind, cluster, galaxy, &object_id, timestamp);
            if let Some(meta) = &cluster.meta {
                Self::apply_meta_fields(&mut node, kind, meta);
            }
            self.append_sdo_without_refs(node);
            object_refs.push(object_id.clone());
            self.register_id(cluster.uuid.clone(), object_id);
        }
        object_refs
    }

    /// Already converted this run, or matched against the catalog.
    fn is_cluster_parsed(
        &mut self,
        object_refs: &mut Vec<String>,
        cluster: &MispGalaxyCluster,
        stix_type: &str,
    ) -> bool {
        if let Some(existing) = self.lookup_id(&cluster.uuid) {
            object_refs.push(existing.clone());
            return true;
        }
        if self.interoperability() {
            if let Some(matched_id) = self.match_cluster_in_catalog(cluster, stix_type) {
                object_refs.push(matched_id.clone());
                self.register_id(cluster.uuid.clone(), matched_id);
                return true;
            }
        }
        false
    }

    fn match_cluster_in_catalog(
        &mut self,
        cluster: &MispGalaxyCluster,
        object_type: &str,
    ) -> Option<String> {
        let (node, identity) = {
            let catalog = self.catalog()?;
            let mut candidates: Vec<String> = Vec::new();
            if catalog.contains(&cluster.value) {
                candidates.push(cluster.value.clone());
            } else if cluster.value.contains(" - ") {
                candidates.extend(cluster.value.split(" - ").map(str::to_string));
            }
            let mut found = None;
            for name in &candidates {
                if !catalog.contains_type(name, object_type) {
                    continue;
                }
                if let Some(matched) = Self::check_galaxy_matching(catalog, cluster, name, object_type)
                {
                    found = Some(matched.clone());
                    break;
                }
            }
            let node = found?;
            let identity = node
                .get_str("created_by_ref")
                .and_then(|identity_id| catalog.identity(identity_id))
                .cloned();
            (node, identity)
        };
        if let Some(identity) = identity {
            self.register_catalog_identity(identity);
        }
        let matched_id = node.id().to_string();
        self.append_sdo_without_refs(node);
        Some(matched_id)
    }

    /// Unique name match first, then unique external-reference match.
    fn check_galaxy_matching<'a>(
        catalog: &'a GalaxyCatalog,
        cluster: &MispGalaxyCluster,
        name: &str,
        object_type: &str,
    ) -> Option<&'a StixNode> {
        if let Some(node) = catalog.match_by_name(name, object_type) {
            return Some(node);
        }
        let meta = cluster.meta.as_ref()?;
        for (key, feature) in [("external_id", "external_id"), ("refs", "url")] {
            if let Some(values) = meta.get(key) {
                let values = value_as_string_list(values);
                if let Some(node) = catalog.match_by_reference(&values, feature, name, object_type)
                {
                    return Some(node);
                }
            }
        }
        None
    }

    fn create_galaxy_node(
        kind: GalaxyKind,
        cluster: &MispGalaxyCluster,
        galaxy: &MispGalaxy,
        object_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> StixNode {
        let mut name = cluster.value.clone();
        if kind == GalaxyKind::AttackPattern {
            if let Some(position) = name.find(" - T") {
                name.truncate(position);
                name = name.trim_end().to_string();
            }
        }
        let mut node = StixNode::sdo(kind.stix_type(), object_id);
        node.set_str("name", name);
        node.set("labels", Self::galaxy_labels(&galaxy.name, cluster));
        match kind {
            GalaxyKind::Sector => {
                node.set_str("identity_class", "class");
                let description = cluster
                    .description
                    .clone()
                    .unwrap_or_else(|| galaxy.description.clone());
                node.set_str("description", description);
            }
            GalaxyKind::Malware => {
                node.set("is_family", json!(true));
                if let Some(description) = &cluster.description {
                    node.set_str("description", description);
                }
            }
            _ => {
                if let Some(description) = &cluster.description {
                    node.set_str("description", description);
                }
            }
        }
        let stamp = timestamp
            .or_else(|| misp::datetime_from_timestamp(cluster.timestamp.as_deref()));
        if let Some(stamp) = stamp {
            node.set_time("created", stamp);
            node.set_time("modified", stamp);
        }
        node
    }

    fn galaxy_labels(galaxy_name: &str, cluster: &MispGalaxyCluster) -> Value {
        let mut labels = vec![
            json!(format!("misp:galaxy-name=\"{galaxy_name}\"")),
            json!(format!("misp:galaxy-type=\"{}\"", cluster.cluster_type)),
        ];
        if let Some(tag_name) = &cluster.tag_name {
            labels.push(json!(tag_name));
        }
        Value::Array(labels)
    }

    /// Meta fields map per kind; leftovers survive as `x_misp_*`.
    fn apply_meta_fields(node: &mut StixNode, kind: GalaxyKind, meta: &Map<String, Value>) {
        for (key, values) in meta {
            if let Some(feature) = external_reference_feature(key) {
                for value in value_as_string_list(values) {
                    let reference = if feature == "external_id" {
                        json!({"source_name": source_name_for(&value), "external_id": value})
                    } else {
                        json!({"source_name": "url", "url": value})
                    };
                    node.push_to_array("external_references", reference);
                }
                continue;
            }
            match meta_field(kind, key) {
                Some(MetaField::KillChain) => {
                    for value in value_as_string_list(values) {
                        let mut parts = value.split(':');
                        let chain_name = parts.next().unwrap_or_default().to_string();
                        let phase = parts.last().unwrap_or_default().to_string();
                        node.push_to_array(
                            "kill_chain_phases",
                            json!({"kill_chain_name": chain_name, "phase_name": phase}),
                        );
                    }
                }
                Some(MetaField::Aliases) => {
                    node.set("aliases", json!(value_as_string_list(values)));
                }
                Some(MetaField::MalwareTypes) => {
                    node.set("malware_types", json!(value_as_string_list(values)));
                }
                Some(MetaField::ThreatActorTypes) => {
                    node.set("threat_actor_types", json!(value_as_string_list(values)));
                }
                Some(MetaField::ToolTypes) => {
                    node.set("tool_types", json!(value_as_string_list(values)));
                }
                None => {
                    node.set(
                        &format!("x_misp_{}", sanitize_custom_key(key)),
                        values.clone(),
                    );
                }
            }
        }
    }

    /// Concept types without a handler keep raw type, value, description
    /// and meta as custom properties.
    fn parse_custom_galaxy_clusters(
        &mut self,
        galaxy: &MispGalaxy,
        timestamp: Option<DateTime<Utc>>,
    ) -> Vec<String> {
        let mut object_refs = Vec::new();
        for cluster in &galaxy.clusters {
            if let Some(existing) = self.lookup_id(&cluster.uuid) {
                object_refs.push(existing.clone());
                continue;
            }
            let custom_id = stix_id("x-misp-galaxy-cluster", &cluster.uuid);
            let mut node = StixNode::sdo("x-misp-galaxy-cluster", &custom_id);
            node.set("labels", Self::galaxy_labels(&galaxy.name, cluster));
            node.set_str("x_misp_name", &galaxy.name);
            node.set_str("x_misp_type", &cluster.cluster_type);
            node.set_str("x_misp_value", &cluster.value);
            node.set_str(
                "x_misp_description",
                format!(
                    "{} | {}",
                    galaxy.description,
                    cluster.description.as_deref().unwrap_or_default()
                ),
            );
            if let Some(meta) = &cluster.meta {
                let sanitized: Map<String, Value> = meta
                    .iter()
                    .map(|(key, value)| (sanitize_custom_key(key), value.clone()))
                    .collect();
                node.set("x_misp_meta", Value::Object(sanitized));
            }
            let stamp = timestamp
                .or_else(|| misp::datetime_from_timestamp(cluster.timestamp.as_deref()));
            if let Some(stamp) = stamp {
                node.set_time("created", stamp);
                node.set_time("modified", stamp);
            }
            self.append_sdo_without_refs(node);
            object_refs.push(custom_id.clone());
            self.register_id(cluster.uuid.clone(), custom_id);
        }
        object_refs
    }
}
