//! Observable-side building blocks for the outbound direction: cyber
//! observable nodes and the observed-data wrapper around them.

use serde_json::{json, Value};

use crate::misp::{MispAttribute, MispObject};
use crate::stix::{deterministic_uuid, stix_id, StixNode};

use super::MispToStix;

pub(crate) fn sco(object_type: &str, uuid: &str) -> StixNode {
    StixNode::new(object_type, stix_id(object_type, uuid))
}

pub(crate) fn sco_with_value(object_type: &str, uuid: &str, value: &str) -> StixNode {
    let mut node = sco(object_type, uuid);
    node.set_str("value", value);
    node
}

/// Address observable, typed by the shape of the value.
pub(crate) fn ip_address_sco(uuid: &str, value: &str) -> StixNode {
    sco_with_value(crate::pattern::address_type(value), uuid, value)
}

/// Stable identifier for an observable derived from another observable,
/// e.g. the resolved address of a `domain|ip` attribute.
pub(crate) fn derived_uuid(primary_uuid: &str, suffix: &str) -> String {
    deterministic_uuid(&format!("{primary_uuid} - {suffix}")).to_string()
}

impl MispToStix {
    /// Wraps the observable nodes of one attribute into an observed-data
    /// node, wiring labels, time fields, markings and sightings.
    pub(crate) fn handle_attribute_observable(
        &mut self,
        attribute: &MispAttribute,
        observables: Vec<StixNode>,
    ) {
        let observable_id = stix_id("observed-data", &attribute.uuid);
        let mut node = StixNode::sdo("observed-data", &observable_id);
        node.set("labels", Self::attribute_labels(attribute));
        node.set("number_observed", json!(1));
        node.set_str("created_by_ref", self.identity_id().to_string());
        self.observable_time_fields(
            &mut node,
            attribute.timestamp.as_deref(),
            attribute.first_seen.as_deref(),
            attribute.last_seen.as_deref(),
        );
        node.set(
            "object_refs",
            Value::Array(
                observables
                    .iter()
                    .map(|observable| json!(observable.id()))
                    .collect(),
            ),
        );
        let timestamp = self.record_timestamp(attribute.timestamp.as_deref());
        let tags = self.handle_attribute_tags_and_galaxies(attribute, &observable_id, timestamp);
        self.handle_markings(&mut node, &tags);
        self.append_result(node);
        for observable in observables {
            self.append_sdo_without_refs(observable);
        }
        if !attribute.sightings.is_empty() {
            let sightings = attribute.sightings.clone();
            self.handle_sightings(&sightings, &observable_id);
        }
    }

    /// Object counterpart of [`Self::handle_attribute_observable`].
    pub(crate) fn handle_object_observable(
        &mut self,
        misp_object: &MispObject,
        observables: Vec<StixNode>,
    ) {
        let observable_id = stix_id("observed-data", &misp_object.uuid);
        let mut node = StixNode::sdo("observed-data", &observable_id);
        node.set("labels", Self::object_labels(misp_object, Some(false)));
        node.set("number_observed", json!(1));
        node.set_str("created_by_ref", self.identity_id().to_string());
        self.observable_time_fields(
            &mut node,
            misp_object.timestamp.as_deref(),
            misp_object.first_seen.as_deref(),
            misp_object.last_seen.as_deref(),
        );
        node.set(
            "object_refs",
            Value::Array(
                observables
                    .iter()
                    .map(|observable| json!(observable.id()))
                    .collect(),
            ),
        );
        let timestamp = self.record_timestamp(misp_object.timestamp.as_deref());
        let tags = self.handle_object_tags_and_galaxies(misp_object, &observable_id, timestamp);
        self.handle_markings(&mut node, &tags);
        if !misp_object.references.is_empty() {
            self.add_object_relationships(&misp_object.references, &observable_id, timestamp);
        }
        self.append_sdo(node);
        for observable in observables {
            self.append_sdo_without_refs(observable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_address_observable() {
        let v4 = ip_address_sco("61c13ce2-b335-4c32-9a4e-1e4a61ec1b2c", "198.51.100.3");
        assert_eq!(v4.object_type(), "ipv4-addr");
        let v6 = ip_address_sco("61c13ce2-b335-4c32-9a4e-1e4a61ec1b2c", "2001:db8::1");
        assert_eq!(v6.object_type(), "ipv6-addr");
    }

    #[test]
    fn derived_uuid_is_stable() {
        let first = derived_uuid("91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f", "ip");
        let second = derived_uuid("91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f", "ip");
        assert_eq!(first, second);
    }
}
