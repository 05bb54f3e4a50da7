//! Object dispatch for the outbound direction.
//!
//! Objects generalize the attribute flow to multi-field records: sub-fields
//! bucket by relation name into single- or multi-value accumulators, then a
//! per-type handler builds either one conjunctive pattern or an observable
//! graph. File objects referencing a PE object are deferred into pending
//! tables and resolved in a second pass (file, then PE, then PE sections)
//! so the joint construct can honor every participant's `to_ids` flag.

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::mappings::object::*;
use crate::mappings::{sanitize_custom_key, HASH_ATTRIBUTE_TYPES};
use crate::misp::{MispAttribute, MispObject};
use crate::pattern;
use crate::stix::{stix_id, StixNode};

use super::observables::{derived_uuid, ip_address_sco, sco};
use super::MispToStix;

/// A sub-field value, optionally paired with its binary payload.
#[derive(Debug, Clone)]
pub(crate) enum AttrValue {
    Text(String),
    Data { value: String, data: String },
}

impl AttrValue {
    pub(crate) fn text(&self) -> &str {
        match self {
            AttrValue::Text(value) => value,
            AttrValue::Data { value, .. } => value,
        }
    }
}

/// Sub-fields bucketed by relation name, in first-appearance order.
/// Relations on the force-single list keep one value (last write wins);
/// everything else accumulates.
#[derive(Debug, Default)]
pub(crate) struct FieldBag {
    entries: Vec<(String, Vec<AttrValue>)>,
}

impl FieldBag {
    pub(crate) fn extract(
        attributes: &[MispAttribute],
        force_single: &[&str],
        with_data: &[&str],
        escape: bool,
    ) -> Self {
        let mut bag = Self::default();
        for attribute in attributes {
            let Some(relation) = attribute.object_relation.as_deref() else {
                continue;
            };
            let value = if escape {
                pattern::escape_value(&attribute.value)
            } else {
                attribute.value.clone()
            };
            let entry = match (with_data.contains(&relation), &attribute.data) {
                (true, Some(data)) => AttrValue::Data {
                    value,
                    data: if escape {
                        pattern::escape_value(data)
                    } else {
                        data.clone()
                    },
                },
                _ => AttrValue::Text(value),
            };
            if force_single.contains(&relation) {
                bag.set_single(relation, entry);
            } else {
                bag.push(relation, entry);
            }
        }
        bag
    }

    fn push(&mut self, relation: &str, value: AttrValue) {
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing == relation)
        {
            Some((_, values)) => values.push(value),
            None => self.entries.push((relation.to_string(), vec![value])),
        }
    }

    fn set_single(&mut self, relation: &str, value: AttrValue) {
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing == relation)
        {
            Some((_, values)) => *values = vec![value],
            None => self.entries.push((relation.to_string(), vec![value])),
        }
    }

    pub(crate) fn push_single(&mut self, relation: &str, value: AttrValue) {
        self.set_single(relation, value);
    }

    pub(crate) fn pop(&mut self, relation: &str) -> Vec<AttrValue> {
        match self
            .entries
            .iter()
            .position(|(existing, _)| existing == relation)
        {
            Some(position) => self.entries.remove(position).1,
            None => Vec::new(),
        }
    }

    pub(crate) fn pop_single(&mut self, relation: &str) -> Option<AttrValue> {
        let values = self.pop(relation);
        values.into_iter().next_back()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> &[(String, Vec<AttrValue>)] {
        &self.entries
    }
}

impl MispToStix {
    pub(crate) fn resolve_objects(&mut self, objects: &[MispObject]) {
        for misp_object in objects {
            self.resolve_object(misp_object);
        }
        self.resolve_pending_objects();
    }

    fn resolve_object(&mut self, misp_object: &MispObject) {
        let outcome = match object_kind(&misp_object.name) {
            Some(kind) => self.dispatch_object(kind, misp_object),
            None => {
                self.log.warn(format!(
                    "MISP object name not mapped to STIX: {}",
                    misp_object.name
                ));
                self.parse_custom_object(misp_object);
                Ok(())
            }
        };
        if let Err(error) = outcome {
            if error.is_recoverable() {
                self.log.warn(format!(
                    "object {} ({}): {error}, falling back to custom representation",
                    misp_object.uuid, misp_object.name
                ));
                self.parse_custom_object(misp_object);
            } else {
                self.log.error(format!(
                    "error parsing object {} ({}): {error}",
                    misp_object.uuid, misp_object.name
                ));
            }
        }
    }

    fn dispatch_object(&mut self, kind: ObjectKind, misp_object: &MispObject) -> Result<()> {
        use ObjectKind::*;
        match kind {
            Asn => self.parse_asn_object(misp_object)?,
            AttackPattern => self.parse_attack_pattern_object(misp_object),
            CourseOfAction => self.parse_course_of_action_object(misp_object),
            Credential => self.parse_credential_object(misp_object),
            DomainIp => self.parse_domain_ip_object(misp_object),
            Email => self.parse_email_object(misp_object),
            File => self.parse_file_object(misp_object),
            IpPort => self.parse_ip_port_object(misp_object),
            Mutex => self.parse_mutex_object(misp_object),
            NetworkConnection => self.parse_network_traffic_object(misp_object, false),
            NetworkSocket => self.parse_network_traffic_object(misp_object, true),
            Pe => self.pending.pe.push((
                misp_object.uuid.clone(),
                misp_object.to_ids(),
                misp_object.clone(),
            )),
            PeSection => self.pending.pe_section.push((
                misp_object.uuid.clone(),
                misp_object.to_ids(),
                misp_object.clone(),
            )),
            RegistryKey => self.parse_registry_key_object(misp_object),
            Url => self.parse_url_object(misp_object),
            Vulnerability => self.parse_vulnerability_object(misp_object),
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // indicator / non-indicator wrappers and custom fallback
    // -----------------------------------------------------------------

    pub(crate) fn handle_object_indicator(&mut self, misp_object: &MispObject, terms: Vec<String>) {
        let indicator_id = stix_id("indicator", &misp_object.uuid);
        let mut node = StixNode::sdo("indicator", &indicator_id);
        node.set("labels", Self::object_labels(misp_object, Some(true)));
        node.set("kill_chain_phases", Self::killchain(&misp_object.meta_category));
        node.set_str("created_by_ref", self.identity_id().to_string());
        node.set_str("pattern", pattern::bracketed(&terms));
        node.set_str("pattern_type", "stix");
        self.indicator_time_fields(
            &mut node,
            misp_object.timestamp.as_deref(),
            misp_object.first_seen.as_deref(),
            misp_object.last_seen.as_deref(),
        );
        if let Some(comment) = &misp_object.comment {
            node.set_str("description", comment);
        }
        let timestamp = self.record_timestamp(misp_object.timestamp.as_deref());
        let tags = self.handle_object_tags_and_galaxies(misp_object, &indicator_id, timestamp);
        self.handle_markings(&mut node, &tags);
        if !misp_object.references.is_empty() {
            self.add_object_relationships(&misp_object.references, &indicator_id, timestamp);
        }
        self.append_sdo(node);
    }

    /// SDO-producing objects (attack-pattern, course-of-action,
    /// vulnerability) regardless of the detection flag.
    fn handle_non_indicator_object(
        &mut self,
        misp_object: &MispObject,
        mut node: StixNode,
        killchain: bool,
    ) {
        let object_id = node.id().to_string();
        let timestamp = self.record_timestamp(misp_object.timestamp.as_deref());
        node.set(
            "labels",
            Self::object_labels(misp_object, Some(misp_object.to_ids())),
        );
        node.set_str("created_by_ref", self.identity_id().to_string());
        node.set_time("created", timestamp);
        node.set_time("modified", timestamp);
        if killchain {
            node.set("kill_chain_phases", Self::killchain(&misp_object.meta_category));
        }
        let tags = self.handle_object_tags_and_galaxies(misp_object, &object_id, timestamp);
        self.handle_markings(&mut node, &tags);
        if !misp_object.references.is_empty() {
            self.add_object_relationships(&misp_object.references, &object_id, timestamp);
        }
        self.append_sdo(node);
    }

    /// Lossless fallback: the whole object, sub-fields included, survives
    /// as custom properties on an `x-misp-object` node.
    pub(crate) fn parse_custom_object(&mut self, misp_object: &MispObject) {
        let custom_id = stix_id("x-misp-object", &misp_object.uuid);
        let timestamp = self.record_timestamp(misp_object.timestamp.as_deref());
        let mut node = StixNode::sdo("x-misp-object", &custom_id);
        node.set_time("created", timestamp);
        node.set_time("modified", timestamp);
        node.set("labels", Self::object_labels(misp_object, None));
        node.set_str("created_by_ref", self.identity_id().to_string());
        node.set_str("x_misp_name", &misp_object.name);
        node.set_str("x_misp_meta_category", &misp_object.meta_category);
        if let Some(comment) = &misp_object.comment {
            node.set_str("x_misp_comment", comment);
        }
        let attributes: Vec<Value> = misp_object
            .attributes
            .iter()
            .map(|attribute| {
                let mut custom = Map::new();
                custom.insert("type".into(), json!(attribute.attribute_type));
                if let Some(relation) = &attribute.object_relation {
                    custom.insert("object_relation".into(), json!(relation.replace("(s)", "")));
                }
                custom.insert("value".into(), json!(attribute.value));
                if !attribute.category.is_empty() {
                    custom.insert("category".into(), json!(attribute.category));
                }
                if let Some(comment) = &attribute.comment {
                    custom.insert("comment".into(), json!(comment));
                }
                if attribute.to_ids {
                    custom.insert("to_ids".into(), json!(true));
                }
                custom.insert("uuid".into(), json!(attribute.uuid));
                if let Some(data) = &attribute.data {
                    custom.insert("data".into(), json!(data));
                }
                Value::Object(custom)
            })
            .collect();
        node.set("x_misp_attributes", Value::Array(attributes));
        let tags = self.handle_object_tags_and_galaxies(misp_object, &custom_id, timestamp);
        self.handle_markings(&mut node, &tags);
        if !misp_object.references.is_empty() {
            self.add_object_relationships(&misp_object.references, &custom_id, timestamp);
        }
        self.append_sdo(node);
    }

    // -----------------------------------------------------------------
    // leftover passthrough
    // -----------------------------------------------------------------

    /// Remaining bag entries as `x_misp_*` pattern terms.
    fn pattern_custom_terms(bag: &FieldBag, prefix: &str) -> Vec<String> {
        let mut terms = Vec::new();
        for (relation, values) in bag.entries() {
            let key = sanitize_custom_key(relation);
            for value in values {
                match value {
                    AttrValue::Text(text) => {
                        terms.push(pattern::comparison(
                            &format!("{prefix}:x_misp_{key}"),
                            text,
                        ));
                    }
                    AttrValue::Data { value, data } => {
                        terms.push(pattern::comparison(
                            &format!("{prefix}:x_misp_{key}.data"),
                            data,
                        ));
                        terms.push(pattern::comparison(
                            &format!("{prefix}:x_misp_{key}.value"),
                            value,
                        ));
                    }
                }
            }
        }
        terms
    }

    /// Remaining bag entries as `x_misp_*` observable properties.
    fn apply_custom_properties(node: &mut StixNode, bag: &FieldBag) {
        for (relation, values) in bag.entries() {
            let key = format!("x_misp_{}", sanitize_custom_key(relation));
            let rendered: Vec<Value> = values
                .iter()
                .map(|value| match value {
                    AttrValue::Text(text) => json!(text),
                    AttrValue::Data { value, data } => json!({"value": value, "data": data}),
                })
                .collect();
            if rendered.len() == 1 {
                node.set(&key, rendered.into_iter().next().unwrap_or(Value::Null));
            } else {
                node.set(&key, Value::Array(rendered));
            }
        }
    }

    // -----------------------------------------------------------------
    // per-type handlers
    // -----------------------------------------------------------------

    fn parse_asn_object(&mut self, misp_object: &MispObject) -> Result<()> {
        if misp_object.to_ids() {
            let mut bag =
                FieldBag::extract(&misp_object.attributes, ASN_SINGLE_FIELDS, &[], true);
            let mut terms = Vec::new();
            if let Some(asn) = bag.pop_single("asn") {
                terms.push(pattern::as_comparison(asn.text())?);
            }
            for (relation, feature) in ASN_MAPPING {
                if let Some(value) = bag.pop_single(relation) {
                    terms.push(pattern::comparison(
                        &format!("autonomous-system:{feature}"),
                        value.text(),
                    ));
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "autonomous-system"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let mut bag =
                FieldBag::extract(&misp_object.attributes, ASN_SINGLE_FIELDS, &[], false);
            let mut node = sco("autonomous-system", &misp_object.uuid);
            if let Some(asn) = bag.pop_single("asn") {
                node.set("number", json!(pattern::parse_as_number(asn.text())?));
            }
            if let Some(description) = bag.pop_single("description") {
                node.set_str("name", description.text());
            }
            Self::apply_custom_properties(&mut node, &bag);
            self.handle_object_observable(misp_object, vec![node]);
        }
        Ok(())
    }

    fn parse_attack_pattern_object(&mut self, misp_object: &MispObject) {
        let mut bag = FieldBag::extract(
            &misp_object.attributes,
            ATTACK_PATTERN_SINGLE_FIELDS,
            &[],
            false,
        );
        let mut node = StixNode::sdo(
            "attack-pattern",
            &stix_id("attack-pattern", &misp_object.uuid),
        );
        for (relation, feature) in ATTACK_PATTERN_MAPPING {
            if let Some(value) = bag.pop_single(relation) {
                node.set_str(*feature, value.text());
            }
        }
        for value in bag.pop("id") {
            let identifier = value.text();
            let external_id = if identifier.contains("CAPEC") {
                identifier.to_string()
            } else {
                format!("CAPEC-{identifier}")
            };
            node.push_to_array(
                "external_references",
                json!({"source_name": "capec", "external_id": external_id}),
            );
        }
        for value in bag.pop("references") {
            node.push_to_array(
                "external_references",
                json!({"source_name": "external_url", "url": value.text()}),
            );
        }
        Self::apply_custom_properties(&mut node, &bag);
        self.handle_non_indicator_object(misp_object, node, true);
    }

    fn parse_course_of_action_object(&mut self, misp_object: &MispObject) {
        let mut bag = FieldBag::extract(&misp_object.attributes, &["name", "description"], &[], false);
        let mut node = StixNode::sdo(
            "course-of-action",
            &stix_id("course-of-action", &misp_object.uuid),
        );
        for (relation, feature) in COURSE_OF_ACTION_MAPPING {
            if let Some(value) = bag.pop_single(relation) {
                node.set_str(*feature, value.text());
            }
        }
        Self::apply_custom_properties(&mut node, &bag);
        self.handle_non_indicator_object(misp_object, node, false);
    }

    fn parse_credential_object(&mut self, misp_object: &MispObject) {
        if misp_object.to_ids() {
            let mut bag =
                FieldBag::extract(&misp_object.attributes, CREDENTIAL_SINGLE_FIELDS, &[], true);
            let mut terms = Vec::new();
            for (relation, feature) in CREDENTIAL_MAPPING {
                for value in bag.pop(relation) {
                    terms.push(pattern::comparison(
                        &format!("user-account:{feature}"),
                        value.text(),
                    ));
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "user-account"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let mut bag =
                FieldBag::extract(&misp_object.attributes, CREDENTIAL_SINGLE_FIELDS, &[], false);
            let mut node = sco("user-account", &misp_object.uuid);
            if let Some(username) = bag.pop_single("username") {
                node.set_str("user_id", username.text());
            }
            let passwords = bag.pop("password");
            match passwords.len() {
                0 => {}
                1 => {
                    node.set_str("credential", passwords[0].text());
                }
                _ => {
                    node.set(
                        "x_misp_password",
                        json!(passwords.iter().map(AttrValue::text).collect::<Vec<_>>()),
                    );
                }
            }
            Self::apply_custom_properties(&mut node, &bag);
            self.handle_object_observable(misp_object, vec![node]);
        }
    }

    fn parse_domain_ip_object(&mut self, misp_object: &MispObject) {
        if misp_object.to_ids() {
            let relation_present = |relation: &str| {
                misp_object
                    .attributes
                    .iter()
                    .any(|attribute| attribute.object_relation.as_deref() == Some(relation))
            };
            // With both present the domain wins the standard property.
            let special_case = relation_present("domain") && relation_present("hostname");
            let mut bag = FieldBag::extract(&misp_object.attributes, &[], &[], true);
            let mut terms = Vec::new();
            for (relation, feature) in DOMAIN_IP_MAPPING {
                let feature = if *relation == "hostname" && special_case {
                    "x_misp_hostname"
                } else {
                    feature
                };
                for value in bag.pop(relation) {
                    terms.push(pattern::comparison(
                        &format!("domain-name:{feature}"),
                        value.text(),
                    ));
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "domain-name"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let has_domain = misp_object.attributes.iter().any(|attribute| {
                matches!(
                    attribute.object_relation.as_deref(),
                    Some("domain") | Some("hostname")
                )
            });
            if !has_domain {
                self.log.warn(format!(
                    "domain-ip object {} is missing its domain field, converting as custom object",
                    misp_object.uuid
                ));
                return self.parse_custom_object(misp_object);
            }
            let mut bag = FieldBag::extract(&misp_object.attributes, &[], &[], false);
            let mut domains = bag.pop("domain");
            domains.extend(bag.pop("hostname"));
            let mut node = sco("domain-name", &misp_object.uuid);
            node.set_str("value", domains[0].text());
            if domains.len() > 1 {
                node.set(
                    "x_misp_hostname",
                    json!(domains[1..].iter().map(AttrValue::text).collect::<Vec<_>>()),
                );
            }
            let mut observables = vec![node];
            let mut address_refs = Vec::new();
            for (index, address) in bag.pop("ip").iter().enumerate() {
                let address_node = ip_address_sco(
                    &derived_uuid(&misp_object.uuid, &format!("ip - {index}")),
                    address.text(),
                );
                address_refs.push(json!(address_node.id()));
                observables.push(address_node);
            }
            if !address_refs.is_empty() {
                observables[0].set("resolves_to_refs", Value::Array(address_refs));
            }
            Self::apply_custom_properties(&mut observables[0], &bag);
            self.handle_object_observable(misp_object, observables);
        }
    }

    fn parse_email_object(&mut self, misp_object: &MispObject) {
        if misp_object.to_ids() {
            let mut bag = FieldBag::extract(
                &misp_object.attributes,
                EMAIL_SINGLE_FIELDS,
                EMAIL_DATA_FIELDS,
                true,
            );
            let mut terms = Vec::new();
            for feature in ["to", "cc", "bcc"] {
                for (index, value) in bag.pop(feature).iter().enumerate() {
                    terms.push(pattern::comparison(
                        &format!("email-message:{feature}_refs[{index}].value"),
                        value.text(),
                    ));
                }
            }
            for (relation, feature) in EMAIL_MAPPING {
                if matches!(*relation, "to" | "cc" | "bcc") {
                    continue;
                }
                for value in bag.pop(relation) {
                    terms.push(pattern::comparison(
                        &format!("email-message:{feature}"),
                        value.text(),
                    ));
                }
            }
            for feature in EMAIL_DATA_FIELDS {
                for value in bag.pop(feature) {
                    match value {
                        AttrValue::Data { value, data } => {
                            terms.push(pattern::comparison(
                                &format!("email-message:x_misp_{feature}.data"),
                                &data,
                            ));
                            terms.push(pattern::comparison(
                                &format!("email-message:x_misp_{feature}.value"),
                                &value,
                            ));
                        }
                        AttrValue::Text(value) => {
                            terms.push(pattern::comparison(
                                &format!("email-message:x_misp_{feature}"),
                                &value,
                            ));
                        }
                    }
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "email-message"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let mut bag = FieldBag::extract(
                &misp_object.attributes,
                EMAIL_SINGLE_FIELDS,
                EMAIL_DATA_FIELDS,
                false,
            );
            let mut message = sco("email-message", &misp_object.uuid);
            message.set("is_multipart", json!(false));
            let mut observables = Vec::new();
            if let Some(from) = bag.pop_single("from") {
                let mut address = sco(
                    "email-addr",
                    &derived_uuid(&misp_object.uuid, "from"),
                );
                address.set_str("value", from.text());
                if let Some(display_name) = bag.pop_single("from-display-name") {
                    address.set_str("display_name", display_name.text());
                }
                message.set_str("from_ref", address.id().to_string());
                observables.push(address);
            }
            for feature in ["to", "cc", "bcc"] {
                let recipients = bag.pop(feature);
                if recipients.is_empty() {
                    continue;
                }
                let mut refs = Vec::new();
                for (index, recipient) in recipients.iter().enumerate() {
                    let mut address = sco(
                        "email-addr",
                        &derived_uuid(&misp_object.uuid, &format!("{feature} - {index}")),
                    );
                    address.set_str("value", recipient.text());
                    refs.push(json!(address.id()));
                    observables.push(address);
                }
                message.set(&format!("{feature}_refs"), Value::Array(refs));
            }
            if let Some(subject) = bag.pop_single("subject") {
                message.set_str("subject", subject.text());
            }
            if let Some(message_id) = bag.pop_single("message-id") {
                message.set_str("message_id", message_id.text());
            }
            if let Some(date) = bag.pop_single("send-date") {
                message.set_str("date", date.text());
            }
            if let Some(body) = bag.pop_single("email-body") {
                message.set_str("body", body.text());
            }
            let mut headers = Map::new();
            if let Some(reply_to) = bag.pop_single("reply-to") {
                headers.insert("Reply-To".into(), json!(reply_to.text()));
            }
            if let Some(x_mailer) = bag.pop_single("x-mailer") {
                headers.insert("X-Mailer".into(), json!(x_mailer.text()));
            }
            if !headers.is_empty() {
                message.set("additional_header_fields", Value::Object(headers));
            }
            Self::apply_custom_properties(&mut message, &bag);
            let mut nodes = vec![message];
            nodes.extend(observables);
            self.handle_object_observable(misp_object, nodes);
        }
    }

    fn parse_file_object(&mut self, misp_object: &MispObject) {
        let to_ids = misp_object.to_ids();
        if misp_object
            .references
            .iter()
            .any(|reference| reference.is_included("pe"))
        {
            self.pending
                .file
                .push((misp_object.uuid.clone(), to_ids, misp_object.clone()));
            return;
        }
        if to_ids {
            let terms = self.file_object_pattern(misp_object);
            self.handle_object_indicator(misp_object, terms);
        } else {
            let observables = self.file_observable_nodes(misp_object, None);
            self.handle_object_observable(misp_object, observables);
        }
    }

    fn file_object_pattern(&mut self, misp_object: &MispObject) -> Vec<String> {
        let mut bag = FieldBag::extract(
            &misp_object.attributes,
            FILE_SINGLE_FIELDS,
            FILE_DATA_FIELDS,
            true,
        );
        let mut terms = Vec::new();
        for hash_type in HASH_ATTRIBUTE_TYPES {
            if let Some(value) = bag.pop_single(hash_type) {
                match pattern::hash_comparison("file:hashes", hash_type, value.text()) {
                    Ok(term) => terms.push(term),
                    Err(error) => {
                        self.log.warn(format!(
                            "object {}: {error}, keeping {hash_type} as custom property",
                            misp_object.uuid
                        ));
                        bag.push_single(hash_type, value);
                    }
                }
            }
        }
        for (relation, feature) in FILE_MAPPING {
            for value in bag.pop(relation) {
                terms.push(pattern::comparison(&format!("file:{feature}"), value.text()));
            }
        }
        for (relation, feature) in FILE_TIME_FIELDS {
            if let Some(value) = bag.pop_single(relation) {
                terms.push(pattern::comparison(&format!("file:{feature}"), value.text()));
            }
        }
        if let Some(path) = bag.pop_single("path") {
            terms.push(pattern::comparison(
                "file:parent_directory_ref.path",
                path.text(),
            ));
        }
        if let Some(sample) = bag.pop_single("malware-sample") {
            match &sample {
                AttrValue::Data { value, data } => {
                    let mut sample_terms =
                        vec![pattern::content_ref_comparison(data, "payload_bin")];
                    match pattern::filename_hash_comparison("md5", value, "|") {
                        Ok(term) => {
                            sample_terms.push(term);
                            sample_terms.push(pattern::content_ref_comparison(
                                "application/zip",
                                "mime_type",
                            ));
                            terms.push(format!("({})", sample_terms.join(" AND ")));
                        }
                        Err(error) => {
                            self.log.warn(format!(
                                "object {}: {error}, keeping malware-sample as custom property",
                                misp_object.uuid
                            ));
                            bag.push_single("malware-sample", sample.clone());
                        }
                    }
                }
                AttrValue::Text(_) => bag.push_single("malware-sample", sample.clone()),
            }
        }
        if let Some(attachment) = bag.pop_single("attachment") {
            match attachment {
                AttrValue::Data { value, data } => {
                    terms.push(format!(
                        "({} AND {})",
                        pattern::content_ref_comparison(&data, "payload_bin"),
                        pattern::content_ref_comparison(&value, "x_misp_filename"),
                    ));
                }
                AttrValue::Text(value) => {
                    terms.push(pattern::content_ref_comparison(&value, "x_misp_filename"));
                }
            }
        }
        terms.extend(Self::pattern_custom_terms(&bag, "file"));
        terms
    }

    /// File node plus its satellite observables (parent directory,
    /// content artifact). PE extension args slot into the file node.
    fn file_observable_nodes(
        &mut self,
        misp_object: &MispObject,
        pe_extension: Option<Value>,
    ) -> Vec<StixNode> {
        let mut bag = FieldBag::extract(
            &misp_object.attributes,
            FILE_SINGLE_FIELDS,
            FILE_DATA_FIELDS,
            false,
        );
        let mut file = sco("file", &misp_object.uuid);
        let mut extra = Vec::new();
        let mut hashes = Map::new();
        for hash_type in HASH_ATTRIBUTE_TYPES {
            if let Some(value) = bag.pop_single(hash_type) {
                let normalized = pattern::normalize_hash_type(hash_type);
                if pattern::check_hash_format(&normalized, value.text()) {
                    hashes.insert(normalized, json!(value.text()));
                } else {
                    self.log.warn(format!(
                        "object {}: invalid {hash_type} hash value '{}', keeping it as custom property",
                        misp_object.uuid,
                        value.text()
                    ));
                    bag.push_single(hash_type, value);
                }
            }
        }
        if !hashes.is_empty() {
            file.set("hashes", Value::Object(hashes));
        }
        for (relation, feature) in FILE_MAPPING {
            let values = bag.pop(relation);
            if let Some(first) = values.first() {
                if *relation == "size-in-bytes" {
                    match first.text().parse::<u64>() {
                        Ok(size) => {
                            file.set("size", json!(size));
                        }
                        Err(_) => {
                            file.set_str("size", first.text());
                        }
                    }
                } else {
                    file.set_str(*feature, first.text());
                }
            }
            if values.len() > 1 {
                file.set(
                    &format!("x_misp_{}", sanitize_custom_key(relation)),
                    json!(values[1..].iter().map(AttrValue::text).collect::<Vec<_>>()),
                );
            }
        }
        for (relation, feature) in FILE_TIME_FIELDS {
            if let Some(value) = bag.pop_single(relation) {
                file.set_str(*feature, value.text());
            }
        }
        if let Some(path) = bag.pop_single("path") {
            let mut directory = sco("directory", &derived_uuid(&misp_object.uuid, "directory"));
            directory.set_str("path", path.text());
            file.set_str("parent_directory_ref", directory.id().to_string());
            extra.push(directory);
        }
        if let Some(sample) = bag.pop_single("malware-sample") {
            match sample {
                AttrValue::Data { value, data } => {
                    let payload = self.checked_payload(&misp_object.uuid, &data);
                    let mut artifact =
                        sco("artifact", &derived_uuid(&misp_object.uuid, "malware-sample"));
                    artifact.set_str("payload_bin", payload);
                    artifact.set_str("mime_type", "application/zip");
                    artifact.set_str("decryption_key", "infected");
                    artifact.set_str("x_misp_filename", value);
                    file.set_str("content_ref", artifact.id().to_string());
                    extra.push(artifact);
                }
                other => bag.push_single("malware-sample", other),
            }
        }
        if let Some(attachment) = bag.pop_single("attachment") {
            match (&attachment, file.contains_key("content_ref")) {
                (AttrValue::Data { value, data }, false) => {
                    let payload = self.checked_payload(&misp_object.uuid, data);
                    let mut artifact =
                        sco("artifact", &derived_uuid(&misp_object.uuid, "attachment"));
                    artifact.set_str("payload_bin", payload);
                    artifact.set_str("x_misp_filename", value);
                    file.set_str("content_ref", artifact.id().to_string());
                    extra.push(artifact);
                }
                _ => bag.push_single("attachment", attachment),
            }
        }
        if let Some(extension) = pe_extension {
            file.set("extensions", json!({"windows-pebinary-ext": extension}));
        }
        Self::apply_custom_properties(&mut file, &bag);
        let mut nodes = vec![file];
        nodes.extend(extra);
        nodes
    }

    fn parse_ip_port_object(&mut self, misp_object: &MispObject) {
        if misp_object.to_ids() {
            let mut bag =
                FieldBag::extract(&misp_object.attributes, IP_PORT_SINGLE_FIELDS, &[], true);
            let mut terms = Vec::new();
            for (relation, ip_kind) in IP_PORT_IP_FIELDS {
                for value in bag.pop(relation) {
                    terms.push(pattern::ip_comparison(ip_kind, value.text()));
                }
            }
            for (relation, feature) in IP_PORT_MAPPING {
                for value in bag.pop(relation) {
                    terms.push(pattern::comparison(
                        &format!("network-traffic:{feature}"),
                        value.text(),
                    ));
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "network-traffic"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let mut bag =
                FieldBag::extract(&misp_object.attributes, IP_PORT_SINGLE_FIELDS, &[], false);
            let mut traffic = sco("network-traffic", &misp_object.uuid);
            traffic.set("protocols", json!(["tcp"]));
            let mut observables = Vec::new();
            for (relation, ip_kind) in IP_PORT_IP_FIELDS {
                for (index, value) in bag.pop(relation).iter().enumerate() {
                    let address = ip_address_sco(
                        &derived_uuid(&misp_object.uuid, &format!("{relation} - {index}")),
                        value.text(),
                    );
                    traffic.set_str(&format!("{ip_kind}_ref"), address.id().to_string());
                    observables.push(address);
                }
            }
            for (relation, feature) in IP_PORT_MAPPING {
                if let Some(value) = bag.pop_single(relation) {
                    if feature.ends_with("_port") {
                        match value.text().parse::<u64>() {
                            Ok(port) => {
                                traffic.set(feature, json!(port));
                            }
                            Err(_) => {
                                traffic.set_str(*feature, value.text());
                            }
                        }
                    } else {
                        traffic.set_str(*feature, value.text());
                    }
                }
            }
            Self::apply_custom_properties(&mut traffic, &bag);
            let mut nodes = vec![traffic];
            nodes.extend(observables);
            self.handle_object_observable(misp_object, nodes);
        }
    }

    fn parse_mutex_object(&mut self, misp_object: &MispObject) {
        if misp_object.to_ids() {
            let mut bag =
                FieldBag::extract(&misp_object.attributes, MUTEX_SINGLE_FIELDS, &[], true);
            let mut terms = Vec::new();
            for (relation, feature) in MUTEX_MAPPING {
                if let Some(value) = bag.pop_single(relation) {
                    terms.push(pattern::comparison(&format!("mutex:{feature}"), value.text()));
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "mutex"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let mut bag =
                FieldBag::extract(&misp_object.attributes, MUTEX_SINGLE_FIELDS, &[], false);
            let mut node = sco("mutex", &misp_object.uuid);
            if let Some(name) = bag.pop_single("name") {
                node.set_str("name", name.text());
            }
            Self::apply_custom_properties(&mut node, &bag);
            self.handle_object_observable(misp_object, vec![node]);
        }
    }

    fn parse_network_traffic_object(&mut self, misp_object: &MispObject, socket: bool) {
        if misp_object.to_ids() {
            let mut bag = FieldBag::extract(
                &misp_object.attributes,
                NETWORK_SOCKET_SINGLE_FIELDS,
                &[],
                true,
            );
            let mut terms = Vec::new();
            for (relation, ip_kind) in NETWORK_TRAFFIC_IP_FIELDS {
                for value in bag.pop(relation) {
                    terms.push(pattern::ip_comparison(ip_kind, value.text()));
                }
            }
            for (relation, ip_kind) in NETWORK_TRAFFIC_HOSTNAME_FIELDS {
                for value in bag.pop(relation) {
                    terms.push(format!(
                        "{} AND {}",
                        pattern::comparison(
                            &format!("network-traffic:{ip_kind}_ref.type"),
                            "domain-name"
                        ),
                        pattern::comparison(
                            &format!("network-traffic:{ip_kind}_ref.value"),
                            value.text()
                        ),
                    ));
                }
            }
            for (relation, feature) in NETWORK_TRAFFIC_MAPPING {
                if let Some(value) = bag.pop_single(relation) {
                    terms.push(pattern::comparison(
                        &format!("network-traffic:{feature}"),
                        value.text(),
                    ));
                }
            }
            let mut protocol_index = 0;
            for relation in NETWORK_CONNECTION_PROTOCOL_FIELDS {
                for value in bag.pop(relation) {
                    terms.push(pattern::comparison(
                        &format!("network-traffic:protocols[{protocol_index}]"),
                        &value.text().to_ascii_lowercase(),
                    ));
                    protocol_index += 1;
                }
            }
            if let Some(protocol) = bag.pop_single("protocol") {
                terms.push(pattern::comparison(
                    &format!("network-traffic:protocols[{protocol_index}]"),
                    &protocol.text().to_ascii_lowercase(),
                ));
            }
            if socket {
                for (relation, feature) in NETWORK_SOCKET_MAPPING {
                    if let Some(value) = bag.pop_single(relation) {
                        terms.push(pattern::comparison(
                            &format!("network-traffic:{feature}"),
                            value.text(),
                        ));
                    }
                }
                for value in bag.pop("state") {
                    match NETWORK_SOCKET_STATE_FIELDS
                        .iter()
                        .find(|(state, _)| *state == value.text())
                    {
                        Some((_, feature)) => {
                            terms.push(format!("network-traffic:{feature} = true"));
                        }
                        None => terms.push(pattern::comparison(
                            "network-traffic:x_misp_state",
                            value.text(),
                        )),
                    }
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "network-traffic"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let mut bag = FieldBag::extract(
                &misp_object.attributes,
                NETWORK_SOCKET_SINGLE_FIELDS,
                &[],
                false,
            );
            let mut traffic = sco("network-traffic", &misp_object.uuid);
            let mut observables = Vec::new();
            for (relation, ip_kind) in NETWORK_TRAFFIC_IP_FIELDS {
                for (index, value) in bag.pop(relation).iter().enumerate() {
                    let address = ip_address_sco(
                        &derived_uuid(&misp_object.uuid, &format!("{relation} - {index}")),
                        value.text(),
                    );
                    traffic.set_str(&format!("{ip_kind}_ref"), address.id().to_string());
                    observables.push(address);
                }
            }
            for (relation, ip_kind) in NETWORK_TRAFFIC_HOSTNAME_FIELDS {
                for (index, value) in bag.pop(relation).iter().enumerate() {
                    let mut domain = sco(
                        "domain-name",
                        &derived_uuid(&misp_object.uuid, &format!("{relation} - {index}")),
                    );
                    domain.set_str("value", value.text());
                    traffic.set_str(&format!("{ip_kind}_ref"), domain.id().to_string());
                    observables.push(domain);
                }
            }
            for (relation, feature) in NETWORK_TRAFFIC_MAPPING {
                if let Some(value) = bag.pop_single(relation) {
                    match value.text().parse::<u64>() {
                        Ok(port) => {
                            traffic.set(feature, json!(port));
                        }
                        Err(_) => {
                            traffic.set_str(*feature, value.text());
                        }
                    }
                }
            }
            let mut protocols = Vec::new();
            for relation in NETWORK_CONNECTION_PROTOCOL_FIELDS {
                for value in bag.pop(relation) {
                    protocols.push(json!(value.text().to_ascii_lowercase()));
                }
            }
            for value in bag.pop("protocol") {
                protocols.push(json!(value.text().to_ascii_lowercase()));
            }
            if protocols.is_empty() {
                protocols.push(json!("tcp"));
            }
            traffic.set("protocols", Value::Array(protocols));
            if socket {
                let mut extension = Map::new();
                if let Some(family) = bag.pop_single("address-family") {
                    extension.insert("address_family".into(), json!(family.text()));
                }
                for value in bag.pop("state") {
                    match value.text() {
                        "listening" => {
                            extension.insert("is_listening".into(), json!(true));
                        }
                        "blocking" => {
                            extension.insert("is_blocking".into(), json!(true));
                        }
                        other => {
                            traffic.set_str("x_misp_state", other);
                        }
                    }
                }
                if !extension.is_empty() {
                    traffic.set("extensions", json!({"socket-ext": extension}));
                }
            }
            Self::apply_custom_properties(&mut traffic, &bag);
            let mut nodes = vec![traffic];
            nodes.extend(observables);
            self.handle_object_observable(misp_object, nodes);
        }
    }

    fn parse_registry_key_object(&mut self, misp_object: &MispObject) {
        if misp_object.to_ids() {
            let mut bag = FieldBag::extract(
                &misp_object.attributes,
                REGISTRY_KEY_SINGLE_FIELDS,
                &[],
                true,
            );
            let mut terms = Vec::new();
            for (relation, feature) in REGISTRY_KEY_MAPPING {
                if let Some(value) = bag.pop_single(relation) {
                    terms.push(pattern::comparison(
                        &format!("windows-registry-key:{feature}"),
                        value.text(),
                    ));
                }
            }
            for (relation, feature) in REGISTRY_KEY_VALUE_MAPPING {
                if let Some(value) = bag.pop_single(relation) {
                    terms.push(pattern::comparison(
                        &format!("windows-registry-key:{feature}"),
                        value.text(),
                    ));
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "windows-registry-key"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let mut bag = FieldBag::extract(
                &misp_object.attributes,
                REGISTRY_KEY_SINGLE_FIELDS,
                &[],
                false,
            );
            let mut node = sco("windows-registry-key", &misp_object.uuid);
            if let Some(key) = bag.pop_single("key") {
                node.set_str("key", key.text().trim());
            }
            if let Some(modified) = bag.pop_single("last-modified") {
                node.set_str("modified_time", modified.text());
            }
            let mut registry_value = Map::new();
            for (relation, stix_key) in
                [("data", "data"), ("data-type", "data_type"), ("name", "name")]
            {
                if let Some(value) = bag.pop_single(relation) {
                    registry_value.insert(stix_key.into(), json!(value.text().trim()));
                }
            }
            if !registry_value.is_empty() {
                node.set("values", json!([registry_value]));
            }
            Self::apply_custom_properties(&mut node, &bag);
            self.handle_object_observable(misp_object, vec![node]);
        }
    }

    fn parse_url_object(&mut self, misp_object: &MispObject) {
        if misp_object.to_ids() {
            let mut bag = FieldBag::extract(&misp_object.attributes, URL_SINGLE_FIELDS, &[], true);
            let mut terms = Vec::new();
            for (relation, feature) in URL_MAPPING {
                if let Some(value) = bag.pop_single(relation) {
                    terms.push(pattern::comparison(&format!("url:{feature}"), value.text()));
                }
            }
            terms.extend(Self::pattern_custom_terms(&bag, "url"));
            self.handle_object_indicator(misp_object, terms);
        } else {
            let mut bag = FieldBag::extract(&misp_object.attributes, URL_SINGLE_FIELDS, &[], false);
            let mut node = sco("url", &misp_object.uuid);
            if let Some(url) = bag.pop_single("url") {
                node.set_str("value", url.text());
            }
            Self::apply_custom_properties(&mut node, &bag);
            self.handle_object_observable(misp_object, vec![node]);
        }
    }

    fn parse_vulnerability_object(&mut self, misp_object: &MispObject) {
        let mut bag = FieldBag::extract(
            &misp_object.attributes,
            VULNERABILITY_SINGLE_FIELDS,
            &[],
            false,
        );
        let mut node = StixNode::sdo(
            "vulnerability",
            &stix_id("vulnerability", &misp_object.uuid),
        );
        if let Some(identifier) = bag.pop_single("id") {
            node.set_str("name", identifier.text());
            node.push_to_array(
                "external_references",
                json!({"source_name": "cve", "external_id": identifier.text()}),
            );
        }
        if let Some(summary) = bag.pop_single("summary") {
            node.set_str("description", summary.text());
        }
        for value in bag.pop("references") {
            node.push_to_array(
                "external_references",
                json!({"source_name": "url", "url": value.text()}),
            );
        }
        Self::apply_custom_properties(&mut node, &bag);
        self.handle_non_indicator_object(misp_object, node, false);
    }

    // -----------------------------------------------------------------
    // deferred file / PE / PE-section resolution
    // -----------------------------------------------------------------

    fn resolve_pending_objects(&mut self) {
        let files = std::mem::take(&mut self.pending.file);
        for (file_uuid, file_ids, file_object) in files {
            self.resolve_file_to_parse(&file_object, &file_uuid, file_ids);
        }
        let pe_objects = std::mem::take(&mut self.pending.pe);
        for (_, pe_ids, pe_object) in pe_objects {
            self.resolve_pe_to_parse(&pe_object, pe_ids);
        }
        // Orphan sections have no resolvable parent left.
        let sections = std::mem::take(&mut self.pending.pe_section);
        for (_, _, section_object) in sections {
            self.parse_custom_object(&section_object);
        }
    }

    fn resolve_file_to_parse(&mut self, file_object: &MispObject, file_uuid: &str, file_ids: bool) {
        let pe_uuids: Vec<String> = file_object
            .references
            .iter()
            .filter(|reference| reference.is_included("pe"))
            .map(|reference| reference.referenced_uuid.clone())
            .filter(|uuid| {
                let known = self
                    .pending
                    .pe
                    .iter()
                    .any(|(entry_uuid, _, _)| entry_uuid == uuid);
                if !known {
                    self.log.warn(format!(
                        "file object {file_uuid} references a pe object {uuid} that is not in the event"
                    ));
                }
                known
            })
            .collect();
        if pe_uuids.len() != 1 {
            if pe_uuids.len() > 1 {
                self.log.warn(format!(
                    "file object {file_uuid} references several pe objects, converting it standalone"
                ));
            }
            if file_ids {
                let terms = self.file_object_pattern(file_object);
                self.handle_object_indicator(file_object, terms);
            } else {
                let observables = self.file_observable_nodes(file_object, None);
                self.handle_object_observable(file_object, observables);
            }
            return;
        }
        let Some((pe_ids, pe_object)) = self.pending.take_pe(&pe_uuids[0]) else {
            return;
        };
        let (to_ids, section_uuids) = self.pe_reference_flags(&pe_object, vec![file_ids, pe_ids]);
        if to_ids {
            let mut terms = self.file_object_pattern(file_object);
            terms.extend(self.pe_extension_pattern(&pe_object, &section_uuids));
            self.handle_object_indicator(file_object, terms);
        } else {
            let extension = self.pe_extension_observable(&pe_object, &section_uuids);
            let observables = self.file_observable_nodes(file_object, Some(extension));
            self.handle_object_observable(file_object, observables);
        }
    }

    fn resolve_pe_to_parse(&mut self, pe_object: &MispObject, pe_ids: bool) {
        let (to_ids, section_uuids) = self.pe_reference_flags(pe_object, vec![pe_ids]);
        if to_ids {
            let terms = self.pe_extension_pattern(pe_object, &section_uuids);
            self.handle_object_indicator(pe_object, terms);
        } else {
            let extension = self.pe_extension_observable(pe_object, &section_uuids);
            let mut file = sco("file", &pe_object.uuid);
            let name = extension
                .get("x_misp_original_filename")
                .or_else(|| extension.get("x_misp_internal_filename"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            file.set_str("name", name);
            file.set("extensions", json!({"windows-pebinary-ext": extension}));
            self.handle_object_observable(pe_object, vec![file]);
        }
    }

    /// The joint construct is a detection whenever any participant flags
    /// `to_ids`. Also collects the resolvable section UUIDs.
    fn pe_reference_flags(
        &mut self,
        pe_object: &MispObject,
        mut flags: Vec<bool>,
    ) -> (bool, Vec<String>) {
        let mut section_uuids = Vec::new();
        for reference in &pe_object.references {
            if !reference.is_included("pe-section") {
                continue;
            }
            match self.pending.section_ids_flag(&reference.referenced_uuid) {
                Some(section_ids) => {
                    flags.push(section_ids);
                    section_uuids.push(reference.referenced_uuid.clone());
                }
                None => self.log.warn(format!(
                    "pe object {} references a pe-section object {} that is not in the event",
                    pe_object.uuid, reference.referenced_uuid
                )),
            }
        }
        (flags.into_iter().any(|flag| flag), section_uuids)
    }

    fn pe_extension_pattern(
        &mut self,
        pe_object: &MispObject,
        section_uuids: &[String],
    ) -> Vec<String> {
        let prefix = "file:extensions.'windows-pebinary-ext'";
        let mut bag = FieldBag::extract(&pe_object.attributes, PE_SINGLE_FIELDS, &[], true);
        let mut terms = Vec::new();
        for (relation, feature) in PE_MAPPING {
            if let Some(value) = bag.pop_single(relation) {
                terms.push(pattern::comparison(&format!("{prefix}.{feature}"), value.text()));
            }
        }
        for (relation, values) in std::mem::take(&mut bag).entries.into_iter() {
            let key = sanitize_custom_key(&relation);
            for value in values {
                terms.push(pattern::comparison(
                    &format!("{prefix}.x_misp_{key}"),
                    value.text(),
                ));
            }
        }
        for (index, section_uuid) in section_uuids.iter().enumerate() {
            let Some((_, section_object)) = self.pending.take_section(section_uuid) else {
                continue;
            };
            let section_prefix = format!("{prefix}.sections[{index}]");
            let mut section_bag =
                FieldBag::extract(&section_object.attributes, PE_SECTION_SINGLE_FIELDS, &[], true);
            for (relation, feature) in PE_SECTION_MAPPING {
                if let Some(value) = section_bag.pop_single(relation) {
                    terms.push(pattern::comparison(
                        &format!("{section_prefix}.{feature}"),
                        value.text(),
                    ));
                }
            }
            for hash_type in HASH_ATTRIBUTE_TYPES {
                if let Some(value) = section_bag.pop_single(hash_type) {
                    match pattern::hash_comparison(
                        &format!("{section_prefix}.hashes"),
                        hash_type,
                        value.text(),
                    ) {
                        Ok(term) => terms.push(term),
                        Err(error) => {
                            self.log.warn(format!(
                                "pe-section object {}: {error}, keeping {hash_type} as custom property",
                                section_object.uuid
                            ));
                            section_bag.push_single(hash_type, value);
                        }
                    }
                }
            }
            for (relation, values) in std::mem::take(&mut section_bag).entries.into_iter() {
                let key = sanitize_custom_key(&relation);
                for value in values {
                    terms.push(pattern::comparison(
                        &format!("{section_prefix}.x_misp_{key}"),
                        value.text(),
                    ));
                }
            }
        }
        terms
    }

    fn pe_extension_observable(
        &mut self,
        pe_object: &MispObject,
        section_uuids: &[String],
    ) -> Value {
        let mut bag = FieldBag::extract(&pe_object.attributes, PE_SINGLE_FIELDS, &[], false);
        let mut extension = Map::new();
        for (relation, feature) in PE_MAPPING {
            if let Some(value) = bag.pop_single(relation) {
                if *relation == "number-sections" {
                    match value.text().parse::<u64>() {
                        Ok(count) => {
                            extension.insert((*feature).into(), json!(count));
                        }
                        Err(_) => {
                            extension.insert((*feature).into(), json!(value.text()));
                        }
                    }
                } else {
                    extension.insert((*feature).into(), json!(value.text()));
                }
            }
        }
        for (relation, values) in std::mem::take(&mut bag).entries.into_iter() {
            let key = format!("x_misp_{}", sanitize_custom_key(&relation));
            let rendered: Vec<Value> = values
                .iter()
                .map(|value| json!(value.text()))
                .collect();
            if rendered.len() == 1 {
                extension.insert(key, rendered.into_iter().next().unwrap_or(Value::Null));
            } else {
                extension.insert(key, Value::Array(rendered));
            }
        }
        let mut sections = Vec::new();
        for section_uuid in section_uuids {
            let Some((_, section_object)) = self.pending.take_section(section_uuid) else {
                continue;
            };
            let mut section_bag = FieldBag::extract(
                &section_object.attributes,
                PE_SECTION_SINGLE_FIELDS,
                &[],
                false,
            );
            let mut section = Map::new();
            for (relation, feature) in PE_SECTION_MAPPING {
                if let Some(value) = section_bag.pop_single(relation) {
                    match (*relation, value.text().parse::<f64>()) {
                        ("size-in-bytes", Ok(size)) => {
                            section.insert((*feature).into(), json!(size as u64));
                        }
                        ("entropy", Ok(entropy)) => {
                            section.insert((*feature).into(), json!(entropy));
                        }
                        _ => {
                            section.insert((*feature).into(), json!(value.text()));
                        }
                    }
                }
            }
            let mut hashes = Map::new();
            for hash_type in HASH_ATTRIBUTE_TYPES {
                if let Some(value) = section_bag.pop_single(hash_type) {
                    let normalized = pattern::normalize_hash_type(hash_type);
                    if pattern::check_hash_format(&normalized, value.text()) {
                        hashes.insert(normalized, json!(value.text()));
                    } else {
                        self.log.warn(format!(
                            "pe-section object {}: invalid {hash_type} hash value '{}'",
                            section_object.uuid,
                            value.text()
                        ));
                        section.insert(
                            format!("x_misp_{}", sanitize_custom_key(hash_type)),
                            json!(value.text()),
                        );
                    }
                }
            }
            if !hashes.is_empty() {
                section.insert("hashes".into(), Value::Object(hashes));
            }
            for (relation, values) in std::mem::take(&mut section_bag).entries.into_iter() {
                let key = format!("x_misp_{}", sanitize_custom_key(&relation));
                let rendered: Vec<Value> =
                    values.iter().map(|value| json!(value.text())).collect();
                if rendered.len() == 1 {
                    section.insert(key, rendered.into_iter().next().unwrap_or(Value::Null));
                } else {
                    section.insert(key, Value::Array(rendered));
                }
            }
            sections.push(Value::Object(section));
        }
        if !sections.is_empty() {
            extension.insert("sections".into(), Value::Array(sections));
        }
        Value::Object(extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(relation: &str, attribute_type: &str, value: &str) -> MispAttribute {
        MispAttribute::new(attribute_type, value).with_relation(relation)
    }

    #[test]
    fn field_bag_buckets_single_and_multiple() {
        let attributes = vec![
            field("ip", "ip-dst", "198.51.100.3"),
            field("ip", "ip-dst", "198.51.100.4"),
            field("domain", "domain", "circl.lu"),
        ];
        let mut bag = FieldBag::extract(&attributes, &["domain"], &[], false);
        assert_eq!(bag.pop("ip").len(), 2);
        assert_eq!(bag.pop_single("domain").unwrap().text(), "circl.lu");
        assert!(bag.is_empty());
    }

    #[test]
    fn field_bag_single_last_write_wins() {
        let attributes = vec![
            field("name", "text", "first"),
            field("name", "text", "second"),
        ];
        let mut bag = FieldBag::extract(&attributes, &["name"], &[], false);
        assert_eq!(bag.pop_single("name").unwrap().text(), "second");
    }

    #[test]
    fn field_bag_pairs_data() {
        let attributes = vec![field("attachment", "attachment", "report.docx").with_data("QUJD")];
        let mut bag = FieldBag::extract(&attributes, &[], &["attachment"], false);
        match bag.pop_single("attachment").unwrap() {
            AttrValue::Data { value, data } => {
                assert_eq!(value, "report.docx");
                assert_eq!(data, "QUJD");
            }
            AttrValue::Text(_) => panic!("expected data-bearing value"),
        }
    }
}
