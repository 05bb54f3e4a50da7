//! Observable-graph walking and MISP object reconstruction.
//!
//! Each node materializes at most once per event: handlers check the
//! per-event cache first, register their result before following outgoing
//! references (which keeps reference cycles finite), and later visits
//! short-circuit to the cached handle. Scalar-shaped nodes (directory,
//! autonomous-system, domain-name) demote to bare attributes unless
//! auxiliary properties or extra references force a full object; that
//! decision is made once, at first visit.

use serde_json::Value;

use crate::error::{ConversionError, Result};
use crate::mappings::misp_hash_type;
use crate::mappings::object::*;
use crate::misp::{MispAttribute, MispObject};
use crate::stix::{deterministic_uuid, StixNode};

use super::{sanitize_ref_uuid, MispRef, StixToMisp};

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Sub-attribute with a UUID derived from the observable, the relation and
/// the value, so repeat conversions stay stable.
fn mapped_attribute(
    node_id: &str,
    attribute_type: &str,
    relation: &str,
    value: &str,
) -> MispAttribute {
    MispAttribute::new(attribute_type, value)
        .with_uuid(deterministic_uuid(&format!("{node_id} - {relation} - {value}")).to_string())
        .with_relation(relation)
}

fn extract_mapped(node: &StixNode, mapping: &[(&str, (&str, &str))]) -> Vec<MispAttribute> {
    let mut attributes = Vec::new();
    for (property, (attribute_type, relation)) in mapping {
        if let Some(value) = node.get(property) {
            attributes.push(mapped_attribute(
                node.id(),
                attribute_type,
                relation,
                &value_text(value),
            ));
        }
    }
    attributes
}

fn hash_attributes(node: &StixNode) -> Vec<MispAttribute> {
    let mut attributes = Vec::new();
    if let Some(hashes) = node.get_object("hashes") {
        for (key, value) in hashes {
            if let Some(misp_type) = misp_hash_type(key) {
                attributes.push(mapped_attribute(
                    node.id(),
                    misp_type,
                    misp_type,
                    &value_text(value),
                ));
            }
        }
    }
    attributes
}

/// `x_misp_*` passthrough properties reconstruct as plain sub-attributes.
fn custom_attributes(node: &StixNode) -> Vec<MispAttribute> {
    let mut attributes = Vec::new();
    for (key, value) in &node.0 {
        let Some(suffix) = key.strip_prefix("x_misp_") else {
            continue;
        };
        let relation = suffix.replace('_', "-");
        match value {
            Value::Object(entry) => {
                let text = entry.get("value").map(value_text).unwrap_or_default();
                let mut attribute = mapped_attribute(node.id(), "attachment", &relation, &text);
                attribute.data = entry.get("data").map(value_text);
                attributes.push(attribute);
            }
            Value::Array(items) => {
                for item in items {
                    attributes.push(mapped_attribute(
                        node.id(),
                        "text",
                        &relation,
                        &value_text(item),
                    ));
                }
            }
            other => attributes.push(mapped_attribute(
                node.id(),
                "text",
                &relation,
                &value_text(other),
            )),
        }
    }
    attributes
}

fn object_from_observable(name: &str, node: &StixNode) -> MispObject {
    let (uuid, comment) = sanitize_ref_uuid(node.id());
    let mut object = MispObject::new(name);
    object.uuid = uuid;
    object.comment = comment;
    object
}

impl StixToMisp {
    /// Dispatch by reference prefix. Failures are recorded against the
    /// offending reference and the caller continues with its siblings.
    pub(crate) fn resolve_observable(&mut self, reference: &str) -> Result<MispRef> {
        let object_type = reference.split("--").next().unwrap_or_default();
        let result = match object_type {
            "artifact" => self.parse_artifact_observable(reference),
            "autonomous-system" => self.parse_as_observable(reference),
            "directory" => self.parse_directory_observable(reference, None),
            "domain-name" => self.parse_domain_observable(reference),
            "email-addr" => self.parse_email_address_observable(reference),
            "email-message" => self.parse_email_message_observable(reference),
            "file" => self.parse_file_observable(reference),
            "ipv4-addr" | "ipv6-addr" => self.parse_ip_observable(reference),
            "mac-addr" => self.parse_scalar_observable(reference, "mac-address", "value"),
            "mutex" => self.parse_scalar_observable(reference, "mutex", "name"),
            "network-traffic" => self.parse_network_traffic_observable(reference),
            "process" => self.parse_process_observable(reference),
            "software" => self.parse_software_observable(reference),
            "url" => self.parse_scalar_observable(reference, "url", "value"),
            "user-account" => self.parse_user_account_observable(reference),
            "windows-registry-key" => self.parse_registry_key_observable(reference),
            "x509-certificate" => self.parse_x509_observable(reference),
            other => Err(ConversionError::unsupported("observable", other)),
        };
        if let Err(error) = &result {
            self.log
                .error(format!("error parsing observable object {reference}: {error}"));
        }
        result
    }

    // -----------------------------------------------------------------
    // scalar observables
    // -----------------------------------------------------------------

    /// Single-property observables that demote to one attribute.
    fn parse_scalar_observable(
        &mut self,
        reference: &str,
        attribute_type: &str,
        property: &str,
    ) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let value = node
            .get_str(property)
            .ok_or_else(|| ConversionError::missing_field("value", node.id().to_string()))?;
        let (uuid, comment) = sanitize_ref_uuid(node.id());
        let mut attribute = MispAttribute::new(attribute_type, value).with_uuid(uuid);
        attribute.comment = comment;
        let handle = self.scope().add_attribute(attribute);
        let result = MispRef::Attribute(handle);
        self.mark_used(reference, result.clone());
        Ok(result)
    }

    fn parse_ip_observable(&mut self, reference: &str) -> Result<MispRef> {
        self.parse_scalar_observable(reference, "ip-dst", "value")
    }

    fn parse_artifact_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let mut object = object_from_observable("artifact", &node);
        if let Some(payload) = node.get_str("payload_bin") {
            let filename = node.get_str("x_misp_filename").unwrap_or("artifact");
            let mut attribute =
                mapped_attribute(node.id(), "attachment", "payload_bin", filename);
            attribute.data = Some(payload.to_string());
            object.add_attribute(attribute);
        }
        for attribute in extract_mapped(&node, ARTIFACT_INBOUND_MAPPING) {
            object.add_attribute(attribute);
        }
        for attribute in hash_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle);
        self.mark_used(reference, result.clone());
        Ok(result)
    }

    // -----------------------------------------------------------------
    // promotion / demotion cases
    // -----------------------------------------------------------------

    /// Autonomous systems promote to an `asn` object when any address
    /// observable claims membership through `belongs_to_refs`.
    fn parse_as_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let number = node
            .get("number")
            .map(value_text)
            .ok_or_else(|| ConversionError::missing_field("number", node.id().to_string()))?;
        let value = format!("AS{number}");
        let members: Vec<(String, String)> = self
            .observable_entries()
            .filter(|(_, candidate)| {
                matches!(candidate.object_type(), "ipv4-addr" | "ipv6-addr")
                    && candidate.ref_values("belongs_to_refs").contains(&reference)
            })
            .filter_map(|(member_reference, candidate)| {
                candidate
                    .get_str("value")
                    .map(|address| (member_reference.clone(), address.to_string()))
            })
            .collect();
        if members.is_empty() {
            let (uuid, comment) = sanitize_ref_uuid(node.id());
            let mut attribute = MispAttribute::new("AS", value).with_uuid(uuid);
            attribute.comment = comment;
            let handle = self.scope().add_attribute(attribute);
            let result = MispRef::Attribute(handle);
            self.mark_used(reference, result.clone());
            return Ok(result);
        }
        let mut object = object_from_observable("asn", &node);
        object.add_attribute(mapped_attribute(node.id(), "AS", "asn", &value));
        for (_, address) in &members {
            object.add_attribute(mapped_attribute(
                node.id(),
                "ip-src",
                "subnet-announced",
                address,
            ));
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle);
        self.mark_used(reference, result.clone());
        for (member_reference, _) in members {
            self.mark_used(&member_reference, result.clone());
        }
        Ok(result)
    }

    /// Directories demote to a `path` attribute unless extra properties or
    /// references beyond the requesting child force a full object. With a
    /// demoted directory and a requesting child, the path folds into the
    /// child's object.
    pub(crate) fn parse_directory_observable(
        &mut self,
        reference: &str,
        child: Option<(&str, &str)>,
    ) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let attributes = extract_mapped(&node, DIRECTORY_INBOUND_MAPPING);
        let contains: Vec<String> = node
            .ref_values("contains_refs")
            .iter()
            .map(|value| value.to_string())
            .collect();
        let child_reference = child.map(|(child_ref, _)| child_ref);
        let force_object = attributes.len() > 1
            || contains
                .iter()
                .any(|contained| Some(contained.as_str()) != child_reference);
        if force_object {
            let mut object = object_from_observable("directory", &node);
            for attribute in attributes {
                object.add_attribute(attribute);
            }
            for attribute in custom_attributes(&node) {
                object.add_attribute(attribute);
            }
            let handle = self.scope().add_object(object);
            let result = MispRef::Object(handle.clone());
            self.mark_used(reference, result.clone());
            for contained in contains {
                let target_uuid = match child {
                    Some((child_ref, child_uuid)) if child_ref == contained => {
                        child_uuid.to_string()
                    }
                    _ => match self.resolve_observable(&contained) {
                        Ok(resolved) => resolved.uuid().to_string(),
                        Err(_) => continue,
                    },
                };
                self.scope()
                    .add_object_reference(&handle, &target_uuid, "contains");
            }
            return Ok(result);
        }
        let Some(path) = attributes.into_iter().next() else {
            return Err(ConversionError::missing_field("path", node.id().to_string()));
        };
        match child {
            Some((_, child_uuid)) => {
                self.scope().add_object_attribute(child_uuid, path);
                let result = MispRef::Object(child_uuid.to_string());
                self.mark_used(reference, result.clone());
                Ok(result)
            }
            None => {
                let (uuid, comment) = sanitize_ref_uuid(node.id());
                let mut attribute = MispAttribute::new("text", path.value).with_uuid(uuid);
                attribute.comment = comment;
                let handle = self.scope().add_attribute(attribute);
                let result = MispRef::Attribute(handle);
                self.mark_used(reference, result.clone());
                Ok(result)
            }
        }
    }

    /// Domain names carrying resolutions promote to a `domain-ip` object;
    /// bare ones demote to a `domain` attribute.
    pub(crate) fn parse_domain_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let value = node
            .get_str("value")
            .ok_or_else(|| ConversionError::missing_field("value", node.id().to_string()))?
            .to_string();
        let resolutions: Vec<String> = node
            .ref_values("resolves_to_refs")
            .iter()
            .map(|item| item.to_string())
            .collect();
        if resolutions.is_empty() {
            return self.parse_scalar_observable(reference, "domain", "value");
        }
        let mut object = object_from_observable("domain-ip", &node);
        object.add_attribute(mapped_attribute(node.id(), "domain", "domain", &value));
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle.clone());
        self.mark_used(reference, result.clone());
        for resolution in resolutions {
            match resolution.split("--").next().unwrap_or_default() {
                "domain-name" => {
                    if let Ok(resolved) = self.parse_domain_observable(&resolution) {
                        self.scope().add_object_reference(
                            &handle,
                            resolved.uuid(),
                            "resolves-to",
                        );
                    }
                }
                "ipv4-addr" | "ipv6-addr" => {
                    let Ok(address_node) = self.observable_node(&resolution) else {
                        continue;
                    };
                    let Some(address) = address_node.get_str("value") else {
                        continue;
                    };
                    self.scope().add_object_attribute(
                        &handle,
                        mapped_attribute(address_node.id(), "ip-dst", "ip", address),
                    );
                    self.mark_used(&resolution, result.clone());
                    // An address resolving further to a MAC keeps that
                    // resolution as a commented attribute.
                    for mac_reference in address_node
                        .ref_values("resolves_to_refs")
                        .iter()
                        .map(|item| item.to_string())
                        .collect::<Vec<_>>()
                    {
                        let Ok(mac_node) = self.observable_node(&mac_reference) else {
                            continue;
                        };
                        let Some(mac_value) = mac_node.get_str("value") else {
                            continue;
                        };
                        let (mac_uuid, _) = sanitize_ref_uuid(mac_node.id());
                        let mut attribute =
                            MispAttribute::new("mac-address", mac_value).with_uuid(mac_uuid);
                        attribute.comment = Some(format!("Resolved by {address}"));
                        let mac_handle = self.scope().add_attribute(attribute);
                        self.mark_used(&mac_reference, MispRef::Attribute(mac_handle.clone()));
                        self.scope()
                            .add_object_reference(&handle, &mac_handle, "resolves-to");
                    }
                }
                _ => {}
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------
    // email
    // -----------------------------------------------------------------

    fn parse_email_address_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        if let Some(owner) = node.get_str("belongs_to_ref").map(str::to_string) {
            let value = node
                .get_str("value")
                .ok_or_else(|| ConversionError::missing_field("value", node.id().to_string()))?
                .to_string();
            let account = self.parse_user_account_observable(&owner)?;
            let account_uuid = account.uuid().to_string();
            self.scope().add_object_attribute(
                &account_uuid,
                mapped_attribute(node.id(), "email-dst", "email", &value),
            );
            let result = MispRef::Object(account_uuid);
            self.mark_used(reference, result.clone());
            return Ok(result);
        }
        self.parse_scalar_observable(reference, "email-dst", "value")
    }

    fn parse_email_message_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let mut object = object_from_observable("email", &node);
        for attribute in extract_mapped(&node, EMAIL_INBOUND_MAPPING) {
            object.add_attribute(attribute);
        }
        if let Some(headers) = node.get_object("additional_header_fields") {
            for (property, (attribute_type, relation)) in EMAIL_HEADER_INBOUND_MAPPING {
                if let Some(value) = headers.get(*property) {
                    object.add_attribute(mapped_attribute(
                        node.id(),
                        attribute_type,
                        relation,
                        &value_text(value),
                    ));
                }
            }
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle.clone());
        self.mark_used(reference, result.clone());
        if let Some(from_reference) = node.get_str("from_ref").map(str::to_string) {
            self.fold_email_address(&from_reference, &handle, "email-src", "from", &result);
        }
        for (field, relation) in [("to_refs", "to"), ("cc_refs", "cc"), ("bcc_refs", "bcc")] {
            for recipient in node
                .ref_values(field)
                .iter()
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
            {
                self.fold_email_address(&recipient, &handle, "email-dst", relation, &result);
            }
        }
        Ok(result)
    }

    /// Address observables referenced by a message fold into the email
    /// object rather than materializing standalone.
    fn fold_email_address(
        &mut self,
        reference: &str,
        email_uuid: &str,
        attribute_type: &str,
        relation: &str,
        result: &MispRef,
    ) {
        let Ok(address_node) = self.observable_node(reference) else {
            return;
        };
        let Some(value) = address_node.get_str("value") else {
            return;
        };
        self.scope().add_object_attribute(
            email_uuid,
            mapped_attribute(address_node.id(), attribute_type, relation, value),
        );
        if let Some(display_name) = address_node.get_str("display_name") {
            self.scope().add_object_attribute(
                email_uuid,
                mapped_attribute(
                    address_node.id(),
                    "text",
                    &format!("{relation}-display-name"),
                    display_name,
                ),
            );
        }
        self.mark_used(reference, result.clone());
    }

    // -----------------------------------------------------------------
    // file and its satellites
    // -----------------------------------------------------------------

    pub(crate) fn parse_file_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let mut object = object_from_observable("file", &node);
        for attribute in hash_attributes(&node) {
            object.add_attribute(attribute);
        }
        for attribute in extract_mapped(&node, FILE_INBOUND_MAPPING) {
            object.add_attribute(attribute);
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle.clone());
        self.mark_used(reference, result.clone());
        if let Some(content_reference) = node.get_str("content_ref").map(str::to_string) {
            if let Ok(artifact) = self.parse_artifact_observable(&content_reference) {
                let artifact_uuid = artifact.uuid().to_string();
                self.scope()
                    .add_object_reference(&artifact_uuid, &handle, "content-of");
            }
        }
        if let Some(directory_reference) = node.get_str("parent_directory_ref").map(str::to_string)
        {
            let _ = self.parse_directory_observable(
                &directory_reference,
                Some((node.id(), &handle)),
            );
        }
        if let Some(extensions) = node.get_object("extensions") {
            if let Some(Value::Object(pe_extension)) = extensions.get("windows-pebinary-ext") {
                self.reconstruct_pe_objects(&node, pe_extension.clone(), &handle);
            }
        }
        Ok(result)
    }

    /// Rebuilds pe / pe-section objects from a PE binary extension.
    fn reconstruct_pe_objects(
        &mut self,
        file_node: &StixNode,
        extension: serde_json::Map<String, Value>,
        file_uuid: &str,
    ) {
        let pe_uuid = deterministic_uuid(&format!("{} - pe", file_node.id())).to_string();
        let mut pe_object = MispObject::new("pe");
        pe_object.uuid = pe_uuid.clone();
        for (relation, feature) in PE_MAPPING {
            if let Some(value) = extension.get(*feature) {
                pe_object.add_attribute(mapped_attribute(
                    file_node.id(),
                    if *relation == "imphash" { "imphash" } else { "text" },
                    relation,
                    &value_text(value),
                ));
            }
        }
        for (key, value) in &extension {
            if let Some(suffix) = key.strip_prefix("x_misp_") {
                pe_object.add_attribute(mapped_attribute(
                    file_node.id(),
                    "text",
                    &suffix.replace('_', "-"),
                    &value_text(value),
                ));
            }
        }
        let pe_handle = self.scope().add_object(pe_object);
        self.scope()
            .add_object_reference(file_uuid, &pe_handle, "includes");
        if let Some(Value::Array(sections)) = extension.get("sections") {
            for (index, section) in sections.iter().enumerate() {
                let Some(section_map) = section.as_object() else {
                    continue;
                };
                let section_seed = format!("{} - pe-section - {index}", file_node.id());
                let mut section_object = MispObject::new("pe-section");
                section_object.uuid = deterministic_uuid(&section_seed).to_string();
                for (relation, feature) in PE_SECTION_MAPPING {
                    if let Some(value) = section_map.get(*feature) {
                        section_object.add_attribute(mapped_attribute(
                            &section_seed,
                            "text",
                            relation,
                            &value_text(value),
                        ));
                    }
                }
                if let Some(Value::Object(hashes)) = section_map.get("hashes") {
                    for (key, value) in hashes {
                        if let Some(misp_type) = misp_hash_type(key) {
                            section_object.add_attribute(mapped_attribute(
                                &section_seed,
                                misp_type,
                                misp_type,
                                &value_text(value),
                            ));
                        }
                    }
                }
                let section_handle = self.scope().add_object(section_object);
                self.scope()
                    .add_object_reference(&pe_handle, &section_handle, "includes");
            }
        }
    }

    // -----------------------------------------------------------------
    // network traffic
    // -----------------------------------------------------------------

    fn parse_network_traffic_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let socket = node
            .get_object("extensions")
            .map(|extensions| extensions.contains_key("socket-ext"))
            .unwrap_or(false);
        let name = if socket {
            "network-socket"
        } else {
            "network-connection"
        };
        let mut object = object_from_observable(name, &node);
        for (property, relation) in [("src_port", "src-port"), ("dst_port", "dst-port")] {
            if let Some(value) = node.get(property) {
                object.add_attribute(mapped_attribute(
                    node.id(),
                    "port",
                    relation,
                    &value_text(value),
                ));
            }
        }
        if let Some(protocols) = node.get_array("protocols") {
            for protocol in protocols {
                let value = value_text(protocol);
                object.add_attribute(mapped_attribute(
                    node.id(),
                    "text",
                    protocol_layer(&value),
                    &value.to_uppercase(),
                ));
            }
        }
        if socket {
            if let Some(Value::Object(extension)) = node
                .get_object("extensions")
                .and_then(|extensions| extensions.get("socket-ext"))
                .cloned()
            {
                if let Some(family) = extension.get("address_family") {
                    object.add_attribute(mapped_attribute(
                        node.id(),
                        "text",
                        "address-family",
                        &value_text(family),
                    ));
                }
                if extension
                    .get("is_listening")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    object.add_attribute(mapped_attribute(
                        node.id(),
                        "text",
                        "state",
                        "listening",
                    ));
                }
            }
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle.clone());
        self.mark_used(reference, result.clone());
        for (field, ip_relation, hostname_relation) in [
            ("src_ref", "ip-src", "hostname-src"),
            ("dst_ref", "ip-dst", "hostname-dst"),
        ] {
            let Some(asset_reference) = node.get_str(field).map(str::to_string) else {
                continue;
            };
            let Ok(asset_node) = self.observable_node(&asset_reference) else {
                continue;
            };
            let Some(value) = asset_node.get_str("value") else {
                continue;
            };
            let (attribute_type, relation) = match asset_node.object_type() {
                "domain-name" => ("hostname", hostname_relation),
                _ => (ip_relation, ip_relation),
            };
            self.scope().add_object_attribute(
                &handle,
                mapped_attribute(asset_node.id(), attribute_type, relation, value),
            );
            self.mark_used(&asset_reference, result.clone());
        }
        for encapsulated in node
            .ref_values("encapsulates_refs")
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
        {
            if let Ok(inner) = self.parse_network_traffic_observable(&encapsulated) {
                self.scope()
                    .add_object_reference(&handle, inner.uuid(), "encapsulates");
            }
        }
        if let Some(outer_reference) = node.get_str("encapsulated_by_ref").map(str::to_string) {
            if let Ok(outer) = self.parse_network_traffic_observable(&outer_reference) {
                self.scope()
                    .add_object_reference(&handle, outer.uuid(), "encapsulated-by");
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------
    // process graph
    // -----------------------------------------------------------------

    fn parse_process_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let mut object = object_from_observable("process", &node);
        for attribute in extract_mapped(&node, PROCESS_INBOUND_MAPPING) {
            object.add_attribute(attribute);
        }
        if node.get("is_hidden").and_then(Value::as_bool).unwrap_or(false) {
            object.add_attribute(mapped_attribute(node.id(), "text", "hidden", "True"));
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle.clone());
        self.mark_used(reference, result.clone());
        for connection in node
            .ref_values("opened_connection_refs")
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
        {
            if let Ok(network) = self.parse_network_traffic_observable(&connection) {
                self.scope()
                    .add_object_reference(&handle, network.uuid(), "opens-connection");
            }
        }
        if let Some(creator) = node.get_str("creator_user_ref").map(str::to_string) {
            if let Ok(user) = self.parse_user_account_observable(&creator) {
                let user_uuid = user.uuid().to_string();
                self.scope()
                    .add_object_reference(&user_uuid, &handle, "creates");
            }
        }
        if let Some(image) = node.get_str("image_ref").map(str::to_string) {
            if let Ok(file) = self.parse_file_observable(&image) {
                self.scope()
                    .add_object_reference(&handle, file.uuid(), "executes");
            }
        }
        if let Some(parent) = node.get_str("parent_ref").map(str::to_string) {
            if let Ok(parent_process) = self.parse_process_observable(&parent) {
                let parent_uuid = parent_process.uuid().to_string();
                self.scope()
                    .add_object_reference(&parent_uuid, &handle, "parent-of");
            }
        }
        for child in node
            .ref_values("child_refs")
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
        {
            if let Ok(child_process) = self.parse_process_observable(&child) {
                let child_uuid = child_process.uuid().to_string();
                self.scope()
                    .add_object_reference(&child_uuid, &handle, "child-of");
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------
    // remaining object-shaped observables
    // -----------------------------------------------------------------

    fn parse_software_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let mut object = object_from_observable("software", &node);
        for attribute in extract_mapped(&node, SOFTWARE_INBOUND_MAPPING) {
            object.add_attribute(attribute);
        }
        if let Some(languages) = node.get_array("languages") {
            for language in languages {
                object.add_attribute(mapped_attribute(
                    node.id(),
                    "text",
                    "language",
                    &value_text(language),
                ));
            }
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle);
        self.mark_used(reference, result.clone());
        Ok(result)
    }

    pub(crate) fn parse_user_account_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let mut object = object_from_observable("user-account", &node);
        for attribute in extract_mapped(&node, USER_ACCOUNT_INBOUND_MAPPING) {
            object.add_attribute(attribute);
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle);
        self.mark_used(reference, result.clone());
        Ok(result)
    }

    fn parse_registry_key_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let mut object = object_from_observable("registry-key", &node);
        for attribute in extract_mapped(&node, REGISTRY_KEY_INBOUND_MAPPING) {
            object.add_attribute(attribute);
        }
        let values: Vec<Value> = node.get_array("values").cloned().unwrap_or_default();
        if values.len() == 1 {
            if let Some(entry) = values[0].as_object() {
                for (property, (attribute_type, relation)) in REGISTRY_VALUE_INBOUND_MAPPING {
                    if let Some(value) = entry.get(*property) {
                        object.add_attribute(mapped_attribute(
                            node.id(),
                            attribute_type,
                            relation,
                            &value_text(value),
                        ));
                    }
                }
            }
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle.clone());
        self.mark_used(reference, result.clone());
        // Several values fan out into registry-key-value sub-objects.
        if values.len() > 1 {
            for (index, entry) in values.iter().enumerate() {
                let Some(entry_map) = entry.as_object() else {
                    continue;
                };
                let seed = format!("{} - values - {index}", node.id());
                let mut value_object = MispObject::new("registry-key-value");
                value_object.uuid = deterministic_uuid(&seed).to_string();
                value_object.comment =
                    Some(format!("Original Windows Registry Key ID: {}", node.id()));
                for (property, (attribute_type, relation)) in REGISTRY_VALUE_INBOUND_MAPPING {
                    if let Some(value) = entry_map.get(*property) {
                        value_object.add_attribute(mapped_attribute(
                            &seed,
                            attribute_type,
                            relation,
                            &value_text(value),
                        ));
                    }
                }
                let value_handle = self.scope().add_object(value_object);
                self.scope()
                    .add_object_reference(&handle, &value_handle, "contains");
            }
        }
        Ok(result)
    }

    fn parse_x509_observable(&mut self, reference: &str) -> Result<MispRef> {
        if let Some(cached) = self.cached_result(reference) {
            return Ok(cached);
        }
        let node = self.observable_node(reference)?;
        let mut object = object_from_observable("x509", &node);
        if let Some(hashes) = node.get_object("hashes") {
            for (property, (attribute_type, relation)) in X509_HASH_INBOUND_MAPPING {
                if let Some(value) = hashes.get(*property) {
                    object.add_attribute(mapped_attribute(
                        node.id(),
                        attribute_type,
                        relation,
                        &value_text(value),
                    ));
                }
            }
        }
        for attribute in extract_mapped(&node, X509_INBOUND_MAPPING) {
            object.add_attribute(attribute);
        }
        if node
            .get("is_self_signed")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            object.add_attribute(mapped_attribute(node.id(), "text", "self_signed", "True"));
        }
        for attribute in custom_attributes(&node) {
            object.add_attribute(attribute);
        }
        let handle = self.scope().add_object(object);
        let result = MispRef::Object(handle);
        self.mark_used(reference, result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mapped_attribute_uuid_is_stable() {
        let first = mapped_attribute("file--x", "filename", "filename", "a.txt");
        let second = mapped_attribute("file--x", "filename", "filename", "a.txt");
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(first.object_relation.as_deref(), Some("filename"));
    }

    #[test]
    fn custom_properties_reconstruct_as_attributes() {
        let mut node = StixNode::new("file", "file--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f");
        node.set("x_misp_state", json!("Malicious"));
        node.set("x_misp_entropy", json!(7.2));
        let attributes = custom_attributes(&node);
        assert_eq!(attributes.len(), 2);
        assert!(attributes
            .iter()
            .any(|attribute| attribute.object_relation.as_deref() == Some("state")));
        assert!(attributes
            .iter()
            .any(|attribute| attribute.value == "7.2"));
    }
}
