//! Attribute dispatch for the outbound direction.
//!
//! Each MISP attribute type resolves through the static registry to a
//! handler that builds either a detection pattern (`to_ids = true`) or an
//! observable graph. Hash-format failures degrade to the custom fallback
//! without aborting the event; any other handler error is logged against
//! the offending attribute and the batch continues.

use serde_json::json;

use crate::error::Result;
use crate::mappings::attribute::{attribute_kind, email_message_feature, AttributeKind};
use crate::mappings::COMPOSITE_SEPARATORS;
use crate::misp::MispAttribute;
use crate::pattern;
use crate::stix::{stix_id, StixNode};

use super::observables::{derived_uuid, ip_address_sco, sco, sco_with_value};
use super::MispToStix;

/// Splits a composite value on the first matching separator.
fn split_composite(value: &str) -> Option<(&str, &str)> {
    COMPOSITE_SEPARATORS
        .iter()
        .find_map(|separator| value.split_once(separator))
}

impl MispToStix {
    /// Dispatch boundary for one attribute: unmapped types and recoverable
    /// failures degrade to the custom representation, anything else is
    /// recorded as a per-attribute error.
    pub(crate) fn resolve_attribute(&mut self, attribute: &MispAttribute) {
        let outcome = match attribute_kind(&attribute.attribute_type) {
            Some(kind) => self.dispatch_attribute(kind, attribute),
            None => {
                self.log.warn(format!(
                    "MISP attribute type not mapped to STIX: {}",
                    attribute.attribute_type
                ));
                self.parse_custom_attribute(attribute);
                Ok(())
            }
        };
        if let Err(error) = outcome {
            if error.is_recoverable() {
                self.log.warn(format!(
                    "attribute {} ({}): {error}, falling back to custom representation",
                    attribute.uuid, attribute.attribute_type
                ));
                self.parse_custom_attribute(attribute);
            } else {
                self.log.error(format!(
                    "error parsing attribute {} ({}): {error}",
                    attribute.uuid, attribute.attribute_type
                ));
            }
        }
    }

    fn dispatch_attribute(&mut self, kind: AttributeKind, attribute: &MispAttribute) -> Result<()> {
        use AttributeKind::*;
        match kind {
            Attachment => self.parse_attachment_attribute(attribute),
            AutonomousSystem => self.parse_autonomous_system_attribute(attribute)?,
            CampaignName => self.parse_campaign_name_attribute(attribute),
            Domain => self.parse_domain_attribute(attribute),
            DomainIp => self.parse_domain_ip_attribute(attribute),
            Email => self.parse_email_attribute(attribute),
            EmailAttachment => self.parse_email_attachment_attribute(attribute),
            EmailBody | EmailHeader | EmailReplyTo | EmailSubject | EmailXMailer => {
                self.parse_email_message_attribute(kind, attribute)
            }
            EmailDestination => self.parse_email_reference_attribute(attribute, "to"),
            EmailSource => self.parse_email_reference_attribute(attribute, "from"),
            Filename => self.parse_filename_attribute(attribute),
            GithubUsername => self.parse_github_username_attribute(attribute),
            Hash => self.parse_hash_attribute(attribute)?,
            HashComposite => self.parse_hash_composite_attribute(attribute, None)?,
            HostnamePort => self.parse_hostname_port_attribute(attribute),
            HttpMethod => self.parse_single_pattern_or_custom(
                attribute,
                "network-traffic:extensions.'http-request-ext'.request_method",
            ),
            Ip => self.parse_ip_attribute(attribute),
            IpPort => self.parse_ip_port_attribute(attribute),
            MacAddress => self.parse_mac_address_attribute(attribute),
            MalwareSample => self.parse_malware_sample_attribute(attribute)?,
            Mutex => self.parse_mutex_attribute(attribute),
            Port => self.parse_single_pattern_or_custom(attribute, "network-traffic:dst_port"),
            Regkey => self.parse_regkey_attribute(attribute),
            RegkeyValue => self.parse_regkey_value_attribute(attribute),
            SizeInBytes => self.parse_single_pattern_or_custom(attribute, "file:size"),
            Url => self.parse_url_attribute(attribute),
            UserAgent => self.parse_single_pattern_or_custom(
                attribute,
                "network-traffic:extensions.'http-request-ext'.request_header.'User-Agent'",
            ),
            Vulnerability => self.parse_vulnerability_attribute(attribute),
            X509Fingerprint => self.parse_x509_fingerprint_attribute(attribute)?,
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // indicator wrapper and custom fallback
    // -----------------------------------------------------------------

    pub(crate) fn handle_attribute_indicator(&mut self, attribute: &MispAttribute, pattern: String) {
        let indicator_id = stix_id("indicator", &attribute.uuid);
        let mut node = StixNode::sdo("indicator", &indicator_id);
        node.set("labels", Self::attribute_labels(attribute));
        node.set("kill_chain_phases", Self::killchain(&attribute.category));
        node.set_str("created_by_ref", self.identity_id().to_string());
        node.set_str("pattern", pattern);
        node.set_str("pattern_type", "stix");
        self.indicator_time_fields(
            &mut node,
            attribute.timestamp.as_deref(),
            attribute.first_seen.as_deref(),
            attribute.last_seen.as_deref(),
        );
        if let Some(comment) = &attribute.comment {
            node.set_str("description", comment);
        }
        let timestamp = self.record_timestamp(attribute.timestamp.as_deref());
        let tags = self.handle_attribute_tags_and_galaxies(attribute, &indicator_id, timestamp);
        self.handle_markings(&mut node, &tags);
        self.append_result(node);
        if !attribute.sightings.is_empty() {
            self.handle_sightings(&attribute.sightings, &indicator_id);
        }
    }

    /// Lossless fallback: type, value, category and comment survive as
    /// custom properties on an `x-misp-attribute` node.
    pub(crate) fn parse_custom_attribute(&mut self, attribute: &MispAttribute) {
        let custom_id = stix_id("x-misp-attribute", &attribute.uuid);
        let timestamp = self.record_timestamp(attribute.timestamp.as_deref());
        let mut node = StixNode::sdo("x-misp-attribute", &custom_id);
        node.set_time("created", timestamp);
        node.set_time("modified", timestamp);
        node.set("labels", Self::attribute_labels(attribute));
        node.set_str("created_by_ref", self.identity_id().to_string());
        node.set_str("x_misp_value", &attribute.value);
        node.set_str("x_misp_type", &attribute.attribute_type);
        node.set_str("x_misp_category", &attribute.category);
        if let Some(comment) = &attribute.comment {
            node.set_str("x_misp_comment", comment);
        }
        if let Some(data) = &attribute.data {
            node.set_str("x_misp_data", data);
        }
        let tags = self.handle_attribute_tags_and_galaxies(attribute, &custom_id, timestamp);
        self.handle_markings(&mut node, &tags);
        self.append_result(node);
        if !attribute.sightings.is_empty() {
            self.handle_sightings(&attribute.sightings, &custom_id);
        }
    }

    /// Types whose observation form has no STIX observable: pattern when
    /// detecting, custom passthrough otherwise.
    fn parse_single_pattern_or_custom(&mut self, attribute: &MispAttribute, path: &str) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison(path, &value)]),
            );
        } else {
            self.parse_custom_attribute(attribute);
        }
    }

    // -----------------------------------------------------------------
    // per-type handlers
    // -----------------------------------------------------------------

    fn parse_attachment_attribute(&mut self, attribute: &MispAttribute) {
        let Some(data) = attribute.data.as_deref() else {
            return self.parse_filename_attribute(attribute);
        };
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            let terms = vec![
                pattern::filename_comparison(&value),
                pattern::content_ref_comparison(&pattern::escape_value(data), "payload_bin"),
            ];
            self.handle_attribute_indicator(attribute, pattern::bracketed(&terms));
        } else {
            let payload = self.checked_payload(&attribute.uuid, data);
            let artifact_uuid = derived_uuid(&attribute.uuid, "artifact");
            let mut artifact = sco("artifact", &artifact_uuid);
            artifact.set_str("payload_bin", payload);
            let mut file = sco("file", &attribute.uuid);
            file.set_str("name", &attribute.value);
            file.set_str("content_ref", artifact.id().to_string());
            self.handle_attribute_observable(attribute, vec![file, artifact]);
        }
    }

    fn parse_autonomous_system_attribute(&mut self, attribute: &MispAttribute) -> Result<()> {
        if attribute.to_ids {
            let term = pattern::as_comparison(&pattern::escape_value(&attribute.value))?;
            self.handle_attribute_indicator(attribute, pattern::bracketed(&[term]));
        } else {
            let number = pattern::parse_as_number(&attribute.value)?;
            let mut autonomous_system = sco("autonomous-system", &attribute.uuid);
            autonomous_system.set("number", json!(number));
            self.handle_attribute_observable(attribute, vec![autonomous_system]);
        }
        Ok(())
    }

    fn parse_campaign_name_attribute(&mut self, attribute: &MispAttribute) {
        let campaign_id = stix_id("campaign", &attribute.uuid);
        let timestamp = self.record_timestamp(attribute.timestamp.as_deref());
        let mut node = StixNode::sdo("campaign", &campaign_id);
        node.set_str("name", &attribute.value);
        node.set("labels", Self::attribute_labels(attribute));
        node.set_str("created_by_ref", self.identity_id().to_string());
        node.set_time("created", timestamp);
        node.set_time("modified", timestamp);
        let tags = self.handle_attribute_tags_and_galaxies(attribute, &campaign_id, timestamp);
        self.handle_markings(&mut node, &tags);
        self.append_result(node);
        if !attribute.sightings.is_empty() {
            self.handle_sightings(&attribute.sightings, &campaign_id);
        }
    }

    fn parse_domain_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::domain_comparison(&value)]),
            );
        } else {
            let domain = sco_with_value("domain-name", &attribute.uuid, &attribute.value);
            self.handle_attribute_observable(attribute, vec![domain]);
        }
    }

    fn parse_domain_ip_attribute(&mut self, attribute: &MispAttribute) {
        let Some((domain, address)) = split_composite(&attribute.value) else {
            self.composite_value_warning(attribute);
            return self.parse_custom_attribute(attribute);
        };
        if attribute.to_ids {
            let terms = vec![
                pattern::domain_comparison(&pattern::escape_value(domain)),
                pattern::domain_resolving_comparison(&pattern::escape_value(address)),
            ];
            self.handle_attribute_indicator(attribute, pattern::bracketed(&terms));
        } else {
            let address_node = ip_address_sco(&derived_uuid(&attribute.uuid, "ip"), address);
            let mut domain_node = sco_with_value("domain-name", &attribute.uuid, domain);
            domain_node.set("resolves_to_refs", json!([address_node.id()]));
            self.handle_attribute_observable(attribute, vec![domain_node, address_node]);
        }
    }

    fn parse_email_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison("email-addr:value", &value)]),
            );
        } else {
            let address = sco_with_value("email-addr", &attribute.uuid, &attribute.value);
            self.handle_attribute_observable(attribute, vec![address]);
        }
    }

    fn parse_email_attachment_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison(
                    "email-message:body_multipart[*].body_raw_ref.name",
                    &value,
                )]),
            );
        } else {
            let file_uuid = derived_uuid(&attribute.uuid, "attachment");
            let mut file = sco("file", &file_uuid);
            file.set_str("name", &attribute.value);
            let mut message = sco("email-message", &attribute.uuid);
            message.set("is_multipart", json!(true));
            message.set(
                "body_multipart",
                json!([{
                    "body_raw_ref": file.id(),
                    "content_disposition": format!("attachment; filename='{}'", attribute.value),
                }]),
            );
            self.handle_attribute_observable(attribute, vec![message, file]);
        }
    }

    /// Single-field email message attributes: subject, body, headers.
    fn parse_email_message_attribute(&mut self, kind: AttributeKind, attribute: &MispAttribute) {
        let Some((path, property)) = email_message_feature(kind) else {
            return self.parse_custom_attribute(attribute);
        };
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison(path, &value)]),
            );
        } else {
            let mut message = sco("email-message", &attribute.uuid);
            message.set("is_multipart", json!(false));
            match kind {
                AttributeKind::EmailXMailer | AttributeKind::EmailReplyTo => {
                    message.set(
                        "additional_header_fields",
                        json!({ property: attribute.value }),
                    );
                }
                AttributeKind::EmailHeader => {
                    message.set("received_lines", json!([attribute.value]));
                }
                _ => {
                    message.set_str(property, &attribute.value);
                }
            }
            self.handle_attribute_observable(attribute, vec![message]);
        }
    }

    /// email-src / email-dst: an address hanging off a message reference.
    fn parse_email_reference_attribute(&mut self, attribute: &MispAttribute, feature: &str) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            let path = match feature {
                "from" => "email-message:from_ref.value".to_string(),
                _ => format!("email-message:{feature}_refs[*].value"),
            };
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison(&path, &value)]),
            );
        } else {
            let address = sco_with_value(
                "email-addr",
                &derived_uuid(&attribute.uuid, feature),
                &attribute.value,
            );
            let mut message = sco("email-message", &attribute.uuid);
            message.set("is_multipart", json!(false));
            if feature == "from" {
                message.set_str("from_ref", address.id().to_string());
            } else {
                message.set(&format!("{feature}_refs"), json!([address.id()]));
            }
            self.handle_attribute_observable(attribute, vec![message, address]);
        }
    }

    fn parse_filename_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::filename_comparison(&value)]),
            );
        } else {
            let mut file = sco("file", &attribute.uuid);
            file.set_str("name", &attribute.value);
            self.handle_attribute_observable(attribute, vec![file]);
        }
    }

    fn parse_github_username_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            let terms = vec![
                pattern::comparison("user-account:account_type", "github"),
                pattern::comparison("user-account:account_login", &value),
            ];
            self.handle_attribute_indicator(attribute, pattern::bracketed(&terms));
        } else {
            let mut account = sco("user-account", &attribute.uuid);
            account.set_str("account_login", &attribute.value);
            account.set_str("account_type", "github");
            self.handle_attribute_observable(attribute, vec![account]);
        }
    }

    fn parse_hash_attribute(&mut self, attribute: &MispAttribute) -> Result<()> {
        if attribute.to_ids {
            let term =
                pattern::hash_comparison("file:hashes", &attribute.attribute_type, &attribute.value)?;
            self.handle_attribute_indicator(attribute, pattern::bracketed(&[term]));
        } else {
            let hash_type = pattern::normalize_hash_type(&attribute.attribute_type);
            if !pattern::check_hash_format(&hash_type, &attribute.value) {
                return Err(crate::error::ConversionError::invalid_hash(
                    hash_type,
                    &attribute.value,
                ));
            }
            let mut file = sco("file", &attribute.uuid);
            file.set("hashes", json!({ hash_type: attribute.value }));
            self.handle_attribute_observable(attribute, vec![file]);
        }
        Ok(())
    }

    pub(crate) fn parse_hash_composite_attribute(
        &mut self,
        attribute: &MispAttribute,
        hash_type: Option<&str>,
    ) -> Result<()> {
        let declared = hash_type
            .map(str::to_string)
            .or_else(|| {
                attribute
                    .attribute_type
                    .split_once('|')
                    .map(|(_, hash)| hash.to_string())
            })
            .unwrap_or_else(|| "md5".to_string());
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            match split_composite(&value) {
                Some(_) => {
                    let separator = COMPOSITE_SEPARATORS
                        .iter()
                        .find(|separator| value.contains(*separator))
                        .unwrap_or(&"|");
                    let term = pattern::filename_hash_comparison(&declared, &value, separator)?;
                    self.handle_attribute_indicator(attribute, format!("[{term}]"));
                }
                None => {
                    self.composite_value_warning(attribute);
                    self.handle_attribute_indicator(
                        attribute,
                        pattern::bracketed(&[pattern::filename_comparison(&value)]),
                    );
                }
            }
        } else {
            match split_composite(&attribute.value) {
                Some((filename, hash_value)) => {
                    let normalized = pattern::normalize_hash_type(&declared);
                    if !pattern::check_hash_format(&normalized, hash_value) {
                        return Err(crate::error::ConversionError::invalid_hash(
                            normalized, hash_value,
                        ));
                    }
                    let mut file = sco("file", &attribute.uuid);
                    file.set_str("name", filename);
                    file.set("hashes", json!({ normalized: hash_value }));
                    self.handle_attribute_observable(attribute, vec![file]);
                }
                None => {
                    self.composite_value_warning(attribute);
                    let mut file = sco("file", &attribute.uuid);
                    file.set_str("name", &attribute.value);
                    self.handle_attribute_observable(attribute, vec![file]);
                }
            }
        }
        Ok(())
    }

    fn parse_hostname_port_attribute(&mut self, attribute: &MispAttribute) {
        let Some((hostname, port)) = split_composite(&attribute.value) else {
            self.composite_value_warning(attribute);
            return self.parse_custom_attribute(attribute);
        };
        if attribute.to_ids {
            let terms = vec![
                pattern::domain_comparison(&pattern::escape_value(hostname)),
                pattern::port_comparison(&pattern::escape_value(port), "dst"),
            ];
            self.handle_attribute_indicator(attribute, pattern::bracketed(&terms));
        } else {
            let domain = sco_with_value(
                "domain-name",
                &derived_uuid(&attribute.uuid, "hostname"),
                hostname,
            );
            let mut traffic = sco("network-traffic", &attribute.uuid);
            traffic.set_str("dst_ref", domain.id().to_string());
            if let Ok(port_number) = port.parse::<u64>() {
                traffic.set("dst_port", json!(port_number));
            } else {
                traffic.set_str("dst_port", port);
            }
            traffic.set("protocols", json!(["tcp"]));
            self.handle_attribute_observable(attribute, vec![traffic, domain]);
        }
    }

    fn parse_ip_attribute(&mut self, attribute: &MispAttribute) {
        let ip_kind = attribute
            .attribute_type
            .split('-')
            .nth(1)
            .unwrap_or("dst");
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::ip_comparison(ip_kind, &value)]),
            );
        } else {
            let address = ip_address_sco(&derived_uuid(&attribute.uuid, "ip"), &attribute.value);
            let mut traffic = sco("network-traffic", &attribute.uuid);
            traffic.set_str(&format!("{ip_kind}_ref"), address.id().to_string());
            traffic.set("protocols", json!(["tcp"]));
            self.handle_attribute_observable(attribute, vec![traffic, address]);
        }
    }

    fn parse_ip_port_attribute(&mut self, attribute: &MispAttribute) {
        let Some((address, port)) = split_composite(&attribute.value) else {
            self.composite_value_warning(attribute);
            return self.parse_custom_attribute(attribute);
        };
        let ip_kind = attribute
            .attribute_type
            .split(['-', '|'])
            .nth(1)
            .unwrap_or("dst");
        if attribute.to_ids {
            let terms = vec![
                pattern::ip_comparison(ip_kind, &pattern::escape_value(address)),
                pattern::port_comparison(&pattern::escape_value(port), ip_kind),
            ];
            self.handle_attribute_indicator(attribute, pattern::bracketed(&terms));
        } else {
            let address_node = ip_address_sco(&derived_uuid(&attribute.uuid, "ip"), address);
            let mut traffic = sco("network-traffic", &attribute.uuid);
            traffic.set_str(&format!("{ip_kind}_ref"), address_node.id().to_string());
            if let Ok(port_number) = port.parse::<u64>() {
                traffic.set(&format!("{ip_kind}_port"), json!(port_number));
            } else {
                traffic.set_str(&format!("{ip_kind}_port"), port);
            }
            traffic.set("protocols", json!(["tcp"]));
            self.handle_attribute_observable(attribute, vec![traffic, address_node]);
        }
    }

    fn parse_mac_address_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison("mac-addr:value", &value)]),
            );
        } else {
            let address = sco_with_value("mac-addr", &attribute.uuid, &attribute.value);
            self.handle_attribute_observable(attribute, vec![address]);
        }
    }

    fn parse_malware_sample_attribute(&mut self, attribute: &MispAttribute) -> Result<()> {
        let Some(data) = attribute.data.clone() else {
            return self.parse_hash_composite_attribute(attribute, Some("md5"));
        };
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            let mut terms = vec![pattern::content_ref_comparison(
                &pattern::escape_value(&data),
                "payload_bin",
            )];
            match split_composite(&value) {
                Some(_) => {
                    let separator = COMPOSITE_SEPARATORS
                        .iter()
                        .find(|separator| value.contains(*separator))
                        .unwrap_or(&"|");
                    terms.push(pattern::filename_hash_comparison("md5", &value, separator)?);
                }
                None => self.composite_value_warning(attribute),
            }
            terms.push(pattern::content_ref_comparison("application/zip", "mime_type"));
            terms.push(pattern::content_ref_comparison("infected", "decryption_key"));
            self.handle_attribute_indicator(attribute, pattern::bracketed(&terms));
        } else {
            let payload = self.checked_payload(&attribute.uuid, &data);
            let mut artifact = sco("artifact", &derived_uuid(&attribute.uuid, "artifact"));
            artifact.set_str("payload_bin", payload);
            artifact.set_str("mime_type", "application/zip");
            artifact.set_str("decryption_key", "infected");
            let mut file = sco("file", &attribute.uuid);
            match split_composite(&attribute.value) {
                Some((filename, hash_value)) => {
                    file.set_str("name", filename);
                    if pattern::check_hash_format("MD5", hash_value) {
                        file.set("hashes", json!({"MD5": hash_value}));
                    } else {
                        self.log.warn(format!(
                            "attribute {}: malware-sample hash '{hash_value}' is not a valid MD5",
                            attribute.uuid
                        ));
                        file.set_str("x_misp_hash", hash_value);
                    }
                }
                None => {
                    self.composite_value_warning(attribute);
                    file.set_str("name", &attribute.value);
                }
            }
            file.set_str("content_ref", artifact.id().to_string());
            self.handle_attribute_observable(attribute, vec![file, artifact]);
        }
        Ok(())
    }

    fn parse_mutex_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison("mutex:name", &value)]),
            );
        } else {
            let mut mutex = sco("mutex", &attribute.uuid);
            mutex.set_str("name", &attribute.value);
            self.handle_attribute_observable(attribute, vec![mutex]);
        }
    }

    fn parse_regkey_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::regkey_comparison(&value)]),
            );
        } else {
            let mut registry_key = sco("windows-registry-key", &attribute.uuid);
            registry_key.set_str("key", attribute.value.trim());
            self.handle_attribute_observable(attribute, vec![registry_key]);
        }
    }

    fn parse_regkey_value_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            match split_composite(&value) {
                Some((key, data)) => {
                    let terms = vec![
                        pattern::regkey_comparison(key),
                        pattern::comparison("windows-registry-key:values.data", data.trim()),
                    ];
                    self.handle_attribute_indicator(attribute, pattern::bracketed(&terms));
                }
                None => {
                    self.composite_value_warning(attribute);
                    self.handle_attribute_indicator(
                        attribute,
                        pattern::bracketed(&[pattern::regkey_comparison(&value)]),
                    );
                }
            }
        } else {
            let mut registry_key = sco("windows-registry-key", &attribute.uuid);
            match split_composite(&attribute.value) {
                Some((key, data)) => {
                    registry_key.set_str("key", key.trim());
                    registry_key.set("values", json!([{"data": data.trim()}]));
                }
                None => {
                    self.composite_value_warning(attribute);
                    registry_key.set_str("key", attribute.value.trim());
                }
            }
            self.handle_attribute_observable(attribute, vec![registry_key]);
        }
    }

    fn parse_url_attribute(&mut self, attribute: &MispAttribute) {
        if attribute.to_ids {
            let value = pattern::escape_value(&attribute.value);
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison("url:value", &value)]),
            );
        } else {
            let url = sco_with_value("url", &attribute.uuid, &attribute.value);
            self.handle_attribute_observable(attribute, vec![url]);
        }
    }

    fn parse_vulnerability_attribute(&mut self, attribute: &MispAttribute) {
        let vulnerability_id = stix_id("vulnerability", &attribute.uuid);
        let timestamp = self.record_timestamp(attribute.timestamp.as_deref());
        let mut node = StixNode::sdo("vulnerability", &vulnerability_id);
        node.set_str("name", &attribute.value);
        node.set(
            "external_references",
            json!([{"source_name": "cve", "external_id": attribute.value}]),
        );
        node.set("labels", Self::attribute_labels(attribute));
        node.set_str("created_by_ref", self.identity_id().to_string());
        node.set_time("created", timestamp);
        node.set_time("modified", timestamp);
        let tags = self.handle_attribute_tags_and_galaxies(attribute, &vulnerability_id, timestamp);
        self.handle_markings(&mut node, &tags);
        self.append_result(node);
        if !attribute.sightings.is_empty() {
            self.handle_sightings(&attribute.sightings, &vulnerability_id);
        }
    }

    fn parse_x509_fingerprint_attribute(&mut self, attribute: &MispAttribute) -> Result<()> {
        let hash_type = attribute
            .attribute_type
            .rsplit('-')
            .next()
            .unwrap_or("md5")
            .to_uppercase();
        let value: String = attribute
            .value
            .chars()
            .filter(|character| character.is_ascii_alphanumeric())
            .collect();
        if !pattern::check_hash_format(&hash_type, &value) {
            return Err(crate::error::ConversionError::invalid_hash(hash_type, value));
        }
        if attribute.to_ids {
            self.handle_attribute_indicator(
                attribute,
                pattern::bracketed(&[pattern::comparison(
                    &format!("x509-certificate:hashes.{hash_type}"),
                    &value,
                )]),
            );
        } else {
            let mut certificate = sco("x509-certificate", &attribute.uuid);
            certificate.set("hashes", json!({ hash_type: value }));
            self.handle_attribute_observable(attribute, vec![certificate]);
        }
        Ok(())
    }

    pub(crate) fn composite_value_warning(&mut self, attribute: &MispAttribute) {
        self.log.warn(format!(
            "The {} value '{}' contains none of the composite separators",
            attribute.attribute_type, attribute.value
        ));
    }
}
