use misp_stix_bridge::misp::{MispOrganisation, MispSighting, MispTag};
use misp_stix_bridge::{MispAttribute, MispEvent, MispToStix, StixNode};

fn event_with_attributes(attributes: Vec<MispAttribute>) -> MispEvent {
    let mut event = MispEvent::new();
    event.info = Some("conversion test event".into());
    event.timestamp = Some("1603642920".into());
    event.orgc = Some(MispOrganisation {
        uuid: "55f6ea5e-2c60-40e5-964f-47a8950d210f".into(),
        name: "CIRCL".into(),
    });
    event.attributes = attributes;
    event
}

fn find_type<'a>(objects: &'a [StixNode], object_type: &str) -> Vec<&'a StixNode> {
    objects
        .iter()
        .filter(|node| node.object_type() == object_type)
        .collect()
}

#[test]
fn domain_ip_attribute_builds_conjunctive_pattern() {
    let mut attribute = MispAttribute::new("domain|ip", "circl.lu|149.13.33.14");
    attribute.category = "Network activity".into();
    attribute.to_ids = true;

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    let indicators = find_type(&objects, "indicator");
    assert_eq!(indicators.len(), 1);
    assert_eq!(
        indicators[0].get_str("pattern").unwrap(),
        "[domain-name:value = 'circl.lu' AND domain-name:resolves_to_refs[*].value = '149.13.33.14']"
    );
    assert_eq!(indicators[0].get_str("pattern_type"), Some("stix"));
}

#[test]
fn domain_ip_attribute_without_separator_degrades_to_custom() {
    let mut attribute = MispAttribute::new("domain|ip", "no separator in here");
    attribute.to_ids = true;

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    assert!(find_type(&objects, "indicator").is_empty());
    assert_eq!(find_type(&objects, "x-misp-attribute").len(), 1);
    assert!(converter
        .warnings()
        .iter()
        .any(|warning| warning.contains("composite separator")));
}

#[test]
fn domain_ip_observable_carries_resolution_edge() {
    let attribute = MispAttribute::new("domain|ip", "circl.lu|149.13.33.14");

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    let observed = find_type(&objects, "observed-data");
    assert_eq!(observed.len(), 1);
    let domains = find_type(&objects, "domain-name");
    assert_eq!(domains.len(), 1);
    assert_eq!(domains[0].get_str("value"), Some("circl.lu"));
    let addresses = find_type(&objects, "ipv4-addr");
    assert_eq!(addresses.len(), 1);
    assert_eq!(addresses[0].get_str("value"), Some("149.13.33.14"));
    assert_eq!(
        domains[0].ref_values("resolves_to_refs"),
        vec![addresses[0].id()]
    );
    assert!(observed[0]
        .ref_values("object_refs")
        .contains(&domains[0].id()));
}

#[test]
fn organizational_identity_is_deduplicated_across_events() {
    let mut converter = MispToStix::new(false);
    let first = event_with_attributes(vec![MispAttribute::new("domain", "circl.lu")]);
    let second = event_with_attributes(vec![MispAttribute::new("url", "https://circl.lu")]);
    converter.parse_event(&first).unwrap();
    converter.parse_event(&second).unwrap();
    let objects = converter.fetch_objects();

    let identities = find_type(&objects, "identity");
    assert_eq!(identities.len(), 1);
    let identity_id = identities[0].id();
    for observed in find_type(&objects, "observed-data") {
        assert_eq!(observed.get_str("created_by_ref"), Some(identity_id));
    }
}

#[test]
fn unmapped_attribute_type_is_preserved_verbatim() {
    let mut attribute = MispAttribute::new("favorite-color", "ochre");
    attribute.category = "Other".into();
    attribute.comment = Some("definitely not a STIX concept".into());

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    let customs = find_type(&objects, "x-misp-attribute");
    assert_eq!(customs.len(), 1);
    assert_eq!(customs[0].get_str("x_misp_type"), Some("favorite-color"));
    assert_eq!(customs[0].get_str("x_misp_value"), Some("ochre"));
    assert_eq!(customs[0].get_str("x_misp_category"), Some("Other"));
    assert!(converter
        .warnings()
        .iter()
        .any(|warning| warning.contains("favorite-color")));
}

#[test]
fn invalid_hash_value_falls_back_with_warning() {
    let mut attribute = MispAttribute::new("sha256", "0123456789");
    attribute.to_ids = true;
    let attribute_uuid = attribute.uuid.clone();

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    assert!(find_type(&objects, "indicator").is_empty());
    assert_eq!(find_type(&objects, "x-misp-attribute").len(), 1);
    assert!(converter
        .warnings()
        .iter()
        .any(|warning| warning.contains(&attribute_uuid)));
    assert!(converter.errors().is_empty());
}

#[test]
fn valid_hash_attribute_builds_pattern() {
    let mut attribute = MispAttribute::new(
        "sha256",
        "2c8f4e9c8c0c3a06e2b37ddc1c0a2f8f59d0d59f6aaa2ccca858b1c9293e2f2d",
    );
    attribute.to_ids = true;

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    let indicators = find_type(&objects, "indicator");
    assert_eq!(indicators.len(), 1);
    assert!(indicators[0]
        .get_str("pattern")
        .unwrap()
        .starts_with("[file:hashes.SHA256 = '2c8f4e9c"));
}

#[test]
fn filename_hash_composite_without_separator_keeps_filename_pattern() {
    let mut attribute = MispAttribute::new("filename|md5", "plain-filename.exe");
    attribute.to_ids = true;

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    let indicators = find_type(&objects, "indicator");
    assert_eq!(indicators.len(), 1);
    assert_eq!(
        indicators[0].get_str("pattern").unwrap(),
        "[file:name = 'plain-filename.exe']"
    );
    assert!(!converter.warnings().is_empty());
}

#[test]
fn tlp_tag_becomes_cached_marking_definition() {
    let mut first = MispAttribute::new("domain", "circl.lu");
    first.to_ids = true;
    first.tags.push(MispTag::new("tlp:green"));
    first.tags.push(MispTag::new("osint:source-type=\"blog-post\""));
    let mut second = MispAttribute::new("url", "https://circl.lu");
    second.to_ids = true;
    second.tags.push(MispTag::new("tlp:green"));

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![first, second]))
        .unwrap();
    let objects = converter.fetch_objects();

    let markings = find_type(&objects, "marking-definition");
    assert_eq!(markings.len(), 1);
    let marking_id = markings[0].id();
    let indicators = find_type(&objects, "indicator");
    assert_eq!(indicators.len(), 2);
    for indicator in &indicators {
        assert!(indicator
            .ref_values("object_marking_refs")
            .contains(&marking_id));
    }
    // The non-TLP tag stays a label.
    assert!(indicators.iter().any(|indicator| indicator
        .ref_values("labels")
        .contains(&"osint:source-type=\"blog-post\"")));
}

#[test]
fn event_level_tlp_tag_is_flushed_with_the_grouping() {
    let mut event = event_with_attributes(vec![MispAttribute::new("domain", "circl.lu")]);
    event.tags.push(MispTag::new("tlp:amber"));

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let markings = find_type(&objects, "marking-definition");
    assert_eq!(markings.len(), 1);
    let groupings = find_type(&objects, "grouping");
    assert!(groupings[0]
        .ref_values("object_marking_refs")
        .contains(&markings[0].id()));
}

#[test]
fn sighting_produces_node_with_deduplicated_identity() {
    let mut attribute = MispAttribute::new("domain", "circl.lu");
    attribute.to_ids = true;
    attribute.sightings.push(MispSighting {
        uuid: "7b7dd7d0-5b64-4d54-9e1f-3b2c6e4a3c4e".into(),
        sighting_type: Some("0".into()),
        date_sighting: Some("1603642920".into()),
        source: Some("honeypot".into()),
        organisation: Some(MispOrganisation {
            uuid: "55f6ea5e-2c60-40e5-964f-47a8950d210f".into(),
            name: "CIRCL".into(),
        }),
    });

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    let sightings = find_type(&objects, "sighting");
    assert_eq!(sightings.len(), 1);
    assert!(sightings[0]
        .get_str("sighting_of_ref")
        .unwrap()
        .starts_with("indicator--"));
    // The sighting organisation matches the event Orgc: one identity total.
    assert_eq!(find_type(&objects, "identity").len(), 1);
}

#[test]
fn published_event_wraps_into_report() {
    let mut event = event_with_attributes(vec![MispAttribute::new("domain", "circl.lu")]);
    event.published = true;
    event.publish_timestamp = Some("1603650000".into());

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let reports = find_type(&objects, "report");
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].ref_values("object_refs").is_empty());
    assert!(find_type(&objects, "grouping").is_empty());
}

#[test]
fn unpublished_event_wraps_into_grouping() {
    let event = event_with_attributes(vec![MispAttribute::new("domain", "circl.lu")]);

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let groupings = find_type(&objects, "grouping");
    assert_eq!(groupings.len(), 1);
    assert_eq!(groupings[0].get_str("context"), Some("suspicious-activity"));
    assert!(find_type(&objects, "report").is_empty());
}

#[test]
fn missing_orgc_synthesizes_default_identity() {
    let mut event = event_with_attributes(vec![MispAttribute::new("domain", "circl.lu")]);
    event.orgc = None;

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let identities = find_type(&objects, "identity");
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].get_str("name"), Some("MISP"));
    assert!(!converter.warnings().is_empty());
}

#[test]
fn attribute_collection_mode_skips_report_refs() {
    let mut attribute = MispAttribute::new("ip-dst", "198.51.100.3");
    attribute.to_ids = true;

    let mut converter = MispToStix::new(false);
    converter.parse_attributes(&[attribute]).unwrap();
    let objects = converter.fetch_objects();

    assert!(objects.iter().any(|node| node.object_type() == "indicator"));
    assert!(converter.object_refs().is_empty());
}

#[test]
fn ip_port_attribute_pattern_has_typed_reference() {
    let mut attribute = MispAttribute::new("ip-dst|port", "198.51.100.3|8443");
    attribute.to_ids = true;

    let mut converter = MispToStix::new(false);
    converter
        .parse_event(&event_with_attributes(vec![attribute]))
        .unwrap();
    let objects = converter.fetch_objects();

    let indicators = find_type(&objects, "indicator");
    assert_eq!(
        indicators[0].get_str("pattern").unwrap(),
        "[network-traffic:dst_ref.type = 'ipv4-addr' AND network-traffic:dst_ref.value = '198.51.100.3' AND network-traffic:dst_port = '8443']"
    );
}
