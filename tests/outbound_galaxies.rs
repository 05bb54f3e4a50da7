use serde_json::json;

use misp_stix_bridge::misp::{MispGalaxy, MispGalaxyCluster};
use misp_stix_bridge::{GalaxyCatalog, MispAttribute, MispEvent, MispToStix, StixNode};

fn malware_galaxy(cluster_uuid: &str) -> MispGalaxy {
    MispGalaxy {
        name: "Malware".into(),
        galaxy_type: "mitre-malware".into(),
        description: "Malware galaxy".into(),
        clusters: vec![MispGalaxyCluster {
            uuid: cluster_uuid.into(),
            value: "BISCUIT".into(),
            cluster_type: "mitre-malware".into(),
            description: Some("BISCUIT is a backdoor".into()),
            tag_name: Some("misp-galaxy:mitre-malware=\"BISCUIT\"".into()),
            timestamp: None,
            meta: Some(
                json!({"synonyms": ["BISCUIT"], "external_id": "S0017"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        }],
    }
}

fn event_with_attribute_galaxy(galaxy: MispGalaxy) -> (MispEvent, String) {
    let mut attribute = MispAttribute::new("domain", "circl.lu");
    attribute.to_ids = true;
    attribute.galaxies.push(galaxy);
    let attribute_uuid = attribute.uuid.clone();
    let mut event = MispEvent::new();
    event.info = Some("galaxy test".into());
    event.timestamp = Some("1603642920".into());
    event.attributes = vec![attribute];
    (event, attribute_uuid)
}

fn find_type<'a>(objects: &'a [StixNode], object_type: &str) -> Vec<&'a StixNode> {
    objects
        .iter()
        .filter(|node| node.object_type() == object_type)
        .collect()
}

#[test]
fn attribute_galaxy_synthesizes_malware_with_relationship() {
    let (event, _) = event_with_attribute_galaxy(malware_galaxy(
        "b8eb28e4-48a4-40ba-8aef-a1e45ec000ec",
    ));

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let malware = find_type(&objects, "malware");
    assert_eq!(malware.len(), 1);
    assert_eq!(malware[0].get_str("name"), Some("BISCUIT"));
    assert_eq!(malware[0].get("is_family"), Some(&json!(true)));
    assert_eq!(malware[0].get("aliases"), Some(&json!(["BISCUIT"])));
    let references = malware[0].get_array("external_references").unwrap();
    assert_eq!(references[0]["external_id"], "S0017");

    let relationships = find_type(&objects, "relationship");
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].get_str("relationship_type"), Some("indicates"));
    assert_eq!(relationships[0].get_str("target_ref"), Some(malware[0].id()));
}

#[test]
fn shared_cluster_is_memoized_across_attributes() {
    let cluster_uuid = "b8eb28e4-48a4-40ba-8aef-a1e45ec000ec";
    let mut first = MispAttribute::new("domain", "circl.lu");
    first.to_ids = true;
    first.galaxies.push(malware_galaxy(cluster_uuid));
    let mut second = MispAttribute::new("url", "https://circl.lu");
    second.to_ids = true;
    second.galaxies.push(malware_galaxy(cluster_uuid));

    let mut event = MispEvent::new();
    event.timestamp = Some("1603642920".into());
    event.attributes = vec![first, second];

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    assert_eq!(find_type(&objects, "malware").len(), 1);
    // Both attaching indicators still get their own relationship edge.
    assert_eq!(find_type(&objects, "relationship").len(), 2);
    assert_eq!(
        converter.unique_ids().get(cluster_uuid).unwrap(),
        &format!("malware--{cluster_uuid}")
    );
}

#[test]
fn event_galaxy_joins_object_refs_without_relationship() {
    let mut event = MispEvent::new();
    event.info = Some("event galaxy".into());
    event.timestamp = Some("1603642920".into());
    event.galaxies = vec![malware_galaxy("b8eb28e4-48a4-40ba-8aef-a1e45ec000ec")];

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let refs = converter.object_refs().to_vec();
    let objects = converter.fetch_objects();

    assert_eq!(find_type(&objects, "malware").len(), 1);
    assert!(find_type(&objects, "relationship").is_empty());
    assert!(refs
        .iter()
        .any(|object_ref| object_ref.starts_with("malware--")));
}

#[test]
fn unknown_galaxy_type_degrades_to_custom_cluster() {
    let galaxy = MispGalaxy {
        name: "Constellations".into(),
        galaxy_type: "constellation".into(),
        description: "not a threat concept".into(),
        clusters: vec![MispGalaxyCluster {
            uuid: "3f1b5bd2-c3ab-4b7c-a47d-7a9d36cbcdf4".into(),
            value: "Orion".into(),
            cluster_type: "constellation".into(),
            description: Some("stars".into()),
            tag_name: None,
            timestamp: None,
            meta: None,
        }],
    };
    let (event, _) = event_with_attribute_galaxy(galaxy);

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let customs = find_type(&objects, "x-misp-galaxy-cluster");
    assert_eq!(customs.len(), 1);
    assert_eq!(customs[0].get_str("x_misp_value"), Some("Orion"));
    assert_eq!(
        customs[0].get_str("x_misp_description"),
        Some("not a threat concept | stars")
    );
    assert!(!converter.warnings().is_empty());
}

fn catalog_with_biscuit() -> GalaxyCatalog {
    let mut catalog = GalaxyCatalog::new();
    catalog.index_bundle(&json!({
        "type": "bundle",
        "id": "bundle--5e1b51b0-66d4-4c6f-bb62-b7112cf84dd4",
        "objects": [
            {
                "type": "identity",
                "id": "identity--c78cb6e5-0c4b-4611-8297-d1b8b05e60cc",
                "name": "The MITRE Corporation",
                "identity_class": "organization"
            },
            {
                "type": "malware",
                "id": "malware--b8eb28e4-48a4-40ba-8aef-a1e45ec000ec",
                "name": "BISCUIT",
                "is_family": true,
                "created_by_ref": "identity--c78cb6e5-0c4b-4611-8297-d1b8b05e60cc",
                "external_references": [
                    {"source_name": "mitre-attack", "external_id": "S0017"}
                ]
            }
        ]
    }));
    catalog
}

#[test]
fn interoperability_mode_reuses_canonical_node() {
    let (event, _) = event_with_attribute_galaxy(malware_galaxy(
        "9b9a95e4-1930-43ca-9dbc-61ab44910b0e",
    ));

    let mut converter = MispToStix::new(true).with_catalog(catalog_with_biscuit());
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let malware = find_type(&objects, "malware");
    assert_eq!(malware.len(), 1);
    // The canonical identifier wins over a synthesized one.
    assert_eq!(
        malware[0].id(),
        "malware--b8eb28e4-48a4-40ba-8aef-a1e45ec000ec"
    );
    // The catalog identity rides along, deduplicated through the run.
    assert!(find_type(&objects, "identity")
        .iter()
        .any(|identity| identity.get_str("name") == Some("The MITRE Corporation")));
    assert_eq!(
        converter
            .unique_ids()
            .get("9b9a95e4-1930-43ca-9dbc-61ab44910b0e")
            .unwrap(),
        "malware--b8eb28e4-48a4-40ba-8aef-a1e45ec000ec"
    );
}

#[test]
fn ambiguous_catalog_match_falls_back_to_synthesis() {
    let mut catalog = catalog_with_biscuit();
    // A second BISCUIT malware of the same type makes the name ambiguous,
    // and neither carries the cluster's external id.
    catalog.index_bundle(&json!({
        "type": "bundle",
        "id": "bundle--0d8c8c2c-3b55-4e7d-94b3-fe5e41bcb2a5",
        "objects": [
            {
                "type": "malware",
                "id": "malware--4e9a864c-7a05-4d4e-b0b6-4c82b7a3c8e1",
                "name": "BISCUIT",
                "is_family": true
            }
        ]
    }));
    let cluster_uuid = "9b9a95e4-1930-43ca-9dbc-61ab44910b0e";
    let mut galaxy = malware_galaxy(cluster_uuid);
    galaxy.clusters[0].meta = None;
    let (event, _) = event_with_attribute_galaxy(galaxy);

    let mut converter = MispToStix::new(true).with_catalog(catalog);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let malware = find_type(&objects, "malware");
    assert_eq!(malware.len(), 1);
    assert_eq!(malware[0].id(), format!("malware--{cluster_uuid}"));
}

#[test]
fn attack_pattern_cluster_name_strips_technique_id() {
    let galaxy = MispGalaxy {
        name: "Attack Pattern".into(),
        galaxy_type: "mitre-attack-pattern".into(),
        description: "ATT&CK techniques".into(),
        clusters: vec![MispGalaxyCluster {
            uuid: "dcaa092b-7de9-4a21-977f-7fcb77e89c48".into(),
            value: "Access Token Manipulation - T1134".into(),
            cluster_type: "mitre-attack-pattern".into(),
            description: None,
            tag_name: None,
            timestamp: None,
            meta: Some(
                json!({"kill_chain": ["mitre-attack:defense-evasion"]})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        }],
    };
    let (event, _) = event_with_attribute_galaxy(galaxy);

    let mut converter = MispToStix::new(false);
    converter.parse_event(&event).unwrap();
    let objects = converter.fetch_objects();

    let patterns = find_type(&objects, "attack-pattern");
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].get_str("name"), Some("Access Token Manipulation"));
    let phases = patterns[0].get_array("kill_chain_phases").unwrap();
    assert_eq!(phases[0]["kill_chain_name"], "mitre-attack");
    assert_eq!(phases[0]["phase_name"], "defense-evasion");
}
