use serde_json::json;

use misp_stix_bridge::{StixBundle, StixToMisp};

fn bundle_from(objects: serde_json::Value) -> StixBundle {
    StixBundle::from_value(json!({
        "type": "bundle",
        "id": "bundle--314e4210-6fe3-4c5a-bf01-4f84950d210f",
        "objects": objects
    }))
    .unwrap()
}

fn report_node() -> serde_json::Value {
    json!({
        "type": "report",
        "spec_version": "2.1",
        "id": "report--a5b3e1c0-6f3f-4b52-bd1e-5a55e5c4e098",
        "name": "reconstructed event",
        "created": "2020-10-25T16:22:00.000Z",
        "modified": "2020-10-25T16:22:00.000Z",
        "published": "2020-10-25T18:00:00.000Z",
        "created_by_ref": "identity--55f6ea5e-2c60-40e5-964f-47a8950d210f",
        "object_refs": ["observed-data--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10"]
    })
}

fn identity_node() -> serde_json::Value {
    json!({
        "type": "identity",
        "spec_version": "2.1",
        "id": "identity--55f6ea5e-2c60-40e5-964f-47a8950d210f",
        "name": "CIRCL",
        "identity_class": "organization"
    })
}

#[test]
fn event_metadata_assembles_from_report() {
    let bundle = bundle_from(json!([
        identity_node(),
        report_node(),
        {
            "type": "observed-data",
            "spec_version": "2.1",
            "id": "observed-data--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10",
            "object_refs": ["url--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f"]
        },
        {
            "type": "url",
            "id": "url--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "value": "https://circl.lu/team"
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    assert_eq!(event.uuid, "a5b3e1c0-6f3f-4b52-bd1e-5a55e5c4e098");
    assert_eq!(event.info.as_deref(), Some("reconstructed event"));
    assert!(event.published);
    assert_eq!(event.orgc.as_ref().unwrap().name, "CIRCL");
    assert_eq!(event.attributes.len(), 1);
    assert_eq!(event.attributes[0].attribute_type, "url");
    assert_eq!(event.attributes[0].value, "https://circl.lu/team");
    assert_eq!(event.attributes[0].uuid, "91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f");
}

#[test]
fn shared_file_observable_materializes_once() {
    let bundle = bundle_from(json!([
        {
            "type": "process",
            "id": "process--5e1b51b0-66d4-4c6f-bb62-b7112cf84dd4",
            "pid": 2510,
            "image_ref": "file--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f"
        },
        {
            "type": "file",
            "id": "file--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "name": "dropper.exe",
            "hashes": {"MD5": "b2a5abfeef9e36964281a31e17b57c97"}
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    let files: Vec<_> = event
        .objects
        .iter()
        .filter(|object| object.name == "file")
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].uuid, "91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f");

    let process = event
        .objects
        .iter()
        .find(|object| object.name == "process")
        .unwrap();
    let executes = process
        .references
        .iter()
        .find(|reference| reference.relationship_type == "executes")
        .unwrap();
    assert_eq!(executes.referenced_uuid, files[0].uuid);
}

#[test]
fn domain_with_resolution_promotes_to_domain_ip_object() {
    let bundle = bundle_from(json!([
        {
            "type": "domain-name",
            "id": "domain-name--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "value": "circl.lu",
            "resolves_to_refs": ["ipv4-addr--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10"]
        },
        {
            "type": "ipv4-addr",
            "id": "ipv4-addr--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10",
            "value": "149.13.33.14"
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    let domain_ip = event
        .objects
        .iter()
        .find(|object| object.name == "domain-ip")
        .unwrap();
    let domain = domain_ip
        .attributes
        .iter()
        .find(|attribute| attribute.object_relation.as_deref() == Some("domain"))
        .unwrap();
    assert_eq!(domain.value, "circl.lu");
    let address = domain_ip
        .attributes
        .iter()
        .find(|attribute| attribute.object_relation.as_deref() == Some("ip"))
        .unwrap();
    assert_eq!(address.value, "149.13.33.14");
    // The address observable folded into the object: no standalone attribute.
    assert!(event.attributes.is_empty());
}

#[test]
fn bare_domain_demotes_to_attribute() {
    let bundle = bundle_from(json!([
        {
            "type": "domain-name",
            "id": "domain-name--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "value": "circl.lu"
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    assert!(event.objects.is_empty());
    assert_eq!(event.attributes.len(), 1);
    assert_eq!(event.attributes[0].attribute_type, "domain");
    assert_eq!(event.attributes[0].value, "circl.lu");
}

#[test]
fn directory_demotes_into_requesting_file() {
    let bundle = bundle_from(json!([
        {
            "type": "file",
            "id": "file--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "name": "dropper.exe",
            "parent_directory_ref": "directory--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10"
        },
        {
            "type": "directory",
            "id": "directory--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10",
            "path": "C:\\Windows\\Temp"
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    assert_eq!(event.objects.len(), 1);
    let file = &event.objects[0];
    assert!(file
        .attributes
        .iter()
        .any(|attribute| attribute.object_relation.as_deref() == Some("path")
            && attribute.value == "C:\\Windows\\Temp"));
}

#[test]
fn directory_with_extra_properties_promotes_to_object() {
    let bundle = bundle_from(json!([
        {
            "type": "directory",
            "id": "directory--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10",
            "path": "C:\\Windows\\Temp",
            "ctime": "2020-10-25T16:22:00Z"
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    let directory = event
        .objects
        .iter()
        .find(|object| object.name == "directory")
        .unwrap();
    assert_eq!(directory.uuid, "44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10");
    assert!(directory.attributes.len() >= 2);
}

#[test]
fn autonomous_system_promotes_when_addresses_belong_to_it() {
    let bundle = bundle_from(json!([
        {
            "type": "autonomous-system",
            "id": "autonomous-system--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "number": 174
        },
        {
            "type": "ipv4-addr",
            "id": "ipv4-addr--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10",
            "value": "149.13.33.0",
            "belongs_to_refs": ["autonomous-system--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f"]
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    let asn = event
        .objects
        .iter()
        .find(|object| object.name == "asn")
        .unwrap();
    assert!(asn
        .attributes
        .iter()
        .any(|attribute| attribute.object_relation.as_deref() == Some("asn")
            && attribute.value == "AS174"));
    assert!(asn
        .attributes
        .iter()
        .any(|attribute| attribute.object_relation.as_deref() == Some("subnet-announced")
            && attribute.value == "149.13.33.0"));
    // The member address is consumed by the object.
    assert!(event.attributes.is_empty());
}

#[test]
fn lone_autonomous_system_demotes_to_attribute() {
    let bundle = bundle_from(json!([
        {
            "type": "autonomous-system",
            "id": "autonomous-system--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "number": 174
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    assert!(event.objects.is_empty());
    assert_eq!(event.attributes.len(), 1);
    assert_eq!(event.attributes[0].attribute_type, "AS");
    assert_eq!(event.attributes[0].value, "AS174");
}

#[test]
fn registry_key_values_fan_out_into_sub_objects() {
    let bundle = bundle_from(json!([
        {
            "type": "windows-registry-key",
            "id": "windows-registry-key--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "key": "HKLM\\Software\\Run",
            "values": [
                {"name": "persist", "data": "C:\\evil.exe", "data_type": "REG_SZ"},
                {"name": "backup", "data": "C:\\evil2.exe", "data_type": "REG_SZ"}
            ]
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    let registry_key = event
        .objects
        .iter()
        .find(|object| object.name == "registry-key")
        .unwrap();
    let value_objects: Vec<_> = event
        .objects
        .iter()
        .filter(|object| object.name == "registry-key-value")
        .collect();
    assert_eq!(value_objects.len(), 2);
    let contains: Vec<_> = registry_key
        .references
        .iter()
        .filter(|reference| reference.relationship_type == "contains")
        .collect();
    assert_eq!(contains.len(), 2);
}

#[test]
fn custom_nodes_rebuild_original_misp_content() {
    let bundle = bundle_from(json!([
        {
            "type": "x-misp-attribute",
            "spec_version": "2.1",
            "id": "x-misp-attribute--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "labels": ["misp:type=\"favorite-color\"", "misp:to_ids=\"true\""],
            "x_misp_type": "favorite-color",
            "x_misp_value": "ochre",
            "x_misp_category": "Other"
        },
        {
            "type": "x-misp-object",
            "spec_version": "2.1",
            "id": "x-misp-object--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10",
            "x_misp_name": "employee-badge",
            "x_misp_meta_category": "misc",
            "x_misp_attributes": [
                {"type": "text", "object_relation": "badge-id", "value": "B-1337"}
            ]
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    let attribute = event
        .attributes
        .iter()
        .find(|attribute| attribute.attribute_type == "favorite-color")
        .unwrap();
    assert_eq!(attribute.value, "ochre");
    assert!(attribute.to_ids);

    let badge = event
        .objects
        .iter()
        .find(|object| object.name == "employee-badge")
        .unwrap();
    assert_eq!(badge.attributes[0].object_relation.as_deref(), Some("badge-id"));
    assert_eq!(badge.attributes[0].value, "B-1337");
}

#[test]
fn galaxy_sdo_attaches_as_cluster() {
    let bundle = bundle_from(json!([
        {
            "type": "malware",
            "spec_version": "2.1",
            "id": "malware--b8eb28e4-48a4-40ba-8aef-a1e45ec000ec",
            "name": "BISCUIT",
            "is_family": true,
            "aliases": ["BISCUIT"],
            "external_references": [
                {"source_name": "mitre-attack", "external_id": "S0017"}
            ]
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    assert_eq!(event.galaxies.len(), 1);
    let galaxy = &event.galaxies[0];
    assert_eq!(galaxy.galaxy_type, "mitre-malware");
    assert_eq!(galaxy.clusters.len(), 1);
    let cluster = &galaxy.clusters[0];
    assert_eq!(cluster.value, "BISCUIT");
    assert_eq!(cluster.uuid, "b8eb28e4-48a4-40ba-8aef-a1e45ec000ec");
    let meta = cluster.meta.as_ref().unwrap();
    assert_eq!(meta["synonyms"][0], "BISCUIT");
    assert_eq!(meta["external_id"][0], "S0017");
}

#[test]
fn tlp_marking_becomes_event_tag() {
    let bundle = bundle_from(json!([
        {
            "type": "marking-definition",
            "spec_version": "2.1",
            "id": "marking-definition--613f2e26-407d-48c7-9eca-b8e91df99dc9",
            "definition_type": "tlp",
            "definition": {"tlp": "green"}
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    assert!(event.tags.iter().any(|tag| tag.name == "tlp:green"));
}

#[test]
fn revisiting_from_another_event_rematerializes() {
    let objects = json!([
        {
            "type": "file",
            "id": "file--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "name": "dropper.exe"
        }
    ]);
    let mut converter = StixToMisp::new();
    let first = converter.parse_bundle(&bundle_from(objects.clone())).unwrap();
    let second = converter.parse_bundle(&bundle_from(objects)).unwrap();

    // One materialization per event, each carrying the observable's UUID.
    assert_eq!(first.objects.len(), 1);
    assert_eq!(second.objects.len(), 1);
    assert_eq!(first.objects[0].uuid, second.objects[0].uuid);
    assert_ne!(first.uuid, second.uuid);
}

#[test]
fn network_traffic_socket_extension_maps_to_socket_object() {
    let bundle = bundle_from(json!([
        {
            "type": "network-traffic",
            "id": "network-traffic--91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f",
            "src_ref": "ipv4-addr--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10",
            "dst_port": 443,
            "protocols": ["ip", "tcp"],
            "extensions": {"socket-ext": {"address_family": "AF_INET", "is_listening": true}}
        },
        {
            "type": "ipv4-addr",
            "id": "ipv4-addr--44d5bb0e-1a3d-4c4a-92b4-4b54ae4c1e10",
            "value": "198.51.100.3"
        }
    ]));

    let mut converter = StixToMisp::new();
    let event = converter.parse_bundle(&bundle).unwrap();

    let socket = event
        .objects
        .iter()
        .find(|object| object.name == "network-socket")
        .unwrap();
    assert!(socket
        .attributes
        .iter()
        .any(|attribute| attribute.object_relation.as_deref() == Some("address-family")
            && attribute.value == "AF_INET"));
    assert!(socket
        .attributes
        .iter()
        .any(|attribute| attribute.object_relation.as_deref() == Some("ip-src")
            && attribute.value == "198.51.100.3"));
    assert!(socket
        .attributes
        .iter()
        .any(|attribute| attribute.object_relation.as_deref() == Some("layer4-protocol")
            && attribute.value == "TCP"));
}
