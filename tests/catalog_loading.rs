use std::fs;

use misp_stix_bridge::GalaxyCatalog;

const BUNDLE: &str = r#"{
    "type": "bundle",
    "id": "bundle--5e1b51b0-66d4-4c6f-bb62-b7112cf84dd4",
    "objects": [
        {
            "type": "identity",
            "id": "identity--c78cb6e5-0c4b-4611-8297-d1b8b05e60cc",
            "name": "The MITRE Corporation"
        },
        {
            "type": "attack-pattern",
            "id": "attack-pattern--0a3ead4e-6d47-4ccb-854c-a6a4f9d96b22",
            "name": "Spearphishing Attachment",
            "created_by_ref": "identity--c78cb6e5-0c4b-4611-8297-d1b8b05e60cc",
            "external_references": [
                {"source_name": "mitre-attack", "external_id": "T1193"}
            ]
        }
    ]
}"#;

#[test]
fn catalog_loads_bundles_from_directory() {
    let root = tempfile::tempdir().unwrap();
    let collection = root.path().join("enterprise-attack");
    fs::create_dir(&collection).unwrap();
    fs::write(collection.join("attack-pattern.json"), BUNDLE).unwrap();
    fs::write(collection.join("notes.txt"), "not a bundle").unwrap();
    fs::write(collection.join("broken.json"), "{ definitely not json").unwrap();

    let catalog = GalaxyCatalog::from_dir(root.path()).unwrap();
    assert!(catalog.contains("Spearphishing Attachment"));
    assert!(catalog.contains("T1193"));
    assert!(catalog
        .match_by_name("Spearphishing Attachment", "attack-pattern")
        .is_some());
    assert!(catalog
        .identity("identity--c78cb6e5-0c4b-4611-8297-d1b8b05e60cc")
        .is_some());
}
