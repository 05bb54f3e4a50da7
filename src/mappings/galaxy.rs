//! Galaxy type registry, meta-field dictionaries and relationship verbs.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Target concept a galaxy cluster converts into. Types absent from the
/// registry fall back to the custom-galaxy handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalaxyKind {
    AttackPattern,
    CourseOfAction,
    IntrusionSet,
    Malware,
    Sector,
    ThreatActor,
    Tool,
    Vulnerability,
}

impl GalaxyKind {
    pub fn stix_type(self) -> &'static str {
        match self {
            GalaxyKind::AttackPattern => "attack-pattern",
            GalaxyKind::CourseOfAction => "course-of-action",
            GalaxyKind::IntrusionSet => "intrusion-set",
            GalaxyKind::Malware => "malware",
            GalaxyKind::Sector => "identity",
            GalaxyKind::ThreatActor => "threat-actor",
            GalaxyKind::Tool => "tool",
            GalaxyKind::Vulnerability => "vulnerability",
        }
    }
}

static GALAXY_REGISTRY: Lazy<HashMap<&'static str, GalaxyKind>> = Lazy::new(|| {
    use GalaxyKind::*;
    let mut registry = HashMap::new();
    registry.insert("mitre-attack-pattern", AttackPattern);
    registry.insert("mitre-pre-attack-attack-pattern", AttackPattern);
    registry.insert("mitre-mobile-attack-attack-pattern", AttackPattern);
    registry.insert("mitre-course-of-action", CourseOfAction);
    registry.insert("mitre-mobile-attack-course-of-action", CourseOfAction);
    registry.insert("mitre-intrusion-set", IntrusionSet);
    registry.insert("mitre-pre-attack-intrusion-set", IntrusionSet);
    registry.insert("mitre-malware", Malware);
    registry.insert("mitre-mobile-attack-malware", Malware);
    registry.insert("android", Malware);
    registry.insert("backdoor", Malware);
    registry.insert("banker", Malware);
    registry.insert("botnet", Malware);
    registry.insert("malpedia", Malware);
    registry.insert("ransomware", Malware);
    registry.insert("rat", Malware);
    registry.insert("stealer", Malware);
    registry.insert("sector", Sector);
    registry.insert("mitre-tool", Tool);
    registry.insert("exploit-kit", Tool);
    registry.insert("tds", Tool);
    registry.insert("threat-actor", ThreatActor);
    registry.insert("microsoft-activity-group", ThreatActor);
    registry.insert("branded-vulnerability", Vulnerability);
    registry
});

pub fn galaxy_kind(galaxy_type: &str) -> Option<GalaxyKind> {
    GALAXY_REGISTRY.get(galaxy_type).copied()
}

/// STIX type a cluster would match against in the knowledge-base catalog.
pub fn cluster_stix_type(galaxy_type: &str) -> &'static str {
    galaxy_kind(galaxy_type)
        .map(GalaxyKind::stix_type)
        .unwrap_or("x-misp-galaxy-cluster")
}

/// Inbound direction: STIX domain object type -> MISP galaxy type.
pub const STIX_TYPE_TO_GALAXY: &[(&str, &str)] = &[
    ("attack-pattern", "mitre-attack-pattern"),
    ("campaign", "campaign"),
    ("course-of-action", "mitre-course-of-action"),
    ("intrusion-set", "mitre-intrusion-set"),
    ("malware", "mitre-malware"),
    ("threat-actor", "threat-actor"),
    ("tool", "mitre-tool"),
    ("vulnerability", "branded-vulnerability"),
];

pub fn galaxy_type_for_stix(object_type: &str) -> Option<&'static str> {
    STIX_TYPE_TO_GALAXY
        .iter()
        .find(|(stix, _)| *stix == object_type)
        .map(|(_, galaxy)| *galaxy)
}

/// Meta-field handler selector, per target kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    Aliases,
    KillChain,
    MalwareTypes,
    ThreatActorTypes,
    ToolTypes,
}

pub fn meta_field(kind: GalaxyKind, key: &str) -> Option<MetaField> {
    match (key, kind) {
        ("kill_chain", _) => Some(MetaField::KillChain),
        ("synonyms", _) => Some(MetaField::Aliases),
        ("type", GalaxyKind::Malware) | ("malware_types", GalaxyKind::Malware) => {
            Some(MetaField::MalwareTypes)
        }
        ("cfr-type-of-incident", GalaxyKind::ThreatActor) => Some(MetaField::ThreatActorTypes),
        ("type", GalaxyKind::Tool) | ("tool_types", GalaxyKind::Tool) => Some(MetaField::ToolTypes),
        _ => None,
    }
}

/// Meta keys holding external references rather than plain meta values,
/// with the external-reference feature they populate.
pub fn external_reference_feature(key: &str) -> Option<&'static str> {
    match key {
        "external_id" => Some("external_id"),
        "refs" => Some("url"),
        _ => None,
    }
}

/// Source names recognized when matching catalog external references.
pub const SOURCE_NAMES: &[&str] = &[
    "capec",
    "cve",
    "cwe",
    "mitre-attack",
    "mitre-ics-attack",
    "mitre-mobile-attack",
    "mitre-pre-attack",
    "wasc",
];

const EXTERNAL_ID_SOURCES: &[(&str, &str)] = &[
    ("CAPEC", "capec"),
    ("CVE", "cve"),
    ("CWE", "cwe"),
    ("MOB", "mitre-mobile-attack"),
    ("PRE", "mitre-pre-attack"),
];

/// Source name for an external identifier, inferred from its prefix.
pub fn source_name_for(identifier: &str) -> &'static str {
    for (prefix, source_name) in EXTERNAL_ID_SOURCES {
        if identifier.starts_with(&format!("{prefix}-")) {
            return source_name;
        }
    }
    if identifier.contains('-') {
        return "NIST Mobile Threat Catalogue";
    }
    if identifier.chars().all(|character| character.is_ascii_digit()) {
        return "WASC";
    }
    "mitre-attack"
}

static RELATIONSHIP_VERBS: Lazy<HashMap<(&'static str, &'static str), &'static str>> =
    Lazy::new(|| {
        let mut verbs = HashMap::new();
        verbs.insert(("indicator", "attack-pattern"), "indicates");
        verbs.insert(("indicator", "intrusion-set"), "indicates");
        verbs.insert(("indicator", "malware"), "indicates");
        verbs.insert(("indicator", "threat-actor"), "indicates");
        verbs.insert(("indicator", "tool"), "indicates");
        verbs.insert(("campaign", "intrusion-set"), "attributed-to");
        verbs.insert(("campaign", "threat-actor"), "attributed-to");
        verbs.insert(("campaign", "identity"), "targets");
        verbs.insert(("campaign", "vulnerability"), "targets");
        verbs
    });

/// Relationship verb between an attaching node and a resolved cluster node.
pub fn relationship_verb(source_type: &str, target_type: &str) -> &'static str {
    RELATIONSHIP_VERBS
        .get(&(source_type, target_type))
        .copied()
        .unwrap_or("related-to")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup() {
        assert_eq!(
            galaxy_kind("mitre-attack-pattern"),
            Some(GalaxyKind::AttackPattern)
        );
        assert_eq!(galaxy_kind("ransomware"), Some(GalaxyKind::Malware));
        assert_eq!(galaxy_kind("totally-custom"), None);
        assert_eq!(cluster_stix_type("sector"), "identity");
    }

    #[test]
    fn source_name_inference() {
        assert_eq!(source_name_for("CAPEC-117"), "capec");
        assert_eq!(source_name_for("T1192"), "mitre-attack");
        assert_eq!(source_name_for("13"), "WASC");
        assert_eq!(source_name_for("APP-14"), "NIST Mobile Threat Catalogue");
    }

    #[test]
    fn relationship_verbs() {
        assert_eq!(relationship_verb("indicator", "malware"), "indicates");
        assert_eq!(relationship_verb("campaign", "threat-actor"), "attributed-to");
        assert_eq!(relationship_verb("observed-data", "malware"), "related-to");
    }
}
