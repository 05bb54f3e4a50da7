//! Galaxy cluster reconstruction from galaxy-like STIX domain objects.

use serde_json::{Map, Value};

use crate::mappings::galaxy::galaxy_type_for_stix;
use crate::misp::{MispGalaxy, MispGalaxyCluster};
use crate::stix::StixNode;

use super::{epoch_string, parse_stix_datetime, sanitize_ref_uuid, StixToMisp};

pub(crate) fn is_galaxy_type(object_type: &str) -> bool {
    object_type == "x-misp-galaxy-cluster" || galaxy_type_for_stix(object_type).is_some()
}

impl StixToMisp {
    /// Groups converted clusters into one galaxy per galaxy type and
    /// attaches them to the event.
    pub(crate) fn build_galaxies(&mut self, nodes: &[StixNode]) {
        let mut galaxies: Vec<MispGalaxy> = Vec::new();
        for node in nodes {
            let converted = match node.object_type() {
                "x-misp-galaxy-cluster" => Self::cluster_from_custom(node),
                _ => Self::cluster_from_sdo(node),
            };
            let Some((galaxy_type, galaxy_name, cluster)) = converted else {
                self.log.warn(format!(
                    "unable to rebuild a galaxy cluster from {}",
                    node.id()
                ));
                continue;
            };
            match galaxies
                .iter_mut()
                .find(|galaxy| galaxy.galaxy_type == galaxy_type)
            {
                Some(galaxy) => galaxy.clusters.push(cluster),
                None => galaxies.push(MispGalaxy {
                    name: galaxy_name,
                    galaxy_type,
                    description: String::new(),
                    clusters: vec![cluster],
                }),
            }
        }
        self.scope().event.galaxies.extend(galaxies);
    }

    fn cluster_from_sdo(node: &StixNode) -> Option<(String, String, MispGalaxyCluster)> {
        let galaxy_type = galaxy_type_for_stix(node.object_type())?.to_string();
        let value = node.get_str("name")?.to_string();
        let (uuid, _) = sanitize_ref_uuid(node.id());
        let mut meta = Map::new();
        if let Some(phases) = node.get_array("kill_chain_phases") {
            let kill_chain: Vec<Value> = phases
                .iter()
                .filter_map(|phase| {
                    let chain = phase.get("kill_chain_name")?.as_str()?;
                    let name = phase.get("phase_name")?.as_str()?;
                    Some(Value::String(format!("{chain}:{name}")))
                })
                .collect();
            if !kill_chain.is_empty() {
                meta.insert("kill_chain".into(), Value::Array(kill_chain));
            }
        }
        if let Some(aliases) = node.get_array("aliases") {
            meta.insert("synonyms".into(), Value::Array(aliases.clone()));
        }
        if let Some(references) = node.get_array("external_references") {
            let mut external_ids = Vec::new();
            let mut urls = Vec::new();
            for reference in references {
                if let Some(external_id) = reference.get("external_id").and_then(Value::as_str) {
                    external_ids.push(Value::String(external_id.to_string()));
                }
                if let Some(url) = reference.get("url").and_then(Value::as_str) {
                    urls.push(Value::String(url.to_string()));
                }
            }
            if !external_ids.is_empty() {
                meta.insert("external_id".into(), Value::Array(external_ids));
            }
            if !urls.is_empty() {
                meta.insert("refs".into(), Value::Array(urls));
            }
        }
        let cluster = MispGalaxyCluster {
            uuid,
            value: value.clone(),
            cluster_type: galaxy_type.clone(),
            description: node.get_str("description").map(str::to_string),
            tag_name: Some(format!("misp-galaxy:{galaxy_type}=\"{value}\"")),
            timestamp: node
                .get_str("modified")
                .and_then(parse_stix_datetime)
                .map(epoch_string),
            meta: (!meta.is_empty()).then_some(meta),
        };
        Some((galaxy_type.clone(), galaxy_type, cluster))
    }

    fn cluster_from_custom(node: &StixNode) -> Option<(String, String, MispGalaxyCluster)> {
        let galaxy_type = node.get_str("x_misp_type")?.to_string();
        let galaxy_name = node
            .get_str("x_misp_name")
            .unwrap_or(&galaxy_type)
            .to_string();
        let value = node.get_str("x_misp_value")?.to_string();
        let (uuid, _) = sanitize_ref_uuid(node.id());
        // The outbound side joins galaxy and cluster descriptions.
        let description = node
            .get_str("x_misp_description")
            .map(|joined| match joined.split_once(" | ") {
                Some((_, cluster_description)) => cluster_description.to_string(),
                None => joined.to_string(),
            });
        let cluster = MispGalaxyCluster {
            uuid,
            value: value.clone(),
            cluster_type: galaxy_type.clone(),
            description,
            tag_name: Some(format!("misp-galaxy:{galaxy_type}=\"{value}\"")),
            timestamp: node
                .get_str("modified")
                .and_then(parse_stix_datetime)
                .map(epoch_string),
            meta: node.get_object("x_misp_meta").cloned(),
        };
        Some((galaxy_type, galaxy_name, cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognizes_galaxy_types() {
        assert!(is_galaxy_type("malware"));
        assert!(is_galaxy_type("x-misp-galaxy-cluster"));
        assert!(!is_galaxy_type("file"));
    }

    #[test]
    fn sdo_cluster_meta_reconstruction() {
        let mut node = StixNode::sdo(
            "attack-pattern",
            "attack-pattern--dcaa092b-7de9-4a21-977f-7fcb77e89c48",
        );
        node.set_str("name", "Access Token Manipulation");
        node.set(
            "kill_chain_phases",
            json!([{"kill_chain_name": "mitre-attack", "phase_name": "defense-evasion"}]),
        );
        node.set(
            "external_references",
            json!([{"source_name": "mitre-attack", "external_id": "T1134"}]),
        );
        let (galaxy_type, _, cluster) = StixToMisp::cluster_from_sdo(&node).unwrap();
        assert_eq!(galaxy_type, "mitre-attack-pattern");
        assert_eq!(cluster.uuid, "dcaa092b-7de9-4a21-977f-7fcb77e89c48");
        let meta = cluster.meta.unwrap();
        assert_eq!(meta["kill_chain"][0], "mitre-attack:defense-evasion");
        assert_eq!(meta["external_id"][0], "T1134");
    }
}
