//! MISP <-> STIX 2.1 Bridge
//!
//! A bidirectional conversion engine between the MISP
//! event/attribute/object model and STIX 2.1 bundles, built for
//! threat-intelligence pipelines that speak both formats.
//!
//! # Features
//!
//! - **Outbound conversion**: MISP events and attribute collections to
//!   STIX 2.1 indicators, observed-data graphs, domain objects,
//!   sightings, markings and report/grouping envelopes
//! - **Inbound conversion**: STIX 2.1 observable graphs, galaxy-like
//!   domain objects and custom passthrough nodes back to MISP events
//! - **Lossless degradation**: every field missing from the static
//!   mapping tables survives as an `x_misp_*` custom property, and
//!   malformed items fall back to custom representations instead of
//!   aborting the batch
//! - **Identity dedup**: organizational identities and galaxy clusters
//!   materialize once per run through a persistent unique-ID map
//! - **Interoperability mode**: galaxy clusters can resolve to canonical
//!   nodes from a pre-built knowledge-base catalog instead of synthesis
//!
//! # Architecture
//!
//! ```text
//! MISP event ──▶ AttributeResolver ──▶ Pattern / Observable builders ─┐
//!           ├──▶ ObjectResolver    ──▶ (deferred file/PE second pass) ├─▶ Bundle
//!           └──▶ GalaxyResolver    ──▶ Unique-ID map / catalog        ┘
//!
//! STIX bundle ─▶ ObservableGraphWalker ─▶ ObjectReconstructor ─┐
//!            └─▶ GalaxyClusterBuilder ────────────────────────-┴─▶ MISP event
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use misp_stix_bridge::{MispEvent, MispToStix};
//!
//! let event: MispEvent = serde_json::from_str(r#"{
//!     "uuid": "a5b3e1c0-6f3f-4b52-bd1e-5a55e5c4e098",
//!     "info": "demo",
//!     "Attribute": [
//!         {"uuid": "91ae0a21-c7ae-4c7f-b84b-b84a7ce53d1f", "type": "domain",
//!          "value": "circl.lu", "category": "Network activity", "to_ids": true}
//!     ]
//! }"#).unwrap();
//!
//! let mut converter = MispToStix::new(false);
//! converter.parse_event(&event).unwrap();
//! let bundle = converter.into_bundle();
//! assert!(bundle.objects.iter().any(|node| node.object_type() == "indicator"));
//! ```
//!
//! # Modules
//!
//! - [`misp`] - Typed MISP-side model
//! - [`stix`] - STIX-side node and bundle model
//! - [`mappings`] - Static field dictionaries and type registries
//! - [`pattern`] - STIX pattern expression building blocks
//! - [`outbound`] - MISP to STIX conversion pipeline
//! - [`inbound`] - STIX to MISP conversion pipeline
//! - [`knowledge`] - Knowledge-base catalog for interoperability mode
//! - [`error`] - Error taxonomy and the conversion log

pub mod error;
pub mod inbound;
pub mod knowledge;
pub mod mappings;
pub mod misp;
pub mod outbound;
pub mod pattern;
pub mod stix;

pub use error::{ConversionError, ConversionLog, Result};
pub use inbound::StixToMisp;
pub use knowledge::GalaxyCatalog;
pub use misp::{MispAttribute, MispEvent, MispObject, MispOrganisation, MispTag};
pub use outbound::MispToStix;
pub use stix::{StixBundle, StixNode};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "misp_stix_bridge");
    }
}
