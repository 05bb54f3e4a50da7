//! Bundle envelope for converted STIX content.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::StixNode;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StixBundle {
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub id: String,
    pub objects: Vec<StixNode>,
}

impl StixBundle {
    pub fn new(objects: Vec<StixNode>) -> Self {
        Self {
            bundle_type: "bundle".into(),
            id: format!("bundle--{}", Uuid::new_v4()),
            objects,
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// First node of the given type, if any.
    pub fn find_type(&self, object_type: &str) -> Option<&StixNode> {
        self.objects
            .iter()
            .find(|node| node.object_type() == object_type)
    }
}
