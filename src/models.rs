//! Core data models used throughout the harvester.
//!
//! A [`RawListing`] is the typed view of one source record. Sources hand over
//! loosely-typed JSON; the conversion here is tolerant (wrong shapes become
//! `None` or empty) so that only the normalizer decides what is fatal.

use serde_json::{Map, Value};

use crate::normalize::NormalizedRecord;
use crate::partition::Partition;

/// Latitude/longitude pair from a listing's geography block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geography {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// One element of a leveled location or category path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyNode {
    pub level: Option<i64>,
    pub external_id: Option<String>,
    pub name: Option<String>,
}

impl HierarchyNode {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            level: obj.get("level").and_then(Value::as_i64),
            external_id: obj.get("externalID").and_then(scalar_string),
            name: obj.get("name").and_then(scalar_string),
        })
    }
}

/// Raw item produced by a source before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawListing {
    /// Unique record key (`objectID`). Required by the normalizer.
    pub identifier: Option<String>,
    /// Public listing id used to build the listing URL.
    pub external_id: Option<String>,
    pub geography: Option<Geography>,
    pub location: Vec<HierarchyNode>,
    pub category: Vec<HierarchyNode>,
    pub agency_name: Option<String>,
    /// Provider-specific side channel (`extraFields`).
    pub extra_fields: Map<String, Value>,
    /// All remaining top-level fields, untouched.
    pub attributes: Map<String, Value>,
}

const STRUCTURED_KEYS: [&str; 7] = [
    "objectID",
    "externalID",
    "geography",
    "location",
    "category",
    "agency",
    "extraFields",
];

impl RawListing {
    /// Build a listing from one search-API hit.
    pub fn from_api_hit(hit: &Value) -> Self {
        let Some(obj) = hit.as_object() else {
            return Self::default();
        };

        let geography = obj.get("geography").and_then(Value::as_object).map(|g| Geography {
            lat: g.get("lat").and_then(Value::as_f64),
            lng: g.get("lng").and_then(Value::as_f64),
        });

        let attributes = obj
            .iter()
            .filter(|(key, _)| !STRUCTURED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            identifier: obj.get("objectID").and_then(scalar_string),
            external_id: obj.get("externalID").and_then(scalar_string),
            geography,
            location: nodes(obj.get("location")),
            category: nodes(obj.get("category")),
            agency_name: obj
                .get("agency")
                .and_then(|a| a.get("name"))
                .and_then(scalar_string),
            extra_fields: obj
                .get("extraFields")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            attributes,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }
}

fn nodes(value: Option<&Value>) -> Vec<HierarchyNode> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(HierarchyNode::from_value).collect())
        .unwrap_or_default()
}

/// Normalized rows of one partition, in fetch order.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionResult {
    pub partition: Partition,
    pub records: Vec<NormalizedRecord>,
}

/// Render a JSON string or number as a string; other shapes yield `None`.
pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
