//! Flattening of raw listings into fixed-schema rows.
//!
//! [`Normalizer::normalize`] is a pure function of one [`RawListing`]: it
//! walks the location and category hierarchies into level-specific columns,
//! projects geography, agency and side-channel fields, converts epoch
//! timestamps, and finally projects everything onto [`COLUMNS`]. Source
//! fields not named there are dropped.
//!
//! # Hierarchy levels
//!
//! | Tree | Level | Columns |
//! |------|-------|---------|
//! | location | 1 | `CityCode`, `CityName` |
//! | location | 2 | `DistrictID`, `DistrictName` |
//! | location | 3 | `NeighborhoodID`, `NeighborhoodName` |
//! | location | 4 | `BuildingID`, `BuildingName` |
//! | category | 0 | `CategoryTypeCode`, `CategoryTypeName` |
//! | category | 1 | `CategorySubtypeCode`, `CategorySubtypeName` |
//!
//! When a level occurs more than once the first node wins.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use crate::config::NormalizeConfig;
use crate::error::NormalizationError;
use crate::models::{HierarchyNode, RawListing};

/// Output columns, in order.
pub const COLUMNS: [&str; 36] = [
    "objectID",
    "DldPropertySK",
    "referenceNumber",
    "permitNumber",
    "title",
    "ListingLink",
    "purpose",
    "price",
    "rentFrequency",
    "rooms",
    "baths",
    "area (sqm)",
    "plotArea (sqm)",
    "furnishingStatus",
    "amenities",
    "CategoryTypeCode",
    "CategoryTypeName",
    "CategorySubtypeCode",
    "CategorySubtypeName",
    "CityCode",
    "CityName",
    "DistrictID",
    "DistrictName",
    "NeighborhoodID",
    "NeighborhoodName",
    "BuildingID",
    "BuildingName",
    "DldBuildingNK",
    "latitude",
    "longitude",
    "createdAt",
    "updatedAt",
    "contactName",
    "phoneNumber",
    "AgencyName",
    "completionStatus",
];

/// Format used when rendering timestamps into CSV cells.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One scalar value in a normalized row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    /// CSV rendering; null becomes an empty field.
    pub fn render(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Integer(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    fn text(value: Option<&str>) -> Self {
        value.map_or(Cell::Null, |s| Cell::Text(s.to_string()))
    }

    /// Arrays and objects are kept as compact JSON text.
    fn from_json(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Cell::Null,
            Some(Value::Bool(b)) => Cell::Bool(*b),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => Cell::Integer(i),
                None => n.as_f64().map_or(Cell::Null, Cell::Float),
            },
            Some(Value::String(s)) => Cell::Text(s.clone()),
            Some(other) => Cell::Text(other.to_string()),
        }
    }

    fn float(value: Option<f64>) -> Self {
        value.map_or(Cell::Null, Cell::Float)
    }
}

/// A flat row whose cells line up with [`COLUMNS`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    cells: Vec<Cell>,
}

impl NormalizedRecord {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        COLUMNS
            .iter()
            .position(|c| *c == column)
            .and_then(|i| self.cells.get(i))
    }

    pub fn city(&self) -> Option<&str> {
        self.get("CityName").and_then(Cell::as_text)
    }

    /// Rendered CSV fields, in column order.
    pub fn render(&self) -> Vec<String> {
        self.cells.iter().map(Cell::render).collect()
    }
}

/// Counts from one [`Normalizer::normalize_batch`] call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchOutcome {
    pub records: Vec<NormalizedRecord>,
    /// Records that failed normalization.
    pub dropped: usize,
    /// Records normalized fine but outside the target city.
    pub filtered: usize,
}

/// Stateless mapper from [`RawListing`] to [`NormalizedRecord`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    url_template: Option<String>,
    target_city: Option<String>,
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Self {
        Self {
            url_template: config.listing_url_template.clone(),
            target_city: config.target_city.clone(),
        }
    }

    pub fn with_target_city(mut self, city: Option<String>) -> Self {
        self.target_city = city;
        self
    }

    pub fn normalize(&self, raw: &RawListing) -> Result<NormalizedRecord, NormalizationError> {
        let identifier = raw
            .identifier
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(NormalizationError::MissingIdentifier)?;

        let (lat, lng) = raw
            .geography
            .as_ref()
            .map_or((None, None), |g| (g.lat, g.lng));

        let (city_code, city_name) = walk(&raw.location, 1);
        let (district_id, district_name) = walk(&raw.location, 2);
        let (neighborhood_id, neighborhood_name) = walk(&raw.location, 3);
        let (building_id, building_name) = walk(&raw.location, 4);
        let (type_code, type_name) = walk(&raw.category, 0);
        let (subtype_code, subtype_name) = walk(&raw.category, 1);

        let link = self.url_template.as_ref().map(|template| {
            let id = raw.external_id.as_deref().unwrap_or(identifier);
            template.replace("{id}", id)
        });

        let attr = |key: &str| Cell::from_json(raw.attribute(key));
        let extra = |key: &str| Cell::from_json(raw.extra_fields.get(key));

        let cells = vec![
            Cell::Text(identifier.to_string()),
            extra("dldPropertySK"),
            attr("referenceNumber"),
            attr("permitNumber"),
            attr("title"),
            Cell::text(link.as_deref()),
            attr("purpose"),
            attr("price"),
            attr("rentFrequency"),
            attr("rooms"),
            attr("baths"),
            attr("area"),
            attr("plotArea"),
            attr("furnishingStatus"),
            attr("amenities"),
            type_code,
            type_name,
            subtype_code,
            subtype_name,
            city_code,
            city_name,
            district_id,
            district_name,
            neighborhood_id,
            neighborhood_name,
            building_id,
            building_name,
            extra("dldBuildingNK"),
            Cell::float(lat),
            Cell::float(lng),
            timestamp(raw, "createdAt")?,
            timestamp(raw, "updatedAt")?,
            attr("contactName"),
            attr("phoneNumber"),
            Cell::text(raw.agency_name.as_deref()),
            attr("completionStatus"),
        ];
        debug_assert_eq!(cells.len(), COLUMNS.len());

        Ok(NormalizedRecord { cells })
    }

    /// Whether `record` passes the target-city filter.
    pub fn retains(&self, record: &NormalizedRecord) -> bool {
        match &self.target_city {
            Some(city) => record.city() == Some(city.as_str()),
            None => true,
        }
    }

    /// Normalize a page of listings, dropping failures and foreign cities.
    ///
    /// A malformed record is logged and skipped; it never aborts the batch.
    pub fn normalize_batch(&self, batch: &[RawListing]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for raw in batch {
            match self.normalize(raw) {
                Ok(record) if self.retains(&record) => outcome.records.push(record),
                Ok(_) => outcome.filtered += 1,
                Err(e) => {
                    warn!(
                        identifier = raw.identifier.as_deref().unwrap_or("<none>"),
                        "dropping listing: {}", e
                    );
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }
}

/// First `(external id, name)` pair at `level`, as cells.
fn walk(nodes: &[HierarchyNode], level: i64) -> (Cell, Cell) {
    nodes
        .iter()
        .find(|node| node.level == Some(level))
        .map_or((Cell::Null, Cell::Null), |node| {
            (
                Cell::text(node.external_id.as_deref()),
                Cell::text(node.name.as_deref()),
            )
        })
}

/// Epoch seconds (number or numeric string) or an ISO-8601 string.
fn timestamp(raw: &RawListing, field: &str) -> Result<Cell, NormalizationError> {
    let invalid = |message: String| NormalizationError::InvalidField {
        field: field.to_string(),
        message,
    };

    let Some(value) = raw.attribute(field) else {
        return Ok(Cell::Null);
    };

    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(secs) => from_epoch(secs),
            Err(_) => parse_iso(s.trim()),
        },
        _ => None,
    };

    parsed
        .map(Cell::Timestamp)
        .ok_or_else(|| invalid(format!("unparseable timestamp: {}", value)))
}

fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
