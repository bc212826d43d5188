//! Server-rendered search page source.
//!
//! Fetches a search results page with its `page` query parameter rewritten
//! per call, locates the embedded `<script id="__NEXT_DATA__">` JSON payload,
//! and reads the listings array at `props.pageProps.searchResult.listings`.
//!
//! Rendered pages have no explicit end-of-results signal and sometimes come
//! back empty transiently, so this source asks the paginator to tolerate a
//! few consecutive empty pages before stopping.
//!
//! # Configuration
//!
//! ```toml
//! [page]
//! base_url = "https://www.propertyfinder.ae/en/search?c=4&fu=0&rp=y&ob=mr"
//! first_page = 1
//! empty_page_tolerance = 3
//! empty_retry_delay_ms = 2000
//! ```

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::config::PageSourceConfig;
use crate::error::TransportError;
use crate::models::{scalar_string, Geography, HierarchyNode, RawListing};
use crate::traits::{ListingSource, Page, Query};
use crate::transport::{Request, Transport};

/// Headers a desktop browser would send; some sites refuse bare clients.
pub const BROWSER_HEADERS: [(&str, &str); 3] = [
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/93.0.4577.82 Safari/537.36",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Connection", "keep-alive"),
];

/// Canonical attribute name ← dotted path inside the page's `property` object.
const ATTRIBUTE_ALIASES: [(&str, &str); 10] = [
    ("title", "title"),
    ("price", "price.value"),
    ("rentFrequency", "price.period"),
    ("rooms", "bedrooms"),
    ("baths", "bathrooms"),
    ("furnishingStatus", "furnished"),
    ("referenceNumber", "reference"),
    ("createdAt", "listed_date"),
    ("contactName", "agent.name"),
    ("completionStatus", "completion_status"),
];

const SQM_PER_SQFT: f64 = 0.092903;

pub struct RenderedPageSource<T> {
    transport: T,
    base_url: Url,
    first_page: u32,
    tolerance: u32,
    empty_retry_delay: Duration,
}

impl<T: Transport> RenderedPageSource<T> {
    pub fn new(config: &PageSourceConfig, transport: T) -> Result<Self, url::ParseError> {
        Ok(Self {
            transport,
            base_url: Url::parse(&config.base_url)?,
            first_page: config.first_page,
            tolerance: config.empty_page_tolerance,
            empty_retry_delay: Duration::from_millis(config.empty_retry_delay_ms),
        })
    }
}

#[async_trait]
impl<T: Transport> ListingSource for RenderedPageSource<T> {
    fn name(&self) -> &str {
        "page"
    }

    fn empty_page_tolerance(&self) -> u32 {
        self.tolerance
    }

    fn empty_retry_delay(&self) -> Duration {
        self.empty_retry_delay
    }

    async fn fetch_page(&self, _query: &Query, page: u32) -> Result<Page, TransportError> {
        let url = page_url(&self.base_url, self.first_page + page);
        let request = Request::Get {
            url: url.to_string(),
            headers: Vec::new(),
        };
        let response = self.transport.send(&request).await?;

        let listings = match extract_listings(&response.body) {
            Ok(listings) => listings,
            Err(PayloadError::NotFound) => {
                warn!(page, "no embedded listings payload on page");
                Vec::new()
            }
            Err(PayloadError::Invalid(message)) => {
                return Err(TransportError::Decode {
                    url: response.url,
                    message,
                })
            }
        };

        Ok(Page {
            listings: listings.iter().filter_map(adapt_listing).collect(),
            total_hits: None,
        })
    }
}

/// `base` with its `page` parameter set to `page`; other parameters kept.
pub fn page_url(base: &Url, page: u32) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("page", &page.to_string());
    url
}

#[derive(Debug, PartialEq)]
enum PayloadError {
    NotFound,
    Invalid(String),
}

/// Pull the listings array out of the page's embedded JSON.
fn extract_listings(html: &str) -> Result<Vec<Value>, PayloadError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[id="__NEXT_DATA__"]"#)
        .map_err(|e| PayloadError::Invalid(format!("{:?}", e)))?;
    let script = document
        .select(&selector)
        .next()
        .ok_or(PayloadError::NotFound)?;

    let text: String = script.text().collect();
    let data: Value =
        serde_json::from_str(&text).map_err(|e| PayloadError::Invalid(e.to_string()))?;

    Ok(data
        .pointer("/props/pageProps/searchResult/listings")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

/// Map one page listing onto the [`RawListing`] shape.
///
/// Listings wrap the record in a `property` object; entries without a
/// property id are skipped.
fn adapt_listing(listing: &Value) -> Option<RawListing> {
    let property = listing.get("property").unwrap_or(listing);
    let id = property.get("id").and_then(scalar_string)?;

    let mut attributes = Map::new();
    flatten("", property, &mut attributes);
    for (canonical, path) in ATTRIBUTE_ALIASES {
        if let Some(value) = attributes.get(path).cloned() {
            attributes.entry(canonical).or_insert(value);
        }
    }
    if let Some(sqm) = property.get("size").and_then(area_sqm) {
        attributes.insert("area".to_string(), Value::from(sqm));
    }

    let geography = property
        .pointer("/location/coordinates")
        .and_then(Value::as_object)
        .map(|c| Geography {
            lat: c.get("lat").and_then(Value::as_f64),
            lng: c.get("lon").or_else(|| c.get("lng")).and_then(Value::as_f64),
        });

    // Tree is ordered root to leaf starting at the city. The page numbers its
    // own levels from 0, so position decides: city is level 1, building 4.
    let location = property
        .get("location_tree")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .enumerate()
                .map(|(i, node)| HierarchyNode {
                    level: Some(i as i64 + 1),
                    external_id: node.get("id").and_then(scalar_string),
                    name: node.get("name").and_then(scalar_string),
                })
                .collect()
        })
        .unwrap_or_default();

    let category = property
        .get("property_type")
        .and_then(scalar_string)
        .map(|name| {
            vec![HierarchyNode {
                level: Some(0),
                external_id: None,
                name: Some(name),
            }]
        })
        .unwrap_or_default();

    Some(RawListing {
        identifier: Some(id.clone()),
        external_id: Some(id),
        geography,
        location,
        category,
        agency_name: property.pointer("/broker/name").and_then(scalar_string),
        extra_fields: Map::new(),
        attributes,
    })
}

/// `{"value": n, "unit": u}` in square metres, rounded to 2 decimals.
///
/// Unknown or missing units yield `None` rather than a mislabelled number.
fn area_sqm(size: &Value) -> Option<f64> {
    let value = size.get("value").and_then(|v| match v {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => other.as_f64(),
    })?;
    let factor = match size.get("unit")?.as_str()?.to_ascii_lowercase().as_str() {
        "sqft" | "sq ft" | "sq.ft" | "ft2" => SQM_PER_SQFT,
        "sqm" | "sq m" | "m2" => 1.0,
        _ => return None,
    };
    Some((value * factor * 100.0).round() / 100.0)
}

/// Flatten nested objects into dotted keys; arrays stay whole.
fn flatten(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(obj) => {
            for (key, child) in obj {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        other if !prefix.is_empty() => {
            out.insert(prefix.to_string(), other.clone());
        }
        _ => {}
    }
}
