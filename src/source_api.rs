//! Structured search-API source.
//!
//! Posts `{query, filters, page, hitsPerPage}` to an Algolia-style index
//! endpoint and turns each returned hit into a [`RawListing`].
//!
//! # Configuration
//!
//! ```toml
//! [api]
//! app_id = "LL8IZ711CS"
//! index_name = "bayut-production-ads-city-level-score-en"
//! base_filter = "purpose:for-rent"
//! hits_per_page = 50
//! max_pages = 1000
//! # api_key = "..."   # or HARVEST_API_KEY
//! ```
//!
//! # Response
//!
//! ```json
//! { "hits": [ { "objectID": "...", ... } ], "nbHits": 1234, "nbPages": 25 }
//! ```
//!
//! A response without a `hits` array is reported as a decode error, which the
//! paginator counts as an empty page.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::ApiSourceConfig;
use crate::error::TransportError;
use crate::models::RawListing;
use crate::traits::{ListingSource, Page, Query};
use crate::transport::{Request, Transport};

/// A search-API source over any [`Transport`].
pub struct SearchApiSource<T> {
    transport: T,
    url: String,
    headers: Vec<(String, String)>,
}

impl<T: Transport> SearchApiSource<T> {
    /// Build a source from `[api]` configuration.
    ///
    /// # Errors
    ///
    /// Fails when no API key is configured or exported.
    pub fn new(config: &ApiSourceConfig, transport: T) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        Ok(Self {
            transport,
            url: config.endpoint_url(),
            headers: vec![
                ("X-Algolia-API-Key".to_string(), api_key),
                ("X-Algolia-Application-Id".to_string(), config.app_id.clone()),
            ],
        })
    }

    fn request(&self, query: &Query, page: u32) -> Request {
        Request::PostJson {
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: serde_json::json!({
                "query": query.text,
                "filters": query.filter,
                "page": page,
                "hitsPerPage": query.page_size,
            }),
        }
    }
}

#[async_trait]
impl<T: Transport> ListingSource for SearchApiSource<T> {
    fn name(&self) -> &str {
        "api"
    }

    async fn fetch_page(&self, query: &Query, page: u32) -> Result<Page, TransportError> {
        let response = self.transport.send(&self.request(query, page)).await?;
        let json = response.json()?;
        parse_search_response(&json).ok_or_else(|| TransportError::Decode {
            url: response.url.clone(),
            message: "missing hits array".to_string(),
        })
    }
}

/// Extract hits and the reported total from a search response.
fn parse_search_response(json: &Value) -> Option<Page> {
    let hits = json.get("hits")?.as_array()?;
    Some(Page {
        listings: hits.iter().map(RawListing::from_api_hit).collect(),
        total_hits: json.get("nbHits").and_then(Value::as_u64),
    })
}
