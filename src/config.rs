//! TOML configuration parsing and validation.
//!
//! Everything the harvester needs at runtime (credentials, target city,
//! partition plan, page size, delays) lives in one file and is threaded
//! through constructors as a [`Config`] value.
//!
//! ```toml
//! [output]
//! dir = "./output/listings"
//! prefix = "bayut"
//!
//! [transport]
//! max_attempts = 3
//! retry_delay_ms = 2000
//!
//! [normalize]
//! target_city = "Dubai"
//! listing_url_template = "https://www.bayut.com/property/details-{id}.html"
//!
//! [partitions]
//! attribute = "price"
//! bounds = [20000, 35000, 50000]
//! # or derive bounds from expected counts per price bucket:
//! # histogram = [[0, 800], [20000, 700], [35000, 900]]
//! # ceiling = 1000
//!
//! [api]
//! app_id = "LL8IZ711CS"
//! index_name = "bayut-production-ads-city-level-score-en"
//! base_filter = "purpose:for-rent"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::partition::{PartitionPlan, Planner};

/// Environment variable consulted when `[api].api_key` is not set.
pub const API_KEY_ENV: &str = "HARVEST_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub output: OutputConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub partitions: PartitionsConfig,
    pub api: Option<ApiSourceConfig>,
    pub page: Option<PageSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "listings".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 2000,
            page_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_page_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

impl TransportConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NormalizeConfig {
    /// Only records whose resolved city equals this name are kept.
    #[serde(default)]
    pub target_city: Option<String>,
    /// `{id}` is replaced with the listing's external id.
    #[serde(default)]
    pub listing_url_template: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartitionsConfig {
    #[serde(default = "default_attribute")]
    pub attribute: String,
    /// Ascending thresholds; the plan is `[0,b1) [b1,b2) … [bn,∞)`.
    #[serde(default)]
    pub bounds: Vec<u64>,
    /// Optional labels, one per band (`bounds.len() + 1`).
    #[serde(default)]
    pub labels: Vec<String>,
    /// Expected `[lower_edge, count]` buckets; replaces `bounds` when set.
    #[serde(default)]
    pub histogram: Vec<(u64, u64)>,
    /// Per-query result cap the histogram bands are merged under.
    #[serde(default)]
    pub ceiling: Option<u64>,
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        Self {
            attribute: default_attribute(),
            bounds: Vec::new(),
            labels: Vec::new(),
            histogram: Vec::new(),
            ceiling: None,
        }
    }
}

fn default_attribute() -> String {
    "price".to_string()
}

impl PartitionsConfig {
    /// Build the partition plan declared by this section.
    pub fn plan(&self) -> Result<PartitionPlan> {
        let planner = Planner::new(&self.attribute);
        if !self.histogram.is_empty() {
            if !self.bounds.is_empty() || !self.labels.is_empty() {
                anyhow::bail!("partitions.histogram cannot be combined with bounds or labels");
            }
            let Some(ceiling) = self.ceiling else {
                anyhow::bail!("partitions.histogram requires partitions.ceiling");
            };
            return Ok(planner.split_by_histogram(&self.histogram, ceiling)?);
        }
        let plan = if self.labels.is_empty() {
            planner.split_at(&self.bounds)?
        } else {
            planner.split_labeled(&self.bounds, &self.labels)?
        };
        Ok(plan)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSourceConfig {
    pub app_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub index_name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_base_filter")]
    pub base_filter: String,
    #[serde(default = "default_hits_per_page")]
    pub hits_per_page: u32,
    #[serde(default)]
    pub max_pages: Option<u32>,
}

fn default_base_filter() -> String {
    "purpose:for-rent".to_string()
}
fn default_hits_per_page() -> u32 {
    50
}

impl ApiSourceConfig {
    /// Resolve the API key from the file or from [`API_KEY_ENV`].
    pub fn resolve_api_key(&self) -> Result<String> {
        match &self.api_key {
            Some(key) => Ok(key.clone()),
            None => std::env::var(API_KEY_ENV).with_context(|| {
                format!("api.api_key not set and {} not in environment", API_KEY_ENV)
            }),
        }
    }

    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "https://{}-dsn.algolia.net/1/indexes/{}/query",
                self.app_id, self.index_name
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PageSourceConfig {
    pub base_url: String,
    #[serde(default = "default_first_page")]
    pub first_page: u32,
    #[serde(default = "default_empty_page_tolerance")]
    pub empty_page_tolerance: u32,
    #[serde(default = "default_empty_retry_delay_ms")]
    pub empty_retry_delay_ms: u64,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default = "default_label")]
    pub label: String,
}

fn default_first_page() -> u32 {
    1
}
fn default_empty_page_tolerance() -> u32 {
    3
}
fn default_empty_retry_delay_ms() -> u64 {
    2000
}
fn default_label() -> String {
    "search".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.output.prefix.trim().is_empty() {
        anyhow::bail!("output.prefix must not be empty");
    }

    if config.transport.max_attempts == 0 {
        anyhow::bail!("transport.max_attempts must be >= 1");
    }

    // Surfaces unsorted bounds or mismatched labels at load time
    config
        .partitions
        .plan()
        .context("Invalid [partitions] section")?;

    if let Some(template) = &config.normalize.listing_url_template {
        if !template.contains("{id}") {
            anyhow::bail!("normalize.listing_url_template must contain '{{id}}'");
        }
    }

    if let Some(api) = &config.api {
        if api.hits_per_page == 0 {
            anyhow::bail!("api.hits_per_page must be > 0");
        }
    }

    if let Some(page) = &config.page {
        if page.empty_page_tolerance == 0 {
            anyhow::bail!("page.empty_page_tolerance must be >= 1");
        }
        url::Url::parse(&page.base_url)
            .with_context(|| format!("page.base_url is not a valid URL: {}", page.base_url))?;
    }

    Ok(())
}
