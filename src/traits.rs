//! Extension traits at the pipeline seams.
//!
//! The harvester talks to the outside world through two traits:
//! [`ListingSource`] (one page of raw listings per call) and
//! [`RecordSink`] (durable storage for normalized rows). Built-in
//! implementations live in [`source_api`](crate::source_api),
//! [`source_page`](crate::source_page) and [`sink`](crate::sink); tests plug in
//! in-memory stubs.
//!
//! ```text
//! ┌──────────────┐   ┌───────────┐   ┌────────────┐   ┌────────────┐
//! │ ListingSource│──▶│ Paginator │──▶│ Normalizer │──▶│ RecordSink │
//! │  API / Page  │   │ (fetch)   │   │            │   │  CSV       │
//! └──────────────┘   └───────────┘   └────────────┘   └────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{SinkError, TransportError};
use crate::models::{PartitionResult, RawListing};
use crate::sink::{FinalDataset, SinkUnit};

// ═══════════════════════════════════════════════════════════════════════
// Source Trait
// ═══════════════════════════════════════════════════════════════════════

/// What to ask a source for; the page index is supplied per call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Free-text search string.
    pub text: String,
    /// Boolean filter expression (base predicate AND partition predicate).
    pub filter: String,
    pub page_size: u32,
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub listings: Vec<RawListing>,
    /// Total matches reported by the source, when it reports one.
    pub total_hits: Option<u64>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

/// A paginated origin of raw listings.
///
/// # Lifecycle
///
/// 1. The orchestrator builds a [`Query`] per partition.
/// 2. A [`Paginator`](crate::fetch::Paginator) calls
///    [`fetch_page`](ListingSource::fetch_page) with page 0, 1, 2, …
/// 3. The paginator stops after
///    [`empty_page_tolerance`](ListingSource::empty_page_tolerance)
///    consecutive empty pages.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Short name used in logs and output file names (e.g. `"api"`).
    fn name(&self) -> &str;

    /// Consecutive empty pages that mean "end of results".
    ///
    /// Sources with an explicit empty signal stop on the first empty page.
    fn empty_page_tolerance(&self) -> u32 {
        1
    }

    /// Pause before re-requesting a page that came back empty.
    fn empty_retry_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Fetch one zero-based page.
    async fn fetch_page(&self, query: &Query, page: u32) -> Result<Page, TransportError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Sink Trait
// ═══════════════════════════════════════════════════════════════════════

/// Durable storage for partition results.
pub trait RecordSink: Send + Sync {
    /// Persist one partition, stamping every row with `captured_at`.
    fn write(
        &self,
        result: &PartitionResult,
        captured_at: DateTime<Utc>,
    ) -> Result<SinkUnit, SinkError>;

    /// Merge `units` in the given order into one final dataset.
    fn consolidate(
        &self,
        units: &[SinkUnit],
        captured_at: DateTime<Utc>,
    ) -> Result<FinalDataset, SinkError>;
}
