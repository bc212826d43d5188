//! Sequential page-by-page fetching.
//!
//! A [`Paginator`] walks one query from page 0 upward and hands back one
//! batch of raw listings per call to [`Paginator::next_batch`]. Nothing is
//! fetched until a batch is requested.
//!
//! # Termination
//!
//! - An empty page (or a request that failed after retries) increments a
//!   consecutive-empty counter and the same page is asked for again.
//! - Reaching the source's [`empty_page_tolerance`] ends the sequence.
//! - A non-empty page resets the counter and advances the cursor.
//! - `max_pages` caps how far the cursor may advance.
//!
//! A fixed `page_delay` separates every request that follows a non-empty
//! page; this is the harvester's only throttle.
//!
//! [`empty_page_tolerance`]: crate::traits::ListingSource::empty_page_tolerance

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::RawListing;
use crate::traits::{ListingSource, Query};

/// Per-fetch limits and pacing.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchSettings {
    pub page_delay: Duration,
    pub max_pages: Option<u32>,
}

/// Lazy cursor over the pages of one query.
pub struct Paginator<'a, S: ?Sized> {
    source: &'a S,
    query: Query,
    settings: FetchSettings,
    page: u32,
    consecutive_empty: u32,
    requests: u32,
    throttle_next: bool,
    finished: bool,
}

impl<'a, S: ListingSource + ?Sized> Paginator<'a, S> {
    pub fn new(source: &'a S, query: Query, settings: FetchSettings) -> Self {
        Self {
            source,
            query,
            settings,
            page: 0,
            consecutive_empty: 0,
            requests: 0,
            throttle_next: false,
            finished: false,
        }
    }

    /// Next non-empty batch, or `None` once the sequence has ended.
    pub async fn next_batch(&mut self) -> Option<Vec<RawListing>> {
        let tolerance = self.source.empty_page_tolerance().max(1);

        while !self.finished {
            if let Some(max) = self.settings.max_pages {
                if self.page >= max {
                    info!(source = self.source.name(), max, "page limit reached");
                    self.finished = true;
                    break;
                }
            }

            if self.throttle_next && !self.settings.page_delay.is_zero() {
                tokio::time::sleep(self.settings.page_delay).await;
            }
            self.throttle_next = false;

            debug!(source = self.source.name(), page = self.page, "fetching page");
            self.requests += 1;
            let listings = match self.source.fetch_page(&self.query, self.page).await {
                Ok(page) => {
                    if self.page == 0 && self.consecutive_empty == 0 {
                        if let Some(total) = page.total_hits {
                            info!(source = self.source.name(), total, "query reports total hits");
                        }
                    }
                    page.listings
                }
                Err(e) => {
                    warn!(
                        source = self.source.name(),
                        page = self.page,
                        "page request failed, treating as empty: {}",
                        e
                    );
                    Vec::new()
                }
            };

            if listings.is_empty() {
                self.consecutive_empty += 1;
                if self.consecutive_empty >= tolerance {
                    info!(
                        source = self.source.name(),
                        page = self.page,
                        "no more listings after {} empty response(s)",
                        self.consecutive_empty
                    );
                    self.finished = true;
                    break;
                }
                info!(
                    source = self.source.name(),
                    page = self.page,
                    "empty page, retrying ({}/{})",
                    self.consecutive_empty,
                    tolerance
                );
                let delay = self.source.empty_retry_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }

            self.consecutive_empty = 0;
            self.page += 1;
            self.throttle_next = true;
            return Some(listings);
        }

        None
    }

    /// Drain the remaining pages into one vector, in fetch order.
    pub async fn collect_all(mut self) -> Vec<RawListing> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await {
            all.extend(batch);
        }
        all
    }

    /// Pages successfully advanced past so far.
    pub fn pages_fetched(&self) -> u32 {
        self.page
    }

    /// Requests issued so far, including empty retries.
    pub fn requests(&self) -> u32 {
        self.requests
    }
}
