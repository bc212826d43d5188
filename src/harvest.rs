//! Harvest orchestration.
//!
//! Drives the full flow for one source: plan → fetch → normalize → write →
//! consolidate. Partitions run one after another; each one either yields a
//! written unit or a [`PartitionError`] that is logged with its label while
//! the run moves on. Consolidation merges whatever units were written, in
//! plan order.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::{PartitionError, SinkError};
use crate::fetch::{FetchSettings, Paginator};
use crate::models::PartitionResult;
use crate::normalize::Normalizer;
use crate::partition::{Partition, PartitionPlan};
use crate::sink::{FinalDataset, SinkUnit};
use crate::traits::{ListingSource, Query, RecordSink};

/// Query parameters shared by every partition of a run.
#[derive(Debug, Clone, Default)]
pub struct HarvestSettings {
    pub query_text: String,
    /// Filter every partition predicate is ANDed onto.
    pub base_filter: String,
    pub page_size: u32,
    pub fetch: FetchSettings,
}

/// Counts for one written partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionReport {
    pub label: String,
    pub pages: u32,
    pub requests: u32,
    pub fetched: usize,
    pub kept: usize,
    pub dropped: usize,
    pub filtered: usize,
    pub unit: SinkUnit,
}

/// Outcome of a whole run.
#[derive(Debug)]
pub struct HarvestReport {
    pub source: String,
    pub captured_at: DateTime<Utc>,
    pub partitions: Vec<PartitionReport>,
    pub failures: Vec<PartitionError>,
    pub dataset: FinalDataset,
}

impl HarvestReport {
    pub fn fetched(&self) -> usize {
        self.partitions.iter().map(|p| p.fetched).sum()
    }

    pub fn kept(&self) -> usize {
        self.partitions.iter().map(|p| p.kept).sum()
    }

    /// Human summary on stdout.
    pub fn print_summary(&self) {
        println!("harvest {}", self.source);
        println!(
            "  partitions: {} written, {} failed",
            self.partitions.len(),
            self.failures.len()
        );
        for p in &self.partitions {
            println!(
                "  {}: fetched {}, kept {}, dropped {}, filtered {} ({} pages)",
                p.label, p.fetched, p.kept, p.dropped, p.filtered, p.pages
            );
        }
        for failure in &self.failures {
            println!("  {}: FAILED", failure.label());
        }
        println!("  fetched: {} listings", self.fetched());
        println!("  kept: {} records", self.kept());
        println!(
            "  dataset: {} rows -> {}",
            self.dataset.rows.len(),
            self.dataset.path.display()
        );
        println!("ok");
    }
}

/// Runs a partition plan against one source and one sink.
pub struct Harvester<'a> {
    source: &'a dyn ListingSource,
    sink: &'a dyn RecordSink,
    normalizer: &'a Normalizer,
    settings: HarvestSettings,
}

impl<'a> Harvester<'a> {
    pub fn new(
        source: &'a dyn ListingSource,
        sink: &'a dyn RecordSink,
        normalizer: &'a Normalizer,
        settings: HarvestSettings,
    ) -> Self {
        Self {
            source,
            sink,
            normalizer,
            settings,
        }
    }

    fn query_for(&self, partition: &Partition) -> Query {
        Query {
            text: self.settings.query_text.clone(),
            filter: partition.combined_filter(&self.settings.base_filter),
            page_size: self.settings.page_size,
        }
    }

    /// Fetch, normalize and write one partition.
    pub async fn harvest_partition(
        &self,
        partition: &Partition,
        captured_at: DateTime<Utc>,
    ) -> Result<PartitionReport, PartitionError> {
        let query = self.query_for(partition);
        info!(
            source = self.source.name(),
            partition = %partition.label,
            filter = %query.filter,
            "harvesting partition"
        );

        let mut paginator = Paginator::new(self.source, query, self.settings.fetch);
        let mut result = PartitionResult {
            partition: partition.clone(),
            records: Vec::new(),
        };
        let (mut fetched, mut dropped, mut filtered) = (0, 0, 0);
        while let Some(batch) = paginator.next_batch().await {
            fetched += batch.len();
            let outcome = self.normalizer.normalize_batch(&batch);
            dropped += outcome.dropped;
            filtered += outcome.filtered;
            result.records.extend(outcome.records);
        }

        let unit = self
            .sink
            .write(&result, captured_at)
            .map_err(|source| PartitionError::Sink {
                label: partition.label.clone(),
                source,
            })?;

        info!(
            partition = %partition.label,
            fetched,
            kept = result.records.len(),
            dropped,
            filtered,
            "partition written"
        );
        Ok(PartitionReport {
            label: partition.label.clone(),
            pages: paginator.pages_fetched(),
            requests: paginator.requests(),
            fetched,
            kept: result.records.len(),
            dropped,
            filtered,
            unit,
        })
    }

    /// Harvest every partition in plan order, then consolidate.
    ///
    /// A failing partition is logged and skipped. Only consolidation errors
    /// (including "nothing was written") fail the run.
    pub async fn run(
        &self,
        plan: &PartitionPlan,
        captured_at: DateTime<Utc>,
    ) -> Result<HarvestReport, SinkError> {
        let mut partitions = Vec::new();
        let mut failures = Vec::new();

        for partition in plan {
            match self.harvest_partition(partition, captured_at).await {
                Ok(report) => partitions.push(report),
                Err(e) => {
                    error!(partition = e.label(), "partition failed: {}", e);
                    failures.push(e);
                }
            }
        }

        let units: Vec<SinkUnit> = partitions.iter().map(|p| p.unit.clone()).collect();
        let dataset = self.sink.consolidate(&units, captured_at)?;

        Ok(HarvestReport {
            source: self.source.name().to_string(),
            captured_at,
            partitions,
            failures,
            dataset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::models::{HierarchyNode, RawListing};
    use crate::partition::Planner;
    use crate::sink::CsvSink;
    use crate::traits::Page;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{json, Map};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves a fixed listing set, filtered by the price band in the query.
    struct BandSource {
        plan: PartitionPlan,
        listings: Vec<(f64, &'static str, &'static str)>,
        page_size: usize,
        filters: Mutex<Vec<String>>,
    }

    impl BandSource {
        fn matching(&self, filter: &str) -> Vec<RawListing> {
            let partition = self
                .plan
                .iter()
                .find(|p| filter.ends_with(&p.predicate()))
                .expect("filter names a known band");
            self.listings
                .iter()
                .filter(|(price, _, _)| partition.contains(*price))
                .map(|(price, id, city)| listing(id, *price, city))
                .collect()
        }
    }

    fn plan() -> PartitionPlan {
        Planner::new("price").split_at(&[20000, 50000]).unwrap()
    }

    #[async_trait]
    impl ListingSource for BandSource {
        fn name(&self) -> &str {
            "bands"
        }

        async fn fetch_page(&self, query: &Query, page: u32) -> Result<Page, TransportError> {
            self.filters.lock().unwrap().push(query.filter.clone());
            let all = self.matching(&query.filter);
            let listings = all
                .chunks(self.page_size)
                .nth(page as usize)
                .map(<[RawListing]>::to_vec)
                .unwrap_or_default();
            Ok(Page {
                listings,
                total_hits: Some(all.len() as u64),
            })
        }
    }

    fn listing(id: &str, price: f64, city: &str) -> RawListing {
        let mut attributes = Map::new();
        attributes.insert("price".to_string(), json!(price));
        RawListing {
            identifier: Some(id.to_string()),
            location: vec![HierarchyNode {
                level: Some(1),
                external_id: Some("1".to_string()),
                name: Some(city.to_string()),
            }],
            attributes,
            ..Default::default()
        }
    }

    fn source(plan: PartitionPlan) -> BandSource {
        BandSource {
            plan,
            listings: vec![
                (12000.0, "a", "Dubai"),
                (18000.0, "b", "Dubai"),
                (19999.0, "c", "Dubai"),
                (20000.0, "d", "Dubai"),
                (30000.0, "e", "Sharjah"),
                (90000.0, "f", "Dubai"),
            ],
            page_size: 2,
            filters: Mutex::new(Vec::new()),
        }
    }

    fn captured() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn settings() -> HarvestSettings {
        HarvestSettings {
            query_text: String::new(),
            base_filter: "purpose:for-rent".to_string(),
            page_size: 2,
            fetch: FetchSettings::default(),
        }
    }

    fn ids(dataset: &FinalDataset) -> Vec<&str> {
        dataset.rows.iter().map(|row| row[0].as_str()).collect()
    }

    #[tokio::test]
    async fn run_covers_every_band_in_plan_order() {
        let tmp = TempDir::new().unwrap();
        let source = source(plan());
        let sink = CsvSink::new(tmp.path(), "test");
        let normalizer = Normalizer::default();

        let report = Harvester::new(&source, &sink, &normalizer, settings())
            .run(&plan(), captured())
            .await
            .unwrap();

        assert_eq!(ids(&report.dataset), vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(report.fetched(), 6);
        assert!(report.failures.is_empty());
        let first = &report.partitions[0];
        assert_eq!((first.pages, first.fetched), (2, 3));

        let filters = source.filters.lock().unwrap();
        assert_eq!(filters[0], "purpose:for-rent AND price < 20000");
        assert!(filters.contains(&"purpose:for-rent AND price >= 50000".to_string()));
    }

    #[tokio::test]
    async fn foreign_city_is_fetched_but_not_written() {
        let tmp = TempDir::new().unwrap();
        let source = source(plan());
        let sink = CsvSink::new(tmp.path(), "test");
        let normalizer = Normalizer::default().with_target_city(Some("Dubai".to_string()));

        let report = Harvester::new(&source, &sink, &normalizer, settings())
            .run(&plan(), captured())
            .await
            .unwrap();

        assert_eq!(report.fetched(), 6);
        assert_eq!(report.kept(), 5);
        assert!(!ids(&report.dataset).contains(&"e"));
        assert_eq!(report.partitions[1].filtered, 1);
    }

    /// Delegates to a CSV sink but refuses one label.
    struct FlakySink {
        inner: CsvSink,
        refuse: &'static str,
    }

    impl RecordSink for FlakySink {
        fn write(
            &self,
            result: &PartitionResult,
            captured_at: DateTime<Utc>,
        ) -> Result<SinkUnit, SinkError> {
            if result.partition.label == self.refuse {
                return Err(SinkError::Io {
                    path: self.inner.dir().to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.inner.write(result, captured_at)
        }

        fn consolidate(
            &self,
            units: &[SinkUnit],
            captured_at: DateTime<Utc>,
        ) -> Result<FinalDataset, SinkError> {
            self.inner.consolidate(units, captured_at)
        }
    }

    #[tokio::test]
    async fn failing_partition_does_not_abort_siblings() {
        let tmp = TempDir::new().unwrap();
        let source = source(plan());
        let sink = FlakySink {
            inner: CsvSink::new(tmp.path(), "test"),
            refuse: "price_20000_50000",
        };
        let normalizer = Normalizer::default();

        let report = Harvester::new(&source, &sink, &normalizer, settings())
            .run(&plan(), captured())
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].label(), "price_20000_50000");
        assert_eq!(report.partitions.len(), 2);
        assert_eq!(ids(&report.dataset), vec!["a", "b", "c", "f"]);
    }

    #[tokio::test]
    async fn run_with_nothing_written_fails_consolidation() {
        let tmp = TempDir::new().unwrap();
        let single = Planner::new("price")
            .split_labeled(&[], &["all".to_string()])
            .unwrap();
        let source = source(single.clone());
        let sink = FlakySink {
            inner: CsvSink::new(tmp.path(), "test"),
            refuse: "all",
        };
        let normalizer = Normalizer::default();

        let err = Harvester::new(&source, &sink, &normalizer, settings())
            .run(&single, captured())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::NoUnits));
    }
}
