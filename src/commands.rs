//! Command implementations behind the `harvest` binary.
//!
//! Each function wires configuration into the library types and prints a
//! short human summary on stdout; diagnostics go through `tracing`.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime, Utc};

use crate::config::Config;
use crate::fetch::FetchSettings;
use crate::harvest::{HarvestReport, HarvestSettings, Harvester};
use crate::normalize::Normalizer;
use crate::partition::{PartitionPlan, Planner};
use crate::sink::CsvSink;
use crate::source_api::SearchApiSource;
use crate::source_page::{RenderedPageSource, BROWSER_HEADERS};
use crate::traits::{ListingSource, RecordSink};
use crate::transport::HttpTransport;

/// Which configured source a run reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Api,
    Page,
}

/// Print the partition plan with the filter each band sends.
pub fn show_plan(config: &Config) -> Result<()> {
    let plan = config.partitions.plan()?;
    let base = config
        .api
        .as_ref()
        .map(|api| api.base_filter.as_str())
        .unwrap_or("");

    println!("{:<24} {:>12} {:>12}  FILTER", "PARTITION", "LOWER", "UPPER");
    for partition in &plan {
        let upper = partition
            .upper
            .map_or_else(|| "-".to_string(), |u| u.to_string());
        println!(
            "{:<24} {:>12} {:>12}  {}",
            partition.label,
            partition.lower,
            upper,
            partition.combined_filter(base)
        );
    }
    println!("{} partitions", plan.len());
    Ok(())
}

/// Harvest one source end to end and print the run summary.
pub async fn run_harvest(
    config: &Config,
    kind: SourceKind,
    max_pages: Option<u32>,
) -> Result<HarvestReport> {
    let sink = CsvSink::new(&config.output.dir, &config.output.prefix);
    let normalizer = Normalizer::new(&config.normalize);

    let report = match kind {
        SourceKind::Api => {
            let Some(api) = &config.api else {
                bail!("No [api] section in config");
            };
            let transport = HttpTransport::new(&config.transport)?;
            let source = SearchApiSource::new(api, transport)?;
            let settings = HarvestSettings {
                query_text: api.query.clone(),
                base_filter: api.base_filter.clone(),
                page_size: api.hits_per_page,
                fetch: FetchSettings {
                    page_delay: config.transport.page_delay(),
                    max_pages: max_pages.or(api.max_pages),
                },
            };
            let plan = config.partitions.plan()?;
            harvest(&source, &sink, &normalizer, settings, &plan).await?
        }
        SourceKind::Page => {
            let Some(page) = &config.page else {
                bail!("No [page] section in config");
            };
            let transport = HttpTransport::with_headers(&config.transport, &BROWSER_HEADERS)?;
            let source = RenderedPageSource::new(page, transport)
                .with_context(|| format!("Invalid page base_url: {}", page.base_url))?;
            let settings = HarvestSettings {
                fetch: FetchSettings {
                    page_delay: config.transport.page_delay(),
                    max_pages: max_pages.or(page.max_pages),
                },
                ..Default::default()
            };
            // Rendered pages cannot be filtered by price, so the run is one open band
            let plan = Planner::new(&config.partitions.attribute)
                .split_labeled(&[], std::slice::from_ref(&page.label))?;
            harvest(&source, &sink, &normalizer, settings, &plan).await?
        }
    };

    report.print_summary();
    Ok(report)
}

async fn harvest(
    source: &dyn ListingSource,
    sink: &dyn RecordSink,
    normalizer: &Normalizer,
    settings: HarvestSettings,
    plan: &PartitionPlan,
) -> Result<HarvestReport> {
    let report = Harvester::new(source, sink, normalizer, settings)
        .run(plan, Utc::now())
        .await
        .context("Consolidation failed")?;
    Ok(report)
}

/// Merge existing partition files into the final dataset.
///
/// Merges one capture day: `date` when given, else the latest day found on
/// disk. The output is named after that day. `all` merges every unit on disk
/// regardless of date under today's date.
pub fn run_consolidate(config: &Config, date: Option<NaiveDate>, all: bool) -> Result<()> {
    let sink = CsvSink::new(&config.output.dir, &config.output.prefix);
    let (units, captured_at) = if all {
        (sink.discover_units(None)?, Utc::now())
    } else {
        match date.map_or_else(|| sink.latest_unit_date(), |day| Ok(Some(day)))? {
            Some(day) => (
                sink.discover_units(Some(day))?,
                day.and_time(NaiveTime::default()).and_utc(),
            ),
            None => (Vec::new(), Utc::now()),
        }
    };
    let dataset = sink.consolidate(&units, captured_at).with_context(|| {
        format!(
            "Nothing to consolidate under {}",
            config.output.dir.display()
        )
    })?;

    println!("consolidate");
    println!("  units: {}", units.len());
    for unit in &units {
        println!("  {}: {} rows", unit.label, unit.rows);
    }
    println!(
        "  dataset: {} rows -> {}",
        dataset.rows.len(),
        dataset.path.display()
    );
    println!("ok");
    Ok(())
}
