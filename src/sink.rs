//! CSV partition writer and consolidator.
//!
//! Every partition is written to its own file as soon as it finishes, so a
//! crash late in a run keeps the partitions already done. Consolidation
//! concatenates those files, in the order given, into the final dataset.
//!
//! # Layout
//!
//! ```text
//! {dir}/
//! ├── {prefix}_listings_{label}_{YYYY-MM-DD}.csv    one per partition
//! └── {prefix}-all_listings_{YYYY-MM-DD}.csv         consolidated
//! ```
//!
//! Every file carries the fixed normalized columns followed by
//! `scrape_date`, the run's capture timestamp.

use chrono::{DateTime, NaiveDate, Utc};
use globset::Glob;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::SinkError;
use crate::models::PartitionResult;
use crate::normalize::{COLUMNS, TIMESTAMP_FORMAT};
use crate::traits::RecordSink;

/// Name of the capture-timestamp column appended to every row.
pub const CAPTURE_COLUMN: &str = "scrape_date";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One written partition file.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkUnit {
    pub label: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// The consolidated output.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalDataset {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Header shared by every unit and the consolidated file.
pub fn header() -> Vec<String> {
    COLUMNS
        .iter()
        .copied()
        .chain(std::iter::once(CAPTURE_COLUMN))
        .map(str::to_string)
        .collect()
}

/// Writes partition units and the final dataset under one directory.
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
    prefix: String,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn unit_path(&self, label: &str, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{}_listings_{}_{}.csv",
            self.prefix,
            label,
            date.format(DATE_FORMAT)
        ))
    }

    pub fn consolidated_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{}-all_listings_{}.csv",
            self.prefix,
            date.format(DATE_FORMAT)
        ))
    }

    fn ensure_dir(&self) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir).map_err(|source| SinkError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    /// Existing unit files for this prefix, sorted by file name.
    ///
    /// With `date` set, only units captured on that day are returned. Row
    /// counts are read back from each file.
    pub fn discover_units(&self, date: Option<NaiveDate>) -> Result<Vec<SinkUnit>, SinkError> {
        self.unit_names(date)?
            .into_iter()
            .map(|name| {
                let path = self.dir.join(&name);
                let rows = count_rows(&path)?;
                Ok(SinkUnit {
                    label: self.label_of(&name),
                    path,
                    rows,
                })
            })
            .collect()
    }

    /// Most recent capture date among the unit files on disk.
    pub fn latest_unit_date(&self) -> Result<Option<NaiveDate>, SinkError> {
        Ok(self
            .unit_names(None)?
            .iter()
            .filter_map(|name| self.split_name(name).1)
            .max())
    }

    fn unit_names(&self, date: Option<NaiveDate>) -> Result<Vec<String>, SinkError> {
        let date_part = date.map_or_else(|| "*".to_string(), |d| d.format(DATE_FORMAT).to_string());
        let pattern = format!("{}_listings_*_{}.csv", self.prefix, date_part);
        let matcher = Glob::new(&pattern)
            .map_err(|e| SinkError::Pattern(e.to_string()))?
            .compile_matcher();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SinkError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SinkError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if matcher.is_match(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn label_of(&self, file_name: &str) -> String {
        self.split_name(file_name).0
    }

    /// Split `{prefix}_listings_{label}_{date}.csv` into label and date.
    fn split_name(&self, file_name: &str) -> (String, Option<NaiveDate>) {
        let head = format!("{}_listings_", self.prefix);
        let stem = file_name
            .strip_prefix(&head)
            .and_then(|rest| rest.strip_suffix(".csv"))
            .unwrap_or(file_name);
        match stem.rsplit_once('_') {
            Some((label, date)) => match NaiveDate::parse_from_str(date, DATE_FORMAT) {
                Ok(day) => (label.to_string(), Some(day)),
                Err(_) => (stem.to_string(), None),
            },
            None => (stem.to_string(), None),
        }
    }
}

impl RecordSink for CsvSink {
    fn write(
        &self,
        result: &PartitionResult,
        captured_at: DateTime<Utc>,
    ) -> Result<SinkUnit, SinkError> {
        self.ensure_dir()?;
        let path = self.unit_path(&result.partition.label, captured_at.date_naive());
        let stamp = captured_at.format(TIMESTAMP_FORMAT).to_string();

        let csv_err = |source| SinkError::Csv {
            path: path.clone(),
            source,
        };
        let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;
        writer.write_record(header()).map_err(csv_err)?;
        for record in &result.records {
            let mut fields = record.render();
            fields.push(stamp.clone());
            writer.write_record(&fields).map_err(csv_err)?;
        }
        writer.flush().map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(
            label = %result.partition.label,
            rows = result.records.len(),
            path = %path.display(),
            "wrote partition unit"
        );
        Ok(SinkUnit {
            label: result.partition.label.clone(),
            path,
            rows: result.records.len(),
        })
    }

    fn consolidate(
        &self,
        units: &[SinkUnit],
        captured_at: DateTime<Utc>,
    ) -> Result<FinalDataset, SinkError> {
        if units.is_empty() {
            return Err(SinkError::NoUnits);
        }

        let mut headers: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        for unit in units {
            let csv_err = |source| SinkError::Csv {
                path: unit.path.clone(),
                source,
            };
            let mut reader = csv::Reader::from_path(&unit.path).map_err(csv_err)?;
            let unit_headers: Vec<String> = reader
                .headers()
                .map_err(csv_err)?
                .iter()
                .map(str::to_string)
                .collect();

            if headers.is_none() {
                headers = Some(unit_headers.clone());
            }
            if headers.as_ref() != Some(&unit_headers) {
                return Err(SinkError::SchemaMismatch {
                    path: unit.path.clone(),
                });
            }

            for record in reader.records() {
                let record = record.map_err(csv_err)?;
                rows.push(record.iter().map(str::to_string).collect());
            }
        }
        let headers = headers.unwrap_or_else(header);

        self.ensure_dir()?;
        let path = self.consolidated_path(captured_at.date_naive());
        let csv_err = |source| SinkError::Csv {
            path: path.clone(),
            source,
        };
        let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;
        writer.write_record(&headers).map_err(csv_err)?;
        for row in &rows {
            writer.write_record(row).map_err(csv_err)?;
        }
        writer.flush().map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;

        info!(
            units = units.len(),
            rows = rows.len(),
            path = %path.display(),
            "consolidated dataset"
        );
        Ok(FinalDataset {
            path,
            headers,
            rows,
        })
    }
}

fn count_rows(path: &Path) -> Result<usize, SinkError> {
    let csv_err = |source| SinkError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let mut rows = 0;
    for record in reader.records() {
        record.map_err(csv_err)?;
        rows += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawListing;
    use crate::normalize::{NormalizedRecord, Normalizer};
    use crate::partition::Partition;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn captured() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
    }

    fn record(id: &str) -> NormalizedRecord {
        let raw = RawListing {
            identifier: Some(id.to_string()),
            ..Default::default()
        };
        Normalizer::default().normalize(&raw).unwrap()
    }

    fn result(label: &str, ids: &[String]) -> PartitionResult {
        PartitionResult {
            partition: Partition {
                label: label.to_string(),
                attribute: "price".to_string(),
                lower: 0,
                upper: None,
            },
            records: ids.iter().map(|id| record(id)).collect(),
        }
    }

    fn ids(label: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}-{}", label, i)).collect()
    }

    #[test]
    fn unit_carries_header_label_and_capture_date() {
        let tmp = TempDir::new().unwrap();
        let sink = CsvSink::new(tmp.path().join("out"), "bayut");

        let unit = sink
            .write(&result("price_0_20000", &ids("a", 2)), captured())
            .unwrap();

        assert_eq!(unit.rows, 2);
        assert_eq!(
            unit.path.file_name().unwrap().to_str().unwrap(),
            "bayut_listings_price_0_20000_2024-05-01.csv"
        );

        let mut reader = csv::Reader::from_path(&unit.path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, header());
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(&first[0], "a-0");
        assert_eq!(first.get(COLUMNS.len()), Some("2024-05-01 09:30:00"));
    }

    #[test]
    fn empty_partition_writes_header_only() {
        let tmp = TempDir::new().unwrap();
        let sink = CsvSink::new(tmp.path(), "listings");
        let unit = sink.write(&result("empty", &[]), captured()).unwrap();

        assert_eq!(unit.rows, 0);
        let content = fs::read_to_string(&unit.path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("objectID,"));
    }

    #[test]
    fn consolidation_concatenates_in_declaration_order() {
        let tmp = TempDir::new().unwrap();
        let sink = CsvSink::new(tmp.path(), "listings");

        let units: Vec<SinkUnit> = [("low", 5), ("mid", 0), ("high", 7)]
            .iter()
            .map(|(label, n)| sink.write(&result(label, &ids(label, *n)), captured()).unwrap())
            .collect();

        let dataset = sink.consolidate(&units, captured()).unwrap();
        assert_eq!(dataset.rows.len(), 12);
        assert_eq!(dataset.headers, header());
        assert_eq!(dataset.rows[0][0], "low-0");
        assert_eq!(dataset.rows[4][0], "low-4");
        assert_eq!(dataset.rows[5][0], "high-0");
        assert_eq!(
            dataset.path.file_name().unwrap().to_str().unwrap(),
            "listings-all_listings_2024-05-01.csv"
        );

        let written = csv::Reader::from_path(&dataset.path)
            .unwrap()
            .records()
            .count();
        assert_eq!(written, 12);
    }

    #[test]
    fn consolidating_nothing_fails() {
        let tmp = TempDir::new().unwrap();
        let sink = CsvSink::new(tmp.path(), "listings");
        assert!(matches!(
            sink.consolidate(&[], captured()),
            Err(SinkError::NoUnits)
        ));
    }

    #[test]
    fn mismatched_header_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let sink = CsvSink::new(tmp.path(), "listings");
        let good = sink.write(&result("good", &ids("g", 1)), captured()).unwrap();

        let odd_path = tmp.path().join("listings_listings_odd_2024-05-01.csv");
        fs::write(&odd_path, "id,price\n1,100\n").unwrap();
        let odd = SinkUnit {
            label: "odd".to_string(),
            path: odd_path.clone(),
            rows: 1,
        };

        match sink.consolidate(&[good, odd], captured()) {
            Err(SinkError::SchemaMismatch { path }) => assert_eq!(path, odd_path),
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn discovers_units_sorted_and_skips_consolidated_file() {
        let tmp = TempDir::new().unwrap();
        let sink = CsvSink::new(tmp.path(), "bayut");
        let units: Vec<SinkUnit> = ["b_band", "a_band"]
            .iter()
            .map(|label| sink.write(&result(label, &ids(label, 2)), captured()).unwrap())
            .collect();
        sink.consolidate(&units, captured()).unwrap();
        fs::write(tmp.path().join("other_listings_x_2024-05-01.csv"), "a\n").unwrap();

        let found = sink.discover_units(None).unwrap();
        let labels: Vec<&str> = found.iter().map(|u| u.label.as_str()).collect();
        assert_eq!(labels, vec!["a_band", "b_band"]);
        assert!(found.iter().all(|u| u.rows == 2));

        let other_day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert!(sink.discover_units(Some(other_day)).unwrap().is_empty());
    }

    #[test]
    fn missing_directory_has_no_units() {
        let tmp = TempDir::new().unwrap();
        let sink = CsvSink::new(tmp.path().join("absent"), "listings");
        assert!(sink.discover_units(None).unwrap().is_empty());
    }

    #[test]
    fn latest_unit_date_reads_file_name_suffixes() {
        let tmp = TempDir::new().unwrap();
        let sink = CsvSink::new(tmp.path(), "bayut");
        assert_eq!(sink.latest_unit_date().unwrap(), None);

        for name in [
            "bayut_listings_price_0_20000_2024-05-01.csv",
            "bayut_listings_price_20000_plus_2024-05-03.csv",
            "bayut_listings_price_0_20000_2024-05-02.csv",
            "other_listings_low_2024-06-01.csv",
        ] {
            fs::write(tmp.path().join(name), "objectID,scrape_date\n").unwrap();
        }

        assert_eq!(
            sink.latest_unit_date().unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 3)
        );
        let units = sink.discover_units(NaiveDate::from_ymd_opt(2024, 5, 3)).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].label, "price_20000_plus");
    }
}
