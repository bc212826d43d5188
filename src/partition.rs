//! Partition planning over a monotonic numeric attribute.
//!
//! Sources cap how many results a single query can page through. Splitting
//! the query space into narrow price bands keeps each band under that cap.
//! A plan is pure data: half-open intervals `[lower, upper)` that must cover
//! `[0, ∞)` exactly once, ending in an open band that catches outliers.

use std::collections::HashSet;
use std::fmt;
use tracing::warn;

use crate::error::PlanError;

/// One slice of the query space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub label: String,
    pub attribute: String,
    /// Inclusive lower bound.
    pub lower: u64,
    /// Exclusive upper bound; `None` is open-ended.
    pub upper: Option<u64>,
}

impl Partition {
    /// Whether `value` falls inside this band.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower as f64 && self.upper.map_or(true, |u| value < u as f64)
    }

    /// Filter expression for the search API, e.g. `price >= 20000 AND price < 35000`.
    pub fn predicate(&self) -> String {
        let attr = &self.attribute;
        match (self.lower, self.upper) {
            (0, Some(upper)) => format!("{attr} < {upper}"),
            (lower, Some(upper)) => format!("{attr} >= {lower} AND {attr} < {upper}"),
            (lower, None) => format!("{attr} >= {lower}"),
        }
    }

    /// `base AND (predicate)`, or just the predicate when `base` is empty.
    pub fn combined_filter(&self, base: &str) -> String {
        if base.trim().is_empty() {
            self.predicate()
        } else {
            format!("{} AND {}", base, self.predicate())
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upper {
            Some(upper) => write!(f, "{} [{}, {})", self.label, self.lower, upper),
            None => write!(f, "{} [{}, ∞)", self.label, self.lower),
        }
    }
}

/// Ordered, validated set of partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    partitions: Vec<Partition>,
}

impl PartitionPlan {
    /// Wrap `partitions` after checking they tile `[0, ∞)`.
    pub fn new(partitions: Vec<Partition>) -> Result<Self, PlanError> {
        let plan = Self { partitions };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        let first = self.partitions.first().ok_or(PlanError::Empty)?;
        if first.lower != 0 {
            return Err(PlanError::DoesNotStartAtZero(first.lower));
        }

        let mut labels = HashSet::new();
        for (i, partition) in self.partitions.iter().enumerate() {
            if !labels.insert(partition.label.as_str()) {
                return Err(PlanError::DuplicateLabel(partition.label.clone()));
            }
            let is_last = i + 1 == self.partitions.len();
            match partition.upper {
                None if !is_last => return Err(PlanError::OpenBandNotLast(partition.label.clone())),
                Some(_) if is_last => {
                    return Err(PlanError::MissingOpenBand(partition.label.clone()))
                }
                Some(upper) if upper <= partition.lower => {
                    return Err(PlanError::EmptyBand(partition.label.clone()))
                }
                _ => {}
            }
        }

        for pair in self.partitions.windows(2) {
            if pair[0].upper != Some(pair[1].lower) {
                return Err(PlanError::NotContiguous {
                    left: pair[0].label.clone(),
                    right: pair[1].label.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Partition> {
        self.partitions.iter()
    }

    /// The partition that owns `value`.
    pub fn locate(&self, value: f64) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.contains(value))
    }
}

impl<'a> IntoIterator for &'a PartitionPlan {
    type Item = &'a Partition;
    type IntoIter = std::slice::Iter<'a, Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.iter()
    }
}

/// Builds plans for one attribute.
#[derive(Debug, Clone)]
pub struct Planner {
    attribute: String,
}

impl Planner {
    pub fn new(attribute: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
        }
    }

    /// `[0,b1) [b1,b2) … [bn,∞)` with generated labels.
    pub fn split_at(&self, bounds: &[u64]) -> Result<PartitionPlan, PlanError> {
        check_ascending(bounds)?;
        let labels = band_edges(bounds)
            .map(|(lower, upper)| match upper {
                Some(upper) => format!("{}_{}_{}", self.attribute, lower, upper),
                None => format!("{}_{}_plus", self.attribute, lower),
            })
            .collect::<Vec<_>>();
        self.build(bounds, labels)
    }

    /// Same as [`split_at`](Self::split_at) with caller-chosen labels.
    pub fn split_labeled(
        &self,
        bounds: &[u64],
        labels: &[String],
    ) -> Result<PartitionPlan, PlanError> {
        check_ascending(bounds)?;
        if labels.len() != bounds.len() + 1 {
            return Err(PlanError::LabelCount {
                expected: bounds.len() + 1,
                actual: labels.len(),
            });
        }
        self.build(bounds, labels.to_vec())
    }

    /// Derive bounds from an expected distribution.
    ///
    /// `histogram` holds `(lower_edge, expected_count)` buckets in ascending
    /// edge order, the first starting at 0 and the last open-ended. Adjacent
    /// buckets are merged while the running count stays within `ceiling`. A
    /// single bucket above the ceiling cannot be split and becomes its own
    /// band.
    pub fn split_by_histogram(
        &self,
        histogram: &[(u64, u64)],
        ceiling: u64,
    ) -> Result<PartitionPlan, PlanError> {
        let (first_edge, _) = histogram.first().ok_or(PlanError::Empty)?;
        if *first_edge != 0 {
            return Err(PlanError::DoesNotStartAtZero(*first_edge));
        }

        let mut bounds = Vec::new();
        let mut running = 0u64;
        for (i, &(edge, count)) in histogram.iter().enumerate() {
            if i > 0 && running > 0 && running.saturating_add(count) > ceiling {
                bounds.push(edge);
                running = 0;
            }
            if count > ceiling {
                warn!(
                    edge,
                    count, ceiling, "bucket exceeds the per-query ceiling and cannot be split"
                );
            }
            running = running.saturating_add(count);
        }

        self.split_at(&bounds)
    }

    fn build(&self, bounds: &[u64], labels: Vec<String>) -> Result<PartitionPlan, PlanError> {
        let partitions = band_edges(bounds)
            .zip(labels)
            .map(|((lower, upper), label)| Partition {
                label,
                attribute: self.attribute.clone(),
                lower,
                upper,
            })
            .collect();
        PartitionPlan::new(partitions)
    }
}

fn check_ascending(bounds: &[u64]) -> Result<(), PlanError> {
    let mut previous = 0u64;
    for &bound in bounds {
        if bound <= previous {
            return Err(PlanError::UnsortedBounds(bound, previous));
        }
        previous = bound;
    }
    Ok(())
}

fn band_edges(bounds: &[u64]) -> impl Iterator<Item = (u64, Option<u64>)> + '_ {
    let lowers = std::iter::once(0).chain(bounds.iter().copied());
    let uppers = bounds.iter().copied().map(Some).chain(std::iter::once(None));
    lowers.zip(uppers)
}
