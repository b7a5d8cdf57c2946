use crate::ingestion::{LoanRecord, RecordSet};
use crate::schema::Dimension;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// What records are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Branch,
    Dimension(Dimension),
}

impl GroupKey {
    fn key_of<'r>(&self, record: &'r LoanRecord) -> Option<&'r str> {
        match self {
            Self::Branch => Some(record.branch.as_str()),
            Self::Dimension(d) => record.dimension(*d),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureStats {
    pub measure: String,
    pub sum: f64,
    /// Records that carried a value for this measure.
    pub count: usize,
    /// `None` when no record carried a value.
    pub mean: Option<f64>,
}

impl MeasureStats {
    fn empty(measure: &str) -> Self {
        Self {
            measure: measure.to_string(),
            sum: 0.0,
            count: 0,
            mean: None,
        }
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn finish(&mut self) {
        self.mean = (self.count > 0).then(|| self.sum / self.count as f64);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub key: String,
    pub records: usize,
    /// One entry per requested measure, in request order.
    pub measures: Vec<MeasureStats>,
}

impl AggregateRow {
    pub fn stats(&self, measure: &str) -> Option<&MeasureStats> {
        self.measures.iter().find(|m| m.measure == measure)
    }

    pub fn primary(&self) -> Option<&MeasureStats> {
        self.measures.first()
    }

    fn primary_sum(&self) -> f64 {
        self.primary().map(|m| m.sum).unwrap_or(0.0)
    }
}

/// Headline numbers over an aggregate table's primary measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub groups: usize,
    pub total: f64,
    pub count: usize,
    /// Mean of the per-group means.
    pub average_of_means: Option<f64>,
    /// `total / count` across all groups.
    pub overall_mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateTable {
    pub group_key: GroupKey,
    pub measures: Vec<String>,
    /// Sorted by primary measure sum descending, then key ascending.
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, key: &str) -> Option<&AggregateRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    pub fn primary_measure(&self) -> Option<&str> {
        self.measures.first().map(String::as_str)
    }

    pub fn top(&self, n: usize) -> &[AggregateRow] {
        &self.rows[..n.min(self.rows.len())]
    }

    pub fn summary(&self) -> Option<AggregateSummary> {
        if self.rows.is_empty() {
            return None;
        }

        let primaries: Vec<&MeasureStats> =
            self.rows.iter().filter_map(AggregateRow::primary).collect();
        let total: f64 = primaries.iter().map(|m| m.sum).sum();
        let count: usize = primaries.iter().map(|m| m.count).sum();
        let means: Vec<f64> = primaries.iter().filter_map(|m| m.mean).collect();

        Some(AggregateSummary {
            groups: self.rows.len(),
            total,
            count,
            average_of_means: (!means.is_empty())
                .then(|| means.iter().sum::<f64>() / means.len() as f64),
            overall_mean: (count > 0).then(|| total / count as f64),
        })
    }
}

/// Groups `records` by `group_key` and reduces each measure to sum, count and mean in
/// a single pass. Records without a key (for dimension grouping) are left out, and so
/// are groups in which no record carries the primary measure.
pub fn aggregate(records: &RecordSet, group_key: GroupKey, measures: &[&str]) -> AggregateTable {
    let mut groups: BTreeMap<&str, AggregateRow> = BTreeMap::new();

    for record in records {
        let Some(key) = group_key.key_of(record) else {
            continue;
        };

        let row = groups.entry(key).or_insert_with(|| AggregateRow {
            key: key.to_string(),
            records: 0,
            measures: measures.iter().map(|m| MeasureStats::empty(m)).collect(),
        });

        row.records += 1;
        for stats in row.measures.iter_mut() {
            if let Some(value) = record.amount(&stats.measure) {
                stats.add(value);
            }
        }
    }

    let mut rows: Vec<AggregateRow> = groups
        .into_values()
        .filter(|row| row.primary().is_some_and(|m| m.count > 0))
        .map(|mut row| {
            row.measures.iter_mut().for_each(MeasureStats::finish);
            row
        })
        .collect();

    rows.sort_by(|a, b| {
        b.primary_sum()
            .partial_cmp(&a.primary_sum())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });

    debug!(
        "Aggregated {} records into {} groups by {:?}",
        records.len(),
        rows.len(),
        group_key
    );

    AggregateTable {
        group_key,
        measures: measures.iter().map(|m| m.to_string()).collect(),
        rows,
    }
}

pub fn aggregate_by_branch(records: &RecordSet, measures: &[&str]) -> AggregateTable {
    aggregate(records, GroupKey::Branch, measures)
}

/// The `top_n` groups ranked by `measure`, e.g. the best collectors of the month.
pub fn leaderboard(
    records: &RecordSet,
    group_key: GroupKey,
    measure: &str,
    top_n: usize,
) -> Vec<AggregateRow> {
    let mut table = aggregate(records, group_key, &[measure]);
    table.rows.truncate(top_n);
    table.rows
}
