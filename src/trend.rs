use crate::ingestion::RecordSet;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Per-day totals in ascending date order. Days without activity are absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyTrend {
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    pub average_daily: f64,
    pub peak: TrendPoint,
    /// Days whose total is above zero.
    pub active_days: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergedTrendPoint {
    pub date: NaiveDate,
    pub first: f64,
    pub second: f64,
}

impl DailyTrend {
    pub fn from_points(points: BTreeMap<NaiveDate, f64>) -> Self {
        Self {
            points: points
                .into_iter()
                .map(|(date, value)| TrendPoint { date, value })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn value_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].value)
    }

    /// The most recent `n` points.
    pub fn tail(&self, n: usize) -> DailyTrend {
        let skip = self.points.len().saturating_sub(n);
        Self {
            points: self.points[skip..].to_vec(),
        }
    }

    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.value).sum()
    }

    pub fn stats(&self) -> Option<TrendStats> {
        let peak = self
            .points
            .iter()
            .copied()
            .reduce(|best, p| if p.value > best.value { p } else { best })?;

        Some(TrendStats {
            average_daily: self.total() / self.points.len() as f64,
            peak,
            active_days: self.points.iter().filter(|p| p.value > 0.0).count(),
        })
    }
}

/// Sums `measure_column` per calendar day of `date_column`. Records missing either are
/// skipped.
pub fn trend(records: &RecordSet, date_column: &str, measure_column: &str) -> DailyTrend {
    let mut days: BTreeMap<NaiveDate, f64> = BTreeMap::new();

    for record in records {
        if let (Some(date), Some(value)) = (record.date(date_column), record.amount(measure_column))
        {
            *days.entry(date).or_insert(0.0) += value;
        }
    }

    DailyTrend::from_points(days)
}

/// Lines two series up on the union of their dates, filling absent days with zero.
pub fn merge(first: &DailyTrend, second: &DailyTrend) -> Vec<MergedTrendPoint> {
    let mut merged: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();

    for p in &first.points {
        merged.entry(p.date).or_insert((0.0, 0.0)).0 += p.value;
    }
    for p in &second.points {
        merged.entry(p.date).or_insert((0.0, 0.0)).1 += p.value;
    }

    merged
        .into_iter()
        .map(|(date, (first, second))| MergedTrendPoint {
            date,
            first,
            second,
        })
        .collect()
}
