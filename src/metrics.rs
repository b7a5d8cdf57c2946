use crate::aggregate::AggregateTable;
use crate::ingestion::RecordSet;
use crate::schema::PortfolioColumns;
use crate::targets::TargetTable;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementStatus {
    Measured,
    /// The target is zero or absent; the percentage is reported as 0.
    NoTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMetric {
    pub column: String,
    pub target: Option<f64>,
    /// `target - actual`. `None` when the branch has no value for this column.
    pub gap: Option<f64>,
    pub achievement_pct: f64,
    pub status: AchievementStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetComparison {
    pub branch: String,
    pub actual: f64,
    pub metrics: Vec<TargetMetric>,
}

impl TargetComparison {
    pub fn metric(&self, column: &str) -> Option<&TargetMetric> {
        self.metrics.iter().find(|m| m.column == column)
    }
}

/// `actual / target * 100` for a positive target, otherwise 0 flagged as `NoTarget`.
pub fn achievement(actual: f64, target: f64) -> (f64, AchievementStatus) {
    if target > 0.0 && actual.is_finite() {
        (actual / target * 100.0, AchievementStatus::Measured)
    } else {
        (0.0, AchievementStatus::NoTarget)
    }
}

fn target_metric(column: &str, actual: f64, target: Option<f64>) -> TargetMetric {
    match target {
        Some(target) => {
            let (achievement_pct, status) = achievement(actual, target);
            TargetMetric {
                column: column.to_string(),
                target: Some(target),
                gap: Some(target - actual),
                achievement_pct,
                status,
            }
        }
        None => TargetMetric {
            column: column.to_string(),
            target: None,
            gap: None,
            achievement_pct: 0.0,
            status: AchievementStatus::NoTarget,
        },
    }
}

/// Joins the table's primary measure with `targets`. Only branches present in both
/// appear, in the table's order.
pub fn derive(table: &AggregateTable, targets: &TargetTable) -> Vec<TargetComparison> {
    match table.primary_measure() {
        Some(measure) => derive_for(table, measure, targets),
        None => Vec::new(),
    }
}

pub fn derive_for(
    table: &AggregateTable,
    measure: &str,
    targets: &TargetTable,
) -> Vec<TargetComparison> {
    table
        .rows
        .iter()
        .filter_map(|row| {
            let values = targets.entry(&row.key)?;
            let actual = row.stats(measure).map(|s| s.sum).unwrap_or(0.0);
            let metrics = targets
                .columns
                .iter()
                .map(|column| target_metric(column, actual, values.get(column).copied()))
                .collect();

            Some(TargetComparison {
                branch: row.key.clone(),
                actual,
                metrics,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateStatus {
    Measured,
    /// Nothing was expected, so the rate is reported as 0.
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioKpis {
    pub loans: usize,
    pub disbursed: f64,
    pub repaid: f64,
    pub outstanding: f64,
    pub expected: f64,
    pub repayment_rate_pct: f64,
    pub rate_status: RateStatus,
}

pub fn portfolio_kpis(records: &RecordSet, columns: &PortfolioColumns) -> PortfolioKpis {
    let repaid = records.total(&columns.repaid);
    let expected = records.total(&columns.expected);

    let (repayment_rate_pct, rate_status) = if expected > 0.0 {
        (repaid / expected * 100.0, RateStatus::Measured)
    } else {
        (0.0, RateStatus::Undefined)
    };

    PortfolioKpis {
        loans: records.len(),
        disbursed: records.total(&columns.disbursed),
        repaid,
        outstanding: records.total(&columns.outstanding),
        expected,
        repayment_rate_pct,
        rate_status,
    }
}
