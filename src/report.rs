use crate::aggregate::{
    aggregate_by_branch, leaderboard, AggregateRow, AggregateSummary, AggregateTable,
};
use crate::error::{ReportError, Result};
use crate::ingestion::{LoadOutcome, LoadStatus, LoanRecord, RecordLoader, RecordSet};
use crate::metrics::{derive, portfolio_kpis, PortfolioKpis, TargetComparison};
use crate::resolver::IdentifierResolver;
use crate::schema::{PortfolioSpec, ReportConfig, SectionSpec};
use crate::targets::TargetRegistry;
use crate::trend::{merge, trend, DailyTrend, MergedTrendPoint, TrendStats};
use crate::window::{filter_window, TimeWindowFilter, Window, WindowKind};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionReport {
    pub name: String,
    pub source: String,
    pub load_status: LoadStatus,
    pub window: Option<Window>,
    pub aggregate: AggregateTable,
    pub summary: Option<AggregateSummary>,
    /// Empty when the section has no target table or no branch has a target.
    pub targets: Vec<TargetComparison>,
    pub trend_window: Option<Window>,
    pub trend: DailyTrend,
    pub trend_stats: Option<TrendStats>,
    pub leaderboard: Vec<AggregateRow>,
    pub details: Vec<LoanRecord>,
}

impl SectionReport {
    pub fn has_data(&self) -> bool {
        !self.aggregate.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendComparison {
    pub name: String,
    pub first: String,
    pub second: String,
    pub points: Vec<MergedTrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodKpiReport {
    pub load_status: LoadStatus,
    pub same_period_window: Window,
    pub same_period: PortfolioKpis,
    pub prior_month_window: Window,
    pub prior_month: PortfolioKpis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub reference_date: NaiveDate,
    pub sections: Vec<SectionReport>,
    pub comparisons: Vec<TrendComparison>,
    pub portfolio: Option<PeriodKpiReport>,
}

impl Report {
    pub fn section(&self, name: &str) -> Option<&SectionReport> {
        self.sections.iter().find(|s| s.name == name)
    }
}

/// Runs the whole pipeline for one refresh. Nothing is kept between builds.
pub struct ReportBuilder<'a> {
    config: &'a ReportConfig,
    resolver: IdentifierResolver,
    targets: TargetRegistry,
    filter: TimeWindowFilter,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(config: &'a ReportConfig, reference_date: NaiveDate) -> Self {
        Self {
            config,
            resolver: IdentifierResolver::from_reference(&config.reference),
            targets: TargetRegistry::from_reference(&config.reference),
            filter: TimeWindowFilter::new(reference_date),
        }
    }

    pub fn resolver(&self) -> &IdentifierResolver {
        &self.resolver
    }

    pub fn load_sources(&self) -> BTreeMap<String, LoadOutcome> {
        let mut loader = RecordLoader::new(&self.resolver);
        if let Some(dir) = &self.config.data_dir {
            loader = loader.with_base_dir(dir);
        }

        self.config
            .sources
            .iter()
            .map(|spec| (spec.name.clone(), loader.load(spec)))
            .collect()
    }

    pub fn build(&self) -> Result<Report> {
        let outcomes = self.load_sources();
        self.build_with(&outcomes)
    }

    /// Builds every configured view from already loaded sources. A source with no
    /// outcome is treated as missing.
    pub fn build_with(&self, outcomes: &BTreeMap<String, LoadOutcome>) -> Result<Report> {
        info!(
            "Building report for {} with {} sections",
            self.filter.reference_date(),
            self.config.sections.len()
        );

        let missing = |name: &str| LoadOutcome::Missing(name.into());

        let mut sections = Vec::with_capacity(self.config.sections.len());
        for spec in &self.config.sections {
            let outcome = outcomes
                .get(&spec.source)
                .cloned()
                .unwrap_or_else(|| missing(spec.source.as_str()));
            sections.push(self.build_section(spec, &outcome)?);
        }

        let mut comparisons = Vec::new();
        for comparison in &self.config.comparisons {
            let first = sections.iter().find(|s| s.name == comparison.first);
            let second = sections.iter().find(|s| s.name == comparison.second);
            match first.zip(second) {
                Some((a, b)) => comparisons.push(TrendComparison {
                    name: comparison.name.clone(),
                    first: a.name.clone(),
                    second: b.name.clone(),
                    points: merge(&a.trend, &b.trend),
                }),
                None => warn!(
                    "Comparison '{}' skipped: section not built",
                    comparison.name
                ),
            }
        }

        let portfolio = match &self.config.portfolio {
            Some(spec) => {
                let outcome = outcomes
                    .get(&spec.source)
                    .cloned()
                    .unwrap_or_else(|| missing(spec.source.as_str()));
                Some(self.build_portfolio(spec, &outcome)?)
            }
            None => None,
        };

        Ok(Report {
            reference_date: self.filter.reference_date(),
            sections,
            comparisons,
            portfolio,
        })
    }

    pub fn build_section(
        &self,
        spec: &SectionSpec,
        outcome: &LoadOutcome,
    ) -> Result<SectionReport> {
        let records = outcome.records().scoped(&spec.scope);
        let measures: Vec<&str> = spec.measures.iter().map(String::as_str).collect();
        let primary = spec.primary_measure().ok_or_else(|| {
            ReportError::InvalidConfig(format!("Section '{}' has no measures", spec.name))
        })?;

        let (window, windowed) =
            self.apply_window(spec.window.as_ref(), &records, &spec.date_column)?;

        let aggregate = aggregate_by_branch(&windowed, &measures);
        let summary = aggregate.summary();

        let targets = match &spec.target_table {
            Some(name) => match self.targets.table(name) {
                Some(table) => derive(&aggregate, table),
                None => {
                    warn!("Section '{}': unknown target table '{}'", spec.name, name);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let (trend_window, trend_records) = match &spec.trend_window {
            Some(kind) => self.apply_window(Some(kind), &records, &spec.date_column)?,
            None => (window, windowed.clone()),
        };
        let trend = trend(&trend_records, &spec.date_column, primary);
        let trend_stats = trend.stats();

        let leaderboard = match &spec.leaderboard {
            Some(lb) => {
                let measure = lb.measure.as_deref().unwrap_or(primary);
                leaderboard(&windowed, lb.group_key, measure, lb.top_n)
            }
            None => Vec::new(),
        };

        let details = if spec.detail_listing {
            detail_listing(&windowed, primary)
        } else {
            Vec::new()
        };

        debug!(
            "Section '{}': {} of {} records in window, {} groups, {} target rows, {} trend days",
            spec.name,
            windowed.len(),
            records.len(),
            aggregate.len(),
            targets.len(),
            trend.len()
        );

        Ok(SectionReport {
            name: spec.name.clone(),
            source: spec.source.clone(),
            load_status: outcome.status(),
            window,
            aggregate,
            summary,
            targets,
            trend_window,
            trend,
            trend_stats,
            leaderboard,
            details,
        })
    }

    pub fn build_portfolio(
        &self,
        spec: &PortfolioSpec,
        outcome: &LoadOutcome,
    ) -> Result<PeriodKpiReport> {
        let records = outcome.records().scoped(&spec.scope);

        let same_period_window = self.calendar_window(&WindowKind::SamePeriodLastMonth)?;
        let prior_month_window = self.calendar_window(&WindowKind::FullPriorMonth)?;

        let same_period = filter_window(&records, &spec.date_column, &same_period_window);
        let prior_month = filter_window(&records, &spec.date_column, &prior_month_window);

        Ok(PeriodKpiReport {
            load_status: outcome.status(),
            same_period_window,
            same_period: portfolio_kpis(&same_period, &spec.columns),
            prior_month_window,
            prior_month: portfolio_kpis(&prior_month, &spec.columns),
        })
    }

    fn apply_window(
        &self,
        kind: Option<&WindowKind>,
        records: &RecordSet,
        date_column: &str,
    ) -> Result<(Option<Window>, RecordSet)> {
        match kind {
            Some(kind) => {
                let window = self.filter.window_for(kind, records, date_column)?;
                let filtered = match &window {
                    Some(w) => filter_window(records, date_column, w),
                    None => RecordSet::default(),
                };
                Ok((window, filtered))
            }
            None => Ok((None, records.clone())),
        }
    }

    fn calendar_window(&self, kind: &WindowKind) -> Result<Window> {
        kind.calendar_window(self.filter.reference_date())?
            .ok_or_else(|| ReportError::DateError(format!("{:?} is not a calendar window", kind)))
    }
}

/// The records ordered by `measure`, largest first. Records without the measure go last.
pub fn detail_listing(records: &RecordSet, measure: &str) -> Vec<LoanRecord> {
    let mut listing: Vec<LoanRecord> = records.iter().cloned().collect();
    listing.sort_by(|a, b| match (a.amount(measure), b.amount(measure)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BranchScope, Dimension};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn zidisha_records() -> RecordSet {
        let loan = |branch: &str, disbursed: NaiveDate, principal: f64, officer: &str| {
            LoanRecord::new(branch)
                .with_date("disbursed", disbursed)
                .with_date("maturity", disbursed + chrono::Days::new(30))
                .with_amount("principal", principal)
                .with_amount("repaid", principal / 2.0)
                .with_amount("outstanding", principal / 2.0)
                .with_amount("expected", principal)
                .with_dimension(Dimension::LoanOfficer, officer)
        };

        vec![
            loan("Kiambu Branch", date(2025, 10, 2), 100_000.0, "Jane"),
            loan("Kiambu Branch", date(2025, 10, 9), 50_000.0, "Jane"),
            loan("Thika Branch", date(2025, 10, 3), 80_000.0, "Paul"),
            loan("Advans Branch", date(2025, 10, 4), 500_000.0, "Ann"),
            loan("Thika Branch", date(2025, 9, 10), 70_000.0, "Paul"),
            loan("Thika Branch", date(2025, 9, 25), 30_000.0, "Paul"),
        ]
        .into_iter()
        .collect()
    }

    fn outcomes() -> BTreeMap<String, LoadOutcome> {
        BTreeMap::from([(
            "zidisha".to_string(),
            LoadOutcome::Loaded(zidisha_records()),
        )])
    }

    #[test]
    fn test_current_month_section_excludes_advans() {
        let config = ReportConfig::builtin("unused");
        let builder = ReportBuilder::new(&config, date(2025, 10, 15));
        let spec = config.section("zidisha_disbursements").unwrap();

        let section = builder
            .build_section(spec, &LoadOutcome::Loaded(zidisha_records()))
            .unwrap();

        assert_eq!(section.window, Some(Window::new(date(2025, 10, 1), date(2025, 10, 15))));
        assert!(section.aggregate.row("Advans Branch").is_none());
        assert_eq!(section.aggregate.rows[0].key, "Kiambu Branch");
        assert_eq!(section.summary.as_ref().unwrap().total, 230_000.0);
        assert_eq!(section.trend.len(), 3);
        assert_eq!(section.leaderboard[0].key, "Jane");
        assert!(section.targets.is_empty());
    }

    #[test]
    fn test_collections_cover_the_whole_maturity_month() {
        let config = ReportConfig::builtin("unused");
        let builder = ReportBuilder::new(&config, date(2025, 10, 15));
        let spec = config.section("zidisha_collections").unwrap();

        let section = builder
            .build_section(spec, &LoadOutcome::Loaded(zidisha_records()))
            .unwrap();

        assert_eq!(section.window, Some(Window::new(date(2025, 10, 1), date(2025, 10, 31))));
        // Thika loans maturing on 2025-10-10 and 2025-10-25
        assert_eq!(section.summary.as_ref().unwrap().total, 35_000.0 + 15_000.0);
    }

    #[test]
    fn test_advans_section_lists_details() {
        let config = ReportConfig::builtin("unused");
        let builder = ReportBuilder::new(&config, date(2025, 10, 15));
        let spec = config.section("advans_disbursements").unwrap();

        let section = builder
            .build_section(spec, &LoadOutcome::Loaded(zidisha_records()))
            .unwrap();
        assert_eq!(section.aggregate.len(), 1);
        assert_eq!(section.details.len(), 1);
        assert_eq!(section.details[0].branch, "Advans Branch");
    }

    #[test]
    fn test_portfolio_periods() {
        let config = ReportConfig::builtin("unused");
        let report = ReportBuilder::new(&config, date(2025, 10, 15))
            .build_with(&outcomes())
            .unwrap();

        let portfolio = report.portfolio.unwrap();
        assert_eq!(
            portfolio.same_period_window,
            Window::new(date(2025, 9, 1), date(2025, 9, 15))
        );
        assert_eq!(portfolio.same_period.disbursed, 70_000.0);
        assert_eq!(portfolio.prior_month.disbursed, 100_000.0);
        assert!((portfolio.prior_month.repayment_rate_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_sources_give_empty_sections() {
        let config = ReportConfig::builtin("unused");
        let report = ReportBuilder::new(&config, date(2025, 10, 15))
            .build_with(&BTreeMap::new())
            .unwrap();

        assert_eq!(report.sections.len(), config.sections.len());
        for section in &report.sections {
            assert!(!section.has_data());
            assert!(section.trend.is_empty());
            assert!(matches!(section.load_status, LoadStatus::Missing { .. }));
        }
        assert_eq!(report.comparisons.len(), 1);
        assert!(report.comparisons[0].points.is_empty());
    }

    #[test]
    fn test_detail_listing_order() {
        let set: RecordSet = vec![
            LoanRecord::new("A").with_amount("principal", 5.0),
            LoanRecord::new("B"),
            LoanRecord::new("C").with_amount("principal", 9.0),
        ]
        .into_iter()
        .collect();
        let branches: Vec<String> = detail_listing(&set, "principal")
            .into_iter()
            .map(|r| r.branch)
            .collect();
        assert_eq!(branches, vec!["C", "A", "B"]);
    }

    #[test]
    fn test_scope_only_on_unknown_branch_is_empty() {
        let mut config = ReportConfig::builtin("unused");
        config.sections[2].scope = BranchScope::Only {
            branch: "Nowhere".to_string(),
        };
        let builder = ReportBuilder::new(&config, date(2025, 10, 15));
        let section = builder
            .build_section(&config.sections[2], &LoadOutcome::Loaded(zidisha_records()))
            .unwrap();
        assert!(!section.has_data());
        assert!(section.summary.is_none());
        assert!(section.trend_stats.is_none());
    }
}
