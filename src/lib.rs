//! # Branch Performance Report
//!
//! A library for turning per-loan disbursement and repayment files from several
//! business units into branch-level performance views.
//!
//! ## Core Concepts
//!
//! - **Sources**: Tabular files (CSV or spreadsheets) whose columns are mapped onto
//!   normalized [`LoanRecord`]s through a [`SourceSpec`]
//! - **Reference Data**: Branch code to name mappings and per-branch targets, passed in
//!   through [`ReportConfig`] rather than compiled into the pipeline
//! - **Windows**: Date ranges (current month, same period last month, trailing active
//!   days) resolved against one explicit reference date
//! - **Sections**: One view per business unit: branch totals, target achievement,
//!   daily trend, leaderboards and detail listings
//! - **Degrade gracefully**: A missing or unreadable file produces an empty section with
//!   a load status, never a failed report
//!
//! ## Example
//!
//! ```rust,ignore
//! use branch_performance_report::*;
//! use chrono::NaiveDate;
//!
//! let config = ReportConfig::builtin("data");
//! let report = process_report(&config, NaiveDate::from_ymd_opt(2025, 10, 15).unwrap())?;
//!
//! let section = report.section("logbook_disbursements").unwrap();
//! for comparison in &section.targets {
//!     let monthly = comparison.metric(MONTHLY_TARGET).unwrap();
//!     println!("{}: {:.1}%", comparison.branch, monthly.achievement_pct);
//! }
//! ```

pub mod aggregate;
pub mod error;
pub mod ingestion;
pub mod metrics;
pub mod report;
pub mod resolver;
pub mod schema;
pub mod targets;
pub mod trend;
pub mod utils;
pub mod window;

pub use aggregate::{
    aggregate, aggregate_by_branch, leaderboard, AggregateRow, AggregateSummary,
    AggregateTable, GroupKey, MeasureStats,
};
pub use error::{ReportError, Result};
pub use ingestion::{LoadOutcome, LoadStatus, LoanRecord, RecordLoader, RecordSet};
pub use metrics::{
    achievement, derive, derive_for, portfolio_kpis, AchievementStatus, PortfolioKpis,
    RateStatus, TargetComparison, TargetMetric,
};
pub use report::{
    detail_listing, PeriodKpiReport, Report, ReportBuilder, SectionReport, TrendComparison,
};
pub use resolver::{BranchIdentifier, IdentifierResolver};
pub use schema::*;
pub use targets::*;
pub use trend::{merge, trend, DailyTrend, MergedTrendPoint, TrendPoint, TrendStats};
pub use window::{filter_window, TimeWindowFilter, Window, WindowKind};

use chrono::NaiveDate;
use log::{debug, info};

pub struct ReportProcessor;

impl ReportProcessor {
    pub fn process(config: &ReportConfig, reference_date: NaiveDate) -> Result<Report> {
        config.validate()?;

        info!(
            "Processing report for {} ({} sources)",
            reference_date,
            config.sources.len()
        );

        let report = ReportBuilder::new(config, reference_date).build()?;

        for section in &report.sections {
            if !section.has_data() {
                debug!(
                    "Section '{}' has no data: {:?}",
                    section.name, section.load_status
                );
            }
        }

        Ok(report)
    }

    /// Same as [`ReportProcessor::process`] with already loaded sources.
    pub fn process_loaded(
        config: &ReportConfig,
        reference_date: NaiveDate,
        outcomes: &std::collections::BTreeMap<String, LoadOutcome>,
    ) -> Result<Report> {
        config.validate()?;
        ReportBuilder::new(config, reference_date).build_with(outcomes)
    }
}

pub fn process_report(config: &ReportConfig, reference_date: NaiveDate) -> Result<Report> {
    ReportProcessor::process(config, reference_date)
}

/// Builds the report against today's local date.
pub fn process_report_today(config: &ReportConfig) -> Result<Report> {
    ReportProcessor::process(config, chrono::Local::now().date_naive())
}
