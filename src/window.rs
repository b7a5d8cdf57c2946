use crate::error::{ReportError, Result};
use crate::ingestion::RecordSet;
use crate::utils::{clamped_date, first_day_of_month, last_day_of_month, prev_month, validate_month};
use chrono::{Datelike, NaiveDate};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowKind {
    #[schemars(description = "From the first day of the reference month up to the reference date.")]
    CurrentMonth,

    #[schemars(description = "The whole calendar month containing the reference date.")]
    WholeCurrentMonth,

    #[schemars(
        description = "The last N distinct days that have activity in the data. Ignores the reference date."
    )]
    TrailingDays { days: u32 },

    #[schemars(
        description = "From the first of the previous month up to the reference day-of-month in that month (clamped to its last day)."
    )]
    SamePeriodLastMonth,

    #[schemars(description = "The whole previous calendar month.")]
    FullPriorMonth,

    #[schemars(description = "A named calendar month.")]
    CalendarMonth { year: i32, month: u32 },
}

impl WindowKind {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::CalendarMonth { month, .. } => validate_month(*month),
            Self::TrailingDays { days: 0 } => Err(ReportError::InvalidConfig(
                "Trailing window must cover at least one day".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Boundaries that only depend on the calendar. `None` for data-driven windows.
    pub fn calendar_window(&self, reference: NaiveDate) -> Result<Option<Window>> {
        let (year, month) = (reference.year(), reference.month());
        let window = match self {
            Self::CurrentMonth => Window::new(first_day_of_month(year, month)?, reference),
            Self::WholeCurrentMonth => {
                Window::new(first_day_of_month(year, month)?, last_day_of_month(year, month)?)
            }
            Self::SamePeriodLastMonth => {
                let (py, pm) = prev_month(year, month);
                Window::new(
                    first_day_of_month(py, pm)?,
                    clamped_date(py, pm, reference.day())?,
                )
            }
            Self::FullPriorMonth => {
                let (py, pm) = prev_month(year, month);
                Window::new(first_day_of_month(py, pm)?, last_day_of_month(py, pm)?)
            }
            Self::CalendarMonth { year, month } => Window::new(
                first_day_of_month(*year, *month)?,
                last_day_of_month(*year, *month)?,
            ),
            Self::TrailingDays { .. } => return Ok(None),
        };
        Ok(Some(window))
    }
}

/// Resolves windows against a single reference date and filters record sets by them.
pub struct TimeWindowFilter {
    reference_date: NaiveDate,
}

impl TimeWindowFilter {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self { reference_date }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    /// Computes the window for `kind`. Data-driven windows look at `date_column` in
    /// `records` and are `None` when nothing in the data carries that date.
    pub fn window_for(
        &self,
        kind: &WindowKind,
        records: &RecordSet,
        date_column: &str,
    ) -> Result<Option<Window>> {
        kind.validate()?;

        let window = match kind {
            WindowKind::TrailingDays { days } => {
                let active: BTreeSet<NaiveDate> =
                    records.iter().filter_map(|r| r.date(date_column)).collect();
                let end = active.iter().next_back().copied();
                let start = active.iter().rev().take(*days as usize).last().copied();
                start.zip(end).map(|(s, e)| Window::new(s, e))
            }
            _ => kind.calendar_window(self.reference_date)?,
        };

        if let Some(w) = &window {
            debug!(
                "Window {:?} on '{}' resolved to {} .. {}",
                kind, date_column, w.start, w.end
            );
        }

        Ok(window)
    }

    pub fn filter(
        &self,
        records: &RecordSet,
        date_column: &str,
        kind: &WindowKind,
    ) -> Result<RecordSet> {
        let filtered = match self.window_for(kind, records, date_column)? {
            Some(window) => filter_window(records, date_column, &window),
            None => RecordSet::default(),
        };
        Ok(filtered)
    }
}

/// Keeps the records whose `date_column` falls inside `window`. Records without that
/// date are always dropped.
pub fn filter_window(records: &RecordSet, date_column: &str, window: &Window) -> RecordSet {
    records.filtered(|r| r.date(date_column).is_some_and(|d| window.contains(d)))
}
