use crate::error::{ReportError, Result};
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};

/// Date layouts accepted for text date cells when a source does not name its own.
pub const DEFAULT_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%d/%m/%Y %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Returns `(year, month)` of the calendar month before the given one.
pub fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

pub fn first_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    validate_month(month)?;
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ReportError::DateError(format!("Year {} is out of range", year)))
}

pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    validate_month(month)?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| {
            ReportError::DateError(format!("No last day for {:04}-{:02}", year, month))
        })
}

/// Builds `year-month-day`, clamping `day` to the last valid day of that month.
pub fn clamped_date(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    let last = last_day_of_month(year, month)?;
    if day >= last.day() {
        return Ok(last);
    }
    NaiveDate::from_ymd_opt(year, month, day.max(1)).ok_or_else(|| {
        ReportError::DateError(format!(
            "Invalid date {:04}-{:02}-{:02}",
            year, month, day
        ))
    })
}

pub fn validate_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(ReportError::InvalidMonth(month));
    }
    Ok(())
}

/// Parses a text date cell, truncating any time component to the calendar day.
/// Returns `None` for blank or unrecognised text.
pub fn parse_date_text(text: &str, formats: &[String]) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let candidates: Vec<&str> = if formats.is_empty() {
        DEFAULT_DATE_FORMATS.to_vec()
    } else {
        formats.iter().map(String::as_str).collect()
    };

    for fmt in &candidates {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
    }

    None
}

/// Parses a monetary text cell such as `"1,250,000.50"`. Blank text is `Ok(None)`.
pub(crate) fn parse_amount_text(text: &str) -> std::result::Result<Option<f64>, ()> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Ok(None);
    }

    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(()),
    }
}
