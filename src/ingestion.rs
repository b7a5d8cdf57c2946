//! Reading business-unit files into normalized loan records.
//!
//! Every source is read into a [`Table`] of cells first, then mapped onto
//! [`LoanRecord`]s through its [`SourceSpec`]. Branch identifiers are resolved to
//! canonical names at this point, so later stages only ever see branch names.

use crate::error::{ReportError, Result};
use crate::resolver::{BranchIdentifier, IdentifierResolver};
use crate::schema::{BranchColumnKind, BranchScope, Dimension, SourceFormat, SourceSpec};
use crate::utils::{parse_amount_text, parse_date_text};
use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::{Days, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One disbursement or repayment row after column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub branch: String,
    /// Only dates that were present and parseable.
    pub dates: BTreeMap<String, NaiveDate>,
    /// Only amounts that were present.
    pub amounts: BTreeMap<String, f64>,
    pub dimensions: BTreeMap<Dimension, String>,
}

impl LoanRecord {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            dates: BTreeMap::new(),
            amounts: BTreeMap::new(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn with_date(mut self, column: &str, date: NaiveDate) -> Self {
        self.dates.insert(column.to_string(), date);
        self
    }

    pub fn with_amount(mut self, column: &str, amount: f64) -> Self {
        self.amounts.insert(column.to_string(), amount);
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension, value: impl Into<String>) -> Self {
        self.dimensions.insert(dimension, value.into());
        self
    }

    pub fn date(&self, column: &str) -> Option<NaiveDate> {
        self.dates.get(column).copied()
    }

    pub fn amount(&self, column: &str) -> Option<f64> {
        self.amounts.get(column).copied()
    }

    pub fn dimension(&self, dimension: Dimension) -> Option<&str> {
        self.dimensions.get(&dimension).map(String::as_str)
    }
}

/// A read-only snapshot of loan records in file order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RecordSet {
    records: Vec<LoanRecord>,
}

impl RecordSet {
    pub fn new(records: Vec<LoanRecord>) -> Self {
        Self { records }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoanRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn as_slice(&self) -> &[LoanRecord] {
        &self.records
    }

    pub fn filtered<F>(&self, mut keep: F) -> RecordSet
    where
        F: FnMut(&LoanRecord) -> bool,
    {
        self.records.iter().filter(|r| keep(r)).cloned().collect()
    }

    pub fn scoped(&self, scope: &BranchScope) -> RecordSet {
        match scope {
            BranchScope::All => self.clone(),
            _ => self.filtered(|r| scope.admits(&r.branch)),
        }
    }

    pub fn total(&self, measure: &str) -> f64 {
        self.records.iter().filter_map(|r| r.amount(measure)).sum()
    }
}

impl FromIterator<LoanRecord> for RecordSet {
    fn from_iter<I: IntoIterator<Item = LoanRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a LoanRecord;
    type IntoIter = std::slice::Iter<'a, LoanRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// The result of loading a source. Loading never fails outright: a missing or broken
/// file still yields an (empty) record set, and the variant says why.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(RecordSet),
    /// The file was read but held no data rows.
    Empty,
    Missing(PathBuf),
    Malformed(String),
}

impl LoadOutcome {
    pub fn records(&self) -> RecordSet {
        match self {
            Self::Loaded(records) => records.clone(),
            _ => RecordSet::default(),
        }
    }

    pub fn into_records(self) -> RecordSet {
        match self {
            Self::Loaded(records) => records,
            _ => RecordSet::default(),
        }
    }

    pub fn has_data(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn status(&self) -> LoadStatus {
        match self {
            Self::Loaded(records) => LoadStatus::Loaded {
                rows: records.len(),
            },
            Self::Empty => LoadStatus::Empty,
            Self::Missing(path) => LoadStatus::Missing {
                path: path.display().to_string(),
            },
            Self::Malformed(reason) => LoadStatus::Malformed {
                reason: reason.clone(),
            },
        }
    }
}

/// Serializable summary of a [`LoadOutcome`] for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    Loaded { rows: usize },
    Empty,
    Missing { path: String },
    Malformed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    /// A spreadsheet error value such as `#N/A`, or a date cell that could not be read.
    Error(String),
}

impl Cell {
    fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            Self::Empty
        } else {
            Self::Text(text.to_string())
        }
    }

    fn from_spreadsheet(cell: &Data) -> Self {
        match cell {
            Data::Empty => Self::Empty,
            Data::String(s) => Self::from_text(s),
            Data::Float(f) => Self::Number(*f),
            Data::Int(i) => Self::Number(*i as f64),
            Data::Bool(b) => Self::Text(b.to_string()),
            Data::DateTime(_) | Data::DateTimeIso(_) => cell
                .as_date()
                .map(Self::Date)
                .unwrap_or_else(|| Self::Error(cell.to_string())),
            Data::DurationIso(s) => Self::from_text(s),
            Data::Error(e) => Self::Error(e.to_string()),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Raw tabular content: a header row and data rows of cells.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn column_index(&self, header: &str) -> Option<usize> {
        let header = header.trim();
        self.headers.iter().position(|h| h.trim() == header)
    }
}

pub fn read_table(path: &Path, format: SourceFormat, sheet: Option<&str>) -> Result<Table> {
    if !path.exists() {
        return Err(ReportError::MissingSource(path.display().to_string()));
    }

    match format {
        SourceFormat::Delimited => read_delimited(path),
        SourceFormat::Spreadsheet => read_spreadsheet(path, sheet),
    }
}

fn read_delimited(path: &Path) -> Result<Table> {
    let delimiter = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)?;

    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<Cell> = record.iter().map(Cell::from_text).collect();
        if row.iter().all(Cell::is_empty) {
            continue;
        }
        rows.push(row);
    }

    Ok(Table { headers, rows })
}

fn read_spreadsheet(path: &Path, sheet: Option<&str>) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ReportError::MissingSheet("<first sheet>".to_string()))?,
    };

    if !workbook.sheet_names().contains(&sheet_name) {
        return Err(ReportError::MissingSheet(sheet_name));
    }

    let range = workbook.worksheet_range(&sheet_name)?;
    let mut rows_iter = range.rows();

    let headers = match rows_iter.next() {
        Some(header_row) => header_row
            .iter()
            .map(|c| match Cell::from_spreadsheet(c) {
                Cell::Text(t) => t,
                Cell::Number(n) => n.to_string(),
                Cell::Date(d) => d.to_string(),
                Cell::Error(e) => e,
                Cell::Empty => String::new(),
            })
            .collect(),
        None => Vec::new(),
    };

    let rows = rows_iter
        .map(|r| r.iter().map(Cell::from_spreadsheet).collect::<Vec<_>>())
        .filter(|r| !r.iter().all(Cell::is_empty))
        .collect();

    Ok(Table { headers, rows })
}

/// Converts an Excel serial day number (1900 date system) to a date.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.floor() as u64))
}

struct ColumnMap {
    branch: usize,
    dates: Vec<(String, usize)>,
    measures: Vec<(String, usize)>,
    dimensions: Vec<(Dimension, usize)>,
}

impl ColumnMap {
    fn locate(spec: &SourceSpec, table: &Table) -> Result<Self> {
        let require = |header: &str| {
            table
                .column_index(header)
                .ok_or_else(|| ReportError::MissingColumn {
                    source_name: spec.name.clone(),
                    column: header.to_string(),
                })
        };

        let branch = require(&spec.branch_column)?;

        let dates = spec
            .date_columns
            .iter()
            .map(|(field, header)| Ok((field.clone(), require(header)?)))
            .collect::<Result<Vec<_>>>()?;

        let measures = spec
            .measure_columns
            .iter()
            .map(|(field, header)| Ok((field.clone(), require(header)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut dimensions = Vec::new();
        for (dimension, header) in &spec.dimension_columns {
            match table.column_index(header) {
                Some(idx) => dimensions.push((*dimension, idx)),
                None => warn!(
                    "Source '{}' has no '{}' column; {:?} will be unavailable",
                    spec.name, header, dimension
                ),
            }
        }

        Ok(Self {
            branch,
            dates,
            measures,
            dimensions,
        })
    }
}

static EMPTY_CELL: Cell = Cell::Empty;

/// Maps table rows onto loan records. Any unparseable amount rejects the whole table.
pub fn table_to_records(
    table: &Table,
    spec: &SourceSpec,
    resolver: &IdentifierResolver,
) -> Result<RecordSet> {
    let columns = ColumnMap::locate(spec, table)?;
    let mut records = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;

    for (row_idx, row) in table.rows.iter().enumerate() {
        let cell = |idx: usize| row.get(idx).unwrap_or(&EMPTY_CELL);

        let branch = match branch_name(cell(columns.branch), spec.branch_kind, resolver) {
            Some(name) => name,
            None => {
                skipped += 1;
                continue;
            }
        };

        let mut record = LoanRecord::new(branch);

        for (field, idx) in &columns.dates {
            let date = match cell(*idx) {
                Cell::Date(d) => Some(*d),
                Cell::Text(t) => parse_date_text(t, &spec.date_formats),
                Cell::Number(n) => excel_serial_to_date(*n),
                Cell::Empty | Cell::Error(_) => None,
            };
            if let Some(date) = date {
                record.dates.insert(field.clone(), date);
            }
        }

        for (field, idx) in &columns.measures {
            let invalid = |value: String| ReportError::InvalidAmount {
                column: spec.measure_columns[field].clone(),
                // header is row 1
                row: row_idx + 2,
                value,
            };
            let amount = match cell(*idx) {
                Cell::Number(n) => Some(*n),
                Cell::Text(t) => parse_amount_text(t).map_err(|_| invalid(t.clone()))?,
                Cell::Date(d) => return Err(invalid(d.to_string())),
                Cell::Error(e) => return Err(invalid(e.clone())),
                Cell::Empty => None,
            };
            if let Some(amount) = amount {
                record.amounts.insert(field.clone(), amount);
            }
        }

        for (dimension, idx) in &columns.dimensions {
            let value = match cell(*idx) {
                Cell::Text(t) => Some(t.clone()),
                Cell::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
                Cell::Number(n) => Some(n.to_string()),
                Cell::Date(d) => Some(d.to_string()),
                Cell::Empty | Cell::Error(_) => None,
            };
            if let Some(value) = value {
                record.dimensions.insert(*dimension, value);
            }
        }

        records.push(record);
    }

    if skipped > 0 {
        warn!(
            "Source '{}': skipped {} row(s) without a branch",
            spec.name, skipped
        );
    }

    Ok(RecordSet::new(records))
}

fn branch_name(cell: &Cell, kind: BranchColumnKind, resolver: &IdentifierResolver) -> Option<String> {
    match (cell, kind) {
        (Cell::Empty | Cell::Error(_), _) => None,
        (Cell::Number(n), BranchColumnKind::Code) => {
            BranchIdentifier::from_number(*n).map(|id| resolver.resolve(&id))
        }
        (Cell::Number(n), BranchColumnKind::Name) => Some(n.to_string()),
        (Cell::Text(t), BranchColumnKind::Code) => resolver.resolve_raw(t),
        (Cell::Text(t), BranchColumnKind::Name) => {
            Some(resolver.resolve(&BranchIdentifier::Name(t.clone())))
        }
        (Cell::Date(d), _) => Some(d.to_string()),
    }
}

/// Loads configured sources relative to a data directory.
pub struct RecordLoader<'a> {
    resolver: &'a IdentifierResolver,
    base_dir: Option<PathBuf>,
}

impl<'a> RecordLoader<'a> {
    pub fn new(resolver: &'a IdentifierResolver) -> Self {
        Self {
            resolver,
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn source_path(&self, spec: &SourceSpec) -> PathBuf {
        match &self.base_dir {
            Some(dir) if spec.path.is_relative() => dir.join(&spec.path),
            _ => spec.path.clone(),
        }
    }

    /// Loads a source, folding every failure into the returned outcome.
    pub fn load(&self, spec: &SourceSpec) -> LoadOutcome {
        let path = self.source_path(spec);
        info!("Loading source '{}' from {}", spec.name, path.display());

        match self.try_load(spec) {
            Ok(records) if records.is_empty() => {
                debug!("Source '{}' has no data rows", spec.name);
                LoadOutcome::Empty
            }
            Ok(records) => {
                debug!("Source '{}' loaded {} records", spec.name, records.len());
                LoadOutcome::Loaded(records)
            }
            Err(ReportError::MissingSource(_)) => {
                warn!("Source '{}' not found at {}", spec.name, path.display());
                LoadOutcome::Missing(path)
            }
            Err(e) => {
                warn!("Source '{}' could not be read: {}", spec.name, e);
                LoadOutcome::Malformed(e.to_string())
            }
        }
    }

    pub fn try_load(&self, spec: &SourceSpec) -> Result<RecordSet> {
        let path = self.source_path(spec);
        let format = spec.resolved_format()?;
        let table = read_table(&path, format, spec.sheet.as_deref())?;
        table_to_records(&table, spec, self.resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BranchMapping;

    fn resolver() -> IdentifierResolver {
        IdentifierResolver::new(&[BranchMapping {
            code: 63796,
            name: "Kiambu Branch".to_string(),
        }])
    }

    fn spec() -> SourceSpec {
        SourceSpec {
            name: "repayments".to_string(),
            path: PathBuf::from("repayments.csv"),
            format: None,
            sheet: None,
            branch_column: "branch_id".to_string(),
            branch_kind: BranchColumnKind::Code,
            date_columns: BTreeMap::from([(
                "collected".to_string(),
                "repayment_collected_date".to_string(),
            )]),
            date_formats: vec!["%d/%m/%Y".to_string()],
            measure_columns: BTreeMap::from([(
                "repaid".to_string(),
                "repayment_amount".to_string(),
            )]),
            dimension_columns: BTreeMap::from([(
                Dimension::Collector,
                "collector_id".to_string(),
            )]),
        }
    }

    fn table(rows: Vec<Vec<Cell>>) -> Table {
        Table {
            headers: vec![
                "branch_id".to_string(),
                "repayment_amount".to_string(),
                "repayment_collected_date".to_string(),
                "collector_id".to_string(),
            ],
            rows,
        }
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn test_rows_are_normalized() {
        let t = table(vec![
            vec![Cell::Number(63796.0), text("1,500"), text("03/10/2025"), Cell::Number(17.0)],
            vec![text("999"), Cell::Number(250.5), text("bad date"), Cell::Empty],
        ]);

        let records = table_to_records(&t, &spec(), &resolver()).unwrap();
        assert_eq!(records.len(), 2);

        let first = &records.as_slice()[0];
        assert_eq!(first.branch, "Kiambu Branch");
        assert_eq!(first.amount("repaid"), Some(1500.0));
        assert_eq!(
            first.date("collected"),
            NaiveDate::from_ymd_opt(2025, 10, 3)
        );
        assert_eq!(first.dimension(Dimension::Collector), Some("17"));

        let second = &records.as_slice()[1];
        assert_eq!(second.branch, "Branch 999");
        assert_eq!(second.date("collected"), None);
        assert_eq!(second.dimension(Dimension::Collector), None);
    }

    #[test]
    fn test_invalid_amount_rejects_table() {
        let t = table(vec![
            vec![Cell::Number(63796.0), text("100"), text("03/10/2025"), Cell::Empty],
            vec![Cell::Number(63796.0), text("n/a"), text("03/10/2025"), Cell::Empty],
        ]);
        let err = table_to_records(&t, &spec(), &resolver()).unwrap_err();
        match err {
            ReportError::InvalidAmount { row, value, .. } => {
                assert_eq!(row, 3);
                assert_eq!(value, "n/a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_required_column() {
        let mut t = table(vec![]);
        t.headers[1] = "amount".to_string();
        let err = table_to_records(&t, &spec(), &resolver()).unwrap_err();
        assert!(matches!(err, ReportError::MissingColumn { .. }));
    }

    #[test]
    fn test_missing_dimension_column_is_tolerated() {
        let mut t = table(vec![vec![
            Cell::Number(63796.0),
            text("10"),
            text("03/10/2025"),
            text("x"),
        ]]);
        t.headers[3] = "something_else".to_string();
        let records = table_to_records(&t, &spec(), &resolver()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.as_slice()[0].dimensions.is_empty());
    }

    #[test]
    fn test_spreadsheet_error_in_amount_rejects_table() {
        let t = table(vec![vec![
            Cell::Number(63796.0),
            Cell::from_spreadsheet(&Data::Error(calamine::CellErrorType::NA)),
            text("03/10/2025"),
            Cell::Empty,
        ]]);
        let err = table_to_records(&t, &spec(), &resolver()).unwrap_err();
        match err {
            ReportError::InvalidAmount { row, value, .. } => {
                assert_eq!(row, 2);
                assert_eq!(value, "#N/A");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_spreadsheet_error_in_date_is_absent() {
        let t = table(vec![vec![
            Cell::Number(63796.0),
            Cell::Number(10.0),
            Cell::Error("#VALUE!".to_string()),
            Cell::Error("#REF!".to_string()),
        ]]);
        let records = table_to_records(&t, &spec(), &resolver()).unwrap();
        let record = &records.as_slice()[0];
        assert_eq!(record.date("collected"), None);
        assert_eq!(record.dimension(Dimension::Collector), None);
        assert_eq!(record.amount("repaid"), Some(10.0));
    }

    #[test]
    fn test_spreadsheet_cells() {
        assert_eq!(Cell::from_spreadsheet(&Data::Float(12.5)), Cell::Number(12.5));
        assert_eq!(Cell::from_spreadsheet(&Data::Int(7)), Cell::Number(7.0));
        assert_eq!(
            Cell::from_spreadsheet(&Data::String(" Kiambu Branch ".to_string())),
            text("Kiambu Branch")
        );
        assert_eq!(Cell::from_spreadsheet(&Data::String("  ".to_string())), Cell::Empty);
        assert_eq!(Cell::from_spreadsheet(&Data::Empty), Cell::Empty);
        assert_eq!(
            Cell::from_spreadsheet(&Data::DateTimeIso("2025-10-03T00:00:00".to_string())),
            Cell::Date(NaiveDate::from_ymd_opt(2025, 10, 3).unwrap())
        );
        assert!(matches!(
            Cell::from_spreadsheet(&Data::DateTimeIso("not a date".to_string())),
            Cell::Error(_)
        ));
        assert_eq!(
            Cell::from_spreadsheet(&Data::Error(calamine::CellErrorType::Div0)),
            Cell::Error("#DIV/0!".to_string())
        );
    }

    #[test]
    fn test_number_branch_codes() {
        let r = resolver();
        assert_eq!(
            branch_name(&Cell::Number(63796.0), BranchColumnKind::Code, &r),
            Some("Kiambu Branch".to_string())
        );
        assert_eq!(
            branch_name(&Cell::Number(12.5), BranchColumnKind::Code, &r),
            Some("Branch 12.5".to_string())
        );
        assert_eq!(
            branch_name(&Cell::Number(f64::NAN), BranchColumnKind::Code, &r),
            None
        );
        assert_eq!(
            branch_name(&Cell::Error("#N/A".to_string()), BranchColumnKind::Name, &r),
            None
        );
    }

    #[test]
    fn test_blank_branch_rows_are_skipped() {
        let t = table(vec![vec![Cell::Empty, text("10"), text("03/10/2025"), Cell::Empty]]);
        let records = table_to_records(&t, &spec(), &resolver()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_excel_serial_dates() {
        assert_eq!(
            excel_serial_to_date(45933.0),
            NaiveDate::from_ymd_opt(2025, 10, 3)
        );
        assert_eq!(excel_serial_to_date(0.0), None);
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let resolver = resolver();
        let loader = RecordLoader::new(&resolver).with_base_dir("/definitely/not/here");
        let outcome = loader.load(&spec());
        assert!(matches!(outcome, LoadOutcome::Missing(_)));
        assert!(outcome.records().is_empty());
        assert!(!outcome.has_data());
    }

    #[test]
    fn test_scoped_record_set() {
        let set: RecordSet = vec![
            LoanRecord::new("Advans Branch").with_amount("principal", 10.0),
            LoanRecord::new("Kiambu Branch").with_amount("principal", 20.0),
        ]
        .into_iter()
        .collect();

        let without = set.scoped(&BranchScope::Exclude {
            branches: vec!["Advans Branch".to_string()],
        });
        assert_eq!(without.len(), 1);
        assert_eq!(without.total("principal"), 20.0);

        let only = set.scoped(&BranchScope::Only {
            branch: "Advans Branch".to_string(),
        });
        assert_eq!(only.total("principal"), 10.0);
    }
}
