use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Source file not found: {0}")]
    MissingSource(String),

    #[error("Column '{column}' not found in source '{source_name}'")]
    MissingColumn { source_name: String, column: String },

    #[error("Invalid amount '{value}' in column '{column}' (row {row})")]
    InvalidAmount {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("Workbook has no worksheet named '{0}'")]
    MissingSheet(String),

    #[error("Invalid month {0}: must be between 1 and 12")]
    InvalidMonth(u32),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    SpreadsheetError(#[from] calamine::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
