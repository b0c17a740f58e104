//! Error handling for the warehouse loader
//!
//! Library code returns these typed errors; the binary wraps them with
//! `anyhow` context. Per-record problems (malformed rows, unresolved keys,
//! constraint violations) are reported and skipped, everything else is fatal
//! for the run.

use std::path::PathBuf;

use thiserror::Error;

use crate::etl::resolver::Dimension;

/// Main error type for a load run
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[cfg(feature = "database")]
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run halted on rejected record: {0}")]
    Halted(String),
}

/// Errors raised while reading the CSV source files
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("CSV file not found: {}", .path.display())]
    FileNotFound { path: PathBuf },

    #[error("Missing column '{column}' in {file}")]
    MissingColumn { file: String, column: String },

    #[error("Malformed record in {file} at line {line}: {cause}")]
    Malformed {
        file: String,
        line: u64,
        cause: RecordError,
    },

    #[error("CSV error in {file}: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },
}

/// Why a single source row was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid date '{value}' in field '{field}', expected YYYY-MM-DD")]
    InvalidDate { field: &'static str, value: String },

    #[error("invalid number '{value}' in field '{field}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("field '{field}' out of range: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("{field} {given} does not match the date (expected {expected})")]
    CalendarMismatch {
        field: &'static str,
        given: i32,
        expected: i32,
    },

    #[error("unreadable row: {0}")]
    Shape(String),
}

/// Natural key with no matching dimension row
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no {dimension} row for natural key '{natural_key}'")]
    Missing {
        dimension: Dimension,
        natural_key: String,
    },

    #[error("natural key '{natural_key}' is not valid for the {dimension} dimension")]
    InvalidKey {
        dimension: Dimension,
        natural_key: String,
    },
}

/// Errors raised while writing to the warehouse
#[cfg(feature = "database")]
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Constraint violation on {table}: {message}")]
    Constraint {
        table: &'static str,
        constraint: Option<String>,
        message: String,
    },

    #[error("Invalid value for {table}: {message}")]
    InvalidData {
        table: &'static str,
        message: String,
    },

    #[error("Schema not ready: {0}")]
    Schema(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(feature = "database")]
impl LoadError {
    /// Classify a store error raised by an insert into `table`.
    ///
    /// SQLSTATE class 23 (integrity constraint violation) and class 22
    /// (data exception, e.g. numeric out of range) are record-level, anything
    /// else stays a fatal database error.
    pub fn from_insert(table: &'static str, error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &error {
            match sqlstate_class(db.code().as_deref()) {
                Some("23") => {
                    return LoadError::Constraint {
                        table,
                        constraint: db.constraint().map(str::to_string),
                        message: db.message().to_string(),
                    }
                }
                Some("22") => {
                    return LoadError::InvalidData {
                        table,
                        message: db.message().to_string(),
                    }
                }
                _ => {}
            }
        }
        LoadError::Database(error)
    }

    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            LoadError::Constraint { .. } | LoadError::InvalidData { .. }
        )
    }
}

#[cfg(feature = "database")]
fn sqlstate_class(code: Option<&str>) -> Option<&str> {
    code.and_then(|c| c.get(..2))
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Data directory not found: {}", .path.display())]
    DataDirNotFound { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, EtlError>;
