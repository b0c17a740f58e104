//! CSV source files
//!
//! Reads the five fixed input files from a data directory into typed records.
//! Rows that fail to parse or validate are rejected one at a time with a
//! logged cause; only a missing file, a missing column or an IO failure stops
//! the read.

pub mod records;

use std::path::Path;

use tracing::{info, warn};

use crate::error::{RecordError, SourceError};
use crate::etl::report::{Rejection, RejectionStage};

pub use records::{
    date_from_key, date_key, CalendarDate, CustomerRecord, OrderRecord, PaymentRecord, ProductRecord,
    SourceRecord,
};

/// A validated record together with the CSV line it came from
#[derive(Debug, Clone)]
pub struct Sourced<T> {
    pub line: u64,
    pub record: T,
}

/// Records read from one source file
#[derive(Debug)]
pub struct SourceFile<T> {
    pub records: Vec<Sourced<T>>,
    pub rejections: Vec<Rejection>,
}

impl<T> SourceFile<T> {
    /// Number of data rows seen, accepted or not
    pub fn rows_read(&self) -> usize {
        self.records.len() + self.rejections.len()
    }
}

/// Read and validate one source file from `data_dir`
pub fn read_source<T: SourceRecord>(data_dir: &Path) -> Result<SourceFile<T>, SourceError> {
    let path = data_dir.join(T::FILE);
    if !path.exists() {
        return Err(SourceError::FileNotFound { path });
    }

    let csv_error = |source: csv::Error| SourceError::Csv {
        file: T::FILE.to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(&path)
        .map_err(csv_error)?;

    let headers = reader.headers().map_err(csv_error)?.clone();
    for column in T::REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == *column) {
            return Err(SourceError::MissingColumn {
                file: T::FILE.to_string(),
                column: column.to_string(),
            });
        }
    }
    for group in T::ONE_OF_COLUMNS {
        if !headers.iter().any(|h| group.contains(&h)) {
            return Err(SourceError::MissingColumn {
                file: T::FILE.to_string(),
                column: group.join(" or "),
            });
        }
    }

    let key_column = headers
        .iter()
        .position(|h| Some(&h) == T::REQUIRED_COLUMNS.first());

    let mut file = SourceFile {
        records: Vec::new(),
        rejections: Vec::new(),
    };

    for result in reader.records() {
        let row = match result {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(csv_error(e)),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                file.rejections
                    .push(reject::<T>(line, None, RecordError::Shape(e.to_string())));
                continue;
            }
        };
        let line = row.position().map(|p| p.line()).unwrap_or(0);

        let parsed = row
            .deserialize::<T::Raw>(Some(&headers))
            .map_err(|e| RecordError::Shape(e.to_string()))
            .and_then(T::validate);

        match parsed {
            Ok(record) => file.records.push(Sourced { line, record }),
            Err(cause) => {
                let key = key_column
                    .and_then(|i| row.get(i))
                    .filter(|k| !k.is_empty())
                    .map(str::to_string);
                file.rejections.push(reject::<T>(line, key, cause));
            }
        }
    }

    info!(
        "Read {}: {} accepted, {} rejected",
        T::FILE,
        file.records.len(),
        file.rejections.len()
    );

    Ok(file)
}

fn reject<T: SourceRecord>(line: u64, natural_key: Option<String>, cause: RecordError) -> Rejection {
    let reason = cause.to_string();
    let error = SourceError::Malformed {
        file: T::FILE.to_string(),
        line,
        cause,
    };
    warn!("Rejecting row: {}", error);

    Rejection {
        file: T::FILE.to_string(),
        line: Some(line),
        natural_key,
        stage: RejectionStage::Parse,
        cause: reason,
    }
}

/// All five source files for one load run
#[derive(Debug)]
pub struct SourceBatch {
    pub customers: SourceFile<CustomerRecord>,
    pub products: SourceFile<ProductRecord>,
    pub payments: SourceFile<PaymentRecord>,
    pub dates: SourceFile<CalendarDate>,
    pub orders: SourceFile<OrderRecord>,
}

impl SourceBatch {
    pub fn read(data_dir: &Path) -> Result<Self, SourceError> {
        info!("Loading CSV files from {}", data_dir.display());
        Ok(Self {
            customers: read_source(data_dir)?,
            products: read_source(data_dir)?,
            payments: read_source(data_dir)?,
            dates: read_source(data_dir)?,
            orders: read_source(data_dir)?,
        })
    }

    /// Parse-stage rejections across every file, in file order
    pub fn rejections(&self) -> impl Iterator<Item = &Rejection> {
        self.customers
            .rejections
            .iter()
            .chain(&self.products.rejections)
            .chain(&self.payments.rejections)
            .chain(&self.dates.rejections)
            .chain(&self.orders.rejections)
    }
}
