//! Load run report

use std::fmt;

use serde::Serialize;

/// Stage at which a record was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionStage {
    /// Missing or invalid field in the source row
    Parse,
    /// Unresolvable dimension reference
    Lookup,
    /// Store constraint violation on insert
    Constraint,
}

impl fmt::Display for RejectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionStage::Parse => "parse",
            RejectionStage::Lookup => "lookup",
            RejectionStage::Constraint => "constraint",
        };
        f.write_str(s)
    }
}

/// One rejected source record and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub file: String,
    pub line: Option<u64>,
    pub natural_key: Option<String>,
    pub stage: RejectionStage,
    pub cause: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        if let Some(key) = &self.natural_key {
            write!(f, " [{}]", key)?;
        }
        write!(f, " {}: {}", self.stage, self.cause)
    }
}

/// Row counts for one target table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    /// Data rows read from the source file
    pub read: usize,
    pub inserted: usize,
    /// Rows skipped because their natural key was already loaded
    pub duplicates: usize,
    pub rejected: usize,
}

/// Outcome of one load run
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub customers: TableCounts,
    pub products: TableCounts,
    pub payments: TableCounts,
    pub dates: TableCounts,
    pub orders: TableCounts,
    pub rejections: Vec<Rejection>,
    pub dry_run: bool,
    pub duration_ms: u64,
}

impl LoadReport {
    pub fn tables(&self) -> [(&'static str, &TableCounts); 5] {
        [
            ("dim_customer", &self.customers),
            ("dim_product", &self.products),
            ("dim_payment", &self.payments),
            ("dim_date", &self.dates),
            ("fact_orders", &self.orders),
        ]
    }

    pub fn total_rejected(&self) -> usize {
        self.rejections.len()
    }

    pub fn is_clean(&self) -> bool {
        self.rejections.is_empty()
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14} {:>8} {:>9} {:>10} {:>9}",
            "table", "read", "inserted", "duplicate", "rejected"
        )?;
        for (name, counts) in self.tables() {
            writeln!(
                f,
                "{:<14} {:>8} {:>9} {:>10} {:>9}",
                name, counts.read, counts.inserted, counts.duplicates, counts.rejected
            )?;
        }
        if self.dry_run {
            writeln!(f, "(dry run: nothing written)")?;
        }
        Ok(())
    }
}
