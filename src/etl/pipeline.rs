//! Full-reload load run
//!
//! One run reads every source file, truncates the warehouse, loads the
//! dimensions, snapshots their surrogate keys and then loads the facts, all
//! inside a single transaction. A fatal error anywhere rolls the whole run
//! back; record-level rejections are reported and skipped unless the run is
//! strict.

use std::path::Path;
use std::time::Instant;

use sqlx::PgConnection;
use tracing::{info, warn};

use crate::database::{DimensionRepository, Warehouse};
use crate::error::{EtlError, LoadError};
use crate::etl::fact_loader::FactLoader;
use crate::etl::report::{LoadReport, Rejection, RejectionStage, TableCounts};
use crate::etl::resolver::{KeyResolver, SurrogateKeyMap};
use crate::source::{OrderRecord, SourceBatch, SourceFile, SourceRecord, Sourced};

/// Run-level policy switches
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Halt and roll back on the first rejected record
    pub strict: bool,
    /// Read and validate sources without touching the store
    pub dry_run: bool,
}

pub struct Pipeline<'w> {
    warehouse: &'w Warehouse,
    options: LoadOptions,
}

impl<'w> Pipeline<'w> {
    pub fn new(warehouse: &'w Warehouse, options: LoadOptions) -> Self {
        Self { warehouse, options }
    }

    /// Read the source files under `data_dir` and load them
    pub async fn run(&self, data_dir: &Path) -> Result<LoadReport, EtlError> {
        let batch = SourceBatch::read(data_dir)?;
        self.load(&batch).await
    }

    /// Load an already-read batch
    pub async fn load(&self, batch: &SourceBatch) -> Result<LoadReport, EtlError> {
        let started = Instant::now();
        let mut report = parse_report(batch, self.options)?;

        if self.options.dry_run {
            report.duration_ms = started.elapsed().as_millis() as u64;
            info!("Dry run complete: {} rejected records", report.total_rejected());
            return Ok(report);
        }

        self.warehouse.verify_schema().await?;

        let mut tx = self.warehouse.pool().begin().await.map_err(LoadError::from)?;

        self.warehouse.truncate_all(&mut tx).await?;
        load_dimensions(&mut tx, batch, &mut report).await?;

        let keys = SurrogateKeyMap::load(&mut tx).await.map_err(LoadError::from)?;
        self.load_facts(&mut tx, &batch.orders.records, &keys, &mut report)
            .await?;

        tx.commit().await.map_err(LoadError::from)?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "ETL completed: {} facts inserted, {} records rejected in {}ms",
            report.orders.inserted,
            report.total_rejected(),
            report.duration_ms
        );
        Ok(report)
    }

    async fn load_facts(
        &self,
        conn: &mut PgConnection,
        orders: &[Sourced<OrderRecord>],
        keys: &impl KeyResolver,
        report: &mut LoadReport,
    ) -> Result<(), EtlError> {
        info!("Inserting fact table fact_orders (rows={})", orders.len());
        let mut loader = FactLoader::new(conn);

        for Sourced { line, record } in orders {
            let rejection = |stage: RejectionStage, cause: String| Rejection {
                file: OrderRecord::FILE.to_string(),
                line: Some(*line),
                natural_key: Some(record.order_id.clone()),
                stage,
                cause,
            };

            let resolved = match keys.resolve_order(record) {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Rejecting order {} (line {}): {}", record.order_id, line, e);
                    report.orders.rejected += 1;
                    self.reject(report, rejection(RejectionStage::Lookup, e.to_string()))?;
                    continue;
                }
            };

            match loader.load(record, resolved).await {
                Ok(_) => {}
                Err(e) if e.is_record_level() => {
                    warn!("Rejecting order {} (line {}): {}", record.order_id, line, e);
                    report.orders.rejected += 1;
                    self.reject(report, rejection(RejectionStage::Constraint, e.to_string()))?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        report.orders.inserted = loader.inserted();
        info!("Fact table insert completed ({} rows)", loader.inserted());
        Ok(())
    }

    fn reject(&self, report: &mut LoadReport, rejection: Rejection) -> Result<(), EtlError> {
        record_rejection(self.options, report, rejection)
    }
}

/// Read and validate the source files without a warehouse connection
pub fn validate_sources(data_dir: &Path, strict: bool) -> Result<LoadReport, EtlError> {
    let started = Instant::now();
    let batch = SourceBatch::read(data_dir)?;
    let options = LoadOptions {
        strict,
        dry_run: true,
    };
    let mut report = parse_report(&batch, options)?;
    report.duration_ms = started.elapsed().as_millis() as u64;
    info!("Dry run complete: {} rejected records", report.total_rejected());
    Ok(report)
}

/// Start a report from the read counts and parse-stage rejections of a batch
fn parse_report(batch: &SourceBatch, options: LoadOptions) -> Result<LoadReport, EtlError> {
    let mut report = LoadReport {
        dry_run: options.dry_run,
        customers: parsed_counts(&batch.customers),
        products: parsed_counts(&batch.products),
        payments: parsed_counts(&batch.payments),
        dates: parsed_counts(&batch.dates),
        orders: parsed_counts(&batch.orders),
        ..LoadReport::default()
    };
    for rejection in batch.rejections() {
        record_rejection(options, &mut report, rejection.clone())?;
    }
    Ok(report)
}

fn record_rejection(
    options: LoadOptions,
    report: &mut LoadReport,
    rejection: Rejection,
) -> Result<(), EtlError> {
    if options.strict {
        return Err(EtlError::Halted(rejection.to_string()));
    }
    report.rejections.push(rejection);
    Ok(())
}

fn parsed_counts<T>(file: &SourceFile<T>) -> TableCounts {
    TableCounts {
        read: file.rows_read(),
        rejected: file.rejections.len(),
        ..TableCounts::default()
    }
}

/// Insert the four dimensions. They are independent of each other; a repeated
/// natural key keeps its first row and counts as a duplicate.
async fn load_dimensions(
    conn: &mut PgConnection,
    batch: &SourceBatch,
    report: &mut LoadReport,
) -> Result<(), LoadError> {
    let mut repo = DimensionRepository::new(conn);

    for Sourced { record, .. } in &batch.customers.records {
        tally(&mut report.customers, repo.insert_customer(record).await?);
    }
    for Sourced { record, .. } in &batch.products.records {
        tally(&mut report.products, repo.insert_product(record).await?);
    }
    for Sourced { record, .. } in &batch.payments.records {
        tally(&mut report.payments, repo.insert_payment(record).await?);
    }
    for Sourced { record, .. } in &batch.dates.records {
        tally(&mut report.dates, repo.insert_date(record).await?);
    }

    info!(
        "Dimension inserts completed: {} customers, {} products, {} payment methods, {} dates",
        report.customers.inserted,
        report.products.inserted,
        report.payments.inserted,
        report.dates.inserted
    );
    Ok(())
}

fn tally(counts: &mut TableCounts, inserted: bool) {
    if inserted {
        counts.inserted += 1;
    } else {
        counts.duplicates += 1;
    }
}
