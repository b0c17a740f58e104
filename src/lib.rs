//! star-etl - batch loader for an e-commerce star-schema warehouse
//!
//! Reads customers, products, payment methods, calendar dates and orders from
//! CSV files and loads them into four dimension tables and one fact table in
//! PostgreSQL, then answers a fixed set of aggregate queries.
//!
//! ## Load flow
//! CSV files -> typed records -> truncate -> dimension inserts ->
//! surrogate key snapshot -> key resolution -> fact inserts -> commit
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use star_etl::database::{DatabaseConfig, Warehouse};
//! use star_etl::etl::{LoadOptions, Pipeline};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = DatabaseConfig::from_env()?;
//! let warehouse = Warehouse::connect(&config).await?;
//! warehouse.apply_schema().await?;
//!
//! let report = Pipeline::new(&warehouse, LoadOptions::default())
//!     .run(Path::new("data"))
//!     .await?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// CSV sources and typed records
pub mod source;

// Key resolution, fact loading and the load run
pub mod etl;

// Database integration (when enabled)
#[cfg(feature = "database")]
pub mod analytics;
#[cfg(feature = "database")]
pub mod database;

pub use error::{ConfigError, EtlError, LookupError, RecordError, SourceError};
#[cfg(feature = "database")]
pub use error::LoadError;

pub use etl::{Dimension, KeyResolver, LoadReport, SurrogateKeyMap};
pub use source::{CalendarDate, CustomerRecord, OrderRecord, PaymentRecord, ProductRecord};

#[cfg(feature = "database")]
pub use analytics::{AnalyticQuery, AnalyticsService};
#[cfg(feature = "database")]
pub use database::{DatabaseConfig, Warehouse};
#[cfg(feature = "database")]
pub use etl::{LoadOptions, Pipeline};
