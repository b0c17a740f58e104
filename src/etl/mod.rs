//! Load stages: key resolution, fact assembly, the run orchestrator and its
//! report.

pub mod fact_loader;
#[cfg(feature = "database")]
pub mod pipeline;
pub mod report;
pub mod resolver;

pub use fact_loader::{compute_total, OrderFactRow};
#[cfg(feature = "database")]
pub use fact_loader::FactLoader;
#[cfg(feature = "database")]
pub use pipeline::{validate_sources, LoadOptions, Pipeline};
pub use report::{LoadReport, Rejection, RejectionStage, TableCounts};
pub use resolver::{Dimension, KeyResolver, ResolvedKeys, SurrogateKeyMap};
