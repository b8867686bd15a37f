//! # bulk-loader
//!
//! Loads homogeneous record sets into a relational table with interchangeable
//! strategies and measures how long each one takes.
//!
//! - **Row paths**: one row at a time, periodic commit, range insert per batch
//! - **Bulk paths**: native binary COPY and a third-party bulk helper
//! - **Session recreation** after each flush for the row paths
//! - **Atomic runs** through nestable transaction scopes
//! - **Bench harness** that runs a strategy suite over the same input
//!
//! ## Example
//!
//! ```rust,no_run
//! use bulk_loader::{input, Example, LoadOptions, Loader, MemoryTarget, SchemaRegistry, Strategy};
//!
//! #[tokio::main]
//! async fn main() -> bulk_loader::Result<()> {
//!     let schema = SchemaRegistry::new()
//!         .map::<Example>("dbo", "Example")
//!         .resolve::<Example>()?;
//!     let target = MemoryTarget::new().with_table(&schema);
//!     let mut records = input::generate(10_000)?;
//!
//!     let outcome = Loader::new(&target, &schema)
//!         .persist(Strategy::NativeBulkCopy, &mut records, &LoadOptions::default())
//!         .await?;
//!     println!("Wrote {} rows in {:?}", outcome.records_written, outcome.elapsed);
//!     Ok(())
//! }
//! ```

pub mod bench;
pub mod config;
pub mod core;
pub mod error;
pub mod input;
pub mod loader;
pub mod target;

// Re-exports for convenient access
pub use bench::{BenchCase, BenchReport, BenchRunner, CaseResult};
pub use config::{Config, TableConfig, TargetConfig, TargetKind};
pub use crate::core::{Entity, Example, SchemaRegistry, SqlValue, TableName, TableSchema};
pub use error::{LoadError, Result};
pub use loader::{LoadOptions, LoadOutcome, Loader, Strategy};
pub use target::{
    health_check, AnyTarget, ConnectionFactory, HealthCheckResult, MemoryTarget, PgTarget,
    TargetConnection,
};
