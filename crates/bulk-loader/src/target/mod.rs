//! Destination connections.
//!
//! - [`postgres`]: PostgreSQL over `tokio-postgres`, binary COPY for bulk paths
//! - [`memory`]: in-process table store with constraint checks and fault injection
//! - [`tls`]: rustls setup for PostgreSQL connections
//!
//! A [`ConnectionFactory`] opens one [`TargetConnection`] per session. Strategies
//! that recreate their session ask the factory for a fresh connection after
//! each flush.

pub mod memory;
pub mod postgres;
pub mod tls;

use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{TargetConfig, TargetKind};
use crate::core::schema::{TableName, TableSchema};
use crate::core::value::SqlValue;
use crate::core::WriteShape;
use crate::error::{LoadError, Result};
use crate::loader::transport::TransportChunk;

pub use memory::{MemoryConnection, MemoryTarget};
pub use postgres::{PgConnection, PgTarget};

/// Options for the third-party bulk helper path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkInsertOptions {
    /// Enforce table constraints while loading.
    pub check_constraints: bool,
    /// Store NULL as NULL instead of the column's type default.
    pub keep_nulls: bool,
    /// Write the supplied identity values instead of generating new ones.
    pub keep_identity: bool,
}

impl BulkInsertOptions {
    /// Fail unless `shape` writes identity the way `keep_identity` asks.
    pub fn check_shape(&self, shape: &WriteShape) -> Result<()> {
        if self.keep_identity != shape.keep_identity {
            return Err(LoadError::Config(format!(
                "bulk insert into {} has keep_identity={} but the write shape {} the identity column",
                shape.full_name(),
                self.keep_identity,
                if shape.keep_identity { "includes" } else { "omits" }
            )));
        }
        Ok(())
    }
}

impl Default for BulkInsertOptions {
    fn default() -> Self {
        Self {
            check_constraints: true,
            keep_nulls: true,
            keep_identity: true,
        }
    }
}

/// One open connection to the destination.
///
/// Writes outside `begin`/`commit` autocommit. Dropping or closing a
/// connection with an open transaction discards the transaction.
#[async_trait]
pub trait TargetConnection: Send {
    // ===== Transaction control =====

    /// Open a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Whether a transaction is open on this connection.
    fn in_transaction(&self) -> bool;

    // ===== Data operations =====

    /// Insert a single row. Returns the generated identity when the shape
    /// leaves identity to the destination.
    async fn insert_row(&mut self, shape: &WriteShape, row: &[SqlValue<'_>]) -> Result<Option<i64>>;

    /// Native bulk-copy of one transport chunk. Constraints are checked,
    /// NULLs kept, and identity written as supplied when the shape keeps it.
    async fn copy_rows(&mut self, shape: &WriteShape, chunk: TransportChunk<'_>) -> Result<u64>;

    /// Hand a full row set to the backend's bulk helper.
    async fn bulk_insert(
        &mut self,
        shape: &WriteShape,
        rows: &[Vec<SqlValue<'_>>],
        options: BulkInsertOptions,
    ) -> Result<u64>;

    // ===== Table operations =====

    /// Create the table if it does not exist.
    async fn ensure_table(&mut self, schema: &TableSchema) -> Result<()>;

    /// Remove every row and restart identity generation.
    async fn truncate(&mut self, table: &TableName) -> Result<()>;

    /// Get the row count for a table.
    async fn row_count(&mut self, table: &TableName) -> Result<i64>;

    /// Move identity generation past the highest stored key after loading
    /// explicit identity values.
    async fn reset_identity(&mut self, schema: &TableSchema) -> Result<()>;

    // ===== Lifecycle =====

    /// Release the connection. Any open transaction is discarded.
    async fn close(&mut self) -> Result<()>;

    /// Get the database type identifier (e.g., "postgres", "memory").
    fn db_type(&self) -> &str;
}

/// Opens connections to one destination.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: TargetConnection;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection>;

    /// Human-readable description of the destination for logs.
    fn describe(&self) -> String;
}

/// Destination chosen at runtime from configuration.
///
/// Enum dispatch over the two backends keeps strategy code monomorphic.
pub enum AnyTarget {
    Postgres(PgTarget),
    Memory(MemoryTarget),
}

impl AnyTarget {
    /// Build the configured backend for `schema`.
    ///
    /// An in-memory store starts with the table registered, standing in for a
    /// database where the table already exists.
    pub fn from_config(config: &TargetConfig, schema: &TableSchema) -> Result<Self> {
        match config.r#type {
            TargetKind::Postgres => Ok(AnyTarget::Postgres(PgTarget::new(config)?)),
            TargetKind::Memory => Ok(AnyTarget::Memory(MemoryTarget::new().with_table(schema))),
        }
    }
}

/// Connection produced by [`AnyTarget`].
pub enum AnyConnection {
    Postgres(PgConnection),
    Memory(MemoryConnection),
}

#[async_trait]
impl ConnectionFactory for AnyTarget {
    type Connection = AnyConnection;

    async fn connect(&self) -> Result<AnyConnection> {
        match self {
            AnyTarget::Postgres(t) => Ok(AnyConnection::Postgres(t.connect().await?)),
            AnyTarget::Memory(t) => Ok(AnyConnection::Memory(t.connect().await?)),
        }
    }

    fn describe(&self) -> String {
        match self {
            AnyTarget::Postgres(t) => t.describe(),
            AnyTarget::Memory(t) => t.describe(),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $conn:ident => $body:expr) => {
        match $self {
            AnyConnection::Postgres($conn) => $body,
            AnyConnection::Memory($conn) => $body,
        }
    };
}

#[async_trait]
impl TargetConnection for AnyConnection {
    async fn begin(&mut self) -> Result<()> {
        dispatch!(self, c => c.begin().await)
    }

    async fn commit(&mut self) -> Result<()> {
        dispatch!(self, c => c.commit().await)
    }

    async fn rollback(&mut self) -> Result<()> {
        dispatch!(self, c => c.rollback().await)
    }

    fn in_transaction(&self) -> bool {
        dispatch!(self, c => c.in_transaction())
    }

    async fn insert_row(&mut self, shape: &WriteShape, row: &[SqlValue<'_>]) -> Result<Option<i64>> {
        dispatch!(self, c => c.insert_row(shape, row).await)
    }

    async fn copy_rows(&mut self, shape: &WriteShape, chunk: TransportChunk<'_>) -> Result<u64> {
        dispatch!(self, c => c.copy_rows(shape, chunk).await)
    }

    async fn bulk_insert(
        &mut self,
        shape: &WriteShape,
        rows: &[Vec<SqlValue<'_>>],
        options: BulkInsertOptions,
    ) -> Result<u64> {
        dispatch!(self, c => c.bulk_insert(shape, rows, options).await)
    }

    async fn ensure_table(&mut self, schema: &TableSchema) -> Result<()> {
        dispatch!(self, c => c.ensure_table(schema).await)
    }

    async fn truncate(&mut self, table: &TableName) -> Result<()> {
        dispatch!(self, c => c.truncate(table).await)
    }

    async fn row_count(&mut self, table: &TableName) -> Result<i64> {
        dispatch!(self, c => c.row_count(table).await)
    }

    async fn reset_identity(&mut self, schema: &TableSchema) -> Result<()> {
        dispatch!(self, c => c.reset_identity(schema).await)
    }

    async fn close(&mut self) -> Result<()> {
        dispatch!(self, c => c.close().await)
    }

    fn db_type(&self) -> &str {
        dispatch!(self, c => c.db_type())
    }
}

/// Result of probing a destination.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub target: String,
    pub connected: bool,
    pub latency_ms: u64,
    /// Rows currently in the table, when it could be counted.
    pub table_rows: Option<i64>,
    pub error: Option<String>,
    pub healthy: bool,
}

/// Open one session, count the table's rows, and close it again.
pub async fn health_check<F: ConnectionFactory>(factory: &F, table: &TableName) -> HealthCheckResult {
    let started = Instant::now();
    let mut conn = match factory.connect().await {
        Ok(conn) => conn,
        Err(e) => {
            return HealthCheckResult {
                target: factory.describe(),
                connected: false,
                latency_ms: started.elapsed().as_millis() as u64,
                table_rows: None,
                error: Some(e.to_string()),
                healthy: false,
            }
        }
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    let counted = conn.row_count(table).await;
    let closed = conn.close().await;
    let (table_rows, error) = match counted.and_then(|rows| closed.map(|()| rows)) {
        Ok(rows) => (Some(rows), None),
        Err(e) => (None, Some(e.to_string())),
    };

    HealthCheckResult {
        target: factory.describe(),
        connected: true,
        latency_ms,
        table_rows,
        healthy: error.is_none(),
        error,
    }
}
