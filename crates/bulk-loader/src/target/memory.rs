//! In-process destination.
//!
//! Tables live in a shared store behind a mutex; every connection from the
//! same [`MemoryTarget`] sees the same committed rows. Writes made inside a
//! transaction are staged on the connection and applied on commit.
//!
//! The store enforces the constraints a real table would: primary key
//! uniqueness on the identity column, NOT NULL, and text length. Identity
//! generation is not transactional, matching PostgreSQL sequences.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{BulkInsertOptions, ConnectionFactory, TargetConnection};
use crate::core::mapping::WriteShape;
use crate::core::schema::{ColumnDef, PrimitiveType, TableName, TableSchema};
use crate::core::value::SqlValue;
use crate::error::{LoadError, Result};
use crate::loader::transport::TransportChunk;

/// A stored row keyed by column name.
pub type StoredRow = BTreeMap<String, SqlValue<'static>>;

#[derive(Debug)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<StoredRow>,
    keys: HashSet<i64>,
    next_identity: i64,
}

impl MemoryTable {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
            keys: HashSet::new(),
            next_identity: 1,
        }
    }

    fn identity_name(&self) -> Option<&str> {
        self.schema.identity_column().map(|(_, c)| c.name.as_str())
    }
}

#[derive(Debug, Default)]
struct Store {
    tables: HashMap<TableName, MemoryTable>,
    sessions_opened: usize,
    sessions_closed: usize,
    commits: usize,
    rollbacks: usize,
    rows_until_failure: Option<u64>,
}

impl Store {
    fn table_mut(&mut self, name: &TableName) -> Result<&mut MemoryTable> {
        self.tables.get_mut(name).ok_or_else(|| {
            LoadError::transfer(name.to_string(), "relation does not exist")
        })
    }

    /// Count one row toward the injected failure, if armed.
    fn consume_row_budget(&mut self) -> bool {
        match self.rows_until_failure {
            Some(0) => {
                self.rows_until_failure = None;
                true
            }
            Some(n) => {
                self.rows_until_failure = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

/// Shared in-memory destination. Cloning shares the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    store: Arc<Mutex<Store>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, keeping its rows if it already exists.
    pub fn with_table(self, schema: &TableSchema) -> Self {
        self.register(schema);
        self
    }

    fn register(&self, schema: &TableSchema) {
        self.lock()
            .tables
            .entry(schema.table.clone())
            .or_insert_with(|| MemoryTable::new(schema.clone()));
    }

    /// Fail with a connectivity error once `rows` more rows have been written.
    ///
    /// The failure fires once; the connection that hits it is broken.
    pub fn fail_after_rows(&self, rows: u64) {
        self.lock().rows_until_failure = Some(rows);
    }

    /// Committed rows of `table`, in insertion order.
    pub fn rows(&self, table: &TableName) -> Vec<StoredRow> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Committed row count of `table`.
    pub fn row_count_of(&self, table: &TableName) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn sessions_opened(&self) -> usize {
        self.lock().sessions_opened
    }

    /// Connections opened and not yet closed or dropped.
    pub fn open_sessions(&self) -> usize {
        let store = self.lock();
        store.sessions_opened - store.sessions_closed
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryTarget {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        let mut store = self.lock();
        store.sessions_opened += 1;
        Ok(MemoryConnection {
            target: self.clone(),
            staged: None,
            broken: false,
            closed: false,
        })
    }

    fn describe(&self) -> String {
        "in-memory target".to_string()
    }
}

#[derive(Debug)]
struct StagedRow {
    table: TableName,
    key: Option<i64>,
    row: StoredRow,
}

/// One connection to a [`MemoryTarget`].
#[derive(Debug)]
pub struct MemoryConnection {
    target: MemoryTarget,
    staged: Option<Vec<StagedRow>>,
    broken: bool,
    closed: bool,
}

impl MemoryConnection {
    fn check_usable(&self, context: &str) -> Result<()> {
        if self.broken || self.closed {
            return Err(LoadError::connectivity(context, "connection is closed"));
        }
        Ok(())
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.staged = None;
            self.target.lock().sessions_closed += 1;
        }
    }

    /// Validate and write one row given in `shape` column order.
    fn write_row<'v>(
        &mut self,
        shape: &WriteShape,
        values: impl Iterator<Item = &'v SqlValue<'v>>,
        check_constraints: bool,
        keep_nulls: bool,
    ) -> Result<Option<i64>> {
        self.check_usable("writing row")?;
        let table_label = shape.full_name();

        let mut store = self.target.lock();
        if store.consume_row_budget() {
            drop(store);
            self.broken = true;
            self.staged = None;
            return Err(LoadError::connectivity(
                format!("writing to {}", table_label),
                "connection reset by peer",
            ));
        }

        let table = store.table_mut(&shape.table)?;
        let mut row = StoredRow::new();
        for (col, value) in shape.columns.iter().zip(values) {
            let value = if value.is_null() && !keep_nulls {
                SqlValue::default_for(col.primitive)
            } else {
                value.clone().into_owned()
            };
            if check_constraints {
                check_column(&table_label, col, &value)?;
            }
            row.insert(col.name.clone(), value);
        }

        let kept_identity = table.identity_name().map(str::to_string);
        let (key, generated) = match &shape.generated_identity {
            Some(identity) => {
                let id = table.next_identity;
                row.insert(identity.name.clone(), identity_value(&table_label, identity, id)?);
                table.next_identity += 1;
                (Some(id), Some(id))
            }
            None => (
                kept_identity.and_then(|name| row.get(&name).and_then(SqlValue::as_i64)),
                None,
            ),
        };

        if let Some(key) = key {
            let staged_dup = self.staged.iter().flatten().any(|s| {
                s.table == shape.table && s.key == Some(key)
            });
            if table.keys.contains(&key) || staged_dup {
                return Err(LoadError::constraint(
                    table_label,
                    format!("duplicate key value violates unique constraint (key {})", key),
                ));
            }
        }

        match self.staged.as_mut() {
            Some(staged) => staged.push(StagedRow {
                table: shape.table.clone(),
                key,
                row,
            }),
            None => {
                if let Some(key) = key {
                    table.keys.insert(key);
                }
                table.rows.push(row);
            }
        }
        Ok(generated)
    }
}

fn check_column(table: &str, col: &ColumnDef, value: &SqlValue<'_>) -> Result<()> {
    if value.is_null() && !col.is_nullable {
        return Err(LoadError::constraint(
            table,
            format!("null value in column \"{}\" violates not-null constraint", col.name),
        ));
    }
    if let (Some(max), Some(len)) = (col.max_length, value.text_len()) {
        if len > max {
            return Err(LoadError::constraint(
                table,
                format!(
                    "value too long for column \"{}\" ({} > {} characters)",
                    col.name, len, max
                ),
            ));
        }
    }
    Ok(())
}

fn identity_value(table: &str, col: &ColumnDef, id: i64) -> Result<SqlValue<'static>> {
    let out_of_range = || {
        LoadError::constraint(
            table,
            format!("identity value {} is out of range for column \"{}\"", id, col.name),
        )
    };
    Ok(match col.primitive {
        PrimitiveType::Int16 => SqlValue::I16(i16::try_from(id).map_err(|_| out_of_range())?),
        PrimitiveType::Int32 => SqlValue::I32(i32::try_from(id).map_err(|_| out_of_range())?),
        _ => SqlValue::I64(id),
    })
}

#[async_trait]
impl TargetConnection for MemoryConnection {
    async fn begin(&mut self) -> Result<()> {
        self.check_usable("beginning transaction")?;
        if self.staged.is_some() {
            return Err(LoadError::Config(
                "transaction already open on this connection".into(),
            ));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.check_usable("committing")?;
        let staged = self.staged.take().unwrap_or_default();
        let mut store = self.target.lock();
        let count = staged.len();
        for s in staged {
            let table = store.table_mut(&s.table)?;
            if let Some(key) = s.key {
                table.keys.insert(key);
            }
            table.rows.push(s.row);
        }
        store.commits += 1;
        debug!("Committed {} staged rows", count);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.check_usable("rolling back")?;
        self.staged = None;
        self.target.lock().rollbacks += 1;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    async fn insert_row(&mut self, shape: &WriteShape, row: &[SqlValue<'_>]) -> Result<Option<i64>> {
        self.write_row(shape, row.iter(), true, true)
    }

    async fn copy_rows(&mut self, shape: &WriteShape, chunk: TransportChunk<'_>) -> Result<u64> {
        for i in 0..chunk.len() {
            self.write_row(shape, chunk.row(i), true, true)?;
        }
        Ok(chunk.len() as u64)
    }

    async fn bulk_insert(
        &mut self,
        shape: &WriteShape,
        rows: &[Vec<SqlValue<'_>>],
        options: BulkInsertOptions,
    ) -> Result<u64> {
        options.check_shape(shape)?;
        for row in rows {
            self.write_row(shape, row.iter(), options.check_constraints, options.keep_nulls)?;
        }
        Ok(rows.len() as u64)
    }

    async fn ensure_table(&mut self, schema: &TableSchema) -> Result<()> {
        self.check_usable("creating table")?;
        self.target.register(schema);
        debug!("Ensured table {}", schema.table);
        Ok(())
    }

    async fn truncate(&mut self, table: &TableName) -> Result<()> {
        self.check_usable("truncating")?;
        let mut store = self.target.lock();
        let t = store.table_mut(table)?;
        t.rows.clear();
        t.keys.clear();
        t.next_identity = 1;
        Ok(())
    }

    async fn row_count(&mut self, table: &TableName) -> Result<i64> {
        self.check_usable("counting rows")?;
        let mut store = self.target.lock();
        Ok(store.table_mut(table)?.rows.len() as i64)
    }

    async fn reset_identity(&mut self, schema: &TableSchema) -> Result<()> {
        self.check_usable("resetting identity")?;
        let mut store = self.target.lock();
        let t = store.table_mut(&schema.table)?;
        t.next_identity = t.keys.iter().max().map_or(1, |max| max + 1);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.mark_closed();
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.mark_closed();
    }
}
