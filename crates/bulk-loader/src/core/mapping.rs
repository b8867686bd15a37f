//! Field-to-column mapping built once per run from the Schema Descriptor.
//!
//! [`RowMapper`] pairs every written column with the accessor of the field
//! that feeds it, so extracting a row is a fixed walk over function pointers
//! with no per-row name lookup.

use super::schema::{ColumnDef, Entity, TableName, TableSchema};
use super::value::{Row, SqlValue};
use crate::error::{LoadError, Result};

/// The columns a run writes, in transport order.
///
/// When identity is not kept the identity column is left out of `columns`
/// and reported in `generated_identity`, so backends can ask the
/// destination to return the values it generates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteShape {
    pub table: TableName,
    pub columns: Vec<ColumnDef>,
    pub generated_identity: Option<ColumnDef>,
    pub keep_identity: bool,
}

impl WriteShape {
    /// Derive the written columns from a resolved schema.
    pub fn new(schema: &TableSchema, keep_identity: bool) -> Self {
        let mut columns = Vec::with_capacity(schema.columns.len());
        let mut generated_identity = None;
        for col in &schema.columns {
            if col.is_identity && !keep_identity {
                generated_identity = Some(col.clone());
            } else {
                columns.push(col.clone());
            }
        }
        Self {
            table: schema.table.clone(),
            columns,
            generated_identity,
            keep_identity,
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        self.table.to_string()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of the identity column among written columns, when kept.
    pub fn kept_identity_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.is_identity)
    }
}

/// Static accessor table for one record type against one write shape.
pub struct RowMapper<E: Entity> {
    shape: WriteShape,
    readers: Vec<fn(&E) -> SqlValue<'_>>,
}

impl<E: Entity> RowMapper<E> {
    /// Pair every written column with the field of the same name.
    ///
    /// A column without a matching field, or a field whose declared
    /// nullability disagrees with the column, is a configuration error
    /// reported as `SchemaResolution`.
    pub fn build(schema: &TableSchema, keep_identity: bool) -> Result<Self> {
        let shape = WriteShape::new(schema, keep_identity);
        let fields = E::fields();
        let mut readers = Vec::with_capacity(shape.columns.len());

        for col in &shape.columns {
            let field = fields.iter().find(|f| f.name == col.name).ok_or_else(|| {
                LoadError::SchemaResolution(format!(
                    "column {}.{} has no field on record type {}",
                    shape.table,
                    col.name,
                    E::entity_name()
                ))
            })?;
            if field.nullable && !col.is_nullable && !col.is_identity {
                return Err(LoadError::SchemaResolution(format!(
                    "field {}.{} is nullable but column {}.{} is NOT NULL",
                    E::entity_name(),
                    field.name,
                    shape.table,
                    col.name
                )));
            }
            readers.push(field.read);
        }

        Ok(Self { shape, readers })
    }

    pub fn shape(&self) -> &WriteShape {
        &self.shape
    }

    /// Extract a row borrowing from the record.
    pub fn row<'r>(&self, record: &'r E) -> Vec<SqlValue<'r>> {
        self.readers.iter().map(|read| read(record)).collect()
    }

    /// Extract an owned row for queuing.
    pub fn owned_row(&self, record: &E) -> Row {
        self.readers
            .iter()
            .map(|read| read(record).into_owned())
            .collect()
    }
}
