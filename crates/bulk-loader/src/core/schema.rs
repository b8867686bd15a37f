//! Schema Descriptor: resolves a record type to its destination table.
//!
//! A record type describes itself through [`Entity::fields`], a static table
//! of column declarations and accessors. The caller registers which physical
//! table each record type lands in, then resolves the descriptor once per run
//! and hands the result to every batch. Resolution is a pure lookup over that
//! metadata; it does not cache, and re-resolving per batch is the caller's
//! mistake to avoid.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::typemap;
use super::value::SqlValue;
use crate::error::{LoadError, Result};

/// Primitive transport type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float64,
    Text,
    Timestamp,
    TimestampTz,
}

impl PrimitiveType {
    /// Whether the type can back an identity column.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PrimitiveType::Int16 | PrimitiveType::Int32 | PrimitiveType::Int64
        )
    }
}

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A resolved physical column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name, matching the destination exactly.
    pub name: String,
    /// Transport type.
    pub primitive: PrimitiveType,
    /// Maximum length in characters for text columns.
    pub max_length: Option<usize>,
    /// Whether NULL is accepted.
    pub is_nullable: bool,
    /// Whether the destination generates this column's values.
    pub is_identity: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, primitive: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            primitive,
            max_length: None,
            is_nullable: true,
            is_identity: false,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self.is_nullable = false;
        self
    }
}

/// Resolved table descriptor: table name plus ordered columns.
///
/// Column order and naming must match the destination's physical definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: TableName,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(table: TableName, columns: Vec<ColumnDef>) -> Self {
        Self { table, columns }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        self.table.to_string()
    }

    /// The identity column and its position, if any.
    pub fn identity_column(&self) -> Option<(usize, &ColumnDef)> {
        self.columns.iter().enumerate().find(|(_, c)| c.is_identity)
    }

    /// Column names in physical order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Static declaration of one record field and the column it feeds.
pub struct Field<E> {
    /// Destination column name.
    pub name: &'static str,
    /// Declared column type, e.g. `nvarchar(500)`.
    pub declared_type: &'static str,
    pub nullable: bool,
    /// Key column whose value the destination generates unless identity is kept.
    pub identity: bool,
    /// Reads the field's value from a record.
    pub read: fn(&E) -> SqlValue<'_>,
}

impl<E> fmt::Debug for Field<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("declared_type", &self.declared_type)
            .field("nullable", &self.nullable)
            .field("identity", &self.identity)
            .finish()
    }
}

/// A record type that can be loaded into a table.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Logical type name, used in diagnostics.
    fn entity_name() -> &'static str;

    /// Column declarations in physical column order.
    fn fields() -> &'static [Field<Self>];

    /// Write back an identity value generated by the destination.
    ///
    /// Fails when `id` does not fit the record's key field.
    fn assign_identity(&mut self, id: i64) -> Result<()>;
}

/// Table mappings for record types, supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<TypeId, TableName>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map record type `E` to `schema.table`.
    pub fn map<E: Entity>(mut self, schema: &str, table: &str) -> Self {
        self.tables
            .insert(TypeId::of::<E>(), TableName::new(schema, table));
        self
    }

    /// Resolve record type `E` to its table descriptor.
    ///
    /// Fails with `SchemaResolution` if `E` has no mapping, if a declared
    /// type has no primitive transport type, or if more than one identity
    /// column is declared.
    pub fn resolve<E: Entity>(&self) -> Result<TableSchema> {
        let table = self.tables.get(&TypeId::of::<E>()).ok_or_else(|| {
            LoadError::SchemaResolution(format!(
                "record type {} has no table mapping",
                E::entity_name()
            ))
        })?;

        let mut columns = Vec::with_capacity(E::fields().len());
        for field in E::fields() {
            let (primitive, max_length) =
                typemap::primitive_for(field.declared_type).ok_or_else(|| {
                    LoadError::SchemaResolution(format!(
                        "{}.{}: declared type '{}' has no transport type",
                        E::entity_name(),
                        field.name,
                        field.declared_type
                    ))
                })?;
            if field.identity && !primitive.is_integer() {
                return Err(LoadError::SchemaResolution(format!(
                    "{}.{}: identity column must be an integer, got '{}'",
                    E::entity_name(),
                    field.name,
                    field.declared_type
                )));
            }
            columns.push(ColumnDef {
                name: field.name.to_string(),
                primitive,
                max_length,
                is_nullable: field.nullable && !field.identity,
                is_identity: field.identity,
            });
        }

        if columns.iter().filter(|c| c.is_identity).count() > 1 {
            return Err(LoadError::SchemaResolution(format!(
                "{} declares more than one identity column",
                E::entity_name()
            )));
        }

        Ok(TableSchema::new(table.clone(), columns))
    }
}
