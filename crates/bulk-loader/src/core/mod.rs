//! Core types shared by every loader strategy.
//!
//! - [`schema`]: the Schema Descriptor (record type to table and columns)
//! - [`mapping`]: static field-to-column accessor tables
//! - [`value`]: SQL values as they travel to the destination
//! - [`typemap`]: declared column types to primitive transport types
//! - [`identifier`]: identifier validation and quoting
//! - [`record`]: the `Example` record

pub mod identifier;
pub mod mapping;
pub mod record;
pub mod schema;
pub mod typemap;
pub mod value;

pub use mapping::{RowMapper, WriteShape};
pub use record::Example;
pub use schema::{ColumnDef, Entity, Field, PrimitiveType, SchemaRegistry, TableName, TableSchema};
pub use value::{Row, SqlValue};
