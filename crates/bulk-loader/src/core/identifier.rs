//! Identifier validation and quoting for generated SQL.
//!
//! Table and column names cannot be bound as statement parameters, so every
//! statement the loader builds splices them in quoted form. Names are
//! validated first: empty names, embedded NUL bytes and over-long names are
//! rejected as configuration errors.

use crate::error::{LoadError, Result};

use super::schema::TableName;

/// Maximum identifier length (PostgreSQL truncates at 63 bytes, SQL Server
/// allows 128 characters; the looser bound is enforced here).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LoadError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(LoadError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(LoadError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL table name with schema.
pub fn qualify_pg(table: &TableName) -> Result<String> {
    Ok(format!(
        "{}.{}",
        quote_pg(&table.schema)?,
        quote_pg(&table.name)?
    ))
}

/// Quote and join a column list: `"a", "b", "c"`.
pub fn column_list_pg<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<String> {
    let quoted: Result<Vec<String>> = names.into_iter().map(quote_pg).collect();
    Ok(quoted?.join(", "))
}
