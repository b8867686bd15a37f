//! Mapping from declared column types to primitive transport types.
//!
//! Record types declare their columns with SQL Server style type names
//! (`int`, `nvarchar(500)`, `datetime`), and PostgreSQL spellings are
//! accepted as well. Anything without a transport representation is
//! rejected so the Schema Descriptor can fail before a run starts.

use super::schema::{ColumnDef, PrimitiveType};

/// Split `nvarchar(500)` into `("nvarchar", Some(500))`.
///
/// `max` and unparsable arguments yield no length.
fn split_declared(declared: &str) -> (String, Option<usize>) {
    let lower = declared.trim().to_lowercase();
    match lower.find('(') {
        Some(open) => {
            let base = lower[..open].trim().to_string();
            let arg = lower[open + 1..].trim_end_matches(')').trim();
            let length = arg.split(',').next().and_then(|n| n.trim().parse().ok());
            (base, length)
        }
        None => (lower, None),
    }
}

/// Map a declared column type to its primitive type and maximum text length.
///
/// Returns `None` for types without a transport representation
/// (binary, spatial, xml, user-defined types).
pub fn primitive_for(declared: &str) -> Option<(PrimitiveType, Option<usize>)> {
    let (base, length) = split_declared(declared);
    let primitive = match base.as_str() {
        "bit" | "bool" | "boolean" => PrimitiveType::Bool,

        "tinyint" | "smallint" | "int2" => PrimitiveType::Int16,
        "int" | "integer" | "int4" | "serial" => PrimitiveType::Int32,
        "bigint" | "int8" | "bigserial" => PrimitiveType::Int64,

        "float" | "double precision" | "float8" => PrimitiveType::Float64,

        "char" | "nchar" | "varchar" | "nvarchar" | "character varying" | "text" | "ntext" => {
            return Some((PrimitiveType::Text, length));
        }

        "datetime" | "datetime2" | "smalldatetime" | "timestamp"
        | "timestamp without time zone" => PrimitiveType::Timestamp,
        "datetimeoffset" | "timestamptz" | "timestamp with time zone" => {
            PrimitiveType::TimestampTz
        }

        _ => return None,
    };
    Some((primitive, None))
}

/// PostgreSQL column type used when the loader creates a missing table.
pub fn postgres_type(col: &ColumnDef) -> String {
    match col.primitive {
        PrimitiveType::Bool => "boolean".to_string(),
        PrimitiveType::Int16 => "smallint".to_string(),
        PrimitiveType::Int32 => "integer".to_string(),
        PrimitiveType::Int64 => "bigint".to_string(),
        PrimitiveType::Float64 => "double precision".to_string(),
        PrimitiveType::Text => match col.max_length {
            Some(n) if n > 0 && n <= 10_485_760 => format!("varchar({})", n),
            _ => "text".to_string(),
        },
        PrimitiveType::Timestamp => "timestamp".to_string(),
        PrimitiveType::TimestampTz => "timestamptz".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_types() {
        assert_eq!(primitive_for("int"), Some((PrimitiveType::Int32, None)));
        assert_eq!(primitive_for("BIGINT"), Some((PrimitiveType::Int64, None)));
        assert_eq!(primitive_for("tinyint"), Some((PrimitiveType::Int16, None)));
    }

    #[test]
    fn test_string_types_carry_length() {
        assert_eq!(
            primitive_for("nvarchar(500)"),
            Some((PrimitiveType::Text, Some(500)))
        );
        assert_eq!(primitive_for("varchar(max)"), Some((PrimitiveType::Text, None)));
        assert_eq!(primitive_for("text"), Some((PrimitiveType::Text, None)));
    }

    #[test]
    fn test_datetime_types() {
        assert_eq!(
            primitive_for("datetime"),
            Some((PrimitiveType::Timestamp, None))
        );
        assert_eq!(
            primitive_for("datetimeoffset(7)"),
            Some((PrimitiveType::TimestampTz, None))
        );
    }

    #[test]
    fn test_unmappable_types() {
        assert_eq!(primitive_for("geography"), None);
        assert_eq!(primitive_for("varbinary(16)"), None);
        assert_eq!(primitive_for("money_t"), None);
    }

    #[test]
    fn test_postgres_type_for_text() {
        let col = ColumnDef::new("Description", PrimitiveType::Text).with_max_length(500);
        assert_eq!(postgres_type(&col), "varchar(500)");
        let col = ColumnDef::new("Notes", PrimitiveType::Text);
        assert_eq!(postgres_type(&col), "text");
    }
}
