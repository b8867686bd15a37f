//! SQL value types used to move record fields onto the wire.
//!
//! Values borrow text from the record they were read from where possible;
//! the change tracker keeps owned copies via [`SqlValue::into_owned`].

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDateTime};

use super::schema::PrimitiveType;

/// SQL value enum for type-safe row handling.
///
/// `Null` carries the primitive type of its column so binary encoders can
/// emit the right wire representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// NULL with type hint for correct wire format encoding.
    Null(PrimitiveType),

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 64-bit floating point (double precision/float8).
    F64(f64),

    /// Text/string data with zero-copy support.
    Text(Cow<'a, str>),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
        }
    }

    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Integer view of the value, used for identity columns.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Length of a text value in characters.
    #[must_use]
    pub fn text_len(&self) -> Option<usize> {
        match self {
            SqlValue::Text(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    /// The value a NULL collapses to when nulls are not kept.
    #[must_use]
    pub fn default_for(primitive: PrimitiveType) -> SqlValue<'static> {
        match primitive {
            PrimitiveType::Bool => SqlValue::Bool(false),
            PrimitiveType::Int16 => SqlValue::I16(0),
            PrimitiveType::Int32 => SqlValue::I32(0),
            PrimitiveType::Int64 => SqlValue::I64(0),
            PrimitiveType::Float64 => SqlValue::F64(0.0),
            PrimitiveType::Text => SqlValue::Text(Cow::Borrowed("")),
            PrimitiveType::Timestamp => SqlValue::DateTime(NaiveDateTime::default()),
            PrimitiveType::TimestampTz => {
                SqlValue::DateTimeOffset(NaiveDateTime::default().and_utc().fixed_offset())
            }
        }
    }
}

// Convenience constructors for common cases
impl<'a> SqlValue<'a> {
    /// Create a text value from a borrowed string slice.
    #[must_use]
    pub fn text_borrowed(s: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(s))
    }

    /// Create a text value from an owned String.
    #[must_use]
    pub fn text_owned(s: String) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s))
    }

    /// Borrowed text, or a typed NULL when absent.
    #[must_use]
    pub fn opt_text(s: Option<&'a str>) -> Self {
        match s {
            Some(s) => SqlValue::Text(Cow::Borrowed(s)),
            None => SqlValue::Null(PrimitiveType::Text),
        }
    }
}

/// An owned row as queued in a change tracker.
pub type Row = Vec<SqlValue<'static>>;
