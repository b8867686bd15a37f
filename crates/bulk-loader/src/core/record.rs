//! The `Example` record loaded by the benchmark.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::schema::{Entity, Field};
use super::value::SqlValue;
use crate::error::{LoadError, Result};

/// One flat record: surrogate key, bounded description, modification stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Example {
    /// Surrogate key. Pre-assigned when identity is preserved, otherwise
    /// overwritten with the value the destination generates.
    pub id: i32,

    /// Free text, at most 500 characters.
    #[serde(default)]
    pub description: Option<String>,

    /// Concurrency stamp; carried through, never compared by the loader.
    pub last_modified: NaiveDateTime,
}

impl Example {
    pub fn new(id: i32, description: Option<&str>, last_modified: NaiveDateTime) -> Self {
        Self {
            id,
            description: description.map(str::to_string),
            last_modified,
        }
    }
}

fn read_id(e: &Example) -> SqlValue<'_> {
    SqlValue::I32(e.id)
}

fn read_description(e: &Example) -> SqlValue<'_> {
    SqlValue::opt_text(e.description.as_deref())
}

fn read_last_modified(e: &Example) -> SqlValue<'_> {
    SqlValue::DateTime(e.last_modified)
}

static EXAMPLE_FIELDS: [Field<Example>; 3] = [
    Field {
        name: "Id",
        declared_type: "int",
        nullable: false,
        identity: true,
        read: read_id,
    },
    Field {
        name: "Description",
        declared_type: "nvarchar(500)",
        nullable: true,
        identity: false,
        read: read_description,
    },
    Field {
        name: "LastModified",
        declared_type: "datetime",
        nullable: false,
        identity: false,
        read: read_last_modified,
    },
];

impl Entity for Example {
    fn entity_name() -> &'static str {
        "Example"
    }

    fn fields() -> &'static [Field<Self>] {
        &EXAMPLE_FIELDS
    }

    fn assign_identity(&mut self, id: i64) -> Result<()> {
        self.id = i32::try_from(id).map_err(|_| {
            LoadError::SchemaResolution(format!(
                "generated identity {} does not fit Example.Id (int)",
                id
            ))
        })?;
        Ok(())
    }
}
