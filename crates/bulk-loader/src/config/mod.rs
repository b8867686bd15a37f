//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use crate::core::record::Example;
use crate::core::schema::{SchemaRegistry, TableSchema};
use crate::error::Result;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Resolve the configured table for `Example` records.
    ///
    /// The record type's field table supplies the columns; the `table`
    /// section supplies where they live.
    pub fn resolve_schema(&self) -> Result<TableSchema> {
        SchemaRegistry::new()
            .map::<Example>(&self.table.schema, &self.table.name)
            .resolve::<Example>()
    }
}
