//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::loader::LoadOptions;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination database.
    pub target: TargetConfig,

    /// Table the records are loaded into.
    #[serde(default)]
    pub table: TableConfig,

    /// Load parameters shared by every strategy.
    #[serde(default)]
    pub load: LoadOptions,

    /// Where the records come from.
    #[serde(default)]
    pub input: InputConfig,

    /// Benchmark suite selection.
    #[serde(default)]
    pub bench: BenchConfig,
}

/// Destination backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Postgres,
    /// In-process table store; nothing leaves the process.
    Memory,
}

/// Destination database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Backend type (default: "postgres").
    #[serde(default)]
    pub r#type: TargetKind,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Connect timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Destination table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Table name (default: "Example").
    #[serde(default = "default_table_name")]
    pub name: String,

    /// Create the table before loading if it does not exist.
    #[serde(default)]
    pub create_if_missing: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            schema: default_dbo_schema(),
            name: default_table_name(),
            create_if_missing: false,
        }
    }
}

/// Record source: a JSON file or generated records. Exactly one is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// JSON array of records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Number of synthetic records to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<usize>,
}

/// Benchmark configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Labels of the suite cases to run. Empty runs the full suite.
    #[serde(default)]
    pub strategies: Vec<String>,
}

fn default_pg_port() -> u16 {
    5432
}

fn default_require() -> String {
    "require".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_table_name() -> String {
    "Example".to_string()
}
