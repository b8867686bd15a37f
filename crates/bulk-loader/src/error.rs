//! Error types for the bulk loader.

use std::error::Error as StdError;

use thiserror::Error;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::WrongType;

/// Exit status for configuration problems (bad YAML, invalid options).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit status when a record type cannot be mapped to a table.
pub const EXIT_SCHEMA_ERROR: u8 = 2;
/// Exit status when the destination rejected a row.
pub const EXIT_CONSTRAINT_ERROR: u8 = 3;
/// Exit status for lost connections and timeouts.
pub const EXIT_CONNECTIVITY_ERROR: u8 = 4;
/// Exit status for any other database failure.
pub const EXIT_TARGET_ERROR: u8 = 5;
/// Exit status for malformed JSON input.
pub const EXIT_JSON_ERROR: u8 = 6;
/// Exit status for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for load operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Invalid configuration or load options. Raised before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A record type has no table mapping, or a column type has no transport type.
    #[error("Schema resolution failed: {0}")]
    SchemaResolution(String),

    /// The destination rejected a row.
    #[error("Constraint violation on {table}: {message}")]
    ConstraintViolation { table: String, message: String },

    /// The connection dropped or a statement timed out mid-run.
    #[error("Connectivity error while {context}: {message}")]
    Connectivity { context: String, message: String },

    /// Data transfer failed for a specific table.
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Target database error that does not fit a more specific class.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoadError {
    /// Create a ConstraintViolation error.
    pub fn constraint(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::ConstraintViolation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Connectivity error with context about where it occurred.
    pub fn connectivity(context: impl Into<String>, message: impl ToString) -> Self {
        LoadError::Connectivity {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Classify a PostgreSQL error raised while writing to `table`.
    ///
    /// Integrity violations (SQLSTATE class 23) and string truncation become
    /// `ConstraintViolation`. Closed connections, socket failures, cancelled
    /// statements and server shutdowns become `Connectivity`. A value whose
    /// type the column does not accept is a `SchemaResolution` failure.
    /// Everything else stays `Target`.
    pub fn from_pg(table: &str, context: &str, err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return Self::connectivity(context, err);
        }
        match err.code() {
            Some(code) if code.code().starts_with("23") => {
                let message = err
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| err.to_string());
                Self::constraint(table, message)
            }
            Some(code) if *code == SqlState::STRING_DATA_RIGHT_TRUNCATION => {
                Self::constraint(table, err.to_string())
            }
            Some(code)
                if *code == SqlState::QUERY_CANCELED
                    || *code == SqlState::ADMIN_SHUTDOWN
                    || *code == SqlState::CONNECTION_FAILURE
                    || code.code().starts_with("08") =>
            {
                Self::connectivity(context, err)
            }
            Some(_) => LoadError::Target(err),
            None => {
                let classified = Self::client_failure(table, context, err.source());
                classified.unwrap_or(LoadError::Target(err))
            }
        }
    }

    /// Classify a client-side failure by its cause. `None` leaves it to the caller.
    fn client_failure(
        table: &str,
        context: &str,
        cause: Option<&(dyn StdError + 'static)>,
    ) -> Option<Self> {
        let cause = cause?;
        if cause.is::<WrongType>() {
            Some(LoadError::SchemaResolution(format!(
                "{} while {} on {}",
                cause, context, table
            )))
        } else if cause.is::<std::io::Error>() {
            Some(Self::connectivity(context, cause))
        } else {
            None
        }
    }

    /// Whether the destination rejected a row.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, LoadError::ConstraintViolation { .. })
    }

    /// Process exit status for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) | LoadError::Yaml(_) => EXIT_CONFIG_ERROR,
            LoadError::SchemaResolution(_) => EXIT_SCHEMA_ERROR,
            LoadError::ConstraintViolation { .. } => EXIT_CONSTRAINT_ERROR,
            LoadError::Connectivity { .. } => EXIT_CONNECTIVITY_ERROR,
            LoadError::Transfer { .. } | LoadError::Target(_) => EXIT_TARGET_ERROR,
            LoadError::Json(_) => EXIT_JSON_ERROR,
            LoadError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;
