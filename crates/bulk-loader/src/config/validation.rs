//! Configuration validation.

use super::{Config, TargetKind};
use crate::bench::BenchCase;
use crate::core::identifier::validate_identifier;
use crate::error::{LoadError, Result};
use crate::target::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Target validation
    if config.target.r#type == TargetKind::Postgres {
        if config.target.host.is_empty() {
            return Err(LoadError::Config("target.host is required".into()));
        }
        if config.target.database.is_empty() {
            return Err(LoadError::Config("target.database is required".into()));
        }
        if config.target.user.is_empty() {
            return Err(LoadError::Config("target.user is required".into()));
        }
        SslMode::parse(&config.target.ssl_mode)?;
        if config.target.connect_timeout_secs == 0 {
            return Err(LoadError::Config(
                "target.connect_timeout_secs must be at least 1".into(),
            ));
        }
    }

    // Table validation
    validate_identifier(&config.table.schema)
        .map_err(|e| LoadError::Config(format!("table.schema: {}", e)))?;
    validate_identifier(&config.table.name)
        .map_err(|e| LoadError::Config(format!("table.name: {}", e)))?;

    // Load options shared by every strategy
    if config.load.commit_size == 0 {
        return Err(LoadError::Config("load.commit_size must be at least 1".into()));
    }
    if config.load.transport_chunk_size == 0 {
        return Err(LoadError::Config(
            "load.transport_chunk_size must be at least 1".into(),
        ));
    }
    if config.load.recreate_session && config.load.use_atomic_transaction {
        return Err(LoadError::Config(
            "load.use_atomic_transaction cannot be combined with load.recreate_session".into(),
        ));
    }

    // Input validation
    if config.input.path.is_some() && config.input.generate.is_some() {
        return Err(LoadError::Config(
            "input.path and input.generate are mutually exclusive".into(),
        ));
    }
    if let Some(0) = config.input.generate {
        return Err(LoadError::Config("input.generate must be at least 1".into()));
    }

    // Bench validation
    for label in &config.bench.strategies {
        BenchCase::find(label)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BenchConfig, InputConfig, TableConfig, TargetConfig};
    use crate::loader::LoadOptions;

    fn valid_config() -> Config {
        Config {
            target: TargetConfig {
                r#type: TargetKind::Postgres,
                host: "localhost".to_string(),
                port: 5432,
                database: "bench".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                ssl_mode: "disable".to_string(),
                connect_timeout_secs: 30,
            },
            table: TableConfig::default(),
            load: LoadOptions::default(),
            input: InputConfig {
                path: None,
                generate: Some(1000),
            },
            bench: BenchConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_target_host() {
        let mut config = valid_config();
        config.target.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_memory_target_needs_no_connection_details() {
        let mut config = valid_config();
        config.target.r#type = TargetKind::Memory;
        config.target.host = "".to_string();
        config.target.database = "".to_string();
        config.target.user = "".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_commit_size() {
        let mut config = valid_config();
        config.load.commit_size = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("commit_size"));
    }

    #[test]
    fn test_atomic_with_recreate_session() {
        let mut config = valid_config();
        config.load.recreate_session = true;
        config.load.use_atomic_transaction = true;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_input_sources_are_exclusive() {
        let mut config = valid_config();
        config.input.path = Some("records.json".into());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_bench_case() {
        let mut config = valid_config();
        config.bench.strategies = vec!["range-insert".to_string(), "entity-framework".to_string()];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("entity-framework"));
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_from_yaml_applies_defaults() {
        let yaml = r#"
target:
  type: memory
input:
  generate: 10
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.target.r#type, TargetKind::Memory);
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.table.schema, "dbo");
        assert_eq!(config.table.name, "Example");
        assert_eq!(config.load.commit_size, 100);
        assert_eq!(config.load.transport_chunk_size, 2500);
        assert_eq!(config.load.preserve_identity, None);
        assert!(config.bench.strategies.is_empty());
    }

    #[test]
    fn test_from_yaml_rejects_invalid_values() {
        let yaml = r#"
target:
  type: memory
load:
  commit_size: 0
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(LoadError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_schema_uses_table_section() {
        let mut config = valid_config();
        config.table.schema = "bench".to_string();
        config.table.name = "Records".to_string();
        let schema = config.resolve_schema().unwrap();
        assert_eq!(schema.full_name(), "bench.Records");
        assert_eq!(schema.column_names(), vec!["Id", "Description", "LastModified"]);
    }
}
