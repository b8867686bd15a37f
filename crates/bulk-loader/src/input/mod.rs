//! Record sources for the benchmark.
//!
//! Records come either from a JSON array on disk or from a deterministic
//! generator. Both produce ids in input order so identity-preserving runs
//! have predictable keys.

use std::path::Path;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::info;

use crate::config::InputConfig;
use crate::core::record::Example;
use crate::error::{LoadError, Result};

/// Every record whose id is a multiple of this has no description.
const NULL_DESCRIPTION_EVERY: i32 = 10;

/// Read a JSON array of records.
pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Vec<Example>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let records: Vec<Example> = serde_json::from_str(&content)?;
    info!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Generate `count` records with ids `1..=count`.
pub fn generate(count: usize) -> Result<Vec<Example>> {
    let count = i32::try_from(count).map_err(|_| {
        LoadError::Config(format!("cannot generate {} records: ids are 32-bit", count))
    })?;
    let base = base_timestamp();

    Ok((1..=count)
        .map(|id| {
            let description = (id % NULL_DESCRIPTION_EVERY != 0).then(|| format!("Example {}", id));
            Example::new(
                id,
                description.as_deref(),
                base + Duration::seconds(i64::from(id)),
            )
        })
        .collect())
}

/// Load the records an input section describes.
pub fn load(input: &InputConfig) -> Result<Vec<Example>> {
    match (&input.path, input.generate) {
        (Some(path), None) => read_json(path),
        (None, Some(count)) => generate(count),
        (Some(_), Some(_)) => Err(LoadError::Config(
            "input.path and input.generate are mutually exclusive".into(),
        )),
        (None, None) => Err(LoadError::Config(
            "input.path or input.generate is required".into(),
        )),
    }
}

fn base_timestamp() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2014, 9, 22)
        .and_then(|d| d.and_hms_opt(8, 36, 39))
        .unwrap_or_default()
}
