//! Batch Planner: partitions a record sequence into commit-sized batches.
//!
//! Batches are produced lazily, in input order, as slices of the caller's
//! records. Concatenating them reconstructs the input exactly.

use std::slice::Chunks;

use crate::error::{LoadError, Result};

fn check_commit_size(commit_size: usize) -> Result<()> {
    if commit_size == 0 {
        return Err(LoadError::Config(
            "commit_size must be greater than 0".into(),
        ));
    }
    Ok(())
}

/// Plan read-only batches of at most `commit_size` records.
pub fn plan<E>(records: &[E], commit_size: usize) -> Result<Chunks<'_, E>> {
    check_commit_size(commit_size)?;
    Ok(records.chunks(commit_size))
}

/// Number of batches `plan` yields: `ceil(len / commit_size)`.
pub fn batch_count(len: usize, commit_size: usize) -> Result<usize> {
    check_commit_size(commit_size)?;
    Ok(len.div_ceil(commit_size))
}
