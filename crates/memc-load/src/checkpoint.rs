//! Processed-batch markers
//!
//! A batch is marked processed by renaming `dir/name` to `dir/.name`. The
//! rename is the only persisted state; discovery never picks up dot files.

use memc_common::{LoadError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub const PROCESSED_PREFIX: &str = ".";

/// Where `path` ends up once processed.
pub fn processed_path(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| LoadError::Checkpoint {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "batch path has no file name"),
    })?;

    let mut marked = std::ffi::OsString::from(PROCESSED_PREFIX);
    marked.push(name);
    Ok(path.with_file_name(marked))
}

pub fn is_processed(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(PROCESSED_PREFIX))
}

/// Rename the batch to its processed form. Any failure is fatal for the run.
pub fn mark_processed(path: &Path) -> Result<PathBuf> {
    let target = processed_path(path)?;
    std::fs::rename(path, &target).map_err(|source| LoadError::Checkpoint {
        path: path.to_path_buf(),
        source,
    })?;
    info!(from = %path.display(), to = %target.display(), "batch checkpointed");
    Ok(target)
}
