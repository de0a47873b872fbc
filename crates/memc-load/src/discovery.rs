//! Batch discovery

use glob::MatchOptions;
use memc_common::{LoadError, Result};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::checkpoint::is_processed;

/// Batches matching `pattern`, sorted, excluding processed (dot) files.
///
/// An invalid pattern ends the run. Entries that cannot be read are logged and
/// left out.
pub fn discover(pattern: &str) -> Result<Vec<PathBuf>> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    let entries = glob::glob_with(pattern, options).map_err(|e| LoadError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() && !is_processed(&path) => paths.push(path),
            Ok(path) => debug!(path = %path.display(), "skipping non-batch entry"),
            Err(e) => warn!(error = %e, "cannot read batch candidate"),
        }
    }
    paths.sort();
    Ok(paths)
}
