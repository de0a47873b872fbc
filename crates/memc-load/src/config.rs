//! Loader configuration
//!
//! Built once at startup (see [`crate::cli::Cli::into_config`]) and shared
//! read-only by every batch.

use memc_common::{LoadError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_PATTERN: &str = "/data/appsinstalled/*.tsv.gz";

/// Writers started per category.
pub const DEFAULT_WORKERS_PER_CATEGORY: usize = 3;

/// Records a worker queue holds before the dispatcher blocks.
pub const DEFAULT_QUEUE_DEPTH: usize = 1;

pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;

/// A batch whose `failed / ok` stays below this loaded cleanly.
pub const NORMAL_ERR_RATE: f64 = 0.01;

/// Built-in categories and their default store addresses.
pub const DEFAULT_STORES: [(&str, &str); 4] = [
    ("idfa", "127.0.0.1:33013"),
    ("gaid", "127.0.0.1:33014"),
    ("adid", "127.0.0.1:33015"),
    ("dvid", "127.0.0.1:33016"),
];

/// Category name to store address.
///
/// Open set: categories come from configuration, not from code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryRegistry {
    stores: BTreeMap<String, String>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let stores = pairs
            .into_iter()
            .map(|(category, address)| (category.into(), address.into()))
            .collect();
        Self { stores }
    }

    /// Add or replace a category.
    pub fn insert(&mut self, category: impl Into<String>, address: impl Into<String>) {
        self.stores.insert(category.into(), address.into());
    }

    pub fn address(&self, category: &str) -> Option<&str> {
        self.stores.get(category).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.stores.iter().map(|(c, a)| (c.as_str(), a.as_str()))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// Parse a `NAME=ADDR` store override.
pub fn parse_store_override(entry: &str) -> Result<(String, String)> {
    let (category, address) = entry
        .split_once('=')
        .ok_or_else(|| LoadError::config(format!("store '{}' must look like NAME=ADDR", entry)))?;
    let (category, address) = (category.trim(), address.trim());
    if category.is_empty() || address.is_empty() {
        return Err(LoadError::config(format!(
            "store '{}' needs both a category and an address",
            entry
        )));
    }
    Ok((category.to_string(), address.to_string()))
}

/// Validated loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Log what would be written instead of writing
    pub dry_run: bool,

    /// Glob selecting the batch files
    pub pattern: String,

    pub workers_per_category: usize,

    pub queue_depth: usize,

    pub store_timeout_secs: u64,

    pub stores: CategoryRegistry,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            pattern: DEFAULT_PATTERN.to_string(),
            workers_per_category: DEFAULT_WORKERS_PER_CATEGORY,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            stores: CategoryRegistry::from_pairs(DEFAULT_STORES),
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers_per_category == 0 {
            return Err(LoadError::config("workers per category must be greater than 0"));
        }
        if self.queue_depth == 0 {
            return Err(LoadError::config("queue depth must be at least 1"));
        }
        if self.store_timeout_secs == 0 {
            return Err(LoadError::config("store timeout must be greater than 0"));
        }
        if self.pattern.trim().is_empty() {
            return Err(LoadError::config("batch pattern is empty"));
        }
        if self.stores.is_empty() {
            return Err(LoadError::config("no stores configured"));
        }
        for (category, address) in self.stores.iter() {
            if category.is_empty() || address.is_empty() {
                return Err(LoadError::config(format!(
                    "store '{}={}' needs both a category and an address",
                    category, address
                )));
            }
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Workers started for every batch across all categories.
    pub fn total_workers(&self) -> usize {
        self.stores.len() * self.workers_per_category
    }
}
