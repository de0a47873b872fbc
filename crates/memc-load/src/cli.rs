//! Command-line front end
//!
//! Every option can also come from the environment (or a `.env` file loaded
//! before parsing).

use clap::Parser;
use memc_common::logging::LogFormat;
use memc_common::Result;
use std::path::PathBuf;

use crate::config::{
    parse_store_override, CategoryRegistry, LoaderConfig, DEFAULT_PATTERN, DEFAULT_QUEUE_DEPTH,
    DEFAULT_STORE_TIMEOUT_SECS, DEFAULT_WORKERS_PER_CATEGORY,
};

/// Load installed-apps batches into per-category memcached stores
#[derive(Parser, Debug)]
#[command(name = "memc-load")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log what would be written instead of writing
    #[arg(long, env = "MEMC_LOAD_DRY")]
    pub dry: bool,

    /// Glob selecting the batch files
    #[arg(long, env = "MEMC_LOAD_PATTERN", default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    #[arg(long, env = "MEMC_LOAD_IDFA", default_value = "127.0.0.1:33013")]
    pub idfa: String,

    #[arg(long, env = "MEMC_LOAD_GAID", default_value = "127.0.0.1:33014")]
    pub gaid: String,

    #[arg(long, env = "MEMC_LOAD_ADID", default_value = "127.0.0.1:33015")]
    pub adid: String,

    #[arg(long, env = "MEMC_LOAD_DVID", default_value = "127.0.0.1:33016")]
    pub dvid: String,

    /// Extra or overriding category store, as NAME=ADDR (repeatable)
    #[arg(long = "store", value_name = "NAME=ADDR")]
    pub stores: Vec<String>,

    /// Writers per category
    #[arg(long, env = "MEMC_LOAD_WORKERS", default_value_t = DEFAULT_WORKERS_PER_CATEGORY)]
    pub workers: usize,

    /// Records each writer queue holds before reading blocks
    #[arg(long, env = "MEMC_LOAD_QUEUE_DEPTH", default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Timeout for a single store write, in seconds
    #[arg(long, env = "MEMC_LOAD_TIMEOUT_SECS", default_value_t = DEFAULT_STORE_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Log to this file instead of stderr
    #[arg(long, env = "MEMC_LOAD_LOG")]
    pub log: Option<PathBuf>,

    /// Log line format (text or json)
    #[arg(long, env = "MEMC_LOAD_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Check the payload codec on built-in samples and exit
    #[arg(long)]
    pub test: bool,
}

impl Cli {
    /// Build and validate the loader settings.
    ///
    /// `--store` entries are applied after the built-in categories, so they
    /// can override them.
    pub fn into_config(self) -> Result<LoaderConfig> {
        let mut stores = CategoryRegistry::from_pairs([
            ("idfa", self.idfa),
            ("gaid", self.gaid),
            ("adid", self.adid),
            ("dvid", self.dvid),
        ]);
        for entry in &self.stores {
            let (category, address) = parse_store_override(entry)?;
            stores.insert(category, address);
        }

        let config = LoaderConfig {
            dry_run: self.dry,
            pattern: self.pattern,
            workers_per_category: self.workers,
            queue_depth: self.queue_depth,
            store_timeout_secs: self.timeout_secs,
            stores,
        };
        config.validate()?;
        Ok(config)
    }

    /// Dry runs log their would-be writes at debug level.
    pub fn wants_debug(&self) -> bool {
        self.verbose || self.dry
    }
}
