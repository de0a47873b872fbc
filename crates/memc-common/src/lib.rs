//! memc-load common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the memc-load workspace.
//!
//! - **Error Handling**: the run-level [`LoadError`] and its [`Result`] alias
//! - **Logging**: `tracing` subscriber initialisation driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use memc_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! fn main() -> memc_common::Result<()> {
//!     let config = LogConfig::builder().level(LogLevel::Debug).build();
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("loader started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{LoadError, Result};
