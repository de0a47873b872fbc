//! memc-load library
//!
//! Loads gzip-compressed batches of installed-apps records into per-category
//! memcached stores.
//!
//! # Pipeline
//!
//! - [`dispatcher`] reads a batch and parses lines with [`record`]
//! - records are routed to the writers of their category ([`worker`])
//! - writers encode payloads with [`codec`] and put them through [`store`]
//! - [`stats`] merges writer counters once the batch is drained
//! - [`controller`] decides and checkpoints the batch ([`checkpoint`])
//!
//! # Example
//!
//! ```no_run
//! use memc_load::config::LoaderConfig;
//! use memc_load::controller::BatchController;
//! use memc_load::store::MemcacheConnector;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> memc_common::Result<()> {
//!     let controller = BatchController::new(
//!         Arc::new(LoaderConfig::default()),
//!         Arc::new(MemcacheConnector),
//!     );
//!     let summary = controller.run().await?;
//!     println!("{} batches checkpointed", summary.checkpointed);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod checkpoint;
pub mod cli;
pub mod codec;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod dispatcher;
pub mod record;
pub mod stats;
pub mod store;
pub mod worker;
