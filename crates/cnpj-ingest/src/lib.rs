//! CNPJ Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads the monthly open-data snapshots of the Brazilian company registry
//! into a relational store, one period at a time, skipping files a previous
//! run already applied.
//!
//! # Pipeline
//!
//! 1. [`archive`]: list periods and archives on the remote host, download with retry
//! 2. [`extract`] and [`decode`]: unzip members and decode ISO-8859-1 rows
//! 3. [`transform`]: typed records with normalised dates, decimals and codes
//! 4. [`loader`]: validate natural keys and upsert batches into a [`sink::Sink`]
//! 5. [`ledger`]: remember fully applied files
//!
//! [`orchestrator::Orchestrator`] drives the whole run.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cnpj_ingest::archive::HttpDirectoryHost;
//! use cnpj_ingest::config::IngestConfig;
//! use cnpj_ingest::orchestrator::Orchestrator;
//! use cnpj_ingest::sink::PostgresSink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let host = HttpDirectoryHost::new(&config.base_url, config.connect_timeout(), config.read_timeout())?;
//!     let sink = PostgresSink::connect("postgres://localhost/cnpj", 5).await?;
//!     sink.migrate().await?;
//!
//!     let mut orchestrator = Orchestrator::new(config, Arc::new(host), Arc::new(sink))?;
//!     let summary = orchestrator.run().await?;
//!     println!("{}", summary.render());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod decode;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod loader;
pub mod orchestrator;
pub mod sink;
pub mod transform;

pub use error::{IngestError, Result};
