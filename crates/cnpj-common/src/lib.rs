//! CNPJ Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging bootstrap, and error handling for the CNPJ ingestion workspace.
//!
//! # Overview
//!
//! - **Types**: snapshot periods, entity kinds, and discovered source files
//! - **Logging**: `tracing` subscriber setup driven by environment or builder
//! - **Errors**: the common error enum and `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use cnpj_common::types::{EntityKind, Period};
//!
//! fn main() -> cnpj_common::Result<()> {
//!     let period: Period = "2024-03".parse()?;
//!     let kind = EntityKind::from_archive_name("Estabelecimentos7.zip");
//!     println!("{period}: {kind:?}");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
