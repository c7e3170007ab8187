//! # strata-core
//!
//! Core types for the Strata work-item hierarchy orchestrator.
//!
//! Strata creates Epic → Feature → Task hierarchies inside a remote
//! project-tracking service. The tracker is the only durable store:
//!
//! - Work items ARE remote issues (the issue number is the primary identifier)
//! - Parent links ARE sub-issue relationships plus a `Parent: #N` body line
//! - Review state IS the board's status field
//! - Documents ARE repository files

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::StrataConfig;
pub use error::{Result, StrataError};
pub use types::*;
