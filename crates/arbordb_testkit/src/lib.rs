//! # ArborDB Testkit
//!
//! Test utilities for ArborDB.
//!
//! This crate provides:
//! - Property-based test generators using proptest
//! - Scripted commit cohorts, an in-memory backing store and recording RPC
//!   fixtures
//! - A shard replica harness for end-to-end log and snapshot tests
//! - Fuzz harnesses for every decoder
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arbordb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn commit_reaches_every_cohort() {
//!     let log = CallLog::new();
//!     let cohorts = vec![
//!         ScriptedCohort::new("shard-1", &log).shared(),
//!         ScriptedCohort::new("shard-2", &log).shared(),
//!     ];
//!     // ... submit through a CommitCoordinator
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use integration::*;
