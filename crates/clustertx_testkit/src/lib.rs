//! # clustertx testkit
//!
//! Test utilities for clustertx.
//!
//! This crate provides:
//! - [`InProcessLog`], a replicated log that delivers every committed entry
//!   to each subscriber on its own thread, with fault injection
//! - [`InMemoryCommitter`], a local commit path that survives restarts
//! - [`Cluster`], several members sharing one log
//! - Fixtures and proptest generators
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clustertx_testkit::prelude::*;
//!
//! let cluster = Cluster::new(3, fast_config());
//! let tx_id = cluster.member(0).commit(&transaction("a"))?;
//! assert!(cluster.wait_for_applied(1, Duration::from_secs(5)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod committer;
pub mod fixtures;
pub mod generators;
pub mod log;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cluster::*;
    pub use crate::committer::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::log::*;
}

pub use cluster::{Cluster, ClusterMember};
pub use committer::{CommittedTransaction, InMemoryCommitter};
pub use fixtures::{fast_config, steady_config, transaction, transaction_under, TestLedgerDir};
pub use log::InProcessLog;
