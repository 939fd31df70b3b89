//! # Services module
//!
//! This module provide services to interact with the relational database
//! service, resolve the account and reconcile declared instances.
pub mod aws;
pub mod cfg;
pub mod identity;
pub mod rds;
#[cfg(feature = "metrics")]
pub mod telemetry;
