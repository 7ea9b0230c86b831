//! Database module for sitewatch.
//!
//! Provides SQLite storage for targets, downtime state, the event log and
//! admin identities, with a one-time import of legacy flat files.

mod models;
mod store;

pub use models::*;
pub use store::*;
