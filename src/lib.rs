//! Album acquisition service.
//!
//! Tracks album download jobs across a library indexer and a P2P file
//! network, and keeps them moving with background sweeps.

pub mod acquisition;
pub mod background_jobs;
pub mod config;
pub mod sqlite_persistence;
