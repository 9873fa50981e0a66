//! Compliance submission pipeline for municipal procurement and financial
//! records bound for the state audit court (TCE).

pub mod compliance;
pub mod config;
pub mod error;
pub mod telemetry;
