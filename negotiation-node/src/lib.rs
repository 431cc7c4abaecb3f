//! Library surface for the `negotiation-node` binary.
//!
//! Config parsing and the scenario driver live here so integration tests can
//! run the same code paths as the CLI.

pub mod config;
pub mod scenario;
pub mod service;
