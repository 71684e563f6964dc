//! Syntropy Setup -- Grid Agent Bootstrap
//!
//! Per-user bootstrap for the Syntropy grid agent: probes the host,
//! validates it, provisions the install layout and owner keypair, emits the
//! agent configuration, and records run state for idempotent re-runs.

pub mod types;
pub mod error;
pub mod fsutil;
pub mod layout;
pub mod validate;
pub mod probe;
pub mod keys;
pub mod config;
pub mod state;
pub mod service;
pub mod engine;
