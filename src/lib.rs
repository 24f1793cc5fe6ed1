//! Mockasite Library
//!
//! Records real HTTP interactions and replays them offline.
//! Exposes the record/replay engine and configuration for the binaries and tests.

pub mod config;
pub mod mock;

pub use config::MockConfig;
