//! btk-tagger library
//!
//! Metadata aggregation and upload pipeline for szurubooru boards:
//! provider clients, rate/retry control, metadata merging, the upload
//! similarity gate and the orchestrator that drives whole runs.

pub mod board;
pub mod config;
pub mod error;
pub mod fusion;
pub mod providers;
pub mod services;
pub mod types;
pub mod workflow;

/// Sent with every board and provider request
pub const USER_AGENT: &str = env!("BTK_USER_AGENT");

pub use config::TaggerConfig;
pub use error::{TaggerError, TaggerResult};
