//! Fusion Module
//!
//! Folds provider candidates and existing post metadata into the single
//! result the orchestrator writes back.

pub mod metadata_merger;

pub use metadata_merger::{merge, AggregatedMetadata, MergeRequest, PLACEHOLDER_TAG};
