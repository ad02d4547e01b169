//! Tagging and upload workflow
//!
//! Processes one post (or upload) at a time:
//! - **Gate**: stage the upload and check the board for duplicates
//! - **Aggregate**: hash lookups, reverse search, ML fallback, relations
//! - **Merge**: fold candidates into the post's metadata
//! - **Commit**: create the post or update it with its version
//!
//! # Architecture
//!
//! The [`Orchestrator`] owns the per-run state (statistics, session budget,
//! cancellation) and drives the other stages. Progress is reported through
//! an optional event channel.

pub mod aggregator;
pub mod import_item;
pub mod orchestrator;
pub mod similarity_gate;
pub mod statistics;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use aggregator::{AggregationReport, Aggregator, AggregatorOptions, TagOrigin};
pub use import_item::{ImportItem, Site, SiteMetadata};
pub use orchestrator::{Orchestrator, OrchestratorOptions, TagEdits, UploadItem};
pub use similarity_gate::{GateDecision, GateOutcome, SimilarityGate};
pub use statistics::{ItemOutcome, RunStatistics};

/// Run progress events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaggerEvent {
    /// Run started
    RunStarted {
        run_id: Uuid,
        /// "auto_tag", "upload" or "import"
        mode: String,
        total: usize,
        /// Unix timestamp (seconds since epoch)
        timestamp: i64,
    },

    /// Item processing started
    ItemStarted {
        /// 0-based position in the run
        index: usize,
        total: usize,
        /// Post id or file name
        label: String,
    },

    /// A provider call finished
    ProviderFinished {
        label: String,
        provider: String,
        /// Controller outcome ("success", "exhausted", ...)
        outcome: String,
        candidates: usize,
    },

    /// Item finished
    ItemCompleted {
        label: String,
        outcome: ItemOutcome,
    },

    /// Run finished or was cancelled
    RunCompleted {
        run_id: Uuid,
        statistics: RunStatistics,
        cancelled: bool,
        timestamp: i64,
    },
}
