//! Run statistics
//!
//! One counter set per run, updated by the single worker as each item
//! finishes and reported once at the end (including cancelled runs).

use serde::{Deserialize, Serialize};

/// How one post or upload ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Tags from hash lookup, reverse search or site metadata
    Tagged,
    /// Tags only from the ML fallback
    MlTagged,
    /// Nothing found; placeholder tag kept
    Untagged,
    /// Error or cancellation; nothing written
    Skipped,
    /// Duplicate upload; existing post kept as is
    Duplicate,
    /// Duplicate upload; existing post received new metadata
    Enriched,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Tagged => "tagged",
            ItemOutcome::MlTagged => "ml_tagged",
            ItemOutcome::Untagged => "untagged",
            ItemOutcome::Skipped => "skipped",
            ItemOutcome::Duplicate => "duplicate",
            ItemOutcome::Enriched => "enriched",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Items the run was asked to process
    pub total: usize,
    pub tagged: usize,
    pub ml_tagged: usize,
    pub untagged: usize,
    pub skipped: usize,
    /// New posts created
    pub uploaded: usize,
    pub duplicates: usize,
    pub enriched: usize,
    /// Related posts updated with propagated tags
    pub relations_updated: usize,
}

impl RunStatistics {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Tagged => self.tagged += 1,
            ItemOutcome::MlTagged => self.ml_tagged += 1,
            ItemOutcome::Untagged => self.untagged += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Duplicate => self.duplicates += 1,
            ItemOutcome::Enriched => self.enriched += 1,
        }
    }

    /// Items with a recorded outcome
    pub fn processed(&self) -> usize {
        self.tagged + self.ml_tagged + self.untagged + self.skipped + self.duplicates + self.enriched
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} of {} processed: {} tagged, {} tagged by ML, {} untagged, {} skipped, {} uploaded, {} duplicates ({} enriched)",
            self.processed(),
            self.total,
            self.tagged,
            self.ml_tagged,
            self.untagged,
            self.skipped,
            self.uploaded,
            self.duplicates + self.enriched,
            self.enriched
        )
    }
}
