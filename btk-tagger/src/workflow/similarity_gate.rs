//! Similarity gate for uploads
//!
//! Stages the content, asks the board for exact and near matches, and
//! decides whether the upload is a duplicate.
//!
//! | Verdict                                       | Decision                 |
//! |-----------------------------------------------|--------------------------|
//! | exact checksum match                          | Duplicate (exact post)   |
//! | near match with `distance < 1 - maxSimilarity` | Duplicate (closest post) |
//! | otherwise                                     | Unique, near matches become relations |
//!
//! The comparison is strict: a near match exactly at the threshold is not a
//! duplicate.

use std::sync::Arc;
use tracing::debug;

use crate::board::{BoardApi, BoardError, PostId, SimilarityVerdict, UploadToken};

/// Decision derived from a verdict
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Duplicate { post_id: PostId, distance: f32 },
    Unique { relations: Vec<PostId> },
}

/// Gate result; a unique upload keeps its staged token
#[derive(Debug)]
pub enum GateOutcome {
    /// Staged content is dropped with the token
    Duplicate { post_id: PostId, distance: f32 },
    Unique { token: UploadToken, relations: Vec<PostId> },
}

/// Pure duplicate decision
pub fn decide(verdict: &SimilarityVerdict, distance_threshold: f32) -> GateDecision {
    if let Some(post_id) = verdict.exact_match {
        return GateDecision::Duplicate { post_id, distance: 0.0 };
    }

    let closest = verdict
        .near_matches
        .iter()
        .filter(|m| m.distance < distance_threshold)
        .min_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));

    if let Some(near) = closest {
        return GateDecision::Duplicate {
            post_id: near.post_id,
            distance: near.distance,
        };
    }

    let mut relations: Vec<PostId> = Vec::with_capacity(verdict.near_matches.len());
    for near in &verdict.near_matches {
        if !relations.contains(&near.post_id) {
            relations.push(near.post_id);
        }
    }
    GateDecision::Unique { relations }
}

pub struct SimilarityGate {
    board: Arc<dyn BoardApi>,
    distance_threshold: f32,
}

impl SimilarityGate {
    /// `distance_threshold` is `1 - max_similarity`
    pub fn new(board: Arc<dyn BoardApi>, distance_threshold: f32) -> Self {
        Self {
            board,
            distance_threshold,
        }
    }

    /// Stage `bytes` and classify them against the board
    pub async fn check(&self, bytes: Vec<u8>, file_name: &str) -> Result<GateOutcome, BoardError> {
        let token = self.board.stage_upload(bytes, file_name).await?;
        let verdict = self.board.reverse_search(&token).await?;

        debug!(
            file = file_name,
            exact_match = ?verdict.exact_match,
            near_matches = verdict.near_matches.len(),
            "Similarity verdict"
        );

        Ok(match decide(&verdict, self.distance_threshold) {
            GateDecision::Duplicate { post_id, distance } => GateOutcome::Duplicate { post_id, distance },
            GateDecision::Unique { relations } => GateOutcome::Unique { token, relations },
        })
    }
}
