//! Target board access
//!
//! The orchestrator only talks to the board through [`BoardApi`];
//! [`SzurubooruClient`] is the production implementation.
//!
//! # Upload protocol
//! 1. `stage_upload` stores the bytes temporarily and returns an [`UploadToken`]
//! 2. `reverse_search` compares the staged content with existing posts
//! 3. `create_post` consumes the token, or the token is dropped (discarded)
//!
//! Updates carry the post `version`; a stale version yields
//! [`BoardError::VersionConflict`].

pub mod query;
pub mod retrying;
pub mod szurubooru;

use btk_common::Safety;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

pub use retrying::RetryingBoard;
pub use szurubooru::SzurubooruClient;

// ============================================================================
// Types
// ============================================================================

/// Board post identifier
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostId(pub u64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Board post as seen by the tagger
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Post {
    pub id: PostId,
    pub version: u64,
    pub content_url: String,
    pub md5: Option<String>,
    pub tags: BTreeSet<String>,
    /// Tag name → board category (`default`, `character`, `meta`, ...)
    pub tag_categories: BTreeMap<String, String>,
    /// Ordered source entries, one URL per entry
    pub source: Vec<String>,
    pub safety: Safety,
    pub relations: Vec<PostId>,
}

/// Fields written by an update
#[derive(Debug, Clone, PartialEq)]
pub struct PostUpdate {
    pub version: u64,
    pub tags: Vec<String>,
    pub source: Vec<String>,
    pub safety: Safety,
}

/// Fields of a post created from a staged upload
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub tags: Vec<String>,
    pub source: Vec<String>,
    pub safety: Safety,
    pub relations: Vec<PostId>,
}

/// Handle to temporarily stored content
///
/// Not `Clone`: a token is consumed by exactly one `create_post`, or
/// dropped, which discards the staged content.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Existing post visually close to staged content
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearMatch {
    pub post_id: PostId,
    /// Perceptual distance in [0, 1]; 0 is identical
    pub distance: f32,
}

/// Result of comparing staged content with the board
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimilarityVerdict {
    pub exact_match: Option<PostId>,
    pub near_matches: Vec<NearMatch>,
}

// ============================================================================
// Errors
// ============================================================================

/// Board API error
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Post not found: {0}")]
    NotFound(String),

    /// Another writer updated the post since it was read
    #[error("Version conflict on post {0}")]
    VersionConflict(PostId),

    /// Board rejected the request
    #[error("{name}: {description}")]
    Api { name: String, description: String },

    /// Network failure, timeout or server-side error
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected response: {0}")]
    Parse(String),
}

impl BoardError {
    /// Worth another attempt: the request may succeed unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, BoardError::Http(_))
    }
}

impl From<reqwest::Error> for BoardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BoardError::Parse(err.to_string())
        } else {
            BoardError::Http(err.to_string())
        }
    }
}

// ============================================================================
// Board API Trait
// ============================================================================

#[async_trait::async_trait]
pub trait BoardApi: Send + Sync {
    /// Startup reachability check
    async fn ping(&self) -> Result<(), BoardError>;

    /// Ids of all posts matching an already sanitized query
    async fn search_posts(&self, query: &str) -> Result<Vec<PostId>, BoardError>;

    async fn get_post(&self, id: PostId) -> Result<Post, BoardError>;

    async fn update_post(&self, id: PostId, update: &PostUpdate) -> Result<Post, BoardError>;

    async fn stage_upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadToken, BoardError>;

    async fn reverse_search(&self, token: &UploadToken) -> Result<SimilarityVerdict, BoardError>;

    async fn create_post(&self, token: UploadToken, post: &NewPost) -> Result<Post, BoardError>;

    /// Fetch post content bytes
    async fn download(&self, content_url: &str) -> Result<Vec<u8>, BoardError>;
}
