//! Core Types and Trait Definitions for btk-tagger
//!
//! Defines the provider seam used by the aggregation pipeline:
//! - [`MetadataProvider`]: any source answering "what is this image?"
//! - [`MirrorBoard`]: a booru mirror that can also fetch a post by id
//!
//! # Architecture
//! Providers are built once from configuration into a `ProviderSet` and
//! are always invoked through the rate/retry controller, never directly.

use btk_common::Safety;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Common Types
// ============================================================================

/// Identifies a metadata source for provenance, session state and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    SauceNao,
    Danbooru,
    Gelbooru,
    Yandere,
    Konachan,
    Sankaku,
    Deepbooru,
    ArtistResolver,
    /// Metadata shipped alongside downloaded media
    SiteMetadata,
    /// Tags copied from related board posts
    Relations,
}

impl ProviderId {
    /// Stable lowercase name used in logs and events
    pub fn name(&self) -> &'static str {
        match self {
            ProviderId::SauceNao => "saucenao",
            ProviderId::Danbooru => "danbooru",
            ProviderId::Gelbooru => "gelbooru",
            ProviderId::Yandere => "yandere",
            ProviderId::Konachan => "konachan",
            ProviderId::Sankaku => "sankaku",
            ProviderId::Deepbooru => "deepbooru",
            ProviderId::ArtistResolver => "artist_resolver",
            ProviderId::SiteMetadata => "site_metadata",
            ProviderId::Relations => "relations",
        }
    }

    /// Map a SauceNAO database index to the mirror board it indexes
    pub fn from_saucenao_index(index_id: u32) -> Option<ProviderId> {
        match index_id {
            9 => Some(ProviderId::Danbooru),
            12 => Some(ProviderId::Yandere),
            25 => Some(ProviderId::Gelbooru),
            26 => Some(ProviderId::Konachan),
            27 => Some(ProviderId::Sankaku),
            _ => None,
        }
    }

    /// True for providers whose results count as "tagged by ML"
    pub fn is_ml(&self) -> bool {
        matches!(self, ProviderId::Deepbooru)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Image handed to providers
///
/// Either the raw bytes, a URL the provider can fetch itself, or both.
/// `md5` is the checksum of the original file, used by hash lookups.
#[derive(Debug, Clone, Default)]
pub struct ImageRef {
    pub bytes: Option<Vec<u8>>,
    pub content_url: Option<String>,
    pub md5: Option<String>,
}

impl ImageRef {
    /// Image from raw bytes; computes the MD5 checksum
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let md5 = format!("{:x}", md5::compute(&bytes));
        Self {
            bytes: Some(bytes),
            content_url: None,
            md5: Some(md5),
        }
    }

    /// Same image with substitute bytes (e.g. a downscaled copy); keeps
    /// the original checksum for hash lookups
    pub fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(bytes);
        self
    }

    /// Image reachable by URL only
    pub fn from_url(url: impl Into<String>, md5: Option<String>) -> Self {
        Self {
            bytes: None,
            content_url: Some(url.into()),
            md5,
        }
    }
}

/// Pointer from a reverse-search hit to a post on a mirror board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRef {
    pub board: ProviderId,
    pub post_id: String,
}

/// One provider's answer about one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub provider: ProviderId,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub safety: Option<Safety>,
    /// Provider confidence (0.0-1.0) when the provider reports one
    pub similarity: Option<f32>,
    /// Set by reverse-image search: where the full metadata lives
    pub reference: Option<MirrorRef>,
}

impl CandidateResult {
    /// Empty candidate attributed to `provider`
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            tags: Vec::new(),
            source: None,
            safety: None,
            similarity: None,
            reference: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_safety(mut self, safety: Option<Safety>) -> Self {
        self.safety = safety;
        self
    }

    pub fn has_tags(&self) -> bool {
        self.tags.iter().any(|t| !t.trim().is_empty())
    }
}

/// Remaining request budget reported by a rate-limited provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudget {
    pub short_remaining: u32,
    pub long_remaining: u32,
}

/// Result of a single provider call
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub candidates: Vec<CandidateResult>,
    pub budget: Option<RateBudget>,
}

impl ProviderResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(candidate: CandidateResult) -> Self {
        Self {
            candidates: vec![candidate],
            budget: None,
        }
    }
}

// ============================================================================
// Provider Traits
// ============================================================================

/// Metadata provider trait
///
/// Implementations perform exactly one remote operation per call and
/// classify failures into [`ProviderError`]; retry, timeouts and budget
/// bookkeeping belong to the controller.
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Provider identity for provenance and session state
    fn id(&self) -> ProviderId;

    /// Look up metadata for an image
    ///
    /// # Errors
    /// `NotFound` is equivalent to an empty candidate list; callers treat it
    /// as "no contribution".
    async fn query(&self, image: &ImageRef) -> Result<ProviderResponse, ProviderError>;
}

/// Booru mirror: MD5 lookup through [`MetadataProvider::query`] plus
/// direct post retrieval for reverse-search hits
#[async_trait::async_trait]
pub trait MirrorBoard: MetadataProvider {
    async fn fetch_post(&self, post_id: &str) -> Result<ProviderResponse, ProviderError>;
}

// ============================================================================
// Errors
// ============================================================================

/// Provider call error
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The provider has nothing for this image
    #[error("Not found")]
    NotFound,

    /// Budget exhausted; `long_term` means no more calls this session
    #[error("Rate limit exceeded (long_term: {long_term}): {message}")]
    RateLimitExceeded { long_term: bool, message: String },

    /// Network error, timeout or 5xx; eligible for retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// Credentials rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Response did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status.as_u16() {
            401 | 403 => ProviderError::Unauthorized(format!("HTTP {}: {}", status, snippet)),
            404 => ProviderError::NotFound,
            429 => ProviderError::RateLimitExceeded {
                long_term: snippet.contains("Daily Search Limit Exceeded"),
                message: snippet,
            },
            408 | 500..=599 => ProviderError::Transient(format!("HTTP {}: {}", status, snippet)),
            _ => ProviderError::Parse(format!("unexpected HTTP {}: {}", status, snippet)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Transient(err.to_string())
        }
    }
}
