//! Provider with canned answers
//!
//! Answers every `query` with the same scripted result and `fetch_post`
//! from a per-id table. Counts calls so tests can assert what was asked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use btk_common::Safety;
use btk_tagger::types::{
    CandidateResult, ImageRef, MetadataProvider, MirrorBoard, MirrorRef, ProviderError, ProviderId, ProviderResponse,
};

pub struct ScriptedProvider {
    id: ProviderId,
    query_result: Result<ProviderResponse, ProviderError>,
    posts: HashMap<String, ProviderResponse>,
    pub query_calls: AtomicU32,
    pub fetch_calls: AtomicU32,
}

impl ScriptedProvider {
    /// Provider that finds nothing
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            query_result: Err(ProviderError::NotFound),
            posts: HashMap::new(),
            query_calls: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
        }
    }

    pub fn answering(mut self, result: Result<ProviderResponse, ProviderError>) -> Self {
        self.query_result = result;
        self
    }

    /// Answer with one candidate
    pub fn finding(self, tags: &[&str], source: &str, safety: Option<Safety>) -> Self {
        let candidate = CandidateResult::new(self.id)
            .with_tags(tags.iter().copied())
            .with_source(source)
            .with_safety(safety);
        self.answering(Ok(ProviderResponse::single(candidate)))
    }

    pub fn with_post(mut self, post_id: &str, tags: &[&str], source: &str) -> Self {
        let candidate = CandidateResult::new(self.id)
            .with_tags(tags.iter().copied())
            .with_source(source);
        self.posts.insert(post_id.to_string(), ProviderResponse::single(candidate));
        self
    }

    pub fn queries(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

/// Reverse-search hit pointing at `board`/`post_id`
pub fn search_hit(board: ProviderId, post_id: &str, similarity: f32, source: &str) -> CandidateResult {
    let mut hit = CandidateResult::new(ProviderId::SauceNao).with_source(source);
    hit.similarity = Some(similarity);
    hit.reference = Some(MirrorRef {
        board,
        post_id: post_id.to_string(),
    });
    hit
}

#[async_trait::async_trait]
impl MetadataProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn query(&self, _image: &ImageRef) -> Result<ProviderResponse, ProviderError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.query_result.clone()
    }
}

#[async_trait::async_trait]
impl MirrorBoard for ScriptedProvider {
    async fn fetch_post(&self, post_id: &str) -> Result<ProviderResponse, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.posts.get(post_id).cloned().ok_or(ProviderError::NotFound)
    }
}
