//! Moebooru client (Yande.re, Konachan)
//!
//! Both boards run the same software: `GET /post.json?tags=...` returns a
//! list of posts with space-separated tags and a one-letter rating.

use btk_common::Safety;
use serde::Deserialize;
use std::time::Duration;

use super::{http_client, send_json, split_tags};
use crate::services::RequestPacer;
use crate::types::{CandidateResult, ImageRef, MetadataProvider, MirrorBoard, ProviderError, ProviderId, ProviderResponse};

const YANDERE_URL: &str = "https://yande.re";
const KONACHAN_URL: &str = "https://konachan.com";

#[derive(Debug, Deserialize)]
struct MoebooruPost {
    id: u64,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    rating: Option<String>,
}

pub struct MoebooruClient {
    board: ProviderId,
    http_client: reqwest::Client,
    base_url: String,
    pacer: RequestPacer,
}

impl MoebooruClient {
    pub fn yandere(timeout: Duration, requests_per_second: u32) -> Result<Self, ProviderError> {
        Self::with_base_url(ProviderId::Yandere, YANDERE_URL, timeout, requests_per_second)
    }

    pub fn konachan(timeout: Duration, requests_per_second: u32) -> Result<Self, ProviderError> {
        Self::with_base_url(ProviderId::Konachan, KONACHAN_URL, timeout, requests_per_second)
    }

    pub fn with_base_url(
        board: ProviderId,
        base_url: &str,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            board,
            http_client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            pacer: RequestPacer::per_second(requests_per_second),
        })
    }

    async fn first_post(&self, tags: String) -> Result<ProviderResponse, ProviderError> {
        let request = self
            .http_client
            .get(format!("{}/post.json", self.base_url))
            .query(&[("tags", tags), ("limit", "1".to_string())]);

        let posts: Vec<MoebooruPost> = send_json(&self.pacer, request).await?;
        let post = posts.into_iter().next().ok_or(ProviderError::NotFound)?;

        let candidate = CandidateResult::new(self.board)
            .with_tags(split_tags(&post.tags))
            .with_source(format!("{}/post/show/{}", self.base_url, post.id))
            .with_safety(post.rating.as_deref().and_then(Safety::from_rating));
        Ok(ProviderResponse::single(candidate))
    }
}

#[async_trait::async_trait]
impl MetadataProvider for MoebooruClient {
    fn id(&self) -> ProviderId {
        self.board
    }

    async fn query(&self, image: &ImageRef) -> Result<ProviderResponse, ProviderError> {
        let md5 = image.md5.as_deref().ok_or(ProviderError::NotFound)?;
        self.first_post(format!("md5:{}", md5)).await
    }
}

#[async_trait::async_trait]
impl MirrorBoard for MoebooruClient {
    async fn fetch_post(&self, post_id: &str) -> Result<ProviderResponse, ProviderError> {
        self.first_post(format!("id:{}", post_id)).await
    }
}
