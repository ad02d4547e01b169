//! Gelbooru client
//!
//! Uses the DAPI JSON endpoint:
//! `GET /index.php?page=dapi&s=post&q=index&json=1&tags=md5:{md5}` or `&id={id}`.
//! An empty result omits the `post` array entirely.

use btk_common::Safety;
use serde::Deserialize;
use std::time::Duration;

use super::{http_client, send_json, split_tags};
use crate::config::SiteCredentials;
use crate::services::RequestPacer;
use crate::types::{CandidateResult, ImageRef, MetadataProvider, MirrorBoard, ProviderError, ProviderId, ProviderResponse};

const GELBOORU_URL: &str = "https://gelbooru.com";

#[derive(Debug, Deserialize)]
struct GelbooruResponse {
    #[serde(default)]
    post: Vec<GelbooruPost>,
}

#[derive(Debug, Deserialize)]
struct GelbooruPost {
    id: u64,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    rating: Option<String>,
}

pub struct GelbooruClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    pacer: RequestPacer,
}

impl GelbooruClient {
    pub fn new(credentials: &SiteCredentials, timeout: Duration, requests_per_second: u32) -> Result<Self, ProviderError> {
        Self::with_base_url(GELBOORU_URL, credentials, timeout, requests_per_second)
    }

    pub fn with_base_url(
        base_url: &str,
        credentials: &SiteCredentials,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: credentials
                .is_set()
                .then(|| (credentials.user.clone(), credentials.api_key.clone())),
            pacer: RequestPacer::per_second(requests_per_second),
        })
    }

    async fn lookup(&self, filter: (&str, String)) -> Result<ProviderResponse, ProviderError> {
        let mut request = self.http_client.get(format!("{}/index.php", self.base_url)).query(&[
            ("page", "dapi"),
            ("s", "post"),
            ("q", "index"),
            ("json", "1"),
        ]);
        request = request.query(&[filter]);
        if let Some((user_id, api_key)) = &self.credentials {
            request = request.query(&[("user_id", user_id), ("api_key", api_key)]);
        }

        let response: GelbooruResponse = send_json(&self.pacer, request).await?;
        let post = response.post.into_iter().next().ok_or(ProviderError::NotFound)?;

        let candidate = CandidateResult::new(ProviderId::Gelbooru)
            .with_tags(split_tags(&post.tags))
            .with_source(format!("{}/index.php?page=post&s=view&id={}", self.base_url, post.id))
            .with_safety(post.rating.as_deref().and_then(Safety::from_rating));
        Ok(ProviderResponse::single(candidate))
    }
}

#[async_trait::async_trait]
impl MetadataProvider for GelbooruClient {
    fn id(&self) -> ProviderId {
        ProviderId::Gelbooru
    }

    async fn query(&self, image: &ImageRef) -> Result<ProviderResponse, ProviderError> {
        let md5 = image.md5.as_deref().ok_or(ProviderError::NotFound)?;
        self.lookup(("tags", format!("md5:{}", md5))).await
    }
}

#[async_trait::async_trait]
impl MirrorBoard for GelbooruClient {
    async fn fetch_post(&self, post_id: &str) -> Result<ProviderResponse, ProviderError> {
        self.lookup(("id", post_id.to_string())).await
    }
}
