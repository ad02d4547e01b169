//! Danbooru client
//!
//! - MD5 lookup: `GET /posts.json?tags=md5:{md5}&limit=1`
//! - Post by id: `GET /posts/{id}.json`
//! - Artist search: `GET /artists.json?search[...]=`
//!
//! Credentials are optional; anonymous access has lower rate limits.

use btk_common::Safety;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{http_client, send_json, split_tags};
use crate::config::SiteCredentials;
use crate::services::RequestPacer;
use crate::types::{CandidateResult, ImageRef, MetadataProvider, MirrorBoard, ProviderError, ProviderId, ProviderResponse};

const DANBOORU_URL: &str = "https://danbooru.donmai.us";

#[derive(Debug, Deserialize)]
struct DanbooruPost {
    id: u64,
    #[serde(default)]
    tag_string: String,
    #[serde(default)]
    rating: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DanbooruArtist {
    name: String,
}

pub struct DanbooruClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    pacer: RequestPacer,
}

impl DanbooruClient {
    pub fn new(credentials: &SiteCredentials, timeout: Duration, requests_per_second: u32) -> Result<Self, ProviderError> {
        Self::with_base_url(DANBOORU_URL, credentials, timeout, requests_per_second)
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

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http_client.get(format!("{}{}", self.base_url, path));
        match &self.credentials {
            Some((login, api_key)) => request.query(&[("login", login), ("api_key", api_key)]),
            None => request,
        }
    }

    fn to_candidate(&self, post: DanbooruPost) -> CandidateResult {
        CandidateResult::new(ProviderId::Danbooru)
            .with_tags(split_tags(&post.tag_string))
            .with_source(format!("{}/posts/{}", self.base_url, post.id))
            .with_safety(post.rating.as_deref().and_then(Safety::from_rating))
    }

    /// Canonical artist tag for a name or alias, if Danbooru knows one
    pub async fn search_artist(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let name = name.trim().to_lowercase().replace(' ', "_");
        if name.is_empty() {
            return Ok(None);
        }

        let by_name: Vec<DanbooruArtist> =
            send_json(&self.pacer, self.get("/artists.json").query(&[("search[any_name_matches]", &name)])).await?;
        if let Some(artist) = by_name.into_iter().next() {
            debug!(query = %name, artist = %artist.name, "Artist found by name");
            return Ok(Some(artist.name));
        }

        let by_alias: Vec<DanbooruArtist> = send_json(
            &self.pacer,
            self.get("/artists.json")
                .query(&[("search[any_other_name_like]", name.as_str()), ("search[is_deleted]", "false")]),
        )
        .await?;

        let artist = by_alias.into_iter().next().map(|a| a.name);
        debug!(query = %name, artist = ?artist, "Artist alias lookup");
        Ok(artist)
    }
}

#[async_trait::async_trait]
impl MetadataProvider for DanbooruClient {
    fn id(&self) -> ProviderId {
        ProviderId::Danbooru
    }

    async fn query(&self, image: &ImageRef) -> Result<ProviderResponse, ProviderError> {
        let md5 = image.md5.as_deref().ok_or(ProviderError::NotFound)?;

        let posts: Vec<DanbooruPost> = send_json(
            &self.pacer,
            self.get("/posts.json").query(&[("tags", format!("md5:{}", md5)), ("limit", "1".to_string())]),
        )
        .await?;

        let post = posts.into_iter().next().ok_or(ProviderError::NotFound)?;
        Ok(ProviderResponse::single(self.to_candidate(post)))
    }
}

#[async_trait::async_trait]
impl MirrorBoard for DanbooruClient {
    async fn fetch_post(&self, post_id: &str) -> Result<ProviderResponse, ProviderError> {
        let post: DanbooruPost = send_json(&self.pacer, self.get(&format!("/posts/{}.json", post_id))).await?;
        Ok(ProviderResponse::single(self.to_candidate(post)))
    }
}
