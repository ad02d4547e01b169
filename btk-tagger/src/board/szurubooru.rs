//! szurubooru REST client
//!
//! Implements [`BoardApi`] over the board's JSON API:
//!
//! | Operation        | Request                                  |
//! |------------------|------------------------------------------|
//! | `ping`           | `GET /api/info`                          |
//! | `search_posts`   | `GET /api/posts/?query=&limit=&offset=`  |
//! | `get_post`       | `GET /api/post/{id}`                     |
//! | `update_post`    | `PUT /api/post/{id}`                     |
//! | `stage_upload`   | `POST /api/uploads` (multipart)          |
//! | `reverse_search` | `POST /api/posts/reverse-search`         |
//! | `create_post`    | `POST /api/posts`                        |
//!
//! Authentication uses `Authorization: Token base64(user:token)`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, warn};

use super::query::PAGE_SIZE;
use super::{BoardApi, BoardError, NearMatch, NewPost, Post, PostId, PostUpdate, SimilarityVerdict, UploadToken};
use crate::config::BoardConfig;
use btk_common::Safety;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct PagedIds {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    results: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostResource {
    id: u64,
    version: u64,
    #[serde(default)]
    content_url: String,
    #[serde(default, rename = "checksumMD5")]
    checksum_md5: Option<String>,
    #[serde(default)]
    safety: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    tags: Vec<TagResource>,
    #[serde(default)]
    relations: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct TagResource {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReverseSearchResponse {
    #[serde(default)]
    exact_post: Option<IdOnly>,
    #[serde(default)]
    similar_posts: Vec<SimilarPost>,
}

#[derive(Debug, Deserialize)]
struct SimilarPost {
    distance: f32,
    post: IdOnly,
}

// ============================================================================
// Client
// ============================================================================

/// szurubooru API client
pub struct SzurubooruClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl SzurubooruClient {
    pub fn new(base_url: &str, username: &str, api_token: &str, timeout: Duration) -> Result<Self, BoardError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let credentials = STANDARD.encode(format!("{}:{}", username, api_token));
        let auth = HeaderValue::from_str(&format!("Token {}", credentials))
            .map_err(|e| BoardError::Http(format!("invalid credentials header: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);

        let http_client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| BoardError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &BoardConfig) -> Result<Self, BoardError> {
        Self::new(
            &config.url,
            &config.username,
            &config.api_token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Board returns content URLs relative to its root
    fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    fn to_post(&self, resource: PostResource) -> Post {
        let mut tags = BTreeSet::new();
        let mut tag_categories = BTreeMap::new();
        for tag in resource.tags {
            if let Some(name) = tag.names.into_iter().next() {
                if let Some(category) = tag.category {
                    tag_categories.insert(name.clone(), category);
                }
                tags.insert(name);
            }
        }

        let source = resource
            .source
            .map(|s| s.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
            .unwrap_or_default();

        Post {
            id: PostId(resource.id),
            version: resource.version,
            content_url: self.absolute_url(&resource.content_url),
            md5: resource.checksum_md5,
            tags,
            tag_categories,
            source,
            safety: resource
                .safety
                .as_deref()
                .and_then(Safety::from_rating)
                .unwrap_or_default(),
            relations: resource.relations.into_iter().map(|r| PostId(r.id)).collect(),
        }
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, BoardError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| BoardError::Parse(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(Self::classify_error(status, &body))
    }

    fn classify_error(status: reqwest::StatusCode, body: &str) -> BoardError {
        let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
        let (name, description) = match parsed {
            Some(err) => (err.name, err.description),
            None => (format!("HTTP {}", status.as_u16()), body.chars().take(200).collect()),
        };

        if status == reqwest::StatusCode::NOT_FOUND {
            BoardError::NotFound(description)
        } else if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            BoardError::Http(format!("HTTP {}: {}", status.as_u16(), description))
        } else {
            BoardError::Api { name, description }
        }
    }
}

#[async_trait::async_trait]
impl BoardApi for SzurubooruClient {
    async fn ping(&self) -> Result<(), BoardError> {
        let response = self.http_client.get(self.api_url("info")).send().await?;
        let _: serde_json::Value = Self::parse_json(response).await?;
        Ok(())
    }

    async fn search_posts(&self, query: &str) -> Result<Vec<PostId>, BoardError> {
        let mut ids = Vec::new();
        let mut offset = 0usize;

        loop {
            debug!(query = %query, offset, "Fetching post page");
            let response = self
                .http_client
                .get(self.api_url("posts/"))
                .query(&[
                    ("query", query.to_string()),
                    ("limit", PAGE_SIZE.to_string()),
                    ("offset", offset.to_string()),
                    ("fields", "id".to_string()),
                ])
                .send()
                .await?;
            let page: PagedIds = Self::parse_json(response).await?;

            let fetched = page.results.len();
            ids.extend(page.results.into_iter().map(|p| PostId(p.id)));
            offset += PAGE_SIZE;

            if fetched == 0 || ids.len() >= page.total {
                break;
            }
        }

        debug!(query = %query, count = ids.len(), "Query matched posts");
        Ok(ids)
    }

    async fn get_post(&self, id: PostId) -> Result<Post, BoardError> {
        let response = self.http_client.get(self.api_url(&format!("post/{}", id))).send().await?;
        let resource: PostResource = Self::parse_json(response).await?;
        Ok(self.to_post(resource))
    }

    async fn update_post(&self, id: PostId, update: &PostUpdate) -> Result<Post, BoardError> {
        let payload = json!({
            "version": update.version,
            "tags": update.tags,
            "source": update.source.join("\n"),
            "safety": update.safety.as_str(),
        });

        let response = self
            .http_client
            .put(self.api_url(&format!("post/{}", id)))
            .json(&payload)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            let body = response.text().await.unwrap_or_default();
            return match Self::classify_error(reqwest::StatusCode::CONFLICT, &body) {
                BoardError::Api { name, .. } if name == "IntegrityError" => Err(BoardError::VersionConflict(id)),
                other => Err(other),
            };
        }

        let resource: PostResource = Self::parse_json(response).await?;
        Ok(self.to_post(resource))
    }

    async fn stage_upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<UploadToken, BoardError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("content", part);

        let response = self.http_client.post(self.api_url("uploads")).multipart(form).send().await?;
        let upload: UploadResponse = Self::parse_json(response).await?;
        Ok(UploadToken::new(upload.token))
    }

    async fn reverse_search(&self, token: &UploadToken) -> Result<SimilarityVerdict, BoardError> {
        let response = self
            .http_client
            .post(self.api_url("posts/reverse-search"))
            .json(&json!({ "contentToken": token.as_str() }))
            .send()
            .await?;
        let result: ReverseSearchResponse = Self::parse_json(response).await?;

        let mut near_matches = Vec::with_capacity(result.similar_posts.len());
        for similar in result.similar_posts {
            if !(0.0..=1.0).contains(&similar.distance) {
                warn!(post_id = similar.post.id, distance = similar.distance, "Similarity distance out of range, clamping");
            }
            near_matches.push(NearMatch {
                post_id: PostId(similar.post.id),
                distance: similar.distance.clamp(0.0, 1.0),
            });
        }

        Ok(SimilarityVerdict {
            exact_match: result.exact_post.map(|p| PostId(p.id)),
            near_matches,
        })
    }

    async fn create_post(&self, token: UploadToken, post: &NewPost) -> Result<Post, BoardError> {
        let relations: Vec<u64> = post.relations.iter().map(|r| r.0).collect();
        let payload = json!({
            "tags": post.tags,
            "safety": post.safety.as_str(),
            "source": post.source.join("\n"),
            "relations": relations,
            "contentToken": token.as_str(),
        });

        let response = self.http_client.post(self.api_url("posts")).json(&payload).send().await?;
        let resource: PostResource = Self::parse_json(response).await?;
        Ok(self.to_post(resource))
    }

    async fn download(&self, content_url: &str) -> Result<Vec<u8>, BoardError> {
        let response = self.http_client.get(self.absolute_url(content_url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_error(status, ""));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
