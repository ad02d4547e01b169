//! SauceNAO reverse-image search
//!
//! Sends either the image bytes (multipart `file`) or a public URL to
//! `/search.php?output_type=2` and turns each hit into a candidate that
//! points at the mirror board post holding the full metadata.
//!
//! # Result routing
//! Hits are routed by the numeric `index_id` of the SauceNAO database they
//! came from; only the best hit per board is kept.
//!
//! # Budget telemetry
//! Every response header carries `short_remaining` (30 s window) and
//! `long_remaining` (24 h window), returned as [`RateBudget`].

use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::http_client;
use crate::types::{
    CandidateResult, ImageRef, MetadataProvider, MirrorRef, ProviderError, ProviderId, ProviderResponse, RateBudget,
};

const SAUCENAO_URL: &str = "https://saucenao.com";
const DAILY_LIMIT_MESSAGE: &str = "Daily Search Limit Exceeded";

/// Post id field of each indexed board in a hit's `data` object
fn id_field(board: ProviderId) -> Option<&'static str> {
    match board {
        ProviderId::Danbooru => Some("danbooru_id"),
        ProviderId::Gelbooru => Some("gelbooru_id"),
        ProviderId::Yandere => Some("yandere_id"),
        ProviderId::Konachan => Some("konachan_id"),
        ProviderId::Sankaku => Some("sankaku_id"),
        _ => None,
    }
}

/// Numbers arrive as JSON numbers or numeric strings depending on the field
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Parse a search response into per-board candidates and budget
pub fn parse_response(body: &Value, min_similarity: f32) -> Result<ProviderResponse, ProviderError> {
    let header = body
        .get("header")
        .ok_or_else(|| ProviderError::Parse("missing header".to_string()))?;

    let budget = match (
        header.get("short_remaining").and_then(as_f64),
        header.get("long_remaining").and_then(as_f64),
    ) {
        (Some(short), Some(long)) => Some(RateBudget {
            short_remaining: short.max(0.0) as u32,
            long_remaining: long.max(0.0) as u32,
        }),
        _ => None,
    };

    let status = header.get("status").and_then(as_f64).unwrap_or(0.0);
    if status != 0.0 {
        let message = header
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if message.contains(DAILY_LIMIT_MESSAGE) {
            return Err(ProviderError::RateLimitExceeded {
                long_term: true,
                message,
            });
        }
        if message.contains("Search Rate Too High") {
            return Err(ProviderError::RateLimitExceeded {
                long_term: false,
                message,
            });
        }
        // Negative status is a client-side problem (bad key, bad image)
        return Err(if status < 0.0 {
            ProviderError::Unauthorized(message)
        } else {
            ProviderError::Transient(message)
        });
    }

    let mut best: BTreeMap<ProviderId, CandidateResult> = BTreeMap::new();

    for result in body.get("results").and_then(Value::as_array).into_iter().flatten() {
        let result_header = result.get("header").unwrap_or(&Value::Null);
        let data = result.get("data").unwrap_or(&Value::Null);

        let Some(similarity) = result_header.get("similarity").and_then(as_f64) else {
            continue;
        };
        if similarity < f64::from(min_similarity) {
            continue;
        }

        let Some(board) = result_header
            .get("index_id")
            .and_then(as_f64)
            .and_then(|id| ProviderId::from_saucenao_index(id as u32))
        else {
            continue;
        };

        let Some(post_id) = id_field(board).and_then(|field| data.get(field)).and_then(as_id_string) else {
            continue;
        };

        let similarity = (similarity / 100.0) as f32;
        if best.get(&board).is_some_and(|c| c.similarity.unwrap_or(0.0) >= similarity) {
            continue;
        }

        let mut candidate = CandidateResult::new(ProviderId::SauceNao);
        candidate.similarity = Some(similarity);
        candidate.source = data
            .get("ext_urls")
            .and_then(Value::as_array)
            .and_then(|urls| urls.first())
            .and_then(Value::as_str)
            .map(String::from);
        candidate.reference = Some(MirrorRef { board, post_id });
        best.insert(board, candidate);
    }

    let mut candidates: Vec<CandidateResult> = best.into_values().collect();
    candidates.sort_by(|a, b| {
        b.similarity
            .unwrap_or(0.0)
            .partial_cmp(&a.similarity.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(ProviderResponse { candidates, budget })
}

pub struct SauceNaoClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    min_similarity: f32,
}

impl SauceNaoClient {
    pub fn new(api_key: Option<String>, min_similarity: f32, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(SAUCENAO_URL, api_key, min_similarity, timeout)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: Option<String>,
        min_similarity: f32,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if api_key.is_some() {
            debug!("Using SauceNAO API key");
        }
        Ok(Self {
            http_client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            min_similarity,
        })
    }
}

#[async_trait::async_trait]
impl MetadataProvider for SauceNaoClient {
    fn id(&self) -> ProviderId {
        ProviderId::SauceNao
    }

    async fn query(&self, image: &ImageRef) -> Result<ProviderResponse, ProviderError> {
        let mut request = self
            .http_client
            .post(format!("{}/search.php", self.base_url))
            .query(&[("output_type", "2"), ("numres", "16"), ("db", "999")]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key)]);
        }

        request = match (&image.bytes, &image.content_url) {
            (Some(bytes), _) => {
                let part = reqwest::multipart::Part::bytes(bytes.clone()).file_name("image");
                request.multipart(reqwest::multipart::Form::new().part("file", part))
            }
            (None, Some(url)) => request.query(&[("url", url)]),
            (None, None) => return Err(ProviderError::NotFound),
        };

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        // Limit errors come back as 429 with a JSON header explaining which window
        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => return Err(ProviderError::from_status(status, &text)),
            Err(e) => return Err(ProviderError::Parse(e.to_string())),
        };
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS && !text.contains(DAILY_LIMIT_MESSAGE) {
            return Err(ProviderError::RateLimitExceeded {
                long_term: false,
                message: text.chars().take(200).collect(),
            });
        }
        if !status.is_success() && body.get("header").is_none() {
            return Err(ProviderError::from_status(status, &text));
        }

        let parsed = parse_response(&body, self.min_similarity)?;
        debug!(
            hits = parsed.candidates.len(),
            short_remaining = parsed.budget.map(|b| b.short_remaining),
            long_remaining = parsed.budget.map(|b| b.long_remaining),
            "SauceNAO search complete"
        );
        Ok(parsed)
    }
}
