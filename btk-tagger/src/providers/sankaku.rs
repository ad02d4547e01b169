//! Sankaku Complex page scraper
//!
//! Sankaku has no usable public API, so tags and rating are read from the
//! post page: tag names from the `#tag-sidebar` list, the rating from the
//! `Rating:` entry of the `#stats` box. A page without the tag sidebar
//! means the post does not exist (or is hidden) and maps to `NotFound`.

use btk_common::Safety;
use scraper::{Html, Selector};
use std::time::Duration;

use super::http_client;
use crate::services::RequestPacer;
use crate::types::{CandidateResult, ImageRef, MetadataProvider, MirrorBoard, ProviderError, ProviderId, ProviderResponse};

const SANKAKU_URL: &str = "https://chan.sankakucomplex.com";

/// Tags and rating read from one post page
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedPost {
    pub tags: Vec<String>,
    pub safety: Safety,
}

struct SankakuSelectors {
    sidebar: Selector,
    tag_link: Selector,
    stats_item: Selector,
}

impl SankakuSelectors {
    fn new() -> Result<Self, ProviderError> {
        let parse = |css: &str| Selector::parse(css).map_err(|e| ProviderError::Parse(format!("selector {css}: {e}")));
        Ok(Self {
            sidebar: parse("ul#tag-sidebar")?,
            tag_link: parse("li[class*=\"tag-type\"] a[itemprop=\"keywords\"]")?,
            stats_item: parse("div#stats li")?,
        })
    }
}

/// Parse a Sankaku post page
///
/// Posts without a readable rating are treated as unsafe.
pub fn parse_post_page(html: &str) -> Result<ScrapedPost, ProviderError> {
    let selectors = SankakuSelectors::new()?;
    let document = Html::parse_document(html);

    let sidebar = document.select(&selectors.sidebar).next().ok_or(ProviderError::NotFound)?;
    let tags = sidebar
        .select(&selectors.tag_link)
        .map(|a| a.text().collect::<String>().trim().replace(' ', "_"))
        .filter(|t| !t.is_empty())
        .collect();

    let safety = document
        .select(&selectors.stats_item)
        .map(|li| li.text().collect::<String>())
        .find_map(|text| {
            text.trim()
                .strip_prefix("Rating:")
                .and_then(|rating| Safety::from_rating(rating.trim()))
        })
        .unwrap_or(Safety::Unsafe);

    Ok(ScrapedPost { tags, safety })
}

pub struct SankakuScraper {
    http_client: reqwest::Client,
    base_url: String,
    pacer: RequestPacer,
}

impl SankakuScraper {
    pub fn new(timeout: Duration, requests_per_second: u32) -> Result<Self, ProviderError> {
        Self::with_base_url(SANKAKU_URL, timeout, requests_per_second)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration, requests_per_second: u32) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            pacer: RequestPacer::per_second(requests_per_second),
        })
    }

    async fn scrape(&self, request: reqwest::RequestBuilder) -> Result<(ScrapedPost, String), ProviderError> {
        self.pacer.wait().await;

        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        Ok((parse_post_page(&body)?, final_url))
    }

    fn to_response(post: ScrapedPost, source: String) -> ProviderResponse {
        ProviderResponse::single(
            CandidateResult::new(ProviderId::Sankaku)
                .with_tags(post.tags)
                .with_source(source)
                .with_safety(Some(post.safety)),
        )
    }
}

/// Post id from a post page URL (`.../post/show/<id>`, `.../posts/<id>`)
pub fn post_id_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty() && !id.contains(':') && id.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(String::from)
}

#[async_trait::async_trait]
impl MetadataProvider for SankakuScraper {
    fn id(&self) -> ProviderId {
        ProviderId::Sankaku
    }

    async fn query(&self, image: &ImageRef) -> Result<ProviderResponse, ProviderError> {
        let md5 = image.md5.as_deref().ok_or(ProviderError::NotFound)?;
        let request = self
            .http_client
            .get(format!("{}/post/show", self.base_url))
            .query(&[("md5", md5)]);

        let (post, final_url) = self.scrape(request).await?;
        Ok(Self::to_response(post, final_url))
    }
}

#[async_trait::async_trait]
impl MirrorBoard for SankakuScraper {
    async fn fetch_post(&self, post_id: &str) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/post/show/{}", self.base_url, post_id);
        let (post, _) = self.scrape(self.http_client.get(&url)).await?;
        Ok(Self::to_response(post, url))
    }
}
