//! Provider clients
//!
//! Each external metadata source lives in its own module. [`ProviderSet`]
//! builds the enabled ones once from configuration; the aggregator never
//! decides per call which client type it is talking to.

pub mod artist;
pub mod danbooru;
pub mod deepbooru;
pub mod gelbooru;
pub mod moebooru;
pub mod sankaku;
pub mod saucenao;

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::TaggerConfig;
use crate::error::TaggerError;
use crate::services::RequestPacer;
use crate::types::{MetadataProvider, MirrorBoard, ProviderError, ProviderId};

pub use artist::ArtistResolver;
pub use danbooru::DanbooruClient;
pub use deepbooru::{DeepbooruTagger, HttpClassifier, ImageClassifier};
pub use gelbooru::GelbooruClient;
pub use moebooru::MoebooruClient;
pub use sankaku::SankakuScraper;
pub use saucenao::SauceNaoClient;

/// HTTP client shared setup for provider clients
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(crate::USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Transient(e.to_string()))
}

/// Send a request, classify the status and decode the JSON body
pub(crate) async fn send_json<T: DeserializeOwned>(
    pacer: &RequestPacer,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    pacer.wait().await;

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status, &body));
    }

    response.json::<T>().await.map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Split a space-separated tag string
pub(crate) fn split_tags(tag_string: &str) -> Vec<String> {
    tag_string.split_whitespace().map(String::from).collect()
}

/// Enabled providers, resolved once per run
#[derive(Clone, Default)]
pub struct ProviderSet {
    /// MD5 lookup and reverse-search hit targets
    pub mirrors: Vec<Arc<dyn MirrorBoard>>,
    pub reverse_search: Option<Arc<dyn MetadataProvider>>,
    pub ml_fallback: Option<Arc<dyn MetadataProvider>>,
    pub artist_resolver: Option<Arc<ArtistResolver>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn MirrorBoard>) -> Self {
        self.mirrors.push(mirror);
        self
    }

    pub fn with_reverse_search(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.reverse_search = Some(provider);
        self
    }

    pub fn with_ml_fallback(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.ml_fallback = Some(provider);
        self
    }

    pub fn with_artist_resolver(mut self, resolver: Arc<ArtistResolver>) -> Self {
        self.artist_resolver = Some(resolver);
        self
    }

    pub fn mirror(&self, board: ProviderId) -> Option<&Arc<dyn MirrorBoard>> {
        self.mirrors.iter().find(|m| m.id() == board)
    }

    /// Build the providers enabled in `config`
    ///
    /// # Errors
    /// `TaggerError::ModelLoad` if the ML tagger is enabled but its model or
    /// vocabulary cannot be loaded.
    pub fn from_config(config: &TaggerConfig) -> Result<Self, TaggerError> {
        let at = &config.auto_tagger;
        let timeout = config.retry.timeout();
        let rps = config.retry.requests_per_second;
        let build_err = |e: ProviderError| TaggerError::Config(format!("provider client setup failed: {}", e));

        let mut set = ProviderSet::new();
        let danbooru = Arc::new(DanbooruClient::new(&config.credentials.danbooru, timeout, rps).map_err(build_err)?);

        for board in &at.mirrors {
            let mirror: Arc<dyn MirrorBoard> = match board {
                ProviderId::Danbooru => danbooru.clone(),
                ProviderId::Gelbooru => {
                    Arc::new(GelbooruClient::new(&config.credentials.gelbooru, timeout, rps).map_err(build_err)?)
                }
                ProviderId::Yandere => Arc::new(MoebooruClient::yandere(timeout, rps).map_err(build_err)?),
                ProviderId::Konachan => Arc::new(MoebooruClient::konachan(timeout, rps).map_err(build_err)?),
                ProviderId::Sankaku => Arc::new(SankakuScraper::new(timeout, rps).map_err(build_err)?),
                other => {
                    return Err(TaggerError::Config(format!("{} is not a mirror board", other)));
                }
            };
            set = set.with_mirror(mirror);
        }

        if at.saucenao {
            let client = SauceNaoClient::new(at.saucenao_api_token.clone(), at.saucenao_min_similarity, timeout)
                .map_err(build_err)?;
            set = set.with_reverse_search(Arc::new(client));
        }

        if at.deepbooru {
            let tagger = DeepbooruTagger::from_config(at, timeout)?;
            set = set.with_ml_fallback(Arc::new(tagger));
        }

        set = set.with_artist_resolver(Arc::new(ArtistResolver::new(danbooru)));

        info!(
            mirrors = ?set.mirrors.iter().map(|m| m.id().name()).collect::<Vec<_>>(),
            reverse_search = set.reverse_search.is_some(),
            ml_fallback = set.ml_fallback.is_some(),
            "Providers configured"
        );

        Ok(set)
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("mirrors", &self.mirrors.iter().map(|m| m.id()).collect::<Vec<_>>())
            .field("reverse_search", &self.reverse_search.as_ref().map(|p| p.id()))
            .field("ml_fallback", &self.ml_fallback.as_ref().map(|p| p.id()))
            .finish()
    }
}
