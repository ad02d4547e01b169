//! ML fallback tagger (DeepDanbooru-style)
//!
//! The model itself is a black box behind [`ImageClassifier`]: image bytes
//! in, one score per vocabulary entry out. The vocabulary is `tags.txt`
//! next to the model file, one tag per line.
//!
//! Post-processing:
//! - keep tags scoring above the threshold
//! - the best-scoring `rating:*` tag becomes the safety guess and is removed
//! - whitespace in tags becomes `_`
//! - optional `deepbooru` marker tag

use btk_common::Safety;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::http_client;
use crate::config::AutoTaggerConfig;
use crate::error::TaggerError;
use crate::types::{CandidateResult, ImageRef, MetadataProvider, ProviderError, ProviderId, ProviderResponse};

/// Marker tag for ML-tagged posts
pub const ML_MARKER_TAG: &str = "deepbooru";

/// Source entry recorded for ML-tagged posts
pub const ML_SOURCE: &str = "Deepbooru";

/// Vocabulary file expected next to the model
const VOCABULARY_FILE: &str = "tags.txt";

/// Model inference
#[async_trait::async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Scores aligned with the vocabulary
    async fn classify(&self, image: &[u8]) -> Result<Vec<f32>, ProviderError>;
}

/// Classifier served over HTTP: POST the image, receive a JSON score array
pub struct HttpClassifier {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ImageClassifier for HttpClassifier {
    async fn classify(&self, image: &[u8]) -> Result<Vec<f32>, ProviderError> {
        let part = reqwest::multipart::Part::bytes(image.to_vec()).file_name("image");
        let response = self
            .http_client
            .post(&self.endpoint)
            .multipart(reqwest::multipart::Form::new().part("image", part))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }
        response.json::<Vec<f32>>().await.map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

/// Read the vocabulary that belongs to `model_path`
pub fn load_vocabulary(model_path: &Path) -> Result<Vec<String>, TaggerError> {
    if !model_path.exists() {
        return Err(TaggerError::ModelLoad(format!("model not found: {}", model_path.display())));
    }

    let vocabulary_path: PathBuf = model_path
        .parent()
        .map(|dir| dir.join(VOCABULARY_FILE))
        .unwrap_or_else(|| PathBuf::from(VOCABULARY_FILE));

    let content = std::fs::read_to_string(&vocabulary_path).map_err(|e| {
        TaggerError::ModelLoad(format!(
            "{} not readable ({}); place it next to the model",
            vocabulary_path.display(),
            e
        ))
    })?;

    let vocabulary: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();

    if vocabulary.is_empty() {
        return Err(TaggerError::ModelLoad(format!("{} is empty", vocabulary_path.display())));
    }
    Ok(vocabulary)
}

pub struct DeepbooruTagger {
    classifier: Arc<dyn ImageClassifier>,
    vocabulary: Vec<String>,
    threshold: f32,
    default_safety: Safety,
    set_marker_tag: bool,
}

impl DeepbooruTagger {
    pub fn new(
        classifier: Arc<dyn ImageClassifier>,
        vocabulary: Vec<String>,
        threshold: f32,
        default_safety: Safety,
        set_marker_tag: bool,
    ) -> Self {
        Self {
            classifier,
            vocabulary,
            threshold,
            default_safety,
            set_marker_tag,
        }
    }

    /// Load model vocabulary and connect the classifier; any failure is fatal
    pub fn from_config(config: &AutoTaggerConfig, timeout: Duration) -> Result<Self, TaggerError> {
        let model_path = config
            .deepbooru_model
            .as_deref()
            .ok_or_else(|| TaggerError::ModelLoad("auto_tagger.deepbooru_model is not set".to_string()))?;
        let vocabulary = load_vocabulary(model_path)?;

        let endpoint = config
            .deepbooru_endpoint
            .as_deref()
            .ok_or_else(|| TaggerError::ModelLoad("auto_tagger.deepbooru_endpoint is not set".to_string()))?;
        let classifier = HttpClassifier::new(endpoint, timeout).map_err(|e| TaggerError::ModelLoad(e.to_string()))?;

        info!(
            model = %model_path.display(),
            vocabulary = vocabulary.len(),
            threshold = config.deepbooru_threshold,
            "ML tagger loaded"
        );

        Ok(Self::new(
            Arc::new(classifier),
            vocabulary,
            config.deepbooru_threshold,
            config.default_safety,
            config.deepbooru_set_tag,
        ))
    }

    /// Turn raw scores into a candidate
    pub fn interpret(&self, scores: &[f32]) -> Result<CandidateResult, ProviderError> {
        if scores.len() != self.vocabulary.len() {
            return Err(ProviderError::Parse(format!(
                "classifier returned {} scores for {} tags",
                scores.len(),
                self.vocabulary.len()
            )));
        }

        let mut tags: Vec<String> = Vec::new();
        let mut rating: Option<(f32, Safety)> = None;

        for (tag, &score) in self.vocabulary.iter().zip(scores) {
            if score <= self.threshold {
                continue;
            }
            if tag.starts_with("rating:") {
                if let Some(safety) = Safety::from_rating(tag) {
                    if rating.map_or(true, |(best, _)| score > best) {
                        rating = Some((score, safety));
                    }
                }
                continue;
            }
            let tag = tag.split_whitespace().collect::<Vec<_>>().join("_");
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        if self.set_marker_tag && !tags.is_empty() {
            tags.push(ML_MARKER_TAG.to_string());
        }

        let safety = rating.map(|(_, s)| s).unwrap_or(self.default_safety);
        debug!(tags = tags.len(), safety = %safety, "ML tagger result");

        let mut candidate = CandidateResult::new(ProviderId::Deepbooru)
            .with_tags(tags)
            .with_safety(Some(safety));
        if candidate.has_tags() {
            candidate = candidate.with_source(ML_SOURCE);
        }
        Ok(candidate)
    }
}

#[async_trait::async_trait]
impl MetadataProvider for DeepbooruTagger {
    fn id(&self) -> ProviderId {
        ProviderId::Deepbooru
    }

    async fn query(&self, image: &ImageRef) -> Result<ProviderResponse, ProviderError> {
        let bytes = image.bytes.as_deref().ok_or(ProviderError::NotFound)?;
        let scores = self.classifier.classify(bytes).await?;
        Ok(ProviderResponse::single(self.interpret(&scores)?))
    }
}
