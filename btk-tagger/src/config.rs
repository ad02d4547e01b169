//! Configuration for btk-tagger
//!
//! Loaded from TOML (see `btk_common::config` for file resolution) with
//! per-field defaults, then secrets are overridden from the environment:
//!
//! | Variable                | Field                              |
//! |-------------------------|------------------------------------|
//! | `BTK_BOARD_TOKEN`       | `board.api_token`                  |
//! | `BTK_SAUCENAO_API_KEY`  | `auto_tagger.saucenao_api_token`   |
//! | `BTK_DANBOORU_API_KEY`  | `credentials.danbooru.api_key`     |
//! | `BTK_GELBOORU_API_KEY`  | `credentials.gelbooru.api_key`     |

use btk_common::config::{env_override, load_toml_or_default, resolve_config_path, LoggingConfig, CONFIG_ENV_VAR};
use btk_common::{Error, Result, Safety};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::retry::RetryPolicy;
use crate::types::ProviderId;

/// Complete btk-tagger configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaggerConfig {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub auto_tagger: AutoTaggerConfig,
    #[serde(default)]
    pub upload_media: UploadConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target board connection
#[derive(Debug, Clone, Deserialize)]
pub struct BoardConfig {
    /// Base URL, e.g. `https://booru.example.org`
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    /// Content URLs are reachable without credentials
    #[serde(default)]
    pub public: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            api_token: String::new(),
            public: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Auto-tagging behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct AutoTaggerConfig {
    #[serde(default = "default_true")]
    pub saucenao: bool,
    #[serde(default)]
    pub saucenao_api_token: Option<String>,
    /// Minimum SauceNAO similarity (percent) for a hit to count
    #[serde(default = "default_saucenao_min_similarity")]
    pub saucenao_min_similarity: f32,
    /// Look images up by MD5 on the mirror boards before reverse search
    #[serde(default = "default_true")]
    pub md5_search: bool,
    /// Mirror boards to consult
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<ProviderId>,
    #[serde(default)]
    pub deepbooru: bool,
    /// Run the ML tagger even when other providers found tags
    #[serde(default)]
    pub deepbooru_forced: bool,
    /// Add a `deepbooru` marker tag to ML-tagged posts
    #[serde(default)]
    pub deepbooru_set_tag: bool,
    /// Model file; `tags.txt` must sit next to it
    #[serde(default)]
    pub deepbooru_model: Option<PathBuf>,
    /// Inference endpoint serving the model
    #[serde(default)]
    pub deepbooru_endpoint: Option<String>,
    #[serde(default = "default_deepbooru_threshold")]
    pub deepbooru_threshold: f32,
    #[serde(default)]
    pub default_safety: Safety,
    /// Copy character/series tags from related posts when nothing else matched
    #[serde(default = "default_true")]
    pub use_relations: bool,
    /// Push character/series tags of a freshly tagged post to its relations
    #[serde(default)]
    pub update_relations: bool,
    /// Resolve Twitter authors to artist tags during import
    #[serde(default)]
    pub use_twitter_artist: bool,
}

impl Default for AutoTaggerConfig {
    fn default() -> Self {
        Self {
            saucenao: true,
            saucenao_api_token: None,
            saucenao_min_similarity: default_saucenao_min_similarity(),
            md5_search: true,
            mirrors: default_mirrors(),
            deepbooru: false,
            deepbooru_forced: false,
            deepbooru_set_tag: false,
            deepbooru_model: None,
            deepbooru_endpoint: None,
            deepbooru_threshold: default_deepbooru_threshold(),
            default_safety: Safety::Safe,
            use_relations: true,
            update_relations: false,
            use_twitter_artist: false,
        }
    }
}

/// Upload behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Tags given to uploads nothing else could tag
    #[serde(default = "default_upload_tags")]
    pub tags: Vec<String>,
    /// Run provider aggregation for unique uploads
    #[serde(default)]
    pub auto_tag: bool,
    /// Similarity above which an upload counts as a duplicate
    #[serde(default = "default_max_similarity")]
    pub max_similarity: f32,
    #[serde(default)]
    pub default_safety: Safety,
    /// Merge new metadata into the existing post on duplicates
    #[serde(default)]
    pub update_tags_if_exists: bool,
    /// Default for `upload`/`import` when no path is given
    #[serde(default)]
    pub src_path: Option<PathBuf>,
    /// Delete uploaded files, then empty directories under `src_path`
    #[serde(default)]
    pub cleanup: bool,
    /// Re-encode PNGs above `convert_threshold` bytes as JPEG
    #[serde(default)]
    pub convert_to_jpg: bool,
    #[serde(default = "default_convert_threshold")]
    pub convert_threshold: u64,
    /// JPEG quality, at most 95
    #[serde(default = "default_convert_quality")]
    pub convert_quality: u8,
    /// Downscale images above `shrink_threshold` pixels
    #[serde(default)]
    pub shrink: bool,
    #[serde(default = "default_shrink_threshold")]
    pub shrink_threshold: u64,
    /// Bounding box `[width, height]`; aspect ratio is kept
    #[serde(default = "default_shrink_dimensions")]
    pub shrink_dimensions: [u32; 2],
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            tags: default_upload_tags(),
            auto_tag: false,
            max_similarity: default_max_similarity(),
            default_safety: Safety::Safe,
            update_tags_if_exists: false,
            src_path: None,
            cleanup: false,
            convert_to_jpg: false,
            convert_threshold: default_convert_threshold(),
            convert_quality: default_convert_quality(),
            shrink: false,
            shrink_threshold: default_shrink_threshold(),
            shrink_dimensions: default_shrink_dimensions(),
        }
    }
}

/// Mirror board login
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteCredentials {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub api_key: String,
}

impl SiteCredentials {
    pub fn is_set(&self) -> bool {
        !self.user.is_empty() && !self.api_key.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub danbooru: SiteCredentials,
    #[serde(default)]
    pub gelbooru: SiteCredentials,
}

/// Retry, cool-down, timeout and pacing settings for provider calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// Sleep when a short-window budget hits zero
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Per-call deadline
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Requests per second allowed against each mirror host
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
            cooldown_secs: default_cooldown_secs(),
            timeout_secs: default_timeout_secs(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            delay: Duration::from_secs(self.delay_secs),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_saucenao_min_similarity() -> f32 {
    80.0
}

fn default_mirrors() -> Vec<ProviderId> {
    vec![
        ProviderId::Danbooru,
        ProviderId::Gelbooru,
        ProviderId::Yandere,
        ProviderId::Konachan,
        ProviderId::Sankaku,
    ]
}

fn default_deepbooru_threshold() -> f32 {
    0.7
}

fn default_upload_tags() -> Vec<String> {
    vec!["tagme".to_string()]
}

fn default_max_similarity() -> f32 {
    0.95
}

fn default_convert_threshold() -> u64 {
    3_000_000
}

fn default_convert_quality() -> u8 {
    90
}

fn default_shrink_threshold() -> u64 {
    6_000_000
}

fn default_shrink_dimensions() -> [u32; 2] {
    [2500, 2500]
}

fn default_max_attempts() -> u32 {
    11
}

fn default_delay_secs() -> u64 {
    5
}

fn default_cooldown_secs() -> u64 {
    35
}

fn default_requests_per_second() -> u32 {
    2
}

impl TaggerConfig {
    /// Resolve, load and apply environment overrides
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR);
        let mut config: TaggerConfig = load_toml_or_default(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets from the environment win over the file
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = env_override("BTK_BOARD_TOKEN") {
            self.board.api_token = token;
        }
        if let Some(key) = env_override("BTK_SAUCENAO_API_KEY") {
            self.auto_tagger.saucenao_api_token = Some(key);
        }
        if let Some(key) = env_override("BTK_DANBOORU_API_KEY") {
            self.credentials.danbooru.api_key = key;
        }
        if let Some(key) = env_override("BTK_GELBOORU_API_KEY") {
            self.credentials.gelbooru.api_key = key;
        }
    }

    /// Reject settings that would make every run fail
    pub fn validate(&self) -> Result<()> {
        if self.board.url.trim().is_empty() {
            return Err(Error::Config("board.url must be set".to_string()));
        }
        if !self.board.url.starts_with("http://") && !self.board.url.starts_with("https://") {
            return Err(Error::Config(format!("board.url is not an http(s) URL: {}", self.board.url)));
        }
        if !(0.0..=1.0).contains(&self.upload_media.max_similarity) {
            return Err(Error::Config(format!(
                "upload_media.max_similarity must be within [0, 1], got {}",
                self.upload_media.max_similarity
            )));
        }
        if !(0.0..=1.0).contains(&self.auto_tagger.deepbooru_threshold) {
            return Err(Error::Config(format!(
                "auto_tagger.deepbooru_threshold must be within [0, 1], got {}",
                self.auto_tagger.deepbooru_threshold
            )));
        }
        if self.auto_tagger.deepbooru && self.auto_tagger.deepbooru_model.is_none() {
            return Err(Error::Config("auto_tagger.deepbooru_model is required when deepbooru is enabled".to_string()));
        }
        if self.upload_media.convert_quality == 0 || self.upload_media.convert_quality > 95 {
            return Err(Error::Config(format!(
                "upload_media.convert_quality must be within [1, 95], got {}",
                self.upload_media.convert_quality
            )));
        }
        if self.upload_media.shrink_dimensions.contains(&0) {
            return Err(Error::Config("upload_media.shrink_dimensions must be non-zero".to_string()));
        }
        if self.retry.requests_per_second == 0 {
            return Err(Error::Config("retry.requests_per_second must be at least 1".to_string()));
        }
        Ok(())
    }

    /// At least one provider can contribute tags
    pub fn any_provider_enabled(&self) -> bool {
        let at = &self.auto_tagger;
        at.saucenao || (at.md5_search && !at.mirrors.is_empty()) || at.deepbooru
    }

    /// Duplicate threshold on the board's similarity distance
    pub fn distance_threshold(&self) -> f32 {
        1.0 - self.upload_media.max_similarity
    }
}
