//! Downloaded media and its site metadata
//!
//! A downloader (gallery-dl style) writes each media file next to a
//! `<file>.json` sidecar. The sidecar's shape depends on the site, so it is
//! read as loose JSON and reduced to [`SiteMetadata`]:
//!
//! | Site                                      | Tags from                     | Artist names       |
//! |-------------------------------------------|-------------------------------|--------------------|
//! | danbooru, gelbooru, konachan, yandere, sankaku | `tags` (string or list), else `tag_string` | -        |
//! | pixiv, fanbox                             | `tags`                        | `user.name`        |
//! | twitter                                   | `hashtags`                    | `author.name`, `author.nick` |
//! | e-hentai                                  | (not kept)                    | `artist:*` tags    |
//! | kemono                                    | (not kept)                    | -                  |

use btk_common::Safety;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::TaggerError;
use crate::fusion::metadata_merger::normalize_tag;
use crate::services::detect_extension;
use crate::types::{CandidateResult, ProviderId};

/// Sites recognised in `file_url` / `category`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Danbooru,
    Gelbooru,
    Konachan,
    Yandere,
    Sankaku,
    Twitter,
    Pixiv,
    Fanbox,
    Kemono,
    EHentai,
}

impl Site {
    const MARKERS: &'static [(&'static str, Site)] = &[
        ("danbooru", Site::Danbooru),
        ("donmai", Site::Danbooru),
        ("gelbooru", Site::Gelbooru),
        ("konachan", Site::Konachan),
        ("yandere", Site::Yandere),
        ("yande.re", Site::Yandere),
        ("sankaku", Site::Sankaku),
        ("twitter", Site::Twitter),
        ("twimg", Site::Twitter),
        ("pixiv", Site::Pixiv),
        ("fanbox", Site::Fanbox),
        ("kemono", Site::Kemono),
        ("e-hentai", Site::EHentai),
    ];

    /// First site whose marker occurs in `url`
    pub fn detect(url: &str) -> Option<Site> {
        let url = url.to_ascii_lowercase();
        Self::MARKERS
            .iter()
            .find(|(marker, _)| url.contains(marker))
            .map(|&(_, site)| site)
    }

    fn keeps_tags(&self) -> bool {
        !matches!(self, Site::Kemono | Site::EHentai)
    }
}

/// Metadata carried by a downloaded file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteMetadata {
    pub site: Option<Site>,
    /// Canonical post URL on the site
    pub source: Option<String>,
    pub safety: Option<Safety>,
    pub tags: Vec<String>,
    /// Names to resolve to an artist tag, tried in order
    pub artist_names: Vec<String>,
}

impl SiteMetadata {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_json(&value))
    }

    pub fn from_json(metadata: &Value) -> Self {
        let site = metadata
            .get("file_url")
            .and_then(Value::as_str)
            .and_then(Site::detect)
            .or_else(|| metadata.get("category").and_then(Value::as_str).and_then(Site::detect));

        let Some(site) = site else {
            return Self {
                safety: rating(metadata),
                ..Self::default()
            };
        };

        let raw_tags = raw_tags(site, metadata);
        let artist_names = artist_names(site, metadata, &raw_tags);
        let tags = if site.keeps_tags() {
            raw_tags.iter().filter_map(|t| normalize_tag(t)).collect()
        } else {
            Vec::new()
        };

        Self {
            site: Some(site),
            source: generate_source(site, metadata),
            safety: rating(metadata),
            tags,
            artist_names,
        }
    }

    /// Aliases used as artist tags when the resolver knows none of the names
    pub fn artist_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = Vec::new();
        for name in &self.artist_names {
            let alias = name.to_lowercase().replace('\u{3000}', "").split_whitespace().collect::<Vec<_>>().join("_");
            if !alias.is_empty() && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        aliases
    }

    /// Candidate representing the metadata itself
    pub fn to_candidate(&self) -> CandidateResult {
        let mut candidate = CandidateResult::new(ProviderId::SiteMetadata)
            .with_tags(self.tags.iter().cloned())
            .with_safety(self.safety);
        if let Some(source) = &self.source {
            candidate = candidate.with_source(source.clone());
        }
        candidate
    }
}

/// String form of a JSON id (number or string)
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_at<'a>(metadata: &'a Value, pointer: &str) -> Option<&'a str> {
    metadata.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Canonical source URL for the post the file came from
pub fn generate_source(site: Site, metadata: &Value) -> Option<String> {
    let id = id_string(metadata.get("id"));

    match site {
        Site::Danbooru => Some(format!("https://danbooru.donmai.us/posts/{}", id?)),
        Site::Gelbooru => Some(format!("https://gelbooru.com/index.php?page=post&s=view&id={}", id?)),
        Site::Konachan => Some(format!("https://konachan.com/post/show/{}", id?)),
        Site::Yandere => Some(format!("https://yande.re/post/show/{}", id?)),
        Site::Sankaku => Some(format!("https://sankakucomplex.com/posts/{}", id?)),
        Site::Pixiv => Some(format!("https://www.pixiv.net/artworks/{}", id?)),
        Site::Twitter => {
            let user = str_at(metadata, "/author/name")?;
            let tweet_id = id_string(metadata.get("tweet_id"))?;
            Some(format!("https://twitter.com/{}/status/{}", user, tweet_id))
        }
        Site::Fanbox => {
            let creator = str_at(metadata, "/creatorId")?;
            Some(format!("https://fanbox.cc/@{}/posts/{}", creator, id?))
        }
        Site::Kemono => {
            let user = id_string(metadata.get("user"))?;
            let service = str_at(metadata, "/service")?;
            Some(format!("https://kemono.party/{}/user/{}/post/{}", service, user, id?))
        }
        Site::EHentai => {
            let gid = id_string(metadata.get("gid"))?;
            let token = str_at(metadata, "/token")?;
            Some(format!("https://e-hentai.org/g/{}/{}", gid, token))
        }
    }
}

fn rating(metadata: &Value) -> Option<Safety> {
    metadata.get("rating").and_then(Value::as_str).and_then(Safety::from_rating)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::String(s) => Some(s.split_whitespace().map(String::from).collect()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    // pixiv-style {"name": ..., "translated_name": ...}
                    Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(String::from),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn raw_tags(site: Site, metadata: &Value) -> Vec<String> {
    let primary = match site {
        Site::Twitter => string_list(metadata.get("hashtags")),
        _ => string_list(metadata.get("tags")),
    };
    primary
        .or_else(|| string_list(metadata.get("tag_string")))
        .unwrap_or_default()
}

fn artist_names(site: Site, metadata: &Value, raw_tags: &[String]) -> Vec<String> {
    let names: Vec<Option<&str>> = match site {
        Site::Twitter => vec![str_at(metadata, "/author/name"), str_at(metadata, "/author/nick")],
        Site::Pixiv | Site::Fanbox => vec![str_at(metadata, "/user/name")],
        Site::EHentai => {
            return raw_tags
                .iter()
                .filter(|t| t.starts_with("artist"))
                .filter_map(|t| t.split_once(':'))
                .map(|(_, name)| name.replace(' ', "_"))
                .collect();
        }
        _ => Vec::new(),
    };
    names.into_iter().flatten().map(String::from).collect()
}

/// One media file to upload
#[derive(Debug, Clone)]
pub struct ImportItem {
    pub bytes: Vec<u8>,
    pub file_name: String,
    /// Extension from magic bytes, e.g. "png"
    pub extension: Option<String>,
    pub metadata: Option<SiteMetadata>,
}

impl ImportItem {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            extension: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: SiteMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Read a media file and its `<file>.json` sidecar, if present
    ///
    /// An unreadable sidecar is logged and ignored.
    pub async fn read(path: &Path) -> Result<Self, TaggerError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let mut item = Self::new(bytes, file_name);
        item.extension = detect_extension(&item.bytes, path);

        let sidecar = sidecar_path(path);
        if sidecar.exists() {
            match tokio::fs::read_to_string(&sidecar).await {
                Ok(json) => match SiteMetadata::parse(&json) {
                    Ok(metadata) => item.metadata = Some(metadata),
                    Err(e) => warn!(file = %sidecar.display(), error = %e, "Ignoring malformed metadata"),
                },
                Err(e) => warn!(file = %sidecar.display(), error = %e, "Ignoring unreadable metadata"),
            }
        }

        Ok(item)
    }

    /// Record re-encoded content: `a.png` becomes `a.jpg`
    pub fn set_extension(&mut self, extension: &str) {
        self.file_name = Path::new(&self.file_name)
            .with_extension(extension)
            .to_string_lossy()
            .to_string();
        self.extension = Some(extension.to_string());
    }

        /// Name sent when staging, with the detected extension
    pub fn upload_name(&self) -> String {
        match &self.extension {
            Some(ext) if !self.file_name.to_lowercase().ends_with(&format!(".{}", ext)) => {
                format!("{}.{}", self.file_name, ext)
            }
            _ => self.file_name.clone(),
        }
    }
}

/// `<file>.json` next to `path`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".json");
    PathBuf::from(name)
}
