//! Upload/Update Orchestrator
//!
//! Drives whole runs, one item at a time:
//!
//! **Auto-tag** (existing posts matching a query):
//! 1. Fetch the post and its image (or only its URL on a public board)
//! 2. Aggregate candidates
//! 3. Merge into the post (with `--add-tags` / `--remove-tags`)
//! 4. Commit only if something changed; one retry on a version conflict
//! 5. Optionally push tags to related posts
//!
//! With a Sankaku post URL, the single post named by the query takes its
//! tags from that page instead of going through aggregation.
//!
//! **Upload / import** (new media):
//! 1. Convert/shrink per `[upload_media]`, stage and pass the [`SimilarityGate`]
//! 2. Duplicate: keep the existing post, optionally enrich it from site metadata
//! 3. Unique: merge site metadata, artist and (optionally) aggregated
//!    candidates, create the post with near matches as relations
//!
//! Images over 2 MB are downscaled before providers see them; hash lookups
//! keep the original checksum. With cleanup enabled, every file that ended
//! up on the board (uploaded or already there) is deleted afterwards.
//!
//! Board requests go through [`RetryingBoard`]: transient failures are
//! retried under the run's retry policy before an item is given up.
//! Item failures are logged and counted as skipped; the run continues.
//! Cancellation is checked before staging and before every commit.

use btk_common::Safety;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregator::{Aggregator, AggregatorOptions, TagOrigin};
use super::import_item::{ImportItem, Site, SiteMetadata};
use super::similarity_gate::{GateOutcome, SimilarityGate};
use super::statistics::{ItemOutcome, RunStatistics};
use super::TaggerEvent;
use crate::board::query::sanitize_query;
use crate::board::{BoardApi, BoardError, Post, PostId, RetryingBoard};
use crate::config::TaggerConfig;
use crate::error::{TaggerError, TaggerResult};
use crate::fusion::metadata_merger::propagate_relation_tags;
use crate::fusion::{merge, MergeRequest};
use crate::providers::sankaku::post_id_from_url;
use crate::providers::ProviderSet;
use crate::services::image_prep::SEARCH_SIZE_LIMIT;
use crate::services::{prepare_upload, remove_uploaded, shrink_for_search, ImagePrepOptions, ProviderController};
use crate::types::{CandidateResult, ImageRef, ProviderId};

/// Run behaviour derived from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub board_url: String,
    /// Public board: providers can fetch content URLs themselves
    pub public_board: bool,
    pub ml_enabled: bool,
    pub aggregator: AggregatorOptions,
    /// Safety for auto-tagged posts when nothing carries a rating
    pub default_safety: Safety,
    pub update_relations: bool,
    pub use_twitter_artist: bool,
    /// Tags for uploads that end up with no other tags
    pub upload_tags: Vec<String>,
    pub upload_auto_tag: bool,
    pub upload_default_safety: Safety,
    /// Near matches strictly below this distance are duplicates
    pub distance_threshold: f32,
    pub update_tags_if_exists: bool,
    pub image_prep: ImagePrepOptions,
    /// Delete uploaded and duplicate files
    pub cleanup: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from_config(&TaggerConfig::default())
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &TaggerConfig) -> Self {
        let at = &config.auto_tagger;
        let upload = &config.upload_media;
        Self {
            board_url: config.board.url.clone(),
            public_board: config.board.public,
            ml_enabled: at.deepbooru,
            aggregator: AggregatorOptions::from_config(at),
            default_safety: at.default_safety,
            update_relations: at.update_relations,
            use_twitter_artist: at.use_twitter_artist,
            upload_tags: upload.tags.clone(),
            upload_auto_tag: upload.auto_tag,
            upload_default_safety: upload.default_safety,
            distance_threshold: config.distance_threshold(),
            update_tags_if_exists: upload.update_tags_if_exists,
            image_prep: ImagePrepOptions::from_config(upload),
            cleanup: upload.cleanup,
        }
    }
}

/// Media handed to an upload run
#[derive(Debug, Clone)]
pub enum UploadItem {
    /// Read lazily when its turn comes
    File(PathBuf),
    Memory(ImportItem),
}

impl UploadItem {
    fn label(&self) -> String {
        match self {
            UploadItem::File(path) => path.display().to_string(),
            UploadItem::Memory(item) => item.file_name.clone(),
        }
    }
}

/// Tag edits requested for an auto-tag run
#[derive(Debug, Clone, Default)]
pub struct TagEdits {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

pub struct Orchestrator {
    board: Arc<dyn BoardApi>,
    aggregator: Aggregator,
    gate: SimilarityGate,
    options: OrchestratorOptions,
    cancel: CancellationToken,
    event_tx: Option<mpsc::Sender<TaggerEvent>>,
}

impl Orchestrator {
    pub fn new(
        board: Arc<dyn BoardApi>,
        providers: ProviderSet,
        controller: ProviderController,
        options: OrchestratorOptions,
    ) -> Self {
        let cancel = controller.cancel_token().clone();
        let board: Arc<dyn BoardApi> = Arc::new(RetryingBoard::new(
            board,
            *controller.policy(),
            controller.timeout(),
            cancel.clone(),
        ));
        Self {
            gate: SimilarityGate::new(board.clone(), options.distance_threshold),
            aggregator: Aggregator::new(providers, controller, options.aggregator),
            board,
            options,
            cancel,
            event_tx: None,
        }
    }

    pub fn with_event_channel(mut self, event_tx: mpsc::Sender<TaggerEvent>) -> Self {
        self.aggregator = self.aggregator.with_event_channel(event_tx.clone());
        self.event_tx = Some(event_tx);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Startup check; an unreachable board aborts the run
    pub async fn ping(&self) -> TaggerResult<()> {
        self.board.ping().await.map_err(|source| TaggerError::BoardUnreachable {
            url: self.options.board_url.clone(),
            source,
        })
    }

    async fn emit_event(&self, event: TaggerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    // ========================================================================
    // Auto-tag
    // ========================================================================

    /// Tag every post matching `query`
    ///
    /// # Errors
    /// Only listing the query is fatal; per-post failures are counted as skipped.
    pub async fn auto_tag(&self, query: &str, edits: &TagEdits) -> TaggerResult<RunStatistics> {
        let sanitized = sanitize_query(query, false);
        let post_ids = self.board.search_posts(&sanitized).await?;

        let run_id = Uuid::new_v4();
        let mut stats = RunStatistics {
            total: post_ids.len(),
            ..Default::default()
        };
        info!(run_id = %run_id, query = %sanitized, total = post_ids.len(), "Auto-tagging posts");
        self.emit_event(TaggerEvent::RunStarted {
            run_id,
            mode: "auto_tag".to_string(),
            total: stats.total,
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await;

        for (index, post_id) in post_ids.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let label = post_id.to_string();
            self.emit_event(TaggerEvent::ItemStarted {
                index,
                total: stats.total,
                label: label.clone(),
            })
            .await;

            let outcome = self.tag_post(*post_id, edits, &mut stats).await;
            stats.record(outcome);
            self.emit_event(TaggerEvent::ItemCompleted { label, outcome }).await;
        }

        self.finish_run(run_id, &stats).await;
        Ok(stats)
    }

    async fn tag_post(&self, post_id: PostId, edits: &TagEdits, stats: &mut RunStatistics) -> ItemOutcome {
        let label = post_id.to_string();

        let post = match self.board.get_post(post_id).await {
            Ok(post) => post,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Could not fetch post, skipping");
                return ItemOutcome::Skipped;
            }
        };

        let image = match self.image_ref(&post).await {
            Ok(image) => image,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Could not download post content, skipping");
                return ItemOutcome::Skipped;
            }
        };

        let related = if self.options.aggregator.use_relations || self.options.update_relations {
            self.fetch_related(&post.relations).await
        } else {
            Vec::new()
        };
        let relation_input: &[Post] = if self.options.aggregator.use_relations { &related } else { &[] };

        let report = self.aggregator.aggregate(&label, &image, relation_input, TagOrigin::None).await;
        debug!(post_id = %post_id, origin = ?report.origin, candidates = report.candidates.len(), "Aggregated");

        if self.cancel.is_cancelled() {
            info!(post_id = %post_id, "Cancelled before commit");
            return ItemOutcome::Skipped;
        }

        let request = MergeRequest {
            existing: None,
            candidates: &report.candidates,
            add_tags: &edits.add,
            remove_tags: &edits.remove,
            default_safety: self.options.default_safety,
        };

        let updated = match self.commit_update(post, request).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Could not update post, skipping");
                return ItemOutcome::Skipped;
            }
        };

        if let Some(updated) = &updated {
            info!(post_id = %post_id, tags = updated.tags.len(), safety = %updated.safety, "Post updated");
            if self.options.update_relations && !related.is_empty() {
                stats.relations_updated += self.update_related(updated, related).await;
            }
        } else {
            debug!(post_id = %post_id, "No changes");
        }

        match report.origin {
            TagOrigin::Ml => ItemOutcome::MlTagged,
            TagOrigin::None => ItemOutcome::Untagged,
            _ => ItemOutcome::Tagged,
        }
    }

    /// Tag the post `query` names with the tags of a Sankaku post page
    ///
    /// # Errors
    /// `TaggerError::Config` when `query` is not a post id or `url` names no
    /// post. Lookup and commit failures are counted as skipped.
    pub async fn tag_from_sankaku(&self, query: &str, url: &str, edits: &TagEdits) -> TaggerResult<RunStatistics> {
        let post_id: PostId = query
            .trim()
            .parse::<u64>()
            .map(PostId)
            .map_err(|_| {
                TaggerError::Config(format!("a Sankaku URL needs a single post id as query, got {:?}", query))
            })?;
        let sankaku_id =
            post_id_from_url(url).ok_or_else(|| TaggerError::Config(format!("no Sankaku post id in {:?}", url)))?;

        let run_id = Uuid::new_v4();
        let mut stats = RunStatistics {
            total: 1,
            ..Default::default()
        };
        let label = post_id.to_string();
        info!(run_id = %run_id, post_id = %post_id, sankaku_id = %sankaku_id, "Tagging post from Sankaku");
        self.emit_event(TaggerEvent::RunStarted {
            run_id,
            mode: "sankaku".to_string(),
            total: 1,
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await;
        self.emit_event(TaggerEvent::ItemStarted {
            index: 0,
            total: 1,
            label: label.clone(),
        })
        .await;

        let outcome = self.tag_post_from_mirror(post_id, ProviderId::Sankaku, &sankaku_id, edits).await;
        stats.record(outcome);
        self.emit_event(TaggerEvent::ItemCompleted { label, outcome }).await;

        self.finish_run(run_id, &stats).await;
        Ok(stats)
    }

    async fn tag_post_from_mirror(
        &self,
        post_id: PostId,
        board: ProviderId,
        mirror_id: &str,
        edits: &TagEdits,
    ) -> ItemOutcome {
        let post = match self.board.get_post(post_id).await {
            Ok(post) => post,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Could not fetch post, skipping");
                return ItemOutcome::Skipped;
            }
        };

        let candidates = self.aggregator.fetch_mirror_post(&post_id.to_string(), board, mirror_id).await;
        if !candidates.iter().any(CandidateResult::has_tags) {
            warn!(post_id = %post_id, board = %board, mirror_id, "Mirror post has no tags, skipping");
            return ItemOutcome::Skipped;
        }
        if self.cancel.is_cancelled() {
            return ItemOutcome::Skipped;
        }

        let request = MergeRequest {
            existing: None,
            candidates: &candidates,
            add_tags: &edits.add,
            remove_tags: &edits.remove,
            default_safety: self.options.default_safety,
        };
        match self.commit_update(post, request).await {
            Ok(Some(updated)) => {
                info!(post_id = %post_id, tags = updated.tags.len(), safety = %updated.safety, "Post updated");
                ItemOutcome::Tagged
            }
            Ok(None) => {
                debug!(post_id = %post_id, "No changes");
                ItemOutcome::Tagged
            }
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Could not update post, skipping");
                ItemOutcome::Skipped
            }
        }
    }

    /// Bytes for the post, or just its URL when providers can fetch it
    async fn image_ref(&self, post: &Post) -> Result<ImageRef, BoardError> {
        if self.options.public_board && !self.options.ml_enabled {
            return Ok(ImageRef::from_url(post.content_url.clone(), post.md5.clone()));
        }
        let bytes = self.board.download(&post.content_url).await?;
        Ok(search_copy(ImageRef::from_bytes(bytes)).await)
    }

    async fn fetch_related(&self, ids: &[PostId]) -> Vec<Post> {
        let mut related = Vec::with_capacity(ids.len());
        for id in ids {
            match self.board.get_post(*id).await {
                Ok(post) => related.push(post),
                Err(e) => debug!(post_id = %id, error = %e, "Related post unavailable"),
            }
        }
        related
    }

    /// Merge into `post` and write it if anything changed
    ///
    /// `request.existing` is replaced by `post` (and by its re-fetched
    /// version after a conflict). Returns the written post, or `None` when
    /// the merge changed nothing.
    async fn commit_update(&self, mut post: Post, request: MergeRequest<'_>) -> Result<Option<Post>, BoardError> {
        let mut retried = false;
        loop {
            let merged = merge(&MergeRequest {
                existing: Some(&post),
                ..request
            });
            if !merged.differs_from(&post) {
                return Ok(None);
            }

            match self.board.update_post(post.id, &merged.to_update(post.version)).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(BoardError::VersionConflict(id)) if !retried => {
                    warn!(post_id = %id, "Post changed concurrently, re-merging");
                    retried = true;
                    post = self.board.get_post(id).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Push the post's character/series/artist tags to related posts
    async fn update_related(&self, post: &Post, related: Vec<Post>) -> usize {
        let tags = propagate_relation_tags([post]);
        if tags.is_empty() {
            return 0;
        }
        let candidate = [CandidateResult::new(ProviderId::Relations).with_tags(tags)];

        let mut updated = 0;
        for related_post in related {
            if self.cancel.is_cancelled() {
                break;
            }
            let related_id = related_post.id;
            let request = MergeRequest::new(None, &candidate, related_post.safety);
            match self.commit_update(related_post, request).await {
                Ok(Some(_)) => {
                    debug!(post_id = %related_id, source_post = %post.id, "Related post updated");
                    updated += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(post_id = %related_id, error = %e, "Could not update related post"),
            }
        }
        updated
    }

    // ========================================================================
    // Upload / import
    // ========================================================================

    /// Upload `items` one by one; `mode` labels the run ("upload", "import")
    pub async fn upload(&self, mode: &str, items: Vec<UploadItem>, add_tags: &[String]) -> RunStatistics {
        let run_id = Uuid::new_v4();
        let mut stats = RunStatistics {
            total: items.len(),
            ..Default::default()
        };
        info!(run_id = %run_id, mode, total = items.len(), "Uploading media");
        self.emit_event(TaggerEvent::RunStarted {
            run_id,
            mode: mode.to_string(),
            total: stats.total,
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await;

        for (index, item) in items.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let label = item.label();
            self.emit_event(TaggerEvent::ItemStarted {
                index,
                total: stats.total,
                label: label.clone(),
            })
            .await;

            let outcome = match item {
                UploadItem::Memory(item) => self.upload_item(item, add_tags, &mut stats).await,
                UploadItem::File(path) => {
                    let outcome = match ImportItem::read(&path).await {
                        Ok(item) => self.upload_item(item, add_tags, &mut stats).await,
                        Err(e) => {
                            warn!(file = %path.display(), error = %e, "Could not read file, skipping");
                            ItemOutcome::Skipped
                        }
                    };
                    if self.options.cleanup && outcome != ItemOutcome::Skipped {
                        if let Err(e) = remove_uploaded(&path) {
                            warn!(file = %path.display(), error = %e, "Could not remove uploaded file");
                        }
                    }
                    outcome
                }
            };
            stats.record(outcome);
            self.emit_event(TaggerEvent::ItemCompleted { label, outcome }).await;
        }

        self.finish_run(run_id, &stats).await;
        stats
    }

    async fn upload_item(&self, mut item: ImportItem, add_tags: &[String], stats: &mut RunStatistics) -> ItemOutcome {
        if self.cancel.is_cancelled() {
            return ItemOutcome::Skipped;
        }

        let mut bytes = std::mem::take(&mut item.bytes);
        let original = self.options.upload_auto_tag.then(|| ImageRef::from_bytes(bytes.clone()));
        if self.options.image_prep.is_active() {
            bytes = self.prepare_content(&mut item, bytes).await;
        }
        let label = item.upload_name();

        let image = match original {
            Some(original) => Some(search_copy(original.with_bytes(bytes.clone())).await),
            None => None,
        };

        let outcome = match self.gate.check(bytes, &label).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(file = %label, error = %e, "Similarity check failed, skipping");
                return ItemOutcome::Skipped;
            }
        };

        match outcome {
            GateOutcome::Duplicate { post_id, distance } => {
                info!(file = %label, post_id = %post_id, distance, "Duplicate of existing post");
                self.enrich_duplicate(post_id, item.metadata.as_ref(), add_tags).await
            }
            GateOutcome::Unique { token, relations } => {
                let mut candidates = Vec::new();
                let mut origin = TagOrigin::None;

                if let Some(metadata) = &item.metadata {
                    let site_candidate = metadata.to_candidate();
                    if site_candidate.has_tags() {
                        origin = TagOrigin::Metadata;
                    }
                    candidates.push(site_candidate);
                    candidates.extend(self.artist_candidates(&label, metadata).await);
                }

                if let Some(image) = &image {
                    let related = if self.options.aggregator.use_relations && origin == TagOrigin::None {
                        self.fetch_related(&relations).await
                    } else {
                        Vec::new()
                    };
                    let report = self.aggregator.aggregate(&label, image, &related, origin).await;
                    origin = report.origin;
                    candidates.extend(report.candidates);
                }

                if self.cancel.is_cancelled() {
                    info!(file = %label, "Cancelled before commit, staged upload discarded");
                    return ItemOutcome::Skipped;
                }

                let mut merged = merge(&MergeRequest {
                    existing: None,
                    candidates: &candidates,
                    add_tags,
                    remove_tags: &[],
                    default_safety: self.options.upload_default_safety,
                });
                if !merged.has_real_tags() {
                    let defaults: Vec<String> = add_tags.iter().chain(&self.options.upload_tags).cloned().collect();
                    merged = merge(&MergeRequest {
                        existing: None,
                        candidates: &candidates,
                        add_tags: &defaults,
                        remove_tags: &[],
                        default_safety: self.options.upload_default_safety,
                    });
                }

                match self.board.create_post(token, &merged.to_new_post(relations)).await {
                    Ok(post) => {
                        info!(file = %label, post_id = %post.id, tags = post.tags.len(), "Uploaded");
                        stats.uploaded += 1;
                        match origin {
                            TagOrigin::Ml => ItemOutcome::MlTagged,
                            TagOrigin::None if !merged.has_real_tags() => ItemOutcome::Untagged,
                            _ => ItemOutcome::Tagged,
                        }
                    }
                    Err(e) => {
                        warn!(file = %label, error = %e, "Could not create post, skipping");
                        ItemOutcome::Skipped
                    }
                }
            }
        }
    }

    /// Content after JPEG conversion/shrinking; the original when nothing
    /// applies or processing fails
    async fn prepare_content(&self, item: &mut ImportItem, bytes: Vec<u8>) -> Vec<u8> {
        let options = self.options.image_prep;
        let input = bytes.clone();
        match tokio::task::spawn_blocking(move || prepare_upload(&input, &options)).await {
            Ok(Ok(Some(prepared))) => {
                info!(
                    file = %item.upload_name(),
                    extension = prepared.extension,
                    before = bytes.len(),
                    after = prepared.bytes.len(),
                    "Image prepared for upload"
                );
                item.set_extension(prepared.extension);
                prepared.bytes
            }
            Ok(Ok(None)) => bytes,
            Ok(Err(e)) => {
                warn!(file = %item.upload_name(), error = %e, "Could not prepare image, uploading original");
                bytes
            }
            Err(e) => {
                warn!(file = %item.upload_name(), error = %e, "Image preparation task failed, uploading original");
                bytes
            }
        }
    }

    /// Artist tag from the resolver, or the account names as aliases
    async fn artist_candidates(&self, label: &str, metadata: &SiteMetadata) -> Vec<CandidateResult> {
        if metadata.artist_names.is_empty() {
            return Vec::new();
        }
        let resolved = self.aggregator.resolve_artist(label, &metadata.artist_names).await;
        if !resolved.is_empty() {
            return resolved;
        }
        if self.options.use_twitter_artist && metadata.site == Some(Site::Twitter) {
            let aliases = metadata.artist_aliases();
            debug!(file = label, aliases = ?aliases, "Artist unknown, using account names");
            return vec![CandidateResult::new(ProviderId::SiteMetadata).with_tags(aliases)];
        }
        Vec::new()
    }

    /// Additive merge of site metadata into the matched post
    async fn enrich_duplicate(&self, post_id: PostId, metadata: Option<&SiteMetadata>, add_tags: &[String]) -> ItemOutcome {
        if !self.options.update_tags_if_exists {
            return ItemOutcome::Duplicate;
        }
        let Some(metadata) = metadata else {
            return ItemOutcome::Duplicate;
        };
        if self.cancel.is_cancelled() {
            return ItemOutcome::Duplicate;
        }

        let existing = match self.board.get_post(post_id).await {
            Ok(post) => post,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Could not fetch duplicate for enrichment");
                return ItemOutcome::Duplicate;
            }
        };

        let candidates = [metadata.to_candidate()];
        let request = MergeRequest {
            existing: None,
            candidates: &candidates,
            add_tags,
            remove_tags: &[],
            default_safety: self.options.upload_default_safety,
        };

        match self.commit_update(existing, request).await {
            Ok(Some(post)) => {
                info!(post_id = %post_id, tags = post.tags.len(), "Duplicate enriched with site metadata");
                ItemOutcome::Enriched
            }
            Ok(None) => ItemOutcome::Duplicate,
            Err(e) => {
                warn!(post_id = %post_id, error = %e, "Could not enrich duplicate");
                ItemOutcome::Duplicate
            }
        }
    }

    async fn finish_run(&self, run_id: Uuid, stats: &RunStatistics) {
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!(run_id = %run_id, "Run cancelled: {}", stats.display_string());
        } else {
            info!(run_id = %run_id, "Run finished: {}", stats.display_string());
        }
        self.emit_event(TaggerEvent::RunCompleted {
            run_id,
            statistics: stats.clone(),
            cancelled,
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await;
    }
}

/// `image` with a downscaled copy of large content for providers
async fn search_copy(image: ImageRef) -> ImageRef {
    let Some(bytes) = image.bytes.as_ref().filter(|b| b.len() > SEARCH_SIZE_LIMIT).cloned() else {
        return image;
    };
    match tokio::task::spawn_blocking(move || shrink_for_search(&bytes)).await {
        Ok(Ok(Some(small))) => {
            debug!(size = small.len(), "Using downscaled copy for search");
            image.with_bytes(small)
        }
        Ok(Ok(None)) => image,
        Ok(Err(e)) => {
            warn!(error = %e, "Could not downscale image, sending original");
            image
        }
        Err(e) => {
            warn!(error = %e, "Downscale task failed, sending original");
            image
        }
    }
}
