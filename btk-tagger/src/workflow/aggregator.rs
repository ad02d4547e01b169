//! Candidate aggregation for one image
//!
//! Stages, each running only when the earlier ones produced no tags:
//! 1. **Hash**: MD5 lookup on every mirror board, concurrently
//! 2. **Search**: reverse-image search; hits are resolved on their mirror
//!    board (concurrently, skipping boards already answered by hash)
//! 3. **ML**: classifier fallback (also runs after tagged stages when forced)
//! 4. **Relations**: tags copied from related board posts
//!
//! Every provider call goes through the [`ProviderController`], so a failing
//! or exhausted provider only shrinks the candidate list.

use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::debug;

use super::TaggerEvent;
use crate::board::Post;
use crate::config::AutoTaggerConfig;
use crate::fusion::metadata_merger::propagate_relation_tags;
use crate::providers::ProviderSet;
use crate::services::ProviderController;
use crate::types::{CandidateResult, ImageRef, ProviderError, ProviderId, ProviderResponse};

/// Stage that produced the first tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOrigin {
    /// Site metadata shipped with an upload
    Metadata,
    Hash,
    Search,
    Ml,
    Relations,
    None,
}

#[derive(Debug, Clone)]
pub struct AggregationReport {
    pub candidates: Vec<CandidateResult>,
    pub origin: TagOrigin,
}

impl AggregationReport {
    pub fn has_tags(&self) -> bool {
        self.candidates.iter().any(CandidateResult::has_tags)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorOptions {
    pub md5_search: bool,
    pub use_relations: bool,
    /// Run the ML fallback even when other stages found tags
    pub ml_forced: bool,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            md5_search: true,
            use_relations: true,
            ml_forced: false,
        }
    }
}

impl AggregatorOptions {
    pub fn from_config(config: &AutoTaggerConfig) -> Self {
        Self {
            md5_search: config.md5_search,
            use_relations: config.use_relations,
            ml_forced: config.deepbooru_forced,
        }
    }
}

pub struct Aggregator {
    providers: ProviderSet,
    controller: ProviderController,
    options: AggregatorOptions,
    event_tx: Option<mpsc::Sender<TaggerEvent>>,
}

impl Aggregator {
    pub fn new(providers: ProviderSet, controller: ProviderController, options: AggregatorOptions) -> Self {
        Self {
            providers,
            controller,
            options,
            event_tx: None,
        }
    }

    pub fn with_event_channel(mut self, event_tx: mpsc::Sender<TaggerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn controller(&self) -> &ProviderController {
        &self.controller
    }

    /// Collect candidates for `image`
    ///
    /// `relations` are the already-fetched related posts; they are only
    /// used when no provider found tags. `prior` is where the caller's own
    /// candidates got their tags (`TagOrigin::Metadata` for an upload with
    /// site metadata); anything but `None` skips the search, ML and
    /// relation stages the same way a hash hit does.
    pub async fn aggregate(
        &self,
        label: &str,
        image: &ImageRef,
        relations: &[Post],
        prior: TagOrigin,
    ) -> AggregationReport {
        let mut candidates = Vec::new();
        let mut origin = prior;

        let mut answered: HashSet<ProviderId> = HashSet::new();
        if self.options.md5_search && image.md5.is_some() {
            for (board, found) in self.hash_lookups(label, image).await {
                if found.iter().any(CandidateResult::has_tags) {
                    answered.insert(board);
                }
                candidates.extend(found);
            }
            if origin == TagOrigin::None && has_tags(&candidates) {
                origin = TagOrigin::Hash;
            }
        }

        if origin == TagOrigin::None {
            candidates.extend(self.reverse_search(label, image, &answered).await);
            if has_tags(&candidates) {
                origin = TagOrigin::Search;
            }
        }

        if let Some(ml) = &self.providers.ml_fallback {
            if origin == TagOrigin::None || self.options.ml_forced {
                let found = self
                    .controlled(label, ml.id(), "ml tagging", || ml.query(image))
                    .await;
                if origin == TagOrigin::None && has_tags(&found) {
                    origin = TagOrigin::Ml;
                }
                candidates.extend(found);
            }
        }

        if origin == TagOrigin::None && self.options.use_relations && !relations.is_empty() {
            let propagated = propagate_relation_tags(relations);
            if !propagated.is_empty() {
                debug!(label, tags = propagated.len(), "Using tags of related posts");
                candidates.push(CandidateResult::new(ProviderId::Relations).with_tags(propagated));
                origin = TagOrigin::Relations;
            }
        }

        AggregationReport { candidates, origin }
    }

    /// Artist tag for a social-media post, tried name by name
    pub async fn resolve_artist(&self, label: &str, names: &[String]) -> Vec<CandidateResult> {
        let Some(resolver) = &self.providers.artist_resolver else {
            return Vec::new();
        };
        if names.is_empty() {
            return Vec::new();
        }
        self.controlled(label, ProviderId::ArtistResolver, "artist lookup", || resolver.lookup(names))
            .await
    }

    /// One post on a mirror board, looked up by id
    ///
    /// Empty when the board is not configured or the lookup failed.
    pub async fn fetch_mirror_post(&self, label: &str, board: ProviderId, post_id: &str) -> Vec<CandidateResult> {
        let Some(mirror) = self.providers.mirror(board) else {
            debug!(label, board = %board, "Mirror board not configured");
            return Vec::new();
        };
        self.controlled(label, board, "fetch post", || mirror.fetch_post(post_id))
            .await
    }

    async fn hash_lookups(&self, label: &str, image: &ImageRef) -> Vec<(ProviderId, Vec<CandidateResult>)> {
        let lookups = self.providers.mirrors.iter().map(|mirror| async move {
            let board = mirror.id();
            let found = self.controlled(label, board, "md5 lookup", || mirror.query(image)).await;
            (board, found)
        });
        join_all(lookups).await
    }

    async fn reverse_search(
        &self,
        label: &str,
        image: &ImageRef,
        answered: &HashSet<ProviderId>,
    ) -> Vec<CandidateResult> {
        let Some(search) = &self.providers.reverse_search else {
            return Vec::new();
        };

        let hits = self
            .controlled(label, search.id(), "reverse search", || search.query(image))
            .await;

        let resolutions = hits.into_iter().map(|hit| async move {
            let Some(reference) = hit.reference.as_ref() else {
                return vec![hit];
            };
            if answered.contains(&reference.board) {
                return Vec::new();
            }
            let Some(mirror) = self.providers.mirror(reference.board) else {
                return vec![hit];
            };

            let post_id = reference.post_id.as_str();
            let found = self
                .controlled(label, reference.board, "fetch post", || mirror.fetch_post(post_id))
                .await;
            if has_tags(&found) {
                found
            } else {
                vec![hit]
            }
        });

        join_all(resolutions).await.into_iter().flatten().collect()
    }

    /// Controlled call plus progress event
    async fn controlled<F, Fut>(
        &self,
        label: &str,
        provider: ProviderId,
        operation_name: &str,
        operation: F,
    ) -> Vec<CandidateResult>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ProviderResponse, ProviderError>>,
    {
        let response = self.controller.call(provider, operation_name, operation).await;

        if let Some(tx) = &self.event_tx {
            let _ = tx
                .send(TaggerEvent::ProviderFinished {
                    label: label.to_string(),
                    provider: provider.name().to_string(),
                    outcome: response.outcome.as_str().to_string(),
                    candidates: response.candidates.len(),
                })
                .await;
        }

        response.candidates
    }
}

fn has_tags(candidates: &[CandidateResult]) -> bool {
    candidates.iter().any(CandidateResult::has_tags)
}
