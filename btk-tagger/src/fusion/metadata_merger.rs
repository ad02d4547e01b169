//! Metadata Merge Engine
//!
//! Combines provider candidates with a post's existing metadata.
//!
//! **Merge strategy:** union everywhere, never subtract implicitly.
//! - Tags: existing ∪ candidates ∪ additive tags, minus explicit removals
//! - Sources: ordered, de-duplicated, first occurrence wins
//! - Safety: strictest rating among all inputs
//!
//! Every function here is pure; the orchestrator decides what to write.

use btk_common::Safety;
use std::collections::BTreeSet;

use crate::board::{NewPost, Post, PostId, PostUpdate};
use crate::types::CandidateResult;

/// Sentinel tag marking posts nothing could tag
pub const PLACEHOLDER_TAG: &str = "tagme";

/// Tag categories never copied between related posts
const NON_PROPAGATED_CATEGORIES: &[&str] = &["default", "meta"];

/// Merged result ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedMetadata {
    pub tags: BTreeSet<String>,
    pub source: Vec<String>,
    pub safety: Safety,
}

impl AggregatedMetadata {
    /// True if any tag other than the placeholder is present
    pub fn has_real_tags(&self) -> bool {
        self.tags.iter().any(|t| t != PLACEHOLDER_TAG)
    }

    /// Writing this to `post` would change it
    pub fn differs_from(&self, post: &Post) -> bool {
        self.tags != post.tags || self.source != post.source || self.safety != post.safety
    }

    pub fn to_update(&self, version: u64) -> PostUpdate {
        PostUpdate {
            version,
            tags: self.tags.iter().cloned().collect(),
            source: self.source.clone(),
            safety: self.safety,
        }
    }

    pub fn to_new_post(&self, relations: Vec<PostId>) -> NewPost {
        NewPost {
            tags: self.tags.iter().cloned().collect(),
            source: self.source.clone(),
            safety: self.safety,
            relations,
        }
    }
}

/// Everything one merge needs
#[derive(Debug, Clone, Copy)]
pub struct MergeRequest<'a> {
    /// Post being updated; `None` for a new upload
    pub existing: Option<&'a Post>,
    pub candidates: &'a [CandidateResult],
    /// Tags always added
    pub add_tags: &'a [String],
    /// Tags always removed, applied after the union
    pub remove_tags: &'a [String],
    /// Safety when no input carries a rating
    pub default_safety: Safety,
}

impl<'a> MergeRequest<'a> {
    pub fn new(existing: Option<&'a Post>, candidates: &'a [CandidateResult], default_safety: Safety) -> Self {
        Self {
            existing,
            candidates,
            add_tags: &[],
            remove_tags: &[],
            default_safety,
        }
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Merge candidates into the existing post (if any)
pub fn merge(request: &MergeRequest<'_>) -> AggregatedMetadata {
    let existing_tags = request.existing.map(|p| p.tags.iter()).into_iter().flatten();
    let candidate_tags = request.candidates.iter().flat_map(|c| c.tags.iter());

    let tags = merge_tags(
        existing_tags,
        candidate_tags.chain(request.add_tags.iter()),
        request.remove_tags.iter(),
    );

    let existing_sources = request.existing.map(|p| p.source.as_slice()).unwrap_or(&[]);
    let source = merge_sources(
        existing_sources
            .iter()
            .map(String::as_str)
            .chain(request.candidates.iter().filter_map(|c| c.source.as_deref())),
    );

    let safety = audit_safety(
        request
            .existing
            .map(|p| p.safety)
            .into_iter()
            .chain(request.candidates.iter().filter_map(|c| c.safety)),
        request.default_safety,
    );

    AggregatedMetadata { tags, source, safety }
}

/// Board-safe form of a tag: lowercase, trimmed, internal whitespace as `_`
pub fn normalize_tag(tag: &str) -> Option<String> {
    let normalized = tag.split_whitespace().collect::<Vec<_>>().join("_").to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Union of `existing` and `incoming` minus `removals`, with the
/// placeholder law applied: the placeholder is present exactly when nothing
/// else is.
///
/// Existing board tags are kept as written; incoming tags are normalized
/// and dropped when an existing tag already normalizes to the same name.
/// Removals match either side by normalized form.
pub fn merge_tags<'a, E, I, R>(existing: E, incoming: I, removals: R) -> BTreeSet<String>
where
    E: IntoIterator<Item = &'a String>,
    I: IntoIterator<Item = &'a String>,
    R: IntoIterator<Item = &'a String>,
{
    let removals: BTreeSet<String> = removals.into_iter().filter_map(|t| normalize_tag(t)).collect();
    let is_removed = |tag: &str| normalize_tag(tag).map_or(true, |n| removals.contains(&n));

    let mut merged: BTreeSet<String> = BTreeSet::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for tag in existing {
        if tag.trim().is_empty() || is_removed(tag) {
            continue;
        }
        if let Some(normalized) = normalize_tag(tag) {
            seen.insert(normalized);
        }
        merged.insert(tag.clone());
    }

    for normalized in incoming.into_iter().filter_map(|t| normalize_tag(t)) {
        if !removals.contains(&normalized) && seen.insert(normalized.clone()) {
            merged.insert(normalized);
        }
    }

    if merged.iter().any(|t| t != PLACEHOLDER_TAG) {
        merged.remove(PLACEHOLDER_TAG);
    } else {
        merged.insert(PLACEHOLDER_TAG.to_string());
    }

    merged
}

/// Ordered, de-duplicated source list
///
/// Entries may hold several newline-separated URLs; blanks are dropped and
/// trailing commas stripped before comparison.
pub fn merge_sources<'a, I>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut merged: Vec<String> = Vec::new();

    for line in entries.into_iter().flat_map(str::lines) {
        let cleaned = line.trim().trim_end_matches(',').trim_end();
        if cleaned.is_empty() {
            continue;
        }
        if !merged.iter().any(|s| s == cleaned) {
            merged.push(cleaned.to_string());
        }
    }

    merged
}

/// Strictest rating among inputs, or `default` when none is rated
pub fn audit_safety<I>(ratings: I, default: Safety) -> Safety
where
    I: IntoIterator<Item = Safety>,
{
    Safety::strictest(ratings.into_iter().map(Some)).unwrap_or(default)
}

/// Character/series/artist tags of related posts
///
/// Generic (`default`) and `meta` tags describe the individual image and
/// are not copied.
pub fn propagate_relation_tags<'a, I>(relations: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a Post>,
{
    let mut propagated = BTreeSet::new();

    for related in relations {
        for tag in &related.tags {
            let category = related.tag_categories.get(tag).map(String::as_str).unwrap_or("default");
            if !NON_PROPAGATED_CATEGORIES.contains(&category) && tag != PLACEHOLDER_TAG {
                propagated.insert(tag.clone());
            }
        }
    }

    propagated.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderId;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn post_with(tag_list: &[&str], source: &[&str], safety: Safety) -> Post {
        Post {
            id: PostId(1),
            version: 1,
            tags: tag_list.iter().map(|s| s.to_string()).collect(),
            source: source.iter().map(|s| s.to_string()).collect(),
            safety,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("  blue   sky "), Some("blue_sky".to_string()));
        assert_eq!(normalize_tag("hatsune_miku"), Some("hatsune_miku".to_string()));
        assert_eq!(normalize_tag("Fox Ears"), Some("fox_ears".to_string()));
        assert_eq!(normalize_tag("   "), None);
    }

    #[test]
    fn test_placeholder_added_when_empty() {
        let merged = merge_tags(&tags(&[]), &tags(&[]), &tags(&[]));
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec![PLACEHOLDER_TAG]);
    }

    #[test]
    fn test_placeholder_removed_when_real_tag_present() {
        let merged = merge_tags(&tags(&["tagme"]), &tags(&["cat"]), &tags(&[]));
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec!["cat"]);
    }

    #[test]
    fn test_removals_applied_after_union() {
        let merged = merge_tags(&tags(&["dog"]), &tags(&["cat", "bad tag"]), &tags(&["dog", "bad_tag"]));
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec!["cat"]);

        let merged = merge_tags(&tags(&["cat"]), &tags(&[]), &tags(&["cat"]));
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec![PLACEHOLDER_TAG]);
    }

    #[test]
    fn test_existing_tags_kept_as_written() {
        let merged = merge_tags(&tags(&["Hatsune_Miku", "cat"]), &tags(&["hatsune miku", "Dog"]), &tags(&[]));
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec!["Hatsune_Miku", "cat", "dog"]);

        let merged = merge_tags(&tags(&["Hatsune_Miku"]), &tags(&[]), &tags(&["hatsune_miku"]));
        assert_eq!(merged.into_iter().collect::<Vec<_>>(), vec![PLACEHOLDER_TAG]);
    }

    #[test]
    fn test_mixed_case_post_without_new_metadata_is_unchanged() {
        let existing = post_with(&["Hatsune_Miku", "smile"], &["s1"], Safety::Safe);
        let candidates = vec![CandidateResult::new(ProviderId::Danbooru)
            .with_tags(["hatsune_miku", "Smile"])
            .with_source("s1")];

        let merged = merge(&MergeRequest::new(Some(&existing), &candidates, Safety::Safe));
        assert!(!merged.differs_from(&existing));
    }

    #[test]
    fn test_source_dedup_and_trailing_comma() {
        let merged = merge_sources(["u1", "u2,", "", "u1", "u3\nu2", "  "]);
        assert_eq!(merged, vec!["u1", "u2", "u3"]);
    }

    #[test]
    fn test_audit_safety() {
        assert_eq!(audit_safety([], Safety::Sketchy), Safety::Sketchy);
        assert_eq!(audit_safety([Safety::Safe, Safety::Unsafe], Safety::Safe), Safety::Unsafe);
        assert_eq!(audit_safety([Safety::Safe], Safety::Unsafe), Safety::Safe);
    }

    #[test]
    fn test_merge_unions_existing_and_candidates() {
        let existing = post_with(&["tagme"], &["https://origin.example/1"], Safety::Safe);
        let candidates = vec![
            CandidateResult::new(ProviderId::Danbooru)
                .with_tags(["cat", "blue sky"])
                .with_source("https://danbooru.donmai.us/posts/1")
                .with_safety(Some(Safety::Sketchy)),
            CandidateResult::new(ProviderId::Gelbooru)
                .with_tags(["cat", "outdoors"])
                .with_source("https://danbooru.donmai.us/posts/1,"),
        ];

        let merged = merge(&MergeRequest::new(Some(&existing), &candidates, Safety::Safe));
        assert_eq!(
            merged.tags.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["blue_sky", "cat", "outdoors"]
        );
        assert_eq!(
            merged.source,
            vec!["https://origin.example/1", "https://danbooru.donmai.us/posts/1"]
        );
        assert_eq!(merged.safety, Safety::Sketchy);
        assert!(merged.differs_from(&existing));
    }

    #[test]
    fn test_merge_replaces_placeholder_with_provider_tags() {
        let existing = post_with(&["tagme"], &[], Safety::Safe);
        let candidates = vec![
            CandidateResult::new(ProviderId::Danbooru)
                .with_tags(["fox", "Fox Ears"])
                .with_safety(Safety::from_rating("safe")),
            CandidateResult::new(ProviderId::Gelbooru).with_safety(Safety::from_rating("")),
        ];

        let merged = merge(&MergeRequest::new(Some(&existing), &candidates, Safety::Safe));
        assert_eq!(
            merged.tags.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["fox", "fox_ears"]
        );
        assert_eq!(merged.safety, Safety::Safe);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = post_with(&["a"], &["s1"], Safety::Safe);
        let candidates = vec![
            CandidateResult::new(ProviderId::Danbooru)
                .with_tags(["b", "c"])
                .with_source("s2")
                .with_safety(Some(Safety::Unsafe)),
            CandidateResult::new(ProviderId::Yandere).with_tags(["c", "d"]).with_source("s1"),
        ];
        let add = tags(&["e"]);
        let remove = tags(&["d"]);
        let request = MergeRequest {
            existing: Some(&existing),
            candidates: &candidates,
            add_tags: &add,
            remove_tags: &remove,
            default_safety: Safety::Safe,
        };

        let once = merge(&request);
        let mut applied = existing.clone();
        applied.tags = once.tags.clone();
        applied.source = once.source.clone();
        applied.safety = once.safety;

        let twice = merge(&MergeRequest {
            existing: Some(&applied),
            ..request
        });
        assert_eq!(once, twice);
        assert!(!twice.differs_from(&applied));
    }

    #[test]
    fn test_merge_safety_is_monotonic() {
        let levels = [Safety::Safe, Safety::Sketchy, Safety::Unsafe];
        for existing_level in levels {
            for candidate_level in levels {
                let existing = post_with(&["x"], &[], existing_level);
                let candidates =
                    vec![CandidateResult::new(ProviderId::Danbooru).with_safety(Some(candidate_level))];
                let merged = merge(&MergeRequest::new(Some(&existing), &candidates, Safety::Safe));
                assert!(merged.safety >= existing_level);
                assert!(merged.safety >= candidate_level);
            }
        }
    }

    #[test]
    fn test_new_upload_uses_default_safety() {
        let candidates = vec![CandidateResult::new(ProviderId::SiteMetadata).with_tags(["cat"])];
        let merged = merge(&MergeRequest::new(None, &candidates, Safety::Sketchy));
        assert_eq!(merged.safety, Safety::Sketchy);
        assert!(merged.has_real_tags());
    }

    #[test]
    fn test_propagate_relation_tags_skips_default_and_meta() {
        let mut related = post_with(&["hatsune_miku", "vocaloid", "smile", "highres", "tagme"], &[], Safety::Safe);
        related.tag_categories.insert("hatsune_miku".into(), "character".into());
        related.tag_categories.insert("vocaloid".into(), "copyright".into());
        related.tag_categories.insert("smile".into(), "default".into());
        related.tag_categories.insert("highres".into(), "meta".into());

        let propagated = propagate_relation_tags([&related]);
        assert_eq!(propagated, vec!["hatsune_miku", "vocaloid"]);
    }
}
