//! Auto-tag integration tests
//!
//! Run the orchestrator against the in-memory board with scripted providers:
//! hash hits, reverse-search fallback, ML fallback, relations, tag edits,
//! version conflicts and tagging from a Sankaku post URL.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use btk_common::Safety;
use btk_tagger::board::PostId;
use btk_tagger::error::TaggerError;
use btk_tagger::providers::ProviderSet;
use btk_tagger::types::{ProviderError, ProviderId, ProviderResponse};
use btk_tagger::workflow::{TagEdits, TaggerEvent};
use helpers::fake_board::post;
use helpers::scripted_provider::search_hit;
use helpers::{orchestrator, tags, test_options, FakeBoard, ScriptedProvider};

const DANBOORU_SOURCE: &str = "https://danbooru.donmai.us/posts/1";
const GELBOORU_SOURCE: &str = "https://gelbooru.com/index.php?page=post&s=view&id=2";

fn danbooru_and_gelbooru() -> (Arc<ScriptedProvider>, Arc<ScriptedProvider>) {
    let danbooru = Arc::new(ScriptedProvider::new(ProviderId::Danbooru).finding(
        &["1girl", "solo"],
        DANBOORU_SOURCE,
        Some(Safety::Sketchy),
    ));
    let gelbooru = Arc::new(ScriptedProvider::new(ProviderId::Gelbooru).finding(
        &["solo", "smile"],
        GELBOORU_SOURCE,
        Some(Safety::Safe),
    ));
    (danbooru, gelbooru)
}

#[tokio::test]
async fn test_merge_scenario_hash_hits_from_two_boards() {
    let board = Arc::new(FakeBoard::new().with_post(post(7, &["tagme"], Safety::Safe)));
    let (danbooru, gelbooru) = danbooru_and_gelbooru();
    let saucenao = Arc::new(ScriptedProvider::new(ProviderId::SauceNao));

    let providers = ProviderSet::new()
        .with_mirror(danbooru.clone())
        .with_mirror(gelbooru.clone())
        .with_reverse_search(saucenao.clone());
    let stats = orchestrator(&board, providers, test_options())
        .auto_tag("7", &TagEdits::default())
        .await
        .unwrap();

    let updated = board.post(7);
    assert_eq!(updated.tags.iter().cloned().collect::<Vec<_>>(), tags(&["1girl", "smile", "solo"]));
    assert_eq!(updated.source, tags(&[DANBOORU_SOURCE, GELBOORU_SOURCE]));
    assert_eq!(updated.safety, Safety::Sketchy);
    assert_eq!(updated.version, 2);

    assert_eq!(stats.total, 1);
    assert_eq!(stats.tagged, 1);
    assert_eq!(saucenao.queries(), 0, "hash hits make reverse search unnecessary");
}

#[tokio::test]
async fn test_reverse_search_hits_are_resolved_on_mirrors() {
    let board = Arc::new(FakeBoard::new().with_post(post(7, &["tagme"], Safety::Safe)));
    let danbooru = Arc::new(ScriptedProvider::new(ProviderId::Danbooru).with_post(
        "100",
        &["hatsune_miku", "smile"],
        "https://danbooru.donmai.us/posts/100",
    ));
    let saucenao = Arc::new(ScriptedProvider::new(ProviderId::SauceNao).answering(Ok(ProviderResponse {
        candidates: vec![
            search_hit(ProviderId::Danbooru, "100", 0.97, "https://danbooru.donmai.us/post/show/100"),
            search_hit(ProviderId::Konachan, "200", 0.91, "https://konachan.com/post/show/200"),
        ],
        budget: None,
    })));

    let providers = ProviderSet::new()
        .with_mirror(danbooru.clone())
        .with_reverse_search(saucenao.clone());
    let stats = orchestrator(&board, providers, test_options())
        .auto_tag("7", &TagEdits::default())
        .await
        .unwrap();

    let updated = board.post(7);
    assert_eq!(updated.tags.iter().cloned().collect::<Vec<_>>(), tags(&["hatsune_miku", "smile"]));
    assert_eq!(
        updated.source,
        tags(&["https://danbooru.donmai.us/posts/100", "https://konachan.com/post/show/200"])
    );
    assert_eq!(danbooru.queries(), 1);
    assert_eq!(danbooru.fetches(), 1);
    assert_eq!(stats.tagged, 1);
}

#[tokio::test]
async fn test_add_and_remove_tags() {
    let board = Arc::new(FakeBoard::new().with_post(post(3, &["tagme", "bad_tag"], Safety::Safe)));
    let edits = TagEdits {
        add: tags(&["favorite"]),
        remove: tags(&["bad_tag"]),
    };

    let stats = orchestrator(&board, ProviderSet::new(), test_options())
        .auto_tag("3", &edits)
        .await
        .unwrap();

    assert_eq!(board.post(3).tags.iter().cloned().collect::<Vec<_>>(), tags(&["favorite"]));
    assert_eq!(stats.untagged, 1);
}

#[tokio::test]
async fn test_unchanged_post_is_not_written() {
    let board = Arc::new(FakeBoard::new().with_post(post(3, &["tagme"], Safety::Safe)));
    let danbooru = Arc::new(ScriptedProvider::new(ProviderId::Danbooru));

    let stats = orchestrator(&board, ProviderSet::new().with_mirror(danbooru.clone()), test_options())
        .auto_tag("3", &TagEdits::default())
        .await
        .unwrap();

    assert!(board.updates.lock().unwrap().is_empty());
    assert_eq!(board.post(3).version, 1);
    assert_eq!(danbooru.queries(), 1);
    assert_eq!(stats.untagged, 1);
}

#[tokio::test]
async fn test_version_conflict_is_retried_once_with_fresh_post() {
    let board = Arc::new(
        FakeBoard::new()
            .with_post(post(7, &["tagme"], Safety::Safe))
            .with_conflicts(1),
    );
    let (danbooru, _) = danbooru_and_gelbooru();

    let stats = orchestrator(&board, ProviderSet::new().with_mirror(danbooru), test_options())
        .auto_tag("7", &TagEdits::default())
        .await
        .unwrap();

    let updated = board.post(7);
    assert!(updated.tags.contains("edited_elsewhere"), "concurrent edit is kept");
    assert!(updated.tags.contains("1girl"));
    assert_eq!(stats.tagged, 1);
    assert_eq!(stats.skipped, 0);
}

#[tokio::test]
async fn test_second_version_conflict_skips_post() {
    let board = Arc::new(
        FakeBoard::new()
            .with_post(post(7, &["tagme"], Safety::Safe))
            .with_conflicts(2),
    );
    let (danbooru, _) = danbooru_and_gelbooru();

    let stats = orchestrator(&board, ProviderSet::new().with_mirror(danbooru), test_options())
        .auto_tag("7", &TagEdits::default())
        .await
        .unwrap();

    assert!(board.updates.lock().unwrap().is_empty());
    assert!(!board.post(7).tags.contains("1girl"));
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn test_ml_fallback_when_nothing_else_found() {
    let board = Arc::new(FakeBoard::new().with_post(post(9, &["tagme"], Safety::Safe)));
    let danbooru = Arc::new(ScriptedProvider::new(ProviderId::Danbooru));
    let ml = Arc::new(ScriptedProvider::new(ProviderId::Deepbooru).finding(&["cat", "deepbooru"], "Deepbooru", Some(Safety::Safe)));

    let providers = ProviderSet::new().with_mirror(danbooru).with_ml_fallback(ml.clone());
    let stats = orchestrator(&board, providers, test_options())
        .auto_tag("9", &TagEdits::default())
        .await
        .unwrap();

    assert_eq!(board.post(9).tags.iter().cloned().collect::<Vec<_>>(), tags(&["cat", "deepbooru"]));
    assert_eq!(board.post(9).source, tags(&["Deepbooru"]));
    assert_eq!(ml.queries(), 1);
    assert_eq!(stats.ml_tagged, 1);
}

#[tokio::test]
async fn test_ml_fallback_skipped_when_tags_found() {
    let board = Arc::new(FakeBoard::new().with_post(post(9, &["tagme"], Safety::Safe)));
    let (danbooru, _) = danbooru_and_gelbooru();
    let ml = Arc::new(ScriptedProvider::new(ProviderId::Deepbooru).finding(&["cat"], "Deepbooru", None));

    let providers = ProviderSet::new().with_mirror(danbooru).with_ml_fallback(ml.clone());
    let stats = orchestrator(&board, providers, test_options())
        .auto_tag("9", &TagEdits::default())
        .await
        .unwrap();

    assert_eq!(ml.queries(), 0);
    assert_eq!(stats.tagged, 1);
}

#[tokio::test]
async fn test_relation_tags_used_when_providers_find_nothing() {
    let mut tagged = post(7, &["tagme"], Safety::Safe);
    tagged.relations = vec![PostId(8)];
    let mut related = post(8, &["hatsune_miku", "smile"], Safety::Safe);
    related
        .tag_categories
        .insert("hatsune_miku".to_string(), "character".to_string());

    let board = Arc::new(FakeBoard::new().with_post(tagged).with_post(related));
    let mut options = test_options();
    options.aggregator.use_relations = true;

    let stats = orchestrator(&board, ProviderSet::new(), options)
        .auto_tag("7", &TagEdits::default())
        .await
        .unwrap();

    assert_eq!(board.post(7).tags.iter().cloned().collect::<Vec<_>>(), tags(&["hatsune_miku"]));
    assert_eq!(stats.tagged, 1);
}

#[tokio::test]
async fn test_update_relations_pushes_character_tags() {
    let mut tagged = post(7, &["tagme"], Safety::Safe);
    tagged.relations = vec![PostId(8)];
    let board = Arc::new(
        FakeBoard::new()
            .with_post(tagged)
            .with_post(post(8, &["tagme"], Safety::Safe))
            .with_category("hatsune_miku", "character"),
    );
    let danbooru = Arc::new(ScriptedProvider::new(ProviderId::Danbooru).finding(
        &["hatsune_miku", "smile"],
        DANBOORU_SOURCE,
        None,
    ));
    let mut options = test_options();
    options.update_relations = true;

    let stats = orchestrator(&board, ProviderSet::new().with_mirror(danbooru), options)
        .auto_tag("7", &TagEdits::default())
        .await
        .unwrap();

    assert_eq!(board.post(8).tags.iter().cloned().collect::<Vec<_>>(), tags(&["hatsune_miku"]));
    assert_eq!(stats.relations_updated, 1);
}

#[tokio::test]
async fn test_board_outage_is_retried() {
    let board = Arc::new(
        FakeBoard::new()
            .with_post(post(7, &["tagme"], Safety::Safe))
            .with_outages(1),
    );
    let (danbooru, _) = danbooru_and_gelbooru();

    let stats = orchestrator(&board, ProviderSet::new().with_mirror(danbooru), test_options())
        .auto_tag("7", &TagEdits::default())
        .await
        .unwrap();

    assert_eq!(board.get_calls.load(Ordering::SeqCst), 2);
    assert!(board.post(7).tags.contains("1girl"));
    assert_eq!(stats.tagged, 1);
    assert_eq!(stats.skipped, 0);
}

#[tokio::test]
async fn test_board_outage_beyond_ceiling_skips_post() {
    let board = Arc::new(
        FakeBoard::new()
            .with_post(post(7, &["tagme"], Safety::Safe))
            .with_outages(5),
    );
    let (danbooru, _) = danbooru_and_gelbooru();

    let stats = orchestrator(&board, ProviderSet::new().with_mirror(danbooru), test_options())
        .auto_tag("7", &TagEdits::default())
        .await
        .unwrap();

    // fast_controller(3) in the helpers
    assert_eq!(board.get_calls.load(Ordering::SeqCst), 3);
    assert!(board.updates.lock().unwrap().is_empty());
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn test_board_unreachable_is_fatal() {
    let board = Arc::new(FakeBoard::unreachable());
    let result = orchestrator(&board, ProviderSet::new(), test_options()).ping().await;
    assert!(matches!(result, Err(TaggerError::BoardUnreachable { .. })));
}

#[tokio::test]
async fn test_failing_provider_does_not_stop_run() {
    let board = Arc::new(
        FakeBoard::new()
            .with_post(post(1, &["tagme"], Safety::Safe))
            .with_post(post(2, &["tagme"], Safety::Safe)),
    );
    let broken = Arc::new(
        ScriptedProvider::new(ProviderId::Gelbooru).answering(Err(ProviderError::Parse("garbage".to_string()))),
    );
    let (danbooru, _) = danbooru_and_gelbooru();

    let providers = ProviderSet::new().with_mirror(broken).with_mirror(danbooru);
    let stats = orchestrator(&board, providers, test_options())
        .auto_tag("tagme", &TagEdits::default())
        .await
        .unwrap();

    assert_eq!(stats.total, 2);
    assert_eq!(stats.tagged, 2);
}

#[tokio::test]
async fn test_cancelled_run_still_reports() {
    let board = Arc::new(FakeBoard::new().with_post(post(1, &["tagme"], Safety::Safe)));
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(16);
    let orchestrator = orchestrator(&board, ProviderSet::new(), test_options()).with_event_channel(event_tx);

    orchestrator.cancel_token().cancel();
    let stats = orchestrator.auto_tag("1", &TagEdits::default()).await.unwrap();
    drop(orchestrator);

    assert_eq!(stats.total, 1);
    assert_eq!(stats.processed(), 0);

    let mut events = Vec::new();
    while let Some(event) = event_rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(TaggerEvent::RunStarted { total: 1, .. })));
    assert!(matches!(events.last(), Some(TaggerEvent::RunCompleted { cancelled: true, .. })));
}

const SANKAKU_URL: &str = "https://chan.sankakucomplex.com/post/show/555";

fn sankaku_mirror() -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::new(ProviderId::Sankaku).with_post("555", &["cat", "solo"], SANKAKU_URL))
}

#[tokio::test]
async fn test_sankaku_url_tags_single_post() {
    let board = Arc::new(FakeBoard::new().with_post(post(7, &["tagme"], Safety::Safe)));
    let sankaku = sankaku_mirror();
    let saucenao = Arc::new(ScriptedProvider::new(ProviderId::SauceNao));
    let providers = ProviderSet::new()
        .with_mirror(sankaku.clone())
        .with_reverse_search(saucenao.clone());

    let stats = orchestrator(&board, providers, test_options())
        .tag_from_sankaku("7", SANKAKU_URL, &TagEdits::default())
        .await
        .unwrap();

    let updated = board.post(7);
    assert!(updated.tags.contains("cat"));
    assert!(updated.tags.contains("solo"));
    assert_eq!(updated.source, tags(&[SANKAKU_URL]));
    assert_eq!(sankaku.fetches(), 1);
    assert_eq!(sankaku.queries(), 0, "no hash lookup");
    assert_eq!(saucenao.queries(), 0, "no reverse search");
    assert_eq!(stats.tagged, 1);
}

#[tokio::test]
async fn test_sankaku_url_needs_post_id_query() {
    let board = Arc::new(FakeBoard::new());
    let providers = ProviderSet::new().with_mirror(sankaku_mirror());

    let result = orchestrator(&board, providers, test_options())
        .tag_from_sankaku("tagme", SANKAKU_URL, &TagEdits::default())
        .await;

    assert!(matches!(result, Err(TaggerError::Config(_))));
}

#[tokio::test]
async fn test_sankaku_post_without_tags_skips() {
    let board = Arc::new(FakeBoard::new().with_post(post(7, &["tagme"], Safety::Safe)));
    let providers = ProviderSet::new().with_mirror(sankaku_mirror());

    let stats = orchestrator(&board, providers, test_options())
        .tag_from_sankaku("7", "https://chan.sankakucomplex.com/post/show/999", &TagEdits::default())
        .await
        .unwrap();

    assert!(board.updates.lock().unwrap().is_empty());
    assert_eq!(stats.skipped, 1);
}
