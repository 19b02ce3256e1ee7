//! End-to-end tests for the author resolution pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wren_core::{
    AttributionRecord, BudgetPolicy, Confidence, Partition, RemoteAuthor, ResolveError,
    ResolverConfig, StoreError,
};
use wren_resolve::{
    AttemptOutcome, AuthorResolver, CancelToken, CostClass, ResolutionItem, ResolutionOutcome,
    ResolutionStrategy,
};
use wren_storage::{InMemoryTtlStore, Snapshot, TtlStore, TtlStoreExt};
use wren_test_utils::fixtures::{self, ACCOUNT_USERNAME};
use wren_test_utils::{FailingStore, ScriptedAuthorLookup, ScriptedMirror};

struct Harness {
    store: Arc<InMemoryTtlStore>,
    snapshot: Arc<Snapshot>,
    remote: Arc<ScriptedAuthorLookup>,
    mirror: Arc<ScriptedMirror>,
    resolver: AuthorResolver,
}

fn harness(config: ResolverConfig, remote: ScriptedAuthorLookup, mirror: ScriptedMirror) -> Harness {
    let clock = Arc::new(fixtures::manual_clock());
    let store = fixtures::memory_store(clock.clone());
    let (snapshot, _) = fixtures::loaded_snapshot(fixtures::sample_rows());
    let remote = Arc::new(remote);
    let mirror = Arc::new(mirror);

    let resolver = AuthorResolver::builder(store.clone())
        .config(config)
        .clock(clock)
        .snapshot(snapshot.clone())
        .remote(remote.clone())
        .mirror(mirror.clone())
        .build()
        .expect("resolver");

    Harness {
        store,
        snapshot,
        remote,
        mirror,
        resolver,
    }
}

fn default_harness() -> Harness {
    harness(
        ResolverConfig::default(),
        ScriptedAuthorLookup::new("remote"),
        ScriptedMirror::new("mirror"),
    )
}

fn item(id: &str, text: &str) -> ResolutionItem {
    ResolutionItem::new(id).with_text(text)
}

#[test]
fn strategies_run_in_cost_order() {
    let h = default_harness();
    assert_eq!(
        h.resolver.strategy_names(),
        vec!["cached", "own_archive", "batch_remote", "alternate_source", "text_pattern"]
    );
}

#[tokio::test]
async fn falls_back_to_text_pattern_and_commits() {
    let h = default_harness();

    let (outcome, attempts) = h
        .resolver
        .resolve_traced(&item("50", "RT @alice: hi"))
        .await
        .expect("resolve");

    let attribution = outcome.attribution().expect("accepted");
    assert_eq!(attribution.username, "alice");
    assert_eq!(attribution.source, "text_pattern");
    assert_eq!(attribution.confidence, Confidence::new(0.9));
    assert_eq!(attempts.len(), 5);
    assert!(attempts.iter().take(4).all(|a| !a.accepted));
    assert_eq!(h.remote.calls(), 1);
    assert_eq!(h.mirror.calls(), 1);

    let record: AttributionRecord = h
        .store
        .get_json(Partition::Attribution, "50")
        .expect("read")
        .expect("committed");
    assert_eq!(record.attribution.username, "alice");
    assert_eq!(record.detail.as_deref(), Some("retweet_pattern"));

    let like = h.snapshot.get_liked("50").expect("read").expect("present");
    assert_eq!(like.author_username.as_deref(), Some("alice"));
}

#[tokio::test]
async fn nothing_found_is_exhausted_without_commit() {
    let h = default_harness();

    let outcome = h
        .resolver
        .resolve(&item("52", "no author here"))
        .await
        .expect("resolve");

    assert_eq!(outcome, ResolutionOutcome::Exhausted { deferred: vec![] });
    assert!(!outcome.is_deferred());
    assert_eq!(h.store.get(Partition::Attribution, "52").expect("read"), None);
}

#[tokio::test]
async fn low_confidence_self_reference_is_rejected() {
    let h = default_harness();
    let (outcome, attempts) = h
        .resolver
        .resolve_traced(&item("53", "my name is Jane Doe"))
        .await
        .expect("resolve");

    assert!(matches!(outcome, ResolutionOutcome::Exhausted { .. }));
    let last = attempts.last().expect("attempts");
    assert_eq!(last.strategy, "text_pattern");
    assert!(matches!(last.outcome, AttemptOutcome::Found(_)));
    assert!(!last.accepted);
}

#[tokio::test]
async fn committed_result_is_served_from_cache() {
    let h = harness(
        ResolverConfig::default(),
        ScriptedAuthorLookup::new("remote")
            .with_author("60", RemoteAuthor::new("dana").with_author_id("99")),
        ScriptedMirror::new("mirror"),
    );

    let first = h.resolver.resolve(&ResolutionItem::new("60")).await.expect("resolve");
    assert_eq!(first.attribution().map(|a| a.source.as_str()), Some("batch_remote"));

    let (second, attempts) = h
        .resolver
        .resolve_traced(&ResolutionItem::new("60"))
        .await
        .expect("resolve");
    let attribution = second.attribution().expect("cached");
    assert_eq!(attribution.source, "cached");
    assert_eq!(attribution.username, "dana");
    assert_eq!(attribution.confidence, Confidence::CERTAIN);
    assert_eq!(attempts.len(), 1);
    assert_eq!(h.remote.calls(), 1);
    assert_eq!(h.store.stats(Partition::Attribution).writes, 1);
}

#[tokio::test]
async fn own_items_resolve_to_the_account() {
    let h = default_harness();
    let outcome = h.resolver.resolve(&ResolutionItem::new("2")).await.expect("resolve");
    let attribution = outcome.attribution().expect("own item");
    assert_eq!(attribution.username, ACCOUNT_USERNAME);
    assert_eq!(attribution.source, "own_archive");
    assert_eq!(h.remote.calls(), 0);
}

#[tokio::test]
async fn mirror_hit_is_accepted_below_certainty() {
    let h = harness(
        ResolverConfig::default(),
        ScriptedAuthorLookup::new("remote"),
        ScriptedMirror::new("mirror").with_author("61", RemoteAuthor::new("erin")),
    );
    let outcome = h.resolver.resolve(&ResolutionItem::new("61")).await.expect("resolve");
    let attribution = outcome.attribution().expect("mirror hit");
    assert_eq!(attribution.source, "alternate_source");
    assert_eq!(attribution.confidence, Confidence::new(0.8));
}

#[tokio::test]
async fn store_write_failure_aborts_resolution() {
    let store = Arc::new(FailingStore::failing_writes());
    let remote = Arc::new(
        ScriptedAuthorLookup::new("remote").with_author("60", RemoteAuthor::new("dana")),
    );
    let resolver = AuthorResolver::builder(store.clone())
        .remote(remote)
        .build()
        .expect("resolver");

    let err = resolver.resolve(&ResolutionItem::new("60")).await.unwrap_err();
    assert!(matches!(err, ResolveError::Store(StoreError::Transaction { .. })));
    assert_eq!(store.writes_attempted(), 1);
}

#[tokio::test]
async fn store_read_failure_aborts_before_remote_calls() {
    let remote = Arc::new(
        ScriptedAuthorLookup::new("remote").with_author("60", RemoteAuthor::new("dana")),
    );
    let resolver = AuthorResolver::builder(Arc::new(FailingStore::new()))
        .remote(remote.clone())
        .build()
        .expect("resolver");

    assert!(matches!(
        resolver.resolve(&ResolutionItem::new("60")).await,
        Err(ResolveError::Store(_))
    ));
    assert_eq!(remote.calls(), 0);
}

#[tokio::test]
async fn exhausted_budget_defers_items() {
    let config = ResolverConfig {
        remote_capacity: 1,
        remote_batch_size: 1,
        ..ResolverConfig::default()
    };
    let h = harness(
        config,
        ScriptedAuthorLookup::new("remote"),
        ScriptedMirror::new("mirror"),
    );

    let items: Vec<_> = (0..3).map(|i| ResolutionItem::new(format!("7{}", i))).collect();
    let results = h.resolver.resolve_batch(&items, 1).await.expect("batch");

    assert_eq!(h.remote.calls(), 1);
    let deferred = results.values().filter(|o| o.is_deferred()).count();
    assert_eq!(deferred, 2);
    for outcome in results.values().filter(|o| o.is_deferred()) {
        assert_eq!(
            outcome,
            &ResolutionOutcome::Exhausted {
                deferred: vec!["batch_remote".to_string()]
            }
        );
    }
}

#[tokio::test]
async fn remote_rate_limit_defers_until_retry_hint() {
    let remote = ScriptedAuthorLookup::new("remote").with_error(wren_core::LookupError::RateLimited {
        backend: "remote".to_string(),
        retry_after_ms: Some(120_000),
    });
    let h = harness(ResolverConfig::default(), remote, ScriptedMirror::new("mirror"));

    let first = h.resolver.resolve(&ResolutionItem::new("80")).await.expect("resolve");
    assert!(first.is_deferred());

    h.remote.clear_error();
    let second = h.resolver.resolve(&ResolutionItem::new("81")).await.expect("resolve");
    assert!(second.is_deferred());
    assert_eq!(h.remote.calls(), 1);
}

#[tokio::test]
async fn batch_sends_ids_in_chunks() {
    let config = ResolverConfig {
        remote_batch_size: 2,
        ..ResolverConfig::default()
    };
    let h = harness(
        config,
        ScriptedAuthorLookup::new("remote").with_author("90", RemoteAuthor::new("fay")),
        ScriptedMirror::new("mirror"),
    );

    let items: Vec<_> = ["90", "91", "92", "90"]
        .iter()
        .map(|id| ResolutionItem::new(*id))
        .collect();
    let results = h.resolver.resolve_batch(&items, 2).await.expect("batch");

    assert_eq!(results.len(), 3);
    assert_eq!(h.remote.calls(), 2);
    assert_eq!(
        results["90"].attribution().map(|a| a.username.as_str()),
        Some("fay")
    );
    // Unresolved items continue to the mirror stage.
    assert_eq!(h.mirror.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn timed_out_remote_counts_as_no_result() {
    let config = ResolverConfig {
        remote_timeout_secs: 1,
        ..ResolverConfig::default()
    };
    let h = harness(
        config,
        ScriptedAuthorLookup::new("remote")
            .with_author("50", RemoteAuthor::new("wrong"))
            .with_delay(Duration::from_secs(30)),
        ScriptedMirror::new("mirror"),
    );

    let (outcome, attempts) = h
        .resolver
        .resolve_traced(&item("50", "RT @alice: hi"))
        .await
        .expect("resolve");

    assert_eq!(outcome.attribution().map(|a| a.username.as_str()), Some("alice"));
    let remote = attempts
        .iter()
        .find(|a| a.strategy == "batch_remote")
        .expect("remote attempt");
    assert_eq!(remote.outcome, AttemptOutcome::TimedOut);
}

#[tokio::test]
async fn wait_policy_waits_for_a_permit() {
    let config = ResolverConfig {
        remote_capacity: 1,
        remote_window_secs: 1,
        budget_policy: BudgetPolicy::Wait { max_wait_secs: 3 },
        ..ResolverConfig::default()
    };
    let h = harness(
        config,
        ScriptedAuthorLookup::new("remote")
            .with_author("100", RemoteAuthor::new("gus"))
            .with_author("101", RemoteAuthor::new("hal")),
        ScriptedMirror::new("mirror"),
    );

    for (id, username) in [("100", "gus"), ("101", "hal")] {
        let outcome = h.resolver.resolve(&ResolutionItem::new(id)).await.expect("resolve");
        assert_eq!(outcome.attribution().map(|a| a.username.as_str()), Some(username));
    }
    assert_eq!(h.remote.calls(), 2);
}

/// Cancels the shared token the first time it runs.
struct CancelAfterStage {
    token: CancelToken,
}

#[async_trait]
impl ResolutionStrategy for CancelAfterStage {
    fn name(&self) -> &'static str {
        "cancel_after_stage"
    }

    fn cost_class(&self) -> CostClass {
        CostClass::LocalArchive
    }

    fn min_accept(&self) -> Confidence {
        Confidence::CERTAIN
    }

    async fn attempt(&self, _item: &ResolutionItem) -> Result<AttemptOutcome, StoreError> {
        self.token.cancel();
        Ok(AttemptOutcome::NoResult)
    }
}

#[tokio::test]
async fn cancellation_stops_between_stages() {
    let token = CancelToken::new();
    let store = fixtures::memory_store(Arc::new(fixtures::manual_clock()));
    let remote = Arc::new(
        ScriptedAuthorLookup::new("remote").with_author("2", RemoteAuthor::new("never")),
    );

    let seeded = AttributionRecord {
        item_id: "1".to_string(),
        attribution: wren_core::Attribution {
            username: "cached-user".to_string(),
            display_name: None,
            author_id: None,
            confidence: Confidence::CERTAIN,
            source: "batch_remote".to_string(),
        },
        detail: None,
        resolved_at: fixtures::fixed_time(),
    };
    store
        .set_json(Partition::Attribution, "1", &seeded)
        .expect("seed");

    let resolver = AuthorResolver::builder(store)
        .remote(remote.clone())
        .strategy(Arc::new(CancelAfterStage {
            token: token.clone(),
        }))
        .build()
        .expect("resolver");

    let items = vec![ResolutionItem::new("1"), ResolutionItem::new("2")];
    let err = resolver
        .resolve_batch_cancellable(&items, 2, &token)
        .await
        .unwrap_err();

    assert_eq!(err, ResolveError::Cancelled { committed: 1 });
    assert_eq!(remote.calls(), 0);
}

#[tokio::test]
async fn cancelled_before_start_resolves_nothing() {
    let h = default_harness();
    let token = CancelToken::new();
    token.cancel();

    let err = h
        .resolver
        .resolve_batch_cancellable(&[ResolutionItem::new("1")], 1, &token)
        .await
        .unwrap_err();
    assert_eq!(err, ResolveError::Cancelled { committed: 0 });
}

#[tokio::test]
async fn enrichment_report_over_unattributed_likes() {
    let h = harness(
        ResolverConfig::default(),
        ScriptedAuthorLookup::new("remote").with_author("52", RemoteAuthor::new("ivy")),
        ScriptedMirror::new("mirror"),
    );

    let report = h.resolver.resolve_unattributed(100, 4).await.expect("enrich");

    assert_eq!(report.attempted, 4);
    assert_eq!(report.accepted.get("text_pattern"), Some(&2));
    assert_eq!(report.accepted.get("batch_remote"), Some(&1));
    assert_eq!(report.exhausted, 1);
    assert_eq!(report.total_likes, 5);
    assert_eq!(report.attributed_likes, 4);
    assert!((report.coverage - 0.8).abs() < 1e-9);

    let remaining = h.snapshot.unattributed_likes(10).expect("read");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].item_id, "53");
}

#[tokio::test]
async fn enrichment_requires_a_snapshot() {
    let store: Arc<dyn TtlStore> = fixtures::memory_store(Arc::new(fixtures::manual_clock()));
    let resolver = AuthorResolver::builder(store).build().expect("resolver");
    assert_eq!(
        resolver.resolve_unattributed(10, 1).await.unwrap_err(),
        ResolveError::NoSnapshot
    );
}

#[tokio::test]
async fn committed_attributions_survive_a_snapshot_reload() {
    let clock = Arc::new(fixtures::manual_clock());
    let store = fixtures::memory_store(clock.clone());
    let (snapshot, _) =
        fixtures::loaded_snapshot_with_store(fixtures::sample_rows(), store.clone());
    let resolver = AuthorResolver::builder(store.clone())
        .clock(clock)
        .snapshot(snapshot.clone())
        .build()
        .expect("resolver");

    let outcome = resolver
        .resolve(&item("50", "RT @alice: hi"))
        .await
        .expect("resolve");
    assert!(outcome.attribution().is_some());

    snapshot.reload().expect("reload");
    let like = snapshot.get_liked("50").expect("read").expect("present");
    assert_eq!(like.author_username.as_deref(), Some("alice"));
    assert!(snapshot
        .unattributed_likes(100)
        .expect("read")
        .iter()
        .all(|like| like.item_id != "50"));

    // A second enrichment pass does not redo the committed work.
    let report = resolver.resolve_unattributed(100, 4).await.expect("enrich");
    assert_eq!(report.accepted.get("cached"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_share_the_remote_budget() {
    let config = ResolverConfig {
        remote_capacity: 3,
        remote_window_secs: 3600,
        remote_batch_size: 1,
        ..ResolverConfig::default()
    };
    let remote = (0..20).fold(ScriptedAuthorLookup::new("remote"), |remote, i| {
        remote.with_author((200 + i).to_string(), RemoteAuthor::new(format!("user{}", i)))
    });
    let h = harness(config, remote, ScriptedMirror::new("mirror"));
    let resolver = Arc::new(h.resolver);

    let tasks: Vec<_> = (0..4)
        .map(|batch| {
            let resolver = Arc::clone(&resolver);
            let items: Vec<ResolutionItem> = (0..5)
                .map(|i| ResolutionItem::new((200 + batch * 5 + i).to_string()))
                .collect();
            tokio::spawn(async move { resolver.resolve_batch(&items, 4).await })
        })
        .collect();

    let mut accepted = 0;
    let mut deferred = 0;
    for task in tasks {
        let results = task.await.expect("task").expect("batch");
        accepted += results.values().filter(|o| o.attribution().is_some()).count();
        deferred += results.values().filter(|o| o.is_deferred()).count();
    }

    assert_eq!(h.remote.calls(), 3);
    assert_eq!(accepted, 3);
    assert_eq!(deferred, 17);
}
