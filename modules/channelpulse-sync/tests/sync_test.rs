// End-to-end sync engine tests over in-memory mocks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use channelpulse_sync::jobs::{self, JobWorker};
use channelpulse_sync::testing::{
    reply_message, service_message, test_item, test_source, text_message, MemoryStore,
    MockCompleter, MockFeed, RecordingQueue,
};
use channelpulse_sync::traits::JobQueue;
use channelpulse_sync::{
    EnrichDispatcher, ItemMode, Job, RefreshSpec, ReplyAnalyzer, ReplyMode, SyncEngine,
};
use feed_client::{FeedError, SourceDescriptor};

fn engine(feed: MockFeed, store: &MemoryStore, queue: &Arc<RecordingQueue>) -> SyncEngine {
    let dispatcher = Arc::new(EnrichDispatcher::new(Arc::new(store.clone()), queue.clone()));
    SyncEngine::new(Arc::new(feed), Arc::new(store.clone()), dispatcher).without_pause()
}

fn no_cancel() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

fn new_only(item_limit: u32) -> RefreshSpec {
    RefreshSpec {
        item_limit,
        ..RefreshSpec::default()
    }
}

#[tokio::test]
async fn new_only_inserts_advances_cursor_and_dispatches_new_replies() {
    let store = MemoryStore::new();
    let mut source = test_source(1);
    source.last_processed_cursor = Some(100);
    store.seed_source(source);
    // 103 is already persisted from an earlier run.
    store.seed_item(test_item(50, 1, 103));

    let feed = MockFeed::new()
        .on_messages(
            1,
            vec![
                text_message(101, "first"),
                text_message(102, "second"),
                text_message(103, "already stored"),
            ],
        )
        .on_replies(1, 101, vec![reply_message(1001, 101, "re: first")])
        .on_replies(1, 102, vec![reply_message(1002, 102, "re: second")])
        .on_replies(1, 103, vec![reply_message(1003, 103, "re: stored")]);

    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&new_only(10), &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.items_inserted, 2);
    assert_eq!(report.replies_inserted, 2);
    assert_eq!(store.source(1).unwrap().last_processed_cursor, Some(103));

    // Only the new items' threads were collected and dispatched.
    let dispatched = queue.analyze_ids();
    assert_eq!(dispatched.len(), 2);
    let replies = store.replies();
    let dispatched_externals: Vec<i64> = replies
        .iter()
        .filter(|r| dispatched.contains(&r.id))
        .map(|r| r.external_id)
        .collect();
    assert_eq!(dispatched_externals, vec![1001, 1002]);

    // The pre-existing item's thread was not touched.
    assert_eq!(store.item_by_external(1, 103).unwrap().reply_count, 0);
}

#[tokio::test]
async fn repeated_sync_is_idempotent() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));

    let messages = vec![text_message(10, "a"), text_message(11, "b")];
    let queue = Arc::new(RecordingQueue::new());

    let first = engine(
        MockFeed::new().on_messages(1, messages.clone()),
        &store,
        &queue,
    )
    .run_refresh(&new_only(25), &no_cancel())
    .await
    .unwrap();
    assert_eq!(first.items_inserted, 2);

    let second = engine(
        MockFeed::new().on_messages(1, messages.clone()),
        &store,
        &queue,
    )
    .run_refresh(&new_only(25), &no_cancel())
    .await
    .unwrap();
    assert_eq!(second.items_inserted, 0);
    assert_eq!(store.items().len(), 2);

    // A backfill over the same window also finds nothing new.
    let backfill = RefreshSpec {
        item_mode: ItemMode::LastDays(365 * 10),
        ..RefreshSpec::default()
    };
    let third = engine(MockFeed::new().on_messages(1, messages), &store, &queue)
        .run_refresh(&backfill, &no_cancel())
        .await
        .unwrap();
    assert_eq!(third.items_inserted, 0);
    assert_eq!(store.items().len(), 2);
}

#[tokio::test]
async fn cursor_never_regresses() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));

    let queue = Arc::new(RecordingQueue::new());
    engine(
        MockFeed::new().on_messages(1, vec![text_message(3, "x"), text_message(5, "y")]),
        &store,
        &queue,
    )
    .run_refresh(&new_only(25), &no_cancel())
    .await
    .unwrap();
    assert_eq!(store.source(1).unwrap().last_processed_cursor, Some(5));

    // Second run sees nothing newer, cursor holds.
    engine(
        MockFeed::new().on_messages(1, vec![text_message(3, "x"), text_message(5, "y")]),
        &store,
        &queue,
    )
    .run_refresh(&new_only(25), &no_cancel())
    .await
    .unwrap();
    assert_eq!(store.source(1).unwrap().last_processed_cursor, Some(5));

    // Backfill modes never move it, even when they insert older items.
    let backfill = RefreshSpec {
        item_mode: ItemMode::LastDays(3650),
        ..RefreshSpec::default()
    };
    let report = engine(
        MockFeed::new().on_messages(1, vec![text_message(2, "old")]),
        &store,
        &queue,
    )
    .run_refresh(&backfill, &no_cancel())
    .await
    .unwrap();
    assert_eq!(report.items_inserted, 1);
    assert_eq!(store.source(1).unwrap().last_processed_cursor, Some(5));
}

#[tokio::test]
async fn reply_count_grows_by_inserted_replies_only() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));
    store.seed_item(test_item(7, 1, 20));

    let spec = RefreshSpec {
        reply_mode: ReplyMode::AddNewToExisting,
        ..RefreshSpec::default()
    };
    let queue = Arc::new(RecordingQueue::new());

    let thread = vec![
        reply_message(201, 20, "one"),
        reply_message(202, 20, "two"),
    ];
    engine(
        MockFeed::new().on_replies(1, 20, thread.clone()),
        &store,
        &queue,
    )
    .run_refresh(&spec, &no_cancel())
    .await
    .unwrap();
    assert_eq!(store.item_by_external(1, 20).unwrap().reply_count, 2);

    // Same thread again: nothing inserted, counter untouched.
    engine(MockFeed::new().on_replies(1, 20, thread), &store, &queue)
        .run_refresh(&spec, &no_cancel())
        .await
        .unwrap();
    assert_eq!(store.item_by_external(1, 20).unwrap().reply_count, 2);

    // One genuinely new reply arrives: counter grows by exactly one.
    let grown = vec![
        reply_message(201, 20, "one"),
        reply_message(202, 20, "two"),
        reply_message(203, 20, "three"),
    ];
    engine(MockFeed::new().on_replies(1, 20, grown), &store, &queue)
        .run_refresh(&spec, &no_cancel())
        .await
        .unwrap();
    assert_eq!(store.item_by_external(1, 20).unwrap().reply_count, 3);
}

#[tokio::test]
async fn analysis_fan_out_is_capped_per_refresh() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));

    let thread: Vec<_> = (1..=150i64)
        .map(|i| reply_message(1000 + i, 10, "busy thread"))
        .collect();
    let feed = MockFeed::new()
        .on_messages(1, vec![text_message(10, "hot post")])
        .on_replies(1, 10, thread);

    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&new_only(25), &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.replies_inserted, 150);
    // One refresh enqueues at most one analysis batch; the remainder
    // waits for a backlog scan.
    assert_eq!(report.dispatched, 100);
    assert_eq!(queue.analyze_ids().len(), 100);
}

#[tokio::test]
async fn transport_failure_fails_the_refresh_after_commit() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));
    store.seed_source(test_source(2));

    let feed = MockFeed::new()
        .on_messages(1, vec![text_message(10, "landed")])
        .fail_messages_once(2, FeedError::Network("connection reset".into()));

    let queue = Arc::new(RecordingQueue::new());
    let result = engine(feed, &store, &queue)
        .run_refresh(&new_only(25), &no_cancel())
        .await;

    assert!(result.is_err());
    // The healthy source's work was committed before the error surfaced.
    assert!(store.item_by_external(1, 10).is_some());
}

#[tokio::test(start_paused = true)]
async fn transport_failure_retries_at_the_job_level() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));

    let feed = MockFeed::new()
        .on_messages(1, vec![text_message(10, "after recovery")])
        .fail_messages_once(1, FeedError::Network("connection reset".into()));

    let (handle, receiver) = jobs::queue();
    let dispatcher = Arc::new(EnrichDispatcher::new(
        Arc::new(store.clone()),
        Arc::new(handle.clone()),
    ));
    let engine = Arc::new(
        SyncEngine::new(Arc::new(feed), Arc::new(store.clone()), dispatcher.clone())
            .without_pause(),
    );
    let analyzer = Arc::new(ReplyAnalyzer::new(
        Arc::new(store.clone()),
        Arc::new(MockCompleter::new()),
        "test-model".to_string(),
        3800,
    ));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let worker = tokio::spawn(
        JobWorker::new(receiver, handle.clone(), engine, analyzer, dispatcher, cancel_rx).run(),
    );

    handle
        .enqueue(Job::Refresh {
            spec: RefreshSpec::default(),
        })
        .await
        .unwrap();

    // The first attempt hits the transport error; the worker re-queues
    // the refresh with backoff and the second attempt lands the item.
    let mut waited = 0;
    while store.items().is_empty() && waited < 120 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        waited += 1;
    }
    assert_eq!(store.items().len(), 1);

    cancel_tx.send(true).unwrap();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rate_limited_source_does_not_affect_others() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));
    store.seed_source(test_source(2));

    // Source 1 is rate limited past the retry ceiling; source 2 is fine.
    let feed = MockFeed::new()
        .on_messages(1, vec![text_message(10, "unreachable")])
        .on_messages(2, vec![text_message(10, "fine")])
        .fail_messages_once(
            1,
            FeedError::RateLimited {
                retry_after: Duration::from_secs(30),
            },
        )
        .fail_messages_once(
            1,
            FeedError::RateLimited {
                retry_after: Duration::from_secs(30),
            },
        )
        .fail_messages_once(
            1,
            FeedError::RateLimited {
                retry_after: Duration::from_secs(30),
            },
        );

    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&new_only(25), &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.sources_synced, 2);
    assert_eq!(report.sources_failed, 0);
    assert_eq!(report.items_inserted, 1);
    assert!(store.item_by_external(1, 10).is_none());
    assert!(store.item_by_external(2, 10).is_some());
}

#[tokio::test(start_paused = true)]
async fn rate_limit_clears_within_the_run() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));

    // Two rate-limit hits, then success on the third attempt.
    let feed = MockFeed::new()
        .on_messages(1, vec![text_message(10, "eventually")])
        .fail_messages_once(
            1,
            FeedError::RateLimited {
                retry_after: Duration::from_secs(5),
            },
        )
        .fail_messages_once(
            1,
            FeedError::RateLimited {
                retry_after: Duration::from_secs(5),
            },
        );

    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&new_only(25), &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.items_inserted, 1);
}

#[tokio::test]
async fn revoked_source_is_deactivated_and_others_continue() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));
    store.seed_source(test_source(2));

    let feed = MockFeed::new()
        .on_messages(2, vec![text_message(10, "fine")])
        .fail_messages_once(1, FeedError::AccessDenied("1".into()));

    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&new_only(25), &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.sources_deactivated, 1);
    assert!(!store.source(1).unwrap().active);
    assert!(store.source(2).unwrap().active);
    assert_eq!(report.items_inserted, 1);
}

#[tokio::test]
async fn stats_only_updates_counters_without_cursor_or_dispatch() {
    let store = MemoryStore::new();
    let mut source = test_source(1);
    source.last_processed_cursor = Some(100);
    store.seed_source(source);
    store.seed_item(test_item(1, 1, 11));
    store.seed_item(test_item(2, 1, 12));
    store.seed_item(test_item(3, 1, 13));

    // 13 was deleted remotely; batch lookups return null for it.
    let mut remote_11 = text_message(11, "post 11 (edited)");
    remote_11.views = Some(500);
    let mut remote_12 = text_message(12, "post 12");
    remote_12.views = Some(600);
    let feed = MockFeed::new().on_messages(1, vec![remote_11, remote_12]);

    let spec = RefreshSpec {
        item_mode: ItemMode::StatsOnly,
        ..RefreshSpec::default()
    };
    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&spec, &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.items_updated, 2);
    assert_eq!(report.items_inserted, 0);
    let refreshed = store.item_by_external(1, 11).unwrap();
    assert_eq!(refreshed.views, Some(500));
    // Content edits made after ingestion come along with the counters.
    assert_eq!(refreshed.body.as_deref(), Some("post 11 (edited)"));
    assert_eq!(store.item_by_external(1, 12).unwrap().views, Some(600));
    // The deleted one keeps its last known counters.
    assert_eq!(store.item_by_external(1, 13).unwrap().views, Some(1));
    assert_eq!(store.source(1).unwrap().last_processed_cursor, Some(100));
    assert!(queue.jobs().is_empty());
}

#[tokio::test]
async fn service_messages_are_skipped_but_count_for_the_cursor() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));

    let feed = MockFeed::new().on_messages(
        1,
        vec![text_message(10, "real post"), service_message(11)],
    );

    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&new_only(25), &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.items_inserted, 1);
    assert_eq!(store.source(1).unwrap().last_processed_cursor, Some(11));
}

#[tokio::test]
async fn backfill_with_update_existing_overwrites_counters() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));
    store.seed_item(test_item(1, 1, 11));

    let mut remote = text_message(11, "post 11");
    remote.views = Some(900);
    let feed = MockFeed::new().on_messages(1, vec![remote]);

    let spec = RefreshSpec {
        item_mode: ItemMode::LastDays(3650),
        update_existing: true,
        ..RefreshSpec::default()
    };
    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&spec, &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.items_updated, 1);
    assert_eq!(store.item_by_external(1, 11).unwrap().views, Some(900));
    assert_eq!(store.source(1).unwrap().last_processed_cursor, None);
}

#[tokio::test]
async fn source_selection_limits_the_run() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));
    store.seed_source(test_source(2));

    let feed = MockFeed::new()
        .on_messages(1, vec![text_message(10, "one")])
        .on_messages(2, vec![text_message(10, "two")]);

    let spec = RefreshSpec {
        sources: vec![2],
        ..RefreshSpec::default()
    };
    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&spec, &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.sources_synced, 1);
    assert!(store.item_by_external(1, 10).is_none());
    assert!(store.item_by_external(2, 10).is_some());
}

#[tokio::test]
async fn cancellation_stops_before_the_next_source() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));

    let feed = MockFeed::new().on_messages(1, vec![text_message(10, "never")]);
    let (tx, rx) = watch::channel(true);

    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&RefreshSpec::default(), &rx)
        .await
        .unwrap();
    drop(tx);

    assert_eq!(report.sources_synced, 0);
    assert!(store.items().is_empty());
}

#[tokio::test]
async fn skipped_reply_thread_is_not_fatal() {
    let store = MemoryStore::new();
    store.seed_source(test_source(1));

    let feed = MockFeed::new()
        .on_messages(1, vec![text_message(10, "a"), text_message(11, "b")])
        .on_replies(1, 11, vec![reply_message(111, 11, "still collected")])
        .fail_replies_once(1, 10, FeedError::NotFound("1/10".into()));

    let queue = Arc::new(RecordingQueue::new());
    let report = engine(feed, &store, &queue)
        .run_refresh(&new_only(25), &no_cancel())
        .await
        .unwrap();

    assert_eq!(report.items_inserted, 2);
    assert_eq!(report.replies_inserted, 1);
    assert_eq!(store.item_by_external(1, 10).unwrap().reply_count, 0);
    assert_eq!(store.item_by_external(1, 11).unwrap().reply_count, 1);
}

#[tokio::test]
async fn register_source_resolves_and_upserts() {
    let store = MemoryStore::new();
    let feed = MockFeed::new().on_resolve(
        "@city_news",
        SourceDescriptor {
            id: 42,
            handle: Some("city_news".into()),
            title: "City News".into(),
            description: Some("Local updates".into()),
        },
    );

    let queue = Arc::new(RecordingQueue::new());
    let source = engine(feed, &store, &queue)
        .register_source("@city_news")
        .await
        .unwrap();

    assert_eq!(source.id, 42);
    let stored = store.source(42).unwrap();
    assert_eq!(stored.title, "City News");
    assert!(stored.active);
}
