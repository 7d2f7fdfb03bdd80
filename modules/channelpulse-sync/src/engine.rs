// The sync engine: one refresh invocation, one transaction, one commit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use channelpulse_common::Source;
use channelpulse_store::{ItemRef, ItemStats, NewItem};
use feed_client::{MessageQuery, RemoteMessage};

use crate::enrich::EnrichDispatcher;
use crate::governor::{FeedAction, FetchScope, RetryGovernor};
use crate::media::{normalize_attachment, normalize_reactions, split_text};
use crate::refresh::{ItemMode, RefreshSpec};
use crate::replies::ReplyCollector;
use crate::traits::{ChannelFeed, SyncSession, SyncStore};

/// Pause between sources, spreading load on the remote.
const PAUSE_BETWEEN_SOURCES: Duration = Duration::from_secs(1);
/// Batch size for stats refresh lookups.
const STATS_BATCH_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Aggregate outcome of one refresh invocation.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub sources_synced: usize,
    pub sources_deactivated: usize,
    pub sources_failed: usize,
    pub items_inserted: usize,
    pub items_updated: usize,
    pub replies_inserted: usize,
    pub dispatched: usize,
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources synced ({} deactivated, {} failed), {} items inserted, \
             {} items updated, {} replies inserted, {} analyses dispatched",
            self.sources_synced,
            self.sources_deactivated,
            self.sources_failed,
            self.items_inserted,
            self.items_updated,
            self.replies_inserted,
            self.dispatched
        )
    }
}

/// Outcome of syncing a single source.
#[derive(Debug, Default)]
struct SourceOutcome {
    items_inserted: usize,
    items_updated: usize,
    new_reply_ids: Vec<i64>,
    deactivated: bool,
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    feed: Arc<dyn ChannelFeed>,
    store: Arc<dyn SyncStore>,
    dispatcher: Arc<EnrichDispatcher>,
    governor: RetryGovernor,
    /// Backfill boundary used the first time a source is synced without a
    /// cursor. None means "start from the newest page".
    initial_lookback: Option<DateTime<Utc>>,
    pause: Duration,
}

impl SyncEngine {
    pub fn new(
        feed: Arc<dyn ChannelFeed>,
        store: Arc<dyn SyncStore>,
        dispatcher: Arc<EnrichDispatcher>,
    ) -> Self {
        Self {
            feed,
            store,
            dispatcher,
            governor: RetryGovernor::default(),
            initial_lookback: None,
            pause: PAUSE_BETWEEN_SOURCES,
        }
    }

    pub fn with_initial_lookback(mut self, lookback: Option<DateTime<Utc>>) -> Self {
        self.initial_lookback = lookback;
        self
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn without_pause(mut self) -> Self {
        self.pause = Duration::ZERO;
        self
    }

    /// Resolve a channel identifier and register (or refresh) it as a source.
    pub async fn register_source(&self, identifier: &str) -> Result<Source> {
        let descriptor = self.feed.resolve(identifier).await?;
        let mut session = self.store.begin().await?;
        let source = session
            .upsert_source(
                descriptor.id,
                descriptor.handle.as_deref(),
                &descriptor.title,
                descriptor.description.as_deref(),
            )
            .await?;
        session.commit().await?;
        info!(source_id = source.id, title = %source.title, "Registered source");
        Ok(source)
    }

    /// Sync every active source per `spec`, commit once, then hand the
    /// replies this run inserted to the enrichment dispatcher.
    ///
    /// Cancellation is checked between sources; a refresh mid-source runs
    /// that source to completion first. Escalated source failures surface
    /// as an error only after the commit, so completed sources persist and
    /// the job-level retry policy sees the failure.
    pub async fn run_refresh(
        &self,
        spec: &RefreshSpec,
        cancel: &watch::Receiver<bool>,
    ) -> Result<RefreshReport> {
        spec.validate()?;

        let mut session = self.store.begin().await?;
        let mut sources = session.active_sources().await?;
        if !spec.sources.is_empty() {
            sources.retain(|s| spec.sources.contains(&s.id));
        }
        info!(count = sources.len(), mode = ?spec.item_mode, "Starting refresh");

        let mut report = RefreshReport::default();
        let mut new_reply_ids: Vec<i64> = Vec::new();
        let mut failures: Vec<anyhow::Error> = Vec::new();

        for (index, source) in sources.iter().enumerate() {
            if *cancel.borrow() {
                info!("Refresh cancelled, committing work done so far");
                break;
            }
            if index > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            match self.sync_source(session.as_mut(), source, spec).await {
                Ok(outcome) => {
                    report.sources_synced += 1;
                    if outcome.deactivated {
                        report.sources_deactivated += 1;
                    }
                    report.items_inserted += outcome.items_inserted;
                    report.items_updated += outcome.items_updated;
                    report.replies_inserted += outcome.new_reply_ids.len();
                    new_reply_ids.extend(outcome.new_reply_ids);
                }
                Err(err) => {
                    warn!(source_id = source.id, error = %err, "Source sync failed, continuing");
                    report.sources_failed += 1;
                    failures.push(err);
                }
            }
        }

        session.commit().await?;

        // Dispatch only after commit: job handlers must see durable rows.
        if spec.dispatch_enrichment {
            report.dispatched = self.dispatcher.dispatch_ids(&new_reply_ids).await?;
        }

        info!(%report, "Refresh complete");

        if !failures.is_empty() {
            let count = failures.len();
            return Err(failures
                .remove(0)
                .context(format!("{count} source(s) failed this refresh")));
        }
        Ok(report)
    }

    async fn sync_source(
        &self,
        session: &mut dyn SyncSession,
        source: &Source,
        spec: &RefreshSpec,
    ) -> Result<SourceOutcome> {
        let mut outcome = SourceOutcome::default();

        let new_items = match spec.item_mode {
            ItemMode::StatsOnly => {
                outcome.items_updated = match self.refresh_stats(session, source).await? {
                    Some(updated) => updated,
                    None => {
                        outcome.deactivated = true;
                        return Ok(outcome);
                    }
                };
                Vec::new()
            }
            _ => match self.ingest_items(session, source, spec).await? {
                Some((items, updated)) => {
                    outcome.items_inserted = items.len();
                    outcome.items_updated = updated;
                    items
                }
                None => {
                    outcome.deactivated = true;
                    return Ok(outcome);
                }
            },
        };

        let targets: Vec<ItemRef> = match spec.reply_mode {
            crate::refresh::ReplyMode::Skip => Vec::new(),
            crate::refresh::ReplyMode::NewItemsOnly => new_items,
            crate::refresh::ReplyMode::AddNewToExisting => session.item_refs(source.id).await?,
        };

        let collector = ReplyCollector::new(self.feed.as_ref(), &self.governor, spec.reply_limit);
        for item in targets {
            let inserted = collector.collect(session, source.id, item).await?;
            outcome.new_reply_ids.extend(inserted);
        }

        Ok(outcome)
    }

    /// Fetch top-level items: insert what's new, optionally refresh what's
    /// already stored. Returns (inserted refs, updated count), or None when
    /// the source was deactivated.
    async fn ingest_items(
        &self,
        session: &mut dyn SyncSession,
        source: &Source,
        spec: &RefreshSpec,
    ) -> Result<Option<(Vec<ItemRef>, usize)>> {
        let query = self.build_query(source, spec);

        let messages = match self
            .fetch_governed(source, || self.feed.messages(source.id, &query))
            .await?
        {
            Fetched::Ok(messages) => messages,
            Fetched::Deactivated => {
                session.deactivate_source(source.id).await?;
                return Ok(None);
            }
            Fetched::GaveUp => return Ok(Some((Vec::new(), 0))),
        };

        let existing: std::collections::HashMap<i64, i64> = session
            .item_refs(source.id)
            .await?
            .into_iter()
            .map(|r| (r.external_id, r.id))
            .collect();

        let mut inserted = Vec::new();
        let mut updated = 0;
        let mut max_seen: Option<i64> = None;
        for message in &messages {
            max_seen = Some(max_seen.map_or(message.id, |m| m.max(message.id)));
            if !message.is_content() {
                continue;
            }
            if let Some(&row_id) = existing.get(&message.id) {
                if spec.update_existing && spec.item_mode != ItemMode::NewOnly {
                    session
                        .update_item_stats(row_id, &build_stats(message))
                        .await?;
                    updated += 1;
                }
                continue;
            }
            let item = build_item(source.id, message);
            let row_id = session.insert_item(&item).await?;
            inserted.push(ItemRef {
                id: row_id,
                external_id: message.id,
            });
        }

        // Only a cursor walk moves the cursor. Every fetched id counts as
        // processed, duplicates and service messages included.
        if spec.item_mode == ItemMode::NewOnly {
            if let Some(max_seen) = max_seen {
                session.advance_cursor(source.id, max_seen).await?;
            }
        }

        Ok(Some((inserted, updated)))
    }

    /// Refresh engagement counters on stored items in batches. Returns the
    /// update count, or None when the source was deactivated.
    async fn refresh_stats(
        &self,
        session: &mut dyn SyncSession,
        source: &Source,
    ) -> Result<Option<usize>> {
        let refs = session.item_refs(source.id).await?;
        let mut updated = 0;

        for chunk in refs.chunks(STATS_BATCH_SIZE) {
            let ids: Vec<i64> = chunk.iter().map(|r| r.external_id).collect();
            let remote = match self
                .fetch_governed(source, || self.feed.messages_by_ids(source.id, &ids))
                .await?
            {
                Fetched::Ok(remote) => remote,
                Fetched::Deactivated => {
                    session.deactivate_source(source.id).await?;
                    return Ok(None);
                }
                Fetched::GaveUp => return Ok(Some(updated)),
            };

            for (item, message) in chunk.iter().zip(remote) {
                // Deleted on the remote side: keep the local row as-is.
                let Some(message) = message else { continue };
                session
                    .update_item_stats(item.id, &build_stats(&message))
                    .await?;
                updated += 1;
            }
        }

        Ok(Some(updated))
    }

    fn build_query(&self, source: &Source, spec: &RefreshSpec) -> MessageQuery {
        let mut query = MessageQuery {
            limit: spec.item_limit,
            ..MessageQuery::default()
        };
        match spec.item_mode {
            ItemMode::NewOnly => match source.last_processed_cursor {
                Some(cursor) => query.min_id = Some(cursor),
                None => query.offset_date = self.initial_lookback,
            },
            _ => query.offset_date = spec.backfill_boundary(Utc::now()),
        }
        query
    }

    /// Run one source-scoped fetch under governor control.
    async fn fetch_governed<T, F, Fut>(&self, source: &Source, fetch: F) -> Result<Fetched<T>>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = feed_client::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match fetch().await {
                Ok(value) => return Ok(Fetched::Ok(value)),
                Err(err) => match self.governor.classify(FetchScope::Source, &err, attempt) {
                    FeedAction::RetryAfter(delay) => {
                        warn!(
                            source_id = source.id,
                            delay_secs = delay.as_secs(),
                            attempt,
                            "Rate limited, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    FeedAction::DeactivateSource => {
                        warn!(source_id = source.id, error = %err, "Deactivating source");
                        return Ok(Fetched::Deactivated);
                    }
                    FeedAction::SkipUnit => {
                        warn!(source_id = source.id, error = %err, "Giving up on source this run");
                        return Ok(Fetched::GaveUp);
                    }
                    FeedAction::Escalate => {
                        return Err(anyhow!(err).context(format!(
                            "fetching from source {}",
                            source.id
                        )))
                    }
                },
            }
        }
    }
}

enum Fetched<T> {
    Ok(T),
    Deactivated,
    GaveUp,
}

/// Remote-owned state for an in-place refresh: edited content plus counters.
fn build_stats(message: &RemoteMessage) -> ItemStats {
    let (body, caption) = split_text(message);
    let (attachment_kind, attachment_info) = match &message.attachment {
        Some(attachment) => {
            let (kind, info) = normalize_attachment(attachment);
            (Some(kind.as_str().to_string()), Some(info))
        }
        None => (None, None),
    };

    ItemStats {
        body,
        caption,
        attachment_kind,
        attachment_info,
        views: message.views,
        forwards: message.forwards,
        reply_count: message.reply_count,
        reactions: normalize_reactions(&message.reactions),
        pinned: message.pinned,
        author_signature: message.author_signature.clone(),
        edited_at: message.edit_date,
    }
}

fn build_item(source_id: i64, message: &RemoteMessage) -> NewItem {
    let (body, caption) = split_text(message);
    let (attachment_kind, attachment_info) = match &message.attachment {
        Some(attachment) => {
            let (kind, info) = normalize_attachment(attachment);
            (Some(kind.as_str().to_string()), Some(info))
        }
        None => (None, None),
    };

    NewItem {
        external_id: message.id,
        source_id,
        body,
        caption,
        attachment_kind,
        attachment_info,
        views: message.views,
        forwards: message.forwards,
        reactions: normalize_reactions(&message.reactions),
        pinned: message.pinned,
        author_signature: message.author_signature.clone(),
        grouped_id: message.grouped_id,
        reply_to_external_id: message.reply_to_id,
        published_at: message.date,
        edited_at: message.edit_date,
    }
}
