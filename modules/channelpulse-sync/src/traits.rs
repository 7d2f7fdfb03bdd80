// Trait abstractions for the sync pipeline's dependencies.
//
// ChannelFeed fronts the remote bridge, SyncStore/SyncSession front Postgres
// with one transaction per refresh, EnrichStore and TextCompleter front the
// enrichment stage, JobQueue fronts the worker.
//
// These enable deterministic testing with MockFeed, MemoryStore,
// MockCompleter and RecordingQueue: no network, no database.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use channelpulse_common::{Reply, ReplyFeatures, Source};
use channelpulse_store::{ItemRef, ItemStats, NewItem, NewReply, PgSession, PgStore};
use feed_client::{FeedClient, MessageQuery, RemoteMessage, SourceDescriptor};
use llm_client::{CompletionParams, LlmClient};

use crate::jobs::Job;

// ---------------------------------------------------------------------------
// ChannelFeed — the remote bridge
// ---------------------------------------------------------------------------

/// Typed errors here are load-bearing: the governor classifies them.
#[async_trait]
pub trait ChannelFeed: Send + Sync {
    /// Resolve a channel identifier (numeric id or @handle).
    async fn resolve(&self, identifier: &str) -> feed_client::Result<SourceDescriptor>;

    /// One ascending page of top-level messages.
    async fn messages(
        &self,
        source_id: i64,
        query: &MessageQuery,
    ) -> feed_client::Result<Vec<RemoteMessage>>;

    /// Replies threaded under one parent, oldest first.
    async fn replies(
        &self,
        source_id: i64,
        parent_id: i64,
        limit: u32,
    ) -> feed_client::Result<Vec<RemoteMessage>>;

    /// Current remote state for known ids; deleted ids come back as None.
    async fn messages_by_ids(
        &self,
        source_id: i64,
        ids: &[i64],
    ) -> feed_client::Result<Vec<Option<RemoteMessage>>>;
}

#[async_trait]
impl ChannelFeed for FeedClient {
    async fn resolve(&self, identifier: &str) -> feed_client::Result<SourceDescriptor> {
        self.resolve(identifier).await
    }

    async fn messages(
        &self,
        source_id: i64,
        query: &MessageQuery,
    ) -> feed_client::Result<Vec<RemoteMessage>> {
        self.messages(source_id, query).await
    }

    async fn replies(
        &self,
        source_id: i64,
        parent_id: i64,
        limit: u32,
    ) -> feed_client::Result<Vec<RemoteMessage>> {
        self.replies(source_id, parent_id, limit).await
    }

    async fn messages_by_ids(
        &self,
        source_id: i64,
        ids: &[i64],
    ) -> feed_client::Result<Vec<Option<RemoteMessage>>> {
        self.messages_by_ids(source_id, ids).await
    }
}

// ---------------------------------------------------------------------------
// SyncStore / SyncSession — one refresh, one transaction
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SyncSession>>;
}

/// Every write of a refresh goes through one session and lands atomically
/// on commit. Dropping a session without committing discards its writes.
#[async_trait]
pub trait SyncSession: Send {
    async fn active_sources(&mut self) -> Result<Vec<Source>>;

    async fn upsert_source(
        &mut self,
        id: i64,
        handle: Option<&str>,
        title: &str,
        description: Option<&str>,
    ) -> Result<Source>;

    /// Advance the cursor, monotonically. A stale value is a no-op.
    async fn advance_cursor(&mut self, source_id: i64, cursor: i64) -> Result<()>;

    async fn deactivate_source(&mut self, source_id: i64) -> Result<()>;

    /// (row id, external id) pairs for a source's items. Doubles as the
    /// dedup set for item ingestion.
    async fn item_refs(&mut self, source_id: i64) -> Result<Vec<ItemRef>>;

    async fn insert_item(&mut self, item: &NewItem) -> Result<i64>;

    async fn update_item_stats(&mut self, item_id: i64, stats: &ItemStats) -> Result<()>;

    async fn reply_external_ids(&mut self, item_id: i64) -> Result<HashSet<i64>>;

    async fn insert_reply(&mut self, reply: &NewReply) -> Result<i64>;

    async fn increment_reply_count(&mut self, item_id: i64, delta: i64) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
impl SyncStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn SyncSession>> {
        Ok(Box::new(PgStore::begin(self).await?))
    }
}

#[async_trait]
impl SyncSession for PgSession {
    async fn active_sources(&mut self) -> Result<Vec<Source>> {
        PgSession::active_sources(self).await
    }

    async fn upsert_source(
        &mut self,
        id: i64,
        handle: Option<&str>,
        title: &str,
        description: Option<&str>,
    ) -> Result<Source> {
        PgSession::upsert_source(self, id, handle, title, description).await
    }

    async fn advance_cursor(&mut self, source_id: i64, cursor: i64) -> Result<()> {
        PgSession::advance_cursor(self, source_id, cursor).await
    }

    async fn deactivate_source(&mut self, source_id: i64) -> Result<()> {
        PgSession::deactivate_source(self, source_id).await
    }

    async fn item_refs(&mut self, source_id: i64) -> Result<Vec<ItemRef>> {
        PgSession::item_refs(self, source_id).await
    }

    async fn insert_item(&mut self, item: &NewItem) -> Result<i64> {
        PgSession::insert_item(self, item).await
    }

    async fn update_item_stats(&mut self, item_id: i64, stats: &ItemStats) -> Result<()> {
        PgSession::update_item_stats(self, item_id, stats).await
    }

    async fn reply_external_ids(&mut self, item_id: i64) -> Result<HashSet<i64>> {
        PgSession::reply_external_ids(self, item_id).await
    }

    async fn insert_reply(&mut self, reply: &NewReply) -> Result<i64> {
        PgSession::insert_reply(self, reply).await
    }

    async fn increment_reply_count(&mut self, item_id: i64, delta: i64) -> Result<()> {
        PgSession::increment_reply_count(self, item_id, delta).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        PgSession::commit(*self).await
    }
}

// ---------------------------------------------------------------------------
// EnrichStore — enrichment-side reads and the single feature write
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EnrichStore: Send + Sync {
    async fn reply_by_id(&self, id: i64) -> Result<Option<Reply>>;

    async fn replies_by_ids(&self, ids: &[i64]) -> Result<Vec<Reply>>;

    /// Unanalyzed replies, oldest first, optionally restricted to rows
    /// created before `older_than` or to one source's threads.
    async fn unanalyzed_replies(
        &self,
        limit: i64,
        older_than: Option<DateTime<Utc>>,
        source_id: Option<i64>,
    ) -> Result<Vec<Reply>>;

    async fn save_reply_features(&self, id: i64, features: &ReplyFeatures) -> Result<()>;
}

#[async_trait]
impl EnrichStore for PgStore {
    async fn reply_by_id(&self, id: i64) -> Result<Option<Reply>> {
        PgStore::reply_by_id(self, id).await
    }

    async fn replies_by_ids(&self, ids: &[i64]) -> Result<Vec<Reply>> {
        PgStore::replies_by_ids(self, ids).await
    }

    async fn unanalyzed_replies(
        &self,
        limit: i64,
        older_than: Option<DateTime<Utc>>,
        source_id: Option<i64>,
    ) -> Result<Vec<Reply>> {
        PgStore::unanalyzed_replies(self, limit, older_than, source_id).await
    }

    async fn save_reply_features(&self, id: i64, features: &ReplyFeatures) -> Result<()> {
        PgStore::save_reply_features(self, id, features).await
    }
}

// ---------------------------------------------------------------------------
// TextCompleter — the LLM seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TextCompleter: Send + Sync {
    async fn complete(&self, prompt: &str, params: &CompletionParams)
        -> llm_client::Result<String>;
}

#[async_trait]
impl TextCompleter for LlmClient {
    async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> llm_client::Result<String> {
        LlmClient::complete(self, prompt, params).await
    }
}

// ---------------------------------------------------------------------------
// JobQueue — hand work to the background worker
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
}
