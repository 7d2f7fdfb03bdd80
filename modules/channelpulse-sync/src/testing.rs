// Test mocks for the sync pipeline.
//
// One mock per trait boundary:
// - MockFeed (ChannelFeed) — HashMap-based canned messages with error injection
// - MemoryStore (SyncStore + EnrichStore) — in-memory state, commit-buffered
// - MockCompleter (TextCompleter) — queued canned completions
// - RecordingQueue (JobQueue) — records enqueued jobs for assertions
//
// Plus helpers for constructing remote messages and seed rows.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use channelpulse_common::{Item, Reply, ReplyFeatures, Source};
use channelpulse_store::{ItemRef, ItemStats, NewItem, NewReply};
use feed_client::{
    FeedError, MessageQuery, RemoteAuthor, RemoteMessage, SourceDescriptor,
};
use llm_client::{CompletionParams, LlmError};

use crate::jobs::Job;
use crate::traits::{ChannelFeed, EnrichStore, JobQueue, SyncSession, SyncStore, TextCompleter};

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn test_source(id: i64) -> Source {
    Source {
        id,
        handle: Some(format!("channel{id}")),
        title: format!("Channel {id}"),
        description: None,
        active: true,
        last_processed_cursor: None,
        created_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

pub fn author(id: i64, handle: Option<&str>) -> RemoteAuthor {
    RemoteAuthor {
        id,
        handle: handle.map(str::to_string),
        first_name: None,
        last_name: None,
    }
}

pub fn text_message(id: i64, text: &str) -> RemoteMessage {
    RemoteMessage {
        id,
        date: fixed_time(),
        edit_date: None,
        text: Some(text.to_string()),
        attachment: None,
        reactions: vec![],
        views: Some(100),
        forwards: Some(2),
        reply_count: None,
        pinned: false,
        author_signature: None,
        author: None,
        reply_to_id: None,
        grouped_id: None,
        service: false,
    }
}

pub fn service_message(id: i64) -> RemoteMessage {
    RemoteMessage {
        text: None,
        service: true,
        ..text_message(id, "")
    }
}

pub fn reply_message(id: i64, parent_id: i64, text: &str) -> RemoteMessage {
    RemoteMessage {
        reply_to_id: Some(parent_id),
        author: Some(author(7000 + id, Some("commenter"))),
        ..text_message(id, text)
    }
}

/// A minimal stored item row.
pub fn test_item(id: i64, source_id: i64, external_id: i64) -> Item {
    Item {
        id,
        external_id,
        source_id,
        body: Some(format!("post {external_id}")),
        caption: None,
        attachment_kind: None,
        attachment_info: None,
        views: Some(1),
        forwards: Some(0),
        reply_count: 0,
        reactions: None,
        pinned: false,
        author_signature: None,
        grouped_id: None,
        reply_to_external_id: None,
        published_at: fixed_time(),
        edited_at: None,
        created_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

/// A minimal unanalyzed reply row for enrichment tests.
pub fn test_reply(id: i64, item_id: i64, body: Option<&str>) -> Reply {
    Reply {
        id,
        external_id: 1000 + id,
        item_id,
        author_id: Some(1),
        author_handle: None,
        author_name: None,
        body: body.map(str::to_string),
        caption: None,
        attachment_kind: None,
        attachment_info: None,
        reactions: None,
        reply_to_external_id: None,
        published_at: fixed_time(),
        edited_at: None,
        topics: None,
        problems: None,
        questions: None,
        suggestions: None,
        analyzed_at: None,
        created_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

// ---------------------------------------------------------------------------
// MockFeed
// ---------------------------------------------------------------------------

/// Canned remote bridge. Message queries honor min_id / offset_date / limit
/// so cursor semantics are exercised for real. Injected errors are popped
/// one per call, before any canned data is served.
#[derive(Default)]
pub struct MockFeed {
    descriptors: HashMap<String, SourceDescriptor>,
    messages: HashMap<i64, Vec<RemoteMessage>>,
    replies: HashMap<(i64, i64), Vec<RemoteMessage>>,
    message_errors: Mutex<HashMap<i64, VecDeque<FeedError>>>,
    reply_errors: Mutex<HashMap<(i64, i64), VecDeque<FeedError>>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_resolve(mut self, identifier: &str, descriptor: SourceDescriptor) -> Self {
        self.descriptors.insert(identifier.to_string(), descriptor);
        self
    }

    pub fn on_messages(mut self, source_id: i64, messages: Vec<RemoteMessage>) -> Self {
        self.messages.insert(source_id, messages);
        self
    }

    pub fn on_replies(
        mut self,
        source_id: i64,
        parent_id: i64,
        messages: Vec<RemoteMessage>,
    ) -> Self {
        self.replies.insert((source_id, parent_id), messages);
        self
    }

    pub fn fail_messages_once(self, source_id: i64, error: FeedError) -> Self {
        self.message_errors
            .lock()
            .unwrap()
            .entry(source_id)
            .or_default()
            .push_back(error);
        self
    }

    pub fn fail_replies_once(self, source_id: i64, parent_id: i64, error: FeedError) -> Self {
        self.reply_errors
            .lock()
            .unwrap()
            .entry((source_id, parent_id))
            .or_default()
            .push_back(error);
        self
    }

    fn pop_message_error(&self, source_id: i64) -> Option<FeedError> {
        self.message_errors
            .lock()
            .unwrap()
            .get_mut(&source_id)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl ChannelFeed for MockFeed {
    async fn resolve(&self, identifier: &str) -> feed_client::Result<SourceDescriptor> {
        self.descriptors
            .get(identifier)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(identifier.to_string()))
    }

    async fn messages(
        &self,
        source_id: i64,
        query: &MessageQuery,
    ) -> feed_client::Result<Vec<RemoteMessage>> {
        if let Some(error) = self.pop_message_error(source_id) {
            return Err(error);
        }
        let mut messages: Vec<RemoteMessage> = self
            .messages
            .get(&source_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| query.min_id.is_none_or(|min| m.id > min))
            .filter(|m| query.offset_date.is_none_or(|d| m.date >= d))
            .collect();
        messages.sort_by_key(|m| m.id);
        messages.truncate(query.limit as usize);
        Ok(messages)
    }

    async fn replies(
        &self,
        source_id: i64,
        parent_id: i64,
        limit: u32,
    ) -> feed_client::Result<Vec<RemoteMessage>> {
        if let Some(error) = self
            .reply_errors
            .lock()
            .unwrap()
            .get_mut(&(source_id, parent_id))
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        let mut messages = self
            .replies
            .get(&(source_id, parent_id))
            .cloned()
            .unwrap_or_default();
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn messages_by_ids(
        &self,
        source_id: i64,
        ids: &[i64],
    ) -> feed_client::Result<Vec<Option<RemoteMessage>>> {
        if let Some(error) = self.pop_message_error(source_id) {
            return Err(error);
        }
        let known = self.messages.get(&source_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .map(|id| known.iter().find(|m| m.id == *id).cloned())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore — in-memory SyncStore + EnrichStore
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
struct MemoryState {
    sources: Vec<Source>,
    items: Vec<Item>,
    replies: Vec<Reply>,
    next_item_id: i64,
    next_reply_id: i64,
}

/// In-memory store with transaction semantics: a session works on a clone of
/// the committed state and publishes it on commit. Dropped sessions leave no
/// trace, matching the one-transaction-per-refresh model.
#[derive(Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(Mutex::new(MemoryState {
                next_item_id: 1,
                next_reply_id: 1,
                ..MemoryState::default()
            })),
        }
    }

    pub fn seed_source(&self, source: Source) {
        self.committed.lock().unwrap().sources.push(source);
    }

    pub fn seed_item(&self, item: Item) {
        let mut state = self.committed.lock().unwrap();
        state.next_item_id = state.next_item_id.max(item.id + 1);
        state.items.push(item);
    }

    pub fn seed_reply(&self, reply: Reply) {
        let mut state = self.committed.lock().unwrap();
        state.next_reply_id = state.next_reply_id.max(reply.id + 1);
        state.replies.push(reply);
    }

    pub fn sources(&self) -> Vec<Source> {
        self.committed.lock().unwrap().sources.clone()
    }

    pub fn items(&self) -> Vec<Item> {
        self.committed.lock().unwrap().items.clone()
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.committed.lock().unwrap().replies.clone()
    }

    pub fn source(&self, id: i64) -> Option<Source> {
        self.sources().into_iter().find(|s| s.id == id)
    }

    pub fn item_by_external(&self, source_id: i64, external_id: i64) -> Option<Item> {
        self.items()
            .into_iter()
            .find(|i| i.source_id == source_id && i.external_id == external_id)
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn SyncSession>> {
        let working = self.committed.lock().unwrap().clone();
        Ok(Box::new(MemorySession {
            committed: Arc::clone(&self.committed),
            working,
        }))
    }
}

pub struct MemorySession {
    committed: Arc<Mutex<MemoryState>>,
    working: MemoryState,
}

#[async_trait]
impl SyncSession for MemorySession {
    async fn active_sources(&mut self) -> Result<Vec<Source>> {
        Ok(self
            .working
            .sources
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn upsert_source(
        &mut self,
        id: i64,
        handle: Option<&str>,
        title: &str,
        description: Option<&str>,
    ) -> Result<Source> {
        if let Some(existing) = self.working.sources.iter_mut().find(|s| s.id == id) {
            existing.handle = handle.map(str::to_string);
            existing.title = title.to_string();
            existing.description = description.map(str::to_string);
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }
        let source = Source {
            id,
            handle: handle.map(str::to_string),
            title: title.to_string(),
            description: description.map(str::to_string),
            active: true,
            last_processed_cursor: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.working.sources.push(source.clone());
        Ok(source)
    }

    async fn advance_cursor(&mut self, source_id: i64, cursor: i64) -> Result<()> {
        if let Some(source) = self.working.sources.iter_mut().find(|s| s.id == source_id) {
            let current = source.last_processed_cursor.unwrap_or(0);
            source.last_processed_cursor = Some(current.max(cursor));
        }
        Ok(())
    }

    async fn deactivate_source(&mut self, source_id: i64) -> Result<()> {
        if let Some(source) = self.working.sources.iter_mut().find(|s| s.id == source_id) {
            source.active = false;
        }
        Ok(())
    }

    async fn item_refs(&mut self, source_id: i64) -> Result<Vec<ItemRef>> {
        let mut refs: Vec<ItemRef> = self
            .working
            .items
            .iter()
            .filter(|i| i.source_id == source_id)
            .map(|i| ItemRef {
                id: i.id,
                external_id: i.external_id,
            })
            .collect();
        refs.sort_by_key(|r| r.external_id);
        Ok(refs)
    }

    async fn insert_item(&mut self, item: &NewItem) -> Result<i64> {
        let id = self.working.next_item_id;
        self.working.next_item_id += 1;
        self.working.items.push(Item {
            id,
            external_id: item.external_id,
            source_id: item.source_id,
            body: item.body.clone(),
            caption: item.caption.clone(),
            attachment_kind: item.attachment_kind.clone(),
            attachment_info: item.attachment_info.clone(),
            views: item.views,
            forwards: item.forwards,
            reply_count: 0,
            reactions: item.reactions.clone(),
            pinned: item.pinned,
            author_signature: item.author_signature.clone(),
            grouped_id: item.grouped_id,
            reply_to_external_id: item.reply_to_external_id,
            published_at: item.published_at,
            edited_at: item.edited_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        Ok(id)
    }

    async fn update_item_stats(&mut self, item_id: i64, stats: &ItemStats) -> Result<()> {
        if let Some(item) = self.working.items.iter_mut().find(|i| i.id == item_id) {
            item.body = stats.body.clone();
            item.caption = stats.caption.clone();
            item.attachment_kind = stats.attachment_kind.clone();
            item.attachment_info = stats.attachment_info.clone();
            item.views = stats.views;
            item.forwards = stats.forwards;
            item.reactions = stats.reactions.clone();
            if let Some(reply_count) = stats.reply_count {
                item.reply_count = reply_count;
            }
            item.pinned = stats.pinned;
            item.author_signature = stats.author_signature.clone();
            item.edited_at = stats.edited_at;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reply_external_ids(&mut self, item_id: i64) -> Result<HashSet<i64>> {
        Ok(self
            .working
            .replies
            .iter()
            .filter(|r| r.item_id == item_id)
            .map(|r| r.external_id)
            .collect())
    }

    async fn insert_reply(&mut self, reply: &NewReply) -> Result<i64> {
        let id = self.working.next_reply_id;
        self.working.next_reply_id += 1;
        self.working.replies.push(Reply {
            id,
            external_id: reply.external_id,
            item_id: reply.item_id,
            author_id: reply.author_id,
            author_handle: reply.author_handle.clone(),
            author_name: reply.author_name.clone(),
            body: reply.body.clone(),
            caption: reply.caption.clone(),
            attachment_kind: reply.attachment_kind.clone(),
            attachment_info: reply.attachment_info.clone(),
            reactions: reply.reactions.clone(),
            reply_to_external_id: reply.reply_to_external_id,
            published_at: reply.published_at,
            edited_at: reply.edited_at,
            topics: None,
            problems: None,
            questions: None,
            suggestions: None,
            analyzed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        Ok(id)
    }

    async fn increment_reply_count(&mut self, item_id: i64, delta: i64) -> Result<()> {
        if let Some(item) = self.working.items.iter_mut().find(|i| i.id == item_id) {
            item.reply_count += delta;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        *self.committed.lock().unwrap() = self.working;
        Ok(())
    }
}

#[async_trait]
impl EnrichStore for MemoryStore {
    async fn reply_by_id(&self, id: i64) -> Result<Option<Reply>> {
        Ok(self.replies().into_iter().find(|r| r.id == id))
    }

    async fn replies_by_ids(&self, ids: &[i64]) -> Result<Vec<Reply>> {
        Ok(self
            .replies()
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .collect())
    }

    async fn unanalyzed_replies(
        &self,
        limit: i64,
        older_than: Option<DateTime<Utc>>,
        source_id: Option<i64>,
    ) -> Result<Vec<Reply>> {
        let source_items: Vec<i64> = match source_id {
            Some(source_id) => self
                .items()
                .into_iter()
                .filter(|i| i.source_id == source_id)
                .map(|i| i.id)
                .collect(),
            None => Vec::new(),
        };
        let mut replies: Vec<Reply> = self
            .replies()
            .into_iter()
            .filter(|r| r.analyzed_at.is_none())
            .filter(|r| older_than.is_none_or(|cutoff| r.created_at < cutoff))
            .filter(|r| source_id.is_none() || source_items.contains(&r.item_id))
            .collect();
        replies.sort_by_key(|r| r.created_at);
        replies.truncate(limit as usize);
        Ok(replies)
    }

    async fn save_reply_features(&self, id: i64, features: &ReplyFeatures) -> Result<()> {
        let mut state = self.committed.lock().unwrap();
        if let Some(reply) = state.replies.iter_mut().find(|r| r.id == id) {
            reply.topics = Some(serde_json::to_value(&features.topics)?);
            reply.problems = Some(serde_json::to_value(&features.problems)?);
            reply.questions = Some(serde_json::to_value(&features.questions)?);
            reply.suggestions = Some(serde_json::to_value(&features.suggestions)?);
            reply.analyzed_at = Some(Utc::now());
            reply.updated_at = Utc::now();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockCompleter
// ---------------------------------------------------------------------------

/// Queued canned completions. With an empty queue it serves an all-empty
/// feature object, so tests that don't care about content keep working.
#[derive(Default)]
pub struct MockCompleter {
    responses: Mutex<VecDeque<llm_client::Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(self, response: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(response.to_string()));
        self
    }

    pub fn fail_once(self, error: LlmError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextCompleter for MockCompleter {
    async fn complete(
        &self,
        prompt: &str,
        _params: &CompletionParams,
    ) -> llm_client::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(
                r#"{"topics": [], "problems": [], "questions": [], "suggestions": []}"#
                    .to_string(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingQueue
// ---------------------------------------------------------------------------

/// Records enqueued jobs instead of running them.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    /// Reply ids of recorded AnalyzeReply jobs, in enqueue order.
    pub fn analyze_ids(&self) -> Vec<i64> {
        self.jobs()
            .into_iter()
            .filter_map(|job| match job {
                Job::AnalyzeReply { reply_id } => Some(reply_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}
