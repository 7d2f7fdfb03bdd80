// Reply collection for one item's thread.

use anyhow::Result;
use tracing::{debug, warn};

use channelpulse_store::{ItemRef, NewReply};
use feed_client::RemoteMessage;

use crate::governor::{FeedAction, FetchScope, RetryGovernor};
use crate::media::{normalize_attachment, normalize_reactions, split_text};
use crate::traits::{ChannelFeed, SyncSession};

/// Collects the reply thread under one item: fetch, dedup against stored
/// rows, insert what's new, bump the item's reply counter by exactly the
/// number of rows inserted.
pub struct ReplyCollector<'a> {
    feed: &'a dyn ChannelFeed,
    governor: &'a RetryGovernor,
    limit: u32,
}

impl<'a> ReplyCollector<'a> {
    pub fn new(feed: &'a dyn ChannelFeed, governor: &'a RetryGovernor, limit: u32) -> Self {
        Self {
            feed,
            governor,
            limit,
        }
    }

    /// Returns the row ids of replies inserted for this item. A thread that
    /// cannot be fetched is skipped, never fatal to the refresh.
    pub async fn collect(
        &self,
        session: &mut dyn SyncSession,
        source_id: i64,
        item: ItemRef,
    ) -> Result<Vec<i64>> {
        let messages = match self.fetch_thread(source_id, item.external_id).await {
            Some(messages) => messages,
            None => return Ok(Vec::new()),
        };
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        // Dedup set up front, one query per thread instead of one per reply.
        let mut existing = session.reply_external_ids(item.id).await?;

        let mut inserted = Vec::new();
        for message in &messages {
            if !message.is_content() || existing.contains(&message.id) {
                continue;
            }
            let reply = build_reply(item.id, message);
            let row_id = session.insert_reply(&reply).await?;
            existing.insert(message.id);
            inserted.push(row_id);
        }

        if !inserted.is_empty() {
            session
                .increment_reply_count(item.id, inserted.len() as i64)
                .await?;
        }

        debug!(
            source_id,
            item_external_id = item.external_id,
            fetched = messages.len(),
            inserted = inserted.len(),
            "Collected reply thread"
        );
        Ok(inserted)
    }

    /// Fetch one thread under governor control. None means the thread was
    /// given up on.
    async fn fetch_thread(&self, source_id: i64, parent_id: i64) -> Option<Vec<RemoteMessage>> {
        let mut attempt = 0;
        loop {
            match self.feed.replies(source_id, parent_id, self.limit).await {
                Ok(messages) => return Some(messages),
                Err(err) => match self.governor.classify(FetchScope::Thread, &err, attempt) {
                    FeedAction::RetryAfter(delay) => {
                        warn!(
                            source_id,
                            parent_id,
                            delay_secs = delay.as_secs(),
                            attempt,
                            "Rate limited fetching replies, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    _ => {
                        warn!(source_id, parent_id, error = %err, "Skipping reply thread");
                        return None;
                    }
                },
            }
        }
    }
}

fn build_reply(item_id: i64, message: &RemoteMessage) -> NewReply {
    let (body, caption) = split_text(message);
    let (attachment_kind, attachment_info) = match &message.attachment {
        Some(attachment) => {
            let (kind, info) = normalize_attachment(attachment);
            (Some(kind.as_str().to_string()), Some(info))
        }
        None => (None, None),
    };

    NewReply {
        external_id: message.id,
        item_id,
        author_id: message.author.as_ref().map(|a| a.id),
        author_handle: message.author.as_ref().and_then(|a| a.handle.clone()),
        author_name: message.author.as_ref().and_then(|a| a.full_name()),
        body,
        caption,
        attachment_kind,
        attachment_info,
        reactions: normalize_reactions(&message.reactions),
        reply_to_external_id: message.reply_to_id,
        published_at: message.date,
        edited_at: message.edit_date,
    }
}
