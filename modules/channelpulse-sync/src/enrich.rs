// Enrichment dispatch: decide which replies get queued for analysis.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::jobs::Job;
use crate::traits::{EnrichStore, JobQueue};

/// Replies queued per dispatch batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

pub struct EnrichDispatcher {
    store: Arc<dyn EnrichStore>,
    queue: Arc<dyn JobQueue>,
    batch_size: usize,
}

impl EnrichDispatcher {
    pub fn new(store: Arc<dyn EnrichStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            store,
            queue,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Queue analysis for explicitly named replies. Ids that are unknown,
    /// already analyzed, or carry no analyzable text are dropped, so
    /// re-dispatching is harmless. One call enqueues at most one batch;
    /// the remainder is left for a later backlog scan.
    pub async fn dispatch_ids(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let replies = self.store.replies_by_ids(ids).await?;
        let eligible: Vec<i64> = replies
            .iter()
            .filter(|r| r.analyzed_at.is_none() && !r.analysis_text().is_empty())
            .map(|r| r.id)
            .collect();
        let enqueued = self.enqueue_capped(&eligible).await?;
        debug!(
            requested = ids.len(),
            eligible = eligible.len(),
            enqueued,
            "Dispatched explicit ids"
        );
        Ok(enqueued)
    }

    /// Scan the unanalyzed backlog, oldest first, and queue up to one batch
    /// of the first `limit` rows. With `older_than` set, fresh rows are left
    /// for the normal post-refresh fan-out; `source_id` scopes the scan to
    /// one source. Textless rows are dispatched too: analysis resolves them
    /// terminally instead of leaving them in the backlog forever.
    pub async fn dispatch_backlog(
        &self,
        limit: i64,
        older_than: Option<DateTime<Utc>>,
        source_id: Option<i64>,
    ) -> Result<usize> {
        let replies = self
            .store
            .unanalyzed_replies(limit, older_than, source_id)
            .await?;
        let ids: Vec<i64> = replies.iter().map(|r| r.id).collect();
        let enqueued = self.enqueue_capped(&ids).await?;
        info!(scanned = ids.len(), enqueued, "Dispatched analysis backlog");
        Ok(enqueued)
    }

    async fn enqueue_capped(&self, ids: &[i64]) -> Result<usize> {
        let capped = &ids[..ids.len().min(self.batch_size)];
        for &reply_id in capped {
            self.queue.enqueue(Job::AnalyzeReply { reply_id }).await?;
        }
        if capped.len() < ids.len() {
            debug!(
                deferred = ids.len() - capped.len(),
                "Fan-out capped, remainder left for a backlog scan"
            );
        }
        Ok(capped.len())
    }
}
