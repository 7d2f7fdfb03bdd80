// Background job queue: an mpsc-backed worker with exponential retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::analyze::ReplyAnalyzer;
use crate::engine::SyncEngine;
use crate::enrich::EnrichDispatcher;
use crate::governor::task_backoff;
use crate::refresh::RefreshSpec;
use crate::traits::JobQueue;

/// Base delay for task-level retries, doubled per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(30);
const REFRESH_MAX_RETRIES: u32 = 3;
const ANALYSIS_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Run one full refresh over all active sources.
    Refresh { spec: RefreshSpec },
    /// Extract features for one reply.
    AnalyzeReply { reply_id: i64 },
    /// Scan the unanalyzed backlog and queue analysis jobs.
    DispatchBacklog {
        limit: i64,
        older_than: Option<DateTime<Utc>>,
        source_id: Option<i64>,
    },
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Job::Refresh { .. } => "refresh",
            Job::AnalyzeReply { .. } => "analyze_reply",
            Job::DispatchBacklog { .. } => "dispatch_backlog",
        }
    }

    fn max_retries(&self) -> u32 {
        match self {
            Job::Refresh { .. } => REFRESH_MAX_RETRIES,
            Job::AnalyzeReply { .. } | Job::DispatchBacklog { .. } => ANALYSIS_MAX_RETRIES,
        }
    }
}

#[derive(Debug)]
struct Envelope {
    job: Job,
    attempt: u32,
}

/// Cheap cloneable sender half. This is what the engine and dispatcher hold.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

#[async_trait]
impl JobQueue for QueueHandle {
    async fn enqueue(&self, job: Job) -> Result<()> {
        self.tx
            .send(Envelope { job, attempt: 0 })
            .map_err(|_| anyhow::anyhow!("job queue closed"))
    }
}

pub fn queue() -> (QueueHandle, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueHandle { tx }, JobReceiver { rx })
}

pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

/// Queue that runs analysis jobs on the spot instead of deferring them.
/// One-shot CLI invocations use this so they finish with nothing in flight.
pub struct InlineQueue {
    analyzer: Arc<ReplyAnalyzer>,
}

impl InlineQueue {
    pub fn new(analyzer: Arc<ReplyAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl JobQueue for InlineQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        match job {
            Job::AnalyzeReply { reply_id } => {
                if let Err(err) = self.analyzer.analyze(reply_id).await {
                    warn!(reply_id, error = %err, "Inline analysis failed");
                }
                Ok(())
            }
            other => anyhow::bail!("inline queue cannot run {} jobs", other.kind()),
        }
    }
}

/// Single consumer of the queue. Failed jobs are re-queued after an
/// exponential delay, up to the per-kind retry ceiling.
pub struct JobWorker {
    receiver: JobReceiver,
    handle: QueueHandle,
    engine: Arc<SyncEngine>,
    analyzer: Arc<ReplyAnalyzer>,
    dispatcher: Arc<EnrichDispatcher>,
    cancel: watch::Receiver<bool>,
}

impl JobWorker {
    pub fn new(
        receiver: JobReceiver,
        handle: QueueHandle,
        engine: Arc<SyncEngine>,
        analyzer: Arc<ReplyAnalyzer>,
        dispatcher: Arc<EnrichDispatcher>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            receiver,
            handle,
            engine,
            analyzer,
            dispatcher,
            cancel,
        }
    }

    pub async fn run(mut self) {
        info!("Job worker started");
        loop {
            tokio::select! {
                _ = self.cancel.changed() => {
                    if *self.cancel.borrow() {
                        info!("Job worker stopping");
                        break;
                    }
                }
                envelope = self.receiver.rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    self.process(envelope).await;
                }
            }
        }
    }

    async fn process(&self, envelope: Envelope) {
        let kind = envelope.job.kind();
        match self.execute(&envelope.job).await {
            Ok(()) => {
                debug!(job = kind, attempt = envelope.attempt, "Job completed");
            }
            Err(err) if envelope.attempt < envelope.job.max_retries() => {
                let delay = task_backoff(RETRY_BASE_DELAY, envelope.attempt);
                warn!(
                    job = kind,
                    attempt = envelope.attempt,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Job failed, retrying"
                );
                let tx = self.handle.tx.clone();
                let retry = Envelope {
                    job: envelope.job,
                    attempt: envelope.attempt + 1,
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(retry);
                });
            }
            Err(err) => {
                error!(job = kind, attempt = envelope.attempt, error = %err, "Job failed permanently");
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        match job {
            Job::Refresh { spec } => {
                self.engine.run_refresh(spec, &self.cancel).await?;
            }
            Job::AnalyzeReply { reply_id } => {
                self.analyzer.analyze(*reply_id).await?;
            }
            Job::DispatchBacklog {
                limit,
                older_than,
                source_id,
            } => {
                self.dispatcher
                    .dispatch_backlog(*limit, *older_than, *source_id)
                    .await?;
            }
        }
        Ok(())
    }
}
