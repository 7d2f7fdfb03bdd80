//! Incremental channel sync and enrichment pipeline.
//!
//! A refresh walks every active source, ingests new items and reply threads
//! under rate-limit governance, commits once, then fans out per-reply
//! analysis jobs. See [`engine::SyncEngine`] for the core loop.

pub mod analyze;
pub mod engine;
pub mod enrich;
pub mod governor;
pub mod jobs;
pub mod media;
pub mod refresh;
pub mod replies;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use analyze::{AnalysisOutcome, ReplyAnalyzer};
pub use engine::{RefreshReport, SyncEngine};
pub use enrich::EnrichDispatcher;
pub use governor::{FeedAction, FetchScope, RetryGovernor};
pub use jobs::{Job, JobWorker, QueueHandle};
pub use refresh::{ItemMode, RefreshSpec, ReplyMode};
