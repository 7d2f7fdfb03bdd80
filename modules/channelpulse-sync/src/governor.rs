// Rate-limit governance: pure classification of feed errors into actions.
// All waiting happens at the call site, never in here.

use std::time::Duration;

use feed_client::FeedError;

/// Extra wait added on top of the server-requested backoff.
const RETRY_MARGIN: Duration = Duration::from_secs(10);
/// Rate-limit retries per unit of work before giving up on it.
const MAX_RATE_LIMIT_RETRIES: u32 = 2;

/// What the fetch was for. Source-level failures and per-thread failures
/// call for different recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchScope {
    /// Resolving a source or fetching its top-level items.
    Source,
    /// Fetching the reply thread of one item.
    Thread,
}

/// The governor's verdict for one failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedAction {
    /// Wait this long, then retry the same unit.
    RetryAfter(Duration),
    /// The source is gone or access was revoked. Stop syncing it.
    DeactivateSource,
    /// Give up on this unit of work, keep going with the rest.
    SkipUnit,
    /// Unexpected failure. Propagate to the task level.
    Escalate,
}

/// Maps feed errors onto retry/skip/deactivate decisions.
pub struct RetryGovernor {
    max_retries: u32,
    margin: Duration,
}

impl Default for RetryGovernor {
    fn default() -> Self {
        Self {
            max_retries: MAX_RATE_LIMIT_RETRIES,
            margin: RETRY_MARGIN,
        }
    }
}

impl RetryGovernor {
    /// Classify one failure. `attempt` counts prior retries of the same unit,
    /// starting at zero.
    pub fn classify(&self, scope: FetchScope, error: &FeedError, attempt: u32) -> FeedAction {
        match error {
            FeedError::RateLimited { retry_after } => {
                if attempt < self.max_retries {
                    FeedAction::RetryAfter(*retry_after + self.margin)
                } else {
                    FeedAction::SkipUnit
                }
            }
            FeedError::AccessDenied(_) | FeedError::NotFound(_) => match scope {
                FetchScope::Source => FeedAction::DeactivateSource,
                // A vanished parent message only dooms its own thread.
                FetchScope::Thread => FeedAction::SkipUnit,
            },
            FeedError::Network(_) | FeedError::Api { .. } | FeedError::Parse(_) => match scope {
                FetchScope::Source => FeedAction::Escalate,
                FetchScope::Thread => FeedAction::SkipUnit,
            },
        }
    }
}

/// Exponential task-level backoff: base doubled per prior attempt.
pub fn task_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}
