// Refresh specifications: what a single sync invocation should do.

use chrono::{DateTime, Duration, Utc};

use channelpulse_common::ChannelPulseError;

/// Default page size for top-level item fetches.
pub const DEFAULT_ITEM_LIMIT: u32 = 25;
/// Default cap on replies collected per item.
pub const DEFAULT_REPLY_LIMIT: u32 = 200;

/// How top-level items are fetched for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemMode {
    /// Fetch only items newer than the stored cursor. The only mode that
    /// advances the cursor.
    NewOnly,
    /// Backfill items published within the last N days. Cursor untouched.
    LastDays(u32),
    /// Backfill items published at or after a fixed date. Cursor untouched.
    SinceDate(DateTime<Utc>),
    /// Refresh engagement counters on already-stored items. No new items,
    /// cursor untouched.
    StatsOnly,
}

/// Which items get their reply threads collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// Only items inserted by this invocation.
    #[default]
    NewItemsOnly,
    /// Every stored item of the source, new and old.
    AddNewToExisting,
    /// No reply collection at all.
    Skip,
}

/// A validated refresh request.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSpec {
    /// Sources to sync; empty means every active source.
    pub sources: Vec<i64>,
    pub item_mode: ItemMode,
    pub reply_mode: ReplyMode,
    /// Page size for item fetches.
    pub item_limit: u32,
    /// Cap on replies fetched per item.
    pub reply_limit: u32,
    /// In backfill modes, overwrite counters on items already stored.
    pub update_existing: bool,
    /// Fan newly inserted replies out to analysis after commit.
    pub dispatch_enrichment: bool,
}

impl Default for RefreshSpec {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            item_mode: ItemMode::NewOnly,
            reply_mode: ReplyMode::NewItemsOnly,
            item_limit: DEFAULT_ITEM_LIMIT,
            reply_limit: DEFAULT_REPLY_LIMIT,
            update_existing: false,
            dispatch_enrichment: true,
        }
    }
}

impl RefreshSpec {
    pub fn new(item_mode: ItemMode, reply_mode: ReplyMode) -> Self {
        Self {
            item_mode,
            reply_mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ChannelPulseError> {
        if self.item_limit == 0 {
            return Err(ChannelPulseError::Validation(
                "item_limit must be positive".into(),
            ));
        }
        if self.reply_limit == 0 && self.reply_mode != ReplyMode::Skip {
            return Err(ChannelPulseError::Validation(
                "reply_limit must be positive when replies are collected".into(),
            ));
        }
        match self.item_mode {
            ItemMode::LastDays(0) => Err(ChannelPulseError::Validation(
                "LastDays requires at least one day".into(),
            )),
            ItemMode::SinceDate(date) if date > Utc::now() => Err(ChannelPulseError::Validation(
                "SinceDate must not be in the future".into(),
            )),
            _ => Ok(()),
        }
    }

    /// The date boundary for a backfill walk, if this mode has one.
    pub fn backfill_boundary(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.item_mode {
            ItemMode::LastDays(days) => Some(now - Duration::days(i64::from(days))),
            ItemMode::SinceDate(date) => Some(date),
            ItemMode::NewOnly | ItemMode::StatsOnly => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_is_valid() {
        assert!(RefreshSpec::default().validate().is_ok());
    }

    #[test]
    fn zero_day_backfill_rejected() {
        let spec = RefreshSpec::new(ItemMode::LastDays(0), ReplyMode::Skip);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn future_since_date_rejected() {
        let spec = RefreshSpec::new(
            ItemMode::SinceDate(Utc::now() + Duration::days(1)),
            ReplyMode::Skip,
        );
        assert!(spec.validate().is_err());
    }

    #[test]
    fn zero_reply_limit_ok_when_skipping() {
        let mut spec = RefreshSpec::new(ItemMode::NewOnly, ReplyMode::Skip);
        spec.reply_limit = 0;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn backfill_boundary_matches_mode() {
        let now = Utc::now();
        let spec = RefreshSpec::new(ItemMode::LastDays(7), ReplyMode::Skip);
        assert_eq!(spec.backfill_boundary(now), Some(now - Duration::days(7)));

        assert_eq!(RefreshSpec::default().backfill_boundary(now), None);
    }
}
