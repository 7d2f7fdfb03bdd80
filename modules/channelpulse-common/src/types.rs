use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Reactions ---

/// One reaction label with its count, in the order the remote API reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub label: String,
    pub count: i64,
}

// --- Persisted rows ---

/// A monitored channel. The external id doubles as the primary key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub handle: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub active: bool,
    /// Highest external message id confirmed ingested. Advanced only by
    /// new-items-only refreshes, monotonically.
    pub last_processed_cursor: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A top-level published post belonging to a Source.
///
/// `body` and `caption` are mutually exclusive: a message with an attachment
/// stores its text as `caption`, a plain message stores it as `body`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub external_id: i64,
    pub source_id: i64,
    pub body: Option<String>,
    pub caption: Option<String>,
    pub attachment_kind: Option<String>,
    pub attachment_info: Option<serde_json::Value>,
    pub views: Option<i64>,
    pub forwards: Option<i64>,
    /// Pipeline-maintained cache of ingested replies. Incremented by the
    /// reply collector, overwritten by a stats refresh, never decremented
    /// by ingestion.
    pub reply_count: i64,
    pub reactions: Option<serde_json::Value>,
    pub pinned: bool,
    pub author_signature: Option<String>,
    pub grouped_id: Option<i64>,
    pub reply_to_external_id: Option<i64>,
    pub published_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A threaded response to an Item.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reply {
    pub id: i64,
    pub external_id: i64,
    pub item_id: i64,
    pub author_id: Option<i64>,
    pub author_handle: Option<String>,
    pub author_name: Option<String>,
    pub body: Option<String>,
    pub caption: Option<String>,
    pub attachment_kind: Option<String>,
    pub attachment_info: Option<serde_json::Value>,
    pub reactions: Option<serde_json::Value>,
    pub reply_to_external_id: Option<i64>,
    pub published_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub topics: Option<serde_json::Value>,
    pub problems: Option<serde_json::Value>,
    pub questions: Option<serde_json::Value>,
    pub suggestions: Option<serde_json::Value>,
    /// Set exactly once by the enrichment stage; unset means "still eligible".
    pub analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reply {
    /// Text the analysis job sees: body, with the caption appended when both
    /// are present.
    pub fn analysis_text(&self) -> String {
        match (&self.body, &self.caption) {
            (Some(b), Some(c)) => format!("{b}\n[attachment caption]: {c}").trim().to_string(),
            (Some(b), None) => b.trim().to_string(),
            (None, Some(c)) => c.trim().to_string(),
            (None, None) => String::new(),
        }
    }

    /// Display name for presentation: handle > full name > User_<id> > Unknown.
    pub fn author_display(&self) -> String {
        if let Some(handle) = self.author_handle.as_deref().filter(|h| !h.is_empty()) {
            return format!("@{handle}");
        }
        if let Some(name) = self.author_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        match self.author_id {
            Some(id) => format!("User_{id}"),
            None => "Unknown".to_string(),
        }
    }
}

// --- Enrichment output ---

/// Structured features extracted from one reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyFeatures {
    pub topics: Vec<String>,
    pub problems: Vec<String>,
    pub questions: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ReplyFeatures {
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
            && self.problems.is_empty()
            && self.questions.is_empty()
            && self.suggestions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reply() -> Reply {
        Reply {
            id: 1,
            external_id: 10,
            item_id: 1,
            author_id: None,
            author_handle: None,
            author_name: None,
            body: None,
            caption: None,
            attachment_kind: None,
            attachment_info: None,
            reactions: None,
            reply_to_external_id: None,
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            edited_at: None,
            topics: None,
            problems: None,
            questions: None,
            suggestions: None,
            analyzed_at: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn author_display_prefers_handle() {
        let mut r = reply();
        r.author_id = Some(42);
        r.author_name = Some("Ada Lovelace".into());
        r.author_handle = Some("ada".into());
        assert_eq!(r.author_display(), "@ada");

        r.author_handle = None;
        assert_eq!(r.author_display(), "Ada Lovelace");

        r.author_name = None;
        assert_eq!(r.author_display(), "User_42");

        r.author_id = None;
        assert_eq!(r.author_display(), "Unknown");
    }

    #[test]
    fn analysis_text_joins_body_and_caption() {
        let mut r = reply();
        r.body = Some("main text".into());
        r.caption = Some("photo caption".into());
        assert_eq!(r.analysis_text(), "main text\n[attachment caption]: photo caption");

        r.caption = None;
        assert_eq!(r.analysis_text(), "main text");

        r.body = None;
        assert_eq!(r.analysis_text(), "");
    }
}
