use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved channel as the bridge reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: i64,
    pub handle: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Pagination parameters for an ascending message walk.
///
/// `min_id` and `offset_date` are alternatives: a cursor walk fetches
/// strictly-newer messages, a backfill walk starts from a date boundary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_date: Option<DateTime<Utc>>,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollAnswer {
    pub text: String,
    pub option: String,
}

/// Closed set of attachment payloads the bridge can deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteAttachment {
    Photo {
        #[serde(default)]
        id: Option<i64>,
        #[serde(default)]
        ttl_seconds: Option<i64>,
    },
    /// Document family: plain files plus video/audio/voice/gif/video-note,
    /// distinguished by the attribute flags.
    Document {
        #[serde(default)]
        id: Option<i64>,
        #[serde(default)]
        mime_type: Option<String>,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        duration_secs: Option<f64>,
        #[serde(default)]
        animated: bool,
        #[serde(default)]
        video: bool,
        #[serde(default)]
        audio: bool,
        #[serde(default)]
        voice: bool,
        #[serde(default)]
        round: bool,
    },
    Poll {
        question: String,
        answers: Vec<PollAnswer>,
        #[serde(default)]
        closed: bool,
        #[serde(default)]
        quiz: bool,
        #[serde(default)]
        total_voters: Option<i64>,
    },
    Webpage {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        display_url: Option<String>,
        #[serde(default)]
        page_type: Option<String>,
        #[serde(default)]
        site_name: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    Geo {
        latitude: f64,
        longitude: f64,
    },
    Contact {
        #[serde(default)]
        phone_number: Option<String>,
        #[serde(default)]
        first_name: Option<String>,
        #[serde(default)]
        last_name: Option<String>,
    },
    Game {
        #[serde(default)]
        title: Option<String>,
    },
    Invoice {
        #[serde(default)]
        title: Option<String>,
    },
    Dice {
        emoticon: String,
        #[serde(default)]
        value: Option<i64>,
    },
    Unsupported,
}

/// One reaction as the bridge reports it: either a plain emoji or a
/// custom-emoji document reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteReaction {
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub custom_emoji_id: Option<i64>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAuthor {
    pub id: i64,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl RemoteAuthor {
    /// Full name as the original presents it, or None when both parts are empty.
    pub fn full_name(&self) -> Option<String> {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// A message as delivered by the bridge — either a top-level post or a reply,
/// depending on which endpoint produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub edit_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachment: Option<RemoteAttachment>,
    #[serde(default)]
    pub reactions: Vec<RemoteReaction>,
    #[serde(default)]
    pub views: Option<i64>,
    #[serde(default)]
    pub forwards: Option<i64>,
    /// Remote-reported reply total. Informational only: the pipeline's own
    /// reply counter is maintained from locally inserted rows.
    #[serde(default)]
    pub reply_count: Option<i64>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub author_signature: Option<String>,
    #[serde(default)]
    pub author: Option<RemoteAuthor>,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub grouped_id: Option<i64>,
    /// Service/system messages (joins, pins, etc.) carry no content.
    #[serde(default)]
    pub service: bool,
}

impl RemoteMessage {
    /// Non-content messages are filtered out of ingestion entirely.
    pub fn is_content(&self) -> bool {
        if self.service {
            return false;
        }
        self.text.as_deref().is_some_and(|t| !t.is_empty()) || self.attachment.is_some()
    }
}

/// Envelope for batch-get: missing ids come back as null entries.
#[derive(Debug, Deserialize)]
pub(crate) struct BatchMessages {
    pub messages: Vec<Option<RemoteMessage>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagePage {
    pub messages: Vec<RemoteMessage>,
}
