// Media normalization: collapse the remote attachment zoo into a stable
// (kind, info) pair that survives schema drift on the remote side.

use serde_json::{json, Value};

use channelpulse_common::Reaction;
use feed_client::{RemoteAttachment, RemoteMessage, RemoteReaction};

/// Canonical attachment categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Video,
    Animation,
    Audio,
    Voice,
    VideoNote,
    Document,
    Poll,
    Webpage,
    Geo,
    Contact,
    Game,
    Invoice,
    Dice,
    Unsupported,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Animation => "animation",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::VideoNote => "video_note",
            Self::Document => "document",
            Self::Poll => "poll",
            Self::Webpage => "webpage",
            Self::Geo => "geo",
            Self::Contact => "contact",
            Self::Game => "game",
            Self::Invoice => "invoice",
            Self::Dice => "dice",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Normalize one attachment into its category and a JSON detail blob.
///
/// The document family fans out by attribute flags; precedence is
/// round > animated > voice > audio > video, then plain document.
pub fn normalize_attachment(attachment: &RemoteAttachment) -> (AttachmentKind, Value) {
    match attachment {
        RemoteAttachment::Photo { id, ttl_seconds } => (
            AttachmentKind::Photo,
            json!({ "id": id, "ttl_seconds": ttl_seconds }),
        ),
        RemoteAttachment::Document {
            id,
            mime_type,
            filename,
            duration_secs,
            animated,
            video,
            audio,
            voice,
            round,
        } => {
            let kind = if *round {
                AttachmentKind::VideoNote
            } else if *animated {
                AttachmentKind::Animation
            } else if *voice {
                AttachmentKind::Voice
            } else if *audio {
                AttachmentKind::Audio
            } else if *video {
                AttachmentKind::Video
            } else {
                AttachmentKind::Document
            };
            let info = json!({
                "id": id,
                "mime_type": mime_type,
                "filename": filename,
                "duration_secs": duration_secs,
            });
            (kind, info)
        }
        RemoteAttachment::Poll {
            question,
            answers,
            closed,
            quiz,
            total_voters,
        } => (
            AttachmentKind::Poll,
            json!({
                "question": question,
                "answers": answers.iter().map(|a| a.text.clone()).collect::<Vec<_>>(),
                "closed": closed,
                "quiz": quiz,
                "total_voters": total_voters,
            }),
        ),
        RemoteAttachment::Webpage {
            url,
            display_url,
            page_type,
            site_name,
            title,
            description,
        } => (
            AttachmentKind::Webpage,
            json!({
                "url": url,
                "display_url": display_url,
                "page_type": page_type,
                "site_name": site_name,
                "title": title,
                "description": description,
            }),
        ),
        RemoteAttachment::Geo {
            latitude,
            longitude,
        } => (
            AttachmentKind::Geo,
            json!({ "latitude": latitude, "longitude": longitude }),
        ),
        RemoteAttachment::Contact {
            phone_number,
            first_name,
            last_name,
        } => (
            AttachmentKind::Contact,
            json!({
                "phone_number": phone_number,
                "first_name": first_name,
                "last_name": last_name,
            }),
        ),
        RemoteAttachment::Game { title } => (AttachmentKind::Game, json!({ "title": title })),
        RemoteAttachment::Invoice { title } => {
            (AttachmentKind::Invoice, json!({ "title": title }))
        }
        RemoteAttachment::Dice { emoticon, value } => (
            AttachmentKind::Dice,
            json!({ "emoticon": emoticon, "value": value }),
        ),
        RemoteAttachment::Unsupported => (AttachmentKind::Unsupported, json!({})),
    }
}

/// Flatten reactions into labeled counts, preserving remote order.
/// Custom emoji become `custom_<id>` labels. Empty input yields None.
pub fn normalize_reactions(reactions: &[RemoteReaction]) -> Option<Value> {
    if reactions.is_empty() {
        return None;
    }
    let labeled: Vec<Reaction> = reactions
        .iter()
        .map(|r| Reaction {
            label: match (&r.emoji, r.custom_emoji_id) {
                (Some(emoji), _) if !emoji.is_empty() => emoji.clone(),
                (_, Some(id)) => format!("custom_{id}"),
                _ => "unknown".to_string(),
            },
            count: r.count,
        })
        .collect();
    serde_json::to_value(labeled).ok()
}

/// Split message text into (body, caption): text alongside an attachment is
/// a caption, text alone is a body. The two are mutually exclusive.
pub fn split_text(message: &RemoteMessage) -> (Option<String>, Option<String>) {
    let text = message
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    if message.attachment.is_some() {
        (None, text)
    } else {
        (text, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(text: Option<&str>, attachment: Option<RemoteAttachment>) -> RemoteMessage {
        RemoteMessage {
            id: 1,
            date: Utc::now(),
            edit_date: None,
            text: text.map(str::to_string),
            attachment,
            reactions: vec![],
            views: None,
            forwards: None,
            reply_count: None,
            pinned: false,
            author_signature: None,
            author: None,
            reply_to_id: None,
            grouped_id: None,
            service: false,
        }
    }

    #[test]
    fn document_flags_pick_the_most_specific_kind() {
        let doc = |animated, video, audio, voice, round| RemoteAttachment::Document {
            id: Some(1),
            mime_type: None,
            filename: None,
            duration_secs: None,
            animated,
            video,
            audio,
            voice,
            round,
        };

        assert_eq!(normalize_attachment(&doc(false, true, false, false, true)).0, AttachmentKind::VideoNote);
        assert_eq!(normalize_attachment(&doc(true, true, false, false, false)).0, AttachmentKind::Animation);
        assert_eq!(normalize_attachment(&doc(false, false, false, true, false)).0, AttachmentKind::Voice);
        assert_eq!(normalize_attachment(&doc(false, false, true, false, false)).0, AttachmentKind::Audio);
        assert_eq!(normalize_attachment(&doc(false, true, false, false, false)).0, AttachmentKind::Video);
        assert_eq!(normalize_attachment(&doc(false, false, false, false, false)).0, AttachmentKind::Document);
    }

    #[test]
    fn poll_info_keeps_answer_texts() {
        let poll = RemoteAttachment::Poll {
            question: "Best day?".into(),
            answers: vec![
                feed_client::PollAnswer { text: "Mon".into(), option: "0".into() },
                feed_client::PollAnswer { text: "Fri".into(), option: "1".into() },
            ],
            closed: false,
            quiz: false,
            total_voters: Some(12),
        };
        let (kind, info) = normalize_attachment(&poll);
        assert_eq!(kind, AttachmentKind::Poll);
        assert_eq!(info["answers"], json!(["Mon", "Fri"]));
    }

    #[test]
    fn custom_emoji_reactions_get_stable_labels() {
        let reactions = vec![
            RemoteReaction { emoji: Some("👍".into()), custom_emoji_id: None, count: 4 },
            RemoteReaction { emoji: None, custom_emoji_id: Some(987), count: 2 },
        ];
        let value = normalize_reactions(&reactions).unwrap();
        assert_eq!(value[0]["label"], "👍");
        assert_eq!(value[1]["label"], "custom_987");
        assert_eq!(value[1]["count"], 2);
    }

    #[test]
    fn empty_reactions_are_none() {
        assert!(normalize_reactions(&[]).is_none());
    }

    #[test]
    fn text_with_attachment_becomes_caption() {
        let msg = message(Some("look at this"), Some(RemoteAttachment::Photo { id: None, ttl_seconds: None }));
        assert_eq!(split_text(&msg), (None, Some("look at this".into())));

        let msg = message(Some("plain text"), None);
        assert_eq!(split_text(&msg), (Some("plain text".into()), None));

        let msg = message(Some("   "), None);
        assert_eq!(split_text(&msg), (None, None));
    }
}
