// Feature extraction for a single reply.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use channelpulse_common::{ChannelPulseError, ReplyFeatures};
use llm_client::{strip_code_fences, CompletionParams};

use crate::traits::{EnrichStore, TextCompleter};

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 500;

/// What happened to one analysis job.
#[derive(Debug, PartialEq)]
pub enum AnalysisOutcome {
    /// Features extracted and saved.
    Analyzed(ReplyFeatures),
    /// No text to analyze. Saved with empty features, terminal.
    EmptyText,
    /// A previous run already handled this reply.
    AlreadyAnalyzed,
    /// The reply row no longer exists.
    Missing,
}

pub struct ReplyAnalyzer {
    store: Arc<dyn EnrichStore>,
    completer: Arc<dyn TextCompleter>,
    model: String,
    max_prompt_len: usize,
}

impl ReplyAnalyzer {
    pub fn new(
        store: Arc<dyn EnrichStore>,
        completer: Arc<dyn TextCompleter>,
        model: String,
        max_prompt_len: usize,
    ) -> Self {
        Self {
            store,
            completer,
            model,
            max_prompt_len,
        }
    }

    /// Analyze one reply and persist the result.
    ///
    /// Failures leave `analyzed_at` unset, so the reply stays eligible for
    /// the next dispatch. An empty-text reply is marked analyzed with empty
    /// features instead of erroring forever.
    pub async fn analyze(&self, reply_id: i64) -> Result<AnalysisOutcome> {
        let Some(reply) = self.store.reply_by_id(reply_id).await? else {
            debug!(reply_id, "Reply vanished before analysis");
            return Ok(AnalysisOutcome::Missing);
        };
        if reply.analyzed_at.is_some() {
            return Ok(AnalysisOutcome::AlreadyAnalyzed);
        }

        let text = reply.analysis_text();
        if text.is_empty() {
            self.store
                .save_reply_features(reply_id, &ReplyFeatures::default())
                .await?;
            return Ok(AnalysisOutcome::EmptyText);
        }

        let truncated: String = text.chars().take(self.max_prompt_len).collect();
        let params = CompletionParams {
            model: self.model.clone(),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            expect_json: true,
        };
        let raw = self
            .completer
            .complete(&build_prompt(&truncated), &params)
            .await
            .with_context(|| format!("completing analysis for reply {reply_id}"))?;

        let features = parse_features(&raw)?;
        self.store.save_reply_features(reply_id, &features).await?;

        info!(
            reply_id,
            topics = features.topics.len(),
            problems = features.problems.len(),
            questions = features.questions.len(),
            suggestions = features.suggestions.len(),
            "Reply analyzed"
        );
        Ok(AnalysisOutcome::Analyzed(features))
    }
}

fn build_prompt(text: &str) -> String {
    format!(
        "Analyze the following message from a public discussion thread.\n\
         Extract:\n\
         - topics: the subjects the message is about, as short phrases\n\
         - problems: concrete problems or complaints it raises\n\
         - questions: questions it asks\n\
         - suggestions: proposals or suggestions it makes\n\n\
         Respond with a JSON object with exactly these four keys, each a list \
         of short strings. Use empty lists for anything absent. No prose.\n\n\
         Message:\n{text}"
    )
}

/// Parse and validate the model's response. All four keys must be present,
/// each a list of strings; anything else is a failure and the reply stays
/// eligible for retry.
pub(crate) fn parse_features(raw: &str) -> Result<ReplyFeatures, ChannelPulseError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(cleaned)
        .map_err(|e| ChannelPulseError::Analysis(format!("malformed analysis response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_response() {
        let raw = r#"{"topics": ["parking"], "problems": ["no spots"], "questions": [], "suggestions": ["add a lot"]}"#;
        let features = parse_features(raw).unwrap();
        assert_eq!(features.topics, vec!["parking"]);
        assert_eq!(features.suggestions, vec!["add a lot"]);
        assert!(features.questions.is_empty());
    }

    #[test]
    fn parses_fenced_response() {
        let raw = "```json\n{\"topics\": [], \"problems\": [], \"questions\": [], \"suggestions\": []}\n```";
        assert!(parse_features(raw).unwrap().is_empty());
    }

    #[test]
    fn missing_key_is_rejected() {
        let raw = r#"{"topics": [], "problems": [], "questions": []}"#;
        assert!(parse_features(raw).is_err());
    }

    #[test]
    fn non_list_value_is_rejected() {
        let raw = r#"{"topics": "parking", "problems": [], "questions": [], "suggestions": []}"#;
        assert!(parse_features(raw).is_err());
    }

    #[test]
    fn prose_is_rejected() {
        assert!(parse_features("Sure! Here is the analysis you asked for.").is_err());
    }
}
