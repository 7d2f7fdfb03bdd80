pub mod error;

pub use error::{LlmError, Result};

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Knobs for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a strict-JSON response body.
    pub expect_json: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
pub struct LlmClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| LlmError::Parse(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Run one single-turn completion and return the raw text content.
    pub async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %params.model, expect_json = params.expect_json, "LLM completion request");

        let request = ChatRequest {
            model: &params.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            response_format: params.expect_json.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::Empty)
    }
}

/// Strip a wrapping markdown code fence (``` or ```json) from a completion.
/// Models routinely wrap JSON in fences even when asked not to.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let fenced = "```json\n{\"topics\": []}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"topics\": []}");
    }

    #[test]
    fn strips_bare_fence() {
        let fenced = "```\n{}\n```";
        assert_eq!(strip_code_fences(fenced), "{}");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }
}
