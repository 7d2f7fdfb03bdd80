use std::env;

use chrono::{DateTime, NaiveDate, Utc};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Feed bridge API
    pub feed_base_url: String,
    pub feed_api_token: String,

    // LLM provider
    pub llm_api_key: String,
    pub llm_api_url: String,
    pub llm_model: String,

    // Fetch policy
    pub item_fetch_limit: u32,
    pub reply_fetch_limit: u32,
    /// Where a first-ever sync starts when the source has no cursor yet.
    pub initial_lookback: Option<DateTime<Utc>>,

    // Enrichment policy
    pub analysis_batch_size: u32,
    pub max_prompt_len: usize,

    // Worker schedule
    /// Minutes between automatic refreshes in worker mode.
    pub refresh_interval_mins: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            feed_base_url: required_env("FEED_BASE_URL"),
            feed_api_token: required_env("FEED_API_TOKEN"),
            llm_api_key: required_env("LLM_API_KEY"),
            llm_api_url: env::var("LLM_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            item_fetch_limit: parsed_env("ITEM_FETCH_LIMIT", 25),
            reply_fetch_limit: parsed_env("REPLY_FETCH_LIMIT", 200),
            initial_lookback: env::var("INITIAL_LOOKBACK_DATE")
                .ok()
                .map(|s| parse_lookback(&s)),
            analysis_batch_size: parsed_env("ANALYSIS_BATCH_SIZE", 100),
            max_prompt_len: parsed_env("MAX_PROMPT_LEN", 3800),
            refresh_interval_mins: parsed_env("REFRESH_INTERVAL_MINS", 15),
        }
    }

    /// Log the non-secret parts of the config at startup.
    pub fn log_redacted(&self) {
        tracing::info!(
            feed_base_url = %self.feed_base_url,
            llm_api_url = %self.llm_api_url,
            llm_model = %self.llm_model,
            item_fetch_limit = self.item_fetch_limit,
            reply_fetch_limit = self.reply_fetch_limit,
            analysis_batch_size = self.analysis_batch_size,
            refresh_interval_mins = self.refresh_interval_mins,
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a number: {e:?}")),
        Err(_) => default,
    }
}

fn parse_lookback(raw: &str) -> DateTime<Utc> {
    let date: NaiveDate = raw
        .parse()
        .unwrap_or_else(|_| panic!("INITIAL_LOOKBACK_DATE must be YYYY-MM-DD, got '{raw}'"));
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}
