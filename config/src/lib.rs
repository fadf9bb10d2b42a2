//! Configuration for the Dowse pipeline.
//!
//! All options are optional in the serialized form; defaults live here as
//! associated constants with accessor methods. `Config::validate` runs once
//! at pipeline construction and rejects out-of-range values; after that the
//! accessors are the source of truth.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Fatal, constructor-time configuration error.
#[derive(Debug, Error)]
#[error("invalid config: {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Pipeline configuration. Maps to the top level of `dowse.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Credential for the LLM provider.
    pub llm_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible chat-completions API.
    pub llm_base_url: Option<String>,

    /// Model identifier string.
    pub llm_model: Option<String>,

    /// Sampling temperature in [0, 2]. Default: 0.3.
    pub llm_temperature: Option<f64>,

    /// Per-call LLM timeout in seconds. Default: 60.
    pub llm_timeout_seconds: Option<u64>,

    /// Concurrent LLM calls across the relevance and summarize phases.
    /// Default: 4.
    pub llm_max_concurrent_calls: Option<usize>,

    /// Max-token caps per phase call.
    #[serde(default)]
    pub llm_tokens: LlmTokens,

    /// Base URL of the web-search API.
    pub search_base_url: Option<String>,

    /// Sub-queries produced by the expand phase. Default: 3.
    pub num_better_queries: Option<usize>,

    /// Result cap requested from the search client per sub-query. Default: 5.
    pub max_results_per_query: Option<usize>,

    /// Candidate cap after dedup and URL filtering. Default: 10.
    pub total_max_results: Option<usize>,

    /// Relevance threshold in [0, 5]; candidates below it are dropped.
    /// Default: 3.
    pub min_relevance_score: Option<u8>,

    /// Domain blocklist, suffix-matched against hosts.
    #[serde(default)]
    pub disallowed_domains: Vec<String>,

    /// Global HTTP fetch concurrency. Default: 5.
    pub max_concurrent_fetches: Option<usize>,

    /// Minimum seconds between fetches to the same origin. Default: 1.0.
    pub per_domain_delay: Option<f64>,

    /// Total HTTP fetch timeout in seconds. Default: 20.
    pub fetch_timeout: Option<u64>,

    /// User-agent for page and robots.txt requests.
    pub user_agent: Option<String>,

    /// Extraction truncation cap, in characters. Default: 20000.
    pub max_content_chars: Option<usize>,

    /// Whether the content cache is active. Default: true.
    pub cache_enabled: Option<bool>,

    /// Content cache directory.
    pub cache_directory: Option<PathBuf>,

    /// Prompt template file; the bundled templates are used when unset.
    pub prompts_path: Option<PathBuf>,

    /// Log verbosity, as a tracing filter directive. Default: "info".
    pub log_level: Option<String>,
}

/// Max-token caps for the four LLM-calling phases.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTokens {
    pub expand_queries: u32,
    pub relevance_score: u32,
    pub summarize_content: u32,
    pub merge_summaries: u32,
}

impl Default for LlmTokens {
    fn default() -> Self {
        Self {
            expand_queries: 256,
            relevance_score: 16,
            summarize_content: 512,
            merge_summaries: 1024,
        }
    }
}

impl Config {
    pub const DEFAULT_LLM_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_LLM_MODEL: &'static str = "gpt-4o-mini";
    pub const DEFAULT_LLM_TEMPERATURE: f64 = 0.3;
    pub const DEFAULT_LLM_TIMEOUT_SECONDS: u64 = 60;
    pub const DEFAULT_LLM_MAX_CONCURRENT_CALLS: usize = 4;
    pub const DEFAULT_NUM_BETTER_QUERIES: usize = 3;
    pub const DEFAULT_MAX_RESULTS_PER_QUERY: usize = 5;
    pub const DEFAULT_TOTAL_MAX_RESULTS: usize = 10;
    pub const DEFAULT_MIN_RELEVANCE_SCORE: u8 = 3;
    pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;
    pub const DEFAULT_PER_DOMAIN_DELAY: f64 = 1.0;
    pub const DEFAULT_FETCH_TIMEOUT: u64 = 20;
    pub const DEFAULT_USER_AGENT: &'static str = "dowse/0.1";
    pub const DEFAULT_MAX_CONTENT_CHARS: usize = 20_000;
    pub const DEFAULT_CACHE_DIRECTORY: &'static str = ".dowse/cache";
    pub const DEFAULT_LOG_LEVEL: &'static str = "info";

    /// Parse a TOML document into a `Config`. Validation is separate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::new("config", e.to_string()))
    }

    /// Reject out-of-range values. Run once before pipeline construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(key) = &self.llm_api_key
            && key.trim().is_empty()
        {
            return Err(ConfigError::new("llm_api_key", "must not be empty"));
        }
        let temperature = self.llm_temperature();
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::new(
                "llm_temperature",
                format!("must be in [0, 2], got {temperature}"),
            ));
        }
        if self.llm_timeout_seconds() == 0 {
            return Err(ConfigError::new("llm_timeout_seconds", "must be positive"));
        }
        if self.llm_max_concurrent_calls() == 0 {
            return Err(ConfigError::new(
                "llm_max_concurrent_calls",
                "must be at least 1",
            ));
        }
        if self.num_better_queries() == 0 {
            return Err(ConfigError::new("num_better_queries", "must be at least 1"));
        }
        if self.max_results_per_query() == 0 {
            return Err(ConfigError::new(
                "max_results_per_query",
                "must be at least 1",
            ));
        }
        if self.total_max_results() == 0 {
            return Err(ConfigError::new("total_max_results", "must be at least 1"));
        }
        if self.min_relevance_score() > 5 {
            return Err(ConfigError::new(
                "min_relevance_score",
                format!("must be in [0, 5], got {}", self.min_relevance_score()),
            ));
        }
        if self.max_concurrent_fetches() == 0 {
            return Err(ConfigError::new(
                "max_concurrent_fetches",
                "must be at least 1",
            ));
        }
        let delay = self.per_domain_delay_seconds();
        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigError::new(
                "per_domain_delay",
                format!("must be a non-negative number, got {delay}"),
            ));
        }
        if self.fetch_timeout_seconds() == 0 {
            return Err(ConfigError::new("fetch_timeout", "must be positive"));
        }
        if self.max_content_chars() == 0 {
            return Err(ConfigError::new("max_content_chars", "must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn llm_api_key(&self) -> &str {
        self.llm_api_key.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn llm_base_url(&self) -> &str {
        self.llm_base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_LLM_BASE_URL)
    }

    #[must_use]
    pub fn llm_model(&self) -> &str {
        self.llm_model.as_deref().unwrap_or(Self::DEFAULT_LLM_MODEL)
    }

    #[must_use]
    pub fn llm_temperature(&self) -> f64 {
        self.llm_temperature
            .unwrap_or(Self::DEFAULT_LLM_TEMPERATURE)
    }

    #[must_use]
    pub fn llm_timeout_seconds(&self) -> u64 {
        self.llm_timeout_seconds
            .unwrap_or(Self::DEFAULT_LLM_TIMEOUT_SECONDS)
    }

    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds())
    }

    #[must_use]
    pub fn llm_max_concurrent_calls(&self) -> usize {
        self.llm_max_concurrent_calls
            .unwrap_or(Self::DEFAULT_LLM_MAX_CONCURRENT_CALLS)
    }

    #[must_use]
    pub fn search_base_url(&self) -> &str {
        self.search_base_url.as_deref().unwrap_or("")
    }

    #[must_use]
    pub fn num_better_queries(&self) -> usize {
        self.num_better_queries
            .unwrap_or(Self::DEFAULT_NUM_BETTER_QUERIES)
    }

    #[must_use]
    pub fn max_results_per_query(&self) -> usize {
        self.max_results_per_query
            .unwrap_or(Self::DEFAULT_MAX_RESULTS_PER_QUERY)
    }

    #[must_use]
    pub fn total_max_results(&self) -> usize {
        self.total_max_results
            .unwrap_or(Self::DEFAULT_TOTAL_MAX_RESULTS)
    }

    #[must_use]
    pub fn min_relevance_score(&self) -> u8 {
        self.min_relevance_score
            .unwrap_or(Self::DEFAULT_MIN_RELEVANCE_SCORE)
    }

    #[must_use]
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches
            .unwrap_or(Self::DEFAULT_MAX_CONCURRENT_FETCHES)
    }

    #[must_use]
    pub fn per_domain_delay_seconds(&self) -> f64 {
        self.per_domain_delay
            .unwrap_or(Self::DEFAULT_PER_DOMAIN_DELAY)
    }

    #[must_use]
    pub fn per_domain_delay(&self) -> Duration {
        Duration::from_secs_f64(self.per_domain_delay_seconds().max(0.0))
    }

    #[must_use]
    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.fetch_timeout.unwrap_or(Self::DEFAULT_FETCH_TIMEOUT)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds())
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(Self::DEFAULT_USER_AGENT)
    }

    #[must_use]
    pub fn max_content_chars(&self) -> usize {
        self.max_content_chars
            .unwrap_or(Self::DEFAULT_MAX_CONTENT_CHARS)
    }

    #[must_use]
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled.unwrap_or(true)
    }

    #[must_use]
    pub fn cache_directory(&self) -> PathBuf {
        self.cache_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CACHE_DIRECTORY))
    }

    #[must_use]
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(Self::DEFAULT_LOG_LEVEL)
    }
}
