use std::time::Duration;

use risk_insight::MAX_ABSTRACTS;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Service settings resolved from the environment at startup. The two stage
/// timeouts are budgeted so a request stays well inside the ~90s end-to-end
/// target.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub model: String,
    pub search_timeout: Duration,
    pub inference_timeout: Duration,
    pub max_abstracts: usize,
    /// Override for the E-utilities endpoint, mainly for local stubs.
    pub pubmed_base_url: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            search_timeout: env_secs("SEARCH_TIMEOUT_SECS", 15),
            inference_timeout: env_secs("INFERENCE_TIMEOUT_SECS", 60),
            max_abstracts: std::env::var("MAX_ABSTRACTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(MAX_ABSTRACTS),
            pubmed_base_url: std::env::var("PUBMED_BASE_URL").ok(),
        }
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            model: DEFAULT_MODEL.to_string(),
            search_timeout: Duration::from_secs(15),
            inference_timeout: Duration::from_secs(60),
            max_abstracts: MAX_ABSTRACTS,
            pubmed_base_url: None,
        }
    }
}
