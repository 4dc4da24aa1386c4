//! Environment configuration.
//!
//! | Variable | Default |
//! |---|---|
//! | `TENA_PORT` | 3000 |
//! | `TENA_DATABASE_URL` | `sqlite:tena.db?mode=rwc` |
//! | `TENA_CONTENT_DIR` | `data` |
//! | `TENA_LLM_PROVIDER` | `openai` (or `gemini`) |
//! | `TENA_LLM_API_KEY` | required |
//! | `TENA_LLM_MODEL` | provider default |
//! | `TENA_LLM_BASE_URL` | provider default |
//! | `TENA_LLM_TIMEOUT_SECS` | 20 |
//! | `TENA_CONVERSATION_MAX_AGE_HOURS` | 24 |
//! | `TENA_REAPER_INTERVAL_SECS` | 300 |
//! | `TENA_VALIDATE_SYMPTOMS` | true |

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};

use crate::gateway::gemini::DEFAULT_GEMINI_MODEL;
use crate::gateway::openai::DEFAULT_OPENAI_MODEL;
use crate::gateway::{GeminiGateway, LanguageModel, OpenAiGateway, TimedGateway};

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:tena.db?mode=rwc";

const DEFAULT_CONTENT_DIR: &str = "data";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_AGE_HOURS: i64 = 24;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 300;

/// Supported language-model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    fn parse(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            other => bail!("unknown TENA_LLM_PROVIDER '{other}', expected 'openai' or 'gemini'"),
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => DEFAULT_OPENAI_MODEL,
            Provider::Gemini => DEFAULT_GEMINI_MODEL,
        }
    }
}

/// Service configuration.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub content_dir: PathBuf,
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub llm_timeout: Duration,
    pub conversation_max_age: chrono::Duration,
    pub reaper_interval: Duration,
    pub validate_symptoms: bool,
}

// Hand-written so the API key never reaches logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("content_dir", &self.content_dir)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("llm_timeout", &self.llm_timeout)
            .field("conversation_max_age", &self.conversation_max_age)
            .field("reaper_interval", &self.reaper_interval)
            .field("validate_symptoms", &self.validate_symptoms)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(var("TENA_PORT"), "TENA_PORT", DEFAULT_PORT)?;
        let database_url = var("TENA_DATABASE_URL").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let content_dir = PathBuf::from(
            var("TENA_CONTENT_DIR").unwrap_or_else(|| DEFAULT_CONTENT_DIR.to_string()),
        );

        let provider = var("TENA_LLM_PROVIDER")
            .map(|p| Provider::parse(&p))
            .transpose()?
            .unwrap_or(Provider::OpenAi);
        let api_key = var("TENA_LLM_API_KEY").context("TENA_LLM_API_KEY must be set")?;
        let model = var("TENA_LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string());
        let base_url = var("TENA_LLM_BASE_URL");

        let timeout_secs = parse_or(
            var("TENA_LLM_TIMEOUT_SECS"),
            "TENA_LLM_TIMEOUT_SECS",
            DEFAULT_LLM_TIMEOUT_SECS,
        )?;
        let max_age_hours = parse_or(
            var("TENA_CONVERSATION_MAX_AGE_HOURS"),
            "TENA_CONVERSATION_MAX_AGE_HOURS",
            DEFAULT_MAX_AGE_HOURS,
        )?;
        let reaper_secs = parse_or(
            var("TENA_REAPER_INTERVAL_SECS"),
            "TENA_REAPER_INTERVAL_SECS",
            DEFAULT_REAPER_INTERVAL_SECS,
        )?;
        let validate_symptoms =
            parse_or(var("TENA_VALIDATE_SYMPTOMS"), "TENA_VALIDATE_SYMPTOMS", true)?;

        if timeout_secs == 0 || reaper_secs == 0 {
            bail!("TENA_LLM_TIMEOUT_SECS and TENA_REAPER_INTERVAL_SECS must be positive");
        }
        if max_age_hours <= 0 {
            bail!("TENA_CONVERSATION_MAX_AGE_HOURS must be positive");
        }

        Ok(Self {
            port,
            database_url,
            content_dir,
            provider,
            api_key,
            model,
            base_url,
            llm_timeout: Duration::from_secs(timeout_secs),
            conversation_max_age: chrono::Duration::hours(max_age_hours),
            reaper_interval: Duration::from_secs(reaper_secs),
            validate_symptoms,
        })
    }

    /// Build the configured provider adapter behind the deadline wrapper.
    pub fn build_gateway(&self) -> anyhow::Result<Arc<dyn LanguageModel>> {
        let inner: Arc<dyn LanguageModel> = match (self.provider, &self.base_url) {
            (Provider::OpenAi, Some(base)) => Arc::new(OpenAiGateway::with_base_url(
                base,
                &self.api_key,
                &self.model,
                self.llm_timeout,
            )?),
            (Provider::OpenAi, None) => {
                Arc::new(OpenAiGateway::new(&self.api_key, &self.model, self.llm_timeout)?)
            }
            (Provider::Gemini, Some(base)) => Arc::new(GeminiGateway::with_base_url(
                base,
                &self.api_key,
                &self.model,
                self.llm_timeout,
            )?),
            (Provider::Gemini, None) => {
                Arc::new(GeminiGateway::new(&self.api_key, &self.model, self.llm_timeout)?)
            }
        };

        Ok(Arc::new(TimedGateway::new(inner, self.llm_timeout)))
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display + Send + Sync + 'static,
{
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key} '{v}': {e}")),
        None => Ok(default),
    }
}
