//! Configuration management
//!
//! Everything is read from the environment once at startup and validated
//! before any component is constructed. Missing required settings are fatal;
//! optional settings fall back to documented defaults.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::warn;

use pw_types::{AppError, AppResult, ModelFilters};

/// Aggregator endpoint settings. Paths are configurable because the upstream
/// API surface is not pinned; the defaults match the public deployment.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub base_url: String,
    pub api_key: String,
    pub models_path: String,
    pub providers_path: String,
    pub completions_path: String,
}

/// Connection settings for one PostgREST-speaking store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub service_key: String,
}

/// Application configuration, fully resolved.
#[derive(Debug, Clone)]
pub struct Config {
    pub aggregator: AggregatorConfig,
    pub pricing_store: StoreConfig,
    /// Absent when projection credentials are not configured; the backend
    /// sync is disabled in that case.
    pub backend_store: Option<StoreConfig>,
    pub web_search_key: Option<String>,

    pub enable_provider_scraping: bool,
    pub run_interval_hours: u64,
    pub run_on_startup: bool,
    pub max_parallel_models: usize,
    pub price_change_threshold_percent: Decimal,
    pub request_timeout_seconds: u64,
    pub max_reasonable_price: Decimal,

    pub model_filters: ModelFilters,

    pub default_embedding_model_id: Option<String>,
    pub default_chat_model_id: Option<String>,

    pub trusted_price_domains: Vec<String>,
    pub backend_freshness_days: i64,
    pub byok_sample_size: usize,
    pub protected_models: Vec<String>,
}

/// Domains the generic web adapter is allowed to extract prices from:
/// provider documentation, provider blogs and aggregator docs.
const DEFAULT_TRUSTED_DOMAINS: &[&str] = &[
    "openai.com",
    "anthropic.com",
    "cohere.com",
    "ai.google.dev",
    "docs.mistral.ai",
    "mistral.ai",
    "groq.com",
    "together.ai",
    "fireworks.ai",
    "deepinfra.com",
    "replicate.com",
    "perplexity.ai",
    "openrouter.ai",
    "huggingface.co",
    "meta.com",
    "deepseek.com",
    "google.com",
    "microsoft.com",
    "azure.microsoft.com",
    "aws.amazon.com",
];

const DEFAULT_PROTECTED_MODELS: &[&str] = &["openai/text-embedding-3-large"];

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (test seam).
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let aggregator = AggregatorConfig {
            base_url: require(&lookup, "AGGREGATOR_URL")?,
            api_key: require(&lookup, "AGGREGATOR_KEY")?,
            models_path: optional(&lookup, "AGGREGATOR_MODELS_PATH")
                .unwrap_or_else(|| "/api/v1/models".to_string()),
            providers_path: optional(&lookup, "AGGREGATOR_PROVIDERS_PATH")
                .unwrap_or_else(|| "/api/v1/providers".to_string()),
            completions_path: optional(&lookup, "AGGREGATOR_COMPLETIONS_PATH")
                .unwrap_or_else(|| "/api/v1/chat/completions".to_string()),
        };

        let pricing_store = StoreConfig {
            url: require(&lookup, "PRICING_STORE_URL")?,
            service_key: require(&lookup, "PRICING_STORE_KEY")?,
        };

        let backend_store = match (
            optional(&lookup, "BACKEND_STORE_URL"),
            optional(&lookup, "BACKEND_STORE_KEY"),
        ) {
            (Some(url), Some(service_key)) => Some(StoreConfig { url, service_key }),
            (Some(_), None) | (None, Some(_)) => {
                warn!("backend store configuration incomplete, projection sync disabled");
                None
            }
            (None, None) => None,
        };

        let model_filters = ModelFilters {
            supported_parameters: csv(optional(&lookup, "MODEL_FILTER_SUPPORTED_PARAMETERS")),
            distillable: parse_opt_bool(&lookup, "MODEL_FILTER_DISTILLABLE")?,
            input_modalities: csv(optional(&lookup, "MODEL_FILTER_INPUT_MODALITIES")),
            output_modalities: csv(optional(&lookup, "MODEL_FILTER_OUTPUT_MODALITIES")),
        };

        let trusted_price_domains = match optional(&lookup, "TRUSTED_PRICE_DOMAINS") {
            Some(raw) => csv(Some(raw)),
            None => DEFAULT_TRUSTED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        };

        let protected_models = match optional(&lookup, "PROTECTED_MODEL_SLUGS") {
            Some(raw) => csv(Some(raw)),
            None => DEFAULT_PROTECTED_MODELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        let config = Self {
            aggregator,
            pricing_store,
            backend_store,
            web_search_key: optional(&lookup, "WEB_SEARCH_KEY"),
            enable_provider_scraping: parse_bool(&lookup, "ENABLE_PROVIDER_SCRAPING", false)?,
            run_interval_hours: parse_num(&lookup, "RUN_INTERVAL_HOURS", 24)?,
            run_on_startup: parse_bool(&lookup, "RUN_ON_STARTUP", true)?,
            max_parallel_models: parse_num(&lookup, "MAX_PARALLEL_MODELS", 10)?,
            price_change_threshold_percent: parse_decimal(
                &lookup,
                "PRICE_CHANGE_THRESHOLD_PERCENT",
                Decimal::from(30),
            )?,
            request_timeout_seconds: parse_num(&lookup, "REQUEST_TIMEOUT_SECONDS", 30)?,
            max_reasonable_price: parse_decimal(
                &lookup,
                "MAX_REASONABLE_PRICE_USD_PER_MILLION",
                Decimal::from(10_000),
            )?,
            model_filters,
            default_embedding_model_id: optional(&lookup, "DEFAULT_EMBEDDING_MODEL_ID"),
            default_chat_model_id: optional(&lookup, "DEFAULT_CHAT_MODEL_ID"),
            trusted_price_domains,
            backend_freshness_days: parse_num(&lookup, "BACKEND_FRESHNESS_DAYS", 7)?,
            byok_sample_size: parse_num(&lookup, "BYOK_SAMPLE_SIZE", 5)?,
            protected_models,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn backend_sync_enabled(&self) -> bool {
        self.backend_store.is_some()
    }

    fn validate(&self) -> AppResult<()> {
        if self.run_interval_hours == 0 {
            return Err(AppError::Config(
                "RUN_INTERVAL_HOURS must be at least 1".to_string(),
            ));
        }
        if self.max_parallel_models == 0 {
            return Err(AppError::Config(
                "MAX_PARALLEL_MODELS must be at least 1".to_string(),
            ));
        }
        if self.price_change_threshold_percent <= Decimal::ZERO {
            return Err(AppError::Config(
                "PRICE_CHANGE_THRESHOLD_PERCENT must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn require<F>(lookup: &F, key: &str) -> AppResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key)
        .ok_or_else(|| AppError::Config(format!("missing required setting {}", key)))
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn csv(raw: Option<String>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> AppResult<bool>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt_bool(lookup, key)?.unwrap_or(default))
}

fn parse_opt_bool<F>(lookup: &F, key: &str) -> AppResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, key) {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            other => Err(AppError::Config(format!(
                "{} must be a boolean, got '{}'",
                key, other
            ))),
        },
    }
}

fn parse_num<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match optional(lookup, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, raw))),
    }
}

fn parse_decimal<F>(lookup: &F, key: &str, default: Decimal) -> AppResult<Decimal>
where
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, key) {
        None => Ok(default),
        Some(raw) => Decimal::from_str(&raw)
            .map_err(|_| AppError::Config(format!("{} must be a decimal, got '{}'", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("AGGREGATOR_URL".into(), "https://aggregator.test".into());
        env.insert("AGGREGATOR_KEY".into(), "sk-agg".into());
        env.insert("PRICING_STORE_URL".into(), "https://pricing.test".into());
        env.insert("PRICING_STORE_KEY".into(), "sk-pricing".into());
        env
    }

    fn load(env: &HashMap<String, String>) -> AppResult<Config> {
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();

        assert_eq!(config.run_interval_hours, 24);
        assert!(config.run_on_startup);
        assert_eq!(config.max_parallel_models, 10);
        assert_eq!(config.request_timeout_seconds, 30);
        assert_eq!(config.backend_freshness_days, 7);
        assert_eq!(config.byok_sample_size, 5);
        assert!(!config.enable_provider_scraping);
        assert!(!config.backend_sync_enabled());
        assert_eq!(
            config.price_change_threshold_percent,
            Decimal::from(30)
        );
        assert_eq!(config.aggregator.models_path, "/api/v1/models");
        assert_eq!(
            config.protected_models,
            vec!["openai/text-embedding-3-large".to_string()]
        );
        assert!(config
            .trusted_price_domains
            .contains(&"openrouter.ai".to_string()));
    }

    #[test]
    fn test_missing_required_setting() {
        let mut env = base_env();
        env.remove("AGGREGATOR_KEY");

        let err = load(&env).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("AGGREGATOR_KEY"));
    }

    #[test]
    fn test_backend_store_requires_both_settings() {
        let mut env = base_env();
        env.insert("BACKEND_STORE_URL".into(), "https://backend.test".into());

        let config = load(&env).unwrap();
        assert!(!config.backend_sync_enabled());

        env.insert("BACKEND_STORE_KEY".into(), "sk-backend".into());
        let config = load(&env).unwrap();
        assert!(config.backend_sync_enabled());
    }

    #[test]
    fn test_csv_filters() {
        let mut env = base_env();
        env.insert(
            "MODEL_FILTER_SUPPORTED_PARAMETERS".into(),
            "tools, response_format".into(),
        );
        env.insert("MODEL_FILTER_INPUT_MODALITIES".into(), "text".into());
        env.insert("MODEL_FILTER_DISTILLABLE".into(), "true".into());

        let config = load(&env).unwrap();
        assert_eq!(
            config.model_filters.supported_parameters,
            vec!["tools".to_string(), "response_format".to_string()]
        );
        assert_eq!(config.model_filters.input_modalities, vec!["text".to_string()]);
        assert_eq!(config.model_filters.distillable, Some(true));
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut env = base_env();
        env.insert("ENABLE_PROVIDER_SCRAPING".into(), "maybe".into());

        assert!(matches!(load(&env), Err(AppError::Config(_))));
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let mut env = base_env();
        env.insert("RUN_INTERVAL_HOURS".into(), "0".into());

        assert!(matches!(load(&env), Err(AppError::Config(_))));
    }

    #[test]
    fn test_trusted_domain_override() {
        let mut env = base_env();
        env.insert(
            "TRUSTED_PRICE_DOMAINS".into(),
            "example.com, docs.example.com".into(),
        );

        let config = load(&env).unwrap();
        assert_eq!(
            config.trusted_price_domains,
            vec!["example.com".to_string(), "docs.example.com".to_string()]
        );
    }
}
