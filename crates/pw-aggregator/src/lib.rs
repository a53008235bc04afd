//! Aggregator API client
//!
//! Talks to the aggregator's models, providers and chat-completions
//! endpoints. All read operations retry transient failures with bounded
//! exponential backoff; a 429 response puts the whole client into a cooldown
//! that every subsequent call on the same instance waits out.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use pw_config::AggregatorConfig;
use pw_types::{AppError, AppResult, ModelFilters};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Client for the aggregator's REST API.
///
/// Cheap to share behind an `Arc`; holds no per-call state beyond the
/// connection pool and the rate-limit cooldown cell.
pub struct AggregatorClient {
    client: Client,
    base_url: String,
    api_key: String,
    models_path: String,
    providers_path: String,
    completions_path: String,
    cooldown_until: Mutex<Option<Instant>>,
}

impl AggregatorClient {
    pub fn new(config: &AggregatorConfig, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            models_path: config.models_path.clone(),
            providers_path: config.providers_path.clone(),
            completions_path: config.completions_path.clone(),
            cooldown_until: Mutex::new(None),
        })
    }

    /// URL of the models endpoint, recorded as `source_url` on aggregator
    /// snapshots.
    pub fn models_url(&self) -> String {
        format!("{}{}", self.base_url, self.models_path)
    }

    /// Fetch the model catalogue, filtered.
    ///
    /// `supported_parameters` is applied server-side as a query parameter;
    /// the remaining filters are applied client-side over the returned rows.
    pub async fn list_models(&self, filters: &ModelFilters) -> AppResult<Vec<AggregatorModel>> {
        info!("fetching models from aggregator");

        let mut url = self.models_url();
        if !filters.supported_parameters.is_empty() {
            url = format!(
                "{}?supported_parameters={}",
                url,
                filters.supported_parameters.join(",")
            );
        }

        let response: ListResponse<AggregatorModel> = self.get_json(&url).await?;
        let total = response.data.len();

        let models: Vec<AggregatorModel> = response
            .data
            .into_iter()
            .filter(|m| m.matches(filters))
            .collect();

        info!(total, kept = models.len(), "models fetched");
        Ok(models)
    }

    /// Fetch the provider directory.
    pub async fn list_providers(&self) -> AppResult<Vec<AggregatorProvider>> {
        info!("fetching providers from aggregator");

        let url = format!("{}{}", self.base_url, self.providers_path);
        let response: ListResponse<AggregatorProvider> = self.get_json(&url).await?;

        info!(count = response.data.len(), "providers fetched");
        Ok(response.data)
    }

    /// Send a minimal completion request with usage accounting enabled.
    ///
    /// Used only for spot-checks; terminal failures are the caller's to
    /// record, so this performs a single attempt.
    pub async fn tiny_byok_call(&self, model_slug: &str) -> AppResult<ByokUsageReport> {
        info!(model = model_slug, "making byok verification call");
        self.await_cooldown().await;

        let url = format!("{}{}", self.base_url, self.completions_path);
        let payload = json!({
            "model": model_slug,
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": 1,
            "usage": {"include": true},
        });

        let started = Instant::now();
        let response = self
            .build_request(self.client.post(&url))
            .json(&payload)
            .send()
            .await?;
        let response_ms = started.elapsed().as_millis() as u64;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.enter_cooldown(response.headers().get("retry-after"));
            return Err(AppError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Aggregator(format!(
                "byok call for {} returned {}: {}",
                model_slug, status, body
            )));
        }

        let raw: Value = response.json().await?;
        let usage = raw
            .get("usage")
            .cloned()
            .and_then(|u| serde_json::from_value::<UsageAccounting>(u).ok());

        Ok(ByokUsageReport {
            usage,
            response_ms,
            raw,
        })
    }

    fn build_request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "https://github.com/pricewatch/pricewatch")
            .header("X-Title", "PriceWatch")
    }

    /// GET with bounded retries: connect errors and 5xx retry with
    /// exponential backoff, 4xx propagate immediately, 429 arms the cooldown.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let mut last_error = AppError::Aggregator(format!("no attempt made for {}", url));

        for attempt in 1..=MAX_ATTEMPTS {
            self.await_cooldown().await;

            let response = match self.build_request(self.client.get(url)).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(url, attempt, error = %e, "aggregator request failed to connect");
                    last_error = AppError::Http(e);
                    self.backoff(attempt).await;
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.enter_cooldown(response.headers().get("retry-after"));
                last_error = AppError::RateLimited;
                continue;
            }

            if status.is_server_error() {
                warn!(url, attempt, %status, "aggregator returned server error");
                last_error =
                    AppError::Aggregator(format!("{} returned status {}", url, status));
                self.backoff(attempt).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::Aggregator(format!(
                    "{} returned status {}: {}",
                    url, status, body
                )));
            }

            return Ok(response.json().await?);
        }

        Err(last_error)
    }

    async fn backoff(&self, attempt: u32) {
        if attempt < MAX_ATTEMPTS {
            let delay = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    async fn await_cooldown(&self) {
        let remaining = {
            let until = self.cooldown_until.lock();
            until.and_then(|t| t.checked_duration_since(Instant::now()))
        };

        if let Some(remaining) = remaining {
            debug!(secs = remaining.as_secs(), "waiting out rate-limit cooldown");
            tokio::time::sleep(remaining).await;
        }
    }

    fn enter_cooldown(&self, retry_after: Option<&reqwest::header::HeaderValue>) {
        let secs = retry_after
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_COOLDOWN_SECS);

        warn!(secs, "aggregator rate limit hit, entering cooldown");
        *self.cooldown_until.lock() = Some(Instant::now() + Duration::from_secs(secs));
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ListResponse<T> {
    #[serde(default)]
    data: Vec<T>,
}

/// Model row as returned by the aggregator's models endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorModel {
    pub id: String,
    pub canonical_slug: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub context_length: Option<u32>,
    /// Opaque architecture blob; modalities are read out of it on demand.
    #[serde(default)]
    pub architecture: Option<Value>,
    #[serde(default)]
    pub supported_parameters: Vec<String>,
    #[serde(default)]
    pub pricing: Option<RawPricing>,
    #[serde(default)]
    pub top_provider: Option<Value>,
    pub hugging_face_id: Option<String>,
    #[serde(default)]
    pub distillable: Option<bool>,
}

impl AggregatorModel {
    pub fn input_modalities(&self) -> Vec<String> {
        architecture_list(&self.architecture, "input_modalities")
    }

    pub fn output_modalities(&self) -> Vec<String> {
        architecture_list(&self.architecture, "output_modalities")
    }

    pub fn max_completion_tokens(&self) -> Option<u32> {
        self.top_provider
            .as_ref()
            .and_then(|tp| tp.get("max_completion_tokens"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }

    /// Client-side catalogue filter for the criteria the API does not apply
    /// server-side.
    fn matches(&self, filters: &ModelFilters) -> bool {
        if let Some(wanted) = filters.distillable {
            if self.distillable.unwrap_or(false) != wanted {
                return false;
            }
        }

        let input = self.input_modalities();
        if !filters.input_modalities.iter().all(|m| input.contains(m)) {
            return false;
        }

        let output = self.output_modalities();
        if !filters.output_modalities.iter().all(|m| output.contains(m)) {
            return false;
        }

        true
    }
}

fn architecture_list(architecture: &Option<Value>, key: &str) -> Vec<String> {
    architecture
        .as_ref()
        .and_then(|a| a.get(key))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Raw pricing object: USD per single token for the token-rate fields,
/// absolute USD for the rest. Values arrive as strings or numbers and may be
/// negative sentinels.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPricing {
    #[serde(default)]
    pub prompt: Option<Value>,
    #[serde(default)]
    pub completion: Option<Value>,
    #[serde(default)]
    pub request: Option<Value>,
    #[serde(default)]
    pub image: Option<Value>,
    #[serde(default)]
    pub web_search: Option<Value>,
    #[serde(default)]
    pub internal_reasoning: Option<Value>,
    #[serde(default)]
    pub input_cache_read: Option<Value>,
    #[serde(default)]
    pub input_cache_write: Option<Value>,
}

impl RawPricing {
    /// True when neither token rate is a positive price: absent, zero (free
    /// tier) or a negative sentinel. Such models are skipped by the BYOK
    /// spot-check sample.
    pub fn lacks_billable_tokens(&self) -> bool {
        !is_positive_price(&self.prompt) && !is_positive_price(&self.completion)
    }
}

fn is_positive_price(value: &Option<Value>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let parsed = match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    };
    matches!(parsed, Some(d) if d > Decimal::ZERO)
}

// Handles both plain and scientific notation; serde_json renders very small
// floats in the latter.
fn parse_decimal(raw: &str) -> Option<Decimal> {
    raw.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Provider row as returned by the aggregator's providers endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorProvider {
    pub slug: String,
    pub name: Option<String>,
    pub privacy_policy_url: Option<String>,
    pub terms_of_service_url: Option<String>,
    pub status_page_url: Option<String>,
}

/// Usage accounting block from a completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageAccounting {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub cost: Option<Decimal>,
    #[serde(default)]
    pub cost_details: Option<CostDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostDetails {
    #[serde(default)]
    pub upstream_inference_cost: Option<Decimal>,
}

/// Outcome of one tiny BYOK verification call.
#[derive(Debug, Clone)]
pub struct ByokUsageReport {
    pub usage: Option<UsageAccounting>,
    pub response_ms: u64,
    pub raw: Value,
}

impl ByokUsageReport {
    pub fn upstream_cost(&self) -> Option<Decimal> {
        self.usage
            .as_ref()
            .and_then(|u| u.cost_details.as_ref())
            .and_then(|d| d.upstream_inference_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> AggregatorConfig {
        AggregatorConfig {
            base_url: base_url.to_string(),
            api_key: "test-key".to_string(),
            models_path: "/api/v1/models".to_string(),
            providers_path: "/api/v1/providers".to_string(),
            completions_path: "/api/v1/chat/completions".to_string(),
        }
    }

    fn client_for(server: &MockServer) -> AggregatorClient {
        AggregatorClient::new(&test_config(&server.uri()), Duration::from_secs(5)).unwrap()
    }

    fn models_body(models: Value) -> Value {
        json!({ "data": models })
    }

    #[tokio::test]
    async fn test_list_models_sends_auth_and_filter_params() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .and(header("Authorization", "Bearer test-key"))
            .and(query_param("supported_parameters", "tools,response_format"))
            .respond_with(ResponseTemplate::new(200).set_body_json(models_body(json!([
                {"id": "openai/gpt-4o", "name": "GPT-4o",
                 "pricing": {"prompt": "0.0000025", "completion": "0.00001"}}
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let filters = ModelFilters {
            supported_parameters: vec!["tools".to_string(), "response_format".to_string()],
            ..Default::default()
        };

        let models = client_for(&server).list_models(&filters).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "openai/gpt-4o");
    }

    #[tokio::test]
    async fn test_list_models_applies_client_side_modality_filter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(models_body(json!([
                {"id": "a/text-only",
                 "architecture": {"input_modalities": ["text"], "output_modalities": ["text"]}},
                {"id": "b/vision",
                 "architecture": {"input_modalities": ["text", "image"], "output_modalities": ["text"]}}
            ]))))
            .mount(&server)
            .await;

        let filters = ModelFilters {
            input_modalities: vec!["image".to_string()],
            ..Default::default()
        };

        let models = client_for(&server).list_models(&filters).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "b/vision");
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/providers"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/providers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"slug": "openai", "name": "OpenAI"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let providers = client_for(&server).list_providers().await.unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].slug, "openai");
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server)
            .list_models(&ModelFilters::default())
            .await;
        assert!(matches!(result, Err(AppError::Aggregator(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_arms_cooldown_and_is_respected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/providers"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("retry-after", "1"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/providers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let started = Instant::now();
        let providers = client.list_providers().await.unwrap();

        assert!(providers.is_empty());
        // Second attempt must have waited out the one-second cooldown.
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_tiny_byok_call_shape_and_usage_parsing() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "openai/gpt-4o",
                "max_tokens": 1,
                "usage": {"include": true},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "gen-1",
                "usage": {
                    "prompt_tokens": 1,
                    "completion_tokens": 1,
                    "cost": 0.0000125,
                    "cost_details": {"upstream_inference_cost": 0.0000119}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let report = client_for(&server)
            .tiny_byok_call("openai/gpt-4o")
            .await
            .unwrap();

        let usage = report.usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 1);
        assert_eq!(usage.completion_tokens, 1);
        assert!(usage.cost.is_some());
        assert!(report.upstream_cost().is_some());
        assert!(report.raw.get("usage").is_some());
    }

    #[tokio::test]
    async fn test_byok_terminal_failure_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).tiny_byok_call("gone/model").await;
        assert!(matches!(result, Err(AppError::Aggregator(_))));
    }

    #[test]
    fn test_lacks_billable_tokens() {
        let sentinel: RawPricing = serde_json::from_value(json!({
            "prompt": "-1", "completion": "-1"
        }))
        .unwrap();
        assert!(sentinel.lacks_billable_tokens());

        let free: RawPricing = serde_json::from_value(json!({
            "prompt": "0", "completion": 0
        }))
        .unwrap();
        assert!(free.lacks_billable_tokens());

        let paid: RawPricing = serde_json::from_value(json!({
            "prompt": "0.000003", "completion": "-1"
        }))
        .unwrap();
        assert!(!paid.lacks_billable_tokens());

        assert!(RawPricing::default().lacks_billable_tokens());
    }
}
