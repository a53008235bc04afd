//! Model and provider discovery
//!
//! Pulls the remote catalogue, upserts it into the pricing store, links
//! models to providers by namespace prefix, and reports which model slugs
//! are new since the last run.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::Url;
use serde_json::json;
use tracing::{debug, error, info, warn};

use pw_aggregator::{AggregatorClient, AggregatorModel, AggregatorProvider};
use pw_store::PricingRepo;
use pw_types::{AppResult, ModelFilters, ModelUpsert, ProviderUpsert};

/// Well-known pricing pages, consulted before falling back to
/// `{homepage}/pricing`.
const PRICING_URL_PATTERNS: &[(&str, &str)] = &[
    ("openai", "https://openai.com/api/pricing/"),
    ("anthropic", "https://www.anthropic.com/pricing"),
    ("cohere", "https://cohere.com/pricing"),
    ("google", "https://ai.google.dev/pricing"),
    ("mistralai", "https://mistral.ai/technology/#pricing"),
    ("groq", "https://groq.com/pricing/"),
    ("together", "https://www.together.ai/pricing"),
    ("fireworks", "https://fireworks.ai/pricing"),
    ("deepinfra", "https://deepinfra.com/pricing"),
    ("deepseek", "https://api-docs.deepseek.com/quick_start/pricing"),
    ("replicate", "https://replicate.com/pricing"),
    ("perplexity", "https://www.perplexity.ai/hub/pricing"),
    ("cerebras", "https://www.cerebras.ai/pricing"),
];

pub struct ModelDiscovery {
    aggregator: Arc<AggregatorClient>,
    repo: Arc<PricingRepo>,
    filters: ModelFilters,
}

impl ModelDiscovery {
    pub fn new(
        aggregator: Arc<AggregatorClient>,
        repo: Arc<PricingRepo>,
        filters: ModelFilters,
    ) -> Self {
        Self {
            aggregator,
            repo,
            filters,
        }
    }

    /// Sync the provider directory into the catalogue. Returns the number of
    /// providers upserted; individual failures are logged and skipped.
    pub async fn discover_providers(&self) -> AppResult<usize> {
        info!("discovering providers");

        let providers = self.aggregator.list_providers().await?;
        let mut upserted = 0;

        for provider in &providers {
            if provider.slug.is_empty() {
                warn!(name = ?provider.name, "provider missing slug, skipping");
                continue;
            }

            let homepage_url = derive_homepage_url(provider);
            let pricing_url = derive_pricing_url(&provider.slug, homepage_url.as_deref());

            let upsert = ProviderUpsert {
                slug: provider.slug.clone(),
                display_name: provider
                    .name
                    .clone()
                    .unwrap_or_else(|| provider.slug.clone()),
                homepage_url,
                pricing_url,
            };

            match self.repo.upsert_provider(&upsert).await {
                Ok(_) => upserted += 1,
                Err(e) => {
                    error!(provider = %provider.slug, error = %e, "failed to upsert provider")
                }
            }
        }

        info!(upserted, "providers synced");
        Ok(upserted)
    }

    /// Fetch the filtered catalogue and diff it against the stored slugs.
    pub async fn discover_models(&self) -> AppResult<(Vec<AggregatorModel>, Vec<String>)> {
        info!(
            supported_parameters = ?self.filters.supported_parameters,
            distillable = ?self.filters.distillable,
            "discovering models"
        );

        let models = self.aggregator.list_models(&self.filters).await?;
        let existing: HashSet<String> = self.repo.get_all_model_slugs().await?.into_iter().collect();

        let new_slugs: Vec<String> = models
            .iter()
            .filter(|m| !existing.contains(&m.id))
            .map(|m| m.id.clone())
            .collect();

        info!(
            total = models.len(),
            existing = existing.len(),
            new = new_slugs.len(),
            "models discovered"
        );

        Ok((models, new_slugs))
    }

    /// Upsert models and link each to its namespace provider when one
    /// exists. Returns the number of models upserted.
    pub async fn sync_models(&self, models: &[AggregatorModel]) -> AppResult<usize> {
        info!(count = models.len(), "syncing models to catalogue");

        let mut upserted = 0;
        let mut linked = 0;

        for model in models {
            match self.sync_model(model).await {
                Ok(did_link) => {
                    upserted += 1;
                    if did_link {
                        linked += 1;
                    }
                }
                Err(e) => error!(model = %model.id, error = %e, "failed to upsert model"),
            }
        }

        info!(upserted, linked, "models synced");
        Ok(upserted)
    }

    async fn sync_model(&self, model: &AggregatorModel) -> AppResult<bool> {
        let record = self
            .repo
            .upsert_model(&ModelUpsert {
                model_slug: model.id.clone(),
                canonical_slug: model.canonical_slug.clone(),
                display_name: model.name.clone(),
                description: model.description.clone(),
                context_length: model.context_length,
                architecture: model.architecture.clone(),
                supported_parameters: Some(model.supported_parameters.clone()),
            })
            .await?;

        // A `namespace/name` slug links the model to the provider with that
        // namespace, when the provider is known.
        let Some((namespace, _)) = model.id.split_once('/') else {
            return Ok(false);
        };

        let Some(provider) = self.repo.get_provider_by_slug(namespace).await? else {
            debug!(model = %model.id, provider = namespace, "provider not found for model");
            return Ok(false);
        };

        self.repo
            .link_model_provider(
                record.model_id,
                provider.provider_id,
                model.top_provider.is_some(),
                model.top_provider.clone().unwrap_or_else(|| json!({})),
            )
            .await?;

        Ok(true)
    }
}

/// Scheme and host of the first non-empty URL field, the provider's
/// homepage by convention.
fn derive_homepage_url(provider: &AggregatorProvider) -> Option<String> {
    [
        provider.privacy_policy_url.as_deref(),
        provider.terms_of_service_url.as_deref(),
        provider.status_page_url.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find_map(|raw| {
        let url = Url::parse(raw).ok()?;
        let host = url.host_str()?;
        Some(format!("{}://{}", url.scheme(), host))
    })
}

/// Known pricing page for the slug, else `{homepage}/pricing`, else none.
fn derive_pricing_url(slug: &str, homepage_url: Option<&str>) -> Option<String> {
    if let Some((_, url)) = PRICING_URL_PATTERNS.iter().find(|(s, _)| *s == slug) {
        return Some(url.to_string());
    }

    homepage_url.map(|h| format!("{}/pricing", h.trim_end_matches('/')))
}
