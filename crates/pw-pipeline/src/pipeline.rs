//! Pricing pipeline orchestrator
//!
//! Per tick: refresh the catalogue, then resolve pricing for every model
//! with bounded parallelism. Sources are tried in precedence order: the
//! aggregator always, provider adapters when scraping is enabled, the
//! generic web fallback only when nothing else produced a writable
//! snapshot. Afterwards a small random sample of paid models gets a tiny
//! real request to reconcile aggregator and upstream cost.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pw_adapters::registry::AdapterRegistry;
use pw_adapters::PricingResult;
use pw_aggregator::{AggregatorClient, AggregatorModel, RawPricing};
use pw_config::Config;
use pw_store::PricingRepo;
use pw_types::{
    AppResult, ByokVerification, NormalizedPricing, ProviderRecord, SnapshotInsert, SourceType,
};

use crate::discovery::ModelDiscovery;
use crate::normalize::normalize_aggregator_pricing;
use crate::validate::PricingValidator;

pub struct PricingPipeline {
    aggregator: Arc<AggregatorClient>,
    repo: Arc<PricingRepo>,
    registry: Arc<AdapterRegistry>,
    validator: Arc<PricingValidator>,
    discovery: ModelDiscovery,
    enable_provider_scraping: bool,
    max_parallel_models: usize,
    byok_sample_size: usize,
}

impl PricingPipeline {
    pub fn new(
        config: &Config,
        aggregator: Arc<AggregatorClient>,
        repo: Arc<PricingRepo>,
        registry: Arc<AdapterRegistry>,
        validator: Arc<PricingValidator>,
        discovery: ModelDiscovery,
    ) -> Self {
        Self {
            aggregator,
            repo,
            registry,
            validator,
            discovery,
            enable_provider_scraping: config.enable_provider_scraping,
            max_parallel_models: config.max_parallel_models,
            byok_sample_size: config.byok_sample_size,
        }
    }

    /// Execute one full collection pass.
    pub async fn run(&self) -> AppResult<()> {
        info!("starting pricing pipeline");

        self.discovery.discover_providers().await?;

        let (models, new_slugs) = self.discovery.discover_models().await?;
        self.discovery.sync_models(&models).await?;

        if !new_slugs.is_empty() {
            info!(
                count = new_slugs.len(),
                sample = ?new_slugs.iter().take(10).collect::<Vec<_>>(),
                "new models detected"
            );
        }

        info!(model_count = models.len(), "collecting pricing");
        self.collect_pricing_for_models(&models).await;

        self.run_byok_spot_checks(&models).await;

        info!("pricing pipeline completed");
        Ok(())
    }

    /// Fan out over the catalogue with bounded parallelism. Per-model
    /// failures are isolated here; one bad model never aborts the rest.
    async fn collect_pricing_for_models(&self, models: &[AggregatorModel]) {
        let today = Utc::now().date_naive();

        stream::iter(models)
            .for_each_concurrent(self.max_parallel_models.max(1), |model| async move {
                if let Err(e) = self.collect_for_model(model, today).await {
                    error!(model = %model.id, error = %e, "failed to collect pricing for model");
                }
            })
            .await;
    }

    /// Resolution algorithm for one model, in source precedence order.
    async fn collect_for_model(
        &self,
        model: &AggregatorModel,
        snapshot_date: NaiveDate,
    ) -> AppResult<()> {
        debug!(model = %model.id, "collecting pricing");

        let Some(record) = self.repo.get_model_by_slug(&model.id).await? else {
            error!(model = %model.id, "model not in catalogue, skipping");
            return Ok(());
        };

        let mut wrote = false;

        if let Some(pricing) = &model.pricing {
            wrote |= self
                .store_aggregator_pricing(record.model_id, &model.id, pricing, snapshot_date)
                .await?;
        }

        if self.enable_provider_scraping {
            wrote |= self
                .collect_linked_provider_pricing(record.model_id, model, snapshot_date)
                .await?;
        } else {
            debug!(model = %model.id, "provider scraping disabled");
        }

        if !wrote {
            self.collect_web_fallback_pricing(record.model_id, model, snapshot_date)
                .await?;
        }

        Ok(())
    }

    /// Step 1: the aggregator's own pricing, provider-less. Returns whether
    /// a snapshot was written.
    async fn store_aggregator_pricing(
        &self,
        model_id: Uuid,
        model_slug: &str,
        pricing: &RawPricing,
        snapshot_date: NaiveDate,
    ) -> AppResult<bool> {
        let normalized = normalize_aggregator_pricing(pricing);

        if !normalized.has_token_pricing() {
            debug!(
                model = model_slug,
                source_type = %SourceType::AggregatorApi,
                "skipping_invalid_pricing"
            );
            return Ok(false);
        }

        let has_image_pricing = normalized.image_usd.is_some();
        let validation = self.validator.validate_pricing(
            normalized.prompt_usd_per_million,
            normalized.completion_usd_per_million,
            model_slug,
            has_image_pricing,
        );

        if !validation.ok {
            warn!(
                model = model_slug,
                source_type = %SourceType::AggregatorApi,
                warnings = ?validation.warnings,
                "skipping_invalid_pricing"
            );
            return Ok(false);
        }

        // A change alert never suppresses the write, and neither does a
        // failed history lookup.
        if let Err(e) = self
            .validator
            .check_price_change(
                model_id,
                None,
                SourceType::AggregatorApi,
                normalized.prompt_usd_per_million,
                normalized.completion_usd_per_million,
            )
            .await
        {
            warn!(model = model_slug, error = %e, "price change check failed");
        }

        let snapshot = SnapshotInsert::new(
            model_id,
            None,
            snapshot_date,
            SourceType::AggregatorApi,
            Some(self.aggregator.models_url()),
            normalized,
            validation.notes(),
        );
        self.repo.insert_pricing_snapshot(&snapshot).await?;

        info!(
            model = model_slug,
            source_type = %SourceType::AggregatorApi,
            "pricing snapshot stored"
        );
        Ok(true)
    }

    /// Step 2: one adapter call per linked provider. Failures are isolated
    /// per provider.
    async fn collect_linked_provider_pricing(
        &self,
        model_id: Uuid,
        model: &AggregatorModel,
        snapshot_date: NaiveDate,
    ) -> AppResult<bool> {
        let links = self.repo.get_model_providers(model_id).await?;
        let mut wrote = false;

        for link in &links {
            let Some(provider) = &link.providers else {
                continue;
            };

            match self
                .collect_provider_pricing(model_id, provider, model, snapshot_date)
                .await
            {
                Ok(did_write) => wrote |= did_write,
                Err(e) => error!(
                    model = %model.id,
                    provider = %provider.slug,
                    error = %e,
                    "provider pricing collection failed"
                ),
            }
        }

        Ok(wrote)
    }

    async fn collect_provider_pricing(
        &self,
        model_id: Uuid,
        provider: &ProviderRecord,
        model: &AggregatorModel,
        snapshot_date: NaiveDate,
    ) -> AppResult<bool> {
        info!(model = %model.id, provider = %provider.slug, "collecting provider pricing");

        let adapter = self.registry.get(&provider.slug);
        let model_name = model.name.clone().unwrap_or_else(|| model.id.clone());

        let Some(result) = adapter.resolve(&model_name, &model.id).await? else {
            info!(model = %model.id, provider = %provider.slug, "provider pricing not found");
            return Ok(false);
        };

        self.write_adapter_result(
            model_id,
            Some(provider.provider_id),
            SourceType::ProviderSite,
            &model.id,
            result,
            snapshot_date,
        )
        .await
    }

    /// Step 3: generic web search, only reached when steps 1 and 2 wrote
    /// nothing for this model.
    async fn collect_web_fallback_pricing(
        &self,
        model_id: Uuid,
        model: &AggregatorModel,
        snapshot_date: NaiveDate,
    ) -> AppResult<()> {
        let adapter = self.registry.generic();
        let model_name = model.name.clone().unwrap_or_else(|| model.id.clone());

        match adapter.resolve(&model_name, &model.id).await {
            Ok(Some(result)) => {
                self.write_adapter_result(
                    model_id,
                    None,
                    SourceType::WebFallback,
                    &model.id,
                    result,
                    snapshot_date,
                )
                .await?;
            }
            Ok(None) => debug!(model = %model.id, "web fallback found nothing"),
            Err(e) => warn!(model = %model.id, error = %e, "web fallback failed"),
        }

        Ok(())
    }

    async fn write_adapter_result(
        &self,
        model_id: Uuid,
        provider_id: Option<Uuid>,
        source_type: SourceType,
        model_slug: &str,
        result: PricingResult,
        snapshot_date: NaiveDate,
    ) -> AppResult<bool> {
        if result.prompt_usd_per_million.is_none() && result.completion_usd_per_million.is_none()
        {
            debug!(model = model_slug, source_type = %source_type, "skipping_invalid_pricing");
            return Ok(false);
        }

        let validation = self.validator.validate_pricing(
            result.prompt_usd_per_million,
            result.completion_usd_per_million,
            model_slug,
            false,
        );

        if !validation.ok {
            warn!(
                model = model_slug,
                source_type = %source_type,
                warnings = ?validation.warnings,
                "skipping_invalid_pricing"
            );
            return Ok(false);
        }

        if let Err(e) = self
            .validator
            .check_price_change(
                model_id,
                provider_id,
                source_type,
                result.prompt_usd_per_million,
                result.completion_usd_per_million,
            )
            .await
        {
            warn!(model = model_slug, error = %e, "price change check failed");
        }

        let notes = match (validation.notes(), result.notes) {
            (Some(v), Some(r)) => Some(format!("{}; {}", r, v)),
            (Some(v), None) => Some(v),
            (None, r) => r,
        };

        let snapshot = SnapshotInsert::new(
            model_id,
            provider_id,
            snapshot_date,
            source_type,
            (!result.source_url.is_empty()).then(|| result.source_url.clone()),
            NormalizedPricing {
                prompt_usd_per_million: result.prompt_usd_per_million,
                completion_usd_per_million: result.completion_usd_per_million,
                request_usd: result.request_usd,
                ..Default::default()
            },
            notes,
        );
        self.repo.insert_pricing_snapshot(&snapshot).await?;

        info!(model = model_slug, source_type = %source_type, "pricing snapshot stored");
        Ok(true)
    }

    /// Spot-check a random sample of paid models with a one-token real
    /// request. Terminal failures are recorded with `ok = false` and never
    /// retried within the tick.
    async fn run_byok_spot_checks(&self, models: &[AggregatorModel]) {
        info!("running byok spot checks");

        let candidates: Vec<&AggregatorModel> = models
            .iter()
            .filter(|m| {
                let billable = m
                    .pricing
                    .as_ref()
                    .map(|p| !p.lacks_billable_tokens())
                    .unwrap_or(false);
                if !billable {
                    debug!(model = %m.id, "skipping_byok_for_free_or_unavailable_model");
                }
                billable
            })
            .collect();

        let sample: Vec<AggregatorModel> = {
            let mut rng = rand::thread_rng();
            candidates
                .choose_multiple(&mut rng, self.byok_sample_size)
                .map(|m| (*m).clone())
                .collect()
        };

        info!(
            candidates = candidates.len(),
            sampled = sample.len(),
            "byok spot check sample selected"
        );

        for model in &sample {
            if let Err(e) = self.run_byok_spot_check(model).await {
                error!(model = %model.id, error = %e, "byok spot check failed");
            }
        }
    }

    async fn run_byok_spot_check(&self, model: &AggregatorModel) -> AppResult<()> {
        info!(model = %model.id, "byok spot check");

        let Some(record) = self.repo.get_model_by_slug(&model.id).await? else {
            return Ok(());
        };

        match self.aggregator.tiny_byok_call(&model.id).await {
            Ok(report) => {
                let usage = report.usage.as_ref();
                if usage.is_none() {
                    warn!(model = %model.id, "no usage data in byok response");
                }

                let verification = ByokVerification {
                    model_id: record.model_id,
                    provider_id: None,
                    prompt_tokens: usage.map(|u| u.prompt_tokens).unwrap_or(0),
                    completion_tokens: usage.map(|u| u.completion_tokens).unwrap_or(0),
                    aggregator_cost_usd: usage.and_then(|u| u.cost),
                    upstream_cost_usd: report.upstream_cost(),
                    response_ms: Some(report.response_ms as i64),
                    ok: usage.is_some(),
                    raw_usage: report.raw.get("usage").cloned().unwrap_or_else(|| json!({})),
                };
                self.repo.insert_byok_verification(&verification).await?;

                info!(
                    model = %model.id,
                    cost = ?verification.aggregator_cost_usd,
                    upstream_cost = ?verification.upstream_cost_usd,
                    "byok spot check completed"
                );
            }
            Err(e) => {
                warn!(model = %model.id, error = %e, "byok call failed");

                let verification = ByokVerification {
                    model_id: record.model_id,
                    provider_id: None,
                    prompt_tokens: 0,
                    completion_tokens: 0,
                    aggregator_cost_usd: None,
                    upstream_cost_usd: None,
                    response_ms: None,
                    ok: false,
                    raw_usage: json!({ "error": e.to_string() }),
                };
                self.repo.insert_byok_verification(&verification).await?;
            }
        }

        Ok(())
    }
}
