//! Mistral pricing adapter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, KnownPrices, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://mistral.ai/technology/#pricing";

const KNOWN: KnownPrices = KnownPrices {
    table: &[
        ("mistral-large", "2.00", "6.00"),
        ("mistral-medium", "0.40", "2.00"),
        ("mistral-small", "0.20", "0.60"),
        ("codestral", "0.30", "0.90"),
        ("ministral-8b", "0.10", "0.10"),
    ],
    source_url: PRICING_URL,
};

pub struct MistralAdapter {
    search: Arc<WebSearch>,
}

impl MistralAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for MistralAdapter {
    fn slug(&self) -> &'static str {
        "mistralai"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "resolving mistral pricing");

        let model = model_tail(model_name, model_slug);

        let query = format!("Mistral {} API pricing per million tokens", model);
        if let Some(result) = search_for_pricing(&self.search, &query, PRICING_URL).await {
            return Ok(Some(result));
        }

        Ok(KNOWN.lookup(&model))
    }
}
