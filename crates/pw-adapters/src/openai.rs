//! OpenAI pricing adapter
//!
//! Searches provider documentation for current rates and falls back to the
//! published price list when search yields nothing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, KnownPrices, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://platform.openai.com/docs/pricing";

/// Published OpenAI rates, USD per 1M tokens.
const KNOWN: KnownPrices = KnownPrices {
    table: &[
        ("gpt-4o", "2.50", "10.00"),
        ("gpt-4o-mini", "0.15", "0.60"),
        ("gpt-4-turbo", "10.00", "30.00"),
        ("gpt-4", "30.00", "60.00"),
        ("gpt-3.5-turbo", "0.50", "1.50"),
        ("o1", "15.00", "60.00"),
        ("o1-mini", "3.00", "12.00"),
        ("o1-pro", "150.00", "600.00"),
        ("o3-mini", "1.10", "4.40"),
    ],
    source_url: PRICING_URL,
};

pub struct OpenAiAdapter {
    search: Arc<WebSearch>,
}

impl OpenAiAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for OpenAiAdapter {
    fn slug(&self) -> &'static str {
        "openai"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_name, slug = model_slug, "resolving openai pricing");

        let model = model_tail(model_name, model_slug);

        let query = format!("OpenAI {} API pricing per million tokens", model);
        if let Some(result) = search_for_pricing(&self.search, &query, PRICING_URL).await {
            return Ok(Some(result));
        }

        if let Some(result) = KNOWN.lookup(&model) {
            info!(model = %model, "using known openai pricing");
            return Ok(Some(result));
        }

        warn!(model = %model, "openai pricing not found");
        Ok(None)
    }
}
