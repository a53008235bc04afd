//! Anthropic pricing adapter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, KnownPrices, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://www.anthropic.com/pricing";

/// Published Claude rates, USD per 1M tokens.
const KNOWN: KnownPrices = KnownPrices {
    table: &[
        ("claude-sonnet-4.5", "3.00", "15.00"),
        ("claude-4.5-sonnet", "3.00", "15.00"),
        ("claude-4-sonnet", "3.00", "15.00"),
        ("claude-3.5-sonnet", "3.00", "15.00"),
        ("claude-3-sonnet", "3.00", "15.00"),
        ("claude-4.1-opus", "15.00", "75.00"),
        ("claude-4-opus", "15.00", "75.00"),
        ("claude-3-opus", "15.00", "75.00"),
        ("claude-3.5-haiku", "0.80", "4.00"),
        ("claude-3-haiku", "0.25", "1.25"),
    ],
    source_url: PRICING_URL,
};

pub struct AnthropicAdapter {
    search: Arc<WebSearch>,
}

impl AnthropicAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for AnthropicAdapter {
    fn slug(&self) -> &'static str {
        "anthropic"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_name, slug = model_slug, "resolving anthropic pricing");

        let model = model_tail(model_name, model_slug);

        // The display name matches documentation pages better than the slug.
        let query = format!("Anthropic {} API pricing per million tokens", model_name);
        if let Some(result) = search_for_pricing(&self.search, &query, PRICING_URL).await {
            return Ok(Some(result));
        }

        if let Some(result) = KNOWN.lookup(&model) {
            info!(model = %model, "using known anthropic pricing");
            return Ok(Some(result));
        }

        warn!(model = %model, "anthropic pricing not found");
        Ok(None)
    }
}
