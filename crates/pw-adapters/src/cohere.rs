//! Cohere pricing adapter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, KnownPrices, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://cohere.com/pricing";

const KNOWN: KnownPrices = KnownPrices {
    table: &[
        ("command-a", "2.50", "10.00"),
        ("command-r-plus", "2.50", "10.00"),
        ("command-r", "0.15", "0.60"),
        ("command-r7b", "0.0375", "0.15"),
    ],
    source_url: PRICING_URL,
};

pub struct CohereAdapter {
    search: Arc<WebSearch>,
}

impl CohereAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for CohereAdapter {
    fn slug(&self) -> &'static str {
        "cohere"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "resolving cohere pricing");

        let model = model_tail(model_name, model_slug);

        let query = format!("Cohere {} API pricing per million tokens", model);
        if let Some(result) = search_for_pricing(&self.search, &query, PRICING_URL).await {
            return Ok(Some(result));
        }

        Ok(KNOWN.lookup(&model))
    }
}
