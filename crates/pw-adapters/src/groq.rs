//! Groq pricing adapter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, KnownPrices, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://groq.com/pricing/";

const KNOWN: KnownPrices = KnownPrices {
    table: &[
        ("llama-3.3-70b", "0.59", "0.79"),
        ("llama-3.1-8b", "0.05", "0.08"),
        ("mixtral-8x7b", "0.24", "0.24"),
    ],
    source_url: PRICING_URL,
};

pub struct GroqAdapter {
    search: Arc<WebSearch>,
}

impl GroqAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for GroqAdapter {
    fn slug(&self) -> &'static str {
        "groq"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "resolving groq pricing");

        let model = model_tail(model_name, model_slug);

        let query = format!("Groq {} API pricing per million tokens", model);
        if let Some(result) = search_for_pricing(&self.search, &query, PRICING_URL).await {
            return Ok(Some(result));
        }

        Ok(KNOWN.lookup(&model))
    }
}
