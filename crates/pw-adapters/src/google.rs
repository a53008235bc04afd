//! Google (Gemini) pricing adapter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, KnownPrices, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://ai.google.dev/pricing";

const KNOWN: KnownPrices = KnownPrices {
    table: &[
        ("gemini-2.5-pro", "1.25", "10.00"),
        ("gemini-2.5-flash", "0.30", "2.50"),
        ("gemini-2.0-flash", "0.10", "0.40"),
        ("gemini-1.5-pro", "1.25", "5.00"),
        ("gemini-1.5-flash", "0.075", "0.30"),
    ],
    source_url: PRICING_URL,
};

pub struct GoogleAdapter {
    search: Arc<WebSearch>,
}

impl GoogleAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for GoogleAdapter {
    fn slug(&self) -> &'static str {
        "google"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "resolving google pricing");

        let model = model_tail(model_name, model_slug);

        let query = format!("Google {} API pricing per million tokens", model);
        if let Some(result) = search_for_pricing(&self.search, &query, PRICING_URL).await {
            return Ok(Some(result));
        }

        Ok(KNOWN.lookup(&model))
    }
}
