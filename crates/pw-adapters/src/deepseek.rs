//! DeepSeek pricing adapter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, KnownPrices, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://api-docs.deepseek.com/quick_start/pricing";

const KNOWN: KnownPrices = KnownPrices {
    table: &[
        ("deepseek-chat", "0.27", "1.10"),
        ("deepseek-reasoner", "0.55", "2.19"),
        ("deepseek-r1", "0.55", "2.19"),
        ("deepseek-v3", "0.27", "1.10"),
    ],
    source_url: PRICING_URL,
};

pub struct DeepSeekAdapter {
    search: Arc<WebSearch>,
}

impl DeepSeekAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for DeepSeekAdapter {
    fn slug(&self) -> &'static str {
        "deepseek"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "resolving deepseek pricing");

        let model = model_tail(model_name, model_slug);

        let query = format!("DeepSeek {} API pricing per million tokens", model);
        if let Some(result) = search_for_pricing(&self.search, &query, PRICING_URL).await {
            return Ok(Some(result));
        }

        Ok(KNOWN.lookup(&model))
    }
}
