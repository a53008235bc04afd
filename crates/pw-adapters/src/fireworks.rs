//! Fireworks AI pricing adapter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://fireworks.ai/pricing";

pub struct FireworksAdapter {
    search: Arc<WebSearch>,
}

impl FireworksAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for FireworksAdapter {
    fn slug(&self) -> &'static str {
        "fireworks"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "resolving fireworks pricing");

        let model = model_tail(model_name, model_slug);
        let query = format!("Fireworks AI {} pricing per million tokens", model);
        Ok(search_for_pricing(&self.search, &query, PRICING_URL).await)
    }
}
