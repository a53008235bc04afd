//! Together AI pricing adapter
//!
//! Together hosts a rotating catalogue of open models with per-model rates,
//! so there is no stable table to hardcode; search is the only strategy.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://www.together.ai/pricing";

pub struct TogetherAdapter {
    search: Arc<WebSearch>,
}

impl TogetherAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for TogetherAdapter {
    fn slug(&self) -> &'static str {
        "together"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "resolving together pricing");

        let model = model_tail(model_name, model_slug);
        let query = format!("Together AI {} pricing per million tokens", model);
        Ok(search_for_pricing(&self.search, &query, PRICING_URL).await)
    }
}
