//! DeepInfra pricing adapter

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{model_tail, search_for_pricing, PricingAdapter, PricingResult};

const PRICING_URL: &str = "https://deepinfra.com/pricing";

pub struct DeepInfraAdapter {
    search: Arc<WebSearch>,
}

impl DeepInfraAdapter {
    pub fn new(search: Arc<WebSearch>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl PricingAdapter for DeepInfraAdapter {
    fn slug(&self) -> &'static str {
        "deepinfra"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "resolving deepinfra pricing");

        let model = model_tail(model_name, model_slug);
        let query = format!("DeepInfra {} pricing per million tokens", model);
        Ok(search_for_pricing(&self.search, &query, PRICING_URL).await)
    }
}
