//! Adapter registry
//!
//! Populated once at startup with every known specific adapter plus the
//! generic web fallback. Lookups by provider slug fall through to the
//! generic adapter, so `get` always returns something usable.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::anthropic::AnthropicAdapter;
use crate::cohere::CohereAdapter;
use crate::deepinfra::DeepInfraAdapter;
use crate::deepseek::DeepSeekAdapter;
use crate::fireworks::FireworksAdapter;
use crate::generic::GenericWebAdapter;
use crate::google::GoogleAdapter;
use crate::groq::GroqAdapter;
use crate::mistral::MistralAdapter;
use crate::openai::OpenAiAdapter;
use crate::search::WebSearch;
use crate::together::TogetherAdapter;
use crate::PricingAdapter;

pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn PricingAdapter>>,
    generic: Arc<dyn PricingAdapter>,
}

impl AdapterRegistry {
    /// Build the registry with the shared web-search backend bound into
    /// every adapter.
    pub fn new(search: Arc<WebSearch>, trusted_domains: Vec<String>) -> Self {
        let mut registry = Self {
            adapters: HashMap::new(),
            generic: Arc::new(GenericWebAdapter::new(search.clone(), trusted_domains)),
        };

        registry.register(Arc::new(OpenAiAdapter::new(search.clone())));
        registry.register(Arc::new(AnthropicAdapter::new(search.clone())));
        registry.register(Arc::new(GoogleAdapter::new(search.clone())));
        registry.register(Arc::new(CohereAdapter::new(search.clone())));
        registry.register(Arc::new(MistralAdapter::new(search.clone())));
        registry.register(Arc::new(DeepSeekAdapter::new(search.clone())));
        registry.register(Arc::new(GroqAdapter::new(search.clone())));
        registry.register(Arc::new(TogetherAdapter::new(search.clone())));
        registry.register(Arc::new(FireworksAdapter::new(search.clone())));
        registry.register(Arc::new(DeepInfraAdapter::new(search)));

        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn PricingAdapter>) {
        debug!(slug = adapter.slug(), "registered provider adapter");
        self.adapters.insert(adapter.slug().to_string(), adapter);
    }

    /// Adapter for a provider slug, falling back to the generic web adapter.
    pub fn get(&self, provider_slug: &str) -> Arc<dyn PricingAdapter> {
        match self.adapters.get(provider_slug) {
            Some(adapter) => {
                debug!(slug = provider_slug, "using specific adapter");
                adapter.clone()
            }
            None => {
                debug!(slug = provider_slug, "using generic adapter");
                self.generic.clone()
            }
        }
    }

    /// The generic fallback adapter, for models with no linked provider.
    pub fn generic(&self) -> Arc<dyn PricingAdapter> {
        self.generic.clone()
    }

    pub fn slugs(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> AdapterRegistry {
        let search = Arc::new(WebSearch::new(None, Duration::from_secs(1)).unwrap());
        AdapterRegistry::new(search, vec![])
    }

    #[test]
    fn test_specific_adapter_lookup() {
        let registry = registry();
        assert_eq!(registry.get("openai").slug(), "openai");
        assert_eq!(registry.get("anthropic").slug(), "anthropic");
        assert_eq!(registry.get("deepseek").slug(), "deepseek");
    }

    #[test]
    fn test_unknown_slug_falls_back_to_generic() {
        let registry = registry();
        assert_eq!(registry.get("nebius").slug(), "_generic");
    }

    #[test]
    fn test_all_known_adapters_registered() {
        let mut slugs = registry().slugs();
        slugs.sort();
        assert_eq!(
            slugs,
            vec![
                "anthropic",
                "cohere",
                "deepinfra",
                "deepseek",
                "fireworks",
                "google",
                "groq",
                "mistralai",
                "openai",
                "together",
            ]
        );
    }
}
