//! Generic web fallback adapter
//!
//! Used for providers with no specific adapter and as the last resort when
//! neither the aggregator nor a provider adapter produced a writable
//! snapshot. Prices are only believed when they come from an allowlisted
//! domain and fall inside the credible range; when several candidates
//! survive, the highest one wins.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use pw_types::AppResult;

use crate::search::WebSearch;
use crate::{extract_price_pairs, extract_single_rates, PricingAdapter, PricingResult};

pub struct GenericWebAdapter {
    search: Arc<WebSearch>,
    trusted_domains: Vec<String>,
}

struct PriceCandidate {
    input: Decimal,
    output: Decimal,
    source_url: String,
}

impl GenericWebAdapter {
    pub fn new(search: Arc<WebSearch>, trusted_domains: Vec<String>) -> Self {
        Self {
            search,
            trusted_domains,
        }
    }

    fn is_trusted(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.trusted_domains.iter().any(|d| url.contains(d.as_str()))
    }

    fn queries(model_name: &str, model_slug: &str) -> Vec<String> {
        let mut queries = Vec::new();

        if let Some((provider, short_model)) = model_slug.split_once('/') {
            queries.push(format!(
                "{} {} API pricing per million tokens",
                provider, short_model
            ));
        }
        queries.push(format!("{} API pricing per million tokens", model_name));
        queries.push(format!("{} pricing per million tokens", model_slug));

        queries.truncate(2);
        queries
    }

    /// Collect every credible (input, output) candidate from one query's
    /// results, restricted to trusted domains.
    async fn collect_candidates(&self, query: &str) -> (Vec<PriceCandidate>, Vec<Decimal>) {
        let mut pairs = Vec::new();
        let mut singles = Vec::new();

        for result in self.search.search(query, 5).await {
            if !self.is_trusted(&result.url) {
                debug!(url = %result.url, "ignoring price source outside trusted domains");
                continue;
            }

            let text = format!("{} {}", result.title, result.description);

            for (input, output) in extract_price_pairs(&text) {
                // Output far below input is usually a mis-parse, not a rate.
                if output * Decimal::from(2) < input {
                    continue;
                }
                pairs.push(PriceCandidate {
                    input,
                    output,
                    source_url: result.url.clone(),
                });
            }

            if pairs.is_empty() {
                singles.extend(extract_single_rates(&text));
            }
        }

        (pairs, singles)
    }
}

#[async_trait]
impl PricingAdapter for GenericWebAdapter {
    fn slug(&self) -> &'static str {
        "_generic"
    }

    async fn resolve(
        &self,
        model_name: &str,
        model_slug: &str,
    ) -> AppResult<Option<PricingResult>> {
        info!(model = model_slug, "generic web fallback");

        let mut candidates = Vec::new();
        let mut single_rates = Vec::new();

        for query in Self::queries(model_name, model_slug) {
            let (pairs, singles) = self.collect_candidates(&query).await;
            candidates.extend(pairs);
            single_rates.extend(singles);

            if candidates.len() >= 3 {
                break;
            }
        }

        if candidates.is_empty() {
            // A combined rate applies to both sides of the conversation.
            if let Some(rate) = single_rates.into_iter().max() {
                info!(model = model_slug, %rate, "found combined rate only");
                return Ok(Some(PricingResult {
                    prompt_usd_per_million: Some(rate),
                    completion_usd_per_million: Some(rate),
                    request_usd: None,
                    source_url: String::new(),
                    notes: Some("single published rate used for both input and output".to_string()),
                }));
            }

            warn!(model = model_slug, "no pricing found via web fallback");
            return Ok(None);
        }

        let tiers: Vec<PricingResult> = candidates
            .into_iter()
            .map(|c| PricingResult {
                prompt_usd_per_million: Some(c.input),
                completion_usd_per_million: Some(c.output),
                request_usd: None,
                source_url: c.source_url,
                notes: None,
            })
            .collect();

        let found = tiers.len();
        let merged = PricingResult::merge_max(tiers);

        if let Some(result) = &merged {
            info!(
                model = model_slug,
                input = ?result.prompt_usd_per_million,
                output = ?result.completion_usd_per_million,
                source = %result.source_url,
                found,
                "generic pricing found"
            );
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn adapter_with_results(results: serde_json::Value) -> (MockServer, GenericWebAdapter) {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"web": {"results": results}})),
            )
            .mount(&server)
            .await;

        let search = WebSearch::new(Some("key".to_string()), Duration::from_secs(5))
            .unwrap()
            .with_endpoint(format!("{}/search", server.uri()));

        let adapter = GenericWebAdapter::new(
            Arc::new(search),
            vec!["openai.com".to_string(), "anthropic.com".to_string()],
        );

        (server, adapter)
    }

    #[tokio::test]
    async fn test_highest_price_wins_across_trusted_sources() {
        let (_server, adapter) = adapter_with_results(json!([
            {"title": "OpenAI pricing", "url": "https://openai.com/api/pricing/",
             "description": "$2.50 per million input tokens and $10 per million output tokens"},
            {"title": "OpenAI enterprise", "url": "https://openai.com/enterprise",
             "description": "$5 per million input tokens and $15 per million output tokens"},
            {"title": "Random blog", "url": "https://random.blog/pricing",
             "description": "$100 per million input tokens and $500 per million output tokens"}
        ]))
        .await;

        let result = adapter
            .resolve("GPT-4o", "openai/gpt-4o")
            .await
            .unwrap()
            .unwrap();

        // The untrusted blog's higher numbers are ignored.
        assert_eq!(result.prompt_usd_per_million, Some(dec("5")));
        assert_eq!(result.completion_usd_per_million, Some(dec("15")));
    }

    #[tokio::test]
    async fn test_untrusted_only_sources_yield_nothing() {
        let (_server, adapter) = adapter_with_results(json!([
            {"title": "Random blog", "url": "https://random.blog/pricing",
             "description": "$3 per million input tokens and $15 per million output tokens"}
        ]))
        .await;

        let result = adapter.resolve("GPT-4o", "openai/gpt-4o").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_single_combined_rate_used_for_both_sides() {
        let (_server, adapter) = adapter_with_results(json!([
            {"title": "Anthropic haiku", "url": "https://anthropic.com/pricing",
             "description": "A flat $1.20 per million tokens"}
        ]))
        .await;

        let result = adapter
            .resolve("Claude Haiku", "anthropic/claude-haiku")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.prompt_usd_per_million, Some(dec("1.20")));
        assert_eq!(result.completion_usd_per_million, Some(dec("1.20")));
        assert!(result.notes.is_some());
    }
}
