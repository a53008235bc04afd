//! Provider pricing adapters
//!
//! Each adapter resolves a `(provider, model)` pair to published pricing,
//! normalised to USD per 1M tokens. Specific adapters exist for the
//! well-known providers; everything else falls through to the generic
//! web-search adapter. Credentials are injected at construction, never read
//! from ambient state.

use std::str::FromStr;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use pw_types::AppResult;

pub mod anthropic;
pub mod cohere;
pub mod deepinfra;
pub mod deepseek;
pub mod fireworks;
pub mod generic;
pub mod google;
pub mod groq;
pub mod mistral;
pub mod openai;
pub mod registry;
pub mod search;
pub mod together;

use crate::search::WebSearch;

/// Pricing resolved from a provider source, in USD per 1M tokens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingResult {
    pub prompt_usd_per_million: Option<Decimal>,
    pub completion_usd_per_million: Option<Decimal>,
    pub request_usd: Option<Decimal>,
    pub source_url: String,
    pub notes: Option<String>,
}

impl PricingResult {
    /// Merge candidate tiers by taking the maximum of each numeric field
    /// independently. The source URL comes from the tier with the highest
    /// combined token rate.
    pub fn merge_max(tiers: Vec<PricingResult>) -> Option<PricingResult> {
        if tiers.is_empty() {
            return None;
        }

        let best = tiers
            .iter()
            .max_by_key(|t| {
                t.prompt_usd_per_million.unwrap_or_default()
                    + t.completion_usd_per_million.unwrap_or_default()
            })
            .cloned()?;

        let mut merged = PricingResult {
            source_url: best.source_url,
            notes: best.notes,
            ..Default::default()
        };

        for tier in &tiers {
            merged.prompt_usd_per_million =
                max_opt(merged.prompt_usd_per_million, tier.prompt_usd_per_million);
            merged.completion_usd_per_million = max_opt(
                merged.completion_usd_per_million,
                tier.completion_usd_per_million,
            );
            merged.request_usd = max_opt(merged.request_usd, tier.request_usd);
        }

        Some(merged)
    }
}

fn max_opt(a: Option<Decimal>, b: Option<Decimal>) -> Option<Decimal> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

/// A provider-specific pricing resolver.
#[async_trait]
pub trait PricingAdapter: Send + Sync {
    /// Provider slug this adapter answers for.
    fn slug(&self) -> &'static str;

    /// Resolve pricing for one model. `None` means the adapter found
    /// nothing credible, which is not an error.
    async fn resolve(&self, model_name: &str, model_slug: &str)
        -> AppResult<Option<PricingResult>>;
}

/// Hardcoded price list for providers with stable published rates, used as
/// a fallback when search yields nothing. Prices are decimal strings to stay
/// off binary floats.
pub(crate) struct KnownPrices {
    pub table: &'static [(&'static str, &'static str, &'static str)],
    pub source_url: &'static str,
}

impl KnownPrices {
    pub fn lookup(&self, model: &str) -> Option<PricingResult> {
        let normalized = model
            .to_lowercase()
            .replace([' ', '_'], "-")
            .trim()
            .to_string();

        let entry = self
            .table
            .iter()
            .find(|(name, _, _)| *name == normalized)
            .or_else(|| {
                self.table
                    .iter()
                    .find(|(name, _, _)| normalized.contains(name) || name.contains(&normalized))
            })?;

        Some(PricingResult {
            prompt_usd_per_million: Decimal::from_str(entry.1).ok(),
            completion_usd_per_million: Decimal::from_str(entry.2).ok(),
            request_usd: None,
            source_url: self.source_url.to_string(),
            notes: None,
        })
    }
}

// Pricing phrases seen on provider documentation and blog pages. Each pair
// pattern captures (input, output); single patterns capture one combined
// rate.
static PAIR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\$(\d+(?:\.\d+)?)\s*per\s+million\s+input\s+tokens?\s+and\s+\$(\d+(?:\.\d+)?)\s*per\s+million\s+output",
        r"\$(\d+(?:\.\d+)?)/MTok\s*\(input\)[,\s]+\$(\d+(?:\.\d+)?)/MTok\s*\(output\)",
        r"\$(\d+(?:\.\d+)?)\s*\(input\)[,\s]+\$(\d+(?:\.\d+)?)\s*\(output\)",
        r"costs?\s+\$(\d+(?:\.\d+)?)\s*per\s+million\s+input[,\s]+\$(\d+(?:\.\d+)?)\s*per\s+million\s+output",
        r"input:\s*\$(\d+(?:\.\d+)?)[,\s]+output:\s*\$(\d+(?:\.\d+)?)",
        r"starts?\s+at\s+\$(\d+(?:\.\d+)?)\s*per\s+million\s+input.*?\$(\d+(?:\.\d+)?)\s*per\s+million\s+output",
        r"\$(\d+(?:\.\d+)?)[/-]\$(\d+(?:\.\d+)?)\s*(?:per\s+million|/million)",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("pricing pattern compiles"))
    .collect()
});

static SINGLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\$(\d+(?:\.\d+)?)\s*per\s+million\s+tokens",
        r"\$(\d+(?:\.\d+)?)\s*/\s*(?:1M|million)\s+tokens",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("pricing pattern compiles"))
    .collect()
});

/// Lowest and highest rate the extractors will believe, per 1M tokens.
pub(crate) fn min_credible() -> Decimal {
    Decimal::new(1, 2) // $0.01
}

pub(crate) fn max_credible() -> Decimal {
    Decimal::from(10_000)
}

pub(crate) fn is_credible(value: Decimal) -> bool {
    value >= min_credible() && value <= max_credible()
}

/// All (input, output) pairs found in a text fragment.
pub(crate) fn extract_price_pairs(text: &str) -> Vec<(Decimal, Decimal)> {
    let mut pairs = Vec::new();

    for pattern in PAIR_PATTERNS.iter() {
        for captures in pattern.captures_iter(text) {
            let (Some(input), Some(output)) = (captures.get(1), captures.get(2)) else {
                continue;
            };
            let (Ok(input), Ok(output)) = (
                Decimal::from_str(input.as_str()),
                Decimal::from_str(output.as_str()),
            ) else {
                continue;
            };

            if is_credible(input) && is_credible(output) {
                pairs.push((input, output));
            }
        }
    }

    pairs
}

pub(crate) fn extract_first_pair(text: &str) -> Option<(Decimal, Decimal)> {
    extract_price_pairs(text).into_iter().next()
}

/// Combined single rates ("$X per million tokens") found in a text fragment.
pub(crate) fn extract_single_rates(text: &str) -> Vec<Decimal> {
    SINGLE_PATTERNS
        .iter()
        .flat_map(|pattern| pattern.captures_iter(text))
        .filter_map(|captures| Decimal::from_str(captures.get(1)?.as_str()).ok())
        .filter(|v| is_credible(*v))
        .collect()
}

/// Model identifier as the provider knows it: the part after the namespace
/// prefix, or the lowercased display name when the slug has no prefix.
pub(crate) fn model_tail(model_name: &str, model_slug: &str) -> String {
    match model_slug.split_once('/') {
        Some((_, tail)) => tail.to_string(),
        None => model_name.to_lowercase(),
    }
}

/// One search pass shared by the specific adapters: query, take the first
/// credible (input, output) pair from the results.
pub(crate) async fn search_for_pricing(
    search: &WebSearch,
    query: &str,
    fallback_source_url: &str,
) -> Option<PricingResult> {
    for result in search.search(query, 5).await {
        let text = format!("{} {}", result.title, result.description);
        if let Some((input, output)) = extract_first_pair(&text) {
            let source_url = if result.url.is_empty() {
                fallback_source_url.to_string()
            } else {
                result.url
            };

            return Some(PricingResult {
                prompt_usd_per_million: Some(input),
                completion_usd_per_million: Some(output),
                request_usd: None,
                source_url,
                notes: None,
            });
        }
    }

    None
}
