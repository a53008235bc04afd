//! Price normalisation
//!
//! The aggregator quotes token rates in USD per single token; the stores
//! keep USD per 1M tokens. All arithmetic happens on `Decimal` so no value
//! passes through a binary float on its way to a store.

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use pw_aggregator::RawPricing;
use pw_types::NormalizedPricing;

fn one_million() -> Decimal {
    Decimal::from(1_000_000u32)
}

/// Parse a JSON value (string or number) into a `Decimal`.
///
/// `None`, JSON null, the empty string and anything unparseable map to
/// `None`. serde_json renders small floats in scientific notation, so both
/// plain and scientific forms are accepted.
pub fn to_decimal(value: Option<&Value>) -> Option<Decimal> {
    let value = value?;

    let raw = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            warn!(value = %other, "decimal conversion failed: unsupported JSON type");
            return None;
        }
    };

    if raw.is_empty() {
        return None;
    }

    match raw
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&raw))
    {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(value = %raw, error = %e, "decimal conversion failed");
            None
        }
    }
}

/// Convert a per-token rate to USD per 1M tokens.
///
/// Negative values are upstream sentinels for "dynamic routing / not
/// applicable" and map to `None`. Zero is a real price: free tiers are
/// expressible and persisted.
pub fn per_token_to_per1m(value: Option<&Value>) -> Option<Decimal> {
    let decimal = to_decimal(value)?;

    if decimal < Decimal::ZERO {
        debug!(value = %decimal, "sentinel_pricing_value");
        return None;
    }

    Some(decimal * one_million())
}

/// Normalise the aggregator's pricing object field by field: per-token
/// fields are scaled to per-1M, absolute fields pass through unchanged.
pub fn normalize_aggregator_pricing(pricing: &RawPricing) -> NormalizedPricing {
    NormalizedPricing {
        prompt_usd_per_million: per_token_to_per1m(pricing.prompt.as_ref()),
        completion_usd_per_million: per_token_to_per1m(pricing.completion.as_ref()),
        internal_reasoning_usd_per_million: per_token_to_per1m(
            pricing.internal_reasoning.as_ref(),
        ),
        input_cache_read_usd_per_million: per_token_to_per1m(pricing.input_cache_read.as_ref()),
        input_cache_write_usd_per_million: per_token_to_per1m(
            pricing.input_cache_write.as_ref(),
        ),
        request_usd: to_decimal(pricing.request.as_ref()),
        image_usd: to_decimal(pricing.image.as_ref()),
        web_search_usd: to_decimal(pricing.web_search.as_ref()),
    }
}

/// Percentage change between two prices, or `None` when the comparison is
/// not meaningful (either side missing, or the old price was zero).
pub fn price_change_percent(old: Option<Decimal>, new: Option<Decimal>) -> Option<Decimal> {
    let (old, new) = (old?, new?);

    if old.is_zero() {
        return None;
    }

    ((new - old) / old).checked_mul(Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_per_token_scaling() {
        assert_eq!(
            per_token_to_per1m(Some(&json!("0.000003"))),
            Some(dec("3.000000"))
        );
        assert_eq!(
            per_token_to_per1m(Some(&json!("0.000015"))),
            Some(dec("15.000000"))
        );
    }

    #[test]
    fn test_negative_sentinel_maps_to_none() {
        assert_eq!(per_token_to_per1m(Some(&json!("-1"))), None);
        assert_eq!(per_token_to_per1m(Some(&json!(-0.5))), None);
    }

    #[test]
    fn test_zero_is_a_real_price() {
        assert_eq!(per_token_to_per1m(Some(&json!("0"))), Some(Decimal::ZERO));
    }

    #[test]
    fn test_unparseable_input_maps_to_none() {
        assert_eq!(per_token_to_per1m(None), None);
        assert_eq!(per_token_to_per1m(Some(&Value::Null)), None);
        assert_eq!(per_token_to_per1m(Some(&json!(""))), None);
        assert_eq!(per_token_to_per1m(Some(&json!("n/a"))), None);
        assert_eq!(per_token_to_per1m(Some(&json!(true))), None);
    }

    #[test]
    fn test_scientific_notation_from_json_numbers() {
        // serde_json renders 0.00000025 as 2.5e-7.
        assert_eq!(
            per_token_to_per1m(Some(&json!(0.00000025))),
            Some(dec("0.25"))
        );
    }

    #[test]
    fn test_round_trip() {
        for raw in ["0", "0.000003", "0.0001", "12"] {
            let scaled = per_token_to_per1m(Some(&json!(raw))).unwrap();
            assert_eq!(scaled / Decimal::from(1_000_000u32), dec(raw));
        }
    }

    #[test]
    fn test_normalize_full_pricing_object() {
        let pricing: RawPricing = serde_json::from_value(json!({
            "prompt": "0.000003",
            "completion": "0.000015",
            "internal_reasoning": "-1",
            "input_cache_read": "0.0000003",
            "request": "0.005",
            "image": "0.001",
        }))
        .unwrap();

        let normalized = normalize_aggregator_pricing(&pricing);

        assert_eq!(normalized.prompt_usd_per_million, Some(dec("3.000000")));
        assert_eq!(
            normalized.completion_usd_per_million,
            Some(dec("15.000000"))
        );
        // Sentinel in one field does not disturb the others.
        assert_eq!(normalized.internal_reasoning_usd_per_million, None);
        assert_eq!(
            normalized.input_cache_read_usd_per_million,
            Some(dec("0.3000000"))
        );
        // Absolute fees pass through unscaled.
        assert_eq!(normalized.request_usd, Some(dec("0.005")));
        assert_eq!(normalized.image_usd, Some(dec("0.001")));
        assert_eq!(normalized.web_search_usd, None);
    }

    #[test]
    fn test_price_change_percent() {
        assert_eq!(
            price_change_percent(Some(dec("10")), Some(dec("15"))),
            Some(dec("50"))
        );
        assert_eq!(
            price_change_percent(Some(dec("1.25")), Some(dec("15.0"))),
            Some(dec("1100"))
        );
        assert_eq!(price_change_percent(Some(Decimal::ZERO), Some(dec("5"))), None);
        assert_eq!(price_change_percent(None, Some(dec("5"))), None);
        assert_eq!(price_change_percent(Some(dec("5")), None), None);
    }
}
