//! Validation and change detection for pricing data
//!
//! Validation separates hard failures (the snapshot is not written) from
//! soft warnings (written, logged). Change detection compares a new price
//! against the latest stored snapshot of the same source type and provider;
//! an alert never suppresses the write.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use pw_store::PricingRepo;
use pw_types::{AppResult, SourceType};

use crate::normalize::price_change_percent;

pub struct PricingValidator {
    repo: Arc<PricingRepo>,
    max_change_percent: Decimal,
    min_price: Decimal,
    max_price: Decimal,
}

/// Outcome of validating one price pair.
#[derive(Debug, Clone)]
pub struct Validation {
    pub ok: bool,
    pub warnings: Vec<String>,
}

impl Validation {
    /// Warnings joined for the snapshot's notes column.
    pub fn notes(&self) -> Option<String> {
        if self.warnings.is_empty() {
            None
        } else {
            Some(format!("Warnings: {}", self.warnings.join("; ")))
        }
    }
}

/// Result of comparing against the prior snapshot.
#[derive(Debug, Clone, Default)]
pub struct PriceChange {
    pub alert: bool,
    pub prompt_change_percent: Option<Decimal>,
    pub completion_change_percent: Option<Decimal>,
}

impl PricingValidator {
    pub fn new(repo: Arc<PricingRepo>, max_change_percent: Decimal, max_price: Decimal) -> Self {
        Self {
            repo,
            max_change_percent,
            min_price: Decimal::ZERO,
            max_price,
        }
    }

    /// Sanity-check a normalised price pair.
    ///
    /// Negative values are a hard failure (normalisation already maps
    /// sentinels to `None`, so a negative here means a bug upstream).
    /// Everything else is at most a warning: the snapshot is still written.
    pub fn validate_pricing(
        &self,
        prompt: Option<Decimal>,
        completion: Option<Decimal>,
        model_slug: &str,
        has_image_pricing: bool,
    ) -> Validation {
        let mut ok = true;
        let mut warnings = Vec::new();

        for (label, value) in [("prompt", prompt), ("completion", completion)] {
            let Some(value) = value else { continue };

            if value < self.min_price {
                ok = false;
                warnings.push(format!("negative {} price: {}", label, value));
            } else if value > self.max_price {
                warnings.push(format!(
                    "{} price {} above reasonable cap {}",
                    label, value, self.max_price
                ));
            }
        }

        if let (Some(prompt), Some(completion)) = (prompt, completion) {
            if completion < prompt {
                if has_image_pricing {
                    // Legitimate for image models; not worth a warning.
                    debug!(
                        model = model_slug,
                        %prompt,
                        %completion,
                        "completion below prompt on image-priced model"
                    );
                } else {
                    warnings.push(format!(
                        "completion price {} below prompt price {}",
                        completion, prompt
                    ));
                }
            }
        }

        if !warnings.is_empty() {
            warn!(
                model = model_slug,
                prompt = ?prompt,
                completion = ?completion,
                warnings = ?warnings,
                "pricing_validation_warnings"
            );
        }

        Validation { ok, warnings }
    }

    /// Compare a new price pair against the most recent snapshot of the same
    /// source type and provider. Emits `significant_price_change_detected`
    /// when either side moved more than the configured threshold.
    pub async fn check_price_change(
        &self,
        model_id: Uuid,
        provider_id: Option<Uuid>,
        source_type: SourceType,
        new_prompt: Option<Decimal>,
        new_completion: Option<Decimal>,
    ) -> AppResult<PriceChange> {
        let Some(latest) = self
            .repo
            .get_latest_pricing(model_id, provider_id, source_type)
            .await?
        else {
            return Ok(PriceChange::default());
        };

        let old_prompt = latest.pricing.prompt_usd_per_million;
        let old_completion = latest.pricing.completion_usd_per_million;

        let change = PriceChange {
            prompt_change_percent: price_change_percent(old_prompt, new_prompt),
            completion_change_percent: price_change_percent(old_completion, new_completion),
            alert: false,
        };

        let exceeded = |pct: Option<Decimal>| {
            matches!(pct, Some(p) if p.abs() > self.max_change_percent)
        };
        let alert =
            exceeded(change.prompt_change_percent) || exceeded(change.completion_change_percent);

        if alert {
            warn!(
                model_id = %model_id,
                provider_id = ?provider_id,
                source_type = %source_type,
                old_prompt = ?old_prompt,
                new_prompt = ?new_prompt,
                old_completion = ?old_completion,
                new_completion = ?new_completion,
                prompt_change_percent = ?change.prompt_change_percent,
                completion_change_percent = ?change.completion_change_percent,
                "significant_price_change_detected"
            );
        }

        Ok(PriceChange { alert, ..change })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pw_config::StoreConfig;
    use serde_json::json;
    use std::str::FromStr;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn validator_for(url: &str) -> PricingValidator {
        let repo = PricingRepo::new(
            &StoreConfig {
                url: url.to_string(),
                service_key: "key".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        PricingValidator::new(Arc::new(repo), Decimal::from(30), Decimal::from(10_000))
    }

    // validate_pricing never touches the repo, so a dead URL is fine.
    fn offline_validator() -> PricingValidator {
        validator_for("http://127.0.0.1:1")
    }

    #[test]
    fn test_clean_prices_pass() {
        let v = offline_validator().validate_pricing(
            Some(dec("3")),
            Some(dec("15")),
            "x/y",
            false,
        );
        assert!(v.ok);
        assert!(v.warnings.is_empty());
        assert_eq!(v.notes(), None);
    }

    #[test]
    fn test_negative_price_is_a_hard_failure() {
        let v = offline_validator().validate_pricing(
            Some(dec("-3")),
            Some(dec("15")),
            "x/y",
            false,
        );
        assert!(!v.ok);
        assert_eq!(v.warnings.len(), 1);
    }

    #[test]
    fn test_cap_exceeded_is_soft() {
        let v = offline_validator().validate_pricing(
            Some(dec("25000")),
            Some(dec("50000")),
            "x/y",
            false,
        );
        assert!(v.ok);
        assert_eq!(v.warnings.len(), 2);
        assert!(v.notes().unwrap().contains("reasonable cap"));
    }

    #[test]
    fn test_inversion_warns_for_text_models_only() {
        let text = offline_validator().validate_pricing(
            Some(dec("2.5")),
            Some(dec("2.0")),
            "x/y",
            false,
        );
        assert!(text.ok);
        assert_eq!(text.warnings.len(), 1);

        // Image-capable models legitimately invert; demoted to a debug trace.
        let image = offline_validator().validate_pricing(
            Some(dec("2.5")),
            Some(dec("2.0")),
            "x/y-image",
            true,
        );
        assert!(image.ok);
        assert!(image.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_change_detection_alerts_above_threshold() {
        let server = MockServer::start().await;
        let model_id = Uuid::nil();

        Mock::given(method("GET"))
            .and(path("/rest/v1/model_pricing_daily"))
            .and(query_param("source_type", "eq.aggregator_api"))
            .and(query_param("provider_id", "is.null"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "model_id": model_id,
                "provider_id": null,
                "snapshot_date": "2026-08-01",
                "source_type": "aggregator_api",
                "source_url": null,
                "prompt_usd_per_million": 1.25,
                "completion_usd_per_million": 5.0,
                "currency": "USD",
                "notes": null
            }])))
            .mount(&server)
            .await;

        let change = validator_for(&server.uri())
            .check_price_change(
                model_id,
                None,
                SourceType::AggregatorApi,
                Some(dec("15.0")),
                Some(dec("5.0")),
            )
            .await
            .unwrap();

        assert!(change.alert);
        assert_eq!(change.prompt_change_percent, Some(dec("1100")));
        assert_eq!(change.completion_change_percent, Some(dec("0")));
    }

    #[tokio::test]
    async fn test_change_detection_without_history_is_quiet() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/model_pricing_daily"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let change = validator_for(&server.uri())
            .check_price_change(
                Uuid::nil(),
                None,
                SourceType::AggregatorApi,
                Some(dec("3")),
                Some(dec("15")),
            )
            .await
            .unwrap();

        assert!(!change.alert);
        assert_eq!(change.prompt_change_percent, None);
    }

    #[tokio::test]
    async fn test_small_change_does_not_alert() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/model_pricing_daily"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "model_id": Uuid::nil(),
                "provider_id": null,
                "snapshot_date": "2026-08-01",
                "source_type": "aggregator_api",
                "source_url": null,
                "prompt_usd_per_million": 10.0,
                "completion_usd_per_million": 20.0,
                "currency": "USD",
                "notes": null
            }])))
            .mount(&server)
            .await;

        let change = validator_for(&server.uri())
            .check_price_change(
                Uuid::nil(),
                None,
                SourceType::AggregatorApi,
                Some(dec("12")),
                Some(dec("22")),
            )
            .await
            .unwrap();

        // 20% and 10% moves stay under the 30% threshold.
        assert!(!change.alert);
        assert_eq!(change.prompt_change_percent, Some(dec("20")));
        assert_eq!(change.completion_change_percent, Some(dec("10")));
    }
}
