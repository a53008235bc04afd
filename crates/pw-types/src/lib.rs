//! Shared domain types for the pricing pipeline
//!
//! Row shapes for the pricing store and the backend projection store, plus
//! the handful of value types every crate in the workspace speaks.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod errors;

pub use errors::{AppError, AppResult};

/// Origin of a pricing snapshot.
///
/// Snapshots from different source types are never compared to each other;
/// "latest pricing" lookups always filter on this label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    AggregatorApi,
    ProviderSite,
    WebFallback,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::AggregatorApi => "aggregator_api",
            SourceType::ProviderSite => "provider_site",
            SourceType::WebFallback => "web_fallback",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue filters applied when listing models from the aggregator.
#[derive(Debug, Clone, Default)]
pub struct ModelFilters {
    /// Capability tags the model must support (applied server-side).
    pub supported_parameters: Vec<String>,
    /// Filter on the distillable flag (applied client-side).
    pub distillable: Option<bool>,
    /// Required input modalities (applied client-side).
    pub input_modalities: Vec<String>,
    /// Required output modalities (applied client-side).
    pub output_modalities: Vec<String>,
}

impl ModelFilters {
    pub fn is_empty(&self) -> bool {
        self.supported_parameters.is_empty()
            && self.distillable.is_none()
            && self.input_modalities.is_empty()
            && self.output_modalities.is_empty()
    }
}

// ===== Pricing store rows =====

/// Stored provider catalogue row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub provider_id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub homepage_url: Option<String>,
    pub pricing_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for upserting a provider by slug.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderUpsert {
    pub slug: String,
    pub display_name: String,
    pub homepage_url: Option<String>,
    pub pricing_url: Option<String>,
}

/// Stored model catalogue row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: Uuid,
    pub model_slug: String,
    pub canonical_slug: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub context_length: Option<u32>,
    /// Opaque architecture blob as reported by the aggregator.
    pub architecture: Option<Value>,
    pub supported_parameters: Option<Vec<String>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for upserting a model by slug.
#[derive(Debug, Clone, Serialize)]
pub struct ModelUpsert {
    pub model_slug: String,
    pub canonical_slug: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub context_length: Option<u32>,
    pub architecture: Option<Value>,
    pub supported_parameters: Option<Vec<String>>,
}

/// Link row between a model and one of its providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProviderLink {
    pub model_id: Uuid,
    pub provider_id: Uuid,
    pub is_top_provider: bool,
    pub provider_metadata: Value,
}

/// Link row with the provider embedded, as returned by the join query.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelProviderJoin {
    pub provider_id: Uuid,
    #[serde(default)]
    pub is_top_provider: bool,
    pub providers: Option<ProviderRecord>,
}

/// Monetary fields of a snapshot, normalised to USD per 1M tokens.
///
/// Field names double as the store's column names so the struct flattens
/// straight into snapshot payloads. `request_usd`, `image_usd` and
/// `web_search_usd` are absolute amounts, not per-token rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPricing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_usd_per_million: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_usd_per_million: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_usd: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_usd: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search_usd: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_reasoning_usd_per_million: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cache_read_usd_per_million: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cache_write_usd_per_million: Option<Decimal>,
}

impl NormalizedPricing {
    /// Whether either token rate is present.
    ///
    /// A snapshot with neither a prompt nor a completion rate is not worth
    /// writing; per-request or image fees alone do not price a model.
    pub fn has_token_pricing(&self) -> bool {
        self.prompt_usd_per_million.is_some() || self.completion_usd_per_million.is_some()
    }

    /// Whether any monetary field is strictly positive.
    pub fn has_paid_component(&self) -> bool {
        [
            self.prompt_usd_per_million,
            self.completion_usd_per_million,
            self.request_usd,
            self.image_usd,
            self.web_search_usd,
            self.internal_reasoning_usd_per_million,
            self.input_cache_read_usd_per_million,
            self.input_cache_write_usd_per_million,
        ]
        .iter()
        .any(|v| matches!(v, Some(d) if d.is_sign_positive() && !d.is_zero()))
    }
}

/// Immutable daily pricing fact row.
#[derive(Debug, Clone, Deserialize)]
pub struct PricingSnapshot {
    pub model_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub snapshot_date: NaiveDate,
    pub source_type: SourceType,
    pub source_url: Option<String>,
    #[serde(flatten)]
    pub pricing: NormalizedPricing,
    pub currency: String,
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Payload for writing a snapshot.
///
/// The write is keyed on `(model_id, provider_id|NULL, snapshot_date,
/// source_type)`; re-ingestion on the same key within the same day replaces
/// the prior row.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInsert {
    pub model_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub snapshot_date: NaiveDate,
    pub source_type: SourceType,
    pub source_url: Option<String>,
    #[serde(flatten)]
    pub pricing: NormalizedPricing,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SnapshotInsert {
    pub fn new(
        model_id: Uuid,
        provider_id: Option<Uuid>,
        snapshot_date: NaiveDate,
        source_type: SourceType,
        source_url: Option<String>,
        pricing: NormalizedPricing,
        notes: Option<String>,
    ) -> Self {
        Self {
            model_id,
            provider_id,
            snapshot_date,
            source_type,
            source_url,
            pricing,
            currency: "USD".to_string(),
            notes,
        }
    }
}

/// Audit row recording one tiny real request used to reconcile
/// aggregator-reported cost with upstream-provider cost.
#[derive(Debug, Clone, Serialize)]
pub struct ByokVerification {
    pub model_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub aggregator_cost_usd: Option<Decimal>,
    pub upstream_cost_usd: Option<Decimal>,
    pub response_ms: Option<i64>,
    pub ok: bool,
    pub raw_usage: Value,
}

// ===== Backend projection rows =====

/// Denormalised model row staged for the backend projection store.
#[derive(Debug, Clone, Serialize)]
pub struct BackendModelRecord {
    pub model_slug: String,
    pub display_name: String,
    pub provider: String,
    pub model_type: String,
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub cost_per_million_input: Option<Decimal>,
    pub cost_per_million_output: Option<Decimal>,
    pub is_active: bool,
    pub is_default: bool,
    pub sort_order: i32,
    pub capabilities: Value,
    pub metadata: Value,
    pub is_thinking_model: bool,
    pub updated_at: DateTime<Utc>,
    /// Staging-only ranking key, never written to the store.
    #[serde(skip)]
    pub sort_cost: Decimal,
}

/// The fields of an existing backend row the sync must not clobber.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendRowMeta {
    pub model_slug: String,
    pub model_type: String,
    pub is_active: bool,
    pub is_default: bool,
    pub sort_order: i32,
}

// ===== Join shapes for backend staging =====

/// Provider slug as embedded in deep join queries.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSlugRef {
    pub slug: String,
}

/// Model-provider link with just the provider slug and metadata embedded.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkSlugJoin {
    #[serde(default)]
    pub is_top_provider: bool,
    #[serde(default)]
    pub provider_metadata: Option<Value>,
    pub providers: Option<ProviderSlugRef>,
}

/// Model row with its provider links embedded.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelWithLinks {
    #[serde(flatten)]
    pub model: ModelRecord,
    #[serde(default)]
    pub model_providers: Vec<LinkSlugJoin>,
}

impl ModelWithLinks {
    /// Provider string for the projection: top provider slug if known, else
    /// the slug's namespace prefix.
    pub fn derived_provider(&self) -> String {
        if let Some(link) = self.model_providers.iter().find(|l| l.is_top_provider) {
            if let Some(p) = &link.providers {
                return p.slug.clone();
            }
        }
        match self.model.model_slug.split_once('/') {
            Some((ns, _)) => ns.to_string(),
            None => "aggregator".to_string(),
        }
    }

    /// Output cap from the top provider's metadata blob, when reported.
    pub fn max_output_tokens(&self) -> Option<u32> {
        self.model_providers
            .iter()
            .find(|l| l.is_top_provider)
            .and_then(|l| l.provider_metadata.as_ref())
            .and_then(|m| m.get("max_completion_tokens"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }
}

/// Recent snapshot row with its model (and links) embedded, used to stage the
/// backend projection.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotWithModel {
    #[serde(flatten)]
    pub snapshot: PricingSnapshot,
    pub models_catalog: Option<ModelWithLinks>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_source_type_round_trip() {
        for st in [
            SourceType::AggregatorApi,
            SourceType::ProviderSite,
            SourceType::WebFallback,
        ] {
            let json = serde_json::to_string(&st).unwrap();
            assert_eq!(json, format!("\"{}\"", st.as_str()));
            let back: SourceType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, st);
        }
    }

    #[test]
    fn test_has_token_pricing() {
        let mut pricing = NormalizedPricing::default();
        assert!(!pricing.has_token_pricing());

        pricing.request_usd = Some(Decimal::ONE);
        assert!(!pricing.has_token_pricing());

        pricing.prompt_usd_per_million = Some(Decimal::ZERO);
        assert!(pricing.has_token_pricing());
    }

    #[test]
    fn test_has_paid_component_ignores_zero_and_none() {
        let mut pricing = NormalizedPricing {
            prompt_usd_per_million: Some(Decimal::ZERO),
            ..Default::default()
        };
        assert!(!pricing.has_paid_component());

        pricing.image_usd = Some(Decimal::from_str("0.001").unwrap());
        assert!(pricing.has_paid_component());
    }

    #[test]
    fn test_snapshot_insert_flattens_pricing() {
        let insert = SnapshotInsert::new(
            Uuid::nil(),
            None,
            NaiveDate::from_ymd_opt(2026, 8, 2).unwrap(),
            SourceType::AggregatorApi,
            None,
            NormalizedPricing {
                prompt_usd_per_million: Some(Decimal::from_str("3.0").unwrap()),
                ..Default::default()
            },
            None,
        );

        let value = serde_json::to_value(&insert).unwrap();
        assert_eq!(value["currency"], "USD");
        assert_eq!(value["source_type"], "aggregator_api");
        assert_eq!(value["prompt_usd_per_million"], "3.0");
        assert!(value.get("completion_usd_per_million").is_none());
    }

    #[test]
    fn test_derived_provider_prefers_top_provider() {
        let json = serde_json::json!({
            "model_id": "00000000-0000-0000-0000-000000000000",
            "model_slug": "deepseek/deepseek-r1",
            "canonical_slug": null,
            "display_name": "DeepSeek R1",
            "context_length": 64000,
            "architecture": null,
            "supported_parameters": null,
            "model_providers": [
                {"is_top_provider": false, "providers": {"slug": "fireworks"}},
                {"is_top_provider": true, "providers": {"slug": "deepseek"}}
            ]
        });
        let model: ModelWithLinks = serde_json::from_value(json).unwrap();
        assert_eq!(model.derived_provider(), "deepseek");
    }

    #[test]
    fn test_derived_provider_falls_back_to_namespace() {
        let json = serde_json::json!({
            "model_id": "00000000-0000-0000-0000-000000000000",
            "model_slug": "mistralai/mistral-large",
            "canonical_slug": null,
            "display_name": null,
            "context_length": null,
            "architecture": null,
            "supported_parameters": null
        });
        let model: ModelWithLinks = serde_json::from_value(json).unwrap();
        assert_eq!(model.derived_provider(), "mistralai");
    }
}
