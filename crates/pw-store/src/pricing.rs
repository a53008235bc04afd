//! Pricing store repository
//!
//! Catalogue upserts, the same-day idempotent snapshot write and the
//! latest-by-source lookup. Snapshot writes are keyed on
//! `(model_id, provider_id|NULL, snapshot_date, source_type)`; the write
//! deletes the matching row first (with an `is.null` predicate when the
//! provider is absent, not an equality) and then inserts, so a re-run within
//! the same day overwrites in place while distinct days accumulate.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use pw_config::StoreConfig;
use pw_types::{
    AppError, AppResult, ByokVerification, ModelProviderJoin, ModelRecord, ModelUpsert,
    PricingSnapshot, ProviderRecord, ProviderUpsert, SnapshotInsert, SnapshotWithModel,
    SourceType,
};

use crate::postgrest::PostgrestClient;

const SNAPSHOT_TABLE: &str = "model_pricing_daily";

pub struct PricingRepo {
    pg: PostgrestClient,
}

#[derive(Debug, Deserialize)]
struct SlugRow {
    model_slug: String,
}

#[derive(Debug, Deserialize)]
struct SlugJoinRow {
    models_catalog: Option<SlugRow>,
}

impl PricingRepo {
    pub fn new(config: &StoreConfig, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            pg: PostgrestClient::new(&config.url, &config.service_key, timeout)?,
        })
    }

    // ===== Providers =====

    pub async fn upsert_provider(&self, provider: &ProviderUpsert) -> AppResult<ProviderRecord> {
        debug!(slug = %provider.slug, "upserting provider");

        let mut rows: Vec<ProviderRecord> = self
            .pg
            .upsert("providers", "slug", std::slice::from_ref(provider))
            .await?;

        rows.pop()
            .ok_or_else(|| AppError::Store("provider upsert returned no rows".to_string()))
    }

    pub async fn get_provider_by_slug(&self, slug: &str) -> AppResult<Option<ProviderRecord>> {
        let rows: Vec<ProviderRecord> = self
            .pg
            .select(
                "providers",
                &[
                    ("select", "*".to_string()),
                    ("slug", format!("eq.{}", slug)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        Ok(rows.into_iter().next())
    }

    // ===== Models =====

    pub async fn upsert_model(&self, model: &ModelUpsert) -> AppResult<ModelRecord> {
        debug!(slug = %model.model_slug, "upserting model");

        let mut rows: Vec<ModelRecord> = self
            .pg
            .upsert("models_catalog", "model_slug", std::slice::from_ref(model))
            .await?;

        rows.pop()
            .ok_or_else(|| AppError::Store("model upsert returned no rows".to_string()))
    }

    pub async fn get_model_by_slug(&self, model_slug: &str) -> AppResult<Option<ModelRecord>> {
        let rows: Vec<ModelRecord> = self
            .pg
            .select(
                "models_catalog",
                &[
                    ("select", "*".to_string()),
                    ("model_slug", format!("eq.{}", model_slug)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        Ok(rows.into_iter().next())
    }

    /// Every model slug currently in the catalogue, for the discovery diff.
    pub async fn get_all_model_slugs(&self) -> AppResult<Vec<String>> {
        let rows: Vec<SlugRow> = self
            .pg
            .select("models_catalog", &[("select", "model_slug".to_string())])
            .await?;

        Ok(rows.into_iter().map(|r| r.model_slug).collect())
    }

    // ===== Model-provider links =====

    pub async fn link_model_provider(
        &self,
        model_id: Uuid,
        provider_id: Uuid,
        is_top_provider: bool,
        provider_metadata: Value,
    ) -> AppResult<()> {
        debug!(%model_id, %provider_id, "linking model to provider");

        let link = pw_types::ModelProviderLink {
            model_id,
            provider_id,
            is_top_provider,
            provider_metadata,
        };

        let _: Vec<Value> = self
            .pg
            .upsert(
                "model_providers",
                "model_id,provider_id",
                std::slice::from_ref(&link),
            )
            .await?;

        Ok(())
    }

    pub async fn get_model_providers(&self, model_id: Uuid) -> AppResult<Vec<ModelProviderJoin>> {
        self.pg
            .select(
                "model_providers",
                &[
                    ("select", "*,providers(*)".to_string()),
                    ("model_id", format!("eq.{}", model_id)),
                ],
            )
            .await
    }

    // ===== Pricing snapshots =====

    /// Same-day idempotent snapshot write: delete the row matching the full
    /// key, then insert the replacement.
    pub async fn insert_pricing_snapshot(&self, snapshot: &SnapshotInsert) -> AppResult<()> {
        info!(
            model_id = %snapshot.model_id,
            provider_id = ?snapshot.provider_id,
            snapshot_date = %snapshot.snapshot_date,
            source_type = %snapshot.source_type,
            "inserting pricing snapshot"
        );

        let mut filters = vec![
            ("model_id", format!("eq.{}", snapshot.model_id)),
            ("snapshot_date", format!("eq.{}", snapshot.snapshot_date)),
            ("source_type", format!("eq.{}", snapshot.source_type)),
        ];
        match snapshot.provider_id {
            Some(provider_id) => filters.push(("provider_id", format!("eq.{}", provider_id))),
            None => filters.push(("provider_id", "is.null".to_string())),
        }

        self.pg.delete(SNAPSHOT_TABLE, &filters).await?;
        self.pg
            .insert(SNAPSHOT_TABLE, std::slice::from_ref(snapshot))
            .await
    }

    /// Most recent snapshot for a model, filtered by source type and
    /// provider so snapshots from different origins are never compared.
    pub async fn get_latest_pricing(
        &self,
        model_id: Uuid,
        provider_id: Option<Uuid>,
        source_type: SourceType,
    ) -> AppResult<Option<PricingSnapshot>> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("model_id", format!("eq.{}", model_id)),
            ("source_type", format!("eq.{}", source_type)),
            ("order", "snapshot_date.desc,collected_at.desc".to_string()),
            ("limit", "1".to_string()),
        ];
        match provider_id {
            Some(provider_id) => query.push(("provider_id", format!("eq.{}", provider_id))),
            None => query.push(("provider_id", "is.null".to_string())),
        }

        let rows: Vec<PricingSnapshot> = self.pg.select(SNAPSHOT_TABLE, &query).await?;
        Ok(rows.into_iter().next())
    }

    /// Aggregator snapshots within the freshness window, with the model and
    /// its provider links embedded. Ordered newest first so the caller can
    /// keep the first row per model.
    pub async fn get_recent_aggregator_snapshots(
        &self,
        since: NaiveDate,
    ) -> AppResult<Vec<SnapshotWithModel>> {
        self.pg
            .select(
                SNAPSHOT_TABLE,
                &[
                    (
                        "select",
                        "*,models_catalog(*,model_providers(is_top_provider,provider_metadata,providers(slug)))"
                            .to_string(),
                    ),
                    (
                        "source_type",
                        format!("eq.{}", SourceType::AggregatorApi),
                    ),
                    ("snapshot_date", format!("gte.{}", since)),
                    ("order", "snapshot_date.desc,collected_at.desc".to_string()),
                ],
            )
            .await
    }

    /// Distinct slugs with aggregator pricing inside the freshness window,
    /// for the missing-in-backend delta.
    pub async fn get_recent_priced_slugs(&self, since: NaiveDate) -> AppResult<Vec<String>> {
        let rows: Vec<SlugJoinRow> = self
            .pg
            .select(
                SNAPSHOT_TABLE,
                &[
                    ("select", "models_catalog(model_slug)".to_string()),
                    (
                        "source_type",
                        format!("eq.{}", SourceType::AggregatorApi),
                    ),
                    ("snapshot_date", format!("gte.{}", since)),
                ],
            )
            .await?;

        let slugs: BTreeSet<String> = rows
            .into_iter()
            .filter_map(|r| r.models_catalog.map(|m| m.model_slug))
            .collect();

        Ok(slugs.into_iter().collect())
    }

    // ===== BYOK verifications =====

    pub async fn insert_byok_verification(
        &self,
        verification: &ByokVerification,
    ) -> AppResult<()> {
        info!(
            model_id = %verification.model_id,
            ok = verification.ok,
            "inserting byok verification"
        );

        self.pg
            .insert("byok_verifications", std::slice::from_ref(verification))
            .await
    }
}
