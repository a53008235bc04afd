//! Backend projection store repository
//!
//! The downstream store keeps one denormalised row per model in
//! `llm_models`, keyed by unique slug. The sync stages rows, upserts them,
//! and deactivates whatever the staging pass no longer covers.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use pw_config::StoreConfig;
use pw_types::{AppResult, BackendModelRecord, BackendRowMeta};

use crate::postgrest::{in_list, PostgrestClient};

const TABLE: &str = "llm_models";

pub struct BackendRepo {
    pg: PostgrestClient,
}

impl BackendRepo {
    pub fn new(config: &StoreConfig, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            pg: PostgrestClient::new(&config.url, &config.service_key, timeout)?,
        })
    }

    pub async fn upsert_models(&self, records: &[BackendModelRecord]) -> AppResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        info!(count = records.len(), "upserting backend model rows");
        let _: Vec<Value> = self.pg.upsert(TABLE, "model_slug", records).await?;
        Ok(())
    }

    /// Every row's slug plus the fields the sync must preserve.
    pub async fn list_rows(&self) -> AppResult<Vec<BackendRowMeta>> {
        self.pg
            .select(
                TABLE,
                &[(
                    "select",
                    "model_slug,model_type,is_active,is_default,sort_order".to_string(),
                )],
            )
            .await
    }

    /// Mark rows inactive because the latest staging pass did not cover
    /// them. Also clears the default flag so a vanished model can never stay
    /// the default.
    pub async fn deactivate_models(&self, slugs: &[String]) -> AppResult<()> {
        if slugs.is_empty() {
            return Ok(());
        }

        info!(count = slugs.len(), "deactivating missing backend models");
        self.pg
            .update(
                TABLE,
                &[("model_slug", in_list(slugs))],
                &json!({
                    "is_active": false,
                    "is_default": false,
                    "updated_at": Utc::now(),
                }),
            )
            .await
    }

    pub async fn activate_models(&self, slugs: &[String]) -> AppResult<()> {
        if slugs.is_empty() {
            return Ok(());
        }

        self.pg
            .update(
                TABLE,
                &[("model_slug", in_list(slugs))],
                &json!({
                    "is_active": true,
                    "updated_at": Utc::now(),
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo_for(server: &MockServer) -> BackendRepo {
        BackendRepo::new(
            &StoreConfig {
                url: server.uri(),
                service_key: "backend-key".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn record(slug: &str) -> BackendModelRecord {
        BackendModelRecord {
            model_slug: slug.to_string(),
            display_name: slug.to_string(),
            provider: "openai".to_string(),
            model_type: "chat".to_string(),
            context_window: Some(128_000),
            max_output_tokens: None,
            cost_per_million_input: Some(Decimal::new(25, 1)),
            cost_per_million_output: Some(Decimal::new(10, 0)),
            is_active: true,
            is_default: false,
            sort_order: 100,
            capabilities: json!({"supports_tools": true}),
            metadata: json!({"tier": "budget"}),
            is_thinking_model: false,
            updated_at: Utc::now(),
            sort_cost: Decimal::new(10, 0),
        }
    }

    #[tokio::test]
    async fn test_upsert_conflicts_on_slug_and_skips_sort_cost() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/llm_models"))
            .and(query_param("on_conflict", "model_slug"))
            .and(body_partial_json(json!([{
                "model_slug": "openai/gpt-4o",
                "model_type": "chat",
                "is_active": true,
            }])))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        repo_for(&server)
            .upsert_models(&[record("openai/gpt-4o")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_empty_is_a_noop() {
        let server = MockServer::start().await;
        // No mock mounted: any request would 404 and error.
        repo_for(&server).upsert_models(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_deactivate_uses_quoted_in_list() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/llm_models"))
            .and(query_param(
                "model_slug",
                "in.(\"gone/model-a\",\"gone/model-b\")",
            ))
            .and(body_partial_json(json!({
                "is_active": false,
                "is_default": false,
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        repo_for(&server)
            .deactivate_models(&["gone/model-a".to_string(), "gone/model-b".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_rows_reads_preserved_fields() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/llm_models"))
            .and(query_param(
                "select",
                "model_slug,model_type,is_active,is_default,sort_order",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"model_slug": "openai/gpt-4o", "model_type": "chat", "is_active": true, "is_default": true, "sort_order": 100}
            ])))
            .mount(&server)
            .await;

        let rows = repo_for(&server).list_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_default);
        assert_eq!(rows[0].sort_order, 100);
    }
}
