//! Minimal PostgREST client shared by both repositories

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use pw_types::{AppError, AppResult};

pub(crate) struct PostgrestClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl PostgrestClient {
    pub fn new(url: &str, service_key: &str, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> AppResult<Vec<T>> {
        let response = self
            .authed(self.client.get(self.table_url(table)).query(query))
            .send()
            .await?;

        Ok(check(table, response).await?.json().await?)
    }

    /// Upsert rows on a conflict column list, returning the stored
    /// representation.
    pub async fn upsert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        on_conflict: &str,
        rows: &B,
    ) -> AppResult<Vec<T>> {
        let response = self
            .authed(
                self.client
                    .post(self.table_url(table))
                    .query(&[("on_conflict", on_conflict)])
                    .header(
                        "Prefer",
                        "resolution=merge-duplicates,return=representation",
                    )
                    .json(rows),
            )
            .send()
            .await?;

        Ok(check(table, response).await?.json().await?)
    }

    pub async fn insert<B: Serialize + ?Sized>(&self, table: &str, rows: &B) -> AppResult<()> {
        let response = self
            .authed(
                self.client
                    .post(self.table_url(table))
                    .header("Prefer", "return=minimal")
                    .json(rows),
            )
            .send()
            .await?;

        check(table, response).await?;
        Ok(())
    }

    pub async fn delete(&self, table: &str, query: &[(&str, String)]) -> AppResult<()> {
        let response = self
            .authed(self.client.delete(self.table_url(table)).query(query))
            .send()
            .await?;

        check(table, response).await?;
        Ok(())
    }

    pub async fn update<B: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &[(&str, String)],
        patch: &B,
    ) -> AppResult<()> {
        let response = self
            .authed(
                self.client
                    .patch(self.table_url(table))
                    .query(query)
                    .header("Prefer", "return=minimal")
                    .json(patch),
            )
            .send()
            .await?;

        check(table, response).await?;
        Ok(())
    }
}

async fn check(table: &str, response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(AppError::Store(format!(
        "{} returned status {}: {}",
        table, status, body
    )))
}

/// PostgREST `in.(...)` predicate with quoting for values that carry
/// reserved characters (model slugs contain `/`).
pub(crate) fn in_list(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| format!("\"{}\"", v)).collect();
    format!("in.({})", quoted.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_list_quotes_values() {
        let values = vec!["openai/gpt-4o".to_string(), "x/y".to_string()];
        assert_eq!(in_list(&values), "in.(\"openai/gpt-4o\",\"x/y\")");
    }
}
