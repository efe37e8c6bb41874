use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::remote::table::{ListQuery, Predicate, TableClient};

/// REST client for the hosted table service (PostgREST dialect). Every
/// request carries its own deadline; a tripped deadline is reported as
/// `TimedOut`, distinct from a server-side rejection.
pub struct PostgrestClient {
    client: Client,
    base_url: Url,
    api_key: String,
    timeout: Duration,
}

impl PostgrestClient {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid API base URL: {}", e)))?;
        Ok(Self {
            client: Client::new(),
            base_url,
            api_key,
            timeout,
        })
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        self.base_url
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| Error::Internal(format!("Bad table path {}: {}", table, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<JsonValue> {
        let request = request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Prefer", "return=representation");

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| Error::TimedOut(self.timeout))??;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::RemoteSync(format!(
                "{} from table service: {}",
                status, body
            )));
        }
        if body.is_empty() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Representation responses are always arrays; single-row operations
    /// take the first element.
    fn single_row(value: JsonValue) -> Result<JsonValue> {
        match value {
            JsonValue::Array(mut rows) if !rows.is_empty() => Ok(rows.remove(0)),
            other => Err(Error::RemoteSync(format!(
                "Expected a row in the response, got: {}",
                other
            ))),
        }
    }
}

fn literal(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn apply_query(url: &mut Url, query: &ListQuery) {
    let mut pairs = url.query_pairs_mut();
    pairs.append_pair("select", "*");
    for predicate in &query.predicates {
        match predicate {
            Predicate::Eq(field, value) => {
                pairs.append_pair(field, &format!("eq.{}", literal(value)));
            }
            Predicate::Gte(field, value) => {
                pairs.append_pair(field, &format!("gte.{}", literal(value)));
            }
            Predicate::Lte(field, value) => {
                pairs.append_pair(field, &format!("lte.{}", literal(value)));
            }
            Predicate::In(field, values) => {
                let joined = values.iter().map(literal).collect::<Vec<_>>().join(",");
                pairs.append_pair(field, &format!("in.({})", joined));
            }
        }
    }
    if let Some(limit) = query.limit {
        pairs.append_pair("limit", &limit.to_string());
    }
}

#[async_trait]
impl TableClient for PostgrestClient {
    async fn get(&self, table: &str, id: Uuid) -> Result<Option<JsonValue>> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("id", &format!("eq.{}", id));
        let value = self.send(self.client.get(url)).await?;
        match value {
            JsonValue::Array(mut rows) if !rows.is_empty() => Ok(Some(rows.remove(0))),
            _ => Ok(None),
        }
    }

    async fn insert(&self, table: &str, row: JsonValue) -> Result<JsonValue> {
        let url = self.table_url(table)?;
        let value = self.send(self.client.post(url).json(&row)).await?;
        Self::single_row(value)
    }

    async fn update(&self, table: &str, id: Uuid, patch: JsonValue) -> Result<JsonValue> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
        let value = self.send(self.client.patch(url).json(&patch)).await?;
        Self::single_row(value)
    }

    async fn list(&self, table: &str, query: &ListQuery) -> Result<Vec<JsonValue>> {
        let mut url = self.table_url(table)?;
        apply_query(&mut url, query);
        let value = self.send(self.client.get(url)).await?;
        match value {
            JsonValue::Array(rows) => Ok(rows),
            other => Err(Error::RemoteSync(format!(
                "Expected an array response, got: {}",
                other
            ))),
        }
    }
}
