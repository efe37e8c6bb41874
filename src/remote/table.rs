use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;

/// Predicates the persistence service can evaluate server-side. The filter
/// engine's richer semantics (substring search, range overlap) stay local.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(String, JsonValue),
    Gte(String, JsonValue),
    Lte(String, JsonValue),
    In(String, Vec<JsonValue>),
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub predicates: Vec<Predicate>,
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn eq(mut self, field: &str, value: impl Into<JsonValue>) -> Self {
        self.predicates.push(Predicate::Eq(field.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<JsonValue>) -> Self {
        self.predicates.push(Predicate::Gte(field.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, field: &str, value: impl Into<JsonValue>) -> Self {
        self.predicates.push(Predicate::Lte(field.to_string(), value.into()));
        self
    }

    pub fn is_in(mut self, field: &str, values: Vec<JsonValue>) -> Self {
        self.predicates.push(Predicate::In(field.to_string(), values));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Table-oriented read/write interface of the hosted persistence service.
///
/// `insert` returns the stored row with server-assigned fields (id,
/// created_at) filled in; `update` takes a partial field set and returns the
/// full updated row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableClient: Send + Sync {
    async fn get(&self, table: &str, id: Uuid) -> Result<Option<JsonValue>>;

    async fn insert(&self, table: &str, row: JsonValue) -> Result<JsonValue>;

    async fn update(&self, table: &str, id: Uuid, patch: JsonValue) -> Result<JsonValue>;

    async fn list(&self, table: &str, query: &ListQuery) -> Result<Vec<JsonValue>>;
}
