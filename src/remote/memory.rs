use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::remote::table::{ListQuery, Predicate, TableClient};

/// In-process stand-in for the hosted table service. Assigns server ids and
/// timestamps on insert like the real service, and can be armed to fail the
/// next call for rollback tests.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<JsonValue>>>,
    fail_plan: Mutex<Option<(u32, String)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next call returns `RemoteSync` with this message instead of
    /// touching any table.
    pub fn fail_next(&self, message: &str) {
        self.fail_nth(1, message);
    }

    /// Arms a failure for the nth call from now (1 is the next call);
    /// earlier calls go through untouched. Lets tests break a multi-write
    /// operation partway.
    pub fn fail_nth(&self, nth: u32, message: &str) {
        *locked(&self.fail_plan) = Some((nth, message.to_string()));
    }

    pub fn rows(&self, table: &str) -> Vec<JsonValue> {
        locked(&self.tables).get(table).cloned().unwrap_or_default()
    }

    pub fn seed(&self, table: &str, rows: Vec<JsonValue>) {
        locked(&self.tables).insert(table.to_string(), rows);
    }

    fn check_fail(&self) -> Result<()> {
        let mut plan = locked(&self.fail_plan);
        if let Some((remaining, message)) = plan.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                let message = message.clone();
                *plan = None;
                return Err(Error::RemoteSync(message));
            }
        }
        Ok(())
    }
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn row_id(row: &JsonValue) -> Option<Uuid> {
    row.get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}

fn matches(row: &JsonValue, predicate: &Predicate) -> bool {
    let field_value = |field: &str| row.get(field);
    match predicate {
        Predicate::Eq(field, value) => field_value(field) == Some(value),
        Predicate::Gte(field, value) => cmp_ge(field_value(field), value),
        Predicate::Lte(field, value) => cmp_ge(Some(value), field_value(field).unwrap_or(&JsonValue::Null)),
        Predicate::In(field, values) => field_value(field).is_some_and(|v| values.contains(v)),
    }
}

fn cmp_ge(left: Option<&JsonValue>, right: &JsonValue) -> bool {
    match (left, right) {
        (Some(JsonValue::Number(a)), JsonValue::Number(b)) => {
            a.as_f64().unwrap_or(f64::NAN) >= b.as_f64().unwrap_or(f64::NAN)
        }
        (Some(JsonValue::String(a)), JsonValue::String(b)) => a >= b,
        _ => false,
    }
}

#[async_trait]
impl TableClient for MemoryBackend {
    async fn get(&self, table: &str, id: Uuid) -> Result<Option<JsonValue>> {
        self.check_fail()?;
        let tables = locked(&self.tables);
        Ok(tables
            .get(table)
            .and_then(|rows| rows.iter().find(|r| row_id(r) == Some(id)))
            .cloned())
    }

    async fn insert(&self, table: &str, mut row: JsonValue) -> Result<JsonValue> {
        self.check_fail()?;
        let object = row
            .as_object_mut()
            .ok_or_else(|| Error::RemoteSync("Insert body must be an object".to_string()))?;
        object.insert("id".to_string(), json!(Uuid::new_v4()));
        object.insert("created_at".to_string(), json!(Utc::now()));
        let mut tables = locked(&self.tables);
        tables.entry(table.to_string()).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, id: Uuid, patch: JsonValue) -> Result<JsonValue> {
        self.check_fail()?;
        let patch = patch
            .as_object()
            .ok_or_else(|| Error::RemoteSync("Patch body must be an object".to_string()))?
            .clone();
        let mut tables = locked(&self.tables);
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| Error::RemoteSync(format!("No such table: {}", table)))?;
        let row = rows
            .iter_mut()
            .find(|r| row_id(r) == Some(id))
            .ok_or_else(|| Error::RemoteSync(format!("No row {} in {}", id, table)))?;
        if let Some(object) = row.as_object_mut() {
            for (key, value) in patch {
                object.insert(key, value);
            }
        }
        Ok(row.clone())
    }

    async fn list(&self, table: &str, query: &ListQuery) -> Result<Vec<JsonValue>> {
        self.check_fail()?;
        let tables = locked(&self.tables);
        let mut rows: Vec<JsonValue> = tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|row| query.predicates.iter().all(|p| matches(row, p)))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
