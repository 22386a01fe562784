//! In-memory implementation of [`KeyValueStore`].
//!
//! Used for local runs and tests. Every operation takes the table lock, so
//! conditional writes are atomic within the process. State is lost on
//! restart and is not shared between instances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{
    Condition, InsertOutcome, Item, KeyValueStore, Precondition, RangeQuery, StoreError,
    StoreResult, UpdateOutcome,
};

type Table = HashMap<String, Item>;

/// Process-local document store.
///
/// Cloning shares the underlying tables.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    available: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of items currently held in `table`.
    pub async fn len(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, |t| t.len())
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn merge(target: &mut Item, fields: Map<String, Value>) {
    if let Value::Object(obj) = target {
        obj.extend(fields);
    }
}

fn numeric(item: &Item, field: &str) -> Option<i64> {
    item.get(field).and_then(Value::as_i64)
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn put(&self, table: &str, key: &str, item: Item) -> StoreResult<()> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), item);
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Item>> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn insert_if(
        &self,
        table: &str,
        key: &str,
        item: Item,
        precondition: Precondition,
    ) -> StoreResult<InsertOutcome> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let table = tables.entry(table.to_string()).or_default();

        let replaceable = match (table.get(key), &precondition) {
            (None, _) => true,
            (Some(_), Precondition::Absent) => false,
            (Some(existing), Precondition::AbsentOrExpired { field, now_ms }) => {
                numeric(existing, field).is_some_and(|expires| expires <= *now_ms)
            }
        };

        if !replaceable {
            return Ok(InsertOutcome::AlreadyExists);
        }
        table.insert(key.to_string(), item);
        Ok(InsertOutcome::Inserted)
    }

    async fn update(&self, table: &str, key: &str, fields: Map<String, Value>) -> StoreResult<()> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        match tables.get_mut(table).and_then(|t| t.get_mut(key)) {
            Some(item) => {
                merge(item, fields);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                table: table.to_string(),
                key: key.to_string(),
            }),
        }
    }

    async fn update_if(
        &self,
        table: &str,
        key: &str,
        condition: Condition,
        fields: Map<String, Value>,
    ) -> StoreResult<UpdateOutcome> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let Some(item) = tables.get_mut(table).and_then(|t| t.get_mut(key)) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if item.get(&condition.field) != Some(&condition.equals) {
            return Ok(UpdateOutcome::ConditionFailed);
        }
        merge(item, fields);
        Ok(UpdateOutcome::Updated)
    }

    async fn query(&self, table: &str, query: RangeQuery) -> StoreResult<Vec<Item>> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        let Some(table) = tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<&Item> = table
            .values()
            .filter(|item| match &query.equals {
                Some((field, value)) => item.get(field) == Some(value),
                None => true,
            })
            .filter(|item| match &query.below {
                Some((field, bound)) => numeric(item, field).is_some_and(|v| v < *bound),
                None => true,
            })
            .collect();

        if let Some((field, _)) = &query.below {
            matches.sort_by_key(|item| numeric(item, field).unwrap_or(i64::MAX));
        }

        Ok(matches.into_iter().take(query.limit).cloned().collect())
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        Ok(tables
            .get_mut(table)
            .and_then(|t| t.remove(key))
            .is_some())
    }

    async fn delete_if(&self, table: &str, key: &str, condition: Condition) -> StoreResult<UpdateOutcome> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(table) else {
            return Ok(UpdateOutcome::NotFound);
        };
        match table.get(key) {
            None => Ok(UpdateOutcome::NotFound),
            Some(item) if item.get(&condition.field) != Some(&condition.equals) => {
                Ok(UpdateOutcome::ConditionFailed)
            }
            Some(_) => {
                table.remove(key);
                Ok(UpdateOutcome::Updated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fields;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_if_absent_only_once() {
        let store = InMemoryStore::new();

        let first = store.insert_if_absent("t", "k", json!({"v": 1})).await.unwrap();
        let second = store.insert_if_absent("t", "k", json!({"v": 2})).await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::AlreadyExists);
        assert_eq!(store.get("t", "k").await.unwrap(), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_insert_replaces_only_expired_items() {
        let store = InMemoryStore::new();
        store.put("t", "k", json!({"expires_at": 100})).await.unwrap();

        let live = Precondition::AbsentOrExpired { field: "expires_at".into(), now_ms: 50 };
        let expired = Precondition::AbsentOrExpired { field: "expires_at".into(), now_ms: 100 };

        assert_eq!(
            store.insert_if("t", "k", json!({"expires_at": 500}), live).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        assert_eq!(
            store.insert_if("t", "k", json!({"expires_at": 500}), expired).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_update_if_guards_transition() {
        let store = InMemoryStore::new();
        store.put("t", "k", json!({"published": false})).await.unwrap();

        let cond = Condition::new("published", false);
        let set = fields([("published", json!(true))]);

        assert_eq!(
            store.update_if("t", "k", cond.clone(), set.clone()).await.unwrap(),
            UpdateOutcome::Updated
        );
        assert_eq!(
            store.update_if("t", "k", cond.clone(), set.clone()).await.unwrap(),
            UpdateOutcome::ConditionFailed
        );
        assert_eq!(
            store.update_if("t", "missing", cond, set).await.unwrap(),
            UpdateOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete_if_checks_guard() {
        let store = InMemoryStore::new();
        store.put("t", "k", json!({"version": 2})).await.unwrap();

        assert_eq!(
            store.delete_if("t", "k", Condition::new("version", 1)).await.unwrap(),
            UpdateOutcome::ConditionFailed
        );
        assert_eq!(
            store.delete_if("t", "k", Condition::new("version", 2)).await.unwrap(),
            UpdateOutcome::Updated
        );
        assert_eq!(store.get("t", "k").await.unwrap(), None);
        assert_eq!(
            store.delete_if("t", "k", Condition::new("version", 2)).await.unwrap(),
            UpdateOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let store = InMemoryStore::new();
        store.put("t", "a", json!({"published": false, "created_at": 30})).await.unwrap();
        store.put("t", "b", json!({"published": false, "created_at": 10})).await.unwrap();
        store.put("t", "c", json!({"published": true, "created_at": 5})).await.unwrap();
        store.put("t", "d", json!({"published": false, "created_at": 99})).await.unwrap();

        let rows = store
            .query(
                "t",
                RangeQuery::new(10)
                    .where_eq("published", false)
                    .where_below("created_at", 50),
            )
            .await
            .unwrap();

        let created: Vec<i64> = rows.iter().map(|r| r["created_at"].as_i64().unwrap()).collect();
        assert_eq!(created, vec![10, 30]);

        let limited = store
            .query("t", RangeQuery::new(1).where_below("created_at", 1000))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0]["created_at"], 5);
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let store = InMemoryStore::new();
        store.set_available(false);

        let err = store.put("t", "k", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_available(true);
        assert!(store.put("t", "k", json!({})).await.is_ok());
    }
}
