//! In-memory reference backend
//!
//! Each transaction reads from a private copy of its scoped stores and logs
//! its writes; commit replays the log against the shared data in one step,
//! abort drops it. Nothing a transaction wrote is visible before commit.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::backend::{Backend, BackendFuture, BackendTx, Record, Savepoint};
use super::errors::{TxError, TxResult};
use super::policy::TxScope;
use crate::query::{compare_keys, is_valid_key, resolve_path, Cursor, Reduction, Statement};
use crate::schema::{DatabaseSchema, SchemaCatalog, StoreSchema};

/// Primary key ordered by key comparison.
#[derive(Debug, Clone)]
struct StoreKey(Value);

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StoreKey {}

impl PartialOrd for StoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StoreKey {
    // Only valid keys are ever stored, so the comparison is total
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.0, &other.0).unwrap_or(Ordering::Equal)
    }
}

type Rows = BTreeMap<StoreKey, Value>;

#[derive(Debug, Default)]
struct Shared {
    stores: HashMap<String, Rows>,
    /// Next generated key per store
    sequences: HashMap<String, i64>,
}

#[derive(Debug, Clone)]
enum Write {
    Put(String, StoreKey, Value),
    Delete(String, StoreKey),
}

/// In-memory `Backend` for tests and tooling
pub struct MemoryBackend {
    schema: Arc<DatabaseSchema>,
    data: Arc<RwLock<Shared>>,
    fail_next_commit: Arc<AtomicBool>,
    commits: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new(schema: DatabaseSchema) -> Self {
        Self {
            schema: Arc::new(schema),
            data: Arc::new(RwLock::new(Shared::default())),
            fail_next_commit: Arc::new(AtomicBool::new(false)),
            commits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Makes the next commit fail with a backend error.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, AtomicOrdering::SeqCst);
    }

    /// Number of successful commits
    pub fn commits(&self) -> u64 {
        self.commits.load(AtomicOrdering::SeqCst)
    }

    /// Committed records of a store, in primary key order.
    pub fn snapshot(&self, store: &str) -> Vec<Value> {
        match self.data.read() {
            Ok(data) => data
                .stores
                .get(store)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

impl Backend for MemoryBackend {
    fn begin(&self, scope: &TxScope) -> BackendFuture<'_, Box<dyn BackendTx>> {
        let scope = scope.clone();
        Box::pin(async move {
            let mut stores = HashMap::new();
            let mut base = HashMap::new();
            let data = self
                .data
                .read()
                .map_err(|e| TxError::backend(format!("lock poisoned: {}", e)))?;
            for name in scope.stores() {
                let schema = self
                    .schema
                    .store(name)
                    .ok_or_else(|| TxError::backend(format!("store: {} not found", name)))?;
                let rows = data.stores.get(name).cloned().unwrap_or_default();
                let next = data.sequences.get(name).copied().unwrap_or(1);
                base.insert(name.clone(), (rows.clone(), next));
                stores.insert(
                    name.clone(),
                    WorkingStore {
                        schema: schema.clone(),
                        rows,
                        next_key: next,
                    },
                );
            }
            drop(data);

            let tx: Box<dyn BackendTx> = Box::new(MemoryTx {
                data: Arc::clone(&self.data),
                fail_commit: Arc::clone(&self.fail_next_commit),
                commits: Arc::clone(&self.commits),
                stores,
                base,
                log: Vec::new(),
            });
            Ok(tx)
        })
    }
}

struct WorkingStore {
    schema: StoreSchema,
    rows: Rows,
    next_key: i64,
}

struct MemoryTx {
    data: Arc<RwLock<Shared>>,
    fail_commit: Arc<AtomicBool>,
    commits: Arc<AtomicU64>,
    stores: HashMap<String, WorkingStore>,
    /// Rows and next key of each store as the transaction first saw them
    base: HashMap<String, (Rows, i64)>,
    log: Vec<Write>,
}

impl MemoryTx {
    fn store(&self, name: &str) -> TxResult<&WorkingStore> {
        self.stores
            .get(name)
            .ok_or_else(|| TxError::backend(format!("store: {} not in transaction", name)))
    }

    fn store_mut(&mut self, name: &str) -> TxResult<&mut WorkingStore> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| TxError::backend(format!("store: {} not in transaction", name)))
    }
}

/// Highest generated-key candidate after storing `key`
fn bump_next_key(next_key: i64, key: &Value) -> i64 {
    match key.as_i64() {
        Some(k) => next_key.max(k.saturating_add(1)),
        None => next_key,
    }
}

fn ensure_key(key: &Value) -> TxResult<StoreKey> {
    if is_valid_key(key) {
        Ok(StoreKey(key.clone()))
    } else {
        Err(TxError::backend(format!("invalid key: {}", key)))
    }
}

/// Index keys a record contributes; multi-entry arrays give one per element.
fn index_keys(value: &Value, path: &str, multi_entry: bool) -> Vec<Value> {
    match resolve_path(value, path) {
        Some(Value::Array(items)) if multi_entry => {
            let mut keys: Vec<Value> = Vec::new();
            for item in items.iter().filter(|i| is_valid_key(i)) {
                if !keys.iter().any(|k| compare_keys(k, item) == Some(Ordering::Equal)) {
                    keys.push(item.clone());
                }
            }
            keys
        }
        Some(key) if is_valid_key(key) => vec![key.clone()],
        _ => Vec::new(),
    }
}

fn cmp_keys(a: &Value, b: &Value) -> Ordering {
    compare_keys(a, b).unwrap_or(Ordering::Equal)
}

impl BackendTx for MemoryTx {
    fn scan(&mut self, cursor: &Cursor) -> TxResult<Vec<Record>> {
        let store = self.store(&cursor.store)?;

        let mut records: Vec<Record> = match &cursor.index {
            Some(index_name) => {
                let index = store.schema.index(index_name).ok_or_else(|| {
                    TxError::backend(format!(
                        "index: {} not found in store {}",
                        index_name, cursor.store
                    ))
                })?;
                let mut entries: Vec<(Value, Record)> = Vec::new();
                for (key, value) in &store.rows {
                    for index_key in index_keys(value, index.key_path(), index.multi_entry) {
                        let in_range = cursor
                            .key_range
                            .as_ref()
                            .map(|r| r.contains(&index_key))
                            .unwrap_or(true);
                        if in_range {
                            entries.push((
                                index_key,
                                Record {
                                    key: key.0.clone(),
                                    value: value.clone(),
                                },
                            ));
                        }
                    }
                }
                // Rows are visited in primary key order, so a stable sort
                // keeps primary key order within equal index keys
                entries.sort_by(|a, b| cmp_keys(&a.0, &b.0));
                if cursor.iteration().is_unique() {
                    entries.dedup_by(|later, earlier| {
                        cmp_keys(&later.0, &earlier.0) == Ordering::Equal
                    });
                }
                entries.into_iter().map(|(_, record)| record).collect()
            }
            None => store
                .rows
                .iter()
                .filter(|(key, _)| {
                    cursor
                        .key_range
                        .as_ref()
                        .map(|r| r.contains(&key.0))
                        .unwrap_or(true)
                })
                .map(|(key, value)| Record {
                    key: key.0.clone(),
                    value: value.clone(),
                })
                .collect(),
        };

        if cursor.iteration().is_reverse() {
            records.reverse();
        }
        Ok(records)
    }

    fn query(&mut self, statement: &Statement) -> TxResult<Vec<Value>> {
        let store = self.store(&statement.store)?;

        let mut rows: Vec<Value> = store
            .rows
            .values()
            .filter(|row| crate::query::ResidualFilter::matches(row, &statement.bound_ranges))
            .cloned()
            .collect();

        if statement.order_by != crate::query::ROWID_COLUMN {
            // Rows without a usable ordering value sort first, like NULLs
            rows.sort_by(|a, b| {
                let ka = resolve_path(a, &statement.order_by).filter(|v| is_valid_key(v));
                let kb = resolve_path(b, &statement.order_by).filter(|v| is_valid_key(v));
                match (ka, kb) {
                    (Some(x), Some(y)) => cmp_keys(x, y),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            });
        }
        if statement.direction.is_reverse() {
            rows.reverse();
        }

        if let Some(reduction) = &statement.aggregate {
            let input: Vec<Value> = if statement.distinct {
                distinct_by_field(rows, reduction)
            } else {
                rows
            };
            let value = reduction.apply(&input);
            let mut row = serde_json::Map::new();
            row.insert(reduction.sql_function().to_string(), value);
            return Ok(vec![Value::Object(row)]);
        }

        if !statement.columns.is_empty() {
            rows = rows
                .into_iter()
                .map(|row| {
                    let mut selected = serde_json::Map::new();
                    for column in &statement.columns {
                        let value = resolve_path(&row, column).cloned().unwrap_or(Value::Null);
                        selected.insert(column.clone(), value);
                    }
                    Value::Object(selected)
                })
                .collect();
        }

        if statement.distinct {
            let mut unique: Vec<Value> = Vec::new();
            for row in rows {
                if !unique.contains(&row) {
                    unique.push(row);
                }
            }
            rows = unique;
        }

        let skip = statement.offset.unwrap_or(0) as usize;
        let take = statement.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(skip).take(take).collect())
    }

    fn get(&mut self, store: &str, key: &Value) -> TxResult<Option<Value>> {
        let key = ensure_key(key)?;
        Ok(self.store(store)?.rows.get(&key).cloned())
    }

    fn put(&mut self, store: &str, mut value: Value, key: Option<Value>) -> TxResult<Value> {
        let working = self.store_mut(store)?;
        let key_path = working.schema.key_path.clone();

        let key = match (key, &key_path) {
            (Some(key), _) => key,
            (None, Some(path)) => match resolve_path(&value, path) {
                Some(key) => key.clone(),
                None => {
                    let generated = Value::from(working.next_key);
                    match value.as_object_mut() {
                        Some(object) if !path.contains('.') => {
                            object.insert(path.clone(), generated.clone());
                        }
                        _ => {
                            return Err(TxError::backend(format!(
                                "cannot generate key at {} for store {}",
                                path, store
                            )))
                        }
                    }
                    generated
                }
            },
            (None, None) => Value::from(working.next_key),
        };

        let store_key = ensure_key(&key)?;
        working.next_key = bump_next_key(working.next_key, &key);
        working.rows.insert(store_key.clone(), value.clone());
        self.log.push(Write::Put(store.to_string(), store_key, value));
        Ok(key)
    }

    fn delete(&mut self, store: &str, key: &Value) -> TxResult<bool> {
        let store_key = ensure_key(key)?;
        let removed = self.store_mut(store)?.rows.remove(&store_key).is_some();
        if removed {
            self.log.push(Write::Delete(store.to_string(), store_key));
        }
        Ok(removed)
    }

    fn count(&mut self, store: &str) -> TxResult<u64> {
        Ok(self.store(store)?.rows.len() as u64)
    }

    fn savepoint(&mut self) -> Savepoint {
        Savepoint(self.log.len())
    }

    fn rollback_to(&mut self, savepoint: Savepoint) -> TxResult<()> {
        if savepoint.0 > self.log.len() {
            return Err(TxError::backend(format!(
                "savepoint {} is past the end of the write log",
                savepoint.0
            )));
        }
        self.log.truncate(savepoint.0);

        // Rebuild working copies from the base rows plus the surviving log
        for (name, working) in self.stores.iter_mut() {
            if let Some((rows, next_key)) = self.base.get(name) {
                working.rows = rows.clone();
                working.next_key = *next_key;
            }
        }
        for write in &self.log {
            match write {
                Write::Put(store, key, value) => {
                    if let Some(working) = self.stores.get_mut(store) {
                        working.next_key = bump_next_key(working.next_key, &key.0);
                        working.rows.insert(key.clone(), value.clone());
                    }
                }
                Write::Delete(store, key) => {
                    if let Some(working) = self.stores.get_mut(store) {
                        working.rows.remove(key);
                    }
                }
            }
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> BackendFuture<'static, ()> {
        Box::pin(async move {
            if self.fail_commit.swap(false, AtomicOrdering::SeqCst) {
                return Err(TxError::backend("commit failed"));
            }
            let mut data = self
                .data
                .write()
                .map_err(|e| TxError::backend(format!("lock poisoned: {}", e)))?;
            for write in &self.log {
                match write {
                    Write::Put(store, key, value) => {
                        data.stores
                            .entry(store.clone())
                            .or_default()
                            .insert(key.clone(), value.clone());
                    }
                    Write::Delete(store, key) => {
                        if let Some(rows) = data.stores.get_mut(store) {
                            rows.remove(key);
                        }
                    }
                }
            }
            for (name, working) in &self.stores {
                let next = data.sequences.entry(name.clone()).or_insert(1);
                *next = (*next).max(working.next_key);
            }
            self.commits.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        })
    }

    fn abort(self: Box<Self>) {}
}

/// Keeps the first row for each distinct value of the reduced field.
fn distinct_by_field(rows: Vec<Value>, reduction: &Reduction) -> Vec<Value> {
    let Some(field) = reduction.field() else {
        return rows;
    };
    let mut seen: Vec<Value> = Vec::new();
    rows.into_iter()
        .filter(|row| match resolve_path(row, field) {
            Some(value) if !seen.contains(value) => {
                seen.push(value.clone());
                true
            }
            _ => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, KeyRange, QueryBuilder};
    use crate::schema::IndexSchema;
    use crate::tx::TxMode;
    use serde_json::json;

    fn schema() -> DatabaseSchema {
        DatabaseSchema::new(vec![
            StoreSchema::new("animals")
                .with_key_path("id")
                .with_indexes(["color", "legs"])
                .with_index(IndexSchema::new("tags").multi_entry()),
            StoreSchema::new("notes"),
        ])
        .unwrap()
    }

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new(schema());
        let scope = TxScope::new(["animals"], TxMode::ReadWrite);
        let mut tx = backend.begin(&scope).await.unwrap();
        for (id, color, legs, tags) in [
            (1, "red", 4, json!(["a", "b"])),
            (2, "blue", 2, json!(["b"])),
            (3, "red", 0, json!([])),
            (4, "green", 4, json!(["c", "a"])),
        ] {
            tx.put(
                "animals",
                json!({"id": id, "color": color, "legs": legs, "tags": tags}),
                None,
            )
            .unwrap();
        }
        tx.commit().await.unwrap();
        backend
    }

    fn ids(records: &[Record]) -> Vec<Value> {
        records.iter().map(|r| r.key.clone()).collect()
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let backend = MemoryBackend::new(schema());
        let mut tx = backend.begin(&TxScope::write("notes")).await.unwrap();
        let key = tx.put("notes", json!({"text": "hi"}), None).unwrap();
        assert_eq!(key, json!(1));
        assert_eq!(tx.count("notes").unwrap(), 1);
        assert!(backend.snapshot("notes").is_empty());

        tx.commit().await.unwrap();
        assert_eq!(backend.snapshot("notes"), vec![json!({"text": "hi"})]);
        assert_eq!(backend.commits(), 1);
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let backend = MemoryBackend::new(schema());
        let mut tx = backend.begin(&TxScope::write("notes")).await.unwrap();
        tx.put("notes", json!("x"), Some(json!("k"))).unwrap();
        tx.abort();
        assert!(backend.snapshot("notes").is_empty());
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_keeps_earlier_writes() {
        let backend = MemoryBackend::new(schema());
        let mut tx = backend.begin(&TxScope::write("notes")).await.unwrap();
        tx.put("notes", json!("kept"), None).unwrap();

        let mark = tx.savepoint();
        tx.put("notes", json!("undone"), None).unwrap();
        tx.delete("notes", &json!(1)).unwrap();
        assert_eq!(tx.count("notes").unwrap(), 1);

        tx.rollback_to(mark).unwrap();
        assert_eq!(tx.get("notes", &json!(1)).unwrap(), Some(json!("kept")));
        assert_eq!(tx.get("notes", &json!(2)).unwrap(), None);
        // The rolled back key is handed out again
        assert_eq!(tx.put("notes", json!("next"), None).unwrap(), json!(2));

        tx.commit().await.unwrap();
        assert_eq!(backend.snapshot("notes"), vec![json!("kept"), json!("next")]);
    }

    #[tokio::test]
    async fn test_unknown_store_fails_begin() {
        let backend = MemoryBackend::new(schema());
        let result = backend.begin(&TxScope::read("plants")).await;
        assert!(matches!(result, Err(TxError::Backend(_))));
    }

    #[tokio::test]
    async fn test_generated_key_injected_at_key_path() {
        let backend = MemoryBackend::new(schema());
        let mut tx = backend.begin(&TxScope::write("animals")).await.unwrap();
        tx.put("animals", json!({"id": 7}), None).unwrap();
        let key = tx.put("animals", json!({"color": "red"}), None).unwrap();
        assert_eq!(key, json!(8));
        assert_eq!(tx.get("animals", &json!(8)).unwrap(), Some(json!({"id": 8, "color": "red"})));
    }

    #[tokio::test]
    async fn test_index_scan_with_range() {
        let backend = seeded().await;
        let mut tx = backend.begin(&TxScope::read("animals")).await.unwrap();

        let range = KeyRange::lower_bound("legs", json!(1), false);
        let cursor = Cursor::over_index("animals", "legs", Some(range));
        assert_eq!(ids(&tx.scan(&cursor).unwrap()), vec![json!(2), json!(1), json!(4)]);

        let cursor = cursor.with_direction(Direction::PrevUnique);
        assert_eq!(ids(&tx.scan(&cursor).unwrap()), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_multi_entry_index() {
        let backend = seeded().await;
        let mut tx = backend.begin(&TxScope::read("animals")).await.unwrap();
        let range = KeyRange::only("tags", json!("a"));
        let cursor = Cursor::over_index("animals", "tags", Some(range));
        assert_eq!(ids(&tx.scan(&cursor).unwrap()), vec![json!(1), json!(4)]);
    }

    #[tokio::test]
    async fn test_statement_aggregate() {
        let backend = seeded().await;
        let mut tx = backend.begin(&TxScope::read("animals")).await.unwrap();

        let mut builder = QueryBuilder::new();
        builder
            .from("animals")
            .filter("color", "=", json!("red"))
            .unwrap()
            .reduce("sum", Some("legs"))
            .unwrap();
        let statement = builder.build().to_statement(&schema()).unwrap();

        let rows = tx.query(&statement).unwrap();
        assert_eq!(statement.finish(rows), json!(4));
    }

    #[tokio::test]
    async fn test_statement_distinct_columns() {
        let backend = seeded().await;
        let mut tx = backend.begin(&TxScope::read("animals")).await.unwrap();

        let mut builder = QueryBuilder::new();
        builder.from("animals").order("color").unique(true).map("select", "color").unwrap();
        let statement = builder.build().to_statement(&schema()).unwrap();

        let rows = tx.query(&statement).unwrap();
        assert_eq!(statement.finish(rows), json!(["blue", "green", "red"]));
    }
}
