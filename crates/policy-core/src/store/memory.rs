use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexMap;

use super::{CollectionStore, CollectionWrite, SnapshotStore, StateStore};
use crate::diff::CollectionRow;
use crate::errors::StoreError;
use crate::model::{BlockState, BlockStateSavepoint, StateKey};
use crate::savepoint::{CheckpointRecord, DryRunSavepointSnapshot, SavepointInfo};

/// State-store en memoria. La atomicidad por clave la da el lock de shard
/// de `DashMap` durante `entry`.
#[derive(Default)]
pub struct InMemoryStateStore {
    current: DashMap<StateKey, BlockState>,
    history: DashMap<StateKey, Vec<BlockState>>,
    /// Fallos transitorios inyectados (tests de reintento).
    failures: AtomicU32,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Las próximas `n` llamadas a `set` fallan con `StoreError::Transient`.
    pub fn fail_next_sets(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &StateKey) -> Result<Option<BlockState>, StoreError> {
        Ok(self.current.get(key).map(|s| s.clone()))
    }

    async fn set(&self, mut state: BlockState) -> Result<BlockState, StoreError> {
        if self.failures
               .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
               .is_ok()
        {
            return Err(StoreError::Transient(format!("injected failure for {}", state.key())));
        }
        let key = state.key();
        match self.current.entry(key.clone()) {
            Entry::Vacant(slot) => {
                if state.version != 0 {
                    return Err(StoreError::Conflict(format!("{key}: expected version {}, found none", state.version)));
                }
                state.version = 1;
                state.updated_at = Utc::now();
                slot.insert(state.clone());
            }
            Entry::Occupied(mut slot) => {
                if slot.get().version != state.version {
                    return Err(StoreError::Conflict(format!("{key}: expected version {}, found {}",
                                                            state.version,
                                                            slot.get().version)));
                }
                self.history.entry(key).or_default().push(slot.get().clone());
                state.version += 1;
                state.updated_at = Utc::now();
                slot.insert(state.clone());
            }
        }
        Ok(state)
    }

    async fn history(&self, key: &StateKey) -> Result<Vec<BlockState>, StoreError> {
        Ok(self.history.get(key).map(|h| h.clone()).unwrap_or_default())
    }

    async fn list_policy(&self, policy_id: &str) -> Result<Vec<BlockState>, StoreError> {
        let mut states: Vec<BlockState> = self.current
                                              .iter()
                                              .filter(|e| e.key().policy_id == policy_id)
                                              .map(|e| e.value().clone())
                                              .collect();
        states.sort_by_key(|s| s.key());
        Ok(states)
    }

    async fn replace_policy(&self, policy_id: &str, states: Vec<BlockState>) -> Result<(), StoreError> {
        self.current.retain(|k, _| k.policy_id != policy_id);
        for state in states {
            self.current.insert(state.key(), state);
        }
        Ok(())
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<u64, StoreError> {
        let before = self.current.len();
        self.current.retain(|k, _| k.policy_id != policy_id);
        self.history.retain(|k, _| k.policy_id != policy_id);
        Ok((before - self.current.len()) as u64)
    }
}

type Sources = BTreeMap<String, BTreeMap<String, CollectionRow>>;

#[derive(Default)]
pub struct InMemoryCollectionStore {
    inner: DashMap<String, Sources>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn rows(&self, policy_id: &str, source_id: &str) -> Result<Vec<CollectionRow>, StoreError> {
        Ok(self.inner
               .get(policy_id)
               .and_then(|p| p.get(source_id).map(|rows| rows.values().cloned().collect()))
               .unwrap_or_default())
    }

    async fn sources(&self, policy_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.inner
               .get(policy_id)
               .map(|p| p.iter().filter(|(_, rows)| !rows.is_empty()).map(|(s, _)| s.clone()).collect())
               .unwrap_or_default())
    }

    async fn apply_writes(&self, policy_id: &str, writes: &[CollectionWrite]) -> Result<(), StoreError> {
        let mut policy = self.inner.entry(policy_id.to_string()).or_default();
        for w in writes {
            let source = policy.entry(w.source_id.clone()).or_default();
            match &w.data {
                Some(data) => {
                    source.insert(w.row_id.clone(), CollectionRow::new(&w.source_id, &w.row_id, data.clone()));
                }
                None => {
                    source.remove(&w.row_id);
                }
            }
        }
        Ok(())
    }

    async fn replace_all(&self, policy_id: &str, sources: BTreeMap<String, Vec<CollectionRow>>) -> Result<(), StoreError> {
        let working: Sources = sources.into_iter()
                                      .map(|(source, rows)| (source, rows.into_iter().map(|r| (r.row_id.clone(), r)).collect()))
                                      .collect();
        // un solo insert: nadie ve el working set a medio reemplazar
        self.inner.insert(policy_id.to_string(), working);
        Ok(())
    }

    async fn clear(&self, policy_id: &str) -> Result<(), StoreError> {
        self.inner.remove(policy_id);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    info: SavepointInfo,
    links: Vec<DryRunSavepointSnapshot>,
    states: Vec<BlockStateSavepoint>,
}

/// Journal en memoria; `IndexMap` conserva el orden de inserción (= `seq`).
#[derive(Default)]
pub struct InMemorySnapshotStore {
    inner: DashMap<String, IndexMap<String, StoredCheckpoint>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acceso mutable directo a un enlace almacenado. Sólo para simular
    /// corrupción fuera de banda en tests.
    pub fn tamper<F>(&self, policy_id: &str, savepoint_id: &str, source_id: &str, f: F) -> bool
        where F: FnOnce(&mut DryRunSavepointSnapshot)
    {
        let Some(mut policy) = self.inner.get_mut(policy_id) else { return false };
        let Some(cp) = policy.get_mut(savepoint_id) else { return false };
        match cp.links.iter_mut().find(|l| l.source_id == source_id) {
            Some(link) => {
                f(link);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn append_checkpoint(&self, record: CheckpointRecord) -> Result<(), StoreError> {
        let mut policy = self.inner.entry(record.info.policy_id.clone()).or_default();
        if policy.contains_key(&record.info.savepoint_id) {
            return Err(StoreError::Conflict(format!("savepoint {} already exists", record.info.savepoint_id)));
        }
        policy.insert(record.info.savepoint_id.clone(),
                      StoredCheckpoint { info: record.info,
                                         links: record.links,
                                         states: record.states });
        Ok(())
    }

    async fn savepoints(&self, policy_id: &str) -> Result<Vec<SavepointInfo>, StoreError> {
        Ok(self.inner
               .get(policy_id)
               .map(|p| p.values().map(|c| c.info.clone()).collect())
               .unwrap_or_default())
    }

    async fn links(&self, policy_id: &str) -> Result<Vec<DryRunSavepointSnapshot>, StoreError> {
        let mut links: Vec<DryRunSavepointSnapshot> = self.inner
                                                          .get(policy_id)
                                                          .map(|p| p.values().flat_map(|c| c.links.clone()).collect())
                                                          .unwrap_or_default();
        links.sort_by(|a, b| (a.seq, &a.source_id).cmp(&(b.seq, &b.source_id)));
        Ok(links)
    }

    async fn block_states(&self, policy_id: &str, savepoint_id: &str) -> Result<Vec<BlockStateSavepoint>, StoreError> {
        Ok(self.inner
               .get(policy_id)
               .and_then(|p| p.get(savepoint_id).map(|c| c.states.clone()))
               .unwrap_or_default())
    }

    async fn remove_savepoint(&self, policy_id: &str, savepoint_id: &str) -> Result<(), StoreError> {
        let removed = self.inner.get_mut(policy_id).and_then(|mut p| p.shift_remove(savepoint_id));
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("savepoint {savepoint_id}"))),
        }
    }

    async fn purge(&self, policy_id: &str) -> Result<u64, StoreError> {
        Ok(self.inner.remove(policy_id).map(|(_, p)| p.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::BlockStatus;

    #[tokio::test]
    async fn set_is_compare_and_set_and_keeps_history() {
        let store = InMemoryStateStore::new();
        let key = StateKey::new("p", "b", Some("u"));
        let fresh = BlockState::initial(&key, BlockStatus::Active);

        let v1 = store.set(fresh.clone()).await.unwrap();
        assert_eq!(v1.version, 1);
        // escritor con versión vieja
        assert!(matches!(store.set(fresh).await, Err(StoreError::Conflict(_))));

        let mut next = v1.clone();
        next.payload = json!({"n": 2});
        let v2 = store.set(next).await.unwrap();
        assert_eq!(v2.version, 2);
        let history = store.history(&key).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(store.get(&key).await.unwrap().unwrap().payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let store = InMemoryStateStore::new();
        store.fail_next_sets(1);
        let state = BlockState::initial(&StateKey::new("p", "b", None), BlockStatus::Active);
        let err = store.set(state.clone()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.set(state).await.is_ok());
    }

    #[tokio::test]
    async fn collection_writes_upsert_and_delete() {
        let store = InMemoryCollectionStore::new();
        store.apply_writes("p",
                           &[CollectionWrite::upsert("docs", "2", json!("y")),
                             CollectionWrite::upsert("docs", "1", json!("x"))])
             .await
             .unwrap();
        let rows = store.rows("p", "docs").await.unwrap();
        assert_eq!(rows.iter().map(|r| r.row_id.as_str()).collect::<Vec<_>>(), vec!["1", "2"]);

        store.apply_writes("p", &[CollectionWrite::delete("docs", "1"), CollectionWrite::delete("docs", "2")])
             .await
             .unwrap();
        assert!(store.sources("p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_all_swaps_the_whole_working_set() {
        let store = InMemoryCollectionStore::new();
        store.apply_writes("p", &[CollectionWrite::upsert("old", "1", json!("x"))]).await.unwrap();
        store.apply_writes("q", &[CollectionWrite::upsert("old", "1", json!("keep"))]).await.unwrap();

        let mut sources = BTreeMap::new();
        sources.insert("new".to_string(), vec![CollectionRow::new("new", "9", json!("y"))]);
        store.replace_all("p", sources).await.unwrap();
        assert_eq!(store.sources("p").await.unwrap(), vec!["new".to_string()]);
        assert_eq!(store.rows("q", "old").await.unwrap()[0].data, json!("keep"));
    }

    #[tokio::test]
    async fn failed_compare_and_set_undoes_the_block_writes() {
        let states = InMemoryStateStore::new();
        let collections = InMemoryCollectionStore::new();
        collections.apply_writes("p", &[CollectionWrite::upsert("docs", "1", json!("before"))]).await.unwrap();
        let key = StateKey::new("p", "b", None);
        let writes = [CollectionWrite::upsert("docs", "1", json!("after")), CollectionWrite::upsert("docs", "2", json!("new"))];

        // versión vieja: el CAS falla y las filas vuelven a su estado
        let stale = BlockState { version: 7, ..BlockState::initial(&key, BlockStatus::Active) };
        let err = states.set_with_writes(stale, &writes, &collections).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let rows = collections.rows("p", "docs").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data, json!("before"));

        let fresh = BlockState::initial(&key, BlockStatus::Active);
        let stored = states.set_with_writes(fresh, &writes, &collections).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(collections.rows("p", "docs").await.unwrap().len(), 2);
    }
}
