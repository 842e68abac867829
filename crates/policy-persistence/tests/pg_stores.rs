//! Paridad de los stores Postgres con los backends en memoria (requiere
//! DATABASE_URL válido en entorno; si no, los tests se omiten).


use std::collections::BTreeMap;
use std::sync::Arc;

use policy_core::model::StateKey;
use policy_core::{BlockState, BlockStatus, CollectionRow, CollectionStore, CollectionWrite, CoreEngineError, SavepointManager, SnapshotStore, StateStore,
                  StoreError};
use policy_persistence::{PgCollectionStore, PgSnapshotStore, PgStateStore};
use serde_json::json;

#[tokio::test]
async fn state_store_is_compare_and_set() {
    let Some(provider) = test_support::provider() else { return };
    let store = PgStateStore::new(provider);
    let policy = test_support::policy_id("cas");
    let key = StateKey::new(&policy, "b", Some("alice"));
    let fresh = BlockState::initial(&key, BlockStatus::Active);

    let v1 = store.set(fresh.clone()).await.unwrap();
    assert_eq!(v1.version, 1);
    assert!(matches!(store.set(fresh).await, Err(StoreError::Conflict(_))));

    let mut next = v1.clone();
    next.payload = json!({"n": 2});
    next.status = BlockStatus::WaitingForInput;
    let v2 = store.set(next).await.unwrap();
    assert_eq!(v2.version, 2);

    let loaded = store.get(&key).await.unwrap().unwrap();
    assert_eq!(loaded.payload, json!({"n": 2}));
    assert_eq!(loaded.status, BlockStatus::WaitingForInput);
    let history = store.history(&key).await.unwrap();
    assert_eq!(history.iter().map(|s| s.version).collect::<Vec<_>>(), vec![1]);

    // estado compartido en otra fila
    let shared = StateKey::new(&policy, "b", None);
    assert!(store.get(&shared).await.unwrap().is_none());
    store.set(BlockState::initial(&shared, BlockStatus::Active)).await.unwrap();
    let listed = store.list_policy(&policy).await.unwrap();
    assert_eq!(listed.iter().map(|s| s.user_id.clone()).collect::<Vec<_>>(), vec![None, Some("alice".to_string())]);

    assert_eq!(store.delete_policy(&policy).await.unwrap(), 2);
    assert!(store.history(&key).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_writers_of_one_key_see_a_conflict() {
    let Some(provider) = test_support::provider() else { return };
    let store = Arc::new(PgStateStore::new(provider));
    let policy = test_support::policy_id("race");
    let key = StateKey::new(&policy, "b", Some("u"));
    let base = store.set(BlockState::initial(&key, BlockStatus::Active)).await.unwrap();

    let tasks: Vec<_> = (0..4).map(|i| {
                                  let store = Arc::clone(&store);
                                  let mut state = base.clone();
                                  state.payload = json!({ "writer": i });
                                  tokio::spawn(async move { store.set(state).await })
                              })
                              .collect();
    let mut ok = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(s) => {
                assert_eq!(s.version, 2);
                ok += 1;
            }
            Err(e) => assert!(matches!(e, StoreError::Conflict(_)), "{e:?}"),
        }
    }
    assert_eq!(ok, 1);
    store.delete_policy(&policy).await.unwrap();
}

#[tokio::test]
async fn state_and_block_writes_commit_together() {
    let Some(provider) = test_support::provider() else { return };
    let states = PgStateStore::new(provider.clone());
    let collections = PgCollectionStore::new(provider);
    let policy = test_support::policy_id("commit");
    let key = StateKey::new(&policy, "save", None);
    let writes = [CollectionWrite::upsert("docs", "1", json!({"v": 1}))];

    // versión vieja: ni estado ni filas
    let stale = BlockState { version: 3, ..BlockState::initial(&key, BlockStatus::Active) };
    let err = states.set_with_writes(stale, &writes, &collections).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
    assert!(collections.rows(&policy, "docs").await.unwrap().is_empty());
    assert!(states.get(&key).await.unwrap().is_none());

    let stored = states.set_with_writes(BlockState::initial(&key, BlockStatus::Active), &writes, &collections)
                       .await
                       .unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(collections.rows(&policy, "docs").await.unwrap()[0].data, json!({"v": 1}));

    // replace_all deja sólo las fuentes dadas
    let mut sources = BTreeMap::new();
    sources.insert("archive".to_string(), vec![CollectionRow::new("archive", "9", json!("old"))]);
    collections.replace_all(&policy, sources).await.unwrap();
    assert_eq!(collections.sources(&policy).await.unwrap(), vec!["archive".to_string()]);

    collections.clear(&policy).await.unwrap();
    states.delete_policy(&policy).await.unwrap();
}

#[tokio::test]
async fn collection_rows_upsert_delete_and_replace() {
    let Some(provider) = test_support::provider() else { return };
    let store = PgCollectionStore::new(provider);
    let policy = test_support::policy_id("rows");

    store.apply_writes(&policy,
                       &[CollectionWrite::upsert("docs", "b", json!({"v": 1})),
                         CollectionWrite::upsert("docs", "a", json!({"v": 2})),
                         CollectionWrite::upsert("notes", "n", json!("x"))])
         .await
         .unwrap();
    store.apply_writes(&policy, &[CollectionWrite::upsert("docs", "b", json!({"v": 3}))]).await.unwrap();
    let rows = store.rows(&policy, "docs").await.unwrap();
    assert_eq!(rows.iter().map(|r| (r.row_id.as_str(), r.data.clone())).collect::<Vec<_>>(),
               vec![("a", json!({"v": 2})), ("b", json!({"v": 3}))]);
    assert_eq!(rows[0].collection_name, "docs");
    assert_eq!(store.sources(&policy).await.unwrap(), vec!["docs".to_string(), "notes".to_string()]);

    store.apply_writes(&policy, &[CollectionWrite::delete("notes", "n")]).await.unwrap();
    assert_eq!(store.sources(&policy).await.unwrap(), vec!["docs".to_string()]);

    store.replace_all(&policy, BTreeMap::new()).await.unwrap();
    assert!(store.rows(&policy, "docs").await.unwrap().is_empty());
    store.clear(&policy).await.unwrap();
}

#[tokio::test]
async fn savepoints_round_trip_through_postgres() {
    let Some(provider) = test_support::provider() else { return };
    let collections = Arc::new(PgCollectionStore::new(provider.clone()));
    let snapshots = Arc::new(PgSnapshotStore::new(provider.clone()));
    let states = Arc::new(PgStateStore::new(provider));
    let manager = SavepointManager::new(snapshots.clone(), collections.clone(), states.clone());
    let policy = test_support::policy_id("dry");

    collections.apply_writes(&policy, &[CollectionWrite::upsert("docs", "1", json!("x"))]).await.unwrap();
    let key = StateKey::new(&policy, "b", Some("u"));
    states.set(BlockState::initial(&key, BlockStatus::Active)).await.unwrap();
    manager.checkpoint(&policy, "s1").await.unwrap();

    collections.apply_writes(&policy,
                             &[CollectionWrite::upsert("docs", "1", json!("y")), CollectionWrite::upsert("docs", "2", json!("z"))])
               .await
               .unwrap();
    manager.checkpoint(&policy, "s2").await.unwrap();
    assert!(matches!(manager.checkpoint(&policy, "s2").await, Err(CoreEngineError::SavepointExists(_))));

    let links = snapshots.links(&policy).await.unwrap();
    assert_eq!(links.iter().map(|l| (l.savepoint_id.as_str(), l.seq)).collect::<Vec<_>>(), vec![("s1", 0), ("s2", 1)]);
    assert_eq!(snapshots.block_states(&policy, "s1").await.unwrap().len(), 1);

    manager.restore(&policy, "s1").await.unwrap();
    let rows = collections.rows(&policy, "docs").await.unwrap();
    assert_eq!(rows.iter().map(|r| r.data.clone()).collect::<Vec<_>>(), vec![json!("x")]);

    let rolled = manager.rollback_one(&policy).await.unwrap();
    assert_eq!(rolled.removed, "s2");
    assert_eq!(snapshots.savepoints(&policy).await.unwrap().len(), 1);
    assert!(matches!(snapshots.remove_savepoint(&policy, "s2").await, Err(StoreError::NotFound(_))));

    assert_eq!(manager.discard(&policy).await.unwrap(), 1);
    assert!(snapshots.links(&policy).await.unwrap().is_empty());
    states.delete_policy(&policy).await.unwrap();
    collections.clear(&policy).await.unwrap();
}
