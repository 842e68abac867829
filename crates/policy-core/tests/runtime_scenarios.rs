mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{chain_abc, context};
use policy_core::engine::replay;
use policy_core::{BlockConfig, BlockStatus, CollectionRow, CollectionStore, CollectionWrite, CoreEngineError, EntryRoute, ExternalDocument,
                  InMemoryAuditStore, InMemoryCollectionStore, InMemoryStateStore, PolicyMode, PolicyRuntime, Recorder, RuntimeOptions,
                  StoreError};
use serde_json::json;

fn doc(payload: serde_json::Value) -> ExternalDocument {
    ExternalDocument::new(None, payload)
}

#[tokio::test]
async fn chain_a_b_c_runs_each_block_once_with_upstream_output() {
    let (root, routes) = chain_abc();
    let runtime = PolicyRuntime::in_memory(context("p-abc", root, routes, PolicyMode::Live));
    let user = runtime.user("u1", Some("Registrant"));

    let report = runtime.ingest_external(&user, doc(json!({"v": 1}))).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.executed_uuids(), vec!["a", "b", "c"]);
    assert_eq!(report.executions_of("c"), 1);

    let c = runtime.state_of("c", "u1").await.unwrap().expect("c state");
    let b_output = json!({"from": "b", "input": {"from": "a", "input": {"v": 1}}});
    assert_eq!(c.payload["last"], b_output);
    for uuid in ["a", "b", "c"] {
        let state = runtime.state_of(uuid, "u1").await.unwrap().expect("state persisted");
        assert_eq!(state.version, 1);
        assert_eq!(state.status, BlockStatus::Active);
    }
}

#[tokio::test]
async fn propagation_is_breadth_first() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("a", "step").active()
                                                                                             .with_event("ok", "b", "run")
                                                                                             .with_event("ok", "c", "run"))
                                                    .with_child(BlockConfig::new("b", "step").with_event("ok", "d", "run"))
                                                    .with_child(BlockConfig::new("c", "step"))
                                                    .with_child(BlockConfig::new("d", "step"));
    let runtime = PolicyRuntime::in_memory(context("p-bfs", root, vec![EntryRoute::new(None, None, "a")], PolicyMode::Live));
    let user = runtime.user("u1", None);
    let first = runtime.ingest_external(&user, doc(json!(1))).await.unwrap();
    assert_eq!(first.executed_uuids(), vec!["a", "b", "c", "d"]);

    // misma entrada => misma cascada
    let other = runtime.user("u2", None);
    let second = runtime.ingest_external(&other, doc(json!(1))).await.unwrap();
    assert_eq!(first.fingerprint, second.fingerprint);
}

#[tokio::test]
async fn failing_block_is_isolated_to_its_branch() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("a", "step").active()
                                                                                             .with_event("ok", "b", "run")
                                                                                             .with_event("ok", "c", "run"))
                                                    .with_child(BlockConfig::new("b", "step").with_option("fail", json!(true))
                                                                                             .with_event("ok", "d", "run"))
                                                    .with_child(BlockConfig::new("c", "step"))
                                                    .with_child(BlockConfig::new("d", "step"));
    let runtime = PolicyRuntime::in_memory(context("p-crash", root, vec![EntryRoute::new(None, None, "a")], PolicyMode::Live));
    let user = runtime.user("u1", None);

    let report = runtime.ingest_external(&user, doc(json!({}))).await.unwrap();
    assert_eq!(report.runtime_errors.len(), 1);
    let err = &report.runtime_errors[0];
    assert_eq!((err.uuid.as_str(), err.block_type.as_str(), err.message.as_str()), ("b", "step", "boom"));
    assert_eq!(report.executed_uuids(), vec!["a", "c"]);
    assert!(runtime.state_of("c", "u1").await.unwrap().is_some());
    assert!(runtime.state_of("b", "u1").await.unwrap().is_none());
    assert!(runtime.state_of("d", "u1").await.unwrap().is_none());

    let labels: Vec<&str> = runtime.audit().list("p-crash").iter().map(|e| e.kind.label()).collect();
    assert_eq!(labels, vec!["input", "executed", "failed", "executed"]);
}

#[tokio::test]
async fn panics_and_timeouts_become_runtime_errors() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("a", "step").active()
                                                                                             .with_event("ok", "p", "run")
                                                                                             .with_event("ok", "slow", "run"))
                                                    .with_child(BlockConfig::new("p", "step").with_option("panic", json!(true)))
                                                    .with_child(BlockConfig::new("slow", "step").with_option("sleepMs", json!(300)));
    let ctx = context("p-timeout", root, vec![EntryRoute::new(None, None, "a")], PolicyMode::Live)
        .with_options(RuntimeOptions { block_timeout: Duration::from_millis(50),
                                       ..RuntimeOptions::default() });
    let runtime = PolicyRuntime::in_memory(ctx);
    let report = runtime.ingest_external(&runtime.user("u1", None), doc(json!({}))).await.unwrap();

    assert_eq!(report.executed_uuids(), vec!["a"]);
    let messages: Vec<(&str, &str)> = report.runtime_errors.iter().map(|e| (e.uuid.as_str(), e.message.as_str())).collect();
    assert_eq!(messages, vec![("p", "panicked: kaboom"), ("slow", "timed out after 50 ms")]);
}

#[tokio::test]
async fn event_for_unauthorised_role_is_dropped_without_state() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("a", "step").active().with_event("ok", "b", "run"))
                                                    .with_child(BlockConfig::new("b", "step").with_permissions(&["Verifier"])
                                                                                             .with_event("ok", "c", "run"))
                                                    .with_child(BlockConfig::new("c", "step"));
    let runtime = PolicyRuntime::in_memory(context("p-perm", root, vec![EntryRoute::new(None, None, "a")], PolicyMode::Live));
    let registrant = runtime.user("u1", Some("Registrant"));

    let report = runtime.ingest_external(&registrant, doc(json!({}))).await.unwrap();
    assert_eq!(report.executed_uuids(), vec!["a"]);
    assert_eq!(report.permission_errors.len(), 1);
    assert_eq!(report.permission_errors[0].block_uuid, "b");
    assert!(report.runtime_errors.is_empty());
    assert!(runtime.state_of("b", "u1").await.unwrap().is_none());
    assert!(runtime.audit().list("p-perm").iter().any(|e| e.kind.label() == "denied"));

    let verifier = runtime.user("u2", Some("Verifier"));
    let report = runtime.ingest_external(&verifier, doc(json!({}))).await.unwrap();
    assert_eq!(report.executed_uuids(), vec!["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_users_do_not_leak_state() {
    let (root, routes) = chain_abc();
    let runtime = Arc::new(PolicyRuntime::in_memory(context("p-iso", root, routes, PolicyMode::Live)));

    let mut tasks = Vec::new();
    for user_id in ["alice", "bob"] {
        for i in 0..20 {
            let rt = runtime.clone();
            tasks.push(tokio::spawn(async move {
                let user = rt.user(user_id, None);
                rt.ingest_external(&user, doc(json!({ "who": user_id, "i": i }))).await
            }));
        }
    }
    for t in tasks {
        assert!(t.await.unwrap().unwrap().is_clean());
    }

    for user_id in ["alice", "bob"] {
        let c = runtime.state_of("c", user_id).await.unwrap().unwrap();
        assert_eq!(c.payload["runs"], json!(20));
        assert_eq!(c.payload["user"], json!(user_id));
        assert_eq!(c.payload["last"]["input"]["input"]["who"], json!(user_id));
        assert_eq!(c.version, 20);
    }
}

#[tokio::test]
async fn manual_action_requires_an_active_block() {
    let (root, routes) = chain_abc();
    let runtime = PolicyRuntime::in_memory(context("p-manual", root, routes, PolicyMode::Live));
    let user = runtime.user("u1", None);

    let err = runtime.run_block(&user, "c", "run", json!({})).await.unwrap_err();
    assert_eq!(err, CoreEngineError::BlockInactive("c".into()));
    assert!(matches!(runtime.run_block(&user, "zz", "run", json!({})).await, Err(CoreEngineError::BlockNotFound(_))));

    runtime.ingest_external(&user, doc(json!({}))).await.unwrap();
    let report = runtime.run_block(&user, "c", "run", json!({"manual": true})).await.unwrap();
    assert_eq!(report.executed_uuids(), vec!["c"]);
    assert_eq!(runtime.state_of("c", "u1").await.unwrap().unwrap().payload["runs"], json!(2));
}

#[tokio::test]
async fn unrouted_document_has_no_entry_block() {
    let (root, _) = chain_abc();
    let routes = vec![EntryRoute::new(Some("project"), Some("Registrant"), "a")];
    let runtime = PolicyRuntime::in_memory(context("p-route", root, routes, PolicyMode::Live));

    let verifier = runtime.user("v", Some("Verifier"));
    let err = runtime.ingest_external(&verifier, ExternalDocument::new(Some("project"), json!({}))).await.unwrap_err();
    assert!(matches!(err, CoreEngineError::NoEntryBlock { .. }));

    let registrant = runtime.user("r", Some("Registrant"));
    assert!(runtime.ingest_external(&registrant, ExternalDocument::new(Some("report"), json!({}))).await.is_err());
    let ok = runtime.ingest_external(&registrant, ExternalDocument::new(Some("project"), json!({}))).await.unwrap();
    assert_eq!(ok.executed.len(), 3);
}

#[tokio::test]
async fn shared_block_keeps_one_state_for_all_users() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("a", "step").active().with_option("shared", json!(true)));
    let runtime = PolicyRuntime::in_memory(context("p-shared", root, vec![EntryRoute::new(None, None, "a")], PolicyMode::Live));
    runtime.ingest_external(&runtime.user("u1", None), doc(json!(1))).await.unwrap();
    runtime.ingest_external(&runtime.user("u2", None), doc(json!(2))).await.unwrap();

    let shared = runtime.state_of("a", "anyone").await.unwrap().unwrap();
    assert_eq!(shared.user_id, None);
    assert_eq!(shared.payload["runs"], json!(2));
}

#[tokio::test]
async fn transient_state_writes_are_retried_then_surface_as_concurrency_errors() {
    let (root, routes) = chain_abc();
    let states = Arc::new(InMemoryStateStore::new());
    let runtime = PolicyRuntime::new(context("p-retry", root, routes, PolicyMode::Live),
                                     states.clone(),
                                     Arc::new(InMemoryCollectionStore::new()),
                                     Arc::new(InMemoryAuditStore::new()));
    let user = runtime.user("u1", None);

    states.fail_next_sets(2);
    let report = runtime.ingest_external(&user, doc(json!({}))).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.executed.len(), 3);

    states.fail_next_sets(100);
    let report = runtime.ingest_external(&user, doc(json!({}))).await.unwrap();
    assert_eq!(report.runtime_errors.len(), 1);
    assert_eq!(report.runtime_errors[0].uuid, "a");
    assert!(report.runtime_errors[0].message.starts_with("concurrency error"));
    states.fail_next_sets(0);
}

#[tokio::test]
async fn recorded_actions_replay_to_the_same_fingerprints() {
    let (root, routes) = chain_abc();
    let recorder = Arc::new(Recorder::new());
    let live = PolicyRuntime::in_memory(context("p-live", root.clone(), routes.clone(), PolicyMode::Live)).with_recorder(recorder.clone());
    let user = live.user("u1", Some("Registrant"));

    let mut expected = Vec::new();
    expected.push(live.ingest_external(&user, doc(json!({"n": 1}))).await.unwrap().fingerprint);
    expected.push(live.run_block(&user, "b", "run", json!({"n": 2})).await.unwrap().fingerprint);
    expected.push(live.ingest_external(&user, doc(json!({"n": 3}))).await.unwrap().fingerprint);
    assert_eq!(recorder.items().len(), 3);

    let sandbox = PolicyRuntime::in_memory(context("p-sandbox", root, routes, PolicyMode::DryRun));
    let reports = replay(&sandbox, &recorder.actions()).await.unwrap();
    let replayed: Vec<String> = reports.into_iter().map(|r| r.fingerprint).collect();
    assert_eq!(replayed, expected);
    assert_eq!(sandbox.state_of("c", "u1").await.unwrap().unwrap().payload["runs"], json!(3));
}

/// Working set que acepta lecturas pero rechaza toda escritura.
#[derive(Default)]
struct FullDisk {
    inner: InMemoryCollectionStore,
}

#[async_trait]
impl CollectionStore for FullDisk {
    async fn rows(&self, policy_id: &str, source_id: &str) -> Result<Vec<CollectionRow>, StoreError> {
        self.inner.rows(policy_id, source_id).await
    }

    async fn sources(&self, policy_id: &str) -> Result<Vec<String>, StoreError> {
        self.inner.sources(policy_id).await
    }

    async fn apply_writes(&self, _: &str, _: &[CollectionWrite]) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }

    async fn replace_all(&self, policy_id: &str, sources: BTreeMap<String, Vec<CollectionRow>>) -> Result<(), StoreError> {
        self.inner.replace_all(policy_id, sources).await
    }

    async fn clear(&self, policy_id: &str) -> Result<(), StoreError> {
        self.inner.clear(policy_id).await
    }
}

#[tokio::test]
async fn failed_collection_write_leaves_no_block_state_behind() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("a", "step").active()
                                                                                             .with_option("writeTo", json!("docs"))
                                                                                             .with_event("ok", "b", "run"))
                                                    .with_child(BlockConfig::new("b", "step"));
    let states = Arc::new(InMemoryStateStore::new());
    let collections = Arc::new(FullDisk::default());
    let runtime = PolicyRuntime::new(context("p-disk", root, vec![EntryRoute::new(None, None, "a")], PolicyMode::Live),
                                     states.clone(),
                                     collections.clone(),
                                     Arc::new(InMemoryAuditStore::new()));
    let user = runtime.user("u1", None);

    let report = runtime.ingest_external(&user, doc(json!({"id": "1"}))).await.unwrap();
    assert!(report.executed.is_empty());
    assert_eq!(report.runtime_errors.len(), 1);
    assert_eq!(report.runtime_errors[0].uuid, "a");
    assert!(report.runtime_errors[0].message.contains("disk full"), "{}", report.runtime_errors[0].message);

    assert!(runtime.state_of("a", "u1").await.unwrap().is_none());
    assert!(runtime.state_of("b", "u1").await.unwrap().is_none());
    assert!(states.is_empty());
    assert!(collections.sources("p-disk").await.unwrap().is_empty());
}
