use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::{CheckpointSummary, RestoreSummary, RollbackSummary, SavepointManager};
use crate::engine::{ExecutionReport, ExternalDocument, PolicyRuntime, RuntimeContext};
use crate::errors::CoreEngineError;
use crate::model::{BlockState, PolicyUser};
use crate::store::{InMemorySnapshotStore, SnapshotStore};

/// Dry-run: runtime sandbox + gestor de savepoints sobre sus mismos stores.
/// Opcionalmente crea un checkpoint automático cada `n` entradas.
///
/// Todo lo que toca (estados, working set, journal) vive bajo
/// `store_scope()`, así que puede compartir stores con la instancia en vivo
/// sin leer ni modificar sus claves.
pub struct DryRunSession {
    runtime: PolicyRuntime,
    savepoints: SavepointManager,
    checkpoint_every: usize,
    inputs: AtomicUsize,
}

impl DryRunSession {
    pub fn new(runtime: PolicyRuntime, snapshots: Arc<dyn SnapshotStore>) -> Result<Self, CoreEngineError> {
        if !runtime.context().instance.is_dry_run() {
            return Err(CoreEngineError::Configuration(format!("policy {} is not in dry-run mode", runtime.policy_id())));
        }
        let savepoints = SavepointManager::new(snapshots, runtime.collections(), runtime.states()).with_audit(runtime.audit());
        Ok(Self { runtime,
                  savepoints,
                  checkpoint_every: 0,
                  inputs: AtomicUsize::new(0) })
    }

    pub fn in_memory(ctx: RuntimeContext) -> Result<Self, CoreEngineError> {
        Self::new(PolicyRuntime::in_memory(ctx), Arc::new(InMemorySnapshotStore::new()))
    }

    /// `0` desactiva los checkpoints automáticos.
    pub fn with_checkpoint_every(mut self, n: usize) -> Self {
        self.checkpoint_every = n;
        self
    }

    pub fn runtime(&self) -> &PolicyRuntime {
        &self.runtime
    }

    pub fn savepoints(&self) -> &SavepointManager {
        &self.savepoints
    }

    pub fn policy_id(&self) -> &str {
        self.runtime.policy_id()
    }

    /// Clave sandbox bajo la que se guardan estados, colecciones y savepoints.
    pub fn store_scope(&self) -> &str {
        self.runtime.store_scope()
    }

    /// Copia al sandbox los estados y el working set vivos de la política,
    /// reemplazando lo que hubiera. Devuelve `(estados, filas)` copiados.
    pub async fn seed_from_live(&self) -> Result<(usize, usize), CoreEngineError> {
        let (live, scope) = (self.policy_id(), self.store_scope());
        let states: Vec<BlockState> = self.runtime
                                          .states()
                                          .list_policy(live)
                                          .await?
                                          .into_iter()
                                          .map(|mut s| {
                                              s.policy_id = scope.to_string();
                                              s
                                          })
                                          .collect();
        let collections = self.runtime.collections();
        let mut sources = BTreeMap::new();
        for source in collections.sources(live).await? {
            let rows = collections.rows(live, &source).await?;
            sources.insert(source, rows);
        }
        let (n_states, n_rows) = (states.len(), sources.values().map(Vec::len).sum::<usize>());
        collections.replace_all(scope, sources).await?;
        self.runtime.states().replace_policy(scope, states).await?;
        log::info!("{}: dry run seeded from live ({} block state(s), {} row(s))", scope, n_states, n_rows);
        Ok((n_states, n_rows))
    }

    pub async fn ingest_external(&self, user: &PolicyUser, document: ExternalDocument) -> Result<ExecutionReport, CoreEngineError> {
        let report = self.runtime.ingest_external(user, document).await?;
        self.after_input().await?;
        Ok(report)
    }

    pub async fn run_block(&self, user: &PolicyUser, block_uuid: &str, input: &str, payload: Value) -> Result<ExecutionReport, CoreEngineError> {
        let report = self.runtime.run_block(user, block_uuid, input, payload).await?;
        self.after_input().await?;
        Ok(report)
    }

    async fn after_input(&self) -> Result<Option<CheckpointSummary>, CoreEngineError> {
        let n = self.inputs.fetch_add(1, Ordering::SeqCst) + 1;
        if self.checkpoint_every == 0 || n % self.checkpoint_every != 0 {
            return Ok(None);
        }
        let summary = self.checkpoint(&format!("auto-{n}")).await?;
        Ok(Some(summary))
    }

    pub async fn checkpoint(&self, savepoint_id: &str) -> Result<CheckpointSummary, CoreEngineError> {
        self.savepoints.checkpoint(self.store_scope(), savepoint_id).await
    }

    pub async fn restore(&self, savepoint_id: &str) -> Result<RestoreSummary, CoreEngineError> {
        self.savepoints.restore(self.store_scope(), savepoint_id).await
    }

    pub async fn rollback_one(&self) -> Result<RollbackSummary, CoreEngineError> {
        self.savepoints.rollback_one(self.store_scope()).await
    }

    /// Termina el dry-run: purga el journal y borra el estado sandbox
    /// (estados de bloque y working set). Las claves vivas no se tocan.
    pub async fn discard(&self) -> Result<u64, CoreEngineError> {
        let scope = self.store_scope();
        let purged = self.savepoints.discard(scope).await?;
        let states = self.runtime.states().delete_policy(scope).await?;
        self.runtime.collections().clear(scope).await?;
        log::info!("{}: dry run discarded ({} savepoint(s), {} block state(s))", scope, purged, states);
        Ok(purged)
    }
}
