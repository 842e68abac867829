//! Ensamblado de una instancia: carga de documentos, publicación con los
//! bloques incluidos y selección de stores (memoria o Postgres).
use std::path::Path;
use std::sync::Arc;

use log::info;

use policy_blocks::builtin_registry;
use policy_core::{CollectionStore, DryRunSession, ExecutionReport, InMemoryAuditStore, InMemoryCollectionStore, InMemorySnapshotStore,
                  InMemoryStateStore, PolicyDefinition, PolicyInstance, PolicyMode, PolicyRuntime, RecordedAction, RuntimeContext,
                  PolicyTree, PolicyValidator, SnapshotStore, StateStore, ValidationReport};
use policy_persistence::{build_pool, DbConfig, PgCollectionStore, PgSnapshotStore, PgStateStore, PoolProvider};

use crate::config::AppConfig;
use crate::errors::AppError;

/// Juego de stores que comparten runtime y gestor de savepoints. Una
/// instancia en vivo y su dry-run pueden usar el mismo juego: el dry-run
/// guarda todo bajo su propia clave sandbox.
#[derive(Clone)]
pub struct Stores {
    pub states: Arc<dyn StateStore>,
    pub collections: Arc<dyn CollectionStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self { states: Arc::new(InMemoryStateStore::new()),
               collections: Arc::new(InMemoryCollectionStore::new()),
               snapshots: Arc::new(InMemorySnapshotStore::new()) }
    }

    pub fn postgres(db: &DbConfig) -> Result<Self, AppError> {
        let provider = PoolProvider::new(build_pool(&db.url, db.min_connections, db.max_connections)?);
        Ok(Self { states: Arc::new(PgStateStore::new(provider.clone())),
                  collections: Arc::new(PgCollectionStore::new(provider.clone())),
                  snapshots: Arc::new(PgSnapshotStore::new(provider)) })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        match &cfg.database {
            Some(db) => {
                info!("using postgres stores");
                Self::postgres(db)
            }
            None => Ok(Self::in_memory()),
        }
    }
}

pub fn load_policy(path: &Path) -> Result<PolicyDefinition, AppError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn load_actions(path: &Path) -> Result<Vec<RecordedAction>, AppError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Valida sin publicar (informe completo, también cuando es válido).
pub fn validate(definition: &PolicyDefinition) -> Result<ValidationReport, AppError> {
    let registry = builtin_registry()?;
    let tree = PolicyTree::new(definition.root.clone());
    Ok(PolicyValidator::new(&registry).validate(&tree, &definition.roles, &definition.routes))
}

pub fn publish(definition: PolicyDefinition, mode: PolicyMode, cfg: &AppConfig) -> Result<RuntimeContext, AppError> {
    let registry = Arc::new(builtin_registry()?);
    let instance = PolicyInstance::publish(definition, &registry, mode)?;
    info!("published policy {} ({:?}, {} blocks)", instance.policy_id, mode, instance.tree.len());
    Ok(RuntimeContext::new(instance, registry).with_options(cfg.runtime))
}

pub fn runtime(ctx: RuntimeContext, stores: &Stores) -> PolicyRuntime {
    PolicyRuntime::new(ctx,
                       Arc::clone(&stores.states),
                       Arc::clone(&stores.collections),
                       Arc::new(InMemoryAuditStore::new()))
}

pub fn dry_run(ctx: RuntimeContext, stores: &Stores, checkpoint_every: usize) -> Result<DryRunSession, AppError> {
    let session = DryRunSession::new(runtime(ctx, stores), Arc::clone(&stores.snapshots))?;
    Ok(session.with_checkpoint_every(checkpoint_every))
}

/// Ejecuta las acciones dentro de un dry-run (con checkpoints automáticos).
pub async fn run_in_session(session: &DryRunSession, actions: &[RecordedAction]) -> Result<Vec<ExecutionReport>, AppError> {
    let mut reports = Vec::with_capacity(actions.len());
    for action in actions {
        let report = match action {
            RecordedAction::ExternalData { user, document } => session.ingest_external(user, document.clone()).await?,
            RecordedAction::BlockAction { user,
                                          block_uuid,
                                          input,
                                          payload, } => session.run_block(user, block_uuid, input, payload.clone()).await?,
        };
        reports.push(report);
    }
    Ok(reports)
}
