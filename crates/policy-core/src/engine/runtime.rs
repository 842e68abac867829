//! Intérprete de una instancia de política.
//!
//! Algoritmo de cascada (por entrada):
//! 1. Resolver bloques de entrada (rutas estáticas o acción manual).
//! 2. Por cada entrega en la cola FIFO: chequear permisos, cargar estado (o
//!    el estado por defecto), ejecutar `run` en el pool bloqueante con
//!    timeout y persistir el nuevo estado (compare-and-set con reintentos).
//! 3. Encolar cada binding cuyo `source_output` coincide con un evento
//!    emitido. La cola FIFO hace la propagación en anchura y determinista.
//!
//! Un fallo de `run` corta sólo su rama; lo ya encolado sigue ejecutándose.
//!
//! Estados, colecciones y auditoría se guardan bajo `store_scope`: el id de
//! la política en vivo, o su espacio sandbox en un dry-run. Un dry-run nunca
//! lee ni escribe las claves vivas aunque comparta los stores.
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::recording::{RecordedAction, Recorder};
use super::{ExecutionRecord, ExecutionReport, RuntimeContext, UserLocks};
use crate::constants::RUN_EVENT;
use crate::errors::{BlockRuntimeError, CoreEngineError, PermissionError, StoreError};
use crate::event::{AuditEventKind, AuditStore, InMemoryAuditStore};
use crate::hashing::hash_value;
use crate::model::{BlockConfig, BlockState, BlockStatus, PolicyUser, StateKey};
use crate::registry::{BlockBehavior, BlockOutcome, BlockRunContext};
use crate::store::{CollectionStore, InMemoryCollectionStore, InMemoryStateStore, StateStore};
use crate::validator::panic_message;

/// Documento externo ya validado (el contenido lo valida un colaborador externo).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDocument {
    #[serde(default)]
    pub document_type: Option<String>,
    pub payload: Value,
}

impl ExternalDocument {
    pub fn new(document_type: Option<&str>, payload: Value) -> Self {
        Self { document_type: document_type.map(str::to_string),
               payload }
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    target: String,
    input: String,
    payload: Value,
    /// Acción manual del usuario: no activa bloques inactivos.
    manual: bool,
}

enum StepFailure {
    Runtime(BlockRuntimeError),
    Fatal(CoreEngineError),
}

pub struct PolicyRuntime {
    ctx: RuntimeContext,
    scope: String,
    states: Arc<dyn StateStore>,
    collections: Arc<dyn CollectionStore>,
    audit: Arc<dyn AuditStore>,
    locks: UserLocks,
    recorder: Option<Arc<Recorder>>,
}

impl PolicyRuntime {
    pub fn new(ctx: RuntimeContext,
               states: Arc<dyn StateStore>,
               collections: Arc<dyn CollectionStore>,
               audit: Arc<dyn AuditStore>)
               -> Self {
        let scope = ctx.instance.store_scope();
        Self { ctx,
               scope,
               states,
               collections,
               audit,
               locks: UserLocks::new(),
               recorder: None }
    }

    /// Runtime con stores en memoria (tests, dry-runs locales, CLI).
    pub fn in_memory(ctx: RuntimeContext) -> Self {
        Self::new(ctx,
                  Arc::new(InMemoryStateStore::new()),
                  Arc::new(InMemoryCollectionStore::new()),
                  Arc::new(InMemoryAuditStore::new()))
    }

    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    pub fn policy_id(&self) -> &str {
        self.ctx.policy_id()
    }

    /// Clave de los stores: igual a `policy_id` salvo en dry-run.
    pub fn store_scope(&self) -> &str {
        &self.scope
    }

    pub fn states(&self) -> Arc<dyn StateStore> {
        self.states.clone()
    }

    pub fn collections(&self) -> Arc<dyn CollectionStore> {
        self.collections.clone()
    }

    pub fn audit(&self) -> Arc<dyn AuditStore> {
        self.audit.clone()
    }

    pub fn user(&self, id: &str, role: Option<&str>) -> PolicyUser {
        self.ctx.instance.user(id, role)
    }

    /// Punto de entrada de datos externos: resuelve los bloques de entrada
    /// por tipo de documento y rol, y corre la cascada completa.
    pub async fn ingest_external(&self, user: &PolicyUser, document: ExternalDocument) -> Result<ExecutionReport, CoreEngineError> {
        let entries: Vec<String> = self.ctx
                                       .instance
                                       .entry_blocks(document.document_type.as_deref(), user)
                                       .into_iter()
                                       .map(|b| b.uuid.clone())
                                       .collect();
        if entries.is_empty() {
            return Err(CoreEngineError::NoEntryBlock { document_type: document.document_type.clone(),
                                                       role: user.role.clone() });
        }
        if let Some(recorder) = &self.recorder {
            recorder.record(RecordedAction::ExternalData { user: user.clone(),
                                                           document: document.clone() });
        }
        let queue = entries.iter()
                           .map(|uuid| Delivery { target: uuid.clone(),
                                                  input: RUN_EVENT.to_string(),
                                                  payload: document.payload.clone(),
                                                  manual: false })
                           .collect();
        self.run_cascade(user, entries, RUN_EVENT, queue).await
    }

    /// Acción manual de un usuario sobre un bloque concreto.
    pub async fn run_block(&self, user: &PolicyUser, block_uuid: &str, input: &str, payload: Value) -> Result<ExecutionReport, CoreEngineError> {
        self.ctx.instance.tree.find_by_uuid(block_uuid)?;
        if let Some(recorder) = &self.recorder {
            recorder.record(RecordedAction::BlockAction { user: user.clone(),
                                                          block_uuid: block_uuid.to_string(),
                                                          input: input.to_string(),
                                                          payload: payload.clone() });
        }
        let queue = VecDeque::from([Delivery { target: block_uuid.to_string(),
                                               input: input.to_string(),
                                               payload,
                                               manual: true }]);
        self.run_cascade(user, vec![block_uuid.to_string()], input, queue).await
    }

    /// Estado actual de un bloque para un usuario (o el compartido).
    pub async fn state_of(&self, block_uuid: &str, user_id: &str) -> Result<Option<BlockState>, CoreEngineError> {
        let block = self.ctx.instance.tree.find_by_uuid(block_uuid)?;
        let key = self.state_key(block, user_id);
        Ok(self.states.get(&key).await?)
    }

    fn state_key(&self, block: &BlockConfig, user_id: &str) -> StateKey {
        let user = if block.is_shared() { None } else { Some(user_id) };
        StateKey::new(&self.scope, &block.uuid, user)
    }

    fn initial_status(&self, block: &BlockConfig) -> BlockStatus {
        if block.default_active || self.ctx.instance.tree.root().uuid == block.uuid {
            BlockStatus::Active
        } else {
            BlockStatus::Inactive
        }
    }

    async fn run_cascade(&self,
                         user: &PolicyUser,
                         entries: Vec<String>,
                         input: &str,
                         mut queue: VecDeque<Delivery>)
                         -> Result<ExecutionReport, CoreEngineError> {
        let opts = self.ctx.options;
        let _guard = self.locks
                         .acquire(self.policy_id(), &user.id, opts.lock_timeout, opts.store_retries)
                         .await?;
        self.audit.append_kind(&self.scope,
                               AuditEventKind::InputAccepted { user_id: user.id.clone(),
                                                               entry_blocks: entries,
                                                               input: input.to_string() });

        let tree = &self.ctx.instance.tree;
        let mut report = ExecutionReport::new(self.policy_id(), &user.id);
        while let Some(delivery) = queue.pop_front() {
            let block = tree.find_by_uuid(&delivery.target)?;
            let permissions = tree.permissions_for(&block.uuid)?;
            if !user.has_permission(&permissions) {
                let denied = PermissionError { block_uuid: block.uuid.clone(),
                                               user_id: user.id.clone(),
                                               role: user.role.clone(),
                                               required: permissions.into_iter().collect() };
                log::warn!("{}: {}", self.policy_id(), denied);
                self.audit.append_kind(&self.scope, AuditEventKind::PermissionDenied(denied.clone()));
                report.permission_errors.push(denied);
                continue;
            }
            let behavior = self.ctx.registry.resolve(&block.block_type)?;

            match self.execute(block, behavior, &delivery, user).await {
                Ok(outcome) => {
                    log::debug!("{}: {} ({}) ran input '{}' for {} -> {:?}",
                                self.policy_id(),
                                block.uuid,
                                block.block_type,
                                delivery.input,
                                user.id,
                                outcome.events);
                    for event in &outcome.events {
                        for binding in block.bindings_for(event) {
                            queue.push_back(Delivery { target: binding.target_block_uuid.clone(),
                                                       input: binding.target_input.clone(),
                                                       payload: outcome.output.clone(),
                                                       manual: false });
                        }
                    }
                    self.audit.append_kind(&self.scope,
                                           AuditEventKind::BlockExecuted { block_uuid: block.uuid.clone(),
                                                                           user_id: user.id.clone(),
                                                                           input: delivery.input.clone(),
                                                                           status: outcome.status.clone(),
                                                                           events: outcome.events.clone() });
                    report.executed.push(ExecutionRecord { block_uuid: block.uuid.clone(),
                                                           block_type: block.block_type.clone(),
                                                           input: delivery.input,
                                                           status: outcome.status,
                                                           output_hash: hash_value(&outcome.output),
                                                           events: outcome.events });
                }
                Err(StepFailure::Runtime(error)) => {
                    log::error!("{}: {}", self.policy_id(), error);
                    self.audit.append_kind(&self.scope,
                                           AuditEventKind::BlockFailed { user_id: user.id.clone(),
                                                                         error: error.clone() });
                    report.runtime_errors.push(error);
                }
                Err(StepFailure::Fatal(error)) => return Err(error),
            }
        }
        report.seal();
        log::info!("{}: cascade for {} finished ({} executed, {} denied, {} failed)",
                   self.policy_id(),
                   user.id,
                   report.executed.len(),
                   report.permission_errors.len(),
                   report.runtime_errors.len());
        Ok(report)
    }

    /// Carga -> run -> compare-and-set junto con las escrituras del bloque.
    /// Un conflicto o fallo transitorio relee el estado y repite el `run`;
    /// si el commit falla no queda ni el estado nuevo ni sus escrituras.
    async fn execute(&self,
                     block: &BlockConfig,
                     behavior: &BlockBehavior,
                     delivery: &Delivery,
                     user: &PolicyUser)
                     -> Result<BlockOutcome, StepFailure> {
        let key = self.state_key(block, &user.id);
        let retries = self.ctx.options.store_retries;
        let failure = |message: String| {
            StepFailure::Runtime(BlockRuntimeError { block_type: block.block_type.clone(),
                                                     uuid: block.uuid.clone(),
                                                     message })
        };

        let mut attempt = 0u32;
        loop {
            let current = self.retry_store(|| self.states.get(&key))
                              .await
                              .map_err(|e| failure(format!("state read for {key} failed: {e}")))?;
            let state = current.unwrap_or_else(|| BlockState::initial(&key, self.initial_status(block)));
            if delivery.manual && state.status.is_inactive() {
                return Err(StepFailure::Fatal(CoreEngineError::BlockInactive(block.uuid.clone())));
            }

            let run_ctx = BlockRunContext { policy_id: self.policy_id().to_string(),
                                            block: block.shallow(),
                                            input: delivery.input.clone(),
                                            payload: delivery.payload.clone(),
                                            state: state.clone(),
                                            user: user.clone(),
                                            dry_run: self.ctx.instance.is_dry_run() };
            let outcome = self.invoke(behavior, run_ctx).await.map_err(StepFailure::Runtime)?;

            let mut next = state;
            next.status = outcome.status.clone();
            next.payload = outcome.state.clone();
            match self.states.set_with_writes(next, &outcome.writes, self.collections.as_ref()).await {
                Ok(_) => return Ok(outcome),
                Err(e) if (e.is_retryable() || matches!(e, StoreError::Conflict(_))) && attempt < retries => {
                    attempt += 1;
                    log::warn!("state write for {} failed ({}), retry {}/{}", key, e, attempt, retries);
                    tokio::time::sleep(self.ctx.options.backoff(attempt)).await;
                }
                Err(e) if e.is_retryable() || matches!(e, StoreError::Conflict(_)) => {
                    let err = CoreEngineError::Concurrency(format!("state write for {key} failed after {} attempt(s): {e}",
                                                                   attempt + 1));
                    return Err(failure(err.to_string()));
                }
                Err(e) => return Err(failure(format!("state write for {key} failed: {e}"))),
            }
        }
    }

    async fn invoke(&self, behavior: &BlockBehavior, run_ctx: BlockRunContext) -> Result<BlockOutcome, BlockRuntimeError> {
        let run = behavior.run;
        let timeout = self.ctx.options.block_timeout;
        let (block_type, uuid) = (run_ctx.block.block_type.clone(), run_ctx.block.uuid.clone());

        // El hilo bloqueante no se puede cancelar: si vence el timeout su
        // resultado se descarta.
        let handle = tokio::task::spawn_blocking(move || run(&run_ctx));
        let message = match tokio::time::timeout(timeout, handle).await {
            Err(_) => format!("timed out after {} ms", timeout.as_millis()),
            Ok(Err(join)) if join.is_panic() => format!("panicked: {}", panic_message(join.into_panic().as_ref())),
            Ok(Err(_)) => "task was cancelled".to_string(),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Ok(Ok(outcome))) => return Ok(outcome),
        };
        Err(BlockRuntimeError { block_type, uuid, message })
    }

    async fn retry_store<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
        where F: FnMut() -> Fut,
              Fut: Future<Output = Result<T, StoreError>>
    {
        let retries = self.ctx.options.store_retries;
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < retries => {
                    attempt += 1;
                    log::warn!("store call failed ({}), retry {}/{}", e, attempt, retries);
                    tokio::time::sleep(self.ctx.options.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
