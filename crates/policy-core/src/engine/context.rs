use std::sync::Arc;
use std::time::Duration;

use crate::constants::{DEFAULT_BLOCK_TIMEOUT_MS, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_STORE_RETRIES, RETRY_BACKOFF_MS};
use crate::model::PolicyInstance;
use crate::registry::BlockRegistry;

/// Límites del runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Tope de una invocación `run`.
    pub block_timeout: Duration,
    /// Tope de espera por el lock `(policy_id, user_id)` en cada intento.
    pub lock_timeout: Duration,
    /// Reintentos ante fallos transitorios o conflictos del state-store.
    pub store_retries: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { block_timeout: Duration::from_millis(DEFAULT_BLOCK_TIMEOUT_MS),
               lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
               store_retries: DEFAULT_STORE_RETRIES }
    }
}

impl RuntimeOptions {
    /// Backoff lineal: 15ms * intento.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)
    }
}

/// Contexto explícito de una instancia: se pasa por referencia a cada
/// llamada del runtime en lugar de vivir en un singleton de proceso.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub instance: Arc<PolicyInstance>,
    pub registry: Arc<BlockRegistry>,
    pub options: RuntimeOptions,
}

impl RuntimeContext {
    pub fn new(instance: PolicyInstance, registry: Arc<BlockRegistry>) -> Self {
        Self { instance: Arc::new(instance),
               registry,
               options: RuntimeOptions::default() }
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn policy_id(&self) -> &str {
        &self.instance.policy_id
    }
}
