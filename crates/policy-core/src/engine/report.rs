use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::ENGINE_VERSION;
use crate::errors::{BlockRuntimeError, PermissionError};
use crate::hashing::hash_value;
use crate::model::BlockStatus;

/// Una ejecución de `run` que terminó bien y cuyo estado quedó persistido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub block_uuid: String,
    pub block_type: String,
    pub input: String,
    pub status: BlockStatus,
    pub events: Vec<String>,
    /// Hash de la salida reenviada a los suscriptores.
    pub output_hash: String,
}

/// Resultado síncrono (para el llamador) de una entrada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Identificador de esta cascada (no entra en el fingerprint).
    pub run_id: Uuid,
    pub policy_id: String,
    pub user_id: String,
    /// En orden de ejecución (BFS).
    pub executed: Vec<ExecutionRecord>,
    pub permission_errors: Vec<PermissionError>,
    pub runtime_errors: Vec<BlockRuntimeError>,
    /// Hash de la cascada. No incluye `policy_id` ni `user_id`, así que una
    /// réplica sobre otra instancia produce el mismo valor.
    pub fingerprint: String,
}

impl ExecutionReport {
    pub(crate) fn new(policy_id: &str, user_id: &str) -> Self {
        Self { run_id: Uuid::new_v4(),
               policy_id: policy_id.to_string(),
               user_id: user_id.to_string(),
               executed: Vec::new(),
               permission_errors: Vec::new(),
               runtime_errors: Vec::new(),
               fingerprint: String::new() }
    }

    pub(crate) fn seal(&mut self) {
        let executed: Vec<Value> = self.executed
                                       .iter()
                                       .map(|r| {
                                           json!({
                                               "block": r.block_uuid,
                                               "input": r.input,
                                               "status": r.status,
                                               "events": r.events,
                                               "output": r.output_hash,
                                           })
                                       })
                                       .collect();
        let denied: Vec<&str> = self.permission_errors.iter().map(|e| e.block_uuid.as_str()).collect();
        let failed: Vec<Value> = self.runtime_errors
                                     .iter()
                                     .map(|e| json!({ "block": e.uuid, "message": e.message }))
                                     .collect();
        self.fingerprint = hash_value(&json!({
                                          "engine_version": ENGINE_VERSION,
                                          "executed": executed,
                                          "denied": denied,
                                          "failed": failed,
                                      }));
    }

    /// Sin descartes por permiso ni fallos de bloque.
    pub fn is_clean(&self) -> bool {
        self.permission_errors.is_empty() && self.runtime_errors.is_empty()
    }

    pub fn executions_of(&self, block_uuid: &str) -> usize {
        self.executed.iter().filter(|r| r.block_uuid == block_uuid).count()
    }

    pub fn executed_uuids(&self) -> Vec<&str> {
        self.executed.iter().map(|r| r.block_uuid.as_str()).collect()
    }
}
