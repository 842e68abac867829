//! Estado de ejecución por `(policy_id, block_id, user_id)`.
//!
//! Máquina de estados por par (bloque, usuario):
//! `Inactive -> Active -> WaitingForInput -> Active -> ... -> Terminal(name)`.
//! Las transiciones las produce exclusivamente la entrega de eventos.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::hashing::hash_value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "name", rename_all = "camelCase")]
pub enum BlockStatus {
    Inactive,
    Active,
    WaitingForInput,
    /// Estado final específico del tipo de bloque (p. ej. "approved").
    Terminal(String),
}

impl BlockStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BlockStatus::Terminal(_))
    }

    pub fn is_inactive(&self) -> bool {
        matches!(self, BlockStatus::Inactive)
    }
}

/// Clave única del estado. `user_id = None` para bloques compartidos.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub policy_id: String,
    pub block_id: String,
    pub user_id: Option<String>,
}

impl StateKey {
    pub fn new(policy_id: &str, block_id: &str, user_id: Option<&str>) -> Self {
        Self { policy_id: policy_id.to_string(),
               block_id: block_id.to_string(),
               user_id: user_id.map(str::to_string) }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,
               "{}/{}/{}",
               self.policy_id,
               self.block_id,
               self.user_id.as_deref().unwrap_or("*"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockState {
    pub policy_id: String,
    pub block_id: String,
    pub user_id: Option<String>,
    pub status: BlockStatus,
    pub payload: Value,
    /// 0 = estado por defecto aún no persistido; cada `set` incrementa.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl BlockState {
    /// Estado por defecto en el primer contacto (no persistido).
    pub fn initial(key: &StateKey, status: BlockStatus) -> Self {
        Self { policy_id: key.policy_id.clone(),
               block_id: key.block_id.clone(),
               user_id: key.user_id.clone(),
               status,
               payload: Value::Null,
               version: 0,
               updated_at: Utc::now() }
    }

    pub fn key(&self) -> StateKey {
        StateKey { policy_id: self.policy_id.clone(),
                   block_id: self.block_id.clone(),
                   user_id: self.user_id.clone() }
    }

    /// Hash de contenido (status + payload); `updated_at` no participa.
    pub fn content_hash(&self) -> String {
        hash_value(&json!({ "status": self.status, "payload": self.payload }))
    }
}

/// Captura de un `BlockState` asociada a un savepoint de dry-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStateSavepoint {
    pub policy_id: String,
    pub savepoint_id: String,
    pub state: BlockState,
}
