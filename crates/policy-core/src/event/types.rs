//! Eventos de auditoría del runtime y del gestor de savepoints.
//!
//! El stream es append-only por política. Sirve para inspeccionar qué pasó
//! en una cascada (aceptaciones, ejecuciones, descartes por permiso y fallos)
//! sin reconstruir el estado de los bloques.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BlockRuntimeError, PermissionError};
use crate::model::BlockStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// Entrada externa o acción manual aceptada por el runtime.
    InputAccepted { user_id: String, entry_blocks: Vec<String>, input: String },
    BlockExecuted {
        block_uuid: String,
        user_id: String,
        input: String,
        status: BlockStatus,
        events: Vec<String>,
    },
    /// Evento descartado por rol insuficiente (no fatal).
    PermissionDenied(PermissionError),
    /// Error, panic o timeout en `run`; la rama se corta.
    BlockFailed { user_id: String, error: BlockRuntimeError },
    CheckpointCreated { savepoint_id: String, seq: u64, sources: Vec<String> },
    Restored { savepoint_id: String },
    RolledBack { savepoint_id: String },
    Discarded { savepoints: u64 },
}

impl AuditEventKind {
    /// Etiqueta corta para logs y tests.
    pub fn label(&self) -> &'static str {
        match self {
            AuditEventKind::InputAccepted { .. } => "input",
            AuditEventKind::BlockExecuted { .. } => "executed",
            AuditEventKind::PermissionDenied(_) => "denied",
            AuditEventKind::BlockFailed { .. } => "failed",
            AuditEventKind::CheckpointCreated { .. } => "checkpoint",
            AuditEventKind::Restored { .. } => "restored",
            AuditEventKind::RolledBack { .. } => "rolled_back",
            AuditEventKind::Discarded { .. } => "discarded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub policy_id: String,
    pub kind: AuditEventKind,
    pub ts: DateTime<Utc>,
}
