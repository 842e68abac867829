//! Errores del core.
//!
//! Taxonomía:
//! - `Configuration` / `InvalidPolicy`: defectos estructurales detectados al
//!   publicar. Nunca ocurren en runtime porque sólo corren árboles validados.
//! - `PermissionError`: evento descartado por rol insuficiente (no fatal).
//! - `BlockRuntimeError`: error, panic o timeout dentro de `run` (aislado a
//!   la rama que lo produjo).
//! - `Integrity`: hash de un diff no coincide durante un restore (fatal).
//! - `Concurrency`: lock por usuario o escritura atómica fallida tras
//!   reintentos acotados.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Role;
use crate::validator::ValidationReport;

/// Errores del state-store / snapshot-store. Las implementaciones
/// (in-memory, Postgres) mapean sus fallos nativos a estas variantes.
#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient store error (retryable): {0}")]
    Transient(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Indica si conviene reintentar la operación con backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Evento descartado porque el usuario no tiene un rol admitido por el bloque.
#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[error("user '{user_id}' (role {role:?}) lacks permission for block '{block_uuid}' (requires {required:?})")]
pub struct PermissionError {
    pub block_uuid: String,
    pub user_id: String,
    pub role: Option<Role>,
    pub required: Vec<Role>,
}

/// Fallo dentro del `run` de un bloque.
#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[error("block {block_type} ({uuid}) failed: {message}")]
pub struct BlockRuntimeError {
    pub block_type: String,
    pub uuid: String,
    pub message: String,
}

#[derive(Debug, Error, PartialEq, Clone, Serialize, Deserialize)]
pub enum CoreEngineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("policy is not publishable ({} error(s))", .0.error_count())]
    InvalidPolicy(Box<ValidationReport>),
    #[error("block not found: {0}")]
    BlockNotFound(String),
    #[error("unknown block type: {0}")]
    UnknownBlockType(String),
    #[error(transparent)]
    Permission(PermissionError),
    #[error(transparent)]
    BlockRuntime(BlockRuntimeError),
    #[error("block '{0}' is not active for this user")]
    BlockInactive(String),
    #[error("no entry block for document type {document_type:?} and role {role:?}")]
    NoEntryBlock { document_type: Option<String>, role: Option<Role> },
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("concurrency error: {0}")]
    Concurrency(String),
    #[error("savepoint '{0}' already exists")]
    SavepointExists(String),
    #[error("savepoint '{0}' not found")]
    SavepointNotFound(String),
    #[error("no savepoints to roll back")]
    NoSavepoints,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal: {0}")]
    Internal(String),
}

impl CoreEngineError {
    /// Clase estable del error, usada por el audit log y la persistencia.
    pub fn class(&self) -> &'static str {
        match self {
            CoreEngineError::Configuration(_) | CoreEngineError::InvalidPolicy(_) => "configuration",
            CoreEngineError::Permission(_) | CoreEngineError::BlockInactive(_) => "permission",
            CoreEngineError::BlockRuntime(_) => "runtime",
            CoreEngineError::Integrity(_) => "integrity",
            CoreEngineError::Concurrency(_) => "concurrency",
            CoreEngineError::Store(e) if e.is_retryable() => "transient",
            _ => "permanent",
        }
    }
}
