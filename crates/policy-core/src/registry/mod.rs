//! Registro explícito de tipos de bloque.
//!
//! Cada tipo de bloque se describe con una tabla de punteros a función
//! `{ validate, run }`. El registro se llena una vez al arrancar el proceso y
//! luego se comparte (solo lectura) entre instancias de política.
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::CoreEngineError;
use crate::model::{BlockConfig, BlockState, BlockStatus, PolicyTree, PolicyUser};
use crate::store::CollectionWrite;
use crate::validator::{BlockValidation, ValidationContext};

pub type ValidateFn = fn(&BlockConfig, &ValidationContext<'_>) -> BlockValidation;
pub type RunFn = fn(&BlockRunContext) -> Result<BlockOutcome, BlockError>;

/// Contrato de un tipo de bloque.
#[derive(Clone, Copy)]
pub struct BlockBehavior {
    pub block_type: &'static str,
    pub validate: ValidateFn,
    pub run: RunFn,
}

impl fmt::Debug for BlockBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockBehavior").field("block_type", &self.block_type).finish()
    }
}

/// Validador trivial para tipos sin reglas propias.
pub fn no_validation(_: &BlockConfig, _: &ValidationContext<'_>) -> BlockValidation {
    BlockValidation::default()
}

/// Error devuelto por el `run` de un bloque. El runtime lo envuelve en un
/// `BlockRuntimeError` con el tipo y uuid del bloque.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("missing option '{0}'")]
    MissingOption(String),
    #[error("{0}")]
    Failed(String),
}

/// Todo lo que un bloque ve durante `run`. Se pasa por valor al pool de
/// tareas bloqueantes, por eso es dueño de sus datos.
#[derive(Debug, Clone)]
pub struct BlockRunContext {
    pub policy_id: String,
    /// Configuración del bloque sin hijos.
    pub block: BlockConfig,
    /// Nombre de la entrada disparada (`targetInput`).
    pub input: String,
    /// Documento o salida del bloque anterior.
    pub payload: Value,
    /// Estado actual (por defecto en el primer contacto).
    pub state: BlockState,
    pub user: PolicyUser,
    pub dry_run: bool,
}

/// Resultado de `run`: nuevo estado + salida + eventos emitidos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockOutcome {
    pub status: BlockStatus,
    /// Nuevo payload persistido en el `BlockState`.
    pub state: Value,
    /// Payload que viaja a los bloques suscritos.
    pub output: Value,
    pub events: Vec<String>,
    #[serde(default)]
    pub writes: Vec<CollectionWrite>,
}

impl BlockOutcome {
    /// El bloque queda `Active` reenviando `output`.
    pub fn active(state: Value, output: Value) -> Self {
        Self { status: BlockStatus::Active,
               state,
               output,
               events: Vec::new(),
               writes: Vec::new() }
    }

    pub fn with_status(mut self, status: BlockStatus) -> Self {
        self.status = status;
        self
    }

    pub fn emit(mut self, event: &str) -> Self {
        self.events.push(event.to_string());
        self
    }

    pub fn write(mut self, write: CollectionWrite) -> Self {
        self.writes.push(write);
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct BlockRegistry {
    behaviors: HashMap<String, BlockBehavior>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un tipo. Un tag repetido es un error de configuración.
    pub fn register(&mut self, behavior: BlockBehavior) -> Result<(), CoreEngineError> {
        if self.behaviors.contains_key(behavior.block_type) {
            return Err(CoreEngineError::Configuration(format!("block type '{}' registered twice",
                                                              behavior.block_type)));
        }
        self.behaviors.insert(behavior.block_type.to_string(), behavior);
        Ok(())
    }

    pub fn get(&self, block_type: &str) -> Option<&BlockBehavior> {
        self.behaviors.get(block_type)
    }

    pub fn resolve(&self, block_type: &str) -> Result<&BlockBehavior, CoreEngineError> {
        self.get(block_type)
            .ok_or_else(|| CoreEngineError::UnknownBlockType(block_type.to_string()))
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.behaviors.contains_key(block_type)
    }

    /// Tags registrados, ordenados.
    pub fn block_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.behaviors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Rechaza (en carga) el primer bloque cuyo tipo no esté registrado.
    pub fn check_tree(&self, tree: &PolicyTree) -> Result<(), CoreEngineError> {
        match tree.iter().find(|b| !self.contains(&b.block_type)) {
            Some(b) => Err(CoreEngineError::UnknownBlockType(b.block_type.clone())),
            None => Ok(()),
        }
    }
}
