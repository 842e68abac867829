//! Interfaces de almacenamiento consumidas por el runtime y el gestor de
//! savepoints, más sus implementaciones in-memory.
//!
//! Todas son asíncronas: son los únicos puntos de suspensión del intérprete
//! junto con el lock por usuario.
mod memory;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use memory::{InMemoryCollectionStore, InMemorySnapshotStore, InMemoryStateStore};

use crate::diff::CollectionRow;
use crate::errors::StoreError;
use crate::model::{BlockState, BlockStateSavepoint, StateKey};
use crate::savepoint::{CheckpointRecord, DryRunSavepointSnapshot, SavepointInfo};

/// Escritura de una fila del working set. `data = None` borra la fila.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionWrite {
    pub source_id: String,
    pub row_id: String,
    pub data: Option<Value>,
}

impl CollectionWrite {
    pub fn upsert(source_id: &str, row_id: &str, data: Value) -> Self {
        Self { source_id: source_id.to_string(),
               row_id: row_id.to_string(),
               data: Some(data) }
    }

    pub fn delete(source_id: &str, row_id: &str) -> Self {
        Self { source_id: source_id.to_string(),
               row_id: row_id.to_string(),
               data: None }
    }
}

/// Estado por `(policy_id, block_id, user_id)`, atómico por clave.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &StateKey) -> Result<Option<BlockState>, StoreError>;

    /// Compare-and-set: `state.version` debe ser la versión leída (0 si no
    /// existía). Devuelve el estado almacenado con la versión incrementada;
    /// si otro escritor se adelantó devuelve `StoreError::Conflict`.
    /// La versión anterior pasa al historial.
    async fn set(&self, state: BlockState) -> Result<BlockState, StoreError>;

    /// `set` más las escrituras del bloque sobre el working set de
    /// `state.policy_id`: se confirman las dos cosas o ninguna.
    ///
    /// Por defecto aplica las escrituras, hace el compare-and-set y, si éste
    /// falla, repone las filas tocadas tal como estaban. Un backend con
    /// transacciones propias debe sobrescribirlo.
    async fn set_with_writes(&self,
                             state: BlockState,
                             writes: &[CollectionWrite],
                             collections: &dyn CollectionStore)
                             -> Result<BlockState, StoreError> {
        if writes.is_empty() {
            return self.set(state).await;
        }
        let policy_id = state.policy_id.clone();
        let undo = undo_writes(collections, &policy_id, writes).await?;
        collections.apply_writes(&policy_id, writes).await?;
        match self.set(state).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                if let Err(undo_err) = collections.apply_writes(&policy_id, &undo).await {
                    log::error!("{}: could not undo {} collection write(s): {}", policy_id, undo.len(), undo_err);
                    return Err(StoreError::Backend(format!("{e}; undo failed: {undo_err}")));
                }
                Err(e)
            }
        }
    }

    /// Versiones anteriores de una clave, de la más antigua a la más reciente.
    async fn history(&self, key: &StateKey) -> Result<Vec<BlockState>, StoreError>;

    /// Estados actuales de una política ordenados por clave.
    async fn list_policy(&self, policy_id: &str) -> Result<Vec<BlockState>, StoreError>;

    /// Reemplaza en bloque los estados actuales (restore de dry-run).
    async fn replace_policy(&self, policy_id: &str, states: Vec<BlockState>) -> Result<(), StoreError>;

    /// Borra estados e historial; devuelve cuántos estados actuales había.
    async fn delete_policy(&self, policy_id: &str) -> Result<u64, StoreError>;
}

/// Working set de colecciones por política (lo que el diff engine compara).
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Filas de una fuente ordenadas por `row_id`.
    async fn rows(&self, policy_id: &str, source_id: &str) -> Result<Vec<CollectionRow>, StoreError>;

    /// Fuentes con al menos una fila, ordenadas.
    async fn sources(&self, policy_id: &str) -> Result<Vec<String>, StoreError>;

    async fn apply_writes(&self, policy_id: &str, writes: &[CollectionWrite]) -> Result<(), StoreError>;

    /// Sustituye el working set completo de la política de una sola vez:
    /// las fuentes que no aparecen quedan vacías.
    async fn replace_all(&self, policy_id: &str, sources: BTreeMap<String, Vec<CollectionRow>>) -> Result<(), StoreError>;

    async fn clear(&self, policy_id: &str) -> Result<(), StoreError>;
}

/// Escrituras que devuelven las filas tocadas por `writes` a su contenido
/// actual (upsert si existían, borrado si no).
pub async fn undo_writes(collections: &dyn CollectionStore,
                         policy_id: &str,
                         writes: &[CollectionWrite])
                         -> Result<Vec<CollectionWrite>, StoreError> {
    let mut undo = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    for w in writes {
        if !seen.insert((w.source_id.as_str(), w.row_id.as_str())) {
            continue;
        }
        if !current.contains_key(&w.source_id) {
            let rows = collections.rows(policy_id, &w.source_id).await?;
            current.insert(w.source_id.clone(), rows.into_iter().map(|r| (r.row_id, r.data)).collect());
        }
        match current.get(&w.source_id).and_then(|rows| rows.get(&w.row_id)) {
            Some(data) => undo.push(CollectionWrite::upsert(&w.source_id, &w.row_id, data.clone())),
            None => undo.push(CollectionWrite::delete(&w.source_id, &w.row_id)),
        }
    }
    Ok(undo)
}

/// Journal append-only de savepoints de dry-run.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Agrega un checkpoint completo (todos los enlaces + estados) de forma
    /// atómica. `StoreError::Conflict` si el savepoint ya existe.
    async fn append_checkpoint(&self, record: CheckpointRecord) -> Result<(), StoreError>;

    /// Savepoints de la política en orden de `seq`.
    async fn savepoints(&self, policy_id: &str) -> Result<Vec<SavepointInfo>, StoreError>;

    /// Todos los enlaces de la política, ordenados por `(seq, source_id)`.
    async fn links(&self, policy_id: &str) -> Result<Vec<DryRunSavepointSnapshot>, StoreError>;

    async fn block_states(&self, policy_id: &str, savepoint_id: &str) -> Result<Vec<BlockStateSavepoint>, StoreError>;

    /// Quita un savepoint (enlaces + estados). `NotFound` si no existe.
    async fn remove_savepoint(&self, policy_id: &str, savepoint_id: &str) -> Result<(), StoreError>;

    /// Borra todo el journal de la política; devuelve cuántos savepoints había.
    async fn purge(&self, policy_id: &str) -> Result<u64, StoreError>;
}
