use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::CollectionDiff;
use crate::model::BlockStateSavepoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Primer enlace de una fuente: diff contra el conjunto vacío.
    Base,
    Diff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOptions {
    pub kind: LinkKind,
    /// Filas de la fuente tras aplicar este enlace.
    pub row_count: usize,
}

/// Un enlace del journal: diff de una fuente en un savepoint.
/// Único por `(policy_id, savepoint_id, source_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunSavepointSnapshot {
    pub policy_id: String,
    pub savepoint_id: String,
    pub source_id: String,
    pub seq: u64,
    pub options: LinkOptions,
    pub diff: CollectionDiff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavepointInfo {
    pub policy_id: String,
    pub savepoint_id: String,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

/// Todo lo que un checkpoint escribe, en una sola llamada atómica al store.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub info: SavepointInfo,
    pub links: Vec<DryRunSavepointSnapshot>,
    pub states: Vec<BlockStateSavepoint>,
}
