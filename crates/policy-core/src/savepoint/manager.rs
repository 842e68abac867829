//! Gestor de savepoints de dry-run.
//!
//! Cada checkpoint agrega, por fuente rastreada, un enlace con el diff contra
//! la cabeza de la cadena (el estado tras el último enlace). El restore
//! reproduce la cadena desde la base verificando cada hash antes de tocar
//! nada; el rollback invierte el último enlace y lo quita del journal.
//!
//! Concurrencia:
//! - checkpoints serializados por `(policy_id, source_id)` (mutex por fuente,
//!   adquiridos en orden para no bloquearse entre sí);
//! - un `RwLock` por política: checkpoints toman lectura, y restore /
//!   rollback / discard toman escritura, así que esperan a que terminen los
//!   checkpoints en vuelo.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::{CheckpointRecord, DryRunSavepointSnapshot, LinkKind, LinkOptions, SavepointInfo};
use crate::diff::{apply_diff, diff_collections, invert_diff, verify_diff, CollectionDiff, CollectionRow};
use crate::errors::{CoreEngineError, StoreError};
use crate::event::{AuditEventKind, AuditStore};
use crate::model::BlockStateSavepoint;
use crate::store::{CollectionStore, SnapshotStore, StateStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub savepoint_id: String,
    pub seq: u64,
    /// `(source_id, acciones del diff)`.
    pub changes: Vec<(String, usize)>,
    pub block_states: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub savepoint_id: String,
    /// `(source_id, filas restauradas)`.
    pub sources: Vec<(String, usize)>,
    pub block_states: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackSummary {
    pub removed: String,
    /// Savepoint vigente tras el rollback (`None` si la cadena quedó vacía).
    pub current: Option<String>,
}

type SourceKey = (String, String);

pub struct SavepointManager {
    snapshots: Arc<dyn SnapshotStore>,
    collections: Arc<dyn CollectionStore>,
    states: Arc<dyn StateStore>,
    audit: Option<Arc<dyn AuditStore>>,
    policy_locks: DashMap<String, Arc<RwLock<()>>>,
    commit_locks: DashMap<String, Arc<Mutex<()>>>,
    source_locks: DashMap<SourceKey, Arc<Mutex<()>>>,
    /// Cabeza de cada cadena (estado tras el último enlace).
    heads: DashMap<SourceKey, Vec<CollectionRow>>,
}

impl SavepointManager {
    pub fn new(snapshots: Arc<dyn SnapshotStore>, collections: Arc<dyn CollectionStore>, states: Arc<dyn StateStore>) -> Self {
        Self { snapshots,
               collections,
               states,
               audit: None,
               policy_locks: DashMap::new(),
               commit_locks: DashMap::new(),
               source_locks: DashMap::new(),
               heads: DashMap::new() }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn policy_lock(&self, policy_id: &str) -> Arc<RwLock<()>> {
        self.policy_locks.entry(policy_id.to_string()).or_default().clone()
    }

    fn commit_lock(&self, policy_id: &str) -> Arc<Mutex<()>> {
        self.commit_locks.entry(policy_id.to_string()).or_default().clone()
    }

    fn source_lock(&self, policy_id: &str, source_id: &str) -> Arc<Mutex<()>> {
        self.source_locks
            .entry((policy_id.to_string(), source_id.to_string()))
            .or_default()
            .clone()
    }

    fn audit(&self, policy_id: &str, kind: AuditEventKind) {
        if let Some(audit) = &self.audit {
            audit.append_kind(policy_id, kind);
        }
    }

    pub async fn savepoints(&self, policy_id: &str) -> Result<Vec<SavepointInfo>, CoreEngineError> {
        Ok(self.snapshots.savepoints(policy_id).await?)
    }

    /// Crea el savepoint `savepoint_id`. Repetir un id es un error.
    pub async fn checkpoint(&self, policy_id: &str, savepoint_id: &str) -> Result<CheckpointSummary, CoreEngineError> {
        let policy_lock = self.policy_lock(policy_id);
        let _read = policy_lock.read().await;
        if self.exists(policy_id, savepoint_id).await? {
            return Err(CoreEngineError::SavepointExists(savepoint_id.to_string()));
        }

        let mut tracked: BTreeSet<String> = self.snapshots
                                                .links(policy_id)
                                                .await?
                                                .into_iter()
                                                .map(|l| l.source_id)
                                                .collect();
        tracked.extend(self.collections.sources(policy_id).await?);

        // BTreeSet => orden estable de adquisición
        let mut guards = Vec::with_capacity(tracked.len());
        for source in &tracked {
            guards.push(self.source_lock(policy_id, source).lock_owned().await);
        }

        let links = self.snapshots.links(policy_id).await?;
        let mut inputs = Vec::with_capacity(tracked.len());
        for source in &tracked {
            let head = self.head(policy_id, source, &links)?;
            let current = self.collections.rows(policy_id, source).await?;
            let is_base = !links.iter().any(|l| &l.source_id == source);
            inputs.push((source.clone(), head, current, is_base));
        }
        // Los diffs por fuente son independientes: se calculan en paralelo.
        let computed: Vec<(String, CollectionDiff, Vec<CollectionRow>, bool)> =
            inputs.into_par_iter()
                  .map(|(source, head, current, is_base)| {
                      let diff = diff_collections(&head, &current);
                      (source, diff, current, is_base)
                  })
                  .collect();

        let states: Vec<BlockStateSavepoint> = self.states
                                                   .list_policy(policy_id)
                                                   .await?
                                                   .into_iter()
                                                   .map(|state| BlockStateSavepoint { policy_id: policy_id.to_string(),
                                                                                      savepoint_id: savepoint_id.to_string(),
                                                                                      state })
                                                   .collect();

        let commit_lock = self.commit_lock(policy_id);
        let _commit = commit_lock.lock().await;
        let existing = self.snapshots.savepoints(policy_id).await?;
        if existing.iter().any(|s| s.savepoint_id == savepoint_id) {
            return Err(CoreEngineError::SavepointExists(savepoint_id.to_string()));
        }
        let seq = existing.last().map(|s| s.seq + 1).unwrap_or(0);
        let links: Vec<DryRunSavepointSnapshot> =
            computed.iter()
                    .map(|(source, diff, current, is_base)| DryRunSavepointSnapshot { policy_id: policy_id.to_string(),
                                                                                       savepoint_id: savepoint_id.to_string(),
                                                                                       source_id: source.clone(),
                                                                                       seq,
                                                                                       options: LinkOptions { kind: if *is_base { LinkKind::Base } else { LinkKind::Diff },
                                                                                                              row_count: current.len() },
                                                                                       diff: diff.clone() })
                    .collect();
        let summary = CheckpointSummary { savepoint_id: savepoint_id.to_string(),
                                          seq,
                                          changes: computed.iter().map(|(s, d, _, _)| (s.clone(), d.len())).collect(),
                                          block_states: states.len() };
        let record = CheckpointRecord { info: SavepointInfo { policy_id: policy_id.to_string(),
                                                              savepoint_id: savepoint_id.to_string(),
                                                              seq,
                                                              created_at: Utc::now() },
                                        links,
                                        states };
        self.snapshots.append_checkpoint(record).await.map_err(|e| match e {
                                                          StoreError::Conflict(_) => CoreEngineError::SavepointExists(savepoint_id.to_string()),
                                                          other => other.into(),
                                                      })?;
        for (source, _, current, _) in computed {
            self.heads.insert((policy_id.to_string(), source), current);
        }
        drop(guards);

        log::info!("{}: checkpoint {} (seq {}) over {} source(s)", policy_id, savepoint_id, seq, summary.changes.len());
        self.audit(policy_id,
                   AuditEventKind::CheckpointCreated { savepoint_id: savepoint_id.to_string(),
                                                       seq,
                                                       sources: summary.changes.iter().map(|(s, _)| s.clone()).collect() });
        Ok(summary)
    }

    /// Reproduce la cadena hasta `savepoint_id` (inclusive) y reemplaza el
    /// working set y los estados de bloque. Si algún hash no coincide no se
    /// toca nada. El working set se sustituye en una sola llamada; repetir el
    /// restore tras un fallo a medias converge al mismo resultado.
    pub async fn restore(&self, policy_id: &str, savepoint_id: &str) -> Result<RestoreSummary, CoreEngineError> {
        let policy_lock = self.policy_lock(policy_id);
        let _write = policy_lock.write().await;

        let savepoints = self.snapshots.savepoints(policy_id).await?;
        let target = savepoints.iter()
                               .find(|s| s.savepoint_id == savepoint_id)
                               .ok_or_else(|| CoreEngineError::SavepointNotFound(savepoint_id.to_string()))?;
        let seqs: Vec<u64> = savepoints.iter().map(|s| s.seq).filter(|s| *s <= target.seq).collect();
        let links: Vec<DryRunSavepointSnapshot> = self.snapshots
                                                      .links(policy_id)
                                                      .await?
                                                      .into_iter()
                                                      .filter(|l| l.seq <= target.seq)
                                                      .collect();
        let chains = group_by_source(links);
        for (source, chain) in &chains {
            check_chain(policy_id, source, chain, &seqs)?;
        }
        let mut restored = BTreeMap::new();
        for (source, chain) in &chains {
            restored.insert(source.clone(), replay_chain(policy_id, source, chain)?);
        }
        let states: Vec<_> = self.snapshots
                                 .block_states(policy_id, savepoint_id)
                                 .await?
                                 .into_iter()
                                 .map(|s| s.state)
                                 .collect();

        let summary = RestoreSummary { savepoint_id: savepoint_id.to_string(),
                                       sources: restored.iter().map(|(s, rows)| (s.clone(), rows.len())).collect(),
                                       block_states: states.len() };
        self.collections.replace_all(policy_id, restored).await?;
        self.states.replace_policy(policy_id, states).await?;

        log::info!("{}: restored savepoint {}", policy_id, savepoint_id);
        self.audit(policy_id, AuditEventKind::Restored { savepoint_id: savepoint_id.to_string() });
        Ok(summary)
    }

    /// Deshace el último savepoint: invierte su enlace en cada fuente, deja
    /// working set y estados como en el savepoint anterior y, al final, lo
    /// quita del journal. Si algo falla antes, el journal sigue intacto y el
    /// rollback se puede repetir.
    pub async fn rollback_one(&self, policy_id: &str) -> Result<RollbackSummary, CoreEngineError> {
        let policy_lock = self.policy_lock(policy_id);
        let _write = policy_lock.write().await;

        let savepoints = self.snapshots.savepoints(policy_id).await?;
        let last = savepoints.last().ok_or(CoreEngineError::NoSavepoints)?;
        let previous = savepoints.len().checked_sub(2).map(|i| savepoints[i].clone());
        let seqs: Vec<u64> = savepoints.iter().map(|s| s.seq).collect();

        let links = self.snapshots.links(policy_id).await?;
        let mut reverted = BTreeMap::new();
        for (source, chain) in &group_by_source(links.clone()) {
            check_chain(policy_id, source, chain, &seqs)?;
            let head = self.head(policy_id, source, &links)?;
            // `check_chain` garantiza que el último enlace es el de `last`.
            let rows = match chain.last() {
                Some(link) if link.seq == last.seq => {
                    apply_diff(source, &head, &invert_diff(&link.diff)).map_err(|e| integrity(policy_id, &link.savepoint_id, source, e))?
                }
                _ => head,
            };
            reverted.insert(source.clone(), rows);
        }
        let states: Vec<_> = match &previous {
            Some(p) => self.snapshots
                           .block_states(policy_id, &p.savepoint_id)
                           .await?
                           .into_iter()
                           .map(|s| s.state)
                           .collect(),
            None => Vec::new(),
        };

        self.collections.replace_all(policy_id, reverted.clone()).await?;
        self.states.replace_policy(policy_id, states).await?;
        self.snapshots.remove_savepoint(policy_id, &last.savepoint_id).await?;
        for (source, rows) in reverted {
            self.heads.insert((policy_id.to_string(), source), rows);
        }

        let summary = RollbackSummary { removed: last.savepoint_id.clone(),
                                        current: previous.map(|p| p.savepoint_id) };
        log::info!("{}: rolled back savepoint {} (current: {:?})", policy_id, summary.removed, summary.current);
        self.audit(policy_id, AuditEventKind::RolledBack { savepoint_id: summary.removed.clone() });
        Ok(summary)
    }

    /// Purga el journal (enlaces + estados capturados) sin tocar el estado
    /// vivo. Espera a que terminen los checkpoints en vuelo.
    pub async fn discard(&self, policy_id: &str) -> Result<u64, CoreEngineError> {
        let policy_lock = self.policy_lock(policy_id);
        let _write = policy_lock.write().await;
        let purged = self.snapshots.purge(policy_id).await?;
        self.heads.retain(|(p, _), _| p != policy_id);
        self.source_locks.retain(|(p, _), _| p != policy_id);
        log::info!("{}: discarded {} savepoint(s)", policy_id, purged);
        self.audit(policy_id, AuditEventKind::Discarded { savepoints: purged });
        Ok(purged)
    }

    async fn exists(&self, policy_id: &str, savepoint_id: &str) -> Result<bool, CoreEngineError> {
        Ok(self.snapshots
               .savepoints(policy_id)
               .await?
               .iter()
               .any(|s| s.savepoint_id == savepoint_id))
    }

    /// Cabeza de la cadena: cacheada, o reconstruida reproduciendo todos los
    /// enlaces de la fuente.
    fn head(&self, policy_id: &str, source_id: &str, links: &[DryRunSavepointSnapshot]) -> Result<Vec<CollectionRow>, CoreEngineError> {
        let key = (policy_id.to_string(), source_id.to_string());
        if let Some(rows) = self.heads.get(&key) {
            return Ok(rows.clone());
        }
        let chain: Vec<DryRunSavepointSnapshot> = links.iter().filter(|l| l.source_id == source_id).cloned().collect();
        let rows = replay_chain(policy_id, source_id, &chain)?;
        self.heads.insert(key, rows.clone());
        Ok(rows)
    }
}

fn integrity(policy_id: &str, savepoint_id: &str, source_id: &str, cause: impl std::fmt::Display) -> CoreEngineError {
    CoreEngineError::Integrity(format!("{policy_id}/{savepoint_id}/{source_id}: {cause}"))
}

fn group_by_source(links: Vec<DryRunSavepointSnapshot>) -> BTreeMap<String, Vec<DryRunSavepointSnapshot>> {
    let mut chains: BTreeMap<String, Vec<DryRunSavepointSnapshot>> = BTreeMap::new();
    for link in links {
        chains.entry(link.source_id.clone()).or_default().push(link);
    }
    for chain in chains.values_mut() {
        chain.sort_by_key(|l| l.seq);
    }
    chains
}

/// Verifica hashes y forma de la cadena: empieza con un enlace base y tiene
/// un enlace por cada savepoint desde ese punto.
fn check_chain(policy_id: &str, source_id: &str, chain: &[DryRunSavepointSnapshot], seqs: &[u64]) -> Result<(), CoreEngineError> {
    let Some(first) = chain.first() else { return Ok(()) };
    if first.options.kind != LinkKind::Base {
        return Err(integrity(policy_id, &first.savepoint_id, source_id, "chain does not start with a base link"));
    }
    let expected: Vec<u64> = seqs.iter().copied().filter(|s| *s >= first.seq).collect();
    let found: Vec<u64> = chain.iter().map(|l| l.seq).collect();
    if expected != found {
        return Err(integrity(policy_id,
                             &first.savepoint_id,
                             source_id,
                             format!("missing link (expected seqs {expected:?}, found {found:?})")));
    }
    for link in chain {
        verify_diff(&link.diff).map_err(|e| integrity(policy_id, &link.savepoint_id, source_id, e))?;
    }
    Ok(())
}

fn replay_chain(policy_id: &str, source_id: &str, chain: &[DryRunSavepointSnapshot]) -> Result<Vec<CollectionRow>, CoreEngineError> {
    let mut rows = Vec::new();
    for link in chain {
        verify_diff(&link.diff).map_err(|e| integrity(policy_id, &link.savepoint_id, source_id, e))?;
        rows = apply_diff(source_id, &rows, &link.diff).map_err(|e| integrity(policy_id, &link.savepoint_id, source_id, e))?;
    }
    Ok(rows)
}
