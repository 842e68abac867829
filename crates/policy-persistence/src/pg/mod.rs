//! Implementaciones Postgres (Diesel) de los stores del core.
//!
//! - Paridad 1:1 con los backends en memoria: mismos órdenes de lectura,
//!   mismos errores (`Conflict` en compare-and-set fallido o savepoint
//!   duplicado, `NotFound` al quitar un savepoint inexistente).
//! - Diesel es síncrono: cada operación corre en `spawn_blocking` para no
//!   bloquear el runtime de tokio, y dentro de `with_retry` ante errores
//!   transitorios.
//! - Estados, opciones y diffs se guardan como JSONB completo; las columnas
//!   sueltas (`status`, `version`, `seq`) sólo sirven para filtrar y ordenar.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::upsert::excluded;
use log::{debug, warn};
use serde_json::Value;

use policy_core::model::{BlockState, BlockStateSavepoint, BlockStatus, StateKey};
use policy_core::savepoint::{CheckpointRecord, DryRunSavepointSnapshot, SavepointInfo};
use policy_core::{CollectionRow, CollectionStore, CollectionWrite, SnapshotStore, StateStore, StoreError};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{block_state_history, block_state_savepoints, block_states, collection_rows, dry_run_savepoints, dry_run_snapshots};

/// Pool r2d2 de conexiones Postgres. Al construirlo se corren las
/// migraciones pendientes.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real o envolverlo en tests. Debe devolver una
/// conexión válida o `PersistenceError::TransientIo`.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// `ConnectionProvider` respaldado por un `PgPool`.
#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl PoolProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Usuario almacenado para el estado compartido.
const SHARED_USER: &str = "";

fn user_column(user_id: &Option<String>) -> &str {
    user_id.as_deref().unwrap_or(SHARED_USER)
}

fn status_column(status: &BlockStatus) -> String {
    match status {
        BlockStatus::Inactive => "inactive".into(),
        BlockStatus::Active => "active".into(),
        BlockStatus::WaitingForInput => "waitingForInput".into(),
        BlockStatus::Terminal(name) => format!("terminal:{name}"),
    }
}

pub(crate) fn is_retryable(e: &PersistenceError) -> bool {
    matches!(e, PersistenceError::SerializationConflict | PersistenceError::TransientIo(_))
}

/// Retry con backoff corto (hasta 3 reintentos: 15ms, 30ms, 45ms).
///
/// Sólo repite la unidad de trabajo de `f`; cada intento abre su propia
/// transacción, así que un intento fallido no deja escrituras a medias.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Corre `f` (con retry) en el pool bloqueante de tokio.
async fn blocking<P, F, T>(provider: &Arc<P>, mut f: F) -> Result<T, StoreError>
    where P: ConnectionProvider,
          F: FnMut(&mut PgConnection) -> Result<T, PersistenceError> + Send + 'static,
          T: Send + 'static
{
    let provider = Arc::clone(provider);
    tokio::task::spawn_blocking(move || {
        with_retry(|| {
            let mut conn = provider.connection()?;
            f(&mut *conn)
        })
    }).await
      .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
      .map_err(StoreError::from)
}

fn decode_state(value: Value) -> Result<BlockState, PersistenceError> {
    Ok(serde_json::from_value(value)?)
}

#[derive(Insertable, Debug)]
#[diesel(table_name = block_states)]
struct NewStateRow<'a> {
    policy_id: &'a str,
    block_id: &'a str,
    user_id: &'a str,
    status: String,
    version: i64,
    state: Value,
    updated_at: DateTime<Utc>,
}

impl<'a> NewStateRow<'a> {
    fn from_state(state: &'a BlockState) -> Result<Self, PersistenceError> {
        Ok(Self { policy_id: &state.policy_id,
                  block_id: &state.block_id,
                  user_id: user_column(&state.user_id),
                  status: status_column(&state.status),
                  version: state.version as i64,
                  state: serde_json::to_value(state)?,
                  updated_at: state.updated_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = block_state_history)]
struct NewHistoryRow<'a> {
    policy_id: &'a str,
    block_id: &'a str,
    user_id: &'a str,
    version: i64,
    state: &'a Value,
}

/// `StateStore` sobre Postgres.
///
/// `set` es un compare-and-set dentro de una transacción: la fila actual se
/// bloquea con `FOR UPDATE`, se compara la versión y la anterior pasa a
/// `block_state_history`. Dos inserciones concurrentes de la misma clave
/// chocan en la PK y la perdedora recibe `Conflict`.
pub struct PgStateStore<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> PgStateStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }
}

#[async_trait]
impl<P: ConnectionProvider> StateStore for PgStateStore<P> {
    async fn get(&self, key: &StateKey) -> Result<Option<BlockState>, StoreError> {
        let key = key.clone();
        blocking(&self.provider, move |conn| {
            let row: Option<Value> = block_states::table.filter(block_states::policy_id.eq(&key.policy_id))
                                                        .filter(block_states::block_id.eq(&key.block_id))
                                                        .filter(block_states::user_id.eq(user_column(&key.user_id)))
                                                        .select(block_states::state)
                                                        .first(conn)
                                                        .optional()?;
            row.map(decode_state).transpose()
        }).await
    }

    async fn set(&self, state: BlockState) -> Result<BlockState, StoreError> {
        blocking(&self.provider, move |conn| conn.transaction::<BlockState, PersistenceError, _>(|tx| compare_and_set(tx, &state))).await
    }

    /// Estado y filas en la misma transacción. Las filas van a
    /// `collection_rows` de esta misma base: `collections` debe ser un
    /// `PgCollectionStore` sobre el mismo pool (así lo arma `Stores`).
    async fn set_with_writes(&self,
                             state: BlockState,
                             writes: &[CollectionWrite],
                             _collections: &dyn CollectionStore)
                             -> Result<BlockState, StoreError> {
        let writes = writes.to_vec();
        blocking(&self.provider, move |conn| {
            conn.transaction::<BlockState, PersistenceError, _>(|tx| {
                    write_rows(tx, &state.policy_id, &writes)?;
                    compare_and_set(tx, &state)
                })
        }).await
    }

    async fn history(&self, key: &StateKey) -> Result<Vec<BlockState>, StoreError> {
        let key = key.clone();
        blocking(&self.provider, move |conn| {
            let rows: Vec<Value> = block_state_history::table.filter(block_state_history::policy_id.eq(&key.policy_id))
                                                             .filter(block_state_history::block_id.eq(&key.block_id))
                                                             .filter(block_state_history::user_id.eq(user_column(&key.user_id)))
                                                             .order(block_state_history::version.asc())
                                                             .select(block_state_history::state)
                                                             .load(conn)?;
            rows.into_iter().map(decode_state).collect()
        }).await
    }

    async fn list_policy(&self, policy_id: &str) -> Result<Vec<BlockState>, StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            let rows: Vec<Value> = block_states::table.filter(block_states::policy_id.eq(&policy_id))
                                                      .select(block_states::state)
                                                      .load(conn)?;
            let mut states = rows.into_iter().map(decode_state).collect::<Result<Vec<_>, _>>()?;
            states.sort_by_key(|s| s.key());
            Ok(states)
        }).await
    }

    async fn replace_policy(&self, policy_id: &str, states: Vec<BlockState>) -> Result<(), StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            let rows = states.iter().map(NewStateRow::from_state).collect::<Result<Vec<_>, _>>()?;
            conn.transaction::<(), PersistenceError, _>(|tx| {
                    diesel::delete(block_states::table.filter(block_states::policy_id.eq(&policy_id))).execute(tx)?;
                    if !rows.is_empty() {
                        diesel::insert_into(block_states::table).values(&rows).execute(tx)?;
                    }
                    Ok(())
                })?;
            debug!("state:replace_policy policy_id={policy_id} count={}", rows.len());
            Ok(())
        }).await
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<u64, StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            conn.transaction::<u64, PersistenceError, _>(|tx| {
                    diesel::delete(block_state_history::table.filter(block_state_history::policy_id.eq(&policy_id))).execute(tx)?;
                    let removed = diesel::delete(block_states::table.filter(block_states::policy_id.eq(&policy_id))).execute(tx)?;
                    Ok(removed as u64)
                })
        }).await
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = collection_rows)]
struct NewCollectionRow<'a> {
    policy_id: &'a str,
    source_id: &'a str,
    row_id: &'a str,
    data: &'a Value,
    content_hash: &'a str,
}

impl<'a> NewCollectionRow<'a> {
    fn from_row(policy_id: &'a str, source_id: &'a str, row: &'a CollectionRow) -> Self {
        Self { policy_id,
               source_id,
               row_id: &row.row_id,
               data: &row.data,
               content_hash: &row.content_hash }
    }
}

/// Compare-and-set de un estado dentro de la transacción `tx`: la fila
/// actual se bloquea con `FOR UPDATE` y la versión anterior pasa al historial.
fn compare_and_set(tx: &mut PgConnection, state: &BlockState) -> Result<BlockState, PersistenceError> {
    let key = state.key();
    let user = user_column(&key.user_id);
    let current: Option<(i64, Value)> = block_states::table.filter(block_states::policy_id.eq(&key.policy_id))
                                                           .filter(block_states::block_id.eq(&key.block_id))
                                                           .filter(block_states::user_id.eq(user))
                                                           .select((block_states::version, block_states::state))
                                                           .for_update()
                                                           .first(tx)
                                                           .optional()?;
    let expected = state.version as i64;
    let mut next = state.clone();
    next.version += 1;
    next.updated_at = Utc::now();
    let row = NewStateRow::from_state(&next)?;
    match current {
        None if expected == 0 => {
            diesel::insert_into(block_states::table).values(&row).execute(tx)?;
        }
        None => {
            return Err(PersistenceError::VersionConflict(format!("{key}: expected version {expected}, found none")));
        }
        Some((found, _)) if found != expected => {
            return Err(PersistenceError::VersionConflict(format!("{key}: expected version {expected}, found {found}")));
        }
        Some((found, previous)) => {
            diesel::insert_into(block_state_history::table).values(NewHistoryRow { policy_id: &key.policy_id,
                                                                                   block_id: &key.block_id,
                                                                                   user_id: user,
                                                                                   version: found,
                                                                                   state: &previous })
                                                           .execute(tx)?;
            diesel::update(block_states::table.filter(block_states::policy_id.eq(&key.policy_id))
                                              .filter(block_states::block_id.eq(&key.block_id))
                                              .filter(block_states::user_id.eq(user)))
                .set((block_states::status.eq(&row.status),
                      block_states::version.eq(row.version),
                      block_states::state.eq(&row.state),
                      block_states::updated_at.eq(row.updated_at)))
                .execute(tx)?;
        }
    }
    debug!("state:set key={key} version={}", next.version);
    Ok(next)
}

/// Upserts y borrados del working set sobre la conexión `tx`.
fn write_rows(tx: &mut PgConnection, policy_id: &str, writes: &[CollectionWrite]) -> Result<(), PersistenceError> {
    for w in writes {
        match &w.data {
            Some(data) => {
                let row = CollectionRow::new(&w.source_id, &w.row_id, data.clone());
                diesel::insert_into(collection_rows::table)
                    .values(NewCollectionRow::from_row(policy_id, &w.source_id, &row))
                    .on_conflict((collection_rows::policy_id, collection_rows::source_id, collection_rows::row_id))
                    .do_update()
                    .set((collection_rows::data.eq(excluded(collection_rows::data)),
                          collection_rows::content_hash.eq(excluded(collection_rows::content_hash))))
                    .execute(tx)?;
            }
            None => {
                diesel::delete(collection_rows::table.filter(collection_rows::policy_id.eq(policy_id))
                                                     .filter(collection_rows::source_id.eq(&w.source_id))
                                                     .filter(collection_rows::row_id.eq(&w.row_id)))
                    .execute(tx)?;
            }
        }
    }
    Ok(())
}

/// Working set de colecciones sobre Postgres.
pub struct PgCollectionStore<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> PgCollectionStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }
}

#[async_trait]
impl<P: ConnectionProvider> CollectionStore for PgCollectionStore<P> {
    async fn rows(&self, policy_id: &str, source_id: &str) -> Result<Vec<CollectionRow>, StoreError> {
        let (policy_id, source_id) = (policy_id.to_string(), source_id.to_string());
        blocking(&self.provider, move |conn| {
            let rows: Vec<(String, Value, String)> =
                collection_rows::table.filter(collection_rows::policy_id.eq(&policy_id))
                                      .filter(collection_rows::source_id.eq(&source_id))
                                      .order(collection_rows::row_id.asc())
                                      .select((collection_rows::row_id, collection_rows::data, collection_rows::content_hash))
                                      .load(conn)?;
            let mut rows: Vec<CollectionRow> = rows.into_iter()
                                                   .map(|(row_id, data, content_hash)| CollectionRow { row_id,
                                                                                                       collection_name: source_id.clone(),
                                                                                                       data,
                                                                                                       content_hash })
                                                   .collect();
            rows.sort_by(|a, b| a.row_id.cmp(&b.row_id));
            Ok(rows)
        }).await
    }

    async fn sources(&self, policy_id: &str) -> Result<Vec<String>, StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            let mut sources: Vec<String> = collection_rows::table.filter(collection_rows::policy_id.eq(&policy_id))
                                                                 .select(collection_rows::source_id)
                                                                 .distinct()
                                                                 .load(conn)?;
            sources.sort();
            Ok(sources)
        }).await
    }

    async fn apply_writes(&self, policy_id: &str, writes: &[CollectionWrite]) -> Result<(), StoreError> {
        let policy_id = policy_id.to_string();
        let writes = writes.to_vec();
        blocking(&self.provider, move |conn| conn.transaction::<(), PersistenceError, _>(|tx| write_rows(tx, &policy_id, &writes))).await
    }

    async fn replace_all(&self, policy_id: &str, sources: BTreeMap<String, Vec<CollectionRow>>) -> Result<(), StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            let pid = policy_id.as_str();
            let new_rows: Vec<NewCollectionRow<'_>> =
                sources.iter()
                       .flat_map(|(source, rows)| rows.iter().map(move |r| NewCollectionRow::from_row(pid, source, r)))
                       .collect();
            conn.transaction::<(), PersistenceError, _>(|tx| {
                    diesel::delete(collection_rows::table.filter(collection_rows::policy_id.eq(&policy_id))).execute(tx)?;
                    if !new_rows.is_empty() {
                        diesel::insert_into(collection_rows::table).values(&new_rows).execute(tx)?;
                    }
                    Ok(())
                })?;
            debug!("collections:replace_all policy_id={policy_id} sources={} rows={}", sources.len(), new_rows.len());
            Ok(())
        }).await
    }

    async fn clear(&self, policy_id: &str) -> Result<(), StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            diesel::delete(collection_rows::table.filter(collection_rows::policy_id.eq(&policy_id))).execute(conn)?;
            Ok(())
        }).await
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = dry_run_savepoints)]
struct NewSavepointRow<'a> {
    policy_id: &'a str,
    savepoint_id: &'a str,
    seq: i64,
    created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = dry_run_snapshots)]
struct NewSnapshotRow<'a> {
    policy_id: &'a str,
    savepoint_id: &'a str,
    source_id: &'a str,
    seq: i64,
    options: Value,
    diff: Value,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = block_state_savepoints)]
struct NewStateSavepointRow<'a> {
    policy_id: &'a str,
    savepoint_id: &'a str,
    block_id: &'a str,
    user_id: &'a str,
    state: Value,
}

#[derive(Queryable, Debug)]
struct SavepointRow {
    policy_id: String,
    savepoint_id: String,
    seq: i64,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct SnapshotRow {
    policy_id: String,
    savepoint_id: String,
    source_id: String,
    seq: i64,
    options: Value,
    diff: Value,
}

impl SnapshotRow {
    fn decode(self) -> Result<DryRunSavepointSnapshot, PersistenceError> {
        Ok(DryRunSavepointSnapshot { policy_id: self.policy_id,
                                     savepoint_id: self.savepoint_id,
                                     source_id: self.source_id,
                                     seq: self.seq as u64,
                                     options: serde_json::from_value(self.options)?,
                                     diff: serde_json::from_value(self.diff)?, })
    }
}

/// Journal de savepoints sobre Postgres.
///
/// Un checkpoint (savepoint + enlaces + estados) se inserta en una sola
/// transacción; la unicidad de `(policy_id, seq)` y de la PK hacen que un
/// savepoint duplicado falle con `Conflict` sin dejar nada escrito.
/// Quitar un savepoint borra sus enlaces y estados por `ON DELETE CASCADE`.
pub struct PgSnapshotStore<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> PgSnapshotStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }
}

#[async_trait]
impl<P: ConnectionProvider> SnapshotStore for PgSnapshotStore<P> {
    async fn append_checkpoint(&self, record: CheckpointRecord) -> Result<(), StoreError> {
        blocking(&self.provider, move |conn| {
            let info = &record.info;
            let links = record.links
                              .iter()
                              .map(|l| {
                                  Ok(NewSnapshotRow { policy_id: &l.policy_id,
                                                      savepoint_id: &l.savepoint_id,
                                                      source_id: &l.source_id,
                                                      seq: l.seq as i64,
                                                      options: serde_json::to_value(&l.options)?,
                                                      diff: serde_json::to_value(&l.diff)? })
                              })
                              .collect::<Result<Vec<_>, PersistenceError>>()?;
            let states = record.states
                               .iter()
                               .map(|s| {
                                   Ok(NewStateSavepointRow { policy_id: &s.policy_id,
                                                             savepoint_id: &s.savepoint_id,
                                                             block_id: &s.state.block_id,
                                                             user_id: user_column(&s.state.user_id),
                                                             state: serde_json::to_value(&s.state)? })
                               })
                               .collect::<Result<Vec<_>, PersistenceError>>()?;
            conn.transaction::<(), PersistenceError, _>(|tx| {
                    diesel::insert_into(dry_run_savepoints::table).values(NewSavepointRow { policy_id: &info.policy_id,
                                                                                            savepoint_id: &info.savepoint_id,
                                                                                            seq: info.seq as i64,
                                                                                            created_at: info.created_at })
                                                                  .execute(tx)?;
                    if !links.is_empty() {
                        diesel::insert_into(dry_run_snapshots::table).values(&links).execute(tx)?;
                    }
                    if !states.is_empty() {
                        diesel::insert_into(block_state_savepoints::table).values(&states).execute(tx)?;
                    }
                    Ok(())
                })
                .map_err(|e| match e {
                    PersistenceError::UniqueViolation(_) => {
                        PersistenceError::VersionConflict(format!("savepoint {} already exists", info.savepoint_id))
                    }
                    other => other,
                })?;
            debug!("snapshot:append policy_id={} savepoint={} seq={} links={} states={}",
                   info.policy_id,
                   info.savepoint_id,
                   info.seq,
                   links.len(),
                   states.len());
            Ok(())
        }).await
    }

    async fn savepoints(&self, policy_id: &str) -> Result<Vec<SavepointInfo>, StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            let rows: Vec<SavepointRow> = dry_run_savepoints::table.filter(dry_run_savepoints::policy_id.eq(&policy_id))
                                                                   .order(dry_run_savepoints::seq.asc())
                                                                   .load(conn)?;
            Ok(rows.into_iter()
                   .map(|r| SavepointInfo { policy_id: r.policy_id,
                                            savepoint_id: r.savepoint_id,
                                            seq: r.seq as u64,
                                            created_at: r.created_at })
                   .collect())
        }).await
    }

    async fn links(&self, policy_id: &str) -> Result<Vec<DryRunSavepointSnapshot>, StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            let rows: Vec<SnapshotRow> = dry_run_snapshots::table.filter(dry_run_snapshots::policy_id.eq(&policy_id))
                                                                 .order((dry_run_snapshots::seq.asc(), dry_run_snapshots::source_id.asc()))
                                                                 .load(conn)?;
            let mut links = rows.into_iter().map(SnapshotRow::decode).collect::<Result<Vec<_>, _>>()?;
            links.sort_by(|a, b| (a.seq, &a.source_id).cmp(&(b.seq, &b.source_id)));
            Ok(links)
        }).await
    }

    async fn block_states(&self, policy_id: &str, savepoint_id: &str) -> Result<Vec<BlockStateSavepoint>, StoreError> {
        let (policy_id, savepoint_id) = (policy_id.to_string(), savepoint_id.to_string());
        blocking(&self.provider, move |conn| {
            let rows: Vec<Value> = block_state_savepoints::table.filter(block_state_savepoints::policy_id.eq(&policy_id))
                                                                .filter(block_state_savepoints::savepoint_id.eq(&savepoint_id))
                                                                .order((block_state_savepoints::block_id.asc(),
                                                                        block_state_savepoints::user_id.asc()))
                                                                .select(block_state_savepoints::state)
                                                                .load(conn)?;
            rows.into_iter()
                .map(|v| {
                    Ok(BlockStateSavepoint { policy_id: policy_id.clone(),
                                             savepoint_id: savepoint_id.clone(),
                                             state: decode_state(v)? })
                })
                .collect()
        }).await
    }

    async fn remove_savepoint(&self, policy_id: &str, savepoint_id: &str) -> Result<(), StoreError> {
        let (policy, savepoint) = (policy_id.to_string(), savepoint_id.to_string());
        blocking(&self.provider, move |conn| {
            let removed = diesel::delete(dry_run_savepoints::table.filter(dry_run_savepoints::policy_id.eq(&policy))
                                                                  .filter(dry_run_savepoints::savepoint_id.eq(&savepoint)))
                .execute(conn)?;
            if removed == 0 {
                return Err(PersistenceError::NotFound);
            }
            Ok(())
        }).await
          .map_err(|e| match e {
              StoreError::NotFound(_) => StoreError::NotFound(format!("savepoint {savepoint_id}")),
              other => other,
          })
    }

    async fn purge(&self, policy_id: &str) -> Result<u64, StoreError> {
        let policy_id = policy_id.to_string();
        blocking(&self.provider, move |conn| {
            let removed = diesel::delete(dry_run_savepoints::table.filter(dry_run_savepoints::policy_id.eq(&policy_id))).execute(conn)?;
            Ok(removed as u64)
        }).await
    }
}

/// Construye un pool Postgres r2d2 a partir de URL.
///
/// - Si `min_size > max_size`, usa `min_size = max_size`.
/// - Ejecuta migraciones inmediatamente tras el primer `get()`.
/// - Devuelve `PersistenceError::TransientIo` ante errores del pool.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(validated_min.min(validated_max)))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee `DbConfig` y construye un pool
/// ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
