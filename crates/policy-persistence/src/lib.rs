//! policy-persistence
//!
//! Implementaciones Postgres (Diesel + r2d2) de los stores del core:
//! estado de bloques con compare-and-set, working set de colecciones y
//! journal de savepoints de dry-run.
//!
//! Módulos:
//! - `pg`: stores sobre Postgres y construcción del pool.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgCollectionStore, PgPool, PgSnapshotStore, PgStateStore, PoolProvider};
