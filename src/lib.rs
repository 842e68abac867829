//! policyflow
//!
//! Facade del workspace:
//! - re-exporta el core (`policy_core`), los bloques incluidos
//!   (`policy_blocks`) y la persistencia Postgres (`policy_persistence`);
//! - `config`: límites del runtime y base de datos desde el entorno;
//! - `errors`: errores de aplicación para binarios;
//! - `app`: ensamblado de runtime y dry-run a partir de documentos JSON.

pub mod app;
pub mod config;
pub mod errors;

pub use config::AppConfig;
pub use errors::AppError;
pub use policy_blocks as blocks;
pub use policy_core as engine;
pub use policy_persistence as persistence;
