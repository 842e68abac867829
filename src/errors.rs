//! Errores de aplicación para binarios y clientes del facade.
use thiserror::Error;

use policy_core::CoreEngineError;
use policy_persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Error de configuración: {0}")]
    Config(String),
    #[error("Error en IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON inválido: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] CoreEngineError),
    #[error("Error de persistencia: {0}")]
    Persistence(#[from] PersistenceError),
}

impl AppError {
    /// Código de salida para la CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            AppError::Io(_) | AppError::Json(_) => 3,
            AppError::Engine(CoreEngineError::InvalidPolicy(_)) | AppError::Engine(CoreEngineError::UnknownBlockType(_)) => 4,
            AppError::Engine(_) | AppError::Persistence(_) => 5,
        }
    }
}
