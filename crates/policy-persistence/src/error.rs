//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y luego a
//! `StoreError`, que es lo único que ve el core.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use policy_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("version conflict: {0}")]
    VersionConflict(String),
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("json codec error: {0}")]
    Codec(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Codec(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Codec(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::RollbackErrorOnCommit { rollback_error, commit_error } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<PersistenceError> for StoreError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::SerializationConflict | PersistenceError::TransientIo(_) => StoreError::Transient(err.to_string()),
            PersistenceError::NotFound => StoreError::NotFound(err.to_string()),
            PersistenceError::UniqueViolation(m) | PersistenceError::VersionConflict(m) => StoreError::Conflict(m),
            PersistenceError::Codec(m) => StoreError::Serialization(m),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_mapping_keeps_retry_semantics() {
        assert!(StoreError::from(PersistenceError::SerializationConflict).is_retryable());
        assert!(StoreError::from(PersistenceError::TransientIo("reset".into())).is_retryable());
        assert_eq!(StoreError::from(PersistenceError::VersionConflict("p/b/u".into())),
                   StoreError::Conflict("p/b/u".into()));
        assert_eq!(StoreError::from(PersistenceError::UniqueViolation("dup".into())),
                   StoreError::Conflict("dup".into()));
        assert!(matches!(StoreError::from(PersistenceError::CheckViolation("c".into())), StoreError::Backend(_)));
        assert!(matches!(StoreError::from(PersistenceError::from(DieselError::NotFound)), StoreError::NotFound(_)));
    }
}
