//! Auditoría: tipos de evento y store append-only.

pub mod store;
pub mod types;

pub use store::{AuditStore, InMemoryAuditStore};
pub use types::{AuditEvent, AuditEventKind};
