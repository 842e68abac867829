use chrono::Utc;
use dashmap::DashMap;

use super::{AuditEvent, AuditEventKind};

/// Almacenamiento de auditoría append-only.
pub trait AuditStore: Send + Sync {
    /// Agrega un evento a partir de su kind y devuelve el evento completo (con seq y ts).
    fn append_kind(&self, policy_id: &str, kind: AuditEventKind) -> AuditEvent;
    /// Lista eventos de una política (orden ascendente por seq).
    fn list(&self, policy_id: &str) -> Vec<AuditEvent>;
}

#[derive(Default)]
pub struct InMemoryAuditStore {
    inner: DashMap<String, Vec<AuditEvent>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append_kind(&self, policy_id: &str, kind: AuditEventKind) -> AuditEvent {
        let mut events = self.inner.entry(policy_id.to_string()).or_default();
        let ev = AuditEvent { seq: events.len() as u64,
                              policy_id: policy_id.to_string(),
                              kind,
                              ts: Utc::now() };
        events.push(ev.clone());
        ev
    }

    fn list(&self, policy_id: &str) -> Vec<AuditEvent> {
        self.inner.get(policy_id).map(|e| e.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_per_policy() {
        let store = InMemoryAuditStore::new();
        store.append_kind("p1", AuditEventKind::Restored { savepoint_id: "s1".into() });
        store.append_kind("p2", AuditEventKind::Restored { savepoint_id: "s1".into() });
        let ev = store.append_kind("p1", AuditEventKind::Discarded { savepoints: 1 });
        assert_eq!(ev.seq, 1);
        assert_eq!(store.list("p2").len(), 1);
        assert_eq!(store.list("p1")[1].kind.label(), "discarded");
    }
}
