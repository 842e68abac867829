//! Grabación y reproducción de entradas.
//!
//! Un `Recorder` adjunto al runtime captura cada llamada a los puntos de
//! entrada en orden de llegada. `replay` las reejecuta contra otro runtime
//! (típicamente un dry-run nuevo); con los mismos bloques, los fingerprints
//! de cada cascada coinciden.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ExecutionReport, ExternalDocument, PolicyRuntime};
use crate::errors::CoreEngineError;
use crate::model::PolicyUser;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecordedAction {
    #[serde(rename_all = "camelCase")]
    ExternalData { user: PolicyUser, document: ExternalDocument },
    #[serde(rename_all = "camelCase")]
    BlockAction {
        user: PolicyUser,
        block_uuid: String,
        input: String,
        #[serde(default)]
        payload: Value,
    },
}

impl RecordedAction {
    pub fn user(&self) -> &PolicyUser {
        match self {
            RecordedAction::ExternalData { user, .. } | RecordedAction::BlockAction { user, .. } => user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedItem {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub action: RecordedAction,
}

#[derive(Debug)]
pub struct Recorder {
    items: Mutex<Vec<RecordedItem>>,
    active: AtomicBool,
}

impl Default for Recorder {
    fn default() -> Self {
        Self { items: Mutex::new(Vec::new()),
               active: AtomicBool::new(true) }
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, action: RecordedAction) {
        if !self.is_recording() {
            return;
        }
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = items.len() as u64;
        items.push(RecordedItem { seq, ts: Utc::now(), action });
    }

    pub fn items(&self) -> Vec<RecordedItem> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.items().into_iter().map(|i| i.action).collect()
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn is_recording(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Reejecuta las acciones en orden. Se detiene en el primer error del
/// runtime (errores de bloque o de permiso van dentro de cada reporte).
pub async fn replay(runtime: &PolicyRuntime, actions: &[RecordedAction]) -> Result<Vec<ExecutionReport>, CoreEngineError> {
    let mut reports = Vec::with_capacity(actions.len());
    for (i, action) in actions.iter().enumerate() {
        log::debug!("replaying action {} of {} for {}", i + 1, actions.len(), action.user().id);
        let report = match action {
            RecordedAction::ExternalData { user, document } => runtime.ingest_external(user, document.clone()).await?,
            RecordedAction::BlockAction { user,
                                          block_uuid,
                                          input,
                                          payload, } => runtime.run_block(user, block_uuid, input, payload.clone()).await?,
        };
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn actions_serialize_tagged() {
        let action = RecordedAction::BlockAction { user: PolicyUser::new("u1", Some("Verifier")),
                                                   block_uuid: "approve".into(),
                                                   input: "approve".into(),
                                                   payload: json!({}) };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], "blockAction");
        assert_eq!(v["blockUuid"], "approve");
        let back: RecordedAction = serde_json::from_value(v).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn stopped_recorder_ignores_actions() {
        let rec = Recorder::new();
        let action = RecordedAction::ExternalData { user: PolicyUser::new("u", None),
                                                    document: ExternalDocument::new(None, json!(1)) };
        rec.record(action.clone());
        rec.stop();
        rec.record(action.clone());
        assert_eq!(rec.items().len(), 1);
        rec.resume();
        rec.record(action);
        assert_eq!(rec.items()[1].seq, 1);
    }
}
