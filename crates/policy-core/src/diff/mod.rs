//! Motor de diffs de colecciones.
//!
//! Puro y sin estado: nunca muta sus entradas, así que puede correr en
//! paralelo sobre colecciones independientes. Cada `update` conserva el valor
//! anterior y cada `delete` el valor borrado, de modo que todo diff es
//! invertible.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::errors::CoreEngineError;
use crate::hashing::hash_value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRow {
    pub row_id: String,
    pub collection_name: String,
    pub data: Value,
    pub content_hash: String,
}

impl CollectionRow {
    pub fn new(collection_name: &str, row_id: &str, data: Value) -> Self {
        let content_hash = hash_value(&data);
        Self { row_id: row_id.to_string(),
               collection_name: collection_name.to_string(),
               data,
               content_hash }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffActionKind {
    Insert,
    Update,
    Delete,
}

impl DiffActionKind {
    fn as_str(&self) -> &'static str {
        match self {
            DiffActionKind::Insert => "insert",
            DiffActionKind::Update => "update",
            DiffActionKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffAction {
    #[serde(rename = "type")]
    pub kind: DiffActionKind,
    pub row_id: String,
    /// Valor nuevo (`Null` en `delete`).
    pub data: Value,
    /// Valor anterior en `update` y `delete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Value>,
}

impl DiffAction {
    fn canonical(&self) -> Value {
        json!({
            "type": self.kind.as_str(),
            "rowId": self.row_id,
            "data": self.data,
            "previous": self.previous,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDiff {
    pub hash: String,
    pub actions: Vec<DiffAction>,
}

impl CollectionDiff {
    /// Construye un diff ordenando las acciones por `row_id` y sellándolo.
    pub fn from_actions(mut actions: Vec<DiffAction>) -> Self {
        actions.sort_by(|a, b| a.row_id.cmp(&b.row_id));
        let hash = compute_hash(&actions);
        Self { hash, actions }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("diff hash mismatch: stored {stored}, recomputed {recomputed}")]
    HashMismatch { stored: String, recomputed: String },
    #[error("cannot insert row '{0}': it already exists")]
    RowExists(String),
    #[error("cannot {action} row '{row_id}': it does not exist")]
    MissingRow { action: &'static str, row_id: String },
}

impl From<DiffError> for CoreEngineError {
    fn from(e: DiffError) -> Self {
        CoreEngineError::Integrity(e.to_string())
    }
}

/// Hash de la lista ordenada de acciones (JSON canónico).
pub fn compute_hash(actions: &[DiffAction]) -> String {
    let list: Vec<Value> = actions.iter().map(DiffAction::canonical).collect();
    hash_value(&Value::Array(list))
}

/// Diff de `base` a `candidate`. Si un `row_id` se repite en un lado, gana la
/// última fila.
pub fn diff_collections(base: &[CollectionRow], candidate: &[CollectionRow]) -> CollectionDiff {
    let before: BTreeMap<&str, &CollectionRow> = base.iter().map(|r| (r.row_id.as_str(), r)).collect();
    let after: BTreeMap<&str, &CollectionRow> = candidate.iter().map(|r| (r.row_id.as_str(), r)).collect();

    let mut actions = Vec::new();
    for (id, new) in &after {
        match before.get(id) {
            None => actions.push(DiffAction { kind: DiffActionKind::Insert,
                                              row_id: id.to_string(),
                                              data: new.data.clone(),
                                              previous: None }),
            Some(old) if old.content_hash != new.content_hash => {
                actions.push(DiffAction { kind: DiffActionKind::Update,
                                          row_id: id.to_string(),
                                          data: new.data.clone(),
                                          previous: Some(old.data.clone()) })
            }
            Some(_) => {}
        }
    }
    for (id, old) in &before {
        if !after.contains_key(id) {
            actions.push(DiffAction { kind: DiffActionKind::Delete,
                                      row_id: id.to_string(),
                                      data: Value::Null,
                                      previous: Some(old.data.clone()) });
        }
    }
    CollectionDiff::from_actions(actions)
}

/// Recalcula el hash y lo compara con el almacenado.
pub fn verify_diff(diff: &CollectionDiff) -> Result<(), DiffError> {
    let recomputed = compute_hash(&diff.actions);
    if recomputed != diff.hash {
        return Err(DiffError::HashMismatch { stored: diff.hash.clone(),
                                             recomputed });
    }
    Ok(())
}

/// Aplica un diff sobre `base` devolviendo la colección resultante ordenada
/// por `row_id`. Estricto: insertar una fila existente o tocar una fila
/// ausente es un error.
pub fn apply_diff(collection: &str, base: &[CollectionRow], diff: &CollectionDiff) -> Result<Vec<CollectionRow>, DiffError> {
    let mut rows: BTreeMap<String, CollectionRow> = base.iter().map(|r| (r.row_id.clone(), r.clone())).collect();
    for action in &diff.actions {
        match action.kind {
            DiffActionKind::Insert => {
                if rows.contains_key(&action.row_id) {
                    return Err(DiffError::RowExists(action.row_id.clone()));
                }
                rows.insert(action.row_id.clone(),
                            CollectionRow::new(collection, &action.row_id, action.data.clone()));
            }
            DiffActionKind::Update => {
                let row = rows.get_mut(&action.row_id).ok_or_else(|| DiffError::MissingRow { action: "update",
                                                                                           row_id: action.row_id.clone() })?;
                *row = CollectionRow::new(collection, &action.row_id, action.data.clone());
            }
            DiffActionKind::Delete => {
                rows.remove(&action.row_id).ok_or_else(|| DiffError::MissingRow { action: "delete",
                                                                                   row_id: action.row_id.clone() })?;
            }
        }
    }
    Ok(rows.into_values().collect())
}

/// Inverso: insert <-> delete, y update con valores nuevo/anterior
/// intercambiados.
pub fn invert_diff(diff: &CollectionDiff) -> CollectionDiff {
    let actions = diff.actions
                      .iter()
                      .map(|a| match a.kind {
                          DiffActionKind::Insert => DiffAction { kind: DiffActionKind::Delete,
                                                                 row_id: a.row_id.clone(),
                                                                 data: Value::Null,
                                                                 previous: Some(a.data.clone()) },
                          DiffActionKind::Delete => DiffAction { kind: DiffActionKind::Insert,
                                                                 row_id: a.row_id.clone(),
                                                                 data: a.previous.clone().unwrap_or(Value::Null),
                                                                 previous: None },
                          DiffActionKind::Update => DiffAction { kind: DiffActionKind::Update,
                                                                 row_id: a.row_id.clone(),
                                                                 data: a.previous.clone().unwrap_or(Value::Null),
                                                                 previous: Some(a.data.clone()) },
                      })
                      .collect();
    CollectionDiff::from_actions(actions)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn rows(items: &[(&str, Value)]) -> Vec<CollectionRow> {
        items.iter().map(|(id, v)| CollectionRow::new("docs", id, v.clone())).collect()
    }

    fn from_map(map: &BTreeMap<u8, i32>) -> Vec<CollectionRow> {
        map.iter().map(|(k, v)| CollectionRow::new("docs", &format!("r{k:03}"), json!({ "v": v }))).collect()
    }

    #[test]
    fn classifies_insert_update_delete_sorted_by_row_id() {
        let base = rows(&[("1", json!("x")), ("2", json!("y")), ("3", json!("z"))]);
        let cand = rows(&[("3", json!("z")), ("2", json!("Y")), ("0", json!("new"))]);
        let diff = diff_collections(&base, &cand);
        let summary: Vec<(DiffActionKind, &str)> = diff.actions.iter().map(|a| (a.kind, a.row_id.as_str())).collect();
        assert_eq!(summary,
                   vec![(DiffActionKind::Insert, "0"), (DiffActionKind::Delete, "1"), (DiffActionKind::Update, "2")]);
        assert_eq!(diff.actions[2].previous, Some(json!("y")));
        assert!(verify_diff(&diff).is_ok());
    }

    #[test]
    fn tampered_action_is_detected() {
        let mut diff = diff_collections(&[], &rows(&[("1", json!("x"))]));
        diff.actions[0].data = json!("evil");
        assert!(matches!(verify_diff(&diff), Err(DiffError::HashMismatch { .. })));
    }

    #[test]
    fn strict_application_rejects_inconsistent_base() {
        let diff = diff_collections(&[], &rows(&[("1", json!("x"))]));
        let err = apply_diff("docs", &rows(&[("1", json!("x"))]), &diff).unwrap_err();
        assert_eq!(err, DiffError::RowExists("1".into()));
        let del = invert_diff(&diff);
        assert!(matches!(apply_diff("docs", &[], &del), Err(DiffError::MissingRow { action: "delete", .. })));
    }

    #[test]
    fn inputs_are_not_mutated() {
        let base = rows(&[("1", json!("x"))]);
        let snapshot = base.clone();
        let diff = diff_collections(&base, &[]);
        let _ = apply_diff("docs", &base, &diff).unwrap();
        assert_eq!(base, snapshot);
    }

    proptest! {
        #[test]
        fn apply_of_diff_reaches_candidate(a in prop::collection::btree_map(any::<u8>(), -5i32..5, 0..24),
                                           b in prop::collection::btree_map(any::<u8>(), -5i32..5, 0..24)) {
            let (base, cand) = (from_map(&a), from_map(&b));
            let diff = diff_collections(&base, &cand);
            prop_assert_eq!(apply_diff("docs", &base, &diff).unwrap(), cand);
        }

        #[test]
        fn diff_with_itself_is_empty(a in prop::collection::btree_map(any::<u8>(), any::<i32>(), 0..24)) {
            let base = from_map(&a);
            prop_assert!(diff_collections(&base, &base).is_empty());
        }

        #[test]
        fn inverse_undoes_diff(a in prop::collection::btree_map(any::<u8>(), -5i32..5, 0..24),
                               b in prop::collection::btree_map(any::<u8>(), -5i32..5, 0..24)) {
            let (base, cand) = (from_map(&a), from_map(&b));
            let diff = diff_collections(&base, &cand);
            let forward = apply_diff("docs", &base, &diff).unwrap();
            let back = apply_diff("docs", &forward, &invert_diff(&diff)).unwrap();
            prop_assert_eq!(back, base);
        }
    }
}
