//! Tipos de bloque incluidos.

pub mod approval;
pub mod container;
pub mod custom_logic;
pub mod document;
pub mod external_data;
pub mod roles;
pub mod send;
pub mod switch;

use policy_core::hashing::to_canonical_json;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Digest SHA-256 (hex) del JSON canónico de un documento. Es el id con el
/// que los documentos viajan y se guardan en colecciones.
pub fn document_hash(document: &Value) -> String {
    format!("{:x}", Sha256::digest(to_canonical_json(document).as_bytes()))
}
