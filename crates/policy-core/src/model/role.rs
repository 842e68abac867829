//! Roles y usuario de política.
//!
//! Además de los roles declarados por la política existen tres palabras
//! reservadas: `ANY_ROLE` (cualquier usuario), `NO_ROLE` (usuarios sin rol que
//! no son owner) y `OWNER` (el dueño de la política).
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const ANY_ROLE: &str = "ANY_ROLE";
pub const NO_ROLE: &str = "NO_ROLE";
pub const OWNER: &str = "OWNER";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` para `ANY_ROLE`, `NO_ROLE` y `OWNER`.
    pub fn is_reserved(&self) -> bool {
        matches!(self.0.as_str(), ANY_ROLE | NO_ROLE | OWNER)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::new(value)
    }
}

/// Identidad del usuario que actúa sobre una instancia.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUser {
    pub id: String,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub is_owner: bool,
}

impl PolicyUser {
    pub fn new(id: &str, role: Option<&str>) -> Self {
        Self { id: id.to_string(),
               role: role.map(Role::new),
               is_owner: false }
    }

    pub fn owner(id: &str) -> Self {
        Self { id: id.to_string(),
               role: None,
               is_owner: true }
    }

    /// Regla de acceso de un bloque sobre este usuario.
    pub fn has_permission(&self, permissions: &BTreeSet<Role>) -> bool {
        if permissions.contains(&Role::new(ANY_ROLE)) {
            return true;
        }
        if let Some(role) = &self.role {
            if permissions.contains(role) {
                return true;
            }
        }
        if permissions.contains(&Role::new(NO_ROLE)) && self.role.is_none() && !self.is_owner {
            return true;
        }
        permissions.contains(&Role::new(OWNER)) && self.is_owner
    }
}
