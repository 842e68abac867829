//! Definición publicable de una política y su instancia en ejecución.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{BlockConfig, PolicyTree, PolicyUser, Role};
use crate::constants::DRY_RUN_SCOPE_SUFFIX;
use crate::errors::CoreEngineError;
use crate::registry::BlockRegistry;
use crate::validator::PolicyValidator;

/// Ruta estática de datos externos hacia un bloque de entrada.
/// Campos `None` actúan como comodín.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRoute {
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    pub block_uuid: String,
}

impl EntryRoute {
    pub fn new(document_type: Option<&str>, role: Option<&str>, block_uuid: &str) -> Self {
        Self { document_type: document_type.map(str::to_string),
               role: role.map(Role::new),
               block_uuid: block_uuid.to_string() }
    }

    /// `role` admite también las palabras reservadas (`ANY_ROLE`, `NO_ROLE`, `OWNER`).
    pub fn matches(&self, document_type: Option<&str>, user: &PolicyUser) -> bool {
        let doc_ok = match &self.document_type {
            None => true,
            Some(dt) => document_type == Some(dt.as_str()),
        };
        let role_ok = match &self.role {
            None => true,
            Some(r) => user.has_permission(&BTreeSet::from([r.clone()])),
        };
        doc_ok && role_ok
    }
}

/// Documento de publicación completo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDefinition {
    pub policy_id: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    pub root: BlockConfig,
    #[serde(default)]
    pub routes: Vec<EntryRoute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyMode {
    Live,
    DryRun,
}

/// Política publicada: árbol inmutable + metadatos de ejecución.
#[derive(Debug, Clone)]
pub struct PolicyInstance {
    pub policy_id: String,
    pub owner: Option<String>,
    pub mode: PolicyMode,
    pub roles: Vec<Role>,
    pub routes: Vec<EntryRoute>,
    pub tree: PolicyTree,
}

impl PolicyInstance {
    /// Publica una definición: rechaza tipos de bloque no registrados y
    /// cualquier árbol cuyo reporte de validación tenga errores.
    pub fn publish(definition: PolicyDefinition, registry: &BlockRegistry, mode: PolicyMode) -> Result<Self, CoreEngineError> {
        let PolicyDefinition { policy_id,
                               owner,
                               roles,
                               root,
                               routes, } = definition;
        let tree = PolicyTree::new(root);
        registry.check_tree(&tree)?;
        let report = PolicyValidator::new(registry).validate(&tree, &roles, &routes);
        if !report.is_valid() {
            log::warn!("policy {} rejected: {} validation error(s)", policy_id, report.error_count());
            return Err(CoreEngineError::InvalidPolicy(Box::new(report)));
        }
        log::info!("policy {} published ({:?}, {} blocks)", policy_id, mode, tree.len());
        Ok(Self { policy_id,
                  owner,
                  mode,
                  roles,
                  routes,
                  tree })
    }

    /// Bloques de entrada para un documento externo, en el orden de las rutas.
    pub fn entry_blocks(&self, document_type: Option<&str>, user: &PolicyUser) -> Vec<&BlockConfig> {
        let mut seen = BTreeSet::new();
        self.routes
            .iter()
            .filter(|r| r.matches(document_type, user))
            .filter(|r| seen.insert(r.block_uuid.as_str()))
            .filter_map(|r| self.tree.find_by_uuid(&r.block_uuid).ok())
            .collect()
    }

    /// Construye la identidad de un usuario de esta política (marca owner).
    pub fn user(&self, id: &str, role: Option<&str>) -> PolicyUser {
        let mut user = PolicyUser::new(id, role);
        user.is_owner = self.owner.as_deref() == Some(id);
        user
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == PolicyMode::DryRun
    }

    /// Clave bajo la que el runtime guarda estados y colecciones.
    pub fn store_scope(&self) -> String {
        match self.mode {
            PolicyMode::Live => self.policy_id.clone(),
            PolicyMode::DryRun => dry_run_scope(&self.policy_id),
        }
    }
}

/// Espacio de claves sandbox de un dry-run de `policy_id`.
pub fn dry_run_scope(policy_id: &str) -> String {
    format!("{policy_id}{DRY_RUN_SCOPE_SUFFIX}")
}
