use serde::{Deserialize, Serialize};

use crate::model::{BlockConfig, NodeRef, PolicyTree, Role};

/// Resultado del contrato `validate` de un tipo de bloque.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BlockValidation {
    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn merge(&mut self, other: BlockValidation) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Helper para las reglas "campo X requerido".
    pub fn require_option(&mut self, block: &BlockConfig, key: &str) {
        let missing = match block.option(key) {
            None | Some(serde_json::Value::Null) => true,
            Some(serde_json::Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            self.error(format!("Option \"{key}\" is not set"));
        }
    }
}

/// Vista del árbol que recibe el validador de cada tipo de bloque.
pub struct ValidationContext<'a> {
    node: NodeRef<'a>,
    tree: &'a PolicyTree,
    roles: &'a [Role],
}

impl<'a> ValidationContext<'a> {
    pub(crate) fn new(node: NodeRef<'a>, tree: &'a PolicyTree, roles: &'a [Role]) -> Self {
        Self { node, tree, roles }
    }

    pub fn block(&self) -> &'a BlockConfig {
        self.node.config()
    }

    pub fn tree(&self) -> &'a PolicyTree {
        self.tree
    }

    pub fn parent(&self) -> Option<&'a BlockConfig> {
        self.node.parent().map(|p| p.config())
    }

    /// Del más cercano a la raíz.
    pub fn ancestors(&self) -> Vec<&'a BlockConfig> {
        self.node.ancestors()
    }

    pub fn has_ancestor_of_type(&self, block_type: &str) -> bool {
        self.ancestors().iter().any(|a| a.block_type == block_type)
    }

    pub fn siblings(&self) -> Vec<&'a BlockConfig> {
        self.node.siblings()
    }

    pub fn children(&self) -> &'a [BlockConfig] {
        &self.node.config().children
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<&'a BlockConfig> {
        self.tree.find_by_tag(tag)
    }

    pub fn find_by_uuid(&self, uuid: &str) -> Option<&'a BlockConfig> {
        self.tree.find_by_uuid(uuid).ok()
    }

    /// Rol declarado en la política o palabra reservada.
    pub fn role_exists(&self, role: &Role) -> bool {
        role.is_reserved() || self.roles.contains(role)
    }

    pub fn roles(&self) -> &'a [Role] {
        self.roles
    }
}
