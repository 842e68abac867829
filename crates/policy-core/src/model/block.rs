//! Definición de un bloque (`BlockConfig`) y de sus enlaces de eventos.
//!
//! El documento de configuración llega como JSON en camelCase:
//! `{ uuid, blockType, tag, options, permissions[], children[], events[] }`.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Role;
use crate::constants::RUN_EVENT;

/// Enlace declarado: la salida `source_output` del bloque dueño dispara la
/// entrada `target_input` del bloque `target_block_uuid`. Independiente de la
/// adyacencia en el árbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBinding {
    pub source_output: String,
    #[serde(alias = "target")]
    pub target_block_uuid: String,
    #[serde(default = "default_input")]
    pub target_input: String,
}

fn default_input() -> String {
    RUN_EVENT.to_string()
}

impl EventBinding {
    pub fn new(source_output: &str, target_block_uuid: &str, target_input: &str) -> Self {
        Self { source_output: source_output.to_string(),
               target_block_uuid: target_block_uuid.to_string(),
               target_input: target_input.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockConfig {
    /// Vacío cuando el documento no lo trae; el validador lo reporta.
    #[serde(default)]
    pub uuid: String,
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub permissions: BTreeSet<Role>,
    #[serde(default)]
    pub children: Vec<BlockConfig>,
    #[serde(default, rename = "events", alias = "outputEvents")]
    pub output_events: Vec<EventBinding>,
    #[serde(default)]
    pub default_active: bool,
}

impl BlockConfig {
    pub fn new(uuid: &str, block_type: &str) -> Self {
        Self { uuid: uuid.to_string(),
               block_type: block_type.to_string(),
               tag: None,
               options: Map::new(),
               permissions: BTreeSet::new(),
               children: Vec::new(),
               output_events: Vec::new(),
               default_active: false }
    }

    // Helpers estilo builder, usados sobre todo en tests y demos.

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    pub fn with_permissions(mut self, roles: &[&str]) -> Self {
        self.permissions = roles.iter().map(|r| Role::new(r)).collect();
        self
    }

    pub fn with_child(mut self, child: BlockConfig) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_event(mut self, source_output: &str, target: &str, target_input: &str) -> Self {
        self.output_events.push(EventBinding::new(source_output, target, target_input));
        self
    }

    pub fn active(mut self) -> Self {
        self.default_active = true;
        self
    }

    /// Nombre legible: el tag si existe, si no el tipo.
    pub fn name(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.block_type)
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn option_bool(&self, key: &str) -> bool {
        self.options.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Bloques con `options.shared = true` guardan un único estado para todos
    /// los usuarios (`user_id = None`).
    pub fn is_shared(&self) -> bool {
        self.option_bool("shared")
    }

    /// Copia sin hijos: es lo que viaja al `run` de un bloque.
    pub fn shallow(&self) -> BlockConfig {
        BlockConfig { children: Vec::new(), ..self.clone() }
    }

    /// Enlaces cuyo `source_output` coincide con el evento emitido.
    pub fn bindings_for<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a EventBinding> + 'a {
        self.output_events.iter().filter(move |b| b.source_output == event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_camel_case_document_with_aliases() {
        let doc = json!({
            "uuid": "root",
            "blockType": "interfaceContainerBlock",
            "permissions": ["ANY_ROLE"],
            "defaultActive": true,
            "children": [{
                "uuid": "req",
                "blockType": "requestVcDocumentBlock",
                "tag": "submit",
                "options": { "schema": "#Project" },
                "outputEvents": [{ "sourceOutput": "RunEvent", "target": "save" }]
            }]
        });
        let cfg: BlockConfig = serde_json::from_value(doc).expect("parse");
        assert!(cfg.default_active);
        let child = &cfg.children[0];
        assert_eq!(child.name(), "submit");
        assert_eq!(child.option_str("schema"), Some("#Project"));
        assert_eq!(child.output_events[0].target_block_uuid, "save");
        assert_eq!(child.output_events[0].target_input, RUN_EVENT);
        assert!(!child.default_active);
    }

    #[test]
    fn shallow_drops_children_only() {
        let cfg = BlockConfig::new("a", "t").with_tag("x").with_child(BlockConfig::new("b", "t"));
        let s = cfg.shallow();
        assert!(s.children.is_empty());
        assert_eq!(s.tag.as_deref(), Some("x"));
    }
}
