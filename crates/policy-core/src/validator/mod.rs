//! Validación estática de un árbol antes de publicarlo.
//!
//! El recorrido es en profundidad (pre-orden) y el reporte conserva ese
//! orden, así que validar dos veces el mismo árbol produce el mismo reporte.
//! Un panic dentro del validador de un tipo se convierte en un único error
//! atribuido a ese bloque; el resto del árbol se sigue validando.
mod context;
mod report;

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

pub use context::{BlockValidation, ValidationContext};
pub use report::{BlockReport, ValidationReport};

use crate::model::{EntryRoute, PolicyTree, Role};
use crate::registry::BlockRegistry;

pub struct PolicyValidator<'a> {
    registry: &'a BlockRegistry,
}

impl<'a> PolicyValidator<'a> {
    pub fn new(registry: &'a BlockRegistry) -> Self {
        Self { registry }
    }

    pub fn validate(&self, tree: &PolicyTree, roles: &[Role], routes: &[EntryRoute]) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut seen_uuids: HashSet<&str> = HashSet::new();
        let mut seen_tags: HashSet<&str> = HashSet::new();

        for node in tree.nodes() {
            let block = node.config();
            let mut result = BlockValidation::default();

            if block.uuid.is_empty() {
                report.errors.push("UUID is not set".to_string());
            } else if !seen_uuids.insert(block.uuid.as_str()) {
                report.errors.push(format!("UUID {} already exist", block.uuid));
            }
            if let Some(tag) = block.tag.as_deref() {
                if !seen_tags.insert(tag) {
                    result.error(format!("Tag {tag} already exist"));
                }
            }

            let ctx = ValidationContext::new(node.clone(), tree, roles);
            for role in &block.permissions {
                if !ctx.role_exists(role) {
                    result.error(format!("Permission {role} not exist"));
                }
            }
            for binding in &block.output_events {
                if binding.source_output.is_empty() {
                    result.error("Event source output is not set");
                }
                if binding.target_block_uuid == block.uuid {
                    result.error(format!("Event \"{}\" targets its own block", binding.source_output));
                } else if !tree.contains(&binding.target_block_uuid) {
                    result.error(format!("Event target {} does not exist", binding.target_block_uuid));
                }
            }

            match self.registry.get(&block.block_type) {
                None => result.error(format!("Unknown block type: {}", block.block_type)),
                Some(behavior) => {
                    let validate = behavior.validate;
                    match panic::catch_unwind(AssertUnwindSafe(|| validate(block, &ctx))) {
                        Ok(own) => result.merge(own),
                        Err(cause) => {
                            let msg = panic_message(cause.as_ref());
                            log::warn!("validator for {} ({}) panicked: {}", block.block_type, block.uuid, msg);
                            result.error(format!("Unhandled exception {msg}"));
                        }
                    }
                }
            }

            report.blocks.push(BlockReport { uuid: block.uuid.clone(),
                                             name: block.name().to_string(),
                                             is_valid: result.is_ok(),
                                             errors: result.errors,
                                             warnings: result.warnings });
        }

        if !tree.is_acyclic() {
            report.errors.push("Block tree contains a cycle: a block reuses the uuid of an ancestor".to_string());
        }
        if let Some(cycle) = tree.event_cycle() {
            report.errors.push(format!("Event cycle detected: {}", cycle.join(" -> ")));
        }
        for route in routes {
            if !tree.contains(&route.block_uuid) {
                report.errors.push(format!("Route target {} does not exist", route.block_uuid));
            }
            if let Some(role) = &route.role {
                if !role.is_reserved() && !roles.contains(role) {
                    report.errors.push(format!("Route role {role} not exist"));
                }
            }
        }

        log::debug!("validation finished: {} block(s), {} error(s), {} warning(s)",
                    report.blocks.len(),
                    report.error_count(),
                    report.warning_count());
        report
    }
}

pub(crate) fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::model::BlockConfig;
    use crate::registry::{no_validation, BlockBehavior, BlockError, BlockOutcome, BlockRunContext};

    fn noop(_: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
        Ok(BlockOutcome::active(Value::Null, Value::Null))
    }

    fn needs_child(block: &BlockConfig, _: &ValidationContext<'_>) -> BlockValidation {
        let mut v = BlockValidation::default();
        if block.children.is_empty() {
            v.error("Block must have at least one child");
        }
        v
    }

    fn explodes(_: &BlockConfig, _: &ValidationContext<'_>) -> BlockValidation {
        panic!("boom");
    }

    fn registry() -> BlockRegistry {
        let mut reg = BlockRegistry::new();
        for (tag, validate) in [("container", needs_child as crate::registry::ValidateFn),
                                ("leaf", no_validation),
                                ("fragile", explodes)]
        {
            reg.register(BlockBehavior { block_type: tag,
                                         validate,
                                         run: noop })
               .unwrap();
        }
        reg
    }

    fn roles() -> Vec<Role> {
        vec![Role::new("Registrant")]
    }

    #[test]
    fn valid_tree_is_publishable_and_validation_is_idempotent() {
        let reg = registry();
        let tree = PolicyTree::new(BlockConfig::new("root", "container").with_permissions(&["Registrant"])
                                                                          .with_child(BlockConfig::new("a", "leaf").with_event("ok", "b", "run"))
                                                                          .with_child(BlockConfig::new("b", "leaf")));
        let v = PolicyValidator::new(&reg);
        let first = v.validate(&tree, &roles(), &[EntryRoute::new(None, None, "a")]);
        let second = v.validate(&tree, &roles(), &[EntryRoute::new(None, None, "a")]);
        assert!(first.is_valid(), "{first:?}");
        assert_eq!(first, second);
        assert_eq!(first.blocks.len(), 3);
    }

    #[test]
    fn panicking_validator_is_isolated_to_its_block() {
        let reg = registry();
        let tree = PolicyTree::new(BlockConfig::new("root", "container").with_child(BlockConfig::new("f", "fragile"))
                                                                          .with_child(BlockConfig::new("c", "container")));
        let report = PolicyValidator::new(&reg).validate(&tree, &roles(), &[]);
        let fragile = report.block("f").unwrap();
        assert_eq!(fragile.errors, vec!["Unhandled exception boom".to_string()]);
        // el hermano posterior sí fue validado
        let c = report.block("c").unwrap();
        assert_eq!(c.errors, vec!["Block must have at least one child".to_string()]);
        assert!(!report.is_valid());
    }

    #[test]
    fn generic_checks_report_structural_defects() {
        let reg = registry();
        let root = BlockConfig::new("root", "container")
            .with_child(BlockConfig::new("a", "leaf").with_tag("t").with_permissions(&["Ghost"]).with_event("ok", "zz", "run"))
            .with_child(BlockConfig::new("a", "leaf").with_tag("t"))
            .with_child(BlockConfig::new("", "mystery"))
            .with_child(BlockConfig::new("s", "leaf").with_event("ok", "s", "run"));
        let tree = PolicyTree::new(root);
        let report = PolicyValidator::new(&reg).validate(&tree, &roles(), &[EntryRoute::new(None, Some("Ghost"), "nope")]);

        assert!(report.errors.contains(&"UUID a already exist".to_string()));
        assert!(report.errors.contains(&"UUID is not set".to_string()));
        assert!(report.errors.contains(&"Route target nope does not exist".to_string()));
        assert!(report.errors.contains(&"Route role Ghost not exist".to_string()));

        let first_a = &report.blocks[1];
        assert!(first_a.errors.contains(&"Permission Ghost not exist".to_string()));
        assert!(first_a.errors.contains(&"Event target zz does not exist".to_string()));
        assert!(report.blocks[2].errors.contains(&"Tag t already exist".to_string()));
        assert!(report.blocks[3].errors.contains(&"Unknown block type: mystery".to_string()));
        assert!(report.block("s").unwrap().errors[0].contains("targets its own block"));
    }

    #[test]
    fn event_cycle_is_a_configuration_error_and_warnings_do_not_block() {
        fn warns(_: &BlockConfig, _: &ValidationContext<'_>) -> BlockValidation {
            let mut v = BlockValidation::default();
            v.warning("deprecated option");
            v
        }
        let mut reg = registry();
        reg.register(BlockBehavior { block_type: "warn",
                                     validate: warns,
                                     run: noop })
           .unwrap();

        let ok = PolicyTree::new(BlockConfig::new("root", "container").with_child(BlockConfig::new("w", "warn")));
        let report = PolicyValidator::new(&reg).validate(&ok, &[], &[]);
        assert!(report.is_valid());
        assert_eq!(report.warning_count(), 1);

        let cyclic = PolicyTree::new(BlockConfig::new("root", "container")
            .with_child(BlockConfig::new("a", "leaf").with_event("ok", "b", "run"))
            .with_child(BlockConfig::new("b", "leaf").with_event("ok", "a", "run")));
        let report = PolicyValidator::new(&reg).validate(&cyclic, &[], &[]);
        assert_eq!(report.errors, vec!["Event cycle detected: a -> b -> a".to_string()]);
    }
}
