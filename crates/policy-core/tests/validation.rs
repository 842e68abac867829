mod common;

use common::{definition, registry};
use policy_core::{BlockConfig, CoreEngineError, EntryRoute, PolicyInstance, PolicyMode, PolicyTree, PolicyValidator, Role};
use serde_json::json;

#[test]
fn publish_rejects_event_cycles() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("a", "step").with_event("ok", "b", "run"))
                                                    .with_child(BlockConfig::new("b", "step").with_event("ok", "a", "run"));
    let err = PolicyInstance::publish(definition("p", root, vec![]), &registry(), PolicyMode::Live).unwrap_err();
    match err {
        CoreEngineError::InvalidPolicy(report) => {
            assert!(report.errors.iter().any(|e| e == "Event cycle detected: a -> b -> a"), "{:?}", report.errors);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn publish_rejects_unregistered_block_types() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("x", "mysteryBlock"));
    let err = PolicyInstance::publish(definition("p", root, vec![]), &registry(), PolicyMode::Live).unwrap_err();
    assert_eq!(err, CoreEngineError::UnknownBlockType("mysteryBlock".into()));
}

#[test]
fn report_collects_errors_per_block_and_policy() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("a", "step").with_tag("t")
                                                                                             .with_permissions(&["Auditor"])
                                                                                             .with_event("ok", "ghost", "run"))
                                                    .with_child(BlockConfig::new("b", "step").with_tag("t"))
                                                    .with_child(BlockConfig::new("a", "step"));
    let routes = vec![EntryRoute::new(None, Some("Stranger"), "nowhere")];
    let tree = PolicyTree::new(root);
    let roles = vec![Role::new("Registrant")];
    let reg = registry();
    let report = PolicyValidator::new(&reg).validate(&tree, &roles, &routes);

    assert!(!report.is_valid());
    let a = report.block("a").unwrap();
    assert_eq!(a.errors, vec!["Permission Auditor not exist".to_string(), "Event target ghost does not exist".to_string()]);
    assert_eq!(report.block("b").unwrap().errors, vec!["Tag t already exist".to_string()]);
    assert!(report.errors.contains(&"UUID a already exist".to_string()));
    assert!(report.errors.contains(&"Route target nowhere does not exist".to_string()));
    assert!(report.errors.contains(&"Route role Stranger not exist".to_string()));
    assert_eq!(report.error_count(), 6);
}

#[test]
fn validation_is_repeatable_and_valid_policies_publish() {
    let (root, routes) = common::chain_abc();
    let tree = PolicyTree::new(root.clone());
    let roles = vec![Role::new("Registrant"), Role::new("Verifier")];
    let reg = registry();
    let validator = PolicyValidator::new(&reg);
    let first = validator.validate(&tree, &roles, &routes);
    let second = validator.validate(&tree, &roles, &routes);
    assert_eq!(first, second);
    assert!(first.is_valid());
    assert_eq!(first.blocks.len(), 4);

    let instance = PolicyInstance::publish(definition("p", root, routes), &reg, PolicyMode::DryRun).unwrap();
    assert!(instance.is_dry_run());
    assert_eq!(instance.tree.len(), 4);
}

#[test]
fn report_serializes_with_camel_case_keys() {
    let root = BlockConfig::new("root", "container").with_child(BlockConfig::new("", "step"));
    let reg = registry();
    let report = PolicyValidator::new(&reg).validate(&PolicyTree::new(root), &[], &[]);
    assert_eq!(report.errors, vec!["UUID is not set".to_string()]);
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["blocks"][0]["isValid"], json!(true));
}
