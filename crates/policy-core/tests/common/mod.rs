#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use policy_core::registry::no_validation;
use policy_core::{BlockBehavior, BlockConfig, BlockError, BlockOutcome, BlockRegistry, BlockRunContext, CollectionWrite, EntryRoute,
                  PolicyDefinition, PolicyInstance, PolicyMode, Role, RuntimeContext, RuntimeOptions};
use serde_json::{json, Value};

/// Bloque de prueba: cuenta ejecuciones, reenvía el payload y emite `ok`.
/// Opciones: `fail`, `panic`, `sleepMs`, `writeTo` (fuente donde guardar
/// el payload bajo `payload.id`).
pub fn step(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    if ctx.block.option_bool("fail") {
        return Err(BlockError::Failed("boom".into()));
    }
    if ctx.block.option_bool("panic") {
        panic!("kaboom");
    }
    if let Some(ms) = ctx.block.option("sleepMs").and_then(Value::as_u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
    let runs = ctx.state.payload.get("runs").and_then(Value::as_u64).unwrap_or(0) + 1;
    let state = json!({ "runs": runs, "last": ctx.payload, "user": ctx.user.id });
    let output = json!({ "from": ctx.block.uuid, "input": ctx.payload });
    let mut outcome = BlockOutcome::active(state, output).emit("ok");
    if let (Some(source), Some(id)) = (ctx.block.option_str("writeTo"), ctx.payload.get("id").and_then(Value::as_str)) {
        outcome = outcome.write(CollectionWrite::upsert(source, id, ctx.payload.clone()));
    }
    Ok(outcome)
}

fn quiet(_: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    Ok(BlockOutcome::active(Value::Null, Value::Null))
}

pub fn registry() -> Arc<BlockRegistry> {
    let mut reg = BlockRegistry::new();
    reg.register(BlockBehavior { block_type: "step",
                                 validate: no_validation,
                                 run: step })
       .unwrap();
    reg.register(BlockBehavior { block_type: "container",
                                 validate: no_validation,
                                 run: quiet })
       .unwrap();
    Arc::new(reg)
}

pub fn definition(policy_id: &str, root: BlockConfig, routes: Vec<EntryRoute>) -> PolicyDefinition {
    PolicyDefinition { policy_id: policy_id.to_string(),
                       owner: Some("owner".into()),
                       roles: vec![Role::new("Registrant"), Role::new("Verifier")],
                       root,
                       routes }
}

pub fn context(policy_id: &str, root: BlockConfig, routes: Vec<EntryRoute>, mode: PolicyMode) -> RuntimeContext {
    let reg = registry();
    let instance = PolicyInstance::publish(definition(policy_id, root, routes), &reg, mode).expect("publish");
    RuntimeContext::new(instance, reg).with_options(RuntimeOptions { block_timeout: Duration::from_millis(500),
                                                                     lock_timeout: Duration::from_millis(2_000),
                                                                     store_retries: 3 })
}

/// `root(container) -> [a, b, c]` con `a.ok -> b.run` y `b.ok -> c.run`,
/// y una ruta abierta hacia `a`.
pub fn chain_abc() -> (BlockConfig, Vec<EntryRoute>) {
    let root = BlockConfig::new("root", "container").with_permissions(&["ANY_ROLE"])
                                                    .with_child(BlockConfig::new("a", "step").active().with_event("ok", "b", "run"))
                                                    .with_child(BlockConfig::new("b", "step").with_event("ok", "c", "run"))
                                                    .with_child(BlockConfig::new("c", "step"));
    (root, vec![EntryRoute::new(None, None, "a")])
}
