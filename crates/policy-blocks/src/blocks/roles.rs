//! `policyRolesBlock`: el usuario elige uno de los roles ofrecidos.
use policy_core::constants::RUN_EVENT;
use policy_core::{BlockConfig, BlockError, BlockOutcome, BlockRunContext, BlockValidation, Role, ValidationContext};
use serde_json::{json, Value};

fn offered(block: &BlockConfig) -> Vec<&str> {
    block.option("roles")
         .and_then(Value::as_array)
         .map(|roles| roles.iter().filter_map(Value::as_str).collect())
         .unwrap_or_default()
}

pub fn validate(block: &BlockConfig, ctx: &ValidationContext<'_>) -> BlockValidation {
    let mut v = BlockValidation::default();
    let roles = offered(block);
    if roles.is_empty() {
        v.error("Option \"roles\" is not set");
    }
    for role in roles {
        if !ctx.role_exists(&Role::new(role)) {
            v.error(format!("Role {role} not exist"));
        }
    }
    v
}

pub fn run(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    let chosen = ctx.payload
                    .get("role")
                    .and_then(Value::as_str)
                    .ok_or_else(|| BlockError::InvalidInput("payload has no \"role\"".into()))?;
    if !offered(&ctx.block).contains(&chosen) {
        return Err(BlockError::InvalidInput(format!("role {chosen} is not offered")));
    }
    log::debug!("{}: user {} selected role {}", ctx.policy_id, ctx.user.id, chosen);
    let state = json!({ "role": chosen });
    let output = json!({ "userId": ctx.user.id, "role": chosen });
    Ok(BlockOutcome::active(state, output).emit(RUN_EVENT))
}
