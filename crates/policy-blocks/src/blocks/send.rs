//! `sendToGuardianBlock`: persiste el documento en una colección del working
//! set (la que diffean los savepoints de dry-run).
use policy_core::constants::RUN_EVENT;
use policy_core::{BlockConfig, BlockError, BlockOutcome, BlockRunContext, BlockValidation, CollectionWrite, ValidationContext};
use serde_json::{json, Value};

pub fn validate(block: &BlockConfig, _ctx: &ValidationContext<'_>) -> BlockValidation {
    let mut v = BlockValidation::default();
    v.require_option(block, "dataSource");
    v
}

fn row_id(payload: &Value) -> Option<&str> {
    payload.get("id")
           .and_then(Value::as_str)
           .or_else(|| payload.get("hash").and_then(Value::as_str))
}

pub fn run(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    let source = ctx.block
                    .option_str("dataSource")
                    .ok_or_else(|| BlockError::MissingOption("dataSource".into()))?;
    let id = row_id(&ctx.payload).ok_or_else(|| BlockError::InvalidInput("document has no id or hash".into()))?;

    let mut row = ctx.payload.clone();
    if let (Some(obj), Some(status)) = (row.as_object_mut(), ctx.block.option_str("documentStatus")) {
        obj.insert("status".into(), json!(status));
    }
    let sent = ctx.state.payload.get("sent").and_then(Value::as_u64).unwrap_or(0) + 1;
    log::debug!("{}: storing {} in {} (dry run: {})", ctx.policy_id, id, source, ctx.dry_run);

    Ok(BlockOutcome::active(json!({ "sent": sent, "lastId": id }), row.clone()).write(CollectionWrite::upsert(source, id, row))
                                                                              .emit(RUN_EVENT))
}
