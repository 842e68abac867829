//! `requestVcDocumentBlock`: punto de entrada de documentos enviados por un
//! usuario. El contenido ya llega validado contra el esquema; aquí sólo se
//! normaliza y se identifica por su digest.
use policy_core::constants::RUN_EVENT;
use policy_core::{BlockConfig, BlockError, BlockOutcome, BlockRunContext, BlockValidation, ValidationContext};
use serde_json::{json, Value};

use super::document_hash;

pub fn validate(block: &BlockConfig, _ctx: &ValidationContext<'_>) -> BlockValidation {
    let mut v = BlockValidation::default();
    v.require_option(block, "schema");
    if block.option_bool("preset") {
        v.require_option(block, "presetSchema");
    }
    if block.option_str("idType").is_some_and(|t| !matches!(t, "UUID" | "DID" | "OWNER")) {
        v.warning("Option \"idType\" should be one of UUID, DID, OWNER");
    }
    v
}

pub fn run(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    if !ctx.payload.is_object() {
        return Err(BlockError::InvalidInput("document must be a JSON object".into()));
    }
    let schema = ctx.block
                    .option_str("schema")
                    .ok_or_else(|| BlockError::MissingOption("schema".into()))?;
    let hash = document_hash(&ctx.payload);
    let submitted = ctx.state.payload.get("submitted").and_then(Value::as_u64).unwrap_or(0) + 1;

    let state = json!({ "submitted": submitted, "lastHash": hash });
    let output = json!({
        "id": hash,
        "hash": hash,
        "schema": schema,
        "owner": ctx.user.id,
        "document": ctx.payload,
    });
    Ok(BlockOutcome::active(state, output).emit(RUN_EVENT))
}
