//! `externalDataBlock`: recibe documentos de sistemas externos (sensores,
//! MRV) y los envuelve para el resto de la cadena.
use policy_core::constants::RUN_EVENT;
use policy_core::{BlockConfig, BlockError, BlockOutcome, BlockRunContext, BlockValidation, ValidationContext};
use serde_json::json;

use super::document_hash;

pub fn validate(block: &BlockConfig, _ctx: &ValidationContext<'_>) -> BlockValidation {
    let mut v = BlockValidation::default();
    if block.option_str("schema").is_none() {
        v.warning("Option \"schema\" is not set; documents are not tied to a schema");
    }
    v
}

pub fn run(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    if ctx.payload.is_null() {
        return Err(BlockError::InvalidInput("empty external document".into()));
    }
    let hash = document_hash(&ctx.payload);
    let output = json!({
        "id": hash,
        "hash": hash,
        "schema": ctx.block.option_str("schema"),
        "source": "external",
        "owner": ctx.user.id,
        "document": ctx.payload,
    });
    Ok(BlockOutcome::active(json!({ "lastHash": hash }), output).emit(RUN_EVENT))
}
