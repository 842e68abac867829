//! `approvalBlock`: retiene un documento hasta que un revisor decide.
//!
//! `RunEvent` deja el documento pendiente (`WaitingForInput`); las entradas
//! manuales `approve` / `reject` lo cierran en `Terminal("approved")` o
//! `Terminal("rejected")` y emiten el evento homónimo. Un documento nuevo
//! abre otra ronda aunque la anterior haya terminado.
use policy_core::constants::RUN_EVENT;
use policy_core::{BlockConfig, BlockError, BlockOutcome, BlockRunContext, BlockStatus, BlockValidation, ValidationContext};
use serde_json::{json, Value};

use crate::INTERFACE_CONTAINER;

pub const APPROVE_INPUT: &str = "approve";
pub const REJECT_INPUT: &str = "reject";
pub const APPROVED: &str = "approved";
pub const REJECTED: &str = "rejected";

pub fn validate(block: &BlockConfig, ctx: &ValidationContext<'_>) -> BlockValidation {
    let mut v = BlockValidation::default();
    if !ctx.has_ancestor_of_type(INTERFACE_CONTAINER) {
        v.error(format!("Block must be inside an {INTERFACE_CONTAINER}"));
    }
    if !block.is_shared() {
        v.warning("Approval state is per user; set \"shared\" so reviewers see submitted documents");
    }
    v
}

pub fn run(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    let round = ctx.state.payload.get("round").and_then(Value::as_u64).unwrap_or(0);
    match ctx.input.as_str() {
        RUN_EVENT => {
            let state = json!({ "round": round + 1, "document": ctx.payload });
            Ok(BlockOutcome::active(state, Value::Null).with_status(BlockStatus::WaitingForInput))
        }
        APPROVE_INPUT | REJECT_INPUT => {
            if ctx.state.status != BlockStatus::WaitingForInput {
                return Err(BlockError::InvalidInput("no document awaiting a decision".into()));
            }
            let decision = if ctx.input == APPROVE_INPUT { APPROVED } else { REJECTED };
            let document = ctx.state.payload.get("document").cloned().unwrap_or(Value::Null);
            let reason = ctx.payload.get("reason").cloned().unwrap_or(Value::Null);
            let state = json!({ "round": round, "document": document, "decision": decision, "decidedBy": ctx.user.id });
            // la salida es el documento con la decisión incorporada
            let mut output = document;
            match output.as_object_mut() {
                Some(obj) => {
                    obj.insert("decision".into(), json!(decision));
                    obj.insert("decidedBy".into(), json!(ctx.user.id));
                    obj.insert("reason".into(), reason);
                }
                None => output = json!({ "decision": decision, "decidedBy": ctx.user.id, "reason": reason, "document": output }),
            }
            Ok(BlockOutcome::active(state, output).with_status(BlockStatus::Terminal(decision.to_string()))
                                                  .emit(decision))
        }
        other => Err(BlockError::InvalidInput(format!("unsupported input {other}"))),
    }
}
