//! `interfaceContainerBlock`: agrupa bloques hijos. No transforma nada;
//! reenvía lo que recibe.
use policy_core::constants::RUN_EVENT;
use policy_core::{BlockConfig, BlockError, BlockOutcome, BlockRunContext, BlockValidation, ValidationContext};

pub fn validate(block: &BlockConfig, _ctx: &ValidationContext<'_>) -> BlockValidation {
    let mut v = BlockValidation::default();
    if block.children.is_empty() {
        v.error("Block must have at least one child");
    }
    if let Some(layout) = block.option_str("layout") {
        if !matches!(layout, "blank" | "tabs") {
            v.warning(format!("Unknown layout {layout}"));
        }
    }
    v
}

pub fn run(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    Ok(BlockOutcome::active(ctx.state.payload.clone(), ctx.payload.clone()).emit(RUN_EVENT))
}
