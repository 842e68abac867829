//! `customLogicBlock`: calcula un campo nuevo a partir de una expresión
//! aritmética sobre los campos numéricos del documento.
//!
//! La evaluación corre dentro del `run` del bloque, que el runtime ya
//! ejecuta en el pool bloqueante con timeout. Sólo se exponen las
//! variables del documento y las funciones de la lista blanca.
use policy_core::constants::RUN_EVENT;
use policy_core::{BlockConfig, BlockError, BlockOutcome, BlockRunContext, BlockValidation, ValidationContext};
use serde_json::{json, Map, Number, Value};

use crate::expression::{self, variables_from};

const DEFAULT_OUTPUT_FIELD: &str = "result";

fn output_field(block: &BlockConfig) -> &str {
    block.option_str("outputField").unwrap_or(DEFAULT_OUTPUT_FIELD)
}

pub fn validate(block: &BlockConfig, _ctx: &ValidationContext<'_>) -> BlockValidation {
    let mut v = BlockValidation::default();
    v.require_option(block, "expression");
    if let Some(src) = block.option_str("expression") {
        if !src.trim().is_empty() {
            if let Err(e) = expression::parse(src) {
                v.error(format!("Invalid expression: {e}"));
            }
        }
    }
    if output_field(block).is_empty() {
        v.error("Option \"outputField\" is empty");
    }
    v
}

pub fn run(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    let src = ctx.block
                 .option_str("expression")
                 .ok_or_else(|| BlockError::MissingOption("expression".into()))?;
    let expr = expression::parse(src).map_err(|e| BlockError::Failed(format!("invalid expression: {e}")))?;

    // campos del documento envuelto, si lo hay
    let mut output = ctx.payload.clone();
    let wrapped = output.get("document").is_some_and(Value::is_object);
    let target = if wrapped { &mut output["document"] } else { &mut output };
    let value = expr.eval(&variables_from(target)).map_err(|e| BlockError::InvalidInput(e.to_string()))?;
    let number = Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null);

    let field = output_field(&ctx.block).to_string();
    match target.as_object_mut() {
        Some(obj) => {
            obj.insert(field.clone(), number.clone());
        }
        None => {
            let mut obj = Map::new();
            obj.insert(field.clone(), number.clone());
            *target = Value::Object(obj);
        }
    }
    Ok(BlockOutcome::active(json!({ "last": number, "field": field }), output).emit(RUN_EVENT))
}
