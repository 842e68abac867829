//! `switchBlock`: enrutamiento condicional. Cada condición lleva un `tag`
//! (evento a emitir), un `type` (`equal`, `not_equal`, `unconditional`) y
//! una expresión `value` evaluada sobre los campos del documento.
//! `executionFlow`: `firstTrue` (por defecto) o `allTrue`.
use policy_core::{BlockConfig, BlockError, BlockOutcome, BlockRunContext, BlockValidation, ValidationContext};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::expression::{self, variables_from};

#[derive(Debug, Clone, Deserialize)]
struct Condition {
    #[serde(default)]
    tag: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(default)]
    value: Option<String>,
}

fn default_kind() -> String {
    "equal".to_string()
}

fn conditions(block: &BlockConfig) -> Result<Vec<Condition>, String> {
    match block.option("conditions") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| e.to_string()),
    }
}

fn first_true(block: &BlockConfig) -> bool {
    block.option_str("executionFlow") != Some("allTrue")
}

pub fn validate(block: &BlockConfig, _ctx: &ValidationContext<'_>) -> BlockValidation {
    let mut v = BlockValidation::default();
    if let Some(flow) = block.option_str("executionFlow") {
        if !matches!(flow, "firstTrue" | "allTrue") {
            v.error(format!("Unknown execution flow {flow}"));
        }
    }
    let conds = match conditions(block) {
        Ok(c) => c,
        Err(e) => {
            v.error(format!("Invalid conditions: {e}"));
            return v;
        }
    };
    if conds.is_empty() {
        v.error("Option \"conditions\" is not set");
    }
    for (i, cond) in conds.iter().enumerate() {
        if cond.tag.is_empty() {
            v.error(format!("Condition {i}: tag is not set"));
        }
        match cond.kind.as_str() {
            "unconditional" => {}
            "equal" | "not_equal" => match cond.value.as_deref() {
                None => v.error(format!("Condition {i}: value is not set")),
                Some(src) => {
                    if let Err(e) = expression::parse(src) {
                        v.error(format!("Condition {i}: {e}"));
                    }
                }
            },
            other => v.error(format!("Condition {i}: unknown type {other}")),
        }
    }
    v
}

pub fn run(ctx: &BlockRunContext) -> Result<BlockOutcome, BlockError> {
    let conds = conditions(&ctx.block).map_err(|e| BlockError::Failed(format!("invalid conditions: {e}")))?;
    // el documento puede llegar envuelto por un bloque anterior
    let fields = ctx.payload.get("document").unwrap_or(&ctx.payload);
    let vars = variables_from(fields);

    let mut matched = Vec::new();
    for cond in &conds {
        let hit = match cond.kind.as_str() {
            "unconditional" => true,
            kind => {
                let src = cond.value.as_deref().unwrap_or_default();
                let value = expression::evaluate(src, &vars).map_err(|e| BlockError::InvalidInput(format!("{}: {e}", cond.tag)))?;
                (value != 0.0) == (kind == "equal")
            }
        };
        if hit {
            matched.push(cond.tag.clone());
            if first_true(&ctx.block) {
                break;
            }
        }
    }

    let state = json!({ "matched": matched });
    let mut outcome = BlockOutcome::active(state, ctx.payload.clone());
    for tag in &matched {
        outcome = outcome.emit(tag);
    }
    Ok(outcome)
}
