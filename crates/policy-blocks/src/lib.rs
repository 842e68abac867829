//! policy-blocks: tipos de bloque incluidos y el registro por defecto.
//!
//! Cada tipo es un par de funciones `validate` / `run` registradas como
//! `BlockBehavior` en `builtin_registry()`.

pub mod blocks;
pub mod expression;

use policy_core::{BlockBehavior, BlockRegistry, CoreEngineError};

pub const INTERFACE_CONTAINER: &str = "interfaceContainerBlock";
pub const POLICY_ROLES: &str = "policyRolesBlock";
pub const REQUEST_VC_DOCUMENT: &str = "requestVcDocumentBlock";
pub const EXTERNAL_DATA: &str = "externalDataBlock";
pub const SEND_TO_GUARDIAN: &str = "sendToGuardianBlock";
pub const APPROVAL: &str = "approvalBlock";
pub const SWITCH: &str = "switchBlock";
pub const CUSTOM_LOGIC: &str = "customLogicBlock";

/// Tabla de tipos incluidos.
pub fn builtin_behaviors() -> Vec<BlockBehavior> {
    use blocks::*;
    vec![BlockBehavior { block_type: INTERFACE_CONTAINER,
                         validate: container::validate,
                         run: container::run },
         BlockBehavior { block_type: POLICY_ROLES,
                         validate: roles::validate,
                         run: roles::run },
         BlockBehavior { block_type: REQUEST_VC_DOCUMENT,
                         validate: document::validate,
                         run: document::run },
         BlockBehavior { block_type: EXTERNAL_DATA,
                         validate: external_data::validate,
                         run: external_data::run },
         BlockBehavior { block_type: SEND_TO_GUARDIAN,
                         validate: send::validate,
                         run: send::run },
         BlockBehavior { block_type: APPROVAL,
                         validate: approval::validate,
                         run: approval::run },
         BlockBehavior { block_type: SWITCH,
                         validate: switch::validate,
                         run: switch::run },
         BlockBehavior { block_type: CUSTOM_LOGIC,
                         validate: custom_logic::validate,
                         run: custom_logic::run },]
}

/// Agrega los tipos incluidos a un registro existente (que puede traer
/// tipos propios de la aplicación).
pub fn register_builtins(registry: &mut BlockRegistry) -> Result<(), CoreEngineError> {
    for behavior in builtin_behaviors() {
        registry.register(behavior)?;
    }
    Ok(())
}

pub fn builtin_registry() -> Result<BlockRegistry, CoreEngineError> {
    let mut registry = BlockRegistry::new();
    register_builtins(&mut registry)?;
    log::debug!("builtin registry ready: {:?}", registry.block_types());
    Ok(registry)
}
