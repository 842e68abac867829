//! Modelo de configuración (bloques, árbol, roles) y estado de ejecución.
//!
//! Todo lo de este módulo es dato puro + consultas estructurales: no hay
//! efectos secundarios. El `PolicyTree` es inmutable una vez publicado.

pub mod block;
pub mod policy;
pub mod role;
pub mod state;
pub mod tree;

pub use block::{BlockConfig, EventBinding};
pub use policy::{dry_run_scope, EntryRoute, PolicyDefinition, PolicyInstance, PolicyMode};
pub use role::{PolicyUser, Role, ANY_ROLE, NO_ROLE, OWNER};
pub use state::{BlockState, BlockStateSavepoint, BlockStatus, StateKey};
pub use tree::{NodeRef, PolicyTree};
