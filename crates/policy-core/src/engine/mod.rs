//! Runtime de políticas: contexto explícito, locks por usuario, cascada de
//! eventos y grabación/replay de entradas.

pub mod context;
pub mod locks;
pub mod recording;
pub mod report;
pub mod runtime;

pub use context::{RuntimeContext, RuntimeOptions};
pub use locks::UserLocks;
pub use recording::{replay, RecordedAction, RecordedItem, Recorder};
pub use report::{ExecutionRecord, ExecutionReport};
pub use runtime::{ExternalDocument, PolicyRuntime};
