//! Savepoints de dry-run: journal append-only de diffs encadenados por
//! fuente, con restore, rollback y discard.

pub mod manager;
pub mod session;
pub mod snapshot;

pub use manager::{CheckpointSummary, RestoreSummary, RollbackSummary, SavepointManager};
pub use session::DryRunSession;
pub use snapshot::{CheckpointRecord, DryRunSavepointSnapshot, LinkKind, LinkOptions, SavepointInfo};
