//! policy-core: intérprete de políticas por bloques con savepoints de dry-run.
pub mod constants;
pub mod diff;
pub mod engine;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod model;
pub mod registry;
pub mod savepoint;
pub mod store;
pub mod validator;

pub use diff::{apply_diff, diff_collections, invert_diff, verify_diff, CollectionDiff, CollectionRow, DiffAction, DiffActionKind};
pub use engine::{replay, ExecutionReport, ExternalDocument, PolicyRuntime, RecordedAction, Recorder, RuntimeContext, RuntimeOptions};
pub use errors::{BlockRuntimeError, CoreEngineError, PermissionError, StoreError};
pub use event::{AuditEvent, AuditEventKind, AuditStore, InMemoryAuditStore};
pub use model::{BlockConfig, BlockState, BlockStatus, EntryRoute, EventBinding, PolicyDefinition, PolicyInstance, PolicyMode, PolicyTree,
                PolicyUser, Role};
pub use registry::{BlockBehavior, BlockError, BlockOutcome, BlockRegistry, BlockRunContext};
pub use savepoint::{DryRunSession, SavepointManager};
pub use store::{CollectionStore, CollectionWrite, InMemoryCollectionStore, InMemorySnapshotStore, InMemoryStateStore, SnapshotStore,
                StateStore};
pub use validator::{BlockValidation, PolicyValidator, ValidationContext, ValidationReport};
