pub mod conflict;
pub mod engine;
pub mod file_state;
pub mod keeper;
pub mod reconciler;
pub mod scanner;
pub mod snapshot;
pub mod tombstone;
pub mod transfer;

pub use conflict::{ConflictInfo, ConflictRecord, ConflictWinner};
pub use engine::{ActionFailure, PeerOutcome, SessionPlan, SyncEngine, SyncReport, SyncStatus};
pub use file_state::{StateStore, SNAPSHOT_RECORD, TOMBSTONE_RECORD};
pub use keeper::{RefreshReport, StateKeeper};
pub use reconciler::{
    ActionKind, ActionSummary, ModifyTimes, NoOpReason, ReconcileInput, ReconcileOptions,
    Reconciler, SyncAction, TimeTable,
};
pub use scanner::{FileScanner, ScanResult};
pub use snapshot::{ContentFingerprint, PathKey, Snapshot, StoredSnapshot, TombstoneSet, STATE_DIR};
pub use tombstone::{TombstoneTracker, TrackedState};
pub use transfer::{Transfer, TransferOutcome};
