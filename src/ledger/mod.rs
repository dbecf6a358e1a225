//! Cluster full-state ledger.
//!
//! The ledger is the node-local, replicated record of realtime rooms,
//! per-node subscriber counts, and auth-strategy registrations. Peers
//! exchange only asynchronous, unordered diff messages; consistency is
//! detected (fatal desync) rather than enforced, and reconciliation happens
//! through out-of-band full-state resynchronization.

pub mod diff;
pub mod full_state;
pub mod history;
pub mod room;

pub use diff::StateDiff;
pub use full_state::{
    DesyncError, FullState, FullStateSnapshot, IgnoreReason, MutationOutcome,
};
pub use history::{HistorySettings, SyncHistoryBuffer, SyncHistoryEntry};
pub use room::{NodeEntry, Room, RoomFilters};
