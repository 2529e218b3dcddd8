pub mod access;
pub mod doc;
pub mod error;
pub mod events;
pub mod ids;
pub mod index;
pub mod paths;
pub mod schema;
pub mod store;
pub mod vcs;

pub use access::{AccessLog, AccessMap, AccessRecord};
pub use error::PalaceError;
pub use events::{EventHandler, HookBus, MemoryEvent};
pub use ids::{IdService, format_mmdd, iso_now, year_month, year_week};
pub use index::{IndexEntry, MasterIndex};
pub use paths::StorePaths;
pub use schema::{
    ActiveTask, Alternative, ChangelogEntry, ComponentKind, EntityRecord, EntryKind,
    EvolutionEntry, HostMapping, InteractionTag, ProfileDetails, RelationKind,
    RelationshipProfile, ScratchEntry, Snapshot, TaskPriority, TaskStatus, TrustDelta,
    parse_scope,
};
pub use store::{
    ChangelogQuery, ComponentInfo, LoadedComponent, MemoryStore, ProfileUpdate, RecordInput,
    ScratchRead, ScratchStats, ScratchWrite, SnapshotInput, TimeRange,
};
pub use vcs::{CommitHandler, GitBacker};
