//! The store façade: one struct owning every sub-engine, with the
//! operation groups split across sibling modules as `impl` blocks.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;

use crate::access::AccessLog;
use crate::ids::IdService;
use crate::index::MasterIndex;
use crate::paths::StorePaths;

mod changelog;
mod component;
mod entity;
mod relationship;
mod scratch;
mod snapshot;

pub use changelog::{ChangelogQuery, RecordInput, TimeRange};
pub use component::{ComponentInfo, LoadedComponent};
pub use relationship::ProfileUpdate;
pub use scratch::{ScratchRead, ScratchStats, ScratchWrite};
pub use snapshot::SnapshotInput;

pub struct MemoryStore {
    paths: StorePaths,
    ids: IdService,
    index: MasterIndex,
    access: AccessLog,
    /// Component scopes marked loaded in-process.  Not persisted.
    loaded: Mutex<HashSet<String>>,
}

impl MemoryStore {
    /// Open (and lay out) the store rooted at `paths`.
    pub fn open(paths: StorePaths) -> Result<Self> {
        paths.ensure_layout()?;
        let index = MasterIndex::new(paths.clone());
        index.ensure_initialized()?;
        Ok(Self {
            ids: IdService::new(paths.clone()),
            access: AccessLog::new(paths.clone()),
            index,
            paths,
            loaded: Mutex::new(HashSet::new()),
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn ids(&self) -> &IdService {
        &self.ids
    }

    pub fn index(&self) -> &MasterIndex {
        &self.index
    }

    pub fn access(&self) -> &AccessLog {
        &self.access
    }

    pub fn loaded_scopes(&self) -> Vec<String> {
        let mut scopes = self
            .loaded
            .lock()
            .expect("loaded set lock")
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        scopes.sort();
        scopes
    }

    pub(crate) fn mark_loaded(&self, scope: &str) {
        self.loaded
            .lock()
            .expect("loaded set lock")
            .insert(scope.to_string());
    }

    pub(crate) fn mark_unloaded(&self, scope: &str) -> bool {
        self.loaded.lock().expect("loaded set lock").remove(scope)
    }
}
