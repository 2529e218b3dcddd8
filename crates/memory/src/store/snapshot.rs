//! Snapshot: the singleton working-state document.
//!
//! Overwrite-only.  Fields not supplied on save are inherited from the
//! previous snapshot so agents can refresh their focus without restating
//! everything.

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;

use crate::doc;
use crate::error::PalaceError;
use crate::schema::{ActiveTask, Snapshot};

use super::MemoryStore;

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotInput {
    pub current_focus: String,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub active_tasks: Option<Vec<ActiveTask>>,
    #[serde(default)]
    pub blockers: Option<Vec<String>>,
    #[serde(default)]
    pub recent_decisions: Option<Vec<String>>,
    #[serde(default)]
    pub context_notes: Option<String>,
    #[serde(default)]
    pub session_meta: Option<serde_yaml::Value>,
}

impl MemoryStore {
    pub fn snapshot_save(&self, input: SnapshotInput) -> Result<Snapshot> {
        if input.current_focus.trim().is_empty() {
            return Err(
                PalaceError::InvalidArgument("current_focus is required".to_string()).into(),
            );
        }

        let previous = self.snapshot_read()?;
        let inherit = |current: Option<Vec<String>>, prior: fn(&Snapshot) -> Vec<String>| {
            current.unwrap_or_else(|| previous.as_ref().map(prior).unwrap_or_default())
        };

        let snapshot = Snapshot {
            updated_at: Utc::now(),
            updated_by: input
                .updated_by
                .or_else(|| previous.as_ref().and_then(|p| p.updated_by.clone())),
            current_focus: input.current_focus,
            active_tasks: input.active_tasks.unwrap_or_else(|| {
                previous.as_ref().map(|p| p.active_tasks.clone()).unwrap_or_default()
            }),
            blockers: inherit(input.blockers, |p| p.blockers.clone()),
            recent_decisions: inherit(input.recent_decisions, |p| p.recent_decisions.clone()),
            context_notes: input.context_notes.unwrap_or_else(|| {
                previous.as_ref().map(|p| p.context_notes.clone()).unwrap_or_default()
            }),
            session_meta: input
                .session_meta
                .or_else(|| previous.as_ref().and_then(|p| p.session_meta.clone())),
        };

        doc::write(&self.paths.snapshot_file(), &snapshot)?;
        Ok(snapshot)
    }

    pub fn snapshot_read(&self) -> Result<Option<Snapshot>> {
        doc::read_opt(&self.paths.snapshot_file())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::open_store;
    use super::*;
    use crate::schema::{TaskPriority, TaskStatus};

    fn base_input() -> SnapshotInput {
        SnapshotInput {
            current_focus: "ship the decay engine".to_string(),
            updated_by: Some("main".to_string()),
            active_tasks: Some(vec![ActiveTask {
                description: "write archive tests".to_string(),
                status: TaskStatus::Active,
                priority: Some(TaskPriority::High),
                blockers: None,
            }]),
            blockers: Some(vec!["waiting on review".to_string()]),
            recent_decisions: None,
            context_notes: Some("threshold still debated".to_string()),
            session_meta: None,
        }
    }

    #[test]
    fn save_then_read_round_trips() {
        let (_dir, store) = open_store();
        store.snapshot_save(base_input()).unwrap();
        let snapshot = store.snapshot_read().unwrap().unwrap();
        assert_eq!(snapshot.current_focus, "ship the decay engine");
        assert_eq!(snapshot.active_tasks.len(), 1);
        assert_eq!(snapshot.active_tasks[0].status, TaskStatus::Active);
    }

    #[test]
    fn unsupplied_fields_inherit_from_previous() {
        let (_dir, store) = open_store();
        store.snapshot_save(base_input()).unwrap();
        store
            .snapshot_save(SnapshotInput {
                current_focus: "new focus".to_string(),
                updated_by: None,
                active_tasks: None,
                blockers: None,
                recent_decisions: None,
                context_notes: None,
                session_meta: None,
            })
            .unwrap();

        let snapshot = store.snapshot_read().unwrap().unwrap();
        assert_eq!(snapshot.current_focus, "new focus");
        // Everything else carried over.
        assert_eq!(snapshot.updated_by.as_deref(), Some("main"));
        assert_eq!(snapshot.active_tasks.len(), 1);
        assert_eq!(snapshot.blockers, vec!["waiting on review"]);
        assert_eq!(snapshot.context_notes, "threshold still debated");
    }

    #[test]
    fn empty_focus_is_rejected() {
        let (_dir, store) = open_store();
        let mut input = base_input();
        input.current_focus = "  ".to_string();
        assert!(store.snapshot_save(input).is_err());
    }

    #[test]
    fn read_before_first_save_is_none() {
        let (_dir, store) = open_store();
        assert!(store.snapshot_read().unwrap().is_none());
    }

    #[test]
    fn supplied_empty_list_overrides_rather_than_inherits() {
        let (_dir, store) = open_store();
        store.snapshot_save(base_input()).unwrap();
        store
            .snapshot_save(SnapshotInput {
                current_focus: "cleared".to_string(),
                updated_by: None,
                active_tasks: Some(vec![]),
                blockers: Some(vec![]),
                recent_decisions: None,
                context_notes: None,
                session_meta: None,
            })
            .unwrap();
        let snapshot = store.snapshot_read().unwrap().unwrap();
        assert!(snapshot.active_tasks.is_empty());
        assert!(snapshot.blockers.is_empty());
    }
}
