//! Deterministic store layout rooted at one directory.
//!
//! Everything the engine persists lives under this root; no other process
//! state exists.  The tree:
//!
//! ```text
//! config.toml
//! .version-control/               git history (GIT_DIR)
//! index/master.md                 L0
//! index/weekly/YYYY-Www.md
//! index/monthly/YYYY-MM.md
//! entities/<id>.yaml
//! components/<type>/<key>/{summary.md, changelog.yaml, raw/}
//! changelogs/YYYY-MM.yaml         global month-bucketed log
//! scratch/YYYY-MM-DD.yaml
//! snapshot.yaml
//! sync/{sync-state.yaml, workspace-backup/}
//! archive/components/<type>/<key>/changelog-archived-YYYY-MM.yaml
//! ingest-state.yaml  decay-state.yaml  access-log.yaml
//! summarizer-state.yaml  system-state.yaml
//! .search-index/                  embedded BM25 index (git-ignored)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;

use crate::schema::ComponentKind;

#[derive(Debug, Clone)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.open-palace`, or the current directory's `.open-palace` when no
    /// home directory is resolvable.
    pub fn default_root() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".open-palace")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn git_dir(&self) -> PathBuf {
        self.root.join(".version-control")
    }

    pub fn gitignore_file(&self) -> PathBuf {
        self.root.join(".gitignore")
    }

    // ── Index ──────────────────────────────────────────────────────────────

    pub fn index_master(&self) -> PathBuf {
        self.root.join("index").join("master.md")
    }

    pub fn weekly_report(&self, year_week: &str) -> PathBuf {
        self.weekly_dir().join(format!("{year_week}.md"))
    }

    pub fn weekly_dir(&self) -> PathBuf {
        self.root.join("index").join("weekly")
    }

    pub fn monthly_report(&self, year_month: &str) -> PathBuf {
        self.root.join("index").join("monthly").join(format!("{year_month}.md"))
    }

    // ── Entities ───────────────────────────────────────────────────────────

    pub fn entities_dir(&self) -> PathBuf {
        self.root.join("entities")
    }

    pub fn entity_file(&self, entity_id: &str) -> PathBuf {
        self.entities_dir().join(format!("{entity_id}.yaml"))
    }

    // ── Components ─────────────────────────────────────────────────────────

    pub fn components_dir(&self) -> PathBuf {
        self.root.join("components")
    }

    pub fn component_type_dir(&self, kind: ComponentKind) -> PathBuf {
        self.components_dir().join(kind.dir())
    }

    pub fn component_dir(&self, kind: ComponentKind, key: &str) -> PathBuf {
        self.component_type_dir(kind).join(key)
    }

    pub fn component_summary(&self, kind: ComponentKind, key: &str) -> PathBuf {
        self.component_dir(kind, key).join("summary.md")
    }

    pub fn component_changelog(&self, kind: ComponentKind, key: &str) -> PathBuf {
        self.component_dir(kind, key).join("changelog.yaml")
    }

    pub fn component_raw_dir(&self, kind: ComponentKind, key: &str) -> PathBuf {
        self.component_dir(kind, key).join("raw")
    }

    /// Relationship profile document, stored inside the backing component.
    pub fn relationship_profile(&self, entity_id: &str) -> PathBuf {
        self.component_dir(ComponentKind::Relationships, entity_id)
            .join("profile.yaml")
    }

    // ── Changelog / scratch / snapshot ─────────────────────────────────────

    pub fn changelogs_dir(&self) -> PathBuf {
        self.root.join("changelogs")
    }

    pub fn global_changelog(&self, year_month: &str) -> PathBuf {
        self.changelogs_dir().join(format!("{year_month}.yaml"))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn scratch_file(&self, date: NaiveDate) -> PathBuf {
        self.scratch_dir().join(format!("{}.yaml", date.format("%Y-%m-%d")))
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join("snapshot.yaml")
    }

    // ── Sync / archive / state ─────────────────────────────────────────────

    pub fn sync_state(&self) -> PathBuf {
        self.root.join("sync").join("sync-state.yaml")
    }

    pub fn workspace_backup_dir(&self) -> PathBuf {
        self.root.join("sync").join("workspace-backup")
    }

    pub fn archive_changelog(&self, kind: ComponentKind, key: &str, year_month: &str) -> PathBuf {
        self.root
            .join("archive")
            .join("components")
            .join(kind.dir())
            .join(key)
            .join(format!("changelog-archived-{year_month}.yaml"))
    }

    pub fn ingest_state(&self) -> PathBuf {
        self.root.join("ingest-state.yaml")
    }

    pub fn decay_state(&self) -> PathBuf {
        self.root.join("decay-state.yaml")
    }

    pub fn access_log(&self) -> PathBuf {
        self.root.join("access-log.yaml")
    }

    pub fn summarizer_state(&self) -> PathBuf {
        self.root.join("summarizer-state.yaml")
    }

    pub fn system_state(&self) -> PathBuf {
        self.root.join("system-state.yaml")
    }

    pub fn search_index_dir(&self) -> PathBuf {
        self.root.join(".search-index")
    }

    /// Create the directory skeleton.  Idempotent.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.root.join("index"),
            self.weekly_dir(),
            self.root.join("index").join("monthly"),
            self.entities_dir(),
            self.components_dir(),
            self.changelogs_dir(),
            self.scratch_dir(),
            self.root.join("sync"),
            self.workspace_backup_dir(),
            self.root.join("archive").join("components"),
        ] {
            fs::create_dir_all(dir)?;
        }
        for kind in ComponentKind::ALL {
            fs::create_dir_all(self.component_type_dir(kind))?;
        }
        if !self.gitignore_file().exists() {
            fs::write(self.gitignore_file(), ".search-index/\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        paths.ensure_layout().unwrap();
        paths.ensure_layout().unwrap();
        assert!(paths.components_dir().is_dir());
        assert!(paths.component_type_dir(ComponentKind::Projects).is_dir());
        assert!(paths.scratch_dir().is_dir());
        assert_eq!(
            std::fs::read_to_string(paths.gitignore_file()).unwrap(),
            ".search-index/\n"
        );
    }

    #[test]
    fn archive_path_shape() {
        let paths = StorePaths::new("/store");
        let p = paths.archive_changelog(ComponentKind::Projects, "alpha", "2026-08");
        assert_eq!(
            p,
            PathBuf::from("/store/archive/components/projects/alpha/changelog-archived-2026-08.yaml")
        );
    }

    #[test]
    fn buckets_embed_in_file_names() {
        let paths = StorePaths::new("/store");
        assert_eq!(
            paths.global_changelog("2026-08"),
            PathBuf::from("/store/changelogs/2026-08.yaml")
        );
        assert_eq!(
            paths.weekly_report("2026-W31"),
            PathBuf::from("/store/index/weekly/2026-W31.md")
        );
        let day = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();
        assert_eq!(
            paths.scratch_file(day),
            PathBuf::from("/store/scratch/2026-08-02.yaml")
        );
    }
}
