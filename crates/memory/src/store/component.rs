//! Component store: typed knowledge modules with a summary, changelog,
//! and an opaque `raw/` subdirectory.

use std::fs;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::access::AccessLog;
use crate::doc;
use crate::error::PalaceError;
use crate::schema::{ChangelogEntry, ComponentKind, parse_scope};

use super::MemoryStore;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub scope: String,
    pub kind: ComponentKind,
    pub key: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedComponent {
    pub scope: String,
    pub summary: String,
    /// Newest 10 changelog entries, time descending.
    pub recent_changelog: Vec<ChangelogEntry>,
}

impl MemoryStore {
    pub fn component_list(&self, kind: Option<ComponentKind>) -> Result<Vec<ComponentInfo>> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => ComponentKind::ALL.to_vec(),
        };
        let mut infos = Vec::new();
        for kind in kinds {
            let dir = self.paths.component_type_dir(kind);
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&dir)
                .map_err(|e| PalaceError::BackingStore(format!("read {}: {e}", dir.display())))?
            {
                let entry = entry.map_err(|e| PalaceError::BackingStore(e.to_string()))?;
                if !entry.path().is_dir() {
                    continue;
                }
                let key = entry.file_name().to_string_lossy().to_string();
                let scope = format!("{}/{key}", kind.dir());
                let entry_count = self.component_entries(&scope).map(|v| v.len()).unwrap_or(0);
                infos.push(ComponentInfo { scope, kind, key, entry_count });
            }
        }
        infos.sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(infos)
    }

    /// Every `<type>/<key>` scope present on disk.
    pub fn component_scopes(&self) -> Result<Vec<String>> {
        Ok(self.component_list(None)?.into_iter().map(|c| c.scope).collect())
    }

    pub fn component_exists(&self, scope: &str) -> bool {
        parse_scope(scope)
            .map(|(kind, key)| self.paths.component_dir(kind, key).is_dir())
            .unwrap_or(false)
    }

    /// Create `<type>/<key>/{summary.md, changelog.yaml, raw/}` and upsert
    /// the L0 row.  Re-creation rewrites the summary; the L0 keeps one line.
    pub fn component_create(
        &self,
        kind: ComponentKind,
        key: &str,
        initial_summary: &str,
    ) -> Result<String> {
        let scope = format!("{}/{key}", kind.dir());
        // Reuse the scope validation (rejects slashes, dot-dot, unknown type).
        parse_scope(&scope)?;

        fs::create_dir_all(self.paths.component_raw_dir(kind, key))
            .map_err(|e| PalaceError::BackingStore(e.to_string()))?;
        doc::write_text(&self.paths.component_summary(kind, key), initial_summary)?;
        let changelog_path = self.paths.component_changelog(kind, key);
        if !changelog_path.exists() {
            doc::write(&changelog_path, &Vec::<ChangelogEntry>::new())?;
        }

        let today = crate::index::MasterIndex::format_date();
        self.index
            .update_entry(kind.tag(), key, &format!("★ active | ⟳{today}"))?;
        Ok(scope)
    }

    /// Summary plus the newest 10 changelog entries; marks the scope loaded
    /// and counts the access.
    pub fn component_load(&self, scope: &str) -> Result<LoadedComponent> {
        let (kind, key) = parse_scope(scope)?;
        let summary = doc::read_text_opt(&self.paths.component_summary(kind, key))?
            .ok_or_else(|| PalaceError::NotFound(format!("component {scope}")))?;

        let mut entries = self.component_entries(scope)?;
        entries.sort_by(|a, b| b.time.cmp(&a.time));
        entries.truncate(10);

        self.mark_loaded(scope);
        self.access.record(&AccessLog::component_key(scope))?;
        Ok(LoadedComponent {
            scope: scope.to_string(),
            summary,
            recent_changelog: entries,
        })
    }

    /// `true` iff the scope was previously loaded.
    pub fn component_unload(&self, scope: &str) -> bool {
        self.mark_unloaded(scope)
    }

    pub fn component_summary_get(&self, scope: &str) -> Result<String> {
        let summary = self.component_summary_peek(scope)?;
        self.access.record(&AccessLog::component_key(scope))?;
        Ok(summary)
    }

    /// Summary read that does not count as an access — indexers and
    /// maintenance passes use this so they never warm the decay formula.
    pub fn component_summary_peek(&self, scope: &str) -> Result<String> {
        let (kind, key) = parse_scope(scope)?;
        doc::read_text_opt(&self.paths.component_summary(kind, key))?
            .ok_or_else(|| PalaceError::NotFound(format!("component {scope}")).into())
    }

    /// Rewrite the summary and refresh the L0 `⟳` date.
    pub fn component_summary_update(&self, scope: &str, content: &str) -> Result<()> {
        let (kind, key) = parse_scope(scope)?;
        if !self.paths.component_dir(kind, key).is_dir() {
            return Err(PalaceError::NotFound(format!("component {scope}")).into());
        }
        doc::write_text(&self.paths.component_summary(kind, key), content)?;
        self.index.touch_entry(kind.tag(), key)
    }

    /// Stamp the summary's front matter with today's verification.
    pub fn component_summary_verify(&self, scope: &str) -> Result<()> {
        let (kind, key) = parse_scope(scope)?;
        let path = self.paths.component_summary(kind, key);
        let summary = doc::read_text_opt(&path)?
            .ok_or_else(|| PalaceError::NotFound(format!("component {scope}")))?;
        let today = Utc::now().date_naive().to_string();
        let updated = upsert_front_matter(
            &summary,
            &[("last_verified", today.as_str()), ("confidence", "high")],
        );
        doc::write_text(&path, &updated)
    }
}

/// Upsert keys into a leading YAML front-matter block, creating the block
/// when absent.  Unknown keys in an existing block are preserved verbatim.
fn upsert_front_matter(content: &str, updates: &[(&str, &str)]) -> String {
    let (mut lines, body) = match content.strip_prefix("---\n") {
        Some(rest) => match rest.split_once("\n---\n") {
            Some((block, body)) => (
                block.lines().map(str::to_string).collect::<Vec<_>>(),
                body.to_string(),
            ),
            None => (vec![], content.to_string()),
        },
        None => (vec![], content.to_string()),
    };

    for (key, value) in updates {
        let rendered = format!("{key}: {value}");
        match lines.iter_mut().find(|l| l.starts_with(&format!("{key}:"))) {
            Some(line) => *line = rendered,
            None => lines.push(rendered),
        }
    }

    format!("---\n{}\n---\n{}", lines.join("\n"), body)
}
