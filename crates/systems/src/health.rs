//! Health check: structural invariant verification over the store.
//!
//! Five categories: L0 ↔ filesystem consistency (both directions),
//! per-component staleness, entity presence, version-control cleanliness,
//! and config readability.  Success iff no error-severity issue.

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palace_config::ConfigStore;
use palace_memory::{ComponentKind, GitBacker, MemoryStore, parse_scope};
use serde::Serialize;

use crate::registry::{System, SystemOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthIssue {
    pub severity: Severity,
    pub category: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub success: bool,
    pub checked_at: DateTime<Utc>,
    pub issues: Vec<HealthIssue>,
}

pub struct HealthCheck {
    store: Arc<MemoryStore>,
    config: Arc<ConfigStore>,
    git: Arc<GitBacker>,
}

impl HealthCheck {
    pub fn new(store: Arc<MemoryStore>, config: Arc<ConfigStore>, git: Arc<GitBacker>) -> Self {
        Self { store, config, git }
    }

    pub async fn run(&self) -> Result<HealthReport> {
        let mut issues = Vec::new();

        self.check_index_consistency(&mut issues)?;
        self.check_staleness(&mut issues)?;
        self.check_entities(&mut issues)?;
        self.check_vcs(&mut issues).await;
        self.check_config(&mut issues);

        let success = !issues.iter().any(|i| i.severity == Severity::Error);
        Ok(HealthReport {
            success,
            checked_at: Utc::now(),
            issues,
        })
    }

    /// Orphan directories (no L0 line) and orphan L0 lines (no directory).
    fn check_index_consistency(&self, issues: &mut Vec<HealthIssue>) -> Result<()> {
        let scopes = self.store.component_scopes()?;
        let entries = self.store.index().entries()?;

        for scope in &scopes {
            let (kind, key) = parse_scope(scope)?;
            let indexed = entries.iter().any(|e| e.tag == kind.tag() && e.key == key);
            if !indexed {
                issues.push(HealthIssue {
                    severity: Severity::Warning,
                    category: "orphan_directory",
                    message: format!("component {scope} has no master-index line"),
                });
            }
        }

        for entry in &entries {
            let Some(kind) = ComponentKind::from_tag(entry.tag) else {
                // System rows have no directory counterpart.
                continue;
            };
            let scope = format!("{}/{}", kind.dir(), entry.key);
            if !scopes.contains(&scope) {
                issues.push(HealthIssue {
                    severity: Severity::Warning,
                    category: "orphan_index",
                    message: format!("master-index line [{}] {} has no directory", entry.tag, entry.key),
                });
            }
        }
        Ok(())
    }

    /// Changelog activity newer than the summary file's mtime.
    fn check_staleness(&self, issues: &mut Vec<HealthIssue>) -> Result<()> {
        for scope in self.store.component_scopes()? {
            let entries = self.store.component_entries(&scope)?;
            let Some(newest) = entries.iter().map(|e| e.time).max() else {
                continue;
            };
            let (kind, key) = parse_scope(&scope)?;
            let summary_path = self.store.paths().component_summary(kind, key);
            let Ok(metadata) = std::fs::metadata(&summary_path) else {
                issues.push(HealthIssue {
                    severity: Severity::Warning,
                    category: "missing_summary",
                    message: format!("component {scope} has changelog activity but no summary file"),
                });
                continue;
            };
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                .and_then(|d| DateTime::<Utc>::from_timestamp(d.as_secs() as i64, 0));
            if let Some(mtime) = mtime {
                if newest > mtime {
                    issues.push(HealthIssue {
                        severity: Severity::Warning,
                        category: "stale_summary",
                        message: format!("component {scope} summary predates its newest changelog entry"),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_entities(&self, issues: &mut Vec<HealthIssue>) -> Result<()> {
        if self.store.entity_list()?.is_empty() {
            issues.push(HealthIssue {
                severity: Severity::Warning,
                category: "missing_entity",
                message: "no entities registered (run onboarding_init)".to_string(),
            });
        }
        Ok(())
    }

    async fn check_vcs(&self, issues: &mut Vec<HealthIssue>) {
        if !self.git.history_exists() {
            issues.push(HealthIssue {
                severity: Severity::Info,
                category: "vcs_missing",
                message: "no version-control history (git unavailable or store uninitialised)".to_string(),
            });
            return;
        }
        match self.git.is_clean().await {
            Ok(true) => {}
            Ok(false) => issues.push(HealthIssue {
                severity: Severity::Warning,
                category: "vcs_dirty",
                message: "working tree has uncommitted changes".to_string(),
            }),
            Err(err) => issues.push(HealthIssue {
                severity: Severity::Warning,
                category: "vcs_dirty",
                message: format!("could not inspect working tree: {err}"),
            }),
        }
    }

    fn check_config(&self, issues: &mut Vec<HealthIssue>) {
        self.config.invalidate_cache();
        if let Err(err) = self.config.get() {
            issues.push(HealthIssue {
                severity: Severity::Error,
                category: "config_unreadable",
                message: format!("config file unreadable: {err}"),
            });
        }
    }
}

#[async_trait]
impl System for HealthCheck {
    fn name(&self) -> &'static str {
        "health"
    }

    fn describe(&self) -> &'static str {
        "structural invariant verification across index, components, entities, vcs, and config"
    }

    async fn status(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"on_demand": true}))
    }

    async fn execute(&self, _params: serde_json::Value) -> Result<SystemOutcome> {
        let report = self.run().await?;
        let message = if report.success {
            format!("health: ok ({} non-fatal issues)", report.issues.len())
        } else {
            format!("health: FAILING ({} issues)", report.issues.len())
        };
        Ok(SystemOutcome {
            success: report.success,
            message,
            details: Some(serde_json::to_value(&report)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palace_memory::{ComponentKind, StorePaths};

    fn harness() -> (tempfile::TempDir, Arc<MemoryStore>, HealthCheck) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open(StorePaths::new(dir.path())).unwrap());
        let config = Arc::new(ConfigStore::new(store.paths().config_file()));
        config.ensure_initialized().unwrap();
        let git = Arc::new(GitBacker::new(store.paths()));
        store.entity_create("main", "Main", "", None).unwrap();
        let health = HealthCheck::new(store.clone(), config, git);
        (dir, store, health)
    }

    #[tokio::test]
    async fn clean_store_passes() {
        let (_dir, store, health) = harness();
        store
            .component_create(ComponentKind::Projects, "alpha", "# Alpha")
            .unwrap();
        let report = health.run().await.unwrap();
        assert!(report.success, "{:?}", report.issues);
        assert!(!report.issues.iter().any(|i| i.severity == Severity::Error));
    }

    #[tokio::test]
    async fn removed_directory_yields_orphan_index_warning() {
        let (_dir, store, health) = harness();
        store
            .component_create(ComponentKind::Projects, "alpha", "# Alpha")
            .unwrap();
        std::fs::remove_dir_all(store.paths().component_dir(ComponentKind::Projects, "alpha"))
            .unwrap();

        let report = health.run().await.unwrap();
        let orphans: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.category == "orphan_index")
            .collect();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].severity, Severity::Warning);
        // Warnings alone never fail the check.
        assert!(report.success);
    }

    #[tokio::test]
    async fn unindexed_directory_yields_orphan_directory_warning() {
        let (_dir, store, health) = harness();
        store
            .component_create(ComponentKind::Projects, "alpha", "# Alpha")
            .unwrap();
        store.index().remove_entry('P', "alpha").unwrap();

        let report = health.run().await.unwrap();
        assert!(report.issues.iter().any(|i| i.category == "orphan_directory"));
    }

    #[tokio::test]
    async fn missing_entities_warn() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open(StorePaths::new(dir.path())).unwrap());
        let config = Arc::new(ConfigStore::new(store.paths().config_file()));
        config.ensure_initialized().unwrap();
        let git = Arc::new(GitBacker::new(store.paths()));
        let health = HealthCheck::new(store, config, git);
        let report = health.run().await.unwrap();
        assert!(report.issues.iter().any(|i| i.category == "missing_entity"));
    }

    #[tokio::test]
    async fn unreadable_config_is_an_error() {
        let (_dir, store, health) = harness();
        std::fs::write(store.paths().config_file(), "[search\nbackend = ???").unwrap();
        let report = health.run().await.unwrap();
        assert!(!report.success);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == "config_unreadable" && i.severity == Severity::Error));
    }
}
