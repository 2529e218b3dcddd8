//! Workspace sync: SHA-256 diff of watched host files.
//!
//! On startup every watched file is hashed and compared to the persisted
//! sync state; changed files are backed up into the store, and the primary
//! identity file is mirrored into the primary entity's soul content.  The
//! reverse direction (`write_soul_to_workspace`) only acts for the primary
//! mapping.  Sync failure is never fatal.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use palace_config::{ConfigStore, SyncConfig};
use palace_memory::{HookBus, MemoryEvent, MemoryStore, doc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSyncRecord {
    pub sha256: String,
    pub last_changed: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: BTreeMap<String, FileSyncRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub workspace: Option<String>,
    pub changed: Vec<String>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn expand_home_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

pub struct WorkspaceSync {
    store: Arc<MemoryStore>,
    config: Arc<ConfigStore>,
    bus: Arc<HookBus>,
}

impl WorkspaceSync {
    pub fn new(store: Arc<MemoryStore>, config: Arc<ConfigStore>, bus: Arc<HookBus>) -> Self {
        Self { store, config, bus }
    }

    fn workspace_dir(&self, sync: &SyncConfig) -> Option<PathBuf> {
        if !sync.workspace_path.is_empty() {
            let path = expand_home_path(&sync.workspace_path);
            return path.is_dir().then_some(path);
        }
        sync.workspace_candidates
            .iter()
            .map(|c| expand_home_path(c))
            .find(|p| p.is_dir())
    }

    fn state(&self) -> Result<SyncState> {
        doc::read_or_default(&self.store.paths().sync_state())
    }

    /// Diff every watched file; back up and mirror what changed; persist the
    /// new hashes; one event summarising all changed files.
    pub async fn run_startup_sync(&self) -> Result<SyncReport> {
        let sync = self.config.get()?.sync;
        let Some(workspace) = self.workspace_dir(&sync) else {
            debug!("no workspace directory found, skipping sync");
            return Ok(SyncReport { workspace: None, changed: vec![] });
        };

        let mut state = self.state()?;
        let mut changed = Vec::new();

        for name in &sync.watched_files {
            let path = workspace.join(name);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(file = %path.display(), %e, "watched file unreadable, skipping");
                    continue;
                }
            };

            let hash = sha256_hex(content.as_bytes());
            if state.files.get(name).map(|r| r.sha256.as_str()) == Some(hash.as_str()) {
                continue;
            }

            // Back up the changed file into the store.
            doc::write_text(&self.store.paths().workspace_backup_dir().join(name), &content)?;

            if name == &sync.primary_file {
                self.mirror_soul_inward(&sync.primary_entity, &content)?;
            }

            state.files.insert(
                name.clone(),
                FileSyncRecord { sha256: hash, last_changed: Utc::now() },
            );
            changed.push(name.clone());
        }

        state.last_sync = Some(Utc::now());
        doc::write(&self.store.paths().sync_state(), &state)?;

        if !changed.is_empty() {
            info!(files = ?changed, "workspace files synchronised");
            self.bus
                .emit(MemoryEvent::WorkspaceSync {
                    scope: "sync".to_string(),
                    summary: format!("synced workspace files: {}", changed.join(", ")),
                    files: changed.clone(),
                })
                .await;
        }

        Ok(SyncReport {
            workspace: Some(workspace.display().to_string()),
            changed,
        })
    }

    fn mirror_soul_inward(&self, entity_id: &str, content: &str) -> Result<()> {
        if self.store.entity_get(entity_id)?.is_none() {
            self.store
                .entity_create(entity_id, entity_id, "primary identity (auto-created by sync)", None)?;
        }
        let mut record = self
            .store
            .entity_get(entity_id)?
            .expect("entity just ensured");
        if record.soul_content == content {
            return Ok(());
        }
        record.soul_content = content.to_string();
        doc::write(&self.store.paths().entity_file(entity_id), &record)?;
        self.store
            .entity_log_evolution(entity_id, "soul updated from workspace file", "workspace_sync")?;
        Ok(())
    }

    /// Reverse direction: mirror soul content out to the workspace file.
    /// Only the primary mapping acts; returns whether a write happened.
    pub fn write_soul_to_workspace(&self, entity_id: &str, content: &str) -> Result<bool> {
        let sync = self.config.get()?.sync;
        if entity_id != sync.primary_entity {
            return Ok(false);
        }
        let Some(workspace) = self.workspace_dir(&sync) else {
            return Ok(false);
        };

        let path = workspace.join(&sync.primary_file);
        std::fs::write(&path, content)?;

        // Record the hash we just wrote so the next startup sync doesn't
        // see our own write as a host change.
        let mut state = self.state()?;
        state.files.insert(
            sync.primary_file.clone(),
            FileSyncRecord {
                sha256: sha256_hex(content.as_bytes()),
                last_changed: Utc::now(),
            },
        );
        doc::write(&self.store.paths().sync_state(), &state)?;
        Ok(true)
    }
}
