//! Memory ingest: pulls new material from watched host files into scratch.
//!
//! Each configured file is SHA-256 diffed against `ingest-state.yaml`;
//! changed content lands as scratch entries with source `ingest:<stem>`, so
//! the rest of the pipeline (promotion, digest, search) treats it like any
//! other working note.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palace_config::ConfigStore;
use palace_memory::{HookBus, MemoryEvent, MemoryStore, ScratchWrite, doc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::registry::{System, SystemOutcome};
use crate::sync::sha256_hex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub sha256: String,
    pub last_ingested: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestState {
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: BTreeMap<String, IngestRecord>,
}

pub struct MemoryIngest {
    store: Arc<MemoryStore>,
    config: Arc<ConfigStore>,
    bus: Arc<HookBus>,
}

impl MemoryIngest {
    pub fn new(store: Arc<MemoryStore>, config: Arc<ConfigStore>, bus: Arc<HookBus>) -> Self {
        Self { store, config, bus }
    }

    pub fn state(&self) -> Result<IngestState> {
        doc::read_or_default(&self.store.paths().ingest_state())
    }

    pub async fn run(&self) -> Result<SystemOutcome> {
        let ingest = self.config.get()?.ingest;
        if !ingest.enabled {
            return Ok(SystemOutcome::ok("ingest disabled (ingest.enabled = false)"));
        }

        let mut state = self.state()?;
        let mut ingested = 0usize;
        let mut last_entry_id = String::new();
        let mut errors = Vec::new();
        let mut touched_files = Vec::new();

        for raw_path in &ingest.watch_paths {
            let path = crate::sync::expand_home_path(raw_path);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(file = %path.display(), %e, "ingest source unreadable");
                    errors.push(format!("{raw_path}: {e}"));
                    continue;
                }
            };

            let hash = sha256_hex(content.as_bytes());
            let key = path.display().to_string();
            if state.files.get(&key).map(|r| r.sha256.as_str()) == Some(hash.as_str()) {
                continue;
            }

            let tail = if ingest.tail_bytes > 0 && content.len() as u64 > ingest.tail_bytes {
                let start = content.len() - ingest.tail_bytes as usize;
                // Snap to a char boundary.
                let start = (start..content.len())
                    .find(|&i| content.is_char_boundary(i))
                    .unwrap_or(0);
                &content[start..]
            } else {
                content.as_str()
            };

            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            match self.store.scratch_write(ScratchWrite {
                content: tail.to_string(),
                tags: Some(vec!["ingest".to_string()]),
                source: Some(format!("ingest:{stem}")),
            }) {
                Ok(entry) => {
                    last_entry_id = entry.id;
                    ingested += 1;
                    touched_files.push(stem);
                    state.files.insert(
                        key,
                        IngestRecord { sha256: hash, last_ingested: Utc::now() },
                    );
                }
                Err(err) => errors.push(format!("{raw_path}: {err}")),
            }
        }

        state.last_run = Some(Utc::now());
        doc::write(&self.store.paths().ingest_state(), &state)?;

        if ingested > 0 {
            info!(ingested, "ingest captured new host material");
            self.bus
                .emit(MemoryEvent::ScratchWrite {
                    scope: "scratch".to_string(),
                    summary: format!("ingested {ingested} changed files: {}", touched_files.join(", ")),
                    entry_id: last_entry_id,
                })
                .await;
        }

        let success = errors.is_empty();
        let message = if success {
            format!("ingest: {ingested} files captured")
        } else {
            format!("ingest: {ingested} captured, {} failed: {}", errors.len(), errors.join("; "))
        };
        Ok(SystemOutcome { success, message, details: None })
    }
}

#[async_trait]
impl System for MemoryIngest {
    fn name(&self) -> &'static str {
        "memory_ingest"
    }

    fn describe(&self) -> &'static str {
        "hash-diff ingest of watched host files into scratch"
    }

    async fn status(&self) -> Result<serde_json::Value> {
        let state = self.state()?;
        Ok(serde_json::json!({
            "last_run": state.last_run,
            "tracked_files": state.files.len(),
            "enabled": self.config.get().map(|c| c.ingest.enabled).unwrap_or(false),
        }))
    }

    async fn execute(&self, _params: serde_json::Value) -> Result<SystemOutcome> {
        self.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palace_memory::{ScratchRead, StorePaths};

    fn harness(watch: &std::path::Path) -> (Arc<MemoryStore>, MemoryIngest) {
        let store = Arc::new(
            MemoryStore::open(StorePaths::new(watch.join("store"))).unwrap(),
        );
        let config = Arc::new(ConfigStore::new(store.paths().config_file()));
        config.ensure_initialized().unwrap();
        config
            .update_path("ingest.enabled", toml::Value::Boolean(true))
            .unwrap();
        config
            .update_path(
                "ingest.watch_paths",
                toml::Value::Array(vec![toml::Value::String(
                    watch.join("notes.md").display().to_string(),
                )]),
            )
            .unwrap();
        let ingest = MemoryIngest::new(store.clone(), config, Arc::new(HookBus::new()));
        (store, ingest)
    }

    #[tokio::test]
    async fn changed_file_becomes_a_scratch_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "remember the demo at 3pm").unwrap();
        let (store, ingest) = harness(dir.path());

        let outcome = ingest.run().await.unwrap();
        assert!(outcome.success);
        assert!(outcome.message.contains("1 files"));

        let entries = store.scratch_read(ScratchRead::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "ingest:notes");
        assert!(entries[0].content.contains("demo at 3pm"));

        // Unchanged content is not re-ingested.
        let outcome = ingest.run().await.unwrap();
        assert!(outcome.message.contains("0 files"));
        assert_eq!(store.scratch_read(ScratchRead::default()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_ingest_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "content").unwrap();
        let (store, ingest) = harness(dir.path());
        ingest
            .config
            .update_path("ingest.enabled", toml::Value::Boolean(false))
            .unwrap();
        let outcome = ingest.run().await.unwrap();
        assert!(outcome.message.contains("disabled"));
        assert!(store.scratch_read(ScratchRead::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_watch_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, ingest) = harness(dir.path());
        let outcome = ingest.run().await.unwrap();
        assert!(outcome.success);
        assert!(outcome.message.contains("0 files"));
    }
}
