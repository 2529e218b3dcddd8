//! External CLI backend (`qmd`).
//!
//! Available when the configured binary is on `$PATH`.  The backend keeps a
//! named collection pointed at the store root; search and reindex dispatch
//! to the CLI and its JSON output is parsed tolerantly (`results: [...]` or
//! a bare array, `id`/`path`, `content`/`snippet`/`text` field spellings).

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use palace_config::SearchConfig;
use palace_memory::{MemoryStore, PalaceError};
use tokio::process::Command;
use tracing::debug;

use crate::docs::scope_matches;
use crate::{SearchBackend, SearchResult};

const CLI_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on captured stdout so a runaway CLI cannot balloon memory.
const MAX_STDOUT_BYTES: usize = 4 * 1024 * 1024;

pub struct QmdBackend {
    store: Arc<MemoryStore>,
    config: SearchConfig,
    collection_ready: AtomicBool,
}

impl QmdBackend {
    pub fn new(store: Arc<MemoryStore>, config: SearchConfig) -> Self {
        Self {
            store,
            config,
            collection_ready: AtomicBool::new(false),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let child = Command::new(&self.config.qmd_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let output = tokio::time::timeout(CLI_TIMEOUT, child)
            .await
            .map_err(|_| {
                PalaceError::Transport(format!("{} timed out after 30s", self.config.qmd_bin))
            })?
            .map_err(|e| PalaceError::Transport(format!("{}: {e}", self.config.qmd_bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PalaceError::Transport(format!(
                "{} {} failed: {stderr}",
                self.config.qmd_bin,
                args.first().unwrap_or(&"")
            ))
            .into());
        }
        if output.stdout.len() > MAX_STDOUT_BYTES {
            return Err(PalaceError::Transport(format!(
                "{} produced more than {MAX_STDOUT_BYTES} bytes of output",
                self.config.qmd_bin
            ))
            .into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.collection_ready.load(Ordering::Relaxed) {
            return Ok(());
        }
        let root = self.store.paths().root().display().to_string();
        // Idempotent on the CLI side; a "collection exists" failure is fine.
        let added = self
            .run(&["collection", "add", &self.config.qmd_collection, &root])
            .await;
        if let Err(err) = added {
            debug!(%err, "collection add failed (assuming it already exists)");
        }
        self.collection_ready.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn parse_results(raw: &str) -> Result<Vec<SearchResult>> {
        let value: serde_json::Value = serde_json::from_str(raw.trim())
            .map_err(|e| PalaceError::Transport(format!("unparseable search output: {e}")))?;
        let items = value
            .get("results")
            .and_then(|r| r.as_array())
            .cloned()
            .or_else(|| value.as_array().cloned())
            .unwrap_or_default();

        let mut results = Vec::new();
        for item in items {
            let id = item
                .get("id")
                .or_else(|| item.get("path"))
                .or_else(|| item.get("file"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let content = item
                .get("content")
                .or_else(|| item.get("snippet"))
                .or_else(|| item.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let score = item.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
            let component = component_from_path(&id);
            results.push(SearchResult {
                id,
                content,
                source: "qmd".to_string(),
                score,
                component,
            });
        }
        Ok(results)
    }
}

/// Derive a `<type>/<key>` scope from a result path when the hit lives
/// under `components/`.
fn component_from_path(path: &str) -> Option<String> {
    let (_, rest) = path.split_once("components/")?;
    let mut segments = rest.splitn(3, '/');
    let kind = segments.next()?;
    let key = segments.next()?;
    if key.is_empty() {
        return None;
    }
    Some(format!("{kind}/{key}"))
}

#[async_trait]
impl SearchBackend for QmdBackend {
    fn name(&self) -> &'static str {
        "qmd"
    }

    async fn available(&self) -> bool {
        self.run(&["--version"]).await.is_ok()
    }

    async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_collection().await?;
        let limit_arg = limit.to_string();
        let raw = self
            .run(&[
                "search",
                "--collection",
                &self.config.qmd_collection,
                "--json",
                "--limit",
                &limit_arg,
                query,
            ])
            .await?;
        let mut results = Self::parse_results(&raw)?;
        if let Some(scope) = scope {
            results.retain(|r| scope_matches(r.component.as_deref(), scope));
        }
        results.truncate(limit);
        Ok(results)
    }

    async fn reindex(&self) -> Result<usize> {
        self.ensure_collection().await?;
        let raw = self
            .run(&["reindex", "--collection", &self.config.qmd_collection, "--json"])
            .await?;
        let count = serde_json::from_str::<serde_json::Value>(raw.trim())
            .ok()
            .and_then(|v| v.get("indexed").and_then(|n| n.as_u64()))
            .unwrap_or(0) as usize;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_and_bare_arrays() {
        let wrapped = r#"{"results": [{"path": "store/components/projects/alpha/changelog.yaml", "snippet": "created test file", "score": 0.8}]}"#;
        let results = QmdBackend::parse_results(wrapped).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].component.as_deref(), Some("projects/alpha"));
        assert_eq!(results[0].content, "created test file");

        let bare = r#"[{"id": "x", "text": "hello", "score": 1.5}]"#;
        let results = QmdBackend::parse_results(bare).unwrap();
        assert_eq!(results[0].id, "x");
        assert_eq!(results[0].content, "hello");
        assert!((results[0].score - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn garbage_output_is_a_transport_error() {
        assert!(QmdBackend::parse_results("this is not json").is_err());
    }

    #[test]
    fn component_derivation_from_paths() {
        assert_eq!(
            component_from_path("/s/components/projects/alpha/summary.md").as_deref(),
            Some("projects/alpha")
        );
        assert_eq!(component_from_path("/s/scratch/2026-08-01.yaml"), None);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            MemoryStore::open(palace_memory::StorePaths::new(dir.path())).unwrap(),
        );
        let config = SearchConfig {
            qmd_bin: "definitely-not-a-real-binary-7f3a".to_string(),
            ..SearchConfig::default()
        };
        let backend = QmdBackend::new(store, config);
        assert!(!backend.available().await);
    }
}
