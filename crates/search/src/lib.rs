//! Search router over L2 data.
//!
//! Backends register at boot in a fixed order — external CLI, embedded
//! BM25, simple keyword scan — and the router picks the first available one
//! (or honours a forced `search.backend` choice when that backend answers
//! its availability probe).  The choice is cached until [`SearchRouter::reset`].

mod bm25;
mod docs;
mod external;
mod simple;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palace_config::ConfigStore;
use palace_memory::{EventHandler, MemoryEvent, MemoryStore, PalaceError};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use bm25::Bm25Backend;
pub use docs::{SearchDoc, collect_documents};
pub use external::QmdBackend;
pub use simple::SimpleBackend;

/// Uniform result shape across backends.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    /// What kind of document matched: `changelog`, `summary`, `scratch`.
    pub source: String,
    pub score: f32,
    /// Component scope when the document belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runtime availability probe; consulted on first query and on `reset`.
    async fn available(&self) -> bool;

    async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>>;

    /// Rebuild whatever the backend indexes.  Returns the document count.
    async fn reindex(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchStatus {
    pub backend: String,
    pub available: Vec<String>,
    pub last_reindex: Option<DateTime<Utc>>,
    pub indexed_count: Option<usize>,
}

pub struct SearchRouter {
    backends: Vec<Arc<dyn SearchBackend>>,
    config: Arc<ConfigStore>,
    active: Mutex<Option<Arc<dyn SearchBackend>>>,
    last_reindex: Mutex<Option<(DateTime<Utc>, usize)>>,
    debounce: Mutex<Option<JoinHandle<()>>>,
}

impl SearchRouter {
    /// The standard backend order for a store.
    pub fn for_store(store: Arc<MemoryStore>, config: Arc<ConfigStore>) -> Self {
        let search = config.get().map(|c| c.search).unwrap_or_default();
        let backends: Vec<Arc<dyn SearchBackend>> = vec![
            Arc::new(QmdBackend::new(store.clone(), search)),
            Arc::new(Bm25Backend::new(store.clone())),
            Arc::new(SimpleBackend::new(store)),
        ];
        Self {
            backends,
            config,
            active: Mutex::new(None),
            last_reindex: Mutex::new(None),
            debounce: Mutex::new(None),
        }
    }

    #[doc(hidden)]
    pub fn with_backends(backends: Vec<Arc<dyn SearchBackend>>, config: Arc<ConfigStore>) -> Self {
        Self {
            backends,
            config,
            active: Mutex::new(None),
            last_reindex: Mutex::new(None),
            debounce: Mutex::new(None),
        }
    }

    /// Drop the cached backend choice; the next query re-probes.
    pub fn reset(&self) {
        *self.active.lock().expect("active backend lock") = None;
    }

    async fn pick_backend(&self) -> Result<Arc<dyn SearchBackend>> {
        if let Some(active) = self.active.lock().expect("active backend lock").clone() {
            return Ok(active);
        }

        let forced = self
            .config
            .get()
            .map(|c| c.search.backend)
            .unwrap_or_else(|_| "auto".to_string());

        let mut chosen = None;
        if forced != "auto" {
            if let Some(backend) = self.backends.iter().find(|b| b.name() == forced) {
                if backend.available().await {
                    chosen = Some(backend.clone());
                } else {
                    warn!(backend = %forced, "forced search backend unavailable, falling back");
                }
            } else {
                warn!(backend = %forced, "unknown search backend in config, falling back");
            }
        }

        if chosen.is_none() {
            for backend in &self.backends {
                if backend.available().await {
                    chosen = Some(backend.clone());
                    break;
                }
            }
        }

        let backend = chosen.ok_or_else(|| {
            PalaceError::BackingStore("no search backend available".to_string())
        })?;
        info!(backend = backend.name(), "search backend selected");
        *self.active.lock().expect("active backend lock") = Some(backend.clone());
        Ok(backend)
    }

    pub async fn search_data(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let backend = self.pick_backend().await?;
        backend.search(query, scope, limit).await
    }

    pub async fn reindex(&self) -> Result<usize> {
        let backend = self.pick_backend().await?;
        let count = backend.reindex().await?;
        *self.last_reindex.lock().expect("reindex lock") = Some((Utc::now(), count));
        debug!(backend = backend.name(), count, "reindex complete");
        Ok(count)
    }

    pub async fn status(&self) -> Result<SearchStatus> {
        let mut available = Vec::new();
        for backend in &self.backends {
            if backend.available().await {
                available.push(backend.name().to_string());
            }
        }
        let backend = self.pick_backend().await?.name().to_string();
        let last = *self.last_reindex.lock().expect("reindex lock");
        Ok(SearchStatus {
            backend,
            available,
            last_reindex: last.map(|(t, _)| t),
            indexed_count: last.map(|(_, c)| c),
        })
    }

    /// Start (or restart) the single-slot reindex timer.  Consecutive
    /// writes inside the window coalesce into one reindex.
    pub fn schedule_debounced_reindex(self: &Arc<Self>) {
        let search = match self.config.get() {
            Ok(config) => config.search,
            Err(err) => {
                warn!(%err, "config unreadable, skipping reindex scheduling");
                return;
            }
        };
        if !search.auto_reindex {
            return;
        }

        let mut slot = self.debounce.lock().expect("debounce lock");
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let router = self.clone();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(search.reindex_debounce_ms)).await;
            if let Err(err) = router.reindex().await {
                warn!(%err, "debounced reindex failed");
            }
        }));
    }
}

/// Built-in post-write handler: schedules the debounced reindex after any
/// event that changes searchable content.  Registered after the commit
/// handler so history is durable before the refresh is queued.
pub struct ReindexHandler {
    router: Arc<SearchRouter>,
}

impl ReindexHandler {
    pub fn new(router: Arc<SearchRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for ReindexHandler {
    fn name(&self) -> &'static str {
        "reindex"
    }

    fn wants(&self, event: &MemoryEvent) -> bool {
        event.changes_searchable_content()
    }

    async fn handle(&self, _event: &MemoryEvent) -> Result<()> {
        self.router.schedule_debounced_reindex();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeBackend {
        name: &'static str,
        up: bool,
        reindexes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SearchBackend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn available(&self) -> bool {
            self.up
        }

        async fn search(
            &self,
            _query: &str,
            _scope: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<SearchResult>> {
            Ok(vec![SearchResult {
                id: "x".to_string(),
                content: format!("hit from {}", self.name),
                source: "changelog".to_string(),
                score: 1.0,
                component: None,
            }])
        }

        async fn reindex(&self) -> Result<usize> {
            self.reindexes.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        }
    }

    fn router_with(
        backends: Vec<(&'static str, bool, Arc<AtomicUsize>)>,
        forced: &str,
        debounce_ms: u64,
    ) -> (tempfile::TempDir, Arc<SearchRouter>) {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ConfigStore::new(dir.path().join("config.toml")));
        config.ensure_initialized().unwrap();
        config
            .update_path("search.backend", toml::Value::String(forced.to_string()))
            .unwrap();
        config
            .update_path(
                "search.reindex_debounce_ms",
                toml::Value::Integer(debounce_ms as i64),
            )
            .unwrap();
        let backends = backends
            .into_iter()
            .map(|(name, up, reindexes)| {
                Arc::new(FakeBackend { name, up, reindexes }) as Arc<dyn SearchBackend>
            })
            .collect();
        (dir, Arc::new(SearchRouter::with_backends(backends, config)))
    }

    #[tokio::test]
    async fn auto_picks_first_available() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (_dir, router) = router_with(
            vec![
                ("qmd", false, counter.clone()),
                ("bm25", true, counter.clone()),
                ("simple", true, counter.clone()),
            ],
            "auto",
            10,
        );
        let status = router.status().await.unwrap();
        assert_eq!(status.backend, "bm25");
        assert_eq!(status.available, vec!["bm25", "simple"]);
    }

    #[tokio::test]
    async fn forced_unavailable_backend_falls_back() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (_dir, router) = router_with(
            vec![
                ("qmd", false, counter.clone()),
                ("simple", true, counter.clone()),
            ],
            "qmd",
            10,
        );
        let hits = router.search_data("anything", None, 5).await.unwrap();
        assert_eq!(hits[0].content, "hit from simple");
    }

    #[tokio::test]
    async fn choice_is_cached_until_reset() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (_dir, router) = router_with(
            vec![("simple", true, counter.clone())],
            "auto",
            10,
        );
        router.search_data("q", None, 5).await.unwrap();
        // Flip config to a bogus name; cached choice still answers.
        router
            .config
            .update_path("search.backend", toml::Value::String("qmd".to_string()))
            .unwrap();
        assert!(router.search_data("q", None, 5).await.is_ok());
        router.reset();
        // After reset the probe runs again and falls back to simple anyway.
        assert!(router.search_data("q", None, 5).await.is_ok());
    }

    #[tokio::test]
    async fn reindex_records_time_and_count() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (_dir, router) = router_with(vec![("simple", true, counter.clone())], "auto", 10);
        router.reindex().await.unwrap();
        let status = router.status().await.unwrap();
        assert!(status.last_reindex.is_some());
        assert_eq!(status.indexed_count, Some(7));
    }

    #[tokio::test]
    async fn debounced_writes_coalesce_to_one_reindex() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (_dir, router) = router_with(vec![("simple", true, counter.clone())], "auto", 50);
        for _ in 0..5 {
            router.schedule_debounced_reindex();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
