//! Engine wiring: one process-wide state container owned by `main`.
//!
//! Boot order matters: the store opens first, the hook bus registers the
//! commit handler before the reindex scheduler (durable history precedes a
//! queued index refresh), and the startup workspace sync runs last and
//! non-fatally.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use palace_config::ConfigStore;
use palace_llm::{LlmCaller, SamplingFn};
use palace_memory::{CommitHandler, GitBacker, HookBus, MemoryStore, StorePaths};
use palace_search::{ReindexHandler, SearchRouter};
use palace_systems::{
    DecayEngine, HealthCheck, MemoryIngest, Onboarding, RetrieveDigest, Summarizer,
    SystemRegistry, WorkspaceSync, WriteValidator,
};
use tracing::{info, warn};

pub struct Engine {
    pub store: Arc<MemoryStore>,
    pub config: Arc<ConfigStore>,
    pub bus: Arc<HookBus>,
    pub git: Arc<GitBacker>,
    pub router: Arc<SearchRouter>,
    pub llm: Arc<LlmCaller>,
    pub validator: WriteValidator,
    pub workspace_sync: WorkspaceSync,
    pub onboarding: Onboarding,
    pub summarizer: Arc<Summarizer>,
    pub decay: Arc<DecayEngine>,
    pub registry: SystemRegistry,
}

impl Engine {
    /// Build and start everything rooted at `root`.  `sampling` is the
    /// host-sampling capability handed over by the transport layer, when it
    /// has one.
    pub async fn boot(root: PathBuf, sampling: Option<SamplingFn>) -> Result<Self> {
        let paths = StorePaths::new(root);
        let store = Arc::new(
            MemoryStore::open(paths.clone())
                .with_context(|| format!("opening store at {}", paths.root().display()))?,
        );
        let config = Arc::new(ConfigStore::new(paths.config_file()));
        config.ensure_initialized()?;

        let git = Arc::new(GitBacker::new(&paths));
        git.init_if_needed().await?;

        let llm_config = config.get()?.llm;
        let mut caller = LlmCaller::new(llm_config);
        if let Some(sampling) = sampling {
            caller = caller.with_sampling(sampling);
        }
        let llm = Arc::new(caller);

        let router = Arc::new(SearchRouter::for_store(store.clone(), config.clone()));

        // Commit before reindex: a crash between the two leaves correct
        // history and only a stale index.
        let mut bus = HookBus::new();
        bus.register(Arc::new(CommitHandler::new(git.clone())));
        bus.register(Arc::new(ReindexHandler::new(router.clone())));
        let bus = Arc::new(bus);

        let validator = WriteValidator::new(store.clone(), llm.clone(), config.clone());
        let workspace_sync = WorkspaceSync::new(store.clone(), config.clone(), bus.clone());
        let onboarding = Onboarding::new(store.clone(), config.clone(), git.clone(), bus.clone());

        let summarizer = Arc::new(Summarizer::new(
            store.clone(),
            llm.clone(),
            config.clone(),
            bus.clone(),
        ));
        let decay = Arc::new(DecayEngine::new(store.clone(), config.clone(), bus.clone()));
        let health = Arc::new(HealthCheck::new(store.clone(), config.clone(), git.clone()));
        let ingest = Arc::new(MemoryIngest::new(store.clone(), config.clone(), bus.clone()));
        let retrieve = Arc::new(RetrieveDigest::new(
            store.clone(),
            router.clone(),
            llm.clone(),
        ));

        let mut registry = SystemRegistry::new(paths.clone());
        registry.register(summarizer.clone());
        registry.register(decay.clone());
        registry.register(health);
        registry.register(ingest);
        registry.register(retrieve);

        let engine = Self {
            store,
            config,
            bus,
            git,
            router,
            llm,
            validator,
            workspace_sync,
            onboarding,
            summarizer,
            decay,
            registry,
        };

        // Startup sync is best-effort by contract.
        match engine.workspace_sync.run_startup_sync().await {
            Ok(report) if !report.changed.is_empty() => {
                info!(files = ?report.changed, "startup workspace sync applied changes");
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "startup workspace sync failed (non-fatal)"),
        }

        Ok(engine)
    }
}
