//! Post-write hook bus.
//!
//! Every mutating operation emits exactly one event after its data reaches
//! durable storage.  Handlers are registered at boot and run in registration
//! order; a failing handler logs and never aborts the operation, so the
//! commit and reindex side effects stay best-effort.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

/// One typed notification per mutating operation.  Every variant carries the
/// affected `scope` and a human-readable `summary`; a few carry extras the
/// built-in handlers need.
#[derive(Debug, Clone)]
pub enum MemoryEvent {
    IdentityCreate { scope: String, summary: String },
    IdentityChange { scope: String, summary: String },
    ChangelogRecord { scope: String, summary: String, entry_id: String },
    SummaryUpdate { scope: String, summary: String },
    ComponentCreate { scope: String, summary: String },
    ComponentLoad { scope: String, summary: String },
    ComponentUnload { scope: String, summary: String },
    IndexUpdate { scope: String, summary: String },
    SystemExecute { scope: String, summary: String },
    SystemConfigure { scope: String, summary: String },
    WorkspaceSync { scope: String, summary: String, files: Vec<String> },
    OnboardingComplete { scope: String, summary: String },
    ScratchWrite { scope: String, summary: String, entry_id: String },
    ScratchPromote { scope: String, summary: String, entry_id: String },
    SnapshotSave { scope: String, summary: String },
    RelationshipUpdate { scope: String, summary: String, entity_id: String },
}

impl MemoryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::IdentityCreate { .. } => "identity.create",
            Self::IdentityChange { .. } => "identity.change",
            Self::ChangelogRecord { .. } => "changelog.record",
            Self::SummaryUpdate { .. } => "summary.update",
            Self::ComponentCreate { .. } => "component.create",
            Self::ComponentLoad { .. } => "component.load",
            Self::ComponentUnload { .. } => "component.unload",
            Self::IndexUpdate { .. } => "index.update",
            Self::SystemExecute { .. } => "system.execute",
            Self::SystemConfigure { .. } => "system.configure",
            Self::WorkspaceSync { .. } => "workspace.sync",
            Self::OnboardingComplete { .. } => "onboarding.complete",
            Self::ScratchWrite { .. } => "scratch.write",
            Self::ScratchPromote { .. } => "scratch.promote",
            Self::SnapshotSave { .. } => "snapshot.save",
            Self::RelationshipUpdate { .. } => "relationship.update",
        }
    }

    pub fn scope(&self) -> &str {
        match self {
            Self::IdentityCreate { scope, .. }
            | Self::IdentityChange { scope, .. }
            | Self::ChangelogRecord { scope, .. }
            | Self::SummaryUpdate { scope, .. }
            | Self::ComponentCreate { scope, .. }
            | Self::ComponentLoad { scope, .. }
            | Self::ComponentUnload { scope, .. }
            | Self::IndexUpdate { scope, .. }
            | Self::SystemExecute { scope, .. }
            | Self::SystemConfigure { scope, .. }
            | Self::WorkspaceSync { scope, .. }
            | Self::OnboardingComplete { scope, .. }
            | Self::ScratchWrite { scope, .. }
            | Self::ScratchPromote { scope, .. }
            | Self::SnapshotSave { scope, .. }
            | Self::RelationshipUpdate { scope, .. } => scope,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            Self::IdentityCreate { summary, .. }
            | Self::IdentityChange { summary, .. }
            | Self::ChangelogRecord { summary, .. }
            | Self::SummaryUpdate { summary, .. }
            | Self::ComponentCreate { summary, .. }
            | Self::ComponentLoad { summary, .. }
            | Self::ComponentUnload { summary, .. }
            | Self::IndexUpdate { summary, .. }
            | Self::SystemExecute { summary, .. }
            | Self::SystemConfigure { summary, .. }
            | Self::WorkspaceSync { summary, .. }
            | Self::OnboardingComplete { summary, .. }
            | Self::ScratchWrite { summary, .. }
            | Self::ScratchPromote { summary, .. }
            | Self::SnapshotSave { summary, .. }
            | Self::RelationshipUpdate { summary, .. } => summary,
        }
    }

    /// Events that change durable store state — the commit handler's set.
    /// Load/unload only flip in-process flags.
    pub fn alters_persistent_state(&self) -> bool {
        !matches!(self, Self::ComponentLoad { .. } | Self::ComponentUnload { .. })
    }

    /// Events that change content the search backends index — the reindex
    /// scheduler's set.
    pub fn changes_searchable_content(&self) -> bool {
        matches!(
            self,
            Self::ChangelogRecord { .. }
                | Self::SummaryUpdate { .. }
                | Self::ComponentCreate { .. }
                | Self::ScratchWrite { .. }
                | Self::ScratchPromote { .. }
        )
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this handler cares about `event`.  Checked before `handle`.
    fn wants(&self, event: &MemoryEvent) -> bool;

    async fn handle(&self, event: &MemoryEvent) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct HookBus {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration order is execution order: register the commit handler
    /// before the reindex scheduler so history is durable before the index
    /// refresh is queued.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub async fn emit(&self, event: MemoryEvent) {
        for handler in &self.handlers {
            if !handler.wants(&event) {
                continue;
            }
            if let Err(err) = handler.handle(&event).await {
                warn!(
                    handler = handler.name(),
                    event = event.name(),
                    scope = event.scope(),
                    %err,
                    "post-write handler failed (operation unaffected)"
                );
            }
        }
    }
}
