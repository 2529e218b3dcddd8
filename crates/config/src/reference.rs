//! Static reference table enumerating every tunable.
//!
//! Served by the `config_reference` operation so agents can discover what
//! they are allowed to reconfigure without reading source.

/// One tunable: dotted path, default, type, what it does, which system reads it.
#[derive(Debug, Clone, Copy)]
pub struct ConfigParam {
    pub path: &'static str,
    pub default: &'static str,
    pub ty: &'static str,
    pub description: &'static str,
    pub system: &'static str,
}

const REFERENCE: &[ConfigParam] = &[
    ConfigParam {
        path: "summarizer.digest_batch_limit",
        default: "50",
        ty: "integer",
        description: "Max changelog entries per component digest call",
        system: "summarizer",
    },
    ConfigParam {
        path: "summarizer.synthesis_recent_entries",
        default: "50",
        ty: "integer",
        description: "Recent global entries included in the weekly synthesis prompt",
        system: "summarizer",
    },
    ConfigParam {
        path: "summarizer.review_recent_weeklies",
        default: "5",
        ty: "integer",
        description: "Weekly reports included in the monthly review prompt",
        system: "summarizer",
    },
    ConfigParam {
        path: "llm.mode",
        default: "auto",
        ty: "string",
        description: "Completion strategy: auto | sampling | direct",
        system: "llm",
    },
    ConfigParam {
        path: "llm.model",
        default: "anthropic/claude-3.5-haiku",
        ty: "string",
        description: "Model id sent to the direct provider",
        system: "llm",
    },
    ConfigParam {
        path: "llm.endpoint",
        default: "https://openrouter.ai/api/v1/chat/completions",
        ty: "string",
        description: "Chat-completions endpoint for the direct path",
        system: "llm",
    },
    ConfigParam {
        path: "llm.api_key",
        default: "",
        ty: "string",
        description: "Provider API key (PALACE_API_KEY env overrides)",
        system: "llm",
    },
    ConfigParam {
        path: "llm.max_tokens",
        default: "1024",
        ty: "integer",
        description: "Default completion token budget",
        system: "llm",
    },
    ConfigParam {
        path: "llm.timeout_secs",
        default: "30",
        ty: "integer",
        description: "Per-call timeout for provider requests",
        system: "llm",
    },
    ConfigParam {
        path: "ingest.enabled",
        default: "false",
        ty: "bool",
        description: "Enable the scheduled host-file ingest pass",
        system: "memory_ingest",
    },
    ConfigParam {
        path: "ingest.watch_paths",
        default: "[]",
        ty: "string list",
        description: "Host files scanned for new material",
        system: "memory_ingest",
    },
    ConfigParam {
        path: "ingest.tail_bytes",
        default: "0",
        ty: "integer",
        description: "Trailing bytes ingested per changed file (0 = whole file)",
        system: "memory_ingest",
    },
    ConfigParam {
        path: "decay.threshold",
        default: "30.0",
        ty: "float",
        description: "Temperature below which entries become archival candidates",
        system: "decay",
    },
    ConfigParam {
        path: "decay.max_age_days",
        default: "30",
        ty: "integer",
        description: "Entries younger than this never decay",
        system: "decay",
    },
    ConfigParam {
        path: "decay.pinned_entries",
        default: "[]",
        ty: "string list",
        description: "Entry ids exempt from archival (temperature 999)",
        system: "decay",
    },
    ConfigParam {
        path: "decay.excluded_components",
        default: "[]",
        ty: "string list",
        description: "Component scopes the decay pass skips entirely",
        system: "decay",
    },
    ConfigParam {
        path: "decay.archive_history_limit",
        default: "50",
        ty: "integer",
        description: "Archive records retained in decay state",
        system: "decay",
    },
    ConfigParam {
        path: "validation.auto_validate_decisions",
        default: "true",
        ty: "bool",
        description: "Validate every decision entry before recording",
        system: "validator",
    },
    ConfigParam {
        path: "validation.auto_validate_summaries",
        default: "false",
        ty: "bool",
        description: "Validate summary updates before writing",
        system: "validator",
    },
    ConfigParam {
        path: "validation.recent_entries",
        default: "20",
        ty: "integer",
        description: "Recent entries gathered per validation",
        system: "validator",
    },
    ConfigParam {
        path: "sync.workspace_path",
        default: "",
        ty: "string",
        description: "Host workspace directory (empty = probe candidates)",
        system: "workspace_sync",
    },
    ConfigParam {
        path: "sync.workspace_candidates",
        default: "[\"~/workspace\", \"~/agent\"]",
        ty: "string list",
        description: "Directories probed when no workspace path is set",
        system: "workspace_sync",
    },
    ConfigParam {
        path: "sync.watched_files",
        default: "[\"SOUL.md\", \"IDENTITY.md\", \"USER.md\"]",
        ty: "string list",
        description: "Workspace file names diffed on startup",
        system: "workspace_sync",
    },
    ConfigParam {
        path: "sync.primary_file",
        default: "SOUL.md",
        ty: "string",
        description: "Watched file mirrored into the primary entity's soul",
        system: "workspace_sync",
    },
    ConfigParam {
        path: "sync.primary_entity",
        default: "main",
        ty: "string",
        description: "Entity the primary file maps to",
        system: "workspace_sync",
    },
    ConfigParam {
        path: "search.backend",
        default: "auto",
        ty: "string",
        description: "Search backend: auto | qmd | bm25 | simple",
        system: "search",
    },
    ConfigParam {
        path: "search.auto_reindex",
        default: "true",
        ty: "bool",
        description: "Schedule a debounced reindex after content writes",
        system: "search",
    },
    ConfigParam {
        path: "search.reindex_debounce_ms",
        default: "5000",
        ty: "integer",
        description: "Debounce window for write-triggered reindexing",
        system: "search",
    },
    ConfigParam {
        path: "search.qmd_bin",
        default: "qmd",
        ty: "string",
        description: "External search CLI binary name",
        system: "search",
    },
    ConfigParam {
        path: "search.qmd_collection",
        default: "palace",
        ty: "string",
        description: "Collection the external CLI maintains over the store",
        system: "search",
    },
    ConfigParam {
        path: "onboarding.completed",
        default: "false",
        ty: "bool",
        description: "Set by onboarding_init once the store is seeded",
        system: "onboarding",
    },
    ConfigParam {
        path: "onboarding.default_entity_id",
        default: "main",
        ty: "string",
        description: "Entity id created during onboarding",
        system: "onboarding",
    },
    ConfigParam {
        path: "onboarding.default_display_name",
        default: "Main Agent",
        ty: "string",
        description: "Display name of the onboarding entity",
        system: "onboarding",
    },
];

/// The full reference table, in declaration order.
pub fn config_reference() -> &'static [ConfigParam] {
    REFERENCE
}
