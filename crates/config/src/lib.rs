use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

mod reference;

pub use reference::{ConfigParam, config_reference};

// ── Summarizer ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Maximum changelog entries fed into a single component digest call.
    /// Older undigested entries are picked up by the next run.
    pub digest_batch_limit: usize,
    /// Number of recent global-changelog entries included in the weekly
    /// synthesis prompt.
    pub synthesis_recent_entries: usize,
    /// Number of recent weekly reports included in the monthly review prompt.
    pub review_recent_weeklies: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            digest_batch_limit: 50,
            synthesis_recent_entries: 50,
            review_recent_weeklies: 5,
        }
    }
}

// ── Language model ────────────────────────────────────────────────────────────

/// How completions are obtained.
///
/// | Mode       | Behaviour                                                  |
/// |------------|------------------------------------------------------------|
/// | `auto`     | Try host sampling first, fall back to the direct provider. |
/// | `sampling` | Host sampling only; fail when no capability is injected.   |
/// | `direct`   | HTTP provider only.                                        |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    #[default]
    Auto,
    Sampling,
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub mode: LlmMode,
    pub model: String,
    /// Chat-completions endpoint for the direct path.
    pub endpoint: String,
    /// Provider API key.  Overridden at runtime by the `PALACE_API_KEY`
    /// environment variable when set.
    pub api_key: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: LlmMode::Auto,
            model: "anthropic/claude-3.5-haiku".to_string(),
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            api_key: String::new(),
            max_tokens: 1024,
            timeout_secs: 30,
        }
    }
}

// ── Memory ingest ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    pub enabled: bool,
    /// Host files scanned for new material on each ingest run.
    pub watch_paths: Vec<String>,
    /// Bytes of trailing content ingested per changed file (0 = whole file).
    pub tail_bytes: u64,
}

// ── Decay ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Entries with a temperature below this value are archival candidates.
    pub threshold: f64,
    /// Entries younger than this many days are never candidates.
    pub max_age_days: i64,
    /// Entry ids exempt from archival (temperature pinned to 999).
    pub pinned_entries: Vec<String>,
    /// Component scopes excluded from decay entirely.
    pub excluded_components: Vec<String>,
    /// Archive records kept in decay state.
    pub archive_history_limit: usize,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            max_age_days: 30,
            pinned_entries: vec![],
            excluded_components: vec![],
            archive_history_limit: 50,
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Run the write validator on every decision entry automatically.
    pub auto_validate_decisions: bool,
    /// Run the write validator before summary updates.
    pub auto_validate_summaries: bool,
    /// Recent entries gathered per validation.
    pub recent_entries: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            auto_validate_decisions: true,
            auto_validate_summaries: false,
            recent_entries: 20,
        }
    }
}

// ── Workspace sync ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Host workspace directory.  Empty means "probe the candidates".
    pub workspace_path: String,
    /// Fallback directories probed when `workspace_path` is empty.
    pub workspace_candidates: Vec<String>,
    /// File names watched inside the workspace.
    pub watched_files: Vec<String>,
    /// The watched file mirrored bidirectionally into the primary entity's
    /// soul content.
    pub primary_file: String,
    /// Entity id the primary file maps to.
    pub primary_entity: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workspace_path: String::new(),
            workspace_candidates: vec!["~/workspace".to_string(), "~/agent".to_string()],
            watched_files: vec![
                "SOUL.md".to_string(),
                "IDENTITY.md".to_string(),
                "USER.md".to_string(),
            ],
            primary_file: "SOUL.md".to_string(),
            primary_entity: "main".to_string(),
        }
    }
}

// ── Search ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// `auto`, or a specific backend name (`qmd`, `bm25`, `simple`).
    pub backend: String,
    /// Schedule a debounced reindex after content-changing writes.
    pub auto_reindex: bool,
    /// Debounce window for the write-triggered reindex.
    pub reindex_debounce_ms: u64,
    /// External search CLI binary looked up on `$PATH`.
    pub qmd_bin: String,
    /// Collection name the external CLI maintains over the store.
    pub qmd_collection: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            auto_reindex: true,
            reindex_debounce_ms: 5000,
            qmd_bin: "qmd".to_string(),
            qmd_collection: "palace".to_string(),
        }
    }
}

// ── Onboarding ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingConfig {
    pub completed: bool,
    /// Entity created by `onboarding_init` unless `skip_agents` is set.
    pub default_entity_id: String,
    pub default_display_name: String,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            completed: false,
            default_entity_id: "main".to_string(),
            default_display_name: "Main Agent".to_string(),
        }
    }
}

// ── Root ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PalaceConfig {
    pub summarizer: SummarizerConfig,
    pub llm: LlmConfig,
    pub ingest: IngestConfig,
    pub decay: DecayConfig,
    pub validation: ValidationConfig,
    pub sync: SyncConfig,
    pub search: SearchConfig,
    pub onboarding: OnboardingConfig,
}

impl PalaceConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        // API key env override (takes precedence over the config file).
        if let Ok(key) = env::var("PALACE_API_KEY") {
            if !key.is_empty() {
                config.llm.api_key = key;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

// ── ConfigStore ───────────────────────────────────────────────────────────────

/// File-backed config with an in-process cache and dotted-path access.
///
/// Dotted-path writes (`system_configure` / `config_update`) route through
/// [`toml::Value`] so sibling keys are preserved exactly as written.
pub struct ConfigStore {
    path: PathBuf,
    cached: Mutex<Option<PalaceConfig>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write defaults to disk unless a config file already exists.
    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.path.exists() {
            PalaceConfig::default().save_to(&self.path)?;
            tracing::info!(path = %self.path.display(), "wrote default config");
        }
        Ok(())
    }

    pub fn get(&self) -> Result<PalaceConfig> {
        let mut cached = self.cached.lock().expect("config cache lock");
        if let Some(config) = cached.as_ref() {
            return Ok(config.clone());
        }
        let config = PalaceConfig::load_from(&self.path)?;
        *cached = Some(config.clone());
        Ok(config)
    }

    pub fn invalidate_cache(&self) {
        *self.cached.lock().expect("config cache lock") = None;
    }

    /// Read a single value (or a whole subsection) by dotted path.
    /// An empty path returns the full tree.
    pub fn get_path(&self, dotted: &str) -> Result<toml::Value> {
        let tree = self.load_tree()?;
        if dotted.is_empty() {
            return Ok(tree);
        }
        let mut node = &tree;
        for segment in dotted.split('.') {
            node = node
                .get(segment)
                .with_context(|| format!("unknown config path: {dotted}"))?;
        }
        Ok(node.clone())
    }

    /// Set a single value by dotted path, preserving all sibling keys, and
    /// invalidate the cache.  The new value must round-trip through
    /// [`PalaceConfig`] or the write is rejected.
    pub fn update_path(&self, dotted: &str, value: toml::Value) -> Result<()> {
        if dotted.is_empty() {
            bail!("config path must not be empty");
        }

        let mut tree = self.load_tree()?;
        let segments = dotted.split('.').collect::<Vec<_>>();
        let mut node = &mut tree;
        for segment in &segments[..segments.len() - 1] {
            let table = node
                .as_table_mut()
                .with_context(|| format!("config path {dotted} does not address a table"))?;
            node = table
                .entry(segment.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        }
        let leaf = segments[segments.len() - 1];
        node.as_table_mut()
            .with_context(|| format!("config path {dotted} does not address a table"))?
            .insert(leaf.to_string(), value);

        // Reject writes that produce an unreadable config.
        let rendered = toml::to_string_pretty(&tree)?;
        let _: PalaceConfig =
            toml::from_str(&rendered).with_context(|| format!("rejected write to {dotted}"))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, rendered)?;
        self.invalidate_cache();
        Ok(())
    }

    fn load_tree(&self) -> Result<toml::Value> {
        let raw = fs::read_to_string(&self.path).unwrap_or_default();
        if raw.trim().is_empty() {
            let rendered = toml::to_string_pretty(&PalaceConfig::default())?;
            return Ok(toml::from_str(&rendered)?);
        }
        Ok(toml::from_str(&raw)?)
    }
}

/// Parse a free-text value into a [`toml::Value`].
///
/// `system_configure` and `config_update` accept values as free text:
/// `"true"`, `"42"`, `"3.5"`, and `["a","b"]` become typed values, anything
/// else is a string.
pub fn parse_config_value(raw: &str) -> toml::Value {
    let trimmed = raw.trim();
    if let Ok(b) = trimmed.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return toml::Value::Integer(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return toml::Value::Float(f);
    }
    if trimmed.starts_with('[') {
        if let Ok(value) = toml::from_str::<toml::Value>(&format!("v = {trimmed}")) {
            if let Some(inner) = value.get("v") {
                return inner.clone();
            }
        }
    }
    toml::Value::String(trimmed.to_string())
}
