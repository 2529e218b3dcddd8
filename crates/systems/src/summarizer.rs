//! Summarizer pipeline: digest (daily) / synthesis (weekly) / review
//! (monthly), sharing one persistent state file.
//!
//! The per-component digest coverage map is the contract with the decay
//! engine: `safe_watermark` is the minimum last-digest time across all
//! components that have any changelog activity, and a component with
//! activity but no digest yet means nothing is safe to archive.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palace_config::ConfigStore;
use palace_llm::LlmCaller;
use palace_memory::{
    ChangelogEntry, HookBus, IndexEntry, MemoryEvent, MemoryStore, PalaceError, doc, year_month,
    year_week,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::registry::{System, SystemOutcome};

/// Separates the rebuilt L0 block from the review narrative in the monthly
/// review reply.
pub const REVIEW_SENTINEL: &str = "=== MONTHLY REVIEW ===";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizerState {
    #[serde(default)]
    pub last_digest: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_synthesis: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_review: Option<DateTime<Utc>>,
    /// Last-digested entry time per component scope.
    #[serde(default)]
    pub coverage: BTreeMap<String, DateTime<Utc>>,
}

/// The decay gate.  `None` means "no watermark yet" — some component with
/// changelog activity has never been digested, so nothing is safe.
pub fn safe_watermark(store: &MemoryStore) -> Result<Option<DateTime<Utc>>> {
    let state: SummarizerState = doc::read_or_default(&store.paths().summarizer_state())?;
    let mut minimum: Option<DateTime<Utc>> = None;
    for scope in store.component_scopes()? {
        if store.component_entries(&scope)?.is_empty() {
            continue;
        }
        match state.coverage.get(&scope) {
            Some(&covered) => {
                minimum = Some(match minimum {
                    Some(current) => current.min(covered),
                    None => covered,
                });
            }
            None => return Ok(None),
        }
    }
    Ok(minimum)
}

pub struct Summarizer {
    store: Arc<MemoryStore>,
    llm: Arc<LlmCaller>,
    config: Arc<ConfigStore>,
    bus: Arc<HookBus>,
}

impl Summarizer {
    pub fn new(
        store: Arc<MemoryStore>,
        llm: Arc<LlmCaller>,
        config: Arc<ConfigStore>,
        bus: Arc<HookBus>,
    ) -> Self {
        Self { store, llm, config, bus }
    }

    pub fn state(&self) -> Result<SummarizerState> {
        doc::read_or_default(&self.store.paths().summarizer_state())
    }

    fn save_state(&self, state: &SummarizerState) -> Result<()> {
        doc::write(&self.store.paths().summarizer_state(), state)
    }

    // ── Digest ─────────────────────────────────────────────────────────────

    /// Incremental per-component summaries.  `only` restricts to one scope.
    pub async fn run_digest(&self, only: Option<&str>) -> Result<SystemOutcome> {
        let batch_limit = self
            .config
            .get()
            .map(|c| c.summarizer.digest_batch_limit)
            .unwrap_or(50);
        let mut state = self.state()?;
        let scopes = match only {
            Some(scope) => vec![scope.to_string()],
            None => self.store.component_scopes()?,
        };

        let mut updated = 0usize;
        let mut skipped = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for scope in scopes {
            let mut entries = self.store.component_entries(&scope)?;
            let watermark = state.coverage.get(&scope).copied().or(state.last_digest);
            if let Some(watermark) = watermark {
                entries.retain(|e| e.time > watermark);
            }
            if entries.is_empty() {
                skipped += 1;
                continue;
            }
            entries.sort_by(|a, b| a.time.cmp(&b.time));
            entries.truncate(batch_limit);
            let latest = entries.last().map(|e| e.time).expect("non-empty batch");

            if !self.llm.is_available() {
                // No model: a digest pass still counts the entries as seen,
                // so decay can make progress against the watermark.
                state.coverage.insert(scope.clone(), latest);
                skipped += 1;
                continue;
            }

            match self.digest_component(&scope, &entries).await {
                Ok(summary) => {
                    self.store.component_summary_update(&scope, &summary)?;
                    state.coverage.insert(scope.clone(), latest);
                    updated += 1;
                }
                Err(err) => {
                    warn!(%scope, %err, "component digest failed");
                    errors.push(format!("{scope}: {err}"));
                }
            }
        }

        let success = errors.is_empty();
        if success {
            state.last_digest = Some(Utc::now());
        }
        self.save_state(&state)?;

        let message = if success {
            format!("digest: {updated} summaries updated, {skipped} components unchanged")
        } else {
            format!("digest: {updated} updated, {} failed: {}", errors.len(), errors.join("; "))
        };
        info!(updated, skipped, failed = errors.len(), "digest pass finished");
        self.bus
            .emit(MemoryEvent::SystemExecute {
                scope: "system/summarizer".to_string(),
                summary: message.clone(),
            })
            .await;

        Ok(SystemOutcome { success, message, details: None })
    }

    async fn digest_component(&self, scope: &str, entries: &[ChangelogEntry]) -> Result<String> {
        let current = self.store.component_summary_peek(scope).unwrap_or_default();
        let mut changes = String::new();
        for entry in entries {
            changes.push_str(&format!("- [{}] {}", entry.id, entry.summary));
            if let Some(decision) = &entry.decision {
                changes.push_str(&format!("\n  decision: {decision}"));
            }
            if let Some(rationale) = &entry.rationale {
                changes.push_str(&format!("\n  rationale: {rationale}"));
            }
            changes.push('\n');
        }
        let user = format!(
            "Component: {scope}\n\nCURRENT SUMMARY:\n{current}\n\nNEW CHANGELOG ENTRIES:\n{changes}"
        );
        let reply = self.llm.ask(DIGEST_SYSTEM_PROMPT, &user, Some(1500)).await?;
        if reply.trim().is_empty() {
            return Err(PalaceError::LlmMalformed("empty digest reply".to_string()).into());
        }
        Ok(reply.trim().to_string())
    }

    // ── Synthesis ──────────────────────────────────────────────────────────

    /// Weekly cross-component report under `index/weekly/YYYY-Www.md`.
    pub async fn run_synthesis(&self) -> Result<SystemOutcome> {
        let recent_limit = self
            .config
            .get()
            .map(|c| c.summarizer.synthesis_recent_entries)
            .unwrap_or(50);

        let mut corpus = String::new();
        for scope in self.store.component_scopes()? {
            if let Ok(summary) = self.store.component_summary_peek(&scope) {
                corpus.push_str(&format!("## {scope}\n{}\n\n", truncate_chars(&summary, 2000)));
            }
        }
        let mut entries = self.store.global_entries(&year_month(None))?;
        entries.sort_by(|a, b| b.time.cmp(&a.time));
        entries.truncate(recent_limit);
        let mut recent = String::new();
        for entry in &entries {
            recent.push_str(&format!("- [{}] {} — {}\n", entry.id, entry.scope, entry.summary));
        }

        let user = format!("COMPONENT SUMMARIES:\n{corpus}\nRECENT ACTIVITY:\n{recent}");
        let reply = self.llm.ask(SYNTHESIS_SYSTEM_PROMPT, &user, Some(2000)).await?;

        let bucket = year_week(None);
        doc::write_text(&self.store.paths().weekly_report(&bucket), reply.trim())?;

        let mut state = self.state()?;
        state.last_synthesis = Some(Utc::now());
        self.save_state(&state)?;

        let message = format!("synthesis: wrote weekly report {bucket}");
        self.bus
            .emit(MemoryEvent::SystemExecute {
                scope: "system/summarizer".to_string(),
                summary: message.clone(),
            })
            .await;
        Ok(SystemOutcome::ok(message))
    }

    // ── Review ─────────────────────────────────────────────────────────────

    /// Monthly L0 rebuild plus a narrative under `index/monthly/YYYY-MM.md`.
    pub async fn run_review(&self) -> Result<SystemOutcome> {
        let weekly_limit = self
            .config
            .get()
            .map(|c| c.summarizer.review_recent_weeklies)
            .unwrap_or(5);

        let l0 = self.store.index().get()?;
        let mut summaries = String::new();
        for scope in self.store.component_scopes()? {
            if let Ok(summary) = self.store.component_summary_peek(&scope) {
                summaries.push_str(&format!("## {scope}\n{}\n\n", truncate_chars(&summary, 1500)));
            }
        }
        let weeklies = self.recent_weeklies(weekly_limit)?;

        let user = format!(
            "CURRENT MASTER INDEX:\n{l0}\nCOMPONENT SUMMARIES:\n{summaries}\nRECENT WEEKLY REPORTS:\n{weeklies}"
        );
        let reply = self.llm.ask(&review_system_prompt(), &user, Some(3000)).await?;

        let (block, narrative) = reply.split_once(REVIEW_SENTINEL).ok_or_else(|| {
            PalaceError::LlmMalformed(format!("review reply missing sentinel {REVIEW_SENTINEL:?}"))
        })?;

        let lines = block
            .lines()
            .map(str::trim)
            .filter(|line| IndexEntry::parse(line).is_some())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if lines.is_empty() {
            return Err(PalaceError::LlmMalformed(
                "review reply contained no index lines".to_string(),
            )
            .into());
        }
        self.store.index().replace_block(&lines)?;

        let bucket = year_month(None);
        doc::write_text(&self.store.paths().monthly_report(&bucket), narrative.trim())?;

        let mut state = self.state()?;
        state.last_review = Some(Utc::now());
        self.save_state(&state)?;

        let message = format!("review: rebuilt L0 ({} lines), wrote monthly report {bucket}", lines.len());
        self.bus
            .emit(MemoryEvent::IndexUpdate {
                scope: "index/master".to_string(),
                summary: message.clone(),
            })
            .await;
        Ok(SystemOutcome::ok(message))
    }

    fn recent_weeklies(&self, limit: usize) -> Result<String> {
        let dir = self.store.paths().weekly_dir();
        let mut names: Vec<String> = match std::fs::read_dir(&dir) {
            Ok(read) => read
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|n| n.ends_with(".md"))
                .collect(),
            Err(_) => vec![],
        };
        names.sort();
        names.reverse();
        names.truncate(limit);

        let mut out = String::new();
        for name in names {
            if let Some(content) = doc::read_text_opt(&dir.join(&name))? {
                out.push_str(&format!("### {name}\n{}\n\n", truncate_chars(&content, 1500)));
            }
        }
        Ok(out)
    }
}

const DIGEST_SYSTEM_PROMPT: &str = "You maintain a component summary for an agent memory store. \
Integrate the new changelog entries into the current summary. Preserve the existing markdown \
structure and headings, keep it concise, and never drop information that is still current. \
Reply with the full updated summary only.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You write the weekly synthesis for an agent memory store. \
Produce a cross-component markdown report: themes, progress, open risks, and connections between \
components. Be specific and reference component scopes.";

fn review_system_prompt() -> String {
    format!(
        "You run the monthly review of an agent memory store. Reply in two parts separated by a \
line containing exactly `{REVIEW_SENTINEL}`. Part 1: the rebuilt master-index code block — one \
line per component and per system, format `[TAG] key | status`, using the glyphs \
★ active ○ paused ● done ✕ blocked ⟳MMDD → focus ⚑ blocker. Part 2: a monthly review narrative \
in markdown."
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── System surface ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SummarizerParams {
    level: String,
    #[serde(default)]
    scope: Option<String>,
}

#[async_trait]
impl System for Summarizer {
    fn name(&self) -> &'static str {
        "summarizer"
    }

    fn describe(&self) -> &'static str {
        "digest / synthesis / review passes maintaining summaries and the master index"
    }

    async fn status(&self) -> Result<serde_json::Value> {
        let state = self.state()?;
        Ok(serde_json::json!({
            "last_digest": state.last_digest,
            "last_synthesis": state.last_synthesis,
            "last_review": state.last_review,
            "components_covered": state.coverage.len(),
            "safe_watermark": safe_watermark(&self.store)?,
        }))
    }

    async fn execute(&self, params: serde_json::Value) -> Result<SystemOutcome> {
        let params: SummarizerParams = serde_json::from_value(params)
            .map_err(|e| PalaceError::InvalidArgument(format!("summarizer params: {e}")))?;
        // Model failures surface as `success = false`, never as a transport
        // error; only bad arguments bubble out as errors.
        let ran = match params.level.as_str() {
            "digest" => self.run_digest(params.scope.as_deref()).await,
            "synthesis" => self.run_synthesis().await,
            "review" => self.run_review().await,
            other => {
                return Err(PalaceError::InvalidArgument(format!(
                    "unknown summarizer level: {other} (digest | synthesis | review)"
                ))
                .into());
            }
        };
        Ok(ran.unwrap_or_else(|err| SystemOutcome::failed(err.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palace_config::{LlmConfig, LlmMode};
    use palace_llm::sampling_from_fn;
    use palace_memory::{ComponentKind, EntryKind, RecordInput, StorePaths};

    fn store_with_entries(dir: &tempfile::TempDir) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::open(StorePaths::new(dir.path())).unwrap());
        store
            .component_create(ComponentKind::Projects, "alpha", "# Alpha\nInitial.\n")
            .unwrap();
        for i in 0..3 {
            store
                .changelog_record(RecordInput {
                    scope: "projects/alpha".to_string(),
                    kind: EntryKind::Operation,
                    agent: None,
                    action: Some("work".to_string()),
                    target: None,
                    decision: None,
                    rationale: None,
                    alternatives: None,
                    summary: format!("step {i}"),
                    details: None,
                    validate: None,
                })
                .unwrap();
        }
        store
    }

    fn summarizer(
        dir: &tempfile::TempDir,
        store: Arc<MemoryStore>,
        reply: Option<&'static str>,
    ) -> Summarizer {
        let config = Arc::new(ConfigStore::new(dir.path().join("config.toml")));
        config.ensure_initialized().unwrap();
        let llm_config = LlmConfig { mode: LlmMode::Sampling, ..LlmConfig::default() };
        let caller = match reply {
            Some(reply) => LlmCaller::new(llm_config)
                .with_sampling(sampling_from_fn(move |_s, _u, _m| async move {
                    Ok(reply.to_string())
                })),
            None => LlmCaller::new(llm_config),
        };
        Summarizer::new(store, Arc::new(caller), config, Arc::new(HookBus::new()))
    }

    #[tokio::test]
    async fn digest_updates_summary_and_advances_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entries(&dir);
        let summarizer = summarizer(&dir, store.clone(), Some("# Alpha\nThree steps done.\n"));

        let outcome = summarizer.run_digest(None).await.unwrap();
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(
            store.component_summary_peek("projects/alpha").unwrap(),
            "# Alpha\nThree steps done."
        );
        let state = summarizer.state().unwrap();
        assert!(state.coverage.contains_key("projects/alpha"));
        assert!(state.last_digest.is_some());
        assert!(safe_watermark(&store).unwrap().is_some());
    }

    #[tokio::test]
    async fn digest_without_model_is_noop_but_advances_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entries(&dir);
        let summarizer = summarizer(&dir, store.clone(), None);

        let outcome = summarizer.run_digest(None).await.unwrap();
        assert!(outcome.success);
        // Summary untouched, coverage advanced anyway.
        assert_eq!(
            store.component_summary_peek("projects/alpha").unwrap(),
            "# Alpha\nInitial.\n"
        );
        assert!(safe_watermark(&store).unwrap().is_some());
    }

    #[tokio::test]
    async fn watermark_is_none_until_active_components_are_covered() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entries(&dir);
        assert!(safe_watermark(&store).unwrap().is_none());
    }

    #[tokio::test]
    async fn watermark_is_minimum_across_active_components() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entries(&dir);
        store
            .component_create(ComponentKind::Knowledge, "beta", "# Beta\n")
            .unwrap();
        store
            .changelog_record(RecordInput {
                scope: "knowledge/beta".to_string(),
                kind: EntryKind::Operation,
                agent: None,
                action: None,
                target: None,
                decision: None,
                rationale: None,
                alternatives: None,
                summary: "later work".to_string(),
                details: None,
                validate: None,
            })
            .unwrap();

        let earlier = Utc::now() - chrono::Duration::days(10);
        let later = Utc::now() - chrono::Duration::days(1);
        let state = SummarizerState {
            coverage: BTreeMap::from([
                ("projects/alpha".to_string(), earlier),
                ("knowledge/beta".to_string(), later),
            ]),
            ..Default::default()
        };
        doc::write(&store.paths().summarizer_state(), &state).unwrap();
        assert_eq!(safe_watermark(&store).unwrap(), Some(earlier));
    }

    #[tokio::test]
    async fn review_rebuilds_l0_and_writes_narrative() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entries(&dir);
        let reply = "```\n[P] alpha | ● done | ⟳0802\n[S] summarizer | idle\n```\n\
                     === MONTHLY REVIEW ===\nA quiet month with steady progress.";
        let summarizer = summarizer(&dir, store.clone(), Some(reply));

        let outcome = summarizer.run_review().await.unwrap();
        assert!(outcome.success);

        let entries = store.index().entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.tag == 'S' && e.key == "summarizer"));

        let monthly = doc::read_text_opt(&store.paths().monthly_report(&year_month(None)))
            .unwrap()
            .unwrap();
        assert!(monthly.contains("steady progress"));
        assert!(summarizer.state().unwrap().last_review.is_some());
    }

    #[tokio::test]
    async fn review_without_sentinel_fails_without_touching_l0() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entries(&dir);
        let summarizer = summarizer(&dir, store.clone(), Some("no sentinel here"));
        let before = store.index().get().unwrap();
        assert!(summarizer.run_review().await.is_err());
        assert_eq!(store.index().get().unwrap(), before);
        assert!(summarizer.state().unwrap().last_review.is_none());
    }

    #[tokio::test]
    async fn unknown_level_is_invalid_argument() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_entries(&dir);
        let summarizer = summarizer(&dir, store, Some("x"));
        let err = summarizer
            .execute(serde_json::json!({"level": "hourly"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown summarizer level"));
    }
}
