//! Decay engine: temperature-based archival of cold changelog entries.
//!
//! Temperature combines an age base, access bonuses, and a pin override.
//! Candidates must be past `decay.max_age_days` AND at or below the
//! summarizer's safe watermark — nothing leaves the live store before a
//! digest has covered it.  The watermark is recomputed at the start of
//! every preview/run.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palace_config::ConfigStore;
use palace_memory::{
    AccessLog, ChangelogEntry, HookBus, MemoryEvent, MemoryStore, PalaceError, doc, parse_scope,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::{System, SystemOutcome};
use crate::summarizer::safe_watermark;

pub const PIN_TEMPERATURE: f64 = 999.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub time: DateTime<Utc>,
    pub entries_moved: usize,
    pub components_affected: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecayState {
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default)]
    pub total_entries_archived: u64,
    #[serde(default)]
    pub total_runs: u64,
    /// Bounded to the newest `decay.archive_history_limit` records.
    #[serde(default)]
    pub history: Vec<ArchiveRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemperatureBreakdown {
    pub age_days: i64,
    pub age_base: f64,
    pub access_bonus: f64,
    pub reference_bonus: f64,
    pub pin_bonus: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecayCandidate {
    pub id: String,
    pub scope: String,
    pub time: DateTime<Utc>,
    pub summary: String,
    pub breakdown: TemperatureBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecayPreview {
    pub threshold: f64,
    pub safe_watermark: Option<DateTime<Utc>>,
    pub candidates: Vec<DecayCandidate>,
    /// Pinned entries that would otherwise have been candidates.
    pub pinned: Vec<DecayCandidate>,
}

fn age_base(days: i64) -> f64 {
    match days {
        d if d < 7 => 100.0,
        d if d < 30 => 80.0,
        d if d < 60 => 50.0,
        d if d < 90 => 20.0,
        _ => 5.0,
    }
}

pub struct DecayEngine {
    store: Arc<MemoryStore>,
    config: Arc<ConfigStore>,
    bus: Arc<HookBus>,
}

impl DecayEngine {
    pub fn new(store: Arc<MemoryStore>, config: Arc<ConfigStore>, bus: Arc<HookBus>) -> Self {
        Self { store, config, bus }
    }

    pub fn state(&self) -> Result<DecayState> {
        doc::read_or_default(&self.store.paths().decay_state())
    }

    fn temperature(
        &self,
        entry: &ChangelogEntry,
        scope: &str,
        pinned: &[String],
    ) -> Result<TemperatureBreakdown> {
        let age_days = (Utc::now() - entry.time).num_days();
        if pinned.iter().any(|p| p == &entry.id) {
            return Ok(TemperatureBreakdown {
                age_days,
                age_base: 0.0,
                access_bonus: 0.0,
                reference_bonus: 0.0,
                pin_bonus: PIN_TEMPERATURE,
                temperature: PIN_TEMPERATURE,
            });
        }

        let base = age_base(age_days);
        let entry_count = self.store.access().count(&AccessLog::entry_key(&entry.id))?;
        let access_bonus = (10.0 * entry_count as f64).min(50.0);
        let component_count = self
            .store
            .access()
            .count(&AccessLog::component_key(scope))?;
        let reference_bonus = if component_count > 0 { 20.0 } else { 0.0 };

        Ok(TemperatureBreakdown {
            age_days,
            age_base: base,
            access_bonus,
            reference_bonus,
            pin_bonus: 0.0,
            temperature: base + access_bonus + reference_bonus,
        })
    }

    /// Candidate selection without mutation.
    pub async fn preview(&self, threshold: Option<f64>) -> Result<DecayPreview> {
        let config = self.config.get()?.decay;
        let threshold = threshold.unwrap_or(config.threshold);
        let watermark = safe_watermark(&self.store)?;

        let mut candidates = Vec::new();
        let mut pinned_out = Vec::new();
        for scope in self.store.component_scopes()? {
            if config.excluded_components.contains(&scope) {
                continue;
            }
            for entry in self.store.component_entries(&scope)? {
                let breakdown = self.temperature(&entry, &scope, &config.pinned_entries)?;
                if breakdown.age_days < config.max_age_days {
                    continue;
                }
                match watermark {
                    Some(watermark) if entry.time <= watermark => {}
                    // No watermark yet, or entry newer than it: not safe.
                    _ => continue,
                }
                let candidate = DecayCandidate {
                    id: entry.id.clone(),
                    scope: scope.clone(),
                    time: entry.time,
                    summary: entry.summary.clone(),
                    breakdown,
                };
                if candidate.breakdown.pin_bonus > 0.0 {
                    pinned_out.push(candidate);
                } else if candidate.breakdown.temperature < threshold {
                    candidates.push(candidate);
                }
            }
        }

        Ok(DecayPreview {
            threshold,
            safe_watermark: watermark,
            candidates,
            pinned: pinned_out,
        })
    }

    /// Archive every candidate: remove from the live changelog, append to
    /// the per-component monthly archive, update decay state, commit.
    pub async fn run(&self) -> Result<SystemOutcome> {
        let config = self.config.get()?.decay;
        let preview = self.preview(None).await?;
        if preview.candidates.is_empty() {
            let message = "decay: no candidates below threshold".to_string();
            return Ok(SystemOutcome::ok(message));
        }

        let mut by_scope: BTreeMap<String, Vec<&DecayCandidate>> = BTreeMap::new();
        for candidate in &preview.candidates {
            by_scope.entry(candidate.scope.clone()).or_default().push(candidate);
        }

        let mut moved = 0usize;
        for (scope, chosen) in &by_scope {
            let ids = chosen.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
            let entries = self.store.component_entries(scope)?;
            let (archived, kept): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .partition(|e| ids.contains(&e.id.as_str()));

            // Aggregate archived entries into their calendar-month files.
            let (kind, key) = parse_scope(scope)?;
            let mut by_month: BTreeMap<String, Vec<ChangelogEntry>> = BTreeMap::new();
            for entry in archived {
                let month = entry.time.format("%Y-%m").to_string();
                by_month.entry(month).or_default().push(entry);
            }
            for (month, batch) in by_month {
                let path = self.store.paths().archive_changelog(kind, key, &month);
                let mut existing: Vec<ChangelogEntry> = doc::read_or_default(&path)?;
                moved += batch.len();
                existing.extend(batch);
                doc::write(&path, &existing)?;
            }

            self.store.write_component_entries(scope, &kept)?;
        }

        let mut state = self.state()?;
        let message = format!(
            "decay: archived {moved} entries from {} components",
            by_scope.len()
        );
        state.last_run = Some(Utc::now());
        state.last_result = Some(message.clone());
        state.total_entries_archived += moved as u64;
        state.total_runs += 1;
        state.history.push(ArchiveRecord {
            time: Utc::now(),
            entries_moved: moved,
            components_affected: by_scope.len(),
            reason: format!("temperature below {}", preview.threshold),
        });
        let keep = config.archive_history_limit.max(1);
        if state.history.len() > keep {
            let drop = state.history.len() - keep;
            state.history.drain(..drop);
        }
        doc::write(&self.store.paths().decay_state(), &state)?;

        info!(moved, components = by_scope.len(), "decay run archived entries");
        self.bus
            .emit(MemoryEvent::SystemExecute {
                scope: "system/decay".to_string(),
                summary: message.clone(),
            })
            .await;
        Ok(SystemOutcome::ok(message))
    }

    /// Add an entry id to `decay.pinned_entries`.  Pinning twice fails.
    pub fn pin(&self, entry_id: &str) -> Result<()> {
        let mut pinned = self.config.get()?.decay.pinned_entries;
        if pinned.iter().any(|p| p == entry_id) {
            return Err(PalaceError::AlreadyExists(format!("pin {entry_id}")).into());
        }
        pinned.push(entry_id.to_string());
        self.write_pins(pinned)
    }

    /// Remove a pin.  Unpinning an unpinned id fails.
    pub fn unpin(&self, entry_id: &str) -> Result<()> {
        let mut pinned = self.config.get()?.decay.pinned_entries;
        let before = pinned.len();
        pinned.retain(|p| p != entry_id);
        if pinned.len() == before {
            return Err(PalaceError::NotFound(format!("pin {entry_id}")).into());
        }
        self.write_pins(pinned)
    }

    fn write_pins(&self, pinned: Vec<String>) -> Result<()> {
        let value = toml::Value::Array(pinned.into_iter().map(toml::Value::String).collect());
        self.config.update_path("decay.pinned_entries", value)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DecayParams {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    threshold: Option<f64>,
}

#[async_trait]
impl System for DecayEngine {
    fn name(&self) -> &'static str {
        "decay"
    }

    fn describe(&self) -> &'static str {
        "temperature-based archival of cold changelog entries, gated by the digest watermark"
    }

    async fn status(&self) -> Result<serde_json::Value> {
        let state = self.state()?;
        Ok(serde_json::json!({
            "last_run": state.last_run,
            "last_result": state.last_result,
            "total_entries_archived": state.total_entries_archived,
            "total_runs": state.total_runs,
            "safe_watermark": safe_watermark(&self.store)?,
        }))
    }

    async fn execute(&self, params: serde_json::Value) -> Result<SystemOutcome> {
        let params: DecayParams = if params.is_null() {
            DecayParams::default()
        } else {
            serde_json::from_value(params)
                .map_err(|e| PalaceError::InvalidArgument(format!("decay params: {e}")))?
        };
        match params.action.as_deref().unwrap_or("run") {
            "preview" => {
                let preview = self.preview(params.threshold).await?;
                let count = preview.candidates.len();
                Ok(SystemOutcome::ok(format!("decay preview: {count} candidates"))
                    .with_details(serde_json::to_value(preview)?))
            }
            "run" => self.run().await,
            other => Err(PalaceError::InvalidArgument(format!(
                "unknown decay action: {other} (preview | run)"
            ))
            .into()),
        }
    }
}
