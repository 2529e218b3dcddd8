//! The operation surface: named operations over JSON arguments, each
//! yielding a human-readable text payload and an error flag.
//!
//! Ordering inside every mutating operation: storage first, workspace
//! mirror second, event last.

use palace_config::parse_config_value;
use palace_memory::{
    ChangelogEntry, ChangelogQuery, ComponentKind, MemoryEvent, PalaceError, ProfileUpdate,
    RecordInput, ScratchRead, ScratchWrite, SnapshotInput,
};
use palace_systems::{ValidationInput, ValidationKind, ValidationReport};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::engine::Engine;

#[derive(Debug, Clone, serde::Serialize)]
pub struct OpResponse {
    pub text: String,
    pub is_error: bool,
}

fn parse<T: DeserializeOwned>(args: Value) -> anyhow::Result<T> {
    serde_json::from_value(args)
        .map_err(|e| PalaceError::InvalidArgument(format!("bad arguments: {e}")).into())
}

fn render_entries(entries: &[ChangelogEntry]) -> String {
    if entries.is_empty() {
        return "no entries".to_string();
    }
    entries
        .iter()
        .map(|e| {
            let mut line = format!(
                "[{}] {} {} — {}",
                e.id,
                e.time.format("%Y-%m-%d %H:%M"),
                e.scope,
                e.summary
            );
            if let Some(decision) = &e.decision {
                line.push_str(&format!("\n    decision: {decision}"));
            }
            if let Some(rationale) = &e.rationale {
                line.push_str(&format!("\n    rationale: {rationale}"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_risks(report: &ValidationReport) -> String {
    if report.risks.is_empty() {
        return String::new();
    }
    let mut out = String::from("\nvalidation risks:");
    for risk in &report.risks {
        out.push_str(&format!(
            "\n  - [{:?}/{:?}] {}",
            risk.kind, risk.severity, risk.description
        ));
        if let Some(id) = &risk.conflicting_entry_id {
            out.push_str(&format!(" (conflicts with {id})"));
        }
    }
    out
}

impl Engine {
    /// Route one decoded call.  Every failure comes back as text with
    /// `is_error = true`; nothing panics across this boundary.
    pub async fn handle(&self, op: &str, args: Value) -> OpResponse {
        match self.dispatch(op, args).await {
            Ok(text) => OpResponse { text, is_error: false },
            Err(err) => OpResponse {
                text: format!("{err:#}"),
                is_error: true,
            },
        }
    }

    async fn dispatch(&self, op: &str, args: Value) -> anyhow::Result<String> {
        match op {
            // ── Index ──────────────────────────────────────────────────────
            "index_get" => self.store.index().get(),
            "index_search" => {
                #[derive(Deserialize)]
                struct Args {
                    query: String,
                    #[serde(default)]
                    scope: Option<String>,
                }
                let args: Args = parse(args)?;
                let hits = self.store.index().search(&args.query, args.scope.as_deref())?;
                Ok(if hits.is_empty() {
                    format!("no index lines match {:?}", args.query)
                } else {
                    hits.join("\n")
                })
            }

            // ── Entity ─────────────────────────────────────────────────────
            "entity_list" => {
                let records = self.store.entity_list()?;
                Ok(if records.is_empty() {
                    "no entities".to_string()
                } else {
                    records
                        .iter()
                        .map(|r| format!("{} — {} ({})", r.entity_id, r.display_name, r.description))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
            "entity_get_soul" => {
                #[derive(Deserialize)]
                struct Args {
                    entity_id: String,
                }
                let args: Args = parse(args)?;
                let soul = self
                    .store
                    .entity_get_soul(&args.entity_id)?
                    .ok_or_else(|| PalaceError::NotFound(format!("entity {}", args.entity_id)))?;
                Ok(if soul.is_empty() {
                    format!("entity {} has no soul content yet", args.entity_id)
                } else {
                    soul
                })
            }
            "entity_get_full" => {
                #[derive(Deserialize)]
                struct Args {
                    entity_id: String,
                }
                let args: Args = parse(args)?;
                let record = self
                    .store
                    .entity_get(&args.entity_id)?
                    .ok_or_else(|| PalaceError::NotFound(format!("entity {}", args.entity_id)))?;
                Ok(serde_yaml::to_string(&record)?)
            }
            "entity_create" => {
                #[derive(Deserialize)]
                struct Args {
                    entity_id: String,
                    display_name: String,
                    description: String,
                    #[serde(default)]
                    soul_content: Option<String>,
                }
                let args: Args = parse(args)?;
                self.store.entity_create(
                    &args.entity_id,
                    &args.display_name,
                    &args.description,
                    args.soul_content.as_deref(),
                )?;
                self.bus
                    .emit(MemoryEvent::IdentityCreate {
                        scope: format!("entity/{}", args.entity_id),
                        summary: format!("created entity {}", args.display_name),
                    })
                    .await;
                Ok(format!("entity {} created", args.entity_id))
            }
            "entity_update_soul" => {
                #[derive(Deserialize)]
                struct Args {
                    entity_id: String,
                    content: String,
                    reason: String,
                }
                let args: Args = parse(args)?;
                self.store
                    .entity_update_soul(&args.entity_id, &args.content, &args.reason)?;
                let mirrored = self
                    .workspace_sync
                    .write_soul_to_workspace(&args.entity_id, &args.content)
                    .unwrap_or(false);
                self.bus
                    .emit(MemoryEvent::IdentityChange {
                        scope: format!("entity/{}", args.entity_id),
                        summary: args.reason.clone(),
                    })
                    .await;
                Ok(format!(
                    "soul updated ({})",
                    if mirrored { "mirrored to workspace" } else { "no workspace mirror" }
                ))
            }
            "entity_log_evolution" => {
                #[derive(Deserialize)]
                struct Args {
                    entity_id: String,
                    change_summary: String,
                    source: String,
                }
                let args: Args = parse(args)?;
                self.store
                    .entity_log_evolution(&args.entity_id, &args.change_summary, &args.source)?;
                self.bus
                    .emit(MemoryEvent::IdentityChange {
                        scope: format!("entity/{}", args.entity_id),
                        summary: args.change_summary.clone(),
                    })
                    .await;
                Ok("evolution entry appended".to_string())
            }

            // ── Component ──────────────────────────────────────────────────
            "component_list" => {
                #[derive(Deserialize, Default)]
                struct Args {
                    #[serde(default, rename = "type")]
                    kind: Option<String>,
                }
                let args: Args = if args.is_null() { Args::default() } else { parse(args)? };
                let kind = match args.kind.as_deref() {
                    Some(dir) => Some(ComponentKind::from_dir(dir).ok_or_else(|| {
                        PalaceError::InvalidArgument(format!("unknown component type: {dir}"))
                    })?),
                    None => None,
                };
                let infos = self.store.component_list(kind)?;
                Ok(if infos.is_empty() {
                    "no components".to_string()
                } else {
                    infos
                        .iter()
                        .map(|c| format!("{} ({} entries)", c.scope, c.entry_count))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
            "component_create" => {
                #[derive(Deserialize)]
                struct Args {
                    #[serde(rename = "type")]
                    kind: String,
                    key: String,
                    summary: String,
                }
                let args: Args = parse(args)?;
                let kind = ComponentKind::from_dir(&args.kind).ok_or_else(|| {
                    PalaceError::InvalidArgument(format!("unknown component type: {}", args.kind))
                })?;
                let scope = self.store.component_create(kind, &args.key, &args.summary)?;
                self.bus
                    .emit(MemoryEvent::ComponentCreate {
                        scope: scope.clone(),
                        summary: format!("created component {scope}"),
                    })
                    .await;
                Ok(format!("component {scope} created"))
            }
            "component_load" => {
                #[derive(Deserialize)]
                struct Args {
                    key: String,
                }
                let args: Args = parse(args)?;
                let loaded = self.store.component_load(&args.key)?;
                self.bus
                    .emit(MemoryEvent::ComponentLoad {
                        scope: args.key.clone(),
                        summary: format!("loaded {}", args.key),
                    })
                    .await;
                let mut text = format!("## {}\n{}", loaded.scope, loaded.summary);
                if !loaded.recent_changelog.is_empty() {
                    text.push_str("\n\nrecent changelog:\n");
                    text.push_str(&render_entries(&loaded.recent_changelog));
                }
                Ok(text)
            }
            "component_unload" => {
                #[derive(Deserialize)]
                struct Args {
                    key: String,
                }
                let args: Args = parse(args)?;
                let was_loaded = self.store.component_unload(&args.key);
                if was_loaded {
                    self.bus
                        .emit(MemoryEvent::ComponentUnload {
                            scope: args.key.clone(),
                            summary: format!("unloaded {}", args.key),
                        })
                        .await;
                }
                Ok(format!(
                    "{} {}",
                    args.key,
                    if was_loaded { "unloaded" } else { "was not loaded" }
                ))
            }
            "summary_get" => {
                #[derive(Deserialize)]
                struct Args {
                    key: String,
                }
                let args: Args = parse(args)?;
                self.store.component_summary_get(&args.key)
            }
            "summary_update" => {
                #[derive(Deserialize)]
                struct Args {
                    key: String,
                    content: String,
                }
                let args: Args = parse(args)?;
                let mut validation_note = String::new();
                if self.config.get()?.validation.auto_validate_summaries {
                    let report = self
                        .validator
                        .validate_write(ValidationInput {
                            scope: args.key.clone(),
                            content: args.content.clone(),
                            kind: ValidationKind::Summary,
                            existing_entries: None,
                            existing_summary: None,
                        })
                        .await?;
                    validation_note = render_risks(&report);
                }
                self.store.component_summary_update(&args.key, &args.content)?;
                self.bus
                    .emit(MemoryEvent::SummaryUpdate {
                        scope: args.key.clone(),
                        summary: format!("summary updated for {}", args.key),
                    })
                    .await;
                Ok(format!("summary updated{validation_note}"))
            }
            "summary_verify" => {
                #[derive(Deserialize)]
                struct Args {
                    key: String,
                }
                let args: Args = parse(args)?;
                self.store.component_summary_verify(&args.key)?;
                self.bus
                    .emit(MemoryEvent::SummaryUpdate {
                        scope: args.key.clone(),
                        summary: format!("summary verified for {}", args.key),
                    })
                    .await;
                Ok("summary verified".to_string())
            }

            // ── Changelog ──────────────────────────────────────────────────
            "changelog_record" => {
                let input: RecordInput = parse(args)?;
                let mut validation_note = String::new();
                let wants_validation = input.validate.unwrap_or(false)
                    || (input.kind == palace_memory::EntryKind::Decision
                        && self.config.get()?.validation.auto_validate_decisions);
                if wants_validation {
                    let mut content = input.summary.clone();
                    if let Some(decision) = &input.decision {
                        content.push_str("\n");
                        content.push_str(decision);
                    }
                    // Advisory: a non-passing verdict never aborts the record.
                    let report = self
                        .validator
                        .validate_write(ValidationInput {
                            scope: input.scope.clone(),
                            content,
                            kind: ValidationKind::Changelog,
                            existing_entries: None,
                            existing_summary: None,
                        })
                        .await?;
                    if !report.passed {
                        validation_note = render_risks(&report);
                    }
                }

                let entry = self.store.changelog_record(input)?;
                self.bus
                    .emit(MemoryEvent::ChangelogRecord {
                        scope: entry.scope.clone(),
                        summary: entry.summary.clone(),
                        entry_id: entry.id.clone(),
                    })
                    .await;
                Ok(format!("recorded {} in {}{validation_note}", entry.id, entry.scope))
            }
            "changelog_query" => {
                let query: ChangelogQuery = if args.is_null() {
                    ChangelogQuery::default()
                } else {
                    parse(args)?
                };
                let entries = self.store.changelog_query(query)?;
                Ok(render_entries(&entries))
            }
            "validate_write" => {
                let input: ValidationInput = parse(args)?;
                let report = self.validator.validate_write(input).await?;
                let verdict = if report.passed { "passed" } else { "NOT passed" };
                Ok(format!("validation {verdict}{}", render_risks(&report)))
            }

            // ── Scratch ────────────────────────────────────────────────────
            "scratch_write" => {
                let input: ScratchWrite = parse(args)?;
                let entry = self.store.scratch_write(input)?;
                self.bus
                    .emit(MemoryEvent::ScratchWrite {
                        scope: "scratch".to_string(),
                        summary: format!("scratch note {}", entry.id),
                        entry_id: entry.id.clone(),
                    })
                    .await;
                Ok(format!("wrote {}", entry.id))
            }
            "scratch_read" => {
                let input: ScratchRead = if args.is_null() {
                    ScratchRead::default()
                } else {
                    parse(args)?
                };
                let entries = self.store.scratch_read(input)?;
                Ok(if entries.is_empty() {
                    "no scratch entries".to_string()
                } else {
                    entries
                        .iter()
                        .map(|e| {
                            let tags = if e.tags.is_empty() {
                                String::new()
                            } else {
                                format!(" [{}]", e.tags.join(", "))
                            };
                            format!("[{}]{} {}", e.id, tags, e.content)
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
            "scratch_promote" => {
                #[derive(Deserialize)]
                struct Args {
                    scratch_id: String,
                    scope: String,
                }
                let args: Args = parse(args)?;
                let entry = self.store.scratch_promote(&args.scratch_id, &args.scope)?;
                self.bus
                    .emit(MemoryEvent::ScratchPromote {
                        scope: args.scope.clone(),
                        summary: format!("promoted {} into {}", entry.id, args.scope),
                        entry_id: entry.id.clone(),
                    })
                    .await;
                Ok(format!("promoted {} to {}", entry.id, args.scope))
            }
            "scratch_stats" => {
                let stats = self.store.scratch_stats()?;
                Ok(format!(
                    "today: {}, yesterday: {}, unpromoted: {}",
                    stats.today, stats.yesterday, stats.unpromoted
                ))
            }

            // ── Snapshot ───────────────────────────────────────────────────
            "snapshot_save" => {
                let input: SnapshotInput = parse(args)?;
                let snapshot = self.store.snapshot_save(input)?;
                self.bus
                    .emit(MemoryEvent::SnapshotSave {
                        scope: "snapshot".to_string(),
                        summary: format!("snapshot: {}", snapshot.current_focus),
                    })
                    .await;
                Ok(format!(
                    "snapshot saved ({} tasks, focus: {})",
                    snapshot.active_tasks.len(),
                    snapshot.current_focus
                ))
            }
            "snapshot_read" => match self.store.snapshot_read()? {
                Some(snapshot) => Ok(serde_yaml::to_string(&snapshot)?),
                None => Ok("no snapshot saved yet".to_string()),
            },

            // ── Relationship ───────────────────────────────────────────────
            "relationship_get" => {
                #[derive(Deserialize)]
                struct Args {
                    entity_id: String,
                }
                let args: Args = parse(args)?;
                match self.store.relationship_get(&args.entity_id)? {
                    Some(profile) => Ok(serde_yaml::to_string(&profile)?),
                    None => Err(
                        PalaceError::NotFound(format!("relationship {}", args.entity_id)).into(),
                    ),
                }
            }
            "relationship_update_profile" => {
                let update: ProfileUpdate = parse(args)?;
                let entity_id = update.entity_id.clone();
                self.store.relationship_update_profile(update)?;
                self.emit_relationship(&entity_id, "profile updated").await;
                Ok(format!("relationship profile updated for {entity_id}"))
            }
            "relationship_log_interaction" => {
                #[derive(Deserialize)]
                struct Args {
                    entity_id: String,
                    tags: Vec<String>,
                    #[serde(default)]
                    note: Option<String>,
                }
                let args: Args = parse(args)?;
                let profile = self.store.relationship_log_interaction(
                    &args.entity_id,
                    &args.tags,
                    args.note.as_deref(),
                )?;
                self.emit_relationship(&args.entity_id, "interaction logged").await;
                Ok(format!(
                    "interaction logged for {} ({} tags tracked)",
                    args.entity_id,
                    profile.interaction_tags.len()
                ))
            }
            "relationship_update_trust" => {
                #[derive(Deserialize)]
                struct Args {
                    entity_id: String,
                    delta: f64,
                    reason: String,
                }
                let args: Args = parse(args)?;
                let profile = self
                    .store
                    .relationship_update_trust(&args.entity_id, args.delta, &args.reason)?;
                self.emit_relationship(&args.entity_id, "trust adjusted").await;
                Ok(format!(
                    "trust for {} now {:.2} (delta {:+.2}: {})",
                    args.entity_id, profile.trust_score, args.delta, args.reason
                ))
            }

            // ── Search ─────────────────────────────────────────────────────
            "raw_search" => {
                #[derive(Deserialize)]
                struct Args {
                    query: String,
                    #[serde(default)]
                    scope: Option<String>,
                    #[serde(default)]
                    limit: Option<usize>,
                }
                let args: Args = parse(args)?;
                let hits = self
                    .router
                    .search_data(&args.query, args.scope.as_deref(), args.limit.unwrap_or(10))
                    .await?;
                Ok(if hits.is_empty() {
                    "no hits".to_string()
                } else {
                    hits.iter()
                        .map(|h| {
                            format!(
                                "({:.2}) [{}] {}{}",
                                h.score,
                                h.id,
                                h.content.lines().next().unwrap_or(""),
                                h.component
                                    .as_deref()
                                    .map(|c| format!(" — {c}"))
                                    .unwrap_or_default()
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
            "search_reindex" => {
                let count = self.router.reindex().await?;
                Ok(format!("reindexed {count} documents"))
            }
            "search_status" => {
                let status = self.router.status().await?;
                Ok(serde_json::to_string_pretty(&status)?)
            }

            // ── Decay ──────────────────────────────────────────────────────
            "decay_preview" => {
                #[derive(Deserialize, Default)]
                struct Args {
                    #[serde(default)]
                    threshold: Option<f64>,
                }
                let args: Args = if args.is_null() { Args::default() } else { parse(args)? };
                let preview = self.decay.preview(args.threshold).await?;
                let mut text = format!(
                    "threshold {}, watermark {}, {} candidates, {} pinned",
                    preview.threshold,
                    preview
                        .safe_watermark
                        .map(|w| w.to_rfc3339())
                        .unwrap_or_else(|| "none (nothing safe)".to_string()),
                    preview.candidates.len(),
                    preview.pinned.len()
                );
                for candidate in &preview.candidates {
                    text.push_str(&format!(
                        "\n  {} {} temp {:.0} (age {}d) — {}",
                        candidate.id,
                        candidate.scope,
                        candidate.breakdown.temperature,
                        candidate.breakdown.age_days,
                        candidate.summary
                    ));
                }
                for pinned in &preview.pinned {
                    text.push_str(&format!(
                        "\n  {} {} temp {:.0} (pinned)",
                        pinned.id, pinned.scope, pinned.breakdown.temperature
                    ));
                }
                Ok(text)
            }
            "decay_pin" => {
                #[derive(Deserialize)]
                struct Args {
                    entry_id: String,
                    action: String,
                }
                let args: Args = parse(args)?;
                match args.action.as_str() {
                    "pin" => self.decay.pin(&args.entry_id)?,
                    "unpin" => self.decay.unpin(&args.entry_id)?,
                    other => {
                        return Err(PalaceError::InvalidArgument(format!(
                            "unknown pin action: {other} (pin | unpin)"
                        ))
                        .into());
                    }
                }
                self.bus
                    .emit(MemoryEvent::SystemConfigure {
                        scope: "system/decay".to_string(),
                        summary: format!("{} {}", args.action, args.entry_id),
                    })
                    .await;
                Ok(format!("{}ned {}", args.action, args.entry_id))
            }

            // ── System ─────────────────────────────────────────────────────
            "system_list" => Ok(self
                .registry
                .list()
                .into_iter()
                .map(|(name, describe)| format!("{name} — {describe}"))
                .collect::<Vec<_>>()
                .join("\n")),
            "system_execute" => {
                #[derive(Deserialize)]
                struct Args {
                    name: String,
                    #[serde(default)]
                    params: Value,
                }
                let args: Args = parse(args)?;
                let outcome = self.registry.execute(&args.name, args.params).await?;
                let mut text = format!(
                    "[{}] {}",
                    if outcome.success { "ok" } else { "failed" },
                    outcome.message
                );
                if let Some(details) = outcome.details {
                    text.push_str(&format!("\n{}", serde_json::to_string_pretty(&details)?));
                }
                Ok(text)
            }
            "system_status" => {
                #[derive(Deserialize, Default)]
                struct Args {
                    #[serde(default)]
                    name: Option<String>,
                }
                let args: Args = if args.is_null() { Args::default() } else { parse(args)? };
                let status = self.registry.status(args.name.as_deref()).await?;
                Ok(serde_json::to_string_pretty(&status)?)
            }
            "system_configure" | "config_update" => {
                #[derive(Deserialize)]
                struct Args {
                    path: String,
                    value: Value,
                }
                let args: Args = parse(args)?;
                let value = match args.value {
                    Value::String(s) => parse_config_value(&s),
                    other => json_to_toml(other)?,
                };
                self.config.update_path(&args.path, value)?;
                // Cached choices derived from config are now stale.
                self.router.reset();
                self.bus
                    .emit(MemoryEvent::SystemConfigure {
                        scope: "config".to_string(),
                        summary: format!("set {}", args.path),
                    })
                    .await;
                Ok(format!("config {} updated", args.path))
            }

            // ── Config ─────────────────────────────────────────────────────
            "config_get" => {
                #[derive(Deserialize, Default)]
                struct Args {
                    #[serde(default)]
                    path: Option<String>,
                }
                let args: Args = if args.is_null() { Args::default() } else { parse(args)? };
                let value = self.config.get_path(args.path.as_deref().unwrap_or(""))?;
                // Scalars are not valid top-level TOML documents.
                Ok(match &value {
                    toml::Value::Table(_) => toml::to_string_pretty(&value)?,
                    other => other.to_string(),
                })
            }
            "config_reference" => {
                #[derive(Deserialize, Default)]
                struct Args {
                    #[serde(default)]
                    filter: Option<String>,
                }
                let args: Args = if args.is_null() { Args::default() } else { parse(args)? };
                let needle = args.filter.unwrap_or_default().to_lowercase();
                let rows = palace_config::config_reference()
                    .iter()
                    .filter(|p| {
                        needle.is_empty()
                            || p.path.to_lowercase().contains(&needle)
                            || p.system.to_lowercase().contains(&needle)
                    })
                    .map(|p| {
                        format!(
                            "{} ({}, default {}) — {} [{}]",
                            p.path, p.ty, p.default, p.description, p.system
                        )
                    })
                    .collect::<Vec<_>>();
                Ok(if rows.is_empty() {
                    "no matching tunables".to_string()
                } else {
                    rows.join("\n")
                })
            }

            // ── Onboarding ─────────────────────────────────────────────────
            "onboarding_status" => {
                let status = self.onboarding.status()?;
                Ok(format!(
                    "store_exists: {}, completed: {}, entities: {}, components: {}",
                    status.store_exists, status.completed, status.entity_count, status.component_count
                ))
            }
            "onboarding_init" => {
                #[derive(Deserialize, Default)]
                struct Args {
                    #[serde(default)]
                    skip_agents: bool,
                }
                let args: Args = if args.is_null() { Args::default() } else { parse(args)? };
                let status = self.onboarding.init(args.skip_agents).await?;
                Ok(format!(
                    "onboarding complete ({} entities, {} components)",
                    status.entity_count, status.component_count
                ))
            }

            other => Err(PalaceError::NotFound(format!("operation {other}")).into()),
        }
    }

    async fn emit_relationship(&self, entity_id: &str, summary: &str) {
        self.bus
            .emit(MemoryEvent::RelationshipUpdate {
                scope: format!("relationships/{entity_id}"),
                summary: format!("{summary} for {entity_id}"),
                entity_id: entity_id.to_string(),
            })
            .await;
    }
}

/// Convert a JSON argument value into the TOML value the config layer wants.
fn json_to_toml(value: Value) -> anyhow::Result<toml::Value> {
    let rendered = serde_json::to_string(&value)?;
    // Numbers, bools, arrays, and objects all survive this detour.
    toml::from_str::<toml::Value>(&format!("v = {rendered}"))
        .map(|t| t.get("v").cloned().unwrap_or(toml::Value::String(rendered)))
        .map_err(|e| PalaceError::InvalidArgument(format!("unsupported config value: {e}")).into())
}
