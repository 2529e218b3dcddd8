//! Write validator.
//!
//! Compares a proposed changelog or summary write against existing data and
//! returns a structured risk list.  The language model is the primary
//! judge; when the call fails the validator falls back to heuristic
//! duplicate detection.  Verdicts are advisory — callers decide whether a
//! non-passing result aborts anything (the built-in changelog policy is:
//! record anyway, return the risks).

use std::sync::Arc;

use anyhow::Result;
use palace_config::ConfigStore;
use palace_llm::LlmCaller;
use palace_memory::{ChangelogEntry, MemoryStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    Duplicate,
    Contradiction,
    Hallucination,
    StaleOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    #[serde(rename = "type")]
    pub kind: RiskKind,
    pub severity: RiskSeverity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicting_entry_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationReport {
    fn passed_clean() -> Self {
        Self { passed: true, risks: vec![], suggestion: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationKind {
    Changelog,
    Summary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationInput {
    pub scope: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: ValidationKind,
    #[serde(default)]
    pub existing_entries: Option<Vec<ChangelogEntry>>,
    #[serde(default)]
    pub existing_summary: Option<String>,
}

pub struct WriteValidator {
    store: Arc<MemoryStore>,
    llm: Arc<LlmCaller>,
    config: Arc<ConfigStore>,
}

impl WriteValidator {
    pub fn new(store: Arc<MemoryStore>, llm: Arc<LlmCaller>, config: Arc<ConfigStore>) -> Self {
        Self { store, llm, config }
    }

    pub async fn validate_write(&self, input: ValidationInput) -> Result<ValidationReport> {
        let recent_limit = self.config.get().map(|c| c.validation.recent_entries).unwrap_or(20);

        let entries = match input.existing_entries {
            Some(entries) => entries,
            None => {
                let mut entries = self
                    .store
                    .component_entries(&input.scope)
                    .unwrap_or_default();
                entries.sort_by(|a, b| b.time.cmp(&a.time));
                entries.truncate(recent_limit);
                entries
            }
        };
        let summary = match input.existing_summary {
            Some(summary) => Some(summary),
            None => self.store.component_summary_peek(&input.scope).ok(),
        };

        // Nothing to conflict with.
        if entries.is_empty() && summary.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Ok(ValidationReport::passed_clean());
        }

        match self.validate_with_model(&input.content, &entries, summary.as_deref()).await {
            Ok(report) => Ok(report),
            Err(err) => {
                debug!(%err, "model validation unavailable, using heuristic duplicate check");
                Ok(heuristic_duplicates(&input.content, &entries, summary.as_deref()))
            }
        }
    }

    async fn validate_with_model(
        &self,
        content: &str,
        entries: &[ChangelogEntry],
        summary: Option<&str>,
    ) -> Result<ValidationReport> {
        let mut context = String::new();
        context.push_str("NEW CONTENT:\n");
        context.push_str(content);
        context.push_str("\n\nRECENT ENTRIES:\n");
        for entry in entries {
            context.push_str(&format!("- [{}] {}", entry.id, entry.summary));
            if let Some(decision) = &entry.decision {
                context.push_str(&format!(" | decision: {decision}"));
            }
            if let Some(rationale) = &entry.rationale {
                context.push_str(&format!(" | rationale: {rationale}"));
            }
            context.push('\n');
        }
        if let Some(summary) = summary {
            context.push_str("\nCURRENT SUMMARY:\n");
            context.push_str(summary);
            context.push('\n');
        }

        let reply = self
            .llm
            .ask(VALIDATOR_SYSTEM_PROMPT, &context, Some(512))
            .await?;

        let stripped = strip_code_fences(&reply);
        match serde_json::from_str::<ValidationReport>(stripped) {
            Ok(report) => Ok(report),
            Err(err) => Ok(ValidationReport {
                passed: true,
                risks: vec![Risk {
                    kind: RiskKind::Hallucination,
                    severity: RiskSeverity::Info,
                    description: format!("validator reply was not parseable JSON ({err})"),
                    conflicting_entry_id: None,
                }],
                suggestion: None,
            }),
        }
    }
}

const VALIDATOR_SYSTEM_PROMPT: &str = "You are a memory-write validator. Compare NEW CONTENT \
against the recent entries and current summary. Output STRICT JSON only, no prose, shaped as \
{\"passed\": bool, \"risks\": [{\"type\": \"duplicate\"|\"contradiction\"|\"hallucination\"|\"stale_override\", \
\"severity\": \"error\"|\"warning\"|\"info\", \"description\": string, \"conflicting_entry_id\": string?}], \
\"suggestion\": string?}. Pass unless there is a concrete conflict.";

/// Lowercase-trim equality, or containment in either direction for contents
/// longer than 20 characters.
fn heuristic_duplicates(
    content: &str,
    entries: &[ChangelogEntry],
    summary: Option<&str>,
) -> ValidationReport {
    let needle = content.trim().to_lowercase();
    let mut risks = Vec::new();

    let is_dup = |existing: &str| {
        let existing = existing.trim().to_lowercase();
        if existing.is_empty() {
            return false;
        }
        existing == needle
            || (needle.len() > 20 && (existing.contains(&needle) || needle.contains(&existing)))
    };

    for entry in entries {
        let hit = is_dup(&entry.summary)
            || entry.decision.as_deref().map(is_dup).unwrap_or(false);
        if hit {
            risks.push(Risk {
                kind: RiskKind::Duplicate,
                severity: RiskSeverity::Warning,
                description: format!("near-duplicate of existing entry {}", entry.id),
                conflicting_entry_id: Some(entry.id.clone()),
            });
        }
    }
    if let Some(summary) = summary {
        if is_dup(summary) {
            risks.push(Risk {
                kind: RiskKind::Duplicate,
                severity: RiskSeverity::Warning,
                description: "content duplicates the current summary".to_string(),
                conflicting_entry_id: None,
            });
        }
    }

    ValidationReport {
        passed: risks.is_empty(),
        risks,
        suggestion: None,
    }
}

/// Strip a single ```...``` wrapper (with optional language tag) from a
/// model reply.
fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map(str::trim).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use palace_config::{LlmConfig, LlmMode};
    use palace_llm::sampling_from_fn;
    use palace_memory::{ComponentKind, EntryKind, StorePaths};

    fn entry(id: &str, summary: &str, decision: Option<&str>) -> ChangelogEntry {
        ChangelogEntry {
            id: id.to_string(),
            time: Utc::now(),
            agent: None,
            kind: EntryKind::Decision,
            scope: "projects/alpha".to_string(),
            action: None,
            target: None,
            decision: decision.map(str::to_string),
            rationale: None,
            alternatives: None,
            summary: summary.to_string(),
            details: None,
            commit: None,
        }
    }

    fn harness(reply: Option<&'static str>) -> (tempfile::TempDir, WriteValidator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open(StorePaths::new(dir.path())).unwrap());
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
        (dir, WriteValidator::new(store, Arc::new(caller), config))
    }

    #[tokio::test]
    async fn empty_history_passes() {
        let (_dir, validator) = harness(None);
        let report = validator
            .validate_write(ValidationInput {
                scope: "projects/alpha".to_string(),
                content: "anything".to_string(),
                kind: ValidationKind::Changelog,
                existing_entries: None,
                existing_summary: None,
            })
            .await
            .unwrap();
        assert!(report.passed);
        assert!(report.risks.is_empty());
    }

    #[tokio::test]
    async fn model_verdict_is_parsed_through_fences() {
        let (_dir, validator) = harness(Some(
            "```json\n{\"passed\": false, \"risks\": [{\"type\": \"contradiction\", \
             \"severity\": \"error\", \"description\": \"conflicts with dec_0101_001\", \
             \"conflicting_entry_id\": \"dec_0101_001\"}]}\n```",
        ));
        let report = validator
            .validate_write(ValidationInput {
                scope: "projects/alpha".to_string(),
                content: "switch everything to Store Y".to_string(),
                kind: ValidationKind::Changelog,
                existing_entries: Some(vec![entry("dec_0101_001", "keep Store X", Some("Use Store X"))]),
                existing_summary: None,
            })
            .await
            .unwrap();
        assert!(!report.passed);
        assert_eq!(report.risks[0].kind, RiskKind::Contradiction);
        assert_eq!(report.risks[0].conflicting_entry_id.as_deref(), Some("dec_0101_001"));
    }

    #[tokio::test]
    async fn unparseable_model_reply_passes_with_info_risk() {
        let (_dir, validator) = harness(Some("Looks fine to me!"));
        let report = validator
            .validate_write(ValidationInput {
                scope: "projects/alpha".to_string(),
                content: "new idea".to_string(),
                kind: ValidationKind::Changelog,
                existing_entries: Some(vec![entry("op_0101_001", "prior work", None)]),
                existing_summary: None,
            })
            .await
            .unwrap();
        assert!(report.passed);
        assert_eq!(report.risks.len(), 1);
        assert_eq!(report.risks[0].severity, RiskSeverity::Info);
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_heuristics() {
        // No sampling capability: the model path errors, heuristics run.
        let (_dir, validator) = harness(None);
        let report = validator
            .validate_write(ValidationInput {
                scope: "projects/alpha".to_string(),
                content: "Use Store X for persistence layer".to_string(),
                kind: ValidationKind::Changelog,
                existing_entries: Some(vec![entry(
                    "dec_0101_001",
                    "decided persistence",
                    Some("use store x for persistence layer"),
                )]),
                existing_summary: None,
            })
            .await
            .unwrap();
        assert!(!report.passed);
        assert_eq!(report.risks[0].kind, RiskKind::Duplicate);
        assert_eq!(report.risks[0].severity, RiskSeverity::Warning);
    }

    #[test]
    fn heuristic_containment_needs_length() {
        // Short strings only match on equality, never containment.
        let report = heuristic_duplicates("fix", &[entry("op_1", "prefix fixation", None)], None);
        assert!(report.passed);

        let report = heuristic_duplicates(
            "refactored the tokenizer for lookahead",
            &[entry("op_2", "yesterday we refactored the tokenizer for lookahead support", None)],
            None,
        );
        assert!(!report.passed);
    }

    #[test]
    fn fence_stripping_variants() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
