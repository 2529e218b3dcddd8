//! Changelog engine: dual-write of operation and decision entries.
//!
//! Every entry always lands in the month-bucketed global log; entries whose
//! scope resolves to an existing component are also appended to that
//! component's changelog.  Appends are whole-file read-modify-write because
//! the storage format is a structured document, not a log.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::doc;
use crate::error::PalaceError;
use crate::ids::year_month;
use crate::schema::{Alternative, ChangelogEntry, EntryKind, parse_scope};

use super::MemoryStore;

#[derive(Debug, Clone, Deserialize)]
pub struct RecordInput {
    pub scope: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub alternatives: Option<Vec<Alternative>>,
    pub summary: String,
    #[serde(default)]
    pub details: Option<String>,
    /// Force validation regardless of the auto-validate config.
    #[serde(default)]
    pub validate: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeRange {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangelogQuery {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<EntryKind>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl MemoryStore {
    /// Assign an id, stamp the time, and dual-write the entry.  Returns the
    /// recorded entry.  Validation is the caller's concern (advisory).
    pub fn changelog_record(&self, input: RecordInput) -> Result<ChangelogEntry> {
        if input.kind == EntryKind::Operation && input.alternatives.is_some() {
            return Err(PalaceError::InvalidArgument(
                "alternatives are only valid on decision entries".to_string(),
            )
            .into());
        }
        if input.summary.trim().is_empty() {
            return Err(PalaceError::InvalidArgument("summary is required".to_string()).into());
        }

        let entry = ChangelogEntry {
            id: self.ids.generate_id(input.kind)?,
            time: Utc::now(),
            agent: input.agent,
            kind: input.kind,
            scope: input.scope.clone(),
            action: input.action,
            target: input.target,
            decision: input.decision,
            rationale: input.rationale,
            alternatives: input.alternatives,
            summary: input.summary,
            details: input.details,
            commit: None,
        };

        // Component log first (when the scope resolves), global log always.
        if self.component_exists(&input.scope) {
            let (kind, key) = parse_scope(&input.scope)?;
            let path = self.paths.component_changelog(kind, key);
            let mut entries: Vec<ChangelogEntry> = doc::read_or_default(&path)?;
            entries.push(entry.clone());
            doc::write(&path, &entries)?;
        }

        let global = self.paths.global_changelog(&year_month(None));
        let mut entries: Vec<ChangelogEntry> = doc::read_or_default(&global)?;
        entries.push(entry.clone());
        doc::write(&global, &entries)?;

        Ok(entry)
    }

    /// Scoped queries read the component changelog; unscoped ones read this
    /// month's global log.  Newest first, default limit 20.
    pub fn changelog_query(&self, query: ChangelogQuery) -> Result<Vec<ChangelogEntry>> {
        let mut entries = match &query.scope {
            Some(scope) => self.component_entries(scope)?,
            None => self.global_entries(&year_month(None))?,
        };

        if let Some(kind) = query.kind {
            entries.retain(|e| e.kind == kind);
        }
        if let Some(agent) = &query.agent {
            entries.retain(|e| e.agent.as_deref() == Some(agent.as_str()));
        }
        if let Some(range) = &query.time_range {
            if let Some(from) = range.from {
                entries.retain(|e| e.time >= from);
            }
            if let Some(to) = range.to {
                entries.retain(|e| e.time <= to);
            }
        }

        entries.sort_by(|a, b| b.time.cmp(&a.time));
        entries.truncate(query.limit.unwrap_or(20));
        Ok(entries)
    }

    /// All entries of one component's changelog, file order.
    pub fn component_entries(&self, scope: &str) -> Result<Vec<ChangelogEntry>> {
        let (kind, key) = parse_scope(scope)?;
        doc::read_or_default(&self.paths.component_changelog(kind, key))
    }

    /// All entries of one global month bucket, file order.
    pub fn global_entries(&self, year_month: &str) -> Result<Vec<ChangelogEntry>> {
        doc::read_or_default(&self.paths.global_changelog(year_month))
    }

    /// Replace a component changelog wholesale (decay's removal path).
    pub fn write_component_entries(&self, scope: &str, entries: &[ChangelogEntry]) -> Result<()> {
        let (kind, key) = parse_scope(scope)?;
        doc::write(&self.paths.component_changelog(kind, key), &entries)
    }
}
