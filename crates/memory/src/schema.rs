use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PalaceError;

// ── Components ────────────────────────────────────────────────────────────────

/// The four knowledge-module types, each with a directory name and an L0 tag.
///
/// | Kind            | Directory       | Tag |
/// |-----------------|-----------------|-----|
/// | `Projects`      | `projects`      | `P` |
/// | `Knowledge`     | `knowledge`     | `K` |
/// | `Skills`        | `skills`        | `C` |
/// | `Relationships` | `relationships` | `R` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Projects,
    Knowledge,
    Skills,
    Relationships,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 4] = [
        Self::Projects,
        Self::Knowledge,
        Self::Skills,
        Self::Relationships,
    ];

    pub fn dir(self) -> &'static str {
        match self {
            Self::Projects => "projects",
            Self::Knowledge => "knowledge",
            Self::Skills => "skills",
            Self::Relationships => "relationships",
        }
    }

    pub fn tag(self) -> char {
        match self {
            Self::Projects => 'P',
            Self::Knowledge => 'K',
            Self::Skills => 'C',
            Self::Relationships => 'R',
        }
    }

    pub fn from_dir(dir: &str) -> Option<Self> {
        match dir {
            "projects" => Some(Self::Projects),
            "knowledge" => Some(Self::Knowledge),
            "skills" => Some(Self::Skills),
            "relationships" => Some(Self::Relationships),
            _ => None,
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'P' => Some(Self::Projects),
            'K' => Some(Self::Knowledge),
            'C' => Some(Self::Skills),
            'R' => Some(Self::Relationships),
            _ => None,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// Split a `<type>/<key>` scope string into its parts.
pub fn parse_scope(scope: &str) -> Result<(ComponentKind, &str)> {
    let (dir, key) = scope
        .split_once('/')
        .ok_or_else(|| PalaceError::InvalidArgument(format!("scope must be <type>/<key>: {scope}")))?;
    let kind = ComponentKind::from_dir(dir)
        .ok_or_else(|| PalaceError::InvalidArgument(format!("unknown component type: {dir}")))?;
    if key.is_empty() || key.contains('/') || key.contains("..") {
        return Err(PalaceError::InvalidArgument(format!("bad component key: {key}")).into());
    }
    Ok((kind, key))
}

// ── Changelog ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Operation,
    Decision,
}

impl EntryKind {
    /// Id prefix: `op_MMDD_NNN` / `dec_MMDD_NNN`.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Operation => "op",
            Self::Decision => "dec",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub option: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_because: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Component scope (`<type>/<key>`) or a free-form system scope.
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<Alternative>>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

// ── Scratch ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchEntry {
    /// `s_MMDD_NNN`, unique within the calendar day across restarts.
    pub id: String,
    pub time: DateTime<Utc>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// `"agent"` or `ingest:<file-stem>`.
    pub source: String,
    /// Component scope this note was promoted into.  Never cleared once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Blocked,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTask {
    pub description: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockers: Option<Vec<String>>,
}

/// The single overwrite-only working-state document agents reload after
/// their own context is truncated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub current_focus: String,
    #[serde(default)]
    pub active_tasks: Vec<ActiveTask>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub recent_decisions: Vec<String>,
    #[serde(default)]
    pub context_notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_meta: Option<serde_yaml::Value>,
}

// ── Entities ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionEntry {
    pub time: DateTime<Utc>,
    /// Where the change came from (`mp.entity.update_soul`, `workspace_sync`, …).
    pub source: String,
    pub change_summary: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMapping {
    pub agent_id: String,
    #[serde(default)]
    pub watched_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub soul_content: String,
    /// Append-only; every soul change appends exactly one entry.
    #[serde(default)]
    pub evolution_log: Vec<EvolutionEntry>,
    #[serde(default)]
    pub host_mappings: BTreeMap<String, HostMapping>,
}

// ── Relationships ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    User,
    Agent,
    External,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileDetails {
    pub style: String,
    pub expertise: Vec<String>,
    pub language_pref: Vec<String>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionTag {
    pub tag: String,
    pub count: u64,
    pub last: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustDelta {
    pub date: DateTime<Utc>,
    /// The caller's argument, not the clamped effective change.
    pub delta: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipProfile {
    pub entity_id: String,
    #[serde(rename = "type")]
    pub kind: RelationKind,
    #[serde(default)]
    pub profile: ProfileDetails,
    #[serde(default)]
    pub interaction_tags: Vec<InteractionTag>,
    /// Clamped to `[0.0, 1.0]` after every delta.
    pub trust_score: f64,
    #[serde(default)]
    pub trust_history: Vec<TrustDelta>,
}

impl RelationshipProfile {
    pub fn new(entity_id: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            profile: ProfileDetails::default(),
            interaction_tags: vec![],
            trust_score: 0.5,
            trust_history: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parses_and_rejects() {
        let (kind, key) = parse_scope("projects/alpha").unwrap();
        assert_eq!(kind, ComponentKind::Projects);
        assert_eq!(key, "alpha");
        assert!(parse_scope("alpha").is_err());
        assert!(parse_scope("widgets/alpha").is_err());
        assert!(parse_scope("projects/a/b").is_err());
        assert!(parse_scope("projects/../etc").is_err());
    }

    #[test]
    fn tags_round_trip() {
        for kind in ComponentKind::ALL {
            assert_eq!(ComponentKind::from_tag(kind.tag()), Some(kind));
            assert_eq!(ComponentKind::from_dir(kind.dir()), Some(kind));
        }
        assert_eq!(ComponentKind::from_tag('S'), None);
    }

    #[test]
    fn changelog_entry_yaml_round_trip() {
        let entry = ChangelogEntry {
            id: "dec_0802_001".to_string(),
            time: Utc::now(),
            agent: Some("main".to_string()),
            kind: EntryKind::Decision,
            scope: "projects/alpha".to_string(),
            action: None,
            target: None,
            decision: Some("Use Store X".to_string()),
            rationale: Some("lowest operational burden".to_string()),
            alternatives: Some(vec![Alternative {
                option: "Store Y".to_string(),
                rejected_because: Some("no local mode".to_string()),
            }]),
            summary: "picked the backing store".to_string(),
            details: None,
            commit: None,
        };
        let yaml = serde_yaml::to_string(&vec![entry]).unwrap();
        assert!(yaml.contains("type: decision"));
        let back: Vec<ChangelogEntry> = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back[0].decision.as_deref(), Some("Use Store X"));
        assert_eq!(back[0].alternatives.as_ref().unwrap().len(), 1);
    }
}
