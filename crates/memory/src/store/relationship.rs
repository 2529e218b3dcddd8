//! Relationship profiles: per-entity interaction memory with a clamped
//! trust scalar.
//!
//! The first touch of any entity creates a backing
//! `components/relationships/<entity_id>/` component so relationship
//! history participates in the changelog, index, and search like every
//! other component.

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;

use crate::doc;
use crate::schema::{
    ComponentKind, InteractionTag, ProfileDetails, RelationKind, RelationshipProfile, TrustDelta,
};

use super::MemoryStore;

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub entity_id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<RelationKind>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub expertise: Option<Vec<String>>,
    #[serde(default)]
    pub language_pref: Option<Vec<String>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl MemoryStore {
    pub fn relationship_get(&self, entity_id: &str) -> Result<Option<RelationshipProfile>> {
        doc::read_opt(&self.paths.relationship_profile(entity_id))
    }

    /// Merge profile fields; only supplied ones change.
    pub fn relationship_update_profile(&self, update: ProfileUpdate) -> Result<RelationshipProfile> {
        let mut profile = self.ensure_relationship(&update.entity_id, update.kind)?;
        if let Some(kind) = update.kind {
            profile.kind = kind;
        }
        let ProfileDetails { style, expertise, language_pref, notes } = &mut profile.profile;
        if let Some(value) = update.style {
            *style = value;
        }
        if let Some(value) = update.expertise {
            *expertise = value;
        }
        if let Some(value) = update.language_pref {
            *language_pref = value;
        }
        if let Some(value) = update.notes {
            *notes = value;
        }
        self.write_relationship(&profile)?;
        Ok(profile)
    }

    /// Accumulate interaction tags: repeats bump `count` and refresh `last`.
    pub fn relationship_log_interaction(
        &self,
        entity_id: &str,
        tags: &[String],
        note: Option<&str>,
    ) -> Result<RelationshipProfile> {
        let mut profile = self.ensure_relationship(entity_id, None)?;
        let now = Utc::now();
        for tag in tags {
            match profile.interaction_tags.iter_mut().find(|t| &t.tag == tag) {
                Some(existing) => {
                    existing.count += 1;
                    existing.last = now;
                    if let Some(note) = note {
                        existing.note = Some(note.to_string());
                    }
                }
                None => profile.interaction_tags.push(InteractionTag {
                    tag: tag.clone(),
                    count: 1,
                    last: now,
                    note: note.map(str::to_string),
                }),
            }
        }
        self.write_relationship(&profile)?;
        Ok(profile)
    }

    /// Apply a trust delta.  The score is clamped to `[0.0, 1.0]`; the
    /// history records the caller's raw delta.
    pub fn relationship_update_trust(
        &self,
        entity_id: &str,
        delta: f64,
        reason: &str,
    ) -> Result<RelationshipProfile> {
        let mut profile = self.ensure_relationship(entity_id, None)?;
        profile.trust_score = (profile.trust_score + delta).clamp(0.0, 1.0);
        profile.trust_history.push(TrustDelta {
            date: Utc::now(),
            delta,
            reason: reason.to_string(),
        });
        self.write_relationship(&profile)?;
        Ok(profile)
    }

    fn ensure_relationship(
        &self,
        entity_id: &str,
        kind: Option<RelationKind>,
    ) -> Result<RelationshipProfile> {
        if let Some(profile) = self.relationship_get(entity_id)? {
            return Ok(profile);
        }
        // First touch: back the profile with a real component.
        self.component_create(
            ComponentKind::Relationships,
            entity_id,
            &format!("# Relationship: {entity_id}\n\nNo summary yet.\n"),
        )?;
        Ok(RelationshipProfile::new(
            entity_id,
            kind.unwrap_or(RelationKind::External),
        ))
    }

    fn write_relationship(&self, profile: &RelationshipProfile) -> Result<()> {
        doc::write(&self.paths.relationship_profile(&profile.entity_id), profile)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::open_store;
    use super::*;

    #[test]
    fn first_touch_creates_backing_component() {
        let (_dir, store) = open_store();
        store
            .relationship_log_interaction("dana", &["code-review".to_string()], None)
            .unwrap();
        assert!(store.component_exists("relationships/dana"));
        let l0 = store.index().entries().unwrap();
        assert!(l0.iter().any(|e| e.tag == 'R' && e.key == "dana"));
    }

    #[test]
    fn tags_accumulate_counts() {
        let (_dir, store) = open_store();
        store
            .relationship_log_interaction("dana", &["code-review".to_string()], None)
            .unwrap();
        let profile = store
            .relationship_log_interaction(
                "dana",
                &["code-review".to_string(), "pairing".to_string()],
                Some("thorough reviewer"),
            )
            .unwrap();
        let review = profile
            .interaction_tags
            .iter()
            .find(|t| t.tag == "code-review")
            .unwrap();
        assert_eq!(review.count, 2);
        assert_eq!(review.note.as_deref(), Some("thorough reviewer"));
        assert_eq!(
            profile.interaction_tags.iter().find(|t| t.tag == "pairing").unwrap().count,
            1
        );
    }

    #[test]
    fn trust_clamps_but_history_keeps_raw_delta() {
        let (_dir, store) = open_store();
        let profile = store
            .relationship_update_trust("dana", 0.9, "shipped the migration")
            .unwrap();
        assert_eq!(profile.trust_score, 1.0);
        assert_eq!(profile.trust_history[0].delta, 0.9);

        let profile = store
            .relationship_update_trust("dana", -5.0, "catastrophic rebase")
            .unwrap();
        assert_eq!(profile.trust_score, 0.0);
        assert_eq!(profile.trust_history[1].delta, -5.0);
        assert_eq!(profile.trust_history.len(), 2);
    }

    #[test]
    fn profile_update_merges_only_supplied_fields() {
        let (_dir, store) = open_store();
        store
            .relationship_update_profile(ProfileUpdate {
                entity_id: "dana".to_string(),
                kind: Some(RelationKind::User),
                style: Some("terse".to_string()),
                expertise: Some(vec!["databases".to_string()]),
                language_pref: None,
                notes: None,
            })
            .unwrap();
        let profile = store
            .relationship_update_profile(ProfileUpdate {
                entity_id: "dana".to_string(),
                kind: None,
                style: None,
                expertise: None,
                language_pref: Some(vec!["en".to_string()]),
                notes: Some("prefers diffs over prose".to_string()),
            })
            .unwrap();
        assert_eq!(profile.kind, RelationKind::User);
        assert_eq!(profile.profile.style, "terse");
        assert_eq!(profile.profile.expertise, vec!["databases"]);
        assert_eq!(profile.profile.language_pref, vec!["en"]);
    }

    #[test]
    fn default_trust_starts_at_midpoint() {
        let (_dir, store) = open_store();
        let profile = store
            .relationship_update_trust("new-agent", 0.0, "first contact")
            .unwrap();
        assert_eq!(profile.trust_score, 0.5);
        assert_eq!(profile.kind, RelationKind::External);
    }
}
