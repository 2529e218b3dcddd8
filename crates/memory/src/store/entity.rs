//! Entity registry: agent identities with an append-only evolution log.

use anyhow::Result;
use chrono::Utc;

use crate::doc;
use crate::error::PalaceError;
use crate::schema::{EntityRecord, EvolutionEntry};

use super::MemoryStore;

impl MemoryStore {
    pub fn entity_list(&self) -> Result<Vec<EntityRecord>> {
        let dir = self.paths.entities_dir();
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .map_err(|e| PalaceError::BackingStore(format!("read {}: {e}", dir.display())))?
        {
            let path = entry
                .map_err(|e| PalaceError::BackingStore(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(record) = doc::read_opt::<EntityRecord>(&path)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(records)
    }

    pub fn entity_get(&self, entity_id: &str) -> Result<Option<EntityRecord>> {
        doc::read_opt(&self.paths.entity_file(entity_id))
    }

    pub fn entity_get_soul(&self, entity_id: &str) -> Result<Option<String>> {
        Ok(self.entity_get(entity_id)?.map(|r| r.soul_content))
    }

    /// Create (or overwrite) an entity.  Re-creation keeps the existing
    /// evolution log and host mappings; identity fields are replaced.
    pub fn entity_create(
        &self,
        entity_id: &str,
        display_name: &str,
        description: &str,
        initial_soul: Option<&str>,
    ) -> Result<EntityRecord> {
        let existing = self.entity_get(entity_id)?;
        let mut record = match existing {
            Some(mut record) => {
                record.display_name = display_name.to_string();
                record.description = description.to_string();
                record
            }
            None => EntityRecord {
                entity_id: entity_id.to_string(),
                display_name: display_name.to_string(),
                description: description.to_string(),
                soul_content: String::new(),
                evolution_log: vec![],
                host_mappings: Default::default(),
            },
        };

        if let Some(soul) = initial_soul {
            record.soul_content = soul.to_string();
            record.evolution_log.push(EvolutionEntry {
                time: Utc::now(),
                source: "mp.entity.create".to_string(),
                change_summary: "initial soul content".to_string(),
                reference: None,
            });
        }

        doc::write(&self.paths.entity_file(entity_id), &record)?;
        Ok(record)
    }

    /// Replace the soul content, appending one evolution entry whose summary
    /// is `reason`.  The workspace mirror is the caller's next step.
    pub fn entity_update_soul(
        &self,
        entity_id: &str,
        content: &str,
        reason: &str,
    ) -> Result<EntityRecord> {
        let mut record = self
            .entity_get(entity_id)?
            .ok_or_else(|| PalaceError::NotFound(format!("entity {entity_id}")))?;
        record.soul_content = content.to_string();
        record.evolution_log.push(EvolutionEntry {
            time: Utc::now(),
            source: "mp.entity.update_soul".to_string(),
            change_summary: reason.to_string(),
            reference: None,
        });
        doc::write(&self.paths.entity_file(entity_id), &record)?;
        Ok(record)
    }

    pub fn entity_log_evolution(
        &self,
        entity_id: &str,
        change_summary: &str,
        source: &str,
    ) -> Result<EntityRecord> {
        let mut record = self
            .entity_get(entity_id)?
            .ok_or_else(|| PalaceError::NotFound(format!("entity {entity_id}")))?;
        record.evolution_log.push(EvolutionEntry {
            time: Utc::now(),
            source: source.to_string(),
            change_summary: change_summary.to_string(),
            reference: None,
        });
        doc::write(&self.paths.entity_file(entity_id), &record)?;
        Ok(record)
    }
}
