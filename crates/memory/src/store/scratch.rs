//! Scratch: append-only per-day working notes.
//!
//! Cheap to write, filtered out of default reads once promoted into a
//! component, and eventually rolled off by day bucket.

use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::doc;
use crate::error::PalaceError;
use crate::schema::ScratchEntry;

use super::MemoryStore;

#[derive(Debug, Clone, Deserialize)]
pub struct ScratchWrite {
    pub content: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScratchRead {
    /// Defaults to today.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Any-tag match.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub include_yesterday: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Promoted entries are excluded unless set.
    #[serde(default)]
    pub include_promoted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScratchStats {
    pub today: usize,
    pub yesterday: usize,
    pub unpromoted: usize,
}

impl MemoryStore {
    pub fn scratch_write(&self, input: ScratchWrite) -> Result<ScratchEntry> {
        if input.content.trim().is_empty() {
            return Err(PalaceError::InvalidArgument("scratch content is required".to_string()).into());
        }

        let entry = ScratchEntry {
            id: self.ids.scratch_id()?,
            time: Utc::now(),
            content: input.content,
            tags: input.tags.unwrap_or_default(),
            source: input.source.unwrap_or_else(|| "agent".to_string()),
            promoted_to: None,
        };

        let path = self.paths.scratch_file(Utc::now().date_naive());
        let mut entries: Vec<ScratchEntry> = doc::read_or_default(&path)?;
        entries.push(entry.clone());
        doc::write(&path, &entries)?;
        Ok(entry)
    }

    pub fn scratch_read(&self, input: ScratchRead) -> Result<Vec<ScratchEntry>> {
        let date = input.date.unwrap_or_else(|| Utc::now().date_naive());
        let mut entries: Vec<ScratchEntry> = doc::read_or_default(&self.paths.scratch_file(date))?;
        if input.include_yesterday {
            if let Some(yesterday) = date.checked_sub_days(Days::new(1)) {
                let mut more: Vec<ScratchEntry> =
                    doc::read_or_default(&self.paths.scratch_file(yesterday))?;
                entries.append(&mut more);
            }
        }

        if let Some(tags) = &input.tags {
            entries.retain(|e| e.tags.iter().any(|t| tags.contains(t)));
        }
        if !input.include_promoted {
            entries.retain(|e| e.promoted_to.is_none());
        }

        entries.sort_by(|a, b| b.time.cmp(&a.time));
        if let Some(limit) = input.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Attach a scratch entry to a component scope.  Looks in today's and
    /// yesterday's files; fails once promoted.
    pub fn scratch_promote(&self, scratch_id: &str, scope: &str) -> Result<ScratchEntry> {
        let today = Utc::now().date_naive();
        let days = [Some(today), today.checked_sub_days(Days::new(1))];
        for date in days.into_iter().flatten() {
            let path = self.paths.scratch_file(date);
            let mut entries: Vec<ScratchEntry> = doc::read_or_default(&path)?;
            if let Some(entry) = entries.iter_mut().find(|e| e.id == scratch_id) {
                if let Some(existing) = &entry.promoted_to {
                    return Err(PalaceError::AlreadyPromoted(
                        scratch_id.to_string(),
                        existing.clone(),
                    )
                    .into());
                }
                entry.promoted_to = Some(scope.to_string());
                let promoted = entry.clone();
                doc::write(&path, &entries)?;
                return Ok(promoted);
            }
        }
        Err(PalaceError::NotFound(format!("scratch entry {scratch_id}")).into())
    }

    /// Raw day-file read, promotion state included (indexers, ingest).
    pub fn scratch_entries_for(&self, date: NaiveDate) -> Result<Vec<ScratchEntry>> {
        doc::read_or_default(&self.paths.scratch_file(date))
    }

    pub fn scratch_stats(&self) -> Result<ScratchStats> {
        let today_date = Utc::now().date_naive();
        let today: Vec<ScratchEntry> =
            doc::read_or_default(&self.paths.scratch_file(today_date))?;
        let yesterday: Vec<ScratchEntry> = match today_date.checked_sub_days(Days::new(1)) {
            Some(date) => doc::read_or_default(&self.paths.scratch_file(date))?,
            None => vec![],
        };
        let unpromoted = today
            .iter()
            .chain(yesterday.iter())
            .filter(|e| e.promoted_to.is_none())
            .count();
        Ok(ScratchStats {
            today: today.len(),
            yesterday: yesterday.len(),
            unpromoted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::open_store;
    use super::*;

    fn note(content: &str, tags: &[&str]) -> ScratchWrite {
        ScratchWrite {
            content: content.to_string(),
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
            source: None,
        }
    }

    #[test]
    fn write_assigns_daily_sequential_ids() {
        let (_dir, store) = open_store();
        let a = store.scratch_write(note("first", &[])).unwrap();
        let b = store.scratch_write(note("second", &[])).unwrap();
        assert!(a.id.starts_with("s_"));
        assert!(a.id.ends_with("_001"));
        assert!(b.id.ends_with("_002"));
        assert_eq!(a.source, "agent");
    }

    #[test]
    fn read_filters_by_tag_newest_first() {
        let (_dir, store) = open_store();
        store.scratch_write(note("plain", &[])).unwrap();
        store.scratch_write(note("tagged", &["build"])).unwrap();
        let hits = store
            .scratch_read(ScratchRead {
                tags: Some(vec!["build".to_string()]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "tagged");

        let all = store.scratch_read(ScratchRead::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].time >= all[1].time);
    }

    #[test]
    fn promoted_entries_leave_default_reads() {
        let (_dir, store) = open_store();
        let entry = store.scratch_write(note("promote me", &[])).unwrap();
        store.scratch_write(note("stay", &[])).unwrap();
        store.scratch_promote(&entry.id, "projects/alpha").unwrap();

        let default_read = store.scratch_read(ScratchRead::default()).unwrap();
        assert_eq!(default_read.len(), 1);
        assert_eq!(default_read[0].content, "stay");

        let with_promoted = store
            .scratch_read(ScratchRead {
                include_promoted: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(with_promoted.len(), 2);
    }

    #[test]
    fn double_promotion_fails_without_mutating() {
        let (_dir, store) = open_store();
        let entry = store.scratch_write(note("once", &[])).unwrap();
        store.scratch_promote(&entry.id, "projects/alpha").unwrap();
        let err = store.scratch_promote(&entry.id, "projects/beta").unwrap_err();
        assert!(err.to_string().contains("already promoted"));

        let kept = store
            .scratch_read(ScratchRead {
                include_promoted: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(kept[0].promoted_to.as_deref(), Some("projects/alpha"));
    }

    #[test]
    fn promote_unknown_id_is_not_found() {
        let (_dir, store) = open_store();
        assert!(store.scratch_promote("s_0101_999", "projects/alpha").is_err());
    }

    #[test]
    fn stats_count_unpromoted() {
        let (_dir, store) = open_store();
        let a = store.scratch_write(note("a", &[])).unwrap();
        store.scratch_write(note("b", &[])).unwrap();
        store.scratch_promote(&a.id, "projects/alpha").unwrap();
        let stats = store.scratch_stats().unwrap();
        assert_eq!(stats.today, 2);
        assert_eq!(stats.yesterday, 0);
        assert_eq!(stats.unpromoted, 1);
    }
}
