//! Identifier and time services.
//!
//! Changelog ids (`op_MMDD_NNN` / `dec_MMDD_NNN`) share one per-day counter;
//! scratch ids (`s_MMDD_NNN`) have their own.  On the first id of each
//! calendar day the counter is recovered by scanning the current on-disk
//! documents, so same-day restarts never repeat an id.

use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::error::PalaceError;
use crate::paths::StorePaths;
use crate::schema::EntryKind;

pub fn iso_now() -> DateTime<Utc> {
    Utc::now()
}

/// `YYYY-MM` bucket for the global changelog and archives.
pub fn year_month(date: Option<NaiveDate>) -> String {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    date.format("%Y-%m").to_string()
}

/// `YYYY-Www` ISO-week bucket for weekly synthesis reports.
pub fn year_week(date: Option<NaiveDate>) -> String {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let week = date.iso_week();
    format!("{:04}-W{:02}", week.year(), week.week())
}

/// `MMDD` stamp used in ids and L0 status fields.
pub fn format_mmdd(date: NaiveDate) -> String {
    date.format("%m%d").to_string()
}

#[derive(Debug, Default)]
struct DayCounter {
    mmdd: String,
    next: u32,
}

#[derive(Debug, Default)]
struct IdState {
    /// Last calendar date an id was handed out for, used to detect a clock
    /// that moved backwards within one process lifetime.
    last_date: Option<NaiveDate>,
    changelog: DayCounter,
    scratch: DayCounter,
}

pub struct IdService {
    paths: StorePaths,
    state: Mutex<IdState>,
}

impl IdService {
    pub fn new(paths: StorePaths) -> Self {
        Self {
            paths,
            state: Mutex::new(IdState::default()),
        }
    }

    /// Next changelog id for `kind`.  `op` and `dec` draw from the same
    /// daily counter, so ids are strictly ordered across both kinds.
    pub fn generate_id(&self, kind: EntryKind) -> Result<String> {
        let today = Utc::now().date_naive();
        let mmdd = format_mmdd(today);
        let mut state = self.state.lock().expect("id state lock");
        Self::check_clock(&mut state, today)?;

        if state.changelog.mmdd != mmdd {
            let recovered = self.max_counter_in_file(
                &self.paths.global_changelog(&year_month(Some(today))),
                &["op", "dec"],
                &mmdd,
            )?;
            state.changelog = DayCounter { mmdd: mmdd.clone(), next: recovered + 1 };
        }

        let n = state.changelog.next;
        state.changelog.next += 1;
        Ok(format!("{}_{}_{:03}", kind.id_prefix(), mmdd, n))
    }

    /// Next scratch id (`s_MMDD_NNN`), recovered from today's scratch file.
    pub fn scratch_id(&self) -> Result<String> {
        let today = Utc::now().date_naive();
        let mmdd = format_mmdd(today);
        let mut state = self.state.lock().expect("id state lock");
        Self::check_clock(&mut state, today)?;

        if state.scratch.mmdd != mmdd {
            let recovered =
                self.max_counter_in_file(&self.paths.scratch_file(today), &["s"], &mmdd)?;
            state.scratch = DayCounter { mmdd: mmdd.clone(), next: recovered + 1 };
        }

        let n = state.scratch.next;
        state.scratch.next += 1;
        Ok(format!("s_{}_{:03}", mmdd, n))
    }

    /// Drop the in-memory counters; the next id re-scans the store.
    pub fn reset(&self) {
        *self.state.lock().expect("id state lock") = IdState::default();
    }

    fn check_clock(state: &mut IdState, today: NaiveDate) -> Result<()> {
        if let Some(last) = state.last_date {
            if today < last {
                return Err(PalaceError::InvalidTime {
                    today: today.to_string(),
                    last_seen: last.to_string(),
                }
                .into());
            }
        }
        state.last_date = Some(today);
        Ok(())
    }

    /// Scan a document's raw text for `{prefix}_{mmdd}_NNN` tokens and
    /// return the maximum `NNN` observed (0 when none).  Operates on text
    /// rather than the parsed document so recovery still works when the
    /// file is partially damaged.
    fn max_counter_in_file(&self, path: &std::path::Path, prefixes: &[&str], mmdd: &str) -> Result<u32> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(PalaceError::BackingStore(format!(
                    "scanning {} for id recovery: {e}",
                    path.display()
                ))
                .into());
            }
        };

        let mut max = 0u32;
        for prefix in prefixes {
            let needle = format!("{prefix}_{mmdd}_");
            let mut rest = raw.as_str();
            while let Some(pos) = rest.find(&needle) {
                let after = &rest[pos + needle.len()..];
                let digits = after.chars().take_while(|c| c.is_ascii_digit()).collect::<String>();
                if digits.len() == 3 {
                    if let Ok(n) = digits.parse::<u32>() {
                        max = max.max(n);
                    }
                }
                rest = &rest[pos + needle.len()..];
            }
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, IdService) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        paths.ensure_layout().unwrap();
        (dir, IdService::new(paths))
    }

    #[test]
    fn ids_share_one_daily_counter() {
        let (_dir, ids) = service();
        let a = ids.generate_id(EntryKind::Operation).unwrap();
        let b = ids.generate_id(EntryKind::Decision).unwrap();
        assert!(a.starts_with("op_") && a.ends_with("_001"));
        assert!(b.starts_with("dec_") && b.ends_with("_002"));
    }

    #[test]
    fn scratch_counter_is_independent() {
        let (_dir, ids) = service();
        ids.generate_id(EntryKind::Operation).unwrap();
        let s = ids.scratch_id().unwrap();
        assert!(s.starts_with("s_") && s.ends_with("_001"));
    }

    #[test]
    fn counter_recovers_from_month_log_across_restart() {
        let (dir, ids) = service();
        let mmdd = format_mmdd(Utc::now().date_naive());
        let paths = StorePaths::new(dir.path());
        // Seed the month log with ids up to 042 as raw text.
        std::fs::write(
            paths.global_changelog(&year_month(None)),
            format!("- id: op_{mmdd}_041\n- id: dec_{mmdd}_042\n"),
        )
        .unwrap();
        ids.reset();
        let next = ids.generate_id(EntryKind::Operation).unwrap();
        assert_eq!(next, format!("op_{mmdd}_043"));
    }

    #[test]
    fn recovery_ignores_other_days() {
        let (dir, ids) = service();
        let paths = StorePaths::new(dir.path());
        std::fs::write(
            paths.global_changelog(&year_month(None)),
            "- id: op_0101_099\n",
        )
        .unwrap();
        ids.reset();
        let next = ids.generate_id(EntryKind::Operation).unwrap();
        assert!(next.ends_with("_001"), "got {next}");
    }

    #[test]
    fn week_and_month_buckets() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(year_month(Some(date)), "2026-01");
        // 2026-01-01 falls in ISO week 2026-W01.
        assert_eq!(year_week(Some(date)), "2026-W01");
        let nye = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        // ISO week years differ from calendar years at the boundary.
        assert_eq!(year_week(Some(nye)), "2025-W01");
    }
}
