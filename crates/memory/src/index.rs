//! L0 master index.
//!
//! One markdown document whose operational part is a fenced code block of
//! `[TAG] key | status…` lines with a trailing legend.  The block is kept
//! small enough to sit in an agent's context permanently; everything else
//! in the store is reached from here.

use anyhow::Result;
use chrono::Utc;

use crate::doc;
use crate::error::PalaceError;
use crate::ids::format_mmdd;
use crate::paths::StorePaths;
use crate::schema::ComponentKind;

pub const LEGEND: &str =
    "Legend: ★ active · ○ paused · ● done · ✕ blocked · ⟳MMDD updated · → focus · ⚑ blocker";

const HEADER: &str = "# Master Index\n\nAlways-in-context map of the store. \
Tags: [P] projects · [K] knowledge · [C] skills · [R] relationships · [S] systems.\n";

/// A parsed `[TAG] key | status` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub tag: char,
    pub key: String,
    pub status: String,
}

impl IndexEntry {
    pub fn render(&self) -> String {
        format!("[{}] {} | {}", self.tag, self.key, self.status)
    }

    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let rest = line.strip_prefix('[')?;
        let (tag, rest) = {
            let mut chars = rest.chars();
            let tag = chars.next()?;
            (tag, chars.as_str())
        };
        let rest = rest.strip_prefix("] ")?;
        let (key, status) = rest.split_once(" | ")?;
        Some(Self {
            tag,
            key: key.trim().to_string(),
            status: status.trim().to_string(),
        })
    }

    /// Component scope for non-system entries.
    pub fn scope(&self) -> Option<String> {
        let kind = ComponentKind::from_tag(self.tag)?;
        Some(format!("{}/{}", kind.dir(), self.key))
    }
}

pub struct MasterIndex {
    paths: StorePaths,
}

impl MasterIndex {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    /// `MMDD` stamp for `⟳` status fields.
    pub fn format_date() -> String {
        format_mmdd(Utc::now().date_naive())
    }

    /// Write the scaffold document unless one exists.
    pub fn ensure_initialized(&self) -> Result<()> {
        if self.paths.index_master().exists() {
            return Ok(());
        }
        self.write_block(&[])
    }

    /// The full document.  Callers treat this as always-in-context.
    pub fn get(&self) -> Result<String> {
        doc::read_text_opt(&self.paths.index_master())?
            .ok_or_else(|| PalaceError::NotFound("index/master.md".to_string()).into())
    }

    /// All entry lines inside the code block, in document order.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        let document = match doc::read_text_opt(&self.paths.index_master())? {
            Some(document) => document,
            None => return Ok(vec![]),
        };
        Ok(block_lines(&document)
            .iter()
            .filter_map(|line| IndexEntry::parse(line))
            .collect())
    }

    /// Case-insensitive substring match over entry lines.  `scope` narrows
    /// to one component (`<type>/<key>`) or one type directory.
    pub fn search(&self, query: &str, scope: Option<&str>) -> Result<Vec<String>> {
        let needle = query.to_lowercase();
        let entries = self.entries()?;
        let mut hits = Vec::new();
        for entry in entries {
            if let Some(scope) = scope {
                let matches_scope = match scope.split_once('/') {
                    Some((dir, key)) => {
                        ComponentKind::from_dir(dir).map(ComponentKind::tag) == Some(entry.tag)
                            && entry.key == key
                    }
                    None => ComponentKind::from_dir(scope).map(ComponentKind::tag) == Some(entry.tag),
                };
                if !matches_scope {
                    continue;
                }
            }
            let line = entry.render();
            if line.to_lowercase().contains(&needle) {
                hits.push(line);
            }
        }
        Ok(hits)
    }

    /// Upsert by `(tag, key)`: replace the existing line, or insert before
    /// the legend; when neither anchor is present, append inside the block.
    pub fn update_entry(&self, tag: char, key: &str, status: &str) -> Result<()> {
        let mut entries = self.entries()?;
        let rendered = IndexEntry {
            tag,
            key: key.to_string(),
            status: status.to_string(),
        };
        match entries.iter_mut().find(|e| e.tag == tag && e.key == key) {
            Some(existing) => *existing = rendered,
            None => entries.push(rendered),
        }
        self.write_block(&entries)
    }

    /// Refresh the `⟳MMDD` field of an existing line, inserting a default
    /// active line when the component is not yet indexed.
    pub fn touch_entry(&self, tag: char, key: &str) -> Result<()> {
        let today = Self::format_date();
        let entries = self.entries()?;
        let status = match entries.iter().find(|e| e.tag == tag && e.key == key) {
            Some(existing) => {
                let mut fields = existing
                    .status
                    .split(" | ")
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                let mut replaced = false;
                for field in &mut fields {
                    if field.starts_with('⟳') {
                        *field = format!("⟳{today}");
                        replaced = true;
                    }
                }
                if !replaced {
                    fields.push(format!("⟳{today}"));
                }
                fields.join(" | ")
            }
            None => format!("★ active | ⟳{today}"),
        };
        self.update_entry(tag, key, &status)
    }

    pub fn remove_entry(&self, tag: char, key: &str) -> Result<bool> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|e| !(e.tag == tag && e.key == key));
        if entries.len() == before {
            return Ok(false);
        }
        self.write_block(&entries)?;
        Ok(true)
    }

    /// Replace the whole code block with a rebuilt set of lines (monthly
    /// review).  The legend is re-included regardless of the input.
    pub fn replace_block(&self, lines: &[String]) -> Result<()> {
        let entries = lines
            .iter()
            .filter_map(|line| IndexEntry::parse(line))
            .collect::<Vec<_>>();
        self.write_block(&entries)
    }

    fn write_block(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut out = String::from(HEADER);
        out.push_str("\n```\n");
        for entry in entries {
            out.push_str(&entry.render());
            out.push('\n');
        }
        out.push_str(LEGEND);
        out.push_str("\n```\n");
        doc::write_text(&self.paths.index_master(), &out)
    }
}

/// Non-empty, non-legend lines inside the first fenced code block.
fn block_lines(document: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut inside = false;
    for line in document.lines() {
        if line.trim_start().starts_with("```") {
            if inside {
                break;
            }
            inside = true;
            continue;
        }
        if inside {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("Legend:") {
                continue;
            }
            lines.push(trimmed.to_string());
        }
    }
    lines
}
