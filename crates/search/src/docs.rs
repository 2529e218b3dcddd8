//! The shared L2 document set the embedded backends index: one document per
//! changelog entry, one per component summary (truncated), and one per
//! scratch entry for today and yesterday.

use anyhow::Result;
use chrono::{Days, Utc};
use palace_memory::MemoryStore;

/// Summaries are truncated to keep index documents bounded.
const SUMMARY_INDEX_LIMIT: usize = 4000;

#[derive(Debug, Clone)]
pub struct SearchDoc {
    pub id: String,
    pub content: String,
    pub source: String,
    pub component: Option<String>,
}

pub fn collect_documents(store: &MemoryStore) -> Result<Vec<SearchDoc>> {
    let mut documents = Vec::new();

    for scope in store.component_scopes()? {
        for entry in store.component_entries(&scope)? {
            let mut content = entry.summary.clone();
            for extra in [&entry.decision, &entry.rationale, &entry.details] {
                if let Some(extra) = extra {
                    content.push('\n');
                    content.push_str(extra);
                }
            }
            documents.push(SearchDoc {
                id: entry.id.clone(),
                content,
                source: "changelog".to_string(),
                component: Some(scope.clone()),
            });
        }

        if let Ok(summary) = store.component_summary_peek(&scope) {
            let truncated = truncate_chars(&summary, SUMMARY_INDEX_LIMIT);
            documents.push(SearchDoc {
                id: format!("summary:{scope}"),
                content: truncated,
                source: "summary".to_string(),
                component: Some(scope.clone()),
            });
        }
    }

    let today = Utc::now().date_naive();
    for date in [Some(today), today.checked_sub_days(Days::new(1))].into_iter().flatten() {
        for entry in store.scratch_entries_for(date)? {
            documents.push(SearchDoc {
                id: entry.id.clone(),
                content: entry.content.clone(),
                source: "scratch".to_string(),
                component: entry.promoted_to.clone(),
            });
        }
    }

    Ok(documents)
}

pub(crate) fn scope_matches(component: Option<&str>, scope: &str) -> bool {
    match component {
        Some(component) => component == scope || component.starts_with(&format!("{scope}/")),
        None => false,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use palace_memory::{ComponentKind, RecordInput, ScratchWrite, StorePaths};

    #[test]
    fn collects_entries_summaries_and_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(StorePaths::new(dir.path())).unwrap();
        store
            .component_create(ComponentKind::Projects, "alpha", "# Alpha summary")
            .unwrap();
        store
            .changelog_record(RecordInput {
                scope: "projects/alpha".to_string(),
                kind: palace_memory::EntryKind::Operation,
                agent: None,
                action: Some("create".to_string()),
                target: None,
                decision: None,
                rationale: None,
                alternatives: None,
                summary: "created test file".to_string(),
                details: Some("touch tests/alpha.rs".to_string()),
                validate: None,
            })
            .unwrap();
        store
            .scratch_write(ScratchWrite {
                content: "remember the flaky CI job".to_string(),
                tags: None,
                source: None,
            })
            .unwrap();

        let documents = collect_documents(&store).unwrap();
        let sources = documents.iter().map(|d| d.source.as_str()).collect::<Vec<_>>();
        assert!(sources.contains(&"changelog"));
        assert!(sources.contains(&"summary"));
        assert!(sources.contains(&"scratch"));

        let entry_doc = documents.iter().find(|d| d.source == "changelog").unwrap();
        assert!(entry_doc.content.contains("created test file"));
        assert!(entry_doc.content.contains("touch tests/alpha.rs"));
        assert_eq!(entry_doc.component.as_deref(), Some("projects/alpha"));
    }

    #[test]
    fn scope_prefix_matching() {
        assert!(scope_matches(Some("projects/alpha"), "projects/alpha"));
        // A bare type directory acts as a prefix filter.
        assert!(scope_matches(Some("projects/alpha"), "projects"));
        assert!(!scope_matches(Some("knowledge/rust"), "projects"));
        assert!(!scope_matches(None, "projects/alpha"));
    }
}
