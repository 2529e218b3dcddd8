//! Always-available keyword backend.
//!
//! Zero state: every query re-scans the L2 document set.  Score is the
//! fraction of whitespace-split query terms present in the document,
//! case-insensitive.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use palace_memory::MemoryStore;

use crate::docs::{collect_documents, scope_matches};
use crate::{SearchBackend, SearchResult};

pub struct SimpleBackend {
    store: Arc<MemoryStore>,
}

impl SimpleBackend {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchBackend for SimpleBackend {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn available(&self) -> bool {
        true
    }

    async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let terms = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>();
        if terms.is_empty() {
            return Ok(vec![]);
        }

        let mut hits = Vec::new();
        for doc in collect_documents(&self.store)? {
            if let Some(scope) = scope {
                if !scope_matches(doc.component.as_deref(), scope) {
                    continue;
                }
            }
            let haystack = doc.content.to_lowercase();
            let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
            if matched == 0 {
                continue;
            }
            hits.push(SearchResult {
                id: doc.id,
                content: doc.content,
                source: doc.source,
                score: matched as f32 / terms.len() as f32,
                component: doc.component,
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Nothing to build — reports the scannable document count.
    async fn reindex(&self) -> Result<usize> {
        Ok(collect_documents(&self.store)?.len())
    }
}
