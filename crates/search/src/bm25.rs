//! Embedded BM25 backend over a tantivy index.
//!
//! The index lives in `.search-index/` inside the store (git-ignored) and is
//! built lazily: the first search after boot triggers a full build, and
//! `reindex` rebuilds from scratch.  Availability means the index directory
//! is usable.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use palace_memory::{MemoryStore, PalaceError};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, STORED, STRING, Schema, TEXT, Value};
use tantivy::{Index, ReloadPolicy, TantivyDocument, doc};
use tokio::sync::Mutex;

use crate::docs::{collect_documents, scope_matches};
use crate::{SearchBackend, SearchResult};

const WRITER_HEAP_BYTES: usize = 50_000_000;

struct Bm25Fields {
    id: Field,
    content: Field,
    source: Field,
    component: Field,
}

struct Bm25State {
    index: Index,
    fields: Bm25Fields,
    built: bool,
}

pub struct Bm25Backend {
    store: Arc<MemoryStore>,
    index_dir: PathBuf,
    state: Mutex<Option<Bm25State>>,
}

impl Bm25Backend {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        let index_dir = store.paths().search_index_dir();
        Self {
            store,
            index_dir,
            state: Mutex::new(None),
        }
    }

    fn open_index(&self) -> Result<Bm25State> {
        let mut schema_builder = Schema::builder();
        let id = schema_builder.add_text_field("id", STRING | STORED);
        let content = schema_builder.add_text_field("content", TEXT | STORED);
        let source = schema_builder.add_text_field("source", STRING | STORED);
        let component = schema_builder.add_text_field("component", STRING | STORED);
        let schema = schema_builder.build();

        std::fs::create_dir_all(&self.index_dir)?;
        let index = if self.index_dir.join("meta.json").exists() {
            Index::open_in_dir(&self.index_dir)?
        } else {
            Index::create_in_dir(&self.index_dir, schema)?
        };

        Ok(Bm25State {
            index,
            fields: Bm25Fields { id, content, source, component },
            built: false,
        })
    }

    async fn ensure_built(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_index()?);
        }
        let state = guard.as_mut().expect("state just initialised");
        if !state.built {
            Self::rebuild(&self.store, state)?;
            state.built = true;
        }
        Ok(())
    }

    fn rebuild(store: &MemoryStore, state: &mut Bm25State) -> Result<usize> {
        let documents = collect_documents(store)?;
        let mut writer = state.index.writer(WRITER_HEAP_BYTES)?;
        writer.delete_all_documents()?;
        for document in &documents {
            writer.add_document(doc!(
                state.fields.id => document.id.as_str(),
                state.fields.content => document.content.as_str(),
                state.fields.source => document.source.as_str(),
                state.fields.component => document.component.clone().unwrap_or_default(),
            ))?;
        }
        writer.commit()?;
        Ok(documents.len())
    }

    fn stored_text(doc: &TantivyDocument, field: Field) -> String {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl SearchBackend for Bm25Backend {
    fn name(&self) -> &'static str {
        "bm25"
    }

    /// Usable iff the index directory can be created/opened.
    async fn available(&self) -> bool {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return true;
        }
        match self.open_index() {
            Ok(state) => {
                *guard = Some(state);
                true
            }
            Err(_) => false,
        }
    }

    async fn search(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_built().await?;
        let guard = self.state.lock().await;
        let state = guard
            .as_ref()
            .ok_or_else(|| PalaceError::BackingStore("bm25 index unopened".to_string()))?;

        let reader = state
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let searcher = reader.searcher();

        let parser = QueryParser::for_index(&state.index, vec![state.fields.content]);
        let parsed = match parser.parse_query(query) {
            Ok(parsed) => parsed,
            // Operator-looking user input is not an error; treat as no hits.
            Err(_) => return Ok(vec![]),
        };

        // Over-fetch so a scope filter still fills the limit.
        let top = searcher.search(&parsed, &TopDocs::with_limit(limit.max(1) * 3))?;
        let mut hits = Vec::new();
        for (score, address) in top {
            let document: TantivyDocument = searcher.doc(address)?;
            let component = Self::stored_text(&document, state.fields.component);
            let component = (!component.is_empty()).then_some(component);
            if let Some(scope) = scope {
                if !scope_matches(component.as_deref(), scope) {
                    continue;
                }
            }
            hits.push(SearchResult {
                id: Self::stored_text(&document, state.fields.id),
                content: Self::stored_text(&document, state.fields.content),
                source: Self::stored_text(&document, state.fields.source),
                score,
                component,
            });
            if hits.len() >= limit {
                break;
            }
        }
        Ok(hits)
    }

    async fn reindex(&self) -> Result<usize> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_index()?);
        }
        let state = guard.as_mut().expect("state just initialised");
        let count = Self::rebuild(&self.store, state)?;
        state.built = true;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palace_memory::{ComponentKind, EntryKind, RecordInput, StorePaths};

    fn seeded() -> (tempfile::TempDir, Bm25Backend) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::open(StorePaths::new(dir.path())).unwrap());
        store
            .component_create(ComponentKind::Projects, "alpha", "# Alpha\nParser work.")
            .unwrap();
        store
            .component_create(ComponentKind::Knowledge, "rust", "# Rust\nOwnership notes.")
            .unwrap();
        for (scope, summary) in [
            ("projects/alpha", "refactored the tokenizer for lookahead"),
            ("knowledge/rust", "borrow checker rejects aliased mutation"),
        ] {
            store
                .changelog_record(RecordInput {
                    scope: scope.to_string(),
                    kind: EntryKind::Operation,
                    agent: None,
                    action: Some("note".to_string()),
                    target: None,
                    decision: None,
                    rationale: None,
                    alternatives: None,
                    summary: summary.to_string(),
                    details: None,
                    validate: None,
                })
                .unwrap();
        }
        (dir, Bm25Backend::new(store))
    }

    #[tokio::test]
    async fn lazy_build_then_search() {
        let (_dir, backend) = seeded();
        assert!(backend.available().await);
        let hits = backend.search("tokenizer lookahead", None, 10).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].component.as_deref(), Some("projects/alpha"));
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn scope_filters_components() {
        let (_dir, backend) = seeded();
        let hits = backend
            .search("borrow checker", Some("projects/alpha"), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
        let hits = backend
            .search("borrow checker", Some("knowledge/rust"), 10)
            .await
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn reindex_reports_document_count() {
        let (_dir, backend) = seeded();
        let count = backend.reindex().await.unwrap();
        // 2 entries + 2 summaries.
        assert_eq!(count, 4);
    }
}
