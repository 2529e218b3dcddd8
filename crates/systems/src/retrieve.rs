//! Retrieval+digest: progressive L0 → L1 → L2 retrieval with an optional
//! model synthesis step.
//!
//! The pass degrades gracefully: with no model available it returns the raw
//! hits plus summaries and still succeeds.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use palace_llm::LlmCaller;
use palace_memory::{IndexEntry, MemoryStore, PalaceError};
use palace_search::{SearchResult, SearchRouter};
use serde::Deserialize;
use tracing::debug;

use crate::registry::{System, SystemOutcome};

const MAX_SCOPES_FROM_INDEX: usize = 5;
const FALLBACK_SCOPES: usize = 3;
const SEARCH_LIMIT: usize = 15;

#[derive(Debug, Clone)]
pub struct RetrieveOutcome {
    pub text: String,
    pub synthesized: bool,
    pub scopes: Vec<String>,
    pub hits: Vec<SearchResult>,
}

pub struct RetrieveDigest {
    store: Arc<MemoryStore>,
    router: Arc<SearchRouter>,
    llm: Arc<LlmCaller>,
}

impl RetrieveDigest {
    pub fn new(store: Arc<MemoryStore>, router: Arc<SearchRouter>, llm: Arc<LlmCaller>) -> Self {
        Self { store, router, llm }
    }

    pub async fn run(&self, query: &str, scope: Option<&str>) -> Result<RetrieveOutcome> {
        if query.trim().is_empty() {
            return Err(PalaceError::InvalidArgument("query is required".to_string()).into());
        }

        // L0: which components look relevant?
        let lines = self.store.index().search(query, scope)?;
        let mut scopes = lines
            .iter()
            .filter_map(|line| IndexEntry::parse(line).and_then(|e| e.scope()))
            .take(MAX_SCOPES_FROM_INDEX)
            .collect::<Vec<_>>();
        if scopes.is_empty() {
            scopes = self.store.component_scopes()?;
            scopes.truncate(FALLBACK_SCOPES);
        }

        // L1: load their summaries (these reads count as touches).
        let mut summaries = String::new();
        for scope in &scopes {
            if let Ok(summary) = self.store.component_summary_get(scope) {
                summaries.push_str(&format!("## {scope}\n{summary}\n\n"));
            }
        }

        // L2: raw search.
        let hits = self.router.search_data(query, scope, SEARCH_LIMIT).await?;

        let mut evidence = String::new();
        for hit in &hits {
            evidence.push_str(&format!(
                "- ({} {:.2}) {}\n",
                hit.source,
                hit.score,
                hit.content.lines().collect::<Vec<_>>().join(" ")
            ));
        }

        if self.llm.is_available() {
            let user = format!(
                "QUERY: {query}\n\nRELEVANT SUMMARIES:\n{summaries}\nSEARCH HITS:\n{evidence}"
            );
            match self.llm.ask(RETRIEVE_SYSTEM_PROMPT, &user, Some(1200)).await {
                Ok(answer) => {
                    return Ok(RetrieveOutcome {
                        text: answer.trim().to_string(),
                        synthesized: true,
                        scopes,
                        hits,
                    });
                }
                Err(err) => debug!(%err, "synthesis failed, returning raw retrieval"),
            }
        }

        let text = format!(
            "No synthesis available; raw retrieval.\n\nSUMMARIES:\n{summaries}\nHITS:\n{evidence}"
        );
        Ok(RetrieveOutcome { text, synthesized: false, scopes, hits })
    }
}

const RETRIEVE_SYSTEM_PROMPT: &str = "You answer questions from an agent's memory store. Use \
only the provided summaries and search hits; cite entry ids in brackets where relevant; say so \
plainly when the memory does not contain an answer.";

#[derive(Debug, Deserialize)]
struct RetrieveParams {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[async_trait]
impl System for RetrieveDigest {
    fn name(&self) -> &'static str {
        "retrieve_digest"
    }

    fn describe(&self) -> &'static str {
        "progressive L0 → L1 → L2 retrieval with model synthesis"
    }

    async fn status(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"synthesis_available": self.llm.is_available()}))
    }

    async fn execute(&self, params: serde_json::Value) -> Result<SystemOutcome> {
        let params: RetrieveParams = if params.is_null() {
            RetrieveParams { query: None, scope: None }
        } else {
            serde_json::from_value(params)
                .map_err(|e| PalaceError::InvalidArgument(format!("retrieve params: {e}")))?
        };
        let query = params
            .query
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| PalaceError::InvalidArgument("query is required".to_string()))?;
        let outcome = self.run(&query, params.scope.as_deref()).await?;
        Ok(SystemOutcome::ok(outcome.text).with_details(serde_json::json!({
            "synthesized": outcome.synthesized,
            "scopes": outcome.scopes,
            "hits": outcome.hits.len(),
        })))
    }
}
