//! Scoped queries over the graph store.
//!
//! Every entry point resolves the [`ScopeFilter`] first, so an unknown
//! project or topic fails before any search runs, then filters the store's
//! results through [`node_matches_scope`].
//!
//! [`node_matches_scope`]: crate::scope::node_matches_scope

use crate::error::Result;
use crate::models::Node;
use crate::scope::{node_matches_scope, ScopeFilter, ScopeResolver};
use crate::store::GraphStore;

/// Growth factor for the candidate window when scope filtering drops hits.
const OVERFETCH_FACTOR: usize = 4;

/// Turn free text into an FTS5 expression that matches every word.
///
/// Each whitespace-separated token becomes a quoted phrase, so operators
/// and punctuation in user input are matched literally instead of being
/// parsed as query syntax.
pub fn fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ranked full-text search restricted to `scope`.
///
/// Candidates are fetched in growing windows until `limit` visible nodes
/// are found or the index is exhausted.
pub fn search(
    store: &GraphStore,
    resolver: &mut ScopeResolver,
    scope: &ScopeFilter,
    text: &str,
    limit: usize,
) -> Result<Vec<Node>> {
    let sets = resolver.build_scope_sets(store, scope, true)?;
    let expr = fts_query(text);
    if expr.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut window = limit;
    loop {
        let hits = store.fts_search(&expr, window)?;
        let exhausted = hits.len() < window;
        let mut visible = Vec::with_capacity(limit);
        for node in hits {
            if node_matches_scope(store, &node, &sets)? {
                visible.push(node);
                if visible.len() == limit {
                    break;
                }
            }
        }
        if visible.len() == limit || exhausted {
            tracing::debug!(query = text, window, hits = visible.len(), "scoped search");
            return Ok(visible);
        }
        window = window.saturating_mul(OVERFETCH_FACTOR);
    }
}

/// Resolve a short ID. Fails with `NotFound` for an unknown ID and
/// returns `None` when the node exists but lies outside `scope`.
pub fn lookup_short_id(
    store: &GraphStore,
    resolver: &mut ScopeResolver,
    scope: &ScopeFilter,
    short_id: &str,
) -> Result<Option<Node>> {
    let sets = resolver.build_scope_sets(store, scope, true)?;
    let node = store.get_node_by_short_id(short_id)?;
    Ok(node_matches_scope(store, &node, &sets)?.then_some(node))
}

/// Visible nodes of a document, in document order.
pub fn nodes_for_document(
    store: &GraphStore,
    resolver: &mut ScopeResolver,
    scope: &ScopeFilter,
    doc_id: &str,
) -> Result<Vec<Node>> {
    resolver.build_scope_sets(store, scope, true)?;
    let nodes = store.get_nodes_by_doc_id(doc_id)?;
    resolver.filter_nodes(store, scope, nodes)
}
