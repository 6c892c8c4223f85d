//! Node rows: batch insertion, document ingestion and point lookups.
//!
//! Re-ingesting a document reconciles by `full_id`: nodes whose identity
//! is unchanged keep their row, `node_pk` and everything attached to them;
//! vanished nodes are removed and new ones inserted.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{HashMap, HashSet};

use super::{documents, edges, fts, GraphStore};
use crate::error::{is_unique_violation, Error, Result};
use crate::identity::{generate_short_id, normalize_short_id, FullId, IdPredicate};
use crate::models::{BlockKind, Document, Edge, EdgeKind, NewNode, Node};

pub(crate) const NODE_COLUMNS: &str = "n.node_pk, n.short_id, n.full_id, n.doc_id, n.kind, n.title, \
     n.level, n.language, n.start_offset, n.end_offset";

fn conversion_error(idx: usize, err: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let full_id: String = row.get(2)?;
    let kind: String = row.get(4)?;
    let level: Option<i64> = row.get(6)?;
    let start: i64 = row.get(8)?;
    let end: i64 = row.get(9)?;
    Ok(Node {
        node_pk: row.get(0)?,
        short_id: row.get(1)?,
        full_id: full_id
            .parse::<FullId>()
            .map_err(|e| conversion_error(2, e))?,
        doc_id: row.get(3)?,
        kind: kind.parse::<BlockKind>().map_err(|e| conversion_error(4, e))?,
        title: row.get(5)?,
        level: level.map(|l| l as u8),
        language: row.get(7)?,
        start: start as usize,
        end: end as usize,
    })
}

pub(crate) fn node_exists(conn: &Connection, node_pk: i64) -> Result<bool> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM nodes WHERE node_pk = ?1")?
        .query_row([node_pk], |_| Ok(()))
        .optional()?
        .is_some())
}

fn short_ids(conn: &Connection, excluding_doc: Option<&str>) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT short_id FROM nodes WHERE ?1 IS NULL OR doc_id <> ?1",
    )?;
    let ids = stmt
        .query_map([excluding_doc], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;
    Ok(ids)
}

/// Insert nodes one by one on `conn`. Callers wrap this in a transaction.
pub(crate) fn insert_nodes(conn: &Connection, nodes: &[NewNode]) -> Result<Vec<Node>> {
    let mut known_docs: HashSet<&str> = HashSet::new();
    let mut inserted = Vec::with_capacity(nodes.len());
    let mut stmt = conn.prepare_cached(
        "INSERT INTO nodes (short_id, full_id, doc_id, kind, title, level, language, start_offset, end_offset)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;

    for node in nodes {
        if !known_docs.contains(node.doc_id.as_str()) {
            if documents::doc_pk(conn, &node.doc_id)?.is_none() {
                return Err(Error::not_found("document", node.doc_id.clone()));
            }
            known_docs.insert(&node.doc_id);
        }

        stmt.execute(params![
            node.short_id,
            node.full_id.to_hex(),
            node.doc_id,
            node.kind.as_str(),
            node.title,
            node.level.map(i64::from),
            node.language,
            node.start as i64,
            node.end as i64,
        ])
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict("node", format!("{} ({})", node.short_id, node.full_id))
            } else {
                e.into()
            }
        })?;
        let node_pk = conn.last_insert_rowid();

        if let Some(body) = &node.body {
            fts::index_node(conn, node_pk, node.title.as_deref(), body, &node.short_id)?;
        }

        inserted.push(Node {
            node_pk,
            short_id: node.short_id.clone(),
            full_id: node.full_id,
            doc_id: node.doc_id.clone(),
            kind: node.kind,
            title: node.title.clone(),
            level: node.level,
            language: node.language.clone(),
            start: node.start,
            end: node.end,
        });
    }

    Ok(inserted)
}

fn nodes_of_document(conn: &Connection, doc_id: &str) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes n WHERE n.doc_id = ?1
         ORDER BY n.start_offset, n.end_offset DESC, n.node_pk"
    ))?;
    let nodes = stmt
        .query_map([doc_id], node_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
}

/// Delete nodes along with the rows that point at them without a foreign
/// key (FTS rows, memberships, topic assignments).
pub(crate) fn remove_nodes(conn: &Connection, node_pks: &[i64]) -> Result<usize> {
    let mut removed = 0;
    for pk in node_pks {
        conn.prepare_cached("DELETE FROM nodes_fts WHERE rowid = ?1")?
            .execute([pk])?;
        conn.prepare_cached(
            "DELETE FROM collection_members WHERE member_type = 'node' AND member_pk = ?1",
        )?
        .execute([pk])?;
        conn.prepare_cached(
            "DELETE FROM topic_assignments WHERE target_type = 'node' AND target_id = ?1",
        )?
        .execute([pk])?;
        removed += conn
            .prepare_cached("DELETE FROM nodes WHERE node_pk = ?1")?
            .execute([pk])?;
    }
    Ok(removed)
}

/// Bring the stored nodes of `doc_id` in line with `wanted`, returning the
/// resulting nodes in `wanted` order. `taken` holds the short IDs of every
/// other document.
fn reconcile_nodes(
    conn: &Connection,
    doc_id: &str,
    wanted: &[NewNode],
    taken: &HashSet<String>,
) -> Result<Vec<Node>> {
    let mut stored: HashMap<FullId, Node> = nodes_of_document(conn, doc_id)?
        .into_iter()
        .map(|n| (n.full_id, n))
        .collect();

    let mut slots: Vec<Option<Node>> = Vec::with_capacity(wanted.len());
    for node in wanted {
        slots.push(stored.remove(&node.full_id));
    }

    let vanished: Vec<i64> = stored.values().map(|n| n.node_pk).collect();
    let removed = remove_nodes(conn, &vanished)?;

    let mut assigned: HashSet<String> = taken.clone();
    assigned.extend(slots.iter().flatten().map(|n| n.short_id.clone()));
    let mut pending: HashSet<&str> = wanted
        .iter()
        .zip(&slots)
        .filter(|(_, kept)| kept.is_none())
        .map(|(n, _)| n.short_id.as_str())
        .collect();

    let mut kept = 0;
    let mut nodes = Vec::with_capacity(wanted.len());
    for (node, slot) in wanted.iter().zip(slots) {
        if let Some(existing) = slot {
            if let Some(body) = &node.body {
                fts::index_node(conn, existing.node_pk, node.title.as_deref(), body, &existing.short_id)?;
            }
            kept += 1;
            nodes.push(existing);
            continue;
        }

        pending.remove(node.short_id.as_str());
        let mut fresh = node.clone();
        if assigned.contains(&fresh.short_id) {
            fresh.short_id = generate_short_id(
                &fresh.full_id,
                &IdPredicate(|id: &str| assigned.contains(id) || pending.contains(id)),
            )?;
        }
        assigned.insert(fresh.short_id.clone());
        nodes.extend(insert_nodes(conn, std::slice::from_ref(&fresh))?);
    }

    tracing::debug!(doc_id, kept, removed, inserted = nodes.len() - kept, "reconciled nodes");
    Ok(nodes)
}

/// Nodes of one document plus edges between them, addressed by position in
/// `nodes`. Built by the caller once the taken short IDs are known.
#[derive(Debug, Default)]
pub struct DocumentBatch {
    pub nodes: Vec<NewNode>,
    pub edges: Vec<(usize, usize, EdgeKind)>,
}

impl GraphStore {
    /// Insert one node. Equivalent to a batch of one.
    pub fn insert_node(&mut self, node: &NewNode) -> Result<Node> {
        let mut nodes = self.insert_nodes_batch(std::slice::from_ref(node))?;
        nodes
            .pop()
            .ok_or_else(|| Error::InvalidData("node insert returned no row".to_string()))
    }

    /// Insert many nodes in a single transaction; either all become visible
    /// or none do.
    pub fn insert_nodes_batch(&mut self, nodes: &[NewNode]) -> Result<Vec<Node>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = insert_nodes(&tx, nodes)?;
        tx.commit()?;
        tracing::debug!(count = inserted.len(), "inserted node batch");
        Ok(inserted)
    }

    /// Store a new version of a document and its nodes atomically.
    ///
    /// `build` receives the short IDs taken by every other document and
    /// returns the nodes and edges wanted for this version. Nodes whose
    /// `full_id` is already stored keep their row, short ID and attached
    /// memberships, topics and edges; the rest are replaced. Edges of the
    /// kinds the batch produces that run between two nodes of this document
    /// and are no longer wanted get removed. The whole operation runs in
    /// one write transaction, so concurrent readers see either the old or
    /// the new version of the document.
    pub fn ingest_document<F>(
        &mut self,
        doc_id: &str,
        source_path: &str,
        raw: &[u8],
        build: F,
    ) -> Result<(Document, Vec<Node>, Vec<Edge>)>
    where
        F: FnOnce(&HashSet<String>) -> Result<DocumentBatch>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let taken = short_ids(&tx, Some(doc_id))?;
        let batch = build(&taken)?;

        let (document, _) = documents::upsert_document(&tx, doc_id, source_path, raw)?;
        let nodes = reconcile_nodes(&tx, doc_id, &batch.nodes, &taken)?;

        let mut wanted = Vec::with_capacity(batch.edges.len());
        for (src, dst, kind) in &batch.edges {
            let (Some(src), Some(dst)) = (nodes.get(*src), nodes.get(*dst)) else {
                return Err(Error::InvalidData(format!(
                    "edge references node index out of range: {src} -> {dst}"
                )));
            };
            wanted.push(edges::ensure_edge(&tx, src.node_pk, dst.node_pk, kind)?);
        }
        edges::prune_document_edges(&tx, doc_id, &wanted)?;
        tx.commit()?;

        tracing::info!(doc_id, nodes = nodes.len(), edges = wanted.len(), "ingested document");
        Ok((document, nodes, wanted))
    }

    pub fn get_node(&self, node_pk: i64) -> Result<Node> {
        self.conn
            .prepare_cached(&format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.node_pk = ?1"))?
            .query_row([node_pk], node_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("node", node_pk.to_string()))
    }

    /// Look up a node by short ID. Input is normalized first, so lower case
    /// and the ambiguous letters I, L, O are accepted.
    pub fn get_node_by_short_id(&self, short_id: &str) -> Result<Node> {
        let short_id = normalize_short_id(short_id)?;
        self.conn
            .prepare_cached(&format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.short_id = ?1"))?
            .query_row([&short_id], node_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("node", short_id))
    }

    pub fn get_node_by_full_id(&self, full_id: &FullId) -> Result<Node> {
        self.conn
            .prepare_cached(&format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.full_id = ?1"))?
            .query_row([full_id.to_hex()], node_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("node", full_id.to_hex()))
    }

    /// Nodes of a document in document order. Fails with `NotFound` for an
    /// unknown `doc_id`.
    pub fn get_nodes_by_doc_id(&self, doc_id: &str) -> Result<Vec<Node>> {
        if documents::doc_pk(&self.conn, doc_id)?.is_none() {
            return Err(Error::not_found("document", doc_id));
        }
        nodes_of_document(&self.conn, doc_id)
    }

    /// Every short ID currently stored.
    pub fn list_short_ids(&self) -> Result<HashSet<String>> {
        short_ids(&self.conn, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{compute_full_id, generate_short_id};

    fn new_node(doc_id: &str, kind: BlockKind, start: usize, end: usize, body: &str) -> NewNode {
        let full_id = compute_full_id(doc_id, start as u64, end as u64, kind, body.as_bytes());
        NewNode {
            short_id: generate_short_id(&full_id, &HashSet::<String>::new()).unwrap(),
            full_id,
            doc_id: doc_id.to_string(),
            kind,
            title: None,
            level: None,
            language: None,
            start,
            end,
            body: Some(body.to_string()),
        }
    }

    #[test]
    fn test_insert_node_assigns_monotonic_pks() {
        let mut store = GraphStore::open_in_memory().unwrap();
        store.insert_document("a", "a.md", b"one\n\ntwo\n").unwrap();
        let first = store
            .insert_node(&new_node("a", BlockKind::Paragraph, 0, 4, "one"))
            .unwrap();
        let second = store
            .insert_node(&new_node("a", BlockKind::Paragraph, 5, 9, "two"))
            .unwrap();
        assert!(second.node_pk > first.node_pk);
        assert_eq!(store.get_node(first.node_pk).unwrap(), first);
    }

    #[test]
    fn test_insert_node_unknown_document() {
        let mut store = GraphStore::open_in_memory().unwrap();
        let err = store
            .insert_node(&new_node("ghost", BlockKind::Paragraph, 0, 1, "x"))
            .unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    #[test]
    fn test_duplicate_short_id_conflicts() {
        let mut store = GraphStore::open_in_memory().unwrap();
        store.insert_document("a", "a.md", b"xy").unwrap();
        let first = new_node("a", BlockKind::Paragraph, 0, 1, "x");
        let mut second = new_node("a", BlockKind::Paragraph, 1, 2, "y");
        second.short_id = first.short_id.clone();
        store.insert_node(&first).unwrap();
        assert!(store.insert_node(&second).unwrap_err().is_conflict());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let mut store = GraphStore::open_in_memory().unwrap();
        store.insert_document("a", "a.md", b"xyz").unwrap();
        let ok = new_node("a", BlockKind::Paragraph, 0, 1, "x");
        let mut dup = new_node("a", BlockKind::Paragraph, 1, 2, "y");
        dup.short_id = ok.short_id.clone();

        assert!(store.insert_nodes_batch(&[ok, dup]).is_err());
        assert!(store.get_nodes_by_doc_id("a").unwrap().is_empty());
        assert!(store.list_short_ids().unwrap().is_empty());
    }

    #[test]
    fn test_lookup_by_short_and_full_id() {
        let mut store = GraphStore::open_in_memory().unwrap();
        store.insert_document("a", "a.md", b"x").unwrap();
        let node = store
            .insert_node(&new_node("a", BlockKind::Paragraph, 0, 1, "x"))
            .unwrap();

        let by_short = store
            .get_node_by_short_id(&node.short_id.to_lowercase())
            .unwrap();
        assert_eq!(by_short, node);
        assert_eq!(store.get_node_by_full_id(&node.full_id).unwrap(), node);
        assert!(store.get_node_by_short_id("ZZZZ").unwrap_err().is_not_found());
        assert!(matches!(
            store.get_node_by_short_id("bad"),
            Err(Error::InvalidShortId { .. })
        ));
    }

    #[test]
    fn test_get_nodes_by_unknown_doc() {
        let store = GraphStore::open_in_memory().unwrap();
        assert!(store.get_nodes_by_doc_id("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_ingest_document_excludes_own_short_ids() {
        let mut store = GraphStore::open_in_memory().unwrap();
        let build = |taken: &HashSet<String>| -> Result<DocumentBatch> {
            assert!(taken.is_empty());
            Ok(DocumentBatch {
                nodes: vec![new_node("a", BlockKind::Paragraph, 0, 1, "x")],
                edges: vec![],
            })
        };
        let (_, first, _) = store.ingest_document("a", "a.md", b"x", build).unwrap();
        let (_, second, _) = store.ingest_document("a", "a.md", b"x", build).unwrap();
        assert_eq!(first[0].short_id, second[0].short_id);
        assert_eq!(first[0].full_id, second[0].full_id);
        assert_eq!(store.get_nodes_by_doc_id("a").unwrap().len(), 1);
    }

    #[test]
    fn test_ingest_document_rejects_bad_edge_index() {
        let mut store = GraphStore::open_in_memory().unwrap();
        let err = store
            .ingest_document("a", "a.md", b"x", |_| {
                Ok(DocumentBatch {
                    nodes: vec![new_node("a", BlockKind::Paragraph, 0, 1, "x")],
                    edges: vec![(0, 3, EdgeKind::Contains)],
                })
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
        // rolled back
        assert!(store.get_document("a").unwrap_err().is_not_found());
    }
}
