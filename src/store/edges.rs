//! Directed, kinded edges between nodes.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

use super::nodes::node_exists;
use super::GraphStore;
use crate::error::{is_unique_violation, Error, Result};
use crate::models::{Edge, EdgeKind};

fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<Edge> {
    let kind: String = row.get(3)?;
    Ok(Edge {
        edge_pk: row.get(0)?,
        src_pk: row.get(1)?,
        dst_pk: row.get(2)?,
        kind: EdgeKind::parse(&kind),
    })
}

pub(crate) fn insert_edge(conn: &Connection, src_pk: i64, dst_pk: i64, kind: &EdgeKind) -> Result<Edge> {
    for pk in [src_pk, dst_pk] {
        if !node_exists(conn, pk)? {
            return Err(Error::not_found("node", pk.to_string()));
        }
    }
    conn.prepare_cached("INSERT INTO edges (src_pk, dst_pk, kind) VALUES (?1, ?2, ?3)")?
        .execute(params![src_pk, dst_pk, kind.as_str()])
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict("edge", format!("{src_pk} -[{}]-> {dst_pk}", kind.as_str()))
            } else {
                e.into()
            }
        })?;
    Ok(Edge {
        edge_pk: conn.last_insert_rowid(),
        src_pk,
        dst_pk,
        kind: kind.clone(),
    })
}

/// Return the edge `src -[kind]-> dst`, creating it when missing.
pub(crate) fn ensure_edge(conn: &Connection, src_pk: i64, dst_pk: i64, kind: &EdgeKind) -> Result<Edge> {
    let existing = conn
        .prepare_cached(
            "SELECT edge_pk, src_pk, dst_pk, kind FROM edges
             WHERE src_pk = ?1 AND dst_pk = ?2 AND kind = ?3",
        )?
        .query_row(params![src_pk, dst_pk, kind.as_str()], edge_from_row)
        .optional()?;
    match existing {
        Some(edge) => Ok(edge),
        None => insert_edge(conn, src_pk, dst_pk, kind),
    }
}

/// Drop edges of the kinds in `keep` that join two nodes of `doc_id` but
/// are not themselves in `keep`. Edges of other kinds are untouched.
pub(crate) fn prune_document_edges(conn: &Connection, doc_id: &str, keep: &[Edge]) -> Result<usize> {
    let kinds: HashSet<&str> = keep.iter().map(|e| e.kind.as_str()).collect();
    let kept: HashSet<i64> = keep.iter().map(|e| e.edge_pk).collect();
    let mut stmt = conn.prepare_cached(
        "SELECT e.edge_pk FROM edges e
         JOIN nodes s ON s.node_pk = e.src_pk
         JOIN nodes d ON d.node_pk = e.dst_pk
         WHERE e.kind = ?1 AND s.doc_id = ?2 AND d.doc_id = ?2",
    )?;
    let mut stale = Vec::new();
    for kind in kinds {
        let pks = stmt
            .query_map(params![kind, doc_id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        stale.extend(pks.into_iter().filter(|pk| !kept.contains(pk)));
    }
    for pk in &stale {
        conn.prepare_cached("DELETE FROM edges WHERE edge_pk = ?1")?
            .execute([pk])?;
    }
    Ok(stale.len())
}

impl GraphStore {
    /// Create a directed edge between two existing nodes.
    pub fn insert_edge(&self, src_pk: i64, dst_pk: i64, kind: &EdgeKind) -> Result<Edge> {
        insert_edge(&self.conn, src_pk, dst_pk, kind)
    }

    /// Outgoing edges of a node, optionally restricted to one kind.
    pub fn edges_from(&self, src_pk: i64, kind: Option<&EdgeKind>) -> Result<Vec<Edge>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT edge_pk, src_pk, dst_pk, kind FROM edges
             WHERE src_pk = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY edge_pk",
        )?;
        let edges = stmt
            .query_map(params![src_pk, kind.map(EdgeKind::as_str)], edge_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Incoming edges of a node, optionally restricted to one kind.
    pub fn edges_to(&self, dst_pk: i64, kind: Option<&EdgeKind>) -> Result<Vec<Edge>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT edge_pk, src_pk, dst_pk, kind FROM edges
             WHERE dst_pk = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY edge_pk",
        )?;
        let edges = stmt
            .query_map(params![dst_pk, kind.map(EdgeKind::as_str)], edge_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    pub fn delete_edge(&self, edge_pk: i64) -> Result<()> {
        let removed = self
            .conn
            .execute("DELETE FROM edges WHERE edge_pk = ?1", [edge_pk])?;
        if removed == 0 {
            return Err(Error::not_found("edge", edge_pk.to_string()));
        }
        Ok(())
    }
}
