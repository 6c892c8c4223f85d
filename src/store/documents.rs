//! Document rows: upsert by `doc_id`, strict insert, listing and deletion.

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use sha2::{Digest, Sha256};

use super::{now_ts, GraphStore};
use crate::error::{is_unique_violation, Error, Result};
use crate::models::Document;

const DOCUMENT_COLUMNS: &str = "doc_pk, doc_id, source_path, content_hash, created_at, raw";

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        doc_pk: row.get(0)?,
        doc_id: row.get(1)?,
        source_path: row.get(2)?,
        content_hash: row.get(3)?,
        created_at: row.get(4)?,
        raw: row.get(5)?,
    })
}

pub(crate) fn content_hash(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn doc_pk(conn: &Connection, doc_id: &str) -> Result<Option<i64>> {
    Ok(conn
        .prepare_cached("SELECT doc_pk FROM documents WHERE doc_id = ?1")?
        .query_row([doc_id], |row| row.get(0))
        .optional()?)
}

pub(crate) fn fetch_document(conn: &Connection, doc_id: &str) -> Result<Option<Document>> {
    Ok(conn
        .prepare_cached(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE doc_id = ?1"
        ))?
        .query_row([doc_id], document_from_row)
        .optional()?)
}

/// Remove every node of a document along with rows that point at those
/// nodes without a foreign key (FTS rows, memberships, topic assignments).
/// Edges and vectors go with the nodes through `ON DELETE CASCADE`.
pub(crate) fn supersede_nodes(conn: &Connection, doc_id: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM nodes_fts WHERE rowid IN (SELECT node_pk FROM nodes WHERE doc_id = ?1)",
        [doc_id],
    )?;
    conn.execute(
        "DELETE FROM collection_members WHERE member_type = 'node'
           AND member_pk IN (SELECT node_pk FROM nodes WHERE doc_id = ?1)",
        [doc_id],
    )?;
    conn.execute(
        "DELETE FROM topic_assignments WHERE target_type = 'node'
           AND target_id IN (SELECT node_pk FROM nodes WHERE doc_id = ?1)",
        [doc_id],
    )?;
    let removed = conn.execute("DELETE FROM nodes WHERE doc_id = ?1", [doc_id])?;
    Ok(removed)
}

/// Insert or replace a document row. Returns whether the payload changed;
/// identical bytes only refresh `source_path`. Nodes are left to the caller.
pub(crate) fn upsert_document(
    conn: &Connection,
    doc_id: &str,
    source_path: &str,
    raw: &[u8],
) -> Result<(Document, bool)> {
    let hash = content_hash(raw);
    if let Some(existing) = fetch_document(conn, doc_id)? {
        if existing.content_hash == hash {
            if existing.source_path != source_path {
                conn.execute(
                    "UPDATE documents SET source_path = ?2 WHERE doc_id = ?1",
                    params![doc_id, source_path],
                )?;
            }
            let document = Document {
                source_path: source_path.to_string(),
                ..existing
            };
            return Ok((document, false));
        }
    }

    conn.execute(
        r#"
        INSERT INTO documents (doc_id, source_path, content_hash, created_at, raw)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(doc_id) DO UPDATE SET
            source_path = excluded.source_path,
            content_hash = excluded.content_hash,
            created_at = excluded.created_at,
            raw = excluded.raw
        "#,
        params![doc_id, source_path, hash, now_ts(), raw],
    )?;

    let document = fetch_document(conn, doc_id)?.ok_or_else(|| Error::not_found("document", doc_id))?;
    Ok((document, true))
}

impl GraphStore {
    /// Idempotent upsert keyed by `doc_id`. Identical bytes leave the
    /// document and its nodes untouched apart from `source_path`; a new
    /// payload replaces the document and removes its previous nodes.
    pub fn insert_document(&mut self, doc_id: &str, source_path: &str, raw: &[u8]) -> Result<Document> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (doc, changed) = upsert_document(&tx, doc_id, source_path, raw)?;
        if changed {
            let removed = supersede_nodes(&tx, doc_id)?;
            if removed > 0 {
                tracing::debug!(doc_id, removed, "superseded previous nodes");
            }
        }
        tx.commit()?;
        Ok(doc)
    }

    /// Insert a new document, failing with `Conflict` if `doc_id` exists.
    pub fn insert_document_strict(&self, doc_id: &str, source_path: &str, raw: &[u8]) -> Result<Document> {
        self.conn
            .execute(
                "INSERT INTO documents (doc_id, source_path, content_hash, created_at, raw)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![doc_id, source_path, content_hash(raw), now_ts(), raw],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::conflict("document", doc_id)
                } else {
                    e.into()
                }
            })?;
        self.get_document(doc_id)
    }

    pub fn get_document(&self, doc_id: &str) -> Result<Document> {
        fetch_document(&self.conn, doc_id)?.ok_or_else(|| Error::not_found("document", doc_id))
    }

    /// All documents ordered by `doc_id`.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY doc_id"
        ))?;
        let docs = stmt
            .query_map([], document_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Delete a document and everything derived from it.
    pub fn delete_document(&mut self, doc_id: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let pk = doc_pk(&tx, doc_id)?.ok_or_else(|| Error::not_found("document", doc_id))?;
        supersede_nodes(&tx, doc_id)?;
        tx.execute(
            "DELETE FROM collection_members WHERE member_type = 'document' AND member_pk = ?1",
            [pk],
        )?;
        tx.execute(
            "DELETE FROM topic_assignments WHERE target_type = 'document' AND target_id = ?1",
            [pk],
        )?;
        tx.execute("DELETE FROM documents WHERE doc_pk = ?1", [pk])?;
        tx.commit()?;
        Ok(())
    }
}
