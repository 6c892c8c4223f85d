//! Full-text index over node titles and bodies (FTS5, rowid = `node_pk`).

use rusqlite::{params, Connection};

use super::nodes::{node_exists, node_from_row, NODE_COLUMNS};
use super::GraphStore;
use crate::error::{Error, Result};
use crate::models::Node;

/// (Re)index a node's searchable text. The FTS row id is the `node_pk`.
pub(crate) fn index_node(
    conn: &Connection,
    node_pk: i64,
    title: Option<&str>,
    body: &str,
    short_id: &str,
) -> Result<()> {
    conn.prepare_cached("DELETE FROM nodes_fts WHERE rowid = ?1")?
        .execute([node_pk])?;
    conn.prepare_cached("INSERT INTO nodes_fts (rowid, title, body, short_id) VALUES (?1, ?2, ?3, ?4)")?
        .execute(params![node_pk, title.unwrap_or(""), body, short_id])?;
    Ok(())
}

fn is_fts_syntax_error(err: &rusqlite::Error) -> bool {
    let msg = err.to_string();
    msg.contains("fts5")
        || msg.contains("unterminated string")
        || msg.contains("no such column")
}

impl GraphStore {
    /// Index or re-index the searchable text of an existing node.
    pub fn fts_index_node(
        &self,
        node_pk: i64,
        title: Option<&str>,
        body: &str,
        short_id: &str,
    ) -> Result<()> {
        if !node_exists(&self.conn, node_pk)? {
            return Err(Error::not_found("node", node_pk.to_string()));
        }
        index_node(&self.conn, node_pk, title, body, short_id)
    }

    /// Drop a node from the full-text index. Returns whether a row existed.
    pub fn fts_delete_node(&self, node_pk: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM nodes_fts WHERE rowid = ?1", [node_pk])?;
        Ok(removed > 0)
    }

    /// Ranked full-text search over indexed titles and bodies.
    ///
    /// `query` is an FTS5 match expression. A malformed expression fails
    /// with [`Error::InvalidQuery`]; see [`crate::query::fts_query`] for
    /// turning free text into a safe expression.
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<Node>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {NODE_COLUMNS}
             FROM nodes_fts
             JOIN nodes n ON n.node_pk = nodes_fts.rowid
             WHERE nodes_fts MATCH ?1
             ORDER BY nodes_fts.rank, n.node_pk
             LIMIT ?2"
        ))?;

        let rows = stmt
            .query_map(params![query, limit as i64], node_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>());

        match rows {
            Ok(nodes) => Ok(nodes),
            Err(e) if is_fts_syntax_error(&e) => {
                tracing::debug!(query, error = %e, "fts query rejected");
                Err(Error::InvalidQuery {
                    query: query.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
