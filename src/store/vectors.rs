//! Caller-supplied node vectors with brute-force cosine search.

use rusqlite::{params, OptionalExtension};

use super::nodes::{node_exists, node_from_row, NODE_COLUMNS};
use super::{now_ts, GraphStore};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::Node;

/// A stored node embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeVector {
    pub node_pk: i64,
    pub model: String,
    pub vector: Vec<f32>,
    pub updated_at: i64,
}

impl GraphStore {
    /// Store or replace the embedding of a node.
    pub fn upsert_node_vector(&self, node_pk: i64, model: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::InvalidData("empty embedding vector".to_string()));
        }
        if !node_exists(&self.conn, node_pk)? {
            return Err(Error::not_found("node", node_pk.to_string()));
        }
        self.conn.execute(
            "INSERT INTO node_vectors (node_pk, model, dims, embedding, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(node_pk) DO UPDATE SET
                 model = excluded.model,
                 dims = excluded.dims,
                 embedding = excluded.embedding,
                 updated_at = excluded.updated_at",
            params![node_pk, model, vector.len() as i64, vec_to_blob(vector), now_ts()],
        )?;
        Ok(())
    }

    pub fn get_node_vector(&self, node_pk: i64) -> Result<Option<NodeVector>> {
        Ok(self
            .conn
            .prepare_cached(
                "SELECT node_pk, model, embedding, updated_at FROM node_vectors WHERE node_pk = ?1",
            )?
            .query_row([node_pk], |row| {
                let blob: Vec<u8> = row.get(2)?;
                Ok(NodeVector {
                    node_pk: row.get(0)?,
                    model: row.get(1)?,
                    vector: blob_to_vec(&blob),
                    updated_at: row.get(3)?,
                })
            })
            .optional()?)
    }

    /// Brute-force cosine search over every stored vector with the same
    /// dimensionality as `query`. Best match first.
    pub fn vector_search(&self, query: &[f32], limit: usize) -> Result<Vec<(Node, f32)>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {NODE_COLUMNS}, v.embedding
             FROM node_vectors v JOIN nodes n ON n.node_pk = v.node_pk
             WHERE v.dims = ?1"
        ))?;
        let mut scored = stmt
            .query_map([query.len() as i64], |row| {
                let blob: Vec<u8> = row.get(10)?;
                Ok((node_from_row(row)?, blob))
            })?
            .map(|row| row.map(|(node, blob)| (node, cosine_similarity(query, &blob_to_vec(&blob)))))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.node_pk.cmp(&b.0.node_pk)));
        scored.truncate(limit);
        Ok(scored)
    }
}
