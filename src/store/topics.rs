//! Topics and their assignments to nodes and documents.

use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;

use super::{now_ts, resolve_entity, GraphStore};
use crate::error::{is_unique_violation, Error, Result};
use crate::models::{EntityRef, EntityType, Node, Topic};

fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        topic_id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

impl GraphStore {
    /// Create a topic. Names are unique.
    pub fn create_topic(&self, name: &str) -> Result<Topic> {
        let created_at = now_ts();
        self.conn
            .execute(
                "INSERT INTO topics (name, created_at) VALUES (?1, ?2)",
                params![name, created_at],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::conflict("topic", name)
                } else {
                    e.into()
                }
            })?;
        Ok(Topic {
            topic_id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            created_at,
        })
    }

    pub fn get_topic_by_name(&self, name: &str) -> Result<Topic> {
        self.conn
            .prepare_cached("SELECT topic_id, name, created_at FROM topics WHERE name = ?1")?
            .query_row([name], topic_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("topic", name))
    }

    pub fn list_topics(&self) -> Result<Vec<Topic>> {
        let mut stmt = self
            .conn
            .prepare("SELECT topic_id, name, created_at FROM topics ORDER BY name")?;
        let topics = stmt
            .query_map([], topic_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(topics)
    }

    /// Tag a node or document with a topic. Re-tagging is a no-op.
    pub fn assign_topic(&self, topic_id: i64, target: &EntityRef) -> Result<()> {
        let exists = self
            .conn
            .prepare_cached("SELECT 1 FROM topics WHERE topic_id = ?1")?
            .query_row([topic_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(Error::not_found("topic", topic_id.to_string()));
        }
        let (target_type, target_id) = resolve_entity(&self.conn, target)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO topic_assignments (target_type, target_id, topic_id)
             VALUES (?1, ?2, ?3)",
            params![target_type, target_id, topic_id],
        )?;
        Ok(())
    }

    /// Remove a topic tag. Returns whether the assignment existed.
    pub fn unassign_topic(&self, topic_id: i64, target: &EntityRef) -> Result<bool> {
        let (target_type, target_id) = resolve_entity(&self.conn, target)?;
        let removed = self.conn.execute(
            "DELETE FROM topic_assignments
             WHERE target_type = ?1 AND target_id = ?2 AND topic_id = ?3",
            params![target_type, target_id, topic_id],
        )?;
        Ok(removed > 0)
    }

    /// Topics assigned directly to `target`.
    pub fn list_topics_for_target(&self, target: &EntityRef) -> Result<Vec<Topic>> {
        let (target_type, target_id) = resolve_entity(&self.conn, target)?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.topic_id, t.name, t.created_at
             FROM topic_assignments a JOIN topics t ON t.topic_id = a.topic_id
             WHERE a.target_type = ?1 AND a.target_id = ?2
             ORDER BY t.name",
        )?;
        let topics = stmt
            .query_map(params![target_type, target_id], topic_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(topics)
    }

    /// Every `(type, pk)` tagged with a topic. Document targets carry their
    /// `doc_pk`.
    pub fn list_targets_for_topic(&self, topic_id: i64) -> Result<Vec<(EntityType, i64)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT target_type, target_id FROM topic_assignments
             WHERE topic_id = ?1
             ORDER BY target_type, target_id",
        )?;
        let rows = stmt
            .query_map([topic_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(target_type, target_id)| Ok((target_type.parse()?, target_id)))
            .collect()
    }

    /// Topic ids that apply to a node: those assigned to the node itself
    /// plus those assigned to its document.
    pub fn topic_ids_for_node(&self, node: &Node) -> Result<HashSet<i64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT topic_id FROM topic_assignments
             WHERE target_type = 'node' AND target_id = ?1
             UNION
             SELECT a.topic_id FROM topic_assignments a
             JOIN documents d ON a.target_type = 'document' AND a.target_id = d.doc_pk
             WHERE d.doc_id = ?2",
        )?;
        let ids = stmt
            .query_map(params![node.node_pk, node.doc_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<i64>>>()?;
        Ok(ids)
    }
}
