//! Named collections (projects) and their node or document members.
//!
//! Document members are stored by `doc_pk` and outlive re-ingestion; node
//! members go away with the node they point at.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_ts, resolve_entity, GraphStore};
use crate::error::{is_unique_violation, Error, Result};
use crate::models::{Collection, CollectionMember, EntityRef, EntityType};

fn collection_from_row(row: &Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        collection_id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn collection_exists(conn: &Connection, collection_id: i64) -> Result<bool> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM collections WHERE collection_id = ?1")?
        .query_row([collection_id], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Members of a collection as entity references. Document members are
/// mapped back from `doc_pk` to `doc_id`; dangling rows are skipped.
pub(crate) fn member_refs(conn: &Connection, collection_id: i64) -> Result<Vec<EntityRef>> {
    let mut stmt = conn.prepare_cached(
        "SELECT m.member_type, m.member_pk, d.doc_id
         FROM collection_members m
         LEFT JOIN documents d ON m.member_type = 'document' AND d.doc_pk = m.member_pk
         WHERE m.collection_id = ?1
         ORDER BY m.member_type, m.member_pk",
    )?;
    let rows = stmt
        .query_map([collection_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut refs = Vec::with_capacity(rows.len());
    for (member_type, member_pk, doc_id) in rows {
        match member_type.parse::<EntityType>()? {
            EntityType::Node => refs.push(EntityRef::Node(member_pk)),
            EntityType::Document => {
                if let Some(doc_id) = doc_id {
                    refs.push(EntityRef::Document(doc_id));
                }
            }
        }
    }
    Ok(refs)
}

impl GraphStore {
    /// Create a named collection. Names are unique.
    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        let created_at = now_ts();
        self.conn
            .execute(
                "INSERT INTO collections (name, created_at) VALUES (?1, ?2)",
                params![name, created_at],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::conflict("collection", name)
                } else {
                    e.into()
                }
            })?;
        Ok(Collection {
            collection_id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            created_at,
        })
    }

    pub fn get_collection_by_name(&self, name: &str) -> Result<Collection> {
        self.conn
            .prepare_cached("SELECT collection_id, name, created_at FROM collections WHERE name = ?1")?
            .query_row([name], collection_from_row)
            .optional()?
            .ok_or_else(|| Error::not_found("collection", name))
    }

    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        let mut stmt = self
            .conn
            .prepare("SELECT collection_id, name, created_at FROM collections ORDER BY name")?;
        let collections = stmt
            .query_map([], collection_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(collections)
    }

    /// Add a node or document to a collection. Adding an existing member
    /// is a no-op.
    pub fn add_collection_member(&self, collection_id: i64, member: &EntityRef) -> Result<CollectionMember> {
        if !collection_exists(&self.conn, collection_id)? {
            return Err(Error::not_found("collection", collection_id.to_string()));
        }
        let (member_type, member_pk) = resolve_entity(&self.conn, member)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO collection_members (collection_id, member_pk, member_type)
             VALUES (?1, ?2, ?3)",
            params![collection_id, member_pk, member_type],
        )?;
        Ok(CollectionMember {
            collection_id,
            member_pk,
            member_type: member_type.parse()?,
        })
    }

    /// Remove a member. Returns whether a membership existed.
    pub fn remove_collection_member(&self, collection_id: i64, member: &EntityRef) -> Result<bool> {
        let (member_type, member_pk) = resolve_entity(&self.conn, member)?;
        let removed = self.conn.execute(
            "DELETE FROM collection_members
             WHERE collection_id = ?1 AND member_pk = ?2 AND member_type = ?3",
            params![collection_id, member_pk, member_type],
        )?;
        Ok(removed > 0)
    }

    pub fn list_collection_members(&self, collection_id: i64) -> Result<Vec<CollectionMember>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT collection_id, member_pk, member_type FROM collection_members
             WHERE collection_id = ?1
             ORDER BY member_type, member_pk",
        )?;
        let rows = stmt
            .query_map([collection_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(collection_id, member_pk, member_type)| {
                Ok(CollectionMember {
                    collection_id,
                    member_pk,
                    member_type: member_type.parse()?,
                })
            })
            .collect()
    }

    /// Members of a collection as [`EntityRef`]s.
    pub fn collection_member_refs(&self, collection_id: i64) -> Result<Vec<EntityRef>> {
        member_refs(&self.conn, collection_id)
    }
}
