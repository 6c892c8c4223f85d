//! Embedded graph store.
//!
//! [`GraphStore`] persists documents, nodes, edges, collections, topics,
//! node vectors and the full-text index in a single SQLite file opened in
//! WAL mode. Readers never block on writers; writers serialize against each
//! other through SQLite's write lock (with a busy timeout). Every write that
//! must be atomic runs inside one transaction.
//!
//! Operations are grouped by entity:
//!
//! | File | Operations |
//! |------|------------|
//! | `documents.rs` | insert / get / list / delete documents |
//! | `nodes.rs` | node inserts, batch ingest, lookups |
//! | `fts.rs` | full-text (re)indexing and search |
//! | `edges.rs` | directed relationships between nodes |
//! | `collections.rs` | named node/document groupings |
//! | `topics.rs` | topic tags and their assignments |
//! | `vectors.rs` | externally computed embedding vectors, cosine search |

mod collections;
mod documents;
mod edges;
mod fts;
mod nodes;
pub mod schema;
mod topics;
mod vectors;

pub use nodes::DocumentBatch;
pub use vectors::NodeVector;

pub(crate) use documents::content_hash;

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::EntityRef;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one store file. Each handle owns its own connection; open one
/// handle per thread or process.
#[derive(Debug)]
pub struct GraphStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl GraphStore {
    /// Open (creating if needed) a store file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&conn)?;

        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened graph store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an existing store file for reading only. No migrations run.
    pub fn open_reader(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory store. WAL is unavailable, so the journal mode
    /// reports `memory`.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Underlying connection, for callers that need raw SQL access.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Read a PRAGMA value, e.g. `get_pragma("journal_mode")`.
    ///
    /// Returns `None` for pragmas that produce no row or a NULL value.
    pub fn get_pragma(&self, name: &str) -> Result<Option<String>> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidData(format!("invalid pragma name: {name:?}")));
        }
        let mut stmt = self.conn.prepare(&format!("PRAGMA {name}"))?;
        let mut rows = stmt.query([])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let value: Value = row.get(0)?;
        Ok(match value {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Text(s) => Some(s),
            Value::Blob(b) => Some(hex::encode(b)),
        })
    }
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Resolve an [`EntityRef`] to its `(target_type, pk)` storage pair,
/// failing with `NotFound` when the referenced row does not exist.
pub(crate) fn resolve_entity(conn: &Connection, entity: &EntityRef) -> Result<(&'static str, i64)> {
    match entity {
        EntityRef::Node(pk) => {
            if nodes::node_exists(conn, *pk)? {
                Ok(("node", *pk))
            } else {
                Err(Error::not_found("node", pk.to_string()))
            }
        }
        EntityRef::Document(doc_id) => {
            let doc_pk = documents::doc_pk(conn, doc_id)?
                .ok_or_else(|| Error::not_found("document", doc_id.clone()))?;
            Ok(("document", doc_pk))
        }
    }
}
