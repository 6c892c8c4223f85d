//! Schema creation for the graph store.
//!
//! Every statement is idempotent so [`run_migrations`] can run on each open.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    doc_pk INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_id TEXT NOT NULL UNIQUE,
    source_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    raw BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    node_pk INTEGER PRIMARY KEY AUTOINCREMENT,
    short_id TEXT NOT NULL UNIQUE,
    full_id TEXT NOT NULL UNIQUE,
    doc_id TEXT NOT NULL REFERENCES documents(doc_id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    title TEXT,
    level INTEGER,
    language TEXT,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS edges (
    edge_pk INTEGER PRIMARY KEY AUTOINCREMENT,
    src_pk INTEGER NOT NULL REFERENCES nodes(node_pk) ON DELETE CASCADE,
    dst_pk INTEGER NOT NULL REFERENCES nodes(node_pk) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    UNIQUE(src_pk, dst_pk, kind)
);

CREATE TABLE IF NOT EXISTS collections (
    collection_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS collection_members (
    collection_id INTEGER NOT NULL REFERENCES collections(collection_id) ON DELETE CASCADE,
    member_pk INTEGER NOT NULL,
    member_type TEXT NOT NULL,
    PRIMARY KEY (collection_id, member_pk, member_type)
);

CREATE TABLE IF NOT EXISTS topics (
    topic_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS topic_assignments (
    target_type TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    topic_id INTEGER NOT NULL REFERENCES topics(topic_id) ON DELETE CASCADE,
    PRIMARY KEY (target_type, target_id, topic_id)
);

CREATE TABLE IF NOT EXISTS node_vectors (
    node_pk INTEGER PRIMARY KEY REFERENCES nodes(node_pk) ON DELETE CASCADE,
    model TEXT NOT NULL,
    dims INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
    title,
    body,
    short_id UNINDEXED
);

CREATE INDEX IF NOT EXISTS idx_nodes_doc_id ON nodes(doc_id);
CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst_pk);
CREATE INDEX IF NOT EXISTS idx_collection_members_member ON collection_members(member_type, member_pk);
CREATE INDEX IF NOT EXISTS idx_topic_assignments_topic ON topic_assignments(topic_id);
"#;

/// Create all tables, indexes and the FTS table if they do not exist yet.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO NOTHING",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table') ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        for expected in [
            "collection_members",
            "collections",
            "documents",
            "edges",
            "node_vectors",
            "nodes",
            "nodes_fts",
            "topic_assignments",
            "topics",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }

        let version: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, "1");
    }
}
