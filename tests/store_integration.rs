use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use docgraph::ingest::{ingest_document, IngestOptions};
use docgraph::models::{BlockKind, EntityRef};
use docgraph::query;
use docgraph::scope::{ManualClock, ScopeFilter, ScopeResolver};
use docgraph::store::GraphStore;
use tempfile::TempDir;

fn store_path(tmp: &TempDir) -> std::path::PathBuf {
    tmp.path().join("data").join("graph.sqlite")
}

#[test]
fn test_title_body_scenario() {
    let tmp = TempDir::new().unwrap();
    let mut store = GraphStore::open(store_path(&tmp)).unwrap();
    let raw = b"# Title\n\nBody text.\n";

    let first = ingest_document(&mut store, "doc", "doc.md", raw, &IngestOptions::default()).unwrap();
    assert_eq!(first.nodes.len(), 2);

    let heading = &first.nodes[0];
    assert_eq!(heading.kind, BlockKind::Heading);
    assert_eq!(heading.level, Some(1));
    assert_eq!(heading.title.as_deref(), Some("Title"));

    let para = &first.nodes[1];
    assert_eq!(para.kind, BlockKind::Paragraph);
    assert_eq!(
        String::from_utf8_lossy(&raw[para.start..para.end]).trim(),
        "Body text."
    );

    let hits: HashSet<i64> = store
        .fts_search("Body", 10)
        .unwrap()
        .into_iter()
        .map(|n| n.node_pk)
        .collect();
    assert_eq!(hits, HashSet::from([heading.node_pk, para.node_pk]));

    let second = ingest_document(&mut store, "doc", "doc.md", raw, &IngestOptions::default()).unwrap();
    let full_ids = |nodes: &[docgraph::models::Node]| -> Vec<String> {
        nodes.iter().map(|n| n.full_id.to_hex()).collect()
    };
    assert_eq!(full_ids(&first.nodes), full_ids(&second.nodes));
    assert_eq!(first.nodes[0].short_id, second.nodes[0].short_id);
    assert_eq!(store.fts_search("Body", 10).unwrap().len(), 2);
}

#[test]
fn test_readers_see_committed_batch_during_write() {
    const READERS: usize = 4;

    let tmp = TempDir::new().unwrap();
    let path = store_path(&tmp);
    let mut writer = GraphStore::open(&path).unwrap();
    let raw = b"# One\n\nAlpha.\n\n## Two\n\nBeta.\n\n```\ncode\n```\n";
    let committed = ingest_document(&mut writer, "batch", "batch.md", raw, &IngestOptions::default())
        .unwrap()
        .nodes;
    let expected: Vec<i64> = committed.iter().map(|n| n.node_pk).collect();

    // writer holds the write lock with an uncommitted, unrelated insert
    writer
        .connection()
        .execute_batch(
            "BEGIN IMMEDIATE;
             INSERT INTO documents (doc_id, source_path, content_hash, created_at, raw)
             VALUES ('pending', 'pending.md', '', 0, x'00');",
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(READERS));
    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let reader = GraphStore::open_reader(&path).unwrap();
                barrier.wait();
                let started = Instant::now();
                let nodes: Vec<i64> = reader
                    .get_nodes_by_doc_id("batch")
                    .unwrap()
                    .into_iter()
                    .map(|n| n.node_pk)
                    .collect();
                let pending_visible = reader.get_document("pending").is_ok();
                (nodes, pending_visible, started.elapsed())
            })
        })
        .collect();

    for handle in handles {
        let (nodes, pending_visible, elapsed) = handle.join().unwrap();
        assert_eq!(nodes, expected);
        assert!(!pending_visible);
        assert!(elapsed < Duration::from_secs(2), "reader blocked for {elapsed:?}");
    }

    writer.connection().execute_batch("ROLLBACK;").unwrap();
    assert!(writer.get_document("pending").unwrap_err().is_not_found());
}

#[test]
fn test_writers_serialize() {
    let tmp = TempDir::new().unwrap();
    let path = store_path(&tmp);
    let first = GraphStore::open(&path).unwrap();
    first
        .connection()
        .execute_batch("BEGIN IMMEDIATE; INSERT INTO topics (name, created_at) VALUES ('held', 0);")
        .unwrap();

    let second_path = path.clone();
    let second = thread::spawn(move || {
        let mut second = GraphStore::open(&second_path).unwrap();
        ingest_document(&mut second, "b", "b.md", b"text\n", &IngestOptions::default()).map(|r| r.nodes.len())
    });

    thread::sleep(Duration::from_millis(200));
    first.connection().execute_batch("COMMIT;").unwrap();

    assert_eq!(second.join().unwrap().unwrap(), 1);
    assert!(first.get_topic_by_name("held").is_ok());
    assert_eq!(first.get_nodes_by_doc_id("b").unwrap().len(), 1);
}

#[test]
fn test_scoped_search_across_projects() {
    let tmp = TempDir::new().unwrap();
    let mut store = GraphStore::open(store_path(&tmp)).unwrap();
    let opts = IngestOptions::default();
    ingest_document(&mut store, "alpha.md", "alpha.md", b"# Alpha\n\nDeploy notes for alpha.\n", &opts)
        .unwrap();
    ingest_document(&mut store, "beta.md", "beta.md", b"# Beta\n\nDeploy notes for beta.\n", &opts)
        .unwrap();
    ingest_document(&mut store, "common.md", "common.md", b"Deploy checklist.\n", &opts).unwrap();

    let alpha = store.create_collection("alpha").unwrap();
    store
        .add_collection_member(alpha.collection_id, &EntityRef::Document("alpha.md".into()))
        .unwrap();
    let shared = store.create_topic("shared").unwrap();
    store
        .assign_topic(shared.topic_id, &EntityRef::Document("common.md".into()))
        .unwrap();

    let clock = ManualClock::new();
    let mut resolver = ScopeResolver::with_clock(Duration::from_secs(60), Box::new(clock.clone()));

    let docs = |nodes: Vec<docgraph::models::Node>| -> HashSet<String> {
        nodes.into_iter().map(|n| n.doc_id).collect()
    };

    let scope = ScopeFilter::default().project("alpha");
    let hits = query::search(&store, &mut resolver, &scope, "deploy", 10).unwrap();
    assert_eq!(docs(hits), HashSet::from(["alpha.md".to_string()]));

    let scope = ScopeFilter::default().project("alpha").include_shared(true);
    let hits = query::search(&store, &mut resolver, &scope, "deploy", 10).unwrap();
    assert_eq!(
        docs(hits),
        HashSet::from(["alpha.md".to_string(), "common.md".to_string()])
    );

    // membership changes are invisible until the cached scope expires
    store
        .add_collection_member(alpha.collection_id, &EntityRef::Document("beta.md".into()))
        .unwrap();
    let scope = ScopeFilter::default().project("alpha");
    let hits = query::search(&store, &mut resolver, &scope, "deploy", 10).unwrap();
    assert_eq!(docs(hits), HashSet::from(["alpha.md".to_string()]));

    clock.advance(Duration::from_secs(61));
    let hits = query::search(&store, &mut resolver, &scope, "deploy", 10).unwrap();
    assert_eq!(
        docs(hits),
        HashSet::from(["alpha.md".to_string(), "beta.md".to_string()])
    );

    let err = query::search(
        &store,
        &mut resolver,
        &ScopeFilter::default().project("missing"),
        "deploy",
        10,
    )
    .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_reopen_preserves_graph() {
    let tmp = TempDir::new().unwrap();
    let path = store_path(&tmp);
    let short_id = {
        let mut store = GraphStore::open(&path).unwrap();
        let report =
            ingest_document(&mut store, "a.md", "a.md", b"# Kept\n", &IngestOptions::default()).unwrap();
        report.nodes[0].short_id.clone()
    };

    let store = GraphStore::open(&path).unwrap();
    let node = store.get_node_by_short_id(&short_id).unwrap();
    assert_eq!(node.title.as_deref(), Some("Kept"));
    assert_eq!(store.get_pragma("journal_mode").unwrap().as_deref(), Some("wal"));
}
