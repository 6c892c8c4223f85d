//! Ingestion pipeline: parse → identify → persist.
//!
//! [`ingest_document`] shreds one document into nodes and writes the
//! document, its nodes, their FTS rows and optional containment edges in a
//! single store transaction. [`sync_items`] runs it over a batch of files,
//! skipping documents whose bytes are unchanged.

use std::collections::HashSet;

use serde::Serialize;

use crate::connector_fs::FileItem;
use crate::error::Result;
use crate::identity::{compute_full_id, generate_short_id, IdPredicate};
use crate::models::{Block, BlockKind, Document, Edge, EdgeKind, NewNode, Node};
use crate::parser::{document_block, parse_blocks};
use crate::store::{DocumentBatch, GraphStore};

/// Knobs for turning blocks into nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Add a whole-document `doc` node ahead of the block nodes.
    pub document_node: bool,
    /// Add `contains` edges from each heading (and the document node) to
    /// the blocks nested under it.
    pub link_sections: bool,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document: Document,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Parse `raw`, assign identities and store the new version of `doc_id`
/// atomically. Short IDs already used by other documents are avoided.
/// Spans whose `full_id` is already stored keep their node, so
/// re-ingesting identical bytes changes nothing.
pub fn ingest_document(
    store: &mut GraphStore,
    doc_id: &str,
    source_path: &str,
    raw: &[u8],
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let mut blocks = parse_blocks(raw);
    if opts.document_node {
        if let Some(doc) = document_block(raw) {
            blocks.insert(0, doc);
        }
    }

    let (document, nodes, edges) = store.ingest_document(doc_id, source_path, raw, |taken| {
        build_batch(doc_id, raw, &blocks, taken, opts)
    })?;
    Ok(IngestReport {
        document,
        nodes,
        edges,
    })
}

fn build_batch(
    doc_id: &str,
    raw: &[u8],
    blocks: &[Block],
    taken: &HashSet<String>,
    opts: &IngestOptions,
) -> Result<DocumentBatch> {
    let mut assigned: HashSet<String> = HashSet::with_capacity(blocks.len());
    let mut nodes = Vec::with_capacity(blocks.len());

    for (idx, block) in blocks.iter().enumerate() {
        let full_id = compute_full_id(
            doc_id,
            block.start as u64,
            block.end as u64,
            block.kind,
            block.bytes(raw),
        );
        let short_id = generate_short_id(
            &full_id,
            &IdPredicate(|id: &str| taken.contains(id) || assigned.contains(id)),
        )?;
        assigned.insert(short_id.clone());

        nodes.push(NewNode {
            short_id,
            full_id,
            doc_id: doc_id.to_string(),
            kind: block.kind,
            title: block.title.clone(),
            level: block.level,
            language: block.language.clone(),
            start: block.start,
            end: block.end,
            body: Some(searchable_text(raw, blocks, idx)),
        });
    }

    let edges = if opts.link_sections {
        containment_edges(blocks)
    } else {
        Vec::new()
    };
    Ok(DocumentBatch { nodes, edges })
}

/// Text indexed for a block. A heading indexes its whole section (every
/// following block up to the next heading at the same or a higher level);
/// the document node indexes nothing beyond its title.
fn searchable_text(raw: &[u8], blocks: &[Block], idx: usize) -> String {
    let block = &blocks[idx];
    match block.kind {
        BlockKind::Doc => String::new(),
        BlockKind::Heading => {
            let level = block.level.unwrap_or(1);
            let section_end = blocks[idx + 1..]
                .iter()
                .find(|b| b.kind == BlockKind::Heading && b.level.unwrap_or(1) <= level)
                .map_or(raw.len(), |b| b.start);
            let section = &raw[block.end.min(section_end)..section_end];
            String::from_utf8_lossy(section).trim().to_string()
        }
        BlockKind::Paragraph | BlockKind::Codeblock => block.text(raw).trim().to_string(),
    }
}

/// Parent → child edges following heading nesting. Blocks before the first
/// heading hang off the document node when there is one.
fn containment_edges(blocks: &[Block]) -> Vec<(usize, usize, EdgeKind)> {
    let mut edges = Vec::new();
    let mut root = None;
    let mut open: Vec<(u8, usize)> = Vec::new();

    for (idx, block) in blocks.iter().enumerate() {
        match block.kind {
            BlockKind::Doc => {
                root = Some(idx);
                continue;
            }
            BlockKind::Heading => {
                let level = block.level.unwrap_or(1);
                while open.last().is_some_and(|(l, _)| *l >= level) {
                    open.pop();
                }
                if let Some(parent) = open.last().map(|(_, p)| *p).or(root) {
                    edges.push((parent, idx, EdgeKind::Contains));
                }
                open.push((level, idx));
            }
            BlockKind::Paragraph | BlockKind::Codeblock => {
                if let Some(parent) = open.last().map(|(_, p)| *p).or(root) {
                    edges.push((parent, idx, EdgeKind::Contains));
                }
            }
        }
    }
    edges
}

/// Counters for a [`sync_items`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub scanned: usize,
    pub ingested: usize,
    pub unchanged: usize,
    pub nodes: usize,
}

/// Ingest every item whose stored content hash differs from its bytes.
pub fn sync_items(store: &mut GraphStore, items: &[FileItem], opts: &IngestOptions) -> Result<SyncStats> {
    let mut stats = SyncStats {
        scanned: items.len(),
        ..SyncStats::default()
    };

    for item in items {
        let hash = crate::store::content_hash(&item.bytes);
        match store.get_document(&item.doc_id) {
            Ok(existing) if existing.content_hash == hash => {
                stats.unchanged += 1;
                continue;
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let source_path = item.source_path.to_string_lossy();
        let report = ingest_document(store, &item.doc_id, &source_path, &item.bytes, opts)?;
        stats.ingested += 1;
        stats.nodes += report.nodes.len();
    }

    tracing::info!(
        scanned = stats.scanned,
        ingested = stats.ingested,
        unchanged = stats.unchanged,
        "sync finished"
    );
    Ok(stats)
}
