//! # docgraph
//!
//! Shreds plain-text and Markdown documents into an addressable graph of
//! structural nodes and keeps that graph in a single SQLite file with
//! full-text search and scoped, cached querying.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Parser  │──▶│ Identity │──▶│ Graph Store │◀──│ Scope+Cache  │
//! │  blocks  │   │full/short│   │ SQLite WAL  │   │ TTL resolver │
//! └──────────┘   └──────────┘   │ FTS5        │   └──────┬───────┘
//!                               └─────────────┘          │
//!                                      ▲                 ▼
//!                                      └───────────── query
//! ```
//!
//! Every block span is a half-open byte range into the original document, so
//! stored nodes can always be mapped back to the exact input bytes. Node
//! identity is content-addressed: re-ingesting identical bytes reproduces
//! identical IDs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use docgraph::ingest::{ingest_document, IngestOptions};
//! use docgraph::query;
//! use docgraph::scope::{ScopeFilter, ScopeResolver};
//! use docgraph::store::GraphStore;
//!
//! # fn main() -> docgraph::Result<()> {
//! let mut store = GraphStore::open("./data/docgraph.sqlite")?;
//! ingest_document(&mut store, "notes.md", "notes.md", b"# Title\n\nBody text.\n", &IngestOptions::default())?;
//!
//! let mut resolver = ScopeResolver::default();
//! let hits = query::search(&store, &mut resolver, &ScopeFilter::default(), "body", 10)?;
//! assert_eq!(hits.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`parser`] | Streaming byte-offset block parser |
//! | [`identity`] | Full and short node IDs |
//! | [`store`] | SQLite graph store (documents, nodes, edges, collections, topics, FTS, vectors) |
//! | [`scope`] | Scope filters and the TTL scope cache |
//! | [`query`] | Scoped search and lookups |
//! | [`ingest`] | Parse → identify → persist pipeline |
//! | [`models`] | Core data types |
//! | [`error`] | Error type |
//! | [`config`] | TOML configuration for the CLI |
//! | [`connector_fs`] | Filesystem scan |
//! | [`embedding`] | Embedding capability and vector helpers |

pub mod config;
pub mod connector_fs;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod query;
pub mod scope;
pub mod store;

pub use error::{Error, Result};
