//! # docgraph CLI (`dg`)
//!
//! Thin shell over the `docgraph` library: resolves configuration, opens the
//! store and prints results. Diagnostics go to stderr through `tracing`
//! (`RUST_LOG`, default `warn`); stdout carries results only.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dg init` | Create the store file and schema |
//! | `dg ingest <file>` | Shred one file into nodes |
//! | `dg sync <dir>` | Ingest every changed file under a directory |
//! | `dg search "<query>"` | Scoped full-text search |
//! | `dg get <short_id>` | Show one node and its text |
//! | `dg doc <doc_id>` | Show a document and its nodes |
//! | `dg collection create\|add\|list` | Manage project collections |
//! | `dg topic create\|tag\|list` | Manage topics |
//! | `dg pragma <name>` | Print a SQLite PRAGMA value |

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use docgraph::config::{self, Config};
use docgraph::connector_fs;
use docgraph::ingest::{self, ingest_document};
use docgraph::models::{EntityRef, Node};
use docgraph::query;
use docgraph::scope::{ScopeFilter, ScopeResolver};
use docgraph::store::GraphStore;

const DEFAULT_CONFIG: &str = "./config/dg.toml";

/// Shred Markdown documents into an addressable node graph and query it.
#[derive(Parser)]
#[command(name = "dg", version, about)]
struct Cli {
    /// Path to a TOML config file. Defaults to `./config/dg.toml` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store file path, overriding `[db].path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store file and schema. Safe to run repeatedly.
    Init,

    /// Ingest one file, replacing any previous version of the document.
    Ingest {
        file: PathBuf,

        /// Document id. Defaults to the path as given.
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// Ingest every matching file under a directory whose content changed.
    Sync { dir: PathBuf },

    /// Full-text search filtered by scope.
    Search {
        query: String,

        #[command(flatten)]
        scope: ScopeArgs,

        /// Maximum number of results. Defaults to `[search].default_limit`.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Show a node by short ID.
    Get {
        short_id: String,

        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long)]
        json: bool,
    },

    /// Show a document and its nodes.
    Doc {
        doc_id: String,

        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long)]
        json: bool,
    },

    /// Manage project collections.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Manage topics.
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },

    /// Print a SQLite PRAGMA value, e.g. `journal_mode`.
    Pragma { name: String },
}

#[derive(Args, Default)]
struct ScopeArgs {
    /// Restrict to members of this collection.
    #[arg(long)]
    project: Option<String>,

    /// Require one of these topics (repeatable).
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Drop nodes carrying any of these topics (repeatable).
    #[arg(long = "exclude-topic")]
    exclude_topics: Vec<String>,

    /// Let nodes tagged `shared` bypass project and topic filters.
    #[arg(long)]
    shared: bool,
}

impl ScopeArgs {
    fn filter(self) -> ScopeFilter {
        ScopeFilter {
            project: self.project,
            topics: self.topics,
            exclude_topics: self.exclude_topics,
            include_shared: self.shared,
        }
    }
}

/// A node (by short ID) or a document (by id).
#[derive(Args)]
struct TargetArgs {
    #[arg(long, conflicts_with = "doc", required_unless_present = "doc")]
    node: Option<String>,

    #[arg(long)]
    doc: Option<String>,
}

impl TargetArgs {
    fn resolve(&self, store: &GraphStore) -> Result<EntityRef> {
        match (&self.node, &self.doc) {
            (Some(short_id), _) => Ok(EntityRef::Node(store.get_node_by_short_id(short_id)?.node_pk)),
            (None, Some(doc_id)) => Ok(EntityRef::Document(store.get_document(doc_id)?.doc_id)),
            (None, None) => anyhow::bail!("either --node or --doc is required"),
        }
    }
}

#[derive(Subcommand)]
enum CollectionAction {
    Create { name: String },
    /// Add a node or document to a collection.
    Add {
        name: String,
        #[command(flatten)]
        target: TargetArgs,
    },
    List,
}

#[derive(Subcommand)]
enum TopicAction {
    Create { name: String },
    /// Tag a node or document with a topic.
    Tag {
        name: String,
        #[command(flatten)]
        target: TargetArgs,
    },
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::load_config_or_default(Path::new(DEFAULT_CONFIG))?,
    };
    if let Some(db) = cli.db {
        cfg.db.path = db;
    }

    run(cli.command, &cfg)
}

fn open_store(cfg: &Config) -> Result<GraphStore> {
    GraphStore::open(&cfg.db.path)
        .with_context(|| format!("Failed to open store at {}", cfg.db.path.display()))
}

fn run(command: Commands, cfg: &Config) -> Result<()> {
    match command {
        Commands::Init => {
            let store = open_store(cfg)?;
            println!(
                "Store initialized at {} (journal_mode={})",
                cfg.db.path.display(),
                store.get_pragma("journal_mode")?.unwrap_or_default()
            );
        }
        Commands::Ingest { file, doc_id } => {
            let raw = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let doc_id = doc_id.unwrap_or_else(|| file.to_string_lossy().into_owned());
            let mut store = open_store(cfg)?;
            let report = ingest_document(
                &mut store,
                &doc_id,
                &file.to_string_lossy(),
                &raw,
                &cfg.ingest.options(),
            )?;
            println!(
                "ingested {}: {} nodes, {} edges",
                doc_id,
                report.nodes.len(),
                report.edges.len()
            );
        }
        Commands::Sync { dir } => {
            let items =
                connector_fs::scan_directory(&dir, &cfg.ingest.include_globs, &cfg.ingest.exclude_globs)?;
            let mut store = open_store(cfg)?;
            let stats = ingest::sync_items(&mut store, &items, &cfg.ingest.options())?;
            println!("sync {}", dir.display());
            println!("  scanned: {}", stats.scanned);
            println!("  ingested: {}", stats.ingested);
            println!("  unchanged: {}", stats.unchanged);
            println!("  nodes written: {}", stats.nodes);
            println!("ok");
        }
        Commands::Search {
            query: text,
            scope,
            limit,
            json,
        } => {
            let store = open_store(cfg)?;
            let mut resolver = ScopeResolver::new(cfg.scope.cache_ttl());
            let limit = limit.unwrap_or(cfg.search.default_limit);
            let nodes = query::search(&store, &mut resolver, &scope.filter(), &text, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&nodes)?);
            } else if nodes.is_empty() {
                println!("No results.");
            } else {
                for (i, node) in nodes.iter().enumerate() {
                    println!("{}. {}", i + 1, describe(node));
                    println!("    {}", preview(&store, node)?);
                }
            }
        }
        Commands::Get {
            short_id,
            scope,
            json,
        } => {
            let store = open_store(cfg)?;
            let mut resolver = ScopeResolver::new(cfg.scope.cache_ttl());
            let Some(node) = query::lookup_short_id(&store, &mut resolver, &scope.filter(), &short_id)?
            else {
                anyhow::bail!("node {} is outside the requested scope", short_id);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&node)?);
            } else {
                let doc = store.get_document(&node.doc_id)?;
                println!("--- Node ---");
                println!("short_id: {}", node.short_id);
                println!("full_id:  {}", node.full_id);
                println!("doc_id:   {}", node.doc_id);
                println!("kind:     {}", node.kind);
                println!("span:     {}..{}", node.start, node.end);
                println!();
                print!("{}", String::from_utf8_lossy(&doc.raw[node.start..node.end]));
            }
        }
        Commands::Doc {
            doc_id,
            scope,
            json,
        } => {
            let store = open_store(cfg)?;
            let mut resolver = ScopeResolver::new(cfg.scope.cache_ttl());
            let nodes = query::nodes_for_document(&store, &mut resolver, &scope.filter(), &doc_id)?;
            let doc = store.get_document(&doc_id)?;
            if json {
                let out = serde_json::json!({ "document": doc, "nodes": nodes });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("--- Document ---");
                println!("doc_id:       {}", doc.doc_id);
                println!("source_path:  {}", doc.source_path);
                println!("content_hash: {}", doc.content_hash);
                println!("created_at:   {}", format_ts(doc.created_at));
                println!();
                println!("--- Nodes ({}) ---", nodes.len());
                for node in &nodes {
                    println!("{}", describe(node));
                }
            }
        }
        Commands::Collection { action } => {
            let store = open_store(cfg)?;
            match action {
                CollectionAction::Create { name } => {
                    let c = store.create_collection(&name)?;
                    println!("created collection {} (id {})", c.name, c.collection_id);
                }
                CollectionAction::Add { name, target } => {
                    let c = store.get_collection_by_name(&name)?;
                    let member = target.resolve(&store)?;
                    store.add_collection_member(c.collection_id, &member)?;
                    println!("added to {}", c.name);
                }
                CollectionAction::List => {
                    for c in store.list_collections()? {
                        let members = store.list_collection_members(c.collection_id)?.len();
                        println!("{}\t{} members", c.name, members);
                    }
                }
            }
        }
        Commands::Topic { action } => {
            let store = open_store(cfg)?;
            match action {
                TopicAction::Create { name } => {
                    let t = store.create_topic(&name)?;
                    println!("created topic {} (id {})", t.name, t.topic_id);
                }
                TopicAction::Tag { name, target } => {
                    let t = store.get_topic_by_name(&name)?;
                    let entity = target.resolve(&store)?;
                    store.assign_topic(t.topic_id, &entity)?;
                    println!("tagged {}", t.name);
                }
                TopicAction::List => {
                    for t in store.list_topics()? {
                        let targets = store.list_targets_for_topic(t.topic_id)?.len();
                        println!("{}\t{} targets", t.name, targets);
                    }
                }
            }
        }
        Commands::Pragma { name } => {
            let store = open_store(cfg)?;
            match store.get_pragma(&name)? {
                Some(value) => println!("{value}"),
                None => println!("(null)"),
            }
        }
    }
    Ok(())
}

fn describe(node: &Node) -> String {
    let mut line = format!(
        "[{}] {} {}:{}-{}",
        node.short_id, node.kind, node.doc_id, node.start, node.end
    );
    if let Some(title) = &node.title {
        line.push_str(&format!(" \"{title}\""));
    }
    line
}

/// First line of the node's text, shortened for listing.
fn preview(store: &GraphStore, node: &Node) -> Result<String> {
    const MAX_CHARS: usize = 80;
    let doc = store.get_document(&node.doc_id)?;
    let end = node.end.min(doc.raw.len());
    let text = String::from_utf8_lossy(&doc.raw[node.start.min(end)..end]).into_owned();
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if first.chars().count() > MAX_CHARS {
        let cut: String = first.chars().take(MAX_CHARS).collect();
        Ok(format!("{cut}…"))
    } else {
        Ok(first.to_string())
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
