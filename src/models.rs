//! Core data models used throughout docgraph.
//!
//! These types represent the blocks, documents, nodes and grouping rows that
//! flow through the parse → identify → persist → query pipeline.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::identity::FullId;

/// Structural kind of a block or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Doc,
    Heading,
    Paragraph,
    Codeblock,
}

impl BlockKind {
    /// Stable name used in storage and as hash input for `full_id`.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Doc => "doc",
            BlockKind::Heading => "heading",
            BlockKind::Paragraph => "paragraph",
            BlockKind::Codeblock => "codeblock",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doc" => Ok(BlockKind::Doc),
            "heading" => Ok(BlockKind::Heading),
            "paragraph" => Ok(BlockKind::Paragraph),
            "codeblock" => Ok(BlockKind::Codeblock),
            other => Err(Error::InvalidData(format!("unknown block kind: {other}"))),
        }
    }
}

/// A typed span produced by the parser. Offsets are a half-open byte range
/// into the original input; `end` includes any consumed line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub kind: BlockKind,
    pub start: usize,
    pub end: usize,
    pub level: Option<u8>,
    pub title: Option<String>,
    pub language: Option<String>,
}

impl Block {
    /// Raw bytes of this block within `content`.
    pub fn bytes<'a>(&self, content: &'a [u8]) -> &'a [u8] {
        &content[self.start..self.end]
    }

    /// Span text decoded as UTF-8, invalid sequences replaced.
    pub fn text(&self, content: &[u8]) -> String {
        String::from_utf8_lossy(self.bytes(content)).into_owned()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Stored source document.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub doc_pk: i64,
    pub doc_id: String,
    pub source_path: String,
    /// SHA-256 of the raw payload, lowercase hex.
    pub content_hash: String,
    pub created_at: i64,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// A node ready to be persisted; the store assigns `node_pk`.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub short_id: String,
    pub full_id: FullId,
    pub doc_id: String,
    pub kind: BlockKind,
    pub title: Option<String>,
    pub level: Option<u8>,
    pub language: Option<String>,
    pub start: usize,
    pub end: usize,
    /// Searchable body text. When `Some`, the node is indexed on insert.
    pub body: Option<String>,
}

/// A persisted, identified node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub node_pk: i64,
    pub short_id: String,
    pub full_id: FullId,
    pub doc_id: String,
    pub kind: BlockKind,
    pub title: Option<String>,
    pub level: Option<u8>,
    pub language: Option<String>,
    pub start: usize,
    pub end: usize,
}

/// Relationship kind carried by an edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum EdgeKind {
    /// Hierarchical containment (section → child block).
    Contains,
    /// Cross-reference between nodes.
    References,
    Other(String),
}

impl EdgeKind {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeKind::Contains => "contains",
            EdgeKind::References => "references",
            EdgeKind::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "contains" => EdgeKind::Contains,
            "references" => EdgeKind::References,
            other => EdgeKind::Other(other.to_string()),
        }
    }
}

impl From<EdgeKind> for String {
    fn from(kind: EdgeKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub edge_pk: i64,
    pub src_pk: i64,
    pub dst_pk: i64,
    pub kind: EdgeKind,
}

/// Reference to something that can join a collection or carry a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "key", rename_all = "lowercase")]
pub enum EntityRef {
    Node(i64),
    Document(String),
}

/// Storage tag for the kind of row an [`EntityRef`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Node,
    Document,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Node => "node",
            EntityType::Document => "document",
        }
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(EntityType::Node),
            "document" => Ok(EntityType::Document),
            other => Err(Error::InvalidData(format!("unknown entity type: {other}"))),
        }
    }
}

/// Named project-scoped grouping of nodes and documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub collection_id: i64,
    pub name: String,
    pub created_at: i64,
}

/// Membership row. `member_pk` is a `node_pk` or a document's `doc_pk`
/// depending on `member_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionMember {
    pub collection_id: i64,
    pub member_pk: i64,
    pub member_type: EntityType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub topic_id: i64,
    pub name: String,
    pub created_at: i64,
}

/// Well-known topic that marks cross-scope visibility.
pub const SHARED_TOPIC: &str = "shared";
