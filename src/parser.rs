//! Streaming byte-offset Markdown block parser.
//!
//! Splits raw document bytes into an ordered sequence of [`Block`]s
//! (headings, paragraphs, fenced code blocks). Every block carries exact
//! byte offsets into the input; nothing is rewritten, only spans are
//! computed. The parser never fails: unterminated fences run to end of
//! input and invalid UTF-8 in titles is replaced.
//!
//! Blank lines separate paragraphs and are not assigned to any block, so
//! the byte ranges they occupy show up in [`uncovered_ranges`].
//! [`reconstruct_document`] fills those gaps from the original buffer.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::models::{Block, BlockKind};

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u)^(#{1,6}) (.+)$").expect("heading pattern is valid"));

/// One input line. `bytes` excludes the terminator (and a `\r` before
/// `\n`); `end` is the offset just past the consumed terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub bytes: &'a [u8],
    pub start: usize,
    pub end: usize,
}

/// ASCII whitespace plus vertical tab, which `u8::is_ascii_whitespace`
/// leaves out.
fn is_space(b: u8) -> bool {
    b.is_ascii_whitespace() || b == 0x0b
}

impl Line<'_> {
    fn is_blank(&self) -> bool {
        self.bytes.iter().all(|&b| is_space(b))
    }
}

/// Split input into lines, CRLF-safe.
pub fn split_lines(input: &[u8]) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;

    while start < input.len() {
        let (content_end, end) = match input[start..].iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let nl = start + pos;
                let content_end = if nl > start && input[nl - 1] == b'\r' {
                    nl - 1
                } else {
                    nl
                };
                (content_end, nl + 1)
            }
            None => (input.len(), input.len()),
        };
        lines.push(Line {
            bytes: &input[start..content_end],
            start,
            end,
        });
        start = end;
    }

    lines
}

/// Fence marker character class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fence {
    Backtick,
    Tilde,
}

impl Fence {
    fn byte(self) -> u8 {
        match self {
            Fence::Backtick => b'`',
            Fence::Tilde => b'~',
        }
    }

    fn opening(line: &[u8]) -> Option<Fence> {
        if line.starts_with(b"```") {
            Some(Fence::Backtick)
        } else if line.starts_with(b"~~~") {
            Some(Fence::Tilde)
        } else {
            None
        }
    }

    fn closes(self, line: &[u8]) -> bool {
        let c = self.byte();
        line.len() >= 3 && line[..3].iter().all(|&b| b == c)
    }
}

fn heading(line: &[u8]) -> Option<(u8, String)> {
    let caps = HEADING_RE.captures(line)?;
    let level = caps.get(1)?.len() as u8;
    let title = String::from_utf8_lossy(caps.get(2)?.as_bytes()).into_owned();
    Some((level, title))
}

fn fence_language(line: &[u8], fence: Fence) -> Option<String> {
    let c = fence.byte();
    let rest: &[u8] = {
        let skip = line.iter().take_while(|&&b| b == c).count();
        &line[skip..]
    };
    let info = String::from_utf8_lossy(rest);
    let info = info.trim();
    if info.is_empty() {
        None
    } else {
        Some(info.to_string())
    }
}

/// Restartable iterator over the blocks of a document.
///
/// Cloning the parser at any point yields an independent cursor that
/// replays the remaining blocks.
#[derive(Debug, Clone)]
pub struct BlockParser<'a> {
    input: &'a [u8],
    lines: Vec<Line<'a>>,
    pos: usize,
}

impl<'a> BlockParser<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            lines: split_lines(input),
            pos: 0,
        }
    }

    /// Rewind to the first block.
    pub fn restart(&mut self) {
        self.pos = 0;
    }

    fn code_block(&mut self, fence: Fence) -> Block {
        let open = self.lines[self.pos];
        let language = fence_language(open.bytes, fence);
        self.pos += 1;

        let mut end = self.input.len();
        while self.pos < self.lines.len() {
            let line = self.lines[self.pos];
            self.pos += 1;
            if fence.closes(line.bytes) {
                end = line.end;
                break;
            }
        }

        Block {
            kind: BlockKind::Codeblock,
            start: open.start,
            end,
            level: None,
            title: None,
            language,
        }
    }

    fn paragraph(&mut self) -> Block {
        let first = self.lines[self.pos];
        let mut end = first.end;
        self.pos += 1;

        while self.pos < self.lines.len() {
            let line = self.lines[self.pos];
            if line.is_blank() || heading(line.bytes).is_some() || Fence::opening(line.bytes).is_some()
            {
                break;
            }
            end = line.end;
            self.pos += 1;
        }

        Block {
            kind: BlockKind::Paragraph,
            start: first.start,
            end,
            level: None,
            title: None,
            language: None,
        }
    }
}

impl Iterator for BlockParser<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        while self.pos < self.lines.len() {
            let line = self.lines[self.pos];

            if line.is_blank() {
                self.pos += 1;
                continue;
            }

            if let Some((level, title)) = heading(line.bytes) {
                self.pos += 1;
                return Some(Block {
                    kind: BlockKind::Heading,
                    start: line.start,
                    end: line.end,
                    level: Some(level),
                    title: Some(title),
                    language: None,
                });
            }

            if let Some(fence) = Fence::opening(line.bytes) {
                return Some(self.code_block(fence));
            }

            return Some(self.paragraph());
        }
        None
    }
}

/// Parse a whole document into blocks.
pub fn parse_blocks(input: &[u8]) -> Vec<Block> {
    BlockParser::new(input).collect()
}

/// Synthesize the whole-document block. Its title is the first heading's
/// title, if any. Empty input has no document block.
pub fn document_block(input: &[u8]) -> Option<Block> {
    if input.is_empty() {
        return None;
    }
    let title = BlockParser::new(input)
        .find(|b| b.kind == BlockKind::Heading)
        .and_then(|b| b.title);
    Some(Block {
        kind: BlockKind::Doc,
        start: 0,
        end: input.len(),
        level: None,
        title,
        language: None,
    })
}

/// Byte ranges of `0..len` that no block covers, in order.
pub fn uncovered_ranges(len: usize, blocks: &[Block]) -> Vec<std::ops::Range<usize>> {
    let mut gaps = Vec::new();
    let mut cursor = 0;
    for block in blocks {
        if block.start > cursor {
            gaps.push(cursor..block.start);
        }
        cursor = cursor.max(block.end);
    }
    if cursor < len {
        gaps.push(cursor..len);
    }
    gaps
}

/// Rebuild document bytes from its blocks. Block spans are copied in order
/// and any uncovered range (blank-line separators) is filled from `content`,
/// so the result is only defined against the original buffer.
pub fn reconstruct_document(content: &[u8], blocks: &[Block]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    let mut cursor = 0;
    for block in blocks {
        if block.start > cursor {
            out.extend_from_slice(&content[cursor..block.start]);
        }
        if block.end > cursor {
            out.extend_from_slice(&content[block.start.max(cursor)..block.end]);
            cursor = block.end;
        }
    }
    if cursor < content.len() {
        out.extend_from_slice(&content[cursor..]);
    }
    out
}

/// Concatenate block spans only, without filling gaps.
pub fn concat_blocks(content: &[u8], blocks: &[Block]) -> Vec<u8> {
    blocks
        .iter()
        .flat_map(|b| b.bytes(content).iter().copied())
        .collect()
}
