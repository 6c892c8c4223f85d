//! Content-addressed node identity.
//!
//! Every node gets two identifiers:
//!
//! - **`full_id`**: BLAKE2s-128 over `doc_id ‖ start (u64 LE) ‖ end (u64 LE)
//!   ‖ kind ‖ span bytes`, rendered as 32 lowercase hex characters. Pure
//!   function of its inputs, so re-ingesting unchanged content reproduces
//!   the same value.
//! - **`short_id`**: 4 characters of Crockford-style Base32 derived from a
//!   3-byte prefix. Collisions against a caller-supplied set of taken IDs
//!   are resolved by rehashing `full_id ‖ nonce (u32 LE)` for increasing
//!   nonces, up to [`MAX_SHORT_ID_ATTEMPTS`] attempts.

use blake2::digest::consts::U16;
use blake2::{Blake2s, Digest};
use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::BuildHasher;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::BlockKind;

type Blake2s128 = Blake2s<U16>;

/// Symbols used for short IDs: digits plus letters without I, L, O, U.
pub const SHORT_ID_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Number of characters in a short ID.
pub const SHORT_ID_LEN: usize = 4;

/// Nonces tried before giving up on a short ID.
pub const MAX_SHORT_ID_ATTEMPTS: u32 = 1000;

/// 16-byte content hash identifying a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullId([u8; 16]);

impl FullId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for FullId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FullId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FullId({})", self.to_hex())
    }
}

impl FromStr for FullId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::InvalidData(format!("full id {s:?} is not hex: {e}")))?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::InvalidData(format!("full id {s:?} is not 16 bytes")))?;
        Ok(Self(arr))
    }
}

impl Serialize for FullId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Compute the deterministic `full_id` of a span.
pub fn compute_full_id(doc_id: &str, start: u64, end: u64, kind: BlockKind, content: &[u8]) -> FullId {
    let mut hasher = Blake2s128::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(start.to_le_bytes());
    hasher.update(end.to_le_bytes());
    hasher.update(kind.as_str().as_bytes());
    hasher.update(content);
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    FullId(out)
}

/// Set of short IDs already in use, consulted during collision resolution.
pub trait ExistingIds {
    fn contains_id(&self, id: &str) -> bool;
}

impl<S: BuildHasher> ExistingIds for HashSet<String, S> {
    fn contains_id(&self, id: &str) -> bool {
        self.contains(id)
    }
}

impl ExistingIds for BTreeSet<String> {
    fn contains_id(&self, id: &str) -> bool {
        self.contains(id)
    }
}

impl ExistingIds for [String] {
    fn contains_id(&self, id: &str) -> bool {
        self.iter().any(|s| s == id)
    }
}

/// Adapts a predicate into an [`ExistingIds`] set.
pub struct IdPredicate<F>(pub F);

impl<F: Fn(&str) -> bool> ExistingIds for IdPredicate<F> {
    fn contains_id(&self, id: &str) -> bool {
        (self.0)(id)
    }
}

/// Encode the top 20 bits of a 3-byte prefix as four Base32 symbols,
/// most significant group first.
pub fn encode_short_id(prefix: [u8; 3]) -> String {
    let value = ((prefix[0] as u32) << 16 | (prefix[1] as u32) << 8 | prefix[2] as u32) >> 4;
    (0..SHORT_ID_LEN)
        .rev()
        .map(|group| SHORT_ID_ALPHABET[((value >> (group * 5)) & 0x1f) as usize] as char)
        .collect()
}

fn nonce_prefix(full_id: &FullId, nonce: u32) -> [u8; 3] {
    if nonce == 0 {
        let b = full_id.as_bytes();
        return [b[0], b[1], b[2]];
    }
    let mut hasher = Blake2s128::new();
    hasher.update(full_id.as_bytes());
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();
    [digest[0], digest[1], digest[2]]
}

/// Short ID candidate for a given nonce, without consulting any set.
pub fn short_id_candidate(full_id: &FullId, nonce: u32) -> String {
    encode_short_id(nonce_prefix(full_id, nonce))
}

/// Derive a short ID for `full_id` that is not in `existing`.
///
/// Nonce 0 uses the first three bytes of `full_id` directly; each further
/// nonce rehashes. Fails with [`Error::IdentityCollisionExhausted`] once
/// [`MAX_SHORT_ID_ATTEMPTS`] candidates have all collided.
pub fn generate_short_id<E: ExistingIds + ?Sized>(full_id: &FullId, existing: &E) -> Result<String> {
    for nonce in 0..MAX_SHORT_ID_ATTEMPTS {
        let candidate = short_id_candidate(full_id, nonce);
        if !existing.contains_id(&candidate) {
            if nonce > 0 {
                tracing::debug!(%full_id, nonce, short_id = %candidate, "resolved short id collision");
            }
            return Ok(candidate);
        }
    }
    Err(Error::IdentityCollisionExhausted {
        full_id: full_id.to_hex(),
        attempts: MAX_SHORT_ID_ATTEMPTS,
    })
}

fn normalize_char(c: char) -> char {
    match c.to_ascii_uppercase() {
        'I' | 'L' => '1',
        'O' => '0',
        other => other,
    }
}

fn symbol_value(c: char) -> Option<u32> {
    SHORT_ID_ALPHABET
        .iter()
        .position(|&s| s as char == c)
        .map(|p| p as u32)
}

/// Decode a Base32 short ID into its numeric value.
///
/// Case is ignored and the ambiguous letters I/L and O are read as 1 and 0.
pub fn decode_short_id(input: &str) -> Result<u32> {
    let invalid = |reason: String| Error::InvalidShortId {
        input: input.to_string(),
        reason,
    };
    if input.is_empty() {
        return Err(invalid("empty".to_string()));
    }
    if input.chars().count() > 6 {
        return Err(invalid("too long to decode".to_string()));
    }
    input.chars().try_fold(0u32, |acc, c| {
        let value = symbol_value(normalize_char(c))
            .ok_or_else(|| invalid(format!("character {c:?} is not in the alphabet")))?;
        Ok(acc << 5 | value)
    })
}

/// Canonical form of a short ID: exactly four upper-case alphabet symbols.
pub fn normalize_short_id(input: &str) -> Result<String> {
    let len = input.chars().count();
    if len != SHORT_ID_LEN {
        return Err(Error::InvalidShortId {
            input: input.to_string(),
            reason: format!("expected {SHORT_ID_LEN} characters, got {len}"),
        });
    }
    decode_short_id(input)?;
    Ok(input.chars().map(normalize_char).collect())
}

pub fn is_valid_short_id(input: &str) -> bool {
    normalize_short_id(input).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn sample() -> FullId {
        compute_full_id("notes/a.md", 0, 8, BlockKind::Heading, b"# Title\n")
    }

    #[test]
    fn test_full_id_deterministic() {
        assert_eq!(sample(), sample());
        let hex = sample().to_hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_full_id_changes_with_each_input() {
        let base = sample();
        assert_ne!(base, compute_full_id("notes/b.md", 0, 8, BlockKind::Heading, b"# Title\n"));
        assert_ne!(base, compute_full_id("notes/a.md", 1, 8, BlockKind::Heading, b"# Title\n"));
        assert_ne!(base, compute_full_id("notes/a.md", 0, 9, BlockKind::Heading, b"# Title\n"));
        assert_ne!(base, compute_full_id("notes/a.md", 0, 8, BlockKind::Paragraph, b"# Title\n"));
        assert_ne!(base, compute_full_id("notes/a.md", 0, 8, BlockKind::Heading, b"# Titl3\n"));
    }

    #[test]
    fn test_full_id_no_collisions_in_corpus() {
        let kinds = [
            BlockKind::Doc,
            BlockKind::Heading,
            BlockKind::Paragraph,
            BlockKind::Codeblock,
        ];
        let mut seen = HashSet::new();
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        for i in 0..10_000u64 {
            // xorshift for varied content
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let doc_id = format!("doc-{}", i % 37);
            let start = i;
            let end = i + (state % 64);
            let kind = kinds[(state % 4) as usize];
            let content = state.to_le_bytes();
            seen.insert(compute_full_id(&doc_id, start, end, kind, &content));
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_full_id_hex_parse() {
        let id = sample();
        let parsed: FullId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("zz".parse::<FullId>().is_err());
        assert!("abcd".parse::<FullId>().is_err());
    }

    #[test]
    fn test_encode_short_id_bits() {
        assert_eq!(encode_short_id([0, 0, 0]), "0000");
        assert_eq!(encode_short_id([0xff, 0xff, 0xff]), "ZZZZ");
        // 0x000010 >> 4 == 1
        assert_eq!(encode_short_id([0x00, 0x00, 0x10]), "0001");
        // low nibble of the third byte is dropped
        assert_eq!(encode_short_id([0x00, 0x00, 0x0f]), "0000");
        // top group: 0x80_00_00 >> 4 == 0x80000 == 16 << 15
        assert_eq!(encode_short_id([0x80, 0x00, 0x00]), "G000");
    }

    #[test]
    fn test_short_id_nonce_zero_uses_prefix() {
        let id = sample();
        let b = id.as_bytes();
        let expected = encode_short_id([b[0], b[1], b[2]]);
        let empty: HashSet<String> = HashSet::new();
        assert_eq!(generate_short_id(&id, &empty).unwrap(), expected);
    }

    #[test]
    fn test_short_id_collision_resolution() {
        let id = sample();
        let first = short_id_candidate(&id, 0);
        let mut existing = HashSet::new();
        existing.insert(first.clone());
        let resolved = generate_short_id(&id, &existing).unwrap();
        assert_ne!(resolved, first);
        assert_eq!(resolved.len(), SHORT_ID_LEN);
        // deterministic: the same set yields the same answer
        assert_eq!(generate_short_id(&id, &existing).unwrap(), resolved);
    }

    struct AllTaken {
        calls: Cell<u32>,
    }

    impl ExistingIds for AllTaken {
        fn contains_id(&self, _id: &str) -> bool {
            self.calls.set(self.calls.get() + 1);
            true
        }
    }

    #[test]
    fn test_short_id_exhaustion_at_limit() {
        let taken = AllTaken { calls: Cell::new(0) };
        let err = generate_short_id(&sample(), &taken).unwrap_err();
        match err {
            Error::IdentityCollisionExhausted { attempts, full_id } => {
                assert_eq!(attempts, MAX_SHORT_ID_ATTEMPTS);
                assert_eq!(full_id, sample().to_hex());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(taken.calls.get(), 1000);
    }

    #[test]
    fn test_short_id_succeeds_on_last_attempt() {
        let id = sample();
        let last = short_id_candidate(&id, MAX_SHORT_ID_ATTEMPTS - 1);
        let calls = Cell::new(0u32);
        let existing = IdPredicate(|candidate: &str| {
            calls.set(calls.get() + 1);
            calls.get() < MAX_SHORT_ID_ATTEMPTS || candidate != last
        });
        assert_eq!(generate_short_id(&id, &existing).unwrap(), last);
        assert_eq!(calls.get(), MAX_SHORT_ID_ATTEMPTS);
    }

    #[test]
    fn test_decode_normalizes_ambiguous_characters() {
        assert_eq!(decode_short_id("0000").unwrap(), 0);
        assert_eq!(decode_short_id("zzzz").unwrap(), (1 << 20) - 1);
        assert_eq!(decode_short_id("IL0O").unwrap(), decode_short_id("1100").unwrap());
        assert_eq!(decode_short_id("g000").unwrap(), 16 << 15);
    }

    #[test]
    fn test_decode_rejects_out_of_alphabet() {
        assert!(matches!(
            decode_short_id("AB-U"),
            Err(Error::InvalidShortId { .. })
        ));
        assert!(decode_short_id("U000").is_err());
        assert!(decode_short_id("").is_err());
    }

    #[test]
    fn test_encode_decode_agree() {
        let id = sample();
        let b = id.as_bytes();
        let value = ((b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32) >> 4;
        assert_eq!(decode_short_id(&short_id_candidate(&id, 0)).unwrap(), value);
    }

    #[test]
    fn test_validator() {
        assert!(is_valid_short_id("7K2M"));
        assert!(is_valid_short_id("7k2m"));
        assert!(is_valid_short_id("oIlz"));
        assert!(!is_valid_short_id("7K2"));
        assert!(!is_valid_short_id("7K2MM"));
        assert!(!is_valid_short_id("7K2U"));
        assert_eq!(normalize_short_id("oilz").unwrap(), "011Z");
    }
}
