//! Nostr event model and field assembly.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. Common examples include:
///
/// - `e` – links to another event ID
/// - `p` – references another author's public key
/// - `t` – free-form topic or hashtag
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved, and
/// tag order is significant: it feeds the signed event digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Parse a generic `key=value[;extra1;extra2;...]` tag expression.
    ///
    /// The expression splits on the first `=`; everything after it splits on
    /// `;` to produce additional tag elements, so `a=b;c` becomes
    /// `["a", "b", "c"]`. Expressions with no `=` or with an empty key yield
    /// `None` and are dropped by the caller without an error.
    pub fn from_expr(expr: &str) -> Option<Tag> {
        let (key, rest) = expr.split_once('=')?;
        if key.is_empty() {
            return None;
        }
        let mut fields = vec![key.to_string()];
        fields.extend(rest.split(';').map(str::to_string));
        Some(Tag(fields))
    }
}

/// A Nostr event as serialized on the wire.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "79be...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["e", "bb22"], ["t", "news"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
///
/// `id`, `pubkey`, and `sig` stay empty until the event is signed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags such as `e` (event reference) or `p` (pubkey reference).
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

/// Collect tags from the three flag sources: generic `key=value` expressions
/// first (malformed ones silently dropped), then `e` shorthands, then `p`
/// shorthands. Relative order within each source is preserved.
pub fn assemble_tags(exprs: &[String], e: &[String], p: &[String]) -> Vec<Tag> {
    let mut tags = Vec::with_capacity(exprs.len() + e.len() + p.len());
    for expr in exprs {
        if let Some(tag) = Tag::from_expr(expr) {
            tags.push(tag);
        }
    }
    for id in e {
        tags.push(Tag(vec!["e".into(), id.clone()]));
    }
    for pubkey in p {
        tags.push(Tag(vec!["p".into(), pubkey.clone()]));
    }
    tags
}

/// Resolve the created-at flag: the literal `now` means the current wall
/// clock, anything else must parse as a base-10 unix timestamp in seconds.
pub fn parse_created_at(value: &str) -> Result<u64> {
    if value == "now" {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
        return Ok(now.as_secs());
    }
    value
        .parse()
        .with_context(|| format!("failed to parse timestamp '{value}'"))
}
