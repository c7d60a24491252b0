//! Compact fixed-offset event codec.
//!
//! The output looks like ordinary event JSON but carries an extra `nson`
//! field holding hex-encoded size descriptors, so a decoder can recover every
//! field with string slicing alone. Field order and the byte offsets of the
//! fixed-width fields (`id`, `pubkey`, `sig`, `created_at`) never vary:
//!
//! ```text
//! {"id":"<64>","pubkey":"<64>","sig":"<128>","created_at":<10>,"nson":"<hex>","kind":K,"content":C,"tags":T}
//! ```
//!
//! Descriptor bytes: total descriptor length, kind digit count, content JSON
//! length (u16 BE), tag count, then per tag an item count followed by a
//! u16 BE JSON length per item.

use anyhow::{anyhow, bail, Result};

use crate::event::{Event, Tag};

const ID_START: usize = 7;
const ID_END: usize = 71;
const PUBKEY_START: usize = 83;
const PUBKEY_END: usize = 147;
const SIG_START: usize = 156;
const SIG_END: usize = 284;
const CREATED_AT_START: usize = 299;
const CREATED_AT_END: usize = 309;
// the `,"nson":` between created_at and the descriptor hex
const MARKER_START: usize = 309;
const MARKER_END: usize = 317;
const DESC_START: usize = 318;

/// Serialize a signed event into the compact encoding.
pub fn encode(ev: &Event) -> Result<String> {
    if ev.id.len() != 64 || ev.pubkey.len() != 64 || ev.sig.len() != 128 {
        bail!("event must be signed before encoding");
    }
    let created_at = ev.created_at.to_string();
    if created_at.len() != 10 {
        bail!("created_at '{created_at}' does not fit the 10-digit timestamp field");
    }
    let kind = ev.kind.to_string();
    let content = serde_json::to_string(&ev.content)?;
    if content.len() > u16::MAX as usize {
        bail!("content too large to encode");
    }
    if ev.tags.len() > 255 {
        bail!("too many tags to encode");
    }

    let mut desc: Vec<u8> = vec![0, kind.len() as u8];
    desc.extend_from_slice(&(content.len() as u16).to_be_bytes());
    desc.push(ev.tags.len() as u8);

    let mut tags_json = String::from("[");
    for (t, Tag(items)) in ev.tags.iter().enumerate() {
        if items.len() > 255 {
            bail!("too many tag items to encode");
        }
        desc.push(items.len() as u8);
        tags_json.push('[');
        for (i, item) in items.iter().enumerate() {
            let encoded = serde_json::to_string(item)?;
            if encoded.len() > u16::MAX as usize {
                bail!("tag item too large to encode");
            }
            desc.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
            tags_json.push_str(&encoded);
            if i + 1 < items.len() {
                tags_json.push(',');
            }
        }
        tags_json.push(']');
        if t + 1 < ev.tags.len() {
            tags_json.push(',');
        }
    }
    tags_json.push(']');

    if desc.len() > 255 {
        bail!("too many tags or tag items to encode");
    }
    desc[0] = desc.len() as u8;

    let mut out = String::with_capacity(DESC_START + desc.len() * 2 + tags_json.len() + 64);
    out.push_str("{\"id\":\"");
    out.push_str(&ev.id);
    out.push_str("\",\"pubkey\":\"");
    out.push_str(&ev.pubkey);
    out.push_str("\",\"sig\":\"");
    out.push_str(&ev.sig);
    out.push_str("\",\"created_at\":");
    out.push_str(&created_at);
    out.push_str(",\"nson\":\"");
    out.push_str(&hex::encode(&desc));
    out.push_str("\",\"kind\":");
    out.push_str(&kind);
    out.push_str(",\"content\":");
    out.push_str(&content);
    out.push_str(",\"tags\":");
    out.push_str(&tags_json);
    out.push('}');
    Ok(out)
}

/// Parse a compactly encoded event back into an [`Event`].
pub fn decode(data: &str) -> Result<Event> {
    if slice(data, MARKER_START, MARKER_END).ok() != Some(",\"nson\":") {
        bail!("not a compactly encoded event");
    }
    let id = slice(data, ID_START, ID_END)?.to_string();
    let pubkey = slice(data, PUBKEY_START, PUBKEY_END)?.to_string();
    let sig = slice(data, SIG_START, SIG_END)?.to_string();
    let created_at = slice(data, CREATED_AT_START, CREATED_AT_END)?
        .parse()
        .map_err(|_| anyhow!("invalid created_at field"))?;

    let desc_len = usize::from(
        u8::from_str_radix(slice(data, DESC_START, DESC_START + 2)?, 16)
            .map_err(|_| anyhow!("invalid descriptor length"))?,
    );
    if desc_len < 5 {
        bail!("descriptor too short");
    }
    let desc = hex::decode(slice(data, DESC_START, DESC_START + desc_len * 2)?)?;

    // closing quote of the descriptor string, then `,"kind":`
    let mut pos = DESC_START + desc_len * 2 + 1 + 8;
    let kind_chars = desc[1] as usize;
    let kind = slice(data, pos, pos + kind_chars)?
        .parse()
        .map_err(|_| anyhow!("invalid kind field"))?;
    pos += kind_chars + 11; // skip `,"content":`
    let content_len = desc_u16(&desc, 2)?;
    let content: String = serde_json::from_str(slice(data, pos, pos + content_len)?)?;
    pos += content_len + 8 + 1; // skip `,"tags":` and the opening bracket

    let ntags = desc[4] as usize;
    let mut di = 5;
    let mut tags = Vec::with_capacity(ntags);
    for t in 0..ntags {
        let nitems = *desc
            .get(di)
            .ok_or_else(|| anyhow!("descriptor truncated"))? as usize;
        di += 1;
        pos += 1; // opening bracket of this tag
        let mut items = Vec::with_capacity(nitems);
        for i in 0..nitems {
            let len = desc_u16(&desc, di)?;
            di += 2;
            items.push(serde_json::from_str(slice(data, pos, pos + len)?)?);
            pos += len;
            if i + 1 < nitems {
                pos += 1; // comma
            }
        }
        pos += 1; // closing bracket
        tags.push(Tag(items));
        if t + 1 < ntags {
            pos += 1; // comma
        }
    }

    Ok(Event {
        id,
        pubkey,
        kind,
        created_at,
        tags,
        content,
        sig,
    })
}

/// Slice `data` by byte range, erroring when the input is too short.
fn slice(data: &str, start: usize, end: usize) -> Result<&str> {
    data.get(start..end)
        .ok_or_else(|| anyhow!("encoded event truncated"))
}

/// Read a big-endian u16 from the descriptor at `at`.
fn desc_u16(desc: &[u8], at: usize) -> Result<usize> {
    let bytes = desc
        .get(at..at + 2)
        .ok_or_else(|| anyhow!("descriptor truncated"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
}
