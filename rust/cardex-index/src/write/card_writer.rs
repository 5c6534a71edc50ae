//! Card record construction: weight adjustment, payload serialization and
//! block-aligned record framing.
//!
//! The weight step is a pure function of precomputed document statistics.
//! Every adjustment it applies leaves one human-readable trace note that is
//! serialized into the card record, so a later inspection can reconstruct
//! how a document ended up with its weight.

use cardex_common::{Result, error::Error, verify_data};
use cardex_format::records::{
    ATTR_GIANT, ATTR_HAS_BODY, ATTR_HAS_TITLE, CardRecordHeader, compress_card, decompress_card,
};
use cardex_format::vlen::{read_vlen, write_vlen};

use crate::document::Document;

/// Starting weight of every document before adjustments.
pub const WEIGHT_BASE: i32 = 1024;

/// Lower clamp of the final weight.
pub const WEIGHT_MIN: i32 = 1;

/// Upper clamp of the final weight.
pub const WEIGHT_MAX: i32 = 4096;

/// Body length at which a document is classified as giant.
pub const GIANT_BODY_LEN: usize = 1 << 20;

/// Cap on the serialized body excerpt, in bytes.
pub const MAX_EXCERPT: usize = 8192;

/// Cap on the serialized URL of a card or reference, in bytes.
pub const MAX_URL: usize = 4096;

/// Cap on the serialized title and each serialized meta-field text, in
/// bytes.
pub const MAX_META_TEXT: usize = 8192;

/// Cap on serialized meta fields.
pub const MAX_META_FIELDS: usize = 256;

/// Cap on serialized reference children.
pub const MAX_REFS: usize = 256;

const GIANT_PENALTY: i32 = 128;
const MISSING_BODY_PENALTY: i32 = 256;
const MISSING_LINK_PENALTY: i32 = 64;
const MISSING_TITLE_PENALTY: i32 = 96;

/// The variable-size content of one card record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardPayload {
    /// Capped at [`MAX_URL`] bytes.
    pub url: String,
    /// Empty when the document had no title; capped at [`MAX_META_TEXT`].
    pub title: String,
    /// Length-capped prefix of the body text.
    pub excerpt: String,
    /// `(meta class, text)` pairs in document order, each text capped at
    /// [`MAX_META_TEXT`] bytes.
    pub meta: Vec<(u8, String)>,
    /// `(is_redirect, url)` pairs, capped at [`MAX_REFS`].
    pub refs: Vec<(bool, String)>,
    /// Human-readable trace notes from the adjustment and capping steps.
    pub notes: Vec<String>,
}

/// Everything the scanner needs to fill the attribute record and write the
/// card record for one document.
#[derive(Debug, Clone)]
pub struct CardBuild {
    pub payload: CardPayload,
    /// Final clamped weight.
    pub weight: i32,
    /// `ATTR_*` flag bits.
    pub flags: u8,
}

/// Builds a card from a parsed document: applies the deterministic weight
/// adjustment and the data-quality caps, noting each one.
pub fn prepare_card(doc: &Document) -> CardBuild {
    let mut notes = Vec::new();
    let mut weight = WEIGHT_BASE;
    let giant = doc.body.len() >= GIANT_BODY_LEN;
    let has_title = doc.title.as_deref().is_some_and(|t| !t.is_empty());

    if giant {
        weight -= GIANT_PENALTY;
        notes.push(format!("weight -{GIANT_PENALTY}: giant document"));
    }
    if doc.body.is_empty() {
        weight -= MISSING_BODY_PENALTY;
        notes.push(format!("weight -{MISSING_BODY_PENALTY}: no body text"));
    }
    if doc.incoming_links == 0 {
        weight -= MISSING_LINK_PENALTY;
        notes.push(format!("weight -{MISSING_LINK_PENALTY}: no incoming links"));
    }
    if !has_title {
        weight -= MISSING_TITLE_PENALTY;
        notes.push(format!("weight -{MISSING_TITLE_PENALTY}: no title"));
    }
    if doc.weight_hint != 0 {
        weight += doc.weight_hint;
        notes.push(format!("weight {:+}: external hint", doc.weight_hint));
    }
    let weight = weight.clamp(WEIGHT_MIN, WEIGHT_MAX);

    let (excerpt, truncated) = capped(&doc.body, MAX_EXCERPT);
    if truncated {
        notes.push(format!("excerpt capped at {MAX_EXCERPT} bytes"));
    }
    let (url, truncated) = capped(&doc.url, MAX_URL);
    if truncated {
        notes.push(format!("url capped at {MAX_URL} bytes"));
    }
    let (title, truncated) = capped(doc.title.as_deref().unwrap_or(""), MAX_META_TEXT);
    if truncated {
        notes.push(format!("title capped at {MAX_META_TEXT} bytes"));
    }

    let mut meta_capped = 0usize;
    let meta: Vec<(u8, String)> = doc
        .meta
        .iter()
        .take(MAX_META_FIELDS)
        .map(|m| {
            let (text, truncated) = capped(&m.text, MAX_META_TEXT);
            if truncated {
                meta_capped += 1;
            }
            (m.class, text.to_string())
        })
        .collect();
    if meta_capped > 0 {
        notes.push(format!(
            "{meta_capped} meta field(s) capped at {MAX_META_TEXT} bytes"
        ));
    }
    if doc.meta.len() > MAX_META_FIELDS {
        notes.push(format!(
            "meta fields capped at {MAX_META_FIELDS} ({} dropped)",
            doc.meta.len() - MAX_META_FIELDS
        ));
    }

    let mut ref_urls_capped = 0usize;
    let refs: Vec<(bool, String)> = doc
        .refs
        .iter()
        .take(MAX_REFS)
        .map(|r| {
            let (url, truncated) = capped(&r.url, MAX_URL);
            if truncated {
                ref_urls_capped += 1;
            }
            (r.redirect, url.to_string())
        })
        .collect();
    if ref_urls_capped > 0 {
        notes.push(format!(
            "{ref_urls_capped} reference url(s) capped at {MAX_URL} bytes"
        ));
    }
    if doc.refs.len() > MAX_REFS {
        notes.push(format!(
            "refs capped at {MAX_REFS} ({} dropped)",
            doc.refs.len() - MAX_REFS
        ));
    }

    let mut flags = 0u8;
    if has_title {
        flags |= ATTR_HAS_TITLE;
    }
    if !doc.body.is_empty() {
        flags |= ATTR_HAS_BODY;
    }
    if giant {
        flags |= ATTR_GIANT;
    }

    CardBuild {
        payload: CardPayload {
            url: url.to_string(),
            title: title.to_string(),
            excerpt: excerpt.to_string(),
            meta,
            refs,
            notes,
        },
        weight,
        flags,
    }
}

/// Takes a length-capped prefix, never splitting a UTF-8 sequence.
fn capped(text: &str, cap: usize) -> (&str, bool) {
    if text.len() <= cap {
        return (text, false);
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_vlen(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn read_str(bytes: &[u8], at: &mut usize) -> Result<String> {
    let (len, width) = read_vlen(&bytes[*at..])?;
    *at += width;
    let len = len as usize;
    verify_data!(card_payload, bytes.len() - *at >= len);
    let s = std::str::from_utf8(&bytes[*at..*at + len])
        .map_err(|_| Error::invalid_format("card payload", "non-UTF-8 string field"))?
        .to_string();
    *at += len;
    Ok(s)
}

/// Serializes a payload into its flat byte form.
pub fn encode_payload(payload: &CardPayload) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        payload.url.len() + payload.title.len() + payload.excerpt.len() + 64,
    );
    write_str(&mut buf, &payload.url);
    write_str(&mut buf, &payload.title);
    write_str(&mut buf, &payload.excerpt);
    write_vlen(&mut buf, payload.meta.len() as u32);
    for (class, text) in &payload.meta {
        buf.push(*class);
        write_str(&mut buf, text);
    }
    write_vlen(&mut buf, payload.refs.len() as u32);
    for (redirect, url) in &payload.refs {
        buf.push(*redirect as u8);
        write_str(&mut buf, url);
    }
    write_vlen(&mut buf, payload.notes.len() as u32);
    for note in &payload.notes {
        write_str(&mut buf, note);
    }
    buf
}

/// Recovers a payload from its flat byte form.
pub fn decode_payload(bytes: &[u8]) -> Result<CardPayload> {
    let mut at = 0usize;
    let url = read_str(bytes, &mut at)?;
    let title = read_str(bytes, &mut at)?;
    let excerpt = read_str(bytes, &mut at)?;

    let (meta_count, width) = read_vlen(&bytes[at..])?;
    at += width;
    let mut meta = Vec::with_capacity(meta_count as usize);
    for _ in 0..meta_count {
        verify_data!(card_payload, at < bytes.len());
        let class = bytes[at];
        at += 1;
        meta.push((class, read_str(bytes, &mut at)?));
    }

    let (ref_count, width) = read_vlen(&bytes[at..])?;
    at += width;
    let mut refs = Vec::with_capacity(ref_count as usize);
    for _ in 0..ref_count {
        verify_data!(card_payload, at < bytes.len());
        let redirect = bytes[at] != 0;
        at += 1;
        refs.push((redirect, read_str(bytes, &mut at)?));
    }

    let (note_count, width) = read_vlen(&bytes[at..])?;
    at += width;
    let mut notes = Vec::with_capacity(note_count as usize);
    for _ in 0..note_count {
        notes.push(read_str(bytes, &mut at)?);
    }

    Ok(CardPayload {
        url,
        title,
        excerpt,
        meta,
        refs,
        notes,
    })
}

/// Frames a payload into one block-aligned on-disk card record:
/// header, stored (possibly compressed) payload, zero padding up to the
/// next `1 << align_shift` boundary.
pub fn encode_record(payload: &CardPayload, align_shift: u32) -> Result<Vec<u8>> {
    let raw = encode_payload(payload);
    let (header, stored) = compress_card(&raw)?;
    let mut record = Vec::with_capacity(
        std::mem::size_of::<CardRecordHeader>() + stored.len(),
    );
    record.extend_from_slice(bytemuck::bytes_of(&header));
    record.extend_from_slice(&stored);
    let align = 1usize << align_shift;
    let padded = record.len().div_ceil(align) * align;
    record.resize(padded, 0);
    Ok(record)
}

/// Reads back the record starting at the head of `bytes`, returning the
/// payload and the aligned number of bytes the record occupies.
pub fn decode_record(bytes: &[u8], align_shift: u32) -> Result<(CardPayload, usize)> {
    let header_size = std::mem::size_of::<CardRecordHeader>();
    verify_data!(card_record, bytes.len() >= header_size);
    let header: CardRecordHeader = bytemuck::pod_read_unaligned(&bytes[..header_size]);
    let stored_end = header_size + header.stored_len as usize;
    verify_data!(card_record, bytes.len() >= stored_end);
    let raw = decompress_card(&header, &bytes[header_size..stored_end])?;
    let payload = decode_payload(&raw)?;
    let align = 1usize << align_shift;
    let consumed = stored_end.div_ceil(align) * align;
    Ok((payload, consumed.min(bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MetaField, Reference};
    use cardex_format::records::DEFAULT_ALIGN_SHIFT;

    fn doc(body: &str, title: Option<&str>, links: u32) -> Document {
        Document {
            url: "http://example.test/".to_string(),
            title: title.map(str::to_string),
            body: body.to_string(),
            incoming_links: links,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_document_keeps_base_weight() {
        let build = prepare_card(&doc("some text", Some("T"), 3));
        assert_eq!(build.weight, WEIGHT_BASE);
        assert!(build.payload.notes.is_empty());
        assert_eq!(build.flags, ATTR_HAS_TITLE | ATTR_HAS_BODY);
    }

    #[test]
    fn test_each_penalty_leaves_a_note() {
        let build = prepare_card(&doc("", None, 0));
        // Missing body, missing links, missing title.
        assert_eq!(build.weight, WEIGHT_BASE - 256 - 64 - 96);
        assert_eq!(build.payload.notes.len(), 3);
        assert_eq!(build.flags, 0);
    }

    #[test]
    fn test_weight_clamps() {
        let mut d = doc("", None, 0);
        d.weight_hint = -100_000;
        assert_eq!(prepare_card(&d).weight, WEIGHT_MIN);
        d.weight_hint = 100_000;
        assert_eq!(prepare_card(&d).weight, WEIGHT_MAX);
    }

    #[test]
    fn test_giant_document() {
        let build = prepare_card(&doc(&"x".repeat(GIANT_BODY_LEN), Some("T"), 1));
        assert_eq!(build.weight, WEIGHT_BASE - 128);
        assert_ne!(build.flags & ATTR_GIANT, 0);
        assert!(build.payload.notes[0].contains("giant"));
    }

    #[test]
    fn test_excerpt_respects_char_boundary() {
        // A body of 3-byte chars sized so the cap lands mid-sequence.
        let body = "\u{65e5}".repeat(MAX_EXCERPT / 3 + 10);
        let build = prepare_card(&doc(&body, Some("T"), 1));
        assert!(build.payload.excerpt.len() <= MAX_EXCERPT);
        assert!(build.payload.excerpt.is_char_boundary(build.payload.excerpt.len()));
        assert!(build.payload.notes.iter().any(|n| n.contains("excerpt")));
    }

    #[test]
    fn test_refs_capped_with_note() {
        let mut d = doc("body", Some("T"), 1);
        d.refs = (0..MAX_REFS + 5)
            .map(|i| Reference {
                url: format!("http://r{i}/"),
                redirect: false,
            })
            .collect();
        let build = prepare_card(&d);
        assert_eq!(build.payload.refs.len(), MAX_REFS);
        assert!(build.payload.notes.iter().any(|n| n.contains("5 dropped")));
    }

    #[test]
    fn test_oversized_meta_field_is_capped() {
        let mut d = doc("body", Some("T"), 1);
        d.meta.push(MetaField {
            class: 2,
            text: "k".repeat((1 << 21) + 1),
        });
        let build = prepare_card(&d);
        assert_eq!(build.payload.meta[0].1.len(), MAX_META_TEXT);
        assert!(build.payload.notes.iter().any(|n| n.contains("meta field")));
        // The record must serialize, not halt on the oversized input.
        let record = encode_record(&build.payload, DEFAULT_ALIGN_SHIFT).unwrap();
        let (decoded, _) = decode_record(&record, DEFAULT_ALIGN_SHIFT).unwrap();
        assert_eq!(decoded, build.payload);
    }

    #[test]
    fn test_oversized_urls_are_capped() {
        let mut d = doc("body", Some("T"), 1);
        d.url = format!("http://long/{}", "a".repeat(1 << 21));
        d.refs = vec![Reference {
            url: format!("http://r/{}", "b".repeat(1 << 21)),
            redirect: false,
        }];
        let build = prepare_card(&d);
        assert_eq!(build.payload.url.len(), MAX_URL);
        assert_eq!(build.payload.refs[0].1.len(), MAX_URL);
        assert!(build.payload.notes.iter().any(|n| n.contains("url capped")));
        assert!(build.payload.notes.iter().any(|n| n.contains("reference url")));
        encode_record(&build.payload, DEFAULT_ALIGN_SHIFT).unwrap();
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = CardPayload {
            url: "http://example.test/a".to_string(),
            title: "Title".to_string(),
            excerpt: "body words".to_string(),
            meta: vec![(2, "k1 k2".to_string())],
            refs: vec![(false, "http://r/".to_string()), (true, "http://s/".to_string())],
            notes: vec!["weight -96: no title".to_string()],
        };
        let bytes = encode_payload(&payload);
        assert_eq!(decode_payload(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_record_round_trip_is_aligned() {
        let mut d = doc("the quick brown fox ", Some("T"), 1);
        d.body = d.body.repeat(50);
        d.meta.push(MetaField {
            class: 2,
            text: "fox".to_string(),
        });
        let build = prepare_card(&d);
        let record = encode_record(&build.payload, DEFAULT_ALIGN_SHIFT).unwrap();
        assert_eq!(record.len() % (1 << DEFAULT_ALIGN_SHIFT), 0);
        let (decoded, consumed) = decode_record(&record, DEFAULT_ALIGN_SHIFT).unwrap();
        assert_eq!(decoded, build.payload);
        assert_eq!(consumed, record.len());
    }

    #[test]
    fn test_truncated_record_rejected() {
        let build = prepare_card(&doc("text", Some("T"), 1));
        let record = encode_record(&build.payload, DEFAULT_ALIGN_SHIFT).unwrap();
        assert!(decode_record(&record[..8], DEFAULT_ALIGN_SHIFT).is_err());
    }
}
