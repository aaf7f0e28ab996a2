//! Cross-reference parser.
//!
//! Maps object numbers to byte offsets (or object-stream slots) so objects can
//! be loaded by reference. Handles classic `xref` tables, cross-reference
//! streams (PDF 1.5+), hybrid files with `/XRefStm`, and `/Prev` chains left
//! by earlier incremental updates.

use crate::error::{Error, Result};
use crate::lexer::is_pdf_whitespace;
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::{HashMap, HashSet};

/// Cross-reference table entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Entry for a free object
    Free,
    /// Entry for an uncompressed object (byte offset)
    Uncompressed,
    /// Entry for an object inside an object stream
    Compressed,
}

/// Cross-reference table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XRefEntry {
    /// Type of entry
    pub entry_type: XRefEntryType,
    /// Byte offset (uncompressed) or object stream number (compressed)
    pub offset: u64,
    /// Generation number (uncompressed) or index within stream (compressed)
    pub generation: u16,
}

impl XRefEntry {
    /// Create a new uncompressed entry.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// Create a new compressed entry (object in object stream).
    pub fn compressed(stream_obj_num: u64, index_in_stream: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index_in_stream,
        }
    }

    /// Create a new free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the entry points at a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// Syntax of a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefKind {
    /// Classic `xref` keyword table followed by `trailer`
    Table,
    /// `/Type /XRef` stream object
    Stream,
}

/// Merged cross-reference information for a whole document.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    /// Trailer of the newest section (for xref streams, the stream dictionary)
    trailer: Option<Dictionary>,
    /// Kind of the section `startxref` points at
    kind: XrefKind,
}

impl CrossRefTable {
    /// Create a new empty cross-reference table.
    pub fn new(kind: XrefKind) -> Self {
        Self {
            entries: HashMap::new(),
            trailer: None,
            kind,
        }
    }

    /// Set the trailer dictionary.
    pub fn set_trailer(&mut self, trailer: Dictionary) {
        self.trailer = Some(trailer);
    }

    /// Get the trailer dictionary if present.
    pub fn trailer(&self) -> Option<&Dictionary> {
        self.trailer.as_ref()
    }

    /// Kind of the newest section.
    pub fn kind(&self) -> XrefKind {
        self.kind
    }

    /// Add an entry to the cross-reference table.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Get an entry by object number.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Highest object number mentioned by any section.
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Merge entries from an older section. Entries already present win.
    pub fn merge_from(&mut self, other: CrossRefTable) {
        for (obj_num, entry) in other.entries {
            self.entries.entry(obj_num).or_insert(entry);
        }
        if self.trailer.is_none() {
            self.trailer = other.trailer;
        }
    }

    /// Get the number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Find the byte offset named by the last `startxref` keyword.
///
/// Only the final 2 KB are searched, the same window readers use.
pub fn find_xref_offset(data: &[u8]) -> Result<usize> {
    let window_start = data.len().saturating_sub(2048);
    let window = &data[window_start..];
    let keyword = b"startxref";

    let pos = window
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;

    let digits: String = window[pos + keyword.len()..]
        .iter()
        .skip_while(|c| is_pdf_whitespace(**c))
        .take_while(|c| c.is_ascii_digit())
        .map(|c| *c as char)
        .collect();

    let offset: usize = digits.parse().map_err(|_| Error::InvalidXref)?;
    if offset >= data.len() {
        return Err(Error::InvalidXref);
    }
    Ok(offset)
}

/// Parse the cross-reference chain starting at `offset`, following `/Prev`
/// and `/XRefStm` up to `max_depth` sections.
pub fn parse_xref(data: &[u8], offset: usize, max_depth: u32) -> Result<CrossRefTable> {
    let mut visited = HashSet::new();
    parse_xref_recursive(data, offset, 0, max_depth, &mut visited)
}

fn parse_xref_recursive(
    data: &[u8],
    offset: usize,
    depth: u32,
    max_depth: u32,
    visited: &mut HashSet<usize>,
) -> Result<CrossRefTable> {
    if depth > max_depth {
        return Err(Error::RecursionLimitExceeded(max_depth));
    }
    if !visited.insert(offset) {
        log::warn!("xref /Prev chain loops back to offset {}", offset);
        return Ok(CrossRefTable::new(XrefKind::Table));
    }
    if offset >= data.len() {
        return Err(Error::InvalidXref);
    }

    let start = skip_whitespace(data, offset);
    let mut xref = if data[start..].starts_with(b"xref") {
        log::debug!("Traditional xref at offset {}", offset);
        parse_traditional_xref(data, start)?
    } else if data[start].is_ascii_digit() {
        log::debug!("Cross-reference stream at offset {}", offset);
        parse_xref_stream(data, start)?
    } else {
        return Err(Error::InvalidXref);
    };

    let (xref_stm, prev) = match xref.trailer() {
        Some(trailer) => (
            trailer.get("XRefStm").and_then(|o| o.as_integer()),
            trailer.get("Prev").and_then(|o| o.as_integer()),
        ),
        None => (None, None),
    };

    // Hybrid file: the stream supplements the table at the same revision
    if let Some(stm_offset) = xref_stm {
        if stm_offset >= 0 {
            let stm = parse_xref_recursive(data, stm_offset as usize, depth + 1, max_depth, visited)?;
            xref.merge_from(stm);
        }
    }

    if let Some(prev_offset) = prev {
        if prev_offset >= 0 {
            log::debug!("Following /Prev {} from xref at {}", prev_offset, offset);
            let older = parse_xref_recursive(data, prev_offset as usize, depth + 1, max_depth, visited)?;
            xref.merge_from(older);
        }
    }

    Ok(xref)
}

fn skip_whitespace(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() && is_pdf_whitespace(data[pos]) {
        pos += 1;
    }
    pos
}

/// Read one line starting at `pos`; returns the line and the start of the next.
/// CR, LF and CRLF all terminate a line.
fn next_line(data: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    if pos >= data.len() {
        return None;
    }
    let end = data[pos..]
        .iter()
        .position(|c| *c == b'\r' || *c == b'\n')
        .map(|p| pos + p)
        .unwrap_or(data.len());
    let mut next = end;
    if next < data.len() && data[next] == b'\r' {
        next += 1;
    }
    if next < data.len() && data[next] == b'\n' {
        next += 1;
    }
    Some((&data[pos..end], next))
}

fn trim(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|c| !is_pdf_whitespace(*c)).unwrap_or(line.len());
    let end = line.iter().rposition(|c| !is_pdf_whitespace(*c)).map(|p| p + 1).unwrap_or(start);
    &line[start..end.max(start)]
}

fn parse_numbers(line: &[u8]) -> Vec<u64> {
    line.split(|c| is_pdf_whitespace(*c))
        .filter(|part| !part.is_empty())
        .map_while(|part| std::str::from_utf8(part).ok().and_then(|s| s.parse().ok()))
        .collect()
}

/// Parse a classic cross-reference table.
///
/// ```text
/// xref
/// 0 6
/// 0000000000 65535 f
/// 0000000018 00000 n
/// ...
/// trailer
/// << /Size 6 /Root 1 0 R >>
/// ```
fn parse_traditional_xref(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let mut xref = CrossRefTable::new(XrefKind::Table);
    let mut pos = start + b"xref".len();
    let mut trailer_pos = None;

    while let Some((raw, next)) = next_line(data, pos) {
        let line = trim(raw);
        let line_start = pos;
        pos = next;

        if line.is_empty() || line.starts_with(b"%") {
            continue;
        }
        if line.starts_with(b"trailer") {
            let lead = raw.iter().take_while(|c| is_pdf_whitespace(**c)).count();
            trailer_pos = Some(line_start + lead + b"trailer".len());
            break;
        }

        let header = parse_numbers(line);
        if header.len() != 2 {
            log::warn!("Skipping malformed xref subsection header {:?}", String::from_utf8_lossy(line));
            continue;
        }
        let (first, count) = (header[0] as u32, header[1] as u32);
        if count > 10_000_000 {
            return Err(Error::InvalidXref);
        }

        let mut i = 0;
        while i < count {
            let Some((raw_entry, after)) = next_line(data, pos) else {
                break;
            };
            let entry = trim(raw_entry);
            if entry.is_empty() {
                pos = after;
                continue;
            }
            if entry.starts_with(b"trailer") {
                log::warn!("Expected {} xref entries but found {} before trailer", count, i);
                break;
            }
            pos = after;

            let fields = parse_numbers(entry);
            let flag = entry.iter().rev().find(|c| c.is_ascii_alphabetic()).copied();
            let record = match (fields.as_slice(), flag) {
                ([offset, gen, ..], Some(b'n')) => XRefEntry::uncompressed(*offset, *gen as u16),
                ([next_free, gen, ..], _) => XRefEntry::free(*next_free, *gen as u16),
                _ => {
                    log::warn!("Malformed xref entry {:?}", String::from_utf8_lossy(entry));
                    XRefEntry::free(0, 65535)
                },
            };
            xref.add_entry(first + i, record);
            i += 1;
        }
    }

    let trailer_pos = trailer_pos.ok_or(Error::InvalidXref)?;
    let (_, trailer) = parse_object(&data[trailer_pos..]).map_err(|e| Error::ParseError {
        offset: trailer_pos,
        reason: format!("trailer dictionary: {}", e),
    })?;
    match trailer {
        Object::Dictionary(dict) => xref.set_trailer(dict),
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            })
        },
    }

    Ok(xref)
}

/// Parse a cross-reference stream (`/Type /XRef`) with `/W` field widths and
/// an optional `/Index` of subsections.
fn parse_xref_stream(data: &[u8], start: usize) -> Result<CrossRefTable> {
    let (_, (_, obj)) = parse_indirect_object(&data[start..]).map_err(|e| Error::ParseError {
        offset: start,
        reason: format!("xref stream object: {}", e),
    })?;

    let dict = match &obj {
        Object::Stream { dict, .. } => dict,
        _ => return Err(Error::InvalidXref),
    };
    if dict.get("Type").and_then(|o| o.as_name()) != Some("XRef") {
        return Err(Error::InvalidXref);
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|o| o.as_array())
        .map(|arr| arr.iter().filter_map(|o| o.as_integer()).map(|w| w.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|w| *w > 8) {
        return Err(Error::InvalidXref);
    }

    let size = dict.get("Size").and_then(|o| o.as_integer()).unwrap_or(0).max(0);
    let index: Vec<i64> = match dict.get("Index").and_then(|o| o.as_array()) {
        Some(arr) => arr.iter().filter_map(|o| o.as_integer()).collect(),
        None => vec![0, size],
    };

    let decoded = obj.decode_stream_data()?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::InvalidXref);
    }

    let mut xref = CrossRefTable::new(XrefKind::Stream);
    let mut rows = decoded.chunks_exact(row_len);

    for pair in index.chunks(2) {
        let [first, count] = pair else {
            break;
        };
        for i in 0..(*count).max(0) {
            let Some(row) = rows.next() else {
                log::warn!("Cross-reference stream shorter than its /Index");
                break;
            };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // Type defaults to 1 when its field is absent
            let kind = if widths[0] == 0 { 1 } else { read_int(f1) };
            let field2 = read_int(f2);
            let field3 = read_int(f3);
            let entry = match kind {
                0 => XRefEntry::free(field2, field3 as u16),
                1 => XRefEntry::uncompressed(field2, field3 as u16),
                2 => XRefEntry::compressed(field2, field3 as u16),
                other => {
                    log::debug!("Ignoring xref stream entry type {}", other);
                    continue;
                },
            };
            xref.add_entry((*first + i) as u32, entry);
        }
    }

    xref.set_trailer(dict.clone());
    Ok(xref)
}

/// Read a big-endian unsigned integer of up to 8 bytes.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}
