//! ByteRange handling for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset of the `<` opening the signature value
//! - `offset2` = byte offset just past the closing `>`
//! - `length2` = remaining bytes to end of file
//!
//! Both the ByteRange text and the `/Contents` token have a fixed width, so
//! patching them never moves any other byte of the document.

use crate::error::{Error, Result};
use crate::object::Object;
use crate::signatures::types::{ByteRange, DigestAlgorithm, SignaturePlaceholder};

/// Width of the `[...]` ByteRange text, brackets included.
pub const BYTE_RANGE_WIDTH: usize = 64;

/// Initial ByteRange text, patched once the document length is known.
pub fn byte_range_placeholder() -> String {
    pad_byte_range("[0 0 0 0".to_string())
}

/// Format `range` at exactly [`BYTE_RANGE_WIDTH`] bytes, space padded.
pub fn format_byte_range(range: &ByteRange) -> Result<String> {
    let text = format!("[{} {} {} {}", range.start1, range.len1, range.start2, range.len2);
    if text.len() + 1 > BYTE_RANGE_WIDTH {
        return Err(Error::UnsupportedPdfStructure(format!(
            "ByteRange {} does not fit in {} bytes",
            range, BYTE_RANGE_WIDTH
        )));
    }
    Ok(pad_byte_range(text))
}

fn pad_byte_range(mut text: String) -> String {
    while text.len() + 1 < BYTE_RANGE_WIDTH {
        text.push(' ');
    }
    text.push(']');
    text
}

/// Overwrite the reserved ByteRange text in place.
pub fn patch_byte_range(prepared: &mut [u8], placeholder: &SignaturePlaceholder) -> Result<ByteRange> {
    let range = ByteRange::for_placeholder(placeholder, prepared.len());
    let text = format_byte_range(&range)?;
    let start = placeholder.byte_range_offset;
    let slot = prepared
        .get_mut(start..start + BYTE_RANGE_WIDTH)
        .filter(|slot| slot.first() == Some(&b'[') && slot.last() == Some(&b']'))
        .ok_or_else(|| {
            Error::MalformedSignatureDictionary(format!("no ByteRange placeholder at offset {}", start))
        })?;
    slot.copy_from_slice(text.as_bytes());
    Ok(range)
}

/// Digest of the bytes outside the placeholder.
pub fn digest(prepared: &[u8], placeholder: &SignaturePlaceholder, algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
    let range = ByteRange::for_placeholder(placeholder, prepared.len());
    check_bounds(&range, prepared.len())?;
    let (first, second) = spans(prepared, &range);
    log::debug!("Hashing {} + {} bytes with {}", range.len1, range.len2, algorithm);
    Ok(algorithm.digest_parts(&[first, second]))
}

/// Concatenation of the two signed spans.
pub fn signed_bytes(pdf: &[u8], range: &ByteRange) -> Result<Vec<u8>> {
    check_bounds(range, pdf.len())?;
    let (first, second) = spans(pdf, range);
    let mut out = Vec::with_capacity(first.len() + second.len());
    out.extend_from_slice(first);
    out.extend_from_slice(second);
    Ok(out)
}

fn spans<'a>(pdf: &'a [u8], range: &ByteRange) -> (&'a [u8], &'a [u8]) {
    (
        &pdf[range.start1..range.start1 + range.len1],
        &pdf[range.start2..range.start2 + range.len2],
    )
}

fn check_bounds(range: &ByteRange, file_len: usize) -> Result<()> {
    let first_end = range.start1.checked_add(range.len1);
    let second_end = range.start2.checked_add(range.len2);
    match (first_end, second_end) {
        (Some(a), Some(b)) if a <= file_len && b <= file_len && a <= range.start2 => Ok(()),
        _ => Err(Error::MalformedSignatureDictionary(format!(
            "ByteRange {} is outside the {} byte document",
            range, file_len
        ))),
    }
}

/// Read a `/ByteRange` array.
pub fn parse_byte_range(obj: &Object) -> Result<ByteRange> {
    let items = obj
        .as_array()
        .ok_or_else(|| Error::MalformedSignatureDictionary("/ByteRange is not an array".to_string()))?;
    if items.len() != 4 {
        return Err(Error::MalformedSignatureDictionary(format!(
            "/ByteRange has {} entries, expected 4",
            items.len()
        )));
    }
    let mut values = [0usize; 4];
    for (slot, item) in values.iter_mut().zip(items) {
        *slot = item
            .as_integer()
            .filter(|v| *v >= 0)
            .ok_or_else(|| {
                Error::MalformedSignatureDictionary("/ByteRange entries must be non-negative integers".to_string())
            })? as usize;
    }
    Ok(ByteRange {
        start1: values[0],
        len1: values[1],
        start2: values[2],
        len2: values[3],
    })
}

/// Check that `range` starts at 0, stays in bounds and that its gap is
/// exactly one `<hex>` token.
pub fn validate_byte_range(range: &ByteRange, pdf: &[u8]) -> Result<()> {
    if range.start1 != 0 {
        return Err(Error::MalformedSignatureDictionary(format!(
            "ByteRange must start at 0, got {}",
            range.start1
        )));
    }
    check_bounds(range, pdf.len())?;

    let gap = &pdf[range.len1..range.start2];
    let is_hex_token = gap.len() >= 2
        && gap[0] == b'<'
        && gap[gap.len() - 1] == b'>'
        && gap[1..gap.len() - 1].iter().all(|b| b.is_ascii_hexdigit());
    if !is_hex_token {
        return Err(Error::MalformedSignatureDictionary(
            "ByteRange gap is not the /Contents hex string".to_string(),
        ));
    }
    Ok(())
}

/// Write `cms` into the reserved `/Contents` token.
///
/// The CMS is hex encoded in upper case and padded with `0` to the full
/// reservation; the output has the same length as `prepared`.
pub fn embed(prepared: &[u8], placeholder: &SignaturePlaceholder, cms: &[u8]) -> Result<Vec<u8>> {
    let capacity = placeholder.hex_capacity();
    if cms.len() * 2 > capacity {
        return Err(Error::PlaceholderTooSmall {
            required: cms.len(),
            reserved: capacity / 2,
        });
    }
    let token = prepared
        .get(placeholder.gap_start..placeholder.gap_end)
        .filter(|t| t.first() == Some(&b'<') && t.last() == Some(&b'>'))
        .ok_or_else(|| {
            Error::MalformedSignatureDictionary(format!(
                "no /Contents placeholder at offset {}",
                placeholder.gap_start
            ))
        })?;
    debug_assert_eq!(token.len(), capacity + 2);

    let mut out = prepared.to_vec();
    let hex = &mut out[placeholder.gap_start + 1..placeholder.gap_end - 1];
    for (pair, byte) in hex.chunks_mut(2).zip(cms) {
        pair[0] = HEX_UPPER[(byte >> 4) as usize];
        pair[1] = HEX_UPPER[(byte & 0x0F) as usize];
    }
    hex[cms.len() * 2..].fill(b'0');

    log::debug!("Embedded {} byte CMS into {} byte reservation", cms.len(), capacity / 2);
    Ok(out)
}

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";
