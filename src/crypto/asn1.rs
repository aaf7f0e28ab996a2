//! Minimal ASN.1 support for CMS.
//!
//! The writer half produces DER: definite minimal lengths, `SET OF` members
//! sorted by their encodings. The reader half accepts BER as found in the wild
//! (indefinite lengths, constructed OCTET STRINGs) and can transcode an element
//! back to DER when its exact encoding is needed for a signature check.

use crate::error::{Error, Result};
use der::asn1::ObjectIdentifier;

/// Universal and context tags used by the signature code.
pub mod tag {
    /// INTEGER
    pub const INTEGER: u8 = 0x02;
    /// BIT STRING
    pub const BIT_STRING: u8 = 0x03;
    /// OCTET STRING
    pub const OCTET_STRING: u8 = 0x04;
    /// Constructed OCTET STRING (BER only)
    pub const OCTET_STRING_CONSTRUCTED: u8 = 0x24;
    /// NULL
    pub const NULL: u8 = 0x05;
    /// OBJECT IDENTIFIER
    pub const OID: u8 = 0x06;
    /// UTCTime
    pub const UTC_TIME: u8 = 0x17;
    /// GeneralizedTime
    pub const GENERALIZED_TIME: u8 = 0x18;
    /// SEQUENCE / SEQUENCE OF
    pub const SEQUENCE: u8 = 0x30;
    /// SET / SET OF
    pub const SET: u8 = 0x31;
    /// `[0]` constructed
    pub const CONTEXT_0: u8 = 0xA0;
    /// `[0]` primitive
    pub const CONTEXT_0_PRIMITIVE: u8 = 0x80;
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Encode a DER definite length.
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    let mut out = Vec::with_capacity(significant.len() + 1);
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
    out
}

/// Build a tag-length-value triple.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// SEQUENCE of already-encoded items, in order.
pub fn sequence(items: &[&[u8]]) -> Vec<u8> {
    tlv(tag::SEQUENCE, &items.concat())
}

/// DER `SET OF`: members sorted by their encodings.
pub fn set_of(mut items: Vec<Vec<u8>>) -> Vec<u8> {
    items.sort();
    tlv(tag::SET, &items.concat())
}

/// OBJECT IDENTIFIER.
pub fn oid(oid: &ObjectIdentifier) -> Vec<u8> {
    tlv(tag::OID, oid.as_bytes())
}

/// INTEGER from unsigned big-endian magnitude bytes.
pub fn unsigned_integer(magnitude: &[u8]) -> Vec<u8> {
    let skip = magnitude
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(magnitude.len().saturating_sub(1));
    let trimmed = &magnitude[skip..];
    if trimmed.is_empty() {
        return tlv(tag::INTEGER, &[0]);
    }
    if trimmed[0] & 0x80 != 0 {
        let mut padded = Vec::with_capacity(trimmed.len() + 1);
        padded.push(0);
        padded.extend_from_slice(trimmed);
        tlv(tag::INTEGER, &padded)
    } else {
        tlv(tag::INTEGER, trimmed)
    }
}

/// INTEGER for a small non-negative value (versions).
pub fn small_integer(value: u32) -> Vec<u8> {
    unsigned_integer(&value.to_be_bytes())
}

/// OCTET STRING.
pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(tag::OCTET_STRING, content)
}

/// NULL.
pub fn null() -> Vec<u8> {
    vec![tag::NULL, 0x00]
}

/// Constructed context-specific tag `[n]`.
pub fn context(number: u8, content: &[u8]) -> Vec<u8> {
    tlv(tag::CONTEXT_0 | (number & 0x1F), content)
}

/// AlgorithmIdentifier with optional NULL parameters.
pub fn algorithm_identifier(algorithm: &ObjectIdentifier, null_params: bool) -> Vec<u8> {
    if null_params {
        sequence(&[&oid(algorithm), &null()])
    } else {
        sequence(&[&oid(algorithm)])
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// One decoded element borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    /// Identifier octet (high tag numbers are not supported)
    pub tag: u8,
    /// Content octets (without the end-of-contents marker)
    pub content: &'a [u8],
    /// Full encoding, header through end-of-contents
    pub raw: &'a [u8],
    /// Whether the length was indefinite
    pub indefinite: bool,
}

/// Deepest constructed nesting the reader and transcoder follow.
pub const MAX_DEPTH: usize = 64;

fn malformed(reason: &str) -> Error {
    Error::Decode(format!("ASN.1: {}", reason))
}

fn too_deep() -> Error {
    malformed(&format!("nesting exceeds {} levels", MAX_DEPTH))
}

/// Read one element from the front of `input`, returning it and the rest.
pub fn read_element(input: &[u8]) -> Result<(Element<'_>, &[u8])> {
    read_nested(input, 0)
}

fn read_nested(input: &[u8], depth: usize) -> Result<(Element<'_>, &[u8])> {
    if input.len() < 2 {
        return Err(malformed("unexpected end of input"));
    }
    let tag = input[0];
    if tag & 0x1F == 0x1F {
        return Err(malformed("high tag numbers are not supported"));
    }

    let first = input[1];
    let mut pos = 2;

    if first == 0x80 {
        if tag & 0x20 == 0 {
            return Err(malformed("indefinite length on primitive type"));
        }
        if depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        let start = pos;
        let mut rest = &input[pos..];
        loop {
            if rest.len() < 2 {
                return Err(malformed("unterminated indefinite-length encoding"));
            }
            if rest[0] == 0 && rest[1] == 0 {
                break;
            }
            let (_, next) = read_nested(rest, depth + 1)?;
            rest = next;
        }
        let end = input.len() - rest.len();
        let element = Element {
            tag,
            content: &input[start..end],
            raw: &input[..end + 2],
            indefinite: true,
        };
        return Ok((element, &input[end + 2..]));
    }

    let len = if first < 0x80 {
        first as usize
    } else {
        let count = (first & 0x7F) as usize;
        if count == 0 || count > std::mem::size_of::<usize>() || pos + count > input.len() {
            return Err(malformed("invalid length"));
        }
        let mut len = 0usize;
        for b in &input[pos..pos + count] {
            len = (len << 8) | *b as usize;
        }
        pos += count;
        len
    };

    let end = pos
        .checked_add(len)
        .filter(|end| *end <= input.len())
        .ok_or_else(|| malformed("content length exceeds input"))?;

    let element = Element {
        tag,
        content: &input[pos..end],
        raw: &input[..end],
        indefinite: false,
    };
    Ok((element, &input[end..]))
}

/// Read exactly one element; trailing bytes other than zero padding are an error.
pub fn read_single(input: &[u8]) -> Result<Element<'_>> {
    let (element, rest) = read_element(input)?;
    if rest.iter().any(|b| *b != 0) {
        return Err(malformed("trailing data after element"));
    }
    Ok(element)
}

impl<'a> Element<'a> {
    /// Require a specific tag.
    pub fn expect(self, expected: u8) -> Result<Self> {
        if self.tag == expected {
            Ok(self)
        } else {
            Err(malformed(&format!(
                "expected tag 0x{:02X}, found 0x{:02X}",
                expected, self.tag
            )))
        }
    }

    /// Decode the children of a constructed element.
    pub fn children(&self) -> Result<Vec<Element<'a>>> {
        if self.tag & 0x20 == 0 {
            return Err(malformed("primitive element has no children"));
        }
        let mut out = Vec::new();
        let mut rest = self.content;
        while !rest.is_empty() {
            let (child, next) = read_element(rest)?;
            out.push(child);
            rest = next;
        }
        Ok(out)
    }

    /// Interpret as OBJECT IDENTIFIER.
    pub fn oid(&self) -> Result<ObjectIdentifier> {
        if self.tag != tag::OID {
            return Err(malformed("expected OBJECT IDENTIFIER"));
        }
        ObjectIdentifier::from_bytes(self.content).map_err(|e| malformed(&e.to_string()))
    }

    /// Bytes of an OCTET STRING, joining BER constructed fragments.
    pub fn octets(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.content.len());
        self.collect_octets(&mut out, 0)?;
        Ok(out)
    }

    fn collect_octets(&self, out: &mut Vec<u8>, depth: usize) -> Result<()> {
        match self.tag {
            tag::OCTET_STRING | tag::CONTEXT_0_PRIMITIVE => out.extend_from_slice(self.content),
            tag::OCTET_STRING_CONSTRUCTED | tag::CONTEXT_0 => {
                if depth >= MAX_DEPTH {
                    return Err(too_deep());
                }
                for child in self.children()? {
                    child.collect_octets(out, depth + 1)?;
                }
            },
            other => return Err(malformed(&format!("expected OCTET STRING, found 0x{:02X}", other))),
        }
        Ok(())
    }

    /// Re-encode with definite lengths.
    ///
    /// Subtrees that are already definite-length are copied verbatim.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.der_at(0)
    }

    fn der_at(&self, depth: usize) -> Result<Vec<u8>> {
        if self.tag & 0x20 == 0 {
            return Ok(self.raw.to_vec());
        }
        if depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        let mut content = Vec::with_capacity(self.content.len());
        for child in self.children()? {
            content.extend(child.der_at(depth + 1)?);
        }
        if !self.indefinite && content == self.content {
            return Ok(self.raw.to_vec());
        }
        Ok(tlv(self.tag, &content))
    }

    /// Same content under a different tag, DER encoded.
    pub fn retagged(&self, new_tag: u8) -> Result<Vec<u8>> {
        let mut der = self.to_der()?;
        if let Some(first) = der.first_mut() {
            *first = new_tag;
        }
        Ok(der)
    }
}
