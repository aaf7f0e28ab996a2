//! Object stream parsing (PDF 1.5+).
//!
//! An object stream (`/Type /ObjStm`) holds `/N` compressed objects. The
//! decoded data starts with N pairs `objnum offset`, and the object bodies
//! begin at byte `/First`, offsets being relative to it.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream and extract every object it contains.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };

    if let Some(type_name) = dict.get("Type").and_then(|o| o.as_name()) {
        if type_name != "ObjStm" {
            return Err(Error::Decode(format!("expected /Type /ObjStm, got /{}", type_name)));
        }
    }

    let n = dict
        .get("N")
        .and_then(|o| o.as_integer())
        .filter(|n| (0..=1_000_000).contains(n))
        .ok_or_else(|| Error::Decode("object stream has no valid /N".to_string()))? as usize;
    let first = dict
        .get("First")
        .and_then(|o| o.as_integer())
        .filter(|f| *f >= 0)
        .ok_or_else(|| Error::Decode("object stream has no valid /First".to_string()))? as usize;

    let decoded = stream_obj.decode_stream_data()?;
    if decoded.len() < first {
        return Err(Error::Decode(format!(
            "object stream data too short: {} bytes, /First is {}",
            decoded.len(),
            first
        )));
    }

    let pairs = parse_object_number_pairs(&decoded[..first], n)?;
    let body = &decoded[first..];
    let mut result = HashMap::with_capacity(pairs.len());

    for (idx, &(obj_num, offset)) in pairs.iter().enumerate() {
        let end = pairs
            .get(idx + 1)
            .map(|(_, next)| *next)
            .filter(|next| *next > offset && *next <= body.len())
            .unwrap_or(body.len());
        if offset >= end {
            log::warn!("Object {} offset {} outside object stream", obj_num, offset);
            continue;
        }

        match parse_object(&body[offset..end]) {
            Ok((_, obj)) => {
                result.insert(obj_num, obj);
            },
            Err(e) => log::warn!("Failed to parse object {} in object stream: {:?}", obj_num, e),
        }
    }

    Ok(result)
}

/// Parse the `objnum offset` header of an object stream.
fn parse_object_number_pairs(data: &[u8], count: usize) -> Result<Vec<(u32, usize)>> {
    let mut pairs = Vec::with_capacity(count);
    let mut remaining = data;

    for i in 0..count {
        let mut pair = [0i64; 2];
        for slot in pair.iter_mut() {
            match token(remaining) {
                Ok((rest, Token::Integer(v))) if v >= 0 => {
                    *slot = v;
                    remaining = rest;
                },
                _ => {
                    return Err(Error::ParseError {
                        offset: data.len() - remaining.len(),
                        reason: format!("bad object stream header pair {}", i),
                    })
                },
            }
        }
        pairs.push((pair[0] as u32, pair[1] as usize));
    }

    Ok(pairs)
}
