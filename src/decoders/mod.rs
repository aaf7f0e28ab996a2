//! Stream decoders needed to read cross-reference and object streams.
//!
//! Signing only has to read the document structure, so the pipeline is
//! limited to FlateDecode with optional PNG predictors. Any other filter on a
//! structural stream is reported as a decode error.

use crate::error::{Error, Result};

mod flate;
mod predictor;

pub use flate::FlateDecoder;
pub use predictor::{decode_predictor, DecodeParams};

/// Upper bound on decoded structural stream size (decompression bomb guard).
const MAX_DECOMPRESSED_SIZE: usize = 64 * 1024 * 1024;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of this decoder (e.g., "FlateDecode").
    fn name(&self) -> &str;
}

/// Decode stream data through a filter pipeline, then undo any predictor.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter in filters {
        let decoder: &dyn StreamDecoder = match filter.as_str() {
            "FlateDecode" | "Fl" => &FlateDecoder,
            other => return Err(Error::Decode(format!("Unsupported filter: {}", other))),
        };
        current = decoder.decode(&current)?;
        log::debug!("{} produced {} bytes", decoder.name(), current.len());

        if current.len() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::Decode(format!(
                "decoded stream exceeds {} bytes",
                MAX_DECOMPRESSED_SIZE
            )));
        }
    }

    match params {
        Some(p) if p.predictor > 1 => decode_predictor(&current, p),
        _ => Ok(current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_no_filters_is_identity() {
        let out = decode_stream_with_params(b"abc", &[], None).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_flate_pipeline() {
        let compressed = zlib(b"hello xref");
        let out = decode_stream_with_params(&compressed, &["FlateDecode".to_string()], None).unwrap();
        assert_eq!(out, b"hello xref");
    }

    #[test]
    fn test_flate_with_png_up_predictor() {
        // Two rows of 3 bytes, each prefixed with PNG tag 2 (Up)
        let encoded = [2u8, 1, 2, 3, 2, 1, 1, 1];
        let params = DecodeParams {
            predictor: 12,
            columns: 3,
            colors: 1,
            bits_per_component: 8,
        };
        let compressed = zlib(&encoded);
        let out =
            decode_stream_with_params(&compressed, &["FlateDecode".to_string()], Some(&params))
                .unwrap();
        assert_eq!(out, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_unsupported_filter() {
        let err = decode_stream_with_params(b"x", &["DCTDecode".to_string()], None).unwrap_err();
        assert!(err.to_string().contains("DCTDecode"));
    }
}
