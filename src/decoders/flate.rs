//! FlateDecode (zlib/deflate) implementation using the flate2 crate.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter implementation.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => Ok(output),
            Err(e) if !output.is_empty() => {
                log::warn!(
                    "FlateDecode partial recovery: extracted {} bytes before corruption: {}",
                    output.len(),
                    e
                );
                Ok(output)
            },
            Err(e) => {
                // Some writers omit the zlib wrapper
                log::info!("Zlib decode failed ({}), trying raw deflate", e);
                output.clear();
                DeflateDecoder::new(input)
                    .read_to_end(&mut output)
                    .map_err(|err| Error::Decode(format!("FlateDecode failed: {}", err)))?;
                Ok(output)
            },
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_zlib_stream() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"1 0 obj").unwrap();
        let data = enc.finish().unwrap();
        assert_eq!(FlateDecoder.decode(&data).unwrap(), b"1 0 obj");
    }

    #[test]
    fn test_raw_deflate_fallback() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"raw deflate body").unwrap();
        let data = enc.finish().unwrap();
        assert_eq!(FlateDecoder.decode(&data).unwrap(), b"raw deflate body");
    }

    #[test]
    fn test_garbage_fails() {
        assert!(FlateDecoder.decode(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }
}
