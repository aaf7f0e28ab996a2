// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::should_implement_trait)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # PDF Seal
//!
//! Incremental PDF signing with PKCS#12 certificates.
//!
//! ## Core Features
//!
//! - **PKCS#12 Extraction**: MAC check, PBES2 (AES) and legacy 3DES containers,
//!   RSA and ECDSA P-256 keys, certificate chains
//! - **Incremental Update**: the original bytes are never rewritten; a new
//!   revision adds the `/Sig` dictionary, a signature field and a cross-reference
//!   section of the same kind as the previous one (table or stream)
//! - **Detached CMS**: `SignedData` with contentType, signingTime and
//!   messageDigest signed attributes, leaf-first certificate set
//! - **Verification**: byte-range validation, digest and signature checks,
//!   every signature of a multiply-signed document
//!
//! Trust-chain validation, revocation and timestamping are out of scope.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdf_seal::signatures::SignOptions;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pdf = std::fs::read("contract.pdf")?;
//! let p12 = std::fs::read("signer.p12")?;
//!
//! let options = SignOptions::default().with_reason("Approval").with_location("BR");
//! let signed = pdf_seal::sign(&pdf, &p12, "password", &options)?;
//!
//! let result = pdf_seal::verify(&signed)?;
//! assert!(result.is_valid);
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Stream decoders
pub mod decoders;

// PDF writing
pub mod writer;

// Certificates and keys
pub mod crypto;

// Signing and verification
pub mod signatures;

// Configuration
pub mod config;

// Certificate containers by name
pub mod store;

pub use config::SignerConfig;
pub use document::PdfFile;
pub use error::{Error, Result};
pub use signatures::{PdfSigner, SignOptions, SignatureVerifier, VerificationResult};
pub use store::{CertificateStore, DirectoryStore, MemoryStore};

/// Sign `pdf` with the key and certificates in a PKCS#12 container.
///
/// Returns the signed document; its first `pdf.len()` bytes equal `pdf`.
pub fn sign(pdf: &[u8], p12: &[u8], passphrase: &str, options: &SignOptions) -> Result<Vec<u8>> {
    PdfSigner::from_pkcs12(p12, passphrase, options.clone())?.sign(pdf)
}

/// Verify the most recent signature in `pdf`.
pub fn verify(pdf: &[u8]) -> Result<VerificationResult> {
    SignatureVerifier::new().verify(pdf)
}

/// Verify every signature in `pdf`, oldest first.
pub fn verify_all(pdf: &[u8]) -> Result<Vec<VerificationResult>> {
    SignatureVerifier::new().verify_all(pdf)
}

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "pdf_seal");
    }

    #[test]
    fn test_verify_rejects_non_pdf() {
        assert!(verify(b"not a pdf").is_err());
    }
}
