//! PDF Digital Signatures module.
//!
//! Signing appends an incremental revision to the document and fills a
//! reserved `/Contents` hex string with a detached CMS `SignedData`.
//! Verification reads that structure back from the finished bytes.
//!
//! ## Pipeline
//!
//! 1. [`insert_placeholder`]: append `/Sig`, widget, page, catalog, xref, trailer
//! 2. [`byterange::digest`]: hash the bytes on both sides of `/Contents`
//! 3. [`self::cms::sign`]: build `SignedData` over the digest
//! 4. [`byterange::embed`]: write the hex CMS into the reservation
//!
//! [`PdfSigner`] runs the four steps; [`SignatureVerifier`] checks the result.
//!
//! ## Example
//!
//! ```ignore
//! use pdf_seal::signatures::{PdfSigner, SignOptions, SignatureVerifier};
//!
//! let signer = PdfSigner::from_pkcs12(&p12, "password", SignOptions::default())?;
//! let signed = signer.sign(&pdf)?;
//! assert!(SignatureVerifier::new().verify(&signed)?.is_valid);
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - RFC 5652 - Cryptographic Message Syntax

pub mod byterange;
pub mod cms;
mod placeholder;
mod signer;
mod types;
mod verifier;

pub use placeholder::{format_pdf_date, insert_placeholder, parse_pdf_date};
pub use signer::PdfSigner;
pub use types::{
    ByteRange, DigestAlgorithm, SignOptions, SignaturePlaceholder, SignatureSubFilter, SignerInfo,
    VerificationResult, DEFAULT_FIELD_NAME, DEFAULT_LOCATION, DEFAULT_REASON, DEFAULT_RESERVED_LENGTH,
};
pub use verifier::SignatureVerifier;
