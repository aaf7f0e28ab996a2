//! Digital signature types and data structures.

use crate::document::DEFAULT_MAX_XREF_DEPTH;
use chrono::{DateTime, Utc};
use der::asn1::ObjectIdentifier;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Default `/Reason` entry.
pub const DEFAULT_REASON: &str = "Assinatura Digital ICP-Brasil";
/// Default `/Location` entry.
pub const DEFAULT_LOCATION: &str = "Brasil";
/// Default signature field name.
pub const DEFAULT_FIELD_NAME: &str = "Signature1";
/// Default CMS reservation in bytes.
pub const DEFAULT_RESERVED_LENGTH: usize = 8192;

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DigestAlgorithm {
    /// SHA-1 (accepted when verifying legacy signatures)
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// OID used in CMS `digestAlgorithm` fields.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => ObjectIdentifier::new_unwrap("1.3.14.3.2.26"),
            DigestAlgorithm::Sha256 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1"),
            DigestAlgorithm::Sha384 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2"),
            DigestAlgorithm::Sha512 => ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3"),
        }
    }

    /// Map a CMS digest OID back to an algorithm.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Parse a name such as `sha256` or `SHA-384`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Some(DigestAlgorithm::Sha1),
            "sha256" => Some(DigestAlgorithm::Sha256),
            "sha384" => Some(DigestAlgorithm::Sha384),
            "sha512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Digest size in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Hash one buffer.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.digest_parts(&[data])
    }

    /// Hash the concatenation of `parts` without copying them.
    pub fn digest_parts(&self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }
        match self {
            DigestAlgorithm::Sha1 => run::<Sha1>(parts),
            DigestAlgorithm::Sha256 => run::<Sha256>(parts),
            DigestAlgorithm::Sha384 => run::<Sha384>(parts),
            DigestAlgorithm::Sha512 => run::<Sha512>(parts),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// ETSI.CAdES.detached - same container, PAdES profile
    CadesDetached,
    /// adbe.pkcs7.sha1 - signs a SHA-1 digest as encapsulated content.
    ///
    /// Only recognised when verifying, where it is reported as not detached.
    /// The signer always writes [`Pkcs7Detached`](Self::Pkcs7Detached).
    Pkcs7Sha1,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "adbe.pkcs7.sha1" => Some(SignatureSubFilter::Pkcs7Sha1),
            _ => None,
        }
    }

    /// Whether the CMS signs the byte ranges directly.
    pub fn is_detached(&self) -> bool {
        matches!(self, SignatureSubFilter::Pkcs7Detached | SignatureSubFilter::CadesDetached)
    }
}

/// Options for signing a PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOptions {
    /// Reason for signing
    pub reason: String,
    /// Location where the document was signed
    pub location: String,
    /// Contact information
    pub contact_info: Option<String>,
    /// Name of the signer (if different from certificate CN)
    pub name: Option<String>,
    /// CMS bytes reserved in `/Contents`
    pub reserved_length: usize,
    /// Digest algorithm to use
    pub digest_algorithm: DigestAlgorithm,
    /// Partial name (`/T`) of the signature field
    pub field_name: String,
    /// Signing time; the current time when unset
    pub signing_time: Option<DateTime<Utc>>,
    /// Bound on the `/Prev` chain read from the input document
    pub max_xref_depth: u32,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            reason: DEFAULT_REASON.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            contact_info: None,
            name: None,
            reserved_length: DEFAULT_RESERVED_LENGTH,
            digest_algorithm: DigestAlgorithm::Sha256,
            field_name: DEFAULT_FIELD_NAME.to_string(),
            signing_time: None,
            max_xref_depth: DEFAULT_MAX_XREF_DEPTH,
        }
    }
}

impl SignOptions {
    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Set the `/Name` entry.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the CMS reservation in bytes.
    pub fn with_reserved_length(mut self, bytes: usize) -> Self {
        self.reserved_length = bytes;
        self
    }

    /// Set the digest algorithm.
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Set the signature field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Pin the signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Bound the cross-reference sections followed in the input document.
    pub fn with_max_xref_depth(mut self, depth: u32) -> Self {
        self.max_xref_depth = depth;
        self
    }
}

/// Location of the reserved `/Contents` token in a prepared document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignaturePlaceholder {
    /// Offset of `<`
    pub gap_start: usize,
    /// Offset just past `>`
    pub gap_end: usize,
    /// CMS bytes the token can hold
    pub reserved_length: usize,
    /// Offset of the `[` opening the `/ByteRange` array
    pub byte_range_offset: usize,
}

impl SignaturePlaceholder {
    /// Hex characters between the delimiters, zero for a degenerate gap.
    pub fn hex_capacity(&self) -> usize {
        self.gap_end.saturating_sub(self.gap_start).saturating_sub(2)
    }
}

/// The two signed spans: `[start1, len1, start2, len2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    /// Start of the first span (always 0 for a valid signature)
    pub start1: usize,
    /// Length of the first span
    pub len1: usize,
    /// Start of the second span
    pub start2: usize,
    /// Length of the second span
    pub len2: usize,
}

impl ByteRange {
    /// Byte range excluding `placeholder` from a document of `total_len` bytes.
    pub fn for_placeholder(placeholder: &SignaturePlaceholder, total_len: usize) -> Self {
        Self {
            start1: 0,
            len1: placeholder.gap_start,
            start2: placeholder.gap_end,
            len2: total_len.saturating_sub(placeholder.gap_end),
        }
    }

    /// As the four-integer PDF array.
    pub fn as_array(&self) -> [usize; 4] {
        [self.start1, self.len1, self.start2, self.len2]
    }

    /// End offset of the second span.
    pub fn end(&self) -> usize {
        self.start2 + self.len2
    }

    /// Whether the spans reach the end of a `total_len` byte document.
    pub fn covers_whole_document(&self, total_len: usize) -> bool {
        self.start1 == 0 && self.end() == total_len
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {} {} {}]", self.start1, self.len1, self.start2, self.len2)
    }
}

/// Signer identity taken from the embedded certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignerInfo {
    /// Subject CN
    pub common_name: Option<String>,
    /// Subject DN, ordered
    pub subject: indexmap::IndexMap<String, String>,
    /// Issuer DN, ordered
    pub issuer: indexmap::IndexMap<String, String>,
    /// Serial number in upper-case hex
    pub serial_hex: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
}

/// Result of signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// Digest and signature both check out
    pub is_valid: bool,
    /// Signer certificate details, when the certificate was found
    pub signer: Option<SignerInfo>,
    /// signingTime attribute, or `/M` when absent
    pub signed_at: Option<DateTime<Utc>>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// Signed spans
    pub byte_range: ByteRange,
    /// messageDigest equals the recomputed digest
    pub digest_matches: bool,
    /// The signature over the signed attributes verifies
    pub signature_matches: bool,
    /// Nothing was appended after the signed revision
    pub covers_whole_document: bool,
    /// Reasons the signature did not verify
    pub problems: Vec<String>,
}
