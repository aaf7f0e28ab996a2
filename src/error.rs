//! Error types for the signing library.
//!
//! One enum covers the whole pipeline: PDF structure parsing, PKCS#12
//! extraction, CMS construction and signature verification.

/// Result type alias for signing library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while signing or verifying a PDF.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// The PKCS#12 passphrase did not match the container MAC or could not decrypt it
    #[error("Invalid passphrase for certificate container")]
    InvalidPassphrase,

    /// The PKCS#12 container could not be parsed
    #[error("Malformed certificate container: {0}")]
    MalformedContainer(String),

    /// The container parsed but lacked a private key or a matching certificate
    #[error("Missing key or certificate: {0}")]
    MissingKeyOrCertificate(String),

    /// Certificate DER could not be parsed
    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),

    /// The PDF uses a structure the incremental editor cannot extend
    #[error("Unsupported PDF structure: {0}")]
    UnsupportedPdfStructure(String),

    /// The reserved /Contents space cannot hold the signature
    #[error("Signature placeholder too small: {required} bytes required, {reserved} reserved")]
    PlaceholderTooSmall {
        /// Bytes of CMS that had to fit
        required: usize,
        /// Bytes of CMS the placeholder reserves
        reserved: usize,
    },

    /// The private key type has no signer implementation
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedKeyAlgorithm(String),

    /// The underlying cryptographic operation failed
    #[error("Signing failed: {0}")]
    SigningFailure(String),

    /// The document has no interpretable signature dictionary
    #[error("Malformed signature dictionary: {0}")]
    MalformedSignatureDictionary(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Certificate store has no entry with the requested name
    #[error("Certificate not found in store: {0}")]
    CertificateNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),
}
