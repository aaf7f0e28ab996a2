//! Configuration for PDF signing.

use crate::document::DEFAULT_MAX_XREF_DEPTH;
use crate::signatures::{
    DigestAlgorithm, SignOptions, SignatureVerifier, DEFAULT_FIELD_NAME, DEFAULT_LOCATION, DEFAULT_REASON, DEFAULT_RESERVED_LENGTH,
};
use std::path::PathBuf;

/// Environment variable naming the default PKCS#12 container.
pub const ENV_CERTIFICATE_PATH: &str = "CERTIFICATE_PATH";
/// Environment variable holding the container passphrase.
pub const ENV_CERTIFICATE_PASSWORD: &str = "CERTIFICATE_PASSWORD";
/// Environment variable overriding the default `/Reason`.
pub const ENV_SIGNATURE_REASON: &str = "SIGNATURE_REASON";
/// Environment variable overriding the default `/Location`.
pub const ENV_SIGNATURE_LOCATION: &str = "SIGNATURE_LOCATION";

/// Signing configuration.
#[derive(Clone)]
pub struct SignerConfig {
    /// Default PKCS#12 container.
    pub certificate_path: Option<PathBuf>,

    /// Passphrase for `certificate_path`.
    pub certificate_password: Option<String>,

    /// Default `/Reason`.
    pub reason: String,

    /// Default `/Location`.
    pub location: String,

    /// Default `/ContactInfo`.
    pub contact_info: Option<String>,

    /// CMS bytes reserved in `/Contents`.
    pub reserved_length: usize,

    /// Digest algorithm.
    pub digest_algorithm: DigestAlgorithm,

    /// Signature field name.
    pub field_name: String,

    /// Bound on the `/Prev` chain when reading documents.
    pub max_xref_depth: u32,
}

impl std::fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerConfig")
            .field("certificate_path", &self.certificate_path)
            .field("certificate_password", &self.certificate_password.as_ref().map(|_| "[REDACTED]"))
            .field("reason", &self.reason)
            .field("location", &self.location)
            .field("contact_info", &self.contact_info)
            .field("reserved_length", &self.reserved_length)
            .field("digest_algorithm", &self.digest_algorithm)
            .field("field_name", &self.field_name)
            .field("max_xref_depth", &self.max_xref_depth)
            .finish()
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SignerConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            certificate_path: None,
            certificate_password: None,
            reason: DEFAULT_REASON.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            contact_info: None,
            reserved_length: DEFAULT_RESERVED_LENGTH,
            digest_algorithm: DigestAlgorithm::Sha256,
            field_name: DEFAULT_FIELD_NAME.to_string(),
            max_xref_depth: DEFAULT_MAX_XREF_DEPTH,
        }
    }

    /// Defaults overridden by `CERTIFICATE_PATH`, `CERTIFICATE_PASSWORD`,
    /// `SIGNATURE_REASON` and `SIGNATURE_LOCATION`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut config = Self::new();
        if let Some(path) = non_empty(ENV_CERTIFICATE_PATH) {
            config.certificate_path = Some(PathBuf::from(path));
        }
        // An empty passphrase is legitimate
        config.certificate_password = lookup(ENV_CERTIFICATE_PASSWORD);
        if let Some(reason) = non_empty(ENV_SIGNATURE_REASON) {
            config.reason = reason;
        }
        if let Some(location) = non_empty(ENV_SIGNATURE_LOCATION) {
            config.location = location;
        }
        config
    }

    /// Set the default container.
    pub fn with_certificate_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificate_path = Some(path.into());
        self
    }

    /// Set the container passphrase.
    pub fn with_certificate_password(mut self, password: impl Into<String>) -> Self {
        self.certificate_password = Some(password.into());
        self
    }

    /// Set the default reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the default location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set the default contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
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

    /// Set the `/Prev` chain bound.
    pub fn with_max_xref_depth(mut self, depth: u32) -> Self {
        self.max_xref_depth = depth;
        self
    }

    /// Signing options carrying these defaults.
    pub fn sign_options(&self) -> SignOptions {
        let mut options = SignOptions::default()
            .with_reason(self.reason.clone())
            .with_location(self.location.clone())
            .with_reserved_length(self.reserved_length)
            .with_digest_algorithm(self.digest_algorithm)
            .with_field_name(self.field_name.clone())
            .with_max_xref_depth(self.max_xref_depth);
        options.contact_info = self.contact_info.clone();
        options
    }

    /// Verifier reading documents with the same limits.
    pub fn verifier(&self) -> SignatureVerifier {
        SignatureVerifier::new().with_max_xref_depth(self.max_xref_depth)
    }
}
