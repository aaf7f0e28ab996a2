//! PDF signing implementation.
//!
//! [`PdfSigner`] runs the whole pipeline over an in-memory document:
//! reserve a placeholder in a new revision, digest the byte ranges around it,
//! build the CMS and write it into the reservation.

use super::byterange;
use super::cms;
use super::placeholder::insert_placeholder;
use super::types::SignOptions;
use crate::crypto::pkcs12::{self, CertificateBundle};
use crate::error::{Error, Result};
use crate::store::CertificateStore;
use chrono::Utc;

/// Signs PDF documents with one certificate bundle.
#[derive(Debug)]
pub struct PdfSigner {
    bundle: CertificateBundle,
    options: SignOptions,
}

impl PdfSigner {
    /// Create a signer from an extracted bundle.
    pub fn new(bundle: CertificateBundle, options: SignOptions) -> Self {
        Self { bundle, options }
    }

    /// Extract a PKCS#12 container and create a signer from it.
    pub fn from_pkcs12(p12: &[u8], passphrase: &str, options: SignOptions) -> Result<Self> {
        Ok(Self::new(pkcs12::extract(p12, passphrase)?, options))
    }

    /// Load `name` from `store`, then sign `pdf` with it.
    pub fn sign_with_store(
        pdf: &[u8],
        store: &dyn CertificateStore,
        name: &str,
        passphrase: &str,
        options: SignOptions,
    ) -> Result<Vec<u8>> {
        let container = store.load(name)?;
        log::debug!("Loaded certificate {:?} from store ({} bytes)", name, container.len());
        Self::from_pkcs12(&container, passphrase, options)?.sign(pdf)
    }

    /// Get the signing options.
    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Get the certificate bundle.
    pub fn bundle(&self) -> &CertificateBundle {
        &self.bundle
    }

    /// Smallest `/Contents` reservation accepted for this bundle, in bytes.
    pub fn minimum_reserved_length(&self) -> usize {
        cms::estimated_size(&self.bundle)
    }

    /// Sign `pdf` and return the signed document.
    ///
    /// The input is never modified; the result starts with the same bytes.
    pub fn sign(&self, pdf: &[u8]) -> Result<Vec<u8>> {
        let required = self.minimum_reserved_length();
        if self.options.reserved_length < required {
            return Err(Error::PlaceholderTooSmall {
                required,
                reserved: self.options.reserved_length,
            });
        }

        let leaf = self.bundle.leaf();
        let now = Utc::now();
        if !leaf.is_within_validity(now) {
            let (not_before, not_after) = leaf.validity_window();
            log::warn!(
                "Signing with a certificate outside its validity window ({} to {})",
                not_before,
                not_after
            );
        }

        // /M and signingTime carry the same instant
        let mut options = self.options.clone();
        options.signing_time = Some(options.signing_time.unwrap_or(now));

        let (prepared, placeholder) = insert_placeholder(pdf, &options)?;
        let digest = byterange::digest(&prepared, &placeholder, options.digest_algorithm)?;
        let signature = cms::sign(&digest, &self.bundle, &options)?;
        let signed = byterange::embed(&prepared, &placeholder, &signature)?;

        log::info!(
            "Signed document as {:?}: {} CMS bytes in a {} byte reservation, {} -> {} bytes",
            leaf.common_name().unwrap_or("unknown signer"),
            signature.len(),
            placeholder.reserved_length,
            pdf.len(),
            signed.len()
        );
        Ok(signed)
    }
}
