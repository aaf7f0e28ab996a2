//! PDF signature verification.
//!
//! An independent read path over a finished document. Signature dictionaries
//! are found through the AcroForm field tree, or by scanning the raw bytes for
//! `/Type /Sig` objects when the cross-reference data cannot be read. Each one
//! is checked for:
//!
//! 1. a `/ByteRange` whose gap is exactly the `/Contents` hex token;
//! 2. a `messageDigest` attribute equal to the digest of the two spans;
//! 3. a signature over the signed attributes that verifies with the
//!    certificate named by IssuerAndSerialNumber.
//!
//! Trust in the certificate itself is out of scope.

use super::byterange::{parse_byte_range, validate_byte_range};
use super::cms::{self, ParsedSignedData};
use super::placeholder::parse_pdf_date;
use super::types::{ByteRange, SignatureSubFilter, SignerInfo, VerificationResult};
use crate::crypto::keys::PublicKey;
use crate::document::{PdfFile, DEFAULT_MAX_XREF_DEPTH};
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use crate::parser::{decode_hex, parse_indirect_object};
use lazy_static::lazy_static;

lazy_static! {
    /// `/Type /Sig` with any whitespace, not followed by more name characters
    static ref RE_SIG_TYPE: regex::bytes::Regex =
        regex::bytes::Regex::new(r"/Type\s*/Sig[\s/>\]]").unwrap();

    /// "N G obj" object headers
    static ref RE_OBJ_HEADER: regex::bytes::Regex =
        regex::bytes::Regex::new(r"(\d+)\s+(\d+)\s+obj(?-u:\b)").unwrap();
}

/// Maximum depth of the AcroForm `/Kids` tree.
const MAX_FIELD_DEPTH: u32 = 32;

/// Verifier for PDF digital signatures.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    max_xref_depth: u32,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self {
            max_xref_depth: DEFAULT_MAX_XREF_DEPTH,
        }
    }
}

impl SignatureVerifier {
    /// Create a new signature verifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the `/Prev` chain followed when reading the document.
    pub fn with_max_xref_depth(mut self, depth: u32) -> Self {
        self.max_xref_depth = depth;
        self
    }

    /// Bound on the `/Prev` chain.
    pub fn max_xref_depth(&self) -> u32 {
        self.max_xref_depth
    }

    /// Verify the most recent signature in `pdf`.
    pub fn verify(&self, pdf: &[u8]) -> Result<VerificationResult> {
        let mut dictionaries = self.signature_dictionaries(pdf);
        let last = dictionaries
            .pop()
            .ok_or_else(|| Error::MalformedSignatureDictionary("document has no signature".to_string()))?;
        self.verify_dictionary(pdf, &last)
    }

    /// Verify every signature in `pdf`, oldest first.
    pub fn verify_all(&self, pdf: &[u8]) -> Result<Vec<VerificationResult>> {
        let dictionaries = self.signature_dictionaries(pdf);
        if dictionaries.is_empty() {
            return Err(Error::MalformedSignatureDictionary("document has no signature".to_string()));
        }
        dictionaries.iter().map(|sig| self.verify_dictionary(pdf, sig)).collect()
    }

    /// Verify one signature dictionary against the document bytes.
    ///
    /// A digest or signature mismatch yields `is_valid == false` with the
    /// reasons in `problems`. Structural failures are errors.
    pub fn verify_dictionary(&self, pdf: &[u8], sig: &Dictionary) -> Result<VerificationResult> {
        let byte_range = sig
            .get("ByteRange")
            .ok_or_else(|| Error::MalformedSignatureDictionary("missing /ByteRange".to_string()))
            .and_then(parse_byte_range)?;
        validate_byte_range(&byte_range, pdf)?;

        let token = &pdf[byte_range.len1 + 1..byte_range.start2 - 1];
        let contents = decode_hex(token)
            .map_err(|e| Error::MalformedSignatureDictionary(format!("undecodable /Contents: {}", e)))?;
        let parsed = cms::parse(&contents)?;

        let mut result = VerificationResult {
            is_valid: false,
            signer: None,
            signed_at: parsed
                .signing_time
                .or_else(|| text_entry(sig, "M").and_then(|m| parse_pdf_date(&m))),
            reason: text_entry(sig, "Reason"),
            location: text_entry(sig, "Location"),
            contact_info: text_entry(sig, "ContactInfo"),
            byte_range,
            digest_matches: false,
            signature_matches: false,
            covers_whole_document: byte_range.covers_whole_document(pdf.len()),
            problems: Vec::new(),
        };

        if let Some(name) = sig.get("SubFilter").and_then(|o| o.as_name()) {
            let detached = SignatureSubFilter::from_pdf_name(name).map(|f| f.is_detached());
            if detached != Some(true) {
                result.problems.push(format!("sub-filter /{} is not a detached CMS signature", name));
            }
        }

        let digest = parsed
            .digest_algorithm
            .digest_parts(&[&pdf[..byte_range.len1], &pdf[byte_range.start2..byte_range.end()]]);
        result.digest_matches = match &parsed.message_digest {
            Some(expected) => *expected == digest,
            None => {
                result.problems.push("signed attributes carry no messageDigest".to_string());
                false
            },
        };
        if !result.digest_matches && parsed.message_digest.is_some() {
            result.problems.push("document digest does not match messageDigest".to_string());
        }

        match parsed.signer_certificate() {
            Some(cert) => {
                result.signer = Some(SignerInfo {
                    common_name: cert.common_name().map(str::to_string),
                    subject: cert.subject().clone(),
                    issuer: cert.issuer().clone(),
                    serial_hex: cert.serial_hex(),
                    not_before: cert.validity_window().0,
                    not_after: cert.validity_window().1,
                });
                result.signature_matches = check_signature(&parsed, cert.public_key_der(), &digest, &mut result.problems);
            },
            None => result
                .problems
                .push("signer certificate is not embedded in the signature".to_string()),
        }

        if !result.covers_whole_document {
            log::debug!(
                "Signature {} leaves {} trailing bytes unsigned",
                byte_range,
                pdf.len() - byte_range.end()
            );
        }

        result.is_valid = result.digest_matches && result.signature_matches && result.problems.is_empty();
        log::info!(
            "Verified signature {}: valid={}, signer={:?}",
            byte_range,
            result.is_valid,
            result.signer.as_ref().and_then(|s| s.common_name.as_deref())
        );
        Ok(result)
    }
}

fn check_signature(parsed: &ParsedSignedData, spki: &[u8], content_digest: &[u8], problems: &mut Vec<String>) -> bool {
    let key = match PublicKey::from_spki(spki) {
        Ok(key) => key,
        Err(e) => {
            problems.push(format!("signer public key unusable: {}", e));
            return false;
        },
    };
    let hashed = match parsed.signed_content() {
        Some(attrs) => parsed.digest_algorithm.digest(attrs),
        None => content_digest.to_vec(),
    };
    let ok = key.verify_prehashed(parsed.digest_algorithm, &hashed, &parsed.signature);
    if !ok {
        problems.push(format!(
            "signature ({}) does not verify with the signer certificate",
            parsed.signature_algorithm
        ));
    }
    ok
}

fn text_entry(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(|o| o.as_text())
}

impl SignatureVerifier {
    /// Every signature dictionary in `pdf`, ordered by the revision that holds it.
    pub fn signature_dictionaries(&self, pdf: &[u8]) -> Vec<Dictionary> {
        let mut found = match PdfFile::parse_with_depth(pdf, self.max_xref_depth) {
            Ok(file) => match form_signatures(&file) {
                Ok(sigs) if !sigs.is_empty() => sigs,
                Ok(_) => scan_signatures(pdf),
                Err(e) => {
                    log::warn!("Cannot walk AcroForm fields ({}), scanning raw bytes", e);
                    scan_signatures(pdf)
                },
            },
            Err(e) => {
                log::warn!("Cannot read document structure ({}), scanning raw bytes", e);
                scan_signatures(pdf)
            },
        };

        found.sort_by_key(|sig| {
            sig.get("ByteRange")
                .and_then(|br| parse_byte_range(br).ok())
                .map(|br: ByteRange| br.len1)
                .unwrap_or(usize::MAX)
        });
        log::debug!("Found {} signature dictionaries", found.len());
        found
    }
}

fn form_signatures(file: &PdfFile<'_>) -> Result<Vec<Dictionary>> {
    let (_, catalog) = file.catalog()?;
    let Some(acroform) = catalog.get("AcroForm") else {
        return Ok(Vec::new());
    };
    let acroform = file.resolve_dict(acroform)?;
    let fields = match acroform.get("Fields") {
        Some(fields) => file.resolve(fields)?,
        None => return Ok(Vec::new()),
    };

    let mut out = Vec::new();
    collect_fields(file, fields.as_array().map(Vec::as_slice).unwrap_or(&[]), 0, &mut out)?;
    Ok(out)
}

fn collect_fields(file: &PdfFile<'_>, fields: &[Object], depth: u32, out: &mut Vec<Dictionary>) -> Result<()> {
    if depth > MAX_FIELD_DEPTH {
        return Err(Error::RecursionLimitExceeded(MAX_FIELD_DEPTH));
    }
    for field in fields {
        let dict = file.resolve_dict(field)?;
        if dict.get("FT").and_then(|o| o.as_name()) == Some("Sig") {
            if let Some(value) = dict.get("V") {
                let sig = file.resolve_dict(value)?;
                if sig.contains_key("ByteRange") {
                    out.push(sig);
                }
            }
        }
        if let Some(kids) = dict.get("Kids") {
            let kids = file.resolve(kids)?;
            collect_fields(file, kids.as_array().map(Vec::as_slice).unwrap_or(&[]), depth + 1, out)?;
        }
    }
    Ok(())
}

/// Parse every object whose dictionary declares `/Type /Sig`.
fn scan_signatures(pdf: &[u8]) -> Vec<Dictionary> {
    let headers: Vec<usize> = RE_OBJ_HEADER.find_iter(pdf).map(|m| m.start()).collect();
    let mut out: Vec<Dictionary> = Vec::new();
    let mut last_header = None;

    for hit in RE_SIG_TYPE.find_iter(pdf) {
        let Some(&start) = headers.iter().rev().find(|h| **h < hit.start()) else {
            continue;
        };
        if last_header == Some(start) {
            continue;
        }
        last_header = Some(start);

        match parse_indirect_object(&pdf[start..]) {
            Ok((_, (_, Object::Dictionary(dict)))) if dict.contains_key("ByteRange") => out.push(dict),
            Ok(_) => {},
            Err(e) => log::debug!("Skipping unparseable object at {}: {}", start, e),
        }
    }
    out
}
