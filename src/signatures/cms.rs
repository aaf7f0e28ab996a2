//! Detached CMS `SignedData` (RFC 5652) for PDF signatures.
//!
//! [`sign`] builds the structure with explicit DER from [`crate::crypto::asn1`]:
//!
//! ```text
//! ContentInfo { id-signedData, [0] SignedData {
//!     version 1, digestAlgorithms, encapContentInfo { id-data },
//!     certificates [0] IMPLICIT (leaf first),
//!     signerInfos { SignerInfo {
//!         version 1, IssuerAndSerialNumber, digestAlgorithm,
//!         signedAttrs [0] { contentType, signingTime, messageDigest },
//!         signatureAlgorithm, signature } } } }
//! ```
//!
//! [`parse`] reads the same structure back, accepting BER.

use crate::crypto::asn1::{self, tag, Element};
use crate::crypto::certificate::Certificate;
use crate::crypto::pkcs12::CertificateBundle;
use crate::error::{Error, Result};
use crate::signatures::types::{DigestAlgorithm, SignOptions};
use chrono::{DateTime, Datelike, Utc};
use der::asn1::{GeneralizedTime, ObjectIdentifier, UtcTime};
use der::{Decode, Encode};

/// id-data
pub const OID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// id-signedData
pub const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-contentType
pub const OID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
/// id-messageDigest
pub const OID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
/// id-signingTime
pub const OID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");

/// Fixed DER overhead around certificates and signature, with headroom.
const STRUCTURE_OVERHEAD: usize = 512;

/// Smallest reservation guaranteed to hold a CMS from `bundle`.
pub fn estimated_size(bundle: &CertificateBundle) -> usize {
    let certificates: usize = bundle.certificates().map(|c| c.der().len()).sum();
    certificates + bundle.leaf().issuer_der().len() + bundle.private_key().max_signature_len() + STRUCTURE_OVERHEAD
}

/// Build a detached `SignedData` over a byte-range digest.
///
/// `digest` must come from `options.digest_algorithm`. Fails with
/// [`Error::PlaceholderTooSmall`] when the encoding exceeds
/// `options.reserved_length`.
pub fn sign(digest: &[u8], bundle: &CertificateBundle, options: &SignOptions) -> Result<Vec<u8>> {
    let algorithm = options.digest_algorithm;
    if digest.len() != algorithm.output_len() {
        return Err(Error::SigningFailure(format!(
            "{} digest must be {} bytes, got {}",
            algorithm,
            algorithm.output_len(),
            digest.len()
        )));
    }

    let key = bundle.private_key();
    let (signature_oid, null_params) = key.signature_algorithm(algorithm)?;
    let signing_time = options.signing_time.unwrap_or_else(Utc::now);

    let attributes = vec![
        attribute(&OID_CONTENT_TYPE, &asn1::oid(&OID_DATA)),
        attribute(&OID_SIGNING_TIME, &encode_time(&signing_time)?),
        attribute(&OID_MESSAGE_DIGEST, &asn1::octet_string(digest)),
    ];
    // Signed as SET OF, embedded as [0] IMPLICIT
    let signed_attrs = asn1::set_of(attributes);
    let signature = key.sign_prehashed(algorithm, &algorithm.digest(&signed_attrs))?;

    let mut implicit_attrs = signed_attrs;
    implicit_attrs[0] = tag::CONTEXT_0;

    let leaf = bundle.leaf();
    let issuer_and_serial = asn1::sequence(&[leaf.issuer_der(), &asn1::tlv(tag::INTEGER, leaf.serial_bytes())]);
    let digest_algorithm = asn1::algorithm_identifier(&algorithm.oid(), false);

    let signer_info = asn1::sequence(&[
        &asn1::small_integer(1),
        &issuer_and_serial,
        &digest_algorithm,
        &implicit_attrs,
        &asn1::algorithm_identifier(&signature_oid, null_params),
        &asn1::octet_string(&signature),
    ]);

    let certificates: Vec<u8> = bundle.certificates().flat_map(|c| c.der().iter().copied()).collect();

    let signed_data = asn1::sequence(&[
        &asn1::small_integer(1),
        &asn1::tlv(tag::SET, &digest_algorithm),
        &asn1::sequence(&[&asn1::oid(&OID_DATA)]),
        &asn1::context(0, &certificates),
        &asn1::tlv(tag::SET, &signer_info),
    ]);
    let content_info = asn1::sequence(&[&asn1::oid(&OID_SIGNED_DATA), &asn1::context(0, &signed_data)]);

    if content_info.len() > options.reserved_length {
        return Err(Error::PlaceholderTooSmall {
            required: content_info.len(),
            reserved: options.reserved_length,
        });
    }

    log::debug!(
        "Built CMS SignedData: {} bytes, {} with {}, {} certificate(s)",
        content_info.len(),
        key.algorithm_name(),
        algorithm,
        bundle.certificates().count()
    );
    Ok(content_info)
}

fn attribute(oid: &ObjectIdentifier, value: &[u8]) -> Vec<u8> {
    asn1::sequence(&[&asn1::oid(oid), &asn1::tlv(tag::SET, value)])
}

/// UTCTime through 2049, GeneralizedTime from 2050 (RFC 5280 4.1.2.5).
fn encode_time(time: &DateTime<Utc>) -> Result<Vec<u8>> {
    let since_epoch = std::time::Duration::from_secs(time.timestamp().max(0) as u64);
    let encoded = if time.year() < 2050 {
        UtcTime::from_unix_duration(since_epoch).and_then(|t| t.to_der())
    } else {
        GeneralizedTime::from_unix_duration(since_epoch).and_then(|t| t.to_der())
    };
    encoded.map_err(|e| Error::SigningFailure(format!("cannot encode signing time: {}", e)))
}

fn decode_time(element: &Element<'_>) -> Option<DateTime<Utc>> {
    let since_epoch = match element.tag {
        tag::UTC_TIME => UtcTime::from_der(element.raw).ok()?.to_unix_duration(),
        tag::GENERALIZED_TIME => GeneralizedTime::from_der(element.raw).ok()?.to_unix_duration(),
        _ => return None,
    };
    DateTime::from_timestamp(since_epoch.as_secs() as i64, 0)
}

/// The parts of a `SignedData` the verifier needs.
#[derive(Debug, Clone)]
pub struct ParsedSignedData {
    /// SignerInfo `digestAlgorithm`
    pub digest_algorithm: DigestAlgorithm,
    /// Certificates carried in the structure, in order
    pub certificates: Vec<Certificate>,
    /// Issuer Name DER from IssuerAndSerialNumber
    pub signer_issuer: Vec<u8>,
    /// Serial INTEGER content from IssuerAndSerialNumber
    pub signer_serial: Vec<u8>,
    /// Signed attributes re-encoded as DER `SET OF`, when present
    pub signed_attrs: Option<Vec<u8>>,
    /// messageDigest attribute
    pub message_digest: Option<Vec<u8>>,
    /// signingTime attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// SignerInfo `signatureAlgorithm`
    pub signature_algorithm: ObjectIdentifier,
    /// SignerInfo `signature`
    pub signature: Vec<u8>,
}

impl ParsedSignedData {
    /// The certificate named by IssuerAndSerialNumber.
    pub fn signer_certificate(&self) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|c| c.matches_issuer_serial(&self.signer_issuer, &self.signer_serial))
    }

    /// Bytes the signature was computed over.
    pub fn signed_content(&self) -> Option<&[u8]> {
        self.signed_attrs.as_deref()
    }
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedSignatureDictionary(format!("CMS: {}", msg.into()))
}

fn child<'a>(children: &[Element<'a>], index: usize, what: &str) -> Result<Element<'a>> {
    children
        .get(index)
        .cloned()
        .ok_or_else(|| malformed(format!("missing {}", what)))
}

/// Decode a `ContentInfo` wrapping `SignedData`; the first SignerInfo is used.
pub fn parse(cms: &[u8]) -> Result<ParsedSignedData> {
    let asn1_err = |e: Error| malformed(e.to_string());

    let content_info = asn1::read_single(cms).map_err(asn1_err)?.expect(tag::SEQUENCE).map_err(asn1_err)?;
    let parts = content_info.children().map_err(asn1_err)?;
    let content_type = child(&parts, 0, "contentType")?.oid().map_err(asn1_err)?;
    if content_type != OID_SIGNED_DATA {
        return Err(malformed(format!("content type {} is not signedData", content_type)));
    }
    let wrapper = child(&parts, 1, "content")?.expect(tag::CONTEXT_0).map_err(asn1_err)?;
    let signed_data = child(&wrapper.children().map_err(asn1_err)?, 0, "SignedData")?
        .expect(tag::SEQUENCE)
        .map_err(asn1_err)?;

    let fields = signed_data.children().map_err(asn1_err)?;
    let mut certificates = Vec::new();
    let mut signer_infos = None;
    for field in fields.iter().skip(3) {
        match field.tag {
            tag::CONTEXT_0 => {
                for cert in field.children().map_err(asn1_err)? {
                    let der = cert.to_der().map_err(asn1_err)?;
                    match Certificate::from_der(&der) {
                        Ok(c) => certificates.push(c),
                        Err(e) => log::debug!("Skipping unparseable CMS certificate: {}", e),
                    }
                }
            },
            tag::SET => signer_infos = Some(field.clone()),
            _ => {},
        }
    }

    let signer_infos = signer_infos.ok_or_else(|| malformed("missing signerInfos"))?;
    let signer = child(&signer_infos.children().map_err(asn1_err)?, 0, "SignerInfo")?;
    let signer_fields = signer.children().map_err(asn1_err)?;

    let sid = child(&signer_fields, 1, "sid")?.expect(tag::SEQUENCE).map_err(|_| {
        malformed("only IssuerAndSerialNumber signer identifiers are supported")
    })?;
    let sid_parts = sid.children().map_err(asn1_err)?;
    let signer_issuer = child(&sid_parts, 0, "issuer")?.to_der().map_err(asn1_err)?;
    let serial = child(&sid_parts, 1, "serialNumber")?.expect(tag::INTEGER).map_err(asn1_err)?;

    let digest_oid = algorithm_oid(&child(&signer_fields, 2, "digestAlgorithm")?)?;
    let digest_algorithm = DigestAlgorithm::from_oid(&digest_oid)
        .ok_or_else(|| malformed(format!("unsupported digest algorithm {}", digest_oid)))?;

    let mut index = 3;
    let mut signed_attrs = None;
    let mut message_digest = None;
    let mut signing_time = None;
    if let Some(attrs) = signer_fields.get(index).filter(|e| e.tag == tag::CONTEXT_0) {
        signed_attrs = Some(attrs.retagged(tag::SET).map_err(asn1_err)?);
        for attr in attrs.children().map_err(asn1_err)? {
            let pair = attr.children().map_err(asn1_err)?;
            let attr_type = child(&pair, 0, "attribute type")?.oid().map_err(asn1_err)?;
            let values = child(&pair, 1, "attribute values")?.children().map_err(asn1_err)?;
            let Some(value) = values.first() else { continue };
            if attr_type == OID_MESSAGE_DIGEST {
                message_digest = Some(value.octets().map_err(asn1_err)?);
            } else if attr_type == OID_SIGNING_TIME {
                signing_time = decode_time(value);
            }
        }
        index += 1;
    }

    let signature_algorithm = algorithm_oid(&child(&signer_fields, index, "signatureAlgorithm")?)?;
    let signature = child(&signer_fields, index + 1, "signature")?.octets().map_err(asn1_err)?;

    Ok(ParsedSignedData {
        digest_algorithm,
        certificates,
        signer_issuer,
        signer_serial: serial.content.to_vec(),
        signed_attrs,
        message_digest,
        signing_time,
        signature_algorithm,
        signature,
    })
}

fn algorithm_oid(element: &Element<'_>) -> Result<ObjectIdentifier> {
    let parts = element.children().map_err(|e| malformed(e.to_string()))?;
    child(&parts, 0, "algorithm")?.oid().map_err(|e| malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{PublicKey, OID_ECDSA_SHA256, OID_RSA_ENCRYPTION};
    use crate::crypto::pkcs12::{extract, load_pem_bundle};
    use chrono::TimeZone;

    const RSA_P12: &[u8] = include_bytes!("../../tests/fixtures/rsa_pbes2.p12");
    const EC_P12: &[u8] = include_bytes!("../../tests/fixtures/ec_p256.p12");
    const CHAIN_P12: &[u8] = include_bytes!("../../tests/fixtures/chain.p12");
    const RSA_CERT_PEM: &[u8] = include_bytes!("../../tests/fixtures/rsa_cert.pem");
    const RSA_KEY_PEM: &[u8] = include_bytes!("../../tests/fixtures/rsa_key.pem");

    fn options() -> SignOptions {
        SignOptions::default().with_signing_time(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap())
    }

    fn check_signature(parsed: &ParsedSignedData) -> bool {
        let cert = parsed.signer_certificate().unwrap();
        let key = PublicKey::from_spki(cert.public_key_der()).unwrap();
        let hashed = parsed.digest_algorithm.digest(parsed.signed_content().unwrap());
        key.verify_prehashed(parsed.digest_algorithm, &hashed, &parsed.signature)
    }

    #[test]
    fn test_rsa_signed_data() {
        let bundle = extract(RSA_P12, "test123").unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"document bytes");
        let cms = sign(&digest, &bundle, &options()).unwrap();
        assert!(cms.len() <= estimated_size(&bundle));

        let parsed = parse(&cms).unwrap();
        assert_eq!(parsed.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(parsed.signature_algorithm, OID_RSA_ENCRYPTION);
        assert_eq!(parsed.message_digest.as_deref(), Some(&digest[..]));
        assert_eq!(parsed.signing_time, Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()));
        assert_eq!(parsed.certificates.len(), 1);
        assert_eq!(parsed.signer_certificate().unwrap().common_name(), Some("Test Signer"));
        assert!(check_signature(&parsed));
    }

    #[test]
    fn test_ecdsa_signed_data() {
        let bundle = extract(EC_P12, "test123").unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"document bytes");
        let cms = sign(&digest, &bundle, &options()).unwrap();

        let parsed = parse(&cms).unwrap();
        assert_eq!(parsed.signature_algorithm, OID_ECDSA_SHA256);
        assert!(check_signature(&parsed));
    }

    #[test]
    fn test_ecdsa_rejects_other_digests() {
        let bundle = extract(EC_P12, "test123").unwrap();
        let opts = options().with_digest_algorithm(DigestAlgorithm::Sha384);
        let digest = DigestAlgorithm::Sha384.digest(b"x");
        assert!(matches!(
            sign(&digest, &bundle, &opts),
            Err(Error::UnsupportedKeyAlgorithm(_))
        ));
    }

    #[test]
    fn test_chain_is_embedded_leaf_first() {
        let bundle = extract(CHAIN_P12, "test123").unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"x");
        let parsed = parse(&sign(&digest, &bundle, &options()).unwrap()).unwrap();
        assert_eq!(parsed.certificates.len(), 2);
        assert_eq!(parsed.certificates[0].common_name(), Some("Chain Signer"));
        assert_eq!(parsed.certificates[1].common_name(), Some("AC Teste Raiz"));
        assert_eq!(parsed.signer_certificate().unwrap().common_name(), Some("Chain Signer"));
    }

    #[test]
    fn test_sha512_with_rsa() {
        let bundle = load_pem_bundle(RSA_CERT_PEM, RSA_KEY_PEM).unwrap();
        let opts = options().with_digest_algorithm(DigestAlgorithm::Sha512);
        let digest = DigestAlgorithm::Sha512.digest(b"x");
        let parsed = parse(&sign(&digest, &bundle, &opts).unwrap()).unwrap();
        assert_eq!(parsed.digest_algorithm, DigestAlgorithm::Sha512);
        assert!(check_signature(&parsed));
    }

    #[test]
    fn test_reservation_exceeded() {
        let bundle = extract(RSA_P12, "test123").unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"x");
        let err = sign(&digest, &bundle, &options().with_reserved_length(100)).unwrap_err();
        match err {
            Error::PlaceholderTooSmall { required, reserved } => {
                assert_eq!(reserved, 100);
                assert!(required > 100);
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_digest_length() {
        let bundle = extract(RSA_P12, "test123").unwrap();
        assert!(matches!(
            sign(&[0u8; 20], &bundle, &options()),
            Err(Error::SigningFailure(_))
        ));
    }

    #[test]
    fn test_signing_time_encoding() {
        let early = Utc.with_ymd_and_hms(2049, 12, 31, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        let early_der = encode_time(&early).unwrap();
        let late_der = encode_time(&late).unwrap();
        assert_eq!(early_der[0], tag::UTC_TIME);
        assert_eq!(&early_der[2..], b"491231235959Z");
        assert_eq!(late_der[0], tag::GENERALIZED_TIME);
        assert_eq!(&late_der[2..], b"20500101000000Z");

        let (element, _) = asn1::read_element(&late_der).unwrap();
        assert_eq!(decode_time(&element), Some(late));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse(b"\x30\x03\x02\x01\x01"), Err(Error::MalformedSignatureDictionary(_))));
        assert!(matches!(parse(&[0u8; 8]), Err(Error::MalformedSignatureDictionary(_))));
    }

    #[test]
    fn test_parse_accepts_indefinite_length() {
        let bundle = extract(RSA_P12, "test123").unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"x");
        let cms = sign(&digest, &bundle, &options()).unwrap();

        // Re-wrap the outer SEQUENCE with an indefinite length
        let (outer, _) = asn1::read_element(&cms).unwrap();
        let mut ber = vec![tag::SEQUENCE, 0x80];
        ber.extend_from_slice(outer.content);
        ber.extend_from_slice(&[0, 0]);

        let parsed = parse(&ber).unwrap();
        assert_eq!(parsed.message_digest.as_deref(), Some(&digest[..]));
        assert!(check_signature(&parsed));
    }

    #[test]
    fn test_parse_rejects_deep_indefinite_nesting() {
        let mut ber = [tag::SEQUENCE, 0x80].repeat(10_000);
        ber.extend([0x00, 0x00].repeat(10_000));
        let err = parse(&ber).unwrap_err();
        assert!(matches!(err, Error::MalformedSignatureDictionary(_)));
    }
}
