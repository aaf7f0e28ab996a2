//! Private and public keys used for CMS signatures.
//!
//! Two families are supported: RSA with PKCS#1 v1.5 padding and ECDSA over
//! P-256. Signing always operates on a precomputed digest, since the CMS layer
//! signs the hash of the signed attributes.

use crate::error::{Error, Result};
use crate::signatures::DigestAlgorithm;
use der::asn1::ObjectIdentifier;
use p256::ecdsa::{SigningKey, VerifyingKey};
use pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use signature::hazmat::{PrehashSigner, PrehashVerifier};

/// rsaEncryption
pub const OID_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
/// id-ecPublicKey
pub const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
/// ecdsa-with-SHA256
pub const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
/// ecdsa-with-SHA384
pub const OID_ECDSA_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
/// ecdsa-with-SHA512
pub const OID_ECDSA_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");

/// Fixed-size ECDSA signature over P-256.
type P256Signature = ecdsa::Signature<p256::NistP256>;

/// Upper bound of a DER ECDSA P-256 signature.
const P256_MAX_SIGNATURE_LEN: usize = 72;

/// A signing key extracted from a container or PEM file.
pub enum PrivateKey {
    /// RSA key, signs with PKCS#1 v1.5
    Rsa(RsaPrivateKey),
    /// ECDSA key on NIST P-256
    EcdsaP256(SigningKey),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm_name())
            .field("material", &"[REDACTED]")
            .finish()
    }
}

impl PrivateKey {
    /// Decode an unencrypted PKCS#8 `PrivateKeyInfo`.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = pkcs8::PrivateKeyInfo::try_from(der)
            .map_err(|e| Error::MalformedContainer(format!("invalid PKCS#8 key: {}", e)))?;
        let algorithm = info.algorithm.oid;

        if algorithm == OID_RSA_ENCRYPTION {
            RsaPrivateKey::from_pkcs8_der(der)
                .map(PrivateKey::Rsa)
                .map_err(|e| Error::MalformedContainer(format!("invalid RSA key: {}", e)))
        } else if algorithm == OID_EC_PUBLIC_KEY {
            SigningKey::from_pkcs8_der(der)
                .map(PrivateKey::EcdsaP256)
                .map_err(|_| Error::UnsupportedKeyAlgorithm("EC key on a curve other than P-256".to_string()))
        } else {
            Err(Error::UnsupportedKeyAlgorithm(algorithm.to_string()))
        }
    }

    /// Decode a PEM private key: PKCS#8, PKCS#1 RSA or SEC1 EC.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        for block in x509_parser::pem::Pem::iter_from_buffer(pem) {
            let block =
                block.map_err(|e| Error::MalformedContainer(format!("invalid PEM: {}", e)))?;
            return match block.label.as_str() {
                "PRIVATE KEY" => Self::from_pkcs8_der(&block.contents),
                "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(&block.contents)
                    .map(PrivateKey::Rsa)
                    .map_err(|e| Error::MalformedContainer(format!("invalid RSA key: {}", e))),
                "EC PRIVATE KEY" => p256::SecretKey::from_sec1_der(&block.contents)
                    .map(|secret| PrivateKey::EcdsaP256(SigningKey::from(secret)))
                    .map_err(|_| {
                        Error::UnsupportedKeyAlgorithm("EC key on a curve other than P-256".to_string())
                    }),
                "ENCRYPTED PRIVATE KEY" => Err(Error::MalformedContainer(
                    "encrypted PEM keys are not supported".to_string(),
                )),
                _ => continue,
            };
        }
        Err(Error::MissingKeyOrCertificate("no private key in PEM input".to_string()))
    }

    /// Short algorithm name for logs and reports.
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            PrivateKey::Rsa(_) => "RSA",
            PrivateKey::EcdsaP256(_) => "ECDSA P-256",
        }
    }

    /// Whether `spki_der` holds the public half of this key.
    pub fn matches_public_key(&self, spki_der: &[u8]) -> bool {
        match self {
            PrivateKey::Rsa(key) => RsaPublicKey::from_public_key_der(spki_der)
                .map(|public| public == key.to_public_key())
                .unwrap_or(false),
            PrivateKey::EcdsaP256(key) => VerifyingKey::from_public_key_der(spki_der)
                .map(|public| &public == key.verifying_key())
                .unwrap_or(false),
        }
    }

    /// Largest signature this key can produce, in bytes.
    pub fn max_signature_len(&self) -> usize {
        match self {
            PrivateKey::Rsa(key) => rsa::traits::PublicKeyParts::size(key),
            PrivateKey::EcdsaP256(_) => P256_MAX_SIGNATURE_LEN,
        }
    }

    /// `(algorithm, null_params)` for the SignerInfo `signatureAlgorithm`.
    pub fn signature_algorithm(&self, digest: DigestAlgorithm) -> Result<(ObjectIdentifier, bool)> {
        match self {
            PrivateKey::Rsa(_) => Ok((OID_RSA_ENCRYPTION, true)),
            PrivateKey::EcdsaP256(_) => match digest {
                DigestAlgorithm::Sha256 => Ok((OID_ECDSA_SHA256, false)),
                other => Err(Error::UnsupportedKeyAlgorithm(format!(
                    "ECDSA P-256 signs with SHA-256 only, not {}",
                    other.name()
                ))),
            },
        }
    }

    /// Sign a precomputed digest.
    ///
    /// RSA yields a PKCS#1 v1.5 block, P-256 a DER `ECDSA-Sig-Value`.
    pub fn sign_prehashed(&self, digest: DigestAlgorithm, hashed: &[u8]) -> Result<Vec<u8>> {
        if hashed.len() != digest.output_len() {
            return Err(Error::SigningFailure(format!(
                "digest is {} bytes, {} produces {}",
                hashed.len(),
                digest.name(),
                digest.output_len()
            )));
        }
        match self {
            PrivateKey::Rsa(key) => key
                .sign(pkcs1v15_scheme(digest), hashed)
                .map_err(|e| Error::SigningFailure(e.to_string())),
            PrivateKey::EcdsaP256(key) => {
                self.signature_algorithm(digest)?;
                let signature: P256Signature = key
                    .sign_prehash(hashed)
                    .map_err(|e| Error::SigningFailure(e.to_string()))?;
                Ok(signature.to_der().as_bytes().to_vec())
            },
        }
    }
}

fn pkcs1v15_scheme(digest: DigestAlgorithm) -> Pkcs1v15Sign {
    match digest {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

/// A public key taken from a certificate, used by the verifier.
#[derive(Debug, Clone)]
pub enum PublicKey {
    /// RSA public key
    Rsa(RsaPublicKey),
    /// P-256 verifying key
    EcdsaP256(VerifyingKey),
}

impl PublicKey {
    /// Decode a DER `SubjectPublicKeyInfo`.
    pub fn from_spki(spki_der: &[u8]) -> Result<Self> {
        let info = spki::SubjectPublicKeyInfoRef::try_from(spki_der)
            .map_err(|e| Error::MalformedCertificate(format!("invalid public key: {}", e)))?;
        let algorithm = info.algorithm.oid;

        if algorithm == OID_RSA_ENCRYPTION {
            RsaPublicKey::from_public_key_der(spki_der)
                .map(PublicKey::Rsa)
                .map_err(|e| Error::MalformedCertificate(format!("invalid RSA public key: {}", e)))
        } else if algorithm == OID_EC_PUBLIC_KEY {
            VerifyingKey::from_public_key_der(spki_der)
                .map(PublicKey::EcdsaP256)
                .map_err(|_| Error::UnsupportedKeyAlgorithm("EC key on a curve other than P-256".to_string()))
        } else {
            Err(Error::UnsupportedKeyAlgorithm(algorithm.to_string()))
        }
    }

    /// Check `signature` over a precomputed digest.
    pub fn verify_prehashed(&self, digest: DigestAlgorithm, hashed: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Rsa(key) => key.verify(pkcs1v15_scheme(digest), hashed, signature).is_ok(),
            PublicKey::EcdsaP256(key) => match P256Signature::from_der(signature) {
                Ok(sig) => key.verify_prehash(hashed, &sig).is_ok(),
                Err(_) => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_KEY_PEM: &[u8] = include_bytes!("../../tests/fixtures/rsa_key.pem");
    const RSA_CERT_PEM: &[u8] = include_bytes!("../../tests/fixtures/rsa_cert.pem");
    const EC_KEY_PEM: &[u8] = include_bytes!("../../tests/fixtures/ec_key.pem");
    const EC_CERT_PEM: &[u8] = include_bytes!("../../tests/fixtures/ec_cert.pem");

    fn spki_of(cert_pem: &[u8]) -> Vec<u8> {
        crate::crypto::certificate::Certificate::from_pem(cert_pem)
            .unwrap()
            .public_key_der()
            .to_vec()
    }

    #[test]
    fn test_rsa_sign_and_verify() {
        let key = PrivateKey::from_pem(RSA_KEY_PEM).unwrap();
        assert_eq!(key.algorithm_name(), "RSA");
        assert_eq!(key.max_signature_len(), 256);

        let spki = spki_of(RSA_CERT_PEM);
        assert!(key.matches_public_key(&spki));

        let hashed = DigestAlgorithm::Sha256.digest(b"payload");
        let sig = key.sign_prehashed(DigestAlgorithm::Sha256, &hashed).unwrap();
        assert_eq!(sig.len(), 256);

        let public = PublicKey::from_spki(&spki).unwrap();
        assert!(public.verify_prehashed(DigestAlgorithm::Sha256, &hashed, &sig));
        let other = DigestAlgorithm::Sha256.digest(b"other");
        assert!(!public.verify_prehashed(DigestAlgorithm::Sha256, &other, &sig));
    }

    #[test]
    fn test_ecdsa_sign_and_verify() {
        let key = PrivateKey::from_pem(EC_KEY_PEM).unwrap();
        assert_eq!(key.algorithm_name(), "ECDSA P-256");

        let spki = spki_of(EC_CERT_PEM);
        assert!(key.matches_public_key(&spki));
        assert!(!key.matches_public_key(&spki_of(RSA_CERT_PEM)));

        let hashed = DigestAlgorithm::Sha256.digest(b"payload");
        let sig = key.sign_prehashed(DigestAlgorithm::Sha256, &hashed).unwrap();
        assert!(sig.len() <= P256_MAX_SIGNATURE_LEN);
        assert_eq!(sig[0], 0x30);

        let public = PublicKey::from_spki(&spki).unwrap();
        assert!(public.verify_prehashed(DigestAlgorithm::Sha256, &hashed, &sig));
    }

    #[test]
    fn test_ecdsa_rejects_other_digests() {
        let key = PrivateKey::from_pem(EC_KEY_PEM).unwrap();
        let hashed = DigestAlgorithm::Sha384.digest(b"payload");
        let err = key.sign_prehashed(DigestAlgorithm::Sha384, &hashed).unwrap_err();
        assert!(matches!(err, Error::UnsupportedKeyAlgorithm(_)));
    }

    #[test]
    fn test_digest_length_checked() {
        let key = PrivateKey::from_pem(RSA_KEY_PEM).unwrap();
        let err = key.sign_prehashed(DigestAlgorithm::Sha256, b"short").unwrap_err();
        assert!(matches!(err, Error::SigningFailure(_)));
    }

    #[test]
    fn test_debug_redacts_material() {
        let key = PrivateKey::from_pem(RSA_KEY_PEM).unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("RsaPrivateKey"));
    }

    #[test]
    fn test_pem_without_key() {
        let err = PrivateKey::from_pem(RSA_CERT_PEM).unwrap_err();
        assert!(matches!(err, Error::MissingKeyOrCertificate(_)));
    }
}
