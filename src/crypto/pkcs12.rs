//! PKCS#12 (PFX) container extraction.
//!
//! Decodes the container, checks its MAC, decrypts the encrypted safe
//! contents and shrouded key bags, and pairs the private key with the
//! certificate holding its public half.
//!
//! Supported protection:
//! - MAC: HMAC-SHA1/SHA-256/SHA-384/SHA-512 keyed through the RFC 7292
//!   Appendix B key derivation.
//! - Encryption: PBES2 (PBKDF2 with AES-CBC, the OpenSSL 3 default) and
//!   pbeWithSHAAnd3-KeyTripleDES-CBC (legacy exports).
//!
//! RFC 7292: PKCS #12: Personal Information Exchange Syntax v1.1

use crate::crypto::certificate::Certificate;
use crate::crypto::keys::PrivateKey;
use crate::error::{Error, Result};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use cms::content_info::ContentInfo;
use cms::encrypted_data::EncryptedData;
use der::asn1::{ObjectIdentifier, OctetString};
use der::{AnyRef, Decode, Encode};
use hmac::{Hmac, Mac};
use pkcs12::cert_type::CertBag;
use pkcs12::kdf::{self, Pkcs12KeyType};
use pkcs12::mac_data::MacData;
use pkcs12::pbe_params::{EncryptedPrivateKeyInfo, Pkcs12PbeParams};
use pkcs12::pfx::Pfx;
use pkcs12::safe_bag::SafeContents;
use pkcs12::{
    PKCS_12_CERT_BAG_OID, PKCS_12_KEY_BAG_OID, PKCS_12_PBEWITH_SHAAND40_BIT_RC2_CBC,
    PKCS_12_PBE_WITH_SHAAND3_KEY_TRIPLE_DES_CBC, PKCS_12_PKCS8_KEY_BAG_OID, PKCS_12_SAFE_CONTENTS_BAG_OID,
    PKCS_12_X509_CERT_OID,
};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use spki::AlgorithmIdentifierOwned;

type TdesCbcDec = cbc::Decryptor<des::TdesEde3>;

const OID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const OID_ENCRYPTED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.6");
const OID_PBES2: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.5.13");

const OID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const OID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const OID_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
const OID_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

/// Upper bound on KDF and MAC iteration counts.
const MAX_ITERATIONS: i32 = 10_000_000;

/// Maximum nesting of safeContentsBag.
const MAX_BAG_DEPTH: u32 = 8;

/// A private key together with its certificate chain.
///
/// The leaf certificate always carries the public half of the key.
#[derive(Debug)]
pub struct CertificateBundle {
    private_key: PrivateKey,
    leaf: Certificate,
    chain: Vec<Certificate>,
}

impl CertificateBundle {
    /// Assemble a bundle, rejecting a leaf that does not match the key.
    pub fn new(private_key: PrivateKey, leaf: Certificate, chain: Vec<Certificate>) -> Result<Self> {
        if !private_key.matches_public_key(leaf.public_key_der()) {
            return Err(Error::MissingKeyOrCertificate(
                "certificate public key does not match the private key".to_string(),
            ));
        }
        Ok(Self {
            private_key,
            leaf,
            chain,
        })
    }

    /// Signing key.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Certificate for the signing key.
    pub fn leaf(&self) -> &Certificate {
        &self.leaf
    }

    /// Remaining certificates, in container order.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// Leaf first, then the chain.
    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        std::iter::once(&self.leaf).chain(self.chain.iter())
    }
}

/// SafeBag content, classified by bag type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeBag {
    /// Plain PKCS#8 `PrivateKeyInfo`
    Key(Vec<u8>),
    /// PKCS#8 `EncryptedPrivateKeyInfo`
    ShroudedKey(Vec<u8>),
    /// DER X.509 certificate
    Cert(Vec<u8>),
    /// Any other bag type (CRLs, secrets, non-X.509 certificates)
    Other(ObjectIdentifier),
}

/// How the passphrase is fed to the RFC 7292 key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PasswordForm {
    /// NUL-terminated BMPString
    Bmp,
    /// Zero bytes; some exporters encode an empty passphrase this way
    Absent,
}

/// Extract the key and certificates from a PKCS#12 container.
pub fn extract(bytes: &[u8], passphrase: &str) -> Result<CertificateBundle> {
    let pfx = Pfx::from_der(bytes).map_err(malformed_der)?;
    if pfx.auth_safe.content_type != OID_DATA {
        return Err(Error::MalformedContainer(format!(
            "authSafe content type {} is not supported",
            pfx.auth_safe.content_type
        )));
    }
    let auth_safe = pfx.auth_safe.content.decode_as::<OctetString>().map_err(malformed_der)?;
    let auth_safe = auth_safe.as_bytes();

    let password = match &pfx.mac_data {
        Some(mac_data) => verify_mac(mac_data, auth_safe, passphrase)?,
        None => {
            log::warn!("PKCS#12 container has no MAC; integrity is not checked");
            PasswordForm::Bmp
        },
    };

    let mut bags = Vec::new();
    for info in Vec::<ContentInfo>::from_der(auth_safe).map_err(malformed_der)? {
        if info.content_type == OID_DATA {
            let data = info.content.decode_as::<OctetString>().map_err(malformed_der)?;
            collect_bags(data.as_bytes(), &mut bags, 0)?;
        } else if info.content_type == OID_ENCRYPTED_DATA {
            let encrypted = info.content.decode_as::<EncryptedData>().map_err(malformed_der)?;
            let plain = decrypt_encrypted_data(&encrypted, passphrase, password)?;
            collect_bags(&plain, &mut bags, 0)?;
        } else {
            log::warn!("Skipping PKCS#12 content of type {}", info.content_type);
        }
    }

    let mut keys = Vec::new();
    let mut certs = Vec::new();
    for bag in bags {
        match bag {
            SafeBag::Key(der) => keys.push(PrivateKey::from_pkcs8_der(&der)?),
            SafeBag::ShroudedKey(der) => {
                let plain = decrypt_shrouded_key(&der, passphrase, password)?;
                keys.push(PrivateKey::from_pkcs8_der(&plain)?);
            },
            SafeBag::Cert(der) => certs.push(Certificate::from_der(&der)?),
            SafeBag::Other(oid) => log::debug!("Ignoring PKCS#12 bag {}", oid),
        }
    }

    log::debug!("PKCS#12 container holds {} key(s), {} certificate(s)", keys.len(), certs.len());

    if keys.is_empty() {
        return Err(Error::MissingKeyOrCertificate("container has no private key".to_string()));
    }
    if certs.is_empty() {
        return Err(Error::MissingKeyOrCertificate("container has no certificate".to_string()));
    }

    pair_key_with_leaf(keys, certs)
}

/// Build a bundle from PEM certificate(s) and a PEM private key.
///
/// The certificate matching the key becomes the leaf; the others form the
/// chain in file order.
pub fn load_pem_bundle(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertificateBundle> {
    let certs = Certificate::all_from_pem(cert_pem)?;
    if certs.is_empty() {
        return Err(Error::MissingKeyOrCertificate("no certificate in PEM input".to_string()));
    }
    let key = PrivateKey::from_pem(key_pem)?;
    pair_key_with_leaf(vec![key], certs)
}

fn pair_key_with_leaf(keys: Vec<PrivateKey>, mut certs: Vec<Certificate>) -> Result<CertificateBundle> {
    for key in keys {
        if let Some(pos) = certs.iter().position(|c| key.matches_public_key(c.public_key_der())) {
            let leaf = certs.remove(pos);
            log::debug!(
                "Matched {} key with certificate {:?}",
                key.algorithm_name(),
                leaf.common_name()
            );
            return CertificateBundle::new(key, leaf, certs);
        }
    }
    Err(Error::MissingKeyOrCertificate(
        "no certificate matches the private key".to_string(),
    ))
}

fn malformed_der(e: der::Error) -> Error {
    Error::MalformedContainer(e.to_string())
}

fn missing_field(name: &str) -> Error {
    Error::MalformedContainer(format!("missing {}", name))
}

fn collect_bags(safe_contents: &[u8], bags: &mut Vec<SafeBag>, depth: u32) -> Result<()> {
    if depth > MAX_BAG_DEPTH {
        return Err(Error::MalformedContainer("safe contents nested too deeply".to_string()));
    }
    for bag in SafeContents::from_der(safe_contents).map_err(malformed_der)? {
        // bagValue is kept with its [0] EXPLICIT wrapper.
        let value = AnyRef::from_der(&bag.bag_value).map_err(malformed_der)?.value();
        if bag.bag_id == PKCS_12_SAFE_CONTENTS_BAG_OID {
            collect_bags(value, bags, depth + 1)?;
        } else {
            bags.push(classify_bag(bag.bag_id, value)?);
        }
    }
    Ok(())
}

fn classify_bag(bag_id: ObjectIdentifier, value: &[u8]) -> Result<SafeBag> {
    if bag_id == PKCS_12_KEY_BAG_OID {
        Ok(SafeBag::Key(value.to_vec()))
    } else if bag_id == PKCS_12_PKCS8_KEY_BAG_OID {
        Ok(SafeBag::ShroudedKey(value.to_vec()))
    } else if bag_id == PKCS_12_CERT_BAG_OID {
        let cert_bag = CertBag::from_der(value).map_err(malformed_der)?;
        if cert_bag.cert_id == PKCS_12_X509_CERT_OID {
            Ok(SafeBag::Cert(cert_bag.cert_value.into_bytes()))
        } else {
            Ok(SafeBag::Other(cert_bag.cert_id))
        }
    } else {
        Ok(SafeBag::Other(bag_id))
    }
}

// ---------------------------------------------------------------------------
// Integrity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacDigest {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl MacDigest {
    fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [
            (OID_SHA1, Self::Sha1),
            (OID_SHA256, Self::Sha256),
            (OID_SHA384, Self::Sha384),
            (OID_SHA512, Self::Sha512),
        ]
        .into_iter()
        .find(|(candidate, _)| candidate == oid)
        .map(|(_, digest)| digest)
    }

    fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

/// Check the MAC and return the password form it was computed with.
///
/// An empty passphrase is tried both as the BMPString terminator and as
/// zero bytes, since exporters disagree on its encoding.
fn verify_mac(mac_data: &MacData, auth_safe: &[u8], passphrase: &str) -> Result<PasswordForm> {
    let algorithm = mac_data.mac.algorithm.oid;
    let digest = MacDigest::from_oid(&algorithm).ok_or_else(|| {
        Error::MalformedContainer(format!("unsupported MAC digest {}", algorithm))
    })?;
    let iterations = checked_iterations(mac_data.iterations)?;
    let salt = mac_data.mac_salt.as_bytes();
    let expected = mac_data.mac.digest.as_bytes();

    let mut forms = vec![PasswordForm::Bmp];
    if passphrase.is_empty() {
        forms.push(PasswordForm::Absent);
    }

    for form in forms {
        let key = derive_key(
            digest,
            passphrase,
            form,
            salt,
            Pkcs12KeyType::Mac,
            iterations,
            digest.output_len(),
        )?;
        if mac_matches(digest, &key, auth_safe, expected) {
            log::debug!("PKCS#12 MAC verified ({:?}, {} iterations)", digest, iterations);
            return Ok(form);
        }
    }
    Err(Error::InvalidPassphrase)
}

fn mac_matches(digest: MacDigest, key: &[u8], data: &[u8], expected: &[u8]) -> bool {
    match digest {
        MacDigest::Sha1 => hmac_verify::<Hmac<Sha1>>(key, data, expected),
        MacDigest::Sha256 => hmac_verify::<Hmac<Sha256>>(key, data, expected),
        MacDigest::Sha384 => hmac_verify::<Hmac<Sha384>>(key, data, expected),
        MacDigest::Sha512 => hmac_verify::<Hmac<Sha512>>(key, data, expected),
    }
}

fn hmac_verify<M: Mac + hmac::digest::KeyInit>(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
    match <M as hmac::digest::KeyInit>::new_from_slice(key) {
        Ok(mut mac) => {
            Mac::update(&mut mac, data);
            mac.verify_slice(expected).is_ok()
        },
        Err(_) => false,
    }
}

fn checked_iterations(iterations: i32) -> Result<i32> {
    if !(1..=MAX_ITERATIONS).contains(&iterations) {
        return Err(Error::MalformedContainer(format!("unreasonable iteration count {}", iterations)));
    }
    Ok(iterations)
}

/// RFC 7292 Appendix B key derivation over the digest named by the container.
fn derive_key(
    digest: MacDigest,
    passphrase: &str,
    form: PasswordForm,
    salt: &[u8],
    id: Pkcs12KeyType,
    iterations: i32,
    len: usize,
) -> Result<Vec<u8>> {
    match form {
        PasswordForm::Bmp => {
            let derived = match digest {
                MacDigest::Sha1 => kdf::derive_key_utf8::<Sha1>(passphrase, salt, id, iterations, len),
                MacDigest::Sha256 => kdf::derive_key_utf8::<Sha256>(passphrase, salt, id, iterations, len),
                MacDigest::Sha384 => kdf::derive_key_utf8::<Sha384>(passphrase, salt, id, iterations, len),
                MacDigest::Sha512 => kdf::derive_key_utf8::<Sha512>(passphrase, salt, id, iterations, len),
            };
            // Characters outside the BMP cannot be encoded, so no container can match.
            derived.map_err(|_| Error::InvalidPassphrase)
        },
        PasswordForm::Absent => Ok(match digest {
            MacDigest::Sha1 => kdf::derive_key::<Sha1>(&[], salt, id, iterations, len),
            MacDigest::Sha256 => kdf::derive_key::<Sha256>(&[], salt, id, iterations, len),
            MacDigest::Sha384 => kdf::derive_key::<Sha384>(&[], salt, id, iterations, len),
            MacDigest::Sha512 => kdf::derive_key::<Sha512>(&[], salt, id, iterations, len),
        }),
    }
}

// ---------------------------------------------------------------------------
// Confidentiality
// ---------------------------------------------------------------------------

fn decrypt_encrypted_data(data: &EncryptedData, passphrase: &str, form: PasswordForm) -> Result<Vec<u8>> {
    let info = &data.enc_content_info;
    let ciphertext = info
        .encrypted_content
        .as_ref()
        .ok_or_else(|| missing_field("encryptedContent"))?;
    decrypt(&info.content_enc_alg, ciphertext.as_bytes(), passphrase, form)
}

fn decrypt_shrouded_key(der: &[u8], passphrase: &str, form: PasswordForm) -> Result<Vec<u8>> {
    let epki = EncryptedPrivateKeyInfo::from_der(der).map_err(malformed_der)?;
    decrypt(&epki.encryption_algorithm, epki.encrypted_data.as_bytes(), passphrase, form)
}

fn decrypt(
    algorithm: &AlgorithmIdentifierOwned,
    ciphertext: &[u8],
    passphrase: &str,
    form: PasswordForm,
) -> Result<Vec<u8>> {
    if algorithm.oid == OID_PBES2 {
        let der = algorithm.to_der().map_err(malformed_der)?;
        let scheme = pkcs5::EncryptionScheme::try_from(der.as_slice())
            .map_err(|e| Error::MalformedContainer(format!("invalid PBES2 parameters: {}", e)))?;
        return scheme.decrypt(passphrase.as_bytes(), ciphertext).map_err(|e| match e {
            pkcs5::Error::DecryptFailed => Error::InvalidPassphrase,
            other => Error::MalformedContainer(format!("PBES2: {}", other)),
        });
    }

    if algorithm.oid == PKCS_12_PBE_WITH_SHAAND3_KEY_TRIPLE_DES_CBC {
        let params = algorithm
            .parameters
            .as_ref()
            .ok_or_else(|| missing_field("PBE parameters"))?
            .decode_as::<Pkcs12PbeParams>()
            .map_err(malformed_der)?;
        let iterations = checked_iterations(params.iterations)?;
        let salt = params.salt.as_bytes();
        let key = derive_key(MacDigest::Sha1, passphrase, form, salt, Pkcs12KeyType::EncryptionKey, iterations, 24)?;
        let iv = derive_key(MacDigest::Sha1, passphrase, form, salt, Pkcs12KeyType::Iv, iterations, 8)?;
        return tdes_decrypt(&key, &iv, ciphertext);
    }

    if algorithm.oid == PKCS_12_PBEWITH_SHAAND40_BIT_RC2_CBC {
        return Err(Error::MalformedContainer(
            "RC2-40 encryption is not supported; re-export the container with AES or 3DES".to_string(),
        ));
    }

    Err(Error::MalformedContainer(format!("unsupported encryption algorithm {}", algorithm.oid)))
}

/// 3DES-CBC decryption with PKCS#7 padding removal.
///
/// A padding failure means the derived key was wrong.
fn tdes_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % 8 != 0 {
        return Err(Error::MalformedContainer(
            "3DES ciphertext length must be a non-zero multiple of 8".to_string(),
        ));
    }

    let cipher = TdesCbcDec::new_from_slices(key, iv)
        .map_err(|_| Error::MalformedContainer("invalid 3DES key or IV length".to_string()))?;
    let mut buffer = data.to_vec();
    let decrypted = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| Error::MalformedContainer("3DES decryption failed".to_string()))?;

    let padding_len = decrypted[decrypted.len() - 1] as usize;
    if padding_len == 0 || padding_len > 8 {
        return Err(Error::InvalidPassphrase);
    }
    let data_len = decrypted.len() - padding_len;
    if decrypted[data_len..].iter().any(|b| *b as usize != padding_len) {
        return Err(Error::InvalidPassphrase);
    }
    Ok(decrypted[..data_len].to_vec())
}
