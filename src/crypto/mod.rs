//! Cryptographic building blocks for PDF signing.
//!
//! - [`asn1`]: DER writer and BER reader used by the CMS code
//! - [`pkcs12`]: key and certificate extraction from PFX containers
//! - [`certificate`]: X.509 inspection
//! - [`keys`]: RSA and ECDSA P-256 signing and verification

pub mod asn1;
pub mod certificate;
pub mod keys;
pub mod pkcs12;

pub use certificate::{validate_bundle, Certificate, CertificateReport, DistinguishedName};
pub use keys::{PrivateKey, PublicKey};
pub use self::pkcs12::{extract, load_pem_bundle, CertificateBundle, SafeBag};
