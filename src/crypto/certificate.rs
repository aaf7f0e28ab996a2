//! X.509 certificate inspection.
//!
//! [`Certificate`] keeps the DER encoding together with the views the signer
//! and verifier need: distinguished names, validity window, serial number,
//! raw issuer Name and SubjectPublicKeyInfo.

use crate::crypto::pkcs12::CertificateBundle;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use x509_parser::objects::{oid2abbrev, oid_registry};
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

/// Ordered distinguished name: attribute short name to value.
///
/// Repeated attributes (several `OU`, for instance) are joined with `", "`.
pub type DistinguishedName = IndexMap<String, String>;

/// Issuer markers of the Brazilian public key infrastructure.
const ICP_BRASIL_ISSUERS: &[&str] = &[
    "ICP-Brasil",
    "Autoridade Certificadora da Receita Federal do Brasil",
    "AC da RFB",
    "Autoridade Certificadora Raiz Brasileira",
];

/// A parsed X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    subject: DistinguishedName,
    issuer: DistinguishedName,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    serial: Vec<u8>,
    issuer_der: Vec<u8>,
    spki_der: Vec<u8>,
}

impl Certificate {
    /// Parse a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (rest, x509) = X509Certificate::from_der(der)
            .map_err(|e| Error::MalformedCertificate(e.to_string()))?;
        let der = &der[..der.len() - rest.len()];

        let validity = x509.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;

        Ok(Self {
            der: der.to_vec(),
            subject: name_map(x509.subject()),
            issuer: name_map(x509.issuer()),
            not_before,
            not_after,
            serial: x509.tbs_certificate.raw_serial().to_vec(),
            issuer_der: x509.tbs_certificate.issuer.as_raw().to_vec(),
            spki_der: x509.public_key().raw.to_vec(),
        })
    }

    /// Parse the first `CERTIFICATE` block of a PEM document.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Self::all_from_pem(pem)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::MalformedCertificate("no CERTIFICATE block in PEM input".to_string()))
    }

    /// Parse every `CERTIFICATE` block of a PEM document, in order.
    pub fn all_from_pem(pem: &[u8]) -> Result<Vec<Self>> {
        let mut certs = Vec::new();
        for block in x509_parser::pem::Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| Error::MalformedCertificate(format!("invalid PEM: {}", e)))?;
            if block.label == "CERTIFICATE" {
                certs.push(Self::from_der(&block.contents)?);
            }
        }
        Ok(certs)
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    /// Issuer distinguished name.
    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    /// `(not_before, not_after)`.
    pub fn validity_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.not_before, self.not_after)
    }

    /// Whether `now` falls inside the validity window, bounds included.
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        now >= self.not_before && now <= self.not_after
    }

    /// Subject common name, if present.
    pub fn common_name(&self) -> Option<&str> {
        self.subject.get("CN").map(String::as_str)
    }

    /// Serial number content octets as encoded in the certificate.
    pub fn serial_bytes(&self) -> &[u8] {
        &self.serial
    }

    /// Serial number as upper-case hex without leading zero octets.
    pub fn serial_hex(&self) -> String {
        let digits: Vec<u8> = self.serial.iter().copied().skip_while(|b| *b == 0).collect();
        if digits.is_empty() {
            return "00".to_string();
        }
        digits.iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// Issuer `Name` DER, for IssuerAndSerialNumber.
    pub fn issuer_der(&self) -> &[u8] {
        &self.issuer_der
    }

    /// SubjectPublicKeyInfo DER.
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Whether the issuer belongs to the ICP-Brasil hierarchy.
    pub fn is_icp_brasil(&self) -> bool {
        ["O", "CN"].iter().any(|field| {
            self.issuer
                .get(*field)
                .map(|value| ICP_BRASIL_ISSUERS.iter().any(|marker| value.contains(marker)))
                .unwrap_or(false)
        })
    }

    /// Whether `issuer_der` and `serial` identify this certificate.
    pub fn matches_issuer_serial(&self, issuer_der: &[u8], serial: &[u8]) -> bool {
        fn strip(bytes: &[u8]) -> &[u8] {
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            &bytes[skip..]
        }
        self.issuer_der == issuer_der && strip(&self.serial) == strip(serial)
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| Error::MalformedCertificate(format!("validity time out of range: {}", secs)))
}

fn name_map(name: &X509Name<'_>) -> DistinguishedName {
    let mut map = DistinguishedName::new();
    for rdn in name.iter() {
        for attr in rdn.iter() {
            let key = oid2abbrev(attr.attr_type(), oid_registry())
                .map(str::to_string)
                .unwrap_or_else(|_| attr.attr_type().to_id_string());
            let value = match attr.as_str() {
                Ok(s) => s.to_string(),
                Err(_) => String::from_utf8_lossy(&attr.attr_value().data).into_owned(),
            };
            map.entry(key)
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
    }
    map
}

/// Outcome of [`validate_bundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateReport {
    /// Inside the validity window and without errors
    pub valid: bool,
    /// `now` is past notAfter
    pub expired: bool,
    /// `now` is before notBefore
    pub not_yet_valid: bool,
    /// Issued under ICP-Brasil
    pub icp_brasil: bool,
    /// Human-readable findings
    pub errors: Vec<String>,
}

/// Check the leaf certificate of `bundle` against `now`.
///
/// Signing does not require a valid report; callers decide what to enforce.
pub fn validate_bundle(bundle: &CertificateBundle, now: DateTime<Utc>) -> CertificateReport {
    let leaf = bundle.leaf();
    let (not_before, not_after) = leaf.validity_window();
    let mut errors = Vec::new();

    let expired = now > not_after;
    if expired {
        errors.push(format!("certificate expired on {}", not_after.to_rfc3339()));
    }
    let not_yet_valid = now < not_before;
    if not_yet_valid {
        errors.push(format!("certificate not valid before {}", not_before.to_rfc3339()));
    }
    for cert in bundle.chain() {
        if !cert.is_within_validity(now) {
            errors.push(format!(
                "chain certificate {} is outside its validity window",
                cert.common_name().unwrap_or("(no CN)")
            ));
        }
    }

    let report = CertificateReport {
        valid: errors.is_empty(),
        expired,
        not_yet_valid,
        icp_brasil: leaf.is_icp_brasil(),
        errors,
    };
    log::debug!(
        "Certificate report for {:?}: valid={} icp_brasil={}",
        leaf.common_name(),
        report.valid,
        report.icp_brasil
    );
    report
}
