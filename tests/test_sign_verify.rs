//! End-to-end signing and verification.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::*;
use pdf_seal::document::PdfFile;
use pdf_seal::signatures::byterange::{self, embed};
use pdf_seal::signatures::{insert_placeholder, cms, DigestAlgorithm, SignOptions};
use pdf_seal::xref::XrefKind;
use pdf_seal::{sign, verify, verify_all, Error, MemoryStore, PdfSigner};

fn options() -> SignOptions {
    SignOptions::default().with_reason("Test").with_location("BR")
}

#[test]
fn test_rsa_pbes2_round_trip() {
    let pdf = table_pdf();
    let signed = sign(&pdf, RSA_PBES2_P12, PASSWORD, &options()).unwrap();
    let result = verify(&signed).unwrap();
    assert!(result.is_valid, "{:?}", result.problems);
    assert!(result.covers_whole_document);
}

#[test]
fn test_rsa_legacy_container_round_trip() {
    let signed = sign(&table_pdf(), RSA_LEGACY_P12, PASSWORD, &options()).unwrap();
    assert!(verify(&signed).unwrap().is_valid);
}

#[test]
fn test_ecdsa_round_trip() {
    let signed = sign(&table_pdf(), EC_P12, PASSWORD, &options()).unwrap();
    let result = verify(&signed).unwrap();
    assert!(result.is_valid, "{:?}", result.problems);
    assert_eq!(result.signer.unwrap().common_name.as_deref(), Some("EC Signer"));
}

#[test]
fn test_chain_round_trip() {
    let signed = sign(&table_pdf(), CHAIN_P12, PASSWORD, &options()).unwrap();
    let result = verify(&signed).unwrap();
    assert!(result.is_valid);
    let signer = result.signer.unwrap();
    assert_eq!(signer.common_name.as_deref(), Some("Chain Signer"));
    assert_eq!(signer.issuer.get("O").map(String::as_str), Some("ICP-Brasil"));
}

#[test]
fn test_sha384_and_sha512_with_rsa() {
    for alg in [DigestAlgorithm::Sha384, DigestAlgorithm::Sha512] {
        let signed = sign(&table_pdf(), RSA_PBES2_P12, PASSWORD, &options().with_digest_algorithm(alg)).unwrap();
        assert!(verify(&signed).unwrap().is_valid, "{}", alg);
    }
}

#[test]
fn test_concrete_scenario() {
    let before = Utc::now();
    let signed = sign(&table_pdf(), RSA_PBES2_P12, PASSWORD, &options()).unwrap();
    let result = verify(&signed).unwrap();

    assert!(result.is_valid);
    assert_eq!(result.reason.as_deref(), Some("Test"));
    assert_eq!(result.location.as_deref(), Some("BR"));
    assert_eq!(result.signer.unwrap().common_name.as_deref(), Some("Test Signer"));

    let signed_at = result.signed_at.unwrap();
    // Both encodings truncate to whole seconds
    assert!(signed_at >= before - Duration::seconds(1));
    assert!(signed_at <= Utc::now() + Duration::seconds(1));
}

#[test]
fn test_pinned_signing_time_and_contact() {
    let at = Utc.with_ymd_and_hms(2027, 3, 4, 5, 6, 7).unwrap();
    let opts = options().with_signing_time(at).with_contact_info("legal@example.com").with_name("Fulano");
    let signed = sign(&table_pdf(), RSA_PBES2_P12, PASSWORD, &opts).unwrap();
    let result = verify(&signed).unwrap();
    assert_eq!(result.signed_at, Some(at));
    assert_eq!(result.contact_info.as_deref(), Some("legal@example.com"));
    let text = String::from_utf8_lossy(&signed);
    assert!(text.contains("/M (D:20270304050607+00'00')"));
    assert!(text.contains("/Name (Fulano)"));
}

#[test]
fn test_prefix_is_untouched() {
    let pdf = table_pdf();
    let signed = sign(&pdf, RSA_PBES2_P12, PASSWORD, &options()).unwrap();
    assert_eq!(&signed[..pdf.len()], &pdf[..]);
}

#[test]
fn test_length_delta_matches_revision() {
    let pdf = table_pdf();
    let opts = options().with_signing_time(Utc::now());
    let (prepared, placeholder) = insert_placeholder(&pdf, &opts).unwrap();
    let signed = sign(&pdf, RSA_PBES2_P12, PASSWORD, &opts).unwrap();
    assert_eq!(signed.len(), prepared.len());
    assert_eq!(signed.len() - pdf.len(), prepared.len() - pdf.len());
    assert_eq!(placeholder.hex_capacity(), 2 * opts.reserved_length);
}

#[test]
fn test_reembedding_keeps_length() {
    let pdf = table_pdf();
    let signer = PdfSigner::from_pkcs12(RSA_PBES2_P12, PASSWORD, options()).unwrap();
    let opts = options().with_signing_time(Utc::now());
    let (prepared, placeholder) = insert_placeholder(&pdf, &opts).unwrap();
    let digest = byterange::digest(&prepared, &placeholder, DigestAlgorithm::Sha256).unwrap();

    let first = embed(&prepared, &placeholder, &cms::sign(&digest, signer.bundle(), &opts).unwrap()).unwrap();
    let short = embed(&prepared, &placeholder, &[0x30, 0x00]).unwrap();
    assert_eq!(first.len(), prepared.len());
    assert_eq!(short.len(), prepared.len());
    assert!(verify(&first).unwrap().is_valid);
}

#[test]
fn test_tamper_detection() {
    let pdf = table_pdf();
    let signed = sign(&pdf, RSA_PBES2_P12, PASSWORD, &options()).unwrap();
    let range = verify(&signed).unwrap().byte_range;

    // Inside the first span: the page content
    let mut first_span = signed.clone();
    let pos = first_span.windows(8).position(|w| w == b"Contrato").unwrap();
    assert!(pos < range.len1);
    first_span[pos] = b'K';
    let result = verify(&first_span).unwrap();
    assert!(!result.is_valid);
    assert!(!result.digest_matches);

    // Inside the second span: the /Reason text
    let mut second_span = signed.clone();
    let pos = second_span.windows(6).rposition(|w| w == b"(Test)").unwrap();
    assert!(pos > range.start2);
    second_span[pos + 1] = b'B';
    let result = verify(&second_span).unwrap();
    assert!(!result.is_valid);
    assert_eq!(result.reason.as_deref(), Some("Best"));
}

#[test]
fn test_appended_bytes_are_not_covered() {
    let mut signed = sign(&table_pdf(), RSA_PBES2_P12, PASSWORD, &options()).unwrap();
    signed.extend_from_slice(b"% trailing comment\n");
    let result = verify(&signed).unwrap();
    assert!(result.is_valid);
    assert!(!result.covers_whole_document);
}

#[test]
fn test_double_signing() {
    let pdf = table_pdf();
    let once = sign(&pdf, RSA_PBES2_P12, PASSWORD, &options()).unwrap();
    let inner_range = verify(&once).unwrap().byte_range;

    let twice = sign(&once, EC_P12, PASSWORD, &options().with_reason("Second")).unwrap();
    assert_eq!(&twice[..once.len()], &once[..]);

    let results = verify_all(&twice).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_valid), "{:?}", results);
    assert_eq!(results[0].byte_range, inner_range);
    assert!(!results[0].covers_whole_document);
    assert!(results[1].covers_whole_document);
    assert_eq!(results[1].reason.as_deref(), Some("Second"));

    let last = verify(&twice).unwrap();
    assert_eq!(last.signer.unwrap().common_name.as_deref(), Some("EC Signer"));

    // The second field gets a fresh name
    let text = String::from_utf8_lossy(&twice);
    assert!(text.contains("/T (Signature2)"));
}

#[test]
fn test_xref_stream_document() {
    let pdf = object_stream_pdf();
    assert_eq!(PdfFile::parse(&pdf).unwrap().xref_kind(), XrefKind::Stream);

    let signed = sign(&pdf, RSA_PBES2_P12, PASSWORD, &options()).unwrap();
    assert_eq!(PdfFile::parse(&signed).unwrap().xref_kind(), XrefKind::Stream);
    let result = verify(&signed).unwrap();
    assert!(result.is_valid, "{:?}", result.problems);
}

#[test]
fn test_expired_certificate_still_signs() {
    let signed = sign(&table_pdf(), EXPIRED_P12, PASSWORD, &options()).unwrap();
    let result = verify(&signed).unwrap();
    assert!(result.is_valid);
    let signer = result.signer.unwrap();
    assert!(signer.not_after < Utc::now());
}

#[test]
fn test_undersized_placeholder() {
    let err = sign(&table_pdf(), RSA_PBES2_P12, PASSWORD, &options().with_reserved_length(512)).unwrap_err();
    assert!(matches!(err, Error::PlaceholderTooSmall { reserved: 512, .. }));

    let pdf = table_pdf();
    let opts = options().with_reserved_length(64);
    let (prepared, placeholder) = insert_placeholder(&pdf, &opts).unwrap();
    let err = embed(&prepared, &placeholder, &[0u8; 65]).unwrap_err();
    assert!(matches!(err, Error::PlaceholderTooSmall { required: 65, reserved: 64 }));
}

#[test]
fn test_wrong_passphrase() {
    let err = sign(&table_pdf(), RSA_PBES2_P12, "wrong", &options()).unwrap_err();
    assert!(matches!(err, Error::InvalidPassphrase));
}

#[test]
fn test_garbage_container() {
    let err = sign(&table_pdf(), b"definitely not pkcs12", PASSWORD, &options()).unwrap_err();
    assert!(matches!(err, Error::MalformedContainer(_)));
}

#[test]
fn test_not_a_pdf() {
    let err = sign(b"plain text", RSA_PBES2_P12, PASSWORD, &options()).unwrap_err();
    assert!(matches!(err, Error::UnsupportedPdfStructure(_)));
}

#[test]
fn test_sign_with_memory_store() {
    let mut store = MemoryStore::new();
    store.insert("empresa", CHAIN_P12.to_vec());
    let signed = PdfSigner::sign_with_store(&table_pdf(), &store, "empresa", PASSWORD, options()).unwrap();
    assert!(verify(&signed).unwrap().is_valid);
}

#[test]
fn test_signer_shared_across_threads() {
    let signer = std::sync::Arc::new(PdfSigner::from_pkcs12(EC_P12, PASSWORD, options()).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let signer = signer.clone();
            std::thread::spawn(move || signer.sign(&table_pdf()).unwrap())
        })
        .collect();
    for handle in handles {
        assert!(verify(&handle.join().unwrap()).unwrap().is_valid);
    }
}
