//! Tests for the `pdf-seal` binary.

mod common;

use common::*;
use std::path::Path;
use std::process::{Command, Output};

fn pdf_seal(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pdf-seal"))
        .args(args)
        .env_remove("CERTIFICATE_PATH")
        .env_remove("CERTIFICATE_PASSWORD")
        .env_remove("SIGNATURE_REASON")
        .env_remove("SIGNATURE_LOCATION")
        .output()
        .expect("failed to run pdf-seal")
}

fn write(dir: &Path, name: &str, data: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path.to_string_lossy().into_owned()
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_sign_then_verify() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "in.pdf", &table_pdf());
    let cert = write(dir.path(), "signer.p12", RSA_PBES2_P12);
    let output = dir.path().join("out.pdf").to_string_lossy().into_owned();

    let signed = pdf_seal(&[
        "sign", &input, &output, "--cert", &cert, "--password", PASSWORD, "--reason", "Test", "--location", "BR",
    ]);
    assert!(signed.status.success(), "{}", String::from_utf8_lossy(&signed.stderr));
    assert_eq!(json(&signed)["signer"], "Test Signer");

    let verified = pdf_seal(&["verify", &output]);
    assert!(verified.status.success());
    let report = json(&verified);
    assert_eq!(report["is_valid"], true);
    assert_eq!(report["reason"], "Test");
    assert_eq!(report["signer"]["common_name"], "Test Signer");

    let all = pdf_seal(&["verify", &output, "--all"]);
    assert!(all.status.success());
    assert_eq!(json(&all).as_array().map(Vec::len), Some(1));
}

#[test]
fn test_certificate_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "in.pdf", &table_pdf());
    let cert = write(dir.path(), "signer.p12", EC_P12);
    let output = dir.path().join("out.pdf").to_string_lossy().into_owned();

    let status = Command::new(env!("CARGO_BIN_EXE_pdf-seal"))
        .args(["sign", &input, &output])
        .env("CERTIFICATE_PATH", &cert)
        .env("CERTIFICATE_PASSWORD", PASSWORD)
        .env("SIGNATURE_REASON", "Aprovado")
        .output()
        .unwrap();
    assert!(status.status.success(), "{}", String::from_utf8_lossy(&status.stderr));
    assert_eq!(json(&pdf_seal(&["verify", &output]))["reason"], "Aprovado");
}

#[test]
fn test_inspect_container() {
    let dir = tempfile::tempdir().unwrap();
    let cert = write(dir.path(), "chain.p12", CHAIN_P12);

    let out = pdf_seal(&["inspect", &cert, "--password", PASSWORD]);
    assert!(out.status.success());
    let report = json(&out);
    assert_eq!(report["key_algorithm"], "RSA");
    assert_eq!(report["certificate"]["subject"]["CN"], "Chain Signer");
    assert_eq!(report["chain"].as_array().map(Vec::len), Some(1));
    assert_eq!(report["validation"]["icp_brasil"], true);
}

#[test]
fn test_tampered_file_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    let mut signed = pdf_seal::sign(&table_pdf(), RSA_PBES2_P12, PASSWORD, &Default::default()).unwrap();
    let pos = signed.windows(8).position(|w| w == b"Contrato").unwrap();
    signed[pos] = b'X';
    let path = write(dir.path(), "tampered.pdf", &signed);

    let out = pdf_seal(&["verify", &path]);
    assert!(!out.status.success());
    assert_eq!(json(&out)["is_valid"], false);
}

#[test]
fn test_wrong_password_and_usage() {
    let dir = tempfile::tempdir().unwrap();
    let cert = write(dir.path(), "signer.p12", RSA_PBES2_P12);

    let out = pdf_seal(&["inspect", &cert, "--password", "nope"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Invalid passphrase"));

    let usage = pdf_seal(&["frobnicate"]);
    assert_eq!(usage.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&usage.stderr).contains("usage"));
}

#[test]
fn test_max_xref_depth_flag() {
    let dir = tempfile::tempdir().unwrap();
    let once = pdf_seal::sign(&table_pdf(), RSA_PBES2_P12, PASSWORD, &Default::default()).unwrap();
    let input = write(dir.path(), "once.pdf", &once);
    let cert = write(dir.path(), "signer.p12", RSA_PBES2_P12);
    let output = dir.path().join("twice.pdf").to_string_lossy().into_owned();

    let limited = pdf_seal(&["sign", &input, &output, "--cert", &cert, "--password", PASSWORD, "--max-xref-depth", "0"]);
    assert!(!limited.status.success());
    assert!(String::from_utf8_lossy(&limited.stderr).contains("Unsupported PDF structure"));

    let signed = pdf_seal(&["sign", &input, &output, "--cert", &cert, "--password", PASSWORD, "--max-xref-depth", "4"]);
    assert!(signed.status.success(), "{}", String::from_utf8_lossy(&signed.stderr));

    let all = pdf_seal(&["verify", &output, "--all", "--max-xref-depth", "4"]);
    assert!(all.status.success());
    assert_eq!(json(&all).as_array().map(Vec::len), Some(2));

    let bad = pdf_seal(&["verify", &output, "--max-xref-depth", "deep"]);
    assert_eq!(bad.status.code(), Some(2));
}
