//! Shared document and certificate fixtures for integration tests.

#![allow(dead_code)]

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

pub const PASSWORD: &str = "test123";

pub const RSA_PBES2_P12: &[u8] = include_bytes!("../fixtures/rsa_pbes2.p12");
pub const RSA_LEGACY_P12: &[u8] = include_bytes!("../fixtures/rsa_legacy.p12");
pub const EC_P12: &[u8] = include_bytes!("../fixtures/ec_p256.p12");
pub const CHAIN_P12: &[u8] = include_bytes!("../fixtures/chain.p12");
pub const EXPIRED_P12: &[u8] = include_bytes!("../fixtures/expired.p12");

const PAGE_BODIES: [&str; 3] = [
    "<< /Type /Catalog /Pages 2 0 R >>",
    "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>",
];

const CONTENT: &str = "BT /F1 12 Tf 72 720 Td (Contrato) Tj ET";

/// One-page document with a classic xref table.
pub fn table_pdf() -> Vec<u8> {
    let mut out = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in PAGE_BODIES.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    offsets.push(out.len());
    out.extend_from_slice(
        format!("4 0 obj\n<< /Length {} >>\nstream\n{}\nendstream\nendobj\n", CONTENT.len(), CONTENT).as_bytes(),
    );

    let xref_at = out.len();
    out.extend_from_slice(b"xref\n0 5\n0000000000 65535 f \n");
    for off in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size 5 /Root 1 0 R /ID [<0123456789ABCDEF> <0123456789ABCDEF>] >>\nstartxref\n{}\n%%EOF\n",
            xref_at
        )
        .as_bytes(),
    );
    out
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Document whose catalog and page tree live in an object stream,
/// indexed by a compressed cross-reference stream.
pub fn object_stream_pdf() -> Vec<u8> {
    object_stream_pdf_with(|_| {})
}

/// Like [`object_stream_pdf`], with the xref rows `(type, field2, field3)`
/// rewritten by `edit` before they are encoded.
pub fn object_stream_pdf_with(edit: impl FnOnce(&mut Vec<(u8, u32, u16)>)) -> Vec<u8> {
    let mut header = String::new();
    let mut objects = String::new();
    for (i, body) in PAGE_BODIES.iter().enumerate() {
        header.push_str(&format!("{} {} ", i + 1, objects.len()));
        objects.push_str(body);
        objects.push('\n');
    }
    let objstm_data = deflate(format!("{}{}", header, objects).as_bytes());

    let mut out = b"%PDF-1.5\n".to_vec();
    let content_at = out.len();
    out.extend_from_slice(
        format!("4 0 obj\n<< /Length {} >>\nstream\n{}\nendstream\nendobj\n", CONTENT.len(), CONTENT).as_bytes(),
    );
    let objstm_at = out.len();
    out.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /ObjStm /N 3 /First {} /Filter /FlateDecode /Length {} >>\nstream\n",
            header.len(),
            objstm_data.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&objstm_data);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    let xref_at = out.len();
    // type(1) field2(4) field3(2)
    let mut rows: Vec<(u8, u32, u16)> = vec![
        (0, 0, 0xFFFF),
        (2, 5, 0),
        (2, 5, 1),
        (2, 5, 2),
        (1, content_at as u32, 0),
        (1, objstm_at as u32, 0),
        (1, xref_at as u32, 0),
    ];
    edit(&mut rows);
    let mut raw = Vec::new();
    for (kind, field2, field3) in rows {
        raw.push(kind);
        raw.extend_from_slice(&field2.to_be_bytes());
        raw.extend_from_slice(&field3.to_be_bytes());
    }
    let xref_data = deflate(&raw);
    out.extend_from_slice(
        format!(
            "6 0 obj\n<< /Type /XRef /Size 7 /W [1 4 2] /Root 1 0 R /Filter /FlateDecode /Length {} >>\nstream\n",
            xref_data.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&xref_data);
    out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_at).as_bytes());
    out
}
