//! Incremental update that reserves room for a signature.
//!
//! The original bytes are copied unchanged and a new revision is appended:
//! the signature dictionary, a widget annotation for the signature field,
//! updated versions of the first page and of the catalog, a cross-reference
//! section of the same kind as the previous one, and a trailer pointing back
//! with `/Prev`.
//!
//! ISO 32000-1:2008 Section 7.5.6 (incremental updates) and 12.8.1.

use crate::document::PdfFile;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::signatures::byterange::{byte_range_placeholder, patch_byte_range};
use crate::signatures::types::{SignOptions, SignaturePlaceholder, SignatureSubFilter};
use crate::writer::ObjectSerializer;
use crate::xref::XrefKind;
use chrono::{DateTime, Utc};

/// Widget annotation flags: Print (4) + Locked (128).
const WIDGET_FLAGS: i64 = 132;

/// AcroForm `/SigFlags`: SignaturesExist (1) + AppendOnly (2).
const SIG_FLAGS: i64 = 3;

/// Format a time as a PDF date string in UTC.
pub fn format_pdf_date(time: &DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Parse a PDF date string (`D:YYYYMMDDHHmmSSOHH'mm'`), tolerating missing fields.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<Utc>> {
    let s = text.trim().strip_prefix("D:").unwrap_or(text.trim());
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    let field = |start: usize, len: usize, default: u32| -> u32 {
        digits
            .get(start..start + len)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    };
    let year = digits.get(0..4)?.parse::<i32>().ok()?;
    let naive = chrono::NaiveDate::from_ymd_opt(year, field(4, 2, 1), field(6, 2, 1))?
        .and_hms_opt(field(8, 2, 0), field(10, 2, 0), field(12, 2, 0))?;

    let rest = &s[digits.len()..];
    let offset_secs = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz: String = rest[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let hours: i64 = tz.get(0..2).and_then(|v| v.parse().ok()).unwrap_or(0);
            let minutes: i64 = tz.get(2..4).and_then(|v| v.parse().ok()).unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            if sign == '+' {
                secs
            } else {
                -secs
            }
        },
        _ => 0,
    };
    Some(naive.and_utc() - chrono::Duration::seconds(offset_secs))
}

/// Append a signature revision to `pdf`.
///
/// Returns the prepared document, with `/ByteRange` already final and
/// `/Contents` holding `2 * reserved_length` zeros, and the location of
/// the reservation.
pub fn insert_placeholder(pdf: &[u8], options: &SignOptions) -> Result<(Vec<u8>, SignaturePlaceholder)> {
    if options.reserved_length == 0 {
        return Err(Error::PlaceholderTooSmall {
            required: 1,
            reserved: 0,
        });
    }

    let file = PdfFile::parse_with_depth(pdf, options.max_xref_depth)?;
    if file.is_encrypted() {
        return Err(Error::UnsupportedPdfStructure(
            "encrypted documents cannot be signed incrementally".to_string(),
        ));
    }

    let (root_ref, catalog) = file
        .catalog()
        .map_err(|e| Error::UnsupportedPdfStructure(format!("cannot read catalog: {}", e)))?;
    let (page_ref, page) = file
        .first_page()
        .map_err(|e| Error::UnsupportedPdfStructure(format!("cannot read first page: {}", e)))?;

    let first_new = file.next_object_id();
    let sig_ref = ObjectRef::new(first_new, 0);
    let widget_ref = ObjectRef::new(first_new + 1, 0);
    let signing_time = options.signing_time.unwrap_or_else(Utc::now);

    let mut acroform = match catalog.get("AcroForm") {
        Some(obj) => file.resolve_dict(obj)?,
        None => Dictionary::new(),
    };
    let mut fields = match acroform.get("Fields") {
        Some(obj) => file.resolve(obj)?.as_array().cloned().unwrap_or_default(),
        None => Vec::new(),
    };
    let field_name = unique_field_name(&file, &fields, &options.field_name);
    fields.push(Object::Reference(widget_ref));
    acroform.insert("Fields".to_string(), Object::Array(fields));
    acroform.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));

    let mut updated_catalog = catalog;
    updated_catalog.insert("AcroForm".to_string(), Object::Dictionary(acroform));

    let mut annots = match page.get("Annots") {
        Some(obj) => file.resolve(obj)?.as_array().cloned().unwrap_or_default(),
        None => Vec::new(),
    };
    annots.push(Object::Reference(widget_ref));
    let mut updated_page = page;
    updated_page.insert("Annots".to_string(), Object::Array(annots));

    let widget = ObjectSerializer::dict(vec![
        ("Type", ObjectSerializer::name("Annot")),
        ("Subtype", ObjectSerializer::name("Widget")),
        ("FT", ObjectSerializer::name("Sig")),
        ("T", ObjectSerializer::text(&field_name)),
        ("V", ObjectSerializer::reference(sig_ref)),
        ("F", ObjectSerializer::integer(WIDGET_FLAGS)),
        ("P", ObjectSerializer::reference(page_ref)),
        ("Rect", Object::Array(vec![Object::Integer(0); 4])),
    ]);

    let mut out = Vec::with_capacity(pdf.len() + options.reserved_length * 2 + 4096);
    out.extend_from_slice(pdf);
    if !matches!(pdf.last(), Some(b'\n') | Some(b'\r')) {
        out.push(b'\n');
    }

    let serializer = ObjectSerializer::compact();
    let mut entries: Vec<(u32, usize)> = Vec::new();

    entries.push((sig_ref.id, out.len()));
    let placeholder = write_signature_dictionary(&mut out, sig_ref.id, options, &signing_time);

    entries.push((widget_ref.id, out.len()));
    out.extend(serializer.serialize_indirect(widget_ref.id, 0, &widget));

    entries.push((page_ref.id, out.len()));
    out.extend(serializer.serialize_indirect(page_ref.id, page_ref.gen, &Object::Dictionary(updated_page)));

    entries.push((root_ref.id, out.len()));
    out.extend(serializer.serialize_indirect(root_ref.id, root_ref.gen, &Object::Dictionary(updated_catalog)));

    let generations = [
        (sig_ref.id, 0u16),
        (widget_ref.id, 0),
        (page_ref.id, page_ref.gen),
        (root_ref.id, root_ref.gen),
    ];

    let trailer = trailer_entries(file.trailer(), root_ref, file.startxref());
    match file.xref_kind() {
        XrefKind::Table => write_xref_table(&mut out, &entries, &generations, first_new + 2, trailer),
        XrefKind::Stream => write_xref_stream(&mut out, &mut entries, first_new + 2, trailer, &generations)?,
    }

    patch_byte_range(&mut out, &placeholder)?;

    log::info!(
        "Appended signature revision: {} -> {} bytes, field {:?}, {:?} xref",
        pdf.len(),
        out.len(),
        field_name,
        file.xref_kind()
    );
    Ok((out, placeholder))
}

/// Write the `/Sig` dictionary and return where its reserved tokens live.
fn write_signature_dictionary(
    out: &mut Vec<u8>,
    id: u32,
    options: &SignOptions,
    signing_time: &DateTime<Utc>,
) -> SignaturePlaceholder {
    let serializer = ObjectSerializer::compact();
    let text = |s: &str| serializer.serialize(&ObjectSerializer::text(s));

    out.extend_from_slice(format!("{} 0 obj\n<< /Type /Sig /Filter /Adobe.PPKLite /SubFilter /", id).as_bytes());
    out.extend_from_slice(SignatureSubFilter::Pkcs7Detached.as_pdf_name().as_bytes());

    out.extend_from_slice(b" /ByteRange ");
    let byte_range_offset = out.len();
    out.extend_from_slice(byte_range_placeholder().as_bytes());

    out.extend_from_slice(b" /Contents ");
    let gap_start = out.len();
    out.push(b'<');
    out.resize(out.len() + options.reserved_length * 2, b'0');
    out.push(b'>');
    let gap_end = out.len();

    out.extend_from_slice(b" /Reason ");
    out.extend(text(&options.reason));
    out.extend_from_slice(b" /Location ");
    out.extend(text(&options.location));
    out.extend_from_slice(b" /ContactInfo ");
    out.extend(text(options.contact_info.as_deref().unwrap_or("")));
    if let Some(name) = &options.name {
        out.extend_from_slice(b" /Name ");
        out.extend(text(name));
    }
    out.extend_from_slice(b" /M ");
    out.extend(text(&format_pdf_date(signing_time)));
    out.extend_from_slice(b" >>\nendobj\n");

    SignaturePlaceholder {
        gap_start,
        gap_end,
        reserved_length: options.reserved_length,
        byte_range_offset,
    }
}

/// `base`, or the next free `PrefixN` when a field already uses it.
fn unique_field_name(file: &PdfFile<'_>, fields: &[Object], base: &str) -> String {
    let taken: Vec<String> = fields
        .iter()
        .filter_map(|f| file.resolve_dict(f).ok())
        .filter_map(|d| d.get("T").and_then(|t| t.as_text()))
        .collect();
    if !taken.iter().any(|t| t == base) {
        return base.to_string();
    }
    let prefix = base.trim_end_matches(|c: char| c.is_ascii_digit());
    (2..)
        .map(|n| format!("{}{}", prefix, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Trailer keys carried into the new revision.
fn trailer_entries(previous: &Dictionary, root: ObjectRef, prev_offset: usize) -> Dictionary {
    let mut trailer = Dictionary::new();
    trailer.insert("Root".to_string(), Object::Reference(root));
    trailer.insert("Prev".to_string(), Object::Integer(prev_offset as i64));
    for key in ["Info", "ID"] {
        if let Some(value) = previous.get(key) {
            trailer.insert(key.to_string(), value.clone());
        }
    }
    trailer
}

/// Group sorted object numbers into `(first, count)` subsections.
fn subsections(ids: &[u32]) -> Vec<(u32, u32)> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &id in ids {
        match runs.last_mut() {
            Some((first, count)) if *first + *count == id => *count += 1,
            _ => runs.push((id, 1)),
        }
    }
    runs
}

fn write_xref_table(
    out: &mut Vec<u8>,
    entries: &[(u32, usize)],
    generations: &[(u32, u16)],
    min_size: u32,
    mut trailer: Dictionary,
) {
    let mut sorted = entries.to_vec();
    sorted.sort();
    let ids: Vec<u32> = sorted.iter().map(|(id, _)| *id).collect();

    let xref_offset = out.len();
    out.extend_from_slice(b"xref\n");
    let mut rows = sorted.iter();
    for (first, count) in subsections(&ids) {
        out.extend_from_slice(format!("{} {}\n", first, count).as_bytes());
        for (id, offset) in rows.by_ref().take(count as usize) {
            let gen = generation_of(generations, *id);
            out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes());
        }
    }

    let size = trailer_size(&ids, min_size);
    trailer.insert("Size".to_string(), Object::Integer(size as i64));
    out.extend_from_slice(b"trailer\n");
    out.extend(ObjectSerializer::compact().serialize(&Object::Dictionary(trailer)));
    out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
}

fn write_xref_stream(
    out: &mut Vec<u8>,
    entries: &mut Vec<(u32, usize)>,
    xref_id: u32,
    mut trailer: Dictionary,
    generations: &[(u32, u16)],
) -> Result<()> {
    let xref_offset = out.len();
    entries.push((xref_id, xref_offset));
    entries.sort();
    let ids: Vec<u32> = entries.iter().map(|(id, _)| *id).collect();

    let mut data = Vec::with_capacity(entries.len() * 7);
    for (id, offset) in entries.iter() {
        let offset = u32::try_from(*offset).map_err(|_| {
            Error::UnsupportedPdfStructure("document too large for a 4-byte xref offset".to_string())
        })?;
        data.push(1u8);
        data.extend_from_slice(&offset.to_be_bytes());
        data.extend_from_slice(&generation_of(generations, *id).to_be_bytes());
    }

    let index: Vec<Object> = subsections(&ids)
        .into_iter()
        .flat_map(|(first, count)| [Object::Integer(first as i64), Object::Integer(count as i64)])
        .collect();

    let size = trailer_size(&ids, xref_id + 1);
    trailer.insert("Type".to_string(), ObjectSerializer::name("XRef"));
    trailer.insert("Size".to_string(), Object::Integer(size as i64));
    trailer.insert(
        "W".to_string(),
        Object::Array(vec![Object::Integer(1), Object::Integer(4), Object::Integer(2)]),
    );
    trailer.insert("Index".to_string(), Object::Array(index));

    let stream = Object::Stream {
        dict: trailer,
        data: bytes::Bytes::from(data),
    };
    out.extend(ObjectSerializer::compact().serialize_indirect(xref_id, 0, &stream));
    out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    Ok(())
}

fn generation_of(generations: &[(u32, u16)], id: u32) -> u16 {
    generations
        .iter()
        .find(|(candidate, _)| *candidate == id)
        .map(|(_, gen)| *gen)
        .unwrap_or(0)
}

fn trailer_size(ids: &[u32], min_size: u32) -> u32 {
    ids.iter().map(|id| id + 1).max().unwrap_or(0).max(min_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::byterange::BYTE_RANGE_WIDTH;
    use chrono::TimeZone;

    fn build_pdf(objects: &[&str]) -> Vec<u8> {
        let mut out = b"%PDF-1.7\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for off in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R /ID [<AA> <BB>] >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_at
            )
            .as_bytes(),
        );
        out
    }

    fn simple_pdf() -> Vec<u8> {
        build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
        ])
    }

    fn options() -> SignOptions {
        SignOptions::default()
            .with_reserved_length(64)
            .with_signing_time(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap())
    }

    #[test]
    fn test_pdf_date_format() {
        let t = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(format_pdf_date(&t), "D:20240506070809+00'00'");
        assert_eq!(parse_pdf_date("D:20240506070809+00'00'"), Some(t));
        assert_eq!(parse_pdf_date("D:20240506100809+03'00'"), Some(t));
        assert_eq!(parse_pdf_date("D:20240506070809Z"), Some(t));
        assert_eq!(
            parse_pdf_date("D:2024"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_pdf_date("garbage"), None);
    }

    #[test]
    fn test_insert_placeholder_layout() {
        let pdf = simple_pdf();
        let (prepared, placeholder) = insert_placeholder(&pdf, &options()).unwrap();

        assert_eq!(&prepared[..pdf.len()], &pdf[..]);
        assert_eq!(prepared[placeholder.gap_start], b'<');
        assert_eq!(prepared[placeholder.gap_end - 1], b'>');
        assert_eq!(placeholder.gap_end - placeholder.gap_start, 64 * 2 + 2);
        assert_eq!(placeholder.reserved_length, 64);

        let text = String::from_utf8_lossy(&prepared).into_owned();
        let br = &text[placeholder.byte_range_offset..placeholder.byte_range_offset + BYTE_RANGE_WIDTH];
        let expected = format!(
            "[0 {} {} {}",
            placeholder.gap_start,
            placeholder.gap_end,
            prepared.len() - placeholder.gap_end
        );
        assert!(br.starts_with(&expected), "{}", br);

        assert!(text.contains("/SubFilter /adbe.pkcs7.detached"));
        assert!(text.contains("/Reason (Assinatura Digital ICP-Brasil)"));
        assert!(text.contains("/M (D:20240506070809+00'00')"));
        assert!(text.contains("/FT /Sig"));
        assert!(text.contains("/F 132"));
        assert!(text.contains("/SigFlags 3"));
        assert!(text.contains("/Prev "));
        assert!(text.contains("/ID [<AA> <BB>]"));
        assert!(text.ends_with("%%EOF\n"));
    }

    #[test]
    fn test_prepared_document_reparses() {
        let pdf = simple_pdf();
        let (prepared, _) = insert_placeholder(&pdf, &options()).unwrap();

        let file = PdfFile::parse(&prepared).unwrap();
        let (_, catalog) = file.catalog().unwrap();
        let acroform = file.resolve_dict(&catalog["AcroForm"]).unwrap();
        let fields = acroform["Fields"].as_array().unwrap();
        assert_eq!(fields.len(), 1);

        let widget = file.resolve_dict(&fields[0]).unwrap();
        assert_eq!(widget["T"].as_text().as_deref(), Some("Signature1"));
        let sig = file.resolve_dict(&widget["V"]).unwrap();
        assert_eq!(sig["Type"].as_name(), Some("Sig"));
        assert_eq!(sig["ByteRange"].as_array().map(|a| a.len()), Some(4));

        let (_, page) = file.first_page().unwrap();
        assert_eq!(page["Annots"].as_array().map(|a| a.len()), Some(1));
        assert_eq!(file.trailer()["Size"].as_integer(), Some(6));
    }

    #[test]
    fn test_existing_annots_and_fields_kept() {
        let pdf = build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R /AcroForm 5 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /Annots 4 0 R >>",
            "[6 0 R]",
            "<< /Fields [6 0 R] /DA (/Helv 0 Tf 0 g) >>",
            "<< /Type /Annot /Subtype /Widget /FT /Tx /T (Signature1) >>",
        ]);
        let (prepared, _) = insert_placeholder(&pdf, &options()).unwrap();
        let file = PdfFile::parse(&prepared).unwrap();

        let (_, page) = file.first_page().unwrap();
        assert_eq!(page["Annots"].as_array().map(|a| a.len()), Some(2));

        let (_, catalog) = file.catalog().unwrap();
        let acroform = file.resolve_dict(&catalog["AcroForm"]).unwrap();
        assert!(acroform.contains_key("DA"));
        let fields = acroform["Fields"].as_array().unwrap();
        assert_eq!(fields.len(), 2);
        let widget = file.resolve_dict(&fields[1]).unwrap();
        assert_eq!(widget["T"].as_text().as_deref(), Some("Signature2"));
    }

    #[test]
    fn test_missing_trailing_newline() {
        let mut pdf = simple_pdf();
        pdf.pop();
        let (prepared, _) = insert_placeholder(&pdf, &options()).unwrap();
        assert_eq!(&prepared[..pdf.len()], &pdf[..]);
        assert_eq!(prepared[pdf.len()], b'\n');
    }

    #[test]
    fn test_encrypted_document_rejected() {
        let pdf = build_pdf(&["<< /Type /Catalog /Pages 2 0 R >>"]);
        let text = String::from_utf8(pdf).unwrap().replace("/ID [<AA> <BB>]", "/Encrypt 9 0 R");
        let err = insert_placeholder(text.as_bytes(), &options()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPdfStructure(_)));
    }

    #[test]
    fn test_not_a_pdf() {
        let err = insert_placeholder(b"hello", &options()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPdfStructure(_)));
    }

    #[test]
    fn test_zero_reservation() {
        let err = insert_placeholder(&simple_pdf(), &options().with_reserved_length(0)).unwrap_err();
        assert!(matches!(err, Error::PlaceholderTooSmall { .. }));
    }

    fn xref_stream_pdf() -> Vec<u8> {
        let bodies = [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
        ];
        let mut out = b"%PDF-1.5\n".to_vec();
        let mut rows = vec![0u8, 0, 0, 0, 0, 0xFF, 0xFF];
        for (i, body) in bodies.iter().enumerate() {
            rows.push(1);
            rows.extend_from_slice(&(out.len() as u32).to_be_bytes());
            rows.extend_from_slice(&[0, 0]);
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_at = out.len();
        rows.push(1);
        rows.extend_from_slice(&(xref_at as u32).to_be_bytes());
        rows.extend_from_slice(&[0, 0]);
        out.extend_from_slice(
            format!(
                "4 0 obj\n<< /Type /XRef /Size 5 /W [1 4 2] /Root 1 0 R /Length {} >>\nstream\n",
                rows.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(&rows);
        out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_at).as_bytes());
        out
    }

    #[test]
    fn test_xref_stream_document() {
        let pdf = xref_stream_pdf();
        assert_eq!(PdfFile::parse(&pdf).unwrap().xref_kind(), XrefKind::Stream);

        let (prepared, _) = insert_placeholder(&pdf, &options()).unwrap();
        let file = PdfFile::parse(&prepared).unwrap();
        assert_eq!(file.xref_kind(), XrefKind::Stream);
        assert_eq!(file.trailer()["Size"].as_integer(), Some(8));
        assert_eq!(file.trailer()["Prev"].as_integer(), Some(PdfFile::parse(&pdf).unwrap().startxref() as i64));

        let (_, catalog) = file.catalog().unwrap();
        assert!(catalog.contains_key("AcroForm"));
        let (_, page) = file.first_page().unwrap();
        assert_eq!(page["Annots"].as_array().map(|a| a.len()), Some(1));
        // Objects from the first revision still resolve through /Prev
        assert!(file.load_object(ObjectRef::new(2, 0)).is_ok());
    }

    #[test]
    fn test_subsections() {
        assert_eq!(subsections(&[1, 4, 5, 6, 9]), vec![(1, 1), (4, 3), (9, 1)]);
        assert!(subsections(&[]).is_empty());
    }
}
