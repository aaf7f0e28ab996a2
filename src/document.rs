//! Read-only view of a PDF byte buffer.
//!
//! [`PdfFile`] borrows the document bytes, parses the cross-reference chain
//! and loads objects on demand. It never mutates the buffer; the incremental
//! editor uses it to find the catalog, the first page and the numbering for
//! new objects.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object;
use crate::xref::{find_xref_offset, parse_xref, CrossRefTable, XRefEntryType, XrefKind};
use std::cell::RefCell;
use std::collections::HashMap;

/// Default bound on `/Prev` chain length.
pub const DEFAULT_MAX_XREF_DEPTH: u32 = 100;

/// Maximum depth when following reference chains or the page tree.
const MAX_RESOLVE_DEPTH: u32 = 64;

/// A parsed PDF byte buffer.
pub struct PdfFile<'a> {
    data: &'a [u8],
    xref: CrossRefTable,
    trailer: Dictionary,
    startxref: usize,
    object_streams: RefCell<HashMap<u32, HashMap<u32, Object>>>,
}

impl<'a> std::fmt::Debug for PdfFile<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfFile")
            .field("len", &self.data.len())
            .field("startxref", &self.startxref)
            .field("xref_kind", &self.xref.kind())
            .field("entries", &self.xref.len())
            .finish()
    }
}

impl<'a> PdfFile<'a> {
    /// Parse the header and cross-reference chain of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        Self::parse_with_depth(data, DEFAULT_MAX_XREF_DEPTH)
    }

    /// Parse with an explicit bound on the `/Prev` chain.
    pub fn parse_with_depth(data: &'a [u8], max_depth: u32) -> Result<Self> {
        let head = &data[..data.len().min(1024)];
        if !head.windows(5).any(|w| w == b"%PDF-") {
            return Err(Error::UnsupportedPdfStructure("missing %PDF- header".to_string()));
        }

        let startxref = find_xref_offset(data).map_err(|e| {
            Error::UnsupportedPdfStructure(format!("cannot locate startxref: {}", e))
        })?;
        let xref = parse_xref(data, startxref, max_depth).map_err(|e| {
            Error::UnsupportedPdfStructure(format!("cannot read cross-reference at {}: {}", startxref, e))
        })?;

        let trailer = xref
            .trailer()
            .cloned()
            .ok_or_else(|| Error::UnsupportedPdfStructure("document has no trailer".to_string()))?;

        log::debug!(
            "Parsed PDF: {} bytes, {:?} xref at {} with {} entries",
            data.len(),
            xref.kind(),
            startxref,
            xref.len()
        );

        Ok(Self {
            data,
            xref,
            trailer,
            startxref,
            object_streams: RefCell::new(HashMap::new()),
        })
    }

    /// The document bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> usize {
        self.startxref
    }

    /// Syntax of the newest cross-reference section.
    pub fn xref_kind(&self) -> XrefKind {
        self.xref.kind()
    }

    /// Trailer of the newest revision.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Whether the document declares an `/Encrypt` dictionary.
    pub fn is_encrypted(&self) -> bool {
        self.trailer().contains_key("Encrypt")
    }

    /// First object number free for a new revision.
    pub fn next_object_id(&self) -> u32 {
        let size = self
            .trailer()
            .get("Size")
            .and_then(|o| o.as_integer())
            .unwrap_or(0)
            .max(0) as u32;
        size.max(self.xref.max_object_number() + 1)
    }

    /// Load an indirect object by reference.
    pub fn load_object(&self, obj_ref: ObjectRef) -> Result<Object> {
        let entry = self
            .xref
            .get(obj_ref.id)
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        match entry.entry_type {
            XRefEntryType::Free => Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
            XRefEntryType::Uncompressed => self.load_uncompressed(obj_ref, entry.offset as usize),
            XRefEntryType::Compressed => self.load_compressed(obj_ref, entry.offset as u32),
        }
    }

    fn load_uncompressed(&self, obj_ref: ObjectRef, offset: usize) -> Result<Object> {
        if offset >= self.data.len() {
            return Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen));
        }
        let (_, (found, obj)) =
            parse_indirect_object(&self.data[offset..]).map_err(|e| Error::ParseError {
                offset,
                reason: format!("object {}: {}", obj_ref, e),
            })?;
        if found.id != obj_ref.id {
            log::warn!("xref points {} at offset {}, found {}", obj_ref, offset, found);
            return Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen));
        }
        Ok(obj)
    }

    fn load_compressed(&self, obj_ref: ObjectRef, stream_id: u32) -> Result<Object> {
        if let Some(obj) = self
            .object_streams
            .borrow()
            .get(&stream_id)
            .and_then(|objects| objects.get(&obj_ref.id))
        {
            return Ok(obj.clone());
        }

        // An object stream is never itself stored in an object stream.
        let offset = match self.xref.get(stream_id) {
            Some(entry) if entry.entry_type == XRefEntryType::Uncompressed => entry.offset as usize,
            Some(_) => {
                return Err(Error::UnsupportedPdfStructure(format!(
                    "object stream {} holding {} is not an uncompressed object",
                    stream_id, obj_ref
                )))
            },
            None => return Err(Error::ObjectNotFound(stream_id, 0)),
        };
        let stream = self.load_uncompressed(ObjectRef::new(stream_id, 0), offset)?;
        let objects = parse_object_stream(&stream)?;
        let found = objects.get(&obj_ref.id).cloned();
        self.object_streams.borrow_mut().insert(stream_id, objects);
        found.ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(r) => current = self.load_object(r)?,
                other => return Ok(other),
            }
        }
        Err(Error::RecursionLimitExceeded(MAX_RESOLVE_DEPTH))
    }

    /// Resolve `obj` and require a dictionary.
    pub fn resolve_dict(&self, obj: &Object) -> Result<Dictionary> {
        match self.resolve(obj)? {
            Object::Dictionary(d) => Ok(d),
            Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            }),
        }
    }

    /// The document catalog and its reference.
    pub fn catalog(&self) -> Result<(ObjectRef, Dictionary)> {
        let root = self
            .trailer()
            .get("Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::UnsupportedPdfStructure("trailer has no /Root reference".to_string()))?;
        let dict = self.resolve_dict(&Object::Reference(root))?;
        Ok((root, dict))
    }

    /// The first leaf of the page tree.
    pub fn first_page(&self) -> Result<(ObjectRef, Dictionary)> {
        let (_, catalog) = self.catalog()?;
        let mut node = catalog
            .get("Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::UnsupportedPdfStructure("catalog has no /Pages".to_string()))?;

        for _ in 0..MAX_RESOLVE_DEPTH {
            let dict = self.resolve_dict(&Object::Reference(node))?;
            let is_tree_node = dict.get("Type").and_then(|o| o.as_name()) == Some("Pages")
                || dict.contains_key("Kids");
            if !is_tree_node {
                return Ok((node, dict));
            }

            let kids = match dict.get("Kids") {
                Some(kids) => self.resolve(kids)?,
                None => Object::Array(Vec::new()),
            };
            node = kids
                .as_array()
                .and_then(|arr| arr.iter().find_map(|k| k.as_reference()))
                .ok_or_else(|| Error::UnsupportedPdfStructure("page tree has no pages".to_string()))?;
        }

        Err(Error::RecursionLimitExceeded(MAX_RESOLVE_DEPTH))
    }
}
