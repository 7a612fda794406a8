//! Document parsing: turn an in-memory PDF into page-ordered text.
//!
//! ## Why a trait?
//!
//! The pipeline only needs "bytes in, pages out". [`DocumentParser`] keeps
//! the PDF engine behind that seam so tests can inject failures and a
//! different engine can be dropped in without touching ingestion.
//!
//! ## Why spawn_blocking?
//!
//! Decoding content streams is CPU-bound. [`parse_document`] moves the work
//! onto Tokio's blocking pool so the session's async tasks keep running
//! while a large document is being extracted.
//!
//! ## Text items
//!
//! Each text-showing operator in a page's content stream (`Tj`, `TJ`, `'`,
//! `"`) is one text item. A page's text is its items in stream order joined
//! with single spaces. Kerning arrays (`TJ`) form a single item.
//!
//! Strings are decoded through the encoding of the font selected by the
//! last `Tf` (WinAnsi, MacRoman, ToUnicode CMaps, ...). Text drawn by Form
//! XObjects (`Do`) is collected in place, with the form's own resources
//! layered over the page's.

use crate::error::ParseError;
use crate::model::DocumentText;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId, Stream};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Called after each page is extracted with `(page_num, total_pages)`.
/// Returning `false` abandons the parse.
pub type PageHook<'a> = &'a mut (dyn FnMut(usize, usize) -> bool + Send);

/// A PDF text-extraction backend.
///
/// Implementations are synchronous and all-or-nothing: either every page is
/// extracted, or the whole parse fails.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8], on_page: PageHook<'_>) -> Result<DocumentText, ParseError>;

    /// Name of this extraction backend (for diagnostics).
    fn backend_name(&self) -> &str;
}

/// Run `parser` on a blocking thread.
pub async fn parse_document(
    parser: Arc<dyn DocumentParser>,
    bytes: Vec<u8>,
    mut on_page: impl FnMut(usize, usize) -> bool + Send + 'static,
) -> Result<DocumentText, ParseError> {
    tokio::task::spawn_blocking(move || parser.parse(&bytes, &mut on_page))
        .await
        .map_err(|e| ParseError::Internal(format!("Parse task panicked: {}", e)))?
}

/// [`DocumentParser`] backed by `lopdf`.
#[derive(Debug, Clone)]
pub struct LopdfParser {
    verify_magic: bool,
}

impl Default for LopdfParser {
    fn default() -> Self {
        Self { verify_magic: true }
    }
}

impl LopdfParser {
    pub fn new(verify_magic: bool) -> Self {
        Self { verify_magic }
    }
}

impl DocumentParser for LopdfParser {
    fn parse(&self, bytes: &[u8], on_page: PageHook<'_>) -> Result<DocumentText, ParseError> {
        if self.verify_magic && !bytes.starts_with(b"%PDF") {
            return Err(ParseError::NotAPdf {
                magic: bytes.iter().take(4).copied().collect(),
            });
        }

        let mut doc =
            Document::load_mem(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;
        if doc.is_encrypted() {
            // Owner-password-only documents open with an empty user password.
            doc.decrypt("").map_err(|e| {
                warn!("Cannot decrypt PDF with an empty user password: {}", e);
                ParseError::Encrypted
            })?;
            debug!("Decrypted PDF with empty user password");
        }

        let reported = reported_page_count(&doc)?;
        // BTreeMap keyed by 1-based page number, so values come out in page order.
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if page_ids.len() != reported {
            return Err(ParseError::PageCountMismatch {
                reported,
                extracted: page_ids.len(),
            });
        }
        info!("PDF loaded: {} pages", reported);

        let mut pages = Vec::with_capacity(reported);
        for (idx, page_id) in page_ids.into_iter().enumerate() {
            let page_num = idx + 1;
            let text = extract_page_text(&doc, page_id)
                .map_err(|detail| ParseError::PageExtraction {
                    page: page_num,
                    detail,
                })?;
            debug!("Extracted page {} → {} chars", page_num, text.len());
            pages.push(text);

            if !on_page(page_num, reported) {
                return Err(ParseError::Abandoned { page: page_num });
            }
        }

        Ok(DocumentText::from_pages(pages))
    }

    fn backend_name(&self) -> &str {
        "lopdf"
    }
}

/// The page count declared by the root of the page tree.
fn reported_page_count(doc: &Document) -> Result<usize, ParseError> {
    let malformed = |e: lopdf::Error| ParseError::Malformed(format!("page tree: {e}"));

    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(|o| o.as_reference())
        .map_err(malformed)?;
    let pages_id = doc
        .get_dictionary(root_id)
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(|o| o.as_reference())
        .map_err(malformed)?;
    let count = doc
        .get_dictionary(pages_id)
        .and_then(|pages| pages.get(b"Count"))
        .and_then(|o| o.as_i64())
        .map_err(malformed)?;

    usize::try_from(count)
        .map_err(|_| ParseError::Malformed(format!("negative page count {count}")))
}

fn extract_page_text(doc: &Document, page_id: ObjectId) -> Result<String, String> {
    let data = doc.get_page_content(page_id).map_err(|e| e.to_string())?;
    let content = Content::decode(&data).map_err(|e| e.to_string())?;
    let scope = Resources::for_page(doc, page_id)?;

    let mut walker = TextWalker::new(doc);
    walker.walk(&content.operations, &scope)?;
    Ok(walker.items.join(" "))
}

/// Fonts and forms visible to a content stream. A form's resources shadow
/// those of the stream that draws it.
#[derive(Default)]
struct Resources<'s, 'a> {
    encodings: BTreeMap<Vec<u8>, Encoding<'a>>,
    forms: BTreeMap<Vec<u8>, ObjectId>,
    parent: Option<&'s Resources<'s, 'a>>,
}

impl<'s, 'a> Resources<'s, 'a> {
    fn for_page(doc: &'a Document, page_id: ObjectId) -> Result<Self, String> {
        let fonts = doc.get_page_fonts(page_id).map_err(|e| e.to_string())?;
        let (own, inherited) = doc.get_page_resources(page_id).map_err(|e| e.to_string())?;

        let mut forms = BTreeMap::new();
        let dicts = own
            .into_iter()
            .chain(inherited.into_iter().filter_map(|id| doc.get_dictionary(id).ok()));
        for dict in dicts {
            for (name, id) in form_entries(doc, dict) {
                forms.entry(name).or_insert(id);
            }
        }

        Ok(Self {
            encodings: font_encodings(doc, fonts),
            forms,
            parent: None,
        })
    }

    fn for_form(doc: &'a Document, form: &'a Stream, parent: &'s Resources<'s, 'a>) -> Self {
        let Some(dict) = form.dict.get(b"Resources").ok().and_then(|o| resolve_dict(doc, o))
        else {
            return Self {
                parent: Some(parent),
                ..Default::default()
            };
        };

        let fonts = dict
            .get(b"Font")
            .ok()
            .and_then(|o| resolve_dict(doc, o))
            .map(|fonts| {
                fonts
                    .iter()
                    .filter_map(|(name, font)| resolve_dict(doc, font).map(|f| (name.clone(), f)))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            encodings: font_encodings(doc, fonts),
            forms: form_entries(doc, dict).collect(),
            parent: Some(parent),
        }
    }

    fn encoding(&self, font: &[u8]) -> Option<&Encoding<'a>> {
        self.encodings
            .get(font)
            .or_else(|| self.parent.and_then(|p| p.encoding(font)))
    }

    fn form(&self, name: &[u8]) -> Option<ObjectId> {
        self.forms
            .get(name)
            .copied()
            .or_else(|| self.parent.and_then(|p| p.form(name)))
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// `(name, object id)` of every XObject in a resource dictionary.
fn form_entries<'a>(
    doc: &'a Document,
    resources: &'a Dictionary,
) -> impl Iterator<Item = (Vec<u8>, ObjectId)> + 'a {
    resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
        .into_iter()
        .flat_map(|xobjects| xobjects.iter())
        .filter_map(|(name, obj)| obj.as_reference().ok().map(|id| (name.clone(), id)))
}

/// Fonts without a usable encoding are left out; their strings fall back to
/// [`decode_pdf_string`].
fn font_encodings<'a>(
    doc: &'a Document,
    fonts: impl IntoIterator<Item = (Vec<u8>, &'a Dictionary)>,
) -> BTreeMap<Vec<u8>, Encoding<'a>> {
    fonts
        .into_iter()
        .filter(|(_, font)| font.type_is(b"Font"))
        .filter_map(|(name, font)| match font.get_font_encoding(doc) {
            Ok(encoding) => Some((name, encoding)),
            Err(e) => {
                debug!("No encoding for font {}: {}", String::from_utf8_lossy(&name), e);
                None
            }
        })
        .collect()
}

/// Collects text items from a content stream and the forms it draws.
struct TextWalker<'a> {
    doc: &'a Document,
    items: Vec<String>,
    /// Resource name of the font selected by the last `Tf`.
    font: Option<Vec<u8>>,
    /// Forms on the current `Do` path.
    active_forms: HashSet<ObjectId>,
}

impl<'a> TextWalker<'a> {
    fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            items: Vec::new(),
            font: None,
            active_forms: HashSet::new(),
        }
    }

    fn walk(&mut self, operations: &[Operation], scope: &Resources<'_, 'a>) -> Result<(), String> {
        for op in operations {
            match op.operator.as_str() {
                "Tf" => {
                    self.font = op
                        .operands
                        .first()
                        .and_then(|o| o.as_name().ok())
                        .map(<[u8]>::to_vec);
                }
                "Tj" | "'" => self.show(op.operands.first(), scope),
                "\"" => self.show(op.operands.get(2), scope),
                "TJ" => {
                    if let Some(parts) = op.operands.first().and_then(|o| o.as_array().ok()) {
                        let text: String = parts
                            .iter()
                            .filter_map(|part| self.decode(part, scope))
                            .collect();
                        self.items.push(text);
                    }
                }
                "Do" => {
                    if let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) {
                        self.draw_form(name, scope)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn show(&mut self, operand: Option<&Object>, scope: &Resources<'_, 'a>) {
        if let Some(text) = operand.and_then(|o| self.decode(o, scope)) {
            self.items.push(text);
        }
    }

    fn decode(&self, obj: &Object, scope: &Resources<'_, 'a>) -> Option<String> {
        let Object::String(bytes, _) = obj else {
            return None;
        };
        let decoded = self
            .font
            .as_deref()
            .and_then(|font| scope.encoding(font))
            .and_then(|encoding| Document::decode_text(encoding, bytes).ok());
        Some(decoded.unwrap_or_else(|| decode_pdf_string(bytes)))
    }

    fn draw_form(&mut self, name: &[u8], scope: &Resources<'_, 'a>) -> Result<(), String> {
        let doc = self.doc;
        let Some(id) = scope.form(name) else {
            return Ok(());
        };
        let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
            return Ok(());
        };
        if stream.dict.get(b"Subtype").and_then(Object::as_name).ok() != Some(b"Form".as_slice()) {
            return Ok(());
        }
        if !self.active_forms.insert(id) {
            warn!("Form XObject {} {} draws itself; skipping", id.0, id.1);
            return Ok(());
        }

        let content = stream
            .get_plain_content()
            .and_then(|data| Content::decode(&data))
            .map_err(|e| format!("form XObject {} {}: {e}", id.0, id.1))?;
        let form_scope = Resources::for_form(doc, stream, scope);

        // The form runs inside its own graphics state.
        let font = self.font.clone();
        let result = self.walk(&content.operations, &form_scope);
        self.font = font;
        self.active_forms.remove(&id);
        result
    }
}

/// Decode a PDF string: UTF-16BE when it carries a BOM, otherwise one byte
/// per char (PDFDocEncoding agrees with Latin-1 on printable text).
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        return char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
    }
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory PDF fixtures.

    use lopdf::content::{Content, Operation};
    use lopdf::encryption::{decrypt_object, get_encryption_key};
    use lopdf::{dictionary, Dictionary, Document, Object, Stream, StringFormat};

    /// One page per entry; each inner slice is that page's `Tj` items.
    pub fn build_pdf(pages: &[&[&str]]) -> Vec<u8> {
        build_pdf_with_count(pages, pages.len() as i64)
    }

    /// Like [`build_pdf`] but with a forged `/Count` in the page tree.
    pub fn build_pdf_with_count(pages: &[&[&str]], count: i64) -> Vec<u8> {
        let mut doc = courier_document(pages);
        let pages_id = doc
            .catalog()
            .and_then(|c| c.get(b"Pages"))
            .and_then(Object::as_reference)
            .unwrap();
        doc.get_dictionary_mut(pages_id).unwrap().set("Count", count);
        save(&mut doc)
    }

    /// `BT /<font> 12 Tf ... ET` showing each item with `Tj`.
    pub fn show(font: &str, items: Vec<Object>) -> Vec<Operation> {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
        ];
        for item in items {
            operations.push(Operation::new("Tj", vec![item]));
        }
        operations.push(Operation::new("ET", vec![]));
        operations
    }

    /// Adds one page per content stream under a page tree carrying
    /// `resources`, and sets the catalog.
    pub fn add_pages(doc: &mut Document, resources: Dictionary, pages: Vec<Vec<Operation>>) {
        let pages_id = doc.new_object_id();
        let resources_id = doc.add_object(resources);

        let mut kids: Vec<Object> = Vec::new();
        for operations in pages {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
    }

    pub fn save(doc: &mut Document) -> Vec<u8> {
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn courier_document(pages: &[&[&str]]) -> Document {
        let mut doc = Document::with_version("1.5");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let contents = pages
            .iter()
            .map(|items| show("F1", items.iter().map(|i| Object::string_literal(*i)).collect()))
            .collect();
        add_pages(
            &mut doc,
            dictionary! { "Font" => dictionary! { "F1" => font_id } },
            contents,
        );
        doc
    }

    /// Standard security handler padding string.
    const PAD: [u8; 32] = [
        0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
        0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
        0x69, 0x7A,
    ];

    fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut state: Vec<u8> = (0..=255).collect();
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }
        let (mut i, mut j) = (0u8, 0u8);
        data.iter()
            .map(|byte| {
                i = i.wrapping_add(1);
                j = j.wrapping_add(state[i as usize]);
                state.swap(i as usize, j as usize);
                byte ^ state[state[i as usize].wrapping_add(state[j as usize]) as usize]
            })
            .collect()
    }

    /// Like [`build_pdf`], encrypted with the 40-bit RC4 standard handler
    /// (revision 2) under `user_password`.
    pub fn build_encrypted_pdf(pages: &[&[&str]], user_password: &str) -> Vec<u8> {
        let mut doc = courier_document(pages);
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => 1,
            "R" => 2,
            "Length" => 40,
            "P" => -4,
            "O" => Object::String(vec![0x5A; 32], StringFormat::Hexadecimal),
        });
        doc.trailer.set("Encrypt", encrypt_id);
        let file_id = Object::string_literal(b"docchat-fixture!".to_vec());
        doc.trailer.set("ID", vec![file_id.clone(), file_id]);

        let key = get_encryption_key(&doc, user_password, false).unwrap();
        doc.get_dictionary_mut(encrypt_id)
            .unwrap()
            .set("U", Object::String(rc4(&key, &PAD), StringFormat::Hexadecimal));

        for (&id, obj) in doc.objects.iter_mut() {
            if id == encrypt_id {
                continue;
            }
            // RC4 is symmetric, so decrypting plaintext encrypts it.
            if let Ok(sealed) = decrypt_object(&key, id, obj) {
                match obj {
                    Object::Stream(stream) => stream.set_content(sealed),
                    Object::String(content, _) => *content = sealed,
                    _ => {}
                }
            }
        }
        save(&mut doc)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{add_pages, build_encrypted_pdf, build_pdf, build_pdf_with_count, save, show};
    use super::*;
    use lopdf::{dictionary, StringFormat};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn parse(bytes: &[u8]) -> Result<DocumentText, ParseError> {
        LopdfParser::default().parse(bytes, &mut |_, _| true)
    }

    #[test]
    fn extracts_pages_in_order() {
        let pdf = build_pdf(&[&["Invoice", "2024"], &["Total:", "42"], &["Thanks"]]);
        let doc = parse(&pdf).unwrap();

        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.pages(), &["Invoice 2024", "Total: 42", "Thanks"]);
        assert_eq!(doc.aggregate(), "Invoice 2024\nTotal: 42\nThanks");
    }

    #[test]
    fn empty_page_is_kept() {
        let pdf = build_pdf(&[&["first"], &[], &["third"]]);
        let doc = parse(&pdf).unwrap();
        assert_eq!(doc.pages(), &["first", "", "third"]);
        assert_eq!(doc.aggregate(), "first\n\nthird");
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = parse(b"PK\x03\x04 zip archive").unwrap_err();
        assert_eq!(
            err,
            ParseError::NotAPdf {
                magic: b"PK\x03\x04".to_vec()
            }
        );
    }

    #[test]
    fn rejects_truncated_pdf() {
        let err = parse(b"%PDF-1.4\nnot really a document").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)), "{err:?}");
    }

    #[test]
    fn forged_page_count_fails_whole_document() {
        let pdf = build_pdf_with_count(&[&["a"], &["b"]], 3);
        let err = parse(&pdf).unwrap_err();
        assert_eq!(
            err,
            ParseError::PageCountMismatch {
                reported: 3,
                extracted: 2
            }
        );
    }

    #[test]
    fn hook_sees_every_page_and_can_abandon() {
        let pdf = build_pdf(&[&["a"], &["b"], &["c"]]);
        let mut seen = Vec::new();
        let doc = LopdfParser::default()
            .parse(&pdf, &mut |page, total| {
                seen.push((page, total));
                true
            })
            .unwrap();
        assert_eq!(doc.page_count(), 3);
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);

        let err = LopdfParser::default()
            .parse(&pdf, &mut |page, _| page < 2)
            .unwrap_err();
        assert_eq!(err, ParseError::Abandoned { page: 2 });
    }

    #[test]
    fn kerning_array_is_one_item() {
        let ops = vec![
            Operation::new("Tj", vec![Object::string_literal("Hello")]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Wo"),
                    (-120).into(),
                    Object::string_literal("rld"),
                ])],
            ),
            Operation::new("Td", vec![0.into(), (-14).into()]),
            Operation::new("'", vec![Object::string_literal("next")]),
        ];
        let doc = Document::new();
        let mut walker = TextWalker::new(&doc);
        walker.walk(&ops, &Resources::default()).unwrap();
        assert_eq!(walker.items, vec!["Hello", "World", "next"]);
    }

    #[test]
    fn decodes_through_win_ansi_font_encoding() {
        let mut doc = Document::with_version("1.5");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let text = Object::string_literal(b"Price: 5\x80 \x96 it\x92s".to_vec());
        add_pages(
            &mut doc,
            dictionary! { "Font" => dictionary! { "F1" => font_id } },
            vec![show("F1", vec![text])],
        );

        let parsed = parse(&save(&mut doc)).unwrap();
        assert_eq!(parsed.pages(), &["Price: 5\u{20ac} \u{2013} it\u{2019}s"]);
    }

    #[test]
    fn decodes_cid_font_through_to_unicode_cmap() {
        let mut doc = Document::with_version("1.5");
        let cmap_id = doc.add_object(Stream::new(
            dictionary! {},
            b"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo
<< /Registry (Adobe)
/Ordering (UCS)
/Supplement 0
>> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
1 beginbfrange
<0000> <005E> <0020>
endbfrange
1 beginbfchar
<0100> <00E9>
endbfchar
endcmap
CMapName currentdict /CMap defineresource pop
end
end"
            .to_vec(),
        ));
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => "NotoSans",
            "Encoding" => "Identity-H",
            "ToUnicode" => cmap_id,
        });
        let glyphs = Object::String(vec![0x00, 0x28, 0x00, 0x49, 0x01, 0x00], StringFormat::Hexadecimal);
        add_pages(
            &mut doc,
            dictionary! { "Font" => dictionary! { "F2" => font_id } },
            vec![show("F2", vec![glyphs])],
        );

        let parsed = parse(&save(&mut doc)).unwrap();
        assert_eq!(parsed.pages(), &["Hi\u{e9}"]);
    }

    fn form(doc: &mut Document, resources: lopdf::Dictionary, operations: Vec<Operation>) -> ObjectId {
        let content = Content { operations }.encode().unwrap();
        doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources,
            },
            content,
        ))
    }

    #[test]
    fn collects_text_drawn_by_form_xobjects() {
        let mut doc = Document::with_version("1.5");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let header = form(
            &mut doc,
            dictionary! {},
            show("F1", vec![Object::string_literal("Header in form")]),
        );
        let mut page = vec![Operation::new("Do", vec!["Fm1".into()])];
        page.extend(show("F1", vec![Object::string_literal("Body")]));
        add_pages(
            &mut doc,
            dictionary! {
                "Font" => dictionary! { "F1" => font_id },
                "XObject" => dictionary! { "Fm1" => header },
            },
            vec![page],
        );

        let parsed = parse(&save(&mut doc)).unwrap();
        assert_eq!(parsed.aggregate(), "Header in form Body");
    }

    #[test]
    fn self_drawing_form_is_walked_once() {
        let mut doc = Document::with_version("1.5");
        let form_id = doc.new_object_id();
        let mut operations = show("F1", vec![Object::string_literal("loop")]);
        operations.push(Operation::new("Do", vec!["Me".into()]));
        doc.objects.insert(
            form_id,
            Object::Stream(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "Resources" => dictionary! {
                        "XObject" => dictionary! { "Me" => form_id },
                    },
                },
                Content { operations }.encode().unwrap(),
            )),
        );
        add_pages(
            &mut doc,
            dictionary! { "XObject" => dictionary! { "Me" => form_id } },
            vec![vec![Operation::new("Do", vec!["Me".into()])]],
        );

        let parsed = parse(&save(&mut doc)).unwrap();
        assert_eq!(parsed.pages(), &["loop"]);
    }

    #[test]
    fn opens_owner_password_only_pdf() {
        let pdf = build_encrypted_pdf(&[&["Confidential", "draft"], &["page two"]], "");
        let doc = parse(&pdf).unwrap();
        assert_eq!(doc.pages(), &["Confidential draft", "page two"]);
    }

    #[test]
    fn user_password_protected_pdf_is_rejected() {
        let pdf = build_encrypted_pdf(&[&["secret"]], "hunter2");
        assert_eq!(parse(&pdf).unwrap_err(), ParseError::Encrypted);
    }

    #[test]
    fn decodes_utf16_with_bom() {
        let bytes = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0xE9];
        assert_eq!(decode_pdf_string(&bytes), "Hé");
        assert_eq!(decode_pdf_string(b"plain"), "plain");
    }

    #[tokio::test]
    async fn parse_document_runs_off_thread() {
        let pdf = build_pdf(&[&["one"], &["two"]]);
        let pages = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pages);
        let doc = parse_document(Arc::new(LopdfParser::default()), pdf, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .await
        .unwrap();

        assert_eq!(doc.aggregate(), "one\ntwo");
        assert_eq!(pages.load(Ordering::SeqCst), 2);
    }
}
