//! Positional text extraction from PDF infographics.
//!
//! The content stream of every page is interpreted just far enough to know
//! where each string is drawn: the graphics state (`q`/`Q`/`cm`), the text
//! state (`BT`..`ET`, `Tf`, `TL`, `Td`, `TD`, `Tm`, `T*`) and the show
//! operators (`Tj`, `TJ`, `'`, `"`). Form XObjects invoked with `Do` are
//! walked recursively with their own matrix and resources.
//!
//! Drawn strings are grouped into lines (same baseline, adjacent in x) and
//! lines into boxes (stacked with at most one and a half line heights
//! between baselines, overlapping in x). Each box is reported at its left
//! edge and bottom, normalised so that `x * REFERENCE_WIDTH` and
//! `y * REFERENCE_HEIGHT` are coordinates on the reference landscape A4
//! page whatever the page was actually rendered at.

use std::collections::HashMap;

use lazy_static::lazy_static;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, Stream};
use regex::Regex;

use crate::error::PipelineError;

pub const REFERENCE_WIDTH: f64 = 841.92;
pub const REFERENCE_HEIGHT: f64 = 595.32;

const MAX_FORM_DEPTH: usize = 8;
const MAX_PARENT_DEPTH: usize = 32;

/// Rough advance of one glyph as a fraction of the font size.
const GLYPH_WIDTH_RATIO: f64 = 0.5;
/// Rough descent below the baseline as a fraction of the font size.
const DESCENT_RATIO: f64 = 0.2;
/// `TJ` adjustments at least this large (thousandths of an em) are spaces.
const TJ_SPACE_THRESHOLD: f64 = 250.0;

lazy_static! {
    static ref BFCHAR_SECTION: Regex =
        Regex::new(r"(?s)beginbfchar(.*?)endbfchar").expect("BFCHAR_SECTION to compile");
    static ref BFRANGE_SECTION: Regex =
        Regex::new(r"(?s)beginbfrange(.*?)endbfrange").expect("BFRANGE_SECTION to compile");
    static ref BFCHAR_ENTRY: Regex = Regex::new(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]*)>")
        .expect("BFCHAR_ENTRY to compile");
    static ref BFRANGE_ENTRY: Regex = Regex::new(
        r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]+)>\s*(<[0-9A-Fa-f]*>|\[[^\]]*\])"
    )
    .expect("BFRANGE_ENTRY to compile");
    static ref HEX_STRING: Regex = Regex::new(r"<([0-9A-Fa-f]*)>").expect("HEX_STRING to compile");
}

/// A block of text on a page, positioned by its bottom-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    /// Left edge as a fraction of the page width.
    pub x: f64,
    /// Bottom edge as a fraction of the reference page height.
    pub y: f64,
    /// Lines of the box joined with `\n`.
    pub text: String,
}

impl TextBox {
    pub fn reference_x(&self) -> f64 {
        self.x * REFERENCE_WIDTH
    }

    pub fn reference_y(&self) -> f64 {
        self.y * REFERENCE_HEIGHT
    }
}

/// Extract every non-empty text box from every page of `bytes`.
pub fn extract_text_boxes(bytes: &[u8]) -> Result<Vec<TextBox>, PipelineError> {
    // ---
    let doc = Document::load_mem(bytes)?;
    let empty = Dictionary::new();
    let mut boxes = Vec::new();

    for page_id in doc.get_pages().into_values() {
        let page = doc.get_dictionary(page_id)?;
        let resources = inherited(&doc, page, b"Resources")
            .and_then(|obj| resolve_dict(&doc, obj))
            .unwrap_or(&empty);
        let media = inherited(&doc, page, b"MediaBox")
            .and_then(|obj| media_box(&doc, obj))
            .unwrap_or([0.0, 0.0, REFERENCE_WIDTH, REFERENCE_HEIGHT]);

        let content = doc.get_page_content(page_id)?;
        let mut walker = Walker::new(&doc);
        walker.run(&content, resources, Matrix::IDENTITY, 0)?;

        boxes.extend(
            group_boxes(walker.fragments)
                .into_iter()
                .map(|b| b.normalise(media))
                .filter(|b| !b.text.trim().is_empty()),
        );
    }

    Ok(boxes)
}

// ---

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f64, ty: f64) -> Matrix {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    fn from_objects(objects: &[Object]) -> Option<Matrix> {
        // ---
        if objects.len() != 6 {
            return None;
        }
        let mut m = [0.0; 6];
        for (slot, obj) in m.iter_mut().zip(objects) {
            *slot = number(obj)?;
        }
        Some(Matrix(m))
    }

    /// `self × other`: apply `self` first, then `other`.
    fn then(&self, other: &Matrix) -> Matrix {
        // ---
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn origin(&self) -> (f64, f64) {
        (self.0[4], self.0[5])
    }

    fn vertical_scale(&self) -> f64 {
        self.0[2].hypot(self.0[3])
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

// ---

/// Look a key up on a page, falling back to the page tree ancestors.
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    // ---
    let mut current = page;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(obj) = current.get(key) {
            return Some(obj);
        }
        current = resolve_dict(doc, current.get(b"Parent").ok()?)?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

fn resolve_stream<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Stream> {
    match resolve(doc, obj)? {
        Object::Stream(stream) => Some(stream),
        _ => None,
    }
}

fn stream_bytes(stream: &Stream) -> Vec<u8> {
    stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone())
}

fn media_box(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    // ---
    let Object::Array(items) = resolve(doc, obj)? else {
        return None;
    };
    if items.len() != 4 {
        return None;
    }
    let mut corners = [0.0; 4];
    for (slot, item) in corners.iter_mut().zip(items) {
        *slot = number(resolve(doc, item)?)?;
    }
    Some(corners)
}

// ---

/// How a font's string bytes turn into text.
#[derive(Debug, Default)]
struct FontDecoder {
    two_byte: bool,
    to_unicode: HashMap<u32, String>,
}

impl FontDecoder {
    fn load(doc: &Document, font: &Dictionary) -> FontDecoder {
        // ---
        let two_byte = matches!(font.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Type0");
        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|obj| resolve_stream(doc, obj))
            .map(|stream| parse_cmap(&String::from_utf8_lossy(&stream_bytes(stream))))
            .unwrap_or_default();

        FontDecoder { two_byte, to_unicode }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        // ---
        let codes: Vec<u32> = if self.two_byte {
            bytes
                .chunks(2)
                .map(|pair| pair.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
                .collect()
        } else {
            bytes.iter().map(|b| u32::from(*b)).collect()
        };

        if !self.to_unicode.is_empty() {
            return codes
                .iter()
                .map(|code| match self.to_unicode.get(code) {
                    Some(text) => text.clone(),
                    None => char::from_u32(*code).map(String::from).unwrap_or_default(),
                })
                .collect();
        }

        if self.two_byte {
            let units: Vec<u16> = codes.iter().map(|c| *c as u16).collect();
            return String::from_utf16_lossy(&units);
        }
        decode_plain(bytes)
    }
}

/// Text strings without a usable font mapping: UTF-16BE when marked with
/// a byte order mark, Latin-1 otherwise.
fn decode_plain(bytes: &[u8]) -> String {
    // ---
    if let Some(rest) = bytes.strip_prefix(&[0xfe, 0xff]) {
        let units: Vec<u16> = rest
            .chunks(2)
            .map(|pair| pair.iter().fold(0u16, |acc, b| (acc << 8) | u16::from(*b)))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|b| char::from(*b)).collect()
}

fn hex_code(hex: &str) -> Option<u32> {
    u32::from_str_radix(hex, 16).ok()
}

fn hex_text(hex: &str) -> String {
    // ---
    let units: Vec<u16> = hex
        .as_bytes()
        .chunks(4)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .filter_map(|chunk| u16::from_str_radix(chunk, 16).ok())
        .collect();
    String::from_utf16_lossy(&units)
}

/// Parse the `bfchar` and `bfrange` sections of a ToUnicode CMap.
fn parse_cmap(cmap: &str) -> HashMap<u32, String> {
    // ---
    let mut map = HashMap::new();

    for section in BFCHAR_SECTION.captures_iter(cmap) {
        for entry in BFCHAR_ENTRY.captures_iter(&section[1]) {
            if let Some(code) = hex_code(&entry[1]) {
                map.insert(code, hex_text(&entry[2]));
            }
        }
    }

    for section in BFRANGE_SECTION.captures_iter(cmap) {
        for entry in BFRANGE_ENTRY.captures_iter(&section[1]) {
            let (Some(low), Some(high)) = (hex_code(&entry[1]), hex_code(&entry[2])) else {
                continue;
            };
            let high = high.min(low.saturating_add(0xffff));
            let destination = &entry[3];

            if destination.starts_with('[') {
                let targets = HEX_STRING.captures_iter(destination).map(|c| hex_text(&c[1]));
                for (code, text) in (low..=high).zip(targets) {
                    map.insert(code, text);
                }
                continue;
            }

            let mut units: Vec<u16> = hex_text(destination.trim_matches(|c| c == '<' || c == '>'))
                .encode_utf16()
                .collect();
            let Some(last) = units.pop() else {
                continue;
            };
            for (offset, code) in (low..=high).enumerate() {
                let mut target = units.clone();
                target.push(last.wrapping_add(offset as u16));
                map.insert(code, String::from_utf16_lossy(&target));
            }
        }
    }

    map
}

// ---

/// A string as drawn, in default user space.
#[derive(Debug, Clone)]
struct Fragment {
    x: f64,
    y: f64,
    size: f64,
    text: String,
    /// A positioning operator ran between the previous show and this one.
    repositioned: bool,
}

impl Fragment {
    fn width(&self) -> f64 {
        self.text.chars().count() as f64 * GLYPH_WIDTH_RATIO * self.size
    }
}

/// Text parameters that belong to the graphics state.
#[derive(Debug, Clone, Default)]
struct TextParams {
    font: Vec<u8>,
    size: f64,
    leading: f64,
}

struct Walker<'a> {
    doc: &'a Document,
    fragments: Vec<Fragment>,
}

impl<'a> Walker<'a> {
    fn new(doc: &'a Document) -> Self {
        Walker {
            doc,
            fragments: Vec::new(),
        }
    }

    fn run(
        &mut self,
        content: &[u8],
        resources: &'a Dictionary,
        ctm: Matrix,
        depth: usize,
    ) -> Result<(), PipelineError> {
        // ---
        let content = Content::decode(content)?;
        let fonts = self.fonts(resources);
        let plain = FontDecoder::default();

        let mut ctm = ctm;
        let mut params = TextParams::default();
        let mut saved: Vec<(Matrix, TextParams)> = Vec::new();
        let mut tm = Matrix::IDENTITY;
        let mut tlm = Matrix::IDENTITY;
        let mut repositioned = true;

        for op in &content.operations {
            let operands = &op.operands;
            let num = |i: usize| operands.get(i).and_then(number).unwrap_or(0.0);

            match op.operator.as_str() {
                "q" => saved.push((ctm, params.clone())),
                "Q" => {
                    if let Some((m, p)) = saved.pop() {
                        ctm = m;
                        params = p;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_objects(operands) {
                        ctm = m.then(&ctm);
                    }
                }
                "BT" => {
                    tm = Matrix::IDENTITY;
                    tlm = Matrix::IDENTITY;
                    repositioned = true;
                }
                "Tf" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        params.font = name.clone();
                    }
                    params.size = num(1);
                }
                "TL" => params.leading = num(0),
                "Td" | "TD" => {
                    if op.operator == "TD" {
                        params.leading = -num(1);
                    }
                    tlm = Matrix::translate(num(0), num(1)).then(&tlm);
                    tm = tlm;
                    repositioned = true;
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_objects(operands) {
                        tlm = m;
                        tm = m;
                        repositioned = true;
                    }
                }
                "T*" | "'" | "\"" => {
                    tlm = Matrix::translate(0.0, -params.leading).then(&tlm);
                    tm = tlm;
                    repositioned = true;

                    let shown = if op.operator == "'" {
                        operands.first()
                    } else {
                        operands.get(2)
                    };
                    if let Some(Object::String(bytes, _)) = shown {
                        let decoder = fonts.get(&params.font).unwrap_or(&plain);
                        let text = decoder.decode(bytes);
                        self.show(text, &params, &mut tm, &ctm, &mut repositioned);
                    }
                }
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        let decoder = fonts.get(&params.font).unwrap_or(&plain);
                        let text = decoder.decode(bytes);
                        self.show(text, &params, &mut tm, &ctm, &mut repositioned);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        let decoder = fonts.get(&params.font).unwrap_or(&plain);
                        let mut text = String::new();
                        for item in items {
                            match item {
                                Object::String(bytes, _) => text.push_str(&decoder.decode(bytes)),
                                other => {
                                    if number(other).is_some_and(|n| -n >= TJ_SPACE_THRESHOLD) {
                                        text.push(' ');
                                    }
                                }
                            }
                        }
                        self.show(text, &params, &mut tm, &ctm, &mut repositioned);
                    }
                }
                "Do" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        self.form(name, resources, ctm, depth)?;
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn fonts(&self, resources: &Dictionary) -> HashMap<Vec<u8>, FontDecoder> {
        // ---
        let Some(fonts) = resources
            .get(b"Font")
            .ok()
            .and_then(|obj| resolve_dict(self.doc, obj))
        else {
            return HashMap::new();
        };

        fonts
            .iter()
            .filter_map(|(name, obj)| {
                let font = resolve_dict(self.doc, obj)?;
                Some((name.clone(), FontDecoder::load(self.doc, font)))
            })
            .collect()
    }

    fn show(
        &mut self,
        text: String,
        params: &TextParams,
        tm: &mut Matrix,
        ctm: &Matrix,
        repositioned: &mut bool,
    ) {
        // ---
        let placed = tm.then(ctm);
        let (x, y) = placed.origin();
        let advance = text.chars().count() as f64 * GLYPH_WIDTH_RATIO * params.size;

        self.fragments.push(Fragment {
            x,
            y,
            size: (params.size * placed.vertical_scale()).abs().max(1.0),
            text,
            repositioned: *repositioned,
        });

        *tm = Matrix::translate(advance, 0.0).then(tm);
        *repositioned = false;
    }

    /// Walk a form XObject invoked with `Do`. Images are ignored.
    fn form(
        &mut self,
        name: &[u8],
        resources: &'a Dictionary,
        ctm: Matrix,
        depth: usize,
    ) -> Result<(), PipelineError> {
        // ---
        if depth >= MAX_FORM_DEPTH {
            return Ok(());
        }
        let doc = self.doc;
        let Some(stream) = resources
            .get(b"XObject")
            .ok()
            .and_then(|obj| resolve_dict(doc, obj))
            .and_then(|xobjects| xobjects.get(name).ok())
            .and_then(|obj| resolve_stream(doc, obj))
        else {
            return Ok(());
        };

        if !matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(subtype)) if subtype == b"Form") {
            return Ok(());
        }

        let matrix = match stream.dict.get(b"Matrix") {
            Ok(Object::Array(items)) => Matrix::from_objects(items).unwrap_or(Matrix::IDENTITY),
            _ => Matrix::IDENTITY,
        };
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|obj| resolve_dict(doc, obj))
            .unwrap_or(resources);

        self.run(&stream_bytes(stream), form_resources, matrix.then(&ctm), depth + 1)
    }
}

// ---

#[derive(Debug, Clone)]
struct Line {
    x: f64,
    end: f64,
    y: f64,
    size: f64,
    text: String,
}

impl Line {
    fn start(fragment: Fragment) -> Line {
        Line {
            x: fragment.x,
            end: fragment.x + fragment.width(),
            y: fragment.y,
            size: fragment.size,
            text: fragment.text,
        }
    }

    /// Whether `fragment` continues this line.
    fn accepts(&self, fragment: &Fragment) -> bool {
        (fragment.y - self.y).abs() <= 0.3 * self.size
            && fragment.x >= self.x - self.size
            && fragment.x <= self.end + self.size
    }

    fn push(&mut self, fragment: Fragment) {
        // ---
        let needs_space = fragment.repositioned
            && !self.text.ends_with(char::is_whitespace)
            && !fragment.text.starts_with(char::is_whitespace);
        if needs_space {
            self.text.push(' ');
        }
        self.end = self.end.max(fragment.x + fragment.width());
        self.x = self.x.min(fragment.x);
        self.size = self.size.max(fragment.size);
        self.text.push_str(&fragment.text);
    }
}

#[derive(Debug, Clone)]
struct RawBox {
    lines: Vec<Line>,
}

impl RawBox {
    /// Whether `line` sits directly under the last line of this box.
    fn accepts(&self, line: &Line) -> bool {
        // ---
        let Some(last) = self.lines.last() else {
            return false;
        };
        let size = last.size.max(line.size);
        let drop = last.y - line.y;
        let similar_size = (last.size - line.size).abs() <= 0.5 * size;
        let overlaps = line.x <= last.end + size && line.end >= last.x - size;
        drop > 0.0 && drop <= 1.5 * size && similar_size && overlaps
    }

    fn normalise(self, media: [f64; 4]) -> TextBox {
        // ---
        let [llx, lly, urx, ury] = media;
        let width = urx - llx;
        let height = ury - lly;
        let reference_height = width / REFERENCE_WIDTH * REFERENCE_HEIGHT;
        let y_offset = (height - reference_height) / 2.0;

        let left = self.lines.iter().map(|l| l.x).fold(f64::INFINITY, f64::min);
        let bottom = self
            .lines
            .iter()
            .map(|l| l.y - DESCENT_RATIO * l.size)
            .fold(f64::INFINITY, f64::min);
        let text = self
            .lines
            .iter()
            .map(|l| l.text.trim())
            .collect::<Vec<_>>()
            .join("\n");

        TextBox {
            x: (left - llx) / width,
            y: (bottom - lly - y_offset) / reference_height,
            text,
        }
    }
}

fn group_boxes(fragments: Vec<Fragment>) -> Vec<RawBox> {
    // ---
    let mut lines: Vec<Line> = Vec::new();
    for fragment in fragments {
        match lines.last_mut() {
            Some(line) if line.accepts(&fragment) => line.push(fragment),
            _ => lines.push(Line::start(fragment)),
        }
    }

    let mut boxes: Vec<RawBox> = Vec::new();
    for line in lines.into_iter().filter(|l| !l.text.trim().is_empty()) {
        match boxes.iter_mut().rev().find(|b| b.accepts(&line)) {
            Some(found) => found.lines.push(line),
            None => boxes.push(RawBox { lines: vec![line] }),
        }
    }
    boxes
}
