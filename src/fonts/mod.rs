//! Font resolution, metrics and embedding.
//!
//! Faces are loaded when layout first asks for them so that text can be
//! measured before anything is written. Every measured character is
//! remembered; TrueType faces are subsetted to exactly those characters when
//! the document is saved.

mod index;

use std::collections::{HashMap, HashSet};

use pdf_writer::{Name, Pdf, Rect, Ref, Str};
use ttf_parser::Face;

use crate::error::{Error, Result};

pub(crate) use index::find_font_file;

/// Standard PDF fonts that every viewer provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Builtin {
    Helvetica,
    Courier,
}

impl Builtin {
    fn from_family(family: &str) -> Option<Builtin> {
        match family.to_ascii_lowercase().as_str() {
            "helvetica" => Some(Builtin::Helvetica),
            "courier" => Some(Builtin::Courier),
            _ => None,
        }
    }

    fn base_font(self, bold: bool, italic: bool) -> &'static str {
        match (self, bold, italic) {
            (Builtin::Helvetica, false, false) => "Helvetica",
            (Builtin::Helvetica, true, false) => "Helvetica-Bold",
            (Builtin::Helvetica, false, true) => "Helvetica-Oblique",
            (Builtin::Helvetica, true, true) => "Helvetica-BoldOblique",
            (Builtin::Courier, false, false) => "Courier",
            (Builtin::Courier, true, false) => "Courier-Bold",
            (Builtin::Courier, false, true) => "Courier-Oblique",
            (Builtin::Courier, true, true) => "Courier-BoldOblique",
        }
    }

    /// (ascender, descender, line height) as fractions of the em.
    fn vertical_metrics(self) -> (f32, f32, f32) {
        match self {
            Builtin::Helvetica => (0.718, 0.207, 1.15),
            Builtin::Courier => (0.629, 0.157, 1.133),
        }
    }

    fn width_1000(self, ch: char, bold: bool) -> f32 {
        match self {
            Builtin::Courier => 600.0,
            Builtin::Helvetica => helvetica_width(ch, bold),
        }
    }
}

const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

const HELVETICA_BOLD_ASCII: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, //
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, //
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, //
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, //
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, //
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, //
];

fn helvetica_width(ch: char, bold: bool) -> f32 {
    let table = if bold {
        &HELVETICA_BOLD_ASCII
    } else {
        &HELVETICA_ASCII
    };
    match ch {
        ' '..='~' => f32::from(table[ch as usize - 0x20]),
        '\u{2022}' => 350.0,
        '\u{2013}' => 556.0,
        '\u{2014}' => 1000.0,
        '\u{2018}' | '\u{2019}' => 222.0,
        '\u{201C}' | '\u{201D}' => 333.0,
        _ => 556.0,
    }
}

/// WinAnsi bytes 0x80..=0x9F that do not map to the same code point.
const WINANSI_HIGH: [(u8, char); 27] = [
    (0x80, '\u{20AC}'),
    (0x82, '\u{201A}'),
    (0x83, '\u{0192}'),
    (0x84, '\u{201E}'),
    (0x85, '\u{2026}'),
    (0x86, '\u{2020}'),
    (0x87, '\u{2021}'),
    (0x88, '\u{02C6}'),
    (0x89, '\u{2030}'),
    (0x8A, '\u{0160}'),
    (0x8B, '\u{2039}'),
    (0x8C, '\u{0152}'),
    (0x8E, '\u{017D}'),
    (0x91, '\u{2018}'),
    (0x92, '\u{2019}'),
    (0x93, '\u{201C}'),
    (0x94, '\u{201D}'),
    (0x95, '\u{2022}'),
    (0x96, '\u{2013}'),
    (0x97, '\u{2014}'),
    (0x98, '\u{02DC}'),
    (0x99, '\u{2122}'),
    (0x9A, '\u{0161}'),
    (0x9B, '\u{203A}'),
    (0x9C, '\u{0153}'),
    (0x9E, '\u{017E}'),
    (0x9F, '\u{0178}'),
];

fn char_to_winansi(c: char) -> Option<u8> {
    match c as u32 {
        0x20..=0x7E | 0xA0..=0xFF => Some(c as u8),
        _ => WINANSI_HIGH.iter().find(|(_, ch)| *ch == c).map(|(b, _)| *b),
    }
}

/// Encode for a simple font with WinAnsiEncoding. Unmappable characters
/// become `?`.
pub(crate) fn to_winansi_bytes(s: &str) -> Vec<u8> {
    s.chars().map(|c| char_to_winansi(c).unwrap_or(b'?')).collect()
}

/// Big-endian two byte glyph ids for Identity-H encoded fonts.
pub(crate) fn encode_as_gids(text: &str, char_to_gid: &HashMap<char, u16>) -> Vec<u8> {
    text.chars()
        .flat_map(|ch| char_to_gid.get(&ch).copied().unwrap_or(0).to_be_bytes())
        .collect()
}

enum FaceSource {
    Builtin(Builtin),
    TrueType {
        family: String,
        data: Vec<u8>,
        face_index: u32,
    },
}

/// One resolved family and style.
pub(crate) struct LoadedFace {
    pub(crate) pdf_name: String,
    source: FaceSource,
    bold: bool,
    italic: bool,
    ascender_ratio: f32,
    descender_ratio: f32,
    line_h_ratio: f32,
    char_widths_1000: HashMap<char, f32>,
    used: HashSet<char>,
}

impl LoadedFace {
    fn builtin(builtin: Builtin, bold: bool, italic: bool, pdf_name: String) -> Self {
        let (ascender_ratio, descender_ratio, line_h_ratio) = builtin.vertical_metrics();
        LoadedFace {
            pdf_name,
            source: FaceSource::Builtin(builtin),
            bold,
            italic,
            ascender_ratio,
            descender_ratio,
            line_h_ratio,
            char_widths_1000: HashMap::new(),
            used: HashSet::new(),
        }
    }

    fn truetype(
        family: &str,
        data: Vec<u8>,
        face_index: u32,
        bold: bool,
        italic: bool,
        pdf_name: String,
    ) -> Option<Self> {
        let face = Face::parse(&data, face_index).ok()?;
        let units = f32::from(face.units_per_em());
        let ascender = f32::from(face.ascender());
        let descender = f32::from(face.descender());
        let line_gap = f32::from(face.line_gap());
        Some(LoadedFace {
            pdf_name,
            bold,
            italic,
            ascender_ratio: ascender / units,
            descender_ratio: -descender / units,
            line_h_ratio: (ascender - descender + line_gap) / units,
            source: FaceSource::TrueType {
                family: family.to_string(),
                data,
                face_index,
            },
            char_widths_1000: HashMap::new(),
            used: HashSet::new(),
        })
    }

    fn char_width_1000(&mut self, ch: char) -> f32 {
        if let Some(&w) = self.char_widths_1000.get(&ch) {
            return w;
        }
        let w = match &self.source {
            FaceSource::Builtin(b) => b.width_1000(ch, self.bold),
            FaceSource::TrueType { data, face_index, .. } => Face::parse(data, *face_index)
                .ok()
                .and_then(|face| {
                    let gid = face.glyph_index(ch)?;
                    let adv = face.glyph_hor_advance(gid)?;
                    Some(f32::from(adv) / f32::from(face.units_per_em()) * 1000.0)
                })
                .unwrap_or(0.0),
        };
        self.char_widths_1000.insert(ch, w);
        w
    }

    /// Width of `text` at `size` points. Records the characters for embedding.
    pub(crate) fn text_width(&mut self, text: &str, size: f32) -> f32 {
        let mut total = 0.0;
        for ch in text.chars() {
            self.used.insert(ch);
            total += self.char_width_1000(ch);
        }
        total * size / 1000.0
    }

    pub(crate) fn ascent(&self, size: f32) -> f32 {
        self.ascender_ratio * size
    }

    pub(crate) fn descent(&self, size: f32) -> f32 {
        self.descender_ratio * size
    }

    pub(crate) fn line_spacing(&self, size: f32) -> f32 {
        self.line_h_ratio * size
    }
}

/// A face written to the PDF.
pub(crate) struct EmbeddedFont {
    pub(crate) pdf_name: String,
    pub(crate) font_ref: Ref,
    char_to_gid: Option<HashMap<char, u16>>,
}

impl EmbeddedFont {
    pub(crate) fn encode(&self, text: &str) -> Vec<u8> {
        match &self.char_to_gid {
            Some(map) => encode_as_gids(text, map),
            None => to_winansi_bytes(text),
        }
    }
}

/// Every face used by one document. Face ids are indices into the book.
#[derive(Default)]
pub(crate) struct FontBook {
    faces: Vec<LoadedFace>,
    by_key: HashMap<(String, bool, bool), usize>,
}

impl FontBook {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Resolve `family` (a `;` separated list of candidates) to a face id.
    pub(crate) fn load(&mut self, family: &str, bold: bool, italic: bool) -> Result<usize> {
        let key = (family.trim().to_lowercase(), bold, italic);
        if let Some(&id) = self.by_key.get(&key) {
            return Ok(id);
        }

        let t0 = std::time::Instant::now();
        let pdf_name = format!("F{}", self.faces.len() + 1);
        let face = family
            .split(';')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .find_map(|candidate| resolve(candidate, bold, italic, &pdf_name))
            .ok_or_else(|| Error::FontNotCreatable {
                family: family.to_string(),
            })?;
        log::debug!(
            "Loaded font {family} bold={bold} italic={italic} as {pdf_name} in {:.1}ms",
            t0.elapsed().as_secs_f64() * 1000.0
        );

        let id = self.faces.len();
        self.faces.push(face);
        self.by_key.insert(key, id);
        Ok(id)
    }

    pub(crate) fn face(&self, id: usize) -> &LoadedFace {
        &self.faces[id]
    }

    pub(crate) fn face_mut(&mut self, id: usize) -> &mut LoadedFace {
        &mut self.faces[id]
    }

    /// Write every face, subsetted to the characters measured so far.
    /// The result is indexed by face id.
    pub(crate) fn embed(
        &self,
        pdf: &mut Pdf,
        alloc: &mut impl FnMut() -> Ref,
    ) -> Vec<EmbeddedFont> {
        self.faces
            .iter()
            .map(|face| {
                let font_ref = alloc();
                let char_to_gid = match &face.source {
                    FaceSource::Builtin(b) => {
                        write_type1(pdf, font_ref, b.base_font(face.bold, face.italic));
                        None
                    }
                    FaceSource::TrueType {
                        family,
                        data,
                        face_index,
                    } => {
                        let embedded = embed_truetype(
                            pdf,
                            font_ref,
                            family,
                            data,
                            *face_index,
                            &face.used,
                            alloc,
                        );
                        if embedded.is_none() {
                            log::warn!("Font {family} could not be embedded, using Helvetica");
                            write_type1(pdf, font_ref, "Helvetica");
                        }
                        embedded
                    }
                };
                EmbeddedFont {
                    pdf_name: face.pdf_name.clone(),
                    font_ref,
                    char_to_gid,
                }
            })
            .collect()
    }
}

fn resolve(candidate: &str, bold: bool, italic: bool, pdf_name: &str) -> Option<LoadedFace> {
    if let Some(builtin) = Builtin::from_family(candidate) {
        return Some(LoadedFace::builtin(builtin, bold, italic, pdf_name.to_string()));
    }
    let (path, face_index) = find_font_file(candidate, bold, italic)?;
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) => {
            log::warn!("Unable to read font file {}: {e}", path.display());
            return None;
        }
    };
    LoadedFace::truetype(candidate, data, face_index, bold, italic, pdf_name.to_string())
}

fn write_type1(pdf: &mut Pdf, font_ref: Ref, base_font: &str) {
    pdf.type1_font(font_ref)
        .base_font(Name(base_font.as_bytes()))
        .encoding_predefined(Name(b"WinAnsiEncoding"));
}

/// Embed a TrueType/OpenType face as a Type0 font with Identity-H encoding,
/// subsetted to `used_chars`. Returns the char to glyph id mapping of the
/// subset.
fn embed_truetype(
    pdf: &mut Pdf,
    font_ref: Ref,
    family: &str,
    font_data: &[u8],
    face_index: u32,
    used_chars: &HashSet<char>,
    alloc: &mut impl FnMut() -> Ref,
) -> Option<HashMap<char, u16>> {
    let face = Face::parse(font_data, face_index).ok()?;
    let units = f32::from(face.units_per_em());
    let to_1000 = |v: f32| v / units * 1000.0;

    let mut remapper = subsetter::GlyphRemapper::new();
    let mut char_to_gid = HashMap::new();
    let mut widths: Vec<(u16, f32)> = Vec::new();
    let mut chars: Vec<char> = used_chars.iter().copied().collect();
    chars.push(' ');
    chars.sort_unstable();
    chars.dedup();
    for ch in chars {
        let Some(gid) = face.glyph_index(ch) else {
            continue;
        };
        let new_gid = remapper.remap(gid.0);
        char_to_gid.insert(ch, new_gid);
        let adv = face.glyph_hor_advance(gid).map_or(0.0, f32::from);
        widths.push((new_gid, to_1000(adv)));
    }
    widths.sort_by_key(|&(gid, _)| gid);
    widths.dedup_by_key(|&mut (gid, _)| gid);

    let subset = subsetter::subset(font_data, face_index, &remapper).unwrap_or_else(|e| {
        log::warn!("Subsetting {family} failed ({e}), embedding the whole face");
        font_data.to_vec()
    });

    let ps_name = family.replace(' ', "");
    let descriptor_ref = alloc();
    let data_ref = alloc();
    let cid_ref = alloc();
    let cmap_ref = alloc();

    let data_len = i32::try_from(subset.len()).ok()?;
    pdf.stream(data_ref, &subset).pair(Name(b"Length1"), data_len);

    let bb = face.global_bounding_box();
    pdf.font_descriptor(descriptor_ref)
        .name(Name(ps_name.as_bytes()))
        .flags(pdf_writer::types::FontFlags::NON_SYMBOLIC)
        .bbox(Rect::new(
            to_1000(f32::from(bb.x_min)),
            to_1000(f32::from(bb.y_min)),
            to_1000(f32::from(bb.x_max)),
            to_1000(f32::from(bb.y_max)),
        ))
        .italic_angle(0.0)
        .ascent(to_1000(f32::from(face.ascender())))
        .descent(to_1000(f32::from(face.descender())))
        .cap_height(face.capital_height().map_or(700.0, |h| to_1000(f32::from(h))))
        .stem_v(80.0)
        .font_file2(data_ref);

    let system_info = || pdf_writer::types::SystemInfo {
        registry: Str(b"Adobe"),
        ordering: Str(b"Identity"),
        supplement: 0,
    };
    {
        let mut cid = pdf.cid_font(cid_ref);
        cid.subtype(pdf_writer::types::CidFontType::Type2)
            .base_font(Name(ps_name.as_bytes()))
            .system_info(system_info())
            .font_descriptor(descriptor_ref)
            .default_width(0.0)
            .cid_to_gid_map_predefined(Name(b"Identity"));
        if !widths.is_empty() {
            let mut w = cid.widths();
            for &(gid, width) in &widths {
                w.consecutive(gid, [width]);
            }
        }
    }

    let cmap_name = format!("{ps_name}-UTF16");
    let mut cmap = pdf_writer::types::UnicodeCmap::new(Name(cmap_name.as_bytes()), system_info());
    for (&ch, &gid) in &char_to_gid {
        cmap.pair(gid, ch);
    }
    pdf.stream(cmap_ref, cmap.finish().as_slice());

    pdf.type0_font(font_ref)
        .base_font(Name(ps_name.as_bytes()))
        .encoding_predefined(Name(b"Identity-H"))
        .descendant_font(cid_ref)
        .to_unicode(cmap_ref);

    Some(char_to_gid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_families_are_always_available() {
        let mut book = FontBook::new();
        let regular = book.load("Helvetica", false, false).unwrap();
        let bold = book.load("helvetica", true, false).unwrap();
        let again = book.load("HELVETICA", false, false).unwrap();
        assert_eq!(regular, again);
        assert_ne!(regular, bold);
        assert_eq!(book.face(bold).pdf_name, "F2");
    }

    #[test]
    fn courier_is_monospaced() {
        let mut book = FontBook::new();
        let id = book.load("Courier", false, false).unwrap();
        let face = book.face_mut(id);
        assert_eq!(face.text_width("iiii", 10.0), face.text_width("MMMM", 10.0));
        assert!((face.text_width("abc", 10.0) - 18.0).abs() < 1e-4);
    }

    #[test]
    fn helvetica_metrics() {
        let mut book = FontBook::new();
        let id = book.load("Helvetica", false, false).unwrap();
        let face = book.face_mut(id);
        assert!((face.text_width(" ", 1000.0) - 278.0).abs() < 1e-3);
        assert!(face.text_width("m", 12.0) > face.text_width("i", 12.0));
        assert!(face.ascent(10.0) > face.descent(10.0));
        assert!(face.line_spacing(10.0) > face.ascent(10.0) + face.descent(10.0));
    }

    #[test]
    fn candidates_are_tried_in_order() {
        let mut book = FontBook::new();
        assert!(book.load("No Such Family 8d1f; Courier", false, false).is_ok());
    }

    #[test]
    fn unknown_family_is_an_error() {
        let mut book = FontBook::new();
        let err = book.load("No Such Family 8d1f", false, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to create font: No Such Family 8d1f. Please choose another one."
        );
    }

    #[test]
    fn winansi_encoding() {
        assert_eq!(to_winansi_bytes("a\u{2022}b"), vec![b'a', 0x95, b'b']);
        assert_eq!(to_winansi_bytes("\u{e9}"), vec![0xE9]);
        assert_eq!(to_winansi_bytes("\u{4e2d}"), vec![b'?']);
    }

    #[test]
    fn gid_encoding_is_big_endian() {
        let map = HashMap::from([('a', 0x0102u16)]);
        assert_eq!(encode_as_gids("ab", &map), vec![1, 2, 0, 0]);
    }
}
