//! [`Canvas`] backed by `pdf-writer`.
//!
//! Drawing calls are recorded per page and turned into content streams on
//! [`PdfCanvas::finish`], after the fonts have been subsetted to the
//! characters that were actually measured.

use std::collections::HashMap;

use pdf_writer::types::{ActionType, AnnotationType};
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};

use crate::error::Result;
use crate::fonts::{EmbeddedFont, FontBook};
use crate::resources::{ImageData, LoadedImage};

use super::canvas::{Canvas, Font, FontMetrics, LinkTarget};

/// Control point distance for a quarter circle drawn as a cubic Bezier.
const KAPPA: f32 = 0.552_284_8;

enum Op {
    Text {
        x: f32,
        y: f32,
        font: Font,
        text: String,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        width: f32,
    },
    Rect {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
    },
    Circle {
        x: f32,
        y: f32,
        r: f32,
    },
    Image {
        name: String,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
    },
    Color([u8; 3]),
}

#[derive(Default)]
struct PageContent {
    ops: Vec<Op>,
    links: Vec<([f32; 4], LinkTarget)>,
}

pub struct PdfCanvas {
    fonts: FontBook,
    pdf: Pdf,
    next_id: i32,
    pages: Vec<PageContent>,
    current: usize,
    colors: Vec<[u8; 3]>,
    /// Image key -> (resource name, XObject)
    images: HashMap<String, (String, Ref)>,
    width: f32,
    height: f32,
}

const BLACK: [u8; 3] = [0, 0, 0];

fn rgb(c: [u8; 3]) -> (f32, f32, f32) {
    (f32::from(c[0]) / 255.0, f32::from(c[1]) / 255.0, f32::from(c[2]) / 255.0)
}

impl PdfCanvas {
    pub fn new(width: f32, height: f32) -> Self {
        PdfCanvas {
            fonts: FontBook::new(),
            pdf: Pdf::new(),
            // 1 and 2 are the catalog and the page tree.
            next_id: 3,
            pages: Vec::new(),
            current: 0,
            colors: Vec::new(),
            images: HashMap::new(),
            width,
            height,
        }
    }

    fn alloc(&mut self) -> Ref {
        let r = Ref::new(self.next_id);
        self.next_id += 1;
        r
    }

    fn push(&mut self, op: Op) {
        if let Some(page) = self.pages.get_mut(self.current) {
            page.ops.push(op);
        }
    }

    fn current_color(&self) -> [u8; 3] {
        self.colors.last().copied().unwrap_or(BLACK)
    }

    /// Write the XObject for `image` on first use.
    fn image_name(&mut self, image: &LoadedImage) -> String {
        if let Some((name, _)) = self.images.get(&image.key) {
            return name.clone();
        }
        let xobj_ref = self.alloc();
        let name = format!("Im{}", self.images.len() + 1);
        let (w, h) = (image.width as i32, image.height as i32);

        match &image.data {
            ImageData::Jpeg(data) => {
                let mut xobj = self.pdf.image_xobject(xobj_ref, data);
                xobj.filter(Filter::DctDecode);
                xobj.width(w);
                xobj.height(h);
                xobj.color_space().device_rgb();
                xobj.bits_per_component(8);
            }
            ImageData::Rgba(pixels) => {
                let rgb_data: Vec<u8> = pixels
                    .chunks_exact(4)
                    .flat_map(|p| [p[0], p[1], p[2]])
                    .collect();
                let has_alpha = pixels.chunks_exact(4).any(|p| p[3] < 255);
                let smask_ref = if has_alpha {
                    let alpha: Vec<u8> = pixels.chunks_exact(4).map(|p| p[3]).collect();
                    let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&alpha, 6);
                    let mask_ref = self.alloc();
                    let mut mask = self.pdf.image_xobject(mask_ref, &compressed);
                    mask.filter(Filter::FlateDecode);
                    mask.width(w);
                    mask.height(h);
                    mask.color_space().device_gray();
                    mask.bits_per_component(8);
                    Some(mask_ref)
                } else {
                    None
                };

                let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&rgb_data, 6);
                let mut xobj = self.pdf.image_xobject(xobj_ref, &compressed);
                xobj.filter(Filter::FlateDecode);
                xobj.width(w);
                xobj.height(h);
                xobj.color_space().device_rgb();
                xobj.bits_per_component(8);
                if let Some(mask_ref) = smask_ref {
                    xobj.s_mask(mask_ref);
                }
            }
        }

        self.images.insert(image.key.clone(), (name.clone(), xobj_ref));
        name
    }

    /// Assemble the document: fonts, content streams, annotations and the
    /// page tree.
    pub fn finish(self) -> Result<Vec<u8>> {
        let t0 = std::time::Instant::now();
        let PdfCanvas {
            fonts,
            mut pdf,
            mut next_id,
            mut pages,
            images,
            width,
            height,
            ..
        } = self;
        let mut alloc = || {
            let r = Ref::new(next_id);
            next_id += 1;
            r
        };
        let catalog_id = Ref::new(1);
        let pages_id = Ref::new(2);

        if pages.is_empty() {
            pages.push(PageContent::default());
        }

        let embedded = fonts.embed(&mut pdf, &mut alloc);
        let t_fonts = t0.elapsed();

        let n = pages.len();
        let page_ids: Vec<Ref> = (0..n).map(|_| alloc()).collect();
        let content_ids: Vec<Ref> = (0..n).map(|_| alloc()).collect();

        let mut annot_refs: Vec<Vec<Ref>> = Vec::with_capacity(n);
        for page in &pages {
            let mut refs = Vec::with_capacity(page.links.len());
            for (rect, target) in &page.links {
                let goto = match target {
                    LinkTarget::Uri(_) => None,
                    LinkTarget::Position { page, y } => match page_ids.get(*page) {
                        Some(&r) => Some((r, *y)),
                        None => continue,
                    },
                };
                let annot_ref = alloc();
                let mut annot = pdf.annotation(annot_ref);
                annot
                    .subtype(AnnotationType::Link)
                    .rect(Rect::new(rect[0], rect[1], rect[2], rect[3]))
                    .border(0.0, 0.0, 0.0, None);
                match (target, goto) {
                    (_, Some((target_ref, y))) => {
                        annot
                            .action()
                            .action_type(ActionType::GoTo)
                            .destination()
                            .page(target_ref)
                            .xyz(0.0, y, None);
                    }
                    (LinkTarget::Uri(url), None) => {
                        annot
                            .action()
                            .action_type(ActionType::Uri)
                            .uri(Str(url.as_bytes()));
                    }
                    (LinkTarget::Position { .. }, None) => {}
                }
                refs.push(annot_ref);
            }
            annot_refs.push(refs);
        }

        for (i, page) in pages.iter().enumerate() {
            let raw = page_content(&page.ops, &embedded).finish();
            let compressed = miniz_oxide::deflate::compress_to_vec_zlib(raw.as_slice(), 6);
            pdf.stream(content_ids[i], &compressed).filter(Filter::FlateDecode);
        }

        pdf.catalog(catalog_id).pages(pages_id);
        pdf.pages(pages_id).kids(page_ids.iter().copied()).count(n as i32);

        let mut xobjects: Vec<&(String, Ref)> = images.values().collect();
        xobjects.sort_by(|a, b| a.0.cmp(&b.0));

        for i in 0..n {
            let mut page = pdf.page(page_ids[i]);
            page.media_box(Rect::new(0.0, 0.0, width, height))
                .parent(pages_id)
                .contents(content_ids[i]);
            if !annot_refs[i].is_empty() {
                page.annotations(annot_refs[i].iter().copied());
            }
            let mut resources = page.resources();
            {
                let mut fonts = resources.fonts();
                for f in &embedded {
                    fonts.pair(Name(f.pdf_name.as_bytes()), f.font_ref);
                }
            }
            if !xobjects.is_empty() {
                let mut x = resources.x_objects();
                for (name, r) in &xobjects {
                    x.pair(Name(name.as_bytes()), *r);
                }
            }
        }

        let bytes = pdf.finish();
        log::info!(
            "PDF assembly: fonts={:.1}ms, total={:.1}ms, {n} pages, {} fonts, {} images",
            t_fonts.as_secs_f64() * 1000.0,
            t0.elapsed().as_secs_f64() * 1000.0,
            embedded.len(),
            xobjects.len(),
        );
        Ok(bytes)
    }
}

fn page_content(ops: &[Op], fonts: &[EmbeddedFont]) -> Content {
    let mut content = Content::new();
    for op in ops {
        match op {
            Op::Color(c) => {
                let (r, g, b) = rgb(*c);
                content.set_fill_rgb(r, g, b);
                content.set_stroke_rgb(r, g, b);
            }
            Op::Text { x, y, font, text } => {
                let Some(f) = fonts.get(font.id) else {
                    continue;
                };
                content.begin_text();
                content.set_font(Name(f.pdf_name.as_bytes()), font.size);
                content.next_line(*x, *y);
                content.show(Str(&f.encode(text)));
                content.end_text();
            }
            Op::Line { x1, y1, x2, y2, width } => {
                content.set_line_width(*width);
                content.move_to(*x1, *y1);
                content.line_to(*x2, *y2);
                content.stroke();
            }
            Op::Rect { x, y, w, h } => {
                content.rect(*x, *y, *w, *h);
                content.fill_nonzero();
            }
            Op::Circle { x, y, r } => {
                let k = r * KAPPA;
                content.move_to(x + r, *y);
                content.cubic_to(x + r, y + k, x + k, y + r, *x, y + r);
                content.cubic_to(x - k, y + r, x - r, y + k, x - r, *y);
                content.cubic_to(x - r, y - k, x - k, y - r, *x, y - r);
                content.cubic_to(x + k, y - r, x + r, y - k, x + r, *y);
                content.close_path();
                content.fill_nonzero();
            }
            Op::Image { name, x, y, w, h } => {
                content.save_state();
                content.transform([*w, 0.0, 0.0, *h, *x, *y]);
                content.x_object(Name(name.as_bytes()));
                content.restore_state();
            }
        }
    }
    content
}

impl FontMetrics for PdfCanvas {
    fn create_font(
        &mut self,
        family: &str,
        bold: bool,
        italic: bool,
        size: f32,
        scale: f32,
    ) -> Result<Font> {
        let id = self.fonts.load(family, bold, italic)?;
        Ok(Font {
            id,
            size: size * scale,
        })
    }

    fn string_width(&mut self, font: Font, text: &str) -> f32 {
        self.fonts.face_mut(font.id).text_width(text, font.size)
    }

    fn line_spacing(&self, font: Font) -> f32 {
        self.fonts.face(font.id).line_spacing(font.size)
    }

    fn ascent(&self, font: Font) -> f32 {
        self.fonts.face(font.id).ascent(font.size)
    }

    fn descent(&self, font: Font) -> f32 {
        self.fonts.face(font.id).descent(font.size)
    }
}

impl Canvas for PdfCanvas {
    fn new_page(&mut self) -> usize {
        self.pages.push(PageContent::default());
        self.current = self.pages.len() - 1;
        // Content streams start black; re-apply a color pushed earlier.
        if let Some(&c) = self.colors.last() {
            self.push(Op::Color(c));
        }
        self.current
    }

    fn set_page(&mut self, page: usize) {
        if page < self.pages.len() {
            self.current = page;
            let c = self.current_color();
            self.push(Op::Color(c));
        }
    }

    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn draw_text(&mut self, x: f32, y: f32, text: &str, font: Font) {
        if text.is_empty() {
            return;
        }
        // Measuring records the characters for the font subset.
        self.fonts.face_mut(font.id).text_width(text, font.size);
        self.push(Op::Text {
            x,
            y,
            font,
            text: text.to_string(),
        });
    }

    fn draw_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, width: f32) {
        self.push(Op::Line { x1, y1, x2, y2, width });
    }

    fn draw_rectangle(&mut self, x: f32, y: f32, w: f32, h: f32) {
        self.push(Op::Rect { x, y, w, h });
    }

    fn draw_circle(&mut self, x: f32, y: f32, r: f32) {
        self.push(Op::Circle { x, y, r });
    }

    fn draw_image(&mut self, x: f32, y: f32, image: &LoadedImage, w: f32, h: f32) {
        let name = self.image_name(image);
        self.push(Op::Image { name, x, y, w, h });
    }

    fn set_color(&mut self, rgb: [u8; 3]) {
        self.colors.push(rgb);
        self.push(Op::Color(rgb));
    }

    fn restore_color(&mut self) {
        self.colors.pop();
        let c = self.current_color();
        self.push(Op::Color(c));
    }

    fn add_link(&mut self, page: usize, rect: [f32; 4], target: LinkTarget) {
        if let Some(p) = self.pages.get_mut(page) {
            p.links.push((rect, target));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[test]
    fn writes_pages_and_links() {
        let mut canvas = PdfCanvas::new(595.0, 842.0);
        let font = canvas.create_font("Helvetica", false, false, 12.0, 1.0).unwrap();
        canvas.new_page();
        canvas.draw_text(72.0, 700.0, "Hello", font);
        canvas.set_color([255, 0, 0]);
        canvas.draw_circle(80.0, 650.0, 2.0);
        canvas.restore_color();
        canvas.new_page();
        let uri = LinkTarget::Uri("https://example.org".into());
        canvas.add_link(0, [72.0, 690.0, 120.0, 710.0], uri);
        canvas.add_link(0, [72.0, 600.0, 120.0, 620.0], LinkTarget::Position { page: 1, y: 770.0 });
        assert_eq!(canvas.page_count(), 2);

        let bytes = canvas.finish().unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(count(&bytes, b"/Count 2"), 1);
        assert_eq!(count(&bytes, b"/Subtype /Link"), 2);
        assert_eq!(count(&bytes, b"(https://example.org)"), 1);
        assert_eq!(count(&bytes, b"/S /GoTo"), 1);
        assert!(count(&bytes, b"/Helvetica") >= 1);
    }

    #[test]
    fn empty_canvas_still_has_a_page() {
        let bytes = PdfCanvas::new(595.0, 842.0).finish().unwrap();
        assert_eq!(count(&bytes, b"/Count 1"), 1);
    }

    #[test]
    fn images_are_embedded_once() {
        let img = LoadedImage::from_rgba("px", 1, 1, vec![1, 2, 3, 128]);
        let mut canvas = PdfCanvas::new(595.0, 842.0);
        canvas.new_page();
        canvas.draw_image(10.0, 10.0, &img, 5.0, 5.0);
        canvas.draw_image(20.0, 10.0, &img, 5.0, 5.0);
        let bytes = canvas.finish().unwrap();
        assert_eq!(count(&bytes, b"/Subtype /Image"), 2, "image plus soft mask");
        assert_eq!(count(&bytes, b"/SMask"), 1);
    }
}
