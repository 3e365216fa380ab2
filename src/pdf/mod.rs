//! Layout and pagination of a [`Document`] onto a [`Canvas`].
//!
//! Every block is turned into [`pager::Unit`]s which are then placed top to
//! bottom, breaking pages between units. Top-level items are processed one at
//! a time so that progress can be reported and cancellation honoured. After
//! the main pass the footnotes are drawn into the space reserved for them and
//! internal links are bound to the positions of their targets.

mod blocks;
mod canvas;
mod footnotes;
mod layout;
mod pager;
mod table;
mod writer;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::Result;
use crate::math::MathRasterizer;
use crate::md::is_absolute_url;
use crate::model::{Document, Item};
use crate::options::RenderOptions;
use crate::resources::{FileLoader, ImageCache, ResourceLoader};
use crate::syntax::SyntaxRegistry;

pub use canvas::{Canvas, Font, FontMetrics, LinkTarget};
pub use writer::PdfCanvas;

use blocks::Block;
use footnotes::Footnotes;
use pager::{Halt, LayoutMode, Pager, Prim, Sink, Unit, place};

/// Cooperative cancellation, polled between layout steps.
pub trait CancelToken: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancelToken for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Token that never cancels.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// How a render ended when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Done,
    Cancelled,
}

/// Horizontal frame a block is laid out in.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Ctx {
    /// Absolute left edge.
    pub(crate) x: f32,
    pub(crate) width: f32,
    pub(crate) scale: f32,
    /// Footnote references are not followed inside footnotes.
    pub(crate) in_footnote: bool,
}

impl Ctx {
    pub(crate) fn indent(self, by: f32) -> Ctx {
        Ctx {
            x: self.x + by,
            width: (self.width - by).max(0.0),
            ..self
        }
    }
}

/// Link whose target is only known once the whole document is laid out.
struct PendingLink {
    page: usize,
    rect: [f32; 4],
    label: String,
}

/// Lays documents out with a fixed set of options and collaborators.
#[derive(Clone)]
pub struct Renderer {
    opts: RenderOptions,
    loader: Arc<dyn ResourceLoader>,
    syntax: Arc<SyntaxRegistry>,
    math: Option<Arc<dyn MathRasterizer>>,
}

impl Renderer {
    pub fn new(opts: RenderOptions) -> Self {
        Renderer {
            opts,
            loader: Arc::new(FileLoader),
            syntax: Arc::new(SyntaxRegistry::new()),
            math: None,
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_syntax(mut self, syntax: Arc<SyntaxRegistry>) -> Self {
        self.syntax = syntax;
        self
    }

    pub fn with_math(mut self, math: Arc<dyn MathRasterizer>) -> Self {
        self.math = Some(math);
        self
    }

    pub fn options(&self) -> &RenderOptions {
        &self.opts
    }

    /// A canvas of the configured page size.
    pub fn canvas(&self) -> PdfCanvas {
        PdfCanvas::new(self.opts.page_width, self.opts.page_height)
    }

    /// Lay `doc` out onto `canvas`. `progress` receives the percentage of
    /// top-level items processed. On failure or cancellation the pages drawn
    /// so far stay on the canvas.
    pub fn render<C: Canvas>(
        &self,
        canvas: &mut C,
        doc: &Document,
        cancel: &dyn CancelToken,
        progress: &mut dyn FnMut(u8),
    ) -> Result<Completion> {
        let t0 = Instant::now();
        let mut engine = Engine {
            canvas,
            opts: &self.opts,
            doc,
            syntax: &self.syntax,
            math: self.math.as_deref(),
            cancel,
            images: ImageCache::new(Arc::clone(&self.loader)),
            pager: Pager::new(&self.opts),
            notes: Footnotes::default(),
            dests: HashMap::new(),
            pending: Vec::new(),
        };
        if engine.canvas.page_count() == 0 {
            engine.canvas.new_page();
        }

        let outcome = engine.run(progress);
        let t_layout = t0.elapsed();
        let outcome = outcome.and_then(|()| engine.draw_footnotes());
        engine.bind_links();
        log::info!(
            "Render phases: layout={:?}, footnotes={:?}, pages={}",
            t_layout,
            t0.elapsed() - t_layout,
            engine.canvas.page_count()
        );

        match outcome {
            Ok(()) => Ok(Completion::Done),
            Err(Halt::Cancelled) => {
                log::info!("Render cancelled after {} pages", engine.canvas.page_count());
                Ok(Completion::Cancelled)
            }
            Err(Halt::Failed(e)) => Err(e),
        }
    }
}

/// State of one render.
pub(crate) struct Engine<'a, C: Canvas> {
    pub(crate) canvas: &'a mut C,
    pub(crate) opts: &'a RenderOptions,
    pub(crate) doc: &'a Document,
    pub(crate) syntax: &'a SyntaxRegistry,
    pub(crate) math: Option<&'a dyn MathRasterizer>,
    cancel: &'a dyn CancelToken,
    pub(crate) images: ImageCache,
    pub(crate) pager: Pager,
    pub(crate) notes: Footnotes,
    /// Label to page and y of the target.
    dests: HashMap<String, (usize, f32)>,
    pending: Vec<PendingLink>,
}

impl<'a, C: Canvas> Engine<'a, C> {
    pub(crate) fn check_cancel(&self) -> std::result::Result<(), Halt> {
        if self.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn body_ctx(&self) -> Ctx {
        Ctx {
            x: self.opts.margins.left,
            width: self.opts.body_width(),
            scale: 1.0,
            in_footnote: false,
        }
    }

    pub(crate) fn draw_sink(&mut self) -> DrawSink<'_, C> {
        DrawSink {
            canvas: &mut *self.canvas,
            notes: &mut self.notes,
            dests: &mut self.dests,
            pending: &mut self.pending,
            cancel: self.cancel,
        }
    }

    fn draw(&mut self, units: &[Unit]) -> std::result::Result<(), Halt> {
        let mut sink = DrawSink {
            canvas: &mut *self.canvas,
            notes: &mut self.notes,
            dests: &mut self.dests,
            pending: &mut self.pending,
            cancel: self.cancel,
        };
        place(&mut self.pager, LayoutMode::Draw, units, &mut sink)?;
        Ok(())
    }

    /// Main pass over the top-level blocks.
    fn run(&mut self, progress: &mut dyn FnMut(u8)) -> std::result::Result<(), Halt> {
        let doc = self.doc;
        let ctx = self.body_ctx();
        let blocks = blocks::blocks(&doc.items);
        let total = blocks.len().max(1);
        let mut lookahead: Option<Vec<Unit>> = None;
        let mut reported = None;

        for (i, block) in blocks.iter().enumerate() {
            self.check_cancel()?;

            if let Block::Item(Item::PageBreak) = block {
                if i + 1 < blocks.len() && !self.pager.at_page_top() {
                    let mut pager = self.pager.clone();
                    pager.next_page(&mut self.draw_sink());
                    self.pager = pager;
                }
            } else {
                let mut units = Vec::new();
                if i > 0 {
                    units.extend(self.gap_between(&blocks[i - 1], block, ctx)?);
                }
                match lookahead.take() {
                    Some(cached) => units.extend(cached),
                    None => units.extend(self.block_group_units(block, ctx)?),
                }
                let next = blocks.get(i + 1).filter(|b| !matches!(b, Block::Item(Item::PageBreak)));
                if let (Block::Item(Item::Heading(_)), Some(next)) = (block, next) {
                    let mut next_units = Vec::new();
                    next_units.extend(self.gap_between(block, next, ctx)?);
                    let gap = next_units.len();
                    next_units.extend(self.block_group_units(next, ctx)?);
                    let keep = self.measure(LayoutMode::Minimum, &next_units)?;
                    if let Some(last) = units.last_mut() {
                        last.keep_with_next = keep;
                    }
                    lookahead = Some(next_units.split_off(gap));
                }
                self.draw(&units)?;
            }

            let pct = ((i + 1) * 100 / total) as u8;
            if reported != Some(pct) {
                reported = Some(pct);
                progress(pct);
            }
        }
        Ok(())
    }

    /// Bind internal links to the positions recorded for their targets.
    fn bind_links(&mut self) {
        for link in std::mem::take(&mut self.pending) {
            match self.dests.get(&link.label) {
                Some(&(page, y)) => {
                    self.canvas
                        .add_link(link.page, link.rect, LinkTarget::Position { page, y })
                }
                None => log::warn!("Link target not found: {}", link.label),
            }
        }
    }
}

/// Draws placed units and records what they reference.
pub(crate) struct DrawSink<'s, C: Canvas> {
    canvas: &'s mut C,
    notes: &'s mut Footnotes,
    dests: &'s mut HashMap<String, (usize, f32)>,
    pending: &'s mut Vec<PendingLink>,
    cancel: &'s dyn CancelToken,
}

impl<C: Canvas> DrawSink<'_, C> {
    fn draw_prim(&mut self, prim: &Prim, top: f32) {
        let color = match prim {
            Prim::Text { color, .. } | Prim::Circle { color, .. } => *color,
            Prim::Line { color, .. } | Prim::Rect { color, .. } => Some(*color),
            Prim::Image { .. } => None,
        };
        if let Some(c) = color {
            self.canvas.set_color(c);
        }
        match prim {
            Prim::Text { x, dy, text, font, .. } => {
                self.canvas.draw_text(*x, top - dy, text, *font)
            }
            Prim::Line {
                x1,
                dy1,
                x2,
                dy2,
                width,
                ..
            } => self.canvas.draw_line(*x1, top - dy1, *x2, top - dy2, *width),
            Prim::Rect { x, dy, w, h, .. } => self.canvas.draw_rectangle(*x, top - dy - h, *w, *h),
            Prim::Circle { x, dy, r, .. } => self.canvas.draw_circle(*x, top - dy, *r),
            Prim::Image { x, dy, w, h, image } => {
                self.canvas.draw_image(*x, top - dy - h, image, *w, *h)
            }
        }
        if color.is_some() {
            self.canvas.restore_color();
        }
    }
}

impl<C: Canvas> Sink for DrawSink<'_, C> {
    fn enter_page(&mut self, page: usize) {
        while self.canvas.page_count() <= page {
            self.canvas.new_page();
        }
        self.canvas.set_page(page);
    }

    fn emit(
        &mut self,
        pager: &mut Pager,
        page: usize,
        top: f32,
        unit: &Unit,
    ) -> std::result::Result<(), Halt> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        for prim in &unit.prims {
            self.draw_prim(prim, top);
        }
        for link in &unit.links {
            let rect = [link.x, top - link.dy - link.h, link.x + link.w, top - link.dy];
            if is_absolute_url(&link.url) {
                self.canvas.add_link(page, rect, LinkTarget::Uri(link.url.clone()));
            } else {
                self.pending.push(PendingLink {
                    page,
                    rect,
                    label: link.url.clone(),
                });
            }
        }
        for label in &unit.anchors {
            self.dests.entry(label.clone()).or_insert((page, top));
        }
        for id in &unit.footnotes {
            self.notes.reserve(pager, id)?;
        }
        Ok(())
    }
}

/// Lay `doc` out on a fresh [`PdfCanvas`] and serialize it.
pub fn render(doc: &Document, opts: &RenderOptions) -> Result<Vec<u8>> {
    let renderer = Renderer::new(opts.clone());
    let mut canvas = renderer.canvas();
    renderer.render(&mut canvas, doc, &NeverCancel, &mut |_| {})?;
    canvas.finish()
}

#[cfg(test)]
mod tests {
    use super::canvas::testing::{Op, RecordingCanvas};
    use super::*;
    use crate::error::Error;
    use crate::model::{
        Footnote, FootnoteRef, Heading, Link, List, ListItem, ListKind, ListStart, Paragraph, Text,
        TextOptions,
    };

    fn text(s: &str) -> Item {
        Item::Text(Text {
            text: s.into(),
            opts: TextOptions::PLAIN,
            space_before: true,
            space_after: true,
        })
    }

    fn para(s: &str) -> Item {
        Item::Paragraph(Paragraph { items: vec![text(s)] })
    }

    fn render_doc(doc: &Document) -> RecordingCanvas {
        let mut canvas = RecordingCanvas::default();
        let done = Renderer::new(RenderOptions::default())
            .render(&mut canvas, doc, &NeverCancel, &mut |_| {})
            .unwrap();
        assert_eq!(done, Completion::Done);
        canvas
    }

    fn long_text(words: usize) -> String {
        (0..words).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn text_flows_onto_new_pages() {
        let doc = Document {
            items: (0..40).map(|_| para(&long_text(60))).collect(),
            ..Document::default()
        };
        let canvas = render_doc(&doc);
        assert!(canvas.pages > 1);
        let opts = RenderOptions::default();
        for (_, op) in &canvas.ops {
            if let Op::Text { y, .. } = op {
                assert!(*y >= opts.margins.bottom && *y <= opts.page_height - opts.margins.top);
            }
        }
    }

    #[test]
    fn page_break_starts_a_page_unless_last() {
        let doc = Document {
            items: vec![para("one"), Item::PageBreak, para("two"), Item::PageBreak],
            ..Document::default()
        };
        let canvas = render_doc(&doc);
        assert_eq!(canvas.pages, 2);
        let texts = canvas.texts();
        assert_eq!(texts[0].0, 0);
        assert_eq!(texts[1].0, 1);
    }

    #[test]
    fn heading_is_not_left_alone_at_a_page_bottom() {
        let heading = Item::Heading(Heading {
            text: Paragraph { items: vec![text("Title")] },
            level: 1,
            label: "#title/doc.md".into(),
        });
        let items: Vec<Item> = (0..60).map(|i| para(&format!("line {i}"))).collect();
        for n in 1..60 {
            let mut trial = items[..n].to_vec();
            trial.push(heading.clone());
            trial.push(para("after"));
            let canvas = render_doc(&Document {
                items: trial,
                ..Document::default()
            });
            let texts = canvas.texts();
            let title = texts.iter().find(|t| t.2 == "Title").unwrap();
            let after = texts.iter().find(|t| t.2 == "after").unwrap();
            assert_eq!(
                title.0, after.0,
                "heading separated from its paragraph with {n} lines before"
            );
        }
    }

    #[test]
    fn internal_links_resolve_to_heading_positions() {
        let doc = Document {
            items: vec![
                Item::Paragraph(Paragraph {
                    items: vec![Item::Link(Link {
                        url: "#second/doc.md".into(),
                        text: "jump".into(),
                        opts: TextOptions::PLAIN,
                        img: None,
                    })],
                }),
                Item::PageBreak,
                Item::Heading(Heading {
                    text: Paragraph { items: vec![text("Second")] },
                    level: 2,
                    label: "#second/doc.md".into(),
                }),
                Item::Paragraph(Paragraph {
                    items: vec![Item::Link(Link {
                        url: "https://example.org".into(),
                        text: String::new(),
                        opts: TextOptions::PLAIN,
                        img: None,
                    })],
                }),
            ],
            ..Document::default()
        };
        let canvas = render_doc(&doc);
        let targets: Vec<&LinkTarget> = canvas.links.iter().map(|l| &l.2).collect();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&&LinkTarget::Uri("https://example.org".into())));
        let top = RenderOptions::default().page_height - RenderOptions::default().margins.top;
        assert!(targets.contains(&&LinkTarget::Position { page: 1, y: top }));
    }

    #[test]
    fn unresolved_internal_links_are_skipped() {
        let doc = Document {
            items: vec![Item::Paragraph(Paragraph {
                items: vec![Item::Link(Link {
                    url: "#nowhere/doc.md".into(),
                    text: "lost".into(),
                    opts: TextOptions::PLAIN,
                    img: None,
                })],
            })],
            ..Document::default()
        };
        assert!(render_doc(&doc).links.is_empty());
    }

    #[test]
    fn ordered_lists_continue_numbering() {
        let item = |kind, start, number, s: &str| ListItem {
            kind,
            start,
            number,
            items: vec![para(s)],
        };
        let doc = Document {
            items: vec![Item::List(List {
                items: vec![
                    item(ListKind::Ordered, ListStart::Start, 3, "a"),
                    item(ListKind::Ordered, ListStart::Continue, 7, "b"),
                    item(ListKind::Unordered, ListStart::Start, 0, "c"),
                    item(ListKind::Ordered, ListStart::Continue, 5, "d"),
                ],
            })],
            ..Document::default()
        };
        let canvas = render_doc(&doc);
        let texts: Vec<String> = canvas.texts().into_iter().map(|t| t.2).collect();
        assert_eq!(texts, ["3.", "a", "4.", "b", "c", "5.", "d"].map(String::from));
        assert_eq!(canvas.ops.iter().filter(|(_, op)| matches!(op, Op::Circle { .. })).count(), 1);
    }

    #[test]
    fn footnotes_are_numbered_and_drawn_below_the_text() {
        let mut doc = Document {
            items: vec![Item::Paragraph(Paragraph {
                items: vec![
                    text("claim"),
                    Item::FootnoteRef(FootnoteRef { id: "#^b/doc.md".into() }),
                    text("and"),
                    Item::FootnoteRef(FootnoteRef { id: "#^a/doc.md".into() }),
                ],
            })],
            ..Document::default()
        };
        doc.footnotes.insert("#^a/doc.md".into(), Footnote { items: vec![para("first")] });
        doc.footnotes.insert("#^b/doc.md".into(), Footnote { items: vec![para("second")] });
        let canvas = render_doc(&doc);
        let texts = canvas.texts();
        let y_of = |s: &str| texts.iter().find(|t| t.2 == s).map(|t| t.1).unwrap();
        assert!(y_of("second") < y_of("claim"));
        assert!(y_of("first") < y_of("second"), "footnote b was referenced first");
        assert!(texts.iter().any(|t| t.2 == "1."));
        assert!(texts.iter().any(|t| t.2 == "2."));
        assert!(y_of("first") >= RenderOptions::default().margins.bottom);
    }

    #[test]
    fn missing_font_fails_the_render() {
        let opts = RenderOptions {
            text_font: "missing".into(),
            ..RenderOptions::default()
        };
        let doc = Document {
            items: vec![para("x")],
            ..Document::default()
        };
        let mut canvas = RecordingCanvas::default();
        let err = Renderer::new(opts)
            .render(&mut canvas, &doc, &NeverCancel, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::FontNotCreatable { .. }));
        assert_eq!(canvas.pages, 1, "the started page is kept");
    }

    #[test]
    fn cancelled_render_stops_early() {
        let doc = Document {
            items: (0..50).map(|_| para(&long_text(80))).collect(),
            ..Document::default()
        };
        let flag = AtomicBool::new(true);
        let mut canvas = RecordingCanvas::default();
        let mut reports = Vec::new();
        let done = Renderer::new(RenderOptions::default())
            .render(&mut canvas, &doc, &flag, &mut |p| reports.push(p))
            .unwrap();
        assert_eq!(done, Completion::Cancelled);
        assert!(canvas.ops.is_empty());
        assert!(reports.is_empty());
    }

    #[test]
    fn progress_reaches_one_hundred() {
        let doc = Document {
            items: (0..7).map(|i| para(&format!("p{i}"))).collect(),
            ..Document::default()
        };
        let mut canvas = RecordingCanvas::default();
        let mut reports = Vec::new();
        Renderer::new(RenderOptions::default())
            .render(&mut canvas, &doc, &NeverCancel, &mut |p| reports.push(p))
            .unwrap();
        assert_eq!(reports.len(), 7);
        assert_eq!(reports.last(), Some(&100));
        assert!(reports.windows(2).all(|w| w[0] < w[1]));
    }
}
