//! Block items to units.

use std::sync::Arc;

use crate::math;
use crate::model::{Blockquote, Code, Heading, Item, List, ListKind, ListStart, TextOptions};
use crate::resources::LoadedImage;
use crate::syntax::ColorRole;

use super::canvas::Canvas;
use super::layout::TextStyle;
use super::pager::{Halt, LayoutMode, LinkBox, Prim, Unit, place};
use super::{Ctx, Engine};

/// Space above a heading.
const BEFORE_HEADING: f32 = 15.0;
const BLOCKQUOTE_OFFSET: f32 = 10.0;
const BLOCKQUOTE_MARK_WIDTH: f32 = 3.0;
const CODE_PADDING: f32 = 5.0;

/// One block of a container: a block item or a run of inline items.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Block<'d> {
    Item(&'d Item),
    Inline(&'d [Item]),
}

fn is_inline(item: &Item) -> bool {
    match item {
        Item::Text(_) | Item::Link(_) | Item::LineBreak | Item::FootnoteRef(_) => true,
        Item::Code(c) => c.inlined,
        Item::Math(m) => m.inlined,
        _ => false,
    }
}

/// Group consecutive inline items into paragraphs.
pub(crate) fn blocks(items: &[Item]) -> Vec<Block<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    while start < items.len() {
        if is_inline(&items[start]) {
            let len = items[start..].iter().take_while(|i| is_inline(i)).count();
            out.push(Block::Inline(&items[start..start + len]));
            start += len;
        } else {
            out.push(Block::Item(&items[start]));
            start += 1;
        }
    }
    out
}

impl Block<'_> {
    fn is_spacing_free(&self) -> bool {
        matches!(self, Block::Item(Item::Anchor(_) | Item::PageBreak))
    }

    fn is_heading(&self) -> bool {
        matches!(self, Block::Item(Item::Heading(_)))
    }
}

/// Put `marker` on the first line of `units`, aligned to its baseline.
/// Units without a baseline (images, code) get it at `ascent`.
pub(crate) fn attach_marker(units: &mut [Unit], ascent: f32, mut marker: Prim) {
    let target = units
        .iter()
        .position(|u| u.baseline.is_some())
        .or_else(|| units.iter().position(|u| !u.gap && u.height > 0.0));
    let Some(index) = target else {
        return;
    };
    let unit = &mut units[index];
    marker.shift_down(unit.baseline.unwrap_or(ascent));
    unit.prims.insert(0, marker);
}

pub(crate) struct Formula {
    pub(crate) image: Arc<LoadedImage>,
    pub(crate) width: f32,
    pub(crate) height: f32,
    /// Distance from the bottom to the baseline.
    pub(crate) baseline: f32,
}

impl<C: Canvas> Engine<'_, C> {
    pub(crate) fn body_style(&self) -> TextStyle {
        TextStyle {
            size: self.opts.text_font_size,
            bold: false,
            align: None,
        }
    }

    /// Vertical space between two blocks of a container.
    pub(crate) fn gap_between(
        &mut self,
        prev: &Block<'_>,
        next: &Block<'_>,
        ctx: Ctx,
    ) -> Result<Option<Unit>, Halt> {
        if prev.is_spacing_free() || next.is_spacing_free() {
            return Ok(None);
        }
        if next.is_heading() {
            return Ok(Some(Unit::gap(BEFORE_HEADING * ctx.scale)));
        }
        let font = self.text_font(TextOptions::PLAIN, self.body_style(), ctx)?;
        Ok(Some(Unit::gap(self.canvas.line_spacing(font) * 0.5)))
    }

    /// Units of a container's children. A heading is kept on the page of
    /// the first line of whatever follows it.
    pub(crate) fn items_units(&mut self, items: &[Item], ctx: Ctx) -> Result<Vec<Unit>, Halt> {
        let blocks = blocks(items);
        let mut per_block: Vec<Vec<Unit>> = Vec::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            self.check_cancel()?;
            let mut units = Vec::new();
            if i > 0 {
                units.extend(self.gap_between(&blocks[i - 1], block, ctx)?);
            }
            units.extend(self.block_group_units(block, ctx)?);
            per_block.push(units);
        }
        for i in 0..per_block.len().saturating_sub(1) {
            if blocks[i].is_heading() {
                let keep = self.measure(LayoutMode::Minimum, &per_block[i + 1])?;
                if let Some(last) = per_block[i].last_mut() {
                    last.keep_with_next = keep;
                }
            }
        }
        Ok(per_block.into_iter().flatten().collect())
    }

    pub(crate) fn measure(&mut self, mode: LayoutMode, units: &[Unit]) -> Result<f32, Halt> {
        let mut discard = super::pager::Discard;
        Ok(place(&mut self.pager, mode, units, &mut discard)?.height())
    }

    pub(crate) fn block_group_units(
        &mut self,
        block: &Block<'_>,
        ctx: Ctx,
    ) -> Result<Vec<Unit>, Halt> {
        match block {
            Block::Inline(items) => {
                let style = self.body_style();
                self.paragraph_units(items, ctx, style)
            }
            Block::Item(item) => self.block_units(item, ctx),
        }
    }

    pub(crate) fn block_units(&mut self, item: &Item, ctx: Ctx) -> Result<Vec<Unit>, Halt> {
        match item {
            Item::Heading(h) => self.heading_units(h, ctx),
            Item::Paragraph(p) => {
                let style = self.body_style();
                self.paragraph_units(&p.items, ctx, style)
            }
            Item::Blockquote(q) => self.blockquote_units(q, ctx),
            Item::List(l) => self.list_units(l, ctx),
            Item::Code(c) => self.code_units(c, ctx),
            Item::Math(m) => match self.formula_unit(&m.expr, ctx) {
                Some(unit) => Ok(vec![unit]),
                None => self.code_units(
                    &Code {
                        text: m.expr.clone(),
                        inlined: false,
                        syntax: String::new(),
                    },
                    ctx,
                ),
            },
            Item::Table(t) => self.table_units(t, ctx),
            Item::Image(img) => Ok(vec![self.image_unit(&img.url, None, ctx)?]),
            Item::HorizontalLine => self.rule_units(ctx),
            Item::Anchor(label) => Ok(vec![Unit::anchor(label.clone())]),
            // Only meaningful at the top level.
            Item::PageBreak => Ok(Vec::new()),
            inline => {
                let style = self.body_style();
                self.paragraph_units(std::slice::from_ref(inline), ctx, style)
            }
        }
    }

    fn heading_units(&mut self, heading: &Heading, ctx: Ctx) -> Result<Vec<Unit>, Halt> {
        let style = TextStyle {
            size: self.opts.text_font_size + 16.0 - 2.0 * f32::from(heading.level),
            bold: true,
            align: Some(crate::model::Alignment::Left),
        };
        let mut units = self.paragraph_units(&heading.text.items, ctx, style)?;
        match units.first_mut() {
            Some(first) => first.anchors.push(heading.label.clone()),
            None => units.push(Unit::anchor(heading.label.clone())),
        }
        Ok(units)
    }

    fn blockquote_units(&mut self, quote: &Blockquote, ctx: Ctx) -> Result<Vec<Unit>, Halt> {
        let mut units = self.items_units(&quote.items, ctx.indent(BLOCKQUOTE_OFFSET * ctx.scale))?;
        for unit in units.iter_mut().filter(|u| u.height > 0.0) {
            unit.prims.insert(
                0,
                Prim::Rect {
                    x: ctx.x,
                    dy: 0.0,
                    w: BLOCKQUOTE_MARK_WIDTH * ctx.scale,
                    h: unit.height,
                    color: self.opts.border_color,
                },
            );
        }
        Ok(units)
    }

    fn list_units(&mut self, list: &List, ctx: Ctx) -> Result<Vec<Unit>, Halt> {
        let font = self.text_font(TextOptions::PLAIN, self.body_style(), ctx)?;
        let ascent = self.canvas.ascent(font);
        let space = self.canvas.string_width(font, " ");

        let mut counter = 0u32;
        let mut numbers = Vec::with_capacity(list.items.len());
        for item in &list.items {
            numbers.push(match (item.kind, item.start) {
                (ListKind::Unordered, _) => {
                    counter = 0;
                    None
                }
                (ListKind::Ordered, ListStart::Start) => {
                    counter = item.number;
                    Some(counter)
                }
                (ListKind::Ordered, ListStart::Continue) => {
                    counter = if counter == 0 { item.number } else { counter + 1 };
                    Some(counter)
                }
            });
        }
        let digits = numbers.iter().flatten().max().map_or(1, |n| n.to_string().len());
        let digit = self.canvas.string_width(font, "9");
        let dot = self.canvas.string_width(font, ".");
        let offset = digit * digits as f32 + dot + space;
        let inner = ctx.indent(offset);

        let mut units = Vec::new();
        for (item, number) in list.items.iter().zip(numbers) {
            self.check_cancel()?;
            let mut item_units = self.items_units(&item.items, inner)?;
            if item_units.iter().all(|u| u.height == 0.0) {
                let m = self.metrics(font);
                item_units.push(Unit {
                    height: m.ascent + m.descent + m.leading,
                    baseline: Some(m.leading / 2.0 + m.ascent),
                    ..Unit::default()
                });
            }
            let marker = match number {
                Some(n) => Prim::Text {
                    x: ctx.x,
                    dy: 0.0,
                    text: format!("{n}."),
                    font,
                    color: None,
                },
                None => {
                    let r = space * 0.75 / 2.0;
                    Prim::Circle {
                        x: ctx.x + r,
                        dy: -ascent * 0.35,
                        r,
                        color: None,
                    }
                }
            };
            attach_marker(&mut item_units, ascent, marker);
            units.extend(item_units);
        }
        Ok(units)
    }

    fn code_units(&mut self, code: &Code, ctx: Ctx) -> Result<Vec<Unit>, Halt> {
        let family = &self.opts.code_font;
        let font = self
            .canvas
            .create_font(family, false, false, self.opts.code_font_size, ctx.scale)?;
        let m = self.metrics(font);
        let height = m.ascent + m.descent + m.leading;
        let baseline = m.leading / 2.0 + m.ascent;
        let padding = CODE_PADDING * ctx.scale;

        let lines: Vec<&str> = code.text.split('\n').collect();
        let spans = self.syntax.prepare(&code.syntax, &lines);
        let mut units: Vec<Unit> = lines
            .iter()
            .map(|_| Unit {
                height,
                baseline: Some(baseline),
                prims: vec![Prim::Rect {
                    x: ctx.x,
                    dy: 0.0,
                    w: ctx.width,
                    h: height,
                    color: self.opts.code_background,
                }],
                ..Unit::default()
            })
            .collect();

        for span in spans {
            let line = lines[span.line];
            let x = ctx.x + padding + self.canvas.string_width(font, &line[..span.start]);
            let color = match span.role {
                ColorRole::Regular => self.opts.code_color,
                ColorRole::Keyword => self.opts.keyword_color,
                ColorRole::Comment => self.opts.comment_color,
            };
            units[span.line].prims.push(Prim::Text {
                x,
                dy: baseline,
                text: line[span.start..span.end].to_string(),
                font,
                color: Some(color),
            });
        }

        // Padding above the first and below the last line.
        if let Some(first) = units.first_mut() {
            first.height += padding;
            for p in &mut first.prims {
                p.shift_down(padding);
            }
            first.prims.insert(
                0,
                Prim::Rect {
                    x: ctx.x,
                    dy: 0.0,
                    w: ctx.width,
                    h: padding,
                    color: self.opts.code_background,
                },
            );
            first.baseline = Some(baseline + padding);
        }
        if let Some(last) = units.last_mut() {
            let y = last.height;
            last.height += padding;
            last.prims.insert(
                0,
                Prim::Rect {
                    x: ctx.x,
                    dy: y,
                    w: ctx.width,
                    h: padding,
                    color: self.opts.code_background,
                },
            );
        }
        Ok(units)
    }

    fn rule_units(&mut self, ctx: Ctx) -> Result<Vec<Unit>, Halt> {
        let font = self.text_font(TextOptions::PLAIN, self.body_style(), ctx)?;
        let height = self.canvas.line_spacing(font);
        Ok(vec![Unit {
            height,
            prims: vec![Prim::Line {
                x1: ctx.x,
                dy1: height / 2.0,
                x2: ctx.x + ctx.width,
                dy2: height / 2.0,
                width: 1.0,
                color: self.opts.border_color,
            }],
            ..Unit::default()
        }])
    }

    /// Scaled to the available width, then to the page body height left
    /// free by footnote reservations, and centred.
    pub(crate) fn image_unit(
        &mut self,
        url: &str,
        link: Option<String>,
        ctx: Ctx,
    ) -> Result<Unit, Halt> {
        let image = self.images.get(url)?;
        let width = image.width as f32 * ctx.scale;
        let height = image.height as f32 * ctx.scale;
        Ok(self.picture_unit(image, width, height, link, ctx))
    }

    fn picture_unit(
        &self,
        image: Arc<LoadedImage>,
        mut w: f32,
        mut h: f32,
        link: Option<String>,
        ctx: Ctx,
    ) -> Unit {
        if w > ctx.width {
            let k = ctx.width / w;
            w *= k;
            h *= k;
        }
        // The picture lands on the current page or the next one.
        let page = self.pager.cursor.page;
        let reserved = self.pager.reserved(page).max(self.pager.reserved(page + 1));
        let room = self.pager.body_height() - reserved;
        if h > room && room > 0.0 {
            log::debug!("Scaling picture from {h:.1}pt down to {room:.1}pt");
            let k = room / h;
            w *= k;
            h *= k;
        }
        let x = ctx.x + (ctx.width - w) / 2.0;
        Unit {
            height: h,
            prims: vec![Prim::Image {
                x,
                dy: 0.0,
                w,
                h,
                image,
            }],
            links: link
                .into_iter()
                .map(|url| LinkBox {
                    x,
                    dy: 0.0,
                    w,
                    h,
                    url,
                })
                .collect(),
            ..Unit::default()
        }
    }

    pub(crate) fn rasterize(&mut self, expr: &str, size: f32, ctx: Ctx) -> Option<Formula> {
        let rasterizer = self.math?;
        let dpi = self.opts.dpi;
        let size = size * ctx.scale;
        let Some(formula) = rasterizer.render(expr, &self.opts.math_font, size, dpi) else {
            log::warn!("Formula could not be rendered, showing its source: {expr}");
            return None;
        };
        let (width, height) = math::display_size(&formula, dpi);
        let baseline = formula.baseline * 72.0 / dpi.max(1) as f32;
        Some(Formula {
            image: Arc::new(formula.image),
            width,
            height,
            baseline,
        })
    }

    fn formula_unit(&mut self, expr: &str, ctx: Ctx) -> Option<Unit> {
        let formula = self.rasterize(expr, self.opts.math_font_size, ctx)?;
        Some(self.picture_unit(formula.image, formula.width, formula.height, None, ctx))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::model::{Document, Text};
    use crate::options::{Margins, RenderOptions};
    use crate::pdf::canvas::testing::RecordingCanvas;
    use crate::pdf::footnotes::Footnotes;
    use crate::pdf::pager::Pager;
    use crate::pdf::NeverCancel;
    use crate::resources::{FileLoader, ImageCache};
    use crate::syntax::SyntaxRegistry;

    fn text(s: &str) -> Item {
        Item::Text(Text {
            text: s.into(),
            opts: TextOptions::PLAIN,
            space_before: false,
            space_after: false,
        })
    }

    #[test]
    fn inline_runs_become_one_block() {
        let items = vec![
            text("a"),
            Item::LineBreak,
            text("b"),
            Item::HorizontalLine,
            text("c"),
        ];
        let groups = blocks(&items);
        assert_eq!(groups.len(), 3);
        assert!(matches!(groups[0], Block::Inline(run) if run.len() == 3));
        assert!(matches!(groups[1], Block::Item(Item::HorizontalLine)));
        assert!(matches!(groups[2], Block::Inline(run) if run.len() == 1));
    }

    #[test]
    fn markers_sit_on_the_first_baseline() {
        let mut units = vec![
            Unit::anchor("x".into()),
            Unit {
                height: 12.0,
                baseline: Some(9.0),
                ..Unit::default()
            },
        ];
        let marker = Prim::Circle {
            x: 0.0,
            dy: -2.0,
            r: 1.0,
            color: None,
        };
        attach_marker(&mut units, 8.0, marker);
        assert!(units[0].prims.is_empty());
        assert!(matches!(units[1].prims[0], Prim::Circle { dy, .. } if dy == 7.0));
    }

    #[test]
    fn markers_fall_back_to_the_first_visible_unit() {
        let mut units = vec![Unit {
            height: 40.0,
            ..Unit::default()
        }];
        let marker = Prim::Circle {
            x: 0.0,
            dy: 0.0,
            r: 1.0,
            color: None,
        };
        attach_marker(&mut units, 8.0, marker);
        assert!(matches!(units[0].prims[0], Prim::Circle { dy, .. } if dy == 8.0));
    }

    #[test]
    fn pictures_shrink_above_footnote_reservations() {
        let opts = RenderOptions {
            page_height: 200.0,
            margins: Margins {
                left: 10.0,
                right: 10.0,
                top: 20.0,
                bottom: 20.0,
            },
            ..RenderOptions::default()
        };
        let doc = Document::default();
        let syntax = SyntaxRegistry::new();
        let mut canvas = RecordingCanvas::default();
        let mut engine = Engine {
            canvas: &mut canvas,
            opts: &opts,
            doc: &doc,
            syntax: &syntax,
            math: None,
            cancel: &NeverCancel,
            images: ImageCache::new(Arc::new(FileLoader)),
            pager: Pager::new(&opts),
            notes: Footnotes::default(),
            dests: HashMap::new(),
            pending: Vec::new(),
        };
        let ctx = Ctx {
            x: 10.0,
            width: 100.0,
            scale: 1.0,
            in_footnote: false,
        };
        let tall = || Arc::new(LoadedImage::from_rgba("tall", 10, 40, vec![0; 10 * 40 * 4]));

        let unit = engine.picture_unit(tall(), 10.0, 400.0, None, ctx);
        assert!((unit.height - 160.0).abs() < 1e-3);

        engine.pager.reserve(1, 60.0);
        let unit = engine.picture_unit(tall(), 10.0, 400.0, None, ctx);
        assert_eq!(unit.height, 100.0);
        assert!(matches!(unit.prims[0], Prim::Image { w, .. } if w == 2.5));

        engine.pager.cursor.y = 50.0;
        let mut discard = crate::pdf::pager::Discard;
        let drawn = place(&mut engine.pager, LayoutMode::Full, &[unit], &mut discard).unwrap();
        assert_eq!(drawn.rects[0].page, 1);
        assert!(drawn.rects[0].top - drawn.rects[0].height >= engine.pager.allowed_y(1));
    }
}
