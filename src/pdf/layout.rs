//! Paragraph layout: inline items to wrapped, justified text lines.

use std::sync::Arc;

use crate::md::is_absolute_url;
use crate::model::{Alignment, Item, Link, TextOptions};
use crate::resources::LoadedImage;

use super::canvas::{Canvas, Font};
use super::pager::{Halt, LinkBox, Prim, Unit};
use super::{Ctx, Engine};

pub(crate) const BLACK: [u8; 3] = [0, 0, 0];

/// Punctuation glued to whatever precedes it.
const NO_SPACE_BEFORE: &[char] = &['.', ',', ';'];

/// Width bookkeeping of one wrapped line.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct LineWidth {
    pub(crate) words: f32,
    pub(crate) spaces: f32,
    pub(crate) space_count: usize,
    pub(crate) justify: bool,
    /// Factor applied to every space of the line.
    pub(crate) scale: f32,
}

/// Word and space widths of a paragraph, recorded line by line while
/// wrapping and consumed line by line while the words are positioned.
#[derive(Debug, Default)]
pub(crate) struct CustomWidth {
    lines: Vec<LineWidth>,
    current: LineWidth,
    drawn: usize,
}

impl CustomWidth {
    pub(crate) fn append_word(&mut self, width: f32) {
        self.current.words += width;
    }

    pub(crate) fn append_space(&mut self, width: f32) {
        self.current.spaces += width;
        self.current.space_count += 1;
    }

    pub(crate) fn finish_line(&mut self, justify: bool) {
        let mut line = std::mem::take(&mut self.current);
        line.justify = justify;
        line.scale = 1.0;
        self.lines.push(line);
    }

    /// Stretch the spaces of every justified line to `line_width`.
    pub(crate) fn calc_scale(&mut self, line_width: f32) {
        for line in &mut self.lines {
            line.scale = if line.justify && line.space_count > 0 && line.spaces > 0.0 {
                justify_scale(line.words, line.spaces, line_width)
            } else {
                1.0
            };
        }
    }

    /// Scale of the next line to draw.
    pub(crate) fn next_line(&mut self) -> f32 {
        let scale = self.lines.get(self.drawn).map_or(1.0, |l| l.scale);
        self.drawn += 1;
        scale
    }

    pub(crate) fn lines(&self) -> &[LineWidth] {
        &self.lines
    }
}

fn justify_scale(words: f32, spaces: f32, line_width: f32) -> f32 {
    let mut scale = (line_width - words) / spaces;
    while scale > 0.0 && words + spaces * scale > line_width {
        scale -= 0.001;
    }
    scale.max(0.0)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct Metrics {
    pub(crate) ascent: f32,
    pub(crate) descent: f32,
    pub(crate) leading: f32,
}

pub(crate) struct WordChunk {
    pub(crate) text: String,
    pub(crate) font: Font,
    pub(crate) color: Option<[u8; 3]>,
    pub(crate) background: Option<[u8; 3]>,
    pub(crate) width: f32,
    /// Space before the chunk, zero at the start of a line or when glued.
    pub(crate) space: f32,
    pub(crate) metrics: Metrics,
    /// Baseline shift upwards.
    pub(crate) rise: f32,
    pub(crate) strikethrough: bool,
    pub(crate) link: Option<String>,
    pub(crate) footnote: Option<String>,
    pub(crate) image: Option<Arc<LoadedImage>>,
}

impl WordChunk {
    fn new(text: String, font: Font, width: f32, metrics: Metrics) -> Self {
        WordChunk {
            text,
            font,
            color: None,
            background: None,
            width,
            space: 0.0,
            metrics,
            rise: 0.0,
            strikethrough: false,
            link: None,
            footnote: None,
            image: None,
        }
    }
}

pub(crate) enum Token {
    Word { chunk: WordChunk, glue: bool, space: f32 },
    Break,
}

pub(crate) struct TextLine {
    pub(crate) chunks: Vec<WordChunk>,
    pub(crate) metrics: Metrics,
}

fn finish_line(
    lines: &mut Vec<TextLine>,
    chunks: &mut Vec<WordChunk>,
    ledger: &mut CustomWidth,
    justify: bool,
    base: Metrics,
) {
    let metrics = if chunks.is_empty() {
        base
    } else {
        chunks.iter().fold(Metrics::default(), |m, c| Metrics {
            ascent: m.ascent.max(c.metrics.ascent),
            descent: m.descent.max(c.metrics.descent),
            leading: m.leading.max(c.metrics.leading),
        })
    };
    ledger.finish_line(justify);
    lines.push(TextLine {
        chunks: std::mem::take(chunks),
        metrics,
    });
}

/// Greedy line breaking. Lines ended by the width limit are justified, the
/// last line and lines ended by a hard break are not.
pub(crate) fn wrap(
    tokens: Vec<Token>,
    max_width: f32,
    base: Metrics) -> (Vec<TextLine>, CustomWidth,
) {
    let mut lines = Vec::new();
    let mut ledger = CustomWidth::default();
    let mut chunks: Vec<WordChunk> = Vec::new();
    let mut x = 0.0;

    for token in tokens {
        match token {
            Token::Break => {
                finish_line(&mut lines, &mut chunks, &mut ledger, false, base);
                x = 0.0;
            }
            Token::Word { mut chunk, glue, space } => {
                let mut space = if glue && !chunks.is_empty() { space } else { 0.0 };
                if !chunks.is_empty() && x + space + chunk.width > max_width {
                    finish_line(&mut lines, &mut chunks, &mut ledger, true, base);
                    x = 0.0;
                    space = 0.0;
                }
                if space > 0.0 {
                    ledger.append_space(space);
                }
                ledger.append_word(chunk.width);
                chunk.space = space;
                x += space + chunk.width;
                chunks.push(chunk);
            }
        }
    }
    if !chunks.is_empty() {
        finish_line(&mut lines, &mut chunks, &mut ledger, false, base);
    }
    ledger.calc_scale(max_width);
    (lines, ledger)
}

/// One unit per line. `align` overrides justification.
pub(crate) fn lines_to_units(
    lines: Vec<TextLine>,
    mut ledger: CustomWidth,
    ctx: Ctx,
    align: Option<Alignment>,
) -> Vec<Unit> {
    let mut units = Vec::with_capacity(lines.len());
    for line in lines {
        let scale = match align {
            None => ledger.next_line(),
            Some(_) => {
                ledger.next_line();
                1.0
            }
        };
        let natural: f32 = line.chunks.iter().map(|c| c.space * scale + c.width).sum();
        let offset = match align {
            Some(Alignment::Center) => ((ctx.width - natural) / 2.0).max(0.0),
            Some(Alignment::Right) => (ctx.width - natural).max(0.0),
            Some(Alignment::Left) | None => 0.0,
        };
        let m = line.metrics;
        let baseline = m.leading / 2.0 + m.ascent;
        let mut unit = Unit {
            height: m.ascent + m.descent + m.leading,
            baseline: Some(baseline),
            ..Unit::default()
        };

        let mut x = ctx.x + offset;
        let mut link: Option<LinkBox> = None;
        for chunk in line.chunks {
            x += chunk.space * scale;
            let top = baseline - chunk.metrics.ascent;
            let height = chunk.metrics.ascent + chunk.metrics.descent;
            if let Some(color) = chunk.background {
                unit.prims.push(Prim::Rect {
                    x,
                    dy: top,
                    w: chunk.width,
                    h: height,
                    color,
                });
            }
            match chunk.image {
                Some(image) => unit.prims.push(Prim::Image {
                    x,
                    dy: top,
                    w: chunk.width,
                    h: height,
                    image,
                }),
                None => unit.prims.push(Prim::Text {
                    x,
                    dy: baseline - chunk.rise,
                    text: chunk.text,
                    font: chunk.font,
                    color: chunk.color,
                }),
            }
            if chunk.strikethrough {
                let dy = baseline - chunk.font.size * 0.3;
                unit.prims.push(Prim::Line {
                    x1: x,
                    dy1: dy,
                    x2: x + chunk.width,
                    dy2: dy,
                    width: (chunk.font.size / 20.0).max(0.5),
                    color: chunk.color.unwrap_or(BLACK),
                });
            }
            match (chunk.link, link.as_mut()) {
                (Some(url), Some(open)) if open.url == url => open.w = x + chunk.width - open.x,
                (url, _) => {
                    unit.links.extend(link.take());
                    link = url.map(|url| LinkBox {
                        x,
                        dy: top,
                        w: chunk.width,
                        h: height,
                        url,
                    });
                }
            }
            if let Some(id) = chunk.footnote {
                unit.footnotes.push(id);
            }
            x += chunk.width;
        }
        unit.links.extend(link);
        units.push(unit);
    }
    units
}

/// `user@host` becomes a mail link.
pub(crate) fn link_target(url: &str) -> String {
    if !is_absolute_url(url) && url.contains('@') && !url.contains('/') {
        format!("mailto:{url}")
    } else {
        url.to_string()
    }
}

/// Font size and weight of a paragraph.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TextStyle {
    pub(crate) size: f32,
    pub(crate) bold: bool,
    pub(crate) align: Option<Alignment>,
}

impl<C: Canvas> Engine<'_, C> {
    pub(crate) fn metrics(&self, font: Font) -> Metrics {
        let ascent = self.canvas.ascent(font);
        let descent = self.canvas.descent(font);
        Metrics {
            ascent,
            descent,
            leading: (self.canvas.line_spacing(font) - ascent - descent).max(0.0),
        }
    }

    pub(crate) fn text_font(
        &mut self,
        opts: TextOptions,
        style: TextStyle,
        ctx: Ctx,
    ) -> Result<Font, Halt> {
        let family = &self.opts.text_font;
        Ok(self
            .canvas
            .create_font(family, opts.bold || style.bold, opts.italic, style.size, ctx.scale)?)
    }

    /// Inline code keeps its size relative to the surrounding text.
    fn code_font(&mut self, style: TextStyle, ctx: Ctx) -> Result<Font, Halt> {
        let size = self.opts.code_font_size * style.size / self.opts.text_font_size;
        let family = &self.opts.code_font;
        Ok(self.canvas.create_font(family, false, false, size, ctx.scale)?)
    }

    fn chunk(&mut self, text: &str, font: Font) -> WordChunk {
        let width = self.canvas.string_width(font, text);
        WordChunk::new(text.to_string(), font, width, self.metrics(font))
    }

    /// Units of a run of inline items. Images and block items met on the way
    /// end the current run of lines and are laid out as blocks.
    pub(crate) fn paragraph_units(
        &mut self,
        items: &[Item],
        ctx: Ctx,
        style: TextStyle,
    ) -> Result<Vec<Unit>, Halt> {
        let base = self.text_font(TextOptions::PLAIN, style, ctx)?;
        let base_metrics = self.metrics(base);
        let mut units = Vec::new();
        let mut tokens = Vec::new();
        let mut space_after = false;

        for item in items {
            match item {
                Item::Text(t) => {
                    let font = self.text_font(t.opts, style, ctx)?;
                    let space = self.canvas.string_width(font, " ");
                    for (i, word) in t.text.split_whitespace().enumerate() {
                        let glue = i > 0
                            || ((space_after || t.space_before)
                                && !word.starts_with(NO_SPACE_BEFORE));
                        let mut chunk = self.chunk(word, font);
                        chunk.strikethrough = t.opts.strikethrough;
                        tokens.push(Token::Word { chunk, glue, space });
                    }
                    space_after = t.space_after;
                }
                Item::Link(link) => {
                    if let Some(img) = &link.img {
                        self.flush_lines(&mut units, &mut tokens, ctx, style, base_metrics);
                        units.push(self.image_unit(&img.url, Some(link_target(&link.url)), ctx)?);
                    } else {
                        self.link_tokens(link, &mut tokens, space_after, style, ctx)?;
                    }
                    space_after = false;
                }
                Item::Code(code) if code.inlined => {
                    let font = self.code_font(style, ctx)?;
                    let space = self.canvas.string_width(font, " ");
                    for (i, word) in code.text.split_whitespace().enumerate() {
                        let mut chunk = self.chunk(word, font);
                        chunk.background = Some(self.opts.code_background);
                        chunk.color = Some(self.opts.code_color);
                        tokens.push(Token::Word {
                            chunk,
                            glue: i > 0 || space_after,
                            space,
                        });
                    }
                    space_after = false;
                }
                Item::Math(math) if math.inlined => {
                    self.inline_math_tokens(&math.expr, &mut tokens, space_after, style, ctx)?;
                    space_after = false;
                }
                Item::FootnoteRef(r) => {
                    if !ctx.in_footnote {
                        if let Some(chunk) = self.footnote_mark(&r.id, style, ctx)? {
                            let space = self.canvas.string_width(base, " ");
                            tokens.push(Token::Word {
                                chunk,
                                glue: false,
                                space,
                            });
                        }
                    }
                    space_after = false;
                }
                Item::LineBreak => tokens.push(Token::Break),
                Item::Image(img) => {
                    self.flush_lines(&mut units, &mut tokens, ctx, style, base_metrics);
                    units.push(self.image_unit(&img.url, None, ctx)?);
                    space_after = false;
                }
                block => {
                    self.flush_lines(&mut units, &mut tokens, ctx, style, base_metrics);
                    units.extend(self.block_units(block, ctx)?);
                    space_after = false;
                }
            }
        }
        self.flush_lines(&mut units, &mut tokens, ctx, style, base_metrics);
        Ok(units)
    }

    fn flush_lines(
        &mut self,
        units: &mut Vec<Unit>,
        tokens: &mut Vec<Token>,
        ctx: Ctx,
        style: TextStyle,
        base: Metrics,
    ) {
        if tokens.is_empty() {
            return;
        }
        let (lines, ledger) = wrap(std::mem::take(tokens), ctx.width, base);
        units.extend(lines_to_units(lines, ledger, ctx, style.align));
    }

    fn link_tokens(
        &mut self,
        link: &Link,
        tokens: &mut Vec<Token>,
        space_after: bool,
        style: TextStyle,
        ctx: Ctx,
    ) -> Result<(), Halt> {
        let font = self.text_font(link.opts, style, ctx)?;
        let space = self.canvas.string_width(font, " ");
        let text = if link.text.is_empty() { &link.url } else { &link.text };
        let target = link_target(&link.url);
        for (i, word) in text.split_whitespace().enumerate() {
            let mut chunk = self.chunk(word, font);
            chunk.color = Some(self.opts.link_color);
            chunk.strikethrough = link.opts.strikethrough;
            chunk.link = Some(target.clone());
            tokens.push(Token::Word {
                chunk,
                glue: i > 0 || space_after,
                space,
            });
        }
        Ok(())
    }

    fn inline_math_tokens(
        &mut self,
        expr: &str,
        tokens: &mut Vec<Token>,
        space_after: bool,
        style: TextStyle,
        ctx: Ctx,
    ) -> Result<(), Halt> {
        let base = self.text_font(TextOptions::PLAIN, style, ctx)?;
        let space = self.canvas.string_width(base, " ");
        let size = style.size * self.opts.math_font_size / self.opts.text_font_size;
        if let Some(formula) = self.rasterize(expr, size, ctx) {
            let k = if formula.width > ctx.width { ctx.width / formula.width } else { 1.0 };
            let (height, baseline) = (formula.height * k, formula.baseline * k);
            let mut chunk = WordChunk::new(
                String::new(),
                base,
                formula.width * k,
                Metrics {
                    ascent: height - baseline,
                    descent: baseline,
                    leading: self.metrics(base).leading,
                },
            );
            chunk.image = Some(formula.image);
            tokens.push(Token::Word {
                chunk,
                glue: space_after,
                space,
            });
            return Ok(());
        }

        let font = self.code_font(style, ctx)?;
        for (i, word) in expr.split_whitespace().enumerate() {
            let mut chunk = self.chunk(word, font);
            chunk.background = Some(self.opts.code_background);
            tokens.push(Token::Word {
                chunk,
                glue: i > 0 || space_after,
                space,
            });
        }
        Ok(())
    }

    /// Superscript footnote number; registers the footnote on first use.
    fn footnote_mark(
        &mut self,
        id: &str,
        style: TextStyle,
        ctx: Ctx,
    ) -> Result<Option<WordChunk>, Halt> {
        let Some(number) = self.footnote_number(id)? else {
            log::warn!("Footnote {id} is referenced but never defined");
            return Ok(None);
        };
        let base = self.text_font(TextOptions::PLAIN, style, ctx)?;
        let mark_style = TextStyle {
            size: style.size * super::footnotes::FOOTNOTE_SCALE,
            ..style
        };
        let font = self.text_font(TextOptions::PLAIN, mark_style, ctx)?;
        let mut chunk = self.chunk(&number.to_string(), font);
        chunk.rise = self.canvas.ascent(base) - chunk.metrics.ascent;
        chunk.metrics.ascent += chunk.rise;
        chunk.metrics.descent = (chunk.metrics.descent - chunk.rise).max(0.0);
        chunk.footnote = Some(id.to_string());
        Ok(Some(chunk))
    }
}
