//! Footnote numbering, page-bottom reservation and drawing.
//!
//! A footnote is laid out once, when its first reference is laid out. When
//! the line holding that reference is drawn, the footnote's full height is
//! reserved at the bottom of the page (spilling over to following pages if
//! it does not fit), so the content after the reference already sees the
//! raised page bottom. The footnotes themselves are drawn after the main
//! pass, into exactly the bands reserved for them.

use std::collections::HashMap;
use std::ops::Range;

use crate::model::{Footnote, TextOptions};

use super::canvas::Canvas;
use super::pager::{place, Discard, Halt, LayoutMode, Pager, Prim, Sink, Unit};
use super::{Ctx, Engine};

/// Size of footnote marks and bodies relative to the text.
pub(crate) const FOOTNOTE_SCALE: f32 = 0.75;
/// Space for the separator above the first footnote of a page.
pub(crate) const SEPARATOR_GAP: f32 = 12.0;
const SEPARATOR_WIDTH: f32 = 144.0;

/// Part of a footnote drawn on one page.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Band {
    pub(crate) page: usize,
    pub(crate) units: Range<usize>,
    /// First footnote band of the page; carries the separator.
    pub(crate) separator: bool,
}

struct Note {
    units: Vec<Unit>,
    /// Height of each unit in a full layout from a page top; dropped gaps are zero.
    heights: Vec<f32>,
    bands: Vec<Band>,
}

#[derive(Default)]
pub(crate) struct Footnotes {
    numbers: HashMap<String, usize>,
    notes: Vec<Note>,
    /// Note indices in reservation order.
    reserved: Vec<usize>,
}

impl Footnotes {
    pub(crate) fn number(&self, id: &str) -> Option<usize> {
        self.numbers.get(id).copied()
    }

    pub(crate) fn register(&mut self, id: &str, units: Vec<Unit>) -> usize {
        if let Some(n) = self.number(id) {
            return n;
        }
        self.notes.push(Note {
            units,
            heights: Vec::new(),
            bands: Vec::new(),
        });
        let n = self.notes.len();
        self.numbers.insert(id.to_string(), n);
        n
    }

    /// Reserve the height of footnote `id` below the pager's cursor. Does
    /// nothing for unknown or already reserved footnotes.
    pub(crate) fn reserve(&mut self, pager: &mut Pager, id: &str) -> Result<(), Halt> {
        let Some(n) = self.number(id) else {
            return Ok(());
        };
        let note = &mut self.notes[n - 1];
        if !note.bands.is_empty() || note.units.is_empty() {
            return Ok(());
        }
        let mut fresh = pager.clone();
        fresh.cursor.y = fresh.top();
        let sized = place(&mut fresh, LayoutMode::Full, &note.units, &mut Discard)?;
        note.heights = sized.unit_heights(note.units.len());
        note.bands = reserve_chain(pager, &note.heights);
        log::debug!(
            "Reserved {:.1}pt for footnote {n} on pages {:?}",
            sized.height(),
            note.bands.iter().map(|b| b.page + 1).collect::<Vec<_>>()
        );
        self.reserved.push(n - 1);
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.reserved.is_empty()
    }
}

/// Greedy reservation: as many leading units as fit on the current page,
/// the rest on the following pages. Every page's first band also reserves
/// the separator gap.
pub(crate) fn reserve_chain(pager: &mut Pager, heights: &[f32]) -> Vec<Band> {
    let mut bands = Vec::new();
    let mut page = pager.cursor.page;
    let mut available = pager.available();
    let mut next = 0;

    while next < heights.len() {
        let separator = pager.reserved(page) == 0.0;
        let mut height = if separator { SEPARATOR_GAP } else { 0.0 };
        let start = next;
        while next < heights.len() && height + heights[next] <= available {
            height += heights[next];
            next += 1;
        }
        // A unit taller than an empty page goes there anyway.
        if next == start && separator && page > pager.cursor.page {
            height += heights[next];
            next += 1;
        }
        if next > start {
            pager.reserve(page, height);
            bands.push(Band {
                page,
                units: start..next,
                separator,
            });
        }
        page += 1;
        available = pager.body_height() - pager.reserved(page);
    }
    bands
}

/// Body width footnotes are laid out in.
pub(crate) fn footnote_ctx<C: Canvas>(engine: &Engine<'_, C>) -> Ctx {
    Ctx {
        x: engine.opts.margins.left,
        width: engine.opts.body_width(),
        scale: FOOTNOTE_SCALE,
        in_footnote: true,
    }
}

impl<C: Canvas> Engine<'_, C> {
    /// Number of footnote `id`, laying it out on first use. `None` when the
    /// document has no such footnote.
    pub(crate) fn footnote_number(&mut self, id: &str) -> Result<Option<usize>, Halt> {
        if let Some(n) = self.notes.number(id) {
            return Ok(Some(n));
        }
        let doc = self.doc;
        let Some(footnote) = doc.footnotes.get(id) else {
            return Ok(None);
        };
        let n = self.notes.register(id, Vec::new());
        let units = self.footnote_units(footnote, n)?;
        self.notes.notes[n - 1].units = units;
        Ok(Some(n))
    }

    fn footnote_units(&mut self, footnote: &Footnote, number: usize) -> Result<Vec<Unit>, Halt> {
        let ctx = footnote_ctx(self);
        let marker = format!("{number}.");
        let style = self.body_style();
        let font = self.text_font(TextOptions::PLAIN, style, ctx)?;
        let indent = self.canvas.string_width(font, &marker) + self.canvas.string_width(font, " ");
        let mut units = self.items_units(&footnote.items, ctx.indent(indent))?;
        if units.is_empty() {
            units.push(Unit {
                height: self.canvas.line_spacing(font),
                baseline: Some(self.metrics(font).leading / 2.0 + self.canvas.ascent(font)),
                ..Unit::default()
            });
        }
        let ascent = self.canvas.ascent(font);
        super::blocks::attach_marker(
            &mut units,
            ascent,
            Prim::Text {
                x: ctx.x,
                dy: 0.0,
                text: marker,
                font,
                color: None,
            },
        );
        Ok(units)
    }

    /// Second pass: every reserved footnote into its bands.
    pub(crate) fn draw_footnotes(&mut self) -> Result<(), Halt> {
        if self.notes.is_empty() {
            return Ok(());
        }
        let mut tops: HashMap<usize, f32> = HashMap::new();
        let mut scratch = self.pager.clone();
        let border = self.opts.border_color;
        let left = self.opts.margins.left;
        let separator_width = SEPARATOR_WIDTH.min(self.opts.body_width());
        let order = self.notes.reserved.clone();

        for index in order {
            let bands = self.notes.notes[index].bands.clone();
            for band in bands {
                let note = &self.notes.notes[index];
                let units: Vec<Unit> = band
                    .units
                    .clone()
                    .filter(|&i| !(note.units[i].gap && note.heights[i] == 0.0))
                    .map(|i| note.units[i].clone())
                    .collect();
                let mut sink = self.draw_sink();
                sink.enter_page(band.page);
                let top = tops
                    .entry(band.page)
                    .or_insert_with(|| scratch.allowed_y(band.page));
                if band.separator {
                    let separator = Unit {
                        height: SEPARATOR_GAP,
                        prims: vec![Prim::Line {
                            x1: left,
                            dy1: SEPARATOR_GAP / 2.0,
                            x2: left + separator_width,
                            dy2: SEPARATOR_GAP / 2.0,
                            width: 0.5,
                            color: border,
                        }],
                        ..Unit::default()
                    };
                    sink.emit(&mut scratch, band.page, *top, &separator)?;
                    *top -= SEPARATOR_GAP;
                }
                for unit in &units {
                    sink.emit(&mut scratch, band.page, *top, unit)?;
                    *top -= unit.height;
                }
            }
        }
        Ok(())
    }
}
