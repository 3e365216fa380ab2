//! Pagination of laid out units.
//!
//! Blocks are turned into [`Unit`]s: atomic slices (a text line, a table
//! row, a code line, an image) that are never split across pages. [`place`]
//! walks the units against a [`Pager`], breaking pages where a unit would
//! cross the allowed bottom of the current page. The same walk serves all
//! three [`LayoutMode`]s; only the draw mode runs on the live pager and
//! forwards units to a [`Sink`], the others run on a scratch copy.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::options::RenderOptions;
use crate::resources::LoadedImage;

use super::canvas::Font;

const EPS: f32 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LayoutMode {
    /// Place on the live pager and draw.
    Draw,
    /// Height of the first content unit only.
    Minimum,
    /// Height of every unit, without drawing.
    Full,
}

/// Why a render stopped early.
#[derive(Debug)]
pub(crate) enum Halt {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Halt {
    fn from(e: Error) -> Self {
        Halt::Failed(e)
    }
}

/// Drawing primitive. `dy` offsets are measured down from the unit top.
#[derive(Clone)]
pub(crate) enum Prim {
    /// `dy` is the baseline.
    Text {
        x: f32,
        dy: f32,
        text: String,
        font: Font,
        color: Option<[u8; 3]>,
    },
    Line {
        x1: f32,
        dy1: f32,
        x2: f32,
        dy2: f32,
        width: f32,
        color: [u8; 3],
    },
    /// `dy` is the top edge.
    Rect {
        x: f32,
        dy: f32,
        w: f32,
        h: f32,
        color: [u8; 3],
    },
    /// `dy` is the center.
    Circle {
        x: f32,
        dy: f32,
        r: f32,
        color: Option<[u8; 3]>,
    },
    /// `dy` is the top edge.
    Image {
        x: f32,
        dy: f32,
        w: f32,
        h: f32,
        image: Arc<LoadedImage>,
    },
}

impl Prim {
    pub(crate) fn shift_down(&mut self, by: f32) {
        match self {
            Prim::Line { dy1, dy2, .. } => {
                *dy1 += by;
                *dy2 += by;
            }
            Prim::Text { dy, .. }
            | Prim::Rect { dy, .. }
            | Prim::Circle { dy, .. }
            | Prim::Image { dy, .. } => *dy += by,
        }
    }
}

/// Clickable area; `dy` is the top edge.
#[derive(Clone, Debug)]
pub(crate) struct LinkBox {
    pub(crate) x: f32,
    pub(crate) dy: f32,
    pub(crate) w: f32,
    pub(crate) h: f32,
    pub(crate) url: String,
}

#[derive(Clone, Default)]
pub(crate) struct Unit {
    pub(crate) height: f32,
    pub(crate) prims: Vec<Prim>,
    pub(crate) links: Vec<LinkBox>,
    /// Footnotes referenced from this unit, in order.
    pub(crate) footnotes: Vec<String>,
    /// Labels resolving to the top of this unit.
    pub(crate) anchors: Vec<String>,
    /// First baseline, for list markers.
    pub(crate) baseline: Option<f32>,
    /// Vertical spacing only; dropped at the top of a page and when it
    /// does not fit.
    pub(crate) gap: bool,
    /// Space that must remain below this unit on the same page.
    pub(crate) keep_with_next: f32,
}

impl Unit {
    pub(crate) fn gap(height: f32) -> Unit {
        Unit {
            height,
            gap: true,
            ..Unit::default()
        }
    }

    pub(crate) fn anchor(label: String) -> Unit {
        Unit {
            anchors: vec![label],
            ..Unit::default()
        }
    }
}

/// Where a unit ended up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Placed {
    /// Index into the placed slice.
    pub(crate) unit: usize,
    pub(crate) page: usize,
    pub(crate) top: f32,
    pub(crate) height: f32,
}

#[derive(Debug, Default)]
pub(crate) struct Drawn {
    pub(crate) rects: Vec<Placed>,
}

impl Drawn {
    pub(crate) fn height(&self) -> f32 {
        self.rects.iter().map(|r| r.height).sum()
    }

    /// Per page totals, in page order.
    pub(crate) fn heights_per_page(&self) -> Vec<(usize, f32)> {
        let mut out: Vec<(usize, f32)> = Vec::new();
        for r in &self.rects {
            match out.last_mut() {
                Some((page, h)) if *page == r.page => *h += r.height,
                _ => out.push((r.page, r.height)),
            }
        }
        out
    }

    /// Height each of `count` units took; zero for gaps that were dropped.
    pub(crate) fn unit_heights(&self, count: usize) -> Vec<f32> {
        let mut heights = vec![0.0; count];
        for r in &self.rects {
            heights[r.unit] = r.height;
        }
        heights
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Cursor {
    pub(crate) page: usize,
    pub(crate) y: f32,
}

/// Cursor plus the bottom reservations of every page.
#[derive(Clone, Debug)]
pub(crate) struct Pager {
    pub(crate) cursor: Cursor,
    top: f32,
    bottom: f32,
    reserved: HashMap<usize, f32>,
}

impl Pager {
    pub(crate) fn new(opts: &RenderOptions) -> Self {
        let top = opts.page_height - opts.margins.top;
        Pager {
            cursor: Cursor { page: 0, y: top },
            top,
            bottom: opts.margins.bottom,
            reserved: HashMap::new(),
        }
    }

    pub(crate) fn top(&self) -> f32 {
        self.top
    }

    pub(crate) fn bottom(&self) -> f32 {
        self.bottom
    }

    pub(crate) fn body_height(&self) -> f32 {
        self.top - self.bottom
    }

    pub(crate) fn reserved(&self, page: usize) -> f32 {
        self.reserved.get(&page).copied().unwrap_or(0.0)
    }

    pub(crate) fn reserve(&mut self, page: usize, height: f32) {
        *self.reserved.entry(page).or_insert(0.0) += height;
    }

    /// Lowest y normal content may reach on `page`.
    pub(crate) fn allowed_y(&self, page: usize) -> f32 {
        self.bottom + self.reserved(page)
    }

    pub(crate) fn at_page_top(&self) -> bool {
        (self.top - self.cursor.y).abs() < EPS
    }

    pub(crate) fn fits(&self, height: f32) -> bool {
        self.cursor.y - height >= self.allowed_y(self.cursor.page) - EPS
    }

    /// Space left above the allowed bottom of the current page.
    pub(crate) fn available(&self) -> f32 {
        (self.cursor.y - self.allowed_y(self.cursor.page)).max(0.0)
    }

    pub(crate) fn next_page(&mut self, sink: &mut dyn Sink) {
        self.cursor = Cursor {
            page: self.cursor.page + 1,
            y: self.top,
        };
        sink.enter_page(self.cursor.page);
        log::debug!("Page break, now on page {}", self.cursor.page + 1);
    }
}

/// Receiver of placed units in draw mode.
pub(crate) trait Sink {
    fn enter_page(&mut self, page: usize);
    /// `top` is the y of the unit's top edge on `page`; the pager's cursor
    /// is already below the unit.
    fn emit(&mut self, pager: &mut Pager, page: usize, top: f32, unit: &Unit) -> Result<(), Halt>;
}

/// Sink of the measuring modes.
pub(crate) struct Discard;

impl Sink for Discard {
    fn enter_page(&mut self, _page: usize) {}

    fn emit(
        &mut self,
        _pager: &mut Pager,
        _page: usize,
        _top: f32,
        _unit: &Unit,
    ) -> Result<(), Halt> {
        Ok(())
    }
}

/// Lay `units` out top to bottom starting at the pager's cursor.
pub(crate) fn place(
    pager: &mut Pager,
    mode: LayoutMode,
    units: &[Unit],
    sink: &mut dyn Sink,
) -> Result<Drawn, Halt> {
    let mut scratch;
    let mut discard = Discard;
    let (pager, sink): (&mut Pager, &mut dyn Sink) = match mode {
        LayoutMode::Draw => (pager, sink),
        LayoutMode::Minimum | LayoutMode::Full => {
            scratch = pager.clone();
            (&mut scratch, &mut discard)
        }
    };

    let mut drawn = Drawn::default();
    for (index, unit) in units.iter().enumerate() {
        if unit.gap && pager.at_page_top() {
            continue;
        }
        if !pager.fits(unit.height + unit.keep_with_next) {
            if unit.gap {
                continue;
            }
            if !pager.at_page_top() {
                pager.next_page(sink);
            }
        }
        let Cursor { page, y: top } = pager.cursor;
        pager.cursor.y -= unit.height;
        sink.emit(pager, page, top, unit)?;
        drawn.rects.push(Placed {
            unit: index,
            page,
            top,
            height: unit.height,
        });
        if mode == LayoutMode::Minimum && !unit.gap {
            break;
        }
    }
    Ok(drawn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(h: f32) -> Unit {
        Unit {
            height: h,
            ..Unit::default()
        }
    }

    fn pager() -> Pager {
        Pager::new(&RenderOptions {
            page_height: 200.0,
            margins: crate::options::Margins {
                left: 10.0,
                right: 10.0,
                top: 20.0,
                bottom: 20.0,
            },
            ..RenderOptions::default()
        })
    }

    struct Pages(Vec<usize>);

    impl Sink for Pages {
        fn enter_page(&mut self, page: usize) {
            self.0.push(page);
        }

        fn emit(&mut self, _: &mut Pager, _: usize, _: f32, _: &Unit) -> Result<(), Halt> {
            Ok(())
        }
    }

    #[test]
    fn breaks_before_a_unit_that_does_not_fit() {
        let mut p = pager();
        let units: Vec<Unit> = (0..7).map(|_| line(25.0)).collect();
        let drawn = place(&mut p, LayoutMode::Draw, &units, &mut Pages(Vec::new())).unwrap();
        let pages: Vec<usize> = drawn.rects.iter().map(|r| r.page).collect();
        assert_eq!(pages, [0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(p.cursor, Cursor { page: 1, y: 155.0 });
    }

    #[test]
    fn measuring_does_not_move_the_cursor() {
        let mut p = pager();
        let units: Vec<Unit> = (0..10).map(|_| line(25.0)).collect();
        let full = place(&mut p, LayoutMode::Full, &units, &mut Discard).unwrap();
        assert_eq!(full.height(), 250.0);
        assert_eq!(full.heights_per_page(), vec![(0, 150.0), (1, 100.0)]);
        assert!(p.at_page_top());
        let units = [Unit::gap(5.0), line(12.0), line(30.0)];
        let min = place(&mut p, LayoutMode::Minimum, &units, &mut Discard).unwrap();
        assert_eq!(min.height(), 12.0, "gaps vanish at the top of a page");
        p.cursor.y -= 10.0;
        let min = place(&mut p, LayoutMode::Minimum, &units, &mut Discard).unwrap();
        assert_eq!(min.height(), 17.0);
        assert_eq!(p.cursor.y, 170.0);
    }

    #[test]
    fn full_and_draw_agree() {
        let units: Vec<Unit> = [30.0, 30.0, 8.0, 50.0, 70.0, 8.0, 40.0, 130.0, 20.0]
            .iter()
            .enumerate()
            .map(|(i, &h)| if i % 3 == 2 { Unit::gap(h) } else { line(h) })
            .collect();
        let mut p = pager();
        p.cursor.y -= 37.0;
        let full = place(&mut p, LayoutMode::Full, &units, &mut Discard).unwrap();
        let drawn = place(&mut p, LayoutMode::Draw, &units, &mut Pages(Vec::new())).unwrap();
        assert_eq!(full.height(), drawn.height());
        assert_eq!(full.heights_per_page(), drawn.heights_per_page());
    }

    #[test]
    fn reservations_raise_the_bottom() {
        let mut p = pager();
        p.reserve(0, 60.0);
        assert_eq!(p.allowed_y(0), 80.0);
        let units: Vec<Unit> = (0..5).map(|_| line(25.0)).collect();
        let drawn = place(&mut p, LayoutMode::Draw, &units, &mut Pages(Vec::new())).unwrap();
        let mut first_page = drawn.rects.iter().filter(|r| r.page == 0);
        assert!(first_page.all(|r| r.top - r.height >= 80.0));
        assert_eq!(drawn.rects[3].page, 0);
        assert_eq!(drawn.rects[4].page, 1);
    }

    #[test]
    fn gaps_that_do_not_fit_are_dropped() {
        let mut p = pager();
        p.cursor.y = 25.0;
        let units = [Unit::gap(10.0), line(10.0)];
        let drawn = place(&mut p, LayoutMode::Draw, &units, &mut Pages(Vec::new())).unwrap();
        assert_eq!(drawn.rects.len(), 1);
        assert_eq!(drawn.rects[0].page, 1);
        assert_eq!(drawn.unit_heights(2), vec![0.0, 10.0]);
    }

    #[test]
    fn keep_with_next_moves_the_unit() {
        let mut p = pager();
        p.cursor.y = 60.0;
        let mut heading = line(20.0);
        heading.keep_with_next = 30.0;
        let drawn = place(&mut p, LayoutMode::Draw, &[heading], &mut Pages(Vec::new())).unwrap();
        assert_eq!(drawn.rects[0].page, 1);
    }

    #[test]
    fn oversized_unit_at_page_top_is_placed() {
        let mut p = pager();
        let mut sink = Pages(Vec::new());
        let drawn = place(&mut p, LayoutMode::Draw, &[line(500.0), line(10.0)], &mut sink).unwrap();
        assert_eq!(drawn.rects[0].page, 0);
        assert_eq!(drawn.rects[1].page, 1);
        assert_eq!(sink.0, vec![1]);
    }
}
