use crate::model::{Alignment, Table, TableRow, TextOptions};

use super::canvas::Canvas;
use super::layout::TextStyle;
use super::pager::{Halt, LinkBox, Prim, Unit};
use super::{Ctx, Engine};

/// Space between a cell border and its content.
const CELL_MARGIN: f32 = 2.0;
const BORDER_WIDTH: f32 = 0.5;

struct RowLayout {
    content_height: f32,
    /// Laid out content of every column; missing cells are empty.
    cells: Vec<Vec<Unit>>,
}

/// Part of a row drawn on one page.
struct RowSlice {
    content_height: f32,
    /// Per column, units with their offset from the slice's content top.
    cells: Vec<Vec<(f32, Unit)>>,
}

/// Cut a row into slices of at most `limit` content height, only where no
/// cell line is crossed. A slice with no such cut runs over the limit.
fn slice_row(cells: Vec<Vec<Unit>>, content_height: f32, limit: f32) -> Vec<RowSlice> {
    let mut placed: Vec<Vec<(f32, Unit)>> = cells
        .into_iter()
        .map(|cell| {
            let mut dy = 0.0;
            cell.into_iter()
                .map(|unit| {
                    let at = dy;
                    dy += unit.height;
                    (at, unit)
                })
                .collect()
        })
        .collect();

    let mut ends: Vec<f32> = placed
        .iter()
        .flatten()
        .map(|(at, unit)| at + unit.height)
        .chain([content_height])
        .collect();
    ends.sort_by(f32::total_cmp);
    ends.dedup();
    let crosses = |placed: &[Vec<(f32, Unit)>], cut: f32| {
        placed
            .iter()
            .flatten()
            .any(|(at, unit)| *at < cut && cut < at + unit.height)
    };

    let mut slices = Vec::new();
    let mut start = 0.0;
    loop {
        let candidates = || ends.iter().copied().filter(|&end| end > start);
        let cut = candidates()
            .filter(|&end| end <= start + limit && !crosses(&placed, end))
            .last()
            .or_else(|| candidates().find(|&end| !crosses(&placed, end)))
            .unwrap_or(content_height);
        let last = cut >= content_height;

        let cells = placed
            .iter_mut()
            .map(|cell| {
                let split = cell
                    .iter()
                    .position(|(at, _)| !last && *at >= cut)
                    .unwrap_or(cell.len());
                cell.drain(..split)
                    .map(|(at, unit)| (at - start, unit))
                    .collect()
            })
            .collect();
        slices.push(RowSlice {
            content_height: cut - start,
            cells,
        });
        if last {
            return slices;
        }
        start = cut;
    }
}

impl<C: Canvas> Engine<'_, C> {
    fn compute_row_layout(
        &mut self,
        table: &Table,
        row: &TableRow,
        header: bool,
        ctx: Ctx,
    ) -> Result<RowLayout, Halt> {
        let columns = table.columns_count().max(1);
        let col_w = ctx.width / columns as f32;
        let margin = CELL_MARGIN * ctx.scale;

        let mut cells = Vec::with_capacity(columns);
        let mut content_height: f32 = 0.0;
        for col in 0..columns {
            let cell_ctx = Ctx {
                x: ctx.x + col as f32 * col_w + margin,
                width: (col_w - 2.0 * margin).max(0.0),
                ..ctx
            };
            let style = TextStyle {
                bold: header,
                align: Some(table.alignments.get(col).copied().unwrap_or(Alignment::Left)),
                ..self.body_style()
            };
            let units = match row.cells.get(col) {
                Some(cell) => self.paragraph_units(&cell.items, cell_ctx, style)?,
                None => Vec::new(),
            };
            content_height = content_height.max(units.iter().map(|u| u.height).sum());
            cells.push(units);
        }

        if content_height == 0.0 {
            let font = self.text_font(TextOptions::PLAIN, self.body_style(), ctx)?;
            content_height = self.canvas.line_spacing(font);
        }
        Ok(RowLayout {
            content_height,
            cells,
        })
    }

    /// One unit per row, or per page-sized slice of a taller row. Every unit
    /// draws its own borders so that a table continued on the next page is
    /// closed on both pages.
    pub(crate) fn table_units(&mut self, table: &Table, ctx: Ctx) -> Result<Vec<Unit>, Halt> {
        let columns = table.columns_count().max(1);
        let col_w = ctx.width / columns as f32;
        let margin = CELL_MARGIN * ctx.scale;
        let border = self.opts.border_color;
        let limit = (self.pager.body_height() - 2.0 * margin).max(margin);

        let mut units = Vec::with_capacity(table.rows.len());
        for (i, row) in table.rows.iter().enumerate() {
            self.check_cancel()?;
            let layout = self.compute_row_layout(table, row, i == 0, ctx)?;
            let slices = slice_row(layout.cells, layout.content_height, limit);
            if slices.len() > 1 {
                log::debug!("Table row {} split over {} pages", i + 1, slices.len());
            }

            for slice in slices {
                let height = slice.content_height + 2.0 * margin;
                let mut unit = Unit {
                    height,
                    ..Unit::default()
                };
                for cell in slice.cells {
                    for (at, cell_unit) in cell {
                        let dy = margin + at;
                        unit.prims.extend(cell_unit.prims.into_iter().map(|mut p| {
                            p.shift_down(dy);
                            p
                        }));
                        unit.links.extend(cell_unit.links.into_iter().map(|l| LinkBox {
                            dy: l.dy + dy,
                            ..l
                        }));
                        unit.footnotes.extend(cell_unit.footnotes);
                        unit.anchors.extend(cell_unit.anchors);
                        if unit.baseline.is_none() {
                            unit.baseline = cell_unit.baseline.map(|b| b + dy);
                        }
                    }
                }

                let line = |x1: f32, dy1: f32, x2: f32, dy2: f32| Prim::Line {
                    x1,
                    dy1,
                    x2,
                    dy2,
                    width: BORDER_WIDTH,
                    color: border,
                };
                let right = ctx.x + ctx.width;
                unit.prims.push(line(ctx.x, 0.0, right, 0.0));
                unit.prims.push(line(ctx.x, height, right, height));
                for col in 0..=columns {
                    let x = ctx.x + col as f32 * col_w;
                    unit.prims.push(line(x, 0.0, x, height));
                }
                units.push(unit);
            }
        }

        // Header and first row stay together.
        if units.len() > 1 {
            units[0].keep_with_next = units[1].height;
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(heights: &[f32]) -> Vec<Unit> {
        heights
            .iter()
            .map(|&height| Unit {
                height,
                ..Unit::default()
            })
            .collect()
    }

    fn shape(slices: &[RowSlice]) -> Vec<(f32, Vec<usize>)> {
        slices
            .iter()
            .map(|s| (s.content_height, s.cells.iter().map(Vec::len).collect()))
            .collect()
    }

    #[test]
    fn short_row_is_one_slice() {
        let slices = slice_row(vec![lines(&[10.0, 10.0]), lines(&[12.0])], 20.0, 100.0);
        assert_eq!(shape(&slices), vec![(20.0, vec![2, 1])]);
    }

    #[test]
    fn tall_row_is_cut_between_lines() {
        let cells = vec![lines(&[10.0; 6]), lines(&[20.0; 3])];
        let slices = slice_row(cells, 60.0, 30.0);
        assert_eq!(
            shape(&slices),
            vec![(20.0, vec![2, 1]), (20.0, vec![2, 1]), (20.0, vec![2, 1])]
        );
        let offsets: Vec<f32> = slices[1].cells[0].iter().map(|(at, _)| *at).collect();
        assert_eq!(offsets, vec![0.0, 10.0]);
    }

    #[test]
    fn shorter_cells_end_in_an_early_slice() {
        let slices = slice_row(vec![lines(&[10.0; 5]), lines(&[10.0])], 50.0, 30.0);
        assert_eq!(shape(&slices), vec![(30.0, vec![3, 1]), (20.0, vec![2, 0])]);
    }

    #[test]
    fn line_taller_than_the_limit_keeps_its_slice() {
        let slices = slice_row(vec![lines(&[100.0, 10.0])], 110.0, 30.0);
        assert_eq!(shape(&slices), vec![(100.0, vec![1]), (10.0, vec![1])]);
    }

    #[test]
    fn empty_row_is_one_slice() {
        let slices = slice_row(vec![Vec::new(), Vec::new()], 12.0, 30.0);
        assert_eq!(shape(&slices), vec![(12.0, vec![0, 0])]);
    }
}
