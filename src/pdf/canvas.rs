//! Drawing surface used by the layout engine.
//!
//! Coordinates are PDF points with the origin in the bottom left corner of
//! the page. Page indices start at zero.

use crate::error::Result;
use crate::resources::LoadedImage;

/// A face at a concrete size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Font {
    pub id: usize,
    pub size: f32,
}

pub trait FontMetrics {
    /// The face is `size * scale` points large. Fails with
    /// [`Error::FontNotCreatable`](crate::Error::FontNotCreatable) when the
    /// family cannot be resolved.
    fn create_font(
        &mut self,
        family: &str,
        bold: bool,
        italic: bool,
        size: f32,
        scale: f32,
    ) -> Result<Font>;
    fn string_width(&mut self, font: Font, text: &str) -> f32;
    fn line_spacing(&self, font: Font) -> f32;
    fn ascent(&self, font: Font) -> f32;
    /// Positive distance below the baseline.
    fn descent(&self, font: Font) -> f32;
}

#[derive(Clone, Debug, PartialEq)]
pub enum LinkTarget {
    Uri(String),
    /// Top of the view at `y` on `page`.
    Position { page: usize, y: f32 },
}

pub trait Canvas: FontMetrics {
    /// Append a page and make it current. Returns its index.
    fn new_page(&mut self) -> usize;
    fn set_page(&mut self, page: usize);
    fn page_count(&self) -> usize;

    fn draw_text(&mut self, x: f32, y: f32, text: &str, font: Font);
    fn draw_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, width: f32);
    /// Filled; `(x, y)` is the bottom left corner.
    fn draw_rectangle(&mut self, x: f32, y: f32, width: f32, height: f32);
    fn draw_circle(&mut self, x: f32, y: f32, radius: f32);
    fn draw_image(&mut self, x: f32, y: f32, image: &LoadedImage, width: f32, height: f32);

    /// Push a fill/stroke color; undone by [`Canvas::restore_color`].
    fn set_color(&mut self, rgb: [u8; 3]);
    fn restore_color(&mut self);

    /// Clickable area `[x1, y1, x2, y2]` on `page`.
    fn add_link(&mut self, page: usize, rect: [f32; 4], target: LinkTarget);
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canvas that records primitives, with simple fixed metrics: every
    //! character is half an em wide, ascent 0.8, descent 0.2, line 1.2.

    use super::*;
    use crate::error::Error;

    #[derive(Clone, Debug, PartialEq)]
    pub(crate) enum Op {
        Text { x: f32, y: f32, text: String, size: f32 },
        Line { x1: f32, y1: f32, x2: f32, y2: f32 },
        Rect { x: f32, y: f32, w: f32, h: f32 },
        Circle { x: f32, y: f32, r: f32 },
        Image { x: f32, y: f32, w: f32, h: f32 },
    }

    #[derive(Default)]
    pub(crate) struct RecordingCanvas {
        pub(crate) pages: usize,
        pub(crate) current: usize,
        pub(crate) ops: Vec<(usize, Op)>,
        pub(crate) links: Vec<(usize, [f32; 4], LinkTarget)>,
        pub(crate) colors: Vec<[u8; 3]>,
    }

    impl RecordingCanvas {
        pub(crate) fn texts(&self) -> Vec<(usize, f32, String)> {
            self.ops
                .iter()
                .filter_map(|(page, op)| match op {
                    Op::Text { y, text, .. } => Some((*page, *y, text.clone())),
                    _ => None,
                })
                .collect()
        }
    }

    impl FontMetrics for RecordingCanvas {
        fn create_font(
            &mut self,
            family: &str,
            bold: bool,
            italic: bool,
            size: f32,
            scale: f32,
        ) -> Result<Font> {
            if family == "missing" {
                return Err(Error::FontNotCreatable {
                    family: family.to_string(),
                });
            }
            Ok(Font {
                id: usize::from(bold) * 2 + usize::from(italic),
                size: size * scale,
            })
        }

        fn string_width(&mut self, font: Font, text: &str) -> f32 {
            text.chars().count() as f32 * font.size * 0.5
        }

        fn line_spacing(&self, font: Font) -> f32 {
            font.size * 1.2
        }

        fn ascent(&self, font: Font) -> f32 {
            font.size * 0.8
        }

        fn descent(&self, font: Font) -> f32 {
            font.size * 0.2
        }
    }

    impl Canvas for RecordingCanvas {
        fn new_page(&mut self) -> usize {
            self.pages += 1;
            self.current = self.pages - 1;
            self.current
        }

        fn set_page(&mut self, page: usize) {
            self.current = page;
        }

        fn page_count(&self) -> usize {
            self.pages
        }

        fn draw_text(&mut self, x: f32, y: f32, text: &str, font: Font) {
            self.ops.push((
                self.current,
                Op::Text {
                    x,
                    y,
                    text: text.to_string(),
                    size: font.size,
                },
            ));
        }

        fn draw_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, _width: f32) {
            self.ops.push((self.current, Op::Line { x1, y1, x2, y2 }));
        }

        fn draw_rectangle(&mut self, x: f32, y: f32, w: f32, h: f32) {
            self.ops.push((self.current, Op::Rect { x, y, w, h }));
        }

        fn draw_circle(&mut self, x: f32, y: f32, r: f32) {
            self.ops.push((self.current, Op::Circle { x, y, r }));
        }

        fn draw_image(&mut self, x: f32, y: f32, _image: &LoadedImage, w: f32, h: f32) {
            self.ops.push((self.current, Op::Image { x, y, w, h }));
        }

        fn set_color(&mut self, rgb: [u8; 3]) {
            self.colors.push(rgb);
        }

        fn restore_color(&mut self) {
            self.colors.pop();
        }

        fn add_link(&mut self, page: usize, rect: [f32; 4], target: LinkTarget) {
            self.links.push((page, rect, target));
        }
    }
}
