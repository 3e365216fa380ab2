//! Formula rendering hook.
//!
//! Typesetting math is delegated to an external collaborator. Without one,
//! formulas are laid out as code blocks showing their source.

use crate::resources::LoadedImage;

/// A rasterized formula.
pub struct RenderedFormula {
    pub image: LoadedImage,
    /// Distance from the bottom of the bitmap to the baseline, in pixels.
    pub baseline: f32,
}

pub trait MathRasterizer: Send + Sync {
    /// Rasterize `expr` at `font_size` points and `dpi` dots per inch.
    /// `None` means the formula cannot be rendered.
    fn render(
        &self,
        expr: &str,
        font_family: &str,
        font_size: f32,
        dpi: u32,
    ) -> Option<RenderedFormula>;
}

/// Display size in points of a bitmap rendered at `dpi`.
pub(crate) fn display_size(formula: &RenderedFormula, dpi: u32) -> (f32, f32) {
    let k = 72.0 / dpi.max(1) as f32;
    (formula.image.width as f32 * k, formula.image.height as f32 * k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmaps_are_scaled_by_resolution() {
        let formula = RenderedFormula {
            image: LoadedImage::from_rgba("m", 300, 150, vec![0; 300 * 150 * 4]),
            baseline: 10.0,
        };
        assert_eq!(display_size(&formula, 300), (72.0, 36.0));
        assert_eq!(display_size(&formula, 150), (144.0, 72.0));
    }
}
