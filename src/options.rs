/// Page margins in points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Margins {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

/// 20mm.
pub const DEFAULT_MARGIN: f32 = 72.0 / 25.4 * 20.0;

impl Default for Margins {
    fn default() -> Self {
        Margins {
            left: DEFAULT_MARGIN,
            right: DEFAULT_MARGIN,
            top: DEFAULT_MARGIN,
            bottom: DEFAULT_MARGIN,
        }
    }
}

/// Fonts, colors and page geometry used by the renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    pub text_font: String,
    pub text_font_size: f32,
    pub code_font: String,
    pub code_font_size: f32,
    pub math_font: String,
    pub math_font_size: f32,
    pub link_color: [u8; 3],
    pub border_color: [u8; 3],
    pub code_background: [u8; 3],
    pub keyword_color: [u8; 3],
    pub comment_color: [u8; 3],
    pub code_color: [u8; 3],
    pub margins: Margins,
    /// Resolution of rasterized formulas.
    pub dpi: u32,
    pub page_width: f32,
    pub page_height: f32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            text_font: "Helvetica".into(),
            text_font_size: 12.0,
            code_font: "Courier".into(),
            code_font_size: 10.0,
            math_font: "Helvetica".into(),
            math_font_size: 12.0,
            link_color: [33, 122, 255],
            border_color: [81, 81, 81],
            code_background: [239, 239, 239],
            keyword_color: [128, 128, 0],
            comment_color: [0, 128, 0],
            code_color: [0, 0, 0],
            margins: Margins::default(),
            dpi: 300,
            page_width: 595.0,
            page_height: 842.0,
        }
    }
}

impl RenderOptions {
    /// Width available to the body text.
    pub fn body_width(&self) -> f32 {
        self.page_width - self.margins.left - self.margins.right
    }

    /// Height available between the top and bottom margins.
    pub fn body_height(&self) -> f32 {
        self.page_height - self.margins.top - self.margins.bottom
    }
}
