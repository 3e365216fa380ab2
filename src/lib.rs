mod error;
mod fonts;
mod math;
mod md;
mod model;
mod options;
mod pdf;
pub mod render;
mod resources;
mod syntax;

pub use error::{Error, ParseError, ResourceError, Result};
pub use math::{MathRasterizer, RenderedFormula};
pub use md::Parser;
pub use model::{
    Alignment, Blockquote, Code, Document, Footnote, FootnoteRef, Heading, Image, Item, Link, List,
    ListItem, ListKind, ListStart, Math, Paragraph, Table, TableCell, TableRow, Text, TextOptions,
};
pub use options::{DEFAULT_MARGIN, Margins, RenderOptions};
pub use pdf::{
    CancelToken, Canvas, Completion, Font, FontMetrics, LinkTarget, NeverCancel, PdfCanvas,
    Renderer,
};
pub use resources::{FileLoader, LoadedImage, ResourceLoader};
pub use syntax::{ColorRole, ColoredSpan, SyntaxRegistry, Tokenizer};

use std::path::Path;
use std::time::Instant;

/// Parse the Markdown file at `path`, following links to other Markdown
/// files when `recursive` is set.
pub fn parse_markdown(path: &Path, recursive: bool) -> std::result::Result<Document, ParseError> {
    Parser::new().parse(path, recursive)
}

/// Lay `doc` out and serialize it to PDF bytes.
pub fn render_to_bytes(doc: &Document, opts: &RenderOptions) -> Result<Vec<u8>> {
    pdf::render(doc, opts)
}

pub fn convert_markdown_to_pdf(
    input: &Path,
    output: &Path,
    opts: &RenderOptions,
    recursive: bool,
) -> Result<()> {
    let t0 = Instant::now();

    let doc = parse_markdown(input, recursive)?;
    let t_parse = t0.elapsed();

    let bytes = pdf::render(&doc, opts)?;
    let t_render = t0.elapsed();

    std::fs::write(output, &bytes)?;
    let t_total = t0.elapsed();

    log::info!(
        "Timing: parse={:.1}ms, render={:.1}ms, write={:.1}ms, total={:.1}ms (output {} bytes)",
        t_parse.as_secs_f64() * 1000.0,
        (t_render - t_parse).as_secs_f64() * 1000.0,
        (t_total - t_render).as_secs_f64() * 1000.0,
        t_total.as_secs_f64() * 1000.0,
        bytes.len(),
    );

    Ok(())
}
