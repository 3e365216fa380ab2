//! md-pdf - Markdown to PDF converter

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use md_pdf::render::{self, RenderEvent};
use md_pdf::{Completion, Error, RenderOptions, Renderer};

#[derive(Parser)]
#[command(name = "md-pdf")]
#[command(version, about = "Convert Markdown to paginated PDF", long_about = None)]
#[command(after_help = "EXAMPLES:
    md-pdf README.md                 Write README.pdf
    md-pdf -r docs/index.md -o docs.pdf
                                     Follow links to other Markdown files")]
struct Cli {
    /// Markdown file to convert
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file (defaults to INPUT with a .pdf extension)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Include linked Markdown files
    #[arg(short, long)]
    recursive: bool,

    #[arg(long, value_name = "FAMILY")]
    text_font: Option<String>,

    #[arg(long, value_name = "POINTS")]
    text_size: Option<f32>,

    #[arg(long, value_name = "FAMILY")]
    code_font: Option<String>,

    #[arg(long, value_name = "POINTS")]
    code_size: Option<f32>,

    #[arg(long, value_name = "POINTS")]
    margin_left: Option<f32>,

    #[arg(long, value_name = "POINTS")]
    margin_right: Option<f32>,

    #[arg(long, value_name = "POINTS")]
    margin_top: Option<f32>,

    #[arg(long, value_name = "POINTS")]
    margin_bottom: Option<f32>,

    /// Resolution of rendered formulas
    #[arg(long)]
    dpi: Option<u32>,

    /// Log timing and progress
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> RenderOptions {
        let mut opts = RenderOptions::default();
        if let Some(family) = &self.text_font {
            opts.text_font = family.clone();
        }
        if let Some(size) = self.text_size {
            opts.text_font_size = size;
        }
        if let Some(family) = &self.code_font {
            opts.code_font = family.clone();
        }
        if let Some(size) = self.code_size {
            opts.code_font_size = size;
        }
        opts.margins.left = self.margin_left.unwrap_or(opts.margins.left);
        opts.margins.right = self.margin_right.unwrap_or(opts.margins.right);
        opts.margins.top = self.margin_top.unwrap_or(opts.margins.top);
        opts.margins.bottom = self.margin_bottom.unwrap_or(opts.margins.bottom);
        opts.dpi = self.dpi.unwrap_or(opts.dpi);
        opts
    }

    fn output(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("pdf"))
    }
}

const EXIT_PARSE: u8 = 1;
const EXIT_RENDER: u8 = 2;
const EXIT_CANCELLED: u8 = 3;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let doc = match md_pdf::parse_markdown(&cli.input, cli.recursive) {
        Ok(doc) => doc,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_PARSE);
        }
    };

    let output = cli.output();
    let handle = match render::spawn(doc, Renderer::new(cli.options()), output.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_RENDER);
        }
    };

    for event in handle.events().iter() {
        match event {
            RenderEvent::Progress(percent) => log::info!("Rendered {percent}%"),
            RenderEvent::Done { terminated } => {
                if terminated {
                    log::warn!("Render terminated, partial output in {}", output.display());
                }
            }
            RenderEvent::Error(message) => log::debug!("Render failed: {message}"),
        }
    }

    match handle.wait() {
        Ok(Completion::Done) => ExitCode::SUCCESS,
        Ok(Completion::Cancelled) => ExitCode::from(EXIT_CANCELLED),
        Err(Error::Parse(e)) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_PARSE)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_RENDER)
        }
    }
}
