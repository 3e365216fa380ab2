use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures of the Markdown parser. Everything else degrades to literal text.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("We found code block started with \"{line}\" that doesn't finished.")]
    UnterminatedFence { line: String },

    #[error("Unable to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures reported by a [`ResourceLoader`](crate::ResourceLoader).
#[derive(Error, Debug, Clone)]
pub enum ResourceError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Network error while loading {url}: {reason}")]
    Network { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to create font: {family}. Please choose another one.")]
    FontNotCreatable { family: String },

    #[error("Unable to load image: {url}. {reason}")]
    Image { url: String, reason: String },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("PDF error: {0}")]
    Pdf(String),
}

pub type Result<T> = std::result::Result<T, Error>;
