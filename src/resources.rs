//! Loading and decoding of images referenced by the document.

use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, mpsc};

use crate::error::{Error, ResourceError};
use crate::md::is_absolute_url;

/// Source of image bytes. Remote loads are issued from a helper thread and
/// may block.
pub trait ResourceLoader: Send + Sync {
    fn load_local(&self, path: &Path) -> Result<Vec<u8>, ResourceError>;
    fn load_remote(&self, url: &str) -> Result<Vec<u8>, ResourceError>;
}

/// Reads local files. Has no network access.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileLoader;

impl ResourceLoader for FileLoader {
    fn load_local(&self, path: &Path) -> Result<Vec<u8>, ResourceError> {
        std::fs::read(path).map_err(|_| ResourceError::NotFound(path.to_path_buf()))
    }

    fn load_remote(&self, url: &str) -> Result<Vec<u8>, ResourceError> {
        Err(ResourceError::Network {
            url: url.to_string(),
            reason: "remote loading is not available".into(),
        })
    }
}

pub(crate) enum ImageData {
    /// DCT stream embedded as is.
    Jpeg(Vec<u8>),
    /// 8-bit RGBA pixels.
    Rgba(Vec<u8>),
}

/// A decoded bitmap. `key` identifies it inside one document.
pub struct LoadedImage {
    pub(crate) key: String,
    pub width: u32,
    pub height: u32,
    pub(crate) data: ImageData,
}

impl fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.data {
            ImageData::Jpeg(_) => "jpeg",
            ImageData::Rgba(_) => "rgba",
        };
        f.debug_struct("LoadedImage")
            .field("key", &self.key)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data", &kind)
            .finish()
    }
}

impl LoadedImage {
    /// Build from raw RGBA pixels, e.g. a rasterized formula.
    pub fn from_rgba(key: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        LoadedImage {
            key: key.into(),
            width,
            height,
            data: ImageData::Rgba(pixels),
        }
    }

    /// Decode PNG or JPEG bytes.
    pub fn decode(key: impl Into<String>, bytes: Vec<u8>) -> Result<Self, String> {
        let key = key.into();
        let format = image::guess_format(&bytes).map_err(|e| e.to_string())?;
        if format == image::ImageFormat::Jpeg {
            let (width, height) = image::ImageReader::with_format(Cursor::new(&bytes), format)
                .into_dimensions()
                .map_err(|e| e.to_string())?;
            return Ok(LoadedImage {
                key,
                width,
                height,
                data: ImageData::Jpeg(bytes),
            });
        }
        let decoded = image::ImageReader::with_format(Cursor::new(&bytes), format)
            .decode()
            .map_err(|e| e.to_string())?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(LoadedImage {
            key,
            width,
            height,
            data: ImageData::Rgba(decoded.into_raw()),
        })
    }
}

fn is_remote(url: &str) -> bool {
    is_absolute_url(url) && !url.starts_with("file:")
}

/// One blocking round trip to the loader on a helper thread.
fn fetch_remote(loader: Arc<dyn ResourceLoader>, url: &str) -> Result<Vec<u8>, ResourceError> {
    let network_error = |reason: String| ResourceError::Network {
        url: url.to_string(),
        reason,
    };
    let (tx, rx) = mpsc::channel();
    let owned = url.to_string();
    std::thread::Builder::new()
        .name("md-pdf-fetch".into())
        .spawn(move || {
            let _ = tx.send(loader.load_remote(&owned));
        })
        .map_err(|e| network_error(e.to_string()))?;
    rx.recv()
        .map_err(|_| network_error("loader stopped without a result".into()))?
}

/// Images decoded during one render, keyed by URL.
pub(crate) struct ImageCache {
    loader: Arc<dyn ResourceLoader>,
    images: HashMap<String, Arc<LoadedImage>>,
}

impl ImageCache {
    pub(crate) fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        ImageCache {
            loader,
            images: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, url: &str) -> Result<Arc<LoadedImage>, Error> {
        if let Some(img) = self.images.get(url) {
            return Ok(Arc::clone(img));
        }
        let t0 = std::time::Instant::now();
        let bytes = if is_remote(url) {
            fetch_remote(Arc::clone(&self.loader), url)
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            self.loader.load_local(Path::new(path))
        }
        .map_err(Error::Resource)?;
        let img = LoadedImage::decode(url, bytes).map_err(|reason| Error::Image {
            url: url.to_string(),
            reason,
        })?;
        log::debug!(
            "Loaded image {url} ({}x{}) in {:.1}ms",
            img.width,
            img.height,
            t0.elapsed().as_secs_f64() * 1000.0
        );
        let img = Arc::new(img);
        self.images.insert(url.to_string(), Arc::clone(&img));
        Ok(img)
    }
}
