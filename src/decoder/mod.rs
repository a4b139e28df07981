//! Turning files into grayscale pixel buffers.
//!
//! Each decoder claims a set of extensions. The registry asks them in
//! registration order and the first one that can handle a path decodes it.

pub mod external;
pub mod heic;
pub mod raw;
pub mod standard;

use crate::core::image::has_extension;
use image::{DynamicImage, GrayImage, Luma};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use external::{ExternalTool, ToolOutput};
pub use heic::HeicDecoder;
pub use raw::RawDecoder;
pub use standard::StandardDecoder;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unsupported file: {path}")]
    Unsupported { path: PathBuf },

    #[error("Decoded image is empty: {path}")]
    Empty { path: PathBuf },

    #[error("{program} is not installed")]
    ToolMissing { program: String },

    #[error("{program} failed: {message}")]
    ToolFailed { program: String, message: String },

    #[error("RAW decode error: {0}")]
    Raw(String),

    #[error("All decode strategies failed for {path}: {last}")]
    AllStrategiesFailed { path: PathBuf, last: String },
}

/// A way of producing pixels for a family of file types.
pub trait ImageDecoder: Send + Sync {
    fn name(&self) -> &str;

    /// Lowercase extensions without the dot.
    fn extensions(&self) -> &[&'static str];

    fn can_decode(&self, path: &Path) -> bool {
        has_extension(path, self.extensions()) && path.is_file()
    }

    fn decode(&self, path: &Path) -> Result<GrayImage, DecodeError>;
}

/// One attempt in a fallback chain.
pub trait DecodeStrategy: Send + Sync {
    fn label(&self) -> &str;

    fn attempt(&self, path: &Path) -> Result<GrayImage, DecodeError>;
}

/// Runs strategies in order and returns the first success. Every failure is
/// logged; the last one is reported if nothing works.
pub fn decode_with_fallbacks(
    path: &Path,
    strategies: &[Box<dyn DecodeStrategy>],
) -> Result<GrayImage, DecodeError> {
    let mut last = String::from("no strategies configured");

    for strategy in strategies {
        match strategy.attempt(path) {
            Ok(image) => {
                log::debug!("Decoded {} with {}", path.display(), strategy.label());
                return Ok(image);
            }
            Err(e) => {
                log::debug!("{} failed for {}: {}", strategy.label(), path.display(), e);
                last = format!("{}: {}", strategy.label(), e);
            }
        }
    }

    Err(DecodeError::AllStrategiesFailed {
        path: path.to_path_buf(),
        last,
    })
}

/// BT.601 luma (0.299 R + 0.587 G + 0.114 B), the weighting stored
/// fingerprints were computed with. `to_luma8` uses Rec. 709 instead.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

pub(crate) fn non_empty(path: &Path, image: GrayImage) -> Result<GrayImage, DecodeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(image)
}

pub struct DecoderRegistry {
    decoders: Vec<Arc<dyn ImageDecoder>>,
}

impl DecoderRegistry {
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    pub fn register(&mut self, decoder: Arc<dyn ImageDecoder>) {
        self.decoders.push(decoder);
    }

    pub fn decoders(&self) -> impl Iterator<Item = &dyn ImageDecoder> {
        self.decoders.iter().map(|d| d.as_ref())
    }

    pub fn find(&self, path: &Path) -> Option<&dyn ImageDecoder> {
        self.decoders().find(|d| d.can_decode(path))
    }

    pub fn can_decode(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    pub fn decode(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        match self.find(path) {
            Some(decoder) => decoder.decode(path),
            None => Err(DecodeError::Unsupported {
                path: path.to_path_buf(),
            }),
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(StandardDecoder::new()));
        registry.register(Arc::new(RawDecoder::new()));
        registry.register(Arc::new(HeicDecoder::new()));
        registry
    }
}
