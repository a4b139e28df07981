use super::{DecodeError, ImageDecoder, non_empty, to_gray};
use image::GrayImage;
use std::path::Path;

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif"];

/// Formats the `image` crate reads directly.
pub struct StandardDecoder;

impl StandardDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StandardDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDecoder for StandardDecoder {
    fn name(&self) -> &str {
        "standard"
    }

    fn extensions(&self) -> &[&'static str] {
        EXTENSIONS
    }

    fn decode(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        let img = image::open(path)?;
        non_empty(path, to_gray(&img))
    }
}
