use super::external::ExternalTool;
use super::{
    DecodeError, DecodeStrategy, ImageDecoder, decode_with_fallbacks, non_empty, to_gray,
};
use image::GrayImage;
use std::path::Path;

const EXTENSIONS: &[&str] = &["heic", "heif"];

/// HEIC/HEIF through `heif-convert`, falling back to whatever the `image`
/// crate can make of the file.
pub struct HeicDecoder {
    strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl HeicDecoder {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(
                    ExternalTool::new("heif-convert", "heif-convert", &["{input}", "{output}"])
                        .with_scratch_file(".jpg"),
                ),
                Box::new(DirectDecode),
            ],
        }
    }
}

impl Default for HeicDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDecoder for HeicDecoder {
    fn name(&self) -> &str {
        "heic"
    }

    fn extensions(&self) -> &[&'static str] {
        EXTENSIONS
    }

    fn decode(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        decode_with_fallbacks(path, &self.strategies)
    }
}

struct DirectDecode;

impl DecodeStrategy for DirectDecode {
    fn label(&self) -> &str {
        "direct"
    }

    fn attempt(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        // The extension says HEIC; let the content decide what it really is.
        let img = image::ImageReader::open(path)?
            .with_guessed_format()?
            .decode()?;
        non_empty(path, to_gray(&img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    #[test]
    fn test_undecodable_heic() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("IMG_0001.HEIC");
        std::fs::write(&path, b"ftypheic but not really").unwrap();

        let decoder = HeicDecoder::new();
        assert!(decoder.can_decode(&path));
        assert!(matches!(
            decoder.decode(&path),
            Err(DecodeError::AllStrategiesFailed { .. })
        ));
    }

    #[test]
    fn test_misnamed_file_decodes_by_content() {
        let temp_dir = TempDir::new().unwrap();
        let png = temp_dir.path().join("source.png");
        ImageBuffer::from_pixel(16, 12, Rgb([90u8, 90, 90]))
            .save(&png)
            .unwrap();
        let path = temp_dir.path().join("IMG_0002.heic");
        std::fs::rename(&png, &path).unwrap();

        let gray = HeicDecoder::new().decode(&path).unwrap();
        assert_eq!(gray.dimensions(), (16, 12));
        assert!(gray.pixels().all(|p| p[0] == 90));
    }
}
