use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::SystemTime;

/// Camera sensor formats that need conversion before they can be compared.
pub const RAW_EXTENSIONS: &[&str] = &["dng", "raf", "arw", "nef", "cr2", "cr3", "nrw", "srf"];

pub const JPEG_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// One indexed image. `(path, source_prefix)` is the natural key; `id` is
/// only the storage surrogate and is `None` until the record has been stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: Option<i64>,
    pub path: String,
    pub source_prefix: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Set by the store on first insert and never changed afterwards.
    pub created_at: Option<String>,
    /// The source file's mtime, not the record's.
    pub modified_at: String,
    pub size: u64,
    pub average_hash: String,
    pub perceptual_hash: String,
    pub is_raw_format: bool,
}

/// A confirmed search hit. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMatch {
    pub path: String,
    pub source_prefix: String,
    /// Historical name: this is the mean-difference confirmation score, not SSIM.
    pub ssim_score: f64,
}

/// Lowercase extension without the dot, or an empty string.
pub fn format_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    let ext = format_of(path);
    !ext.is_empty() && extensions.contains(&ext.as_str())
}

pub fn is_raw_format(path: &Path) -> bool {
    has_extension(path, RAW_EXTENSIONS)
}

pub fn is_jpeg_format(path: &Path) -> bool {
    has_extension(path, JPEG_EXTENSIONS)
}

/// RFC 3339 with the local offset, seconds precision.
pub fn format_timestamp(time: SystemTime) -> String {
    DateTime::<Local>::from(time).to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn now_timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// True when `live` is strictly newer than the stored timestamp, compared at
/// whole-second precision. An unparsable stored value counts as stale.
pub fn is_newer_than(live: SystemTime, stored: &str) -> bool {
    match DateTime::parse_from_rfc3339(stored) {
        Ok(stored) => DateTime::<Local>::from(live).timestamp() > stored.timestamp(),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_detection() {
        assert!(is_raw_format(Path::new("/photos/IMG_1234.NEF")));
        assert!(is_raw_format(Path::new("shot.cr3")));
        assert!(!is_raw_format(Path::new("shot.jpg")));
        assert!(is_jpeg_format(Path::new("IMG_1234.JPG")));
        assert!(is_jpeg_format(Path::new("a.jpeg")));
        assert!(!is_jpeg_format(Path::new("a.png")));
        assert!(!is_jpeg_format(Path::new("jpg")));
        assert_eq!(format_of(Path::new("x/y/Photo.TIFF")), "tiff");
        assert_eq!(format_of(Path::new("noext")), "");
    }

    #[test]
    fn test_timestamp_staleness() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let stored = format_timestamp(base);

        assert!(!is_newer_than(base, &stored));
        assert!(!is_newer_than(base + Duration::from_millis(500), &stored));
        assert!(is_newer_than(base + Duration::from_secs(2), &stored));
        assert!(!is_newer_than(base - Duration::from_secs(60), &stored));
        assert!(is_newer_than(base, "not a timestamp"));
    }

    #[test]
    fn test_timestamp_has_offset() {
        let stamp = now_timestamp();
        assert!(DateTime::parse_from_rfc3339(&stamp).is_ok());
    }
}
