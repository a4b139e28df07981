//! Per-pair matching policy.
//!
//! Hash distances only gate the expensive pixel comparison; they never accept
//! a match on their own. Thresholds depend on which side of the pair is RAW,
//! because embedded previews and converted sensor data hash differently.

use super::image::{is_jpeg_format, is_raw_format};
use serde::Serialize;
use std::path::Path;

/// Width of a fingerprint in bits; a threshold of this value always passes.
pub const MAX_HASH_DISTANCE: u32 = 64;

/// Confirmation threshold multiplier for RAW/JPEG pairs.
pub const CROSS_FORMAT_FACTOR: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modality {
    pub raw: bool,
    pub jpeg: bool,
}

impl Modality {
    pub fn of(path: &Path) -> Self {
        Self {
            raw: is_raw_format(path),
            jpeg: is_jpeg_format(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Pairing {
    /// One side RAW, the other JPEG.
    CrossFormat,
    /// At least one side RAW, the other not JPEG.
    RawInvolved,
    SameModality,
}

impl Pairing {
    pub fn between(query: Modality, candidate: Modality) -> Self {
        if (query.raw && candidate.jpeg) || (query.jpeg && candidate.raw) {
            Pairing::CrossFormat
        } else if query.raw || candidate.raw {
            Pairing::RawInvolved
        } else {
            Pairing::SameModality
        }
    }

    pub fn thresholds(self) -> HashThresholds {
        match self {
            Pairing::CrossFormat => HashThresholds::new(20, 25),
            Pairing::RawInvolved => HashThresholds::new(15, 18),
            Pairing::SameModality => HashThresholds::new(10, 12),
        }
    }
}

/// Maximum Hamming distances (out of 64) that let a candidate through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HashThresholds {
    pub average: u32,
    pub perceptual: u32,
}

impl HashThresholds {
    pub const fn new(average: u32, perceptual: u32) -> Self {
        Self {
            average,
            perceptual,
        }
    }

    pub const fn unbounded() -> Self {
        Self::new(MAX_HASH_DISTANCE, MAX_HASH_DISTANCE)
    }

    /// Either distance within its bound is enough.
    pub fn admits(&self, average_distance: u32, perceptual_distance: u32) -> bool {
        average_distance <= self.average || perceptual_distance <= self.perceptual
    }
}

/// Decision inputs for one query/candidate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub pairing: Pairing,
    pub thresholds: HashThresholds,
    /// JPEG query, RAW candidate, and the file names look like siblings.
    pub related_names: bool,
    pub confirmation_threshold: f64,
}

impl Assessment {
    pub fn passes_prefilter(&self, average_distance: u32, perceptual_distance: u32) -> bool {
        self.thresholds.admits(average_distance, perceptual_distance)
    }

    pub fn is_match(&self, score: f64) -> bool {
        score >= self.confirmation_threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    threshold: f64,
}

impl MatchPolicy {
    /// `threshold` is the caller's confirmation threshold, already validated.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn assess(&self, query: &Path, candidate: &Path) -> Assessment {
        let query_kind = Modality::of(query);
        let candidate_kind = Modality::of(candidate);
        let pairing = Pairing::between(query_kind, candidate_kind);

        let related_names =
            query_kind.jpeg && candidate_kind.raw && are_filenames_related(query, candidate);
        let thresholds = if related_names {
            HashThresholds::unbounded()
        } else {
            pairing.thresholds()
        };

        let confirmation_threshold = match pairing {
            Pairing::CrossFormat => self.threshold * CROSS_FORMAT_FACTOR,
            _ => self.threshold,
        };

        Assessment {
            pairing,
            thresholds,
            related_names,
            confirmation_threshold,
        }
    }
}

/// File stem without directory or extension.
pub fn base_filename(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Camera siblings like `IMG_1234.NEF` / `IMG_1234.JPG`, or exports renamed
/// with a suffix (`IMG_1234-edited.jpg`), or renumbered with the same digits.
pub fn are_filenames_related(a: &Path, b: &Path) -> bool {
    let a = base_filename(a);
    let b = base_filename(b);

    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b || a.starts_with(&b) || b.starts_with(&a) {
        return true;
    }

    let digits_a = digits_of(&a);
    !digits_a.is_empty() && digits_a == digits_of(&b)
}

fn digits_of(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}
