pub mod fingerprint;
pub mod image;
pub mod policy;
pub mod similarity;

pub use fingerprint::Fingerprints;
pub use self::image::{ImageMatch, ImageRecord};
pub use policy::{Assessment, HashThresholds, MatchPolicy, Modality, Pairing};
pub use similarity::{confirmation_score, hamming_distance};
