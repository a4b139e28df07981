//! Perceptual-fingerprint image index with similarity search.
//!
//! Files are decoded to grayscale (camera RAW included), fingerprinted with an
//! average hash and a region-median perceptual hash, and stored in SQLite.
//! Searches prefilter the index by Hamming distance and confirm candidates
//! with a full pixel comparison.

pub mod config;
pub mod core;
pub mod database;
pub mod decoder;
pub mod logging;
pub mod services;

pub use config::EngineConfig;
pub use crate::core::{Fingerprints, ImageMatch, ImageRecord, MatchPolicy};
pub use database::ImageStore;
pub use decoder::DecoderRegistry;
pub use services::{Benchmark, ScanOptions, Scanner, SearchOptions, Searcher};
