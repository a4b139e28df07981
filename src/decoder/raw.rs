//! Camera RAW decoding.
//!
//! Embedded JPEG previews are tried first because they are fast and close to
//! what a camera's own JPEG looks like. Full conversion with dcraw comes next,
//! and rawloader's sensor data is the last resort when no tool is installed.

use super::external::ExternalTool;
use super::{DecodeError, DecodeStrategy, ImageDecoder, decode_with_fallbacks, non_empty};
use crate::core::image::RAW_EXTENSIONS;
use image::GrayImage;
use rawloader::{RawImage, RawImageData};
use rayon::prelude::*;
use std::path::Path;

/// Embedded previews below this size are usually stub thumbnails.
pub const MIN_PREVIEW_BYTES: usize = 10_000;

const GAMMA: f32 = 0.45;

pub struct RawDecoder {
    strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl RawDecoder {
    pub fn new() -> Self {
        Self::with_strategies(default_strategies())
    }

    pub fn with_strategies(strategies: Vec<Box<dyn DecodeStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_labels(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.label()).collect()
    }
}

impl Default for RawDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDecoder for RawDecoder {
    fn name(&self) -> &str {
        "raw"
    }

    fn extensions(&self) -> &[&'static str] {
        RAW_EXTENSIONS
    }

    fn decode(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        decode_with_fallbacks(path, &self.strategies)
    }
}

fn default_strategies() -> Vec<Box<dyn DecodeStrategy>> {
    let mut chain: Vec<Box<dyn DecodeStrategy>> = Vec::new();

    for tag in ["-PreviewImage", "-JpgFromRaw", "-ThumbnailImage"] {
        chain.push(Box::new(
            ExternalTool::new(
                format!("exiftool {}", tag),
                "exiftool",
                &["-b", tag, "{input}"],
            )
            .with_min_bytes(MIN_PREVIEW_BYTES),
        ));
    }

    // Camera white balance
    chain.push(Box::new(ExternalTool::new(
        "dcraw camera-wb",
        "dcraw",
        &["-c", "-w", "-T", "{input}"],
    )));
    // Auto white balance, no auto-brighten
    chain.push(Box::new(ExternalTool::new(
        "dcraw auto-wb",
        "dcraw",
        &["-c", "-a", "-W", "-T", "{input}"],
    )));

    chain.push(Box::new(SensorDataStrategy));
    chain
}

/// Decodes sensor data in-process with rawloader.
pub struct SensorDataStrategy;

impl DecodeStrategy for SensorDataStrategy {
    fn label(&self) -> &str {
        "rawloader"
    }

    fn attempt(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        let raw = rawloader::RawLoader::new()
            .decode_file(path)
            .map_err(|e| DecodeError::Raw(format!("{:?}", e)))?;

        non_empty(path, sensor_to_gray(&raw)?)
    }
}

/// Black/white level normalisation, 2x2 binning of single-channel mosaics,
/// gamma, then 8-bit quantisation.
fn sensor_to_gray(raw: &RawImage) -> Result<GrayImage, DecodeError> {
    let black = raw.blacklevels[0] as f32;
    let white = (raw.whitelevels[0] as f32).max(black + 1.0);
    let range = white - black;

    let samples: Vec<f32> = match &raw.data {
        RawImageData::Integer(values) => values
            .par_iter()
            .map(|&v| ((v as f32 - black) / range).clamp(0.0, 1.0))
            .collect(),
        RawImageData::Float(values) => values.par_iter().map(|&v| v.clamp(0.0, 1.0)).collect(),
    };

    let cpp = raw.cpp.max(1);
    if samples.len() < raw.width * raw.height * cpp {
        return Err(DecodeError::Raw(format!(
            "sensor data too short: {} samples for {}x{}x{}",
            samples.len(),
            raw.width,
            raw.height,
            cpp
        )));
    }

    let (width, height, pixels) = if cpp == 1 {
        bin_mosaic(&samples, raw.width, raw.height)
    } else {
        average_channels(&samples, raw.width, raw.height, cpp)
    };

    let buffer: Vec<u8> = pixels
        .par_iter()
        .map(|&v| (v.powf(GAMMA) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();

    GrayImage::from_raw(width as u32, height as u32, buffer)
        .ok_or_else(|| DecodeError::Raw("pixel buffer does not match dimensions".to_string()))
}

/// Every 2x2 CFA block becomes one pixel, which averages out the colour
/// pattern without demosaicing.
fn bin_mosaic(samples: &[f32], width: usize, height: usize) -> (usize, usize, Vec<f32>) {
    let out_w = width / 2;
    let out_h = height / 2;

    let pixels = (0..out_h)
        .into_par_iter()
        .flat_map_iter(|oy| {
            let top = &samples[(2 * oy) * width..(2 * oy + 1) * width];
            let bottom = &samples[(2 * oy + 1) * width..(2 * oy + 2) * width];
            (0..out_w).map(move |ox| {
                let x = 2 * ox;
                (top[x] + top[x + 1] + bottom[x] + bottom[x + 1]) / 4.0
            })
        })
        .collect();

    (out_w, out_h, pixels)
}

fn average_channels(
    samples: &[f32],
    width: usize,
    height: usize,
    cpp: usize,
) -> (usize, usize, Vec<f32>) {
    let pixels = samples[..width * height * cpp]
        .par_chunks(cpp)
        .map(|px| px.iter().sum::<f32>() / cpp as f32)
        .collect();

    (width, height, pixels)
}
