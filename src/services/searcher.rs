use crate::config::{EngineConfig, validate_threshold};
use crate::core::fingerprint::Fingerprints;
use crate::core::image::{ImageMatch, ImageRecord, is_jpeg_format, is_raw_format};
use crate::core::policy::{MatchPolicy, base_filename};
use crate::core::similarity::{confirmation_score, hamming_distance};
use crate::database::{DatabaseError, ImageStore};
use crate::decoder::{DecodeError, DecoderRegistry};
use image::GrayImage;
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Query image not found: {path}")]
    QueryNotFound { path: PathBuf },

    #[error("Failed to decode query image: {0}")]
    Decode(#[from] DecodeError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query: PathBuf,
    /// `None` uses the engine's configured default.
    pub threshold: Option<f64>,
    pub source_prefix: String,
    pub debug: bool,
    warnings: Vec<String>,
}

impl SearchOptions {
    pub fn new(query: impl Into<PathBuf>) -> Self {
        Self {
            query: query.into(),
            threshold: None,
            source_prefix: String::new(),
            debug: false,
            warnings: Vec::new(),
        }
    }

    /// Out-of-range or NaN thresholds fall back to the default with a
    /// warning that ends up in the report.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        let (value, warning) = validate_threshold(threshold);
        self.threshold = Some(value);
        self.warnings.extend(warning);
        self
    }

    /// Records a warning raised while building the options, such as a
    /// malformed threshold string.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_source_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_prefix = prefix.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    /// Best first.
    pub matches: Vec<ImageMatch>,
    pub threshold: f64,
    pub warnings: Vec<String>,
    pub candidates: usize,
    pub processed: usize,
    pub raw_processed: usize,
    /// Candidates whose path contains a JPEG query's base filename.
    pub sibling_hints: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    processed: usize,
    raw_processed: usize,
}

impl Counters {
    fn record(&mut self, path: &Path) -> (usize, usize) {
        self.processed += 1;
        if is_raw_format(path) {
            self.raw_processed += 1;
        }
        (self.processed, self.raw_processed)
    }
}

pub struct Searcher {
    store: ImageStore,
    registry: Arc<DecoderRegistry>,
    config: EngineConfig,
    progress: Option<ProgressBar>,
}

impl Searcher {
    pub fn new(store: ImageStore, registry: Arc<DecoderRegistry>, config: &EngineConfig) -> Self {
        Self {
            store,
            registry,
            config: config.clone(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Finds indexed images similar to the query. Candidates are prefiltered
    /// by hash distance and confirmed by a full pixel comparison.
    pub fn search(&self, options: &SearchOptions) -> Result<SearchReport, SearchError> {
        let start_time = Instant::now();
        let query = &options.query;

        let mut warnings = options.warnings().to_vec();
        let threshold = match options.threshold {
            Some(threshold) => threshold,
            None => {
                let (value, warning) = validate_threshold(self.config.default_threshold);
                warnings.extend(warning);
                value
            }
        };
        for warning in &warnings {
            log::warn!("{}", warning);
        }

        if !query.is_file() {
            return Err(SearchError::QueryNotFound {
                path: query.clone(),
            });
        }

        let query_image = self.registry.decode(query)?;
        let query_fingerprints = Fingerprints::compute(&query_image);
        let policy = MatchPolicy::new(threshold);

        if options.debug {
            log::debug!("Starting image search for: {}", query.display());
            log::debug!(
                "Threshold: {:.2}, Source Prefix: {}",
                policy.threshold(),
                options.source_prefix
            );
            log::debug!(
                "Query image hashes - avgHash: {}, pHash: {}",
                query_fingerprints.average,
                query_fingerprints.perceptual
            );
            if is_raw_format(query) {
                log::debug!("Query image is a RAW format file");
            }
        }

        let candidates = self
            .store
            .connect()?
            .records(Some(options.source_prefix.as_str()))?;

        let sibling_hints = if is_jpeg_format(query) {
            let base = base_filename(query);
            if options.debug {
                log::debug!("Looking for filename siblings of JPEG query: {}", base);
            }
            candidates
                .iter()
                .filter(|c| !base.is_empty() && c.path.contains(&base))
                .count()
        } else {
            0
        };

        if let Some(progress) = &self.progress {
            progress.set_length(candidates.len() as u64);
        }

        let pool = self.config.build_pool()?;
        let counters = Mutex::new(Counters::default());
        let context = CandidateContext {
            query,
            query_image: &query_image,
            query_fingerprints: &query_fingerprints,
            policy: &policy,
            debug: options.debug,
        };

        let results: Vec<Option<ImageMatch>> = pool.install(|| {
            candidates
                .par_iter()
                .map(|candidate| {
                    let result = self.evaluate(&context, candidate);

                    let (count, raw_count) = counters
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .record(Path::new(&candidate.path));
                    if options.debug && count % self.config.progress_interval.max(1) == 0 {
                        log::debug!(
                            "Search progress: {} images processed ({} RAW) in {:.2}s",
                            count,
                            raw_count,
                            start_time.elapsed().as_secs_f64()
                        );
                    }
                    if let Some(progress) = &self.progress {
                        progress.inc(1);
                    }

                    result
                })
                .collect()
        });

        let mut matches: Vec<ImageMatch> = results.into_iter().flatten().collect();
        matches.sort_by(|a, b| b.ssim_score.total_cmp(&a.ssim_score));

        let counters = counters
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let report = SearchReport {
            matches,
            threshold: policy.threshold(),
            warnings,
            candidates: candidates.len(),
            processed: counters.processed,
            raw_processed: counters.raw_processed,
            sibling_hints,
            elapsed: start_time.elapsed(),
        };

        if options.debug {
            log::debug!(
                "Search completed. Total images processed: {} ({} RAW), Matches found: {}",
                report.processed,
                report.raw_processed,
                report.matches.len()
            );
        }

        Ok(report)
    }

    fn evaluate(
        &self,
        ctx: &CandidateContext<'_>,
        candidate: &ImageRecord,
    ) -> Option<ImageMatch> {
        let path = Path::new(&candidate.path);
        if !path.exists() {
            log::debug!("Skipping missing file: {}", path.display());
            return None;
        }

        let avg_distance = hamming_distance(&ctx.query_fingerprints.average, &candidate.average_hash);
        let p_distance =
            hamming_distance(&ctx.query_fingerprints.perceptual, &candidate.perceptual_hash);
        let assessment = ctx.policy.assess(ctx.query, path);

        if assessment.related_names && ctx.debug {
            log::debug!(
                "Filename relationship detected between {} and {}, forcing comparison",
                ctx.query.display(),
                path.display()
            );
        }

        if !assessment.passes_prefilter(avg_distance, p_distance) {
            return None;
        }

        log::debug!(
            "Potential match found: {} (avgHashDist: {}/{}, pHashDist: {}/{}, {:?})",
            path.display(),
            avg_distance,
            assessment.thresholds.average,
            p_distance,
            assessment.thresholds.perceptual,
            assessment.pairing
        );

        let candidate_image = match self.decode_candidate(path, ctx.debug) {
            Some(image) => image,
            None => return None,
        };

        let score = confirmation_score(ctx.query_image, &candidate_image);
        if assessment.is_match(score) {
            log::debug!(
                "Match confirmed: {} (score: {:.4} >= {:.4})",
                path.display(),
                score,
                assessment.confirmation_threshold
            );
            Some(ImageMatch {
                path: candidate.path.clone(),
                source_prefix: candidate.source_prefix.clone(),
                ssim_score: score,
            })
        } else {
            log::debug!(
                "Match rejected: {} (score: {:.4} < {:.4})",
                path.display(),
                score,
                assessment.confirmation_threshold
            );
            None
        }
    }

    fn decode_candidate(&self, path: &Path, debug: bool) -> Option<GrayImage> {
        match self.registry.decode(path) {
            Ok(image) => Some(image),
            Err(e) => {
                if debug {
                    log::warn!("Failed to load candidate image {}: {}", path.display(), e);
                } else {
                    log::debug!("Failed to load candidate image {}: {}", path.display(), e);
                }
                None
            }
        }
    }
}

struct CandidateContext<'a> {
    query: &'a Path,
    query_image: &'a GrayImage,
    query_fingerprints: &'a Fingerprints,
    policy: &'a MatchPolicy,
    debug: bool,
}
