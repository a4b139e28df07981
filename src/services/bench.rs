//! Decode and fingerprint timing.
//!
//! Each timed call runs on its own thread and the caller waits up to the
//! deadline. A call that overruns is abandoned, not killed: external
//! converters can hang and there is no portable way to stop a thread.

use crate::core::fingerprint::Fingerprints;
use crate::decoder::DecoderRegistry;
use crate::services::scanner::{ScanError, discover_files};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_RUNS: usize = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs `f` on a detached thread. `None` when it does not finish in time or
/// the thread could not be started.
pub fn run_with_deadline<T, F>(timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("imagefinder-bench".to_string())
        .spawn(move || {
            // The receiver is gone if the caller gave up.
            let _ = tx.send(f());
        });

    if let Err(e) = spawned {
        log::warn!("Failed to start benchmark thread: {}", e);
        return None;
    }

    rx.recv_timeout(timeout).ok()
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchResult {
    pub path: String,
    pub size: u64,
    pub runs: usize,
    /// Runs that finished successfully before any timeout or error.
    pub completed: usize,
    pub mean: Option<Duration>,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub timed_out: bool,
    pub error: Option<String>,
}

pub struct Benchmark {
    registry: Arc<DecoderRegistry>,
    runs: usize,
    timeout: Duration,
}

impl Benchmark {
    pub fn new(registry: Arc<DecoderRegistry>) -> Self {
        Self {
            registry,
            runs: DEFAULT_RUNS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_runs(mut self, runs: usize) -> Self {
        self.runs = runs.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Every decodable file under `folder`.
    pub fn collect_files(&self, folder: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !folder.is_dir() {
            return Err(ScanError::InvalidPath {
                path: folder.to_string_lossy().to_string(),
            });
        }
        Ok(discover_files(folder, &self.registry))
    }

    pub fn run(&self, paths: &[PathBuf]) -> Vec<BenchResult> {
        paths.iter().map(|path| self.run_file(path)).collect()
    }

    pub fn run_file(&self, path: &Path) -> BenchResult {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        log::info!("Benchmarking: {} ({:.2} MB)", path.display(), size as f64 / (1024.0 * 1024.0));

        let mut timings = Vec::with_capacity(self.runs);
        let mut timed_out = false;
        let mut error = None;

        for run in 1..=self.runs {
            let registry = self.registry.clone();
            let target = path.to_path_buf();

            let outcome = run_with_deadline(self.timeout, move || {
                let start = Instant::now();
                let image = registry.decode(&target).map_err(|e| e.to_string())?;
                let _ = Fingerprints::compute(&image);
                Ok::<_, String>(start.elapsed())
            });

            match outcome {
                Some(Ok(elapsed)) => {
                    log::debug!("Run {} of {}: {:.2?}", run, path.display(), elapsed);
                    timings.push(elapsed);
                }
                Some(Err(e)) => {
                    log::warn!("Failed to process {}: {}", path.display(), e);
                    error = Some(e);
                    break;
                }
                None => {
                    log::warn!(
                        "Processing {} timed out after {:.0?}",
                        path.display(),
                        self.timeout
                    );
                    timed_out = true;
                    break;
                }
            }
        }

        let completed = timings.len();
        let mean = (completed > 0).then(|| timings.iter().sum::<Duration>() / completed as u32);

        BenchResult {
            path: path.to_string_lossy().to_string(),
            size,
            runs: self.runs,
            completed,
            mean,
            min: timings.iter().min().copied(),
            max: timings.iter().max().copied(),
            timed_out,
            error,
        }
    }
}
