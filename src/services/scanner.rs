use crate::config::EngineConfig;
use crate::core::fingerprint::Fingerprints;
use crate::core::image::{ImageRecord, format_of, format_timestamp, is_newer_than, is_raw_format};
use crate::database::{DatabaseError, ImageConnection, ImageStore, UpsertOutcome};
use crate::decoder::{DecodeError, DecoderRegistry};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    pub folder: PathBuf,
    pub source_prefix: String,
    pub force_rewrite: bool,
    pub debug: bool,
}

impl ScanOptions {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            source_prefix: String::new(),
            force_rewrite: false,
            debug: false,
        }
    }

    pub fn with_source_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_prefix = prefix.into();
        self
    }

    pub fn with_force_rewrite(mut self, force: bool) -> Self {
        self.force_rewrite = force;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed { raw: bool },
    Updated { raw: bool },
    Unchanged,
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub discovered: usize,
    pub processed: usize,
    pub indexed: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
    pub raw_processed: usize,
    pub elapsed: Duration,
    /// `(path, message)` for every file that failed.
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Counters {
    processed: usize,
    indexed: usize,
    updated: usize,
    unchanged: usize,
    errors: usize,
    raw_processed: usize,
}

impl Counters {
    fn record(&mut self, path: &Path, outcome: &FileOutcome) {
        self.processed += 1;
        if is_raw_format(path) {
            self.raw_processed += 1;
        }
        match outcome {
            FileOutcome::Indexed { .. } => self.indexed += 1,
            FileOutcome::Updated { .. } => self.updated += 1,
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Failed { .. } => self.errors += 1,
        }
    }
}

pub struct Scanner {
    store: ImageStore,
    registry: Arc<DecoderRegistry>,
    config: EngineConfig,
    progress: Option<ProgressBar>,
}

impl Scanner {
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

    /// Indexes every decodable file under the folder. Per-file failures are
    /// counted and reported, never propagated.
    pub fn scan(&self, options: &ScanOptions) -> Result<ScanSummary, ScanError> {
        let start_time = Instant::now();
        let root = &options.folder;

        if !root.exists() {
            return Err(ScanError::InvalidPath {
                path: root.to_string_lossy().to_string(),
            });
        }
        if !root.is_dir() {
            return Err(ScanError::InvalidPath {
                path: format!("{} is not a directory", root.to_string_lossy()),
            });
        }

        if options.debug {
            log::debug!(
                "Starting scan of {} into {} (prefix '{}', force rewrite: {})",
                root.display(),
                self.store.path().display(),
                options.source_prefix,
                options.force_rewrite
            );
        }

        let files = discover_files(root, &self.registry);
        let discovered = files.len();
        log::info!("Found {} image files in {}", discovered, root.display());

        if let Some(progress) = &self.progress {
            progress.set_length(discovered as u64);
        }

        let pool = self.config.build_pool()?;
        let counters = Mutex::new(Counters::default());

        let results: Vec<FileResult> = pool.install(|| {
            files
                .par_iter()
                .map_init(
                    || self.store.connect(),
                    |conn, path| {
                        let outcome = match conn {
                            Ok(conn) => self
                                .process_file(conn, path, options)
                                .unwrap_or_else(|e| FileOutcome::Failed {
                                    message: e.to_string(),
                                }),
                            Err(e) => FileOutcome::Failed {
                                message: format!("Database connection failed: {}", e),
                            },
                        };

                        self.report(path, &outcome, options);

                        let processed = {
                            let mut counters = counters.lock().unwrap_or_else(|e| e.into_inner());
                            counters.record(path, &outcome);
                            counters.processed
                        };
                        if options.debug && processed % self.config.progress_interval.max(1) == 0 {
                            log::debug!(
                                "Scan progress: {}/{} files in {:.2}s",
                                processed,
                                discovered,
                                start_time.elapsed().as_secs_f64()
                            );
                        }
                        if let Some(progress) = &self.progress {
                            progress.inc(1);
                        }

                        FileResult {
                            path: path.clone(),
                            outcome,
                        }
                    },
                )
                .collect()
        });

        let counters = counters.into_inner().unwrap_or_else(|e| e.into_inner());
        let failures = results
            .into_iter()
            .filter_map(|result| match result.outcome {
                FileOutcome::Failed { message } => {
                    Some((result.path.to_string_lossy().to_string(), message))
                }
                _ => None,
            })
            .collect();

        let summary = ScanSummary {
            discovered,
            processed: counters.processed,
            indexed: counters.indexed,
            updated: counters.updated,
            unchanged: counters.unchanged,
            errors: counters.errors,
            raw_processed: counters.raw_processed,
            elapsed: start_time.elapsed(),
            failures,
        };

        if options.debug {
            log::debug!(
                "Scan complete: {} processed ({} RAW), {} indexed, {} updated, {} unchanged, {} errors",
                summary.processed,
                summary.raw_processed,
                summary.indexed,
                summary.updated,
                summary.unchanged,
                summary.errors
            );
        }

        Ok(summary)
    }

    /// Re-fingerprints when the record is missing, when the file's mtime is
    /// newer than the stored one, or when forced.
    fn process_file(
        &self,
        conn: &ImageConnection,
        path: &Path,
        options: &ScanOptions,
    ) -> Result<FileOutcome, ScanError> {
        let metadata = fs::metadata(path)?;
        let modified = metadata.modified()?;
        let path_str = path.to_string_lossy().to_string();

        let stale = match conn.exists(&path_str, &options.source_prefix)? {
            None => false,
            Some(stored) if is_newer_than(modified, &stored) => true,
            Some(_) if options.force_rewrite => false,
            Some(_) => return Ok(FileOutcome::Unchanged),
        };

        let image = self.registry.decode(path)?;
        let fingerprints = Fingerprints::compute(&image);
        let raw = is_raw_format(path);

        let record = ImageRecord {
            id: None,
            path: path_str,
            source_prefix: options.source_prefix.clone(),
            format: format_of(path),
            width: image.width(),
            height: image.height(),
            created_at: None,
            modified_at: format_timestamp(modified),
            size: metadata.len(),
            average_hash: fingerprints.average,
            perceptual_hash: fingerprints.perceptual,
            is_raw_format: raw,
        };

        let outcome = match conn.upsert(&record, options.force_rewrite || stale)? {
            UpsertOutcome::Inserted => FileOutcome::Indexed { raw },
            UpsertOutcome::Updated => FileOutcome::Updated { raw },
            UpsertOutcome::Unchanged => FileOutcome::Unchanged,
        };

        Ok(outcome)
    }

    fn report(&self, path: &Path, outcome: &FileOutcome, options: &ScanOptions) {
        match outcome {
            FileOutcome::Failed { message } => {
                if options.debug {
                    log::error!("FAILED: {} - Error: {}", path.display(), message);
                } else {
                    log::debug!("FAILED: {} - Error: {}", path.display(), message);
                }
            }
            FileOutcome::Indexed { .. } | FileOutcome::Updated { .. } => {
                log::debug!("PROCESSED: {}", path.display());
            }
            FileOutcome::Unchanged => {
                log::debug!("UNCHANGED: {}", path.display());
            }
        }
    }
}

/// Files under `root` that some registered decoder accepts, in walk order
/// sorted by path. Symlinks are not followed.
pub fn discover_files(root: &Path, registry: &DecoderRegistry) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| registry.can_decode(path))
        .collect();

    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::TempDir;

    fn create_test_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });
        img.save(path).unwrap();
    }

    fn setup() -> (TempDir, ImageStore, Scanner) {
        let temp_dir = TempDir::new().unwrap();
        let photos = temp_dir.path().join("photos");
        fs::create_dir_all(photos.join("nested")).unwrap();

        // Create test images
        create_test_image(&photos.join("a.jpg"), 64, 48);
        create_test_image(&photos.join("b.png"), 32, 32);
        create_test_image(&photos.join("nested").join("c.tif"), 40, 40);
        fs::write(photos.join("notes.txt"), "not an image").unwrap();

        let store = ImageStore::create(temp_dir.path().join("images.db")).unwrap();
        let config = EngineConfig::default().with_workers(2);
        let scanner = Scanner::new(store.clone(), Arc::new(DecoderRegistry::default()), &config);
        (temp_dir, store, scanner)
    }

    #[test]
    fn test_scan_indexes_supported_files() {
        let (temp_dir, store, scanner) = setup();
        let options = ScanOptions::new(temp_dir.path().join("photos")).with_source_prefix("disk1");

        let summary = scanner.scan(&options).unwrap();
        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.indexed, 3);
        assert_eq!(summary.errors, 0);

        let records = store.connect().unwrap().records(Some("disk1")).unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.average_hash.len(), 64);
            assert_eq!(record.perceptual_hash.len(), 64);
            assert!(!record.is_raw_format);
        }
        let a = records.iter().find(|r| r.path.ends_with("a.jpg")).unwrap();
        assert_eq!((a.width, a.height), (64, 48));
        assert_eq!(a.format, "jpg");
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let (temp_dir, store, scanner) = setup();
        let options = ScanOptions::new(temp_dir.path().join("photos"));

        scanner.scan(&options).unwrap();
        let before = store.connect().unwrap().records(None).unwrap();

        let summary = scanner.scan(&options).unwrap();
        assert_eq!(summary.indexed, 0);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.unchanged, 3);

        let after = store.connect().unwrap().records(None).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_force_rewrite_updates_everything() {
        let (temp_dir, _store, scanner) = setup();
        let options = ScanOptions::new(temp_dir.path().join("photos"));
        scanner.scan(&options).unwrap();

        let summary = scanner.scan(&options.clone().with_force_rewrite(true)).unwrap();
        assert_eq!(summary.updated, 3);
        assert_eq!(summary.unchanged, 0);
    }

    #[test]
    fn test_stale_record_is_refingerprinted() {
        let (temp_dir, store, scanner) = setup();
        let options = ScanOptions::new(temp_dir.path().join("photos"));
        scanner.scan(&options).unwrap();

        let conn = store.connect().unwrap();
        let target = temp_dir.path().join("photos").join("a.jpg");
        let target = target.to_string_lossy().to_string();
        let created = conn.find(&target, "").unwrap().unwrap().created_at;
        conn.raw()
            .execute(
                "UPDATE images SET modified_at = '2000-01-01T00:00:00+00:00' WHERE path = ?1",
                [&target],
            )
            .unwrap();

        let summary = scanner.scan(&options).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.unchanged, 2);

        let record = conn.find(&target, "").unwrap().unwrap();
        assert_ne!(record.modified_at, "2000-01-01T00:00:00+00:00");
        assert_eq!(record.created_at, created);
    }

    #[test]
    fn test_corrupt_file_is_reported_not_fatal() {
        let (temp_dir, _store, scanner) = setup();
        let broken = temp_dir.path().join("photos").join("broken.jpg");
        fs::write(&broken, b"not really a jpeg").unwrap();

        let summary = scanner.scan(&ScanOptions::new(temp_dir.path().join("photos"))).unwrap();
        assert_eq!(summary.discovered, 4);
        assert_eq!(summary.indexed, 3);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].0.ends_with("broken.jpg"));
    }

    #[test]
    fn test_invalid_folder() {
        let (temp_dir, _store, scanner) = setup();

        let missing = ScanOptions::new(temp_dir.path().join("nope"));
        assert!(matches!(
            scanner.scan(&missing),
            Err(ScanError::InvalidPath { .. })
        ));

        let file = ScanOptions::new(temp_dir.path().join("photos").join("a.jpg"));
        assert!(matches!(
            scanner.scan(&file),
            Err(ScanError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_discover_files_skips_unsupported() {
        let (temp_dir, _store, _scanner) = setup();
        let files = discover_files(&temp_dir.path().join("photos"), &DecoderRegistry::default());

        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|p| p.extension().unwrap() != "txt"));
    }
}
