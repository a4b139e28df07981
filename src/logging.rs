//! Console and debug-file logging.
//!
//! Library code logs through the `log` facade. [`LogHandle::init`] installs a
//! `tracing-subscriber` formatter that receives those records; nothing is set
//! up lazily behind the caller's back.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub const DEFAULT_LOG_FILE: &str = "imagefinder.log";

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub debug: bool,
    /// Only used in debug mode; defaults to [`DEFAULT_LOG_FILE`].
    pub log_file: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(debug: bool, log_file: Option<PathBuf>) -> Self {
        Self { debug, log_file }
    }

    fn file_path(&self) -> Option<PathBuf> {
        self.debug
            .then(|| self.log_file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)))
    }
}

pub struct LogHandle {
    file: Option<Arc<File>>,
    path: Option<PathBuf>,
}

impl LogHandle {
    /// Installs the process subscriber. A log file that cannot be opened only
    /// costs a warning. Calling this twice keeps the first subscriber.
    pub fn init(config: &LogConfig) -> Self {
        let level = if config.debug { Level::DEBUG } else { Level::INFO };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

        let mut open_error = None;
        let file = config.file_path().and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some((Arc::new(file), path)),
                Err(e) => {
                    open_error = Some(format!("Failed to open log file {}: {}", path.display(), e));
                    None
                }
            }
        });

        let installed = match &file {
            Some((file, _)) => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stderr.with_max_level(level).and(file.clone()))
                .try_init(),
            None => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
        };
        if installed.is_err() {
            log::debug!("Logger already installed, keeping the existing one");
        }

        if let Some(message) = open_error {
            log::warn!("{}", message);
        }

        let handle = match file {
            Some((file, path)) => Self {
                file: Some(file),
                path: Some(path),
            },
            None => Self {
                file: None,
                path: None,
            },
        };
        handle.write_marker("Started");
        handle
    }

    pub fn log_file(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn shutdown(self) {
        self.write_marker("Closed");
        if let Some(file) = &self.file {
            let _ = (&**file).flush();
        }
    }

    fn write_marker(&self, event: &str) {
        if let Some(file) = &self.file {
            let _ = writeln!(
                &**file,
                "--- ImageFinder Debug Log {} at {} ---",
                event,
                Local::now().to_rfc3339()
            );
        }
    }
}
