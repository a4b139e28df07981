pub mod images;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use images::{ImageConnection, ImageStore, UpsertOutcome};

/// Concurrent scan workers each hold a connection; writers wait this long for
/// the SQLite lock before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query error: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database not found: {path}")]
    NotFound { path: PathBuf },
}

pub fn open_connection(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

pub fn initialize_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            source_prefix TEXT NOT NULL,
            format TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            size INTEGER NOT NULL,
            average_hash TEXT NOT NULL,
            perceptual_hash TEXT NOT NULL,
            is_raw_format INTEGER NOT NULL,
            UNIQUE(path, source_prefix)
        )",
        [],
    )?;

    // Create indexes for performance
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_images_path ON images(path)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_images_source_prefix ON images(source_prefix)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_images_average_hash ON images(average_hash)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_images_perceptual_hash ON images(perceptual_hash)",
        [],
    )?;

    Ok(())
}
