use super::{DatabaseError, initialize_schema, open_connection};
use crate::core::image::{ImageRecord, now_timestamp};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::path::{Path, PathBuf};

/// Handle to the image index. Holds only the location; every worker opens its
/// own connection through [`ImageStore::connect`].
#[derive(Debug, Clone)]
pub struct ImageStore {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl ImageStore {
    /// Opens the index, creating the file, its parent directories and the
    /// schema as needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = open_connection(&path)?;
        initialize_schema(&conn)?;
        log::debug!("Opened image index at {}", path.display());

        Ok(Self { path })
    }

    /// Opens an index that a previous scan must have created.
    pub fn open_existing(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let path = path.into();
        if !path.is_file() {
            return Err(DatabaseError::NotFound { path });
        }

        let conn = open_connection(&path)?;
        initialize_schema(&conn)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&self) -> Result<ImageConnection, DatabaseError> {
        Ok(ImageConnection {
            conn: open_connection(&self.path)?,
        })
    }
}

pub struct ImageConnection {
    conn: Connection,
}

impl ImageConnection {
    /// Stored `modified_at` for the record, if one exists.
    pub fn exists(&self, path: &str, source_prefix: &str) -> Result<Option<String>, DatabaseError> {
        let modified = self
            .conn
            .query_row(
                "SELECT modified_at FROM images WHERE path = ?1 AND source_prefix = ?2",
                params![path, source_prefix],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(modified)
    }

    /// Inserts a new record, or with `force` rewrites every field of an
    /// existing one except `created_at`.
    pub fn upsert(&self, record: &ImageRecord, force: bool) -> Result<UpsertOutcome, DatabaseError> {
        let exists = self.exists(&record.path, &record.source_prefix)?.is_some();

        if !exists {
            self.conn.execute(
                "INSERT INTO images
                 (path, source_prefix, format, width, height, created_at, modified_at,
                  size, average_hash, perceptual_hash, is_raw_format)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.path,
                    record.source_prefix,
                    record.format,
                    record.width,
                    record.height,
                    now_timestamp(),
                    record.modified_at,
                    record.size as i64,
                    record.average_hash,
                    record.perceptual_hash,
                    record.is_raw_format,
                ],
            )?;
            return Ok(UpsertOutcome::Inserted);
        }

        if !force {
            return Ok(UpsertOutcome::Unchanged);
        }

        self.conn.execute(
            "UPDATE images
             SET format = ?3, width = ?4, height = ?5, modified_at = ?6, size = ?7,
                 average_hash = ?8, perceptual_hash = ?9, is_raw_format = ?10
             WHERE path = ?1 AND source_prefix = ?2",
            params![
                record.path,
                record.source_prefix,
                record.format,
                record.width,
                record.height,
                record.modified_at,
                record.size as i64,
                record.average_hash,
                record.perceptual_hash,
                record.is_raw_format,
            ],
        )?;

        Ok(UpsertOutcome::Updated)
    }

    /// All records, or only those under `source_prefix` when it is non-empty.
    pub fn records(&self, source_prefix: Option<&str>) -> Result<Vec<ImageRecord>, DatabaseError> {
        const COLUMNS: &str = "id, path, source_prefix, format, width, height, created_at, \
                               modified_at, size, average_hash, perceptual_hash, is_raw_format";

        let records = match source_prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM images WHERE source_prefix = ?1 ORDER BY id"
                ))?;
                stmt.query_map(params![prefix], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt =
                    self.conn
                        .prepare(&format!("SELECT {COLUMNS} FROM images ORDER BY id"))?;
                stmt.query_map([], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(records)
    }

    /// Fetches a single record by its natural key.
    pub fn find(
        &self,
        path: &str,
        source_prefix: &str,
    ) -> Result<Option<ImageRecord>, DatabaseError> {
        let record = self
            .conn
            .query_row(
                "SELECT id, path, source_prefix, format, width, height, created_at,
                        modified_at, size, average_hash, perceptual_hash, is_raw_format
                 FROM images WHERE path = ?1 AND source_prefix = ?2",
                params![path, source_prefix],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    #[cfg(test)]
    pub(crate) fn raw(&self) -> &Connection {
        &self.conn
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: Some(row.get(0)?),
        path: row.get(1)?,
        source_prefix: row.get(2)?,
        format: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        created_at: Some(row.get(6)?),
        modified_at: row.get(7)?,
        size: row.get::<_, i64>(8)? as u64,
        average_hash: row.get(9)?,
        perceptual_hash: row.get(10)?,
        is_raw_format: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_record(path: &str, prefix: &str) -> ImageRecord {
        ImageRecord {
            id: None,
            path: path.to_string(),
            source_prefix: prefix.to_string(),
            format: "jpg".to_string(),
            width: 64,
            height: 48,
            created_at: None,
            modified_at: "2024-01-01T00:00:00+00:00".to_string(),
            size: 1234,
            average_hash: "0".repeat(64),
            perceptual_hash: "1".repeat(64),
            is_raw_format: false,
        }
    }

    #[test]
    fn test_upsert_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = ImageStore::create(temp_dir.path().join("nested").join("images.db")).unwrap();
        let conn = store.connect().unwrap();

        let record = sample_record("/photos/a.jpg", "disk1");
        assert_eq!(conn.upsert(&record, false).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(conn.upsert(&record, false).unwrap(), UpsertOutcome::Unchanged);

        let created = conn.find("/photos/a.jpg", "disk1").unwrap().unwrap().created_at;
        assert!(created.is_some());

        let mut changed = record.clone();
        changed.modified_at = "2025-06-01T12:00:00+00:00".to_string();
        changed.width = 128;
        assert_eq!(conn.upsert(&changed, true).unwrap(), UpsertOutcome::Updated);

        let stored = conn.find("/photos/a.jpg", "disk1").unwrap().unwrap();
        assert_eq!(stored.width, 128);
        assert_eq!(stored.modified_at, changed.modified_at);
        assert_eq!(stored.created_at, created);
        assert_eq!(conn.count().unwrap(), 1);
    }

    #[test]
    fn test_natural_key_includes_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = ImageStore::create(temp_dir.path().join("images.db")).unwrap();
        let conn = store.connect().unwrap();

        conn.upsert(&sample_record("/photos/a.jpg", "disk1"), false).unwrap();
        conn.upsert(&sample_record("/photos/a.jpg", "disk2"), false).unwrap();
        conn.upsert(&sample_record("/photos/b.jpg", ""), false).unwrap();

        assert_eq!(conn.count().unwrap(), 3);
        assert_eq!(conn.records(None).unwrap().len(), 3);
        assert_eq!(conn.records(Some("")).unwrap().len(), 3);

        let disk2 = conn.records(Some("disk2")).unwrap();
        assert_eq!(disk2.len(), 1);
        assert_eq!(disk2[0].source_prefix, "disk2");
        assert_eq!(disk2[0].perceptual_hash, "1".repeat(64));

        assert_eq!(
            conn.exists("/photos/a.jpg", "disk1").unwrap().as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
        assert!(conn.exists("/photos/a.jpg", "disk3").unwrap().is_none());
        assert!(conn.find("/photos/a.jpg", "disk3").unwrap().is_none());
        assert!(conn.find("/photos/missing.jpg", "").unwrap().is_none());
    }

    #[test]
    fn test_open_existing_requires_file() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.db");

        assert!(matches!(
            ImageStore::open_existing(&missing),
            Err(DatabaseError::NotFound { .. })
        ));

        ImageStore::create(&missing).unwrap();
        let store = ImageStore::open_existing(&missing).unwrap();
        assert_eq!(store.path(), missing.as_path());
    }
}
