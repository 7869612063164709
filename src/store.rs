use crate::error::{Result, UpstageError};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One uploaded byte range and where its bytes landed on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub destination_id: i64,
    pub offset: u64,
    pub size: u64,
    pub created_at: String,
    pub instrument_id: Option<i64>,
    pub uploader_id: i64,
}

/// Metadata supplied when staging a new chunk. The chunk id and
/// created-at timestamp are generated at insert time.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub destination_id: i64,
    pub offset: u64,
    pub instrument_id: Option<i64>,
    pub uploader_id: i64,
}

/// Durable store for uploaded chunks: a metadata table in SQLite plus a
/// per-destination directory tree of raw chunk files
/// (`<root>/<destination_id>/<chunk_id>`).
///
/// The `UNIQUE (destination_id, offset)` index is what resolves two
/// concurrent uploads racing for the same offset: exactly one insert
/// succeeds, the loser gets [`UpstageError::DuplicateOffset`] and its
/// already-written file is removed.
pub struct ChunkStore {
    conn: Mutex<Connection>,
    root: PathBuf,
    dir_mode: u32,
}

impl ChunkStore {
    /// Metadata database file name inside the chunk storage root.
    const DB_FILE: &'static str = ".upstage-chunks.db";

    /// Open or create the chunk store rooted at `root`.
    pub fn open(root: &Path, create_dirs: bool, dir_mode: u32) -> Result<Self> {
        if !root.exists() {
            if !create_dirs {
                return Err(UpstageError::Config(format!(
                    "Chunk storage root does not exist: {}",
                    root.display()
                )));
            }
            std::fs::create_dir_all(root)?;
            set_dir_mode(root, dir_mode)?;
        }

        let conn = Connection::open(root.join(Self::DB_FILE))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT NOT NULL UNIQUE,
                destination_id INTEGER NOT NULL,
                offset INTEGER NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                instrument_id INTEGER,
                uploader_id INTEGER NOT NULL,
                UNIQUE (destination_id, offset)
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_destination
                ON chunks(destination_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            root: root.to_path_buf(),
            dir_mode,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a chunk's backing file.
    pub fn chunk_path(&self, destination_id: i64, chunk_id: &str) -> PathBuf {
        self.root.join(destination_id.to_string()).join(chunk_id)
    }

    /// Whether a chunk already claims `offset` for this destination.
    pub fn has_offset(&self, destination_id: i64, offset: u64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT 1 FROM chunks WHERE destination_id = ?1 AND offset = ?2",
                params![destination_id, offset as i64],
                |_| Ok(()),
            )
            .optional()?;
        Ok(row.is_some())
    }

    /// Stage a chunk: write the raw bytes first, then insert the metadata
    /// row. A failed insert removes the freshly written file so a later
    /// upload at the same offset finds clean ground.
    pub fn insert(&self, meta: NewChunk, body: &[u8]) -> Result<ChunkRecord> {
        let dir = self.root.join(meta.destination_id.to_string());
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
            set_dir_mode(&dir, self.dir_mode)?;
        }

        let chunk_id = uuid::Uuid::new_v4().to_string();
        let path = dir.join(&chunk_id);
        std::fs::write(&path, body).map_err(|source| UpstageError::ChunkWrite {
            path: path.clone(),
            source,
        })?;

        let record = ChunkRecord {
            chunk_id,
            destination_id: meta.destination_id,
            offset: meta.offset,
            size: body.len() as u64,
            created_at: chrono::Utc::now().to_rfc3339(),
            instrument_id: meta.instrument_id,
            uploader_id: meta.uploader_id,
        };

        let inserted = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO chunks
                 (chunk_id, destination_id, offset, size, created_at, instrument_id, uploader_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.chunk_id,
                    record.destination_id,
                    record.offset as i64,
                    record.size as i64,
                    record.created_at,
                    record.instrument_id,
                    record.uploader_id
                ],
            )
        };

        if let Err(e) = inserted {
            // Don't leave the orphaned file behind to shadow a retry.
            let _ = std::fs::remove_file(&path);
            if is_unique_violation(&e) {
                tracing::debug!(
                    "Lost insert race for destination {} offset {}",
                    record.destination_id,
                    record.offset
                );
                return Err(UpstageError::DuplicateOffset {
                    destination_id: record.destination_id,
                    offset: record.offset,
                });
            }
            return Err(e.into());
        }

        tracing::debug!(
            "Staged chunk {} for destination {} at offset {} ({} bytes)",
            record.chunk_id,
            record.destination_id,
            record.offset,
            record.size
        );
        Ok(record)
    }

    /// All chunks for a destination, ordered by offset.
    pub fn chunks_for(&self, destination_id: i64) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, destination_id, offset, size, created_at, instrument_id, uploader_id
             FROM chunks WHERE destination_id = ?1 ORDER BY offset",
        )?;
        let chunks = stmt
            .query_map(params![destination_id], |row| {
                Ok(ChunkRecord {
                    chunk_id: row.get(0)?,
                    destination_id: row.get(1)?,
                    offset: row.get::<_, i64>(2)? as u64,
                    size: row.get::<_, i64>(3)? as u64,
                    created_at: row.get(4)?,
                    instrument_id: row.get(5)?,
                    uploader_id: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// Highest byte covered by any staged chunk, clipped to `total_size`.
    /// Zero when no chunks are staged.
    pub fn observed_offset(&self, destination_id: i64, total_size: u64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let last = conn
            .query_row(
                "SELECT offset, size FROM chunks
                 WHERE destination_id = ?1 ORDER BY offset DESC LIMIT 1",
                params![destination_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, i64>(1)? as u64,
                    ))
                },
            )
            .optional()?;
        Ok(match last {
            Some((offset, size)) => (offset + size).min(total_size),
            None => 0,
        })
    }

    /// Distinct destination ids with at least one staged chunk.
    pub fn destinations(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT DISTINCT destination_id FROM chunks ORDER BY destination_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Delete every chunk row and backing file for a destination, then
    /// drop its now-empty staging directory. File and directory removal
    /// are best-effort; a file already gone is not an error.
    pub fn remove_chunks(&self, destination_id: i64) -> Result<usize> {
        let chunks = self.chunks_for(destination_id)?;

        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM chunks WHERE destination_id = ?1",
                params![destination_id],
            )?;
        }

        for chunk in &chunks {
            let path = self.chunk_path(destination_id, &chunk.chunk_id);
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to remove chunk file {}: {}", path.display(), e);
            }
        }
        // Staging directory must be empty by now; if not, leave it.
        let _ = std::fs::remove_dir(self.root.join(destination_id.to_string()));

        Ok(chunks.len())
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(unix)]
fn set_dir_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
