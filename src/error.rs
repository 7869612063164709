use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpstageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chunk metadata error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Chunk already uploaded for destination {destination_id} at offset {offset}")]
    DuplicateOffset { destination_id: i64, offset: u64 },

    #[error("Chunk file missing: {path}\nThe chunk row exists but its backing file is gone. Re-upload the chunk or remove the stale row.")]
    MissingChunkFile { path: PathBuf },

    #[error("Destination {0} not found")]
    DestinationNotFound(i64),

    #[error("Failed to write chunk: {path}\nCause: {source}\nCheck disk space and write permissions on the chunk storage root.")]
    ChunkWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, UpstageError>;

impl UpstageError {
    /// True for the insert-race loser case, which maps to the
    /// "Chunk already uploaded." protocol rejection rather than a fault.
    pub fn is_duplicate_offset(&self) -> bool {
        matches!(self, UpstageError::DuplicateOffset { .. })
    }
}
