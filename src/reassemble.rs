use crate::catalog::DestinationCatalog;
use crate::config::Config;
use crate::error::{Result, UpstageError};
use crate::store::{ChunkRecord, ChunkStore};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Reassemble the staged chunks of one destination into its final file.
///
/// Idempotent and resumable: an interrupted run leaves a partial output
/// file, and the next run appends from the first chunk not yet applied
/// instead of restarting at byte zero. The chunk set is only deleted after
/// the whole file has been written, so any earlier failure can be retried
/// by re-enqueueing the same destination.
pub fn run(
    store: &ChunkStore,
    catalog: &dyn DestinationCatalog,
    config: &Config,
    destination_id: i64,
) -> Result<()> {
    tracing::info!("Reassembling destination {}", destination_id);

    let dest = catalog
        .get(destination_id)?
        .ok_or(UpstageError::DestinationNotFound(destination_id))?;
    let chunks = store.chunks_for(destination_id)?;

    if chunks.is_empty() {
        // Nothing staged; the destination may have been populated by other
        // means. Still hand it to the verifier.
        tracing::debug!(
            "No staged chunks for destination {}, skipping assembly",
            destination_id
        );
        catalog.request_verification(dest.id, dest.priority)?;
        return Ok(());
    }

    // Every backing file must be present before we touch the output.
    for chunk in &chunks {
        let path = store.chunk_path(destination_id, &chunk.chunk_id);
        if !path.exists() {
            return Err(UpstageError::MissingChunkFile { path });
        }
    }

    if let Some(parent) = dest.path.parent() {
        if !parent.exists() {
            if !config.create_dirs {
                return Err(UpstageError::Config(format!(
                    "Destination directory does not exist: {}",
                    parent.display()
                )));
            }
            std::fs::create_dir_all(parent)?;
        }
    }

    let existing_len = match std::fs::metadata(&dest.path) {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    let (applied, boundary) = applied_chunks(&chunks, existing_len);
    if applied > 0 {
        tracing::info!(
            "Resuming reassembly of destination {} after {} applied chunks ({} bytes)",
            destination_id,
            applied,
            boundary
        );
    }

    let mut dst = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&dest.path)?;
    // A tail past the last whole chunk came from an interrupted write;
    // drop it and append from the boundary.
    dst.set_len(boundary)?;
    dst.seek(SeekFrom::Start(boundary))?;

    for chunk in &chunks[applied..] {
        let path = store.chunk_path(destination_id, &chunk.chunk_id);
        tracing::debug!(
            "Destination {}: appending chunk {} at offset {}",
            destination_id,
            chunk.chunk_id,
            chunk.offset
        );
        append_chunk(&mut dst, &path, config.copy_block_size)?;
    }
    dst.flush()?;
    drop(dst);

    tracing::debug!("Destination {}: assembly done, cleaning up", destination_id);
    store.remove_chunks(destination_id)?;

    catalog.request_verification(dest.id, dest.priority)?;
    Ok(())
}

/// How many leading chunks a partial output of `existing_len` bytes
/// already contains, and the byte boundary they end at.
///
/// Applied chunks are counted by accumulating the recorded chunk sizes in
/// offset order, so clients that varied their chunk size mid-upload are
/// handled correctly. A partial length that falls inside a chunk counts
/// that chunk as not applied; the caller truncates back to the boundary.
fn applied_chunks(chunks: &[ChunkRecord], existing_len: u64) -> (usize, u64) {
    let mut applied = 0;
    let mut boundary = 0u64;
    for chunk in chunks {
        if boundary + chunk.size <= existing_len {
            boundary += chunk.size;
            applied += 1;
        } else {
            break;
        }
    }
    (applied, boundary)
}

/// Stream one chunk file onto the end of `dst` in bounded blocks.
fn append_chunk(dst: &mut File, chunk_path: &Path, block_size: usize) -> Result<()> {
    let mut src = File::open(chunk_path)?;
    let mut buf = vec![0u8; block_size];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
    }
    Ok(())
}
