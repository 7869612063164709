use crate::catalog::DestinationCatalog;
use crate::error::Result;
use crate::queue::JobQueue;
use crate::store::ChunkStore;

/// Remove chunk sets whose destination record no longer exists.
///
/// A deleted destination cancels its in-flight upload; whatever chunks it
/// left behind are dead weight. Safe to run alongside live uploads since
/// it only touches destinations that are gone from the catalog. Returns
/// the number of destinations cleaned up.
pub fn orphan_sweep(store: &ChunkStore, catalog: &dyn DestinationCatalog) -> Result<usize> {
    let mut cleaned = 0;
    for destination_id in store.destinations()? {
        if catalog.exists(destination_id)? {
            continue;
        }
        tracing::info!(
            "Cleaning up chunks for deleted destination {}",
            destination_id
        );
        let removed = store.remove_chunks(destination_id)?;
        tracing::debug!(
            "Removed {} orphaned chunks for destination {}",
            removed,
            destination_id
        );
        cleaned += 1;
    }
    Ok(cleaned)
}

/// Enqueue reassembly for uploads that finished but were never completed,
/// e.g. because the client crashed after its last chunk. Returns the
/// number of reassembly jobs enqueued.
///
/// Chunk sets lingering under an already-verified destination are removed
/// outright: their reassembly has already happened and re-running it
/// would rewrite a verified file.
pub fn stalled_sweep(
    store: &ChunkStore,
    catalog: &dyn DestinationCatalog,
    jobs: &JobQueue,
) -> Result<usize> {
    let mut enqueued = 0;
    for destination_id in store.destinations()? {
        let Some(dest) = catalog.get(destination_id)? else {
            // Orphan; the other sweep owns it.
            continue;
        };

        if dest.verified {
            tracing::info!(
                "Removing leftover chunks for verified destination {}",
                destination_id
            );
            store.remove_chunks(destination_id)?;
            continue;
        }

        let observed = store.observed_offset(destination_id, dest.size)?;
        if observed == dest.size {
            tracing::info!(
                "Destination {} fully uploaded but never completed, queueing reassembly",
                destination_id
            );
            jobs.enqueue_reassembly(destination_id)?;
            enqueued += 1;
        }
    }
    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Destination, MemoryCatalog};
    use crate::queue::Job;
    use crate::store::NewChunk;
    use tempfile::TempDir;

    fn stage(store: &ChunkStore, destination_id: i64, offset: u64, body: &[u8]) {
        store
            .insert(
                NewChunk {
                    destination_id,
                    offset,
                    instrument_id: None,
                    uploader_id: 1,
                },
                body,
            )
            .unwrap();
    }

    fn dest(id: i64, size: u64, verified: bool) -> Destination {
        Destination {
            id,
            size,
            path: std::path::PathBuf::from(format!("/final/{}.bin", id)),
            verified,
            priority: 0,
            instrument_id: None,
        }
    }

    #[test]
    fn test_orphan_sweep_removes_deleted_destinations() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(&dir.path().join("chunks"), true, 0o770).unwrap();
        let catalog = MemoryCatalog::new();

        catalog.insert(dest(1, 10, false));
        stage(&store, 1, 0, b"live");
        stage(&store, 2, 0, b"dead1");
        stage(&store, 2, 5, b"dead2");

        let cleaned = orphan_sweep(&store, &catalog).unwrap();
        assert_eq!(cleaned, 1);

        // Destination 2 left no residue; destination 1 untouched.
        assert!(store.chunks_for(2).unwrap().is_empty());
        assert!(!store.root().join("2").exists());
        assert_eq!(store.chunks_for(1).unwrap().len(), 1);
    }

    #[test]
    fn test_orphan_sweep_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(&dir.path().join("chunks"), true, 0o770).unwrap();
        let catalog = MemoryCatalog::new();
        assert_eq!(orphan_sweep(&store, &catalog).unwrap(), 0);
    }

    #[test]
    fn test_stalled_sweep_enqueues_complete_uploads() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(&dir.path().join("chunks"), true, 0o770).unwrap();
        let catalog = MemoryCatalog::new();
        let (jobs, mut rx) = JobQueue::new();

        // Destination 1: fully uploaded, never completed.
        catalog.insert(dest(1, 8, false));
        stage(&store, 1, 0, b"aaaa");
        stage(&store, 1, 4, b"bbbb");

        // Destination 2: still in progress.
        catalog.insert(dest(2, 100, false));
        stage(&store, 2, 0, b"cccc");

        let enqueued = stalled_sweep(&store, &catalog, &jobs).unwrap();
        assert_eq!(enqueued, 1);
        assert_eq!(rx.try_recv().unwrap(), Job::Reassemble { destination_id: 1 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stalled_sweep_drops_chunks_of_verified_destination() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(&dir.path().join("chunks"), true, 0o770).unwrap();
        let catalog = MemoryCatalog::new();
        let (jobs, mut rx) = JobQueue::new();

        catalog.insert(dest(1, 4, true));
        stage(&store, 1, 0, b"late");

        let enqueued = stalled_sweep(&store, &catalog, &jobs).unwrap();
        assert_eq!(enqueued, 0);
        assert!(rx.try_recv().is_err());
        assert!(store.chunks_for(1).unwrap().is_empty());
    }

    #[test]
    fn test_stalled_sweep_ignores_orphans() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(&dir.path().join("chunks"), true, 0o770).unwrap();
        let catalog = MemoryCatalog::new();
        let (jobs, mut rx) = JobQueue::new();

        stage(&store, 9, 0, b"orphan");

        assert_eq!(stalled_sweep(&store, &catalog, &jobs).unwrap(), 0);
        assert!(rx.try_recv().is_err());
        // Chunks stay for the orphan sweep to handle.
        assert_eq!(store.chunks_for(9).unwrap().len(), 1);
    }
}
