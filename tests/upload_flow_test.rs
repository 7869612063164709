use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use upstage::catalog::{AllowAll, Caller, Destination, MemoryCatalog, SqliteCatalog};
use upstage::{Config, ChunkStore, DestinationCatalog, JobQueue, UploadSession, Worker};

const AGENT: Caller = Caller { user_id: 42 };

fn test_config(dir: &TempDir) -> Config {
    let raw = format!(
        "chunk_storage = '{}'\nchunk_min_size = 1000\nchunk_max_size = 1000\n",
        dir.path().join("chunks").display()
    );
    toml::from_str(&raw).unwrap()
}

fn digest(body: &[u8]) -> String {
    upstage::checksum::compute("xxh3_64", body).unwrap()
}

#[tokio::test]
async fn test_chunked_upload_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let store = Arc::new(ChunkStore::open(&config.chunk_storage, true, config.dir_mode).unwrap());
    let catalog = Arc::new(MemoryCatalog::new());
    let final_path = dir.path().join("repo").join("passenger.txt");

    // 1553-byte file; advisor recommends 1000-byte chunks.
    let content: Vec<u8> = (0..1553u32).map(|i| (i % 251) as u8).collect();
    catalog.insert(Destination {
        id: 1,
        size: 1553,
        path: final_path.clone(),
        verified: false,
        priority: 2,
        instrument_id: Some(11),
    });

    let (jobs, rx) = JobQueue::new();
    let worker = Worker::new(
        Arc::clone(&store),
        Arc::clone(&catalog) as Arc<dyn DestinationCatalog>,
        config.clone(),
        rx,
    );
    let session = UploadSession::new(
        Arc::clone(&store),
        Arc::clone(&catalog) as Arc<dyn DestinationCatalog>,
        Arc::new(AllowAll),
        jobs,
        config,
    );

    // Client asks where to start.
    let status = session.status(1, &AGENT).unwrap();
    assert_eq!(status.completed, Some(false));
    assert_eq!(status.offset, Some(0));
    assert_eq!(status.size, Some(1000));

    // Upload both chunks.
    let first = &content[..1000];
    let second = &content[1000..];
    let response = session
        .accept_chunk(1, &AGENT, Some(digest(first).as_str()), Some("0-1000/1553"), first)
        .unwrap();
    assert!(response.success, "{:?}", response.error);
    let response = session
        .accept_chunk(
            1,
            &AGENT,
            Some(digest(second).as_str()),
            Some("1000-1553/1553"),
            second,
        )
        .unwrap();
    assert!(response.success, "{:?}", response.error);

    // All bytes covered.
    let status = session.status(1, &AGENT).unwrap();
    assert_eq!(status.completed, Some(true));

    // Trigger completion and let the worker drain.
    let response = session.trigger_completion(1, &AGENT).unwrap();
    assert!(response.success);
    assert_eq!(response.verified, Some(false));

    drop(session);
    worker.run().await;

    // Final artifact is byte-identical; staging residue is gone; the
    // verifier received the hand-off with the destination's priority.
    assert_eq!(std::fs::read(&final_path).unwrap(), content);
    assert!(store.chunks_for(1).unwrap().is_empty());
    assert!(!store.root().join("1").exists());
    assert_eq!(catalog.verification_requests(), vec![(1, 2)]);
}

#[tokio::test]
async fn test_sqlite_catalog_permission_and_upload() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let store = Arc::new(ChunkStore::open(&config.chunk_storage, true, config.dir_mode).unwrap());
    let catalog = Arc::new(SqliteCatalog::open(&dir.path().join("catalog.db")).unwrap());

    catalog
        .upsert(&Destination {
            id: 7,
            size: 4,
            path: dir.path().join("out.bin"),
            verified: false,
            priority: 0,
            instrument_id: None,
        })
        .unwrap();
    catalog.grant_write(7, AGENT.user_id).unwrap();

    let (jobs, _rx) = JobQueue::new();
    let session = UploadSession::new(
        Arc::clone(&store),
        Arc::clone(&catalog) as Arc<dyn DestinationCatalog>,
        Arc::clone(&catalog) as Arc<dyn upstage::WritePolicy>,
        jobs,
        config,
    );

    // A caller without a grant gets the generic denial.
    let stranger = Caller { user_id: 99 };
    let denied = session.status(7, &stranger).unwrap();
    assert!(!denied.success);
    assert_eq!(denied.error.as_deref(), Some("Invalid object or access denied."));

    // The granted agent can upload.
    let body = b"data";
    let response = session
        .accept_chunk(7, &AGENT, Some(digest(body).as_str()), Some("0-4/4"), body)
        .unwrap();
    assert!(response.success, "{:?}", response.error);
    assert_eq!(session.status(7, &AGENT).unwrap().completed, Some(true));
}

#[tokio::test]
async fn test_janitor_cleans_deleted_destination() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let store = Arc::new(ChunkStore::open(&config.chunk_storage, true, config.dir_mode).unwrap());
    let catalog = SqliteCatalog::open(&dir.path().join("catalog.db")).unwrap();

    catalog
        .upsert(&Destination {
            id: 3,
            size: 2000,
            path: PathBuf::from("/never/used.bin"),
            verified: false,
            priority: 0,
            instrument_id: None,
        })
        .unwrap();

    for (offset, body) in [(0u64, vec![1u8; 1000]), (1000, vec![2u8; 553])] {
        store
            .insert(
                upstage::store::NewChunk {
                    destination_id: 3,
                    offset,
                    instrument_id: None,
                    uploader_id: AGENT.user_id,
                },
                &body,
            )
            .unwrap();
    }

    // Destination still present: sweep leaves the upload alone.
    assert_eq!(upstage::janitor::orphan_sweep(&store, &catalog).unwrap(), 0);
    assert_eq!(store.chunks_for(3).unwrap().len(), 2);

    // Destination deleted mid-upload: sweep removes every trace.
    catalog.delete(3).unwrap();
    assert_eq!(upstage::janitor::orphan_sweep(&store, &catalog).unwrap(), 1);
    assert!(store.chunks_for(3).unwrap().is_empty());
    assert!(!store.root().join("3").exists());
}

#[tokio::test]
async fn test_stalled_upload_reassembled_by_sweep() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let store = Arc::new(ChunkStore::open(&config.chunk_storage, true, config.dir_mode).unwrap());
    let catalog = Arc::new(MemoryCatalog::new());
    let final_path = dir.path().join("stalled.bin");

    catalog.insert(Destination {
        id: 5,
        size: 6,
        path: final_path.clone(),
        verified: false,
        priority: 0,
        instrument_id: None,
    });

    // The client uploaded everything but crashed before completing.
    store
        .insert(
            upstage::store::NewChunk {
                destination_id: 5,
                offset: 0,
                instrument_id: None,
                uploader_id: AGENT.user_id,
            },
            b"abcdef",
        )
        .unwrap();

    let (jobs, rx) = JobQueue::new();
    let enqueued = upstage::janitor::stalled_sweep(&store, catalog.as_ref(), &jobs).unwrap();
    assert_eq!(enqueued, 1);

    drop(jobs);
    Worker::new(
        Arc::clone(&store),
        Arc::clone(&catalog) as Arc<dyn DestinationCatalog>,
        config,
        rx,
    )
    .run()
    .await;

    assert_eq!(std::fs::read(&final_path).unwrap(), b"abcdef");
    assert_eq!(catalog.verification_requests(), vec![(5, 0)]);
}
