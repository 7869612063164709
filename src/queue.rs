use crate::catalog::DestinationCatalog;
use crate::config::Config;
use crate::error::{Result, UpstageError};
use crate::reassemble;
use crate::store::ChunkStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A deferred unit of work handed to the background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Reassemble { destination_id: i64 },
}

/// Producer handle for the background job channel. Cheap to clone; the
/// completion trigger and the janitor both enqueue through it.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue_reassembly(&self, destination_id: i64) -> Result<()> {
        self.tx
            .send(Job::Reassemble { destination_id })
            .map_err(|_| UpstageError::QueueClosed)
    }
}

/// Queue consumer. Runs each job on the blocking pool and logs failures
/// instead of propagating them; a failed reassembly leaves the chunk set
/// intact for a later retry.
pub struct Worker {
    store: Arc<ChunkStore>,
    catalog: Arc<dyn DestinationCatalog>,
    config: Config,
    rx: mpsc::UnboundedReceiver<Job>,
}

impl Worker {
    pub fn new(
        store: Arc<ChunkStore>,
        catalog: Arc<dyn DestinationCatalog>,
        config: Config,
        rx: mpsc::UnboundedReceiver<Job>,
    ) -> Self {
        Self {
            store,
            catalog,
            config,
            rx,
        }
    }

    /// Consume jobs until every producer handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            match job {
                Job::Reassemble { destination_id } => {
                    let store = Arc::clone(&self.store);
                    let catalog = Arc::clone(&self.catalog);
                    let config = self.config.clone();

                    let result = tokio::task::spawn_blocking(move || {
                        reassemble::run(&store, catalog.as_ref(), &config, destination_id)
                    })
                    .await;

                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!(
                                "Reassembly failed for destination {}: {}",
                                destination_id,
                                e
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                "Reassembly task panicked for destination {}: {}",
                                destination_id,
                                e
                            );
                        }
                    }
                }
            }
        }
        tracing::debug!("Job queue drained, worker exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_and_receive() {
        let (queue, mut rx) = JobQueue::new();
        queue.enqueue_reassembly(7).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Job::Reassemble { destination_id: 7 }
        );
    }

    #[test]
    fn test_enqueue_after_receiver_dropped() {
        let (queue, rx) = JobQueue::new();
        drop(rx);
        assert!(queue.enqueue_reassembly(7).is_err());
    }
}
