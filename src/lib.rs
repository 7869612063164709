//! Chunked upload staging and reassembly for instrument data files.
//!
//! Remote instrument agents push a large file as checksummed chunks; this
//! crate stages each chunk durably, tracks progress per destination file,
//! reassembles the chunks into the final artifact exactly once, and sweeps
//! up whatever incomplete uploads leave behind. The destination catalog
//! and write permissions belong to the host application and are reached
//! through the traits in [`catalog`].

pub mod advisor;
pub mod catalog;
pub mod checksum;
pub mod config;
pub mod error;
pub mod janitor;
pub mod queue;
pub mod reassemble;
pub mod session;
pub mod store;

pub use catalog::{Caller, Destination, DestinationCatalog, WritePolicy};
pub use config::Config;
pub use error::{Result, UpstageError};
pub use queue::{Job, JobQueue, Worker};
pub use session::UploadSession;
pub use store::ChunkStore;
