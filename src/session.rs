use crate::advisor::recommend_chunk_size;
use crate::catalog::{Caller, Destination, DestinationCatalog, WritePolicy};
use crate::checksum;
use crate::config::Config;
use crate::error::{Result, UpstageError};
use crate::queue::JobQueue;
use crate::store::{ChunkStore, NewChunk};
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};

/// Denial message shared by "no such destination" and "no write
/// permission" so a response never leaks whether a destination exists.
const DENIED: &str = "Invalid object or access denied.";

/// Body of a status query response.
///
/// `completed=true` means all bytes are uploaded (or the file is already
/// verified); `completed=false` carries the resume point and the chunk
/// size/checksum the client should use next.
#[derive(Debug, Serialize, PartialEq)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a chunk upload response.
#[derive(Debug, Serialize, PartialEq)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a completion trigger response.
#[derive(Debug, Serialize, PartialEq)]
pub struct CompleteResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    fn completed() -> Self {
        Self {
            success: true,
            completed: Some(true),
            offset: None,
            size: None,
            checksum: None,
            error: None,
        }
    }

    fn resume(offset: u64, size: u64, checksum: &str) -> Self {
        Self {
            success: true,
            completed: Some(false),
            offset: Some(offset),
            size: Some(size),
            checksum: Some(checksum.to_string()),
            error: None,
        }
    }

    fn failure(message: &str) -> Self {
        Self {
            success: false,
            completed: None,
            offset: None,
            size: None,
            checksum: None,
            error: Some(message.to_string()),
        }
    }
}

impl UploadResponse {
    fn accepted(id: String) -> Self {
        Self {
            success: true,
            id: Some(id),
            error: None,
        }
    }

    fn failure(message: &str) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(message.to_string()),
        }
    }
}

impl CompleteResponse {
    fn triggered(verified: bool) -> Self {
        Self {
            success: true,
            verified: Some(verified),
            error: None,
        }
    }

    fn failure(message: &str) -> Self {
        Self {
            success: false,
            verified: None,
            error: Some(message.to_string()),
        }
    }
}

/// A parsed `Content-Range` header: `start-end/total`, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// Parse the fixed `start-end/total` form. Anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| Regex::new(r"^(\d+)-(\d+)/(\d+)$").unwrap());
        let caps = re.captures(raw)?;
        Some(Self {
            start: caps[1].parse().ok()?,
            end: caps[2].parse().ok()?,
            total: caps[3].parse().ok()?,
        })
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-destination upload protocol driver.
///
/// Protocol violations (bad headers, duplicate offsets, checksum
/// mismatches) come back as `success=false` response bodies, never as
/// errors; only unexpected storage-backend failures surface as `Err` for
/// the transport in front to turn into a generic failure.
pub struct UploadSession {
    store: Arc<ChunkStore>,
    catalog: Arc<dyn DestinationCatalog>,
    policy: Arc<dyn WritePolicy>,
    jobs: JobQueue,
    config: Config,
}

impl UploadSession {
    pub fn new(
        store: Arc<ChunkStore>,
        catalog: Arc<dyn DestinationCatalog>,
        policy: Arc<dyn WritePolicy>,
        jobs: JobQueue,
        config: Config,
    ) -> Self {
        Self {
            store,
            catalog,
            policy,
            jobs,
            config,
        }
    }

    /// Destination lookup plus write-permission check. `None` collapses
    /// both "not found" and "denied" into the one denial case.
    fn authorize(&self, destination_id: i64, caller: &Caller) -> Result<Option<Destination>> {
        match self.catalog.get(destination_id)? {
            Some(dest) if self.policy.can_write(caller, &dest) => Ok(Some(dest)),
            _ => Ok(None),
        }
    }

    /// Report upload progress and resume parameters for a destination.
    pub fn status(&self, destination_id: i64, caller: &Caller) -> Result<StatusResponse> {
        let Some(dest) = self.authorize(destination_id, caller)? else {
            return Ok(StatusResponse::failure(DENIED));
        };

        if dest.verified {
            return Ok(StatusResponse::completed());
        }

        let observed = self.store.observed_offset(destination_id, dest.size)?;
        if observed == dest.size {
            return Ok(StatusResponse::completed());
        }

        let size = recommend_chunk_size(
            dest.size,
            self.config.chunk_min_size,
            self.config.chunk_max_size,
        );
        Ok(StatusResponse::resume(observed, size, &self.config.checksum))
    }

    /// Validate and stage one uploaded chunk.
    ///
    /// The checks run in a fixed order and each rejection is total: a
    /// rejected chunk leaves no file and no metadata row behind.
    pub fn accept_chunk(
        &self,
        destination_id: i64,
        caller: &Caller,
        checksum_header: Option<&str>,
        content_range_header: Option<&str>,
        body: &[u8],
    ) -> Result<UploadResponse> {
        let Some(dest) = self.authorize(destination_id, caller)? else {
            return Ok(UploadResponse::failure(DENIED));
        };

        let Some(checksum_header) = checksum_header else {
            return Ok(UploadResponse::failure("Missing 'Checksum' in header."));
        };

        let Some(range) = content_range_header.and_then(ContentRange::parse) else {
            return Ok(UploadResponse::failure(
                "Missing 'Content-Range' in header.",
            ));
        };

        if range.len() > self.config.chunk_max_size {
            return Ok(UploadResponse::failure(
                "Chunk size is larger than max allowed.",
            ));
        }

        if self.store.has_offset(destination_id, range.start)? {
            return Ok(UploadResponse::failure("Chunk already uploaded."));
        }

        let computed = checksum::compute(&self.config.checksum, body);
        if computed.as_deref() != Some(checksum_header) {
            return Ok(UploadResponse::failure(&format!(
                "Checksum does not match. {}:{}",
                self.config.checksum,
                computed.as_deref().unwrap_or("none")
            )));
        }

        let meta = NewChunk {
            destination_id,
            offset: range.start,
            instrument_id: dest.instrument_id,
            uploader_id: caller.user_id,
        };
        match self.store.insert(meta, body) {
            Ok(record) => Ok(UploadResponse::accepted(record.chunk_id)),
            // The insert race loser gets the same rejection as the
            // pre-check above.
            Err(UpstageError::DuplicateOffset { .. }) => {
                Ok(UploadResponse::failure("Chunk already uploaded."))
            }
            Err(e @ UpstageError::ChunkWrite { .. }) | Err(e @ UpstageError::Io(_)) => {
                Ok(UploadResponse::failure(&e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Enqueue reassembly for a fully uploaded destination.
    ///
    /// Never blocks on the reassembly itself; an already-verified
    /// destination is reported as such with no new work enqueued.
    pub fn trigger_completion(
        &self,
        destination_id: i64,
        caller: &Caller,
    ) -> Result<CompleteResponse> {
        let Some(dest) = self.authorize(destination_id, caller)? else {
            return Ok(CompleteResponse::failure(DENIED));
        };

        if dest.verified {
            return Ok(CompleteResponse::triggered(true));
        }

        self.jobs.enqueue_reassembly(destination_id)?;
        tracing::debug!("Queued reassembly for destination {}", destination_id);
        Ok(CompleteResponse::triggered(false))
    }
}
