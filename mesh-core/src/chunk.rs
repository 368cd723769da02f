//! Chunked transfer engine: bitmap bookkeeping, random chunk selection,
//! reassembly into the Store record, and whole-file verification.
//!
//! The Store record is written before the first chunk request so a restarted
//! process resumes from the persisted bitmap instead of starting over. Each
//! received chunk is persisted before its bit is reported as set.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bitmap::Bitmap;
use crate::config::MeshConfig;
use crate::error::{StoreError, TransferError};
use crate::identity::PeerId;
use crate::integrity;
use crate::protocol::FileId;
use crate::store::{FileRecord, Store};

/// What a downloader needs to know about a file before fetching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_id: FileId,
    pub name: String,
    pub size: u64,
    pub chunk_size: u64,
    /// Peer serving the file.
    pub source: PeerId,
}

impl FileMeta {
    /// Byte range of chunk `index`; the last chunk may be short.
    pub fn chunk_range(&self, index: u32) -> std::ops::Range<usize> {
        let start = (index as u64 * self.chunk_size).min(self.size);
        let end = (start + self.chunk_size).min(self.size);
        start as usize..end as usize
    }
}

/// In-memory state of one active download. Content lives in the Store only;
/// the entry is dropped once the transfer completes or fails.
#[derive(Debug)]
pub struct FileTransfer {
    pub meta: FileMeta,
    bitmap: Bitmap,
    /// Chunk requested last and the tick it was issued at.
    outstanding: Option<(u32, u64)>,
    integrity_failures: u32,
}

impl FileTransfer {
    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn outstanding(&self) -> Option<u32> {
        self.outstanding.map(|(chunk, _)| chunk)
    }

    pub fn integrity_failures(&self) -> u32 {
        self.integrity_failures
    }
}

/// What the engine asks its owner to do or report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Begin { file_id: FileId, resumed: bool },
    /// Send a `TransferQuery` for `chunk` to `source`.
    Request {
        source: PeerId,
        file_id: FileId,
        chunk: u32,
    },
    Complete { file_id: FileId },
    Failed {
        file_id: FileId,
        error: TransferError,
    },
}

pub struct TransferEngine {
    store: Box<dyn Store>,
    rng: StdRng,
    transfers: HashMap<FileId, FileTransfer>,
    tick: u64,
    chunk_timeout_ticks: u64,
    max_integrity_failures: u32,
}

impl TransferEngine {
    pub fn new(store: Box<dyn Store>, config: &MeshConfig) -> Self {
        Self::with_rng(store, config, StdRng::from_entropy())
    }

    /// Engine with a caller-supplied RNG, for reproducible chunk order.
    pub fn with_rng(store: Box<dyn Store>, config: &MeshConfig, rng: StdRng) -> Self {
        Self {
            store,
            rng,
            transfers: HashMap::new(),
            tick: 0,
            chunk_timeout_ticks: config.chunk_timeout_ticks,
            max_integrity_failures: config.max_integrity_failures.max(1),
        }
    }

    /// Active download of `file_id`, if any.
    pub fn transfer(&self, file_id: &FileId) -> Option<&FileTransfer> {
        self.transfers.get(file_id)
    }

    pub fn active_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Start (or resume) downloading `meta`. The Store record exists before the
    /// first request goes out; an existing record is resumed, not recreated.
    pub fn begin_transfer(&mut self, meta: FileMeta) -> Result<Vec<TransferEvent>, TransferError> {
        let file_id = meta.file_id;
        if self.transfers.contains_key(&file_id) {
            debug!(file = %file_id, "transfer already in progress");
            return Ok(Vec::new());
        }
        let bitmap =
            Bitmap::for_size(meta.size, meta.chunk_size).ok_or(TransferError::InvalidChunkSize)?;
        let (meta, bitmap, resumed) =
            match self.store.add(FileRecord::empty(meta.clone(), bitmap.clone())) {
                Ok(()) => (meta, bitmap, false),
                Err(StoreError::Conflict(_)) => match self.store.get(&file_id)? {
                    Some(existing) => {
                        info!(
                            file = %file_id,
                            have = existing.bitmap.count_set(),
                            of = existing.bitmap.len(),
                            "resuming transfer from stored record"
                        );
                        (existing.meta, existing.bitmap, true)
                    }
                    None => {
                        self.store.add(FileRecord::empty(meta.clone(), bitmap.clone()))?;
                        (meta, bitmap, false)
                    }
                },
                Err(e) => return Err(e.into()),
            };
        info!(
            file = %file_id,
            name = %meta.name,
            size = meta.size,
            chunks = bitmap.len(),
            source = %meta.source,
            resumed,
            "transfer begin"
        );
        self.transfers.insert(
            file_id,
            FileTransfer {
                meta,
                bitmap,
                outstanding: None,
                integrity_failures: 0,
            },
        );
        let mut events = vec![TransferEvent::Begin { file_id, resumed }];
        events.extend(self.advance(file_id)?);
        Ok(events)
    }

    /// Ask for one specific chunk. Already-held chunks are not requested again.
    pub fn request_chunk(
        &mut self,
        file_id: FileId,
        index: u32,
    ) -> Result<Option<TransferEvent>, TransferError> {
        let tick = self.tick;
        let t = self
            .transfers
            .get_mut(&file_id)
            .ok_or(TransferError::UnknownTransfer(file_id))?;
        let len = t.bitmap.len();
        if index >= len {
            return Err(TransferError::ChunkOutOfRange { index, len });
        }
        if t.bitmap.get(index) {
            return Ok(None);
        }
        t.outstanding = Some((index, tick));
        debug!(file = %file_id, chunk = index, "requesting chunk");
        Ok(Some(TransferEvent::Request {
            source: t.meta.source,
            file_id,
            chunk: index,
        }))
    }

    /// Merge a received chunk: one Store chunk write, then the bit. Duplicates
    /// and chunks of files already finished change nothing.
    pub fn on_chunk_received(
        &mut self,
        file_id: FileId,
        index: u32,
        bytes: &[u8],
    ) -> Result<Vec<TransferEvent>, TransferError> {
        let Some(t) = self.transfers.get_mut(&file_id) else {
            if self.store.read_chunk(&file_id, index)?.is_some() {
                debug!(file = %file_id, chunk = index, "chunk of a finished transfer ignored");
                return Ok(Vec::new());
            }
            return Err(TransferError::UnknownTransfer(file_id));
        };
        let len = t.bitmap.len();
        if index >= len {
            return Err(TransferError::ChunkOutOfRange { index, len });
        }
        if t.bitmap.get(index) {
            debug!(file = %file_id, chunk = index, "duplicate chunk ignored");
            return Ok(Vec::new());
        }
        let expected = t.meta.chunk_range(index).len();
        if bytes.len() != expected {
            return Err(TransferError::ChunkSizeMismatch {
                index,
                got: bytes.len(),
                expected,
            });
        }
        self.store.write_chunk(&file_id, index, bytes)?;
        t.bitmap.set(index);
        if t.outstanding.map(|(c, _)| c) == Some(index) {
            t.outstanding = None;
        }
        debug!(
            file = %file_id,
            chunk = index,
            have = t.bitmap.count_set(),
            of = len,
            "chunk stored"
        );
        self.advance(file_id)
    }

    /// Bytes of chunk `index` of any file in the Store whose bit is set,
    /// partial downloads included.
    pub fn serve_chunk(&self, file_id: FileId, index: u32) -> Result<Option<Vec<u8>>, TransferError> {
        Ok(self.store.read_chunk(&file_id, index)?)
    }

    /// Make locally held content available to peers. Returns the metadata a
    /// downloader needs.
    pub fn share_file(
        &mut self,
        name: impl Into<String>,
        content: Vec<u8>,
        chunk_size: u64,
        local: PeerId,
    ) -> Result<FileMeta, TransferError> {
        let meta = FileMeta {
            file_id: FileId::from_content(&content),
            name: name.into(),
            size: content.len() as u64,
            chunk_size,
            source: local,
        };
        let mut bitmap =
            Bitmap::for_size(meta.size, meta.chunk_size).ok_or(TransferError::InvalidChunkSize)?;
        for i in 0..bitmap.len() {
            bitmap.set(i);
        }
        let record = FileRecord {
            meta: meta.clone(),
            bitmap,
            content,
        };
        match self.store.add(record.clone()) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => self.store.update(record)?,
            Err(e) => return Err(e.into()),
        }
        info!(file = %meta.file_id, name = %meta.name, size = meta.size, "sharing file");
        Ok(meta)
    }

    /// Advance time; re-request chunks whose request went unanswered.
    pub fn tick(&mut self) -> Vec<TransferEvent> {
        self.tick = self.tick.saturating_add(1);
        let now = self.tick;
        let timeout = self.chunk_timeout_ticks;
        let mut stale: Vec<FileId> = self
            .transfers
            .values()
            .filter(|t| matches!(t.outstanding, Some((_, at)) if now.saturating_sub(at) > timeout))
            .map(|t| t.meta.file_id)
            .collect();
        stale.sort();
        let mut events = Vec::new();
        for file_id in stale {
            if let Some(t) = self.transfers.get_mut(&file_id) {
                if let Some((chunk, _)) = t.outstanding.take() {
                    warn!(file = %file_id, chunk, "chunk request timed out, re-requesting");
                }
            }
            match self.advance(file_id) {
                Ok(evs) => events.extend(evs),
                Err(error) => {
                    self.transfers.remove(&file_id);
                    events.push(TransferEvent::Failed { file_id, error });
                }
            }
        }
        events
    }

    /// Finalize when full, else request a random missing chunk.
    fn advance(&mut self, file_id: FileId) -> Result<Vec<TransferEvent>, TransferError> {
        let Some(t) = self.transfers.get(&file_id) else {
            return Err(TransferError::UnknownTransfer(file_id));
        };
        if t.bitmap.is_full() {
            return self.finalize(file_id);
        }
        match t.bitmap.random_unset(&mut self.rng) {
            Some(index) => Ok(self.request_chunk(file_id, index)?.into_iter().collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Verify the assembled content; the transfer leaves the active map on
    /// success and on final failure, so this runs once per download attempt.
    fn finalize(&mut self, file_id: FileId) -> Result<Vec<TransferEvent>, TransferError> {
        let max_failures = self.max_integrity_failures;
        let Some(mut t) = self.transfers.remove(&file_id) else {
            return Ok(Vec::new());
        };
        let record = self
            .store
            .get(&file_id)?
            .ok_or(StoreError::NotFound(file_id))?;
        if record.content.len() as u64 == t.meta.size
            && integrity::verify_content(&record.content, file_id.as_bytes())
        {
            info!(file = %file_id, size = t.meta.size, "transfer complete");
            return Ok(vec![TransferEvent::Complete { file_id }]);
        }

        t.integrity_failures += 1;
        warn!(
            file = %file_id,
            failures = t.integrity_failures,
            "assembled content does not match file id"
        );
        t.bitmap.clear();
        t.outstanding = None;
        self.store
            .update(FileRecord::empty(t.meta.clone(), t.bitmap.clone()))?;
        if t.integrity_failures >= max_failures {
            return Ok(vec![TransferEvent::Failed {
                file_id,
                error: TransferError::IntegrityFailed(file_id),
            }]);
        }
        self.transfers.insert(file_id, t);
        self.advance(file_id)
    }
}
