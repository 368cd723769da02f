//! Persistence capability for transfer records, plus an in-memory store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::chunk::FileMeta;
use crate::error::StoreError;
use crate::protocol::FileId;

/// Everything needed to resume or serve a file: metadata, which chunks are
/// present, and the content assembled so far. `content` grows as chunks land
/// and is zero-filled where chunks are missing; it reaches `meta.size` bytes
/// once the last chunk is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub meta: FileMeta,
    pub bitmap: Bitmap,
    pub content: Vec<u8>,
}

impl FileRecord {
    /// Empty record: no chunks held, no content allocated.
    pub fn empty(meta: FileMeta, bitmap: Bitmap) -> Self {
        Self {
            meta,
            bitmap,
            content: Vec::new(),
        }
    }

    pub fn file_id(&self) -> FileId {
        self.meta.file_id
    }

    /// Bytes of chunk `index` if its bit is set and the content covers it.
    pub fn chunk(&self, index: u32) -> Option<&[u8]> {
        if !self.bitmap.get(index) {
            return None;
        }
        self.content.get(self.meta.chunk_range(index))
    }

    /// Copy `bytes` into chunk `index` and set its bit. The caller has checked
    /// the index and length against `meta`.
    pub fn write_chunk(&mut self, index: u32, bytes: &[u8]) {
        let range = self.meta.chunk_range(index);
        if self.content.len() < range.end {
            self.content.resize(range.end, 0);
        }
        self.content[range].copy_from_slice(bytes);
        self.bitmap.set(index);
    }
}

pub trait Store {
    /// Insert a new record. An existing record with the same ID is left
    /// untouched and reported as [`StoreError::Conflict`].
    fn add(&mut self, record: FileRecord) -> Result<(), StoreError>;
    fn get(&self, id: &FileId) -> Result<Option<FileRecord>, StoreError>;
    /// Replace an existing record.
    fn update(&mut self, record: FileRecord) -> Result<(), StoreError>;
    fn list(&self) -> Result<Vec<FileRecord>, StoreError>;
    fn delete(&mut self, id: &FileId) -> Result<(), StoreError>;
    /// Persist one received chunk and its bit without rewriting the record.
    fn write_chunk(&mut self, id: &FileId, index: u32, bytes: &[u8]) -> Result<(), StoreError>;
    /// Bytes of one held chunk; `Ok(None)` when the record or the chunk is missing.
    fn read_chunk(&self, id: &FileId, index: u32) -> Result<Option<Vec<u8>>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: BTreeMap<FileId, FileRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn add(&mut self, record: FileRecord) -> Result<(), StoreError> {
        let id = record.file_id();
        if self.records.contains_key(&id) {
            return Err(StoreError::Conflict(id));
        }
        self.records.insert(id, record);
        Ok(())
    }

    fn get(&self, id: &FileId) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.records.get(id).cloned())
    }

    fn update(&mut self, record: FileRecord) -> Result<(), StoreError> {
        let id = record.file_id();
        match self.records.get_mut(&id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn list(&self) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn delete(&mut self, id: &FileId) -> Result<(), StoreError> {
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*id))
    }

    fn write_chunk(&mut self, id: &FileId, index: u32, bytes: &[u8]) -> Result<(), StoreError> {
        let record = self.records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        record.write_chunk(index, bytes);
        Ok(())
    }

    fn read_chunk(&self, id: &FileId, index: u32) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .records
            .get(id)
            .and_then(|r| r.chunk(index))
            .map(<[u8]>::to_vec))
    }
}
