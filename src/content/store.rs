//! Block-store seam: the byte-oriented interface storage backends
//! implement.
//!
//! Backends for S3-compatible object stores must support multipart upload
//! (5 MiB minimum part, at most 10 000 parts) and HTTP range reads; part
//! numbers are deterministic by offset (`offset / part_size + 1`), so
//! independent uploaders never disagree on numbering.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::handle::ContentId;

/// Identifier of an in-progress multipart upload.
pub type UploadId = String;

/// Minimum multipart part size accepted by S3-compatible stores.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS: u32 = 10_000;

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Stores the whole object in one call (small files).
    async fn put(&self, id: &ContentId, data: Vec<u8>) -> Result<()>;

    async fn begin_multipart(&self, id: &ContentId) -> Result<UploadId>;

    async fn upload_part(
        &self,
        id: &ContentId,
        upload: &UploadId,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<()>;

    /// Completes the upload from the given part numbers (ascending).
    async fn complete_multipart(
        &self,
        id: &ContentId,
        upload: &UploadId,
        parts: &[u32],
    ) -> Result<()>;

    async fn abort_multipart(&self, id: &ContentId, upload: &UploadId) -> Result<()>;

    /// Range read. Returns fewer bytes than requested at end of object;
    /// returns an empty buffer for reads past the end.
    async fn read_range(&self, id: &ContentId, offset: u64, length: usize) -> Result<Vec<u8>>;

    /// Object size, or `None` when the object does not exist.
    async fn size(&self, id: &ContentId) -> Result<Option<u64>>;

    /// Deletes the object. Implementations may batch deletes; [`Self::close`]
    /// flushes anything pending. Idempotent.
    async fn delete(&self, id: &ContentId) -> Result<()>;

    async fn truncate(&self, id: &ContentId, size: u64) -> Result<()>;

    /// Flushes batched work. Called once at shutdown.
    async fn close(&self) -> Result<()>;
}

#[derive(Default)]
struct MemoryStoreInner {
    objects: HashMap<ContentId, Vec<u8>>,
    uploads: HashMap<UploadId, HashMap<u32, Vec<u8>>>,
    next_upload: u64,
}

/// In-process [`BlockStore`]: the test double and single-node fallback.
#[derive(Default)]
pub struct MemoryBlockStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().expect("block store poisoned")
    }

    /// Raw object bytes, for test assertions.
    pub fn object(&self, id: &ContentId) -> Option<Vec<u8>> {
        self.guard().objects.get(id).cloned()
    }

    /// Number of multipart uploads still open, for test assertions.
    pub fn open_uploads(&self) -> usize {
        self.guard().uploads.len()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn put(&self, id: &ContentId, data: Vec<u8>) -> Result<()> {
        self.guard().objects.insert(id.clone(), data);
        Ok(())
    }

    async fn begin_multipart(&self, id: &ContentId) -> Result<UploadId> {
        let mut inner = self.guard();
        inner.next_upload += 1;
        let upload = format!("{id}-upload-{}", inner.next_upload);
        inner.uploads.insert(upload.clone(), HashMap::new());
        Ok(upload)
    }

    async fn upload_part(
        &self,
        _id: &ContentId,
        upload: &UploadId,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<()> {
        if part_number == 0 || part_number > MAX_PARTS {
            return Err(Error::InvalidArgument);
        }
        let mut inner = self.guard();
        let parts = inner.uploads.get_mut(upload).ok_or(Error::NotFound)?;
        parts.insert(part_number, data);
        Ok(())
    }

    async fn complete_multipart(
        &self,
        id: &ContentId,
        upload: &UploadId,
        parts: &[u32],
    ) -> Result<()> {
        let mut inner = self.guard();
        let mut uploaded = inner.uploads.remove(upload).ok_or(Error::NotFound)?;
        let mut object = Vec::new();
        for part in parts {
            let data = uploaded.remove(part).ok_or(Error::InvalidArgument)?;
            object.extend_from_slice(&data);
        }
        inner.objects.insert(id.clone(), object);
        Ok(())
    }

    async fn abort_multipart(&self, _id: &ContentId, upload: &UploadId) -> Result<()> {
        self.guard().uploads.remove(upload);
        Ok(())
    }

    async fn read_range(&self, id: &ContentId, offset: u64, length: usize) -> Result<Vec<u8>> {
        let inner = self.guard();
        let Some(object) = inner.objects.get(id) else {
            return Ok(Vec::new());
        };
        let start = (offset as usize).min(object.len());
        let end = (start + length).min(object.len());
        Ok(object[start..end].to_vec())
    }

    async fn size(&self, id: &ContentId) -> Result<Option<u64>> {
        Ok(self.guard().objects.get(id).map(|o| o.len() as u64))
    }

    async fn delete(&self, id: &ContentId) -> Result<()> {
        self.guard().objects.remove(id);
        Ok(())
    }

    async fn truncate(&self, id: &ContentId, size: u64) -> Result<()> {
        let mut inner = self.guard();
        if let Some(object) = inner.objects.get_mut(id) {
            object.resize(size as usize, 0);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
