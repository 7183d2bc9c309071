//! Chunk/slice write cache.
//!
//! File bytes are partitioned into fixed 64 MiB chunks; writes accumulate
//! as slices tagged with a per-file monotonic sequence number. A read
//! materializes chunk contents newest-wins: the highest-sequence slice
//! covering a byte supplies its value, bytes no slice covers fall through
//! to the block store, and bytes the store does not have read as zeros
//! (sparse semantics).
//!
//! Locking is two-level: the `DashMap` shards protect the per-file entry
//! map, and each entry carries its own mutex over slices and state, so
//! operations on different files run in parallel and operations on one
//! file serialize. Dirty-byte accounting is an atomic counter so size
//! queries never take a lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex};
use tracing::trace;

use crate::config::{BLOCK_SIZE, CHUNK_SIZE};
use crate::error::Result;
use crate::handle::ContentId;

use super::store::BlockStore;

/// One write's bytes within a single chunk.
pub(crate) struct Slice {
    pub offset_in_chunk: u32,
    pub data: Vec<u8>,
    pub write_seq: u64,
}

impl Slice {
    fn end(&self) -> u32 {
        self.offset_in_chunk + self.data.len() as u32
    }

    /// First and last file-absolute block offsets this slice touches.
    pub fn block_span(&self, chunk_base: u64) -> (u64, u64) {
        let start = chunk_base + self.offset_in_chunk as u64;
        let last = chunk_base + (self.end() as u64) - 1;
        (start - start % BLOCK_SIZE, last - last % BLOCK_SIZE)
    }
}

/// Lifecycle tag of a chunk's cached bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ChunkState {
    /// Dirty slices are accumulating; never evicted.
    Buffering,
    /// A block of this chunk is being uploaded; never evicted.
    Uploading,
    /// All bytes are durable in the store; eviction candidate.
    Cached,
    /// A background prefetch is populating the block cache.
    Prefetching,
}

pub(crate) struct Chunk {
    pub slices: Vec<Slice>,
    pub state: ChunkState,
}

impl Chunk {
    fn dirty_bytes(&self) -> u64 {
        self.slices.iter().map(|s| s.data.len() as u64).sum()
    }
}

pub(crate) struct FileInner {
    /// Chunk index -> chunk. Slices within a chunk are in write order,
    /// which is ascending `write_seq`.
    pub chunks: BTreeMap<u64, Chunk>,
    pub write_seq: u64,
    /// Logical size as seen through the cache (max written byte, reduced
    /// by truncate).
    pub size: u64,
    /// Pending store-side truncate, applied at finalize time.
    pub needs_store_truncate: Option<u64>,
    pub last_access: Instant,
    /// Next block offset the eager flusher has not been told about.
    pub eager_watermark: u64,
}

pub(crate) struct FileEntry {
    pub inner: Mutex<FileInner>,
    /// Highest byte offset a background prefetch has materialized.
    pub prefetched: watch::Sender<u64>,
}

pub(crate) struct CacheShared {
    pub files: DashMap<ContentId, Arc<FileEntry>>,
    /// Read-through cache of clean 4 MiB blocks, keyed by block offset.
    /// Dirty data never enters here, so eviction can only drop bytes that
    /// are durable in the store.
    pub blocks: moka::sync::Cache<(ContentId, u64), Arc<Vec<u8>>>,
    pub store: Arc<dyn BlockStore>,
    total_dirty: AtomicU64,
}

impl CacheShared {
    pub fn new(store: Arc<dyn BlockStore>, max_bytes: u64) -> Self {
        let blocks = moka::sync::Cache::builder()
            .weigher(|_key: &(ContentId, u64), value: &Arc<Vec<u8>>| value.len() as u32)
            .max_capacity(max_bytes)
            .build();
        CacheShared { files: DashMap::new(), blocks, store, total_dirty: AtomicU64::new(0) }
    }

    /// Dirty bytes currently buffered, readable without any lock.
    pub fn dirty_bytes(&self) -> u64 {
        self.total_dirty.load(Ordering::Relaxed)
    }

    pub fn entry(&self, id: &ContentId) -> Arc<FileEntry> {
        self.files
            .entry(id.clone())
            .or_insert_with(|| {
                let (prefetched, _) = watch::channel(0);
                Arc::new(FileEntry {
                    inner: Mutex::new(FileInner {
                        chunks: BTreeMap::new(),
                        write_seq: 0,
                        size: 0,
                        needs_store_truncate: None,
                        last_access: Instant::now(),
                        eager_watermark: 0,
                    }),
                    prefetched,
                })
            })
            .clone()
    }

    pub fn lookup(&self, id: &ContentId) -> Option<Arc<FileEntry>> {
        self.files.get(id).map(|e| e.clone())
    }

    /// Appends the write as slices and returns the block offsets that
    /// became complete, for the eager flusher to pick up.
    pub async fn write_at(&self, id: &ContentId, data: &[u8], offset: u64) -> Vec<u64> {
        if data.is_empty() {
            return Vec::new();
        }
        let entry = self.entry(id);
        let mut inner = entry.inner.lock().await;
        inner.write_seq += 1;
        let seq = inner.write_seq;

        let mut cursor = 0usize;
        while cursor < data.len() {
            let absolute = offset + cursor as u64;
            let chunk_index = absolute / CHUNK_SIZE;
            let offset_in_chunk = (absolute % CHUNK_SIZE) as u32;
            let available = (CHUNK_SIZE - absolute % CHUNK_SIZE) as usize;
            let take = available.min(data.len() - cursor);

            let chunk = inner
                .chunks
                .entry(chunk_index)
                .or_insert_with(|| Chunk { slices: Vec::new(), state: ChunkState::Buffering });
            chunk.state = ChunkState::Buffering;
            chunk.slices.push(Slice {
                offset_in_chunk,
                data: data[cursor..cursor + take].to_vec(),
                write_seq: seq,
            });
            cursor += take;
        }
        self.total_dirty.fetch_add(data.len() as u64, Ordering::Relaxed);

        inner.size = inner.size.max(offset + data.len() as u64);
        inner.last_access = Instant::now();

        // Every block wholly below the written high-water mark is complete
        // and ready for an eager upload.
        let mut ready = Vec::new();
        while inner.eager_watermark + BLOCK_SIZE <= inner.size {
            ready.push(inner.eager_watermark);
            inner.eager_watermark += BLOCK_SIZE;
        }
        trace!(%id, seq, ready = ready.len(), "write buffered");
        ready
    }

    /// Logical file size: the larger of the cached high-water mark and the
    /// store object size, capped by a pending truncate.
    pub async fn logical_size(&self, id: &ContentId) -> Result<Option<u64>> {
        let store_size = self.store.size(id).await?;
        let Some(entry) = self.lookup(id) else {
            return Ok(store_size);
        };
        let inner = entry.inner.lock().await;
        let base = match (store_size, inner.needs_store_truncate) {
            (Some(s), Some(t)) => Some(s.min(t)),
            (Some(s), None) => Some(s),
            (None, _) => None,
        };
        Ok(Some(inner.size.max(base.unwrap_or(0))))
    }

    /// Fills `buf` from `offset`, newest-wins. Returns the bytes read,
    /// zero at or beyond end of file.
    pub async fn read_at(&self, id: &ContentId, buf: &mut [u8], offset: u64) -> Result<usize> {
        let Some(size) = self.logical_size(id).await? else {
            return Ok(0);
        };
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min((size - offset) as usize);
        let out = &mut buf[..n];
        out.fill(0);

        // Base layer: clean blocks from the store, honoring a pending
        // truncate (bytes at or past it read as zero until re-written).
        let store_limit = match self.lookup(id) {
            Some(entry) => {
                let inner = entry.inner.lock().await;
                inner.needs_store_truncate
            }
            None => None,
        };
        let base_end = {
            let store_size = self.store.size(id).await?.unwrap_or(0);
            let limit = store_limit.unwrap_or(u64::MAX);
            store_size.min(limit).min(offset + n as u64)
        };
        let mut position = offset;
        while position < base_end {
            let block_offset = position - position % BLOCK_SIZE;
            let block = self.fetch_block(id, block_offset).await?;
            let in_block = (position - block_offset) as usize;
            if in_block >= block.len() {
                break;
            }
            let take = (block.len() - in_block)
                .min((base_end - position) as usize)
                .min(n - (position - offset) as usize);
            let dest = (position - offset) as usize;
            out[dest..dest + take].copy_from_slice(&block[in_block..in_block + take]);
            position += take as u64;
        }

        // Overlay: dirty slices in write order, so the newest write wins
        // on every byte it covers.
        if let Some(entry) = self.lookup(id) {
            let mut inner = entry.inner.lock().await;
            inner.last_access = Instant::now();
            let first_chunk = offset / CHUNK_SIZE;
            let last_chunk = (offset + n as u64 - 1) / CHUNK_SIZE;
            for (&chunk_index, chunk) in inner.chunks.range(first_chunk..=last_chunk) {
                let chunk_base = chunk_index * CHUNK_SIZE;
                for slice in &chunk.slices {
                    let slice_start = chunk_base + slice.offset_in_chunk as u64;
                    let slice_end = chunk_base + slice.end() as u64;
                    let copy_start = slice_start.max(offset);
                    let copy_end = slice_end.min(offset + n as u64);
                    if copy_start >= copy_end {
                        continue;
                    }
                    let src = (copy_start - slice_start) as usize;
                    let dest = (copy_start - offset) as usize;
                    let len = (copy_end - copy_start) as usize;
                    out[dest..dest + len].copy_from_slice(&slice.data[src..src + len]);
                }
            }
        }
        Ok(n)
    }

    /// Exact-length materialization for uploads: like [`Self::read_at`]
    /// but zero-padded to `length`.
    pub async fn materialize(&self, id: &ContentId, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.read_at(id, &mut buf, offset).await?;
        Ok(buf)
    }

    /// Read-through block fetch: serves from the clean-block cache,
    /// falling back to a store range read.
    pub async fn fetch_block(&self, id: &ContentId, block_offset: u64) -> Result<Arc<Vec<u8>>> {
        let key = (id.clone(), block_offset);
        if let Some(block) = self.blocks.get(&key) {
            return Ok(block);
        }
        let data = self.store.read_range(id, block_offset, BLOCK_SIZE as usize).await?;
        let block = Arc::new(data);
        if !block.is_empty() {
            self.blocks.insert(key, block.clone());
        }
        Ok(block)
    }

    /// Shrinks (or sparsely extends) the file. Slices past the boundary
    /// are dropped, a straddling slice is trimmed, and a store-side
    /// truncate is recorded for the next finalize.
    pub async fn truncate(&self, id: &ContentId, new_size: u64) -> Result<()> {
        let entry = self.entry(id);
        let mut inner = entry.inner.lock().await;
        let old_size = inner.size;
        if new_size < inner.size {
            let boundary_chunk = new_size / CHUNK_SIZE;
            let mut freed = 0u64;
            inner.chunks.retain(|&index, chunk| {
                if index > boundary_chunk || (index == boundary_chunk && new_size % CHUNK_SIZE == 0)
                {
                    freed += chunk.dirty_bytes();
                    false
                } else {
                    true
                }
            });
            if let Some(chunk) = inner.chunks.get_mut(&boundary_chunk) {
                let keep = (new_size % CHUNK_SIZE) as u32;
                chunk.slices.retain_mut(|slice| {
                    if slice.offset_in_chunk >= keep {
                        freed += slice.data.len() as u64;
                        return false;
                    }
                    if slice.end() > keep {
                        let trimmed = (slice.end() - keep) as u64;
                        slice.data.truncate((keep - slice.offset_in_chunk) as usize);
                        freed += trimmed;
                    }
                    true
                });
            }
            self.total_dirty.fetch_sub(freed, Ordering::Relaxed);
        }
        inner.size = new_size;
        inner.needs_store_truncate = Some(
            inner.needs_store_truncate.map_or(new_size, |t| t.min(new_size)),
        );
        inner.eager_watermark = inner.eager_watermark.min(new_size - new_size % BLOCK_SIZE);
        // Cached base blocks past the boundary are stale now.
        let mut block = new_size - new_size % BLOCK_SIZE;
        let top = old_size.max(new_size) + BLOCK_SIZE;
        while block <= top {
            self.blocks.invalidate(&(id.clone(), block));
            block += BLOCK_SIZE;
        }
        Ok(())
    }

    /// Drops the file's cached state entirely. Idempotent.
    pub async fn remove(&self, id: &ContentId) {
        if let Some((_, entry)) = self.files.remove(id) {
            let inner = entry.inner.lock().await;
            let dirty: u64 = inner.chunks.values().map(|c| c.dirty_bytes()).sum();
            self.total_dirty.fetch_sub(dirty, Ordering::Relaxed);
            let mut block = 0;
            while block <= inner.size {
                self.blocks.invalidate(&(id.clone(), block));
                block += BLOCK_SIZE;
            }
        }
    }

    /// Marks the whole file clean after a successful finalize: slices are
    /// dropped (the store now holds the bytes) and chunks become eviction
    /// candidates.
    pub async fn mark_clean(&self, id: &ContentId) {
        if let Some(entry) = self.lookup(id) {
            let mut inner = entry.inner.lock().await;
            let mut freed = 0u64;
            for chunk in inner.chunks.values_mut() {
                freed += chunk.dirty_bytes();
                chunk.slices.clear();
                chunk.state = ChunkState::Cached;
            }
            inner.needs_store_truncate = None;
            self.total_dirty.fetch_sub(freed, Ordering::Relaxed);
            // Base blocks cached before the finalize predate the rewrite.
            let mut block = 0;
            while block <= inner.size {
                self.blocks.invalidate(&(id.clone(), block));
                block += BLOCK_SIZE;
            }
        }
    }

    /// True when any dirty slice touches the given block.
    pub async fn block_has_dirty(&self, id: &ContentId, block_offset: u64) -> bool {
        let Some(entry) = self.lookup(id) else {
            return false;
        };
        let inner = entry.inner.lock().await;
        let chunk_index = block_offset / CHUNK_SIZE;
        let chunk_base = chunk_index * CHUNK_SIZE;
        inner.chunks.get(&chunk_index).is_some_and(|chunk| {
            chunk.slices.iter().any(|slice| {
                let (start, end) = slice.block_span(chunk_base);
                start <= block_offset && block_offset <= end
            })
        })
    }

    pub async fn set_chunk_state(&self, id: &ContentId, chunk_index: u64, state: ChunkState) {
        if let Some(entry) = self.lookup(id) {
            let mut inner = entry.inner.lock().await;
            if let Some(chunk) = inner.chunks.get_mut(&chunk_index) {
                chunk.state = state;
            }
        }
    }
}
