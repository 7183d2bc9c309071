//! Content service: the chunk/slice cache and its background flusher.
//!
//! One process-wide instance serves every share; cache keys are
//! [`ContentId`]s, so share membership never matters here. Writes are
//! durable in the cache the moment `write_at` returns; the flusher moves
//! them to the block store eagerly (per completed 4 MiB block) and a
//! finalize completes the object.

mod cache;
mod flusher;
pub mod store;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::debug;

use crate::cancel::Token;
use crate::config::{CoreConfig, BLOCK_SIZE, CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::handle::ContentId;

use cache::CacheShared;
use flusher::Flusher;

pub use flusher::FlushResult;
pub use store::{BlockStore, MemoryBlockStore};

pub struct ContentService {
    shared: Arc<CacheShared>,
    flusher: Arc<Flusher>,
}

impl ContentService {
    pub fn new(store: Arc<dyn BlockStore>, config: &CoreConfig) -> Arc<Self> {
        let shared = Arc::new(CacheShared::new(store, config.cache_max_bytes));
        let flusher = Flusher::new(shared.clone(), config.flusher_queue_depth);
        flusher.spawn_workers(config.max_parallel_uploads);
        Arc::new(ContentService { shared, flusher })
    }

    /// Buffers the write and queues eager uploads for any block the write
    /// completed.
    pub async fn write_at(&self, id: &ContentId, data: &[u8], offset: u64) -> Result<()> {
        let ready = self.shared.write_at(id, data, offset).await;
        for block_offset in ready {
            self.flusher.enqueue(id, block_offset).await;
        }
        Ok(())
    }

    /// Fills `buf` from `offset`; newest write wins per byte, clean bytes
    /// come from the store, holes read as zeros. Returns bytes read.
    pub async fn read_at(&self, id: &ContentId, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.shared.read_at(id, buf, offset).await
    }

    pub async fn truncate(&self, id: &ContentId, size: u64) -> Result<()> {
        self.shared.truncate(id, size).await
    }

    /// Removes cached state, aborts any in-progress upload, and deletes
    /// the backing object. Idempotent.
    pub async fn delete(&self, id: &ContentId) -> Result<()> {
        self.flusher.abort(id).await?;
        self.shared.remove(id).await;
        self.shared.store.delete(id).await
    }

    /// Non-blocking flush: dirty complete blocks are queued for upload and
    /// the call returns; durability in the cache is already guaranteed.
    pub async fn flush(&self, id: &ContentId) -> Result<FlushResult> {
        self.flusher.flush(id).await
    }

    /// Blocking flush for SMB CLOSE: waits for in-flight uploads, uploads
    /// the remainder including the final partial part, and finalizes the
    /// object in the store.
    pub async fn flush_and_finalize(&self, id: &ContentId) -> Result<FlushResult> {
        let result = self.flusher.finalize(id).await?;
        if result.finalized {
            debug!(%id, "content finalized");
        }
        Ok(result)
    }

    /// Abandons the file's multipart upload session, if any. Idempotent;
    /// buffered dirty data stays in the cache for a later flush.
    pub async fn abort_upload(&self, id: &ContentId) -> Result<()> {
        self.flusher.abort(id).await
    }

    pub async fn content_size(&self, id: &ContentId) -> Result<u64> {
        self.shared.logical_size(id).await?.ok_or(Error::NotFound)
    }

    pub async fn content_exists(&self, id: &ContentId) -> Result<bool> {
        Ok(self.shared.logical_size(id).await?.is_some())
    }

    /// Greatest contiguous byte position durable in the store for this
    /// file's active upload session.
    pub async fn flushed_offset(&self, id: &ContentId) -> u64 {
        self.flusher.flushed_offset(id).await
    }

    /// Dirty bytes currently buffered across all files.
    pub fn dirty_bytes(&self) -> u64 {
        self.shared.dirty_bytes()
    }

    /// Starts a background prefetch of the first `target` bytes into the
    /// block cache.
    pub fn prefetch(self: &Arc<Self>, id: &ContentId, target: u64) {
        let service = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let entry = service.shared.entry(&id);
            {
                let mut inner = entry.inner.lock().await;
                let last_chunk = target / CHUNK_SIZE;
                for chunk_index in 0..=last_chunk {
                    inner
                        .chunks
                        .entry(chunk_index)
                        .or_insert_with(|| cache::Chunk {
                            slices: Vec::new(),
                            state: cache::ChunkState::Prefetching,
                        });
                }
            }
            let mut position = 0;
            while position < target {
                if service.shared.fetch_block(&id, position).await.is_err() {
                    // Failed prefetches free their placeholder state.
                    service.discard_prefetch(&id).await;
                    return;
                }
                position += BLOCK_SIZE;
                let _ = entry.prefetched.send(position.min(target));
            }
        });
    }

    /// Waits until a prefetch has materialized at least `offset` bytes.
    /// Returns false when the token cancels first; the cancelled entry is
    /// discarded so it does not pin memory.
    pub async fn wait_for_prefetch_offset(
        &self,
        id: &ContentId,
        offset: u64,
        token: &Token,
    ) -> Result<bool> {
        let entry = self.shared.entry(id);
        let mut watched = entry.prefetched.subscribe();
        loop {
            if *watched.borrow() >= offset {
                return Ok(true);
            }
            tokio::select! {
                changed = watched.changed() => {
                    if changed.is_err() {
                        return Err(Error::IOError);
                    }
                }
                _ = token.cancelled() => {
                    self.discard_prefetch(id).await;
                    return Ok(false);
                }
            }
        }
    }

    /// Drops prefetch placeholder state, keeping entries with dirty bytes.
    async fn discard_prefetch(&self, id: &ContentId) {
        if let Some(entry) = self.shared.lookup(id) {
            let clean = {
                let inner = entry.inner.lock().await;
                inner.chunks.values().all(|c| c.slices.is_empty())
                    && inner.needs_store_truncate.is_none()
            };
            if clean {
                self.shared.remove(id).await;
            }
        }
    }

    /// Drains the flusher and closes the store. Cache shutdown blocks
    /// until queued uploads complete.
    pub async fn shutdown(&self) -> Result<()> {
        self.flusher.shutdown().await;
        self.shared.store.close().await
    }
}
