//! Background uploader: eager multipart uploads of completed blocks.
//!
//! `WriteAt` enqueues block-ready notifications on a bounded channel; a
//! small worker pool consumes them and drives per-file multipart upload
//! sessions. The bounded channel is the back-pressure point that keeps
//! dirty memory in check. COMMIT-style flushes return once data is
//! durable in the cache; CLOSE-style finalization blocks until every
//! in-flight part lands and the multipart upload completes.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::BLOCK_SIZE;
use crate::error::{Error, Result};
use crate::handle::ContentId;

use super::cache::{CacheShared, ChunkState};
use super::store::UploadId;

/// Upload attempts per block before the flusher abandons and re-marks the
/// chunk dirty for a later commit to retry.
const UPLOAD_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Deterministic part number for a block offset.
pub(crate) fn part_number(block_offset: u64) -> u32 {
    (block_offset / BLOCK_SIZE) as u32 + 1
}

/// A block that became complete in the cache.
pub(crate) struct BlockReady {
    pub id: ContentId,
    pub block_offset: u64,
}

#[derive(Default)]
struct SessionState {
    upload_id: Option<UploadId>,
    uploaded: BTreeSet<u32>,
    uploading: HashSet<u32>,
    /// Greatest contiguous uploaded position from the start of the file.
    flushed_offset: u64,
    aborted: bool,
}

struct Session {
    state: Mutex<SessionState>,
    /// Signalled whenever `uploading` drains to empty.
    idle: Notify,
}

impl Session {
    fn new() -> Self {
        Session { state: Mutex::new(SessionState::default()), idle: Notify::new() }
    }
}

/// Summary returned by flush and finalize operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FlushResult {
    /// Nothing was dirty when the call was made.
    pub already_flushed: bool,
    /// This call completed the upload (simple put or multipart complete).
    pub finalized: bool,
}

pub(crate) struct Flusher {
    shared: Arc<CacheShared>,
    sessions: DashMap<ContentId, Arc<Session>>,
    queue: async_channel::Sender<BlockReady>,
    receiver: async_channel::Receiver<BlockReady>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Flusher {
    pub fn new(shared: Arc<CacheShared>, queue_depth: usize) -> Arc<Self> {
        let (queue, receiver) = async_channel::bounded(queue_depth.max(1));
        Arc::new(Flusher {
            shared,
            sessions: DashMap::new(),
            queue,
            receiver,
            workers: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn spawn_workers(self: &Arc<Self>, count: usize) {
        let mut workers = self.workers.lock().expect("flusher workers poisoned");
        for _ in 0..count.max(1) {
            let flusher = self.clone();
            let receiver = self.receiver.clone();
            workers.push(tokio::spawn(async move {
                while let Ok(task) = receiver.recv().await {
                    flusher.upload_block(task).await;
                }
            }));
        }
    }

    fn session(&self, id: &ContentId) -> Arc<Session> {
        self.sessions.entry(id.clone()).or_insert_with(|| Arc::new(Session::new())).clone()
    }

    /// Queues an eager upload; applies channel back-pressure to the writer.
    pub async fn enqueue(&self, id: &ContentId, block_offset: u64) {
        let task = BlockReady { id: id.clone(), block_offset };
        if self.queue.send(task).await.is_err() {
            warn!(%id, "flusher queue closed, dropping eager upload");
        }
    }

    /// Uploads one block, with bounded backoff on transient failures.
    async fn upload_block(&self, task: BlockReady) {
        let session = self.session(&task.id);
        let part = part_number(task.block_offset);
        let upload_id = {
            let mut state = session.state.lock().await;
            if state.aborted || state.uploaded.contains(&part) || state.uploading.contains(&part)
            {
                return;
            }
            // A finalize or truncate may have cleaned the block since it
            // was queued.
            if !self.shared.block_has_dirty(&task.id, task.block_offset).await {
                return;
            }
            if state.upload_id.is_none() {
                // BeginIncrementalWrite: first dirty block of the file.
                match self.shared.store.begin_multipart(&task.id).await {
                    Ok(upload) => state.upload_id = Some(upload),
                    Err(err) => {
                        warn!(id = %task.id, %err, "begin multipart failed");
                        return;
                    }
                }
            }
            state.uploading.insert(part);
            state.upload_id.clone().expect("upload id just ensured")
        };
        let chunk_index = task.block_offset / crate::config::CHUNK_SIZE;
        self.shared.set_chunk_state(&task.id, chunk_index, ChunkState::Uploading).await;

        let data = match self.shared.materialize(&task.id, task.block_offset, BLOCK_SIZE as usize).await
        {
            Ok(data) => data,
            Err(err) => {
                warn!(id = %task.id, %err, "materialize for upload failed");
                self.finish_part(&session, part, false).await;
                self.shared.set_chunk_state(&task.id, chunk_index, ChunkState::Buffering).await;
                return;
            }
        };

        let mut succeeded = false;
        for attempt in 0..UPLOAD_ATTEMPTS {
            match self
                .shared
                .store
                .upload_part(&task.id, &upload_id, part, data.clone())
                .await
            {
                Ok(()) => {
                    succeeded = true;
                    break;
                }
                Err(err) => {
                    warn!(id = %task.id, part, attempt, %err, "part upload failed");
                    tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt)).await;
                }
            }
        }

        self.finish_part(&session, part, succeeded).await;
        let next_state = if succeeded { ChunkState::Uploading } else { ChunkState::Buffering };
        self.shared.set_chunk_state(&task.id, chunk_index, next_state).await;
        if succeeded {
            debug!(id = %task.id, part, "eager part uploaded");
        }
    }

    async fn finish_part(&self, session: &Session, part: u32, succeeded: bool) {
        let mut state = session.state.lock().await;
        state.uploading.remove(&part);
        if succeeded {
            state.uploaded.insert(part);
            // Advance the contiguous flushed frontier.
            while state.uploaded.contains(&part_number(state.flushed_offset)) {
                state.flushed_offset += BLOCK_SIZE;
            }
        }
        if state.uploading.is_empty() {
            session.idle.notify_waiters();
        }
    }

    /// Greatest contiguous uploaded position, for observability and tests.
    pub async fn flushed_offset(&self, id: &ContentId) -> u64 {
        // Clone out of the map guard before awaiting the session mutex.
        let session = self.sessions.get(id).map(|s| s.clone());
        match session {
            Some(session) => session.state.lock().await.flushed_offset,
            None => 0,
        }
    }

    /// Non-blocking flush: enqueue every complete block that is neither
    /// uploaded nor uploading.
    pub async fn flush(&self, id: &ContentId) -> Result<FlushResult> {
        let size = self.shared.logical_size(id).await?.unwrap_or(0);
        let dirty = self.pending_blocks(id, size).await;
        if dirty.is_empty() {
            return Ok(FlushResult { already_flushed: true, finalized: false });
        }
        for block_offset in dirty {
            self.enqueue(id, block_offset).await;
        }
        Ok(FlushResult { already_flushed: false, finalized: false })
    }

    /// Complete blocks that hold dirty bytes and are neither uploaded nor
    /// in flight.
    async fn pending_blocks(&self, id: &ContentId, size: u64) -> Vec<u64> {
        let Some(entry) = self.shared.lookup(id) else {
            return Vec::new();
        };
        let mut dirty_blocks = BTreeSet::new();
        {
            let inner = entry.inner.lock().await;
            for (&chunk_index, chunk) in &inner.chunks {
                let chunk_base = chunk_index * crate::config::CHUNK_SIZE;
                for slice in &chunk.slices {
                    let (start, end) = slice.block_span(chunk_base);
                    let mut block = start;
                    while block <= end {
                        if block + BLOCK_SIZE <= size {
                            dirty_blocks.insert(block);
                        }
                        block += BLOCK_SIZE;
                    }
                }
            }
        }
        if dirty_blocks.is_empty() {
            return Vec::new();
        }
        let session = self.sessions.get(id).map(|s| s.clone());
        match session {
            Some(session) => {
                let state = session.state.lock().await;
                dirty_blocks
                    .into_iter()
                    .filter(|&b| {
                        let part = part_number(b);
                        !state.uploaded.contains(&part) && !state.uploading.contains(&part)
                    })
                    .collect()
            }
            None => dirty_blocks.into_iter().collect(),
        }
    }

    /// Blocking finalize: waits out in-flight parts, uploads whatever is
    /// missing (including the final partial part), and completes the
    /// upload. Small files take the simple-put path.
    pub async fn finalize(&self, id: &ContentId) -> Result<FlushResult> {
        let already_flushed = {
            let entry = self.shared.lookup(id);
            match entry {
                Some(entry) => {
                    let inner = entry.inner.lock().await;
                    inner.chunks.values().all(|c| c.slices.is_empty())
                        && inner.needs_store_truncate.is_none()
                }
                None => true,
            }
        };
        let Some(size) = self.shared.logical_size(id).await? else {
            return Ok(FlushResult { already_flushed: true, finalized: false });
        };
        if already_flushed && !self.sessions.contains_key(id) {
            return Ok(FlushResult { already_flushed: true, finalized: false });
        }

        let session = self.session(id);
        self.wait_idle(&session).await;

        if size < BLOCK_SIZE {
            // Small file: one simple put; any multipart begun for it is
            // superseded and aborted.
            let data = self.shared.materialize(id, 0, size as usize).await?;
            self.shared.store.put(id, data).await?;
            let mut state = session.state.lock().await;
            if let Some(upload) = state.upload_id.take() {
                self.shared.store.abort_multipart(id, &upload).await.ok();
            }
            state.flushed_offset = size;
        } else {
            let upload_id = {
                let mut state = session.state.lock().await;
                match state.upload_id.clone() {
                    Some(upload) => upload,
                    None => {
                        let upload = self.shared.store.begin_multipart(id).await?;
                        state.upload_id = Some(upload.clone());
                        upload
                    }
                }
            };
            // Upload every missing part, final partial included.
            let missing: Vec<u64> = {
                let state = session.state.lock().await;
                let mut out = Vec::new();
                let mut block = 0;
                while block < size {
                    if !state.uploaded.contains(&part_number(block)) {
                        out.push(block);
                    }
                    block += BLOCK_SIZE;
                }
                out
            };
            let uploads = missing.iter().map(|&block_offset| {
                let upload_id = upload_id.clone();
                async move {
                    let length = (size - block_offset).min(BLOCK_SIZE) as usize;
                    let data = self.shared.materialize(id, block_offset, length).await?;
                    self.shared
                        .store
                        .upload_part(id, &upload_id, part_number(block_offset), data)
                        .await?;
                    Ok::<u32, Error>(part_number(block_offset))
                }
            });
            let results: Vec<Result<u32>> = join_all(uploads).await;
            let mut state = session.state.lock().await;
            for result in results {
                state.uploaded.insert(result?);
            }
            let parts: Vec<u32> = state.uploaded.iter().copied().collect();
            self.shared.store.complete_multipart(id, &upload_id, &parts).await?;
            state.upload_id = None;
            state.flushed_offset = size;
        }

        self.shared.mark_clean(id).await;
        // Stale queued tasks must not reopen the finished session.
        session.state.lock().await.aborted = true;
        self.sessions.remove(id);
        Ok(FlushResult { already_flushed, finalized: true })
    }

    async fn wait_idle(&self, session: &Session) {
        loop {
            let wait = session.idle.notified();
            {
                let state = session.state.lock().await;
                if state.uploading.is_empty() {
                    return;
                }
            }
            wait.await;
        }
    }

    /// Aborts the multipart upload and discards session state. Idempotent.
    pub async fn abort(&self, id: &ContentId) -> Result<()> {
        if let Some((_, session)) = self.sessions.remove(id) {
            let mut state = session.state.lock().await;
            state.aborted = true;
            if let Some(upload) = state.upload_id.take() {
                self.shared.store.abort_multipart(id, &upload).await.ok();
            }
        }
        Ok(())
    }

    /// Closes the queue and waits for the workers to drain it.
    pub async fn shutdown(&self) {
        self.queue.close();
        let workers = {
            let mut guard = self.workers.lock().expect("flusher workers poisoned");
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            worker.await.ok();
        }
    }
}
