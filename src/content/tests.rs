#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use crate::cancel::{Source, Token};
use crate::config::{CoreConfig, BLOCK_SIZE};
use crate::handle::ContentId;

use super::store::{BlockStore, MemoryBlockStore};
use super::ContentService;

fn content(name: &str) -> ContentId {
    ContentId::new("export", name.bytes().map(u64::from).sum())
}

fn service() -> (Arc<ContentService>, Arc<MemoryBlockStore>) {
    let store = Arc::new(MemoryBlockStore::new());
    let service = ContentService::new(store.clone(), &CoreConfig::default());
    (service, store)
}

#[tokio::test]
async fn newest_write_wins_per_byte() {
    let (service, _) = service();
    let id = content("abba");
    service.write_at(&id, b"AAAA", 0).await.unwrap();
    service.write_at(&id, b"BB", 1).await.unwrap();

    let mut buf = [0u8; 4];
    let n = service.read_at(&id, &mut buf, 0).await.unwrap();
    assert_eq!(n, 4);
    assert_eq!(&buf, b"ABBA");
}

#[tokio::test]
async fn overlapping_rewrites_observe_sequence_order() {
    let (service, _) = service();
    let id = content("seq");
    service.write_at(&id, b"11111111", 0).await.unwrap();
    service.write_at(&id, b"222", 2).await.unwrap();
    service.write_at(&id, b"3", 3).await.unwrap();

    let mut buf = [0u8; 8];
    service.read_at(&id, &mut buf, 0).await.unwrap();
    assert_eq!(&buf, b"11232111");
}

#[tokio::test]
async fn holes_read_as_zeros() {
    let (service, _) = service();
    let id = content("sparse");
    service.write_at(&id, b"tail", 10).await.unwrap();

    let mut buf = [0xFFu8; 14];
    let n = service.read_at(&id, &mut buf, 0).await.unwrap();
    assert_eq!(n, 14);
    assert_eq!(&buf[..10], &[0u8; 10]);
    assert_eq!(&buf[10..], b"tail");
}

#[tokio::test]
async fn reads_fall_through_to_the_store() {
    let (service, store) = service();
    let id = content("base");
    store.put(&id, b"stored-bytes".to_vec()).await.unwrap();

    let mut buf = [0u8; 12];
    let n = service.read_at(&id, &mut buf, 0).await.unwrap();
    assert_eq!(n, 12);
    assert_eq!(&buf, b"stored-bytes");

    // Dirty overlay wins over the stored base.
    service.write_at(&id, b"S", 0).await.unwrap();
    let n = service.read_at(&id, &mut buf, 0).await.unwrap();
    assert_eq!(n, 12);
    assert_eq!(&buf, b"Stored-bytes");
}

#[tokio::test]
async fn read_past_end_returns_zero_bytes() {
    let (service, _) = service();
    let id = content("eof");
    service.write_at(&id, b"abc", 0).await.unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(service.read_at(&id, &mut buf, 3).await.unwrap(), 0);
    assert_eq!(service.read_at(&id, &mut buf, 100).await.unwrap(), 0);
    // A short read at the boundary.
    assert_eq!(service.read_at(&id, &mut buf, 1).await.unwrap(), 2);
}

#[tokio::test]
async fn truncate_drops_cached_tail() {
    let (service, _) = service();
    let id = content("trunc");
    service.write_at(&id, b"0123456789", 0).await.unwrap();
    service.truncate(&id, 4).await.unwrap();

    assert_eq!(service.content_size(&id).await.unwrap(), 4);
    let mut buf = [0u8; 10];
    assert_eq!(service.read_at(&id, &mut buf, 0).await.unwrap(), 4);
    assert_eq!(&buf[..4], b"0123");

    // Bytes written after the truncate reappear; the gap stays zero.
    service.write_at(&id, b"Z", 6).await.unwrap();
    let n = service.read_at(&id, &mut buf, 0).await.unwrap();
    assert_eq!(n, 7);
    assert_eq!(&buf[..7], b"0123\0\0Z");
}

#[tokio::test]
async fn truncate_caps_the_stored_object_until_finalize() {
    let (service, store) = service();
    let id = content("trunc-store");
    store.put(&id, b"0123456789".to_vec()).await.unwrap();
    service.truncate(&id, 4).await.unwrap();

    assert_eq!(service.content_size(&id).await.unwrap(), 4);
    service.flush_and_finalize(&id).await.unwrap();
    assert_eq!(store.object(&id).unwrap(), b"0123");
}

#[tokio::test]
async fn small_file_finalize_is_a_simple_put() {
    let (service, store) = service();
    let id = content("small");
    service.write_at(&id, b"hello world", 0).await.unwrap();

    let result = service.flush_and_finalize(&id).await.unwrap();
    assert!(result.finalized);
    assert!(!result.already_flushed);
    assert_eq!(store.object(&id).unwrap(), b"hello world");
    assert_eq!(store.open_uploads(), 0);
    assert_eq!(service.dirty_bytes(), 0);
}

#[tokio::test]
async fn large_file_finalize_completes_multipart() {
    let (service, store) = service();
    let id = content("large");
    // Two full blocks and a partial third.
    let block = vec![7u8; BLOCK_SIZE as usize];
    service.write_at(&id, &block, 0).await.unwrap();
    service.write_at(&id, &block, BLOCK_SIZE).await.unwrap();
    service.write_at(&id, b"tail-bytes", 2 * BLOCK_SIZE).await.unwrap();

    let result = service.flush_and_finalize(&id).await.unwrap();
    assert!(result.finalized);

    let object = store.object(&id).unwrap();
    assert_eq!(object.len() as u64, 2 * BLOCK_SIZE + 10);
    assert_eq!(&object[..BLOCK_SIZE as usize], &block[..]);
    assert_eq!(&object[2 * BLOCK_SIZE as usize..], b"tail-bytes");
    assert_eq!(store.open_uploads(), 0);

    // Finalized data survives a fresh read through the cache.
    let mut buf = [0u8; 10];
    service.read_at(&id, &mut buf, 2 * BLOCK_SIZE).await.unwrap();
    assert_eq!(&buf, b"tail-bytes");
}

#[tokio::test]
async fn eager_uploads_advance_the_flushed_offset() {
    let (service, _) = service();
    let id = content("eager");
    let block = vec![1u8; BLOCK_SIZE as usize];
    service.write_at(&id, &block, 0).await.unwrap();

    // The completed first block is picked up by a worker shortly.
    let mut waited = Duration::ZERO;
    while service.flushed_offset(&id).await < BLOCK_SIZE {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
        assert!(waited < Duration::from_secs(5), "eager upload never landed");
    }
    assert_eq!(service.flushed_offset(&id).await, BLOCK_SIZE);
}

#[tokio::test]
async fn flush_reports_already_flushed_when_clean() {
    let (service, _) = service();
    let id = content("clean");
    let result = service.flush(&id).await.unwrap();
    assert!(result.already_flushed);
    assert!(!result.finalized);
}

#[tokio::test]
async fn delete_and_abort_are_idempotent() {
    let (service, store) = service();
    let id = content("gone");
    service.write_at(&id, b"data", 0).await.unwrap();
    service.flush_and_finalize(&id).await.unwrap();
    assert!(store.object(&id).is_some());

    service.delete(&id).await.unwrap();
    service.delete(&id).await.unwrap();
    assert!(store.object(&id).is_none());
    assert!(!service.content_exists(&id).await.unwrap());

    service.abort_upload(&id).await.unwrap();
    service.abort_upload(&id).await.unwrap();
}

#[tokio::test]
async fn abort_discards_the_upload_session() {
    let (service, store) = service();
    let id = content("aborted");
    let block = vec![5u8; BLOCK_SIZE as usize];
    service.write_at(&id, &block, 0).await.unwrap();

    // Let the eager worker open a multipart session.
    let mut waited = Duration::ZERO;
    while service.flushed_offset(&id).await < BLOCK_SIZE {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
        assert!(waited < Duration::from_secs(5), "eager upload never landed");
    }
    service.abort_upload(&id).await.unwrap();
    assert_eq!(store.open_uploads(), 0);
    // The dirty bytes are still in the cache for a later commit.
    assert!(service.dirty_bytes() > 0);
}

#[tokio::test]
async fn content_size_and_exists() {
    let (service, store) = service();
    let id = content("sizes");
    assert!(!service.content_exists(&id).await.unwrap());
    assert!(service.content_size(&id).await.is_err());

    store.put(&id, vec![0u8; 100]).await.unwrap();
    assert_eq!(service.content_size(&id).await.unwrap(), 100);

    // The cache high-water mark wins over the store size.
    service.write_at(&id, b"x", 499).await.unwrap();
    assert_eq!(service.content_size(&id).await.unwrap(), 500);
}

#[tokio::test]
async fn prefetch_wait_and_cancel() {
    let (service, store) = service();
    let id = content("prefetch");
    store.put(&id, vec![9u8; 1024]).await.unwrap();

    service.prefetch(&id, 1024);
    let reached = service
        .wait_for_prefetch_offset(&id, 1024, &Token::none())
        .await
        .unwrap();
    assert!(reached);

    // Cancellation resolves the wait without reaching the offset.
    let id2 = content("prefetch-cancel");
    let source = Source::new();
    let token = source.token();
    source.cancel();
    let reached = service.wait_for_prefetch_offset(&id2, 1, &token).await.unwrap();
    assert!(!reached);
}

#[tokio::test]
async fn shutdown_drains_the_flusher() {
    let (service, _) = service();
    let id = content("drain");
    service.write_at(&id, &vec![3u8; BLOCK_SIZE as usize], 0).await.unwrap();
    service.shutdown().await.unwrap();
}
