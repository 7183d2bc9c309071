mod common;

use common::Fixture;
use dittofs::handle::ContentId;

#[tokio::test]
async fn newest_wins_read() {
    let fixture = Fixture::new().await;
    let content = &fixture.core.content;
    let id = ContentId::new("export", 101);

    content.write_at(&id, b"AAAA", 0).await.unwrap();
    content.write_at(&id, b"BB", 1).await.unwrap();

    let mut buf = [0u8; 4];
    let n = content.read_at(&id, &mut buf, 0).await.unwrap();
    assert_eq!(n, 4);
    assert_eq!(&buf, b"ABBA");
    fixture.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn finalize_persists_through_the_block_store() {
    let fixture = Fixture::new().await;
    let content = &fixture.core.content;
    let id = ContentId::new("export", 102);

    content.write_at(&id, b"durable payload", 0).await.unwrap();
    let result = content.flush_and_finalize(&id).await.unwrap();
    assert!(result.finalized);
    assert_eq!(fixture.block_store.object(&id).unwrap(), b"durable payload");

    // Remove is idempotent.
    content.delete(&id).await.unwrap();
    content.delete(&id).await.unwrap();
    assert!(!content.content_exists(&id).await.unwrap());
    fixture.core.shutdown().await.unwrap();
}
