mod common;

use common::Fixture;
use dittofs::cancel::Token;
use dittofs::handle::{FileHandle, LockOwner, Range, ShareReservation};
use dittofs::lock::{AcquireOutcome, LockRequest, LockType};

fn request(owner: &str, file: &FileHandle, lock_type: LockType, range: Range) -> LockRequest {
    LockRequest {
        file: file.clone(),
        owner: LockOwner::new(owner),
        client_id: owner.to_owned(),
        lock_type,
        range,
        reservation: ShareReservation::NONE,
        reclaim: false,
    }
}

#[tokio::test]
async fn posix_split_middle() {
    let fixture = Fixture::new().await;
    let locks = &fixture.core.locks;
    let handle = FileHandle::share("export", 7001);

    let outcome = locks
        .acquire(
            request("nlm:A", &handle, LockType::Exclusive, Range::new(0, 100)),
            false,
            &Token::none(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, AcquireOutcome::Granted);

    locks.release(&handle, &LockOwner::new("nlm:A"), Range::new(30, 20)).await.unwrap();

    let mut ranges: Vec<(u64, u64)> = locks
        .list_by_owner(&LockOwner::new("nlm:A"))
        .await
        .iter()
        .map(|l| (l.range.offset, l.range.length))
        .collect();
    ranges.sort();
    assert_eq!(ranges, vec![(0, 30), (50, 50)]);

    // The released gap is free for another owner.
    let conflict = locks
        .test(&handle, &LockOwner::new("nlm:B"), LockType::Exclusive, Range::new(35, 5))
        .await
        .unwrap();
    assert!(conflict.is_none());
    fixture.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn deadlock_denial_leaves_first_waiter_intact() {
    let fixture = Fixture::new().await;
    let locks = fixture.core.locks.clone();
    let f1 = FileHandle::share("export", 7101);
    let f2 = FileHandle::share("export", 7102);

    locks
        .acquire(request("nlm:A", &f1, LockType::Exclusive, Range::new(0, 10)), false, &Token::none())
        .await
        .unwrap();
    locks
        .acquire(request("nlm:B", &f2, LockType::Exclusive, Range::new(0, 10)), false, &Token::none())
        .await
        .unwrap();

    // A blocks on F2 (held by B).
    let waiting_locks = locks.clone();
    let wait_file = f2.clone();
    let waiter = tokio::spawn(async move {
        waiting_locks
            .acquire(
                request("nlm:A", &wait_file, LockType::Exclusive, Range::new(0, 10)),
                true,
                &Token::none(),
            )
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    // B asking for F1 would close the cycle and is rejected immediately,
    // naming the owner it would have waited on.
    let outcome = locks
        .acquire(request("nlm:B", &f1, LockType::Exclusive, Range::new(0, 10)), true, &Token::none())
        .await
        .unwrap();
    assert_eq!(outcome, AcquireOutcome::Deadlock { would_wait_on: LockOwner::new("nlm:A") });

    // A's wait survives the denial and completes once B releases.
    assert!(!waiter.is_finished());
    locks.release(&f2, &LockOwner::new("nlm:B"), Range::new(0, 10)).await.unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), AcquireOutcome::Granted);
    fixture.core.shutdown().await.unwrap();
}
