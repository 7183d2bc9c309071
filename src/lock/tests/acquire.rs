use super::*;
use crate::error::Error;

#[tokio::test]
async fn shared_locks_coexist_across_owners() {
    let manager = manager().await;
    let file = handle("coexist");
    grant(&manager, request("nlm:a", &file, LockType::Shared, Range::new(0, 100))).await;
    grant(&manager, request("smb:s1:7", &file, LockType::Shared, Range::new(50, 100))).await;
    assert_eq!(manager.list_by_file(&file).await.len(), 2);
}

#[tokio::test]
async fn exclusive_conflicts_with_any_other_owner() {
    let manager = manager().await;
    let file = handle("excl");
    grant(&manager, request("nlm:a", &file, LockType::Exclusive, Range::new(0, 100))).await;

    let denied = manager
        .acquire(request("nlm:b", &file, LockType::Shared, Range::new(10, 1)), false, &Token::none())
        .await
        .unwrap();
    match denied {
        AcquireOutcome::Denied(conflict) => {
            assert_eq!(conflict.owner, LockOwner::new("nlm:a"));
            assert!(conflict.exclusive);
        }
        other => panic!("expected denial, got {other:?}"),
    }
}

#[tokio::test]
async fn same_owner_never_conflicts() {
    let manager = manager().await;
    let file = handle("self");
    grant(&manager, request("nlm:a", &file, LockType::Exclusive, Range::new(0, 100))).await;
    // Overlapping exclusive from the same owner merges rather than denies.
    grant(&manager, request("nlm:a", &file, LockType::Exclusive, Range::new(50, 100))).await;

    let locks = manager.list_by_file(&file).await;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].range, Range::new(0, 150));
}

#[tokio::test]
async fn non_overlapping_exclusives_coexist() {
    let manager = manager().await;
    let file = handle("disjoint");
    grant(&manager, request("nlm:a", &file, LockType::Exclusive, Range::new(0, 10))).await;
    grant(&manager, request("nlm:b", &file, LockType::Exclusive, Range::new(10, 10))).await;
    assert_eq!(manager.list_by_file(&file).await.len(), 2);
}

#[tokio::test]
async fn release_middle_splits_into_two_residuals() {
    let manager = manager().await;
    let file = handle("split");
    grant(&manager, request("nlm:A", &file, LockType::Exclusive, Range::new(0, 100))).await;

    manager.release(&file, &LockOwner::new("nlm:A"), Range::new(30, 20)).await.unwrap();

    let mut ranges: Vec<Range> =
        manager.list_by_owner(&LockOwner::new("nlm:A")).await.iter().map(|l| l.range).collect();
    ranges.sort_by_key(|r| r.offset);
    assert_eq!(ranges, vec![Range::new(0, 30), Range::new(50, 50)]);

    // The gap is free for everyone else.
    let conflict = manager
        .test(&file, &LockOwner::new("nlm:B"), LockType::Exclusive, Range::new(35, 5))
        .await
        .unwrap();
    assert!(conflict.is_none());
}

#[tokio::test]
async fn release_head_tail_and_whole() {
    let manager = manager().await;
    let file = handle("edges");
    let owner = LockOwner::new("nlm:a");
    grant(&manager, request("nlm:a", &file, LockType::Exclusive, Range::new(10, 40))).await;

    manager.release(&file, &owner, Range::new(0, 20)).await.unwrap();
    assert_eq!(manager.list_by_owner(&owner).await[0].range, Range::new(20, 30));

    manager.release(&file, &owner, Range::new(40, 100)).await.unwrap();
    assert_eq!(manager.list_by_owner(&owner).await[0].range, Range::new(20, 20));

    manager.release(&file, &owner, Range::new(0, 1000)).await.unwrap();
    assert!(manager.list_by_owner(&owner).await.is_empty());
}

#[tokio::test]
async fn to_eof_lock_conflicts_far_out() {
    let manager = manager().await;
    let file = handle("eof");
    grant(&manager, request("nlm:a", &file, LockType::Exclusive, Range::new(100, 0))).await;

    let conflict = manager
        .test(&file, &LockOwner::new("nlm:b"), LockType::Shared, Range::new(1 << 40, 1))
        .await
        .unwrap();
    assert!(conflict.is_some());
    let free = manager
        .test(&file, &LockOwner::new("nlm:b"), LockType::Shared, Range::new(0, 100))
        .await
        .unwrap();
    assert!(free.is_none());
}

#[tokio::test]
async fn upgrade_succeeds_only_for_sole_holder() {
    let manager = manager().await;
    let file = handle("upgrade");
    grant(&manager, request("nlm:a", &file, LockType::Shared, Range::new(0, 100))).await;

    let outcome = manager
        .upgrade(&file, &LockOwner::new("nlm:a"), "nlm:a", Range::new(0, 100))
        .await
        .unwrap();
    assert_eq!(outcome, AcquireOutcome::Granted);
    assert_eq!(manager.list_by_file(&file).await[0].lock_type, LockType::Exclusive);

    // A second shared holder blocks the upgrade.
    let file2 = handle("upgrade2");
    grant(&manager, request("nlm:a", &file2, LockType::Shared, Range::new(0, 100))).await;
    grant(&manager, request("nlm:b", &file2, LockType::Shared, Range::new(0, 100))).await;
    let outcome = manager
        .upgrade(&file2, &LockOwner::new("nlm:a"), "nlm:a", Range::new(0, 100))
        .await
        .unwrap();
    assert!(matches!(outcome, AcquireOutcome::Denied(_)));
}

#[tokio::test]
async fn per_file_limit_is_enforced() {
    let config = CoreConfig { max_locks_per_file: 2, ..CoreConfig::default() };
    let manager = manager_with(Arc::new(MemoryLockStore::new()), config).await;
    let file = handle("limits");
    grant(&manager, request("nlm:a", &file, LockType::Shared, Range::new(0, 1))).await;
    grant(&manager, request("nlm:b", &file, LockType::Shared, Range::new(1, 1))).await;

    let outcome = manager
        .acquire(request("nlm:c", &file, LockType::Shared, Range::new(2, 1)), false, &Token::none())
        .await
        .unwrap();
    assert_eq!(outcome, AcquireOutcome::LimitExceeded);
}

#[tokio::test]
async fn pseudo_handles_cannot_be_locked() {
    let manager = manager().await;
    let pseudo = FileHandle::pseudo("/export");
    let err = manager
        .acquire(
            LockRequest {
                file: pseudo,
                owner: LockOwner::new("nlm:a"),
                client_id: "nlm:a".into(),
                lock_type: LockType::Shared,
                range: Range::new(0, 1),
                reservation: ShareReservation::NONE,
                reclaim: false,
            },
            false,
            &Token::none(),
        )
        .await;
    assert_eq!(err, Err(Error::InvalidHandle));
}

#[tokio::test]
async fn deny_read_reservation_refuses_shared_readers() {
    let manager = manager().await;
    let file = handle("deny");
    let mut req = request("smb:s1:4", &file, LockType::Shared, Range::new(0, 100));
    req.reservation = ShareReservation { deny_read: true, deny_write: false };
    grant(&manager, req).await;

    let outcome = manager
        .acquire(
            request("nlm:other", &file, LockType::Shared, Range::new(0, 10)),
            false,
            &Token::none(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, AcquireOutcome::Denied(_)));
}
