#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoreConfig;
use crate::error::Error;
use crate::handle::FileHandle;
use crate::lock::store::{LockStore, MemoryLockStore};
use crate::lock::LockManager;

use super::*;

async fn state_manager() -> Arc<StateManager> {
    state_manager_with(CoreConfig::default(), Arc::new(MemoryLockStore::new())).await
}

async fn state_manager_with(
    config: CoreConfig,
    store: Arc<dyn LockStore>,
) -> Arc<StateManager> {
    let (lock_manager, _) =
        LockManager::new(store.clone(), config.clone()).await.expect("lock manager");
    StateManager::new(config, lock_manager, store).await.expect("state manager")
}

async fn confirmed_client(manager: &Arc<StateManager>, name: &str) -> u64 {
    let (client_id, confirm) = manager
        .set_client_id(name.as_bytes().to_vec(), *b"verifier", CallbackInfo::default(), "addr".into())
        .await
        .unwrap();
    manager.set_client_id_confirm(client_id, confirm).await.unwrap();
    client_id
}

fn file(name: &str) -> FileHandle {
    FileHandle::share("export", name.bytes().map(u64::from).sum())
}

#[tokio::test]
async fn setclientid_five_cases() {
    let manager = state_manager().await;

    // Case 1: fresh registration.
    let (k1, cv1) = manager
        .set_client_id(b"c1".to_vec(), *b"verif-v1", CallbackInfo::default(), "a1".into())
        .await
        .unwrap();
    manager.set_client_id_confirm(k1, cv1).await.unwrap();

    // Case 5: same identity, callback update reuses the client id with a
    // fresh confirm verifier.
    let (k5, cv5) = manager
        .set_client_id(b"c1".to_vec(), *b"verif-v1", CallbackInfo::default(), "a1".into())
        .await
        .unwrap();
    assert_eq!(k5, k1);
    assert_ne!(cv5, cv1);

    // Case 3: new verifier means the client rebooted; a new id is
    // assigned and confirming it evicts the old record.
    let (k2, cv2) = manager
        .set_client_id(b"c1".to_vec(), *b"verif-v2", CallbackInfo::default(), "a1".into())
        .await
        .unwrap();
    assert_ne!(k2, k1);
    manager.set_client_id_confirm(k2, cv2).await.unwrap();
    assert!(manager.client(k1).await.is_none());
    assert!(manager.client(k2).await.is_some());
}

#[tokio::test]
async fn identical_setclientid_is_idempotent_on_client_id() {
    let manager = state_manager().await;
    let (first, _) = manager
        .set_client_id(b"c9".to_vec(), *b"same-ver", CallbackInfo::default(), "a".into())
        .await
        .unwrap();
    let (second, _) = manager
        .set_client_id(b"c9".to_vec(), *b"same-ver", CallbackInfo::default(), "a".into())
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn confirm_requires_exact_pair() {
    let manager = state_manager().await;
    let (client_id, confirm) = manager
        .set_client_id(b"c2".to_vec(), *b"verifier", CallbackInfo::default(), "a".into())
        .await
        .unwrap();
    let mut wrong = confirm;
    wrong[0] ^= 0xFF;
    assert_eq!(
        manager.set_client_id_confirm(client_id, wrong).await,
        Err(Error::StaleClientId)
    );
    assert_eq!(
        manager.set_client_id_confirm(client_id ^ 1, confirm).await,
        Err(Error::StaleClientId)
    );
    manager.set_client_id_confirm(client_id, confirm).await.unwrap();
}

#[tokio::test]
async fn client_ids_embed_the_boot_epoch() {
    let manager = state_manager().await;
    let client_id = confirmed_client(&manager, "epoch").await;
    // High 32 bits are the boot epoch, so ids never collide across
    // restarts.
    assert!(client_id >> 32 > 0);
}

#[tokio::test]
async fn stateid_validation_ladder() {
    let manager = state_manager().await;
    let client_id = confirmed_client(&manager, "ladder").await;
    manager.check_open_seqid(client_id, b"owner", 1).await.unwrap();
    let (stateid, _) = manager
        .open(client_id, b"owner", &file("f"), OPEN4_SHARE_ACCESS_READ, 0, OpenClaim::Null)
        .await
        .unwrap();

    // Specials bypass every check.
    manager.validate_stateid(&Stateid::ANONYMOUS).await.unwrap();
    manager.validate_stateid(&Stateid::READ_BYPASS).await.unwrap();

    // Valid stateid passes.
    manager.validate_stateid(&stateid).await.unwrap();

    // Unknown `other` of the right epoch.
    let mut unknown = stateid;
    unknown.other[11] ^= 0x7F;
    assert_eq!(manager.validate_stateid(&unknown).await, Err(Error::BadStateid));

    // Wrong epoch.
    let mut stale = stateid;
    stale.other[1] ^= 0xFF;
    assert_eq!(manager.validate_stateid(&stale).await, Err(Error::StaleStateid));

    // Old and future seqid.
    let bumped = manager.open_confirm(&stateid).await.unwrap();
    let mut old = stateid;
    old.seqid = bumped.seqid - 1;
    assert_eq!(manager.validate_stateid(&old).await, Err(Error::OldStateid));
    let mut future = bumped;
    future.seqid += 5;
    assert_eq!(manager.validate_stateid(&future).await, Err(Error::BadStateid));
    manager.validate_stateid(&bumped).await.unwrap();
}

#[tokio::test]
async fn open_seqid_three_way() {
    let manager = state_manager().await;
    let client_id = confirmed_client(&manager, "seqid").await;

    assert_eq!(
        manager.check_open_seqid(client_id, b"ow", 7).await.unwrap(),
        SeqidDisposition::Proceed
    );
    manager.record_result(client_id, b"ow", vec![0xAB, 0xCD]).await;

    // Successor proceeds.
    assert_eq!(
        manager.check_open_seqid(client_id, b"ow", 8).await.unwrap(),
        SeqidDisposition::Proceed
    );
    manager.record_result(client_id, b"ow", vec![0x11]).await;

    // Replay returns the cached bytes unchanged.
    assert_eq!(
        manager.check_open_seqid(client_id, b"ow", 8).await.unwrap(),
        SeqidDisposition::Replay(vec![0x11])
    );

    // Anything else is a bad seqid.
    assert_eq!(manager.check_open_seqid(client_id, b"ow", 3).await, Err(Error::BadSeqid));
    assert_eq!(manager.check_open_seqid(client_id, b"ow", 10).await, Err(Error::BadSeqid));
}

#[test]
fn seqid_wraps_to_one() {
    assert_eq!(next_seqid(5), 6);
    assert_eq!(next_seqid(u32::MAX), 1);
}

#[tokio::test]
async fn share_bits_accumulate_and_downgrade_checks_subset() {
    let manager = state_manager().await;
    let client_id = confirmed_client(&manager, "shares").await;
    manager.check_open_seqid(client_id, b"owner", 1).await.unwrap();
    let f = file("shared");

    let (first, _) = manager
        .open(client_id, b"owner", &f, OPEN4_SHARE_ACCESS_READ, 0, OpenClaim::Null)
        .await
        .unwrap();
    let (second, _) = manager
        .open(client_id, b"owner", &f, OPEN4_SHARE_ACCESS_WRITE, 0, OpenClaim::Null)
        .await
        .unwrap();
    // Same owner and file collapse onto one state with OR'd bits.
    assert_eq!(first.other, second.other);
    assert_eq!(second.seqid, first.seqid + 1);
    let state = manager.open_state(&second).await.unwrap();
    assert_eq!(state.share_access, OPEN4_SHARE_ACCESS_BOTH);

    // Downgrade to read is a subset; upgrading via downgrade is not.
    let downgraded =
        manager.open_downgrade(&second, OPEN4_SHARE_ACCESS_READ, 0).await.unwrap();
    assert_eq!(
        manager.open_downgrade(&downgraded, OPEN4_SHARE_ACCESS_BOTH, 0).await,
        Err(Error::InvalidArgument)
    );
}

#[tokio::test]
async fn deny_mode_blocks_other_owners() {
    let manager = state_manager().await;
    let client_id = confirmed_client(&manager, "deny").await;
    manager.check_open_seqid(client_id, b"o1", 1).await.unwrap();
    manager.check_open_seqid(client_id, b"o2", 1).await.unwrap();
    let f = file("denied");

    manager
        .open(client_id, b"o1", &f, OPEN4_SHARE_ACCESS_READ, OPEN4_SHARE_ACCESS_WRITE, OpenClaim::Null)
        .await
        .unwrap();
    let err = manager
        .open(client_id, b"o2", &f, OPEN4_SHARE_ACCESS_WRITE, 0, OpenClaim::Null)
        .await;
    assert_eq!(err, Err(Error::ShareDenied));
}

#[tokio::test]
async fn close_drops_state_and_owner() {
    let manager = state_manager().await;
    let client_id = confirmed_client(&manager, "close").await;
    manager.check_open_seqid(client_id, b"owner", 1).await.unwrap();
    let (stateid, _) = manager
        .open(client_id, b"owner", &file("f"), OPEN4_SHARE_ACCESS_READ, 0, OpenClaim::Null)
        .await
        .unwrap();
    let confirmed = manager.open_confirm(&stateid).await.unwrap();

    manager.close(&confirmed).await.unwrap();
    assert!(manager.open_state(&confirmed).await.is_none());
    // The owner had no other opens and was collected.
    assert!(manager.open_owner(client_id, b"owner").await.is_none());
}

#[tokio::test]
async fn lease_expiry_drops_everything() {
    let config = CoreConfig { lease_secs: 1, ..CoreConfig::default() };
    let manager = state_manager_with(config, Arc::new(MemoryLockStore::new())).await;
    let client_id = confirmed_client(&manager, "expire").await;
    manager.check_open_seqid(client_id, b"owner", 1).await.unwrap();
    let (stateid, _) = manager
        .open(client_id, b"owner", &file("f"), OPEN4_SHARE_ACCESS_READ, 0, OpenClaim::Null)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(manager.validate_stateid(&stateid).await, Err(Error::Expired));
    assert!(manager.client(client_id).await.is_none());
    assert!(manager.open_owner(client_id, b"owner").await.is_none());
    assert!(manager.open_state(&stateid).await.is_none());
    manager.shutdown();
}

#[tokio::test]
async fn validation_renews_the_lease() {
    let config = CoreConfig { lease_secs: 1, ..CoreConfig::default() };
    let manager = state_manager_with(config, Arc::new(MemoryLockStore::new())).await;
    let client_id = confirmed_client(&manager, "renewal").await;
    manager.check_open_seqid(client_id, b"owner", 1).await.unwrap();
    let (stateid, _) = manager
        .open(client_id, b"owner", &file("f"), OPEN4_SHARE_ACCESS_READ, 0, OpenClaim::Null)
        .await
        .unwrap();

    // Keep validating for longer than one lease period; each validation
    // renews, so the client must survive.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        manager.validate_stateid(&stateid).await.expect("lease renewed by validation");
    }
    assert!(manager.client(client_id).await.is_some());
    manager.shutdown();
}

#[tokio::test]
async fn grace_period_gates_claims() {
    let store = Arc::new(MemoryLockStore::new());
    // A prior client record puts the fresh manager into grace.
    store
        .put_client(crate::lock::store::PersistedClient {
            client_id: StateManager::persisted_client_key(b"c1"),
            verifier: b"verifier".to_vec(),
        })
        .await
        .unwrap();
    let manager = state_manager_with(CoreConfig::default(), store).await;
    assert!(manager.in_grace().await);

    let client_id = confirmed_client(&manager, "c1").await;
    manager.check_open_seqid(client_id, b"owner", 1).await.unwrap();

    // CLAIM_NULL is rejected during grace.
    let err = manager
        .open(client_id, b"owner", &file("f"), OPEN4_SHARE_ACCESS_READ, 0, OpenClaim::Null)
        .await;
    assert!(matches!(err, Err(Error::GracePeriod { .. })));

    // CLAIM_PREVIOUS from the expected client succeeds and, as the only
    // expected client, ends the grace period early.
    manager
        .open(client_id, b"owner", &file("f"), OPEN4_SHARE_ACCESS_READ, 0, OpenClaim::Previous)
        .await
        .unwrap();
    assert!(!manager.in_grace().await);

    // CLAIM_PREVIOUS outside grace is NO_GRACE.
    let err = manager
        .open(client_id, b"owner", &file("g"), OPEN4_SHARE_ACCESS_READ, 0, OpenClaim::Previous)
        .await;
    assert_eq!(err, Err(Error::NoGrace));
    manager.shutdown();
}

#[tokio::test]
async fn lock_states_follow_their_open() {
    let manager = state_manager().await;
    let client_id = confirmed_client(&manager, "locks").await;
    manager.check_open_seqid(client_id, b"owner", 1).await.unwrap();
    let (open_stateid, _) = manager
        .open(client_id, b"owner", &file("f"), OPEN4_SHARE_ACCESS_BOTH, 0, OpenClaim::Null)
        .await
        .unwrap();

    let lock1 = manager.lock_state(&open_stateid, b"proc-1").await.unwrap();
    assert_eq!(lock1.other[0], StateidType::Lock as u8);
    // Same lock owner returns the same state, bumped.
    let again = manager.lock_state(&open_stateid, b"proc-1").await.unwrap();
    assert_eq!(again.other, lock1.other);
    assert_eq!(again.seqid, lock1.seqid + 1);
    // A different lock owner gets a distinct stateid.
    let lock2 = manager.lock_state(&open_stateid, b"proc-2").await.unwrap();
    assert_ne!(lock2.other, lock1.other);

    manager.validate_stateid(&again).await.unwrap();
    manager.close(&open_stateid).await.unwrap();
    assert!(manager.lock_state_rec(&again).await.is_none());
}
