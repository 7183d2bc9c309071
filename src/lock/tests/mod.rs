#![cfg(test)]

mod acquire;

pub(super) use std::sync::Arc;

pub(super) use crate::cancel::Token;
pub(super) use crate::config::CoreConfig;
pub(super) use crate::handle::{FileHandle, LockOwner, Range, ShareReservation};

pub(super) use super::store::{LockStore, MemoryLockStore};
pub(super) use super::{AcquireOutcome, LockManager, LockRequest, LockType};

pub(super) fn handle(name: &str) -> FileHandle {
    FileHandle::share("export", name.bytes().map(u64::from).sum())
}

pub(super) fn request(
    owner: &str,
    file: &FileHandle,
    lock_type: LockType,
    range: Range,
) -> LockRequest {
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

pub(super) async fn manager() -> Arc<LockManager> {
    manager_with(Arc::new(MemoryLockStore::new()), CoreConfig::default()).await
}

pub(super) async fn manager_with(
    store: Arc<dyn LockStore>,
    config: CoreConfig,
) -> Arc<LockManager> {
    let (manager, _prior) = LockManager::new(store, config).await.expect("manager builds");
    manager
}

pub(super) async fn grant(manager: &LockManager, req: LockRequest) {
    let outcome = manager.acquire(req, false, &Token::none()).await.expect("acquire runs");
    assert_eq!(outcome, AcquireOutcome::Granted);
}
