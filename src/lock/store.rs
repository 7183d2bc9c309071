//! Durable persistence for granted locks and reclaimable client records.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::handle::{FileHandle, LockOwner, Range};

use super::LockType;

/// Durable image of one granted lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedLock {
    /// Store-unique lock id, assigned by the manager.
    pub id: u64,
    pub file: FileHandle,
    pub owner: LockOwner,
    /// Protocol-agnostic client identifier the lock belongs to.
    pub client_id: String,
    pub lock_type: LockType,
    pub range: Range,
    pub acquired_at: SystemTime,
    /// Epoch of the server instance that granted the lock. Locks with an
    /// epoch older than the current one are reclaim candidates during the
    /// grace period and are not otherwise honored.
    pub server_epoch: u64,
}

/// Durable image of a protocol client, kept so a restarted server knows
/// which clients to expect during its grace period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedClient {
    pub client_id: String,
    /// Opaque verifier the protocol adapter associates with the client
    /// (NFSv4 stores the SETCLIENTID verifier here).
    pub verifier: Vec<u8>,
}

/// Storage interface the lock manager persists through.
///
/// The server epoch increments exactly once per process start; see
/// [`PersistedLock::server_epoch`].
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn put(&self, lock: PersistedLock) -> Result<()>;
    async fn get(&self, id: u64) -> Result<Option<PersistedLock>>;
    async fn delete(&self, id: u64) -> Result<()>;

    async fn list_by_file(&self, file: &FileHandle) -> Result<Vec<PersistedLock>>;
    async fn list_by_owner(&self, owner: &LockOwner) -> Result<Vec<PersistedLock>>;
    async fn list_by_client(&self, client_id: &str) -> Result<Vec<PersistedLock>>;

    async fn delete_by_client(&self, client_id: &str) -> Result<()>;
    async fn delete_by_file(&self, file: &FileHandle) -> Result<()>;

    async fn server_epoch(&self) -> Result<u64>;
    /// Bumps and returns the new epoch. Called once at process start.
    async fn increment_server_epoch(&self) -> Result<u64>;

    async fn put_client(&self, client: PersistedClient) -> Result<()>;
    async fn list_clients(&self) -> Result<Vec<PersistedClient>>;
    async fn delete_client(&self, client_id: &str) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    locks: HashMap<u64, PersistedLock>,
    clients: HashMap<String, PersistedClient>,
    epoch: u64,
}

/// In-process [`LockStore`]. The single-node default; also the test double.
///
/// The epoch survives as long as the store value itself does, which lets
/// tests simulate restarts by reusing one store across two managers.
#[derive(Default)]
pub struct MemoryLockStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("lock store poisoned")
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn put(&self, lock: PersistedLock) -> Result<()> {
        self.lock().locks.insert(lock.id, lock);
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<PersistedLock>> {
        Ok(self.lock().locks.get(&id).cloned())
    }

    async fn delete(&self, id: u64) -> Result<()> {
        self.lock().locks.remove(&id);
        Ok(())
    }

    async fn list_by_file(&self, file: &FileHandle) -> Result<Vec<PersistedLock>> {
        Ok(self.lock().locks.values().filter(|l| &l.file == file).cloned().collect())
    }

    async fn list_by_owner(&self, owner: &LockOwner) -> Result<Vec<PersistedLock>> {
        Ok(self.lock().locks.values().filter(|l| &l.owner == owner).cloned().collect())
    }

    async fn list_by_client(&self, client_id: &str) -> Result<Vec<PersistedLock>> {
        Ok(self.lock().locks.values().filter(|l| l.client_id == client_id).cloned().collect())
    }

    async fn delete_by_client(&self, client_id: &str) -> Result<()> {
        self.lock().locks.retain(|_, l| l.client_id != client_id);
        Ok(())
    }

    async fn delete_by_file(&self, file: &FileHandle) -> Result<()> {
        self.lock().locks.retain(|_, l| &l.file != file);
        Ok(())
    }

    async fn server_epoch(&self) -> Result<u64> {
        Ok(self.lock().epoch)
    }

    async fn increment_server_epoch(&self) -> Result<u64> {
        let mut inner = self.lock();
        inner.epoch += 1;
        Ok(inner.epoch)
    }

    async fn put_client(&self, client: PersistedClient) -> Result<()> {
        self.lock().clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn list_clients(&self) -> Result<Vec<PersistedClient>> {
        Ok(self.lock().clients.values().cloned().collect())
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        self.lock().clients.remove(client_id);
        Ok(())
    }
}

/// Wrapper store that fails every write after [`FailingLockStore::break_writes`].
/// Lets tests exercise strict-mode halting.
pub struct FailingLockStore {
    inner: MemoryLockStore,
    broken: std::sync::atomic::AtomicBool,
}

impl FailingLockStore {
    pub fn new() -> Self {
        FailingLockStore { inner: MemoryLockStore::new(), broken: Default::default() }
    }

    pub fn break_writes(&self) {
        self.broken.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
            Err(Error::IOError)
        } else {
            Ok(())
        }
    }
}

impl Default for FailingLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for FailingLockStore {
    async fn put(&self, lock: PersistedLock) -> Result<()> {
        self.check()?;
        self.inner.put(lock).await
    }

    async fn get(&self, id: u64) -> Result<Option<PersistedLock>> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: u64) -> Result<()> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn list_by_file(&self, file: &FileHandle) -> Result<Vec<PersistedLock>> {
        self.inner.list_by_file(file).await
    }

    async fn list_by_owner(&self, owner: &LockOwner) -> Result<Vec<PersistedLock>> {
        self.inner.list_by_owner(owner).await
    }

    async fn list_by_client(&self, client_id: &str) -> Result<Vec<PersistedLock>> {
        self.inner.list_by_client(client_id).await
    }

    async fn delete_by_client(&self, client_id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_by_client(client_id).await
    }

    async fn delete_by_file(&self, file: &FileHandle) -> Result<()> {
        self.check()?;
        self.inner.delete_by_file(file).await
    }

    async fn server_epoch(&self) -> Result<u64> {
        self.inner.server_epoch().await
    }

    async fn increment_server_epoch(&self) -> Result<u64> {
        self.inner.increment_server_epoch().await
    }

    async fn put_client(&self, client: PersistedClient) -> Result<()> {
        self.check()?;
        self.inner.put_client(client).await
    }

    async fn list_clients(&self) -> Result<Vec<PersistedClient>> {
        self.inner.list_clients().await
    }

    async fn delete_client(&self, client_id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_client(client_id).await
    }
}
