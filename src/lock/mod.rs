//! Protocol-agnostic byte-range lock manager.
//!
//! Every protocol adapter (NLM, NFSv4, SMB) funnels its locking through
//! this one manager, so cross-protocol conflicts are detected by owner
//! equality alone: adapters stamp a protocol discriminator into the opaque
//! [`LockOwner`] string and the manager never parses it.
//!
//! The manager keeps its whole in-memory state behind a single
//! reader-writer lock. The client, owner and per-file tables are
//! interdependent, and one coarse lock keeps their invariants without any
//! lock-ordering discipline; the hot paths (conflict check, grant) hold it
//! only for short critical sections.

pub mod conn;
pub(crate) mod grace;
pub mod store;
mod wfg;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cancel::Token;
use crate::config::CoreConfig;
use crate::error::{ConflictInfo, Error, Result};
use crate::handle::{FileHandle, LockOwner, Range, ShareReservation};

use conn::{ConnectionRegistry, DisconnectAction, OnDisconnect};
use grace::GraceState;
use store::{LockStore, PersistedLock};
use wfg::WaitForGraph;

/// Byte-range lock type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

/// A granted lock as tracked in memory.
#[derive(Debug, Clone)]
pub struct EnhancedLock {
    pub id: u64,
    pub owner: LockOwner,
    pub lock_type: LockType,
    pub range: Range,
    pub file: FileHandle,
    pub client_id: String,
    pub reservation: ShareReservation,
    pub acquired_at: SystemTime,
    pub server_epoch: u64,
}

impl EnhancedLock {
    fn persisted(&self) -> PersistedLock {
        PersistedLock {
            id: self.id,
            file: self.file.clone(),
            owner: self.owner.clone(),
            client_id: self.client_id.clone(),
            lock_type: self.lock_type,
            range: self.range,
            acquired_at: self.acquired_at,
            server_epoch: self.server_epoch,
        }
    }
}

/// Arguments to [`LockManager::acquire`].
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub file: FileHandle,
    pub owner: LockOwner,
    pub client_id: String,
    pub lock_type: LockType,
    pub range: Range,
    pub reservation: ShareReservation,
    /// True when re-establishing a lock persisted by a previous server
    /// instance; only honored during the grace period.
    pub reclaim: bool,
}

/// Result of an acquire or upgrade attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted,
    /// A conflicting lock exists; carries its description.
    Denied(ConflictInfo),
    /// Blocking would have closed a cycle in the wait-for graph. The
    /// rejected request names the owner it would have waited on.
    Deadlock { would_wait_on: LockOwner },
    /// The server is in its grace period.
    GracePeriod { remaining: Duration },
    /// A lock-count cap was exceeded.
    LimitExceeded,
    /// The caller's cancellation token fired while blocked.
    Cancelled,
}

/// Operation classes for grace-period gating.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockOperation {
    Acquire,
    Release,
    Test,
    Reclaim,
}

/// The grace-period gate every lock operation consults: while the period
/// is active, only reclaim, test and release may proceed.
fn grace_allows(grace: &GraceState, op: LockOperation) -> bool {
    !grace.is_active() || !matches!(op, LockOperation::Acquire)
}

/// Per-file lock table.
///
/// Lookup is a linear scan; production profiling has not shown interval
/// trees to win, so the representation is kept behind this type where it
/// can be swapped without touching the manager.
#[derive(Default)]
struct FileLocks {
    locks: Vec<EnhancedLock>,
}

impl FileLocks {
    fn conflicting(
        &self,
        owner: &LockOwner,
        lock_type: LockType,
        reservation: ShareReservation,
        range: &Range,
    ) -> Vec<&EnhancedLock> {
        self.locks.iter().filter(|l| conflicts(l, owner, lock_type, reservation, range)).collect()
    }

    fn of_owner<'a>(&'a self, owner: &'a LockOwner) -> impl Iterator<Item = &'a EnhancedLock> {
        self.locks.iter().filter(move |l| &l.owner == owner)
    }
}

/// Conflict rule: overlapping ranges of distinct owners conflict when
/// either side is exclusive, or when a share reservation denies the other
/// side's access class. Same-owner locks never conflict.
fn conflicts(
    existing: &EnhancedLock,
    owner: &LockOwner,
    lock_type: LockType,
    reservation: ShareReservation,
    range: &Range,
) -> bool {
    if &existing.owner == owner || !existing.range.overlaps(range) {
        return false;
    }
    if existing.lock_type == LockType::Exclusive || lock_type == LockType::Exclusive {
        return true;
    }
    // Both shared: only a deny-read reservation can still refuse.
    existing.reservation.deny_read || reservation.deny_read
}

struct Waiter {
    owner: LockOwner,
    notify: Arc<Notify>,
}

struct LockState {
    files: HashMap<FileHandle, FileLocks>,
    client_counts: HashMap<String, usize>,
    total: usize,
    wfg: WaitForGraph,
    grace: GraceState,
    waiters: HashMap<FileHandle, Vec<Waiter>>,
    /// Locks persisted by a previous server instance, eligible for reclaim.
    prior_locks: Vec<PersistedLock>,
    next_lock_id: u64,
    /// Set when a store failure occurred in strict mode; every subsequent
    /// lock operation fails until restart.
    halted: bool,
}

/// The process-wide lock manager.
pub struct LockManager {
    store: Arc<dyn LockStore>,
    config: CoreConfig,
    epoch: u64,
    state: RwLock<LockState>,
    connections: ConnectionRegistry,
    grace_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Builds the manager, bumping the persisted server epoch and loading
    /// prior-epoch locks as reclaim candidates.
    ///
    /// Returns the manager and the client ids that held locks before the
    /// restart; the caller decides whether to enter a grace period for
    /// them.
    pub async fn new(
        store: Arc<dyn LockStore>,
        config: CoreConfig,
    ) -> Result<(Arc<Self>, Vec<String>)> {
        let epoch = store.increment_server_epoch().await?;
        let mut prior_locks = Vec::new();
        for client in store.list_clients().await? {
            for lock in store.list_by_client(&client.client_id).await? {
                if lock.server_epoch < epoch {
                    prior_locks.push(lock);
                }
            }
        }
        let expected: Vec<String> = {
            let mut ids: Vec<String> =
                prior_locks.iter().map(|l| l.client_id.clone()).collect();
            ids.sort();
            ids.dedup();
            ids
        };
        debug!(epoch, prior = prior_locks.len(), "lock manager recovered");
        let manager = Arc::new(LockManager {
            store,
            connections: ConnectionRegistry::new(config.max_connections_per_adapter),
            config,
            epoch,
            state: RwLock::new(LockState {
                files: HashMap::new(),
                client_counts: HashMap::new(),
                total: 0,
                wfg: WaitForGraph::new(),
                grace: GraceState::new(),
                waiters: HashMap::new(),
                prior_locks,
                next_lock_id: 1,
                halted: false,
            }),
            grace_timer: std::sync::Mutex::new(None),
        });
        Ok((manager, expected))
    }

    /// Current server epoch (monotonic across restarts).
    pub fn server_epoch(&self) -> u64 {
        self.epoch
    }

    // --- acquire ---

    /// Attempts to take the requested lock.
    ///
    /// With `blocking`, a conflicting request waits until grant, server
    /// timeout, deadlock detection or cancellation. The manager never
    /// retries persist failures; in strict mode they halt lock service.
    pub async fn acquire(
        &self,
        request: LockRequest,
        blocking: bool,
        token: &Token,
    ) -> Result<AcquireOutcome> {
        if request.file.is_pseudo() {
            return Err(Error::InvalidHandle);
        }
        loop {
            let (notify, conflict) = {
                let mut st = self.state.write().await;
                match self.try_acquire(&mut st, &request).await? {
                    Attempt::Done(outcome) => return Ok(outcome),
                    Attempt::Conflict(conflict) if !blocking => {
                        return Ok(AcquireOutcome::Denied(conflict));
                    }
                    Attempt::Conflict(conflict) => {
                        let holders: Vec<LockOwner> = st
                            .files
                            .get(&request.file)
                            .map(|fl| {
                                fl.conflicting(
                                    &request.owner,
                                    request.lock_type,
                                    request.reservation,
                                    &request.range,
                                )
                                .iter()
                                .map(|l| l.owner.clone())
                                .collect()
                            })
                            .unwrap_or_default();
                        if let Some(holder) =
                            st.wfg.would_deadlock(&request.owner, &holders)
                        {
                            debug!(owner = %request.owner, holder = %holder, "deadlock denied");
                            return Ok(AcquireOutcome::Deadlock { would_wait_on: holder });
                        }
                        st.wfg.set_waiting(&request.owner, holders);
                        let notify = Arc::new(Notify::new());
                        let waiters = st.waiters.entry(request.file.clone()).or_default();
                        waiters.retain(|w| w.owner != request.owner);
                        waiters
                            .push(Waiter { owner: request.owner.clone(), notify: notify.clone() });
                        (notify, conflict)
                    }
                }
            };

            tokio::select! {
                _ = notify.notified() => continue,
                _ = tokio::time::sleep(self.config.lock_wait_timeout()) => {
                    self.abandon_wait(&request).await;
                    return Ok(AcquireOutcome::Denied(conflict));
                }
                _ = token.cancelled() => {
                    self.abandon_wait(&request).await;
                    return Ok(AcquireOutcome::Cancelled);
                }
            }
        }
    }

    async fn abandon_wait(&self, request: &LockRequest) {
        let mut st = self.state.write().await;
        st.wfg.remove_waiter(&request.owner);
        if let Some(waiters) = st.waiters.get_mut(&request.file) {
            waiters.retain(|w| w.owner != request.owner);
        }
    }

    /// One grant attempt under the write lock.
    async fn try_acquire(&self, st: &mut LockState, request: &LockRequest) -> Result<Attempt> {
        if st.halted {
            return Err(Error::IOError);
        }

        if request.reclaim {
            return self.try_reclaim(st, request).await;
        }
        if !grace_allows(&st.grace, LockOperation::Acquire) {
            return Ok(Attempt::Done(AcquireOutcome::GracePeriod {
                remaining: st.grace.remaining(),
            }));
        }

        let file_count = st.files.get(&request.file).map(|fl| fl.locks.len()).unwrap_or(0);
        let client_count = st.client_counts.get(&request.client_id).copied().unwrap_or(0);
        if file_count >= self.config.max_locks_per_file
            || client_count >= self.config.max_locks_per_client
            || st.total >= self.config.max_locks_total
        {
            warn!(client = %request.client_id, "lock limit exceeded");
            return Ok(Attempt::Done(AcquireOutcome::LimitExceeded));
        }

        if let Some(existing) = st.files.get(&request.file) {
            if let Some(conflict) = existing
                .conflicting(&request.owner, request.lock_type, request.reservation, &request.range)
                .first()
            {
                return Ok(Attempt::Conflict(ConflictInfo {
                    owner: conflict.owner.clone(),
                    range: conflict.range,
                    exclusive: conflict.lock_type == LockType::Exclusive,
                }));
            }
        }

        self.grant(st, request).await?;
        Ok(Attempt::Done(AcquireOutcome::Granted))
    }

    async fn try_reclaim(&self, st: &mut LockState, request: &LockRequest) -> Result<Attempt> {
        if !st.grace.is_active() {
            return Err(Error::NoGrace);
        }
        let matched = st.prior_locks.iter().position(|p| {
            p.owner == request.owner
                && p.file == request.file
                && p.range == request.range
                && p.lock_type == request.lock_type
        });
        let Some(index) = matched else {
            warn!(owner = %request.owner, "reclaim does not match any persisted lock");
            return Err(Error::InvalidArgument);
        };
        let prior = st.prior_locks.remove(index);
        // The reclaimed lock is re-persisted under the current epoch; the
        // old record is superseded.
        self.store.delete(prior.id).await.ok();
        self.grant(st, request).await?;
        if st.grace.mark_reclaimed(&request.client_id) {
            self.finish_grace(st).await;
        }
        Ok(Attempt::Done(AcquireOutcome::Granted))
    }

    /// Persists then inserts the lock, merging with the owner's existing
    /// locks: same-type overlapping or abutting ranges coalesce into one;
    /// a different-type overlap is split around the new range (the newer
    /// lock wins on the overlap).
    async fn grant(&self, st: &mut LockState, request: &LockRequest) -> Result<()> {
        let file_locks = st.files.entry(request.file.clone()).or_default();

        let mut merged = request.range;
        let mut removed: Vec<EnhancedLock> = Vec::new();
        let mut residuals: Vec<(LockType, Range)> = Vec::new();

        // Coalesce same-type locks to a fixpoint: each merge can extend
        // the range into contact with another lock.
        loop {
            let position = file_locks.locks.iter().position(|l| {
                l.owner == request.owner
                    && l.lock_type == request.lock_type
                    && (l.range.overlaps(&merged) || abuts(&l.range, &merged))
            });
            match position {
                Some(i) => {
                    let lock = file_locks.locks.remove(i);
                    merged = merged.merge(&lock.range);
                    removed.push(lock);
                }
                None => break,
            }
        }
        // Split different-type locks of the same owner around the final range.
        let mut i = 0;
        while i < file_locks.locks.len() {
            let lock = &file_locks.locks[i];
            if lock.owner == request.owner && lock.range.overlaps(&merged) {
                let lock = file_locks.locks.remove(i);
                for rest in lock.range.subtract(&merged) {
                    residuals.push((lock.lock_type, rest));
                }
                removed.push(lock);
            } else {
                i += 1;
            }
        }

        let mut added: Vec<EnhancedLock> = Vec::new();
        let now = SystemTime::now();
        for (lock_type, range) in
            residuals.into_iter().chain(std::iter::once((request.lock_type, merged)))
        {
            let id = st.next_lock_id;
            st.next_lock_id += 1;
            added.push(EnhancedLock {
                id,
                owner: request.owner.clone(),
                lock_type,
                range,
                file: request.file.clone(),
                client_id: request.client_id.clone(),
                reservation: request.reservation,
                acquired_at: now,
                server_epoch: self.epoch,
            });
        }

        // Store first: a failed put leaves the in-memory table untouched
        // apart from the removals, which are restored below on failure.
        let mut persist_failed = None;
        for lock in &removed {
            if let Err(err) = self.store.delete(lock.id).await {
                persist_failed = Some(err);
                break;
            }
        }
        if persist_failed.is_none() {
            for lock in &added {
                if let Err(err) = self.store.put(lock.persisted()).await {
                    persist_failed = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = persist_failed {
            let file_locks = st.files.entry(request.file.clone()).or_default();
            file_locks.locks.extend(removed);
            if self.config.strict_persistence {
                error!(%err, "lock store failure, halting lock operations");
                st.halted = true;
            }
            return Err(err);
        }

        let delta_added = added.len();
        let delta_removed = removed.len();
        let file_locks = st.files.entry(request.file.clone()).or_default();
        file_locks.locks.extend(added);
        let count = st.client_counts.entry(request.client_id.clone()).or_insert(0);
        *count = count.saturating_sub(delta_removed) + delta_added;
        st.total = st.total.saturating_sub(delta_removed) + delta_added;

        // The grantee is no longer waiting on anyone.
        st.wfg.remove_waiter(&request.owner);
        Ok(())
    }

    // --- release ---

    /// Releases the owner's locks over `range`, splitting partial overlaps
    /// per POSIX: releasing the middle of a lock leaves two residuals.
    pub async fn release(
        &self,
        file: &FileHandle,
        owner: &LockOwner,
        range: Range,
    ) -> Result<()> {
        let mut st = self.state.write().await;
        if st.halted {
            return Err(Error::IOError);
        }
        if !grace_allows(&st.grace, LockOperation::Release) {
            return Err(Error::GracePeriod { remaining: st.grace.remaining() });
        }
        let Some(file_locks) = st.files.get_mut(file) else {
            return Ok(());
        };

        let mut removed: Vec<EnhancedLock> = Vec::new();
        let mut i = 0;
        while i < file_locks.locks.len() {
            if file_locks.locks[i].owner == *owner && file_locks.locks[i].range.overlaps(&range) {
                removed.push(file_locks.locks.remove(i));
            } else {
                i += 1;
            }
        }
        if removed.is_empty() {
            return Ok(());
        }

        let mut added: Vec<EnhancedLock> = Vec::new();
        for lock in &removed {
            for residual in lock.range.subtract(&range) {
                let id = st.next_lock_id;
                st.next_lock_id += 1;
                added.push(EnhancedLock { id, range: residual, ..lock.clone() });
            }
        }

        let mut persist_failed = None;
        for lock in &removed {
            if let Err(err) = self.store.delete(lock.id).await {
                persist_failed = Some(err);
                break;
            }
        }
        if persist_failed.is_none() {
            for lock in &added {
                if let Err(err) = self.store.put(lock.persisted()).await {
                    persist_failed = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = persist_failed {
            let file_locks = st.files.entry(file.clone()).or_default();
            file_locks.locks.extend(removed);
            if self.config.strict_persistence {
                error!(%err, "lock store failure, halting lock operations");
                st.halted = true;
            }
            return Err(err);
        }

        let client_id = removed[0].client_id.clone();
        let delta_added = added.len();
        let delta_removed = removed.len();
        let file_locks = st.files.entry(file.clone()).or_default();
        file_locks.locks.extend(added);
        if file_locks.locks.is_empty() {
            st.files.remove(file);
        }
        let count = st.client_counts.entry(client_id).or_insert(0);
        *count = count.saturating_sub(delta_removed) + delta_added;
        st.total = st.total.saturating_sub(delta_removed) + delta_added;

        self.after_release(&mut st, owner, file);
        Ok(())
    }

    /// Post-release bookkeeping: drop stale wait-for edges when the owner
    /// holds nothing anymore, and wake waiters on the file so they retry.
    fn after_release(&self, st: &mut LockState, owner: &LockOwner, file: &FileHandle) {
        let still_holds = st.files.values().any(|fl| fl.of_owner(owner).next().is_some());
        if !still_holds {
            st.wfg.remove_owner(owner);
        }
        if let Some(waiters) = st.waiters.get(file) {
            for waiter in waiters {
                waiter.notify.notify_one();
            }
        }
    }

    // --- test / upgrade ---

    /// Reports the first lock that would conflict with the described
    /// request, without acquiring anything. Permitted during grace.
    pub async fn test(
        &self,
        file: &FileHandle,
        owner: &LockOwner,
        lock_type: LockType,
        range: Range,
    ) -> Result<Option<ConflictInfo>> {
        let st = self.state.read().await;
        if st.halted {
            return Err(Error::IOError);
        }
        if !grace_allows(&st.grace, LockOperation::Test) {
            return Err(Error::GracePeriod { remaining: st.grace.remaining() });
        }
        Ok(st.files.get(file).and_then(|fl| {
            fl.conflicting(owner, lock_type, ShareReservation::NONE, &range).first().map(|l| {
                ConflictInfo {
                    owner: l.owner.clone(),
                    range: l.range,
                    exclusive: l.lock_type == LockType::Exclusive,
                }
            })
        }))
    }

    /// Atomically upgrades the owner's shared lock over `range` to
    /// exclusive. Succeeds only when the owner holds the sole shared lock
    /// intersecting the range.
    pub async fn upgrade(
        &self,
        file: &FileHandle,
        owner: &LockOwner,
        client_id: &str,
        range: Range,
    ) -> Result<AcquireOutcome> {
        let mut st = self.state.write().await;
        if st.halted {
            return Err(Error::IOError);
        }
        if !grace_allows(&st.grace, LockOperation::Acquire) {
            return Ok(AcquireOutcome::GracePeriod { remaining: st.grace.remaining() });
        }
        if let Some(file_locks) = st.files.get(file) {
            if let Some(other) = file_locks
                .locks
                .iter()
                .find(|l| l.owner != *owner && l.range.overlaps(&range))
            {
                return Ok(AcquireOutcome::Denied(ConflictInfo {
                    owner: other.owner.clone(),
                    range: other.range,
                    exclusive: other.lock_type == LockType::Exclusive,
                }));
            }
        }
        let request = LockRequest {
            file: file.clone(),
            owner: owner.clone(),
            client_id: client_id.to_owned(),
            lock_type: LockType::Exclusive,
            range,
            reservation: ShareReservation::NONE,
            reclaim: false,
        };
        self.grant(&mut st, &request).await?;
        Ok(AcquireOutcome::Granted)
    }

    // --- listing ---

    pub async fn list_by_file(&self, file: &FileHandle) -> Vec<EnhancedLock> {
        let st = self.state.read().await;
        st.files.get(file).map(|fl| fl.locks.clone()).unwrap_or_default()
    }

    pub async fn list_by_owner(&self, owner: &LockOwner) -> Vec<EnhancedLock> {
        let st = self.state.read().await;
        st.files.values().flat_map(|fl| fl.of_owner(owner).cloned()).collect()
    }

    pub async fn list_by_client(&self, client_id: &str) -> Vec<EnhancedLock> {
        let st = self.state.read().await;
        st.files
            .values()
            .flat_map(|fl| fl.locks.iter().filter(|l| l.client_id == client_id).cloned())
            .collect()
    }

    // --- bulk release ---

    /// Releases every lock held by `owner` (NLM FREE_ALL, NSM restart
    /// notification).
    pub async fn release_all_for_owner(&self, owner: &LockOwner) -> Result<()> {
        let mut st = self.state.write().await;
        self.remove_matching(&mut st, |l| &l.owner == owner).await?;
        st.wfg.remove_owner(owner);
        self.notify_all(&st);
        Ok(())
    }

    /// Releases every lock held by `client_id` and forgets its persisted
    /// records.
    pub async fn release_all_for_client(&self, client_id: &str) -> Result<()> {
        let mut st = self.state.write().await;
        let owners: Vec<LockOwner> = st
            .files
            .values()
            .flat_map(|fl| fl.locks.iter())
            .filter(|l| l.client_id == client_id)
            .map(|l| l.owner.clone())
            .collect();
        self.remove_matching(&mut st, |l| l.client_id == client_id).await?;
        self.store.delete_by_client(client_id).await?;
        self.store.delete_client(client_id).await?;
        for owner in owners {
            st.wfg.remove_owner(&owner);
        }
        st.client_counts.remove(client_id);
        self.notify_all(&st);
        Ok(())
    }

    async fn remove_matching(
        &self,
        st: &mut LockState,
        predicate: impl Fn(&EnhancedLock) -> bool,
    ) -> Result<()> {
        let mut removed: Vec<EnhancedLock> = Vec::new();
        for fl in st.files.values_mut() {
            let mut i = 0;
            while i < fl.locks.len() {
                if predicate(&fl.locks[i]) {
                    removed.push(fl.locks.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        st.files.retain(|_, fl| !fl.locks.is_empty());
        for lock in &removed {
            self.store.delete(lock.id).await.ok();
            let count = st.client_counts.entry(lock.client_id.clone()).or_insert(0);
            *count = count.saturating_sub(1);
            st.total = st.total.saturating_sub(1);
        }
        Ok(())
    }

    fn notify_all(&self, st: &LockState) {
        for waiters in st.waiters.values() {
            for waiter in waiters {
                waiter.notify.notify_one();
            }
        }
    }

    // --- connection tracking ---

    /// Registers a client connection for an adapter. A zero TTL releases
    /// the client's locks immediately on disconnect; a positive TTL defers
    /// cleanup so the client can reconnect (SMB durable handles).
    pub fn register_client(
        &self,
        adapter: &str,
        client_id: &str,
        ttl: Duration,
        on_disconnect: Option<OnDisconnect>,
    ) -> Result<()> {
        self.connections.register(adapter, client_id, ttl, on_disconnect)
    }

    pub fn update_last_seen(&self, adapter: &str, client_id: &str) {
        self.connections.update_last_seen(adapter, client_id);
    }

    pub fn connection_count(&self, adapter: &str) -> usize {
        self.connections.connection_count(adapter)
    }

    /// Handles a client disconnect, releasing its locks now or after the
    /// registration TTL.
    pub async fn client_disconnected(self: &Arc<Self>, adapter: &str, client_id: &str) {
        match self.connections.disconnect(adapter, client_id) {
            DisconnectAction::Immediate(callback) => {
                if let Err(err) = self.release_all_for_client(client_id).await {
                    error!(%err, client_id, "disconnect cleanup failed");
                }
                if let Some(callback) = callback {
                    callback();
                }
            }
            DisconnectAction::Deferred { ttl, generation } => {
                let manager = Arc::downgrade(self);
                let adapter = adapter.to_owned();
                let client_id = client_id.to_owned();
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    let Some(manager) = manager.upgrade() else { return };
                    if let Some(callback) =
                        manager.connections.reap(&adapter, &client_id, generation)
                    {
                        if let Err(err) = manager.release_all_for_client(&client_id).await {
                            error!(%err, client_id, "deferred disconnect cleanup failed");
                        }
                        if let Some(callback) = callback {
                            callback();
                        }
                    }
                });
            }
            DisconnectAction::Unknown => {}
        }
    }

    /// Explicitly unregisters a client and releases its locks.
    pub async fn unregister_client(&self, adapter: &str, client_id: &str) -> Result<()> {
        self.connections.unregister(adapter, client_id);
        self.release_all_for_client(client_id).await
    }

    // --- grace period ---

    /// Enters the grace period. Non-reclaim, non-test operations are
    /// rejected until every expected client reclaims or `duration` passes.
    pub async fn enter_grace(
        self: &Arc<Self>,
        expected_clients: impl IntoIterator<Item = String>,
        duration: Duration,
    ) {
        {
            let mut st = self.state.write().await;
            st.grace.enter(expected_clients.into_iter().collect(), duration);
        }
        let manager = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let Some(manager) = manager.upgrade() else { return };
            let mut st = manager.state.write().await;
            if st.grace.is_active() && st.grace.remaining().is_zero() {
                debug!("grace period expired");
                manager.finish_grace(&mut st).await;
            }
        });
        if let Some(old) = self.grace_timer.lock().expect("grace timer poisoned").replace(timer) {
            old.abort();
        }
    }

    /// Records that `client_id` finished reclaiming; exits grace early
    /// when every expected client has done so.
    pub async fn mark_reclaimed(&self, client_id: &str) {
        let mut st = self.state.write().await;
        if st.grace.mark_reclaimed(client_id) {
            self.finish_grace(&mut st).await;
        }
    }

    pub async fn in_grace(&self) -> bool {
        self.state.read().await.grace.is_active()
    }

    /// Queries the same grace-period gate the operations themselves run
    /// through: only reclaim, test and release are allowed while the
    /// period is active. Adapters use this to answer cheaply without
    /// composing a full request.
    pub async fn is_allowed(&self, op: LockOperation) -> bool {
        let st = self.state.read().await;
        grace_allows(&st.grace, op)
    }

    /// Ends the grace period: persisted locks that were not reclaimed are
    /// dropped from the store and waiters are woken.
    async fn finish_grace(&self, st: &mut LockState) {
        for prior in std::mem::take(&mut st.prior_locks) {
            warn!(owner = %prior.owner, "dropping unreclaimed lock from previous epoch");
            self.store.delete(prior.id).await.ok();
        }
        st.grace.exit();
        self.notify_all(st);
    }

    /// Stops background timers. Called once at shutdown.
    pub fn shutdown(&self) {
        if let Some(timer) = self.grace_timer.lock().expect("grace timer poisoned").take() {
            timer.abort();
        }
    }
}

enum Attempt {
    Done(AcquireOutcome),
    Conflict(ConflictInfo),
}

/// True when the ranges touch end-to-start without overlapping.
fn abuts(a: &Range, b: &Range) -> bool {
    (!a.is_to_eof() && a.end() == b.offset) || (!b.is_to_eof() && b.end() == a.offset)
}
