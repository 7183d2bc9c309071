//! NFSv4 client, open-owner and stateid lifecycle.
//!
//! One process-wide [`StateManager`] owns every table by value behind a
//! single reader-writer lock. Lease timers live in their own
//! [`lease::LeaseSet`] with a separate mutex, so a firing timer reaches
//! the cleanup path without ever holding the tables lock first.

mod lease;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::handle::{FileHandle, LockOwner};
use crate::lock::grace::GraceState;
use crate::lock::store::{LockStore, PersistedClient};
use crate::lock::LockManager;

use lease::LeaseSet;

/// Size of an NFSv4 verifier.
pub const NFS4_VERIFIER_SIZE: usize = 8;

/// Size of the stateid `other` field.
pub const NFS4_OTHER_SIZE: usize = 12;

pub type Verifier = [u8; NFS4_VERIFIER_SIZE];
pub type StateidOther = [u8; NFS4_OTHER_SIZE];

/// Share-access bits (RFC 7530 §16.16).
pub const OPEN4_SHARE_ACCESS_READ: u32 = 1;
pub const OPEN4_SHARE_ACCESS_WRITE: u32 = 2;
pub const OPEN4_SHARE_ACCESS_BOTH: u32 = 3;

/// 16-byte stateid handed to clients for granted state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Stateid {
    pub seqid: u32,
    pub other: StateidOther,
}

impl Stateid {
    /// The anonymous stateid (all zeros): I/O without an open.
    pub const ANONYMOUS: Stateid = Stateid { seqid: 0, other: [0; NFS4_OTHER_SIZE] };

    /// The read-bypass stateid (all ones): READ ignoring share-deny.
    pub const READ_BYPASS: Stateid =
        Stateid { seqid: u32::MAX, other: [0xFF; NFS4_OTHER_SIZE] };

    pub fn is_special(&self) -> bool {
        *self == Self::ANONYMOUS || *self == Self::READ_BYPASS
    }

    /// The `other` field as a lock-owner string for the lock manager.
    pub fn lock_owner(&self) -> LockOwner {
        let mut hex = String::with_capacity(5 + NFS4_OTHER_SIZE * 2);
        hex.push_str("nfs4:");
        for byte in self.other {
            hex.push_str(&format!("{byte:02x}"));
        }
        LockOwner(hex)
    }
}

/// Type tag embedded as the first byte of a stateid's `other` field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum StateidType {
    Open = 0x01,
    Lock = 0x02,
    Delegation = 0x03,
}

/// Client callback location from SETCLIENTID.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallbackInfo {
    pub program: u32,
    pub net_id: String,
    pub addr: String,
    pub ident: u32,
}

/// Client registration (confirmed, or the unconfirmed shadow of one).
#[derive(Debug, Clone)]
pub struct ClientRecord {
    pub client_id: u64,
    pub client_str: Vec<u8>,
    pub verifier: Verifier,
    pub confirm_verifier: Verifier,
    pub confirmed: bool,
    pub callback: CallbackInfo,
    pub addr: String,
    pub created_at: SystemTime,
}

/// Seqid-ordered open-owner with its replay cache.
#[derive(Debug, Clone)]
pub struct OpenOwner {
    pub client_id: u64,
    pub owner_data: Vec<u8>,
    pub last_seqid: u32,
    /// XDR-encoded result of the last request, replayed byte-identical
    /// when the same seqid arrives again.
    pub cached_result: Option<Vec<u8>>,
    pub confirmed: bool,
    pub open_stateids: HashSet<StateidOther>,
}

/// One open file per (owner, file): share bits accumulate here.
#[derive(Debug, Clone)]
pub struct OpenState {
    pub stateid: Stateid,
    pub client_id: u64,
    pub owner_key: (u64, Vec<u8>),
    pub file: FileHandle,
    pub share_access: u32,
    pub share_deny: u32,
    pub confirmed: bool,
    pub lock_stateids: HashSet<StateidOther>,
}

/// Byte-range lock state hanging off an open.
#[derive(Debug, Clone)]
pub struct LockStateRec {
    pub stateid: Stateid,
    pub client_id: u64,
    pub open_other: StateidOther,
    pub owner_data: Vec<u8>,
    pub file: FileHandle,
}

/// Outcome of open-owner seqid validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqidDisposition {
    /// The expected successor: proceed and record a new cached result.
    Proceed,
    /// Exact replay of the last request: return these bytes unchanged.
    Replay(Vec<u8>),
}

/// How the client claims the file in OPEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenClaim {
    /// Ordinary open by name.
    Null,
    /// Reclaim of pre-restart state during the grace period.
    Previous,
}

struct StateTables {
    /// Confirmed clients by id.
    clients: HashMap<u64, ClientRecord>,
    confirmed_by_str: HashMap<Vec<u8>, u64>,
    /// At most one unconfirmed record per client string. In the
    /// callback-update case its client id equals the confirmed record's.
    unconfirmed: HashMap<Vec<u8>, ClientRecord>,
    open_owners: HashMap<(u64, Vec<u8>), OpenOwner>,
    open_states: HashMap<StateidOther, OpenState>,
    lock_states: HashMap<StateidOther, LockStateRec>,
    /// `other` values of states dropped by lease expiry; validation
    /// reports these as expired rather than unknown.
    expired_stateids: HashSet<StateidOther>,
    grace: GraceState,
}

/// The process-wide NFSv4 state machine.
pub struct StateManager {
    config: CoreConfig,
    /// Seconds since the Unix epoch at process start; stamped into client
    /// ids and stateids so pre-restart state is recognizable.
    boot_epoch: u64,
    counter: AtomicU64,
    tables: RwLock<StateTables>,
    leases: LeaseSet,
    lock_manager: Arc<LockManager>,
    lock_store: Arc<dyn LockStore>,
    grace_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StateManager {
    /// Builds the manager. When client records from a previous instance
    /// exist in the store, the server starts inside a grace period
    /// expecting those clients to reclaim.
    pub async fn new(
        config: CoreConfig,
        lock_manager: Arc<LockManager>,
        lock_store: Arc<dyn LockStore>,
    ) -> Result<Arc<Self>> {
        let boot_epoch =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let prior_clients = lock_store.list_clients().await?;
        let lease_duration = config.lease_duration();
        let grace_duration = config.grace_duration();

        let manager = Arc::new(StateManager {
            config,
            boot_epoch,
            counter: AtomicU64::new(1),
            tables: RwLock::new(StateTables {
                clients: HashMap::new(),
                confirmed_by_str: HashMap::new(),
                unconfirmed: HashMap::new(),
                open_owners: HashMap::new(),
                open_states: HashMap::new(),
                lock_states: HashMap::new(),
                expired_stateids: HashSet::new(),
                grace: GraceState::new(),
            }),
            leases: LeaseSet::new(lease_duration),
            lock_manager,
            lock_store,
            grace_timer: std::sync::Mutex::new(None),
        });

        if !prior_clients.is_empty() {
            info!(clients = prior_clients.len(), "prior clients found, entering grace");
            let expected: HashSet<String> =
                prior_clients.iter().map(|c| c.client_id.clone()).collect();
            manager.enter_grace(expected, grace_duration).await;
        }
        Ok(manager)
    }

    pub fn lease_duration(&self) -> Duration {
        self.config.lease_duration()
    }

    fn epoch_lo24(&self) -> [u8; 3] {
        let e = self.boot_epoch & 0x00FF_FFFF;
        [(e >> 16) as u8, (e >> 8) as u8, e as u8]
    }

    fn new_client_id(&self) -> u64 {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed) & 0xFFFF_FFFF;
        (self.boot_epoch << 32) | counter
    }

    /// Lays out a fresh `other` field: `type(1) | epoch_lo24(3) |
    /// counter(8)`.
    fn new_other(&self, tag: StateidType) -> StateidOther {
        let mut other = [0u8; NFS4_OTHER_SIZE];
        other[0] = tag as u8;
        other[1..4].copy_from_slice(&self.epoch_lo24());
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        other[4..12].copy_from_slice(&counter.to_be_bytes());
        other
    }

    fn stateid_epoch_matches(&self, other: &StateidOther) -> bool {
        other[1..4] == self.epoch_lo24()
    }

    fn random_verifier() -> Verifier {
        // Confirm verifiers gate client-state takeover; a predictable
        // source (timestamps) would allow hijack.
        let mut verifier = [0u8; NFS4_VERIFIER_SIZE];
        OsRng.fill_bytes(&mut verifier);
        verifier
    }

    /// Key under which NFSv4 client records persist in the lock store.
    fn persisted_client_key(client_str: &[u8]) -> String {
        let mut key = String::with_capacity(5 + client_str.len() * 2);
        key.push_str("nfs4:");
        for byte in client_str {
            key.push_str(&format!("{byte:02x}"));
        }
        key
    }

    /// Client identifier handed to the lock manager for this client's
    /// byte-range locks.
    pub fn lock_client_id(client_id: u64) -> String {
        format!("nfs4:{client_id:016x}")
    }

    // --- SETCLIENTID (RFC 7530 §9.1.1, five cases) ---

    /// Registers or refreshes a client. Returns `(client_id,
    /// confirm_verifier)`; the state only becomes usable after
    /// [`Self::set_client_id_confirm`].
    pub async fn set_client_id(
        &self,
        client_str: Vec<u8>,
        verifier: Verifier,
        callback: CallbackInfo,
        addr: String,
    ) -> Result<(u64, Verifier)> {
        let mut tables = self.tables.write().await;
        let confirmed = tables
            .confirmed_by_str
            .get(&client_str)
            .and_then(|id| tables.clients.get(id));

        let client_id = match confirmed {
            // Case 5 (or 2 with a shadow pending): same identity,
            // callback update. The id is reused; a fresh confirm
            // verifier gates it.
            Some(record) if record.verifier == verifier => record.client_id,
            // Case 3: the client rebooted; a new id shadows the old
            // record until CONFIRM evicts it.
            Some(_) => self.new_client_id(),
            // Cases 1 and 4: nothing confirmed. Reuse the pending
            // unconfirmed id when the verifier repeats, so an
            // identical SETCLIENTID is idempotent.
            None => match tables.unconfirmed.get(&client_str) {
                Some(pending) if pending.verifier == verifier => pending.client_id,
                _ => self.new_client_id(),
            },
        };

        let confirm_verifier = Self::random_verifier();
        tables.unconfirmed.insert(
            client_str.clone(),
            ClientRecord {
                client_id,
                client_str,
                verifier,
                confirm_verifier,
                confirmed: false,
                callback,
                addr,
                created_at: SystemTime::now(),
            },
        );
        debug!(client_id, "setclientid recorded");
        Ok((client_id, confirm_verifier))
    }

    /// Promotes the matching unconfirmed record; evicts a superseded
    /// confirmed record for the same client string and starts the lease.
    pub async fn set_client_id_confirm(
        self: &Arc<Self>,
        client_id: u64,
        confirm_verifier: Verifier,
    ) -> Result<()> {
        let evicted = {
            let mut tables = self.tables.write().await;
            let pending_str = tables
                .unconfirmed
                .values()
                .find(|r| r.client_id == client_id && r.confirm_verifier == confirm_verifier)
                .map(|r| r.client_str.clone());

            let Some(client_str) = pending_str else {
                // Not pending: accept a replay against the confirmed
                // record, otherwise the pair is stale.
                let replay = tables
                    .clients
                    .get(&client_id)
                    .is_some_and(|r| r.confirm_verifier == confirm_verifier);
                if replay {
                    drop(tables);
                    self.leases.renew(client_id);
                    return Ok(());
                }
                return Err(Error::StaleClientId);
            };

            let mut record = tables.unconfirmed.remove(&client_str).expect("found above");
            record.confirmed = true;

            let superseded = match tables.confirmed_by_str.get(&client_str) {
                Some(&old_id) if old_id != client_id => Some(old_id),
                _ => None,
            };
            if let Some(old_id) = superseded {
                self.drop_client_locked(&mut tables, old_id).await;
            }
            tables.confirmed_by_str.insert(client_str.clone(), client_id);
            tables.clients.insert(client_id, record);

            // Persist identity for a future restart's grace period.
            let key = Self::persisted_client_key(&client_str);
            let verifier = tables.clients[&client_id].verifier.to_vec();
            self.lock_store.put_client(PersistedClient { client_id: key, verifier }).await?;
            superseded
        };
        if let Some(old_id) = evicted {
            self.leases.remove(old_id);
        }
        self.start_lease(client_id);
        debug!(client_id, "client confirmed");
        Ok(())
    }

    /// Explicit lease renewal (RENEW).
    pub async fn renew(&self, client_id: u64) -> Result<()> {
        let tables = self.tables.read().await;
        if !tables.clients.contains_key(&client_id) {
            return Err(Error::StaleClientId);
        }
        drop(tables);
        if !self.leases.renew(client_id) {
            return Err(Error::Expired);
        }
        Ok(())
    }

    // --- lease timers ---

    fn start_lease(self: &Arc<Self>, client_id: u64) {
        let manager = Arc::downgrade(self);
        let duration = self.lease_duration();
        let timer = tokio::spawn(async move {
            // The first deadline is computed locally: the lease entry is
            // inserted right after this task is spawned.
            let mut deadline = std::time::Instant::now() + duration;
            loop {
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                let Some(strong) = manager.upgrade() else { return };
                // The expiry check holds only the lease mutex; cleanup
                // then takes the tables lock on its own.
                if strong.leases.take_if_expired(client_id) {
                    strong.on_lease_expired(client_id).await;
                    return;
                }
                match strong.leases.deadline(client_id) {
                    Some(next) => deadline = next,
                    None => return,
                }
            }
        });
        self.leases.insert(client_id, timer);
    }

    /// Drops every piece of state belonging to an expired client: lock
    /// states, open states, open owners, and finally the client record.
    async fn on_lease_expired(&self, client_id: u64) {
        warn!(client_id, "lease expired, dropping client state");
        let mut tables = self.tables.write().await;
        self.drop_client_locked(&mut tables, client_id).await;
    }

    async fn drop_client_locked(&self, tables: &mut StateTables, client_id: u64) {
        let lock_owners: Vec<LockOwner> = tables
            .lock_states
            .values()
            .filter(|l| l.client_id == client_id)
            .map(|l| l.stateid.lock_owner())
            .collect();
        let expired = &mut tables.expired_stateids;
        tables.lock_states.retain(|other, l| {
            if l.client_id == client_id {
                expired.insert(*other);
                false
            } else {
                true
            }
        });
        tables.open_states.retain(|other, s| {
            if s.client_id == client_id {
                expired.insert(*other);
                false
            } else {
                true
            }
        });
        tables.open_owners.retain(|(owner_client, _), _| *owner_client != client_id);
        if let Some(record) = tables.clients.remove(&client_id) {
            if tables.confirmed_by_str.get(&record.client_str) == Some(&client_id) {
                tables.confirmed_by_str.remove(&record.client_str);
            }
        }
        // Release the client's byte-range locks and forget its persisted
        // record; a gone client cannot reclaim.
        for owner in lock_owners {
            self.lock_manager.release_all_for_owner(&owner).await.ok();
        }
        self.lock_manager
            .release_all_for_client(&Self::lock_client_id(client_id))
            .await
            .ok();
    }

    // --- open-owner seqid and replay ---

    /// Three-way seqid validation for an open-owner request.
    ///
    /// A brand-new owner is created and accepts the presented seqid as
    /// its starting point.
    pub async fn check_open_seqid(
        &self,
        client_id: u64,
        owner_data: &[u8],
        seqid: u32,
    ) -> Result<SeqidDisposition> {
        let mut tables = self.tables.write().await;
        if !tables.clients.contains_key(&client_id) {
            return Err(Error::StaleClientId);
        }
        let key = (client_id, owner_data.to_vec());
        match tables.open_owners.get_mut(&key) {
            None => {
                tables.open_owners.insert(
                    key,
                    OpenOwner {
                        client_id,
                        owner_data: owner_data.to_vec(),
                        last_seqid: seqid,
                        cached_result: None,
                        confirmed: false,
                        open_stateids: HashSet::new(),
                    },
                );
                Ok(SeqidDisposition::Proceed)
            }
            Some(owner) => {
                if seqid == next_seqid(owner.last_seqid) {
                    owner.last_seqid = seqid;
                    owner.cached_result = None;
                    Ok(SeqidDisposition::Proceed)
                } else if seqid == owner.last_seqid {
                    match &owner.cached_result {
                        Some(bytes) => Ok(SeqidDisposition::Replay(bytes.clone())),
                        None => Err(Error::BadSeqid),
                    }
                } else {
                    Err(Error::BadSeqid)
                }
            }
        }
    }

    /// Stores the encoded result for replay of the owner's last seqid.
    pub async fn record_result(&self, client_id: u64, owner_data: &[u8], encoded: Vec<u8>) {
        let mut tables = self.tables.write().await;
        if let Some(owner) = tables.open_owners.get_mut(&(client_id, owner_data.to_vec())) {
            owner.cached_result = Some(encoded);
        }
    }

    // --- OPEN family ---

    /// Creates or extends the open state for `(owner, file)`.
    ///
    /// Multiple OPENs by one owner on one file collapse to one state
    /// whose share bits accumulate by OR. Returns the stateid and whether
    /// OPEN_CONFIRM is still required.
    pub async fn open(
        &self,
        client_id: u64,
        owner_data: &[u8],
        file: &FileHandle,
        share_access: u32,
        share_deny: u32,
        claim: OpenClaim,
    ) -> Result<(Stateid, bool)> {
        if share_access & OPEN4_SHARE_ACCESS_BOTH == 0 {
            return Err(Error::InvalidArgument);
        }
        let mut tables = self.tables.write().await;
        let record = tables.clients.get(&client_id).ok_or(Error::StaleClientId)?;
        let client_str = record.client_str.clone();

        match claim {
            OpenClaim::Null => {
                if tables.grace.is_active() {
                    return Err(Error::GracePeriod { remaining: tables.grace.remaining() });
                }
            }
            OpenClaim::Previous => {
                if !tables.grace.is_active() {
                    return Err(Error::NoGrace);
                }
                // The reclaim must come from a client the previous
                // instance knew.
                let key = Self::persisted_client_key(&client_str);
                let known =
                    self.lock_store.list_clients().await?.iter().any(|c| c.client_id == key);
                if !known {
                    return Err(Error::NoGrace);
                }
                if tables.grace.mark_reclaimed(&key) {
                    self.finish_grace(&mut tables);
                }
            }
        }

        // Share-reservation check against other owners on the file.
        let owner_key = (client_id, owner_data.to_vec());
        for state in tables.open_states.values() {
            if state.file == *file
                && state.owner_key != owner_key
                && (state.share_deny & share_access != 0
                    || share_deny & state.share_access != 0)
            {
                return Err(Error::ShareDenied);
            }
        }

        let existing = tables
            .open_states
            .values()
            .find(|s| s.owner_key == owner_key && s.file == *file)
            .map(|s| s.stateid.other);
        let stateid = match existing {
            Some(other) => {
                let state = tables.open_states.get_mut(&other).expect("present");
                state.share_access |= share_access;
                state.share_deny |= share_deny;
                state.stateid.seqid += 1;
                state.stateid
            }
            None => {
                let other = self.new_other(StateidType::Open);
                let stateid = Stateid { seqid: 1, other };
                tables.open_states.insert(
                    other,
                    OpenState {
                        stateid,
                        client_id,
                        owner_key: owner_key.clone(),
                        file: file.clone(),
                        share_access,
                        share_deny,
                        confirmed: false,
                        lock_stateids: HashSet::new(),
                    },
                );
                if let Some(owner) = tables.open_owners.get_mut(&owner_key) {
                    owner.open_stateids.insert(other);
                }
                stateid
            }
        };
        let confirm_required =
            !tables.open_owners.get(&owner_key).map(|o| o.confirmed).unwrap_or(false);
        drop(tables);
        self.leases.renew(client_id);
        Ok((stateid, confirm_required))
    }

    /// OPEN_CONFIRM: first use of a new open-owner.
    pub async fn open_confirm(&self, stateid: &Stateid) -> Result<Stateid> {
        let mut tables = self.tables.write().await;
        let state = tables.open_states.get_mut(&stateid.other).ok_or(Error::BadStateid)?;
        state.confirmed = true;
        state.stateid.seqid += 1;
        let new_stateid = state.stateid;
        let owner_key = state.owner_key.clone();
        if let Some(owner) = tables.open_owners.get_mut(&owner_key) {
            owner.confirmed = true;
        }
        Ok(new_stateid)
    }

    /// OPEN_DOWNGRADE: the requested bits must be a subset of the current.
    pub async fn open_downgrade(
        &self,
        stateid: &Stateid,
        share_access: u32,
        share_deny: u32,
    ) -> Result<Stateid> {
        let mut tables = self.tables.write().await;
        let state = tables.open_states.get_mut(&stateid.other).ok_or(Error::BadStateid)?;
        if share_access & !state.share_access != 0 || share_deny & !state.share_deny != 0 {
            return Err(Error::InvalidArgument);
        }
        state.share_access = share_access;
        state.share_deny = share_deny;
        state.stateid.seqid += 1;
        Ok(state.stateid)
    }

    /// CLOSE: drops the open state, its lock states, and — when the owner
    /// has nothing left open — the owner itself.
    pub async fn close(&self, stateid: &Stateid) -> Result<Stateid> {
        let mut tables = self.tables.write().await;
        let state = tables.open_states.remove(&stateid.other).ok_or(Error::BadStateid)?;
        let mut released: Vec<LockOwner> = Vec::new();
        for lock_other in &state.lock_stateids {
            if let Some(lock_state) = tables.lock_states.remove(lock_other) {
                released.push(lock_state.stateid.lock_owner());
            }
        }
        let owner_done = match tables.open_owners.get_mut(&state.owner_key) {
            Some(owner) => {
                owner.open_stateids.remove(&stateid.other);
                owner.open_stateids.is_empty()
            }
            None => false,
        };
        if owner_done {
            tables.open_owners.remove(&state.owner_key);
        }
        drop(tables);
        for owner in released {
            self.lock_manager.release_all_for_owner(&owner).await.ok();
        }
        self.leases.renew(state.client_id);
        let mut closed = state.stateid;
        closed.seqid += 1;
        Ok(closed)
    }

    // --- lock states ---

    /// Creates (or bumps) the lock stateid for `(open state, lock owner)`.
    pub async fn lock_state(
        &self,
        open_stateid: &Stateid,
        lock_owner_data: &[u8],
    ) -> Result<Stateid> {
        let mut tables = self.tables.write().await;
        let open = tables.open_states.get(&open_stateid.other).ok_or(Error::BadStateid)?;
        let client_id = open.client_id;
        let file = open.file.clone();
        let existing = open
            .lock_stateids
            .iter()
            .find(|other| {
                tables
                    .lock_states
                    .get(*other)
                    .map(|l| l.owner_data == lock_owner_data)
                    .unwrap_or(false)
            })
            .copied();
        if let Some(other) = existing {
            let lock_state = tables.lock_states.get_mut(&other).expect("present");
            lock_state.stateid.seqid += 1;
            return Ok(lock_state.stateid);
        }
        let other = self.new_other(StateidType::Lock);
        let stateid = Stateid { seqid: 1, other };
        tables.lock_states.insert(
            other,
            LockStateRec {
                stateid,
                client_id,
                open_other: open_stateid.other,
                owner_data: lock_owner_data.to_vec(),
                file,
            },
        );
        tables
            .open_states
            .get_mut(&open_stateid.other)
            .expect("present above")
            .lock_stateids
            .insert(other);
        Ok(stateid)
    }

    /// Bumps a lock stateid after LOCKU.
    pub async fn bump_lock_state(&self, stateid: &Stateid) -> Result<Stateid> {
        let mut tables = self.tables.write().await;
        let lock_state = tables.lock_states.get_mut(&stateid.other).ok_or(Error::BadStateid)?;
        lock_state.stateid.seqid += 1;
        Ok(lock_state.stateid)
    }

    pub async fn lock_state_rec(&self, stateid: &Stateid) -> Option<LockStateRec> {
        self.tables.read().await.lock_states.get(&stateid.other).cloned()
    }

    /// Lock-manager owner string already in use by `(client, lock owner)`,
    /// so LOCKT never reports a client's own locks as conflicts.
    pub async fn find_lock_owner(&self, client_id: u64, owner_data: &[u8]) -> Option<LockOwner> {
        self.tables
            .read()
            .await
            .lock_states
            .values()
            .find(|l| l.client_id == client_id && l.owner_data == owner_data)
            .map(|l| l.stateid.lock_owner())
    }

    /// RELEASE_LOCKOWNER: forgets every lock state of `(client, owner)`
    /// and returns the lock-manager owners to release.
    pub async fn release_lock_owner(
        &self,
        client_id: u64,
        owner_data: &[u8],
    ) -> Vec<LockOwner> {
        let mut tables = self.tables.write().await;
        let mut released = Vec::new();
        let mut removed_others = Vec::new();
        tables.lock_states.retain(|other, l| {
            if l.client_id == client_id && l.owner_data == owner_data {
                released.push(l.stateid.lock_owner());
                removed_others.push((*other, l.open_other));
                false
            } else {
                true
            }
        });
        for (other, open_other) in removed_others {
            if let Some(open) = tables.open_states.get_mut(&open_other) {
                open.lock_stateids.remove(&other);
            }
        }
        released
    }

    // --- stateid validation ---

    /// The validation ladder of spec §4.B. Success implicitly renews the
    /// owning client's lease, so a read-only workload never expires.
    pub async fn validate_stateid(&self, stateid: &Stateid) -> Result<()> {
        if stateid.is_special() {
            return Ok(());
        }
        if !self.stateid_epoch_matches(&stateid.other) {
            return Err(Error::StaleStateid);
        }
        let tables = self.tables.read().await;
        let (stored_seqid, client_id) = match tables.open_states.get(&stateid.other) {
            Some(state) => (state.stateid.seqid, state.client_id),
            None => match tables.lock_states.get(&stateid.other) {
                Some(lock_state) => (lock_state.stateid.seqid, lock_state.client_id),
                None => {
                    if tables.expired_stateids.contains(&stateid.other) {
                        return Err(Error::Expired);
                    }
                    return Err(Error::BadStateid);
                }
            },
        };
        if stateid.seqid < stored_seqid {
            return Err(Error::OldStateid);
        }
        if stateid.seqid > stored_seqid {
            return Err(Error::BadStateid);
        }
        if self.leases.is_expired(client_id) {
            return Err(Error::Expired);
        }
        drop(tables);
        self.leases.renew(client_id);
        Ok(())
    }

    /// Looks up the open state a validated stateid designates.
    pub async fn open_state(&self, stateid: &Stateid) -> Option<OpenState> {
        self.tables.read().await.open_states.get(&stateid.other).cloned()
    }

    pub async fn client(&self, client_id: u64) -> Option<ClientRecord> {
        self.tables.read().await.clients.get(&client_id).cloned()
    }

    pub async fn open_owner(&self, client_id: u64, owner_data: &[u8]) -> Option<OpenOwner> {
        self.tables.read().await.open_owners.get(&(client_id, owner_data.to_vec())).cloned()
    }

    // --- grace period ---

    pub async fn in_grace(&self) -> bool {
        self.tables.read().await.grace.is_active()
    }

    async fn enter_grace(self: &Arc<Self>, expected: HashSet<String>, duration: Duration) {
        {
            let mut tables = self.tables.write().await;
            tables.grace.enter(expected, duration);
        }
        let manager = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let Some(manager) = manager.upgrade() else { return };
            let mut tables = manager.tables.write().await;
            if tables.grace.is_active() && tables.grace.remaining().is_zero() {
                manager.finish_grace(&mut tables);
            }
        });
        if let Some(old) = self.grace_timer.lock().expect("grace timer poisoned").replace(timer) {
            old.abort();
        }
    }

    fn finish_grace(&self, tables: &mut StateTables) {
        info!("nfs4 grace period over");
        tables.grace.exit();
    }

    /// Stops every lease and grace timer. Called once at shutdown.
    pub fn shutdown(&self) {
        self.leases.stop_all();
        if let Some(timer) = self.grace_timer.lock().expect("grace timer poisoned").take() {
            timer.abort();
        }
    }
}

/// Seqid successor with the reserved-zero wrap: `0xFFFFFFFF -> 1`.
pub fn next_seqid(seqid: u32) -> u32 {
    match seqid.checked_add(1) {
        Some(next) => next,
        None => 1,
    }
}
