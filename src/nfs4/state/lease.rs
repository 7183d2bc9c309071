//! Per-client lease bookkeeping.
//!
//! Each confirmed client has a timer task sleeping toward its deadline.
//! Renewals only touch this set's own mutex, never the state-manager
//! lock, so a timer firing can call into state cleanup without any risk
//! of lock inversion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

struct Lease {
    last_renew: Instant,
    timer: JoinHandle<()>,
}

pub(crate) struct LeaseSet {
    duration: Duration,
    entries: Mutex<HashMap<u64, Lease>>,
}

impl LeaseSet {
    pub fn new(duration: Duration) -> Self {
        LeaseSet { duration, entries: Mutex::new(HashMap::new()) }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Lease>> {
        self.entries.lock().expect("lease set poisoned")
    }

    /// Registers a freshly confirmed client with its timer task. An old
    /// timer for the same client is aborted.
    pub fn insert(&self, client_id: u64, timer: JoinHandle<()>) {
        let old = self.guard().insert(client_id, Lease { last_renew: Instant::now(), timer });
        if let Some(old) = old {
            old.timer.abort();
        }
    }

    /// Resets the lease clock. Returns false for unknown clients.
    pub fn renew(&self, client_id: u64) -> bool {
        match self.guard().get_mut(&client_id) {
            Some(lease) => {
                lease.last_renew = Instant::now();
                true
            }
            None => false,
        }
    }

    /// True when the client's lease has run out (or was never started).
    pub fn is_expired(&self, client_id: u64) -> bool {
        match self.guard().get(&client_id) {
            Some(lease) => lease.last_renew.elapsed() >= self.duration,
            None => true,
        }
    }

    /// The deadline the timer task should sleep toward, or `None` when the
    /// lease is gone.
    pub fn deadline(&self, client_id: u64) -> Option<Instant> {
        self.guard().get(&client_id).map(|lease| lease.last_renew + self.duration)
    }

    /// Removes the lease if it is past its deadline. The timer task calls
    /// this to decide between cleanup and another sleep, and it must not
    /// hold any other lock while doing so.
    pub fn take_if_expired(&self, client_id: u64) -> bool {
        let mut entries = self.guard();
        match entries.get(&client_id) {
            Some(lease) if lease.last_renew.elapsed() >= self.duration => {
                entries.remove(&client_id);
                true
            }
            _ => false,
        }
    }

    /// Stops the client's timer (client evicted or shut down).
    pub fn remove(&self, client_id: u64) {
        if let Some(lease) = self.guard().remove(&client_id) {
            lease.timer.abort();
        }
    }

    pub fn stop_all(&self) {
        for (_, lease) in self.guard().drain() {
            lease.timer.abort();
        }
    }
}
