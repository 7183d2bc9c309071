//! Per-adapter connection tracking.
//!
//! Each protocol adapter registers its client connections here. A TTL of
//! zero releases the client's locks the moment it disconnects (NFS); a
//! positive TTL defers the cleanup so a reconnecting client can resume
//! its state (SMB durable handles).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Callback invoked when a disconnected client's state is finally reaped.
pub type OnDisconnect = Box<dyn FnOnce() + Send>;

pub struct Registration {
    pub adapter: String,
    pub client_id: String,
    pub ttl: Duration,
    pub registered_at: Instant,
    pub last_seen: Instant,
    generation: u64,
    disconnected: bool,
    on_disconnect: Option<OnDisconnect>,
}

/// What the caller must do after a `disconnect`.
pub enum DisconnectAction {
    /// TTL was zero: the entry is gone, release locks now and run the
    /// callback, if any.
    Immediate(Option<OnDisconnect>),
    /// TTL is positive: schedule [`ConnectionRegistry::reap`] with this
    /// generation after the delay.
    Deferred { ttl: Duration, generation: u64 },
    /// The client was not registered.
    Unknown,
}

pub struct ConnectionRegistry {
    max_per_adapter: usize,
    inner: Mutex<HashMap<String, HashMap<String, Registration>>>,
    next_generation: std::sync::atomic::AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(max_per_adapter: usize) -> Self {
        ConnectionRegistry {
            max_per_adapter,
            inner: Mutex::new(HashMap::new()),
            next_generation: Default::default(),
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, Registration>>> {
        self.inner.lock().expect("connection registry poisoned")
    }

    /// Registers a client connection. Re-registering an existing client
    /// replaces its entry and cancels any pending deferred cleanup.
    pub fn register(
        &self,
        adapter: &str,
        client_id: &str,
        ttl: Duration,
        on_disconnect: Option<OnDisconnect>,
    ) -> Result<()> {
        let generation =
            self.next_generation.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut inner = self.guard();
        let adapter_map = inner.entry(adapter.to_owned()).or_default();
        if !adapter_map.contains_key(client_id) && adapter_map.len() >= self.max_per_adapter {
            tracing::warn!(adapter, client_id, "connection limit reached");
            return Err(Error::ConnectionLimitReached);
        }
        let now = Instant::now();
        adapter_map.insert(
            client_id.to_owned(),
            Registration {
                adapter: adapter.to_owned(),
                client_id: client_id.to_owned(),
                ttl,
                registered_at: now,
                last_seen: now,
                generation,
                disconnected: false,
                on_disconnect,
            },
        );
        Ok(())
    }

    /// Resets the staleness clock for a live connection.
    pub fn update_last_seen(&self, adapter: &str, client_id: &str) {
        if let Some(reg) =
            self.guard().get_mut(adapter).and_then(|map| map.get_mut(client_id))
        {
            reg.last_seen = Instant::now();
        }
    }

    pub fn is_registered(&self, adapter: &str, client_id: &str) -> bool {
        self.guard()
            .get(adapter)
            .and_then(|map| map.get(client_id))
            .map(|reg| !reg.disconnected)
            .unwrap_or(false)
    }

    pub fn connection_count(&self, adapter: &str) -> usize {
        self.guard().get(adapter).map(|map| map.len()).unwrap_or(0)
    }

    /// Marks the client disconnected and reports how cleanup should run.
    pub fn disconnect(&self, adapter: &str, client_id: &str) -> DisconnectAction {
        let mut inner = self.guard();
        let Some(adapter_map) = inner.get_mut(adapter) else {
            return DisconnectAction::Unknown;
        };
        let Some(reg) = adapter_map.get_mut(client_id) else {
            return DisconnectAction::Unknown;
        };
        if reg.ttl.is_zero() {
            let reg = adapter_map.remove(client_id).expect("entry just observed");
            return DisconnectAction::Immediate(reg.on_disconnect);
        }
        reg.disconnected = true;
        DisconnectAction::Deferred { ttl: reg.ttl, generation: reg.generation }
    }

    /// Completes a deferred disconnect. Returns the callback to invoke when
    /// the entry is removed; `None` when the client re-registered in the
    /// meantime (the generation no longer matches).
    pub fn reap(&self, adapter: &str, client_id: &str, generation: u64) -> Option<Option<OnDisconnect>> {
        let mut inner = self.guard();
        let adapter_map = inner.get_mut(adapter)?;
        let reg = adapter_map.get(client_id)?;
        if !reg.disconnected || reg.generation != generation {
            return None;
        }
        let reg = adapter_map.remove(client_id).expect("entry just observed");
        Some(reg.on_disconnect)
    }

    /// Removes the client unconditionally (explicit unregister).
    pub fn unregister(&self, adapter: &str, client_id: &str) {
        if let Some(map) = self.guard().get_mut(adapter) {
            map.remove(client_id);
        }
    }
}
