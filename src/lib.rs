//! DittoFS protocol core.
//!
//! The stateful heart of a multi-protocol network filesystem: a
//! protocol-agnostic byte-range lock manager, the NFSv4.0 state machine
//! with its COMPOUND dispatcher and pseudo filesystem, and the
//! chunk/slice content cache with a background flusher. Wire adapters
//! (NFSv3/NLM framing, NFSv4 RPC transport, SMB) and storage backends
//! sit outside, behind the `LockStore`, `BlockStore` and
//! `MetadataService` seams.

pub mod cancel;
pub mod config;
pub mod content;
pub mod error;
pub mod handle;
pub mod lock;
pub mod meta;
pub mod nfs4;
pub mod share;
pub mod xdr;

use std::sync::Arc;

use tracing::info;

use crate::config::CoreConfig;
use crate::content::{BlockStore, ContentService};
use crate::error::Result;
use crate::lock::store::LockStore;
use crate::lock::LockManager;
use crate::meta::MetadataService;
use crate::nfs4::compound::CompoundProcessor;
use crate::nfs4::state::StateManager;
use crate::share::ShareRegistry;

/// The assembled core: one lock manager, one content service, one state
/// manager, one COMPOUND processor.
///
/// Construction runs in dependency order (stores, locks, content, state,
/// dispatch); [`Core::shutdown`] disposes in reverse and blocks until
/// background work drains.
pub struct Core {
    pub config: CoreConfig,
    pub shares: Arc<ShareRegistry>,
    pub locks: Arc<LockManager>,
    pub content: Arc<ContentService>,
    pub state: Arc<StateManager>,
    pub compound: CompoundProcessor,
}

impl Core {
    pub async fn start(
        config: CoreConfig,
        lock_store: Arc<dyn LockStore>,
        block_store: Arc<dyn BlockStore>,
        meta: Arc<dyn MetadataService>,
        shares: ShareRegistry,
    ) -> Result<Core> {
        let shares = Arc::new(shares);
        let (locks, prior_clients) = LockManager::new(lock_store.clone(), config.clone()).await?;
        if !prior_clients.is_empty() {
            locks.enter_grace(prior_clients, config.grace_duration()).await;
        }
        let content = ContentService::new(block_store, &config);
        let state = StateManager::new(config.clone(), locks.clone(), lock_store).await?;
        let compound = CompoundProcessor::new(
            state.clone(),
            locks.clone(),
            shares.clone(),
            meta,
            config.clone(),
        );
        info!("core started");
        Ok(Core { config, shares, locks, content, state, compound })
    }

    /// Stops lease and grace timers, drains the flusher, and closes the
    /// block store.
    pub async fn shutdown(&self) -> Result<()> {
        self.state.shutdown();
        self.content.shutdown().await?;
        self.locks.shutdown();
        info!("core stopped");
        Ok(())
    }
}
