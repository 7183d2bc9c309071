//! Runtime registry of exported shares.
//!
//! The pseudo-filesystem is rebuilt from this registry on every share
//! add/remove; junction crossing resolves the share's real root handle here.

use std::sync::RwLock;

use crate::handle::FileHandle;

/// One exported share.
#[derive(Debug, Clone)]
pub struct Share {
    /// Export name, also the pseudo-FS child name under the root.
    pub name: String,
    /// Root file id of the share in its backing metadata store.
    pub root_file_id: u64,
}

impl Share {
    /// Real (non-pseudo) handle of the share's root directory.
    pub fn root_handle(&self) -> FileHandle {
        FileHandle::share(&self.name, self.root_file_id)
    }
}

/// Registry of currently exported shares.
///
/// The major FSID of a real export is its index here plus one; FSID
/// `{0, 1}` is reserved for the pseudo filesystem.
pub struct ShareRegistry {
    shares: RwLock<Vec<Share>>,
}

impl ShareRegistry {
    pub fn new(shares: Vec<Share>) -> Self {
        ShareRegistry { shares: RwLock::new(shares) }
    }

    pub fn list(&self) -> Vec<Share> {
        self.shares.read().expect("share registry poisoned").clone()
    }

    pub fn get(&self, name: &str) -> Option<Share> {
        self.shares
            .read()
            .expect("share registry poisoned")
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    /// Stable index of the share, used as the export's FSID major number.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.shares
            .read()
            .expect("share registry poisoned")
            .iter()
            .position(|s| s.name == name)
    }

    pub fn add(&self, share: Share) {
        let mut shares = self.shares.write().expect("share registry poisoned");
        shares.retain(|s| s.name != share.name);
        shares.push(share);
    }

    pub fn remove(&self, name: &str) {
        self.shares.write().expect("share registry poisoned").retain(|s| s.name != name);
    }
}
