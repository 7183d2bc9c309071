//! Metadata collaborator seam.
//!
//! The real metadata backends (object-store manifests, relational
//! databases, local disk) live outside the core; the protocol layer only
//! needs this narrow interface for lookups and attributes. File-content
//! bytes go through [`crate::content::ContentService`] instead.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::handle::FileHandle;

/// File type as exposed to protocol adapters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

/// Attributes of one filesystem object.
#[derive(Debug, Clone)]
pub struct FileAttributes {
    pub file_type: FileType,
    pub size: u64,
    pub fileid: u64,
    pub mode: u32,
    pub nlink: u32,
    pub owner: String,
    pub group: String,
    /// Change counter for NFSv4 `change`; bumped on every mutation.
    pub change: u64,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub created: SystemTime,
}

impl FileAttributes {
    pub fn directory(fileid: u64) -> Self {
        FileAttributes {
            file_type: FileType::Directory,
            size: 0,
            fileid,
            mode: 0o755,
            nlink: 2,
            owner: "root".to_owned(),
            group: "root".to_owned(),
            change: 1,
            modified: SystemTime::UNIX_EPOCH,
            accessed: SystemTime::UNIX_EPOCH,
            created: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn regular(fileid: u64, size: u64) -> Self {
        FileAttributes {
            file_type: FileType::Regular,
            size,
            fileid,
            mode: 0o644,
            nlink: 1,
            owner: "root".to_owned(),
            group: "root".to_owned(),
            change: 1,
            modified: SystemTime::UNIX_EPOCH,
            accessed: SystemTime::UNIX_EPOCH,
            created: SystemTime::UNIX_EPOCH,
        }
    }
}

/// What the COMPOUND layer needs from a metadata backend.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn getattr(&self, handle: &FileHandle) -> Result<FileAttributes>;

    /// Resolves `name` inside the directory `dir`. The name has already
    /// passed component validation.
    async fn lookup(&self, dir: &FileHandle, name: &str) -> Result<FileHandle>;
}

#[derive(Default)]
struct MemoryMetaInner {
    attrs: HashMap<FileHandle, FileAttributes>,
    entries: HashMap<(FileHandle, String), FileHandle>,
}

/// In-process metadata store for tests and demos.
#[derive(Default)]
pub struct MemoryMetadata {
    inner: Mutex<MemoryMetaInner>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: FileHandle, attrs: FileAttributes) {
        self.inner.lock().expect("metadata poisoned").attrs.insert(handle, attrs);
    }

    pub fn link(&self, dir: FileHandle, name: &str, child: FileHandle) {
        self.inner
            .lock()
            .expect("metadata poisoned")
            .entries
            .insert((dir, name.to_owned()), child);
    }
}

#[async_trait]
impl MetadataService for MemoryMetadata {
    async fn getattr(&self, handle: &FileHandle) -> Result<FileAttributes> {
        self.inner
            .lock()
            .expect("metadata poisoned")
            .attrs
            .get(handle)
            .cloned()
            .ok_or(Error::StaleHandle)
    }

    async fn lookup(&self, dir: &FileHandle, name: &str) -> Result<FileHandle> {
        self.inner
            .lock()
            .expect("metadata poisoned")
            .entries
            .get(&(dir.clone(), name.to_owned()))
            .cloned()
            .ok_or(Error::NotFound)
    }
}
