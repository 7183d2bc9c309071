//! Identifier types shared across subsystems: file handles, content ids,
//! byte ranges and lock owners.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

/// Maximum size of a file handle on the wire (`NFS4_FHSIZE`).
pub const MAX_HANDLE_LEN: usize = 128;

/// Prefix marking handles that designate pseudo-filesystem nodes.
/// Real handles start with a length-prefixed share name and can never
/// begin with these bytes.
const PSEUDO_PREFIX: &[u8] = b"pseudofs:";

/// Opaque file handle encoding `{share name, file id}`.
///
/// Clients treat the byte string as opaque; the server decodes it to route
/// operations to the owning share. Handles own their storage, so assigning
/// one filehandle slot from another always copies (no aliasing between a
/// compound's current and saved filehandles).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FileHandle(Vec<u8>);

impl FileHandle {
    /// Builds a handle for a file inside a real share.
    pub fn share(share: &str, file_id: u64) -> Self {
        let name = share.as_bytes();
        let mut buf = Vec::with_capacity(4 + name.len() + 8);
        let mut len = [0u8; 4];
        BigEndian::write_u32(&mut len, name.len() as u32);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(name);
        let mut id = [0u8; 8];
        BigEndian::write_u64(&mut id, file_id);
        buf.extend_from_slice(&id);
        FileHandle(buf)
    }

    /// Builds a handle for a pseudo-filesystem node identified by path.
    pub fn pseudo(path: &str) -> Self {
        let mut buf = Vec::with_capacity(PSEUDO_PREFIX.len() + path.len());
        buf.extend_from_slice(PSEUDO_PREFIX);
        buf.extend_from_slice(path.as_bytes());
        FileHandle(buf)
    }

    /// Wraps raw wire bytes. Fails on empty or oversized handles.
    pub fn from_wire(bytes: Vec<u8>) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_HANDLE_LEN {
            return None;
        }
        Some(FileHandle(bytes))
    }

    /// True when the handle designates a pseudo-filesystem node.
    pub fn is_pseudo(&self) -> bool {
        self.0.starts_with(PSEUDO_PREFIX)
    }

    /// Pseudo-FS path of the node, when [`Self::is_pseudo`].
    pub fn pseudo_path(&self) -> Option<&str> {
        if !self.is_pseudo() {
            return None;
        }
        std::str::from_utf8(&self.0[PSEUDO_PREFIX.len()..]).ok()
    }

    /// Decodes a real handle into `(share name, file id)`.
    pub fn decode(&self) -> Option<(String, u64)> {
        if self.is_pseudo() {
            return None;
        }
        if self.0.len() < 12 {
            return None;
        }
        let name_len = BigEndian::read_u32(&self.0[..4]) as usize;
        if self.0.len() != 4 + name_len + 8 {
            return None;
        }
        let name = std::str::from_utf8(&self.0[4..4 + name_len]).ok()?;
        let id = BigEndian::read_u64(&self.0[4 + name_len..]);
        Some((name.to_owned(), id))
    }

    /// Raw wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pseudo_path() {
            Some(path) => write!(f, "FileHandle(pseudo {path:?})"),
            None => match self.decode() {
                Some((share, id)) => write!(f, "FileHandle({share}/{id})"),
                None => write!(f, "FileHandle({} raw bytes)", self.0.len()),
            },
        }
    }
}

/// Opaque content identifier assigned by the metadata layer.
///
/// Keys the cache and flusher; distinct from [`FileHandle`] so metadata
/// renames never invalidate cached bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn new(share: &str, id: u64) -> Self {
        ContentId(format!("{share}/{id}"))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte range `[offset, offset + length)`.
///
/// A zero `length` means "to end of file" (NFSv4 convention).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Range {
    pub offset: u64,
    pub length: u64,
}

impl Range {
    pub fn new(offset: u64, length: u64) -> Self {
        Range { offset, length }
    }

    /// True when the range extends to end of file.
    pub fn is_to_eof(&self) -> bool {
        self.length == 0
    }

    /// Exclusive end offset; `u64::MAX` for to-EOF ranges.
    pub fn end(&self) -> u64 {
        if self.is_to_eof() {
            u64::MAX
        } else {
            self.offset.saturating_add(self.length)
        }
    }

    /// True when the two ranges share at least one byte.
    pub fn overlaps(&self, other: &Range) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// True when `point` falls inside the range.
    pub fn contains_point(&self, point: u64) -> bool {
        point >= self.offset && point < self.end()
    }

    /// True when `other` lies entirely within this range.
    pub fn covers(&self, other: &Range) -> bool {
        self.offset <= other.offset && self.end() >= other.end()
    }

    /// Removes `cut` from this range, yielding the residual sub-ranges.
    ///
    /// This is the POSIX split kernel: the result covers exactly
    /// `self \ cut` with zero, one, or two ranges.
    pub fn subtract(&self, cut: &Range) -> Vec<Range> {
        if !self.overlaps(cut) {
            return vec![*self];
        }
        let mut out = Vec::new();
        if cut.offset > self.offset {
            out.push(Range::new(self.offset, cut.offset - self.offset));
        }
        if cut.end() < self.end() {
            let tail_start = cut.end();
            let length = if self.is_to_eof() { 0 } else { self.end() - tail_start };
            out.push(Range::new(tail_start, length));
        }
        out
    }

    /// Smallest range covering both, assuming they overlap or touch.
    pub fn merge(&self, other: &Range) -> Range {
        let offset = self.offset.min(other.offset);
        if self.is_to_eof() || other.is_to_eof() {
            return Range::new(offset, 0);
        }
        let end = self.end().max(other.end());
        Range::new(offset, end - offset)
    }
}

/// Protocol-agnostic lock owner.
///
/// Adapters stamp their protocol discriminator into the opaque string
/// (`"nlm:clientA:pid123"`, `"nfs4:<stateid.other hex>"`,
/// `"smb:<session>:<pid>"`). The lock manager only compares for equality
/// and never parses the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockOwner(pub String);

impl LockOwner {
    pub fn new(id: impl Into<String>) -> Self {
        LockOwner(id.into())
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SMB-style share reservation tracked alongside byte-range locks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ShareReservation {
    pub deny_read: bool,
    pub deny_write: bool,
}

impl ShareReservation {
    pub const NONE: ShareReservation = ShareReservation { deny_read: false, deny_write: false };
    pub const DENY_ALL: ShareReservation = ShareReservation { deny_read: true, deny_write: true };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_handle_round_trips() {
        let handle = FileHandle::share("export", 42);
        assert!(!handle.is_pseudo());
        assert_eq!(handle.decode(), Some(("export".to_owned(), 42)));
        assert!(handle.as_bytes().len() <= MAX_HANDLE_LEN);
    }

    #[test]
    fn pseudo_handle_is_detected() {
        let handle = FileHandle::pseudo("/export");
        assert!(handle.is_pseudo());
        assert_eq!(handle.pseudo_path(), Some("/export"));
        assert_eq!(handle.decode(), None);
    }

    #[test]
    fn pseudo_prefix_cannot_collide_with_real_handles() {
        // A real handle starts with a 4-byte big-endian share-name length;
        // "pseu" would require a share name of ~1.9 GB.
        let handle = FileHandle::share("pseudofs:", 1);
        assert!(!handle.is_pseudo());
        assert_eq!(handle.decode(), Some(("pseudofs:".to_owned(), 1)));
    }

    #[test]
    fn from_wire_rejects_oversized() {
        assert!(FileHandle::from_wire(vec![0u8; MAX_HANDLE_LEN + 1]).is_none());
        assert!(FileHandle::from_wire(Vec::new()).is_none());
        assert!(FileHandle::from_wire(vec![1, 2, 3]).is_some());
    }

    #[test]
    fn subtract_middle_produces_two_residuals() {
        let lock = Range::new(0, 100);
        let out = lock.subtract(&Range::new(30, 20));
        assert_eq!(out, vec![Range::new(0, 30), Range::new(50, 50)]);
    }

    #[test]
    fn subtract_head_tail_and_full() {
        let lock = Range::new(10, 40);
        assert_eq!(lock.subtract(&Range::new(0, 20)), vec![Range::new(20, 30)]);
        assert_eq!(lock.subtract(&Range::new(40, 100)), vec![Range::new(10, 30)]);
        assert_eq!(lock.subtract(&Range::new(0, 100)), Vec::new());
        assert_eq!(lock.subtract(&Range::new(60, 5)), vec![lock]);
    }

    #[test]
    fn to_eof_range_overlaps_everything_after_offset() {
        let eof = Range::new(100, 0);
        assert!(eof.overlaps(&Range::new(1000, 1)));
        assert!(!eof.overlaps(&Range::new(0, 100)));
        assert!(eof.contains_point(u64::MAX - 1));
    }

    #[test]
    fn subtract_preserves_to_eof_tail() {
        let eof = Range::new(0, 0);
        let out = eof.subtract(&Range::new(10, 10));
        assert_eq!(out, vec![Range::new(0, 10), Range::new(20, 0)]);
        assert!(out[1].is_to_eof());
    }

    #[test]
    fn merge_covers_both() {
        let merged = Range::new(0, 10).merge(&Range::new(5, 20));
        assert_eq!(merged, Range::new(0, 25));
        assert!(Range::new(0, 10).merge(&Range::new(5, 0)).is_to_eof());
    }
}
