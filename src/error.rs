//! Canonical error taxonomy shared by every subsystem.
//!
//! Core methods surface these typed errors; protocol adapters translate them
//! to wire codes through per-protocol mappers (see [`crate::nfs4::status`]).
//! The core itself never retries.

use std::fmt;
use std::time::Duration;

use crate::handle::{LockOwner, Range};

/// Result of core operations with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Description of the lock that caused a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    /// Owner holding the conflicting lock.
    pub owner: LockOwner,
    /// Range held by the conflicting lock.
    pub range: Range,
    /// Whether the conflicting lock is exclusive.
    pub exclusive: bool,
}

/// Canonical error codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // --- Path / entity ---
    /// The file or directory name specified does not exist.
    NotFound,
    /// The object specified already exists.
    AlreadyExists,
    /// A non-directory was specified in a directory operation.
    NotDirectory,
    /// A directory was specified in a non-directory operation.
    IsDirectory,
    /// An attempt was made to remove a directory that was not empty.
    NotEmpty,
    /// A name exceeded the server's name length limit.
    NameTooLong,
    /// The file handle refers to an object that no longer exists
    /// or whose access has been revoked.
    StaleHandle,
    /// The file handle failed internal consistency checks.
    InvalidHandle,

    // --- Access ---
    /// The caller does not have permission to perform the operation.
    AccessDenied,
    /// The caller is not the owner or a privileged user.
    PermissionDenied,
    /// The operation requires elevated privileges.
    PrivilegeRequired,
    /// The operation requires authentication.
    AuthRequired,

    // --- Resource ---
    /// No space left on the backing store.
    NoSpace,
    /// The user's quota on the server has been exceeded.
    QuotaExceeded,
    /// A modifying operation was attempted on a read-only export.
    ReadOnly,
    /// A hard I/O error occurred while processing the operation.
    IOError,

    // --- Locking ---
    /// The requested lock conflicts with an existing lock.
    LockConflict(ConflictInfo),
    /// The byte range is locked and the operation cannot proceed.
    Locked,
    /// Granting the request would complete a cycle in the wait-for graph.
    /// Carries the owner the request would have waited on.
    Deadlock { would_wait_on: LockOwner },
    /// The server is in its grace period; only reclaims are accepted.
    /// Carries the time remaining until normal service resumes.
    GracePeriod { remaining: Duration },
    /// A per-file, per-client, or total lock count cap was exceeded.
    LockLimitExceeded,

    // --- Connection ---
    /// The adapter's configured connection limit was reached.
    ConnectionLimitReached,

    // --- Protocol ---
    /// The operation is not supported.
    NotSupported,
    /// An argument was invalid for the operation.
    InvalidArgument,
    /// A name component contained an invalid character.
    BadCharacter,
    /// A name component was syntactically invalid (for example `/`).
    BadName,
    /// The requested protocol minor version is not supported.
    MinorVersionMismatch,
    /// The operation requires a current filehandle and none is set.
    NoFilehandle,
    /// The stateid's sequence number lags the server's.
    OldStateid,
    /// The stateid does not designate any known state.
    BadStateid,
    /// The stateid was issued by a previous server instance.
    StaleStateid,
    /// The lease covering the stateid has expired.
    Expired,
    /// The open-owner sequence number is neither the successor
    /// nor a replay of the last request.
    BadSeqid,
    /// The client id was issued by a previous server instance
    /// or the confirm verifier did not match.
    StaleClientId,
    /// The client id is in use by a client with different credentials.
    ClidInUse,
    /// The opcode is not a legal NFSv4 operation.
    OpIllegal,
    /// A reclaim was attempted outside the grace period.
    NoGrace,
    /// The request exceeded a server resource limit.
    Resource,
    /// The operation is inconsistent with the state's open mode.
    OpenMode,
    /// The requested share access or deny mode conflicts with
    /// an existing share reservation.
    ShareDenied,
}

impl Error {
    /// True for errors the lock manager reports on acquire paths.
    pub fn is_lock_rejection(&self) -> bool {
        matches!(
            self,
            Error::LockConflict(_)
                | Error::Locked
                | Error::Deadlock { .. }
                | Error::GracePeriod { .. }
                | Error::LockLimitExceeded
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "no such file or directory"),
            Error::AlreadyExists => write!(f, "object already exists"),
            Error::NotDirectory => write!(f, "not a directory"),
            Error::IsDirectory => write!(f, "is a directory"),
            Error::NotEmpty => write!(f, "directory not empty"),
            Error::NameTooLong => write!(f, "name too long"),
            Error::StaleHandle => write!(f, "stale file handle"),
            Error::InvalidHandle => write!(f, "invalid file handle"),
            Error::AccessDenied => write!(f, "access denied"),
            Error::PermissionDenied => write!(f, "permission denied"),
            Error::PrivilegeRequired => write!(f, "privilege required"),
            Error::AuthRequired => write!(f, "authentication required"),
            Error::NoSpace => write!(f, "no space left on device"),
            Error::QuotaExceeded => write!(f, "quota exceeded"),
            Error::ReadOnly => write!(f, "read-only filesystem"),
            Error::IOError => write!(f, "i/o error"),
            Error::LockConflict(c) => write!(
                f,
                "lock conflict with {} over [{}, {})",
                c.owner,
                c.range.offset,
                c.range.end()
            ),
            Error::Locked => write!(f, "byte range is locked"),
            Error::Deadlock { would_wait_on } => {
                write!(f, "deadlock: waiting on {} would close a cycle", would_wait_on)
            }
            Error::GracePeriod { remaining } => {
                write!(f, "server in grace period, {}s remaining", remaining.as_secs())
            }
            Error::LockLimitExceeded => write!(f, "lock limit exceeded"),
            Error::ConnectionLimitReached => write!(f, "connection limit reached"),
            Error::NotSupported => write!(f, "operation not supported"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::BadCharacter => write!(f, "invalid character in name"),
            Error::BadName => write!(f, "invalid name"),
            Error::MinorVersionMismatch => write!(f, "minor version mismatch"),
            Error::NoFilehandle => write!(f, "no current filehandle"),
            Error::OldStateid => write!(f, "old stateid"),
            Error::BadStateid => write!(f, "bad stateid"),
            Error::StaleStateid => write!(f, "stale stateid"),
            Error::Expired => write!(f, "lease expired"),
            Error::BadSeqid => write!(f, "bad sequence id"),
            Error::StaleClientId => write!(f, "stale client id"),
            Error::ClidInUse => write!(f, "client id in use"),
            Error::OpIllegal => write!(f, "illegal operation"),
            Error::NoGrace => write!(f, "reclaim outside grace period"),
            Error::Resource => write!(f, "resource limit exceeded"),
            Error::OpenMode => write!(f, "operation inconsistent with open mode"),
            Error::ShareDenied => write!(f, "share reservation denied"),
        }
    }
}

impl std::error::Error for Error {}
