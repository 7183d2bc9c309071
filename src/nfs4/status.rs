//! NFSv4 status codes and the core-error translation.

use num_derive::{FromPrimitive, ToPrimitive};

use crate::error::Error;

/// NFSv4 status (`nfsstat4`, RFC 7530 §13).
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum NfsStat4 {
    NFS4_OK = 0,
    NFS4ERR_PERM = 1,
    NFS4ERR_NOENT = 2,
    NFS4ERR_IO = 5,
    NFS4ERR_NXIO = 6,
    NFS4ERR_ACCESS = 13,
    NFS4ERR_EXIST = 17,
    NFS4ERR_XDEV = 18,
    NFS4ERR_NOTDIR = 20,
    NFS4ERR_ISDIR = 21,
    NFS4ERR_INVAL = 22,
    NFS4ERR_FBIG = 27,
    NFS4ERR_NOSPC = 28,
    NFS4ERR_ROFS = 30,
    NFS4ERR_MLINK = 31,
    NFS4ERR_NAMETOOLONG = 63,
    NFS4ERR_NOTEMPTY = 66,
    NFS4ERR_DQUOT = 69,
    NFS4ERR_STALE = 70,
    NFS4ERR_BADHANDLE = 10001,
    NFS4ERR_BAD_COOKIE = 10003,
    NFS4ERR_NOTSUPP = 10004,
    NFS4ERR_TOOSMALL = 10005,
    NFS4ERR_SERVERFAULT = 10006,
    NFS4ERR_BADTYPE = 10007,
    NFS4ERR_DELAY = 10008,
    NFS4ERR_SAME = 10009,
    NFS4ERR_DENIED = 10010,
    NFS4ERR_EXPIRED = 10011,
    NFS4ERR_LOCKED = 10012,
    NFS4ERR_GRACE = 10013,
    NFS4ERR_FHEXPIRED = 10014,
    NFS4ERR_SHARE_DENIED = 10015,
    NFS4ERR_WRONGSEC = 10016,
    NFS4ERR_CLID_INUSE = 10017,
    NFS4ERR_RESOURCE = 10018,
    NFS4ERR_MOVED = 10019,
    NFS4ERR_NOFILEHANDLE = 10020,
    NFS4ERR_MINOR_VERS_MISMATCH = 10021,
    NFS4ERR_STALE_CLIENTID = 10022,
    NFS4ERR_STALE_STATEID = 10023,
    NFS4ERR_OLD_STATEID = 10024,
    NFS4ERR_BAD_STATEID = 10025,
    NFS4ERR_BAD_SEQID = 10026,
    NFS4ERR_NOT_SAME = 10027,
    NFS4ERR_LOCK_RANGE = 10028,
    NFS4ERR_SYMLINK = 10029,
    NFS4ERR_RESTOREFH = 10030,
    NFS4ERR_LEASE_MOVED = 10031,
    NFS4ERR_ATTRNOTSUPP = 10032,
    NFS4ERR_NO_GRACE = 10033,
    NFS4ERR_RECLAIM_BAD = 10034,
    NFS4ERR_RECLAIM_CONFLICT = 10035,
    NFS4ERR_BADXDR = 10036,
    NFS4ERR_LOCKS_HELD = 10037,
    NFS4ERR_OPENMODE = 10038,
    NFS4ERR_BADOWNER = 10039,
    NFS4ERR_BADCHAR = 10040,
    NFS4ERR_BADNAME = 10041,
    NFS4ERR_BAD_RANGE = 10042,
    NFS4ERR_LOCK_NOTSUPP = 10043,
    NFS4ERR_OP_ILLEGAL = 10044,
    NFS4ERR_DEADLOCK = 10045,
    NFS4ERR_FILE_OPEN = 10046,
    NFS4ERR_ADMIN_REVOKED = 10047,
    NFS4ERR_CB_PATH_DOWN = 10048,
}

/// Centralized mapper from the core taxonomy to NFSv4 wire status.
///
/// Each protocol module carries exactly one of these; the core itself
/// never knows wire codes.
pub fn from_error(error: &Error) -> NfsStat4 {
    use NfsStat4::*;
    match error {
        Error::NotFound => NFS4ERR_NOENT,
        Error::AlreadyExists => NFS4ERR_EXIST,
        Error::NotDirectory => NFS4ERR_NOTDIR,
        Error::IsDirectory => NFS4ERR_ISDIR,
        Error::NotEmpty => NFS4ERR_NOTEMPTY,
        Error::NameTooLong => NFS4ERR_NAMETOOLONG,
        Error::StaleHandle => NFS4ERR_STALE,
        Error::InvalidHandle => NFS4ERR_BADHANDLE,
        Error::AccessDenied => NFS4ERR_ACCESS,
        Error::PermissionDenied => NFS4ERR_PERM,
        Error::PrivilegeRequired => NFS4ERR_PERM,
        Error::AuthRequired => NFS4ERR_WRONGSEC,
        Error::NoSpace => NFS4ERR_NOSPC,
        Error::QuotaExceeded => NFS4ERR_DQUOT,
        Error::ReadOnly => NFS4ERR_ROFS,
        Error::IOError => NFS4ERR_IO,
        Error::LockConflict(_) => NFS4ERR_DENIED,
        Error::Locked => NFS4ERR_LOCKED,
        Error::Deadlock { .. } => NFS4ERR_DEADLOCK,
        Error::GracePeriod { .. } => NFS4ERR_GRACE,
        Error::LockLimitExceeded => NFS4ERR_RESOURCE,
        Error::ConnectionLimitReached => NFS4ERR_RESOURCE,
        Error::NotSupported => NFS4ERR_NOTSUPP,
        Error::InvalidArgument => NFS4ERR_INVAL,
        Error::BadCharacter => NFS4ERR_BADCHAR,
        Error::BadName => NFS4ERR_BADNAME,
        Error::MinorVersionMismatch => NFS4ERR_MINOR_VERS_MISMATCH,
        Error::NoFilehandle => NFS4ERR_NOFILEHANDLE,
        Error::OldStateid => NFS4ERR_OLD_STATEID,
        Error::BadStateid => NFS4ERR_BAD_STATEID,
        Error::StaleStateid => NFS4ERR_STALE_STATEID,
        Error::Expired => NFS4ERR_EXPIRED,
        Error::BadSeqid => NFS4ERR_BAD_SEQID,
        Error::StaleClientId => NFS4ERR_STALE_CLIENTID,
        Error::ClidInUse => NFS4ERR_CLID_INUSE,
        Error::OpIllegal => NFS4ERR_OP_ILLEGAL,
        Error::NoGrace => NFS4ERR_NO_GRACE,
        Error::Resource => NFS4ERR_RESOURCE,
        Error::OpenMode => NFS4ERR_OPENMODE,
        Error::ShareDenied => NFS4ERR_SHARE_DENIED,
    }
}

/// NFSv4 operation numbers (`nfs_opnum4`, RFC 7530 §16).
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum OpCode {
    OP_ACCESS = 3,
    OP_CLOSE = 4,
    OP_COMMIT = 5,
    OP_CREATE = 6,
    OP_DELEGPURGE = 7,
    OP_DELEGRETURN = 8,
    OP_GETATTR = 9,
    OP_GETFH = 10,
    OP_LINK = 11,
    OP_LOCK = 12,
    OP_LOCKT = 13,
    OP_LOCKU = 14,
    OP_LOOKUP = 15,
    OP_LOOKUPP = 16,
    OP_NVERIFY = 17,
    OP_OPEN = 18,
    OP_OPENATTR = 19,
    OP_OPEN_CONFIRM = 20,
    OP_OPEN_DOWNGRADE = 21,
    OP_PUTFH = 22,
    OP_PUTPUBFH = 23,
    OP_PUTROOTFH = 24,
    OP_READ = 25,
    OP_READDIR = 26,
    OP_READLINK = 27,
    OP_REMOVE = 28,
    OP_RENAME = 29,
    OP_RENEW = 30,
    OP_RESTOREFH = 31,
    OP_SAVEFH = 32,
    OP_SECINFO = 33,
    OP_SETATTR = 34,
    OP_SETCLIENTID = 35,
    OP_SETCLIENTID_CONFIRM = 36,
    OP_VERIFY = 37,
    OP_WRITE = 38,
    OP_RELEASE_LOCKOWNER = 39,
    OP_ILLEGAL = 10044,
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::{FromPrimitive, ToPrimitive};

    #[test]
    fn status_codes_are_wire_exact() {
        assert_eq!(NfsStat4::NFS4_OK.to_u32(), Some(0));
        assert_eq!(NfsStat4::NFS4ERR_GRACE.to_u32(), Some(10013));
        assert_eq!(NfsStat4::NFS4ERR_OP_ILLEGAL.to_u32(), Some(10044));
        assert_eq!(NfsStat4::from_u32(10021), Some(NfsStat4::NFS4ERR_MINOR_VERS_MISMATCH));
    }

    #[test]
    fn opcode_round_trip() {
        assert_eq!(OpCode::from_u32(24), Some(OpCode::OP_PUTROOTFH));
        assert_eq!(OpCode::OP_ILLEGAL.to_u32(), Some(10044));
        assert_eq!(OpCode::from_u32(2), None);
    }

    #[test]
    fn lock_errors_map_to_lock_statuses() {
        assert_eq!(
            from_error(&Error::Deadlock { would_wait_on: crate::handle::LockOwner::new("x") }),
            NfsStat4::NFS4ERR_DEADLOCK
        );
        assert_eq!(
            from_error(&Error::GracePeriod { remaining: std::time::Duration::from_secs(1) }),
            NfsStat4::NFS4ERR_GRACE
        );
        assert_eq!(from_error(&Error::BadSeqid), NfsStat4::NFS4ERR_BAD_SEQID);
    }
}
