//! Byte-range locking operations: LOCK, LOCKT, LOCKU, RELEASE_LOCKOWNER.
//!
//! The NFSv4 adapter never blocks inside LOCK: the *W lock types are
//! treated as polling hints, so every acquire runs non-blocking and a
//! conflict is returned to the client as NFS4ERR_DENIED with the
//! conflicting lock's description.

use crate::error::{ConflictInfo, Error, Result};
use crate::handle::{LockOwner, Range, ShareReservation};
use crate::lock::{AcquireOutcome, LockRequest, LockType};
use crate::xdr::{self, XdrReader};

use super::super::compound::{bad_xdr, CompoundContext, CompoundProcessor};
use super::super::state::StateManager;
use super::super::status::NfsStat4;
use super::{read_owner4, read_stateid, write_stateid, OpOutput};

const READ_LT: u32 = 1;
const WRITE_LT: u32 = 2;
const READW_LT: u32 = 3;
const WRITEW_LT: u32 = 4;

fn lock_type(wire: u32) -> Result<LockType> {
    match wire {
        READ_LT | READW_LT => Ok(LockType::Shared),
        WRITE_LT | WRITEW_LT => Ok(LockType::Exclusive),
        _ => Err(Error::InvalidArgument),
    }
}

/// NFSv4 length semantics: all-ones means to end of file, zero is
/// invalid, and the range must not wrap.
fn nfs4_range(offset: u64, length: u64) -> Result<Range> {
    if length == 0 {
        return Err(Error::InvalidArgument);
    }
    if length == u64::MAX {
        return Ok(Range::new(offset, 0));
    }
    if offset.checked_add(length).is_none() {
        return Err(Error::InvalidArgument);
    }
    Ok(Range::new(offset, length))
}

/// LOCK4denied body.
fn encode_denied(body: &mut Vec<u8>, conflict: &ConflictInfo) -> Result<()> {
    let length = if conflict.range.is_to_eof() { u64::MAX } else { conflict.range.length };
    xdr::write_u64(body, conflict.range.offset).map_err(|_| Error::Resource)?;
    xdr::write_u64(body, length).map_err(|_| Error::Resource)?;
    xdr::write_u32(body, if conflict.exclusive { WRITE_LT } else { READ_LT })
        .map_err(|_| Error::Resource)?;
    // The conflicting owner is reported by its opaque identity; its
    // numeric clientid is not reconstructible from the lock manager.
    xdr::write_u64(body, 0).map_err(|_| Error::Resource)?;
    xdr::write_vec(body, conflict.owner.0.as_bytes()).map_err(|_| Error::Resource)?;
    Ok(())
}

pub(crate) async fn lock(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let locktype = xdr::read_u32(reader).map_err(bad_xdr)?;
    let reclaim = xdr::read_bool(reader).map_err(bad_xdr)?;
    let offset = xdr::read_u64(reader).map_err(bad_xdr)?;
    let length = xdr::read_u64(reader).map_err(bad_xdr)?;
    let new_lock_owner = xdr::read_bool(reader).map_err(bad_xdr)?;

    let lock_stateid = if new_lock_owner {
        let _open_seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
        let open_stateid = read_stateid(reader)?;
        let _lock_seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
        let (_owner_client, owner_data) = read_owner4(reader)?;
        processor.state.validate_stateid(&open_stateid).await?;
        processor.state.lock_state(&open_stateid, &owner_data).await?
    } else {
        let lock_stateid = read_stateid(reader)?;
        let _lock_seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
        processor.state.validate_stateid(&lock_stateid).await?;
        lock_stateid
    };

    let rec = processor.state.lock_state_rec(&lock_stateid).await.ok_or(Error::BadStateid)?;
    let request = LockRequest {
        file: rec.file.clone(),
        owner: rec.stateid.lock_owner(),
        client_id: StateManager::lock_client_id(rec.client_id),
        lock_type: lock_type(locktype)?,
        range: nfs4_range(offset, length)?,
        reservation: ShareReservation::NONE,
        reclaim,
    };
    let outcome = processor.locks.acquire(request, false, &ctx.cancel).await?;
    match outcome {
        AcquireOutcome::Granted => {
            let granted = processor.state.bump_lock_state(&lock_stateid).await?;
            let mut body = Vec::new();
            write_stateid(&mut body, &granted).map_err(|_| Error::Resource)?;
            Ok((NfsStat4::NFS4_OK, body))
        }
        AcquireOutcome::Denied(conflict) => {
            let mut body = Vec::new();
            encode_denied(&mut body, &conflict)?;
            Ok((NfsStat4::NFS4ERR_DENIED, body))
        }
        AcquireOutcome::Deadlock { .. } => Ok((NfsStat4::NFS4ERR_DEADLOCK, Vec::new())),
        AcquireOutcome::GracePeriod { .. } => Ok((NfsStat4::NFS4ERR_GRACE, Vec::new())),
        AcquireOutcome::LimitExceeded => Ok((NfsStat4::NFS4ERR_RESOURCE, Vec::new())),
        AcquireOutcome::Cancelled => Ok((NfsStat4::NFS4ERR_DELAY, Vec::new())),
    }
}

pub(crate) async fn lockt(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let locktype = xdr::read_u32(reader).map_err(bad_xdr)?;
    let offset = xdr::read_u64(reader).map_err(bad_xdr)?;
    let length = xdr::read_u64(reader).map_err(bad_xdr)?;
    let (owner_client, owner_data) = read_owner4(reader)?;

    let file = ctx.current_fh.clone().ok_or(Error::NoFilehandle)?;
    // Use the caller's established lock-manager identity when it has one,
    // so its own locks never read as conflicts.
    let owner = match processor.state.find_lock_owner(owner_client, &owner_data).await {
        Some(owner) => owner,
        None => {
            let mut id = format!("nfs4:lockt:{owner_client:016x}:");
            for byte in &owner_data {
                id.push_str(&format!("{byte:02x}"));
            }
            LockOwner(id)
        }
    };
    let conflict = processor
        .locks
        .test(&file, &owner, lock_type(locktype)?, nfs4_range(offset, length)?)
        .await?;
    match conflict {
        None => Ok((NfsStat4::NFS4_OK, Vec::new())),
        Some(conflict) => {
            let mut body = Vec::new();
            encode_denied(&mut body, &conflict)?;
            Ok((NfsStat4::NFS4ERR_DENIED, body))
        }
    }
}

pub(crate) async fn locku(
    processor: &CompoundProcessor,
    _ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let _locktype = xdr::read_u32(reader).map_err(bad_xdr)?;
    let _seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
    let lock_stateid = read_stateid(reader)?;
    let offset = xdr::read_u64(reader).map_err(bad_xdr)?;
    let length = xdr::read_u64(reader).map_err(bad_xdr)?;

    processor.state.validate_stateid(&lock_stateid).await?;
    let rec = processor.state.lock_state_rec(&lock_stateid).await.ok_or(Error::BadStateid)?;
    processor
        .locks
        .release(&rec.file, &rec.stateid.lock_owner(), nfs4_range(offset, length)?)
        .await?;
    let bumped = processor.state.bump_lock_state(&lock_stateid).await?;
    let mut body = Vec::new();
    write_stateid(&mut body, &bumped).map_err(|_| Error::Resource)?;
    Ok((NfsStat4::NFS4_OK, body))
}

pub(crate) async fn release_lockowner(
    processor: &CompoundProcessor,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let (owner_client, owner_data) = read_owner4(reader)?;
    let owners = processor.state.release_lock_owner(owner_client, &owner_data).await;
    for owner in owners {
        processor.locks.release_all_for_owner(&owner).await?;
    }
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}
