//! The OPEN family: OPEN, OPEN_CONFIRM, OPEN_DOWNGRADE, CLOSE.
//!
//! Every operation here is sequenced by its open-owner's seqid; results
//! (success or failure) are cached as encoded bytes so a retransmitted
//! request replays byte-identically.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::meta::FileType;
use crate::xdr::{self, XdrReader};

use super::super::attr::Bitmap4;
use super::super::compound::{bad_xdr, CompoundContext, CompoundProcessor};
use super::super::state::{OpenClaim, SeqidDisposition, Stateid};
use super::super::status::{from_error, NfsStat4};
use super::super::{validate_component, NFS4_MAX_NAME_LEN};
use super::{read_owner4, read_stateid, write_change_info, write_stateid, OpOutput};

const OPEN4_CREATE: u32 = 1;
const CREATE_EXCLUSIVE4: u32 = 2;

const CLAIM_NULL: u32 = 0;
const CLAIM_PREVIOUS: u32 = 1;
const CLAIM_DELEGATE_CUR: u32 = 2;
const CLAIM_DELEGATE_PREV: u32 = 3;

/// OPEN4_RESULT_CONFIRM: the owner must OPEN_CONFIRM before further use.
const RESULT_CONFIRM: u32 = 2;

/// Delegation type NONE in the open result.
const OPEN_DELEGATE_NONE: u32 = 0;

/// Packs `(status, body)` into the replay cache representation.
fn cache_bytes(status: NfsStat4, body: &[u8]) -> Vec<u8> {
    let mut cached = vec![0u8; 4];
    BigEndian::write_u32(&mut cached, num_traits::ToPrimitive::to_u32(&status).unwrap_or(0));
    cached.extend_from_slice(body);
    cached
}

/// Unpacks a replayed result.
fn from_cache(cached: Vec<u8>) -> OpOutput {
    if cached.len() < 4 {
        return (NfsStat4::NFS4ERR_BAD_SEQID, Vec::new());
    }
    let status = num_traits::FromPrimitive::from_u32(BigEndian::read_u32(&cached[..4]))
        .unwrap_or(NfsStat4::NFS4ERR_BAD_SEQID);
    (status, cached[4..].to_vec())
}

enum DecodedClaim {
    Null { name: Vec<u8> },
    Previous,
    Delegate,
}

pub(crate) async fn open(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
    let share_access = xdr::read_u32(reader).map_err(bad_xdr)?;
    let share_deny = xdr::read_u32(reader).map_err(bad_xdr)?;
    let (client_id, owner_data) = read_owner4(reader)?;

    // openflag4: a CREATE variant carries attributes or a verifier that
    // must be consumed either way.
    let opentype = xdr::read_u32(reader).map_err(bad_xdr)?;
    let wants_create = opentype == OPEN4_CREATE;
    if wants_create {
        let createmode = xdr::read_u32(reader).map_err(bad_xdr)?;
        if createmode == CREATE_EXCLUSIVE4 {
            let _verf: [u8; 8] = xdr::read_array(reader).map_err(bad_xdr)?;
        } else {
            let _attrs_bitmap = Bitmap4::decode(reader).map_err(bad_xdr)?;
            let _attrs = xdr::read_vec_max(reader, 1 << 20).map_err(bad_xdr)?;
        }
    }

    // open_claim4. Delegation claims are NOTSUPP but their arguments are
    // consumed to keep the compound stream aligned.
    let claim_kind = xdr::read_u32(reader).map_err(bad_xdr)?;
    let claim = match claim_kind {
        CLAIM_NULL => DecodedClaim::Null {
            name: xdr::read_vec_max(reader, NFS4_MAX_NAME_LEN + 1).map_err(bad_xdr)?,
        },
        CLAIM_PREVIOUS => {
            let _delegate_type = xdr::read_u32(reader).map_err(bad_xdr)?;
            DecodedClaim::Previous
        }
        CLAIM_DELEGATE_CUR => {
            let _stateid = read_stateid(reader)?;
            let _name = xdr::read_vec_max(reader, NFS4_MAX_NAME_LEN + 1).map_err(bad_xdr)?;
            DecodedClaim::Delegate
        }
        CLAIM_DELEGATE_PREV => {
            let _name = xdr::read_vec_max(reader, NFS4_MAX_NAME_LEN + 1).map_err(bad_xdr)?;
            DecodedClaim::Delegate
        }
        _ => return Err(Error::InvalidArgument),
    };

    match processor.state.check_open_seqid(client_id, &owner_data, seqid).await? {
        SeqidDisposition::Replay(cached) => return Ok(from_cache(cached)),
        SeqidDisposition::Proceed => {}
    }

    let outcome = open_work(processor, ctx, client_id, &owner_data, share_access, share_deny, wants_create, claim)
        .await;
    let (status, body) = match outcome {
        Ok(output) => output,
        Err(err) => (from_error(&err), Vec::new()),
    };
    processor.state.record_result(client_id, &owner_data, cache_bytes(status, &body)).await;
    Ok((status, body))
}

#[allow(clippy::too_many_arguments)]
async fn open_work(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
    client_id: u64,
    owner_data: &[u8],
    share_access: u32,
    share_deny: u32,
    wants_create: bool,
    claim: DecodedClaim,
) -> Result<OpOutput> {
    if wants_create {
        // File creation goes through the metadata handlers, which are not
        // populated yet.
        return Err(Error::NotSupported);
    }
    let (file, state_claim) = match claim {
        DecodedClaim::Delegate => return Err(Error::NotSupported),
        DecodedClaim::Previous => {
            let current = ctx.current_fh.clone().ok_or(Error::NoFilehandle)?;
            (current, OpenClaim::Previous)
        }
        DecodedClaim::Null { name } => {
            let name = validate_component(&name)?.to_owned();
            let dir = ctx.current_fh.clone().ok_or(Error::NoFilehandle)?;
            let file = if dir.is_pseudo() {
                let pseudo = processor.pseudo();
                let node = pseudo.node(&dir).ok_or(Error::StaleHandle)?;
                pseudo.lookup(node, &name).ok_or(Error::NotFound)?;
                // Every pseudo child is a directory (exports included);
                // none can be opened as a file.
                return Err(Error::IsDirectory);
            } else {
                let file = processor.meta.lookup(&dir, &name).await?;
                let attrs = processor.meta.getattr(&file).await?;
                if attrs.file_type == FileType::Directory {
                    return Err(Error::IsDirectory);
                }
                file
            };
            (file, OpenClaim::Null)
        }
    };

    let (stateid, confirm_required) = processor
        .state
        .open(client_id, owner_data, &file, share_access, share_deny, state_claim)
        .await?;
    ctx.current_fh = Some(file);

    let mut body = Vec::new();
    write_stateid(&mut body, &stateid).map_err(|_| Error::Resource)?;
    write_change_info(&mut body).map_err(|_| Error::Resource)?;
    let rflags = if confirm_required { RESULT_CONFIRM } else { 0 };
    xdr::write_u32(&mut body, rflags).map_err(|_| Error::Resource)?;
    Bitmap4::new().encode(&mut body).map_err(|_| Error::Resource)?;
    xdr::write_u32(&mut body, OPEN_DELEGATE_NONE).map_err(|_| Error::Resource)?;
    Ok((NfsStat4::NFS4_OK, body))
}

/// Runs an owner-sequenced stateid operation with replay caching.
async fn sequenced<'a, F, Fut>(
    processor: &'a CompoundProcessor,
    stateid: Stateid,
    seqid: u32,
    work: F,
) -> Result<OpOutput>
where
    F: FnOnce(&'a CompoundProcessor, Stateid) -> Fut,
    Fut: std::future::Future<Output = Result<Stateid>>,
{
    processor.state.validate_stateid(&stateid).await?;
    let state = processor.state.open_state(&stateid).await.ok_or(Error::BadStateid)?;
    let (client_id, owner_data) = state.owner_key;
    match processor.state.check_open_seqid(client_id, &owner_data, seqid).await? {
        SeqidDisposition::Replay(cached) => return Ok(from_cache(cached)),
        SeqidDisposition::Proceed => {}
    }
    let outcome = work(processor, stateid).await;
    let (status, body) = match outcome {
        Ok(new_stateid) => {
            let mut body = Vec::new();
            write_stateid(&mut body, &new_stateid).map_err(|_| Error::Resource)?;
            (NfsStat4::NFS4_OK, body)
        }
        Err(err) => (from_error(&err), Vec::new()),
    };
    processor.state.record_result(client_id, &owner_data, cache_bytes(status, &body)).await;
    Ok((status, body))
}

pub(crate) async fn open_confirm(
    processor: &CompoundProcessor,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let stateid = read_stateid(reader)?;
    let seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
    sequenced(processor, stateid, seqid, |p, sid| async move {
        p.state.open_confirm(&sid).await
    })
    .await
}

pub(crate) async fn open_downgrade(
    processor: &CompoundProcessor,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let stateid = read_stateid(reader)?;
    let seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
    let share_access = xdr::read_u32(reader).map_err(bad_xdr)?;
    let share_deny = xdr::read_u32(reader).map_err(bad_xdr)?;
    sequenced(processor, stateid, seqid, move |p, sid| async move {
        p.state.open_downgrade(&sid, share_access, share_deny).await
    })
    .await
}

pub(crate) async fn close(
    processor: &CompoundProcessor,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
    let stateid = read_stateid(reader)?;
    sequenced(processor, stateid, seqid, |p, sid| async move { p.state.close(&sid).await })
        .await
}
