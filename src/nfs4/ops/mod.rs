//! COMPOUND operation handlers, one file per operation family.
//!
//! Each handler decodes its own arguments from the shared XDR reader and
//! returns `(status, body)` where `body` is everything that follows the
//! status on the wire. Handlers must consume their arguments even when
//! the operation itself is unsupported, or the remaining compound stream
//! would desynchronize.

mod access;
mod client;
mod fh;
mod getattr;
mod lockops;
mod lookup;
mod notsupp;
mod open;
mod readdir;

use std::io::Write;

use crate::error::Result;
use crate::xdr::{self, XdrReader};

use super::compound::{bad_xdr, CompoundContext, CompoundProcessor};
use super::state::{Stateid, NFS4_OTHER_SIZE};
use super::status::{NfsStat4, OpCode};

/// Encoded status plus the result body that follows it.
pub(crate) type OpOutput = (NfsStat4, Vec<u8>);

/// True for operations that operate on the current filehandle; the
/// dispatcher answers `NFS4ERR_NOFILEHANDLE` before decoding their
/// arguments.
pub fn requires_current_fh(opcode: OpCode) -> bool {
    use OpCode::*;
    !matches!(
        opcode,
        OP_PUTFH
            | OP_PUTPUBFH
            | OP_PUTROOTFH
            | OP_RENEW
            | OP_RESTOREFH
            | OP_SAVEFH
            | OP_SETCLIENTID
            | OP_SETCLIENTID_CONFIRM
            | OP_RELEASE_LOCKOWNER
            | OP_DELEGPURGE
            | OP_ILLEGAL
    )
}

/// The dispatch table.
pub(crate) async fn dispatch(
    processor: &CompoundProcessor,
    opcode: OpCode,
    ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    use OpCode::*;
    match opcode {
        OP_PUTROOTFH => fh::putrootfh(processor, ctx),
        OP_PUTPUBFH => fh::putpubfh(processor, ctx),
        OP_PUTFH => fh::putfh(ctx, reader),
        OP_GETFH => fh::getfh(ctx),
        OP_SAVEFH => fh::savefh(ctx),
        OP_RESTOREFH => fh::restorefh(ctx),
        OP_LOOKUP => lookup::lookup(processor, ctx, reader).await,
        OP_LOOKUPP => lookup::lookupp(processor, ctx),
        OP_GETATTR => getattr::getattr(processor, ctx, reader).await,
        OP_ACCESS => access::access(ctx, reader),
        OP_READDIR => readdir::readdir(processor, ctx, reader).await,
        OP_SETCLIENTID => client::setclientid(processor, ctx, reader).await,
        OP_SETCLIENTID_CONFIRM => client::setclientid_confirm(processor, reader).await,
        OP_RENEW => client::renew(processor, reader).await,
        OP_OPEN => open::open(processor, ctx, reader).await,
        OP_OPEN_CONFIRM => open::open_confirm(processor, reader).await,
        OP_OPEN_DOWNGRADE => open::open_downgrade(processor, reader).await,
        OP_CLOSE => open::close(processor, reader).await,
        OP_LOCK => lockops::lock(processor, ctx, reader).await,
        OP_LOCKT => lockops::lockt(processor, ctx, reader).await,
        OP_LOCKU => lockops::locku(processor, ctx, reader).await,
        OP_RELEASE_LOCKOWNER => lockops::release_lockowner(processor, reader).await,
        // Phase-6 scope: file-data operations consume their arguments and
        // answer NOTSUPP until the real I/O handlers are populated.
        OP_READ => notsupp::read(reader),
        OP_WRITE => notsupp::write(reader),
        OP_COMMIT => notsupp::commit(reader),
        OP_CREATE => notsupp::create(reader),
        OP_REMOVE => notsupp::remove(reader),
        OP_RENAME => notsupp::rename(reader),
        OP_LINK => notsupp::link(reader),
        OP_READLINK => notsupp::readlink(),
        OP_SETATTR => notsupp::setattr(reader),
        OP_VERIFY => notsupp::verify(reader),
        OP_NVERIFY => notsupp::nverify(reader),
        OP_OPENATTR => notsupp::openattr(reader),
        OP_SECINFO => notsupp::secinfo(reader),
        OP_DELEGPURGE => notsupp::delegpurge(reader),
        OP_DELEGRETURN => notsupp::delegreturn(reader),
        OP_ILLEGAL => Ok((NfsStat4::NFS4ERR_OP_ILLEGAL, Vec::new())),
    }
}

// --- shared wire helpers ---

pub(crate) fn read_stateid(reader: &mut XdrReader<'_>) -> Result<Stateid> {
    let seqid = xdr::read_u32(reader).map_err(bad_xdr)?;
    let mut other = [0u8; NFS4_OTHER_SIZE];
    std::io::Read::read_exact(reader, &mut other)
        .map_err(|e| bad_xdr(xdr::Error::IO(e)))?;
    Ok(Stateid { seqid, other })
}

pub(crate) fn write_stateid(dest: &mut dyn Write, stateid: &Stateid) -> std::io::Result<()> {
    xdr::write_u32(dest, stateid.seqid)?;
    dest.write_all(&stateid.other)
}

/// change_info4 for operations this server performs non-atomically.
pub(crate) fn write_change_info(dest: &mut dyn Write) -> std::io::Result<()> {
    xdr::write_bool(dest, false)?;
    xdr::write_u64(dest, 0)?;
    xdr::write_u64(dest, 0)
}

/// lock_owner4 / open_owner4: clientid then opaque owner data.
pub(crate) fn read_owner4(reader: &mut XdrReader<'_>) -> Result<(u64, Vec<u8>)> {
    let client_id = xdr::read_u64(reader).map_err(bad_xdr)?;
    let owner =
        xdr::read_vec_max(reader, super::NFS4_MAX_CLIENT_ID_LEN).map_err(bad_xdr)?;
    Ok((client_id, owner))
}
