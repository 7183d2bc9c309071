//! Filehandle context operations: PUTROOTFH, PUTPUBFH, PUTFH, GETFH,
//! SAVEFH, RESTOREFH.

use crate::error::{Error, Result};
use crate::handle::FileHandle;
use crate::xdr::{self, XdrReader};

use super::super::compound::{bad_xdr, CompoundContext, CompoundProcessor};
use super::super::status::NfsStat4;
use super::super::NFS4_FHSIZE;
use super::OpOutput;

pub(crate) fn putrootfh(processor: &CompoundProcessor, ctx: &mut CompoundContext) -> Result<OpOutput> {
    ctx.current_fh = Some(processor.pseudo().root_handle());
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}

/// The public filehandle is the pseudo root as well.
pub(crate) fn putpubfh(processor: &CompoundProcessor, ctx: &mut CompoundContext) -> Result<OpOutput> {
    putrootfh(processor, ctx)
}

pub(crate) fn putfh(ctx: &mut CompoundContext, reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    let bytes = xdr::read_vec_max(reader, NFS4_FHSIZE).map_err(bad_xdr)?;
    let handle = FileHandle::from_wire(bytes).ok_or(Error::InvalidHandle)?;
    ctx.current_fh = Some(handle);
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}

pub(crate) fn getfh(ctx: &mut CompoundContext) -> Result<OpOutput> {
    let handle = ctx.current_fh.as_ref().ok_or(Error::NoFilehandle)?;
    let mut body = Vec::new();
    xdr::write_vec(&mut body, handle.as_bytes()).map_err(|_| Error::Resource)?;
    Ok((NfsStat4::NFS4_OK, body))
}

/// Copy-on-set: the slots hold owned handles, so saving then mutating
/// the current handle cannot alias the saved one.
pub(crate) fn savefh(ctx: &mut CompoundContext) -> Result<OpOutput> {
    let handle = ctx.current_fh.clone().ok_or(Error::NoFilehandle)?;
    ctx.saved_fh = Some(handle);
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}

pub(crate) fn restorefh(ctx: &mut CompoundContext) -> Result<OpOutput> {
    let handle = ctx.saved_fh.clone().ok_or(Error::NoFilehandle)?;
    ctx.current_fh = Some(handle);
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}
