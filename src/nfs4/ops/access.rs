//! ACCESS: permission probing.
//!
//! Enforcement lives with the share-permission collaborator; the core
//! answers what the protocol requires. Pseudo directories grant every
//! requested bit.

use crate::error::{Error, Result};
use crate::xdr::{self, XdrReader};

use super::super::compound::{bad_xdr, CompoundContext};
use super::super::status::NfsStat4;
use super::OpOutput;

/// All ACCESS4 permission bits.
const ACCESS4_MASK: u32 = 0x3F;

pub(crate) fn access(ctx: &mut CompoundContext, reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    let requested = xdr::read_u32(reader).map_err(bad_xdr)?;
    let _current = ctx.current_fh.as_ref().ok_or(Error::NoFilehandle)?;
    let supported = requested & ACCESS4_MASK;
    let mut body = Vec::new();
    xdr::write_u32(&mut body, supported).map_err(|_| Error::Resource)?;
    xdr::write_u32(&mut body, supported).map_err(|_| Error::Resource)?;
    Ok((NfsStat4::NFS4_OK, body))
}
