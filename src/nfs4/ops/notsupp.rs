//! File-data operations pending their real handlers.
//!
//! Each function decodes and discards the operation's full argument
//! layout before answering NFS4ERR_NOTSUPP: an undersized decode here
//! would desynchronize every later operation in the compound.

use crate::error::Result;
use crate::xdr::{self, XdrReader};

use super::super::attr::Bitmap4;
use super::super::compound::bad_xdr;
use super::super::status::NfsStat4;
use super::super::NFS4_MAX_NAME_LEN;
use super::{read_stateid, OpOutput};

const MAX_WRITE_DATA: usize = 1 << 22;
const MAX_ATTR_DATA: usize = 1 << 20;
const MAX_LINK_TEXT: usize = 1024;

fn notsupp() -> Result<OpOutput> {
    Ok((NfsStat4::NFS4ERR_NOTSUPP, Vec::new()))
}

fn skip_fattr4(reader: &mut XdrReader<'_>) -> Result<()> {
    Bitmap4::decode(reader).map_err(bad_xdr)?;
    xdr::read_vec_max(reader, MAX_ATTR_DATA).map_err(bad_xdr)?;
    Ok(())
}

fn skip_component(reader: &mut XdrReader<'_>) -> Result<()> {
    xdr::read_vec_max(reader, NFS4_MAX_NAME_LEN + 1).map_err(bad_xdr)?;
    Ok(())
}

pub(crate) fn read(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    read_stateid(reader)?;
    xdr::read_u64(reader).map_err(bad_xdr)?;
    xdr::read_u32(reader).map_err(bad_xdr)?;
    notsupp()
}

pub(crate) fn write(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    read_stateid(reader)?;
    xdr::read_u64(reader).map_err(bad_xdr)?;
    xdr::read_u32(reader).map_err(bad_xdr)?;
    xdr::read_vec_max(reader, MAX_WRITE_DATA).map_err(bad_xdr)?;
    notsupp()
}

pub(crate) fn commit(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    xdr::read_u64(reader).map_err(bad_xdr)?;
    xdr::read_u32(reader).map_err(bad_xdr)?;
    notsupp()
}

pub(crate) fn create(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    const NF4LNK: u32 = 5;
    const NF4BLK: u32 = 3;
    const NF4CHR: u32 = 4;
    let objtype = xdr::read_u32(reader).map_err(bad_xdr)?;
    match objtype {
        NF4LNK => {
            xdr::read_vec_max(reader, MAX_LINK_TEXT).map_err(bad_xdr)?;
        }
        NF4BLK | NF4CHR => {
            xdr::read_u32(reader).map_err(bad_xdr)?;
            xdr::read_u32(reader).map_err(bad_xdr)?;
        }
        _ => {}
    }
    skip_component(reader)?;
    skip_fattr4(reader)?;
    notsupp()
}

pub(crate) fn remove(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    skip_component(reader)?;
    notsupp()
}

pub(crate) fn rename(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    skip_component(reader)?;
    skip_component(reader)?;
    notsupp()
}

pub(crate) fn link(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    skip_component(reader)?;
    notsupp()
}

pub(crate) fn readlink() -> Result<OpOutput> {
    notsupp()
}

pub(crate) fn setattr(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    read_stateid(reader)?;
    skip_fattr4(reader)?;
    notsupp()
}

pub(crate) fn verify(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    skip_fattr4(reader)?;
    notsupp()
}

pub(crate) fn nverify(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    skip_fattr4(reader)?;
    notsupp()
}

pub(crate) fn openattr(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    xdr::read_bool(reader).map_err(bad_xdr)?;
    notsupp()
}

pub(crate) fn secinfo(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    skip_component(reader)?;
    notsupp()
}

pub(crate) fn delegpurge(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    xdr::read_u64(reader).map_err(bad_xdr)?;
    notsupp()
}

pub(crate) fn delegreturn(reader: &mut XdrReader<'_>) -> Result<OpOutput> {
    read_stateid(reader)?;
    notsupp()
}
