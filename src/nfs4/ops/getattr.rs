//! GETATTR: attribute encoding for pseudo nodes and real objects.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::meta::{FileAttributes, FileType};
use crate::xdr::XdrReader;

use super::super::attr::{encode_fattr4, AttrSource, Bitmap4, NF4DIR, NF4LNK, NF4REG};
use super::super::compound::{bad_xdr, CompoundContext, CompoundProcessor};
use super::super::pseudo::PseudoNode;
use super::super::status::NfsStat4;
use super::OpOutput;

fn unix_time(time: SystemTime) -> (i64, u32) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => (since.as_secs() as i64, since.subsec_nanos()),
        Err(_) => (0, 0),
    }
}

/// Pseudo directories report FSID `{0, 1}` and grant-all directory
/// attributes.
pub(crate) fn pseudo_source(
    processor: &CompoundProcessor,
    node: &PseudoNode,
) -> AttrSource {
    AttrSource {
        file_type: NF4DIR,
        change: 1,
        size: 0,
        fsid: (0, 1),
        fileid: node.fileid,
        mode: 0o555,
        numlinks: 2,
        owner: "root".to_owned(),
        owner_group: "root".to_owned(),
        space_used: 0,
        time_access: (0, 0),
        time_metadata: (0, 0),
        time_modify: (0, 0),
        lease_time: processor.config.lease_secs as u32,
        filehandle: node.handle.as_bytes().to_vec(),
        mounted_on_fileid: node.fileid,
    }
}

/// Real exports report FSID `{share index + 1, 0}`.
pub(crate) fn real_source(
    processor: &CompoundProcessor,
    handle: &crate::handle::FileHandle,
    attrs: &FileAttributes,
) -> AttrSource {
    let share_index = handle
        .decode()
        .and_then(|(share, _)| processor.shares.index_of(&share))
        .map(|i| i as u64 + 1)
        .unwrap_or(1);
    AttrSource {
        file_type: match attrs.file_type {
            FileType::Regular => NF4REG,
            FileType::Directory => NF4DIR,
            FileType::Symlink => NF4LNK,
        },
        change: attrs.change,
        size: attrs.size,
        fsid: (share_index, 0),
        fileid: attrs.fileid,
        mode: attrs.mode,
        numlinks: attrs.nlink,
        owner: attrs.owner.clone(),
        owner_group: attrs.group.clone(),
        space_used: attrs.size,
        time_access: unix_time(attrs.accessed),
        time_metadata: unix_time(attrs.created),
        time_modify: unix_time(attrs.modified),
        lease_time: processor.config.lease_secs as u32,
        filehandle: handle.as_bytes().to_vec(),
        mounted_on_fileid: attrs.fileid,
    }
}

pub(crate) async fn getattr(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let requested = Bitmap4::decode(reader).map_err(bad_xdr)?;
    let current = ctx.current_fh.clone().ok_or(Error::NoFilehandle)?;

    let source = if current.is_pseudo() {
        let pseudo = processor.pseudo();
        let node = pseudo.node(&current).ok_or(Error::StaleHandle)?;
        pseudo_source(processor, node)
    } else {
        let attrs = processor.meta.getattr(&current).await?;
        real_source(processor, &current, &attrs)
    };

    let (present, attr_data) = encode_fattr4(&requested, &source).map_err(|_| Error::Resource)?;
    let mut body = Vec::new();
    present.encode(&mut body).map_err(|_| Error::Resource)?;
    crate::xdr::write_vec(&mut body, &attr_data).map_err(|_| Error::Resource)?;
    Ok((NfsStat4::NFS4_OK, body))
}
