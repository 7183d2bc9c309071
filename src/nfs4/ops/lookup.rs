//! LOOKUP and LOOKUPP: namespace traversal with junction crossing.

use crate::error::{Error, Result};
use crate::xdr::{self, XdrReader};

use super::super::compound::{bad_xdr, CompoundContext, CompoundProcessor};
use super::super::status::NfsStat4;
use super::super::{validate_component, NFS4_MAX_NAME_LEN};
use super::OpOutput;

pub(crate) async fn lookup(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let raw = xdr::read_vec_max(reader, NFS4_MAX_NAME_LEN + 1).map_err(bad_xdr)?;
    let name = validate_component(&raw)?.to_owned();
    let current = ctx.current_fh.clone().ok_or(Error::NoFilehandle)?;

    if current.is_pseudo() {
        let pseudo = processor.pseudo();
        let dir = pseudo.node(&current).ok_or(Error::StaleHandle)?;
        let child = pseudo.lookup(dir, &name).ok_or(Error::NotFound)?;
        match &child.export {
            // Junction: leave the pseudo namespace for the share's real
            // root handle.
            Some(share_name) => {
                let share = processor.shares.get(share_name).ok_or(Error::StaleHandle)?;
                ctx.current_fh = Some(share.root_handle());
            }
            None => ctx.current_fh = Some(child.handle.clone()),
        }
        return Ok((NfsStat4::NFS4_OK, Vec::new()));
    }

    let child = processor.meta.lookup(&current, &name).await?;
    ctx.current_fh = Some(child);
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}

pub(crate) fn lookupp(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
) -> Result<OpOutput> {
    let current = ctx.current_fh.clone().ok_or(Error::NoFilehandle)?;
    if !current.is_pseudo() {
        // Walking from a share root back into the pseudo namespace (or
        // within a real directory tree) is not yet wired to metadata.
        return Err(Error::NotSupported);
    }
    let pseudo = processor.pseudo();
    let node = pseudo.node(&current).ok_or(Error::StaleHandle)?;
    let parent = pseudo.parent(node);
    ctx.current_fh = Some(parent.handle.clone());
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}
