//! Client-identity operations: SETCLIENTID, SETCLIENTID_CONFIRM, RENEW.

use crate::error::Result;
use crate::xdr::{self, XdrReader};

use super::super::compound::{bad_xdr, CompoundContext, CompoundProcessor};
use super::super::state::{CallbackInfo, Verifier, NFS4_VERIFIER_SIZE};
use super::super::status::NfsStat4;
use super::super::NFS4_MAX_CLIENT_ID_LEN;
use super::OpOutput;

fn read_verifier(reader: &mut XdrReader<'_>) -> Result<Verifier> {
    xdr::read_array::<NFS4_VERIFIER_SIZE>(reader).map_err(bad_xdr)
}

pub(crate) async fn setclientid(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    // nfs_client_id4
    let verifier = read_verifier(reader)?;
    let client_str = xdr::read_vec_max(reader, NFS4_MAX_CLIENT_ID_LEN).map_err(bad_xdr)?;
    // cb_client4
    let cb_program = xdr::read_u32(reader).map_err(bad_xdr)?;
    let net_id = xdr::read_string_max(reader, 128).map_err(bad_xdr)?;
    let addr = xdr::read_string_max(reader, 128).map_err(bad_xdr)?;
    let callback_ident = xdr::read_u32(reader).map_err(bad_xdr)?;

    let callback =
        CallbackInfo { program: cb_program, net_id, addr, ident: callback_ident };
    let (client_id, confirm) = processor
        .state
        .set_client_id(client_str, verifier, callback, ctx.client_addr.clone())
        .await?;

    let mut body = Vec::new();
    xdr::write_u64(&mut body, client_id).map_err(|_| crate::error::Error::Resource)?;
    xdr::write_array(&mut body, confirm).map_err(|_| crate::error::Error::Resource)?;
    Ok((NfsStat4::NFS4_OK, body))
}

pub(crate) async fn setclientid_confirm(
    processor: &CompoundProcessor,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let client_id = xdr::read_u64(reader).map_err(bad_xdr)?;
    let confirm = read_verifier(reader)?;
    processor.state.set_client_id_confirm(client_id, confirm).await?;
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}

pub(crate) async fn renew(
    processor: &CompoundProcessor,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let client_id = xdr::read_u64(reader).map_err(bad_xdr)?;
    processor.state.renew(client_id).await?;
    Ok((NfsStat4::NFS4_OK, Vec::new()))
}
