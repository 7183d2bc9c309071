//! READDIR over pseudo directories.
//!
//! Pseudo directories are always fully enumerable: the cookie is the
//! child index plus one and `eof` is always true. Real directories wait
//! on the metadata enumeration handlers.

use crate::error::{Error, Result};
use crate::xdr::{self, XdrReader};

use super::super::attr::{encode_fattr4, Bitmap4};
use super::super::compound::{bad_xdr, CompoundContext, CompoundProcessor};
use super::super::status::NfsStat4;
use super::getattr::pseudo_source;
use super::OpOutput;

pub(crate) async fn readdir(
    processor: &CompoundProcessor,
    ctx: &mut CompoundContext,
    reader: &mut XdrReader<'_>,
) -> Result<OpOutput> {
    let cookie = xdr::read_u64(reader).map_err(bad_xdr)?;
    let _cookie_verf: [u8; 8] = xdr::read_array(reader).map_err(bad_xdr)?;
    let _dircount = xdr::read_u32(reader).map_err(bad_xdr)?;
    let _maxcount = xdr::read_u32(reader).map_err(bad_xdr)?;
    let attr_request = Bitmap4::decode(reader).map_err(bad_xdr)?;

    let current = ctx.current_fh.clone().ok_or(Error::NoFilehandle)?;
    if !current.is_pseudo() {
        return Err(Error::NotSupported);
    }
    let pseudo = processor.pseudo();
    let dir = pseudo.node(&current).ok_or(Error::StaleHandle)?;

    let mut body = Vec::new();
    // Echo a zero cookie verifier: pseudo enumeration is stable.
    xdr::write_array(&mut body, [0u8; 8]).map_err(|_| Error::Resource)?;

    // Children at index >= cookie (cookie = index + 1 of the last entry
    // returned, zero on the first call).
    for (index, child) in dir.children.iter().enumerate().skip(cookie as usize) {
        xdr::write_bool(&mut body, true).map_err(|_| Error::Resource)?;
        xdr::write_u64(&mut body, index as u64 + 1).map_err(|_| Error::Resource)?;
        xdr::write_string(&mut body, &child.name).map_err(|_| Error::Resource)?;
        let source = pseudo_source(processor, child);
        let (present, attr_data) =
            encode_fattr4(&attr_request, &source).map_err(|_| Error::Resource)?;
        present.encode(&mut body).map_err(|_| Error::Resource)?;
        xdr::write_vec(&mut body, &attr_data).map_err(|_| Error::Resource)?;
    }
    // End of entry list, then eof: pseudo directories never paginate.
    xdr::write_bool(&mut body, false).map_err(|_| Error::Resource)?;
    xdr::write_bool(&mut body, true).map_err(|_| Error::Resource)?;
    Ok((NfsStat4::NFS4_OK, body))
}
