//! COMPOUND processing.
//!
//! A COMPOUND bundles operations that share a current/saved filehandle
//! context. Execution is strictly sequential, stops at the first non-OK
//! status, and echoes the opaque tag byte-for-byte. Per-connection RPC
//! serialization is the transport adapter's job; this processor is
//! reentrant across connections.

use std::sync::Arc;

use num_traits::{FromPrimitive, ToPrimitive};
use tracing::{debug, trace};

use crate::cancel::Token;
use crate::config::CoreConfig;
use crate::error::Error;
use crate::handle::FileHandle;
use crate::lock::LockManager;
use crate::meta::MetadataService;
use crate::share::ShareRegistry;
use crate::xdr::{self, XdrReader};

use super::pseudo::PseudoFs;
use super::state::StateManager;
use super::status::{from_error, NfsStat4, OpCode};
use super::NFS4_MAX_TAG_LEN;

/// Transport context accompanying one COMPOUND call.
#[derive(Clone)]
pub struct RpcContext {
    pub client_addr: String,
    pub cancel: Token,
}

impl RpcContext {
    pub fn local(addr: &str) -> Self {
        RpcContext { client_addr: addr.to_owned(), cancel: Token::none() }
    }
}

/// Mutable per-compound state threaded through the op handlers.
///
/// Filehandle slots hold owned values, so PUTFH/SAVEFH/RESTOREFH copy on
/// assignment and the two slots can never alias each other.
pub struct CompoundContext {
    pub current_fh: Option<FileHandle>,
    pub saved_fh: Option<FileHandle>,
    pub client_addr: String,
    pub cancel: Token,
}

/// One encoded operation result: opcode, status, then the op-specific
/// body that follows the status on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpResult {
    pub opcode: u32,
    pub status: NfsStat4,
    pub body: Vec<u8>,
}

/// Decoded-and-processed COMPOUND reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compound4Res {
    pub status: NfsStat4,
    pub tag: Vec<u8>,
    pub results: Vec<OpResult>,
}

impl Compound4Res {
    fn bare(status: NfsStat4, tag: Vec<u8>) -> Self {
        Compound4Res { status, tag, results: Vec::new() }
    }

    /// Serializes the reply as a COMPOUND4res.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        xdr::write_variant(&mut out, self.status).expect("status encodes");
        xdr::write_vec(&mut out, &self.tag).expect("tag encodes");
        xdr::write_u32(&mut out, self.results.len() as u32).expect("count encodes");
        for result in &self.results {
            xdr::write_u32(&mut out, result.opcode).expect("opcode encodes");
            xdr::write_variant(&mut out, result.status).expect("status encodes");
            out.extend_from_slice(&result.body);
        }
        out
    }
}

/// Everything the op handlers reach for, wired once at startup.
pub struct CompoundProcessor {
    pub(crate) state: Arc<StateManager>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) shares: Arc<ShareRegistry>,
    pub(crate) meta: Arc<dyn MetadataService>,
    pub(crate) config: CoreConfig,
}

impl CompoundProcessor {
    pub fn new(
        state: Arc<StateManager>,
        locks: Arc<LockManager>,
        shares: Arc<ShareRegistry>,
        meta: Arc<dyn MetadataService>,
        config: CoreConfig,
    ) -> Self {
        CompoundProcessor { state, locks, shares, meta, config }
    }

    /// The pseudo tree reflects the share registry at call time; shares
    /// added or removed at runtime appear on the next COMPOUND.
    pub(crate) fn pseudo(&self) -> PseudoFs {
        PseudoFs::build(&self.shares)
    }

    /// Processes one COMPOUND payload (everything after the RPC header).
    pub async fn process(&self, payload: &[u8], rpc: &RpcContext) -> Compound4Res {
        let mut reader = XdrReader::new(payload);
        let Ok(tag) = xdr::read_vec_max(&mut reader, NFS4_MAX_TAG_LEN) else {
            return Compound4Res::bare(NfsStat4::NFS4ERR_BADXDR, Vec::new());
        };
        let Ok(minor_version) = xdr::read_u32(&mut reader) else {
            return Compound4Res::bare(NfsStat4::NFS4ERR_BADXDR, tag);
        };
        if minor_version != 0 {
            return Compound4Res::bare(NfsStat4::NFS4ERR_MINOR_VERS_MISMATCH, tag);
        }
        let Ok(op_count) = xdr::read_u32(&mut reader) else {
            return Compound4Res::bare(NfsStat4::NFS4ERR_BADXDR, tag);
        };
        if op_count as usize > self.config.max_compound_ops {
            return Compound4Res::bare(NfsStat4::NFS4ERR_RESOURCE, tag);
        }

        let mut ctx = CompoundContext {
            current_fh: None,
            saved_fh: None,
            client_addr: rpc.client_addr.clone(),
            cancel: rpc.cancel.clone(),
        };
        let mut results: Vec<OpResult> = Vec::with_capacity(op_count as usize);
        let mut status = NfsStat4::NFS4_OK;

        for index in 0..op_count {
            if ctx.cancel.is_cancelled() {
                debug!(index, "compound cancelled between operations");
                break;
            }
            let Ok(opcode_raw) = xdr::read_u32(&mut reader) else {
                status = NfsStat4::NFS4ERR_BADXDR;
                results.push(OpResult {
                    opcode: OpCode::OP_ILLEGAL.to_u32().expect("opcode encodes"),
                    status,
                    body: Vec::new(),
                });
                break;
            };
            let Some(opcode) = OpCode::from_u32(opcode_raw).filter(|c| *c != OpCode::OP_ILLEGAL)
            else {
                // Unknown or explicitly illegal opcode: the result entry
                // carries OP_ILLEGAL, not the bogus code.
                status = NfsStat4::NFS4ERR_OP_ILLEGAL;
                results.push(OpResult {
                    opcode: OpCode::OP_ILLEGAL.to_u32().expect("opcode encodes"),
                    status,
                    body: Vec::new(),
                });
                break;
            };

            if super::ops::requires_current_fh(opcode) && ctx.current_fh.is_none() {
                status = NfsStat4::NFS4ERR_NOFILEHANDLE;
                results.push(OpResult { opcode: opcode_raw, status, body: Vec::new() });
                break;
            }

            trace!(?opcode, index, "dispatch");
            let outcome = super::ops::dispatch(self, opcode, &mut ctx, &mut reader).await;
            let (op_status, body) = match outcome {
                Ok((op_status, body)) => (op_status, body),
                Err(err) => (from_error(&err), Vec::new()),
            };
            status = op_status;
            results.push(OpResult { opcode: opcode_raw, status: op_status, body });
            if op_status != NfsStat4::NFS4_OK {
                break;
            }
        }

        Compound4Res { status, tag, results }
    }
}

/// Decode-failure shorthand used by the op handlers: malformed operation
/// arguments surface as invalid-argument, not a dropped connection.
pub(crate) fn bad_xdr(_: xdr::Error) -> Error {
    Error::InvalidArgument
}
