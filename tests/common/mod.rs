//! Shared fixture: an assembled core over in-memory stores, plus small
//! builders for COMPOUND payloads.

#![allow(dead_code)]

use std::sync::Arc;

use dittofs::config::CoreConfig;
use dittofs::content::MemoryBlockStore;
use dittofs::handle::FileHandle;
use dittofs::lock::store::MemoryLockStore;
use dittofs::meta::{FileAttributes, MemoryMetadata};
use dittofs::nfs4::compound::RpcContext;
use dittofs::nfs4::status::OpCode;
use dittofs::share::{Share, ShareRegistry};
use dittofs::{xdr, Core};

pub struct Fixture {
    pub core: Core,
    pub lock_store: Arc<MemoryLockStore>,
    pub block_store: Arc<MemoryBlockStore>,
    pub meta: Arc<MemoryMetadata>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(CoreConfig::default()).await
    }

    pub async fn with_config(config: CoreConfig) -> Self {
        let lock_store = Arc::new(MemoryLockStore::new());
        let block_store = Arc::new(MemoryBlockStore::new());
        let meta = Arc::new(MemoryMetadata::new());

        // Two exports with their root directories and one regular file.
        let shares = ShareRegistry::new(vec![
            Share { name: "export".into(), root_file_id: 100 },
            Share { name: "data".into(), root_file_id: 200 },
        ]);
        let export_root = FileHandle::share("export", 100);
        let data_root = FileHandle::share("data", 200);
        let report = FileHandle::share("export", 101);
        meta.insert(export_root.clone(), FileAttributes::directory(100));
        meta.insert(data_root, FileAttributes::directory(200));
        meta.insert(report.clone(), FileAttributes::regular(101, 42));
        meta.link(export_root, "report.txt", report);

        let core = Core::start(
            config,
            lock_store.clone(),
            block_store.clone(),
            meta.clone(),
            shares,
        )
        .await
        .expect("core starts");
        Fixture { core, lock_store, block_store, meta }
    }

    pub fn rpc(&self) -> RpcContext {
        RpcContext::local("127.0.0.1:1023")
    }
}

/// Assembles a COMPOUND payload from pre-encoded operations.
pub fn compound(tag: &[u8], ops: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    xdr::write_vec(&mut out, tag).unwrap();
    xdr::write_u32(&mut out, 0).unwrap();
    xdr::write_u32(&mut out, ops.len() as u32).unwrap();
    for op in ops {
        out.extend_from_slice(op);
    }
    out
}

fn op(code: OpCode) -> Vec<u8> {
    let mut out = Vec::new();
    xdr::write_variant(&mut out, code).unwrap();
    out
}

pub fn op_putrootfh() -> Vec<u8> {
    op(OpCode::OP_PUTROOTFH)
}

pub fn op_getfh() -> Vec<u8> {
    op(OpCode::OP_GETFH)
}

pub fn op_savefh() -> Vec<u8> {
    op(OpCode::OP_SAVEFH)
}

pub fn op_restorefh() -> Vec<u8> {
    op(OpCode::OP_RESTOREFH)
}

pub fn op_putfh(handle: &[u8]) -> Vec<u8> {
    let mut out = op(OpCode::OP_PUTFH);
    xdr::write_vec(&mut out, handle).unwrap();
    out
}

pub fn op_lookup(name: &str) -> Vec<u8> {
    let mut out = op(OpCode::OP_LOOKUP);
    xdr::write_string(&mut out, name).unwrap();
    out
}

pub fn op_getattr(bits: &[u32]) -> Vec<u8> {
    let mut out = op(OpCode::OP_GETATTR);
    dittofs::nfs4::attr::Bitmap4::from_bits(bits).encode(&mut out).unwrap();
    out
}

pub fn op_readdir() -> Vec<u8> {
    let mut out = op(OpCode::OP_READDIR);
    xdr::write_u64(&mut out, 0).unwrap();
    xdr::write_array(&mut out, [0u8; 8]).unwrap();
    xdr::write_u32(&mut out, 4096).unwrap();
    xdr::write_u32(&mut out, 4096).unwrap();
    dittofs::nfs4::attr::Bitmap4::from_bits(&[]).encode(&mut out).unwrap();
    out
}

pub fn op_setclientid(id: &[u8], verifier: [u8; 8]) -> Vec<u8> {
    let mut out = op(OpCode::OP_SETCLIENTID);
    xdr::write_array(&mut out, verifier).unwrap();
    xdr::write_vec(&mut out, id).unwrap();
    xdr::write_u32(&mut out, 0x40000000).unwrap();
    xdr::write_string(&mut out, "tcp").unwrap();
    xdr::write_string(&mut out, "127.0.0.1.8.1").unwrap();
    xdr::write_u32(&mut out, 1).unwrap();
    out
}

pub fn op_setclientid_confirm(client_id: u64, confirm: [u8; 8]) -> Vec<u8> {
    let mut out = op(OpCode::OP_SETCLIENTID_CONFIRM);
    xdr::write_u64(&mut out, client_id).unwrap();
    xdr::write_array(&mut out, confirm).unwrap();
    out
}

/// Parses a SETCLIENTID success body.
pub fn parse_setclientid(body: &[u8]) -> (u64, [u8; 8]) {
    let mut cursor = std::io::Cursor::new(body);
    let client_id = xdr::read_u64(&mut cursor).unwrap();
    let confirm = xdr::read_array::<8>(&mut cursor).unwrap();
    (client_id, confirm)
}

/// Parses a GETFH success body.
pub fn parse_getfh(body: &[u8]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(body);
    xdr::read_vec_max(&mut cursor, 128).unwrap()
}
