//! End-to-end OPEN / LOCK flow over the COMPOUND dispatcher.

mod common;

use common::*;
use dittofs::nfs4::status::{NfsStat4, OpCode};
use dittofs::xdr;

fn op(code: OpCode) -> Vec<u8> {
    let mut out = Vec::new();
    xdr::write_variant(&mut out, code).unwrap();
    out
}

fn op_open(seqid: u32, client_id: u64, owner: &[u8], name: &str) -> Vec<u8> {
    let mut out = op(OpCode::OP_OPEN);
    xdr::write_u32(&mut out, seqid).unwrap();
    xdr::write_u32(&mut out, 1).unwrap(); // OPEN4_SHARE_ACCESS_READ
    xdr::write_u32(&mut out, 0).unwrap(); // OPEN4_SHARE_DENY_NONE
    xdr::write_u64(&mut out, client_id).unwrap();
    xdr::write_vec(&mut out, owner).unwrap();
    xdr::write_u32(&mut out, 0).unwrap(); // OPEN4_NOCREATE
    xdr::write_u32(&mut out, 0).unwrap(); // CLAIM_NULL
    xdr::write_string(&mut out, name).unwrap();
    out
}

fn op_open_confirm(stateid: &(u32, [u8; 12]), seqid: u32) -> Vec<u8> {
    let mut out = op(OpCode::OP_OPEN_CONFIRM);
    xdr::write_u32(&mut out, stateid.0).unwrap();
    out.extend_from_slice(&stateid.1);
    xdr::write_u32(&mut out, seqid).unwrap();
    out
}

fn op_close(seqid: u32, stateid: &(u32, [u8; 12])) -> Vec<u8> {
    let mut out = op(OpCode::OP_CLOSE);
    xdr::write_u32(&mut out, seqid).unwrap();
    xdr::write_u32(&mut out, stateid.0).unwrap();
    out.extend_from_slice(&stateid.1);
    out
}

fn op_lock(stateid: &(u32, [u8; 12]), client_id: u64, owner: &[u8]) -> Vec<u8> {
    let mut out = op(OpCode::OP_LOCK);
    xdr::write_u32(&mut out, 2).unwrap(); // WRITE_LT
    xdr::write_bool(&mut out, false).unwrap();
    xdr::write_u64(&mut out, 0).unwrap();
    xdr::write_u64(&mut out, 100).unwrap();
    xdr::write_bool(&mut out, true).unwrap(); // new lock owner
    xdr::write_u32(&mut out, 0).unwrap(); // open seqid (informational)
    xdr::write_u32(&mut out, stateid.0).unwrap();
    out.extend_from_slice(&stateid.1);
    xdr::write_u32(&mut out, 0).unwrap(); // lock seqid
    xdr::write_u64(&mut out, client_id).unwrap();
    xdr::write_vec(&mut out, owner).unwrap();
    out
}

fn op_lockt(client_id: u64, owner: &[u8], offset: u64, length: u64) -> Vec<u8> {
    let mut out = op(OpCode::OP_LOCKT);
    xdr::write_u32(&mut out, 2).unwrap(); // WRITE_LT
    xdr::write_u64(&mut out, offset).unwrap();
    xdr::write_u64(&mut out, length).unwrap();
    xdr::write_u64(&mut out, client_id).unwrap();
    xdr::write_vec(&mut out, owner).unwrap();
    out
}

fn parse_stateid(body: &[u8]) -> (u32, [u8; 12]) {
    let mut cursor = std::io::Cursor::new(body);
    let seqid = xdr::read_u32(&mut cursor).unwrap();
    let mut other = [0u8; 12];
    std::io::Read::read_exact(&mut cursor, &mut other).unwrap();
    (seqid, other)
}

#[tokio::test]
async fn open_confirm_lock_lockt_close() {
    let fixture = Fixture::new().await;
    let processor = &fixture.core.compound;
    let rpc = fixture.rpc();

    // Establish a confirmed client.
    let res = processor
        .process(&compound(b"", &[op_setclientid(b"flow", *b"verifier")]), &rpc)
        .await;
    let (client_id, confirm) = parse_setclientid(&res.results[0].body);
    let res = processor
        .process(&compound(b"", &[op_setclientid_confirm(client_id, confirm)]), &rpc)
        .await;
    assert_eq!(res.status, NfsStat4::NFS4_OK);

    // OPEN export/report.txt through the junction.
    let owner = b"owner-proc-1";
    let payload = compound(
        b"",
        &[op_putrootfh(), op_lookup("export"), op_open(1, client_id, owner, "report.txt")],
    );
    let res = processor.process(&payload, &rpc).await;
    assert_eq!(res.status, NfsStat4::NFS4_OK, "open failed: {:?}", res.results);
    let open_body = &res.results[2].body;
    let stateid = parse_stateid(&open_body[..16]);
    // rflags sit after stateid (16) + change_info (20).
    let rflags = {
        let mut cursor = std::io::Cursor::new(&open_body[36..]);
        xdr::read_u32(&mut cursor).unwrap()
    };
    assert_eq!(rflags & 2, 2, "fresh owner requires OPEN_CONFIRM");

    // OPEN_CONFIRM with the successor seqid.
    let payload = compound(b"", &[op_open_confirm(&stateid, 2)]);
    let res = processor.process(&payload, &rpc).await;
    assert_eq!(res.status, NfsStat4::NFS4_OK);
    let confirmed = parse_stateid(&res.results[0].body);
    assert_eq!(confirmed.1, stateid.1);
    assert!(confirmed.0 > stateid.0);

    // LOCK a write range under a new lock owner.
    let payload = compound(b"", &[op_lock(&confirmed, client_id, b"lock-owner-1")]);
    let res = processor.process(&payload, &rpc).await;
    assert_eq!(res.status, NfsStat4::NFS4_OK, "lock failed: {:?}", res.results);
    let _lock_stateid = parse_stateid(&res.results[0].body);

    // LOCKT from a different owner sees the conflict; the same owner
    // does not.
    let report = dittofs::handle::FileHandle::share("export", 101);
    let payload = compound(
        b"",
        &[op_putfh(report.as_bytes()), op_lockt(client_id, b"someone-else", 0, 10)],
    );
    let res = processor.process(&payload, &rpc).await;
    assert_eq!(res.status, NfsStat4::NFS4ERR_DENIED);
    let payload = compound(
        b"",
        &[op_putfh(report.as_bytes()), op_lockt(client_id, b"lock-owner-1", 0, 10)],
    );
    let res = processor.process(&payload, &rpc).await;
    assert_eq!(res.status, NfsStat4::NFS4_OK);

    // CLOSE with the next owner seqid releases the byte-range locks too.
    let payload = compound(b"", &[op_close(3, &confirmed)]);
    let res = processor.process(&payload, &rpc).await;
    assert_eq!(res.status, NfsStat4::NFS4_OK, "close failed: {:?}", res.results);
    let payload = compound(
        b"",
        &[op_putfh(report.as_bytes()), op_lockt(client_id, b"someone-else", 0, 10)],
    );
    let res = processor.process(&payload, &rpc).await;
    assert_eq!(res.status, NfsStat4::NFS4_OK, "locks must be gone after close");
    fixture.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn open_replays_byte_identical_results() {
    let fixture = Fixture::new().await;
    let processor = &fixture.core.compound;
    let rpc = fixture.rpc();

    let res = processor
        .process(&compound(b"", &[op_setclientid(b"replay", *b"verifier")]), &rpc)
        .await;
    let (client_id, confirm) = parse_setclientid(&res.results[0].body);
    processor
        .process(&compound(b"", &[op_setclientid_confirm(client_id, confirm)]), &rpc)
        .await;

    let payload = compound(
        b"",
        &[op_putrootfh(), op_lookup("export"), op_open(1, client_id, b"ow", "report.txt")],
    );
    let first = processor.process(&payload, &rpc).await;
    assert_eq!(first.status, NfsStat4::NFS4_OK);

    // The same seqid again replays the cached result bytes exactly.
    let second = processor.process(&payload, &rpc).await;
    assert_eq!(second.status, NfsStat4::NFS4_OK);
    assert_eq!(first.results[2].body, second.results[2].body);
    fixture.core.shutdown().await.unwrap();
}
