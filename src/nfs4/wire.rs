//! XDR encoding/decoding for the ONC RPC + NFSv4 COMPOUND messages this
//! translator sends. Only the operations named in [`crate::nfs4::ops`] are
//! handled; this is not a general NFSv4 codec.

use crate::nfs4::attrs::Bitmap4;
use crate::nfs4::ops::{CompoundArgs, CompoundResult, NfsArgOp, NfsResOp, OpenType};
use crate::nfs4::status::NfsStat4;
use crate::rpc::RpcError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

const ALIGNMENT: usize = 4;

const OP_PUTROOTFH: u32 = 24;
const OP_PUTFH: u32 = 22;
const OP_GETFH: u32 = 10;
const OP_LOOKUP: u32 = 15;
const OP_GETATTR: u32 = 9;
const OP_SETATTR: u32 = 34;
const OP_SETCLIENTID: u32 = 35;
const OP_SETCLIENTID_CONFIRM: u32 = 36;
const OP_OPEN: u32 = 18;
const OP_READ: u32 = 25;
const OP_WRITE: u32 = 38;
const OP_COMMIT: u32 = 5;

const NFS_PROGRAM: u32 = 100003;
const NFS_V4: u32 = 4;
const COMPOUND_PROC: u32 = 1;
const RPC_VERSION: u32 = 2;
const AUTH_NONE: u32 = 0;

fn padding(dest: &mut impl Write, n: usize) -> io::Result<()> {
    let pad = (ALIGNMENT - n % ALIGNMENT) % ALIGNMENT;
    dest.write_all(&[0u8; ALIGNMENT][..pad])
}

fn write_opaque(dest: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    dest.write_u32::<BigEndian>(bytes.len() as u32)?;
    dest.write_all(bytes)?;
    padding(dest, bytes.len())
}

fn write_bitmap(dest: &mut impl Write, bitmap: Bitmap4) -> io::Result<()> {
    dest.write_all(&bitmap.encode())
}

fn write_arg_op(dest: &mut impl Write, op: &NfsArgOp) -> io::Result<()> {
    match op {
        NfsArgOp::PutRootFh => {
            dest.write_u32::<BigEndian>(OP_PUTROOTFH)?;
        }
        NfsArgOp::PutFh { file_handle } => {
            dest.write_u32::<BigEndian>(OP_PUTFH)?;
            write_opaque(dest, file_handle)?;
        }
        NfsArgOp::GetFh => {
            dest.write_u32::<BigEndian>(OP_GETFH)?;
        }
        NfsArgOp::Lookup { name } => {
            dest.write_u32::<BigEndian>(OP_LOOKUP)?;
            write_opaque(dest, name)?;
        }
        NfsArgOp::GetAttr { bitmap } => {
            dest.write_u32::<BigEndian>(OP_GETATTR)?;
            write_bitmap(dest, *bitmap)?;
        }
        NfsArgOp::SetAttr { bitmap, attrs } => {
            dest.write_u32::<BigEndian>(OP_SETATTR)?;
            // stateid: anonymous, this translator never holds byte-range locks.
            dest.write_all(&[0u8; 16])?;
            write_bitmap(dest, *bitmap)?;
            write_opaque(dest, attrs)?;
        }
        NfsArgOp::SetClientId {
            verifier,
            client_name,
        } => {
            dest.write_u32::<BigEndian>(OP_SETCLIENTID)?;
            dest.write_all(verifier)?;
            write_opaque(dest, client_name)?;
            // callback_ident / cb_client: no callback channel is offered.
            dest.write_u32::<BigEndian>(0)?;
            write_opaque(dest, b"")?;
            dest.write_u32::<BigEndian>(0)?;
        }
        NfsArgOp::SetClientIdConfirm {
            client_id,
            verifier,
        } => {
            dest.write_u32::<BigEndian>(OP_SETCLIENTID_CONFIRM)?;
            dest.write_u64::<BigEndian>(*client_id)?;
            dest.write_all(verifier)?;
        }
        NfsArgOp::Open {
            owner,
            clientid,
            share_access,
            share_deny,
            open_type,
            name,
        } => {
            dest.write_u32::<BigEndian>(OP_OPEN)?;
            dest.write_u32::<BigEndian>(0)?; // seqid
            dest.write_u32::<BigEndian>(*share_access)?;
            dest.write_u32::<BigEndian>(*share_deny)?;
            // open_owner4: clientid + owner opaque
            dest.write_u64::<BigEndian>(*clientid)?;
            write_opaque(dest, &owner.to_be_bytes())?;
            match open_type {
                OpenType::NoCreate => {
                    dest.write_u32::<BigEndian>(0)?; // openflag4: OPEN4_NOCREATE
                }
                OpenType::Create(attrs) => {
                    dest.write_u32::<BigEndian>(1)?; // openflag4: OPEN4_CREATE
                    dest.write_u32::<BigEndian>(0)?; // createmode4: UNCHECKED4
                    let (bitmap, values) =
                        crate::nfs4::attrs::encode_create_attrs(attrs.mode, attrs.uid, attrs.gid);
                    write_bitmap(dest, bitmap)?;
                    write_opaque(dest, &values)?;
                }
            }
            // claim: CLAIM_FH (translator always resolves via PUTFH, never by name)
            dest.write_u32::<BigEndian>(4)?;
            let _ = name;
        }
        NfsArgOp::Read {
            stateid,
            offset,
            count,
        } => {
            dest.write_u32::<BigEndian>(OP_READ)?;
            dest.write_all(stateid)?;
            dest.write_u64::<BigEndian>(*offset)?;
            dest.write_u32::<BigEndian>(*count)?;
        }
        NfsArgOp::Write {
            stateid,
            offset,
            stable,
            data,
        } => {
            dest.write_u32::<BigEndian>(OP_WRITE)?;
            dest.write_all(stateid)?;
            dest.write_u64::<BigEndian>(*offset)?;
            dest.write_u32::<BigEndian>(if *stable { 1 } else { 0 })?;
            write_opaque(dest, data)?;
        }
        NfsArgOp::Commit { offset, count } => {
            dest.write_u32::<BigEndian>(OP_COMMIT)?;
            dest.write_u64::<BigEndian>(*offset)?;
            dest.write_u32::<BigEndian>(*count)?;
        }
    }
    Ok(())
}

/// Encodes a full RPC call frame (record-mark header handled by the
/// transport) wrapping a COMPOUND4args body.
pub fn encode_compound_call(xid: u32, args: &CompoundArgs) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(256);
    buf.write_u32::<BigEndian>(xid)?;
    buf.write_u32::<BigEndian>(0)?; // CALL
    buf.write_u32::<BigEndian>(RPC_VERSION)?;
    buf.write_u32::<BigEndian>(NFS_PROGRAM)?;
    buf.write_u32::<BigEndian>(NFS_V4)?;
    buf.write_u32::<BigEndian>(COMPOUND_PROC)?;
    buf.write_u32::<BigEndian>(AUTH_NONE)?; // cred flavor
    write_opaque(&mut buf, b"")?; // cred body
    buf.write_u32::<BigEndian>(AUTH_NONE)?; // verf flavor
    write_opaque(&mut buf, b"")?; // verf body

    write_opaque(&mut buf, b"")?; // COMPOUND4args.tag
    buf.write_u32::<BigEndian>(0)?; // minorversion
    buf.write_u32::<BigEndian>(args.ops.len() as u32)?;
    for op in &args.ops {
        write_arg_op(&mut buf, op)?;
    }
    Ok(buf)
}

fn read_opaque(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, RpcError> {
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| RpcError::Malformed(e.to_string()))? as usize;
    let mut data = vec![0u8; len];
    io::Read::read_exact(cursor, &mut data).map_err(|e| RpcError::Malformed(e.to_string()))?;
    let pad = (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT;
    cursor.set_position(cursor.position() + pad as u64);
    Ok(data)
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, RpcError> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|e| RpcError::Malformed(e.to_string()))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64, RpcError> {
    cursor
        .read_u64::<BigEndian>()
        .map_err(|e| RpcError::Malformed(e.to_string()))
}

fn read_stateid(cursor: &mut Cursor<&[u8]>) -> Result<[u8; 16], RpcError> {
    let mut stateid = [0u8; 16];
    io::Read::read_exact(cursor, &mut stateid).map_err(|e| RpcError::Malformed(e.to_string()))?;
    Ok(stateid)
}

fn read_bitmap(cursor: &mut Cursor<&[u8]>) -> Result<Bitmap4, RpcError> {
    let count = read_u32(cursor)?;
    let mut words = [0u32, 0u32];
    for word in words.iter_mut().take(count as usize).take(2) {
        *word = read_u32(cursor)?;
    }
    for _ in 2..count {
        read_u32(cursor)?;
    }
    Ok(Bitmap4(words))
}

fn read_res_op(cursor: &mut Cursor<&[u8]>, opcode: u32) -> Result<NfsResOp, RpcError> {
    match opcode {
        OP_PUTROOTFH => Ok(NfsResOp::PutRootFh),
        OP_PUTFH => Ok(NfsResOp::PutFh),
        OP_GETFH => Ok(NfsResOp::GetFh {
            file_handle: read_opaque(cursor)?,
        }),
        OP_LOOKUP => Ok(NfsResOp::Lookup),
        OP_GETATTR => {
            let bitmap = read_bitmap(cursor)?;
            let attrs = read_opaque(cursor)?;
            Ok(NfsResOp::GetAttr { bitmap, attrs })
        }
        OP_SETATTR => {
            let _bitmap = read_bitmap(cursor)?;
            Ok(NfsResOp::SetAttr)
        }
        OP_SETCLIENTID => {
            let client_id = read_u64(cursor)?;
            let mut verifier = [0u8; 8];
            io::Read::read_exact(cursor, &mut verifier)
                .map_err(|e| RpcError::Malformed(e.to_string()))?;
            Ok(NfsResOp::SetClientId {
                client_id,
                verifier,
            })
        }
        OP_SETCLIENTID_CONFIRM => Ok(NfsResOp::SetClientIdConfirm),
        OP_OPEN => {
            let stateid = read_stateid(cursor)?;
            // change_info4 (atomic bool + before/after u64) and delegation
            // trailer are consumed but not surfaced to the core.
            let _atomic = read_u32(cursor)?;
            let _before = read_u64(cursor)?;
            let _after = read_u64(cursor)?;
            let _rflags = read_u32(cursor)?;
            let _attrset = read_bitmap(cursor)?;
            let _delegation_type = read_u32(cursor)?;
            Ok(NfsResOp::Open { stateid })
        }
        OP_READ => {
            let eof = read_u32(cursor)? != 0;
            let data = read_opaque(cursor)?;
            Ok(NfsResOp::Read { eof, data })
        }
        OP_WRITE => {
            let count = read_u32(cursor)?;
            let _committed = read_u32(cursor)?;
            let mut _verifier = [0u8; 8];
            io::Read::read_exact(cursor, &mut _verifier)
                .map_err(|e| RpcError::Malformed(e.to_string()))?;
            Ok(NfsResOp::Write { count })
        }
        OP_COMMIT => {
            let mut _verifier = [0u8; 8];
            io::Read::read_exact(cursor, &mut _verifier)
                .map_err(|e| RpcError::Malformed(e.to_string()))?;
            Ok(NfsResOp::Commit)
        }
        other => Err(RpcError::Malformed(format!("unknown opcode {other}"))),
    }
}

/// Decodes an RPC reply frame's body as a COMPOUND4res, returning the
/// request's xid alongside the decoded result so the transport can match it
/// to its waiting caller.
pub fn decode_compound_reply(body: &[u8]) -> Result<(u32, CompoundResult), RpcError> {
    let mut cursor = Cursor::new(body);
    let xid = read_u32(&mut cursor)?;
    let msg_type = read_u32(&mut cursor)?;
    if msg_type != 1 {
        return Err(RpcError::Malformed(format!(
            "expected REPLY (1), got msg_type {msg_type}"
        )));
    }
    let reply_stat = read_u32(&mut cursor)?;
    if reply_stat != 0 {
        return Err(RpcError::Malformed(format!(
            "RPC call rejected or denied: reply_stat {reply_stat}"
        )));
    }
    let _verf_flavor = read_u32(&mut cursor)?;
    let _verf_body = read_opaque(&mut cursor)?;
    let accept_stat = read_u32(&mut cursor)?;
    if accept_stat != 0 {
        return Err(RpcError::Malformed(format!(
            "RPC call not accepted: accept_stat {accept_stat}"
        )));
    }

    let status_code = read_u32(&mut cursor)?;
    let _tag = read_opaque(&mut cursor)?;
    let op_count = read_u32(&mut cursor)?;

    let mut results = Vec::with_capacity(op_count as usize);
    for _ in 0..op_count {
        let opcode = read_u32(&mut cursor)?;
        let op_status = read_u32(&mut cursor)?;
        if op_status != 0 {
            // A failing op carries no result body; the compound-level
            // status already reflects the failure.
            break;
        }
        results.push(read_res_op(&mut cursor, opcode)?);
    }

    let status = NfsStat4::try_from_primitive(status_code)
        .map_err(|_| RpcError::Malformed(format!("unknown nfsstat4 {status_code}")))?;
    Ok((xid, CompoundResult { status, results }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfs4::attrs::fileid_attributes;
    use crate::nfs4::ops::CreateAttrs;

    #[test]
    fn encode_compound_call_starts_with_xid_and_call_type() {
        let args = CompoundArgs::new().push(NfsArgOp::PutRootFh);
        let encoded = encode_compound_call(0x1234, &args).unwrap();
        let mut cursor = Cursor::new(encoded.as_slice());
        assert_eq!(read_u32(&mut cursor).unwrap(), 0x1234);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0); // CALL
    }

    #[test]
    fn decode_rejects_non_reply_message_type() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap(); // CALL, not REPLY
        assert!(decode_compound_reply(&buf).is_err());
    }

    #[test]
    fn decode_round_trips_getattr_result() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(42).unwrap(); // xid
        buf.write_u32::<BigEndian>(1).unwrap(); // REPLY
        buf.write_u32::<BigEndian>(0).unwrap(); // MSG_ACCEPTED
        buf.write_u32::<BigEndian>(0).unwrap(); // verf flavor
        write_opaque(&mut buf, b"").unwrap(); // verf body
        buf.write_u32::<BigEndian>(0).unwrap(); // accept_stat SUCCESS
        buf.write_u32::<BigEndian>(0).unwrap(); // nfsstat4 NFS4_OK
        write_opaque(&mut buf, b"").unwrap(); // tag
        buf.write_u32::<BigEndian>(1).unwrap(); // one result
        buf.write_u32::<BigEndian>(OP_GETATTR).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap(); // op status OK
        write_bitmap(&mut buf, fileid_attributes()).unwrap();
        write_opaque(&mut buf, &7u64.to_be_bytes()).unwrap();

        let (xid, result) = decode_compound_reply(&buf).unwrap();
        assert_eq!(xid, 42);
        assert_eq!(result.status, NfsStat4::Ok);
        match &result.results[0] {
            NfsResOp::GetAttr { attrs, .. } => assert_eq!(attrs, &7u64.to_be_bytes()),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Matches the worked `open(O_CREAT, mode=0644)` example: OPEN4_CREATE,
    /// UNCHECKED4, share=BOTH/deny=NONE, claim=CLAIM_FH, a real clientid, and
    /// createattrs carrying the requested mode/uid/gid.
    #[test]
    fn encode_open_create_matches_worked_example() {
        let op = NfsArgOp::Open {
            owner: 7,
            clientid: 0x99,
            share_access: 3,
            share_deny: 0,
            open_type: OpenType::Create(CreateAttrs {
                mode: 0o644,
                uid: 1000,
                gid: 1000,
            }),
            name: Vec::new(),
        };
        let mut buf = Vec::new();
        write_arg_op(&mut buf, &op).unwrap();
        let mut cursor = Cursor::new(buf.as_slice());

        assert_eq!(read_u32(&mut cursor).unwrap(), OP_OPEN);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0); // seqid
        assert_eq!(read_u32(&mut cursor).unwrap(), 3); // share_access: BOTH
        assert_eq!(read_u32(&mut cursor).unwrap(), 0); // share_deny: NONE
        assert_eq!(read_u64(&mut cursor).unwrap(), 0x99); // open_owner4.clientid
        assert_eq!(read_opaque(&mut cursor).unwrap(), 7u32.to_be_bytes()); // open_owner4.owner
        assert_eq!(read_u32(&mut cursor).unwrap(), 1); // openflag4: OPEN4_CREATE
        assert_eq!(read_u32(&mut cursor).unwrap(), 0); // createmode4: UNCHECKED4
        let bitmap = read_bitmap(&mut cursor).unwrap();
        assert!(bitmap.is_set(34)); // FATTR4_MODE
        assert!(bitmap.is_set(37)); // FATTR4_OWNER
        assert!(bitmap.is_set(38)); // FATTR4_OWNER_GROUP
        let attrs = read_opaque(&mut cursor).unwrap();
        assert_eq!(&attrs[0..4], &0o644u32.to_be_bytes()); // MODE precedes OWNER/OWNER_GROUP
        assert_eq!(&attrs[4..8], &1000u32.to_be_bytes());
        assert_eq!(&attrs[8..12], &1000u32.to_be_bytes());
        assert_eq!(read_u32(&mut cursor).unwrap(), 4); // claim: CLAIM_FH
    }

    /// An OPEN without O_CREAT still carries the negotiated clientid and
    /// encodes OPEN4_NOCREATE with no createattrs.
    #[test]
    fn encode_open_nocreate_carries_clientid() {
        let op = NfsArgOp::Open {
            owner: 3,
            clientid: 0x42,
            share_access: 3,
            share_deny: 0,
            open_type: OpenType::NoCreate,
            name: Vec::new(),
        };
        let mut buf = Vec::new();
        write_arg_op(&mut buf, &op).unwrap();
        let mut cursor = Cursor::new(buf.as_slice());
        read_u32(&mut cursor).unwrap(); // opcode
        read_u32(&mut cursor).unwrap(); // seqid
        read_u32(&mut cursor).unwrap(); // share_access
        read_u32(&mut cursor).unwrap(); // share_deny
        assert_eq!(read_u64(&mut cursor).unwrap(), 0x42);
        read_opaque(&mut cursor).unwrap(); // owner
        assert_eq!(read_u32(&mut cursor).unwrap(), 0); // openflag4: OPEN4_NOCREATE
        assert_eq!(read_u32(&mut cursor).unwrap(), 4); // claim: CLAIM_FH
    }
}
