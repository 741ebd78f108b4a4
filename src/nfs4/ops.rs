//! COMPOUND argument/result operation types.
//!
//! This mirrors the RFC 7530 `nfs_argop4`/`nfs_resop4` discriminated unions
//! closely enough to build and read the handful of COMPOUNDs this
//! translator ever sends, without attempting a general-purpose NFSv4 XDR
//! binding.

use crate::inode::Inode;
use crate::nfs4::attrs::Bitmap4;
use crate::nfs4::status::NfsStat4;
use std::sync::Arc;

/// `UID`/`GID`/mode createattrs carried by an `OPEN4_CREATE` with
/// `UNCHECKED4`, encoded on the wire in ascending `FATTR4_*` bit order
/// (MODE, then OWNER, then OWNER_GROUP).
#[derive(Debug, Clone, Copy)]
pub struct CreateAttrs {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// `openflag4`: whether this OPEN should create the target if it's missing.
#[derive(Debug, Clone, Copy)]
pub enum OpenType {
    NoCreate,
    Create(CreateAttrs),
}

/// One operation within a COMPOUND request's `argarray`.
#[derive(Debug, Clone)]
pub enum NfsArgOp {
    PutRootFh,
    PutFh { file_handle: Vec<u8> },
    GetFh,
    Lookup { name: Vec<u8> },
    GetAttr { bitmap: Bitmap4 },
    SetAttr { bitmap: Bitmap4, attrs: Vec<u8> },
    SetClientId { verifier: [u8; 8], client_name: Vec<u8> },
    SetClientIdConfirm { client_id: u64, verifier: [u8; 8] },
    Open {
        owner: u32,
        clientid: u64,
        share_access: u32,
        share_deny: u32,
        open_type: OpenType,
        name: Vec<u8>,
    },
    Read { stateid: [u8; 16], offset: u64, count: u32 },
    Write { stateid: [u8; 16], offset: u64, stable: bool, data: Vec<u8> },
    Commit { offset: u64, count: u32 },
}

/// A full COMPOUND request body: a tag (unused here, always empty) plus the
/// ordered operation list.
#[derive(Debug, Clone, Default)]
pub struct CompoundArgs {
    pub ops: Vec<NfsArgOp>,
}

impl CompoundArgs {
    pub fn new() -> Self {
        CompoundArgs { ops: Vec::new() }
    }

    pub fn push(mut self, op: NfsArgOp) -> Self {
        self.ops.push(op);
        self
    }
}

/// One operation's result within a COMPOUND reply's `resarray`. Each
/// variant covers only the fields this translator reads back.
#[derive(Debug, Clone)]
pub enum NfsResOp {
    PutRootFh,
    PutFh,
    GetFh { file_handle: Vec<u8> },
    Lookup,
    GetAttr { bitmap: Bitmap4, attrs: Vec<u8> },
    SetAttr,
    SetClientId { client_id: u64, verifier: [u8; 8] },
    SetClientIdConfirm,
    Open { stateid: [u8; 16] },
    Read { eof: bool, data: Vec<u8> },
    Write { count: u32 },
    Commit,
}

/// The decoded COMPOUND reply: the overall `nfsstat4` plus as many
/// `resarray` entries as the server returned before that status was set
/// (RFC 7530 4.2.1: an op failing aborts the compound, so the result array
/// is always a prefix of the request's op list).
#[derive(Debug, Clone)]
pub struct CompoundResult {
    pub status: NfsStat4,
    pub results: Vec<NfsResOp>,
}

impl CompoundResult {
    /// The `Nth` result entry, or `None` if the compound aborted before
    /// reaching it.
    pub fn nth(&self, index: usize) -> Option<&NfsResOp> {
        self.results.get(index)
    }
}

/// Builds the `PUTFH`/`PUTROOTFH` leading operation for a COMPOUND whose
/// target is `nodeid`. Returns `None` for an unknown non-root nodeid, which
/// callers must treat as `ESTALE`: the host handed back a nodeid the
/// translator never minted or has already forgotten.
pub fn put_fh_op(nodeid: u64, root_fh: &[u8], inode: Option<&Arc<Inode>>) -> Option<NfsArgOp> {
    const FUSE_ROOT_ID: u64 = 1;
    if nodeid == FUSE_ROOT_ID {
        return Some(NfsArgOp::PutFh {
            file_handle: root_fh.to_vec(),
        });
    }
    let inode = inode?;
    let file_handle = inode.file_handle()?;
    Some(NfsArgOp::PutFh {
        file_handle: file_handle.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::InodeTable;

    #[test]
    fn put_fh_uses_root_handle_for_root_nodeid() {
        let op = put_fh_op(1, b"root-handle", None).unwrap();
        match op {
            NfsArgOp::PutFh { file_handle } => assert_eq!(file_handle, b"root-handle"),
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn put_fh_uses_inode_handle_for_non_root_nodeid() {
        let table = InodeTable::new();
        let inode = table.getsert(42);
        inode.set_file_handle(b"child-handle".to_vec());
        let op = put_fh_op(42, b"root-handle", Some(&inode)).unwrap();
        match op {
            NfsArgOp::PutFh { file_handle } => assert_eq!(file_handle, b"child-handle"),
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn put_fh_fails_closed_on_unpublished_handle() {
        let table = InodeTable::new();
        let inode = table.getsert(42);
        assert!(put_fh_op(42, b"root-handle", Some(&inode)).is_none());
    }

    #[test]
    fn compound_result_nth_reflects_aborted_prefix() {
        let result = CompoundResult {
            status: NfsStat4::Noent,
            results: vec![NfsResOp::PutFh],
        };
        assert!(result.nth(0).is_some());
        assert!(result.nth(1).is_none());
    }
}
