//! The upward interface: typed request/response bodies exchanged with the
//! virtio-fs device emulator and FUSE session muxer. Both of those layers
//! live outside this crate; this module only defines the shapes a handler
//! reads from and writes into, plus the [`ReplySender`] trait boundary the
//! session muxer implements to actually deliver bytes to the host.

use crate::nfs4::attrs::{FuseAttr, FuseKStatfs};
use std::io::IoSlice;

/// The portion of `fuse_in_header` every handler needs: request id, target
/// nodeid, and the caller's credentials.
#[derive(Debug, Clone, Copy)]
pub struct InHeader {
    pub unique: u64,
    pub nodeid: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

/// `lookup(parent, name)` input.
#[derive(Debug, Clone)]
pub struct LookupIn {
    pub name: Vec<u8>,
}

bitflags::bitflags! {
    /// `FATTR4_SET_*`-equivalent mask of which `setattr` fields the host
    /// actually populated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetAttrValid: u32 {
        const MODE = 1 << 0;
        const SIZE = 1 << 1;
    }
}

/// `setattr(nodeid, mask, stat)` input.
#[derive(Debug, Clone, Copy)]
pub struct SetAttrIn {
    pub valid: SetAttrValid,
    pub mode: u32,
    pub size: u64,
}

bitflags::bitflags! {
    /// The subset of POSIX open flags this translator distinguishes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenInFlags: u32 {
        const O_CREAT = libc::O_CREAT as u32;
        const O_WRONLY = libc::O_WRONLY as u32;
        const O_RDWR = libc::O_RDWR as u32;
    }
}

/// `open(nodeid, flags)` input.
#[derive(Debug, Clone, Copy)]
pub struct OpenIn {
    pub flags: OpenInFlags,
    pub mode: u32,
}

/// `read(nodeid, off, size)` input.
#[derive(Debug, Clone, Copy)]
pub struct ReadIn {
    pub offset: u64,
    pub size: u32,
}

/// `write(nodeid, off, iov)` input. Only `iov[0]` is ever sent to the
/// server; the host is responsible for reissuing the remainder after a
/// short write.
#[derive(Debug, Clone)]
pub struct WriteIn {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// `fsync(nodeid, datasync)` input. `datasync` is accepted but ignored: the
/// translator always issues a full `COMMIT`.
#[derive(Debug, Clone, Copy)]
pub struct FsyncIn {
    pub datasync: bool,
}

/// `fuse_entry_out`-equivalent: a resolved nodeid plus its attributes.
#[derive(Debug, Clone, Copy)]
pub struct EntryOut {
    pub nodeid: u64,
    pub generation: u64,
    pub attr: FuseAttr,
}

/// `fuse_open_out`-equivalent. No `fh` field is returned: the nodeid alone
/// identifies the file to every subsequent operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOut {
    pub open_flags: u32,
}

/// Generic channel back to the host: delivers a completed reply body (or an
/// error) for the request identified by `unique`. The real implementation
/// is owned by the virtio-fs device emulator / FUSE session muxer, which
/// this crate treats as an external collaborator.
pub trait ReplySender: Send + Sync + 'static {
    fn send(&self, data: &[IoSlice<'_>]) -> std::io::Result<()>;
}

impl std::fmt::Debug for Box<dyn ReplySender> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Box<ReplySender>")
    }
}

/// Builds the `fuse_kstatfs`-shaped byte layout this translator reports,
/// matching the host's expected field order.
pub fn encode_statfs(statfs: &FuseKStatfs) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 * 5 + 4 * 3 + 4 + 6 * 4);
    buf.extend_from_slice(&statfs.blocks.to_ne_bytes());
    buf.extend_from_slice(&statfs.bfree.to_ne_bytes());
    buf.extend_from_slice(&statfs.bavail.to_ne_bytes());
    buf.extend_from_slice(&statfs.files.to_ne_bytes());
    buf.extend_from_slice(&statfs.ffree.to_ne_bytes());
    buf.extend_from_slice(&statfs.bsize.to_ne_bytes());
    buf.extend_from_slice(&statfs.namelen.to_ne_bytes());
    buf.extend_from_slice(&statfs.frsize.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // padding
    buf.extend_from_slice(&[0u8; 6 * 4]); // spare
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_statfs_has_expected_length() {
        let statfs = FuseKStatfs::default();
        assert_eq!(encode_statfs(&statfs).len(), 8 * 5 + 4 * 3 + 4 + 6 * 4);
    }

    #[test]
    fn setattr_valid_flags_are_distinct_bits() {
        let both = SetAttrValid::MODE | SetAttrValid::SIZE;
        assert!(both.contains(SetAttrValid::MODE));
        assert!(both.contains(SetAttrValid::SIZE));
    }
}
