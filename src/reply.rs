//! Reply delivery.
//!
//! A `Reply` is created once per request to guarantee it is answered
//! exactly once: either handler logic calls one of `Reply`'s
//! self-consuming methods, or, if it is dropped first (a bug, or a panic
//! unwinding through the handler), `Drop` sends an `EIO` reply and logs a
//! warning so the gap is visible rather than silently hanging the host.

use crate::device::{EntryOut, OpenOut, ReplySender};
use crate::errno::Errno;
use crate::nfs4::attrs::{FuseAttr, FuseKStatfs};
use log::warn;
use std::io::IoSlice;

const FUSE_OUT_HEADER_LEN: usize = 16;

fn out_header(unique: u64, error: i32, body_len: usize) -> [u8; FUSE_OUT_HEADER_LEN] {
    let mut buf = [0u8; FUSE_OUT_HEADER_LEN];
    let len = (FUSE_OUT_HEADER_LEN + body_len) as u32;
    buf[0..4].copy_from_slice(&len.to_ne_bytes());
    buf[4..8].copy_from_slice(&error.to_ne_bytes());
    buf[8..16].copy_from_slice(&unique.to_ne_bytes());
    buf
}

fn encode_attr(attr: &FuseAttr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(88);
    buf.extend_from_slice(&attr.ino.to_ne_bytes());
    buf.extend_from_slice(&attr.size.to_ne_bytes());
    buf.extend_from_slice(&attr.blocks.to_ne_bytes());
    buf.extend_from_slice(&attr.atime.to_ne_bytes());
    buf.extend_from_slice(&attr.mtime.to_ne_bytes());
    buf.extend_from_slice(&attr.ctime.to_ne_bytes());
    buf.extend_from_slice(&attr.atimensec.to_ne_bytes());
    buf.extend_from_slice(&attr.mtimensec.to_ne_bytes());
    buf.extend_from_slice(&attr.ctimensec.to_ne_bytes());
    buf.extend_from_slice(&attr.mode.to_ne_bytes());
    buf.extend_from_slice(&attr.nlink.to_ne_bytes());
    buf.extend_from_slice(&attr.uid.to_ne_bytes());
    buf.extend_from_slice(&attr.gid.to_ne_bytes());
    buf.extend_from_slice(&attr.rdev.to_ne_bytes());
    buf.extend_from_slice(&attr.blksize.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // padding
    buf
}

/// Holds the identifiers needed to answer a single request. Ownership of
/// `sender` (`Some` until consumed) is what makes "reply sent at most
/// once" checkable at compile time: every terminal method takes `self` by
/// value.
#[derive(Debug)]
pub struct Reply {
    unique: u64,
    sender: Option<Box<dyn ReplySender>>,
}

impl Reply {
    pub fn new<S: ReplySender>(unique: u64, sender: S) -> Reply {
        Reply {
            unique,
            sender: Some(Box::new(sender)),
        }
    }

    fn send_raw(mut self, error: i32, body: &[u8]) {
        let sender = self.sender.take().expect("Reply consumed twice");
        let header = out_header(self.unique, error, body.len());
        let iov = [IoSlice::new(&header), IoSlice::new(body)];
        if let Err(err) = sender.send(&iov) {
            warn!("failed to deliver reply for request {}: {err}", self.unique);
        }
    }

    pub fn ok(self) {
        self.send_raw(0, &[]);
    }

    pub fn error(self, errno: Errno) {
        self.send_raw(errno.as_negative(), &[]);
    }

    pub fn attr(self, attr: FuseAttr) {
        let body = encode_attr(&attr);
        self.send_raw(0, &body);
    }

    pub fn entry(self, entry: EntryOut) {
        let mut body = Vec::with_capacity(16 + 88);
        body.extend_from_slice(&entry.nodeid.to_ne_bytes());
        body.extend_from_slice(&entry.generation.to_ne_bytes());
        body.extend_from_slice(&encode_attr(&entry.attr));
        self.send_raw(0, &body);
    }

    pub fn opened(self, open: OpenOut) {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&open.open_flags.to_ne_bytes());
        body.extend_from_slice(&0u32.to_ne_bytes()); // padding
        self.send_raw(0, &body);
    }

    pub fn written(self, size: u32) {
        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&size.to_ne_bytes());
        body.extend_from_slice(&0u32.to_ne_bytes()); // padding
        self.send_raw(0, &body);
    }

    pub fn data(self, data: Vec<u8>) {
        self.send_raw(0, &data);
    }

    pub fn statfs(self, statfs: FuseKStatfs) {
        let body = crate::device::encode_statfs(&statfs);
        self.send_raw(0, &body);
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            warn!(
                "reply not sent for request {}, replying with EIO",
                self.unique
            );
            let header = out_header(self.unique, Errno::EIO.as_negative(), 0);
            let iov = [IoSlice::new(&header)];
            let _ = sender.send(&iov);
        }
    }
}
