//! The downward interface: how the translator's core talks to an NFSv4
//! server. Real transport work (ONC RPC framing, XDR encode/decode, retry
//! and reconnect policy) lives behind this trait so the handler logic in
//! [`crate::facade`] never has to know about sockets.

use crate::nfs4::ops::CompoundArgs;
use crate::nfs4::ops::CompoundResult;
use std::fmt;

/// Failure to even complete an RPC round trip -- distinct from an NFSv4
/// COMPOUND that completed but carries a failing `nfsstat4`, which shows up
/// as `Ok(CompoundResult { status, .. })` instead.
#[derive(Debug)]
pub enum RpcError {
    /// The connection dropped mid-call.
    Disconnected,
    /// The reply didn't parse as a COMPOUND4res.
    Malformed(String),
    /// The transport's I/O layer failed.
    Io(std::io::Error),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Disconnected => write!(f, "NFS server connection closed"),
            RpcError::Malformed(msg) => write!(f, "malformed COMPOUND reply: {msg}"),
            RpcError::Io(err) => write!(f, "NFS transport I/O error: {err}"),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io(err)
    }
}

/// An NFSv4 client capable of sending a COMPOUND procedure and awaiting its
/// reply. The real implementation (TCP, record marking, XDR) is an
/// implementation detail the core never reaches past this trait; tests
/// substitute a fake that answers in-process.
#[async_trait::async_trait]
pub trait NfsRpcClient: Send + Sync {
    async fn compound(&self, args: CompoundArgs) -> Result<CompoundResult, RpcError>;
}
