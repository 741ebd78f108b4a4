//! A minimal ONC RPC/TCP transport for NFSv4 COMPOUND calls.
//!
//! This is a reference transport, not a general ONC RPC client: it only
//! speaks the record-marking framing and COMPOUND4 procedure this
//! translator needs, with auth flavor pinned to `AUTH_NONE`. Production
//! deployments that need Kerberos or a connection pool should swap this
//! module out behind [`crate::rpc::NfsRpcClient`].

use crate::nfs4::ops::{CompoundArgs, CompoundResult};
use crate::nfs4::wire::{decode_compound_reply, encode_compound_call};
use crate::rpc::{NfsRpcClient, RpcError};
use dashmap::DashMap;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

const LAST_FRAGMENT_BIT: u32 = 1 << 31;

/// A connected NFSv4 COMPOUND client, backed by a background reader and
/// writer task so `compound()` calls from many handlers can share one TCP
/// connection without serializing on a lock around the socket.
pub struct TcpNfsClient {
    next_xid: AtomicU32,
    pending: Arc<DashMap<u32, oneshot::Sender<CompoundResult>>>,
    write_tx: mpsc::Sender<Vec<u8>>,
}

impl TcpNfsClient {
    pub async fn connect(addr: &str) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        let pending: Arc<DashMap<u32, oneshot::Sender<CompoundResult>>> = Arc::new(DashMap::new());
        let (write_tx, write_rx) = mpsc::channel::<Vec<u8>>(64);

        tokio::spawn(run_writer(write_half, write_rx));
        tokio::spawn(run_reader(read_half, pending.clone()));

        Ok(TcpNfsClient {
            next_xid: AtomicU32::new(1),
            pending,
            write_tx,
        })
    }
}

async fn run_writer(mut write_half: tokio::net::tcp::OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        if let Err(err) = write_half.write_all(&frame).await {
            log::warn!("NFS transport write failed, dropping connection: {err}");
            return;
        }
    }
}

async fn run_reader(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    pending: Arc<DashMap<u32, oneshot::Sender<CompoundResult>>>,
) {
    loop {
        match read_record(&mut read_half).await {
            Ok(body) => match decode_compound_reply(&body) {
                Ok((xid, result)) => {
                    if let Some((_, sender)) = pending.remove(&xid) {
                        let _ = sender.send(result);
                    } else {
                        log::warn!("NFS reply for unknown xid {xid}, discarding");
                    }
                }
                Err(err) => log::warn!("discarding malformed NFS reply: {err}"),
            },
            Err(err) => {
                log::warn!("NFS transport read failed, connection closed: {err}");
                return;
            }
        }
    }
}

/// Reads one complete RPC record: a sequence of fragments terminated by the
/// one with the high bit of its 4-byte marker set.
async fn read_record(read_half: &mut tokio::net::tcp::OwnedReadHalf) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let marker = read_half.read_u32().await?;
        let last = marker & LAST_FRAGMENT_BIT != 0;
        let len = (marker & !LAST_FRAGMENT_BIT) as usize;
        let mut fragment = vec![0u8; len];
        read_half.read_exact(&mut fragment).await?;
        body.extend_from_slice(&fragment);
        if last {
            return Ok(body);
        }
    }
}

#[async_trait::async_trait]
impl NfsRpcClient for TcpNfsClient {
    async fn compound(&self, args: CompoundArgs) -> Result<CompoundResult, RpcError> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let body = encode_compound_call(xid, &args)?;
        let mut frame = Vec::with_capacity(body.len() + 4);
        frame.extend_from_slice(&((body.len() as u32) | LAST_FRAGMENT_BIT).to_be_bytes());
        frame.extend_from_slice(&body);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(xid, tx);
        if self.write_tx.send(frame).await.is_err() {
            self.pending.remove(&xid);
            return Err(RpcError::Disconnected);
        }
        rx.await.map_err(|_| RpcError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_fragment_bit_matches_rfc1057_record_marking() {
        assert_eq!(LAST_FRAGMENT_BIT, 0x8000_0000);
    }
}
