//! Session bootstrap: root file handle discovery and the SETCLIENTID
//! handshake, gated behind a one-shot readiness latch so the data path never
//! races on an empty `rootfh`/`clientid`.

use crate::errno::Errno;
use crate::nfs4::ops::{CompoundArgs, NfsArgOp, NfsResOp};
use crate::nfs4::status::NfsStat4;
use crate::rpc::NfsRpcClient;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio::sync::Notify;

/// A one-shot "bootstrap completed" gate. Data-path handlers check
/// [`BootstrapLatch::is_ready`] before touching the pool or issuing an RPC;
/// [`BootstrapLatch::release`] is called exactly once, after both bootstrap
/// compounds succeed.
#[derive(Debug, Default)]
pub struct BootstrapLatch {
    ready: AtomicBool,
    notify: Notify,
}

impl BootstrapLatch {
    pub fn new() -> Self {
        BootstrapLatch {
            ready: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn release(&self) {
        self.ready.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Waits for the latch to open. Only used by tests that need to
    /// synchronize with bootstrap completion; the data path never awaits
    /// this, it fails fast instead.
    pub async fn wait(&self) {
        if self.is_ready() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_ready() {
            return;
        }
        notified.await;
    }
}

/// Per-instance SETCLIENTID identity, generated once at facade construction:
/// a fixed verifier/name pair would collide across instances mounting the
/// same server.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub verifier: [u8; 8],
    pub client_name: Vec<u8>,
}

impl ClientIdentity {
    pub fn generate() -> Self {
        let mut verifier = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut verifier);
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        let client_name = format!("virtionfs-{}", hex_encode(&suffix)).into_bytes();
        ClientIdentity {
            verifier,
            client_name,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Outcome of a completed bootstrap: the facade's immutable state after the
/// latch releases.
#[derive(Debug)]
pub struct BootstrapResult {
    pub root_file_handle: Vec<u8>,
    pub client_id: u64,
}

#[derive(Debug)]
pub enum BootstrapError {
    Rpc(crate::rpc::RpcError),
    NfsStatus(NfsStat4),
    UnexpectedReply(&'static str),
}

impl From<BootstrapError> for Errno {
    fn from(err: BootstrapError) -> Self {
        match err {
            BootstrapError::Rpc(_) => Errno::EREMOTEIO,
            BootstrapError::NfsStatus(status) => crate::nfs4::status::error_to_fuse(status),
            BootstrapError::UnexpectedReply(_) => Errno::EIO,
        }
    }
}

/// Splits an absolute export path (`/a/b/c`) into the path components
/// looked up one LOOKUP at a time from the server's pseudo-root.
fn export_components(export: &str) -> Vec<Vec<u8>> {
    export
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.as_bytes().to_vec())
        .collect()
}

/// Runs root-file-handle discovery: `PUTROOTFH; LOOKUP(tok_1); ...;
/// LOOKUP(tok_n); GETFH`.
async fn discover_root_file_handle(
    client: &dyn NfsRpcClient,
    export: &str,
) -> Result<Vec<u8>, BootstrapError> {
    let mut args = CompoundArgs::new().push(NfsArgOp::PutRootFh);
    for name in export_components(export) {
        args = args.push(NfsArgOp::Lookup { name });
    }
    args = args.push(NfsArgOp::GetFh);

    let result = client.compound(args).await.map_err(BootstrapError::Rpc)?;
    if result.status != NfsStat4::Ok {
        return Err(BootstrapError::NfsStatus(result.status));
    }
    match result.results.last() {
        Some(NfsResOp::GetFh { file_handle }) => Ok(file_handle.clone()),
        _ => Err(BootstrapError::UnexpectedReply("expected GETFH result")),
    }
}

/// Runs the `SETCLIENTID`/`SETCLIENTID_CONFIRM` handshake, returning the
/// confirmed clientid.
async fn negotiate_client_id(
    client: &dyn NfsRpcClient,
    identity: &ClientIdentity,
) -> Result<u64, BootstrapError> {
    let set_args = CompoundArgs::new().push(NfsArgOp::SetClientId {
        verifier: identity.verifier,
        client_name: identity.client_name.clone(),
    });
    let set_result = client
        .compound(set_args)
        .await
        .map_err(BootstrapError::Rpc)?;
    if set_result.status != NfsStat4::Ok {
        return Err(BootstrapError::NfsStatus(set_result.status));
    }
    let (client_id, confirm_verifier) = match set_result.results.first() {
        Some(NfsResOp::SetClientId {
            client_id,
            verifier,
        }) => (*client_id, *verifier),
        _ => return Err(BootstrapError::UnexpectedReply("expected SETCLIENTID result")),
    };

    let confirm_args = CompoundArgs::new().push(NfsArgOp::SetClientIdConfirm {
        client_id,
        verifier: confirm_verifier,
    });
    let confirm_result = client
        .compound(confirm_args)
        .await
        .map_err(BootstrapError::Rpc)?;
    if confirm_result.status != NfsStat4::Ok {
        return Err(BootstrapError::NfsStatus(confirm_result.status));
    }
    Ok(client_id)
}

/// Runs both bootstrap procedures and releases `latch` iff both succeed.
/// Logs and leaves the latch closed on any failure: later data-path calls
/// keep observing `EAGAIN` rather than racing on half-initialised state.
pub async fn run(
    client: &dyn NfsRpcClient,
    export: &str,
    identity: &ClientIdentity,
    latch: &BootstrapLatch,
    root_file_handle_out: &OnceLock<Vec<u8>>,
    client_id_out: &std::sync::atomic::AtomicU64,
) -> Result<BootstrapResult, BootstrapError> {
    let root_file_handle = discover_root_file_handle(client, export).await?;
    log::info!("root file handle discovered for export {export}");

    let client_id = negotiate_client_id(client, identity).await?;
    log::info!("clientid {client_id} confirmed");

    let _ = root_file_handle_out.set(root_file_handle.clone());
    client_id_out.store(client_id, Ordering::SeqCst);
    latch.release();
    log::info!("bootstrap-ready latch released");

    Ok(BootstrapResult {
        root_file_handle,
        client_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_components_splits_on_slash_and_drops_empties() {
        assert_eq!(
            export_components("/srv/data"),
            vec![b"srv".to_vec(), b"data".to_vec()]
        );
        assert_eq!(export_components("/"), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn identity_generates_distinct_verifiers() {
        let a = ClientIdentity::generate();
        let b = ClientIdentity::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.client_name, b.client_name);
        assert!(a.client_name.starts_with(b"virtionfs-"));
    }

    #[test]
    fn latch_starts_closed() {
        let latch = BootstrapLatch::new();
        assert!(!latch.is_ready());
        latch.release();
        assert!(latch.is_ready());
    }

    #[tokio::test]
    async fn wait_returns_once_released() {
        let latch = std::sync::Arc::new(BootstrapLatch::new());
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move {
                latch.wait().await;
            })
        };
        tokio::task::yield_now().await;
        latch.release();
        waiter.await.unwrap();
    }
}
