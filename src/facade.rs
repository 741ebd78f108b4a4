//! The filesystem facade: owns the pool, inode table, bootstrap state,
//! and RPC client, and exposes one async method per FUSE data-path
//! operation. `opendir`, `fsyncdir`, and `flush` are intentionally absent —
//! they are not part of this translator's supported surface.

use crate::bootstrap::{self, BootstrapLatch, ClientIdentity};
use crate::config::TranslatorConfig;
use crate::device::{EntryOut, FsyncIn, InHeader, OpenIn, OpenInFlags, OpenOut, ReadIn, SetAttrIn, SetAttrValid, WriteIn};
use crate::errno::Errno;
use crate::inode::InodeTable;
use crate::nfs4::attrs::{fileid_attributes, standard_attributes, statfs_attributes, Bitmap4};
use crate::nfs4::ops::{CompoundArgs, CreateAttrs, NfsArgOp, NfsResOp, OpenType};
use crate::nfs4::status::error_to_fuse;
use crate::pool::{Continuation, FixedBlockPool};
use crate::reply::Reply;
use crate::rpc::NfsRpcClient;
use byteorder::{BigEndian, ByteOrder};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Owns every piece of per-mount state and dispatches FUSE requests onto
/// NFSv4 COMPOUNDs. Teardown order: stop accepting new requests (the
/// caller's responsibility, since the dispatcher lives above this type) →
/// drop the facade, which drops the inode table, pool, and RPC client in
/// field-declaration order.
pub struct Translator {
    config: TranslatorConfig,
    client: Arc<dyn NfsRpcClient>,
    pool: FixedBlockPool,
    inodes: InodeTable,
    latch: Arc<BootstrapLatch>,
    root_file_handle: Arc<OnceLock<Vec<u8>>>,
    client_id: Arc<AtomicU64>,
    open_owner_counter: AtomicU32,
    identity: ClientIdentity,
}

impl Translator {
    pub fn new(config: TranslatorConfig, client: Arc<dyn NfsRpcClient>) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        let pool_capacity = config.pool_capacity;
        Ok(Translator {
            config,
            client,
            pool: FixedBlockPool::new(pool_capacity),
            inodes: InodeTable::new(),
            latch: Arc::new(BootstrapLatch::new()),
            root_file_handle: Arc::new(OnceLock::new()),
            client_id: Arc::new(AtomicU64::new(0)),
            open_owner_counter: AtomicU32::new(0),
            identity: ClientIdentity::generate(),
        })
    }

    /// `init`: kicks off bootstrap in the background and returns
    /// immediately. The data path is gated behind [`BootstrapLatch`] so
    /// nothing races on an empty `rootfh`/`clientid` while bootstrap is
    /// still in flight.
    pub fn init(&self) {
        let client = self.client.clone();
        let export = self.config.export.clone();
        let identity = self.identity.clone();
        let latch = self.latch.clone();
        let root_file_handle = self.root_file_handle.clone();
        let client_id = self.client_id.clone();

        tokio::spawn(async move {
            if let Err(err) =
                bootstrap::run(client.as_ref(), &export, &identity, &latch, &root_file_handle, &client_id).await
            {
                log::error!("bootstrap failed, translator will never become ready: {err:?}");
            }
        });
    }

    /// Waits for bootstrap to finish. The data path never calls this -- it
    /// fails fast instead -- but it lets a caller (or a test) synchronize
    /// with bootstrap completion instead of polling.
    pub async fn wait_ready(&self) {
        self.latch.wait().await;
    }

    fn root_file_handle(&self) -> Option<Vec<u8>> {
        self.root_file_handle.get().cloned()
    }

    /// Resolves `nodeid` to the file handle a `PUTFH` should carry: the
    /// root nodeid always maps to `rootfh`; any other nodeid must have a
    /// published inode record.
    fn put_fh(&self, nodeid: u64) -> Option<NfsArgOp> {
        let root_fh = self.root_file_handle()?;
        let inode = self.inodes.get(nodeid);
        crate::nfs4::ops::put_fh_op(nodeid, &root_fh, inode.as_ref())
    }

    /// Binds step 0 of every handler's contract: fail fast with `EAGAIN`
    /// before touching the pool or issuing any RPC if bootstrap hasn't
    /// completed.
    fn check_ready(&self, reply: Reply) -> Result<Reply, ()> {
        if self.latch.is_ready() {
            Ok(reply)
        } else {
            reply.error(Errno::EAGAIN);
            Err(())
        }
    }

    pub async fn lookup(&self, in_header: InHeader, input: crate::device::LookupIn, reply: Reply) {
        let Ok(reply) = self.check_ready(reply) else {
            return;
        };
        let _guard = match self.pool.alloc(Continuation::Lookup) {
            Ok(guard) => guard,
            Err(_) => {
                reply.error(Errno::ENOMEM);
                return;
            }
        };
        let Some(put_fh) = self.put_fh(in_header.nodeid) else {
            reply.error(Errno::ENOENT);
            return;
        };

        let args = CompoundArgs::new()
            .push(put_fh)
            .push(NfsArgOp::Lookup { name: input.name })
            .push(NfsArgOp::GetAttr {
                bitmap: standard_attributes(),
            })
            .push(NfsArgOp::GetFh);

        log::debug!("lookup: submitting compound for nodeid {}", in_header.nodeid);
        let result = match self.client.compound(args).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("lookup: transport failure: {err}");
                reply.error(Errno::EREMOTEIO);
                return;
            }
        };
        if result.status != crate::nfs4::status::NfsStat4::Ok {
            reply.error(error_to_fuse(result.status));
            return;
        }

        let attrs = match result.nth(2) {
            Some(NfsResOp::GetAttr { bitmap, attrs }) => {
                match crate::nfs4::attrs::parse_attributes(*bitmap, attrs) {
                    Ok(decoded) => decoded,
                    Err(_) => {
                        reply.error(Errno::EIO);
                        return;
                    }
                }
            }
            _ => {
                reply.error(Errno::EIO);
                return;
            }
        };
        let file_handle = match result.nth(3) {
            Some(NfsResOp::GetFh { file_handle }) => file_handle.clone(),
            _ => {
                reply.error(Errno::EIO);
                return;
            }
        };
        let Some(fileid) = attrs.fileid else {
            reply.error(Errno::EIO);
            return;
        };

        let inode = self.inodes.getsert(fileid);
        inode.set_file_handle(file_handle);
        inode.bump_lookup();

        reply.entry(EntryOut {
            nodeid: fileid,
            generation: inode.generation,
            attr: attrs.to_fuse_attr(),
        });
    }

    pub async fn getattr(&self, in_header: InHeader, reply: Reply) {
        let Ok(reply) = self.check_ready(reply) else {
            return;
        };
        let _guard = match self.pool.alloc(Continuation::GetAttr) {
            Ok(guard) => guard,
            Err(_) => {
                reply.error(Errno::ENOMEM);
                return;
            }
        };
        let Some(put_fh) = self.put_fh(in_header.nodeid) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let args = CompoundArgs::new().push(put_fh).push(NfsArgOp::GetAttr {
            bitmap: standard_attributes(),
        });

        log::debug!("getattr: submitting compound for nodeid {}", in_header.nodeid);
        let result = match self.client.compound(args).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("getattr: transport failure: {err}");
                reply.error(Errno::EREMOTEIO);
                return;
            }
        };
        if result.status != crate::nfs4::status::NfsStat4::Ok {
            reply.error(error_to_fuse(result.status));
            return;
        }
        match result.nth(1) {
            Some(NfsResOp::GetAttr { bitmap, attrs }) => {
                match crate::nfs4::attrs::parse_attributes(*bitmap, attrs) {
                    Ok(decoded) => reply.attr(decoded.to_fuse_attr()),
                    Err(_) => reply.error(Errno::EIO),
                }
            }
            _ => reply.error(Errno::EIO),
        }
    }

    /// Builds the SETATTR bitmap + attribute-value buffer, sized to the sum
    /// of every field actually set rather than just the first one.
    fn encode_setattr(input: &SetAttrIn) -> (Bitmap4, Vec<u8>) {
        let mut bitmap = Bitmap4::empty();
        let mut buf = Vec::with_capacity(12);
        // Values are appended in ascending FATTR4_* bit order: SIZE (4)
        // precedes MODE (34) regardless of which order the host set them in.
        if input.valid.contains(SetAttrValid::SIZE) {
            bitmap.0[0] |= 1 << 4; // FATTR4_SIZE
            let mut word = [0u8; 8];
            BigEndian::write_u64(&mut word, input.size);
            buf.extend_from_slice(&word);
        }
        if input.valid.contains(SetAttrValid::MODE) {
            bitmap.0[1] |= 1 << (34 - 32); // FATTR4_MODE
            let mut word = [0u8; 4];
            BigEndian::write_u32(&mut word, input.mode);
            buf.extend_from_slice(&word);
        }
        (bitmap, buf)
    }

    pub async fn setattr(&self, in_header: InHeader, input: SetAttrIn, reply: Reply) {
        let Ok(reply) = self.check_ready(reply) else {
            return;
        };
        let (bitmap, attrs) = Self::encode_setattr(&input);
        let mut guard = match self.pool.alloc(Continuation::SetAttr { bitmap, attrs }) {
            Ok(guard) => guard,
            Err(_) => {
                reply.error(Errno::ENOMEM);
                return;
            }
        };
        let Some(put_fh) = self.put_fh(in_header.nodeid) else {
            reply.error(Errno::ENOENT);
            return;
        };

        // The continuation owns the buffers for the lifetime of the RPC;
        // reading them back out of the guard (rather than re-deriving them)
        // is what guarantees the base allocation, not an advanced pointer
        // into it, is what gets freed on every exit path.
        let (bitmap, attrs) = match guard.get_mut() {
            Continuation::SetAttr { bitmap, attrs } => (*bitmap, std::mem::take(attrs)),
            _ => unreachable!("guard was allocated as SetAttr"),
        };

        let args = CompoundArgs::new()
            .push(put_fh)
            .push(NfsArgOp::SetAttr { bitmap, attrs })
            .push(NfsArgOp::GetAttr {
                bitmap: standard_attributes(),
            });

        log::debug!("setattr: submitting compound for nodeid {}", in_header.nodeid);
        let result = match self.client.compound(args).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("setattr: transport failure: {err}");
                reply.error(Errno::EREMOTEIO);
                return;
            }
        };
        if result.status != crate::nfs4::status::NfsStat4::Ok {
            reply.error(error_to_fuse(result.status));
            return;
        }
        match result.nth(2) {
            Some(NfsResOp::GetAttr { bitmap, attrs }) => {
                match crate::nfs4::attrs::parse_attributes(*bitmap, attrs) {
                    Ok(decoded) => reply.attr(decoded.to_fuse_attr()),
                    Err(_) => reply.error(Errno::EIO),
                }
            }
            _ => reply.error(Errno::EIO),
        }
    }

    pub async fn open(&self, in_header: InHeader, input: OpenIn, reply: Reply) {
        let Ok(reply) = self.check_ready(reply) else {
            return;
        };
        let create = input.flags.contains(OpenInFlags::O_CREAT);
        let owner = self.open_owner_counter.fetch_add(1, Ordering::SeqCst);
        let _guard = match self.pool.alloc(Continuation::Open { owner, create }) {
            Ok(guard) => guard,
            Err(_) => {
                reply.error(Errno::ENOMEM);
                return;
            }
        };
        let Some(put_fh) = self.put_fh(in_header.nodeid) else {
            reply.error(Errno::ENOENT);
            return;
        };

        let open_type = if create {
            OpenType::Create(CreateAttrs {
                mode: input.mode,
                uid: in_header.uid,
                gid: in_header.gid,
            })
        } else {
            OpenType::NoCreate
        };

        const SHARE_ACCESS_BOTH: u32 = 3;
        const SHARE_DENY_NONE: u32 = 0;
        let args = CompoundArgs::new()
            .push(put_fh)
            .push(NfsArgOp::Open {
                owner,
                clientid: self.client_id.load(Ordering::SeqCst),
                share_access: SHARE_ACCESS_BOTH,
                share_deny: SHARE_DENY_NONE,
                open_type,
                name: Vec::new(),
            })
            .push(NfsArgOp::GetAttr {
                bitmap: fileid_attributes(),
            })
            .push(NfsArgOp::GetFh);

        log::debug!("open: submitting compound for nodeid {}, owner {owner}", in_header.nodeid);
        let result = match self.client.compound(args).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("open: transport failure: {err}");
                reply.error(Errno::EREMOTEIO);
                return;
            }
        };
        if result.status != crate::nfs4::status::NfsStat4::Ok {
            reply.error(error_to_fuse(result.status));
            return;
        }

        let fileid = match result.nth(1) {
            Some(NfsResOp::GetAttr { bitmap, attrs }) => {
                match crate::nfs4::attrs::parse_attributes(*bitmap, attrs) {
                    Ok(decoded) => decoded.fileid,
                    Err(_) => None,
                }
            }
            _ => None,
        };
        let Some(fileid) = fileid else {
            reply.error(Errno::EIO);
            return;
        };
        let file_handle = match result.nth(2) {
            Some(NfsResOp::GetFh { file_handle }) => file_handle.clone(),
            _ => {
                reply.error(Errno::EIO);
                return;
            }
        };

        let inode = self.inodes.getsert(fileid);
        inode.set_file_handle(file_handle);
        inode.bump_lookup();

        reply.opened(OpenOut::default());
    }

    pub async fn read(&self, in_header: InHeader, input: ReadIn, reply: Reply) {
        let Ok(reply) = self.check_ready(reply) else {
            return;
        };
        let _guard = match self.pool.alloc(Continuation::Read) {
            Ok(guard) => guard,
            Err(_) => {
                reply.error(Errno::ENOMEM);
                return;
            }
        };
        let Some(put_fh) = self.put_fh(in_header.nodeid) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let args = CompoundArgs::new().push(put_fh).push(NfsArgOp::Read {
            stateid: [0u8; 16],
            offset: input.offset,
            count: input.size,
        });

        log::debug!(
            "read: submitting compound for nodeid {} off {} size {}",
            in_header.nodeid,
            input.offset,
            input.size
        );
        let result = match self.client.compound(args).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("read: transport failure: {err}");
                reply.error(Errno::EREMOTEIO);
                return;
            }
        };
        if result.status != crate::nfs4::status::NfsStat4::Ok {
            reply.error(error_to_fuse(result.status));
            return;
        }
        match result.nth(1) {
            Some(NfsResOp::Read { data, .. }) => reply.data(data.clone()),
            _ => reply.error(Errno::EIO),
        }
    }

    pub async fn write(&self, in_header: InHeader, input: WriteIn, reply: Reply) {
        let Ok(reply) = self.check_ready(reply) else {
            return;
        };
        let _guard = match self.pool.alloc(Continuation::Write) {
            Ok(guard) => guard,
            Err(_) => {
                reply.error(Errno::ENOMEM);
                return;
            }
        };
        let Some(put_fh) = self.put_fh(in_header.nodeid) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let args = CompoundArgs::new().push(put_fh).push(NfsArgOp::Write {
            stateid: [0u8; 16],
            offset: input.offset,
            stable: false,
            data: input.data,
        });

        log::debug!("write: submitting compound for nodeid {}", in_header.nodeid);
        let result = match self.client.compound(args).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("write: transport failure: {err}");
                reply.error(Errno::EREMOTEIO);
                return;
            }
        };
        if result.status != crate::nfs4::status::NfsStat4::Ok {
            reply.error(error_to_fuse(result.status));
            return;
        }
        match result.nth(1) {
            Some(NfsResOp::Write { count }) => reply.written(*count),
            _ => reply.error(Errno::EIO),
        }
    }

    pub async fn fsync(&self, in_header: InHeader, input: FsyncIn, reply: Reply) {
        let Ok(reply) = self.check_ready(reply) else {
            return;
        };
        let _ = input.datasync; // ignored: the translator always commits the whole file
        let _guard = match self.pool.alloc(Continuation::Fsync) {
            Ok(guard) => guard,
            Err(_) => {
                reply.error(Errno::ENOMEM);
                return;
            }
        };
        let Some(put_fh) = self.put_fh(in_header.nodeid) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let args = CompoundArgs::new().push(put_fh).push(NfsArgOp::Commit { offset: 0, count: 0 });

        log::debug!("fsync: submitting compound for nodeid {}", in_header.nodeid);
        let result = match self.client.compound(args).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("fsync: transport failure: {err}");
                reply.error(Errno::EREMOTEIO);
                return;
            }
        };
        if result.status != crate::nfs4::status::NfsStat4::Ok {
            reply.error(error_to_fuse(result.status));
            return;
        }
        reply.ok();
    }

    pub async fn statfs(&self, reply: Reply) {
        let Ok(reply) = self.check_ready(reply) else {
            return;
        };
        let _guard = match self.pool.alloc(Continuation::Statfs) {
            Ok(guard) => guard,
            Err(_) => {
                reply.error(Errno::ENOMEM);
                return;
            }
        };
        let Some(root_fh) = self.root_file_handle() else {
            reply.error(Errno::ENOENT);
            return;
        };
        let args = CompoundArgs::new()
            .push(NfsArgOp::PutFh { file_handle: root_fh })
            .push(NfsArgOp::GetAttr {
                bitmap: statfs_attributes(),
            });

        log::debug!("statfs: submitting compound");
        let result = match self.client.compound(args).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("statfs: transport failure: {err}");
                reply.error(Errno::EREMOTEIO);
                return;
            }
        };
        if result.status != crate::nfs4::status::NfsStat4::Ok {
            reply.error(error_to_fuse(result.status));
            return;
        }
        match result.nth(1) {
            Some(NfsResOp::GetAttr { bitmap, attrs }) => {
                match crate::nfs4::attrs::parse_attributes(*bitmap, attrs) {
                    Ok(decoded) => reply.statfs(decoded.to_fuse_kstatfs()),
                    Err(_) => reply.error(Errno::EIO),
                }
            }
            _ => reply.error(Errno::EIO),
        }
    }

    /// `forget`: no RPC, no reply -- FUSE's forget is a one-way
    /// notification.
    pub fn forget(&self, nodeid: u64, nlookup: u64) {
        self.inodes.forget(nodeid, nlookup);
    }

    /// `batch_forget`: falls back to repeated [`Translator::forget`] calls.
    pub fn batch_forget(&self, entries: &[(u64, u64)]) {
        for &(nodeid, nlookup) in entries {
            self.forget(nodeid, nlookup);
        }
    }

    /// `destroy`: no RPC. A clean no-op hook for dispatcher teardown
    /// ordering.
    pub fn destroy(&self) {
        log::info!(
            "translator for export {} shutting down, {} inodes outstanding",
            self.config.export,
            self.inodes.len()
        );
    }
}
