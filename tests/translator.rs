//! Exercises the full handler -> COMPOUND -> completion -> reply path
//! against a fake in-process NFS client, driving the facade directly
//! rather than through a real kernel mount.

use async_trait::async_trait;
use std::io::IoSlice;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use virtionfs::device::{FsyncIn, InHeader, LookupIn, OpenIn, OpenInFlags, ReadIn, ReplySender, SetAttrIn, SetAttrValid};
use virtionfs::nfs4::attrs::{fileid_attributes, standard_attributes};
use virtionfs::nfs4::ops::{CompoundArgs, CompoundResult, NfsArgOp, NfsResOp, OpenType};
use virtionfs::nfs4::status::NfsStat4;
use virtionfs::reply::Reply;
use virtionfs::rpc::{NfsRpcClient, RpcError};
use virtionfs::{Errno, Translator, TranslatorConfig};

fn test_config() -> TranslatorConfig {
    TranslatorConfig {
        server: "127.0.0.1:0".into(),
        export: "/srv/data".into(),
        debug: false,
        timeout: Duration::ZERO,
        nthreads: 1,
        pool_capacity: 16,
    }
}

fn in_header(nodeid: u64) -> InHeader {
    InHeader {
        unique: 1,
        nodeid,
        uid: 0,
        gid: 0,
        pid: 0,
    }
}

#[derive(Debug, Default)]
struct CapturedReply {
    error: AtomicI32,
}

impl ReplySender for Arc<CapturedReply> {
    fn send(&self, data: &[IoSlice<'_>]) -> std::io::Result<()> {
        let header = &data[0];
        let error = i32::from_ne_bytes([header[4], header[5], header[6], header[7]]);
        self.error.store(error, Ordering::SeqCst);
        Ok(())
    }
}

fn reply_and_capture() -> (Reply, Arc<CapturedReply>) {
    let captured = Arc::new(CapturedReply::default());
    (Reply::new(1, captured.clone()), captured)
}

fn attrs_for(fileid: u64) -> (virtionfs::nfs4::attrs::Bitmap4, Vec<u8>) {
    let bitmap = standard_attributes();
    let mut attrs = Vec::new();
    attrs.extend_from_slice(&1u32.to_be_bytes()); // TYPE = NF4REG
    attrs.extend_from_slice(&0u64.to_be_bytes()); // SIZE
    attrs.extend_from_slice(&fileid.to_be_bytes()); // FILEID
    attrs.extend_from_slice(&0o644u32.to_be_bytes()); // MODE
    attrs.extend_from_slice(&1u32.to_be_bytes()); // NUMLINKS
    attrs.extend_from_slice(&0u32.to_be_bytes()); // OWNER
    attrs.extend_from_slice(&0u32.to_be_bytes()); // OWNER_GROUP
    attrs.extend_from_slice(&0u64.to_be_bytes()); // SPACE_USED
    attrs.extend_from_slice(&[0u8; 12]); // TIME_ACCESS
    attrs.extend_from_slice(&[0u8; 12]); // TIME_METADATA
    attrs.extend_from_slice(&[0u8; 12]); // TIME_MODIFY
    (bitmap, attrs)
}

/// A fake NFS client that inspects the leading op of each COMPOUND to decide
/// how to answer it, so a single instance can answer both the bootstrap
/// sequence `init()` kicks off and whatever handler calls the test issues
/// afterward, in whatever order they actually arrive.
struct FakeClient {
    responder: Box<dyn Fn(&CompoundArgs) -> Result<CompoundResult, RpcError> + Send + Sync>,
}

#[async_trait]
impl NfsRpcClient for FakeClient {
    async fn compound(&self, args: CompoundArgs) -> Result<CompoundResult, RpcError> {
        (self.responder)(&args)
    }
}

fn bootstrapping_client(extra: impl Fn(&CompoundArgs) -> Option<CompoundResult> + Send + Sync + 'static) -> Arc<dyn NfsRpcClient> {
    Arc::new(FakeClient {
        responder: Box::new(move |args| {
            match args.ops.first() {
                Some(NfsArgOp::PutRootFh) => Ok(CompoundResult {
                    status: NfsStat4::Ok,
                    results: vec![
                        NfsResOp::PutRootFh,
                        NfsResOp::Lookup,
                        NfsResOp::GetFh {
                            file_handle: b"root-fh".to_vec(),
                        },
                    ],
                }),
                Some(NfsArgOp::SetClientId { .. }) => Ok(CompoundResult {
                    status: NfsStat4::Ok,
                    results: vec![NfsResOp::SetClientId {
                        client_id: 7,
                        verifier: [0u8; 8],
                    }],
                }),
                Some(NfsArgOp::SetClientIdConfirm { .. }) => Ok(CompoundResult {
                    status: NfsStat4::Ok,
                    results: vec![NfsResOp::SetClientIdConfirm],
                }),
                _ => extra(args).ok_or(RpcError::Disconnected),
            }
        }),
    })
}

async fn ready_translator(
    extra: impl Fn(&CompoundArgs) -> Option<CompoundResult> + Send + Sync + 'static,
) -> Arc<Translator> {
    let client = bootstrapping_client(extra);
    let translator = Arc::new(Translator::new(test_config(), client).unwrap());
    translator.init();
    translator.wait_ready().await;
    translator
}

/// A request arriving before bootstrap completes observes EAGAIN and never
/// reaches the fake client.
#[tokio::test]
async fn getattr_before_bootstrap_fails_with_eagain() {
    let client: Arc<dyn NfsRpcClient> = Arc::new(FakeClient {
        responder: Box::new(|_| panic!("handler must not issue RPC before bootstrap ready")),
    });
    let translator = Translator::new(test_config(), client).unwrap();

    let (reply, captured) = reply_and_capture();
    translator.getattr(in_header(1), reply).await;
    assert_eq!(captured.error.load(Ordering::SeqCst), Errno::EAGAIN.as_negative());
}

/// Lookup resolves a nodeid whose inode a subsequent read can then use,
/// round-tripping through a real bootstrap.
#[tokio::test]
async fn lookup_then_read_round_trips_fileid() {
    let translator = ready_translator(|args| match args.ops.get(1) {
        Some(NfsArgOp::Lookup { .. }) => {
            let (bitmap, attrs) = attrs_for(42);
            Some(CompoundResult {
                status: NfsStat4::Ok,
                results: vec![
                    NfsResOp::PutFh,
                    NfsResOp::Lookup,
                    NfsResOp::GetAttr { bitmap, attrs },
                    NfsResOp::GetFh {
                        file_handle: b"fh-42".to_vec(),
                    },
                ],
            })
        }
        Some(NfsArgOp::Read { .. }) => Some(CompoundResult {
            status: NfsStat4::Ok,
            results: vec![
                NfsResOp::PutFh,
                NfsResOp::Read {
                    eof: true,
                    data: b"hello".to_vec(),
                },
            ],
        }),
        _ => None,
    })
    .await;

    let (reply, captured) = reply_and_capture();
    translator
        .lookup(
            in_header(1),
            LookupIn {
                name: b"hello.txt".to_vec(),
            },
            reply,
        )
        .await;
    assert_eq!(captured.error.load(Ordering::SeqCst), 0);

    let (reply, captured) = reply_and_capture();
    translator
        .read(in_header(42), ReadIn { offset: 0, size: 5 }, reply)
        .await;
    assert_eq!(captured.error.load(Ordering::SeqCst), 0);
}

/// Forgetting an inode makes a later operation on it fail closed with
/// ENOENT, without issuing any RPC.
#[tokio::test]
async fn forget_then_fsync_fails_closed() {
    let translator = ready_translator(|_| {
        panic!("fsync on a forgotten nodeid must not issue RPC")
    })
    .await;

    translator.forget(999, 1);

    let (reply, captured) = reply_and_capture();
    translator
        .fsync(in_header(999), FsyncIn { datasync: false }, reply)
        .await;
    assert_eq!(captured.error.load(Ordering::SeqCst), Errno::ENOENT.as_negative());
}

/// Concurrency property: N concurrent opens against distinct, unknown
/// nodeids never deadlock and each fails closed independently.
#[tokio::test]
async fn concurrent_opens_on_distinct_nodeids_all_complete() {
    let translator = ready_translator(|_| {
        panic!("open on an unknown nodeid must not issue RPC")
    })
    .await;

    let (reply_a, captured_a) = reply_and_capture();
    let (reply_b, captured_b) = reply_and_capture();
    let open_in = OpenIn {
        flags: OpenInFlags::empty(),
        mode: 0,
    };

    tokio::join!(
        translator.open(in_header(10), open_in, reply_a),
        translator.open(in_header(11), open_in, reply_b),
    );

    assert_eq!(captured_a.error.load(Ordering::SeqCst), Errno::ENOENT.as_negative());
    assert_eq!(captured_b.error.load(Ordering::SeqCst), Errno::ENOENT.as_negative());
}

/// Two concurrent lookups of the same name converge on the same inode
/// record instead of each minting their own.
#[tokio::test]
async fn concurrent_lookups_of_same_name_share_one_inode_record() {
    let translator = ready_translator(|args| match args.ops.get(1) {
        Some(NfsArgOp::Lookup { .. }) => {
            let (bitmap, attrs) = attrs_for(7);
            Some(CompoundResult {
                status: NfsStat4::Ok,
                results: vec![
                    NfsResOp::PutFh,
                    NfsResOp::Lookup,
                    NfsResOp::GetAttr { bitmap, attrs },
                    NfsResOp::GetFh {
                        file_handle: b"fh-7".to_vec(),
                    },
                ],
            })
        }
        _ => None,
    })
    .await;

    let lookup = |unique: u64| {
        let translator = translator.clone();
        async move {
            let captured = Arc::new(CapturedReply::default());
            let reply = Reply::new(unique, captured.clone());
            translator
                .lookup(
                    in_header(1),
                    LookupIn {
                        name: b"shared.txt".to_vec(),
                    },
                    reply,
                )
                .await;
            captured
        }
    };

    let (a, b) = tokio::join!(lookup(1), lookup(2));
    assert_eq!(a.error.load(Ordering::SeqCst), 0);
    assert_eq!(b.error.load(Ordering::SeqCst), 0);
}

/// Matches the worked `open(nodeid=1, flags=O_CREAT|O_WRONLY, mode=0644)`
/// example: the OPEN op sent to the server must carry OPEN4_CREATE with the
/// request's mode/uid/gid as createattrs, and the negotiated clientid.
#[tokio::test]
async fn open_with_o_creat_sends_create_opentype_and_clientid() {
    let captured: Arc<Mutex<Option<NfsArgOp>>> = Arc::new(Mutex::new(None));
    let captured_for_client = captured.clone();

    let translator = ready_translator(move |args| match args.ops.get(1) {
        Some(op @ NfsArgOp::Open { .. }) => {
            *captured_for_client.lock().unwrap() = Some(op.clone());
            Some(CompoundResult {
                status: NfsStat4::Ok,
                results: vec![
                    NfsResOp::PutFh,
                    NfsResOp::Open { stateid: [0u8; 16] },
                    NfsResOp::GetAttr {
                        bitmap: fileid_attributes(),
                        attrs: 99u64.to_be_bytes().to_vec(),
                    },
                    NfsResOp::GetFh {
                        file_handle: b"fh-99".to_vec(),
                    },
                ],
            })
        }
        _ => None,
    })
    .await;

    let (reply, captured_reply) = reply_and_capture();
    let mut in_header = in_header(1);
    in_header.uid = 1000;
    in_header.gid = 1000;
    translator
        .open(
            in_header,
            OpenIn {
                flags: OpenInFlags::O_CREAT | OpenInFlags::O_WRONLY,
                mode: 0o644,
            },
            reply,
        )
        .await;
    assert_eq!(captured_reply.error.load(Ordering::SeqCst), 0);

    match captured.lock().unwrap().take().expect("open op captured") {
        NfsArgOp::Open {
            clientid,
            share_access,
            share_deny,
            open_type,
            ..
        } => {
            assert_eq!(clientid, 7); // from bootstrapping_client's SETCLIENTID reply
            assert_eq!(share_access, 3); // BOTH
            assert_eq!(share_deny, 0); // NONE
            match open_type {
                OpenType::Create(attrs) => {
                    assert_eq!(attrs.mode, 0o644);
                    assert_eq!(attrs.uid, 1000);
                    assert_eq!(attrs.gid, 1000);
                }
                OpenType::NoCreate => panic!("O_CREAT must encode OPEN4_CREATE"),
            }
        }
        other => panic!("unexpected op: {other:?}"),
    }
}

/// `setattr` with both MODE and SIZE set must append the attribute values in
/// ascending FATTR4_* bit order (SIZE before MODE), matching the bitmap.
#[tokio::test]
async fn setattr_with_mode_and_size_orders_attrs_by_bitmap_bit() {
    let captured: Arc<Mutex<Option<NfsArgOp>>> = Arc::new(Mutex::new(None));
    let captured_for_client = captured.clone();

    let translator = ready_translator(move |args| match args.ops.get(1) {
        Some(op @ NfsArgOp::SetAttr { .. }) => {
            *captured_for_client.lock().unwrap() = Some(op.clone());
            let (bitmap, attrs) = attrs_for(42);
            Some(CompoundResult {
                status: NfsStat4::Ok,
                results: vec![NfsResOp::PutFh, NfsResOp::SetAttr, NfsResOp::GetAttr { bitmap, attrs }],
            })
        }
        _ => None,
    })
    .await;

    let (reply, captured_reply) = reply_and_capture();
    translator
        .setattr(
            in_header(42),
            SetAttrIn {
                valid: SetAttrValid::MODE | SetAttrValid::SIZE,
                mode: 0o644,
                size: 10,
            },
            reply,
        )
        .await;
    assert_eq!(captured_reply.error.load(Ordering::SeqCst), 0);

    match captured.lock().unwrap().take().expect("setattr op captured") {
        NfsArgOp::SetAttr { bitmap, attrs } => {
            assert!(bitmap.is_set(4)); // FATTR4_SIZE
            assert!(bitmap.is_set(34)); // FATTR4_MODE
            assert_eq!(attrs.len(), 12);
            assert_eq!(&attrs[0..8], &10u64.to_be_bytes());
            assert_eq!(&attrs[8..12], &0o644u32.to_be_bytes());
        }
        other => panic!("unexpected op: {other:?}"),
    }
}
