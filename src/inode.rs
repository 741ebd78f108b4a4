//! Concurrent nodeid -> NFS file handle table.
//!
//! Keys are NFS `FATTR4_FILEID` values, which this translator also uses
//! directly as FUSE nodeids (nodeid `1`, the FUSE root, is special-cased by
//! callers and never stored here -- it always resolves to the facade's
//! `rootfh`).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// A single inode record. `fh` is populated at most once: the first
/// completion to observe it empty writes it via [`Inode::set_file_handle`];
/// later completions that race to populate the same record silently lose,
/// which is the desired behavior since the value they'd write is identical.
#[derive(Debug)]
pub struct Inode {
    pub fileid: u64,
    fh: OnceLock<Vec<u8>>,
    nlookup: AtomicU64,
    pub generation: u64,
}

impl Inode {
    fn new(fileid: u64) -> Self {
        Inode {
            fileid,
            fh: OnceLock::new(),
            nlookup: AtomicU64::new(0),
            generation: 0,
        }
    }

    /// The NFS file handle, if a completion has populated it yet.
    pub fn file_handle(&self) -> Option<&[u8]> {
        self.fh.get().map(Vec::as_slice)
    }

    /// Publishes the file handle the first time it's called for this
    /// record. Subsequent calls are no-ops: once set, a handle is never
    /// shrunk or swapped.
    pub fn set_file_handle(&self, fh: Vec<u8>) {
        let _ = self.fh.set(fh);
    }

    pub fn bump_lookup(&self) {
        self.nlookup.fetch_add(1, Ordering::SeqCst);
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::SeqCst)
    }

    /// Returns the nlookup count after the decrement.
    fn forget(&self, n: u64) -> u64 {
        // Saturating: a host that double-forgets (or forgets more than was
        // ever looked up) must not wrap the counter around u64::MAX.
        let mut current = self.nlookup.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(n);
            match self.nlookup.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Concurrent fileid -> [`Inode`] map.
#[derive(Debug, Default)]
pub struct InodeTable {
    inodes: DashMap<u64, Arc<Inode>>,
}

impl InodeTable {
    pub fn new() -> Self {
        InodeTable {
            inodes: DashMap::new(),
        }
    }

    pub fn get(&self, fileid: u64) -> Option<Arc<Inode>> {
        self.inodes.get(&fileid).map(|entry| entry.value().clone())
    }

    /// Returns the existing record for `fileid`, or atomically inserts and
    /// returns a fresh one. Concurrent callers racing on the same fileid
    /// observe the same `Arc<Inode>`.
    pub fn getsert(&self, fileid: u64) -> Arc<Inode> {
        self.inodes
            .entry(fileid)
            .or_insert_with(|| Arc::new(Inode::new(fileid)))
            .clone()
    }

    /// Decrements `fileid`'s nlookup by `n` and reclaims the record once it
    /// reaches zero. A `forget` for a fileid that isn't present is a no-op:
    /// FUSE's forget is an advisory one-way notification.
    pub fn forget(&self, fileid: u64, n: u64) {
        let reclaim = match self.inodes.get(&fileid) {
            Some(entry) => entry.value().forget(n) == 0,
            None => return,
        };
        if reclaim {
            // Re-check under the entry API: the record may have gained a
            // fresh lookup between the read above and this removal.
            self.inodes.remove_if(&fileid, |_, inode| inode.nlookup() == 0);
        }
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }
}
