//! `nfsstat4` values and their mapping to the POSIX errno the host expects.

use crate::errno::Errno;
use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum NfsStat4 {
    Ok = 0,
    Perm = 1,
    Noent = 2,
    Io = 5,
    Nxio = 6,
    Access = 13,
    Exist = 17,
    Xdev = 18,
    Notdir = 20,
    Isdir = 21,
    Inval = 22,
    Fbig = 27,
    Nospc = 28,
    Rofs = 30,
    Mlink = 31,
    Nametoolong = 63,
    Notempty = 66,
    Dquot = 69,
    Stale = 70,
    BadHandle = 10001,
    BadCookie = 10003,
    NotSupp = 10004,
    Toosmall = 10005,
    ServerFault = 10006,
    BadType = 10007,
    Delay = 10008,
    Same = 10009,
    Denied = 10010,
    Expired = 10011,
    Locked = 10012,
    Grace = 10013,
    FhExpired = 10014,
    ShareDenied = 10015,
    WrongSec = 10016,
    ClidInuse = 10017,
    Resource = 10018,
    Moved = 10019,
    NoFileHandle = 10020,
    MinorVersMismatch = 10021,
    StaleClientId = 10022,
    StaleStateid = 10023,
    OldStateid = 10024,
    BadStateid = 10025,
    BadSeqid = 10026,
    NotSame = 10027,
    LockRange = 10028,
    SymLink = 10029,
    ReadDirNotSingle = 10030,
    LeaseMoved = 10031,
    AttrNotSupp = 10032,
    NoGrace = 10033,
    ReclaimBad = 10034,
    ReclaimConflict = 10035,
    BadXdr = 10036,
    LocksHeld = 10037,
    OpenMode = 10038,
    BadOwner = 10039,
    BadChar = 10040,
    BadName = 10041,
    BadRange = 10042,
    CbPathDown = 10048,
}

/// Maps a COMPOUND reply's `nfsstat4` to the POSIX errno the host expects
/// in `out_hdr.error`. Statuses with no close POSIX analogue (protocol
/// bookkeeping errors like `BadSeqid` or `StaleClientId`) fall back to
/// `EREMOTEIO`: the translator has no way to explain them to the host
/// beyond "something went wrong downstream".
pub fn error_to_fuse(status: NfsStat4) -> Errno {
    match status {
        NfsStat4::Ok => Errno::EIO, // callers must not map success through here
        NfsStat4::Perm => Errno::EPERM,
        NfsStat4::Noent => Errno::ENOENT,
        NfsStat4::Io => Errno::EIO,
        NfsStat4::Nxio => Errno::ENOENT,
        NfsStat4::Access => Errno::EACCES,
        NfsStat4::Exist => Errno::EEXIST,
        NfsStat4::Xdev => Errno::EXDEV,
        NfsStat4::Notdir => Errno::ENOTDIR,
        NfsStat4::Isdir => Errno::EISDIR,
        NfsStat4::Inval => Errno::EINVAL,
        NfsStat4::Fbig => Errno::EFBIG,
        NfsStat4::Nospc => Errno::ENOSPC,
        NfsStat4::Rofs => Errno::EROFS,
        NfsStat4::Mlink => Errno::EMLINK,
        NfsStat4::Nametoolong => Errno::ENAMETOOLONG,
        NfsStat4::Notempty => Errno::ENOTEMPTY,
        NfsStat4::Dquot => Errno::EDQUOT,
        NfsStat4::Stale | NfsStat4::FhExpired | NfsStat4::BadHandle | NfsStat4::NoFileHandle => {
            Errno::ESTALE
        }
        NfsStat4::NotSupp | NfsStat4::AttrNotSupp | NfsStat4::BadType => Errno::ENOTSUP,
        NfsStat4::Delay | NfsStat4::Grace | NfsStat4::NoGrace => Errno::EAGAIN,
        NfsStat4::ShareDenied | NfsStat4::Denied | NfsStat4::Locked | NfsStat4::LocksHeld => {
            Errno::EACCES
        }
        NfsStat4::SymLink => Errno::ELOOP,
        NfsStat4::BadOwner | NfsStat4::BadName | NfsStat4::BadChar => Errno::EINVAL,
        _ => Errno::EREMOTEIO,
    }
}
