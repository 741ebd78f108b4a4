//! POSIX errno values used on the FUSE-facing side of the translator.

use std::fmt;

/// A POSIX error code, as reported to the host through `out_hdr.error`.
///
/// The host always receives `out_hdr.error` as a negative value; `Errno`
/// itself stores the positive code and leaves the sign flip to the reply
/// layer, mirroring how the rest of this codebase keeps wire-format details
/// out of its domain types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Errno = Errno(libc::EPERM);
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    pub const EIO: Errno = Errno(libc::EIO);
    pub const EAGAIN: Errno = Errno(libc::EAGAIN);
    pub const ENOMEM: Errno = Errno(libc::ENOMEM);
    pub const EACCES: Errno = Errno(libc::EACCES);
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    pub const EFBIG: Errno = Errno(libc::EFBIG);
    pub const ENOSPC: Errno = Errno(libc::ENOSPC);
    pub const EROFS: Errno = Errno(libc::EROFS);
    pub const ENAMETOOLONG: Errno = Errno(libc::ENAMETOOLONG);
    pub const ENOSYS: Errno = Errno(libc::ENOSYS);
    pub const ENOTEMPTY: Errno = Errno(libc::ENOTEMPTY);
    pub const ESTALE: Errno = Errno(libc::ESTALE);
    pub const EREMOTEIO: Errno = Errno(libc::EREMOTEIO);
    pub const EDQUOT: Errno = Errno(libc::EDQUOT);
    pub const EBADF: Errno = Errno(libc::EBADF);
    pub const ENOTSUP: Errno = Errno(libc::ENOTSUP);
    pub const EMLINK: Errno = Errno(libc::EMLINK);
    pub const EXDEV: Errno = Errno(libc::EXDEV);
    pub const ELOOP: Errno = Errno(libc::ELOOP);
    pub const EDEADLK: Errno = Errno(libc::EDEADLK);
    pub const EOPNOTSUPP: Errno = Errno(libc::EOPNOTSUPP);
    pub const EOVERFLOW: Errno = Errno(libc::EOVERFLOW);

    /// The raw positive `errno` value.
    #[inline]
    pub fn code(self) -> i32 {
        self.0
    }

    /// The value the host expects in `out_hdr.error`: the negated errno.
    #[inline]
    pub fn as_negative(self) -> i32 {
        -self.0
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}
