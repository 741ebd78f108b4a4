//! NFSv4 `FATTR4_*` attribute bitmaps and translation to FUSE's attribute
//! structs.
//!
//! Attribute numbers are assigned by RFC 7530 section 5; only the subset
//! this translator actually requests is named here.

use byteorder::{BigEndian, ByteOrder};

const FATTR4_TYPE: u32 = 2;
const FATTR4_SIZE: u32 = 4;
const FATTR4_FILEID: u32 = 21;
const FATTR4_FILES_FREE: u32 = 23;
const FATTR4_FILES_TOTAL: u32 = 24;
const FATTR4_MAXNAME: u32 = 30;
const FATTR4_MODE: u32 = 34;
const FATTR4_NUMLINKS: u32 = 36;
const FATTR4_OWNER: u32 = 37;
const FATTR4_OWNER_GROUP: u32 = 38;
const FATTR4_SPACE_AVAIL: u32 = 43;
const FATTR4_SPACE_FREE: u32 = 44;
const FATTR4_SPACE_TOTAL: u32 = 45;
const FATTR4_SPACE_USED: u32 = 46;
const FATTR4_TIME_ACCESS: u32 = 48;
const FATTR4_TIME_METADATA: u32 = 53;
const FATTR4_TIME_MODIFY: u32 = 54;

/// The two-word attribute request/reply bitmap used throughout COMPOUND
/// GETATTR/SETATTR arguments, as defined by `bitmap4` in RFC 7530.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bitmap4(pub [u32; 2]);

impl Bitmap4 {
    pub fn empty() -> Self {
        Bitmap4([0, 0])
    }

    fn set(&mut self, attr: u32) {
        let word = (attr / 32) as usize;
        self.0[word] |= 1 << (attr % 32);
    }

    pub fn is_set(&self, attr: u32) -> bool {
        let word = (attr / 32) as usize;
        self.0[word] & (1 << (attr % 32)) != 0
    }

    /// Serialized as two big-endian `uint32_t`s prefixed by their count,
    /// matching `bitmap4` on the wire.
    pub fn encode(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        BigEndian::write_u32(&mut buf[0..4], 2);
        BigEndian::write_u32(&mut buf[4..8], self.0[0]);
        BigEndian::write_u32(&mut buf[8..12], self.0[1]);
        buf
    }
}

/// Attributes requested for a regular `getattr`-driven lookup: everything
/// needed to fill a `fuse_attr`.
pub fn standard_attributes() -> Bitmap4 {
    let mut bitmap = Bitmap4::empty();
    for attr in [
        FATTR4_TYPE,
        FATTR4_SIZE,
        FATTR4_FILEID,
        FATTR4_MODE,
        FATTR4_NUMLINKS,
        FATTR4_OWNER,
        FATTR4_OWNER_GROUP,
        FATTR4_SPACE_USED,
        FATTR4_TIME_ACCESS,
        FATTR4_TIME_METADATA,
        FATTR4_TIME_MODIFY,
    ] {
        bitmap.set(attr);
    }
    bitmap
}

/// Attributes requested for `statfs`, sized to fill a `fuse_kstatfs`.
pub fn statfs_attributes() -> Bitmap4 {
    let mut bitmap = Bitmap4::empty();
    for attr in [
        FATTR4_FILES_FREE,
        FATTR4_FILES_TOTAL,
        FATTR4_MAXNAME,
        FATTR4_SPACE_AVAIL,
        FATTR4_SPACE_FREE,
        FATTR4_SPACE_TOTAL,
    ] {
        bitmap.set(attr);
    }
    bitmap
}

/// Attributes requested when only the fileid is needed, as in `lookup`'s
/// follow-up GETFH/GETATTR pair used to mint a nodeid.
pub fn fileid_attributes() -> Bitmap4 {
    let mut bitmap = Bitmap4::empty();
    bitmap.set(FATTR4_FILEID);
    bitmap
}

/// Builds the createattrs bitmap + attribute-value buffer for an
/// `OPEN4_CREATE`: MODE, OWNER, OWNER_GROUP, with values appended in
/// ascending `FATTR4_*` bit order (MODE=34 before OWNER=37 before
/// OWNER_GROUP=38).
pub fn encode_create_attrs(mode: u32, uid: u32, gid: u32) -> (Bitmap4, Vec<u8>) {
    let mut bitmap = Bitmap4::empty();
    bitmap.set(FATTR4_MODE);
    bitmap.set(FATTR4_OWNER);
    bitmap.set(FATTR4_OWNER_GROUP);
    let mut buf = Vec::with_capacity(12);
    buf.extend_from_slice(&mode.to_be_bytes());
    buf.extend_from_slice(&uid.to_be_bytes());
    buf.extend_from_slice(&gid.to_be_bytes());
    (bitmap, buf)
}

/// A decoded `fattr4` value, holding only the fields this translator reads.
/// XDR encodes attribute values back to back in ascending attribute-number
/// order, regardless of bitmap word; [`parse_attributes`] walks them in
/// that order.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodedAttrs {
    pub nfs_type: Option<u32>,
    pub size: Option<u64>,
    pub fileid: Option<u64>,
    pub mode: Option<u32>,
    pub numlinks: Option<u32>,
    pub owner: Option<u32>,
    pub owner_group: Option<u32>,
    pub space_used: Option<u64>,
    pub time_access: Option<(i64, u32)>,
    pub time_metadata: Option<(i64, u32)>,
    pub time_modify: Option<(i64, u32)>,
    pub files_free: Option<u64>,
    pub files_total: Option<u64>,
    pub maxname: Option<u32>,
    pub space_avail: Option<u64>,
    pub space_free: Option<u64>,
    pub space_total: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrDecodeError;

/// Parses the `attrlist4` opaque byte string that follows a bitmap, given
/// the bitmap describing which attributes are present.
pub fn parse_attributes(bitmap: Bitmap4, body: &[u8]) -> Result<DecodedAttrs, AttrDecodeError> {
    let mut cursor = 0usize;
    let mut out = DecodedAttrs::default();

    let mut take_u32 = |cursor: &mut usize| -> Result<u32, AttrDecodeError> {
        let value = body
            .get(*cursor..*cursor + 4)
            .map(BigEndian::read_u32)
            .ok_or(AttrDecodeError)?;
        *cursor += 4;
        Ok(value)
    };
    let mut take_u64 = |cursor: &mut usize| -> Result<u64, AttrDecodeError> {
        let value = body
            .get(*cursor..*cursor + 8)
            .map(BigEndian::read_u64)
            .ok_or(AttrDecodeError)?;
        *cursor += 8;
        Ok(value)
    };

    // nfstime4 is a 64-bit seconds field followed by a 32-bit nanoseconds
    // field.
    let mut take_time = |cursor: &mut usize| -> Result<(i64, u32), AttrDecodeError> {
        let seconds = take_u64(cursor)? as i64;
        let nseconds = take_u32(cursor)?;
        Ok((seconds, nseconds))
    };

    for attr in 0u32..64 {
        if !bitmap.is_set(attr) {
            continue;
        }
        match attr {
            FATTR4_TYPE => out.nfs_type = Some(take_u32(&mut cursor)?),
            FATTR4_SIZE => out.size = Some(take_u64(&mut cursor)?),
            FATTR4_FILEID => out.fileid = Some(take_u64(&mut cursor)?),
            FATTR4_FILES_FREE => out.files_free = Some(take_u64(&mut cursor)?),
            FATTR4_FILES_TOTAL => out.files_total = Some(take_u64(&mut cursor)?),
            FATTR4_MAXNAME => out.maxname = Some(take_u32(&mut cursor)?),
            FATTR4_MODE => out.mode = Some(take_u32(&mut cursor)?),
            FATTR4_NUMLINKS => out.numlinks = Some(take_u32(&mut cursor)?),
            FATTR4_OWNER => out.owner = Some(take_u32(&mut cursor)?),
            FATTR4_OWNER_GROUP => out.owner_group = Some(take_u32(&mut cursor)?),
            FATTR4_SPACE_AVAIL => out.space_avail = Some(take_u64(&mut cursor)?),
            FATTR4_SPACE_FREE => out.space_free = Some(take_u64(&mut cursor)?),
            FATTR4_SPACE_TOTAL => out.space_total = Some(take_u64(&mut cursor)?),
            FATTR4_SPACE_USED => out.space_used = Some(take_u64(&mut cursor)?),
            FATTR4_TIME_ACCESS => out.time_access = Some(take_time(&mut cursor)?),
            FATTR4_TIME_METADATA => out.time_metadata = Some(take_time(&mut cursor)?),
            FATTR4_TIME_MODIFY => out.time_modify = Some(take_time(&mut cursor)?),
            _ => return Err(AttrDecodeError),
        }
    }
    Ok(out)
}

/// NFSv4 `nfs_ftype4` values relevant to the `fuse_attr.mode` file-type bits.
const NF4REG: u32 = 1;
const NF4DIR: u32 = 2;
const NF4LNK: u32 = 5;

/// FUSE's on-wire attribute struct, matching `fuse_attr` in the host ABI:
/// `ino`, `size`, `blocks`, `atime`/`mtime`/`ctime` (+ nsec), `mode`,
/// `nlink`, `uid`, `gid`, `rdev`, `blksize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuseAttr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

/// NFSv4 has no concept of a device block size; the translator reports a
/// fixed 4 KiB block.
const BLOCK_SIZE: u64 = 4096;

impl DecodedAttrs {
    /// Builds a [`FuseAttr`] from a [`standard_attributes`]-shaped reply.
    /// Missing fields default to zero rather than failing: a server that
    /// omits an attribute it doesn't support shouldn't abort the whole
    /// lookup.
    pub fn to_fuse_attr(&self) -> FuseAttr {
        let size = self.size.unwrap_or(0);
        let mode_bits = self.mode.unwrap_or(0) & 0o7777;
        let type_bits = match self.nfs_type {
            Some(NF4DIR) => libc::S_IFDIR,
            Some(NF4LNK) => libc::S_IFLNK,
            Some(NF4REG) | None => libc::S_IFREG,
            Some(_) => libc::S_IFREG,
        };
        let (atime, atimensec) = self.time_access.unwrap_or((0, 0));
        let (mtime, mtimensec) = self.time_modify.unwrap_or((0, 0));
        let (ctime, ctimensec) = self.time_metadata.unwrap_or((0, 0));
        FuseAttr {
            ino: self.fileid.unwrap_or(0),
            size,
            blocks: self.space_used.unwrap_or(size).div_ceil(BLOCK_SIZE),
            atime,
            mtime,
            ctime,
            atimensec,
            mtimensec,
            ctimensec,
            mode: mode_bits | type_bits as u32,
            nlink: self.numlinks.unwrap_or(1),
            uid: self.owner.unwrap_or(0),
            gid: self.owner_group.unwrap_or(0),
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
        }
    }

    /// Builds a [`FuseKStatfs`] from a [`statfs_attributes`]-shaped reply.
    pub fn to_fuse_kstatfs(&self) -> FuseKStatfs {
        FuseKStatfs {
            blocks: self.space_total.unwrap_or(0) / BLOCK_SIZE,
            bfree: self.space_free.unwrap_or(0) / BLOCK_SIZE,
            bavail: self.space_avail.unwrap_or(0) / BLOCK_SIZE,
            files: self.files_total.unwrap_or(0),
            ffree: self.files_free.unwrap_or(0),
            bsize: BLOCK_SIZE as u32,
            namelen: self.maxname.unwrap_or(255),
            frsize: BLOCK_SIZE as u32,
        }
    }
}

/// FUSE's on-wire statfs struct, matching `fuse_kstatfs` minus its padding
/// and spare fields (filled in by the reply layer).
#[derive(Debug, Clone, Copy, Default)]
pub struct FuseKStatfs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_attributes_bitmap_matches_known_numbers() {
        let bitmap = standard_attributes();
        assert!(bitmap.is_set(FATTR4_TYPE));
        assert!(bitmap.is_set(FATTR4_SIZE));
        assert!(bitmap.is_set(FATTR4_FILEID));
        assert!(bitmap.is_set(FATTR4_TIME_MODIFY));
        assert!(!bitmap.is_set(FATTR4_SPACE_TOTAL));
    }

    #[test]
    fn encode_round_trips_word_layout() {
        let bitmap = fileid_attributes();
        let encoded = bitmap.encode();
        assert_eq!(BigEndian::read_u32(&encoded[0..4]), 2);
        assert_eq!(BigEndian::read_u32(&encoded[4..8]), 1 << FATTR4_FILEID);
        assert_eq!(BigEndian::read_u32(&encoded[8..12]), 0);
    }

    #[test]
    fn parse_attributes_reads_in_ascending_attr_order() {
        let bitmap = fileid_attributes();
        let mut body = vec![0u8; 8];
        BigEndian::write_u64(&mut body, 0xdead_beef);
        let decoded = parse_attributes(bitmap, &body).unwrap();
        assert_eq!(decoded.fileid, Some(0xdead_beef));
    }

    #[test]
    fn parse_attributes_errors_on_truncated_body() {
        let bitmap = standard_attributes();
        let err = parse_attributes(bitmap, &[]);
        assert!(err.is_err());
    }

    #[test]
    fn to_fuse_attr_defaults_missing_fields_to_zero() {
        let decoded = DecodedAttrs {
            fileid: Some(42),
            size: Some(100),
            ..Default::default()
        };
        let attr = decoded.to_fuse_attr();
        assert_eq!(attr.ino, 42);
        assert_eq!(attr.size, 100);
        assert_eq!(attr.uid, 0);
        assert_eq!(attr.mode & (libc::S_IFMT as u32), libc::S_IFREG as u32);
    }
}
