//! On-disk bundle layout shared by the packer and the reader.
//!
//! ```text
//! offset 0   i32  header_len         bytes of version + data_start_offset + index
//! offset 4   u8   version.major
//! offset 5   u8   version.minor
//! offset 6   u8   version.revision
//! offset 7   i64  data_start_offset  absolute, multiple of ALIGNMENT
//! offset 15  index entries until header_len bytes (from offset 4) are consumed:
//!            u16 path_len, path bytes (UTF-8), i64 pos, i64 size
//! data_start_offset: file regions, each starting on an ALIGNMENT boundary
//! ```
//!
//! All integers are little-endian. `pos` is relative to `data_start_offset`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// Every file region and the data section itself start on this boundary.
pub const ALIGNMENT: u64 = 8;

/// Separator used by relative paths stored in a bundle.
pub const PATH_SEPARATOR: char = '/';

/// Version written by this packer and the newest major this reader accepts.
pub const CURRENT_VERSION: Version = Version::new(1, 0, 0);

const LEN_FIELD: u64 = 4;
const VERSION_LEN: usize = 3;
const OFFSET_LEN: usize = 8;
/// Bytes counted by `header_len` before the first index entry.
pub const FIXED_HEADER_LEN: u64 = (VERSION_LEN + OFFSET_LEN) as u64;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8, revision: u8) -> Self {
        Self { major, minor, revision }
    }

    fn to_bytes(self) -> [u8; 3] {
        [self.major, self.minor, self.revision]
    }

    fn from_bytes(b: &[u8]) -> Self {
        Self::new(b[0], b[1], b[2])
    }
}

impl Default for Version {
    fn default() -> Self {
        CURRENT_VERSION
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// One index record as stored on disk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub pos: u64,
    pub size: u64,
}

/// Parsed header and index of a bundle.
#[derive(Clone, Debug)]
pub struct Header {
    pub version: Version,
    pub data_start_offset: u64,
    pub entries: Vec<IndexEntry>,
}

/// Round `n` up to the next multiple of [`ALIGNMENT`].
pub fn align(n: u64) -> u64 {
    n.next_multiple_of(ALIGNMENT)
}

/// Lookup key for a relative path. Index lookups ignore case.
pub fn normalize_key(path: &str) -> String {
    path.to_lowercase()
}

/// Canonical stored form of a relative path: `/` separators, no leading separator.
pub fn normalize_path(path: &str) -> String {
    let p = path.replace('\\', "/");
    p.trim_start_matches(PATH_SEPARATOR).to_string()
}

/// Serialize index entries (the `metadata_bytes` of the header).
pub fn encode_index(entries: &[IndexEntry]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for e in entries {
        let path = e.path.as_bytes();
        let path_len = u16::try_from(path.len()).map_err(|_| Error::PathTooLong(path.len()))?;
        let pos = i64::try_from(e.pos).map_err(|_| Error::invalid(format!("pos {} too large", e.pos)))?;
        let size =
            i64::try_from(e.size).map_err(|_| Error::invalid(format!("size {} too large", e.size)))?;
        buf.extend_from_slice(&path_len.to_le_bytes());
        buf.extend_from_slice(path);
        buf.extend_from_slice(&pos.to_le_bytes());
        buf.extend_from_slice(&size.to_le_bytes());
    }
    Ok(buf)
}

/// Offset where file data begins for an index of `index_len` bytes.
pub fn data_start_for(index_len: u64) -> u64 {
    align(LEN_FIELD + FIXED_HEADER_LEN + index_len)
}

/// Write the full header, zero-padded up to the data start. Returns the data start offset.
pub fn write_header<W: Write>(w: &mut W, version: Version, index: &[u8]) -> Result<u64> {
    let header_len = FIXED_HEADER_LEN + index.len() as u64;
    let header_len_i32 = i32::try_from(header_len)
        .map_err(|_| Error::invalid(format!("index of {} bytes does not fit the header", index.len())))?;
    let data_start = data_start_for(index.len() as u64);
    w.write_all(&header_len_i32.to_le_bytes())?;
    w.write_all(&version.to_bytes())?;
    w.write_all(&(data_start as i64).to_le_bytes())?;
    w.write_all(index)?;
    let pad = (data_start - LEN_FIELD - header_len) as usize;
    w.write_all(&[0u8; ALIGNMENT as usize][..pad])?;
    Ok(data_start)
}

fn take<'a>(cur: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if cur.len() < n {
        return Err(Error::corrupt(format!("truncated {what}")));
    }
    let (head, tail) = cur.split_at(n);
    *cur = tail;
    Ok(head)
}

fn take_i64(cur: &mut &[u8], what: &str) -> Result<i64> {
    let mut b = [0u8; 8];
    b.copy_from_slice(take(cur, 8, what)?);
    Ok(i64::from_le_bytes(b))
}

/// Read and validate the header and index. `file_len` bounds every entry's data range.
pub fn read_header<R: Read>(r: &mut R, file_len: u64) -> Result<Header> {
    if file_len < LEN_FIELD + FIXED_HEADER_LEN {
        return Err(Error::corrupt(format!("file of {file_len} bytes is too short for a header")));
    }
    let mut len4 = [0u8; 4];
    r.read_exact(&mut len4)?;
    let header_len = i32::from_le_bytes(len4);
    if header_len < 0 || (header_len as u64) < FIXED_HEADER_LEN {
        return Err(Error::corrupt(format!("header_len {header_len} too small")));
    }
    let header_len = header_len as u64;
    if LEN_FIELD + header_len > file_len {
        return Err(Error::corrupt(format!("header_len {header_len} exceeds file length {file_len}")));
    }
    let mut buf = vec![0u8; header_len as usize];
    r.read_exact(&mut buf)?;

    let mut cur = &buf[..];
    let version = Version::from_bytes(take(&mut cur, VERSION_LEN, "version")?);
    if version.major > CURRENT_VERSION.major {
        return Err(Error::UnsupportedVersion { found: version, supported: CURRENT_VERSION });
    }
    let data_start = take_i64(&mut cur, "data_start_offset")?;
    if data_start < 0
        || (data_start as u64) < LEN_FIELD + header_len
        || data_start as u64 % ALIGNMENT != 0
        || data_start as u64 > file_len
    {
        return Err(Error::corrupt(format!("bad data_start_offset {data_start}")));
    }
    let data_start = data_start as u64;

    let mut entries = Vec::new();
    while !cur.is_empty() {
        let mut len2 = [0u8; 2];
        len2.copy_from_slice(take(&mut cur, 2, "path length")?);
        let path_len = u16::from_le_bytes(len2) as usize;
        let path = String::from_utf8(take(&mut cur, path_len, "path")?.to_vec())
            .map_err(|_| Error::corrupt("path is not UTF-8"))?;
        let pos = take_i64(&mut cur, "pos")?;
        let size = take_i64(&mut cur, "size")?;
        if pos < 0 || size < 0 {
            return Err(Error::corrupt(format!("negative range for '{path}'")));
        }
        let end = data_start.checked_add(pos as u64).and_then(|x| x.checked_add(size as u64));
        if end.map_or(true, |end| end > file_len) {
            return Err(Error::corrupt(format!("data for '{path}' extends past end of file")));
        }
        entries.push(IndexEntry { path, pos: pos as u64, size: size as u64 });
    }
    Ok(Header { version, data_start_offset: data_start, entries })
}
