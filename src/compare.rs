//! Content equality between two versions of the same path
//!
//! The merge walk calls [`same_file`] for every path present in both trees.
//! Metadata decides almost every case; file content is only read when one
//! of the two timestamps looks truncated, which happens when a tree was
//! round-tripped through an archive format that drops nanoseconds. Two files
//! with the same second but nanosecond values `0` and `123` are treated as
//! "maybe equal" and settled by comparing bytes.

use crate::error::Result;
use crate::types::{EntryKind, FsTime, PathEntry};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::trace;

/// Default chunk size used when comparing file content
pub const DEFAULT_COMPARE_BUFFER_SIZE: usize = 32 * 1024;

/// Decide whether two entries for the same path hold the same file
///
/// `buffer_size` bounds the chunk size used when content has to be read.
pub fn same_file(a: &PathEntry, b: &PathEntry, buffer_size: usize) -> Result<bool> {
    match quick_check(a, b) {
        Some(same) => Ok(same),
        None => compare_content(a, b, buffer_size),
    }
}

/// Decide from metadata alone, or `None` when the content must be read
pub fn quick_check(a: &PathEntry, b: &PathEntry) -> Option<bool> {
    let (f1, f2) = (&a.info, &b.info);

    // Same inode on the same device
    if f1.ino != 0 && f1.dev == f2.dev && f1.ino == f2.ino {
        return Some(true);
    }

    if f1.mode != f2.mode || f1.uid != f2.uid || f1.gid != f2.gid {
        return Some(false);
    }
    if matches!(f1.kind, EntryKind::CharDevice | EntryKind::BlockDevice) && f1.rdev != f2.rdev {
        return Some(false);
    }

    if f1.kind == EntryKind::Dir {
        return Some(true);
    }

    if f1.size != f2.size {
        return Some(false);
    }

    let (t1, t2) = (f1.mtime, f2.mtime);
    if t1.secs != t2.secs {
        return Some(false);
    }
    if t1.nanos == t2.nanos {
        return Some(true);
    }
    if t1.nanos != 0 && t2.nanos != 0 {
        return Some(false);
    }
    if f1.kind != EntryKind::Symlink && f1.size == 0 {
        return Some(true);
    }
    None
}

/// Compare what two entries hold: the link target or the file bytes
pub fn compare_content(a: &PathEntry, b: &PathEntry, buffer_size: usize) -> Result<bool> {
    trace!("Truncated timestamp on {:?}, comparing content", b.path);
    if a.info.kind == EntryKind::Symlink {
        return compare_symlink_target(&a.full_path, &b.full_path);
    }
    compare_file_content(&a.full_path, &b.full_path, buffer_size)
}

/// Timestamp equality that tolerates one side having lost its nanoseconds
pub fn same_fs_time(a: FsTime, b: FsTime) -> bool {
    a == b || (a.secs == b.secs && (a.nanos == 0 || b.nanos == 0))
}

fn compare_symlink_target(p1: &Path, p2: &Path) -> Result<bool> {
    Ok(fs::read_link(p1)? == fs::read_link(p2)?)
}

/// Compare two files byte for byte
pub fn compare_file_content(p1: &Path, p2: &Path, buffer_size: usize) -> Result<bool> {
    let buffer_size = buffer_size.max(1);
    let mut r1 = BufReader::with_capacity(buffer_size, File::open(p1)?);
    let mut r2 = BufReader::with_capacity(buffer_size, File::open(p2)?);
    let mut b1 = vec![0u8; buffer_size];
    let mut b2 = vec![0u8; buffer_size];

    loop {
        let n1 = read_full(&mut r1, &mut b1)?;
        let n2 = read_full(&mut r2, &mut b2)?;
        if n1 != n2 || b1[..n1] != b2[..n2] {
            return Ok(false);
        }
        if n1 == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows; short only at end of file
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
