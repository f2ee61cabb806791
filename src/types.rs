//! Core data types used throughout the layerdiff library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Changes**: [`ChangeKind`], [`Change`], [`ChangeSummary`] - what the walkers emit
//! - **Entries**: [`EntryInfo`], [`EntryKind`], [`FsTime`], [`PathEntry`] - what the walkers see
//! - **Sources**: [`DiffSource`] - which union filesystem produced a diff directory
//!
//! ## Examples
//!
//! ```rust
//! use layerdiff::types::{Change, ChangeKind, ChangeSummary};
//! use std::path::PathBuf;
//!
//! let mut summary = ChangeSummary::default();
//! summary.record(ChangeKind::Add);
//! summary.record(ChangeKind::Delete);
//!
//! let change = Change::new(ChangeKind::Add, PathBuf::from("/etc/hosts"));
//! assert_eq!(change.to_string(), "add /etc/hosts");
//! assert_eq!(summary.total(), 2);
//! ```

use crate::error::{DiffError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The type of modification a change is making
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The path is unchanged; only emitted for hard-linked entries
    Unmodified,
    /// The path exists only in the target tree
    Add,
    /// The path exists in both trees and differs
    Modify,
    /// The path exists only in the base tree
    Delete,
}

impl ChangeKind {
    /// Lowercase name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Unmodified => "unmodified",
            ChangeKind::Add => "add",
            ChangeKind::Modify => "modify",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change between a tree and its base
///
/// `path` is always rooted (`/usr/bin/env`) and relative to the diffed tree,
/// never an absolute host path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Kind of change
    pub kind: ChangeKind,
    /// Rooted path relative to the diffed tree
    pub path: PathBuf,
}

impl Change {
    /// Create a new change record
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path.display())
    }
}

/// Per-kind counters over a change stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Number of `Add` events
    pub added: usize,
    /// Number of `Modify` events
    pub modified: usize,
    /// Number of `Delete` events
    pub deleted: usize,
    /// Number of explicit `Unmodified` events
    pub unmodified: usize,
}

impl ChangeSummary {
    /// Count one event
    pub fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Add => self.added += 1,
            ChangeKind::Modify => self.modified += 1,
            ChangeKind::Delete => self.deleted += 1,
            ChangeKind::Unmodified => self.unmodified += 1,
        }
    }

    /// Total number of events counted
    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted + self.unmodified
    }
}

/// File type of a walked entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link (never followed)
    Symlink,
    /// Character device
    CharDevice,
    /// Block device
    BlockDevice,
    /// Named pipe
    Fifo,
    /// Unix domain socket
    Socket,
    /// Anything else the platform reports
    Other,
}

impl EntryKind {
    fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            return EntryKind::Dir;
        }
        if ft.is_file() {
            return EntryKind::File;
        }
        if ft.is_symlink() {
            return EntryKind::Symlink;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if ft.is_char_device() {
                return EntryKind::CharDevice;
            }
            if ft.is_block_device() {
                return EntryKind::BlockDevice;
            }
            if ft.is_fifo() {
                return EntryKind::Fifo;
            }
            if ft.is_socket() {
                return EntryKind::Socket;
            }
        }
        EntryKind::Other
    }
}

/// Modification time split into whole seconds and the nanosecond remainder
///
/// Archive formats frequently drop the nanosecond part, so the comparison
/// logic needs to see the two halves separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct FsTime {
    /// Seconds since the Unix epoch
    pub secs: i64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl FsTime {
    /// Create a timestamp from its two halves
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }
}

/// Metadata snapshot of one filesystem entry
///
/// Captured with `lstat` semantics: a symlink describes the link itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    /// File type
    pub kind: EntryKind,
    /// Full mode bits, file type included
    pub mode: u32,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub mtime: FsTime,
    /// Number of hard links
    pub nlink: u64,
    /// Device number for device nodes
    pub rdev: u64,
    /// Device the entry lives on
    pub dev: u64,
    /// Inode number
    pub ino: u64,
}

impl EntryInfo {
    /// Build a snapshot from `std::fs::Metadata`
    #[cfg(unix)]
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            kind: EntryKind::from_file_type(metadata.file_type()),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            size: metadata.size(),
            mtime: FsTime::new(metadata.mtime(), metadata.mtime_nsec() as u32),
            nlink: metadata.nlink(),
            rdev: metadata.rdev(),
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    /// Build a snapshot from `std::fs::Metadata` (non-Unix implementation)
    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| FsTime::new(d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or_default();
        let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
        Self {
            kind: EntryKind::from_file_type(metadata.file_type()),
            mode,
            uid: 0,
            gid: 0,
            size: metadata.len(),
            mtime,
            nlink: 1,
            rdev: 0,
            dev: 0,
            ino: 0,
        }
    }

    /// `lstat` a path and snapshot the result
    pub fn lstat(path: &Path) -> Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    /// Whether this entry is a directory
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Whether this entry is a symbolic link
    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Non-directory entry with more than one hard link
    pub fn is_hard_linked(&self) -> bool {
        !self.is_dir() && self.nlink > 1
    }

    /// Major and minor numbers of a device node
    pub fn device_numbers(&self) -> (u64, u64) {
        // glibc encoding of dev_t
        let major = ((self.rdev >> 32) & 0xffff_f000) | ((self.rdev >> 8) & 0x0000_0fff);
        let minor = ((self.rdev >> 12) & 0xffff_ff00) | (self.rdev & 0x0000_00ff);
        (major, minor)
    }
}

/// One entry produced by a tree walk
///
/// Ownership passes from the producing walker to whoever consumes it; the
/// merge loop holds at most one per side.
#[derive(Debug, Clone)]
pub struct PathEntry {
    /// Rooted path relative to the walked tree
    pub path: PathBuf,
    /// Real location on disk
    pub full_path: PathBuf,
    /// Metadata captured during the walk
    pub info: EntryInfo,
}

/// Union filesystem that produced a diff directory
///
/// New conventions are added as variants; each variant maps to one whiteout
/// strategy in [`crate::overlay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffSource {
    /// Overlay upper directory: `.wh.<name>` whiteouts, `.wh..wh..opq`
    /// opaque markers and 0/0 character device whiteouts
    Overlay,
}

impl fmt::Display for DiffSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffSource::Overlay => f.write_str("overlay"),
        }
    }
}

impl FromStr for DiffSource {
    type Err = DiffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "overlay" | "overlayfs" => Ok(DiffSource::Overlay),
            other => Err(DiffError::UnknownDiffSource(other.to_string())),
        }
    }
}
