//! Single-walk diff for union filesystem upper directories
//!
//! When the target tree is the upper (diff) directory of a union mount, every
//! change is already materialised there: new and copied-up files exist in the
//! upper directory, deletions are recorded as whiteout markers. This module
//! walks only the upper directory and looks each entry up in the lower (base)
//! directory with a single `lstat`, never walking the base tree.
//!
//! ## Overlay conventions
//!
//! | Upper entry           | Meaning                                          |
//! |-----------------------|--------------------------------------------------|
//! | `.wh.<name>`          | `<name>` was deleted                             |
//! | `.wh..wh..opq`        | the parent directory is opaque                   |
//! | char device `0/0`     | the entry itself was deleted (kernel whiteout)   |
//!
//! A whiteout whose target is absent from the base deletes nothing and is
//! dropped. Markers never appear as events of their own.
//!
//! An opaque marker is reported as a `Delete` of `<dir>/.wh..opq`. The name
//! cannot exist in a real tree, so this is a signal rather than a deletion:
//! consumers re-add the whiteout prefix and write `<dir>/.wh..wh..opq` into
//! the layer. Directories emptied without an opaque marker are not detected
//! as opaque; that approximation is deliberate.
//!
//! ## Directory propagation
//!
//! Copying a file up does not always touch the parent directory's metadata,
//! so a directory can look identical to its base and still contain added or
//! deleted entries. Before an `Add` or `Delete` is emitted, each ancestor
//! directory that has not been reported yet is emitted as `Modify`,
//! outermost first. A copied-up entry (`Modify`) does not report its
//! parents.
//!
//! To keep the stream in apply order, a `Modify` below an unreported
//! directory is held back while a later sibling could still force that
//! directory out. Held events are released, merged with any reported
//! ancestors, once the walk leaves the directory or an addition or deletion
//! below it reports the directory first.

use crate::compare::same_fs_time;
use crate::error::{DiffError, Result};
use crate::types::{ChangeKind, DiffSource, EntryInfo, EntryKind, PathEntry};
use crate::walk::{compare_paths, host_path, walk_tree};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Prefix marking a deleted entry
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker file making its directory opaque
pub const WHITEOUT_OPAQUE_DIR: &str = ".wh..wh..opq";

/// What an upper-directory entry stands for
#[derive(Debug, Clone, PartialEq, Eq)]
enum Whiteout {
    /// A regular entry, classified against the base
    None,
    /// A marker deleting the given rooted path from the base
    Delete(PathBuf),
    /// An opaque-directory marker, reported as a delete of the given path
    Opaque(PathBuf),
}

/// Strategy hooks for one union filesystem convention
#[derive(Clone, Copy)]
struct DiffDirOptions {
    /// Name a directory child is ordered by
    sort_key: fn(&OsStr) -> &[u8],
    /// Whiteout interpretation of an entry
    whiteout: fn(&PathEntry) -> Whiteout,
}

impl DiffDirOptions {
    fn for_source(source: DiffSource) -> Self {
        match source {
            DiffSource::Overlay => DiffDirOptions {
                sort_key: overlay_sort_key,
                whiteout: overlay_whiteout,
            },
        }
    }

    /// Order siblings by the name they affect, raw name breaking ties
    fn compare_names(&self, a: &OsStr, b: &OsStr) -> Ordering {
        (self.sort_key)(a)
            .cmp((self.sort_key)(b))
            .then_with(|| a.cmp(b))
    }
}

/// `.wh.foo` sorts where `foo` would
fn overlay_sort_key(name: &OsStr) -> &[u8] {
    let bytes = name.as_encoded_bytes();
    bytes
        .strip_prefix(WHITEOUT_PREFIX.as_bytes())
        .filter(|rest| !rest.is_empty())
        .unwrap_or(bytes)
}

fn overlay_whiteout(entry: &PathEntry) -> Whiteout {
    if entry.info.kind == EntryKind::CharDevice && entry.info.device_numbers() == (0, 0) {
        return Whiteout::Delete(entry.path.clone());
    }

    let (Some(parent), Some(name)) = (entry.path.parent(), entry.path.file_name()) else {
        return Whiteout::None;
    };
    if name == WHITEOUT_OPAQUE_DIR {
        return match strip_whiteout_prefix(name) {
            Some(target) => Whiteout::Opaque(parent.join(target)),
            None => Whiteout::None,
        };
    }
    match strip_whiteout_prefix(name) {
        Some(target) => Whiteout::Delete(parent.join(target)),
        None => Whiteout::None,
    }
}

#[cfg(unix)]
fn strip_whiteout_prefix(name: &OsStr) -> Option<OsString> {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes()
        .strip_prefix(WHITEOUT_PREFIX.as_bytes())
        .filter(|rest| !rest.is_empty())
        .map(|rest| OsStr::from_bytes(rest).to_os_string())
}

#[cfg(not(unix))]
fn strip_whiteout_prefix(name: &OsStr) -> Option<OsString> {
    name.to_str()?
        .strip_prefix(WHITEOUT_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(OsString::from)
}

/// `lstat` a rooted path under `root`; `None` when it does not exist
///
/// A lookup below a base entry that is not a directory also means absent.
fn stat_in(root: &Path, rooted: &Path) -> Result<Option<EntryInfo>> {
    match EntryInfo::lstat(&host_path(root, rooted)) {
        Ok(info) => Ok(Some(info)),
        Err(err) if err.is_absent() => Ok(None),
        Err(err) => Err(err),
    }
}

/// A `Modify` waiting for its unreported ancestors to be settled
#[derive(Debug)]
struct Held {
    path: PathBuf,
    info: EntryInfo,
}

/// Directories already reported as changed during one walk
#[derive(Debug, Default)]
struct ChangedDirs {
    dirs: HashSet<PathBuf>,
    held: Vec<Held>,
}

impl ChangedDirs {
    fn insert(&mut self, dir: PathBuf) {
        self.dirs.insert(dir);
    }

    /// Ancestors of `path` not reported yet, outermost first
    fn unreported(&self, path: &Path) -> Vec<PathBuf> {
        let mut pending: Vec<PathBuf> = path
            .ancestors()
            .skip(1)
            .take_while(|a| !a.as_os_str().is_empty() && *a != Path::new(MAIN_SEPARATOR_STR))
            .filter(|a| !self.dirs.contains(*a))
            .map(Path::to_path_buf)
            .collect();
        pending.reverse();
        pending
    }

    /// Emit held events that nothing at or after `current` can precede
    fn release<F>(&mut self, current: &Path, change_fn: &mut F) -> Result<()>
    where
        F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
    {
        let ready = self
            .held
            .iter()
            .take_while(|h| self.unreported(&h.path).iter().all(|dir| !current.starts_with(dir)))
            .count();
        for held in self.held.drain(..ready) {
            change_fn(ChangeKind::Modify, &held.path, Some(&held.info), None)?;
        }
        Ok(())
    }

    /// Emit a `Modify` that does not report its parents
    fn modify<F>(&mut self, path: &Path, info: &EntryInfo, change_fn: &mut F) -> Result<()>
    where
        F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
    {
        self.release(path, change_fn)?;
        if self.held.is_empty() && self.unreported(path).is_empty() {
            return change_fn(ChangeKind::Modify, path, Some(info), None);
        }
        trace!("Holding {:?} until its parents are settled", path);
        self.held.push(Held {
            path: path.to_path_buf(),
            info: info.clone(),
        });
        Ok(())
    }

    /// Emit an addition or deletion, reporting every unreported ancestor first
    ///
    /// Ancestors are emitted as `Modify`, outermost first, interleaved with
    /// held events in path order. A stat failure on an ancestor is handed to
    /// the callback with the event instead of aborting the walk.
    fn propagate<F>(
        &mut self,
        diff_dir: &Path,
        kind: ChangeKind,
        path: &Path,
        info: Option<&EntryInfo>,
        change_fn: &mut F,
    ) -> Result<()>
    where
        F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
    {
        self.release(path, change_fn)?;

        let pending = self.unreported(path);
        let mut held = std::mem::take(&mut self.held).into_iter().peekable();
        for dir in pending {
            while let Some(h) = held.next_if(|h| compare_paths(&h.path, &dir) == Ordering::Less) {
                change_fn(ChangeKind::Modify, &h.path, Some(&h.info), None)?;
            }
            trace!("Propagating change of {:?} to {:?}", path, dir);
            match EntryInfo::lstat(&host_path(diff_dir, &dir)) {
                Ok(info) => change_fn(ChangeKind::Modify, &dir, Some(&info), None)?,
                Err(err) => change_fn(ChangeKind::Modify, &dir, None, Some(err))?,
            }
            self.dirs.insert(dir);
        }
        for h in held {
            change_fn(ChangeKind::Modify, &h.path, Some(&h.info), None)?;
        }

        change_fn(kind, path, info, None)
    }

    /// Emit everything still held once the walk is over
    fn finish<F>(&mut self, change_fn: &mut F) -> Result<()>
    where
        F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
    {
        for held in self.held.drain(..) {
            change_fn(ChangeKind::Modify, &held.path, Some(&held.info), None)?;
        }
        Ok(())
    }
}

/// Diff an upper directory against its lower directory
pub(crate) fn diff_dir_changes<F>(
    token: &CancellationToken,
    base_dir: &Path,
    diff_dir: &Path,
    source: DiffSource,
    mut change_fn: F,
) -> Result<()>
where
    F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
{
    let options = DiffDirOptions::for_source(source);
    let mut changed_dirs = ChangedDirs::default();

    let walker = WalkDir::new(diff_dir)
        .follow_links(false)
        .sort_by(move |a, b| options.compare_names(a.file_name(), b.file_name()));

    let visited = walk_tree(diff_dir, walker, |entry| {
        if token.is_cancelled() {
            return Err(DiffError::Cancelled);
        }

        match (options.whiteout)(&entry) {
            Whiteout::Opaque(marker) => {
                trace!("Opaque directory marker {:?}", entry.path);
                changed_dirs.propagate(diff_dir, ChangeKind::Delete, &marker, None, &mut change_fn)
            }
            Whiteout::Delete(target) => {
                if target != entry.path && stat_in(diff_dir, &target)?.is_some() {
                    warn!("Ignoring whiteout {:?}: {:?} exists in the diff directory", entry.path, target);
                    return Ok(());
                }
                if stat_in(base_dir, &target)?.is_none() {
                    trace!("Whiteout {:?} has nothing to delete in base", entry.path);
                    return Ok(());
                }
                changed_dirs.propagate(diff_dir, ChangeKind::Delete, &target, None, &mut change_fn)
            }
            Whiteout::None => {
                let f = &entry.info;
                let kind = match stat_in(base_dir, &entry.path)? {
                    None => ChangeKind::Add,
                    Some(base) => {
                        if base.is_dir()
                            && f.is_dir()
                            && base.size == f.size
                            && base.mode == f.mode
                            && same_fs_time(base.mtime, f.mtime)
                        {
                            trace!("Directory {:?} unchanged", entry.path);
                            return Ok(());
                        }
                        ChangeKind::Modify
                    }
                };

                if f.is_dir() {
                    changed_dirs.insert(entry.path.clone());
                }
                match kind {
                    ChangeKind::Add => {
                        changed_dirs.propagate(diff_dir, kind, &entry.path, Some(f), &mut change_fn)
                    }
                    _ => changed_dirs.modify(&entry.path, f, &mut change_fn),
                }
            }
        }
    })?;
    changed_dirs.finish(&mut change_fn)?;

    debug!(
        "Diff directory walk of {:?} visited {} entries, {} directories changed",
        diff_dir,
        visited,
        changed_dirs.dirs.len()
    );
    Ok(())
}
