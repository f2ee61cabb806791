//! Ordered directory traversal
//!
//! Every diff strategy in this crate consumes a tree as a stream of
//! [`PathEntry`] values in *apply order*: a depth-first walk where each
//! directory's children are visited sorted by name bytes. Paths produced by
//! the walk are rebased onto `/`, so `/srv/tree/etc/hosts` walked from
//! `/srv/tree` becomes `/etc/hosts`. The root itself is never produced.
//!
//! [`compare_paths`] is the total order matching that walk. It compares path
//! bytes with the separator ranked below every other byte, which keeps a
//! directory's subtree contiguous: `/a/b` sorts before `/a.txt`.
//!
//! This module also hosts the single-tree emitter, the degenerate diff used
//! when there is no base tree.

use crate::error::{DiffError, Result};
use crate::types::{ChangeKind, EntryInfo, PathEntry};
use std::cmp::Ordering;
use std::path::{Path, PathBuf, MAIN_SEPARATOR, MAIN_SEPARATOR_STR};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Compare two rooted paths in apply order
///
/// # Example
///
/// ```rust
/// use layerdiff::walk::compare_paths;
/// use std::cmp::Ordering;
/// use std::path::Path;
///
/// assert_eq!(compare_paths(Path::new("/a/b"), Path::new("/a.txt")), Ordering::Less);
/// assert_eq!(compare_paths(Path::new("/a"), Path::new("/a/b")), Ordering::Less);
/// assert_eq!(compare_paths(Path::new("/b"), Path::new("/a/z")), Ordering::Greater);
/// ```
pub fn compare_paths(a: &Path, b: &Path) -> Ordering {
    let rank = |c: u8| if c == MAIN_SEPARATOR as u8 { 0 } else { c };
    let a = a.as_os_str().as_encoded_bytes();
    let b = b.as_os_str().as_encoded_bytes();
    a.iter()
        .map(|&c| rank(c))
        .cmp(b.iter().map(|&c| rank(c)))
}

/// Walker over `root` that does not follow symlinks and sorts siblings by name
pub fn sorted_walker(root: &Path) -> WalkDir {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
}

/// Rebase a walked path onto `/`
pub fn rebase(root: &Path, path: &Path) -> Result<PathBuf> {
    let relative = path.strip_prefix(root).map_err(|_| DiffError::OutsideRoot {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
    })?;
    Ok(Path::new(MAIN_SEPARATOR_STR).join(relative))
}

/// Location of a rooted path inside the tree at `root`
pub fn host_path(root: &Path, rooted: &Path) -> PathBuf {
    root.join(rooted.strip_prefix(MAIN_SEPARATOR_STR).unwrap_or(rooted))
}

/// Drive `walker` (rooted at `root`) and hand every non-root entry to `visit`
///
/// The first walk error or error returned by `visit` stops the walk and is
/// returned unchanged. Returns the number of entries visited.
pub fn walk_tree<F>(root: &Path, walker: WalkDir, mut visit: F) -> Result<usize>
where
    F: FnMut(PathEntry) -> Result<()>,
{
    let mut visited = 0;
    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let path = rebase(root, entry.path())?;
        let metadata = entry.metadata()?;
        let info = EntryInfo::from_metadata(&metadata);
        trace!("Walked {:?}", path);

        visit(PathEntry {
            path,
            full_path: entry.into_path(),
            info,
        })?;
        visited += 1;
    }
    Ok(visited)
}

/// Emit every entry under `root` as an addition
///
/// Used when there is no base tree: the whole tree is new.
pub fn add_dir_changes<F>(root: &Path, mut change_fn: F) -> Result<()>
where
    F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
{
    let count = walk_tree(root, sorted_walker(root), |entry| {
        change_fn(ChangeKind::Add, &entry.path, Some(&entry.info), None)
    })?;
    debug!("Single walk of {:?} emitted {} additions", root, count);
    Ok(())
}
