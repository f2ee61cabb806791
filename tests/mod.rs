//! Main test module for layerdiff
//!
//! This module includes all test suites:
//! - Integration tests for diffs of real trees
//! - Chaos tests for failures, cancellation and backpressure
//! - Property-based tests for ordering and apply correctness


/// Tree builders and a reference applier shared by the suites
pub mod support {
    use filetime::{set_file_mtime, set_symlink_file_times, FileTime};
    use layerdiff::walk::{compare_paths, host_path, rebase};
    use layerdiff::{Change, ChangeKind};
    use std::cmp::Ordering;
    use std::collections::BTreeMap;
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use walkdir::WalkDir;

    /// Entry of a tree snapshot
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Node {
        Dir,
        File(Vec<u8>),
        Symlink(PathBuf),
    }

    pub fn stamp(secs: i64, nanos: u32) -> FileTime {
        FileTime::from_unix_time(secs, nanos)
    }

    /// Write a file, creating parents, and pin its modification time
    pub fn write_file(root: &Path, rel: &str, content: &[u8], mtime: FileTime) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        set_file_mtime(&path, mtime).unwrap();
    }

    pub fn symlink(root: &Path, rel: &str, target: &str, mtime: FileTime) {
        let path = root.join(rel);
        std::os::unix::fs::symlink(target, &path).unwrap();
        set_symlink_file_times(&path, mtime, mtime).unwrap();
    }

    /// Pin the modification time of every directory under `root`
    ///
    /// Runs after all content is in place, since creating children touches
    /// the parent's time.
    pub fn pin_dir_times(root: &Path, mtime: FileTime) {
        for entry in WalkDir::new(root).contents_first(true) {
            let entry = entry.unwrap();
            if entry.file_type().is_dir() {
                set_file_mtime(entry.path(), mtime).unwrap();
            }
        }
    }

    /// Rooted path to node map of everything under `root`
    pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Node> {
        let mut out = BTreeMap::new();
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = entry.unwrap();
            let node = if entry.file_type().is_dir() {
                Node::Dir
            } else if entry.file_type().is_symlink() {
                Node::Symlink(fs::read_link(entry.path()).unwrap())
            } else {
                Node::File(fs::read(entry.path()).unwrap())
            };
            out.insert(rebase(root, entry.path()).unwrap(), node);
        }
        out
    }

    /// Recursively copy `src` into the existing directory `dst`
    pub fn copy_tree(src: &Path, dst: &Path) {
        for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
            let entry = entry.unwrap();
            let to = dst.join(entry.path().strip_prefix(src).unwrap());
            if entry.file_type().is_dir() {
                fs::create_dir(&to).unwrap();
            } else if entry.file_type().is_symlink() {
                std::os::unix::fs::symlink(fs::read_link(entry.path()).unwrap(), &to).unwrap();
            } else {
                fs::copy(entry.path(), &to).unwrap();
            }
        }
    }

    fn remove_any(path: &Path) -> io::Result<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Apply changes front to back to `dest`, taking content from `target`
    ///
    /// A naive consumer: it relies on parents arriving before children and
    /// on a directory delete removing the whole subtree.
    pub fn apply_changes(dest: &Path, target: &Path, changes: &[Change]) -> io::Result<()> {
        for change in changes {
            let to = host_path(dest, &change.path);
            match change.kind {
                ChangeKind::Unmodified => {}
                ChangeKind::Delete => remove_any(&to)?,
                ChangeKind::Add | ChangeKind::Modify => {
                    let from = host_path(target, &change.path);
                    let meta = fs::symlink_metadata(&from)?;
                    if meta.is_dir() {
                        match fs::symlink_metadata(&to) {
                            Ok(existing) if existing.is_dir() => {}
                            _ => {
                                remove_any(&to)?;
                                fs::create_dir(&to)?;
                            }
                        }
                        fs::set_permissions(&to, meta.permissions())?;
                    } else if meta.file_type().is_symlink() {
                        remove_any(&to)?;
                        std::os::unix::fs::symlink(fs::read_link(&from)?, &to)?;
                    } else {
                        remove_any(&to)?;
                        fs::copy(&from, &to)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn assert_strictly_ordered(changes: &[Change]) {
        for pair in changes.windows(2) {
            assert_eq!(
                compare_paths(&pair[0].path, &pair[1].path),
                Ordering::Less,
                "{} must precede {}",
                pair[0],
                pair[1]
            );
        }
    }

    /// `(kind, path)` pairs for compact assertions
    pub fn pairs(changes: &[Change]) -> Vec<(ChangeKind, String)> {
        changes
            .iter()
            .map(|c| (c.kind, c.path.display().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod edge_cases {
    use super::support::*;
    use layerdiff::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_empty_trees() {
        let base = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let cancel = CancellationToken::new();

        let changes = collect_changes(&cancel, Some(base.path()), target.path()).await.unwrap();
        assert!(changes.is_empty());
        let changes = collect_changes(&cancel, None, target.path()).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_everything_deleted() {
        let base = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let t = stamp(1_600_000_000, 5);
        write_file(base.path(), "a/b/c.txt", b"c", t);
        write_file(base.path(), "a.txt", b"a", t);
        write_file(base.path(), "z", b"z", t);

        let cancel = CancellationToken::new();
        let changes = collect_changes(&cancel, Some(base.path()), target.path()).await.unwrap();
        assert_eq!(
            pairs(&changes),
            vec![
                (ChangeKind::Delete, "/a".to_string()),
                (ChangeKind::Delete, "/a.txt".to_string()),
                (ChangeKind::Delete, "/z".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_separator_ordering_against_dotted_sibling() {
        let target = TempDir::new().unwrap();
        let t = stamp(1_600_000_000, 5);
        write_file(target.path(), "a/b", b"", t);
        write_file(target.path(), "a.txt", b"", t);
        write_file(target.path(), "a-z", b"", t);

        let cancel = CancellationToken::new();
        let changes = collect_changes(&cancel, None, target.path()).await.unwrap();
        assert_eq!(
            pairs(&changes),
            vec![
                (ChangeKind::Add, "/a".to_string()),
                (ChangeKind::Add, "/a/b".to_string()),
                (ChangeKind::Add, "/a-z".to_string()),
                (ChangeKind::Add, "/a.txt".to_string()),
            ]
        );
        assert_strictly_ordered(&changes);
    }

    #[tokio::test]
    async fn test_symlink_not_followed() {
        let base = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let t = stamp(1_600_000_000, 5);
        write_file(target.path(), "real/file", b"data", t);
        symlink(target.path(), "link", "real", t);

        let cancel = CancellationToken::new();
        let changes = collect_changes(&cancel, Some(base.path()), target.path()).await.unwrap();
        // The link is one entry; nothing is reported beneath it
        assert_eq!(
            pairs(&changes),
            vec![
                (ChangeKind::Add, "/link".to_string()),
                (ChangeKind::Add, "/real".to_string()),
                (ChangeKind::Add, "/real/file".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_file_with_truncated_time() {
        let base = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write_file(base.path(), "empty", b"", stamp(1_600_000_000, 0));
        write_file(target.path(), "empty", b"", stamp(1_600_000_000, 987_654));

        let cancel = CancellationToken::new();
        let changes = collect_changes(&cancel, Some(base.path()), target.path()).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_target_root_is_a_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plain"), "x").unwrap();

        let cancel = CancellationToken::new();
        // A file root has no entries below it
        let changes = collect_changes(&cancel, None, &dir.path().join("plain")).await.unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_change_display_and_json() {
        let change = Change::new(ChangeKind::Delete, Path::new("/etc/passwd"));
        assert_eq!(change.to_string(), "delete /etc/passwd");
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(json, r#"{"kind":"delete","path":"/etc/passwd"}"#);
    }
}
