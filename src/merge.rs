//! Two-tree merge walk
//!
//! The general diff walks the base tree (`a`) and the target tree (`b`)
//! independently and merges the two ordered streams:
//!
//! ```text
//!  walk(a) ──► bounded channel ──┐
//!                                ├──► merge loop ──► change callback
//!  walk(b) ──► bounded channel ──┘
//! ```
//!
//! Both walkers run as blocking tasks; the merge loop runs on the calling
//! task so the callback needs neither `Send` nor `'static`. Reading file
//! content to settle a truncated timestamp is also moved to a blocking task. The three share a
//! cancellation token. A walker that fails cancels the token before closing
//! its channel, so the merge loop can tell "stream finished" from "stream
//! broken" and never mistakes a failed walk for a tree full of deletions.
//!
//! Because each stream is strictly increasing in apply order and the loop
//! always consumes the smaller head (or both heads when equal), the merged
//! output is strictly increasing as well.
//!
//! Removed directories produce a single `Delete`; everything beneath them is
//! implied. The same holds for a directory replaced by a file: one `Modify`
//! for the path, nothing for the old children.

use crate::compare::{compare_content, quick_check};
use crate::error::{DiffError, Result};
use crate::types::{ChangeKind, EntryInfo, PathEntry};
use crate::walk::{compare_paths, sorted_walker, walk_tree};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Tuning for a merge walk
#[derive(Debug, Clone, Copy)]
pub(crate) struct MergeOptions {
    pub channel_capacity: usize,
    pub compare_buffer_size: usize,
}

/// Walk `root` and push every entry into `tx`
///
/// Runs on a blocking thread. Cancels `token` on failure so the consumer
/// observes the error before it observes the closed channel.
fn path_walk(root: &Path, tx: mpsc::Sender<PathEntry>, token: &CancellationToken) -> Result<()> {
    let result = walk_tree(root, sorted_walker(root), |entry| {
        if token.is_cancelled() {
            return Err(DiffError::Cancelled);
        }
        tx.blocking_send(entry).map_err(|_| DiffError::Cancelled)
    });
    match result {
        Ok(count) => {
            trace!("Walker for {:?} produced {} entries", root, count);
            Ok(())
        }
        Err(err) => {
            token.cancel();
            Err(err)
        }
    }
}

/// Classify the two stream heads by path
fn path_change(f1: Option<&PathEntry>, f2: Option<&PathEntry>) -> Option<ChangeKind> {
    match (f1, f2) {
        (None, None) => None,
        (None, Some(_)) => Some(ChangeKind::Add),
        (Some(_), None) => Some(ChangeKind::Delete),
        (Some(lower), Some(upper)) => match compare_paths(&lower.path, &upper.path) {
            Ordering::Less => Some(ChangeKind::Delete),
            Ordering::Greater => Some(ChangeKind::Add),
            Ordering::Equal => Some(ChangeKind::Modify),
        },
    }
}

/// One side of the merge: a receiver plus its pending head
struct Cursor {
    rx: Option<mpsc::Receiver<PathEntry>>,
    head: Option<PathEntry>,
}

impl Cursor {
    fn new(rx: mpsc::Receiver<PathEntry>) -> Self {
        Self { rx: Some(rx), head: None }
    }

    /// Refill the head if it is empty and the stream is still open
    async fn fill(&mut self, token: &CancellationToken) -> Result<()> {
        if self.head.is_some() {
            return Ok(());
        }
        let Some(rx) = self.rx.as_mut() else {
            return Ok(());
        };

        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DiffError::Cancelled),
            next = rx.recv() => next,
        };
        match next {
            Some(entry) => self.head = Some(entry),
            None => {
                // A walker cancels before closing its channel on failure
                if token.is_cancelled() {
                    return Err(DiffError::Cancelled);
                }
                self.rx = None;
            }
        }
        Ok(())
    }
}

/// Consume both streams and emit the merged change list
async fn merge_loop<F>(
    mut lower: Cursor,
    mut upper: Cursor,
    options: MergeOptions,
    token: &CancellationToken,
    change_fn: &mut F,
) -> Result<usize>
where
    F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
{
    // Prefix of a deleted directory; base-only entries beneath it are implied
    let mut rmdir: Option<PathBuf> = None;
    let mut emitted = 0;

    loop {
        lower.fill(token).await?;
        upper.fill(token).await?;

        let Some(kind) = path_change(lower.head.as_ref(), upper.head.as_ref()) else {
            break;
        };

        match kind {
            ChangeKind::Add => {
                rmdir = None;
                let Some(f2) = upper.head.take() else { break };
                change_fn(ChangeKind::Add, &f2.path, Some(&f2.info), None)?;
            }
            ChangeKind::Delete => {
                let Some(f1) = lower.head.take() else { break };
                if let Some(dir) = rmdir.as_deref() {
                    if f1.path.starts_with(dir) && f1.path != dir {
                        trace!("Delete of {:?} implied by {:?}", f1.path, dir);
                        continue;
                    }
                }
                rmdir = f1.info.is_dir().then(|| f1.path.clone());
                change_fn(ChangeKind::Delete, &f1.path, None, None)?;
            }
            ChangeKind::Modify | ChangeKind::Unmodified => {
                let (Some(f1), Some(f2)) = (lower.head.take(), upper.head.take()) else {
                    break;
                };
                let same = match quick_check(&f1, &f2) {
                    Some(same) => same,
                    None => {
                        let (a, b) = (f1.clone(), f2.clone());
                        let size = options.compare_buffer_size;
                        tokio::task::spawn_blocking(move || compare_content(&a, &b, size)).await??
                    }
                };
                rmdir = (f1.info.is_dir() && !f2.info.is_dir()).then(|| f1.path.clone());

                let kind = if same {
                    if !f2.info.is_hard_linked() {
                        continue;
                    }
                    ChangeKind::Unmodified
                } else {
                    ChangeKind::Modify
                };
                change_fn(kind, &f2.path, Some(&f2.info), None)?;
            }
        }
        emitted += 1;
    }

    Ok(emitted)
}

/// Diff `a` (base) against `b` (target) by walking both trees
pub(crate) async fn double_walk_diff<F>(
    parent: &CancellationToken,
    a: &Path,
    b: &Path,
    options: MergeOptions,
    mut change_fn: F,
) -> Result<()>
where
    F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
{
    if parent.is_cancelled() {
        return Err(DiffError::Cancelled);
    }
    let token = parent.child_token();
    let capacity = options.channel_capacity.max(1);

    let (tx1, rx1) = mpsc::channel(capacity);
    let (tx2, rx2) = mpsc::channel(capacity);

    let walker_a = {
        let (root, token) = (a.to_path_buf(), token.clone());
        tokio::task::spawn_blocking(move || path_walk(&root, tx1, &token))
    };
    let walker_b = {
        let (root, token) = (b.to_path_buf(), token.clone());
        tokio::task::spawn_blocking(move || path_walk(&root, tx2, &token))
    };

    let merged = merge_loop(Cursor::new(rx1), Cursor::new(rx2), options, &token, &mut change_fn).await;
    if merged.is_err() {
        token.cancel();
    }
    // Receivers are gone at this point, so blocked walkers wake up and exit
    let walked_a = walker_a.await.map_err(DiffError::from).and_then(|r| r);
    let walked_b = walker_b.await.map_err(DiffError::from).and_then(|r| r);

    // Report the first error that was not just a consequence of cancellation
    let mut first_cancel = None;
    for result in [merged.map(|_| ()), walked_a, walked_b] {
        match result {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {
                first_cancel.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    if let Some(err) = first_cancel {
        return Err(err);
    }

    debug!("Double walk diff of {:?} from {:?} complete", b, a);
    Ok(())
}
