//! Entry points for computing tree changes
//!
//! [`changes`] and [`diff_dir_changes`] are the two operations of this crate.
//! They pick a strategy and stream [`ChangeKind`] events, in apply order, to
//! a caller-supplied callback:
//!
//! | Call                                  | Strategy                          |
//! |---------------------------------------|-----------------------------------|
//! | `changes(.., None, target, ..)`       | single walk, every entry is `Add` |
//! | `changes(.., Some(base), target, ..)` | concurrent merge walk of both     |
//! | `diff_dir_changes(.., source, ..)`    | upper-directory walk with `lstat` |
//!
//! The callback runs on the calling task, synchronously with the walk, and
//! receives `(kind, path, metadata, error)`. `metadata` is `None` for
//! deletions; `error` carries a non-fatal problem attached to the event. A
//! callback error aborts the walk and is returned to the caller unchanged.
//! Events already delivered are not retracted.
//!
//! ## Example
//!
//! ```rust,no_run
//! use layerdiff::{changes, ChangeKind};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> layerdiff::Result<()> {
//! let cancel = CancellationToken::new();
//! changes(
//!     &cancel,
//!     Some(Path::new("/var/lib/layers/base")),
//!     Path::new("/var/lib/layers/target"),
//!     |kind, path, _info, _err| {
//!         if kind != ChangeKind::Unmodified {
//!             println!("{} {}", kind, path.display());
//!         }
//!         Ok(())
//!     },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::compare::DEFAULT_COMPARE_BUFFER_SIZE;
use crate::error::{DiffError, Result};
use crate::merge::{double_walk_diff, MergeOptions};
use crate::overlay;
use crate::types::{Change, ChangeKind, DiffSource, EntryInfo};
use crate::walk::add_dir_changes;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default capacity of each walker-to-merge channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Validated settings for a [`Differ`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Entries buffered between each walker and the merge loop
    pub channel_capacity: usize,
    /// Chunk size used when file content has to be compared
    pub compare_buffer_size: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            compare_buffer_size: DEFAULT_COMPARE_BUFFER_SIZE,
        }
    }
}

/// Computes changes between directory trees
///
/// A `Differ` is cheap to clone and holds no state between calls; every
/// structure a diff needs lives only for the duration of that diff.
#[derive(Debug, Clone, Default)]
pub struct Differ {
    options: DiffOptions,
    cancel: CancellationToken,
}

impl Differ {
    /// Create a differ with default options and a fresh cancellation token
    pub fn new() -> Self {
        Self::default()
    }

    /// Options in effect
    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    /// Token cancelling every diff started from this differ
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Compute the changes turning `base` into `target`
    ///
    /// With no base (or an empty base path) every entry of `target` is
    /// reported as an addition. Otherwise both trees are walked concurrently
    /// and merged.
    ///
    /// The single walk runs inline and blocks the calling task's worker
    /// thread until it finishes. Wrap the call in
    /// [`tokio::task::block_in_place`] (or run it on a dedicated runtime)
    /// when that matters.
    pub async fn changes<F>(&self, base: Option<&Path>, target: &Path, mut change_fn: F) -> Result<()>
    where
        F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
    {
        match base.filter(|b| !b.as_os_str().is_empty()) {
            None => {
                debug!("Using single walk diff for {:?}", target);
                let cancel = &self.cancel;
                if cancel.is_cancelled() {
                    return Err(DiffError::Cancelled);
                }
                add_dir_changes(target, |kind, path, info, err| {
                    if cancel.is_cancelled() {
                        return Err(DiffError::Cancelled);
                    }
                    change_fn(kind, path, info, err)
                })
            }
            Some(base) => {
                debug!("Using double walk diff for {:?} from {:?}", target, base);
                let options = MergeOptions {
                    channel_capacity: self.options.channel_capacity,
                    compare_buffer_size: self.options.compare_buffer_size,
                };
                double_walk_diff(&self.cancel, base, target, options, change_fn).await
            }
        }
    }

    /// Compute changes from a union filesystem's upper directory
    ///
    /// Only `diff_dir` is walked; `base_dir` is consulted one path at a time.
    ///
    /// The walk is synchronous filesystem work driven from this future, so it
    /// occupies a runtime worker until it returns. The callback is neither
    /// `Send` nor `'static`, which keeps the walk off `spawn_blocking`.
    /// Callers diffing large layers on a shared runtime should wrap the call
    /// in [`tokio::task::block_in_place`].
    pub async fn diff_dir_changes<F>(
        &self,
        base_dir: &Path,
        diff_dir: &Path,
        source: DiffSource,
        change_fn: F,
    ) -> Result<()>
    where
        F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
    {
        debug!("Using {} diff directory walk for {:?} from {:?}", source, diff_dir, base_dir);
        if self.cancel.is_cancelled() {
            return Err(DiffError::Cancelled);
        }
        overlay::diff_dir_changes(&self.cancel, base_dir, diff_dir, source, change_fn)
    }

    /// Run [`Differ::changes`] and collect the events
    pub async fn collect_changes(&self, base: Option<&Path>, target: &Path) -> Result<Vec<Change>> {
        let mut out = Vec::new();
        self.changes(base, target, |kind, path, _, _| {
            out.push(Change::new(kind, path));
            Ok(())
        })
        .await?;
        Ok(out)
    }
}

/// Builder for configuring a [`Differ`]
///
/// # Examples
///
/// ```rust
/// use layerdiff::DifferBuilder;
///
/// let differ = DifferBuilder::new()
///     .channel_capacity(256)
///     .compare_buffer_size(64 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(differ.options().channel_capacity, 256);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DifferBuilder {
    channel_capacity: Option<usize>,
    compare_buffer_size: Option<usize>,
    cancel: Option<CancellationToken>,
}

impl DifferBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries buffered between each walker and the merge loop
    ///
    /// Larger values let the walkers run further ahead of a slow callback at
    /// the cost of memory.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Chunk size for byte-for-byte file comparison
    pub fn compare_buffer_size(mut self, size: usize) -> Self {
        self.compare_buffer_size = Some(size);
        self
    }

    /// Tie diffs to an existing cancellation token
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate settings and build the differ
    ///
    /// # Errors
    ///
    /// [`DiffError::InvalidConfiguration`] when a size is zero.
    pub fn build(self) -> Result<Differ> {
        let defaults = DiffOptions::default();
        let options = DiffOptions {
            channel_capacity: self.channel_capacity.unwrap_or(defaults.channel_capacity),
            compare_buffer_size: self.compare_buffer_size.unwrap_or(defaults.compare_buffer_size),
        };
        if options.channel_capacity == 0 {
            return Err(DiffError::InvalidConfiguration(
                "channel capacity must be at least 1".to_string(),
            ));
        }
        if options.compare_buffer_size == 0 {
            return Err(DiffError::InvalidConfiguration(
                "compare buffer size must be at least 1".to_string(),
            ));
        }
        Ok(Differ {
            options,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

/// Compute the changes turning `base` into `target` with default options
///
/// See [`Differ::changes`].
pub async fn changes<F>(
    cancel: &CancellationToken,
    base: Option<&Path>,
    target: &Path,
    change_fn: F,
) -> Result<()>
where
    F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
{
    with_token(cancel).changes(base, target, change_fn).await
}

/// Compute changes from an upper directory with default options
///
/// See [`Differ::diff_dir_changes`].
pub async fn diff_dir_changes<F>(
    cancel: &CancellationToken,
    base_dir: &Path,
    diff_dir: &Path,
    source: DiffSource,
    change_fn: F,
) -> Result<()>
where
    F: FnMut(ChangeKind, &Path, Option<&EntryInfo>, Option<DiffError>) -> Result<()>,
{
    with_token(cancel)
        .diff_dir_changes(base_dir, diff_dir, source, change_fn)
        .await
}

/// Collect the changes turning `base` into `target`
pub async fn collect_changes(
    cancel: &CancellationToken,
    base: Option<&Path>,
    target: &Path,
) -> Result<Vec<Change>> {
    with_token(cancel).collect_changes(base, target).await
}

fn with_token(cancel: &CancellationToken) -> Differ {
    Differ {
        options: DiffOptions::default(),
        cancel: cancel.clone(),
    }
}
