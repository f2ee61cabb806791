//! # layerdiff - ordered filesystem changes between directory trees
//!
//! Computes the changes that turn one directory tree into another, as an
//! ordered stream a container runtime can apply front to back to build an
//! image layer, a checkpoint diff, or a change list.
//!
//! ## Overview
//!
//! Every change is a [`ChangeKind`] plus a rooted path relative to the diffed
//! tree (`/etc/hosts`, never `/var/lib/.../etc/hosts`):
//!
//! - `Add` - the path only exists in the target tree
//! - `Modify` - the path exists in both trees and differs
//! - `Delete` - the path only exists in the base tree
//! - `Unmodified` - the path is unchanged but is a hard-linked entry the
//!   consumer needs to see again to re-create the link
//!
//! Events are delivered in *apply order*: a depth-first order in which a
//! directory precedes its contents. Applying them in the order received to a
//! copy of the base tree reproduces the target tree.
//!
//! ## Strategies
//!
//! - **Single walk** - no base tree; every entry is an addition.
//! - **Merge walk** - two trees walked concurrently by two blocking tasks and
//!   merged on the calling task. Removed directories produce one `Delete`;
//!   their contents are implied.
//! - **Diff directory walk** - the target is a union filesystem upper
//!   directory. Only the upper directory is walked; whiteout markers become
//!   deletions, and parents of added or deleted paths are reported as modified.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use layerdiff::{collect_changes, diff_dir_changes, DiffSource};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> layerdiff::Result<()> {
//! let cancel = CancellationToken::new();
//!
//! // Two arbitrary trees
//! for change in collect_changes(&cancel, Some(Path::new("./base")), Path::new("./rootfs")).await? {
//!     println!("{}", change);
//! }
//!
//! // An overlay upper directory against its lower directory
//! diff_dir_changes(
//!     &cancel,
//!     Path::new("/var/lib/overlay/lower"),
//!     Path::new("/var/lib/overlay/upper"),
//!     DiffSource::Overlay,
//!     |kind, path, _info, err| {
//!         if let Some(err) = err {
//!             eprintln!("warning: {}: {}", path.display(), err);
//!         }
//!         println!("{} {}", kind, path.display());
//!         Ok(())
//!     },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Content Equality
//!
//! Files present in both trees are compared by metadata first: type, mode,
//! ownership, size and modification time. When the seconds match but exactly
//! one side has a zero nanosecond part, the timestamp was probably truncated
//! by an archive round trip, and the file contents are compared byte for
//! byte instead.
//!
//! ## Cancellation and Errors
//!
//! Every entry point takes a `tokio_util` [`CancellationToken`]. Cancelling
//! it stops all walker tasks and the call returns [`DiffError::Cancelled`].
//! Any other error (I/O, a failing callback) stops the walk as well and the
//! first error is returned. Changes already delivered are not retracted.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken
//!
//! ## Module Organization
//!
//! - [`differ`]: Entry points, [`Differ`] and [`DifferBuilder`]
//! - [`walk`]: Ordered tree walking and the single-tree emitter
//! - [`compare`]: Content equality between two versions of a path
//! - [`overlay`]: Upper-directory walk and whiteout handling
//! - [`types`]: Changes, entry metadata and diff sources
//! - [`error`]: Error types and handling

// Public API modules
pub mod compare;
pub mod differ;
pub mod error;
pub mod overlay;
pub mod types;
pub mod walk;

// Internal modules (not part of public API)
mod merge;

// Re-export main types for convenience
pub use differ::{changes, collect_changes, diff_dir_changes, DiffOptions, Differ, DifferBuilder};
pub use error::{DiffError, Result};
pub use types::*;
