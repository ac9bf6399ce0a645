//! Filesystem side of the bot.
//!
//! - [`guard`]: confines user paths to the root directory and tracks the
//!   current directory
//! - [`lister`]: renders directory contents as chat messages
//! - [`download`]: streams attachments to disk with temp-file + rename
//!
//! # Security
//!
//! Every user-supplied path goes through [`PathGuard`]. Directories are
//! canonicalized after creation so symlinks cannot lead outside the root,
//! and download filenames must be a single path component.

pub mod download;
pub mod guard;
pub mod lister;

pub use download::{
    ByteStream, DownloadError, DownloadManager, DownloadOutcome, DownloadRequest, FileSource,
};
pub use guard::{PathError, PathGuard};
pub use lister::{format_size, DirectoryLister, ListError, ListedEntry};
