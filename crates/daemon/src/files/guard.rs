//! Root confinement for every user-supplied path.
//!
//! The guard owns the canonical root directory and the mutable working
//! directory. Paths are resolved lexically first (so a rejected path never
//! touches the filesystem) and re-checked after canonicalization when the
//! working directory moves, which catches symlinks pointing out of the root.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info};

/// Argument of `/cd` that resets the working directory to the root.
pub const RESET_FLAG: &str = "-r";

/// Errors that can occur while resolving or changing directories.
#[derive(Debug, Error)]
pub enum PathError {
    /// The path escapes the root (or, for relative input, the working directory).
    #[error("path is outside the root directory: {0}")]
    OutsideRoot(PathBuf),

    /// Creating the directory or one of its ancestors failed.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The directory exists but cannot become the working directory.
    #[error("failed to change directory to {path}: {source}")]
    ChangeDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target exists and is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The configured root directory is unusable.
    #[error("invalid root directory {path}: {source}")]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves paths against a fixed root and tracks the working directory.
///
/// `current` is always the root or one of its descendants.
#[derive(Debug)]
pub struct PathGuard {
    /// Canonical root directory.
    root: PathBuf,
    /// The root as configured, made absolute and lexically normalized.
    /// Differs from `root` when the configured path goes through a symlink.
    configured: PathBuf,
    /// Canonical working directory.
    current: RwLock<PathBuf>,
}

impl PathGuard {
    /// Create a guard rooted at `root`.
    ///
    /// The root must exist and is canonicalized once here.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, PathError> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).map_err(|source| PathError::InvalidRoot {
            path: root.to_path_buf(),
            source,
        })?;

        if !canonical.is_dir() {
            return Err(PathError::NotADirectory(canonical));
        }

        let configured = std::path::absolute(root)
            .map(|path| normalize(&path))
            .map_err(|source| PathError::InvalidRoot {
                path: root.to_path_buf(),
                source,
            })?;

        Ok(Self {
            current: RwLock::new(canonical.clone()),
            root: canonical,
            configured,
        })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current working directory.
    pub fn current_dir(&self) -> PathBuf {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve a requested path without touching the filesystem.
    ///
    /// Absolute paths must lie under the root, spelled either canonically or
    /// as configured; the latter are rebased onto the canonical root.
    /// Relative paths are joined to the working directory and must stay
    /// under it.
    pub fn resolve<P: AsRef<Path>>(&self, requested: P) -> Result<PathBuf, PathError> {
        let requested = requested.as_ref();

        if requested.is_absolute() {
            let normalized = normalize(requested);
            if normalized.starts_with(&self.root) {
                return Ok(normalized);
            }
            return match normalized.strip_prefix(&self.configured) {
                Ok(rest) => Ok(self.root.join(rest)),
                Err(_) => Err(PathError::OutsideRoot(requested.to_path_buf())),
            };
        }

        let base = self.current_dir();
        let normalized = normalize(&base.join(requested));
        if !normalized.starts_with(&base) {
            return Err(PathError::OutsideRoot(requested.to_path_buf()));
        }
        Ok(normalized)
    }

    /// Move the working directory, creating it if needed.
    ///
    /// [`RESET_FLAG`] resets to the root. The working directory is only
    /// updated after the directory exists and has been re-validated.
    pub fn change_directory(&self, requested: &str) -> Result<PathBuf, PathError> {
        if requested == RESET_FLAG {
            self.set_current(self.root.clone());
            info!(path = %self.root.display(), "Working directory reset to root");
            return Ok(self.root.clone());
        }

        let target = self.resolve(requested)?;

        fs::create_dir_all(&target).map_err(|source| PathError::CreateDir {
            path: target.clone(),
            source,
        })?;
        debug!(path = %target.display(), "Ensured directory exists");

        let canonical = fs::canonicalize(&target).map_err(|source| PathError::ChangeDir {
            path: target.clone(),
            source,
        })?;

        // Symlinks inside the root may point anywhere
        if !canonical.starts_with(&self.root) {
            return Err(PathError::OutsideRoot(canonical));
        }

        let metadata = fs::metadata(&canonical).map_err(|source| PathError::ChangeDir {
            path: canonical.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(PathError::NotADirectory(canonical));
        }

        self.set_current(canonical.clone());
        info!(path = %canonical.display(), "Working directory changed");
        Ok(canonical)
    }

    fn set_current(&self, path: PathBuf) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = path;
    }
}

/// Fold `.` and `..` components without consulting the filesystem.
///
/// `..` never climbs above the filesystem root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(name) => out.push(name),
        }
    }
    out
}
