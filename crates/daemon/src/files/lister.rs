//! Directory listing rendered as chat-sized text messages.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// A message is flushed before it would reach this many bytes.
pub const MESSAGE_LIMIT: usize = 400;

/// Entry names are left-aligned to this width.
const NAME_WIDTH: usize = 50;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Errors that can occur during directory listing.
#[derive(Debug, Error)]
pub enum ListError {
    /// The requested path is not a directory.
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Reading the directory failed.
    #[error("failed to read directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One directory entry as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    /// Entry name (not full path).
    pub name: String,
    pub is_dir: bool,
    /// Size in bytes as reported by the filesystem.
    pub size: u64,
}

impl ListedEntry {
    /// Render as `<d|-> <name>: <size>\n`.
    pub fn render_line(&self) -> String {
        let kind = if self.is_dir { 'd' } else { '-' };
        format!(
            "{} {:<width$}: {}\n",
            kind,
            self.name,
            format_size(self.size),
            width = NAME_WIDTH
        )
    }
}

/// Lists directories and splits the report into bounded messages.
#[derive(Debug, Clone)]
pub struct DirectoryLister {
    /// Whether dotfiles are listed.
    include_hidden: bool,
}

impl DirectoryLister {
    /// Create a lister that shows every entry.
    pub fn new() -> Self {
        Self {
            include_hidden: true,
        }
    }

    /// Set whether entries starting with '.' are listed.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// List a directory in storage enumeration order.
    ///
    /// Entries whose metadata cannot be read are skipped.
    pub fn list(&self, dir: &Path) -> Result<Vec<ListedEntry>, ListError> {
        let metadata = fs::metadata(dir).map_err(|source| ListError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(ListError::NotADirectory(dir.to_path_buf()));
        }

        let entries = fs::read_dir(dir).map_err(|source| ListError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut results = Vec::new();
        for entry_result in entries {
            let entry = match entry_result {
                Ok(e) => e,
                Err(e) => {
                    debug!(path = %dir.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            if !self.include_hidden && name.starts_with('.') {
                continue;
            }

            // Does not follow symlinks
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    debug!(name = %name, error = %e, "Skipping entry without metadata");
                    continue;
                }
            };

            results.push(ListedEntry {
                name,
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }

        Ok(results)
    }

    /// Render entries into messages of fewer than [`MESSAGE_LIMIT`] bytes.
    ///
    /// The first message starts with a `Files in <dir>:` header. The last
    /// buffer is always returned, so an empty directory yields the header.
    pub fn render(&self, dir: &Path, entries: &[ListedEntry]) -> Vec<String> {
        let mut messages = Vec::new();
        let mut buffer = format!("Files in {}:\n", dir.display());

        for entry in entries {
            let line = entry.render_line();
            if buffer.len() + line.len() >= MESSAGE_LIMIT && !buffer.is_empty() {
                messages.push(std::mem::take(&mut buffer));
            }
            buffer.push_str(&line);
        }

        messages.push(buffer);
        messages
    }

    /// List and render in one step.
    pub fn report(&self, dir: &Path) -> Result<Vec<String>, ListError> {
        let entries = self.list(dir)?;
        Ok(self.render(dir, &entries))
    }
}

impl Default for DirectoryLister {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable size with integer truncation.
pub fn format_size(bytes: u64) -> String {
    if bytes < KIB {
        format!("{} B", bytes)
    } else if bytes < MIB {
        format!("{} KB", bytes / KIB)
    } else if bytes < GIB {
        format!("{} MB", bytes / MIB)
    } else {
        format!("{} GB", bytes / GIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str, is_dir: bool, size: u64) -> ListedEntry {
        ListedEntry {
            name: name.to_string(),
            is_dir,
            size,
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1 KB");
        assert_eq!(format_size(1048575), "1023 KB");
        assert_eq!(format_size(1048576), "1 MB");
        assert_eq!(format_size(1073741823), "1023 MB");
        assert_eq!(format_size(1073741824), "1 GB");
        assert_eq!(format_size(5 * 1073741824 + 1), "5 GB");
    }

    #[test]
    fn test_render_line() {
        let line = entry("notes.txt", false, 2048).render_line();
        assert!(line.starts_with("- notes.txt "));
        assert!(line.ends_with(": 2 KB\n"));
        assert_eq!(line.len(), 2 + NAME_WIDTH + ": 2 KB\n".len());

        let dir_line = entry("photos", true, 4096).render_line();
        assert!(dir_line.starts_with("d photos"));
    }

    #[test]
    fn test_list_directory() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("subdir")).unwrap();
        fs::write(temp_dir.path().join("file.txt"), "Hello").unwrap();
        fs::write(temp_dir.path().join(".hidden"), "Hidden").unwrap();

        let lister = DirectoryLister::new();
        let mut entries = lister.list(temp_dir.path()).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, ".hidden");
        assert_eq!(entries[1], entry("file.txt", false, 5));
        assert_eq!(entries[2].name, "subdir");
        assert!(entries[2].is_dir);
    }

    #[test]
    fn test_list_without_hidden() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("file.txt"), "Hello").unwrap();
        fs::write(temp_dir.path().join(".hidden"), "Hidden").unwrap();

        let lister = DirectoryLister::new().include_hidden(false);
        let entries = lister.list(temp_dir.path()).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "file.txt");
    }

    #[test]
    fn test_list_not_a_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "Hello").unwrap();

        let result = DirectoryLister::new().list(&file);
        assert!(matches!(result, Err(ListError::NotADirectory(_))));
    }

    #[test]
    fn test_list_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let result = DirectoryLister::new().list(&temp_dir.path().join("gone"));
        assert!(matches!(result, Err(ListError::Io { .. })));
    }

    #[test]
    fn test_render_empty_directory_yields_header() {
        let lister = DirectoryLister::new();
        let messages = lister.render(Path::new("/data"), &[]);
        assert_eq!(messages, vec!["Files in /data:\n".to_string()]);
    }

    #[test]
    fn test_render_chunks_below_limit() {
        let lister = DirectoryLister::new();
        let entries: Vec<ListedEntry> = (0..20)
            .map(|i| entry(&format!("file_{:02}.bin", i), false, i * 1000))
            .collect();

        let messages = lister.render(Path::new("/data"), &entries);

        // Each line is 61 bytes, so several messages are needed
        assert!(messages.len() > 1);
        assert!(messages.iter().all(|m| m.len() < MESSAGE_LIMIT));
        assert!(messages[0].starts_with("Files in /data:\n"));
        assert!(!messages[1].starts_with("Files in"));

        let joined: String = messages.concat();
        let expected: String = std::iter::once("Files in /data:\n".to_string())
            .chain(entries.iter().map(|e| e.render_line()))
            .collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn test_render_flushes_at_threshold() {
        let lister = DirectoryLister::new();
        let header = "Files in /d:\n";
        // "- <name>: <size>\n"
        let fixed = 5 + format_size(1).len();

        // Exactly at the limit: flushed
        let name = "a".repeat(MESSAGE_LIMIT - header.len() - fixed);
        let entries = vec![entry(&name, false, 1)];
        let line = entries[0].render_line();
        assert_eq!(header.len() + line.len(), MESSAGE_LIMIT);
        let messages = lister.render(Path::new("/d"), &entries);
        assert_eq!(messages, vec![header.to_string(), line]);

        // One byte under: kept together
        let name = "a".repeat(MESSAGE_LIMIT - header.len() - fixed - 1);
        let entries = vec![entry(&name, false, 1)];
        let messages = lister.render(Path::new("/d"), &entries);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].len(), MESSAGE_LIMIT - 1);
    }

    #[test]
    fn test_report_lists_and_renders() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), vec![0u8; 1536]).unwrap();

        let messages = DirectoryLister::new().report(temp_dir.path()).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("- a.txt"));
        assert!(messages[0].contains(": 1 KB\n"));
    }
}
