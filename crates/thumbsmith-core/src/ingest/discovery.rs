//! File discovery for finding uploadable images in directories.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::content_type_for_path;
use crate::config::IngestConfig;

/// Discovers image files whose type the ingest path accepts.
pub struct FileDiscovery {
    allowed_types: Vec<String>,
}

/// Information about a discovered file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Full path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// MIME type implied by the extension
    pub content_type: &'static str,
}

impl FileDiscovery {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            allowed_types: config
                .allowed_types
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    /// Discover all supported image files at a path.
    ///
    /// If path is a file, returns it if supported.
    /// If path is a directory, recursively finds all supported files.
    pub fn discover(&self, path: &Path) -> Vec<DiscoveredFile> {
        if path.is_file() {
            return self
                .describe(path, std::fs::metadata(path).ok().map(|m| m.len()))
                .into_iter()
                .collect();
        }

        let mut files: Vec<DiscoveredFile> = WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let size = entry.metadata().ok().map(|m| m.len());
                self.describe(entry.path(), size)
            })
            .collect();

        // Sort by path for deterministic ordering
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    fn describe(&self, path: &Path, size: Option<u64>) -> Option<DiscoveredFile> {
        let content_type = self.supported_type(path)?;
        Some(DiscoveredFile {
            path: path.to_path_buf(),
            size: size?,
            content_type,
        })
    }

    /// Content type of `path` if uploads of that type are accepted.
    fn supported_type(&self, path: &Path) -> Option<&'static str> {
        content_type_for_path(path)
            .filter(|ct| self.allowed_types.iter().any(|t| t.as_str() == *ct))
    }

    /// Get total size of all discovered files.
    pub fn total_size(files: &[DiscoveredFile]) -> u64 {
        files.iter().map(|f| f.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_type() {
        let discovery = FileDiscovery::new(&IngestConfig::default());

        assert_eq!(discovery.supported_type(Path::new("test.jpg")), Some("image/jpeg"));
        assert_eq!(discovery.supported_type(Path::new("test.JPG")), Some("image/jpeg"));
        assert_eq!(discovery.supported_type(Path::new("test.jpeg")), Some("image/jpeg"));
        assert_eq!(discovery.supported_type(Path::new("test.png")), Some("image/png"));
        // webp is recognised but not accepted by default
        assert_eq!(discovery.supported_type(Path::new("test.webp")), None);
        assert_eq!(discovery.supported_type(Path::new("test.txt")), None);
    }

    #[test]
    fn test_discover_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.png"), b"12").unwrap();
        std::fs::write(dir.path().join("nested/a.jpg"), b"1234").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let discovery = FileDiscovery::new(&IngestConfig::default());
        let files = discovery.discover(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].path.ends_with("b.png"));
        assert_eq!(files[1].content_type, "image/jpeg");
        assert_eq!(FileDiscovery::total_size(&files), 6);

        let single = discovery.discover(&dir.path().join("b.png"));
        assert_eq!(single.len(), 1);
    }
}
